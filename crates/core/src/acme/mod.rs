//! External ACME client (acme.sh) invoked as a subprocess.

mod acme_sh;
mod error;
mod traits;
mod types;

pub use acme_sh::AcmeShTool;
pub use error::ToolError;
pub use traits::AcmeClient;
pub use types::{ArtifactPaths, ToolOutput, ARTIFACT_FILES};
