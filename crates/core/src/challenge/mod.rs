//! DNS-01 challenge generation, propagation checks and artifact export.

mod coordinator;
mod error;
mod export;
mod parse;

pub use coordinator::{values_present, ChallengeCoordinator};
pub use error::{ChallengeError, ToolStage};
pub use export::{describe, download_links, export_dir, ArtifactFile, ArtifactSet, DownloadLink};
pub use parse::{challenge_host, parse_challenge_output};
