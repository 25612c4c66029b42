//! Testing utilities and mock implementations.
//!
//! Mocks stand in for the external ACME client and the DNS resolver so the
//! whole order lifecycle can run without network access or a CA.
//!
//! # Example
//!
//! ```rust,ignore
//! use certdesk_core::testing::{MockAcmeTool, MockTxtResolver};
//!
//! let tool = MockAcmeTool::new(store_dir.path());
//! let resolver = MockTxtResolver::new();
//!
//! // Publish the records the mock tool hands out
//! resolver
//!     .publish("_acme-challenge.example.com", &[MockAcmeTool::token_for("example.com")])
//!     .await;
//! ```

mod mock_acme_tool;
mod mock_txt_resolver;

pub use mock_acme_tool::{MockAcmeTool, RecordedCall, ToolCommand};
pub use mock_txt_resolver::MockTxtResolver;
