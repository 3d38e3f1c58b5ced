// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

//! csrsign Signer - client boundary to the external certificate authority
//!
//! The CA is asynchronous: a request is submitted and answered with a pickup id,
//! and the certificate is collected later by polling that id.

pub mod error;
pub mod http;
pub mod mock;
pub mod traits;

// Re-export primary types
pub use error::{Result, SignerError};
pub use http::{HttpSigner, HttpSignerConfig};
pub use mock::MockSigner;
pub use traits::{Signer, SigningRequest};
