//! csrsign API Server - Kubernetes-style REST API for CertificateSigningRequests
//!
//! This crate provides:
//! - Axum-based HTTP server
//! - certificates.k8s.io/v1 CertificateSigningRequest endpoints
//! - Status and approval subresources
//! - WATCH over server-sent events

pub mod error;
pub mod handlers;
pub mod response;
pub mod server;
pub mod state;
pub mod validation;
pub mod watch;

// Re-export commonly used types
pub use error::{ApiError, Result};
pub use server::{ApiServer, Config};
pub use state::AppState;
