// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

//! csrsign Controller - drives CertificateSigningRequests through the CA's
//! submit/poll protocol
//!
//! - `filter`: which CSRs this signer acts on
//! - `pickup`: whether a request is already in flight at the CA
//! - `reconciler`: one reconciliation pass for one CSR
//! - `queue` / `controller`: the trigger side, delivering keys to workers

pub mod controller;
pub mod error;
pub mod filter;
pub mod mutation;
pub mod pickup;
pub mod queue;
pub mod reconciler;
pub mod store;

// Re-export primary types
pub use controller::{ControllerConfig, CsrController};
pub use error::{ControllerError, Result};
pub use filter::{CsrFilter, FilterPredicate, Rejection};
pub use mutation::{CsrPatch, EngineFields, FieldChange};
pub use pickup::has_pending_pickup;
pub use queue::WorkQueue;
pub use reconciler::{
    CsrState, Directive, MutationOutcome, ReconcileOutcome, Reconciler, DEFAULT_RETRY_DELAY,
};
pub use store::CsrStore;
