pub mod common;
pub mod csr;

// Re-export handler functions
pub use common::*;
pub use csr::*;
