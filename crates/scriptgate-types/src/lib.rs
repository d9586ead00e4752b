//! Pure data types for scriptgate: operations, tool descriptors, registry
//! entries, credentials and execution envelopes.
//!
//! This crate is a leaf dependency with no async runtime, no interpreter, no I/O.
//! Front-ends and test fixtures can share the gateway's data contract without
//! pulling in scriptgate-kernel's network and scripting stack.

pub mod credential;
pub mod error;
pub mod execution;
pub mod function;
pub mod operation;
pub mod tool;

// Flat re-exports for convenience
pub use credential::*;
pub use error::*;
pub use execution::*;
pub use function::*;
pub use operation::*;
pub use tool::*;
