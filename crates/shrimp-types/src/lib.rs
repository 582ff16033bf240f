//! Pure data types for shrimp: stage results and process results.
//!
//! This crate is a leaf dependency with no threads, no processes, no I/O.
//! It exists so that consumers can inspect pipeline results without pulling
//! in the execution engine.

pub mod process;
pub mod result;

// Flat re-exports for convenience
pub use process::*;
pub use result::*;
