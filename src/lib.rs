//! splice library crate
//!
//! Turns a natural-language task into declaration-level edits in a Python
//! workspace. The CLI in `main.rs` is a thin shell over [`pipeline::Pipeline`];
//! benchmarks exercise the index directly.

pub mod apply;
pub mod cancel;
pub mod config;
pub mod context;
pub mod error;
pub mod index;
pub mod llm;
pub mod pipeline;
pub mod util;
pub mod workspace;

pub use cancel::CancelToken;
pub use error::{SpliceError, SpliceResult};
