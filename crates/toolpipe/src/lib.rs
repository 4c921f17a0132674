//! Public facade crate for `toolpipe`.
//!
//! This crate intentionally contains no IO or provider-specific logic.
//! It re-exports the backend-agnostic types/traits from `toolpipe-core`.

pub use toolpipe_core::*;
