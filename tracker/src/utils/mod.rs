//! Utility modules for the DevBoost tracker.
//!
//! - [`debounce`]: Keyed debouncing for coalescing rapid document changes

pub mod debounce;

pub use debounce::{Debouncer, DebouncerError, DEFAULT_DEBOUNCE_MS};
