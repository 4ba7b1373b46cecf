//! Atomic primitives with optional loom support.
//!
//! The reclamation protocol in `cell` and `slot` is exercised under the
//! [loom](https://docs.rs/loom) model checker when the `loom` feature is
//! enabled. Production builds use the plain `core` atomics.

#[cfg(not(feature = "loom"))]
pub(crate) use core::sync::atomic::{fence, AtomicU64, Ordering};

#[cfg(feature = "loom")]
pub(crate) use loom::sync::atomic::{fence, AtomicU64, Ordering};
