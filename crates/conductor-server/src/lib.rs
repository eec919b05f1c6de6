//! # Conductor Server
//!
//! The [`Engine`] facade wiring queue, workers, recovery, scheduler and
//! monitor together, plus the startup helpers used by the binary.

pub mod engine;
pub mod startup;

pub use engine::Engine;
