//! Core domain models
//!
//! This module defines the configuration document, the expanded build
//! matrix, job environments and execution state.

pub mod build;
pub mod config;
pub mod environment;
pub mod matrix;
pub mod phase;
pub mod state;

pub use build::*;
pub use environment::JobEnvironment;
pub use phase::Phase;
pub use state::*;
