//! Shared infrastructure for the rotor workspace: the runtime abstraction,
//! tunable knobs, shutdown plumbing, and the wire-level data model.

pub mod errors;
pub mod knobs;
pub mod runtime;
pub mod sha256;
pub mod shutdown;
pub mod types;
