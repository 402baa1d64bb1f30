//! Shared DTOs for the patchship workspace.
//!
//! # Design constraints
//! - These types are read from config files and written to run artifacts.
//! - Prefer adding optional fields over changing semantics.

pub mod outcome;
pub mod patch;
pub mod step;

/// Schema identifiers.
pub mod schema {
    pub const PATCHSHIP_RUN_V1: &str = "patchship.run.v1";
}
