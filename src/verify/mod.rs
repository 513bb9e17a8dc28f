//! Validation for plans and caller-supplied paths.

pub mod preflight;
pub mod rules;

pub use preflight::preflight_checks;
pub use rules::{validate_not_artifact, validate_path_within_root, validate_relative_path};
