//! Immutable execution policy and command/path validation for Warden.
mod policy;
mod profiles;

pub use policy::{normalize_path, ExecPolicy, PolicyError, Validation};
pub use profiles::{
    profile_name, PolicyProfile, DEFAULT_FORBIDDEN_COMMANDS, DEFAULT_FORBIDDEN_PATTERNS,
};
