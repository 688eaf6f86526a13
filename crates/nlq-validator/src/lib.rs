//! SQL safety validation for the nlq query gateway
//!
//! Model-generated SQL is untrusted text. This crate parses it with a real
//! dialect-aware parser, proves it read-only, applies the function blacklist
//! and identifier policy, injects the row cap, and reserializes. Only the
//! reserialized text ever reaches the executor, carried inside the
//! [`ValidatedSql`] witness that cannot be constructed anywhere else.

pub mod policy;
pub mod validator;

pub use policy::SafetyPolicy;
pub use validator::{ValidatedSql, validate};
