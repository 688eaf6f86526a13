//! HTTP surface for the nlq query gateway
//!
//! Thin request routing over the orchestrator: the pipeline semantics live
//! below this crate, the router only decodes requests and encodes responses.

pub mod rest;
pub mod runtime;

pub use rest::{AppState, create_router};
pub use runtime::{Gateway, serve};
