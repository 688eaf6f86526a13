//! Database access for the nlq query gateway
//!
//! The registry names databases, the pool manager owns their connection
//! pools, and the executor runs validated SQL inside read-only transactions
//! with a statement timeout and row-cap truncation.

pub mod decode;
pub mod executor;
pub mod introspector;
pub mod pool;
pub mod registry;

pub use executor::{Execute, SqlExecutor};
pub use introspector::LiveIntrospector;
pub use pool::{Connection, PoolManager, PoolStatus, ShutdownReport};
pub use registry::{DatabaseDescriptor, DatabaseRegistry};
