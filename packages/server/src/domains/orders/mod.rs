//! Orders: the lifecycle state machine, its storage contract, and the
//! background progressor.

pub mod lifecycle;
pub mod models;
pub mod progressor;
pub mod store;

pub use lifecycle::{NewOrder, OrderLifecycle};
pub use progressor::{run_progress_sweep, SweepStats};
pub use store::{BaseOrderStore, PgOrderStore, TransitionOutcome};
