pub mod bootstrap;
pub mod rebalance;
pub mod session;
pub mod sync_status;
pub mod undo;
