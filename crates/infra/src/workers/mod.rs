//! Partitioned lane workers.

pub mod lane;
pub mod partition;
pub mod pool;

pub use lane::{EnqueueOutcome, LaneConfig, OverflowPolicy, ParseOverflowPolicyError};
pub use partition::lane_for;
pub use pool::{LaneContext, WorkerPool, WorkerPoolError};
