//! Infrastructure layer: the event log boundary and everything that runs
//! against it (routing, subscription, lanes, dispatch, acknowledgement).

pub mod ack;
pub mod config;
pub mod connector;
pub mod dead_letter;
pub mod dispatch;
pub mod event_log;
pub mod metrics;
pub mod retry;
pub mod routing;
pub mod shutdown;
pub mod subscriber;
pub mod volatile;
pub mod workers;


pub use ack::{AcknowledgeError, Acknowledger, LogAcknowledger};
pub use config::{ConfigError, ConsumerConfig};
pub use connector::{ConnectorError, ReconnectPolicy, SubscriptionConnector};
pub use dead_letter::{DeadLetter, DeadLetterSink, InMemoryDeadLetterSink};
pub use dispatch::{DispatchConfig, DispatchEngine, DispatchError, DispatchOutcome, Dispatcher};
pub use event_log::{DropReason, EventLog, EventLogError, InMemoryEventLog};
pub use metrics::{InMemoryMetrics, MetricsSink, NoopMetrics};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use routing::{RoutingDefinition, SetupOutcome, StreamRouter, SubscriptionTarget};
pub use shutdown::ShutdownSignal;
pub use subscriber::{EventSubscriber, SubscriberError};
pub use volatile::VolatileSubscriber;
pub use workers::{EnqueueOutcome, LaneConfig, LaneContext, OverflowPolicy, WorkerPool};
