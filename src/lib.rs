pub mod pipeline;
pub mod queue;
pub mod runtime;

pub use pipeline::batcher::FlushReason;
pub use pipeline::context::PipelineContext;
pub use pipeline::outstanding::OutstandingWork;
pub use pipeline::poller::PollerHandle;
pub use pipeline::service::Service;
pub use pipeline::shutdown::ShutdownPhase;
pub use pipeline::signal::Completion;
pub use queue::{
    InMemoryQueue, Message, MessageQueue, QueueError, QueueFuture, QueueOperation,
    MAX_DELETE_BATCH_SIZE, MAX_RECEIVE_BATCH_SIZE,
};
pub use runtime::config::{WorkerConfig, WorkerConfigBuilder, WorkerConfigParams};
pub use runtime::handler::{FixedDelayHandler, HandlerError, HandlerFuture, MessageHandler};
pub use runtime::health::Health;
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
