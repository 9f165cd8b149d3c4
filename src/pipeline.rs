//! Pipeline stages and their coordination: polling, dispatch, per-message
//! handling, batching, acknowledgment, and the ordered shutdown handshake.

pub mod acknowledger;
pub mod backoff;
pub mod batcher;
pub mod context;
pub mod dispatcher;
pub mod handler_task;
pub mod outstanding;
pub mod poller;
pub mod service;
pub mod shutdown;
pub mod signal;
