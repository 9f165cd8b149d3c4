use std::sync::Arc;

/// A unit of work pulled from the source queue.
///
/// `receipt` is the acknowledgment token the queue needs to delete this
/// delivery later; it is unrelated to the payload. Cloning is cheap because
/// both fields are shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Message {
    receipt: Arc<str>,
    body: Arc<str>,
}

impl Message {
    pub fn new(receipt: impl Into<Arc<str>>, body: impl Into<Arc<str>>) -> Self {
        Self {
            receipt: receipt.into(),
            body: body.into(),
        }
    }

    /// Acknowledgment token for this delivery.
    pub fn receipt(&self) -> &str {
        &self.receipt
    }

    pub fn body(&self) -> &str {
        &self.body
    }
}
