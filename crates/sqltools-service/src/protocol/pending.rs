//! Outgoing requests awaiting a response.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::types::{RequestId, ServiceError, ServiceResult};

pub type PendingReply = ServiceResult<Value>;

#[derive(Default)]
struct Inner {
    waiting: HashMap<RequestId, oneshot::Sender<PendingReply>>,
    closed: bool,
}

/// Correlates outgoing request ids with their completion handles.
#[derive(Default)]
pub struct PendingRequests {
    inner: Mutex<Inner>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Track `id` and return the receiver its reply will arrive on.
    pub fn register(&self, id: RequestId) -> ServiceResult<oneshot::Receiver<PendingReply>> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(ServiceError::HostStopped);
        }
        if inner.waiting.contains_key(&id) {
            return Err(ServiceError::InternalError(format!(
                "request id {id} is already pending"
            )));
        }
        let (tx, rx) = oneshot::channel();
        inner.waiting.insert(id, tx);
        Ok(rx)
    }

    /// Deliver a reply. Fails with `UnknownResponseId` when nothing waits on `id`.
    pub fn complete(&self, id: &RequestId, reply: PendingReply) -> ServiceResult<()> {
        let sender = self
            .lock()
            .waiting
            .remove(id)
            .ok_or_else(|| ServiceError::UnknownResponseId(id.to_string()))?;
        if sender.send(reply).is_err() {
            tracing::debug!("Caller for request {id} went away before its reply arrived");
        }
        Ok(())
    }

    pub fn remove(&self, id: &RequestId) {
        self.lock().waiting.remove(id);
    }

    /// Fail every waiter with `RequestCancelled` and refuse new registrations.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = {
            let mut inner = self.lock();
            inner.closed = true;
            inner.waiting.drain().collect()
        };
        let count = drained.len();
        for (_, sender) in drained {
            let _ = sender.send(Err(ServiceError::RequestCancelled));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.lock().waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
