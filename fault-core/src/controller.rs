use crate::host::RequestId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

/// Wakes request handlers that a delay fault parked.
///
/// A request is registered before the filter sees it, so a resume can only
/// land on a request that is still in flight. Once the handler forgets the
/// request, a late resume is a miss and leaves nothing behind.
#[derive(Debug, Clone, Default)]
pub struct ResumeController {
    /// Maps Request ID -> sender that releases the handler
    slots: Arc<DashMap<RequestId, oneshot::Sender<()>>>,
}

/// Receiving side of a registered request.
#[derive(Debug)]
pub struct ResumeSignal {
    rx: oneshot::Receiver<()>,
}

impl ResumeSignal {
    /// Resolve once the request may continue. A resume that arrived before
    /// this call resolves it immediately; a dropped sender counts as resumed.
    pub async fn wait(self) {
        let _ = self.rx.await;
    }
}

impl ResumeController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a request resumable. Registering again replaces the old signal.
    pub fn register(&self, request: RequestId) -> ResumeSignal {
        let (tx, rx) = oneshot::channel();
        self.slots.insert(request, tx);
        ResumeSignal { rx }
    }

    /// Let a registered request go on. Returns false if it is not registered
    /// or its waiter is gone.
    pub fn resume(&self, request: RequestId) -> bool {
        match self.slots.remove(&request) {
            Some((_, tx)) => {
                debug!(%request, "Resuming request");
                tx.send(()).is_ok()
            }
            None => {
                debug!(%request, "Resume for a request that is no longer registered");
                false
            }
        }
    }

    /// Drop whatever is held for this request.
    pub fn forget(&self, request: RequestId) {
        self.slots.remove(&request);
    }

    pub fn pending(&self) -> usize {
        self.slots.len()
    }
}
