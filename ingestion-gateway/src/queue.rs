use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};

use crate::event::ProcessedEvent;
use crate::prometheus::report_queue_depth;

#[derive(Debug)]
pub enum EnqueueError {
    Full(ProcessedEvent),
    Closed(ProcessedEvent),
}

/// Bounded FIFO between the HTTP handlers and the publish workers.
///
/// Producers never wait: a full queue is reported straight back so the
/// handler can shed load. Consumers share the receiving end.
#[derive(Clone)]
pub struct IntakeQueue {
    sender: mpsc::Sender<ProcessedEvent>,
    receiver: Arc<Mutex<mpsc::Receiver<ProcessedEvent>>>,
    capacity: usize,
    closed: Arc<AtomicBool>,
}

impl IntakeQueue {
    pub fn new(capacity: NonZeroUsize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.get());
        IntakeQueue {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            capacity: capacity.get(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn try_enqueue(&self, event: ProcessedEvent) -> Result<(), EnqueueError> {
        if self.is_closed() {
            return Err(EnqueueError::Closed(event));
        }
        let result = match self.sender.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) => Err(EnqueueError::Full(event)),
            Err(TrySendError::Closed(event)) => Err(EnqueueError::Closed(event)),
        };
        report_queue_depth(self.depth());
        result
    }

    /// Waits for the next event. Returns None once the queue is closed and empty.
    pub async fn dequeue(&self) -> Option<ProcessedEvent> {
        let mut receiver = self.receiver.lock().await;
        if self.is_closed() {
            return receiver.try_recv().ok();
        }
        let event = receiver.recv().await;
        report_queue_depth(self.depth());
        event
    }

    pub async fn try_dequeue(&self) -> Option<ProcessedEvent> {
        let event = self.receiver.lock().await.try_recv().ok();
        report_queue_depth(self.depth());
        event
    }

    pub fn depth(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stops accepting new events. Queued events stay available to consumers.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
