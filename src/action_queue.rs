//! Cooperative FIFO queue for asynchronous work items.
//!
//! Actions are polled in enqueue order by a single driver task, so the
//! queue never re-enters itself. An action reports completion by
//! returning `true`; returning `false` keeps it at the head, to be retried
//! on the next scheduling opportunity (a [`ActionQueue::poke`] or a newly
//! enqueued action). A failing action is removed and its deferred
//! rejected.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Notify};

use crate::error::{DebugError, Result};

/// Future returned by one poll of an action.
pub type ActionFuture = Pin<Box<dyn Future<Output = Result<bool>> + Send>>;

type ActionFn = Box<dyn FnMut() -> ActionFuture + Send>;

struct QueuedAction {
    action: ActionFn,
    done: oneshot::Sender<Result<()>>,
}

/// Handle to the driver task. Cheap to clone.
#[derive(Clone)]
pub struct ActionQueue {
    tx: mpsc::UnboundedSender<QueuedAction>,
    kick: Arc<Notify>,
}

impl ActionQueue {
    /// Spawn the driver task and return its handle.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let kick = Arc::new(Notify::new());
        tokio::spawn(drive(rx, kick.clone()));
        Self { tx, kick }
    }

    /// Enqueue an action. The returned receiver resolves when the action
    /// reports completion, or rejects if it fails.
    pub fn run<F>(&self, action: F) -> oneshot::Receiver<Result<()>>
    where
        F: FnMut() -> ActionFuture + Send + 'static,
    {
        let (done, rx) = oneshot::channel();
        let queued = QueuedAction {
            action: Box::new(action),
            done,
        };
        if let Err(mpsc::error::SendError(queued)) = self.tx.send(queued) {
            let _ = queued.done.send(Err(DebugError::ConnectionClosed));
        }
        rx
    }

    /// Mark a scheduling opportunity: a retained head action is retried.
    pub fn poke(&self) {
        self.kick.notify_one();
    }
}

impl Default for ActionQueue {
    fn default() -> Self {
        Self::new()
    }
}

async fn drive(mut rx: mpsc::UnboundedReceiver<QueuedAction>, kick: Arc<Notify>) {
    let mut queue: VecDeque<QueuedAction> = VecDeque::new();

    loop {
        if queue.is_empty() {
            match rx.recv().await {
                Some(item) => queue.push_back(item),
                None => return,
            }
        }
        // Pick up anything else that is already waiting.
        while let Ok(item) = rx.try_recv() {
            queue.push_back(item);
        }

        while let Some(head) = queue.front_mut() {
            match (head.action)().await {
                Ok(true) => {
                    if let Some(item) = queue.pop_front() {
                        let _ = item.done.send(Ok(()));
                    }
                }
                Ok(false) => {
                    // Not done yet; hold the head until something changes.
                    tokio::select! {
                        _ = kick.notified() => {}
                        item = rx.recv() => match item {
                            Some(item) => queue.push_back(item),
                            None => return,
                        },
                    }
                }
                Err(e) => {
                    if let Some(item) = queue.pop_front() {
                        let _ = item.done.send(Err(e));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn immediate(result: Result<bool>) -> ActionFuture {
        Box::pin(async move { result })
    }

    #[tokio::test]
    async fn actions_complete_in_fifo_order() {
        let queue = ActionQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut receivers = Vec::new();
        for i in 0..5 {
            let order = order.clone();
            receivers.push(queue.run(move || {
                let order = order.clone();
                Box::pin(async move {
                    order.lock().unwrap().push(i);
                    Ok(true)
                }) as ActionFuture
            }));
        }

        for rx in receivers {
            rx.await.unwrap().unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn incomplete_action_is_retried_until_done() {
        let queue = ActionQueue::new();
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let mut rx = queue.run(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            immediate(Ok(n >= 2))
        });

        // Each poke is one scheduling opportunity; keep offering them
        // until the action reports completion.
        let done = loop {
            queue.poke();
            tokio::task::yield_now().await;
            if let Ok(result) = rx.try_recv() {
                break result;
            }
        };
        done.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retained_head_blocks_later_actions() {
        let queue = ActionQueue::new();
        let unblocked = Arc::new(AtomicU32::new(0));

        let gate = unblocked.clone();
        let head = queue.run(move || {
            // Completes only after the flag is raised.
            let ready = gate.load(Ordering::SeqCst) > 0;
            immediate(Ok(ready))
        });

        let ran = Arc::new(AtomicU32::new(0));
        let ran_clone = ran.clone();
        let second = queue.run(move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
            immediate(Ok(true))
        });

        tokio::task::yield_now().await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        unblocked.store(1, Ordering::SeqCst);
        queue.poke();
        head.await.unwrap().unwrap();
        second.await.unwrap().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_action_rejects_and_unblocks_queue() {
        let queue = ActionQueue::new();

        let failing = queue.run(|| immediate(Err(DebugError::Decode("boom".into()))));
        let after = queue.run(|| immediate(Ok(true)));

        assert!(failing.await.unwrap().is_err());
        after.await.unwrap().unwrap();
    }
}
