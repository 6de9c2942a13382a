use std::collections::VecDeque;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::debug;

/// What happens to a post when the mailbox is full.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OverflowPolicy {
    /// Evict the oldest queued message to make room. The poster never
    /// fails; the loss shows up on the drop counter.
    DropOldest,
    /// Refuse the post. `try_post` returns `false`; `post` waits for
    /// space.
    Reject,
}

struct Shared<M> {
    queue: Mutex<VecDeque<M>>,
    capacity: usize,
    policy: OverflowPolicy,
    dropped: AtomicU64,
    space: Notify,
}

/// Create a bounded single-reader mailbox. Senders clone freely.
pub fn mailbox<M>(capacity: usize, policy: OverflowPolicy) -> (MailboxSender<M>, MailboxReceiver<M>) {
    let shared = Arc::new(Shared {
        queue: Mutex::new(VecDeque::new()),
        capacity: capacity.max(1),
        policy,
        dropped: AtomicU64::new(0),
        space: Notify::new(),
    });
    (
        MailboxSender {
            shared: shared.clone(),
        },
        MailboxReceiver { shared },
    )
}

pub struct MailboxSender<M> {
    shared: Arc<Shared<M>>,
}

impl<M> Clone for MailboxSender<M> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<M> MailboxSender<M> {
    fn push(&self, msg: M) -> Result<(), M> {
        let mut q = self.shared.queue.lock().unwrap_or_else(|e| e.into_inner());
        if q.len() >= self.shared.capacity {
            match self.shared.policy {
                OverflowPolicy::DropOldest => {
                    q.pop_front();
                    let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(dropped, "mailbox overflow, oldest message dropped");
                }
                OverflowPolicy::Reject => return Err(msg),
            }
        }
        q.push_back(msg);
        Ok(())
    }

    /// Post without waiting. Under `DropOldest` this always succeeds.
    pub fn try_post(&self, msg: M) -> bool {
        self.push(msg).is_ok()
    }

    /// Like [`try_post`](Self::try_post), but hands the message back on
    /// refusal so the caller can retry with a blocking post.
    pub fn offer(&self, msg: M) -> Result<(), M> {
        self.push(msg)
    }

    /// Post, waiting for space if the policy rejects overflow.
    pub async fn post(&self, msg: M) {
        let mut msg = msg;
        loop {
            // Arm the wakeup before retrying so a concurrent pop between
            // the failed push and the await cannot be missed.
            let wait = self.shared.space.notified();
            match self.push(msg) {
                Ok(()) => return,
                Err(back) => {
                    msg = back;
                    wait.await;
                }
            }
        }
    }

    /// Messages evicted by overflow so far.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

pub struct MailboxReceiver<M> {
    shared: Arc<Shared<M>>,
}

impl<M> MailboxReceiver<M> {
    /// Pop the oldest pending message.
    pub fn try_recv(&mut self) -> Option<M> {
        let msg = {
            let mut q = self.shared.queue.lock().unwrap_or_else(|e| e.into_inner());
            q.pop_front()
        };
        if msg.is_some() {
            self.shared.space.notify_one();
        }
        msg
    }

    pub fn len(&self) -> usize {
        self.shared
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_oldest_keeps_the_newest_and_counts() {
        let (tx, mut rx) = mailbox(2, OverflowPolicy::DropOldest);
        assert!(tx.try_post(1));
        assert!(tx.try_post(2));
        assert!(tx.try_post(3));
        assert_eq!(tx.dropped(), 1);
        assert_eq!(rx.try_recv(), Some(2));
        assert_eq!(rx.try_recv(), Some(3));
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn reject_refuses_when_full() {
        let (tx, mut rx) = mailbox(1, OverflowPolicy::Reject);
        assert!(tx.try_post("a"));
        assert!(!tx.try_post("b"));
        assert_eq!(tx.dropped(), 0);
        assert_eq!(rx.try_recv(), Some("a"));
        assert!(tx.try_post("b"));
    }

    #[tokio::test]
    async fn blocking_post_waits_for_space() {
        let (tx, mut rx) = mailbox(1, OverflowPolicy::Reject);
        assert!(tx.try_post(1));

        let tx2 = tx.clone();
        let poster = tokio::spawn(async move {
            tx2.post(2).await;
        });

        tokio::task::yield_now().await;
        assert_eq!(rx.try_recv(), Some(1));
        poster.await.unwrap();
        assert_eq!(rx.try_recv(), Some(2));
    }
}
