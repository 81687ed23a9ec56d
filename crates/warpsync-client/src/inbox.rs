//! Inbound message queue between the transport and the coordinator
//!
//! Any number of producers enqueue raw frames as they arrive; the
//! coordinator drains the queue once per tick, in arrival order.

use bytes::Bytes;
use tokio::sync::mpsc;

/// Producer handle given to the transport
pub type InboxSender = mpsc::UnboundedSender<Bytes>;

pub struct WarpInbox {
    tx: InboxSender,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl WarpInbox {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        WarpInbox { tx, rx }
    }

    pub fn sender(&self) -> InboxSender {
        self.tx.clone()
    }

    /// Everything queued so far; never waits
    pub fn drain(&mut self) -> Vec<Bytes> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

impl Default for WarpInbox {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_preserves_order() {
        let mut inbox = WarpInbox::new();
        let tx = inbox.sender();
        for i in 0..5u8 {
            tx.send(Bytes::from(vec![i])).unwrap();
        }
        let frames = inbox.drain();
        assert_eq!(frames.len(), 5);
        assert!(frames.iter().enumerate().all(|(i, f)| f[0] == i as u8));
        assert!(inbox.drain().is_empty());
    }

    #[test]
    fn test_concurrent_producers() {
        let mut inbox = WarpInbox::new();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tx = inbox.sender();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        tx.send(Bytes::from_static(b"x")).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(inbox.drain().len(), 400);
    }
}
