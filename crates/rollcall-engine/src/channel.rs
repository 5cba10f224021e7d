//! Bounded frame channel that evicts the oldest item instead of blocking.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

/// Frames buffered between capture and recognition.
pub const FRAME_CHANNEL_CAPACITY: usize = 2;

/// Producer half of a drop-oldest channel.
///
/// Holds a receiver clone so it can evict from the head of the queue when
/// the consumer falls behind. Sending never blocks.
pub struct DropOldestSender<T> {
    tx: Sender<T>,
    evict: Receiver<T>,
}

/// Create a drop-oldest channel holding at most `capacity` items.
pub fn drop_oldest<T>(capacity: usize) -> (DropOldestSender<T>, Receiver<T>) {
    let (tx, rx) = bounded(capacity.max(1));
    (
        DropOldestSender {
            tx,
            evict: rx.clone(),
        },
        rx,
    )
}

impl<T> DropOldestSender<T> {
    /// Enqueue `item`, discarding the oldest buffered items if the channel
    /// is full. Returns how many items were discarded.
    pub fn send(&self, item: T) -> usize {
        let mut item = item;
        let mut evicted = 0;
        loop {
            match self.tx.try_send(item) {
                Ok(()) => return evicted,
                Err(TrySendError::Full(back)) => {
                    // The consumer may have taken one in the meantime; retry either way.
                    if self.evict.try_recv().is_ok() {
                        evicted += 1;
                    }
                    item = back;
                }
                // Unreachable while `evict` is alive.
                Err(TrySendError::Disconnected(_)) => return evicted,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_keeps_two_newest() {
        let (tx, rx) = drop_oldest(FRAME_CHANNEL_CAPACITY);
        let mut evicted = 0;
        for i in 1..=5 {
            evicted += tx.send(i);
        }
        assert_eq!(evicted, 3);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![4, 5]);
    }

    #[test]
    fn test_no_eviction_below_capacity() {
        let (tx, rx) = drop_oldest(2);
        assert_eq!(tx.send('a'), 0);
        assert_eq!(tx.len(), 1);
        assert_eq!(rx.recv().unwrap(), 'a');
        assert!(tx.is_empty());
    }

    #[test]
    fn test_send_after_consumer_dropped() {
        let (tx, rx) = drop_oldest(2);
        drop(rx);
        tx.send(1);
        tx.send(2);
        assert_eq!(tx.send(3), 1);
    }

    #[test]
    fn test_receiver_disconnects_when_sender_dropped() {
        let (tx, rx) = drop_oldest::<u8>(2);
        drop(tx);
        assert!(rx.recv().is_err());
    }
}
