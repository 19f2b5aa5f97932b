//! Last-value-wins handoff between two pipeline stages.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// The low bit of the state word selects the slot exposed to the consumer.
const SELECTOR_BIT: u64 = 1;

/// A published value together with the version it was published as.
#[derive(Clone, Debug, PartialEq)]
pub struct DataPacket<T> {
    pub id: u64,
    pub data: T,
}

/// A double-buffered, versioned channel carrying at most one undelivered value.
///
/// The producer writes into the hidden slot, then flips the selector and
/// bumps the version in a single atomic update of the state word, so a
/// consumer always observes the two together. Sending never waits for the
/// consumer: a newer value simply replaces an unread one.
///
/// A consumer acknowledges each value it receives by bumping the version
/// again, which lets the producer tell whether its last value was picked up.
///
/// There must be at most one producer and one consumer per messenger.
pub struct Messenger<T> {
    /// `(version << 1) | selector`
    state: AtomicU64,
    slots: [Mutex<Option<DataPacket<T>>>; 2],
}

impl<T> Default for Messenger<T> {
    fn default() -> Self {
        Self {
            state: AtomicU64::new(0),
            slots: [Mutex::new(None), Mutex::new(None)],
        }
    }
}

impl<T> Messenger<T> {
    /// Creates an empty messenger.
    pub fn new() -> Self {
        Default::default()
    }

    /// The current version. Changes on every send and every acknowledged receive.
    pub fn state(&self) -> u64 {
        self.state.load(Ordering::Acquire) >> 1
    }

    /// Publishes a value and returns the new version.
    pub fn send_data(&self, data: T) -> u64 {
        self.replace_data(data).0
    }

    /// Publishes a value and returns the new version, together with the
    /// value it displaced from the hidden slot: the one published two sends ago.
    pub fn replace_data(&self, data: T) -> (u64, Option<T>) {
        let hidden = (!self.state.load(Ordering::Acquire) & SELECTOR_BIT) as usize;

        // Hold the slot until it is written, so a consumer that sees the
        // flip cannot read the slot's previous contents.
        let mut slot = self.slots[hidden].lock();
        let prev = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                Some((((word >> 1).wrapping_add(1)) << 1) | hidden as u64)
            })
            .unwrap_or_else(|word| word);
        let version = (prev >> 1).wrapping_add(1);
        let displaced = slot.replace(DataPacket { id: version, data });
        (version, displaced.map(|packet| packet.data))
    }
}

impl<T: Clone> Messenger<T> {
    /// Takes the most recent value if anything was published since `last_seen`.
    ///
    /// The returned packet's `id` is the version to pass as `last_seen` next time.
    /// Never waits for the producer.
    pub fn receive_data(&self, last_seen: u64) -> Option<DataPacket<T>> {
        let word = self.state.load(Ordering::Acquire);
        if word >> 1 == last_seen {
            return None;
        }

        // Snapshot the selector first, then read the slot it points at.
        let mut packet = self.slots[(word & SELECTOR_BIT) as usize].lock().clone()?;

        // Acknowledge only if nothing was published in the meantime; otherwise
        // the newer value is picked up by the next call.
        if packet.id == word >> 1
            && self
                .state
                .compare_exchange(word, word.wrapping_add(2), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            packet.id = packet.id.wrapping_add(1);
        }
        Some(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn nothing_to_receive_before_first_send() {
        let messenger = Messenger::<u32>::new();
        let last_seen = messenger.state().wrapping_sub(1);
        assert_eq!(messenger.receive_data(last_seen), None);
    }

    #[test]
    fn last_value_wins() {
        let messenger = Messenger::new();
        let start = messenger.state();
        let consumer_state = start.wrapping_sub(1);

        assert_eq!(messenger.send_data("v1"), start + 1);
        assert_eq!(messenger.send_data("v2"), start + 2);
        assert_eq!(messenger.send_data("v3"), start + 3);
        assert_eq!(messenger.state(), start + 3);

        let packet = messenger.receive_data(consumer_state).unwrap();
        assert_eq!(packet.data, "v3");
        assert_eq!(messenger.receive_data(packet.id), None);
    }

    #[test]
    fn replace_hands_back_older_value() {
        let messenger = Messenger::new();
        assert_eq!(messenger.replace_data("v1").1, None);
        assert_eq!(messenger.replace_data("v2").1, None);
        let (version, displaced) = messenger.replace_data("v3");
        assert_eq!(displaced, Some("v1"));
        assert_eq!(messenger.replace_data("v4").1, Some("v2"));

        let packet = messenger.receive_data(version).unwrap();
        assert_eq!(packet.data, "v4");
    }

    #[test]
    fn receive_is_visible_to_producer() {
        let messenger = Messenger::new();
        let sent = messenger.send_data(5);
        assert_eq!(messenger.state(), sent);

        let packet = messenger.receive_data(sent.wrapping_sub(1)).unwrap();
        assert_eq!(packet.data, 5);
        assert_ne!(messenger.state(), sent);
        assert_eq!(messenger.state(), packet.id);
    }

    #[test]
    fn concurrent_consumer_sees_increasing_values() {
        let messenger = Arc::new(Messenger::new());
        let producer = {
            let messenger = messenger.clone();
            std::thread::spawn(move || {
                for i in 0..10_000u32 {
                    messenger.send_data(i);
                }
            })
        };

        let mut last_seen = messenger.state().wrapping_sub(1);
        let mut last_value = None;
        while last_value != Some(9_999) {
            if let Some(packet) = messenger.receive_data(last_seen) {
                if let Some(prev) = last_value {
                    assert!(packet.data > prev);
                }
                last_value = Some(packet.data);
                last_seen = packet.id;
            } else {
                std::thread::yield_now();
            }
        }
        producer.join().unwrap();
    }
}
