//! Thread-safe tunneling sequence counter.
//!
//! Every TUNNELING_REQUEST on a channel carries an 8-bit sequence number;
//! the peer echoes it in the matching TUNNELING_ACK. The counter starts at
//! 0 when the channel is established and wraps from 255 back to 0. Retries
//! of the same request reuse the number they were first sent with, so the
//! counter only advances once per logical request.

use std::sync::atomic::{AtomicU8, Ordering};

/// Monotonically increasing 8-bit counter shared across sender tasks.
///
/// `Ordering::Relaxed` is enough: the value only numbers messages and is
/// never used to synchronize other memory.
#[derive(Debug, Default)]
pub struct SequenceCounter {
    inner: AtomicU8,
}

impl SequenceCounter {
    /// Creates a counter starting at 0, as a freshly opened channel expects.
    pub fn new() -> Self {
        Self {
            inner: AtomicU8::new(0),
        }
    }

    /// Returns the next sequence number and advances the counter.
    ///
    /// Wraps from 255 to 0 without panicking.
    pub fn next(&self) -> u8 {
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// Current value without advancing. Diagnostic use only.
    pub fn current(&self) -> u8 {
        self.inner.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_sequence_counter_starts_at_zero() {
        // Arrange
        let counter = SequenceCounter::new();

        // Act / Assert
        assert_eq!(counter.next(), 0);
        assert_eq!(counter.next(), 1);
    }

    #[test]
    fn test_sequence_counter_wraps_at_u8_max() {
        // Arrange – one step before overflow
        let counter = SequenceCounter {
            inner: AtomicU8::new(u8::MAX),
        };

        // Act
        let before_wrap = counter.next();
        let after_wrap = counter.next();

        // Assert
        assert_eq!(before_wrap, u8::MAX);
        assert_eq!(after_wrap, 0, "counter must wrap to 0 after 255");
    }

    #[test]
    fn test_sequence_counter_is_unique_across_threads_within_one_cycle() {
        // Arrange – 4 threads × 32 increments stays inside one 256-cycle
        let counter = Arc::new(SequenceCounter::new());

        // Act
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let c = Arc::clone(&counter);
                thread::spawn(move || (0..32).map(|_| c.next()).collect::<Vec<_>>())
            })
            .collect();
        let mut all_values: Vec<u8> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread panicked"))
            .collect();

        // Assert – no two threads got the same number
        all_values.sort_unstable();
        all_values.dedup();
        assert_eq!(all_values.len(), 128);
    }

    #[test]
    fn test_current_does_not_increment() {
        let counter = SequenceCounter::new();
        counter.next();

        assert_eq!(counter.current(), 1);
        assert_eq!(counter.next(), 1);
    }
}
