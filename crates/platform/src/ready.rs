//! Interrupt-to-foreground data-ready flag.
//!
//! The FIFO-threshold interrupt handler calls [`ReadyFlag::set`] and returns;
//! the foreground loop consumes the event with [`ReadyFlag::take`]. There is
//! exactly one writer (the handler) and one reader (the poll loop), so a
//! single atomic with release/acquire ordering is all the synchronisation
//! needed: everything the device did before the edge is visible once `take`
//! observes `true`.
//!
//! # Usage Pattern
//!
//! ```rust,ignore
//! static DATA_READY: ReadyFlag = ReadyFlag::new();
//!
//! #[interrupt]
//! fn GPIO_INT() {
//!     DATA_READY.set();
//! }
//!
//! loop {
//!     instrument.process(&mut uart)?;   // calls DATA_READY.take() internally
//! }
//! ```

use core::sync::atomic::{AtomicBool, Ordering};

/// Single-writer/single-reader event flag.
#[derive(Debug, Default)]
pub struct ReadyFlag(AtomicBool);

impl ReadyFlag {
    /// Create a cleared flag (usable in `static`).
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Raise the flag. Interrupt-safe, never blocks.
    #[inline]
    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Consume the flag: returns `true` once per `set`.
    #[inline]
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::Acquire)
    }

    /// Drop any pending event without observing it.
    #[inline]
    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    /// Peek without consuming.
    #[inline]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_consumes_event() {
        let flag = ReadyFlag::new();
        assert!(!flag.take());
        flag.set();
        assert!(flag.is_set());
        assert!(flag.take(), "first take must observe the event");
        assert!(!flag.take(), "second take must see the flag cleared");
    }

    #[test]
    fn test_set_is_not_counted() {
        let flag = ReadyFlag::new();
        flag.set();
        flag.set();
        assert!(flag.take());
        assert!(!flag.take(), "repeated sets collapse into one event");
    }

    #[test]
    fn test_clear_discards_pending_event() {
        let flag = ReadyFlag::new();
        flag.set();
        flag.clear();
        assert!(!flag.take());
    }

    #[test]
    fn test_cross_thread_handoff() {
        static FLAG: ReadyFlag = ReadyFlag::new();
        let handle = std::thread::spawn(|| FLAG.set());
        handle.join().unwrap_or(());
        assert!(FLAG.take());
    }
}
