//! A single-producer single-consumer bounded ring buffer.
//!
//! Grounded in the original `CircularFifo<Element, Capacity>`: `Capacity + 1`
//! internal slots so head/tail equality unambiguously means "empty", and a
//! full ring is distinguished by `tail` trailing `head` by exactly one slot.
//! No extra length counter is kept -- it would need to be touched by both
//! sides of the SPSC handshake and defeats the point of the design.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// A bounded SPSC queue of `capacity` elements.
///
/// `try_push`/`try_pop` never block. A single producer and a single consumer
/// may call them concurrently from different threads with no further
/// synchronization; calling `try_push` from two threads at once, or `try_pop`
/// from two threads at once, is undefined behavior this type does not guard
/// against (the same contract as the original `CircularFifo`).
pub struct Ring<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    // capacity + 1: the distinguishing slot between "empty" and "full".
    capacity_plus_one: usize,
    head: AtomicUsize,
    tail: AtomicUsize,
    canceled: AtomicBool,
}

unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> Ring<T> {
    /// Creates an empty ring that can hold up to `capacity` elements.
    ///
    /// # Panics
    /// Panics if `capacity` is zero -- a zero-capacity edge can never carry a
    /// token and is always a configuration mistake.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        let capacity_plus_one = capacity + 1;
        let slots = (0..capacity_plus_one)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Ring {
            slots,
            capacity_plus_one,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            canceled: AtomicBool::new(false),
        }
    }

    /// The number of elements this ring can hold.
    pub fn capacity(&self) -> usize {
        self.capacity_plus_one - 1
    }

    fn advance(&self, index: usize) -> usize {
        let next = index + 1;
        if next == self.capacity_plus_one {
            0
        } else {
            next
        }
    }

    /// Attempts to push `item` without blocking.
    ///
    /// Returns `item` back on failure (the ring is full) so the caller never
    /// loses ownership of a token it couldn't place.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let next_tail = self.advance(tail);
        let head = self.head.load(Ordering::Acquire);
        if next_tail == head {
            return Err(item);
        }
        // SAFETY: the producer is the sole writer of `tail`'s slot; the
        // consumer only reads slots strictly between `head` and `tail`.
        unsafe {
            (*self.slots[tail].get()).write(item);
        }
        self.tail.store(next_tail, Ordering::Release);
        Ok(())
    }

    /// Attempts to pop an element without blocking.
    pub fn try_pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        // SAFETY: symmetric to try_push -- the consumer is the sole reader
        // and writer of `head`'s slot.
        let item = unsafe { (*self.slots[head].get()).assume_init_read() };
        self.head.store(self.advance(head), Ordering::Release);
        Some(item)
    }

    /// Approximate element count. Racy against a concurrent push/pop; useful
    /// only for load-constraint heuristics and diagnostics, never for
    /// correctness decisions.
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        if tail >= head {
            tail - head
        } else {
            self.capacity_plus_one - head + tail
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    pub fn is_full(&self) -> bool {
        self.advance(self.tail.load(Ordering::Acquire)) == self.head.load(Ordering::Acquire)
    }

    /// Sets the one-shot cancellation flag. Idempotent; once set it can never
    /// be cleared for the lifetime of this ring.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    pub fn canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        while self.try_pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_roundtrip() {
        let ring: Ring<u32> = Ring::new(4);
        assert!(ring.try_push(1).is_ok());
        assert!(ring.try_push(2).is_ok());
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.try_pop(), Some(1));
        assert_eq!(ring.try_pop(), Some(2));
        assert_eq!(ring.try_pop(), None);
    }

    #[test]
    fn full_ring_rejects_and_returns_item() {
        let ring: Ring<u32> = Ring::new(2);
        assert!(ring.try_push(1).is_ok());
        assert!(ring.try_push(2).is_ok());
        assert!(ring.is_full());
        match ring.try_push(3) {
            Err(3) => {}
            other => panic!("expected rejected push to return the item, got {other:?}"),
        }
    }

    #[test]
    fn capacity_n_never_holds_more_than_n() {
        let ring: Ring<u32> = Ring::new(3);
        for i in 0..3 {
            assert!(ring.try_push(i).is_ok());
        }
        assert!(ring.try_push(99).is_err());
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn cancel_is_sticky() {
        let ring: Ring<u32> = Ring::new(1);
        assert!(!ring.canceled());
        ring.cancel();
        assert!(ring.canceled());
        ring.cancel();
        assert!(ring.canceled());
    }

    #[test]
    fn wraps_around_many_cycles() {
        let ring: Ring<u32> = Ring::new(2);
        for cycle in 0..1000u32 {
            assert!(ring.try_push(cycle).is_ok());
            assert_eq!(ring.try_pop(), Some(cycle));
        }
    }
}
