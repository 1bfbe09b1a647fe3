//! Bounded streaming tick buffer.
//!
//! Thread-safe ring of the most recent ticks; the oldest entry is evicted
//! on overflow. Readers get detached copies.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::wire::BridgeTick;

/// Default capacity of the streaming buffer.
pub const TICK_RING_CAPACITY: usize = 100;

#[derive(Debug)]
pub struct TickRing {
    capacity: usize,
    ticks: Mutex<VecDeque<BridgeTick>>,
}

impl Default for TickRing {
    fn default() -> Self {
        Self::new(TICK_RING_CAPACITY)
    }
}

impl TickRing {
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0);
        Self {
            capacity,
            ticks: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, VecDeque<BridgeTick>> {
        match self.ticks.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Append a tick, evicting the oldest entry when full.
    pub fn push(&self, tick: BridgeTick) {
        let mut ticks = self.guard();
        if ticks.len() == self.capacity {
            ticks.pop_front();
        }
        ticks.push_back(tick);
    }

    /// The most recent tick, if any.
    pub fn latest(&self) -> Option<BridgeTick> {
        self.guard().back().cloned()
    }

    /// Oldest-to-newest copy of the buffer.
    pub fn snapshot(&self) -> Vec<BridgeTick> {
        self.guard().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(price: f64) -> BridgeTick {
        BridgeTick {
            price,
            volume: 1,
            ts: None,
        }
    }

    #[test]
    fn evicts_oldest_on_overflow() {
        let ring = TickRing::new(3);
        for p in [1.0, 2.0, 3.0, 4.0] {
            ring.push(tick(p));
        }
        assert_eq!(ring.len(), 3);
        let snap = ring.snapshot();
        assert_eq!(snap[0].price, 2.0);
        assert_eq!(snap[2].price, 4.0);
        assert_eq!(ring.latest().unwrap().price, 4.0);
    }

    #[test]
    fn default_capacity_is_100() {
        let ring = TickRing::default();
        for p in 0..150 {
            ring.push(tick(p as f64));
        }
        assert_eq!(ring.len(), 100);
        assert_eq!(ring.snapshot()[0].price, 50.0);
    }

    #[test]
    fn concurrent_pushes_do_not_lose_the_bound() {
        let ring = std::sync::Arc::new(TickRing::new(10));
        let mut handles = Vec::new();
        for t in 0..4 {
            let r = std::sync::Arc::clone(&ring);
            handles.push(std::thread::spawn(move || {
                for i in 0..1_000 {
                    r.push(tick((t * 1_000 + i) as f64));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(ring.len(), 10);
    }
}
