//! Unattended distribution pool.
//!
//! Idle link-trade workers hand out items from this pool when nobody is
//! waiting. Items are never consumed; the pool cycles (or shuffles) forever.

use parking_lot::Mutex;

use crate::types::Payload;

#[derive(Debug, Default)]
pub struct DistributionPool {
    state: Mutex<PoolState>,
}

#[derive(Debug, Default)]
struct PoolState {
    items: Vec<Payload>,
    cursor: usize,
}

impl DistributionPool {
    pub fn new(items: Vec<Payload>) -> Self {
        Self {
            state: Mutex::new(PoolState { items, cursor: 0 }),
        }
    }

    /// Swap the pool contents, e.g. after the distribution folder changed.
    pub fn replace(&self, items: Vec<Payload>) {
        let mut state = self.state.lock();
        state.items = items;
        state.cursor = 0;
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next item to distribute: round-robin, or uniformly random when
    /// `shuffled`.
    pub fn next(&self, shuffled: bool) -> Option<Payload> {
        let mut state = self.state.lock();
        if state.items.is_empty() {
            return None;
        }
        let index = if shuffled {
            fastrand::usize(..state.items.len())
        } else {
            let index = state.cursor % state.items.len();
            state.cursor = index + 1;
            index
        };
        state.items.get(index).cloned()
    }

    /// First pool item matching `pred`, without moving the cursor.
    pub fn find(&self, mut pred: impl FnMut(&Payload) -> bool) -> Option<Payload> {
        self.state.lock().items.iter().find(|item| pred(item)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin_wraps() {
        let pool = DistributionPool::new(vec![Payload::new([1u8]), Payload::new([2u8])]);
        let got: Vec<u8> = (0..5)
            .map(|_| pool.next(false).unwrap().as_bytes()[0])
            .collect();
        assert_eq!(got, vec![1, 2, 1, 2, 1]);
    }

    #[test]
    fn test_empty_pool_yields_nothing() {
        let pool = DistributionPool::default();
        assert!(pool.next(false).is_none());
        assert!(pool.next(true).is_none());
        pool.replace(vec![Payload::new([9u8])]);
        assert_eq!(pool.next(true).unwrap().as_bytes(), &[9]);
    }

    #[test]
    fn test_find_leaves_cursor_alone() {
        let pool = DistributionPool::new(vec![Payload::new([1u8]), Payload::new([2u8])]);
        assert_eq!(pool.find(|item| item.as_bytes()[0] == 2).unwrap().as_bytes(), &[2]);
        assert!(pool.find(|item| item.as_bytes()[0] == 3).is_none());
        assert_eq!(pool.next(false).unwrap().as_bytes(), &[1]);
    }
}
