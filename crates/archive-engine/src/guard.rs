use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Admits one generation batch at a time.
#[derive(Debug, Clone, Default)]
pub struct BatchGuard {
    busy: Arc<AtomicBool>,
}

/// Proof that the holder owns the batch slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct BatchToken {
    busy: Arc<AtomicBool>,
}

impl BatchGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` while another token is alive.
    pub fn try_acquire(&self) -> Option<BatchToken> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BatchToken {
                busy: self.busy.clone(),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for BatchToken {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_one_token_at_a_time() {
        let guard = BatchGuard::new();
        let token = guard.try_acquire();
        assert!(token.is_some());
        assert!(guard.is_busy());
        assert!(guard.try_acquire().is_none());
        assert!(guard.clone().try_acquire().is_none());

        drop(token);
        assert!(!guard.is_busy());
        assert!(guard.try_acquire().is_some());
    }

    #[test]
    fn concurrent_acquirers_get_one_token() {
        let guard = BatchGuard::new();
        let winners = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let guard = guard.clone();
                    scope.spawn(move || guard.try_acquire().map(std::mem::forget).is_some())
                })
                .collect();
            handles
                .into_iter()
                .filter_map(|handle| handle.join().ok())
                .filter(|won| *won)
                .count()
        });
        assert_eq!(winners, 1);
        assert!(guard.is_busy());
    }
}
