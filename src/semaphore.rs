use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// Counting semaphore used to bound how many inference calls run at once.
pub struct Semaphore {
    state: Arc<SemaphoreState>,
}

struct SemaphoreState {
    count: Mutex<usize>,
    condition: Condvar,
}

pub struct SemaphoreGuard {
    state: Arc<SemaphoreState>,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            state: Arc::new(SemaphoreState {
                count: Mutex::new(permits),
                condition: Condvar::new(),
            }),
        }
    }

    pub fn acquire(&self) -> SemaphoreGuard {
        let mut count = self.state.count.lock();
        self.state.condition.wait_while(&mut count, |&mut c| c == 0);
        *count -= 1;
        SemaphoreGuard {
            state: self.state.clone(),
        }
    }

}

impl SemaphoreGuard {
    fn release(&self) {
        let mut count = self.state.count.lock();
        *count += 1;
        self.state.condition.notify_one();
    }
}

impl Drop for SemaphoreGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn permits(semaphore: &Semaphore) -> usize {
        *semaphore.state.count.lock()
    }

    #[test]
    fn test_guard_returns_permit() {
        let semaphore = Semaphore::new(2);
        let first = semaphore.acquire();
        let _second = semaphore.acquire();
        assert_eq!(permits(&semaphore), 0);
        drop(first);
        assert_eq!(permits(&semaphore), 1);
    }

    #[test]
    fn test_bounds_concurrency() {
        let semaphore = Arc::new(Semaphore::new(2));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let semaphore = Arc::clone(&semaphore);
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    let _guard = semaphore.acquire();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(20));
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(permits(&semaphore), 2);
    }
}
