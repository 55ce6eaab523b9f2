//! Cross-thread interruption
//!
//! Each thread owns an [`Interrupt`] flag. Another thread holding a clone
//! can raise it, which wakes whatever the owner is blocked on. The flag
//! stays raised until [`Interrupt::clear`] is called.

use std::sync::Arc;
use tokio::sync::watch;

thread_local! {
    static THREAD_INTERRUPT: Interrupt = Interrupt::new();
}

/// Interruption flag that can be raised from any thread
#[derive(Debug, Clone)]
pub struct Interrupt {
    flag: Arc<watch::Sender<bool>>,
}

impl Interrupt {
    /// Create a fresh, lowered flag
    #[must_use]
    pub fn new() -> Self {
        Self {
            flag: Arc::new(watch::channel(false).0),
        }
    }

    /// Flag of the calling thread
    #[must_use]
    pub fn current() -> Self {
        THREAD_INTERRUPT.with(Clone::clone)
    }

    /// Raise the flag
    pub fn interrupt(&self) {
        self.flag.send_replace(true);
    }

    /// Whether the flag is raised
    #[inline]
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        *self.flag.borrow()
    }

    /// Lower the flag, returning whether it was raised
    pub fn clear(&self) -> bool {
        self.flag.send_replace(false)
    }

    /// Complete once the flag is raised
    pub async fn interrupted(&self) {
        let mut receiver = self.flag.subscribe();
        if receiver.wait_for(|raised| *raised).await.is_err() {
            // Sender is owned by `self`, so the channel cannot close here.
            std::future::pending::<()>().await;
        }
    }
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn flag_survives_until_cleared() {
        let interrupt = Interrupt::new();
        assert!(!interrupt.is_interrupted());
        interrupt.interrupt();
        assert!(interrupt.is_interrupted());
        assert!(interrupt.clear());
        assert!(!interrupt.is_interrupted());
    }

    #[test]
    fn current_is_per_thread() {
        let here = Interrupt::current();
        here.interrupt();
        let elsewhere = std::thread::spawn(|| Interrupt::current().is_interrupted())
            .join()
            .unwrap();
        assert!(!elsewhere);
        assert!(Interrupt::current().is_interrupted());
        here.clear();
    }

    #[test]
    fn raising_wakes_waiter_on_other_thread() {
        let interrupt = Interrupt::new();
        let remote = interrupt.clone();
        let raiser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.interrupt();
        });
        futures::executor::block_on(interrupt.interrupted());
        assert!(interrupt.is_interrupted());
        raiser.join().unwrap();
    }
}
