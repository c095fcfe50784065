use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A cancellation signal that supports interruptible waits.
///
/// Signals form a tree: triggering a signal also triggers every child created
/// from it, while triggering a child leaves its parent untouched. The engine
/// owns the root, each session owns a child of it, and each locator race owns
/// a child of the session.
pub struct ShutdownSignal {
    shutdown: AtomicBool,
    condvar: Condvar,
    mutex: Mutex<()>,
    children: Mutex<Vec<Weak<ShutdownSignal>>>,
}

impl ShutdownSignal {
    /// Create a new signal in the non-shutdown state.
    pub fn new() -> Self {
        Self {
            shutdown: AtomicBool::new(false),
            condvar: Condvar::new(),
            mutex: Mutex::new(()),
            children: Mutex::new(Vec::new()),
        }
    }

    /// Create a child that is triggered together with `self`.
    ///
    /// A child of an already-triggered signal starts triggered.
    pub fn child(self: &Arc<Self>) -> Arc<ShutdownSignal> {
        let child = Arc::new(ShutdownSignal::new());
        {
            let mut children = self.children.lock();
            children.retain(|weak| weak.strong_count() > 0);
            children.push(Arc::downgrade(&child));
        }
        if self.is_shutdown() {
            child.trigger();
        }
        child
    }

    /// Trigger the signal, waking all waiting threads and all children.
    pub fn trigger(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let _guard = self.mutex.lock();
            self.condvar.notify_all();
        }
        let children: Vec<_> = self.children.lock().drain(..).collect();
        for child in children.iter().filter_map(Weak::upgrade) {
            child.trigger();
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Wait for `duration` or until the signal is triggered.
    ///
    /// Returns `true` if the signal was triggered, `false` on timeout.
    pub fn wait(&self, duration: Duration) -> bool {
        if self.is_shutdown() {
            return true;
        }
        let mut guard = self.mutex.lock();
        let result = self
            .condvar
            .wait_while_for(&mut guard, |_| !self.is_shutdown(), duration);
        !result.timed_out() || self.is_shutdown()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_initial_state() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_shutdown());
    }

    #[test]
    fn test_wait_timeout() {
        let signal = ShutdownSignal::new();
        let start = Instant::now();
        let interrupted = signal.wait(Duration::from_millis(50));
        let elapsed = start.elapsed();

        assert!(!interrupted);
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(500));
    }

    #[test]
    fn test_wait_interrupted() {
        let signal = Arc::new(ShutdownSignal::new());
        let signal_clone = Arc::clone(&signal);

        let handle = thread::spawn(move || {
            let start = Instant::now();
            let interrupted = signal_clone.wait(Duration::from_secs(10));
            (interrupted, start.elapsed())
        });

        thread::sleep(Duration::from_millis(50));
        signal.trigger();

        let (interrupted, elapsed) = handle.join().unwrap();
        assert!(interrupted);
        assert!(elapsed < Duration::from_secs(1));
    }

    #[test]
    fn test_parent_triggers_child() {
        let root = Arc::new(ShutdownSignal::new());
        let session = root.child();
        let race = session.child();

        let waiter = {
            let race = Arc::clone(&race);
            thread::spawn(move || race.wait(Duration::from_secs(10)))
        };
        thread::sleep(Duration::from_millis(20));
        root.trigger();

        assert!(waiter.join().unwrap());
        assert!(session.is_shutdown());
        assert!(race.is_shutdown());
    }

    #[test]
    fn test_child_does_not_trigger_parent() {
        let root = Arc::new(ShutdownSignal::new());
        let child = root.child();
        child.trigger();
        assert!(child.is_shutdown());
        assert!(!root.is_shutdown());
    }

    #[test]
    fn test_child_of_triggered_parent_starts_triggered() {
        let root = Arc::new(ShutdownSignal::new());
        root.trigger();
        assert!(root.child().is_shutdown());
    }
}
