use std::sync::Arc;
use tokio::sync::watch;

/// Subscription-based state container.
///
/// State is held as an immutable `Arc<T>` snapshot. Updates swap in a new
/// snapshot and notify subscribers; an update that reports "no change" keeps
/// the previous snapshot (same pointer) and notifies nobody.
#[derive(Debug)]
pub struct Observable<T> {
    tx: watch::Sender<Arc<T>>,
}

impl<T> Observable<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx }
    }

    pub fn get_state(&self) -> Arc<T> {
        Arc::clone(&self.tx.borrow())
    }

    /// Runs `patch` against the current snapshot. `Some(next)` replaces the
    /// snapshot and notifies subscribers, `None` leaves everything untouched.
    /// Returns whether the state changed.
    pub fn update<F>(&self, patch: F) -> bool
    where
        F: FnOnce(&T) -> Option<T>,
    {
        self.tx.send_if_modified(|state| match patch(state) {
            Some(next) => {
                *state = Arc::new(next);
                true
            }
            None => false,
        })
    }

    /// Unconditionally replaces the state (used by reset / teardown paths).
    pub fn replace(&self, value: T) {
        self.tx.send_replace(Arc::new(value));
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<T>> {
        self.tx.subscribe()
    }
}

impl<T: Default> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_update_keeps_snapshot() {
        let store = Observable::new(1u32);
        let before = store.get_state();
        assert!(!store.update(|_| None));
        assert!(Arc::ptr_eq(&before, &store.get_state()));
    }

    #[tokio::test]
    async fn subscribers_see_changes() {
        let store = Observable::new(String::from("a"));
        let mut rx = store.subscribe();
        assert!(store.update(|s| Some(format!("{s}b"))));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().as_str(), "ab");
    }

    #[test]
    fn suppressed_update_does_not_mark_changed() {
        let store = Observable::new(0u8);
        let rx = store.subscribe();
        store.update(|_| None);
        assert!(!rx.has_changed().unwrap());
    }
}
