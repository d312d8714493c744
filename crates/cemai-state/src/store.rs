use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

/// Shared value with subscribe/notify semantics.
///
/// Writers mutate through closures while holding the value's lock, so
/// concurrent updates never lose each other. Subscribers watch a revision
/// counter that moves on every committed change.
pub struct Store<T> {
    value: Mutex<T>,
    revision: watch::Sender<u64>,
}

impl<T> Store<T> {
    pub fn new(initial: T) -> Self {
        let (revision, _rx) = watch::channel(0);
        Self {
            value: Mutex::new(initial),
            revision,
        }
    }

    // Keep serving the value after a writer panicked.
    fn lock(&self) -> MutexGuard<'_, T> {
        self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }

    /// Run `f` against the current value without cloning it.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.lock())
    }

    /// Replace the value wholesale and notify subscribers.
    pub fn set(&self, value: T) {
        *self.lock() = value;
        self.notify();
    }

    /// Mutate the value in place and notify subscribers.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let result = f(&mut self.lock());
        self.notify();
        result
    }

    /// Mutate the value; subscribers are only notified when `f` succeeds.
    ///
    /// `f` must leave the value untouched when it returns an error.
    pub fn try_update<R, E>(&self, f: impl FnOnce(&mut T) -> Result<R, E>) -> Result<R, E> {
        let result = f(&mut self.lock())?;
        self.notify();
        Ok(result)
    }

    /// Wakes on every committed change. Read the value through the store.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

impl<T: Clone> Store<T> {
    pub fn get(&self) -> T {
        self.lock().clone()
    }
}

impl<T: Default> Default for Store<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Store").field(&*self.lock()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_updates() {
        let store = Store::new(1u32);
        let mut rx = store.subscribe();
        store.update(|v| *v += 1);
        rx.changed().await.unwrap();
        assert_eq!(store.get(), 2);
    }

    #[test]
    fn failed_try_update_does_not_notify() {
        let store = Store::new(5u32);
        let rx = store.subscribe();
        let outcome: Result<(), &str> = store.try_update(|_| Err("rejected"));
        assert!(outcome.is_err());
        assert!(!rx.has_changed().unwrap(), "rejected mutation must not wake subscribers");
        assert_eq!(store.get(), 5);
    }

    #[test]
    fn update_returns_closure_result() {
        let store = Store::new(vec![1, 2, 3]);
        let len = store.update(|v| {
            v.push(4);
            v.len()
        });
        assert_eq!(len, 4);
        assert_eq!(store.read(|v| v[3]), 4);
    }

    #[test]
    fn nested_reads_of_other_stores_do_not_block() {
        let kpis = Store::new(3u32);
        let total = Store::new(0u32);
        let sum = total.update(|t| {
            *t += kpis.read(|k| *k);
            *t
        });
        assert_eq!(sum, 3);
    }

    #[test]
    fn every_commit_bumps_the_revision() {
        let store = Store::new(String::new());
        let mut rx = store.subscribe();
        store.set("a".into());
        let _: Result<(), ()> = store.try_update(|v| {
            v.push('b');
            Ok(())
        });
        assert_eq!(*rx.borrow_and_update(), 2);
        assert_eq!(store.get(), "ab");
    }
}
