use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

pub type NextFn<T> = Arc<dyn Fn(&T) + Send + Sync + 'static>;

pub type Unsubscribe = Box<dyn FnOnce() + Send + 'static>;

/// A list of callbacks notified in subscription order.
///
/// Notification works on a snapshot, so callbacks may subscribe or
/// unsubscribe while being notified.
pub struct ObserverSet<T> {
    inner: Arc<ObserverInner<T>>,
}

struct ObserverInner<T> {
    next_id: AtomicU64,
    observers: Mutex<Vec<(u64, NextFn<T>)>>,
}

impl<T: 'static> ObserverSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> Unsubscribe
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.observers.lock().push((id, Arc::new(callback)));
        let weak: Weak<ObserverInner<T>> = Arc::downgrade(&self.inner);
        Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.observers.lock().retain(|(existing, _)| *existing != id);
            }
        })
    }

    pub fn notify(&self, value: &T) {
        let snapshot: Vec<NextFn<T>> = self
            .inner
            .observers
            .lock()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in snapshot {
            callback(value);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.observers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for ObserverSet<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(ObserverInner {
                next_id: AtomicU64::new(0),
                observers: Mutex::new(Vec::new()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifies_in_order_until_unsubscribed() {
        let set = ObserverSet::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = seen.clone();
        let unsubscribe = set.subscribe(move |value| first.lock().push(("first", *value)));
        let second = seen.clone();
        let _keep = set.subscribe(move |value| second.lock().push(("second", *value)));

        set.notify(&1);
        unsubscribe();
        set.notify(&2);

        assert_eq!(*seen.lock(), vec![("first", 1), ("second", 1), ("second", 2)]);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn unsubscribe_after_drop_is_harmless() {
        let set = ObserverSet::<u32>::new();
        let unsubscribe = set.subscribe(|_| {});
        drop(set);
        unsubscribe();
    }
}
