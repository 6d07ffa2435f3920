use tokio::sync::watch;

/// A value written once and read by any number of waiters.
///
/// Readers that arrive before the write suspend until it happens; every
/// reader observes the same value. Later writes are ignored.
pub struct Broadcast<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T: Clone> Default for Broadcast<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Broadcast<T> {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Publish `value`. Returns `false` if a value was already published.
    pub fn set(&self, value: T) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(value);
            true
        })
    }

    pub fn get(&self) -> Option<T> {
        self.tx.borrow().clone()
    }

    pub async fn wait(&self) -> T {
        let mut rx = self.tx.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(value) = current {
                return value;
            }
            // the sender lives in `self`, so `changed` cannot fail while we hold `&self`
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
