use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use log::{debug, info};
use parking_lot::Mutex;

pub type BackendId = u64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no {role} backends available")]
pub struct NoBackendsAvailable {
    pub role: &'static str,
}

/// Live replicas serving one role (storage roots, workers, ...).
///
/// Membership changes at any time. `choose_one` rotates over the members
/// currently registered and fails straight away when there are none.
pub struct BackendSet<T: ?Sized> {
    role: &'static str,
    inner: Mutex<Members<T>>,
}

struct Members<T: ?Sized> {
    backends: BTreeMap<BackendId, Arc<T>>,
    next_id: BackendId,
    cursor: usize,
}

impl<T: ?Sized + Send + Sync> BackendSet<T> {
    pub fn new(role: &'static str) -> Arc<Self> {
        Arc::new(Self {
            role,
            inner: Mutex::new(Members {
                backends: BTreeMap::new(),
                next_id: 0,
                cursor: 0,
            }),
        })
    }

    pub fn role(&self) -> &'static str {
        self.role
    }

    /// Add `backend` under a fresh id. It stays a member until the returned
    /// registration is dropped.
    pub fn register(self: &Arc<Self>, backend: Arc<T>) -> Registration<T> {
        let id = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.backends.insert(id, backend);
            id
        };
        info!("registered {} backend {id}", self.role);
        Registration {
            set: Arc::downgrade(self),
            id,
        }
    }

    /// Insert or replace the backend with the given id.
    pub fn add(&self, id: BackendId, backend: Arc<T>) -> Option<Arc<T>> {
        let mut inner = self.inner.lock();
        inner.next_id = inner.next_id.max(id + 1);
        let previous = inner.backends.insert(id, backend);
        debug!("added {} backend {id}", self.role);
        previous
    }

    pub fn remove(&self, id: BackendId) -> Option<Arc<T>> {
        let removed = self.inner.lock().backends.remove(&id);
        if removed.is_some() {
            info!("removed {} backend {id}", self.role);
        }
        removed
    }

    /// Replace the whole membership.
    pub fn reset(&self, backends: impl IntoIterator<Item = (BackendId, Arc<T>)>) {
        let mut inner = self.inner.lock();
        inner.backends = backends.into_iter().collect();
        let max_id = inner.backends.keys().next_back().copied();
        if let Some(max_id) = max_id {
            inner.next_id = inner.next_id.max(max_id + 1);
        }
        info!("reset {} backends: {} members", self.role, inner.backends.len());
    }

    pub fn choose_one(&self) -> Result<Arc<T>, NoBackendsAvailable> {
        let mut inner = self.inner.lock();
        let len = inner.backends.len();
        if len == 0 {
            return Err(NoBackendsAvailable { role: self.role });
        }
        let index = inner.cursor % len;
        inner.cursor = inner.cursor.wrapping_add(1);
        inner
            .backends
            .values()
            .nth(index)
            .cloned()
            .ok_or(NoBackendsAvailable { role: self.role })
    }

    pub fn len(&self) -> usize {
        self.inner.lock().backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Membership of one backend. Dropping it removes the backend.
pub struct Registration<T: ?Sized + Send + Sync> {
    set: Weak<BackendSet<T>>,
    id: BackendId,
}

impl<T: ?Sized + Send + Sync> Registration<T> {
    pub fn id(&self) -> BackendId {
        self.id
    }
}

impl<T: ?Sized + Send + Sync> Drop for Registration<T> {
    fn drop(&mut self) {
        if let Some(set) = self.set.upgrade() {
            set.remove(self.id);
        }
    }
}
