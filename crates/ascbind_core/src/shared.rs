//! One instance shared between threads

use crate::instance::ModuleInstance;
use parking_lot::Mutex;
use std::sync::Arc;

/// A [`ModuleInstance`] behind a lock.
///
/// The module runs single-threaded; every boundary call holds the lock for
/// its whole duration, lowering through lifting, so concurrent callers are
/// serialised rather than interleaved.
#[derive(Clone, Debug)]
pub struct SharedModule {
    inner: Arc<Mutex<ModuleInstance>>,
}

impl SharedModule {
    pub fn new(instance: ModuleInstance) -> Self {
        Self {
            inner: Arc::new(Mutex::new(instance)),
        }
    }

    /// Run `f` with exclusive access to the instance.
    pub fn with<R>(&self, f: impl FnOnce(&mut ModuleInstance) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }

    /// Like [`with`](Self::with), but gives up instead of waiting when
    /// another call is in progress.
    pub fn try_with<R>(&self, f: impl FnOnce(&mut ModuleInstance) -> R) -> Option<R> {
        let mut guard = self.inner.try_lock()?;
        Some(f(&mut guard))
    }
}

impl From<ModuleInstance> for SharedModule {
    fn from(instance: ModuleInstance) -> Self {
        Self::new(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_module_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SharedModule>();
    }
}
