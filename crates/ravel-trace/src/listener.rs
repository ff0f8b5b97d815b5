//! Analysis listeners.

use std::sync::{Arc, PoisonError, RwLock};

/// Observer of analysis progress.
///
/// Callbacks run on the analyzer worker; implementations must not
/// block it. Registration and removal are safe from any thread.
pub trait DisassemblyListener: Send + Sync {
    /// The analyzer started.
    fn on_analyze_start(&self) {}

    /// The analyzer stopped, either drained or cancelled.
    fn on_analyze_stop(&self) {}

    /// Decoding or data analysis failed at an address.
    fn on_analyze_error(&self, _addr: u64) {}

    /// The entity, references, or function information at an address
    /// changed.
    fn on_change(&self, _addr: u64) {}
}

/// A shared listener list with snapshot dispatch semantics: mutation
/// copies, so the worker iterates a stable snapshot without holding the
/// registration lock across callbacks.
#[derive(Clone, Default)]
pub(crate) struct ListenerSet {
    inner: Arc<RwLock<Vec<Arc<dyn DisassemblyListener>>>>,
}

impl ListenerSet {
    pub fn add(&self, listener: Arc<dyn DisassemblyListener>) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.push(listener);
    }

    pub fn remove(&self, listener: &Arc<dyn DisassemblyListener>) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn snapshot(&self) -> Vec<Arc<dyn DisassemblyListener>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
