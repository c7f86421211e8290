use std::sync::{Arc, PoisonError, RwLock};

use crate::adapter::SdkAdapter;

type AdapterFactory = Box<dyn Fn() -> SdkAdapter + Send + Sync>;

/// Owner of the process-wide adapter.
///
/// Holders call [`AdapterSlot::current`] on every use rather than keeping
/// the adapter, so a [`AdapterSlot::reset`] redirects all of them to a
/// blank instance at once.
pub struct AdapterSlot {
    factory: AdapterFactory,
    current: RwLock<Arc<SdkAdapter>>,
}

impl AdapterSlot {
    pub fn new(factory: impl Fn() -> SdkAdapter + Send + Sync + 'static) -> Self {
        let first = Arc::new(factory());
        Self {
            factory: Box::new(factory),
            current: RwLock::new(first),
        }
    }

    #[must_use]
    pub fn current(&self) -> Arc<SdkAdapter> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Disconnect the current adapter and replace it with a fresh one.
    ///
    /// Required when the signed-in account changes: caches carry no account
    /// dimension.
    pub async fn reset(&self) -> Arc<SdkAdapter> {
        let fresh = Arc::new((self.factory)());
        let previous = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *current, fresh.clone())
        };
        previous.disconnect().await;
        tracing::info!("SDK adapter reset");
        fresh
    }
}
