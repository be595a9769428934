//! Process-wide registry slot with explicit init/teardown

use super::{ProviderRegistry, RegistryError};
use lazy_static::lazy_static;
use std::sync::{Arc, PoisonError, RwLock};

lazy_static! {
    static ref GLOBAL_REGISTRY: RwLock<Option<Arc<ProviderRegistry>>> = RwLock::new(None);
}

/// Install the process-wide registry. Fails if one is already installed.
pub fn init(registry: Arc<ProviderRegistry>) -> Result<(), RegistryError> {
    let mut slot = GLOBAL_REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    if slot.is_some() {
        return Err(RegistryError::AlreadyInitialized);
    }
    *slot = Some(registry);
    Ok(())
}

pub fn get() -> Option<Arc<ProviderRegistry>> {
    GLOBAL_REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Remove the process-wide registry, returning it
pub fn teardown() -> Option<Arc<ProviderRegistry>> {
    GLOBAL_REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_get_teardown_cycle() {
        let registry = Arc::new(ProviderRegistry::new());
        init(registry.clone()).unwrap();
        assert!(get().is_some());
        assert_eq!(
            init(Arc::new(ProviderRegistry::new())),
            Err(RegistryError::AlreadyInitialized)
        );
        let removed = teardown().unwrap();
        assert!(Arc::ptr_eq(&removed, &registry));
        assert!(get().is_none());
    }
}
