//! Class registry seam
//!
//! Class-factory lookup is an external collaborator; the coordinator sees
//! it only through the [`ClassRegistry`] trait. The in-process registry
//! here is the standard implementation for servers hosting their own
//! classes.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::exporter::ServerObject;
use crate::types::Clsid;

/// Creates instances of one class.
pub trait ClassFactory: Send + Sync {
    /// Instantiate the class.
    fn create_instance(&self) -> Arc<dyn ServerObject>;

    /// The factory itself as an exportable object, for class-object
    /// activation. `None` when the class does not support it.
    fn class_object(&self) -> Option<Arc<dyn ServerObject>> {
        None
    }
}

/// Resolves class ids to factories.
pub trait ClassRegistry: Send + Sync {
    fn lookup(&self, clsid: &Clsid) -> Option<Arc<dyn ClassFactory>>;
}

/// Factory backed by a plain constructor closure.
pub struct FnFactory<F> {
    make: F,
}

impl<F> FnFactory<F>
where
    F: Fn() -> Arc<dyn ServerObject> + Send + Sync,
{
    pub fn new(make: F) -> Self {
        Self { make }
    }
}

impl<F> ClassFactory for FnFactory<F>
where
    F: Fn() -> Arc<dyn ServerObject> + Send + Sync,
{
    fn create_instance(&self) -> Arc<dyn ServerObject> {
        (self.make)()
    }
}

/// In-process class registry.
pub struct InProcRegistry {
    classes: RwLock<HashMap<Clsid, Arc<dyn ClassFactory>>>,
}

impl InProcRegistry {
    pub fn new() -> Self {
        Self {
            classes: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, clsid: Clsid, factory: Arc<dyn ClassFactory>) {
        self.classes.write().unwrap().insert(clsid, factory);
    }

    pub fn register_fn<F>(&self, clsid: Clsid, make: F)
    where
        F: Fn() -> Arc<dyn ServerObject> + Send + Sync + 'static,
    {
        self.register(clsid, Arc::new(FnFactory::new(make)));
    }

    pub fn unregister(&self, clsid: &Clsid) {
        self.classes.write().unwrap().remove(clsid);
    }
}

impl Default for InProcRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassRegistry for InProcRegistry {
    fn lookup(&self, clsid: &Clsid) -> Option<Arc<dyn ClassFactory>> {
        self.classes.read().unwrap().get(clsid).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::MethodTable;
    use crate::types::Iid;

    struct Empty;

    impl ServerObject for Empty {
        fn interfaces(&self) -> Vec<Iid> {
            vec![]
        }
        fn interface_table(&self, _iid: &Iid) -> Option<Arc<MethodTable>> {
            None
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = InProcRegistry::new();
        let clsid = Clsid::from_u128(0x33);
        assert!(registry.lookup(&clsid).is_none());

        registry.register_fn(clsid, || Arc::new(Empty));
        let factory = registry.lookup(&clsid).unwrap();
        let _instance = factory.create_instance();
        assert!(factory.class_object().is_none());

        registry.unregister(&clsid);
        assert!(registry.lookup(&clsid).is_none());
    }
}
