//! Keyed collection of modules.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::config::{Param, Settings};
use crate::modules::{Module, ModuleError};

/// Error type for registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("module not found: {name}")]
    NotFound { name: String },

    #[error("failed to load module '{module}'")]
    Load {
        module: String,
        #[source]
        source: ModuleError,
    },
}

/// Modules registered for one application, in registration order.
pub struct Registry {
    app_name: String,
    modules: Mutex<Vec<Arc<dyn Module>>>,
}

impl Registry {
    pub fn new(app_name: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            modules: Mutex::new(Vec::new()),
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<dyn Module>>> {
        self.modules.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `module`, replacing any module with the same name in place.
    pub fn add(&self, module: Arc<dyn Module>) {
        let mut modules = self.lock();
        match modules.iter_mut().find(|m| m.name() == module.name()) {
            Some(slot) => {
                tracing::debug!(module = %module.name(), "replacing module");
                *slot = module;
            }
            None => modules.push(module),
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Module>, RegistryError> {
        self.lock()
            .iter()
            .find(|m| m.name() == name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                name: name.to_string(),
            })
    }

    pub fn names(&self) -> Vec<String> {
        self.lock().iter().map(|m| m.name().to_string()).collect()
    }

    /// Parameters declared by every registered module.
    pub fn flags(&self) -> Vec<Param> {
        let modules = self.lock().clone();
        modules
            .iter()
            .flat_map(|m| m.flags(&self.app_name))
            .collect()
    }

    /// Load every module from `settings`.
    ///
    /// Stops at the first failure. Modules loaded before it keep their new
    /// state; modules after it keep their previous one.
    pub fn load(&self, settings: &Settings) -> Result<(), RegistryError> {
        let modules = self.lock().clone();
        for module in modules {
            tracing::debug!(module = %module.name(), "loading module");
            module.load(settings).map_err(|source| RegistryError::Load {
                module: module.name().to_string(),
                source,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{Target, TargetKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        name: &'static str,
        tag: usize,
        fail: bool,
        loads: AtomicUsize,
    }

    impl Counting {
        fn new(name: &'static str, tag: usize, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                tag,
                fail,
                loads: AtomicUsize::new(0),
            })
        }
    }

    impl Module for Counting {
        fn name(&self) -> &str {
            self.name
        }

        fn load(&self, _settings: &Settings) -> Result<(), ModuleError> {
            if self.fail {
                return Err(ModuleError::config(self.name, "boom"));
            }
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn flags(&self, app_name: &str) -> Vec<Param> {
            vec![Param::new(
                &format!("{}-{}", app_name, self.name),
                "test flag",
                self.name,
                crate::config::ParamValue::Int(self.tag as i64),
            )]
        }

        fn customize(&self, target: Target<'_>) -> Result<(), ModuleError> {
            Err(ModuleError::mismatch(self.name, TargetKind::Server, target.kind()))
        }
    }

    #[test]
    fn last_add_wins() {
        let registry = Registry::new("test");
        registry.add(Counting::new("a", 1, false));
        registry.add(Counting::new("b", 2, false));
        registry.add(Counting::new("a", 3, false));

        assert_eq!(registry.names(), vec!["a", "b"]);
        let flags = registry.flags();
        assert_eq!(flags[0].default, crate::config::ParamValue::Int(3));
    }

    #[test]
    fn get_absent_module_is_not_found() {
        let registry = Registry::new("test");
        let err = registry.get("missing").err().unwrap();
        assert!(matches!(err, RegistryError::NotFound { ref name } if name == "missing"));
    }

    #[test]
    fn load_stops_at_first_failure_without_rollback() {
        let registry = Registry::new("test");
        let first = Counting::new("first", 1, false);
        let second = Counting::new("second", 2, false);
        let broken = Counting::new("broken", 3, true);
        let last = Counting::new("last", 4, false);
        registry.add(first.clone());
        registry.add(second.clone());
        registry.add(broken);
        registry.add(last.clone());

        let err = registry.load(&Settings::new("test")).unwrap_err();
        assert!(matches!(err, RegistryError::Load { ref module, .. } if module == "broken"));
        assert_eq!(first.loads.load(Ordering::SeqCst), 1);
        assert_eq!(second.loads.load(Ordering::SeqCst), 1);
        assert_eq!(last.loads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn flags_are_prefixed_by_app_name() {
        let registry = Registry::new("echoctl");
        registry.add(Counting::new("x", 1, false));
        assert_eq!(registry.flags()[0].name, "echoctl-x");
    }
}
