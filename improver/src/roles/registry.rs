//! Name → factory mapping used to build the configured role chain.

use std::collections::BTreeMap;

use anyhow::{Result, anyhow};
use tracing::debug;

use super::identify::IdentifyRole;
use super::refine::RefineRole;
use super::review::ReviewRole;
use super::verify::VerifyRole;
use super::{Role, RoleChain, RoleDeps};

pub type RoleFactory = Box<dyn Fn(&RoleDeps) -> Result<Box<dyn Role>>>;

pub struct RoleRegistry {
    factories: BTreeMap<String, RoleFactory>,
}

impl RoleRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with `identify`, `refine`, `verify` and `review`.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("identify", |deps| Ok(Box::new(IdentifyRole::new(deps)?)));
        registry.register("refine", |deps| Ok(Box::new(RefineRole::new(deps))));
        registry.register("verify", |deps| Ok(Box::new(VerifyRole::new(deps))));
        registry.register("review", |deps| Ok(Box::new(ReviewRole::new(deps))));
        registry
    }

    /// Add or replace a factory.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&RoleDeps) -> Result<Box<dyn Role>> + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Instantiate `names` in order. Unknown names are a configuration error.
    pub fn build_chain(&self, names: &[String], deps: &RoleDeps) -> Result<RoleChain> {
        let mut roles = Vec::with_capacity(names.len());
        for name in names {
            let factory = self.factories.get(name).ok_or_else(|| {
                anyhow!(
                    "unknown role '{name}' (known roles: {})",
                    self.names().join(", ")
                )
            })?;
            roles.push(factory(deps)?);
        }
        let chain = RoleChain::new(roles);
        debug!(roles = ?chain.names(), "role chain built");
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedRole, role_deps};

    #[test]
    fn builds_builtin_chain_in_configured_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let deps = role_deps(temp.path());
        let names: Vec<String> = ["review", "identify"].iter().map(|s| s.to_string()).collect();

        let chain = RoleRegistry::builtin().build_chain(&names, &deps).expect("chain");
        assert_eq!(chain.names(), ["review", "identify"]);
    }

    #[test]
    fn unknown_role_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let deps = role_deps(temp.path());
        let err = RoleRegistry::builtin()
            .build_chain(&["bogus".to_string()], &deps)
            .err()
            .expect("unknown role should fail");
        let msg = err.to_string();
        assert!(msg.contains("unknown role 'bogus'"));
        assert!(msg.contains("identify"));
    }

    #[test]
    fn custom_factories_can_be_registered() {
        let temp = tempfile::tempdir().expect("tempdir");
        let deps = role_deps(temp.path());
        let mut registry = RoleRegistry::empty();
        registry.register("noop", |_| Ok(Box::new(ScriptedRole::noop("noop"))));

        let chain = registry.build_chain(&["noop".to_string()], &deps).expect("chain");
        assert_eq!(chain.len(), 1);
    }
}
