//! Shared fixtures for discovery BDD scenarios.

use std::cell::RefCell;

use camino::Utf8PathBuf;
use hostkit::instance::facts;
use hostkit::test_support::{ScriptedHost, ScriptedPrompter};
use hostkit::{AccessType, Instance, ShellBackedAccess};
use rstest::fixture;

/// Outcome of the last `When` step: the detected value or the failing fact.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Detected {
    Value(String),
    Failed { fact: String, message: String },
}

pub struct DiscoveryContext {
    pub host: ScriptedHost,
    pub prompter: ScriptedPrompter,
    pub access: RefCell<ShellBackedAccess<ScriptedHost>>,
    pub outcome: RefCell<Option<Detected>>,
}

impl DiscoveryContext {
    pub fn replace_instance(&self, instance: Instance) {
        let access = ShellBackedAccess::new(instance, self.host.clone(), Utf8PathBuf::from("/tmp"));
        *self.access.borrow_mut() = access;
    }

    pub fn fact(&self, key: &str) -> Option<String> {
        use hostkit::Access;

        self.access
            .borrow()
            .instance()
            .fact(key)
            .map(ToOwned::to_owned)
    }

    pub fn outcome(&self) -> Detected {
        self.outcome
            .borrow()
            .clone()
            .unwrap_or_else(|| panic!("no detection step ran"))
    }
}

pub fn linux_instance(name: &str) -> Instance {
    let mut instance = Instance::new(name, AccessType::Local);
    instance.set_fact(facts::PROFILE, "linux");
    instance.set_fact(facts::USER, name);
    instance.set_fact(facts::HOME, format!("/home/{name}"));
    instance
}

#[fixture]
pub fn discovery_context() -> DiscoveryContext {
    let host = ScriptedHost::new();
    let access = ShellBackedAccess::new(
        linux_instance("default"),
        host.clone(),
        Utf8PathBuf::from("/tmp"),
    );
    DiscoveryContext {
        host,
        prompter: ScriptedPrompter::new(),
        access: RefCell::new(access),
        outcome: RefCell::new(None),
    }
}
