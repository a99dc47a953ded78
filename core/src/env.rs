//! Dependencies injected into every component instance.

use std::rc::Rc;

use crate::{Config, bus::Bus, host::Host};

/// Host document, event bus and configuration shared by a tree of components.
///
/// Cloning is cheap; every clone refers to the same host and bus.
#[derive(Clone)]
pub struct Environment {
    host: Rc<dyn Host>,
    bus: Bus,
    config: Rc<Config>,
}

crate::impl_debug!(Environment);

impl Environment {
    /// Creates an environment with default configuration and a fresh bus.
    pub fn new(host: impl Host + 'static) -> Self {
        Self::with_config(host, Config::default())
    }

    /// Creates an environment with `config` and a bus built from it.
    pub fn with_config(host: impl Host + 'static, config: Config) -> Self {
        Self {
            host: Rc::new(host),
            bus: Bus::with_config(&config),
            config: Rc::new(config),
        }
    }

    /// Replaces the bus, e.g. to share one bus between several environments.
    #[must_use]
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = bus;
        self
    }

    /// The host document.
    #[must_use]
    pub fn host(&self) -> &dyn Host {
        self.host.as_ref()
    }

    pub(crate) const fn host_rc(&self) -> &Rc<dyn Host> {
        &self.host
    }

    /// The event bus.
    #[must_use]
    pub const fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Runtime configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }
}
