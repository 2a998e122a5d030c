use std::sync::Arc;

use tracing::{debug, error};

use crate::{driver::Driver, error::ContainerError};

/// Set of registered drivers, picked by kind.
#[derive(Default)]
pub struct DriverRouter {
    drivers: Vec<Arc<dyn Driver>>,
}

impl DriverRouter {
    #[inline]
    pub fn new() -> Self {
        Self {
            drivers: Vec::new(),
        }
    }

    /// Register a driver. A later registration under the same kind replaces the earlier one.
    pub fn register(&mut self, driver: Arc<dyn Driver>) {
        let kind = driver.kind().to_string();
        self.drivers.retain(|d| d.kind() != kind);
        debug!(kind = %kind, "driver registered");
        self.drivers.push(driver);
    }

    #[inline]
    pub fn with(mut self, driver: Arc<dyn Driver>) -> Self {
        self.register(driver);
        self
    }

    pub fn pick(&self, kind: &str) -> Option<&Arc<dyn Driver>> {
        self.drivers.iter().find(|d| d.kind() == kind)
    }

    /// Like [`DriverRouter::pick`], but an unknown kind is a configuration error.
    pub fn require(&self, kind: &str) -> Result<Arc<dyn Driver>, ContainerError> {
        match self.pick(kind) {
            Some(d) => Ok(Arc::clone(d)),
            None => {
                error!(kind, "no driver registered for kind; check peer wiring");
                Err(ContainerError::UnknownDriver(kind.to_string()))
            }
        }
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.drivers.iter().map(|d| d.kind()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{kinds, mock::MockDriver};

    #[test]
    fn pick_by_kind() {
        let router = DriverRouter::new()
            .with(Arc::new(MockDriver::new()))
            .with(Arc::new(MockDriver::with_kind(kinds::PROCESS)));

        assert!(router.pick(kinds::MOCK).is_some());
        assert!(router.pick(kinds::PROCESS).is_some());
        assert!(router.pick(kinds::SYSTEM).is_none());
    }

    #[test]
    fn unknown_kind_is_fatal() {
        let router = DriverRouter::new();
        let err = router.require("docker").err().unwrap();
        assert_eq!(err, ContainerError::UnknownDriver("docker".into()));
        assert!(err.is_fatal());
    }

    #[test]
    fn register_replaces_same_kind() {
        let mut router = DriverRouter::new();
        router.register(Arc::new(MockDriver::new()));
        router.register(Arc::new(MockDriver::new()));
        assert_eq!(router.kinds(), vec![kinds::MOCK]);
    }
}
