//! Recording driver for tests.
//!
//! Keeps a set of "running" resources, records every call and can be told to fail or to take time.
use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use cclife_model::ContainerId;
use tokio_util::sync::CancellationToken;

use crate::{
    driver::{
        Action, DeployRequest, DestroyRequest, Driver, NameFormatter, StartRequest, StopRequest,
        format_name,
    },
    error::DriverError,
    kinds,
};

/// One recorded driver call, by resolved resource name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Start(String),
    Stop(String),
    Destroy(String),
    Deploy(String),
}

impl MockCall {
    pub fn action(&self) -> Action {
        match self {
            MockCall::Start(_) => Action::Start,
            MockCall::Stop(_) => Action::Stop,
            MockCall::Destroy(_) => Action::Destroy,
            MockCall::Deploy(_) => Action::Deploy,
        }
    }

    pub fn resource(&self) -> &str {
        match self {
            MockCall::Start(r) | MockCall::Stop(r) | MockCall::Destroy(r) | MockCall::Deploy(r) => r,
        }
    }
}

#[derive(Default)]
struct MockState {
    running: HashSet<String>,
    calls: Vec<MockCall>,
    failures: HashMap<Action, String>,
    in_flight: HashMap<String, usize>,
    max_in_flight: HashMap<String, usize>,
    total_in_flight: usize,
    peak_in_flight: usize,
}

pub struct MockDriver {
    kind: String,
    delay: Duration,
    state: Mutex<MockState>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::with_kind(kinds::MOCK)
    }

    /// Register the mock under another kind, e.g. to stand in for the process driver.
    pub fn with_kind(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            delay: Duration::ZERO,
            state: Mutex::new(MockState::default()),
        }
    }

    /// Every call sleeps for `delay` before taking effect.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fail_start(&self, reason: impl Into<String>) {
        self.state().failures.insert(Action::Start, reason.into());
    }

    pub fn fail_stop(&self, reason: impl Into<String>) {
        self.state().failures.insert(Action::Stop, reason.into());
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    pub fn count(&self, action: Action) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.action() == action)
            .count()
    }

    pub fn is_running(&self, resource: &str) -> bool {
        self.state().running.contains(resource)
    }

    pub fn running(&self) -> Vec<String> {
        let mut names: Vec<_> = self.state().running.iter().cloned().collect();
        names.sort();
        names
    }

    /// Highest number of concurrent calls observed for one resource.
    pub fn max_in_flight(&self, resource: &str) -> usize {
        self.state()
            .max_in_flight
            .get(resource)
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of concurrent calls observed across all resources.
    pub fn peak_in_flight(&self) -> usize {
        self.state().peak_in_flight
    }

    async fn call(&self, call: MockCall) -> Result<(), DriverError> {
        let resource = call.resource().to_string();
        let action = call.action();
        {
            let mut st = self.state();
            let n = st.in_flight.entry(resource.clone()).or_insert(0);
            *n += 1;
            let n = *n;
            let max = st.max_in_flight.entry(resource.clone()).or_insert(0);
            *max = (*max).max(n);
            st.total_in_flight += 1;
            st.peak_in_flight = st.peak_in_flight.max(st.total_in_flight);
            st.calls.push(call);
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let mut st = self.state();
        if let Some(n) = st.in_flight.get_mut(&resource) {
            *n -= 1;
        }
        st.total_in_flight -= 1;

        if let Some(reason) = st.failures.get(&action).cloned() {
            return Err(match action {
                Action::Start => DriverError::Start(reason),
                Action::Stop => DriverError::Stop(reason),
                Action::Destroy => DriverError::Destroy(reason),
                Action::Deploy => DriverError::Deploy(reason),
            });
        }
        match action {
            Action::Start => {
                st.running.insert(resource);
            }
            Action::Stop | Action::Destroy => {
                st.running.remove(&resource);
            }
            Action::Deploy => {}
        }
        Ok(())
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for MockDriver {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn start(&self, _ctx: &CancellationToken, req: &StartRequest) -> Result<(), DriverError> {
        self.call(MockCall::Start(self.resolve_name(&req.id, None)?))
            .await
    }

    async fn stop(&self, _ctx: &CancellationToken, req: &StopRequest) -> Result<(), DriverError> {
        self.call(MockCall::Stop(self.resolve_name(&req.id, None)?))
            .await
    }

    async fn destroy(
        &self,
        _ctx: &CancellationToken,
        req: &DestroyRequest,
    ) -> Result<(), DriverError> {
        self.call(MockCall::Destroy(self.resolve_name(&req.id, None)?))
            .await
    }

    async fn deploy(
        &self,
        _ctx: &CancellationToken,
        req: &DeployRequest,
    ) -> Result<(), DriverError> {
        self.call(MockCall::Deploy(self.resolve_name(&req.id, None)?))
            .await
    }

    fn resolve_name(
        &self,
        id: &ContainerId,
        formatter: Option<&NameFormatter>,
    ) -> Result<String, DriverError> {
        format_name(id.name(), formatter)
    }
}
