use std::sync::Arc;

use crate::{
    config::RunnerConfig,
    dispatcher::Dispatcher,
    process::ProcessSupervisor,
    resolver::{EntryPointResolver, Introspector, Javap},
    session::Session,
};

/// Read-only state shared by every session of one server
pub struct ServiceInner<I = Javap> {
    pub(crate) config: RunnerConfig,
    pub(crate) dispatcher: Dispatcher<I>,
    pub(crate) supervisor: ProcessSupervisor,
}

/// Cheap to clone handle that opens sessions.
#[derive(Clone)]
pub struct ExecutionService<I = Javap> {
    inner: Arc<ServiceInner<I>>,
}

impl ExecutionService<Javap> {
    pub fn new(config: RunnerConfig) -> Self {
        let introspector = Javap::new(config.introspection_tool.clone());
        Self::with_introspector(config, introspector)
    }
}

impl<I: Introspector + 'static> ExecutionService<I> {
    pub fn with_introspector(config: RunnerConfig, introspector: I) -> Self {
        let supervisor = ProcessSupervisor::new(config.drain_grace());
        Self {
            inner: Arc::new(ServiceInner {
                dispatcher: Dispatcher::new(EntryPointResolver::new(introspector)),
                supervisor,
                config,
            }),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.inner.config
    }

    /// Open the session backing one client connection
    pub fn open_session(&self) -> Session<I> {
        Session::new(self.inner.clone())
    }
}
