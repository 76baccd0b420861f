use packhaul_backends::{build_repository, Repository};
use packhaul_core::config::RepositoryDescriptor;
use packhaul_core::progress::noop_progress;
use packhaul_core::{CancelToken, Config, ProgressHandler, Result, ScratchSession};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Resolves repository descriptors to live backend instances. The seam
/// workflows depend on, so tests can substitute recording mocks.
pub trait RepositoryProvider: Send + Sync {
    fn repository(&self, descriptor: &RepositoryDescriptor) -> Result<Arc<dyn Repository>>;
}

/// Production provider, building real backends and caching one
/// instance per repository name.
pub struct BackendProvider {
    session: Arc<ScratchSession>,
    cache: Mutex<HashMap<String, Arc<dyn Repository>>>,
}

impl BackendProvider {
    pub fn new(session: Arc<ScratchSession>) -> Arc<Self> {
        Arc::new(Self {
            session,
            cache: Mutex::new(HashMap::new()),
        })
    }
}

impl RepositoryProvider for BackendProvider {
    fn repository(&self, descriptor: &RepositoryDescriptor) -> Result<Arc<dyn Repository>> {
        let mut cache = self
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(repository) = cache.get(&descriptor.name) {
            return Ok(repository.clone());
        }
        let repository = build_repository(descriptor, self.session.clone());
        cache.insert(descriptor.name.clone(), repository.clone());
        Ok(repository)
    }
}

/// Everything one workflow invocation needs: configuration, backend
/// resolution, scratch session, and the run-wide progress and
/// cancellation plumbing.
#[derive(Clone)]
pub struct WorkflowContext {
    pub config: Arc<Config>,
    pub provider: Arc<dyn RepositoryProvider>,
    pub session: Arc<ScratchSession>,
    pub progress: ProgressHandler,
    pub token: CancelToken,
}

impl WorkflowContext {
    pub fn new(config: Config, session: Arc<ScratchSession>) -> Self {
        Self {
            config: Arc::new(config),
            provider: BackendProvider::new(session.clone()),
            session,
            progress: noop_progress(),
            token: CancelToken::new(),
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn RepositoryProvider>) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_progress(mut self, progress: ProgressHandler) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_token(mut self, token: CancelToken) -> Self {
        self.token = token;
        self
    }
}
