//! Fakes and state builders shared by the handler tests.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::response::Response;
use tempfile::TempDir;
use tracing::subscriber::DefaultGuard;

use crate::config::Config;
use crate::enhancement::candidates::CandidateChain;
use crate::license::remote::{Activation, LicenseRemote, Validation};
use crate::license::{LicensePolicy, LicenseValidator, SystemClock};
use crate::llm_client::{Completion, LlmError, Provider, ProviderCall, ProviderRegistry};
use crate::state::AppState;

pub struct StaticRemote {
    activation: Activation,
    activate_calls: AtomicUsize,
}

impl StaticRemote {
    pub fn activate_calls(&self) -> usize {
        self.activate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LicenseRemote for StaticRemote {
    async fn activate(&self, _key: &str) -> Activation {
        self.activate_calls.fetch_add(1, Ordering::SeqCst);
        self.activation.clone()
    }

    async fn validate(&self, _key: &str, _instance_id: &str) -> Validation {
        Validation::Valid
    }
}

/// Answers every request with the same result.
pub struct FixedProvider {
    provider: Provider,
    result: Result<String, LlmError>,
    calls: AtomicUsize,
}

impl FixedProvider {
    pub fn new(provider: Provider, result: Result<String, LlmError>) -> Arc<Self> {
        Arc::new(Self {
            provider,
            result,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderCall for FixedProvider {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn complete(&self, _api_key: &str, _request: Completion<'_>) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

pub struct TestApp {
    pub dir: TempDir,
    pub remote: Arc<StaticRemote>,
    pub config: Config,
    pub providers: ProviderRegistry,
}

impl TestApp {
    pub fn new(pro_key: Option<&str>, activation: Activation) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = Config::from_lookup(|_| None).unwrap();
        config.pro_key = pro_key.map(str::to_string);
        config.profile_dir = dir.path().to_path_buf();
        Self {
            dir,
            remote: Arc::new(StaticRemote {
                activation,
                activate_calls: AtomicUsize::new(0),
            }),
            config,
            providers: ProviderRegistry::new(),
        }
    }

    /// Registers `call` and gives its provider a credential.
    pub fn with_provider(mut self, call: Arc<FixedProvider>) -> Self {
        let provider = call.provider();
        self.config.llm_credentials = self
            .config
            .llm_credentials
            .clone()
            .with(provider, format!("sk-test-{provider}"));
        self.providers = self.providers.register(call);
        self
    }

    pub fn with_chain(mut self, chain: &str) -> Self {
        self.config.llm_chain = CandidateChain::parse(chain).unwrap();
        self
    }

    pub fn with_retries(mut self, max_retries: u32, breaker_threshold: u32) -> Self {
        self.config.failover.max_retries = max_retries;
        self.config.failover.breaker_threshold = breaker_threshold;
        self
    }

    pub fn state(&self) -> AppState {
        AppState {
            config: Arc::new(self.config.clone()),
            license: Arc::new(LicenseValidator::new(
                self.dir.path(),
                self.remote.clone(),
                Arc::new(SystemClock),
                LicensePolicy::default(),
            )),
            providers: self.providers.clone(),
        }
    }
}

pub async fn json_body(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Collects formatted `tracing` output written on the current thread.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Captures until the returned guard is dropped.
    pub fn install(&self) -> DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
