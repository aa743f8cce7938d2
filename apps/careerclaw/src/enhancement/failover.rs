//! Failover Enhancer: walks the candidate chain until one provider produces a
//! valid draft.
//!
//! Per candidate: up to `max_retries + 1` attempts, with exponential backoff
//! plus jitter between attempts, but only for transient failures.
//! Across candidates: a circuit breaker counts consecutive candidate failures
//! and, once tripped, latches the instance into a fail-fast state for the rest
//! of its life. The first candidate to succeed becomes sticky and is tried
//! first from then on.
//!
//! State is owned by one instance (`&mut self`). Callers sharing an instance
//! must serialise access themselves.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::enhancement::candidates::{Candidate, CandidateChain};
use crate::enhancement::EnhancementInput;
use crate::llm_client::prompts::{build_enhance_prompt, estimate_token_count, SYSTEM_PROMPT};
use crate::llm_client::{
    validate_output, Completion, LlmError, OutputBounds, ProviderCall, ProviderCredentials,
    ProviderRegistry, REQUEST_TIMEOUT,
};

/// Case-insensitive markers of a failure worth retrying.
///
/// Matched against the error's Display text (categories, provider error
/// codes, status numbers), so this is only as stable as that wording.
const TRANSIENT_MARKERS: &[&str] = &[
    "rate limit",
    "overloaded",
    "timeout",
    "timed out",
    "try again",
    "server error",
    "503",
    "529",
];

/// Retry and breaker policy for one enhancer instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FailoverPolicy {
    /// Extra attempts per candidate after the first.
    pub max_retries: u32,
    /// Consecutive candidate failures before the instance disables itself.
    pub breaker_threshold: u32,
    pub backoff_base: Duration,
    pub max_jitter: Duration,
    pub request_timeout: Duration,
    pub output: OutputBounds,
}

impl Default for FailoverPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            breaker_threshold: 2,
            backoff_base: Duration::from_millis(800),
            max_jitter: Duration::from_millis(250),
            request_timeout: REQUEST_TIMEOUT,
            output: OutputBounds::default(),
        }
    }
}

/// Why an enhancement call produced no text.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnhanceError {
    /// The breaker tripped earlier; nothing was attempted.
    #[error("enhancer disabled: {reason}")]
    Disabled { reason: String },

    /// Every attempted candidate failed.
    #[error("all candidates failed; last error: {last}")]
    Exhausted { last: LlmError },

    /// No candidate could be attempted at all.
    #[error("no candidates available ({skipped} skipped for missing credentials)")]
    NoCandidates { skipped: usize },

    #[error("enhancer configuration error: {0}")]
    Config(String),
}

impl EnhanceError {
    /// Short category name for logs and API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            EnhanceError::Disabled { .. } => "disabled",
            EnhanceError::Exhausted { .. } => "provider_failure",
            EnhanceError::NoCandidates { .. } => "no_candidates",
            EnhanceError::Config(_) => "config",
        }
    }

    /// True when a later call on the same instance could still succeed.
    pub fn is_retryable_later(&self) -> bool {
        matches!(
            self,
            EnhanceError::Exhausted { .. } | EnhanceError::NoCandidates { .. }
        )
    }
}

#[derive(Debug, Default)]
struct FailoverState {
    consecutive_failures: u32,
    disabled: bool,
    disabled_reason: Option<String>,
    sticky: Option<Candidate>,
}

pub struct FailoverEnhancer {
    chain: CandidateChain,
    registry: ProviderRegistry,
    credentials: ProviderCredentials,
    policy: FailoverPolicy,
    state: FailoverState,
}

impl FailoverEnhancer {
    /// Fails when no credential is configured at all, or when a candidate
    /// names a provider the registry has no implementation for.
    pub fn new(
        chain: CandidateChain,
        registry: ProviderRegistry,
        credentials: ProviderCredentials,
        policy: FailoverPolicy,
    ) -> Result<Self, EnhanceError> {
        if credentials.is_empty() {
            return Err(EnhanceError::Config(
                "LLM API key must not be empty".to_string(),
            ));
        }
        if let Some(missing) = chain
            .candidates()
            .iter()
            .find(|c| registry.get(c.provider).is_none())
        {
            return Err(EnhanceError::Config(format!(
                "no implementation registered for provider '{}'",
                missing.provider
            )));
        }
        Ok(Self {
            chain,
            registry,
            credentials,
            policy,
            state: FailoverState::default(),
        })
    }

    pub fn is_disabled(&self) -> bool {
        self.state.disabled
    }

    pub fn disabled_reason(&self) -> Option<&str> {
        self.state.disabled_reason.as_deref()
    }

    pub fn sticky_candidate(&self) -> Option<&Candidate> {
        self.state.sticky.as_ref()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.consecutive_failures
    }

    /// Returns an enhanced outreach body (no subject line).
    pub async fn enhance(&mut self, input: EnhancementInput<'_>) -> Result<String, EnhanceError> {
        if self.state.disabled {
            return Err(EnhanceError::Disabled {
                reason: self.state.disabled_reason.clone().unwrap_or_default(),
            });
        }

        let prompt = build_enhance_prompt(input);
        debug!(
            "Enhancement prompt for {}: ~{} tokens",
            input.job.company,
            estimate_token_count(SYSTEM_PROMPT) + estimate_token_count(&prompt)
        );
        let threshold = self.policy.breaker_threshold.max(1);
        let order = self.chain.ordered(self.state.sticky.as_ref());

        let mut last_error: Option<LlmError> = None;
        let mut skipped = 0usize;

        for candidate in order {
            let Some(api_key) = self.credentials.resolve(candidate.provider) else {
                warn!(
                    "Skipping {candidate}: {}",
                    LlmError::MissingCredential(candidate.provider)
                );
                skipped += 1;
                continue;
            };
            let Some(call) = self.registry.get(candidate.provider) else {
                return Err(EnhanceError::Config(format!(
                    "no implementation registered for provider '{}'",
                    candidate.provider
                )));
            };

            match self
                .try_candidate(call, api_key, &candidate, &prompt)
                .await
            {
                Ok(text) => {
                    self.state.consecutive_failures = 0;
                    if self.state.sticky.as_ref() != Some(&candidate) {
                        info!("Promoting {candidate} to sticky candidate");
                        self.state.sticky = Some(candidate);
                    }
                    return Ok(text);
                }
                Err(err) => {
                    warn!("Candidate {candidate} failed: {err}");
                    last_error = Some(err);
                    self.state.consecutive_failures += 1;

                    if self.state.consecutive_failures >= threshold {
                        let reason = format!(
                            "circuit breaker tripped after {} consecutive candidate failures",
                            self.state.consecutive_failures
                        );
                        error!("LLM enhancement disabled for this run: {reason}");
                        self.state.disabled = true;
                        self.state.disabled_reason = Some(reason);
                        break;
                    }
                }
            }
        }

        match last_error {
            Some(last) => Err(EnhanceError::Exhausted { last }),
            None => Err(EnhanceError::NoCandidates { skipped }),
        }
    }

    /// Runs one candidate through its retry budget.
    async fn try_candidate(
        &self,
        call: Arc<dyn ProviderCall>,
        api_key: &str,
        candidate: &Candidate,
        prompt: &str,
    ) -> Result<String, LlmError> {
        let mut attempt: u32 = 0;
        loop {
            let err = match self.attempt_once(call.as_ref(), api_key, candidate, prompt).await {
                Ok(text) => return Ok(text),
                Err(err) => err,
            };

            if !is_transient(&err) || attempt >= self.policy.max_retries {
                return Err(err);
            }

            let delay = backoff_delay(&self.policy, attempt);
            attempt += 1;
            warn!(
                "{candidate} attempt {}/{} failed ({err}), retrying after {}ms...",
                attempt,
                self.policy.max_retries + 1,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt_once(
        &self,
        call: &dyn ProviderCall,
        api_key: &str,
        candidate: &Candidate,
        prompt: &str,
    ) -> Result<String, LlmError> {
        let request = Completion {
            model: &candidate.model,
            system: SYSTEM_PROMPT,
            prompt,
        };
        let timeout = self.policy.request_timeout;
        let raw = tokio::time::timeout(timeout, call.complete(api_key, request))
            .await
            .map_err(|_| LlmError::Timeout(timeout))??;
        validate_output(&raw, self.policy.output)
    }
}

/// Heuristic transient/permanent split on the error's Display text.
pub fn is_transient(err: &LlmError) -> bool {
    let text = err.to_string().to_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| text.contains(marker))
}

/// `base × 2^attempt` plus uniform jitter in `[0, max_jitter]`.
pub fn backoff_delay(policy: &FailoverPolicy, attempt: u32) -> Duration {
    let exp = policy.backoff_base.saturating_mul(2u32.saturating_pow(attempt));
    let jitter_secs = policy.max_jitter.as_secs_f64();
    let jitter = if jitter_secs > 0.0 {
        Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..=jitter_secs))
    } else {
        Duration::ZERO
    };
    exp.saturating_add(jitter)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::enhancement::{GapSignals, JobSummary, ResumeSignals};
    use crate::llm_client::{words, Provider};

    /// Replays scripted results, then repeats `fallback`. Records every model requested.
    struct ScriptedCall {
        provider: Provider,
        script: Mutex<VecDeque<Result<String, LlmError>>>,
        fallback: Result<String, LlmError>,
        models: Mutex<Vec<String>>,
    }

    impl ScriptedCall {
        fn new(provider: Provider, fallback: Result<String, LlmError>) -> Arc<Self> {
            Self::scripted(provider, vec![], fallback)
        }

        fn scripted(
            provider: Provider,
            script: Vec<Result<String, LlmError>>,
            fallback: Result<String, LlmError>,
        ) -> Arc<Self> {
            Arc::new(Self {
                provider,
                script: Mutex::new(script.into()),
                fallback,
                models: Mutex::new(vec![]),
            })
        }

        fn models(&self) -> Vec<String> {
            self.models.lock().unwrap().clone()
        }

        fn calls(&self) -> usize {
            self.models.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ProviderCall for ScriptedCall {
        fn provider(&self) -> Provider {
            self.provider
        }

        async fn complete(&self, _api_key: &str, request: Completion<'_>) -> Result<String, LlmError> {
            self.models.lock().unwrap().push(request.model.to_string());
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.fallback.clone())
        }
    }

    /// Never answers.
    struct HangingCall;

    #[async_trait]
    impl ProviderCall for HangingCall {
        fn provider(&self) -> Provider {
            Provider::Anthropic
        }

        async fn complete(&self, _api_key: &str, _request: Completion<'_>) -> Result<String, LlmError> {
            std::future::pending().await
        }
    }

    fn both_keys() -> ProviderCredentials {
        ProviderCredentials::new()
            .with(Provider::OpenAi, "sk-openai")
            .with(Provider::Anthropic, "sk-anthropic")
    }

    fn policy(max_retries: u32, breaker_threshold: u32) -> FailoverPolicy {
        FailoverPolicy {
            max_retries,
            breaker_threshold,
            ..FailoverPolicy::default()
        }
    }

    fn registry(openai: &Arc<ScriptedCall>, anthropic: &Arc<ScriptedCall>) -> ProviderRegistry {
        ProviderRegistry::new()
            .register(openai.clone())
            .register(anthropic.clone())
    }

    fn bad_request() -> Result<String, LlmError> {
        Err(LlmError::api(400, Some("invalid_request_error")))
    }

    fn overloaded() -> Result<String, LlmError> {
        Err(LlmError::api(529, Some("overloaded_error")))
    }

    fn good_draft() -> Result<String, LlmError> {
        Ok(words(120))
    }

    async fn run(enhancer: &mut FailoverEnhancer) -> Result<String, EnhanceError> {
        let job = JobSummary {
            title: "Senior Engineer".into(),
            company: "Acme".into(),
            description: "Acme builds developer tools.".into(),
        };
        let resume = ResumeSignals::default();
        let gap = GapSignals::default();
        enhancer
            .enhance(EnhancementInput {
                job: &job,
                resume: &resume,
                gap: &gap,
            })
            .await
    }

    #[tokio::test]
    async fn test_breaker_trips_then_fails_fast_without_network() {
        let openai = ScriptedCall::new(Provider::OpenAi, bad_request());
        let anthropic = ScriptedCall::new(Provider::Anthropic, bad_request());
        let chain =
            CandidateChain::parse("openai/gpt-5.2,openai/gpt-4o-mini,anthropic/claude-sonnet-4-6")
                .unwrap();
        let mut enhancer =
            FailoverEnhancer::new(chain, registry(&openai, &anthropic), both_keys(), policy(0, 2))
                .unwrap();

        let first = run(&mut enhancer).await.unwrap_err();
        assert!(matches!(first, EnhanceError::Exhausted { .. }), "got {first:?}");
        assert!(enhancer.is_disabled());
        assert_eq!(openai.models(), vec!["gpt-5.2", "gpt-4o-mini"]);
        assert_eq!(anthropic.calls(), 0, "breaker stops the walk before the third candidate");

        let second = run(&mut enhancer).await.unwrap_err();
        assert!(matches!(second, EnhanceError::Disabled { .. }), "got {second:?}");
        assert!(second.to_string().contains("disabled"));
        assert!(second.to_string().contains("circuit"));
        assert!(!second.is_retryable_later());
        assert_eq!(openai.calls() + anthropic.calls(), 2, "no network after trip");
    }

    #[tokio::test]
    async fn test_failures_accumulate_across_calls() {
        let openai = ScriptedCall::new(Provider::OpenAi, bad_request());
        let anthropic = ScriptedCall::new(Provider::Anthropic, good_draft());
        let chain = CandidateChain::parse("gpt-4o-mini").unwrap();
        let mut enhancer =
            FailoverEnhancer::new(chain, registry(&openai, &anthropic), both_keys(), policy(0, 2))
                .unwrap();

        let first = run(&mut enhancer).await.unwrap_err();
        assert!(first.is_retryable_later());
        assert!(!enhancer.is_disabled());
        assert_eq!(enhancer.consecutive_failures(), 1);

        run(&mut enhancer).await.unwrap_err();
        assert!(enhancer.is_disabled());
        assert!(matches!(
            run(&mut enhancer).await,
            Err(EnhanceError::Disabled { .. })
        ));
        assert_eq!(openai.calls(), 2);
    }

    #[tokio::test]
    async fn test_success_promotes_sticky_and_resets_failures() {
        let openai = ScriptedCall::new(Provider::OpenAi, bad_request());
        let anthropic = ScriptedCall::new(Provider::Anthropic, good_draft());
        let chain = CandidateChain::parse("openai/gpt-5.2,anthropic/claude-sonnet-4-6").unwrap();
        let mut enhancer =
            FailoverEnhancer::new(chain, registry(&openai, &anthropic), both_keys(), policy(0, 3))
                .unwrap();

        let text = run(&mut enhancer).await.unwrap();
        assert_eq!(text.split_whitespace().count(), 120);
        assert_eq!(enhancer.consecutive_failures(), 0);
        assert_eq!(
            enhancer.sticky_candidate(),
            Some(&Candidate::new(Provider::Anthropic, "claude-sonnet-4-6"))
        );
        assert_eq!(openai.calls(), 1);

        // Sticky candidate goes first: openai is not touched again.
        run(&mut enhancer).await.unwrap();
        assert_eq!(openai.calls(), 1);
        assert_eq!(anthropic.calls(), 2);
    }

    #[tokio::test]
    async fn test_non_transient_failure_is_not_retried() {
        let openai = ScriptedCall::new(Provider::OpenAi, bad_request());
        let anthropic = ScriptedCall::new(Provider::Anthropic, good_draft());
        let chain = CandidateChain::parse("gpt-4o-mini,anthropic/claude-sonnet-4-6").unwrap();
        let mut enhancer =
            FailoverEnhancer::new(chain, registry(&openai, &anthropic), both_keys(), policy(2, 5))
                .unwrap();

        run(&mut enhancer).await.unwrap();
        assert_eq!(openai.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retries_with_backoff() {
        let openai = ScriptedCall::scripted(
            Provider::OpenAi,
            vec![overloaded(), Err(LlmError::api(429, None))],
            good_draft(),
        );
        let anthropic = ScriptedCall::new(Provider::Anthropic, good_draft());
        let chain = CandidateChain::parse("gpt-4o-mini,anthropic/claude-sonnet-4-6").unwrap();
        let mut enhancer =
            FailoverEnhancer::new(chain, registry(&openai, &anthropic), both_keys(), policy(2, 2))
                .unwrap();

        let started = tokio::time::Instant::now();
        run(&mut enhancer).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(openai.calls(), 3);
        assert_eq!(anthropic.calls(), 0);
        // 0.8s + 1.6s, plus at most 2 × 0.25s jitter.
        assert!(elapsed >= Duration::from_millis(2400), "elapsed {elapsed:?}");
        assert!(elapsed <= Duration::from_millis(2900), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_exhaust_retries_then_fall_over() {
        let openai = ScriptedCall::new(Provider::OpenAi, Err(LlmError::api(503, None)));
        let anthropic = ScriptedCall::new(Provider::Anthropic, good_draft());
        let chain = CandidateChain::parse("gpt-4o-mini,anthropic/claude-sonnet-4-6").unwrap();
        let mut enhancer =
            FailoverEnhancer::new(chain, registry(&openai, &anthropic), both_keys(), policy(2, 2))
                .unwrap();

        run(&mut enhancer).await.unwrap();
        assert_eq!(openai.calls(), 3);
        assert_eq!(anthropic.calls(), 1);
        assert_eq!(enhancer.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_request_times_out_and_is_retried() {
        let openai = ScriptedCall::new(Provider::OpenAi, bad_request());
        let registry = ProviderRegistry::new()
            .register(openai.clone())
            .register(Arc::new(HangingCall));
        let chain = CandidateChain::parse("anthropic/claude-sonnet-4-6").unwrap();
        let mut enhancer = FailoverEnhancer::new(chain, registry, both_keys(), policy(1, 5)).unwrap();

        let started = tokio::time::Instant::now();
        let err = run(&mut enhancer).await.unwrap_err();
        assert_eq!(
            err,
            EnhanceError::Exhausted {
                last: LlmError::Timeout(REQUEST_TIMEOUT)
            }
        );
        assert!(started.elapsed() >= Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_invalid_output_counts_as_candidate_failure() {
        let openai = ScriptedCall::new(Provider::OpenAi, Ok(words(10)));
        let anthropic = ScriptedCall::new(Provider::Anthropic, Ok(words(400)));
        let chain = CandidateChain::parse("gpt-4o-mini,anthropic/claude-sonnet-4-6").unwrap();
        let mut enhancer =
            FailoverEnhancer::new(chain, registry(&openai, &anthropic), both_keys(), policy(2, 5))
                .unwrap();

        let err = run(&mut enhancer).await.unwrap_err();
        assert!(matches!(
            err,
            EnhanceError::Exhausted {
                last: LlmError::TooLong { words: 400, .. }
            }
        ));
        assert_eq!(openai.calls(), 1, "too-short output is not retried");
        assert_eq!(anthropic.calls(), 1);
        assert_eq!(enhancer.consecutive_failures(), 2);
    }

    #[tokio::test]
    async fn test_missing_credential_skips_candidate_without_counting() {
        let openai = ScriptedCall::new(Provider::OpenAi, good_draft());
        let anthropic = ScriptedCall::new(Provider::Anthropic, good_draft());
        let chain = CandidateChain::parse("anthropic/claude-sonnet-4-6,gpt-4o-mini").unwrap();
        let creds = ProviderCredentials::new().with(Provider::OpenAi, "sk-openai");
        let mut enhancer =
            FailoverEnhancer::new(chain, registry(&openai, &anthropic), creds, policy(0, 1)).unwrap();

        run(&mut enhancer).await.unwrap();
        assert_eq!(anthropic.calls(), 0);
        assert_eq!(openai.calls(), 1);
        assert!(!enhancer.is_disabled());
    }

    #[tokio::test]
    async fn test_no_attempt_possible_reports_no_candidates() {
        let openai = ScriptedCall::new(Provider::OpenAi, good_draft());
        let anthropic = ScriptedCall::new(Provider::Anthropic, good_draft());
        let chain = CandidateChain::parse("gpt-5.2,gpt-4o-mini").unwrap();
        let creds = ProviderCredentials::new().with(Provider::Anthropic, "sk-anthropic");
        let mut enhancer =
            FailoverEnhancer::new(chain, registry(&openai, &anthropic), creds, policy(0, 1)).unwrap();

        let err = run(&mut enhancer).await.unwrap_err();
        assert_eq!(err, EnhanceError::NoCandidates { skipped: 2 });
        assert_eq!(err.kind(), "no_candidates");
        assert!(!enhancer.is_disabled());
        assert_eq!(openai.calls(), 0);
    }

    #[test]
    fn test_construction_rejects_empty_credentials() {
        let openai = ScriptedCall::new(Provider::OpenAi, good_draft());
        let anthropic = ScriptedCall::new(Provider::Anthropic, good_draft());
        let chain = CandidateChain::parse("gpt-4o-mini").unwrap();
        let result = FailoverEnhancer::new(
            chain,
            registry(&openai, &anthropic),
            ProviderCredentials::new(),
            FailoverPolicy::default(),
        );
        assert!(matches!(result, Err(EnhanceError::Config(_))));
    }

    #[test]
    fn test_construction_rejects_unregistered_provider() {
        let openai = ScriptedCall::new(Provider::OpenAi, good_draft());
        let registry = ProviderRegistry::new().register(openai);
        let chain = CandidateChain::parse("anthropic/claude-sonnet-4-6").unwrap();
        let result = FailoverEnhancer::new(chain, registry, both_keys(), FailoverPolicy::default());
        match result {
            Err(EnhanceError::Config(msg)) => assert!(msg.contains("anthropic")),
            Err(other) => panic!("unexpected error {other:?}"),
            Ok(_) => panic!("expected a configuration error"),
        }
    }

    #[test]
    fn test_transient_classification() {
        assert!(is_transient(&LlmError::api(429, Some("rate_limit_exceeded"))));
        assert!(is_transient(&LlmError::api(529, Some("overloaded_error"))));
        assert!(is_transient(&LlmError::api(503, None)));
        assert!(is_transient(&LlmError::api(500, Some("api_error"))));
        assert!(is_transient(&LlmError::api(408, None)));
        assert!(is_transient(&LlmError::Timeout(REQUEST_TIMEOUT)));
        assert!(!is_transient(&LlmError::api(401, Some("authentication_error"))));
        assert!(!is_transient(&LlmError::api(400, Some("invalid_request_error"))));
        assert!(!is_transient(&LlmError::Transport("connect")));
        assert!(!is_transient(&LlmError::TooShort { words: 10, min: 50 }));
        assert!(!is_transient(&LlmError::EmptyResponse));
    }

    #[test]
    fn test_backoff_grows_exponentially_with_bounded_jitter() {
        let no_jitter = FailoverPolicy {
            max_jitter: Duration::ZERO,
            ..FailoverPolicy::default()
        };
        assert_eq!(backoff_delay(&no_jitter, 0), Duration::from_millis(800));
        assert_eq!(backoff_delay(&no_jitter, 1), Duration::from_millis(1600));
        assert_eq!(backoff_delay(&no_jitter, 2), Duration::from_millis(3200));

        let policy = FailoverPolicy::default();
        for _ in 0..50 {
            let d = backoff_delay(&policy, 1);
            assert!(d >= Duration::from_millis(1600));
            assert!(d <= Duration::from_millis(1850));
        }
    }
}
