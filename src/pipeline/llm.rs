//! LLM interaction: the backend seam, concrete backends, and retry policy.
//!
//! All prompt text lives in [`crate::prompts`] and all reply recovery in
//! [`crate::pipeline::parse`] — this module only moves strings across the
//! network. Keeping the seam this narrow is what lets every backend (SDK,
//! REST, test fakes) share one extraction rule instead of four ad hoc
//! copies.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 5xx errors from LLM APIs are transient and frequent under
//! concurrent load. Exponential backoff (`retry_backoff_ms * 2^attempt`)
//! avoids thundering-herd: with 500 ms base and 3 retries the wait
//! sequence is 500 ms → 1 s → 2 s. Non-transport failures (missing
//! credential, unparseable reply) are never retried.

use crate::config::ConversionConfig;
use crate::error::ProcmapError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::fmt;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Environment variable naming an OpenAI-compatible chat-completions URL
/// for the REST backend.
pub const ENV_ENDPOINT: &str = "PROCMAP_LLM_ENDPOINT";
/// Environment variable naming the model for either backend.
pub const ENV_MODEL: &str = "PROCMAP_MODEL";
/// Environment variable naming the provider for the SDK backend.
pub const ENV_PROVIDER: &str = "PROCMAP_LLM_PROVIDER";

const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// A backend that turns a (system, user) prompt pair into reply text.
///
/// One attempt per call; retry policy belongs to [`generate_with_retry`]
/// so it is identical across backends.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, system_prompt: &str, user_prompt: &str)
        -> Result<String, ProcmapError>;

    /// Short backend label for log lines.
    fn backend_name(&self) -> &str;
}

/// Call the generator with exponential backoff on transport failures.
pub async fn generate_with_retry(
    generator: &dyn TextGenerator,
    system_prompt: &str,
    user_prompt: &str,
    config: &ConversionConfig,
) -> Result<String, ProcmapError> {
    let mut last_detail = String::new();

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = config.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "{}: retry {}/{} after {}ms",
                generator.backend_name(),
                attempt,
                config.max_retries,
                backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match generator.generate(system_prompt, user_prompt).await {
            Ok(reply) => {
                debug!(
                    "{}: reply of {} chars on attempt {}",
                    generator.backend_name(),
                    reply.len(),
                    attempt + 1
                );
                return Ok(reply);
            }
            Err(ProcmapError::UpstreamCallFailed { detail, .. }) => {
                warn!(
                    "{}: attempt {} failed — {}",
                    generator.backend_name(),
                    attempt + 1,
                    detail
                );
                last_detail = detail;
            }
            // Missing credentials or garbage replies will not improve with
            // another attempt.
            Err(e) => return Err(e),
        }
    }

    Err(ProcmapError::UpstreamCallFailed {
        retries: config.max_retries,
        detail: last_detail,
    })
}

// ── SDK backend ──────────────────────────────────────────────────────────────

/// Backend over the `edgequake-llm` provider stack (OpenAI, Anthropic,
/// Gemini, Ollama, Azure, or any OpenAI-compatible endpoint).
pub struct SdkGenerator {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
}

impl SdkGenerator {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ConversionConfig) -> Self {
        Self {
            provider,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

impl fmt::Debug for SdkGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdkGenerator")
            .field("provider", &"<dyn LLMProvider>")
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

#[async_trait]
impl TextGenerator for SdkGenerator {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, ProcmapError> {
        let messages = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(user_prompt),
        ];
        let options = CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| ProcmapError::UpstreamCallFailed {
                retries: 0,
                detail: e.to_string(),
            })?;

        debug!(
            "sdk: {} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }

    fn backend_name(&self) -> &str {
        "sdk"
    }
}

// ── REST backend ─────────────────────────────────────────────────────────────

/// Raw OpenAI-compatible chat-completions backend over `reqwest`.
///
/// Used when an explicit endpoint is configured (self-hosted gateway,
/// proxy, or a provider the SDK stack does not cover). The credential is
/// held privately and excluded from `Debug`; it must never reach an error
/// message or log line.
pub struct RestGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    temperature: f32,
    max_tokens: usize,
}

impl RestGenerator {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        config: &ConversionConfig,
    ) -> Result<Self, ProcmapError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_secs))
            .build()
            .map_err(|e| ProcmapError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

impl fmt::Debug for RestGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestGenerator")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl TextGenerator for RestGenerator {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, ProcmapError> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt },
            ],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProcmapError::UpstreamCallFailed {
                retries: 0,
                detail: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProcmapError::UpstreamCallFailed {
                retries: 0,
                detail: format!("HTTP {status}: {}", truncate(&detail, 300)),
            });
        }

        let payload: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| ProcmapError::UpstreamCallFailed {
                    retries: 0,
                    detail: format!("invalid JSON from upstream: {e}"),
                })?;

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| ProcmapError::MalformedModelOutput {
                detail: "upstream reply carried no message content".into(),
            })
    }

    fn backend_name(&self) -> &str {
        "rest"
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}

// ── Backend resolution ───────────────────────────────────────────────────────

/// Resolve the text generator, from most-specific to least-specific.
///
/// The fallback chain lets library users and server operators each set
/// exactly as much or as little as they need:
///
/// 1. **Pre-built generator** (`config.generator`) — constructed entirely
///    by the caller. Used by tests and callers that need middleware.
///
/// 2. **Named provider + model** (`config.provider_name`) — routed through
///    [`ProviderFactory::create_llm_provider`], which reads the matching
///    API key (`OPENAI_API_KEY`, etc.) from the environment.
///
/// 3. **REST endpoint** (`PROCMAP_LLM_ENDPOINT`) — an OpenAI-compatible
///    URL plus `PROCMAP_API_KEY`/`OPENAI_API_KEY`. Checked before
///    auto-detection so a configured gateway wins over ambient keys.
///
/// 4. **Environment pair** (`PROCMAP_LLM_PROVIDER` + `PROCMAP_MODEL`) —
///    provider choice made at the execution-environment level.
///
/// 5. **OpenAI key**, then **full auto-detection**
///    ([`ProviderFactory::from_env`]) as the final fallbacks.
///
/// No backend at all is a configuration error, reported immediately as
/// [`ProcmapError::UpstreamAuthMissing`] — never a silent empty result.
pub fn resolve_generator(
    config: &ConversionConfig,
) -> Result<Arc<dyn TextGenerator>, ProcmapError> {
    // 1) User-provided generator takes priority
    if let Some(ref generator) = config.generator {
        return Ok(Arc::clone(generator));
    }

    // 2) Provider name + model
    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        let provider = create_provider(name, model)?;
        return Ok(Arc::new(SdkGenerator::new(provider, config)));
    }

    // 3) Explicit REST endpoint
    if let Ok(endpoint) = std::env::var(ENV_ENDPOINT) {
        if !endpoint.is_empty() {
            let model = config
                .model
                .clone()
                .or_else(|| std::env::var(ENV_MODEL).ok().filter(|m| !m.is_empty()))
                .unwrap_or_else(|| DEFAULT_MODEL.to_string());
            let api_key = std::env::var("PROCMAP_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .ok()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| ProcmapError::UpstreamAuthMissing {
                    hint: format!(
                        "{ENV_ENDPOINT} is set but no credential was found.\n\
                         Set PROCMAP_API_KEY (or OPENAI_API_KEY) for the endpoint."
                    ),
                })?;
            let rest = RestGenerator::new(endpoint, model, api_key, config)?;
            return Ok(Arc::new(rest));
        }
    }

    // 4) Provider + model pair from the environment
    if let (Ok(provider), Ok(model)) =
        (std::env::var(ENV_PROVIDER), std::env::var(ENV_MODEL))
    {
        if !provider.is_empty() && !model.is_empty() {
            let provider = create_provider(&provider, &model)?;
            return Ok(Arc::new(SdkGenerator::new(provider, config)));
        }
    }

    // 5) Prefer OpenAI explicitly when its key is present, so users with
    // several keys get a deterministic default.
    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        if !key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            let provider = create_provider("openai", model)?;
            return Ok(Arc::new(SdkGenerator::new(provider, config)));
        }
    }

    let (provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ProcmapError::UpstreamAuthMissing {
            hint: format!(
                "No LLM backend could be auto-detected from the environment.\n\
                 Set OPENAI_API_KEY, ANTHROPIC_API_KEY, {ENV_ENDPOINT}, or configure a provider.\n\
                 Error: {e}"
            ),
        })?;
    Ok(Arc::new(SdkGenerator::new(provider, config)))
}

fn create_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ProcmapError> {
    ProviderFactory::create_llm_provider(name, model).map_err(|e| {
        ProcmapError::UpstreamAuthMissing {
            hint: format!("Provider '{name}' is not configured: {e}"),
        }
    })
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyGenerator {
        calls: AtomicUsize,
        fail_first: usize,
    }

    #[async_trait]
    impl TextGenerator for FlakyGenerator {
        async fn generate(&self, _system: &str, _user: &str) -> Result<String, ProcmapError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(ProcmapError::UpstreamCallFailed {
                    retries: 0,
                    detail: "HTTP 503".into(),
                })
            } else {
                Ok("reply".into())
            }
        }

        fn backend_name(&self) -> &str {
            "flaky"
        }
    }

    fn fast_config(max_retries: u32) -> ConversionConfig {
        ConversionConfig::builder()
            .max_retries(max_retries)
            .retry_backoff_ms(1)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn retry_recovers_from_transient_failures() {
        let generator = FlakyGenerator {
            calls: AtomicUsize::new(0),
            fail_first: 2,
        };
        let config = fast_config(3);
        let reply = generate_with_retry(&generator, "s", "u", &config).await.unwrap();
        assert_eq!(reply, "reply");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_gives_up_with_final_count() {
        let generator = FlakyGenerator {
            calls: AtomicUsize::new(0),
            fail_first: usize::MAX,
        };
        let config = fast_config(2);
        let err = generate_with_retry(&generator, "s", "u", &config).await.unwrap_err();
        match err {
            ProcmapError::UpstreamCallFailed { retries, detail } => {
                assert_eq!(retries, 2);
                assert!(detail.contains("503"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
    }

    struct AuthlessGenerator;

    #[async_trait]
    impl TextGenerator for AuthlessGenerator {
        async fn generate(&self, _s: &str, _u: &str) -> Result<String, ProcmapError> {
            Err(ProcmapError::UpstreamAuthMissing {
                hint: "no key".into(),
            })
        }
        fn backend_name(&self) -> &str {
            "authless"
        }
    }

    #[tokio::test]
    async fn auth_errors_are_not_retried() {
        let config = fast_config(5);
        let err = generate_with_retry(&AuthlessGenerator, "s", "u", &config)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcmapError::UpstreamAuthMissing { .. }));
    }

    #[test]
    fn rest_generator_debug_hides_credential() {
        let config = ConversionConfig::default();
        let generator =
            RestGenerator::new("https://gw.example/v1/chat", "m", "sk-secret-123", &config)
                .unwrap();
        let s = format!("{:?}", generator);
        assert!(!s.contains("sk-secret-123"));
        assert!(s.contains("<redacted>"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "héllo wörld";
        let t = truncate(s, 3);
        assert!(t.ends_with('…'));
        assert!(t.chars().count() <= 4);
    }
}
