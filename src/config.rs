//! Configuration types for document-to-BPMN conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`],
//! built via its [`ConversionConfigBuilder`]. Keeping every knob in one
//! struct makes it trivial to share configs across workers, serialise them
//! for logging, and diff two runs to understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A dozen-field constructor is unreadable and breaks on every new field.
//! The builder lets callers set only what they care about and rely on
//! well-documented defaults for the rest.

use crate::error::ProcmapError;
use crate::pipeline::llm::TextGenerator;
use std::fmt;
use std::sync::Arc;

/// Configuration for a document-to-BPMN conversion.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use procmap::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .model("gpt-4.1-nano")
///     .max_retries(2)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// LLM model identifier, e.g. "gpt-4.1-nano", "claude-sonnet-4-20250514".
    /// If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `generator`, the backend is auto-detected from
    /// the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed text generator. Takes precedence over `provider_name`.
    /// This is the injection point for tests and custom middleware.
    pub generator: Option<Arc<dyn TextGenerator>>,

    /// Sampling temperature for the LLM completion. Default: 0.0.
    ///
    /// Zero makes the model as deterministic as the API allows — exactly
    /// what you want when asking for machine-readable JSON and XML. Higher
    /// values introduce variation that only hurts structured output.
    pub temperature: f32,

    /// Maximum tokens the LLM may generate per call. Default: 3000.
    ///
    /// A multi-process SOP with embedded BPMN XML can exceed 2 000 output
    /// tokens. Setting this too low silently truncates the XML mid-element,
    /// which then fails the well-formedness gate.
    pub max_tokens: usize,

    /// Maximum retry attempts on a transient LLM failure. Default: 3.
    ///
    /// Most 5xx and timeout errors are transient. Permanent errors (bad
    /// request, missing credential) are not retried — they surface as
    /// [`crate::error::ProcmapError`] immediately.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    ///
    /// Doubles after each attempt: 500 ms → 1 s → 2 s, so concurrent
    /// workers don't hammer a recovering endpoint in lockstep.
    pub retry_backoff_ms: u64,

    /// Custom system prompt. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Require extracted BPMN candidates to be well-formed XML. Default: true.
    ///
    /// With this off, the extractor falls back to the raw reply text when
    /// no delimiter matches, which can hand explanatory prose to the
    /// viewer as "XML".
    pub validate_xml: bool,

    /// Bound on generated BPMN identifier length. Default: 50.
    pub max_id_len: usize,

    /// Per-LLM-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            generator: None,
            temperature: 0.0,
            max_tokens: 3000,
            max_retries: 3,
            retry_backoff_ms: 500,
            system_prompt: None,
            validate_xml: true,
            max_id_len: 50,
            api_timeout_secs: 120,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("generator", &self.generator.as_ref().map(|_| "<dyn TextGenerator>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("validate_xml", &self.validate_xml)
            .field("max_id_len", &self.max_id_len)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.config.generator = Some(generator);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn validate_xml(mut self, v: bool) -> Self {
        self.config.validate_xml = v;
        self
    }

    pub fn max_id_len(mut self, n: usize) -> Self {
        self.config.max_id_len = n.max(1);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, ProcmapError> {
        let c = &self.config;
        if c.max_tokens == 0 {
            return Err(ProcmapError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(ProcmapError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ConversionConfig::builder().build().unwrap();
        assert_eq!(config.temperature, 0.0);
        assert_eq!(config.max_tokens, 3000);
        assert!(config.validate_xml);
    }

    #[test]
    fn temperature_is_clamped() {
        let config = ConversionConfig::builder().temperature(5.0).build().unwrap();
        assert_eq!(config.temperature, 2.0);
    }

    #[test]
    fn zero_max_tokens_rejected() {
        let err = ConversionConfig::builder().max_tokens(0).build();
        assert!(err.is_err());
    }

    #[test]
    fn debug_hides_generator_internals() {
        let config = ConversionConfig::default();
        let s = format!("{:?}", config);
        assert!(s.contains("generator: None"));
    }
}
