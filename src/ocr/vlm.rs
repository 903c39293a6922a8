//! OCR through a Vision Language Model.
//!
//! The page JPEG is sent as a base64 image attachment; the model replies with
//! a line-per-line transcription, which [`OcrResult::from_plain_text`] turns
//! into positioned blocks sized to the image.
//!
//! ## Retries
//!
//! None by default. A failed call fails the stage, and the event platform's
//! redelivery retries the stage as a whole. `max_retries` exists for local
//! runs where nothing redelivers; backoff doubles per attempt
//! (`retry_backoff_ms * 2^attempt`).

use super::{OcrError, OcrResult, TextDetector};
use crate::prompts::{DEFAULT_OCR_PROMPT, PAGE_INSTRUCTION};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Settings for [`VlmTextDetector`].
#[derive(Clone)]
pub struct VlmOcrConfig {
    /// LLM model identifier. If None, uses [`DEFAULT_MODEL`] for named providers.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0; transcription wants no creativity.
    pub temperature: f32,

    /// Maximum tokens per page. Default: 4096.
    pub max_tokens: usize,

    /// Retries on a failed call. Default: 0.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds. Default: 500.
    pub retry_backoff_ms: u64,

    /// Custom system prompt. If None, uses [`DEFAULT_OCR_PROMPT`].
    pub system_prompt: Option<String>,
}

impl Default for VlmOcrConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 4096,
            max_retries: 0,
            retry_backoff_ms: 500,
            system_prompt: None,
        }
    }
}

impl fmt::Debug for VlmOcrConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VlmOcrConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

/// [`TextDetector`] backed by an `edgequake-llm` vision provider.
pub struct VlmTextDetector {
    provider: Arc<dyn LLMProvider>,
    config: VlmOcrConfig,
}

impl VlmTextDetector {
    /// Resolve the provider from `config` (see [`resolve_provider`]).
    pub fn new(config: VlmOcrConfig) -> Result<Self, OcrError> {
        let provider = resolve_provider(&config)?;
        Ok(Self { provider, config })
    }

    fn build_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.config.temperature),
            max_tokens: Some(self.config.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl TextDetector for VlmTextDetector {
    async fn detect_text(&self, locator: &str, image: &[u8]) -> Result<Option<OcrResult>, OcrError> {
        let start = Instant::now();
        let (width, height) = image_dimensions(image)?;

        let system_prompt = self
            .config
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_OCR_PROMPT);
        let image_data = ImageData::new(STANDARD.encode(image), "image/jpeg").with_detail("high");
        let messages = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user_with_images(PAGE_INSTRUCTION, vec![image_data]),
        ];
        let options = self.build_options();

        let mut last_err: Option<String> = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff = retry_backoff(self.config.retry_backoff_ms, attempt);
                warn!(
                    "{}: OCR retry {}/{} after {:?}",
                    locator, attempt, self.config.max_retries, backoff
                );
                sleep(backoff).await;
            }

            match self.provider.chat(&messages, Some(&options)).await {
                Ok(response) => {
                    debug!(
                        "{}: {} input tokens, {} output tokens, {:?}",
                        locator,
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    let result = OcrResult::from_plain_text(&response.content, width, height);
                    return Ok(if result.annotations.is_empty() {
                        None
                    } else {
                        Some(result)
                    });
                }
                Err(e) => {
                    let err_msg = format!("{}", e);
                    warn!("{}: OCR attempt {} failed: {}", locator, attempt + 1, err_msg);
                    last_err = Some(err_msg);
                }
            }
        }

        Err(OcrError::RequestFailed {
            attempts: self.config.max_retries.saturating_add(1),
            detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}

/// Exponential backoff before retry `attempt` (1-based), saturating at `u64::MAX` ms.
fn retry_backoff(base_ms: u64, attempt: u32) -> Duration {
    let factor = 2u64.checked_pow(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor))
}

/// Read the image header for its pixel size without decoding the pixels.
pub fn image_dimensions(image: &[u8]) -> Result<(u32, u32), OcrError> {
    image::ImageReader::new(Cursor::new(image))
        .with_guessed_format()
        .map_err(|e| OcrError::InvalidImage(e.to_string()))?
        .into_dimensions()
        .map_err(|e| OcrError::InvalidImage(e.to_string()))
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`)
/// 2. **Named provider + model** (`config.provider_name`)
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`)
/// 4. **OpenAI** when `OPENAI_API_KEY` is set
/// 5. **Full auto-detection** (`ProviderFactory::from_env`)
pub fn resolve_provider(config: &VlmOcrConfig) -> Result<Arc<dyn LLMProvider>, OcrError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) = ProviderFactory::from_env().map_err(|e| {
        OcrError::ProviderNotConfigured(format!(
            "no vision provider could be auto-detected from the environment \
             (set OPENAI_API_KEY, ANTHROPIC_API_KEY or EDGEQUAKE_LLM_PROVIDER): {e}"
        ))
    })?;

    Ok(llm_provider)
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, OcrError> {
    ProviderFactory::create_llm_provider(provider_name, model)
        .map_err(|e| OcrError::ProviderNotConfigured(format!("{provider_name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage};

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([255, 255, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Jpeg)
            .expect("encode jpeg");
        buf
    }

    #[test]
    fn reads_dimensions_from_jpeg_header() {
        assert_eq!(image_dimensions(&jpeg(31, 17)).unwrap(), (31, 17));
    }

    #[test]
    fn rejects_non_image_bytes() {
        assert!(matches!(
            image_dimensions(b"not an image"),
            Err(OcrError::InvalidImage(_))
        ));
    }

    #[test]
    fn defaults_do_not_retry() {
        let config = VlmOcrConfig::default();
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.temperature, 0.0);
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        assert_eq!(retry_backoff(500, 1), Duration::from_millis(500));
        assert_eq!(retry_backoff(500, 3), Duration::from_millis(2000));
        assert_eq!(retry_backoff(500, 65), Duration::from_millis(u64::MAX));
        assert_eq!(retry_backoff(500, u32::MAX), Duration::from_millis(u64::MAX));
        assert_eq!(retry_backoff(0, 80), Duration::ZERO);
    }
}
