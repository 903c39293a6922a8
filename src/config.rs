//! Configuration for the scanit pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. The config carries no collaborators, only
//! policy, so it can be cloned freely into every concurrent invocation.

use crate::address::OwnerSet;
use crate::error::PipelineError;
use crate::owners::{validate_recipient_id, KeywordTable};
use chrono::format::{Item, StrftimeItems};
use chrono_tz::Tz;
use std::time::Duration;

/// Default title pattern, rendered in the display timezone.
pub const DEFAULT_TITLE_FORMAT: &str = "Scanned Document - %a %d %b %Y at %H:%M";

/// Container holding per-recipient credentials.
pub const DEFAULT_CONFIG_CONTAINER: &str = "scanit-config";

/// Policy for one pipeline deployment.
///
/// # Example
/// ```rust
/// use scanit::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .fallback_recipients(["sandy", "wouter"])
///     .display_timezone("Europe/Amsterdam")
///     .delivery_concurrency(2)
///     .build()
///     .unwrap();
/// assert_eq!(config.delivery_concurrency, 2);
/// ```
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Recipients of a document whose owners are exactly `{"unknown"}`.
    pub fallback_recipients: OwnerSet,

    /// Timezone the document title is shown in. Scan timestamps are UTC.
    pub display_timezone: Tz,

    /// strftime pattern for the document title. Default: [`DEFAULT_TITLE_FORMAT`].
    pub title_format: String,

    /// Deliveries in flight at once for one merged document. Default: 4.
    pub delivery_concurrency: usize,

    /// Per-remaining-page delay before the fan-in check. Default: zero (off).
    pub settle_step: Duration,

    /// Upper bound on the fan-in settle delay. Default: 5 s.
    pub settle_max: Duration,

    /// Container holding `<recipient>.json` credentials. Default: `scanit-config`.
    pub config_container: String,

    /// Recipient → keyword terms used to resolve page ownership.
    pub keywords: KeywordTable,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fallback_recipients: OwnerSet::new(["sandy", "wouter"])
                .unwrap_or_else(|_| OwnerSet::unknown()),
            display_timezone: chrono_tz::America::New_York,
            title_format: DEFAULT_TITLE_FORMAT.to_string(),
            delivery_concurrency: 4,
            settle_step: Duration::ZERO,
            settle_max: Duration::from_secs(5),
            config_container: DEFAULT_CONFIG_CONTAINER.to_string(),
            keywords: KeywordTable::default(),
        }
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
            fallback: None,
            timezone: None,
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
    fallback: Option<Vec<String>>,
    timezone: Option<String>,
}

impl PipelineConfigBuilder {
    pub fn fallback_recipients<I, S>(mut self, recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fallback = Some(recipients.into_iter().map(Into::into).collect());
        self
    }

    /// IANA timezone name, validated in [`build`](Self::build).
    pub fn display_timezone(mut self, tz: impl Into<String>) -> Self {
        self.timezone = Some(tz.into());
        self
    }

    pub fn title_format(mut self, format: impl Into<String>) -> Self {
        self.config.title_format = format.into();
        self
    }

    pub fn delivery_concurrency(mut self, n: usize) -> Self {
        self.config.delivery_concurrency = n.max(1);
        self
    }

    pub fn settle_step(mut self, step: Duration) -> Self {
        self.config.settle_step = step;
        self
    }

    pub fn settle_max(mut self, max: Duration) -> Self {
        self.config.settle_max = max;
        self
    }

    pub fn config_container(mut self, container: impl Into<String>) -> Self {
        self.config.config_container = container.into();
        self
    }

    pub fn keywords(mut self, table: KeywordTable) -> Self {
        self.config.keywords = table;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(mut self) -> Result<PipelineConfig, PipelineError> {
        if let Some(fallback) = self.fallback.take() {
            for id in &fallback {
                validate_recipient_id(id)?;
            }
            self.config.fallback_recipients = OwnerSet::new(fallback)
                .map_err(|e| PipelineError::InvalidConfig(format!("fallback recipients: {e}")))?;
        }
        if let Some(tz) = self.timezone.take() {
            self.config.display_timezone = tz
                .parse::<Tz>()
                .map_err(|e| PipelineError::InvalidConfig(format!("timezone '{tz}': {e}")))?;
        }
        if self.config.title_format.trim().is_empty() {
            return Err(PipelineError::InvalidConfig("title format is empty".into()));
        }
        if StrftimeItems::new(&self.config.title_format).any(|item| matches!(item, Item::Error)) {
            return Err(PipelineError::InvalidConfig(format!(
                "title format '{}' is not a valid strftime pattern",
                self.config.title_format
            )));
        }
        if self.config.config_container.is_empty() {
            return Err(PipelineError::InvalidConfig("config container is empty".into()));
        }
        Ok(self.config)
    }
}
