use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::archive::DEFAULT_MAX_DOCUMENT_BYTES;
use crate::classify::ClassifierPolicy;
use crate::dart::client::DEFAULT_BASE_URL;
use crate::dart::{DartConfig, RetryPolicy};
use crate::normalize::decode::DecodePolicy;
use crate::normalize::sections::DEFAULT_BLOCKED_SECTIONS;
use crate::normalize::NormalizerConfig;
use crate::pipeline::PipelineOptions;

/// Optional settings file looked up in the working directory.
pub const CONFIG_FILE: &str = "dart_filings.toml";
pub const ENV_PREFIX: &str = "DART";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub api_key: String,
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub fetch_timeout_secs: u64,
    pub fetch_delay_ms: u64,
    pub concurrency: usize,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_document_bytes: u64,
    pub q1_first_month: u32,
    pub q1_last_month: u32,
    pub q3_first_month: u32,
    pub q3_last_month: u32,
    pub suppress_boilerplate: bool,
    pub blocked_sections: Vec<String>,
    pub strict_decoding: bool,
    pub output_dir: String,
}

impl Settings {
    /// Defaults, then `dart_filings.toml`, then `DART_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(CONFIG_FILE)
    }

    pub fn load_from(file: &str) -> Result<Self, ConfigError> {
        let settings: Settings = Config::builder()
            .set_default("api_key", "")?
            .set_default("base_url", DEFAULT_BASE_URL)?
            .set_default("request_timeout_secs", 10_i64)?
            .set_default("fetch_timeout_secs", 120_i64)?
            .set_default("fetch_delay_ms", 1000_i64)?
            .set_default("concurrency", 1_i64)?
            .set_default("max_retries", 3_i64)?
            .set_default("base_backoff_ms", 2000_i64)?
            .set_default("max_document_bytes", DEFAULT_MAX_DOCUMENT_BYTES as i64)?
            .set_default("q1_first_month", 4_i64)?
            .set_default("q1_last_month", 6_i64)?
            .set_default("q3_first_month", 9_i64)?
            .set_default("q3_last_month", 12_i64)?
            .set_default("suppress_boilerplate", true)?
            .set_default("blocked_sections", DEFAULT_BLOCKED_SECTIONS.to_vec())?
            .set_default("strict_decoding", false)?
            .set_default("output_dir", "output")?
            .add_source(File::with_name(file).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("blocked_sections"),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let months = [
            ("q1", self.q1_first_month, self.q1_last_month),
            ("q3", self.q3_first_month, self.q3_last_month),
        ];
        for (name, first, last) in months {
            if !(1..=12).contains(&first) || !(1..=12).contains(&last) || first > last {
                return Err(ConfigError::Message(format!(
                    "{} month window {}..={} is not within 1..=12",
                    name, first, last
                )));
            }
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Message("concurrency must be at least 1".into()));
        }
        Ok(())
    }

    pub fn classifier_policy(&self) -> ClassifierPolicy {
        ClassifierPolicy {
            q1_months: self.q1_first_month..=self.q1_last_month,
            q3_months: self.q3_first_month..=self.q3_last_month,
        }
    }

    pub fn normalizer_config(&self) -> NormalizerConfig {
        NormalizerConfig {
            decode_policy: if self.strict_decoding {
                DecodePolicy::Strict
            } else {
                DecodePolicy::Substitute
            },
            suppress_boilerplate: self.suppress_boilerplate,
            blocked_sections: self.blocked_sections.clone(),
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            classifier: self.classifier_policy(),
            normalizer: self.normalizer_config(),
            concurrency: self.concurrency,
            fetch_delay: Duration::from_millis(self.fetch_delay_ms),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            max_document_bytes: self.max_document_bytes,
            show_progress: true,
        }
    }

    pub fn dart_config(&self) -> DartConfig {
        DartConfig {
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            retry: RetryPolicy {
                max_retries: self.max_retries,
                base_backoff: Duration::from_millis(self.base_backoff_ms),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        let s = Settings::load_from(missing.to_str().unwrap()).unwrap();

        assert_eq!(s.base_url, DEFAULT_BASE_URL);
        assert_eq!(s.fetch_delay_ms, 1000);
        assert_eq!(s.concurrency, 1);
        assert_eq!(s.max_retries, 3);
        assert_eq!(s.max_document_bytes, DEFAULT_MAX_DOCUMENT_BYTES);
        assert_eq!(s.classifier_policy(), ClassifierPolicy::default());
        assert_eq!(s.normalizer_config(), NormalizerConfig::default());
        assert_eq!(s.output_dir, "output");

        let opts = s.pipeline_options();
        assert_eq!(opts.fetch_delay, Duration::from_secs(1));
        assert_eq!(opts.fetch_timeout, Duration::from_secs(120));
        assert_eq!(s.dart_config().retry, RetryPolicy::default());
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "fetch_delay_ms = 250\nconcurrency = 4\nq1_first_month = 3\nstrict_decoding = true\n\
             blocked_sections = [\"상세표\"]\noutput_dir = \"filings\"\n",
        )
        .unwrap();

        let s = Settings::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(s.fetch_delay_ms, 250);
        assert_eq!(s.concurrency, 4);
        assert_eq!(s.classifier_policy().q1_months, 3..=6);
        assert_eq!(s.normalizer_config().decode_policy, DecodePolicy::Strict);
        assert_eq!(s.normalizer_config().blocked_sections, vec!["상세표".to_string()]);
        assert_eq!(s.output_dir, "filings");
    }

    #[test]
    fn rejects_bad_month_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "q3_first_month = 11\nq3_last_month = 2\n").unwrap();
        assert!(Settings::load_from(path.to_str().unwrap()).is_err());
    }
}
