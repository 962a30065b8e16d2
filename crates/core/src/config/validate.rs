use super::{types::Config, ConfigError};

/// Checks values that deserialization alone cannot rule out.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.num_workers == 0 {
        return Err(ConfigError::invalid("num_workers", "must be at least 1"));
    }

    if config.shards.is_empty() {
        return Err(ConfigError::invalid(
            "shards",
            "at least one shard path must be configured",
        ));
    }

    let encoding = &config.encoding;
    for (field, value) in [
        ("encoding.audio_codec", &encoding.audio_codec),
        ("encoding.audio_format", &encoding.audio_format),
        ("encoding.video_codec", &encoding.video_codec),
        ("encoding.video_format", &encoding.video_format),
    ] {
        if value.trim().is_empty() {
            return Err(ConfigError::invalid(field, "cannot be empty"));
        }
    }
    if encoding.audio_sample_rate == 0 {
        return Err(ConfigError::invalid("encoding.audio_sample_rate", "must be positive"));
    }
    if encoding.audio_channels == 0 {
        return Err(ConfigError::invalid("encoding.audio_channels", "must be positive"));
    }

    let retry = &config.retry;
    if retry.initial_delay_ms > retry.max_delay_ms {
        return Err(ConfigError::invalid(
            "retry.initial_delay_ms",
            format!(
                "{} exceeds retry.max_delay_ms ({})",
                retry.initial_delay_ms, retry.max_delay_ms
            ),
        ));
    }
    if retry.multiplier.is_nan() || retry.multiplier < 1.0 {
        return Err(ConfigError::invalid("retry.multiplier", "must be >= 1.0"));
    }

    if config.extractor.timeout_secs == 0 {
        return Err(ConfigError::invalid("extractor.timeout_secs", "must be positive"));
    }
    if config.extractor.range_tolerance_secs.is_nan() || config.extractor.range_tolerance_secs < 0.0
    {
        return Err(ConfigError::invalid(
            "extractor.range_tolerance_secs",
            "must be >= 0.0",
        ));
    }
    if config.fetcher.timeout_secs == 0 {
        return Err(ConfigError::invalid("fetcher.timeout_secs", "must be positive"));
    }
    if !config.fetcher.page_url_template.contains("{id}") {
        return Err(ConfigError::invalid(
            "fetcher.page_url_template",
            "must contain {id}",
        ));
    }

    if config.max_terminal_failures == Some(0) {
        return Err(ConfigError::invalid(
            "max_terminal_failures",
            "must be at least 1 when set",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    fn base() -> Config {
        load_config_from_str(
            r#"
output_root_dir = "/tmp/out"
[shards]
eval = ["eval.csv"]
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&base()).is_ok());
    }

    #[test]
    fn test_validate_zero_workers_fails() {
        let mut config = base();
        config.num_workers = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Invalid {
                field: "num_workers",
                ..
            })
        ));
    }

    #[test]
    fn test_validate_no_shards_fails() {
        let mut config = base();
        config.shards.eval.clear();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_empty_codec_fails() {
        let mut config = base();
        config.encoding.video_codec = " ".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("encoding.video_codec"));
    }

    #[test]
    fn test_validate_retry_delays() {
        let mut config = base();
        config.retry.initial_delay_ms = 10_000;
        config.retry.max_delay_ms = 1_000;
        assert!(validate_config(&config).is_err());

        let mut config = base();
        config.retry.multiplier = 0.5;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_retries_allowed() {
        let mut config = base();
        config.num_retries = 0;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_negative_range_tolerance_fails() {
        let mut config = base();
        assert_eq!(config.extractor.range_tolerance_secs, 0.0);
        config.extractor.range_tolerance_secs = -0.5;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_failure_limit_fails() {
        let mut config = base();
        config.max_terminal_failures = Some(0);
        assert!(validate_config(&config).is_err());

        config.max_terminal_failures = Some(5);
        assert!(validate_config(&config).is_ok());
    }
}
