use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Loads the config file, then applies `AUDIOSETDL_` environment overrides.
///
/// `AUDIOSETDL_NUM_WORKERS=8` overrides `num_workers`;
/// `AUDIOSETDL_EXTRACTOR__TRANSCODER_PATH` overrides `extractor.transcoder_path`.
/// Relative shard paths are taken relative to the config file's directory.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.to_path_buf()));
    }

    let mut config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("AUDIOSETDL_").ignore(&["CONFIG"]).split("__"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    if let Some(base) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        resolve_shard_paths(&mut config, base);
    }

    Ok(config)
}

/// Parses a config from TOML text, no environment, no path resolution.
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))
}

fn resolve_shard_paths(config: &mut Config, base: &Path) {
    let shards = &mut config.shards;
    for list in [
        &mut shards.eval,
        &mut shards.balanced_train,
        &mut shards.unbalanced_train,
    ] {
        for path in list.iter_mut() {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_from_str_valid() {
        let toml = r#"
output_root_dir = "/tmp/out"
num_workers = 2

[shards]
eval = ["eval.csv"]
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.num_workers, 2);
        assert_eq!(config.num_retries, 3);
    }

    #[test]
    fn test_load_config_from_str_missing_output_root() {
        let result = load_config_from_str("num_workers = 2\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/audiosetdl.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_config_resolves_relative_shards() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audiosetdl.toml");
        std::fs::write(
            &path,
            r#"
output_root_dir = "/tmp/out"
video_mode = "videoaudio"

[shards]
unbalanced_train = ["shards/unbalanced_train_segments.csv.07", "/data/abs.csv"]
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.video_mode, crate::segment::VideoMode::VideoAudio);
        assert_eq!(
            config.shards.unbalanced_train,
            vec![
                dir.path().join("shards/unbalanced_train_segments.csv.07"),
                PathBuf::from("/data/abs.csv"),
            ]
        );
    }
}
