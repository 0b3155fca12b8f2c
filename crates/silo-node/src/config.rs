//! Configuration loading
//!
//! The structure itself lives in silo-core so every crate sees the same
//! defaults; this module adds TOML file loading for deployments.

use std::path::Path;

use silo_core::SiloConfig;

/// Load configuration from a TOML file. Missing sections fall back to
/// their defaults.
pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<SiloConfig> {
    let raw = std::fs::read_to_string(path.as_ref())?;
    let config: SiloConfig = toml::from_str(&raw)?;
    anyhow::ensure!(
        config.segments.segment_size > 0,
        "segment_size must be positive"
    );
    anyhow::ensure!(
        config.segments.redundancy_level <= 5,
        "redundancy_level is bounded at 5"
    );
    anyhow::ensure!(
        config.queue.low_water < config.queue.high_water,
        "queue low water must sit below high water"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let file = write_config(
            r#"
[storage]
data_dir = "/var/lib/silo"

[segments]
segment_size = 768000
redundancy_level = 2
"#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.storage.data_dir, "/var/lib/silo");
        assert_eq!(config.segments.redundancy_level, 2);
        // untouched sections keep contract defaults
        assert_eq!(config.pool.max_connections, 60);
        assert_eq!(config.retry.upload_retries_max, 5);
    }

    #[test]
    fn test_rejects_zero_segment_size() {
        let file = write_config(
            r#"
[segments]
segment_size = 0
redundancy_level = 0
"#,
        );
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_rejects_excessive_redundancy() {
        let file = write_config(
            r#"
[segments]
segment_size = 768000
redundancy_level = 9
"#,
        );
        assert!(load_config(file.path()).is_err());
    }
}
