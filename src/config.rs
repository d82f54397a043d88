//! Channel configuration provider.
//!
//! Mirrors the original `channel_config.py::Config` class: a small,
//! re-read-on-every-call view over a JSON document mapping channel name to
//! cadence and freshness threshold. No in-process caching is attempted —
//! operators who edit the file expect the next scheduling decision to see
//! it, and the document is small enough that re-parsing it is cheap.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::Deserialize;
use tracing::{error, info};

fn default_days_old() -> i64 {
    -1
}

/// One channel's entry in the configuration file.
#[derive(Clone, Debug, Deserialize)]
pub struct ChannelEntry {
    /// Target interval between successful refreshes, in seconds.
    /// Missing or non-positive disables the channel.
    #[serde(default)]
    pub cadence: i64,

    /// Age in days below which a package is considered recent.
    /// Absent means -1, which the feed renderer treats as "no filter".
    #[serde(default = "default_days_old")]
    pub days_old: i64,
}

#[derive(Clone, Debug, Deserialize, Default)]
struct ChannelsFile {
    #[serde(default)]
    channels: HashMap<String, ChannelEntry>,
}

/// Supplies, per channel name, the cadence and freshness threshold read
/// from a JSON configuration file, plus the fixed upstream base URL and
/// local root directory for the lifetime of the process.
pub struct ConfigProvider {
    path: PathBuf,
    upstream_url: String,
    local_root: PathBuf,
    // Last successfully parsed snapshot. A parse failure logs and falls
    // back to this rather than propagating, matching `Config.use_file`'s
    // validate-once-at-startup, best-effort-thereafter behavior.
    last_good: RwLock<HashMap<String, ChannelEntry>>,
}

impl ConfigProvider {
    /// Validate that `path` parses as a channel configuration document,
    /// then create a provider rooted at it. Returns an error if the initial
    /// parse fails, matching `Config.use_file`'s upfront validation.
    pub fn load(
        path: impl Into<PathBuf>,
        upstream_url: impl Into<String>,
        local_root: impl Into<PathBuf>,
    ) -> crate::error::Result<Self> {
        let path = path.into();
        let provider = Self {
            path,
            upstream_url: upstream_url.into(),
            local_root: local_root.into(),
            last_good: RwLock::new(HashMap::new()),
        };
        let initial = provider.read_file()?;
        info!(path = %provider.path.display(), channels = initial.len(), "using channel configuration");
        *provider.last_good.write().expect("config lock poisoned") = initial;
        Ok(provider)
    }

    fn read_file(&self) -> crate::error::Result<HashMap<String, ChannelEntry>> {
        let contents = std::fs::read_to_string(&self.path)?;
        let parsed: ChannelsFile =
            serde_json::from_str(&contents).map_err(|e| crate::error::Error::Config {
                message: format!("failed to parse {}: {e}", self.path.display()),
            })?;
        Ok(parsed.channels)
    }

    /// Current channel map. Re-reads the file from disk on every call; on
    /// parse failure, logs at error level and returns the last known-good
    /// snapshot instead of propagating.
    pub fn channels(&self) -> HashMap<String, ChannelEntry> {
        match self.read_file() {
            Ok(channels) => {
                *self.last_good.write().expect("config lock poisoned") = channels.clone();
                channels
            }
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "failed to parse config, keeping prior snapshot");
                self.last_good
                    .read()
                    .expect("config lock poisoned")
                    .clone()
            }
        }
    }

    /// Cadence for a channel in seconds. `None` if the channel is absent
    /// from the configuration (the scheduler treats this the same as
    /// non-positive: disabled).
    pub fn cadence(&self, channel: &str) -> Option<i64> {
        self.channels().get(channel).map(|c| c.cadence)
    }

    /// Freshness threshold in days for a channel; -1 if the channel is
    /// absent or the field was never set.
    pub fn freshness_threshold_days(&self, channel: &str) -> i64 {
        self.channels()
            .get(channel)
            .map(|c| c.days_old)
            .unwrap_or(-1)
    }

    /// Base URL of the upstream origin, e.g. `https://conda-static.anaconda.org`.
    pub fn upstream_url(&self) -> &str {
        &self.upstream_url
    }

    /// Local root folder under which each channel gets its own subdirectory.
    pub fn local_root(&self) -> &Path {
        &self.local_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("channels.json");
        let mut f = std::fs::File::create(&path).expect("create config");
        f.write_all(contents.as_bytes()).expect("write config");
        (dir, path)
    }

    #[test]
    fn reads_cadence_and_freshness() {
        let (_dir, path) =
            write_config(r#"{"channels": {"bioconda": {"cadence": 300, "days_old": 18}}}"#);
        let cfg = ConfigProvider::load(path, "https://example.org", "/tmp/mirror").unwrap();
        assert_eq!(cfg.cadence("bioconda"), Some(300));
        assert_eq!(cfg.freshness_threshold_days("bioconda"), 18);
    }

    #[test]
    fn missing_channel_has_no_cadence() {
        let (_dir, path) = write_config(r#"{"channels": {}}"#);
        let cfg = ConfigProvider::load(path, "https://example.org", "/tmp/mirror").unwrap();
        assert_eq!(cfg.cadence("anaconda"), None);
        assert_eq!(cfg.freshness_threshold_days("anaconda"), -1);
    }

    #[test]
    fn missing_days_old_defaults_to_negative_one() {
        let (_dir, path) = write_config(r#"{"channels": {"foo": {"cadence": 60}}}"#);
        let cfg = ConfigProvider::load(path, "https://example.org", "/tmp/mirror").unwrap();
        assert_eq!(cfg.freshness_threshold_days("foo"), -1);
    }

    #[test]
    fn non_positive_cadence_is_disabled_by_convention() {
        let (_dir, path) = write_config(r#"{"channels": {"foo": {"cadence": 0}}}"#);
        let cfg = ConfigProvider::load(path, "https://example.org", "/tmp/mirror").unwrap();
        assert_eq!(cfg.cadence("foo"), Some(0));
    }

    #[test]
    fn initial_parse_failure_is_an_error() {
        let (_dir, path) = write_config("not json");
        assert!(ConfigProvider::load(path, "https://example.org", "/tmp/mirror").is_err());
    }

    #[test]
    fn reload_picks_up_changes_on_disk() {
        let (_dir, path) = write_config(r#"{"channels": {"foo": {"cadence": 60}}}"#);
        let cfg = ConfigProvider::load(&path, "https://example.org", "/tmp/mirror").unwrap();
        assert_eq!(cfg.cadence("foo"), Some(60));

        std::fs::write(&path, r#"{"channels": {"foo": {"cadence": 120}}}"#).unwrap();
        assert_eq!(cfg.cadence("foo"), Some(120));
    }

    #[test]
    fn subsequent_parse_failure_keeps_last_good_snapshot() {
        let (_dir, path) = write_config(r#"{"channels": {"foo": {"cadence": 60}}}"#);
        let cfg = ConfigProvider::load(&path, "https://example.org", "/tmp/mirror").unwrap();

        std::fs::write(&path, "corrupted").unwrap();
        assert_eq!(cfg.cadence("foo"), Some(60));
    }
}
