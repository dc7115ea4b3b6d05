use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use remotefs_core::paths;

const DEFAULT_USER: &str = "user";
const DEFAULT_OP_TIMEOUT_SECS: u64 = 120;

#[derive(Clone, Debug)]
pub struct MirrorConfig {
    /// Directory backing the loopback store.
    pub store_dir: PathBuf,
    /// Name of the remote root folder, mirrored as `/<user>`.
    pub user: String,
    pub op_timeout: Duration,
}

impl MirrorConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        let store_dir = std::env::var("REMOTEFS_STORE_DIR")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(default_store_dir);
        let user = non_empty_env("REMOTEFS_USER")
            .or_else(|| non_empty_env("USER"))
            .unwrap_or_else(|| DEFAULT_USER.to_string());
        let op_timeout = Duration::from_secs(read_u64_env(
            "REMOTEFS_OP_TIMEOUT_SECS",
            DEFAULT_OP_TIMEOUT_SECS,
        ));

        let config = Self {
            store_dir,
            user,
            op_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        paths::validate_name(&self.user)
            .with_context(|| format!("invalid remote user name {:?}", self.user))?;
        Ok(())
    }

    pub fn root_path(&self) -> String {
        paths::join("/", &self.user)
    }

    /// Local directory the remote root lives in.
    pub fn user_dir(&self) -> PathBuf {
        self.store_dir.join(&self.user)
    }
}

fn default_store_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("remotefs")
        .join("store")
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_tilde_to_home_store_dir() {
        let home = PathBuf::from("/home/alice");
        assert_eq!(
            expand_with_home("~/remote store", &home),
            PathBuf::from("/home/alice/remote store")
        );
        assert_eq!(expand_with_home("~", &home), home);
        assert_eq!(expand_with_home("/srv/store", &home), PathBuf::from("/srv/store"));
    }

    #[test]
    fn reads_timeout_from_env_or_default() {
        assert_eq!(read_u64_env("NO_SUCH_ENV_FOR_REMOTEFS_TEST", 42), 42);
    }

    #[test]
    fn root_path_is_the_user_folder() {
        let config = MirrorConfig {
            store_dir: PathBuf::from("/srv/store"),
            user: "alice".into(),
            op_timeout: Duration::from_secs(5),
        };
        assert_eq!(config.root_path(), "/alice");
        assert_eq!(config.user_dir(), PathBuf::from("/srv/store/alice"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_user_names_with_separators() {
        let config = MirrorConfig {
            store_dir: PathBuf::from("/srv/store"),
            user: "a/b".into(),
            op_timeout: Duration::from_secs(5),
        };
        assert!(config.validate().is_err());
    }
}
