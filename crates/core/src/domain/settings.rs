use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://raasr.xfyun.cn/api";

/// 環境変数の接頭辞。`SUBTITLER_APP_ID`、ネストは `SUBTITLER_POLL__MAX_ATTEMPTS` のように `__` で区切る。
pub const ENV_PREFIX: &str = "SUBTITLER";

/// 設定読み込みエラー
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("Failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
}

// ─── Credentials ─────────────────────────────────────────────────

/// アカウント認証情報。署名計算にのみ使い、送信はしない。
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub app_id: String,
    secret_key: String,
}

impl Credentials {
    pub fn new(app_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            secret_key: secret_key.into(),
        }
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("app_id", &self.app_id)
            .field("secret_key", &"***")
            .finish()
    }
}

// ─── Settings ────────────────────────────────────────────────────

/// ポーリング設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    /// 最大試行回数
    pub max_attempts: u32,
    /// 試行間隔 (ミリ秒)
    pub interval_ms: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            max_attempts: 100,
            interval_ms: 1000,
        }
    }
}

/// ジョブレジストリ設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// エントリの有効期限 (秒)
    pub ttl_secs: u64,
    /// リーパーの実行間隔 (ミリ秒)
    pub reap_interval_ms: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            reap_interval_ms: 1000,
        }
    }
}

impl RegistrySettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }
}

/// アプリケーション設定。起動時に一度だけ読み込み、以後は不変。
#[derive(Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub poll: PollSettings,
    #[serde(default)]
    pub registry: RegistrySettings,
    /// prepare に毎回付与する固定パラメータ
    #[serde(default)]
    pub prepare_params: BTreeMap<String, String>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            secret_key: String::new(),
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            poll: PollSettings::default(),
            registry: RegistrySettings::default(),
            prepare_params: BTreeMap::new(),
        }
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("app_id", &self.app_id)
            .field("secret_key", &"***")
            .field("base_url", &self.base_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("poll", &self.poll)
            .field("registry", &self.registry)
            .field("prepare_params", &self.prepare_params)
            .finish()
    }
}

impl Settings {
    /// 環境変数のみから設定を構築する。
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::load(None)
    }

    /// JSON ファイルを読み込み、環境変数で上書きする。
    pub fn from_json_file(path: &Path) -> Result<Self, SettingsError> {
        Self::load(Some(path))
    }

    fn load(file: Option<&Path>) -> Result<Self, SettingsError> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Json));
        }

        let settings: Settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        match file {
            Some(path) => log::debug!("Loaded settings from {:?}", path),
            None => log::debug!("Loaded settings from environment"),
        }
        Ok(settings)
    }

    /// 必須項目と値域を検証する。
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.app_id.trim().is_empty() {
            return Err(SettingsError::Missing("app_id"));
        }
        if self.secret_key.trim().is_empty() {
            return Err(SettingsError::Missing("secret_key"));
        }
        if self.base_url.trim().is_empty() {
            return Err(SettingsError::Missing("base_url"));
        }
        if self.poll.max_attempts == 0 {
            return Err(SettingsError::Invalid {
                field: "poll.max_attempts",
                reason: "must be at least 1".into(),
            });
        }
        if self.registry.reap_interval_ms == 0 {
            return Err(SettingsError::Invalid {
                field: "registry.reap_interval_ms",
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.app_id.clone(), self.secret_key.clone())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
