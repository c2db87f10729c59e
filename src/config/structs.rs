use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use crate::errors::Result;

/// 配置文件默认路径
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// 环境变量前缀，分隔符为 `__`，例如 `TU__STORAGE__DATABASE_URL`
pub const ENV_PREFIX: &str = "TU";

/// 持久化后端选择
///
/// 反序列化走 strum 解析，大小写不敏感，`TU__STORAGE__BACKEND=File` 也能识别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumString, AsRefStr)]
#[serde(rename_all = "lowercase", try_from = "String")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum KeeperKind {
    /// database_url 非空用数据库，否则 file_path 非空用文件，否则纯内存
    #[default]
    Auto,
    Memory,
    File,
    Database,
}

impl TryFrom<String> for KeeperKind {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse().map_err(|_| {
            format!(
                "未知的存储后端: {}，可选值: auto, memory, file, database",
                value
            )
        })
    }
}

/// 静态配置（从 TOML 加载，启动时使用）
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StaticConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl StaticConfig {
    /// 从默认路径的 TOML 文件和环境变量加载配置
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// 从指定 TOML 文件（可不存在）和环境变量加载配置
    pub fn load_from(path: &str) -> Result<Self> {
        use config::{Config, Environment, File};

        let settings = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config = settings.try_deserialize::<StaticConfig>()?;
        Ok(config)
    }

    /// 生成示例 TOML 配置文件
    pub fn generate_sample_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|e| format!("Error generating sample config: {}", e))
    }
}

/// 持久化配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: KeeperKind,
    #[serde(default)]
    pub file_path: String,
    /// 为空时使用 `<file_path>.users`
    #[serde(default)]
    pub users_file_path: String,
    #[serde(default)]
    pub database_url: String,
    #[serde(default = "default_database_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_database_timeout")]
    pub timeout: u64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

impl StorageConfig {
    /// 解析 `auto`，得到实际使用的后端
    pub fn resolved_backend(&self) -> KeeperKind {
        match self.backend {
            KeeperKind::Auto if !self.database_url.is_empty() => KeeperKind::Database,
            KeeperKind::Auto if !self.file_path.is_empty() => KeeperKind::File,
            KeeperKind::Auto => KeeperKind::Memory,
            other => other,
        }
    }

    pub fn users_file(&self) -> String {
        if self.users_file_path.is_empty() {
            format!("{}.users", self.file_path)
        } else {
            self.users_file_path.clone()
        }
    }
}

/// 删除任务后台 worker 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// 累积的短码数达到该值时立即刷盘，不等定时器
    #[serde(default = "default_max_pending_before_flush")]
    pub max_pending_before_flush: usize,
    #[serde(default = "default_flush_on_stop")]
    pub flush_on_stop: bool,
}

impl WorkerConfig {
    pub fn flush_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.flush_interval_secs.max(1))
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default = "default_max_backups")]
    pub max_backups: u32,
    #[serde(default = "default_enable_rotation")]
    pub enable_rotation: bool,
}

// ============================================================
// Default value functions
// ============================================================

fn default_database_pool_size() -> u32 {
    10
}

fn default_database_timeout() -> u64 {
    8
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    100
}

fn default_retry_max_delay_ms() -> u64 {
    2000
}

fn default_flush_interval_secs() -> u64 {
    10
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_max_pending_before_flush() -> usize {
    1000
}

fn default_flush_on_stop() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_max_backups() -> u32 {
    5
}

fn default_enable_rotation() -> bool {
    true
}

// ============================================================
// Default implementations
// ============================================================

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: KeeperKind::default(),
            file_path: String::new(),
            users_file_path: String::new(),
            database_url: String::new(),
            pool_size: default_database_pool_size(),
            timeout: default_database_timeout(),
            retry_count: default_retry_count(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: default_flush_interval_secs(),
            queue_capacity: default_queue_capacity(),
            max_pending_before_flush: default_max_pending_before_flush(),
            flush_on_stop: default_flush_on_stop(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
            max_backups: default_max_backups(),
            enable_rotation: default_enable_rotation(),
        }
    }
}
