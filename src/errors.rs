use std::fmt;

#[derive(Debug, Clone)]
pub enum TinyurlError {
    NotFound(String),
    Conflict(String),
    CredentialMismatch(String),
    Validation(String),
    DatabaseConfig(String),
    DatabaseConnection(String),
    DatabaseOperation(String),
    FileOperation(String),
    Serialization(String),
    Config(String),
    WorkerUnavailable(String),
}

impl TinyurlError {
    /// 获取错误代码
    pub fn code(&self) -> &'static str {
        match self {
            TinyurlError::NotFound(_) => "E001",
            TinyurlError::Conflict(_) => "E002",
            TinyurlError::CredentialMismatch(_) => "E003",
            TinyurlError::Validation(_) => "E004",
            TinyurlError::DatabaseConfig(_) => "E005",
            TinyurlError::DatabaseConnection(_) => "E006",
            TinyurlError::DatabaseOperation(_) => "E007",
            TinyurlError::FileOperation(_) => "E008",
            TinyurlError::Serialization(_) => "E009",
            TinyurlError::Config(_) => "E010",
            TinyurlError::WorkerUnavailable(_) => "E011",
        }
    }

    /// 获取错误类型名称
    pub fn error_type(&self) -> &'static str {
        match self {
            TinyurlError::NotFound(_) => "Resource Not Found",
            TinyurlError::Conflict(_) => "Resource Already Exists",
            TinyurlError::CredentialMismatch(_) => "Credential Mismatch",
            TinyurlError::Validation(_) => "Validation Error",
            TinyurlError::DatabaseConfig(_) => "Database Configuration Error",
            TinyurlError::DatabaseConnection(_) => "Database Connection Error",
            TinyurlError::DatabaseOperation(_) => "Database Operation Error",
            TinyurlError::FileOperation(_) => "File Operation Error",
            TinyurlError::Serialization(_) => "Serialization Error",
            TinyurlError::Config(_) => "Configuration Error",
            TinyurlError::WorkerUnavailable(_) => "Worker Unavailable",
        }
    }

    /// 获取错误详情
    pub fn message(&self) -> &str {
        match self {
            TinyurlError::NotFound(msg)
            | TinyurlError::Conflict(msg)
            | TinyurlError::CredentialMismatch(msg)
            | TinyurlError::Validation(msg)
            | TinyurlError::DatabaseConfig(msg)
            | TinyurlError::DatabaseConnection(msg)
            | TinyurlError::DatabaseOperation(msg)
            | TinyurlError::FileOperation(msg)
            | TinyurlError::Serialization(msg)
            | TinyurlError::Config(msg)
            | TinyurlError::WorkerUnavailable(msg) => msg,
        }
    }

    /// 持久化层故障（后端不可达或拒绝写入）
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            TinyurlError::DatabaseConnection(_)
                | TinyurlError::DatabaseOperation(_)
                | TinyurlError::FileOperation(_)
                | TinyurlError::Serialization(_)
        )
    }

    /// 格式化为彩色输出（用于启动失败时打印到终端）
    pub fn format_colored(&self) -> String {
        use colored::Colorize;
        format!(
            "{} {} {}\n  {}",
            "[ERROR]".red().bold(),
            self.code().yellow(),
            self.error_type().red(),
            self.message().white()
        )
    }

    /// 格式化为简洁输出
    pub fn format_simple(&self) -> String {
        format!("{}: {}", self.error_type(), self.message())
    }
}

impl fmt::Display for TinyurlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_simple())
    }
}

impl std::error::Error for TinyurlError {}

// 便捷的构造函数
impl TinyurlError {
    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        TinyurlError::NotFound(msg.into())
    }

    pub fn conflict<T: Into<String>>(msg: T) -> Self {
        TinyurlError::Conflict(msg.into())
    }

    pub fn credential_mismatch<T: Into<String>>(msg: T) -> Self {
        TinyurlError::CredentialMismatch(msg.into())
    }

    pub fn validation<T: Into<String>>(msg: T) -> Self {
        TinyurlError::Validation(msg.into())
    }

    pub fn database_config<T: Into<String>>(msg: T) -> Self {
        TinyurlError::DatabaseConfig(msg.into())
    }

    pub fn database_connection<T: Into<String>>(msg: T) -> Self {
        TinyurlError::DatabaseConnection(msg.into())
    }

    pub fn database_operation<T: Into<String>>(msg: T) -> Self {
        TinyurlError::DatabaseOperation(msg.into())
    }

    pub fn file_operation<T: Into<String>>(msg: T) -> Self {
        TinyurlError::FileOperation(msg.into())
    }

    pub fn serialization<T: Into<String>>(msg: T) -> Self {
        TinyurlError::Serialization(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        TinyurlError::Config(msg.into())
    }

    pub fn worker_unavailable<T: Into<String>>(msg: T) -> Self {
        TinyurlError::WorkerUnavailable(msg.into())
    }
}

impl From<sea_orm::DbErr> for TinyurlError {
    fn from(err: sea_orm::DbErr) -> Self {
        TinyurlError::DatabaseOperation(err.to_string())
    }
}

impl From<std::io::Error> for TinyurlError {
    fn from(err: std::io::Error) -> Self {
        TinyurlError::FileOperation(err.to_string())
    }
}

impl From<serde_json::Error> for TinyurlError {
    fn from(err: serde_json::Error) -> Self {
        TinyurlError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for TinyurlError {
    fn from(err: config::ConfigError) -> Self {
        TinyurlError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TinyurlError>;
