use crate::{BackupError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 数据库引擎类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Postgres,
    Mysql,
    /// 预留，尚未实现
    Sqlite,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Postgres => "postgres",
            EngineKind::Mysql => "mysql",
            EngineKind::Sqlite => "sqlite",
        }
    }

    /// 引擎的默认端口，SQLite 没有网络端口
    pub fn default_port(&self) -> Option<u16> {
        match self {
            EngineKind::Postgres => Some(5432),
            EngineKind::Mysql => Some(3306),
            EngineKind::Sqlite => None,
        }
    }
}

impl FromStr for EngineKind {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(EngineKind::Postgres),
            "mysql" => Ok(EngineKind::Mysql),
            "sqlite" => Ok(EngineKind::Sqlite),
            other => Err(BackupError::unsupported_engine(other)),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 备份类型（目前仅支持全量）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    #[default]
    Full,
}

impl BackupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupKind::Full => "full",
        }
    }
}

impl FromStr for BackupKind {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(BackupKind::Full),
            other => Err(BackupError::invalid_input(format!("未知的备份类型: {other}"))),
        }
    }
}

/// 存储类型（目前仅支持本地文件系统）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Local,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Local => "local",
        }
    }
}

impl FromStr for StorageKind {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(StorageKind::Local),
            other => Err(BackupError::invalid_input(format!("未知的存储类型: {other}"))),
        }
    }
}

/// 执行状态：pending → running → success | failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Pending => "pending",
            LogStatus::Running => "running",
            LogStatus::Success => "success",
            LogStatus::Failed => "failed",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, LogStatus::Success | LogStatus::Failed)
    }
}

impl FromStr for LogStatus {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(LogStatus::Pending),
            "running" => Ok(LogStatus::Running),
            "success" => Ok(LogStatus::Success),
            "failed" => Ok(LogStatus::Failed),
            other => Err(BackupError::invalid_input(format!("未知的执行状态: {other}"))),
        }
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ========== 数据库配置（备份目标） ==========

/// 备份目标数据库（不含密码，可安全展示）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseTarget {
    pub id: String,
    pub name: String,
    pub engine: EngineKind,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub database_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 带加密密码的目标配置，仅供执行引擎内部使用
#[derive(Debug, Clone)]
pub struct TargetWithSecret {
    pub target: DatabaseTarget,
    pub encrypted_secret: String,
}

/// 连接参数（创建目标、连通性检测时使用，包含明文密码）
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionParams {
    pub engine: EngineKind,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database_name: String,
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("database_name", &self.database_name)
            .finish()
    }
}

/// 新建目标
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTarget {
    pub name: String,
    #[serde(flatten)]
    pub connection: ConnectionParams,
}

/// 目标的部分更新，`password` 为 `None` 时保留原密文
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct TargetUpdate {
    pub name: Option<String>,
    pub engine: Option<EngineKind>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database_name: Option<String>,
}

impl fmt::Debug for TargetUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetUpdate")
            .field("name", &self.name)
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database_name", &self.database_name)
            .finish()
    }
}

// ========== 备份任务 ==========

/// 定时备份任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringJob {
    pub id: String,
    pub target_id: String,
    pub schedule: String,
    pub backup_kind: BackupKind,
    pub storage_kind: StorageKind,
    pub storage_path: String,
    pub compression: bool,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 任务列表展示（附带目标名称与类型）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: RecurringJob,
    pub target_name: Option<String>,
    pub target_engine: Option<EngineKind>,
}

/// 新建任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub target_id: String,
    pub schedule: String,
    #[serde(default)]
    pub backup_kind: BackupKind,
    #[serde(default)]
    pub storage_kind: StorageKind,
    pub storage_path: String,
    #[serde(default = "default_true")]
    pub compression: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// 任务的部分更新
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobUpdate {
    pub target_id: Option<String>,
    pub schedule: Option<String>,
    pub storage_path: Option<String>,
    pub compression: Option<bool>,
    pub enabled: Option<bool>,
}

// ========== 执行日志 ==========

/// 备份执行日志
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub id: String,
    /// 任务被删除后置空，日志本身保留
    pub job_id: Option<String>,
    pub status: LogStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub file_path: Option<String>,
    pub file_size: Option<i64>,
    pub message: Option<String>,
}

/// 日志展示（附带任务对应的目标信息）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupLogView {
    #[serde(flatten)]
    pub log: ExecutionLog,
    pub target_name: Option<String>,
    pub target_engine: Option<EngineKind>,
}

/// 恢复执行日志
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreLog {
    pub id: String,
    /// 被覆盖的目标数据库
    pub target_id: String,
    /// 提供备份文件的源日志
    pub backup_log_id: String,
    pub status: LogStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

/// 恢复日志展示（附带目标与源备份链路）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreLogView {
    #[serde(flatten)]
    pub log: RestoreLog,
    pub target_name: Option<String>,
    pub target_engine: Option<EngineKind>,
    pub source_started_at: Option<DateTime<Utc>>,
    pub source_target_name: Option<String>,
}

/// 执行日志的终态更新
#[derive(Debug, Clone)]
pub enum LogOutcome {
    Success {
        file_path: String,
        file_size: i64,
        message: String,
    },
    Failed {
        message: String,
    },
}

impl LogOutcome {
    pub fn status(&self) -> LogStatus {
        match self {
            LogOutcome::Success { .. } => LogStatus::Success,
            LogOutcome::Failed { .. } => LogStatus::Failed,
        }
    }
}
