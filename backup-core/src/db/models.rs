use chrono::{DateTime, Utc};

/// 备份目标行
#[derive(Debug, Clone)]
pub struct TargetRow {
    pub id: String,
    pub name: String,
    pub engine: String,
    pub host: String,
    pub port: i32,
    pub username: String,
    pub encrypted_secret: String,
    pub database_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 备份任务行
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub target_id: String,
    pub schedule: String,
    pub backup_kind: String,
    pub storage_kind: String,
    pub storage_path: String,
    pub compression: bool,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 任务行 + 目标名称/类型
#[derive(Debug, Clone)]
pub struct JobListRow {
    pub job: JobRow,
    pub target_name: Option<String>,
    pub target_engine: Option<String>,
}

/// 备份日志行
#[derive(Debug, Clone)]
pub struct BackupLogRow {
    pub id: String,
    pub job_id: Option<String>,
    pub status: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub file_path: Option<String>,
    pub file_size: Option<i64>,
    pub message: Option<String>,
}

/// 备份日志行 + 目标名称/类型
#[derive(Debug, Clone)]
pub struct BackupLogListRow {
    pub log: BackupLogRow,
    pub target_name: Option<String>,
    pub target_engine: Option<String>,
}

/// 恢复日志行
#[derive(Debug, Clone)]
pub struct RestoreLogRow {
    pub id: String,
    pub target_id: String,
    pub backup_log_id: String,
    pub status: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

/// 恢复日志行 + 目标与源备份信息
#[derive(Debug, Clone)]
pub struct RestoreLogListRow {
    pub log: RestoreLogRow,
    pub target_name: Option<String>,
    pub target_engine: Option<String>,
    pub source_started_at: Option<DateTime<Utc>>,
    pub source_target_name: Option<String>,
}

/// 日志终态写入内容
#[derive(Debug, Clone)]
pub struct LogCompletion {
    pub status: String,
    pub end_time: DateTime<Utc>,
    pub file_path: Option<String>,
    pub file_size: Option<i64>,
    pub message: Option<String>,
}

/// 开始备份时的准入结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogAdmission {
    /// 已写入 running 记录
    Started,
    /// 该任务已有 running 记录，未写入新记录
    AlreadyRunning(String),
}

/// 备份日志计数条件
#[derive(Debug, Clone, Default)]
pub struct LogCountFilter {
    pub status: Option<String>,
    pub since: Option<DateTime<Utc>>,
}
