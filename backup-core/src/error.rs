use thiserror::Error;

pub type Result<T> = std::result::Result<T, BackupError>;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("配置错误: {0}")]
    Config(#[from] toml::de::Error),

    #[error("配置文件未找到: {0}")]
    ConfigNotFound(String),

    #[error("缺少加密密钥环境变量 {0}")]
    MissingEncryptionKey(&'static str),

    #[error("DuckDB数据库错误: {0}")]
    DuckDb(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("任务执行错误: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("ZIP 文件错误: {0}")]
    Zip(#[from] zip::result::ZipError),

    // ========== 准入错误：不创建/修改任何日志记录 ==========
    #[error("备份任务不存在: {0}")]
    JobNotFound(String),

    #[error("备份任务已禁用: {0}")]
    JobDisabled(String),

    #[error("数据库配置不存在: {0}")]
    TargetNotFound(String),

    #[error("备份记录不存在: {0}")]
    BackupLogNotFound(String),

    #[error("源备份不可用于恢复: {0}")]
    RestoreNotEligible(String),

    #[error("无效的 cron 表达式 '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error("数据库配置仍被 {jobs} 个备份任务引用，无法删除")]
    TargetInUse { jobs: i64 },

    #[error("参数无效: {0}")]
    InvalidInput(String),

    // ========== 前置条件错误 ==========
    #[error("备份文件不存在: {0}")]
    ArtifactMissing(String),

    #[error("不支持的数据库类型: {0}")]
    UnsupportedEngine(String),

    // ========== 执行错误 ==========
    #[error("无法启动命令 {program}: {cause}")]
    SpawnFailed { program: String, cause: String },

    #[error("命令 {program} 执行失败 (退出码 {exit_code:?}): {stderr}")]
    ProcessFailed {
        program: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("密文格式无效")]
    MalformedCiphertext,

    #[error("无法解密数据")]
    DecryptionFailed,

    #[error("无法加密数据")]
    EncryptionFailed,

    #[error("压缩包损坏: {0}")]
    CorruptArchive(String),

    #[error("压缩包中没有 .sql 文件")]
    NoSqlEntryFound,

    #[error("连接失败: {0}")]
    ConnectionFailed(String),

    #[error("数据库Actor已关闭")]
    StoreClosed,
}

// 为DuckDB错误实现From trait
impl From<duckdb::Error> for BackupError {
    fn from(err: duckdb::Error) -> Self {
        BackupError::DuckDb(err.to_string())
    }
}

impl BackupError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn unsupported_engine(engine: impl Into<String>) -> Self {
        Self::UnsupportedEngine(engine.into())
    }

    pub fn corrupt_archive(msg: impl Into<String>) -> Self {
        Self::CorruptArchive(msg.into())
    }

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    /// 准入类错误：调用方应按“未找到/参数无效”处理，且不会留下任何日志记录
    pub fn is_admission(&self) -> bool {
        matches!(
            self,
            Self::JobNotFound(_)
                | Self::JobDisabled(_)
                | Self::TargetNotFound(_)
                | Self::BackupLogNotFound(_)
                | Self::RestoreNotEligible(_)
                | Self::InvalidSchedule { .. }
                | Self::TargetInUse { .. }
                | Self::InvalidInput(_)
        )
    }

    /// 截断后的错误描述，用于写入执行日志
    pub fn log_message(&self) -> String {
        crate::constants::logs::truncate_message(&self.to_string())
    }
}
