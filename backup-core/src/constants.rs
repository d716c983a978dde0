/// 本地存储相关常量
pub mod store {
    use std::path::{Path, PathBuf};

    /// 数据目录名
    pub const DATA_DIR_NAME: &str = "data";

    /// DuckDB 数据库文件名
    pub const DB_FILE_NAME: &str = "backup_manager.duckdb";

    /// Actor 消息通道容量
    pub const CHANNEL_CAPACITY: usize = 100;

    /// 获取默认的数据库文件路径（跨平台）
    pub fn get_default_db_path() -> PathBuf {
        Path::new(".").join(DATA_DIR_NAME).join(DB_FILE_NAME)
    }
}

/// 备份相关常量
pub mod backup {
    use std::path::{Path, PathBuf};

    /// 备份目录名
    pub const BACKUP_DIR_NAME: &str = "backups";

    /// SQL 转储文件扩展名（不含点）
    pub const SQL_EXTENSION: &str = "sql";

    /// 压缩包扩展名（不含点）
    pub const ARCHIVE_EXTENSION: &str = "zip";

    /// 解压临时文件后缀
    pub const TEMP_SQL_SUFFIX: &str = "-temp.sql";

    /// ZIP 压缩级别（最高）
    pub const ZIP_COMPRESSION_LEVEL: i64 = 9;

    /// 备份成功时写入日志的固定消息
    pub const SUCCESS_MESSAGE: &str = "备份成功完成";

    /// 恢复成功时写入日志的固定消息
    pub const RESTORE_SUCCESS_MESSAGE: &str = "恢复成功完成";

    /// 获取默认备份存储目录（用于配置）
    pub fn get_default_storage_dir() -> PathBuf {
        Path::new(".").join(BACKUP_DIR_NAME)
    }
}

/// 外部命令相关常量
pub mod runner {
    /// stderr 诊断缓冲区默认上限（字节）
    pub const DEFAULT_STDERR_LIMIT: usize = 64 * 1024;

    /// 流式拷贝缓冲区大小
    pub const COPY_BUFFER_SIZE: usize = 8 * 1024;
}

/// 连通性检测相关常量
pub mod connectivity {
    /// 默认连接/查询超时（秒）
    pub const DEFAULT_TIMEOUT_SECS: u64 = 5;
}

/// 执行日志相关常量
pub mod logs {
    /// 日志消息最大字符数
    pub const MAX_MESSAGE_CHARS: usize = 2000;

    /// 仪表盘默认展示的最近记录数
    pub const DEFAULT_RECENT_LIMIT: usize = 5;

    /// 统计“今日”时使用的时间窗口（小时）
    pub const RECENT_WINDOW_HOURS: i64 = 24;

    /// 进程重启后遗留的 running 记录统一写入的消息
    pub const INTERRUPTED_MESSAGE: &str = "执行被进程重启中断";

    /// 截断日志消息，保证不超过上限（按字符计）
    pub fn truncate_message(message: &str) -> String {
        if message.chars().count() <= MAX_MESSAGE_CHARS {
            return message.to_string();
        }
        let mut truncated: String = message.chars().take(MAX_MESSAGE_CHARS - 3).collect();
        truncated.push_str("...");
        truncated
    }
}

/// Cron任务相关常量
pub mod cron {
    /// 默认自动备份cron表达式（每天凌晨2点）
    pub const DEFAULT_BACKUP_CRON: &str = "0 2 * * *";

    /// Cron表达式字段数量
    pub const CRON_FIELDS_COUNT: usize = 5;

    /// 计算下次触发时间时最多向前搜索的天数（覆盖闰年 2 月 29 日）
    pub const MAX_LOOKAHEAD_DAYS: i64 = 8 * 366;
}

/// 调度服务控制接口相关常量
pub mod api {
    /// 默认监听主机（仅本机）
    pub const DEFAULT_HOST: &str = "127.0.0.1";

    /// 默认监听端口
    pub const DEFAULT_PORT: u16 = 7420;

    /// 检测服务是否在运行时的连接超时（毫秒）
    pub const DETECT_TIMEOUT_MS: u64 = 500;

    /// API 端点路径
    pub mod endpoints {
        /// 健康检查（无需令牌）
        pub const HEALTH: &str = "/api/health";

        pub const TARGETS: &str = "/api/targets";
        pub const TARGET: &str = "/api/targets/{id}";
        pub const TARGET_TEST: &str = "/api/targets/{id}/test";
        /// 检测未保存的连接参数
        pub const CONNECTION_TEST: &str = "/api/connection-test";

        pub const JOBS: &str = "/api/jobs";
        pub const JOB: &str = "/api/jobs/{id}";
        pub const JOB_RUN: &str = "/api/jobs/{id}/run";

        pub const BACKUP_LOGS: &str = "/api/backup-logs";
        pub const BACKUP_LOG: &str = "/api/backup-logs/{id}";

        pub const RESTORES: &str = "/api/restores";

        pub const STATS: &str = "/api/stats";
    }
}

/// 应用配置相关常量
pub mod config {
    /// 配置文件名
    pub const CONFIG_FILE_NAME: &str = "config.toml";

    /// 按优先级查找的配置文件名
    pub const CONFIG_FILE_CANDIDATES: [&str; 3] =
        ["config.toml", "backup-manager.toml", ".backup-manager.toml"];

    /// 凭据加密密钥环境变量
    pub const ENCRYPTION_KEY_ENV: &str = "CREDENTIAL_ENCRYPTION_KEY";

    /// 日志文件路径环境变量
    pub const LOG_FILE_ENV: &str = "BACKUP_LOG_FILE";
}

#[cfg(test)]
mod tests {
    use super::logs::{MAX_MESSAGE_CHARS, truncate_message};

    #[test]
    fn test_truncate_short_message() {
        assert_eq!(truncate_message("ok"), "ok");
    }

    #[test]
    fn test_truncate_multibyte_message() {
        let long = "错".repeat(MAX_MESSAGE_CHARS + 10);
        let truncated = truncate_message(&long);
        assert_eq!(truncated.chars().count(), MAX_MESSAGE_CHARS);
        assert!(truncated.ends_with("..."));
    }
}
