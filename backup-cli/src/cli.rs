use backup_core::constants::cron::DEFAULT_BACKUP_CRON;
use backup_core::models::EngineKind;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// 备份目标相关命令
#[derive(Subcommand, Debug)]
pub enum TargetCommand {
    /// 添加备份目标数据库
    Add {
        /// 显示名称
        #[arg(long)]
        name: String,
        /// 数据库类型：postgres / mysql
        #[arg(long)]
        engine: EngineKind,
        #[arg(long, default_value = "localhost")]
        host: String,
        /// 端口（默认按数据库类型选择）
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        username: String,
        /// 密码，也可以通过环境变量提供以避免出现在 shell 历史中
        #[arg(long, env = "BACKUP_TARGET_PASSWORD", hide_env_values = true)]
        password: String,
        /// 数据库名
        #[arg(long = "database")]
        database_name: String,
    },
    /// 列出所有备份目标
    List,
    /// 显示备份目标详情
    Show { id: String },
    /// 修改备份目标，未提供的字段保持不变
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        engine: Option<EngineKind>,
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        username: Option<String>,
        /// 新密码，不提供则保留原密码
        #[arg(long)]
        password: Option<String>,
        #[arg(long = "database")]
        database_name: Option<String>,
    },
    /// 删除备份目标（仍被任务引用时拒绝）
    Delete { id: String },
    /// 检测已保存目标的连通性
    Test { id: String },
    /// 保存前检测一组连接参数的连通性
    Check {
        #[arg(long)]
        engine: EngineKind,
        #[arg(long, default_value = "localhost")]
        host: String,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        username: String,
        #[arg(long, env = "BACKUP_TARGET_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long = "database")]
        database_name: String,
    },
}

/// 备份任务相关命令
#[derive(Subcommand, Debug)]
pub enum JobCommand {
    /// 创建定时备份任务
    Add {
        /// 目标数据库 ID
        #[arg(long)]
        target: String,
        /// cron 表达式，例如 "0 2 * * *" 表示每天凌晨2点
        #[arg(long, default_value = DEFAULT_BACKUP_CRON)]
        schedule: String,
        /// 备份存储目录（默认使用配置中的 default_storage_dir）
        #[arg(long)]
        storage_path: Option<PathBuf>,
        /// 不压缩，直接保留 .sql 文件
        #[arg(long)]
        no_compression: bool,
        /// 创建后不启用
        #[arg(long)]
        disabled: bool,
    },
    /// 列出备份任务
    List {
        /// 只显示该目标的任务
        #[arg(long)]
        target: Option<String>,
    },
    /// 显示任务详情
    Show { id: String },
    /// 修改任务，未提供的字段保持不变
    Update {
        id: String,
        #[arg(long)]
        target: Option<String>,
        #[arg(long)]
        schedule: Option<String>,
        #[arg(long)]
        storage_path: Option<PathBuf>,
        #[arg(long, help = "true 压缩，false 不压缩")]
        compression: Option<bool>,
        #[arg(long, help = "true 启用，false 禁用")]
        enabled: Option<bool>,
    },
    /// 删除任务（历史日志保留）
    Delete { id: String },
    /// 立即执行一次备份
    Run { id: String },
}

/// 备份日志相关命令
#[derive(Subcommand, Debug)]
pub enum LogsCommand {
    /// 列出备份日志（最新在前）
    List {
        /// 只显示该任务的日志
        #[arg(long)]
        job: Option<String>,
    },
    /// 显示备份日志详情
    Show { id: String },
}

/// 恢复相关命令
#[derive(Subcommand, Debug)]
pub enum RestoreCommand {
    /// 用一次成功备份覆盖目标数据库
    Run {
        /// 备份日志 ID
        backup_log_id: String,
        /// 目标数据库 ID
        target_id: String,
    },
    /// 列出恢复记录
    List,
}

/// 数据库定时备份与恢复工具
#[derive(Parser)]
#[command(name = "backup-cli")]
#[command(about = "PostgreSQL / MySQL 定时备份与恢复工具")]
#[command(version)]
pub struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: PathBuf,

    /// 详细输出
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// 以 JSON 格式输出结果
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 首次使用时初始化，创建配置文件、数据库和备份目录
    Init {
        /// 如果配置文件已存在，强制覆盖
        #[arg(long)]
        force: bool,
    },
    /// 启动调度器与本机控制接口，按计划执行备份直到收到 Ctrl-C
    ///
    /// 服务运行期间，其他管理命令会自动通过控制接口交给服务执行。
    Serve,
    /// 备份目标管理
    #[command(subcommand)]
    Target(TargetCommand),
    /// 备份任务管理
    #[command(subcommand)]
    Job(JobCommand),
    /// 备份日志
    #[command(subcommand)]
    Logs(LogsCommand),
    /// 恢复
    #[command(subcommand)]
    Restore(RestoreCommand),
    /// 显示备份统计
    Stats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_job_add_defaults() {
        let cli = Cli::parse_from(["backup-cli", "job", "add", "--target", "t1"]);
        let Commands::Job(JobCommand::Add {
            target,
            schedule,
            storage_path,
            no_compression,
            disabled,
        }) = cli.command
        else {
            panic!("expected job add");
        };
        assert_eq!(target, "t1");
        assert_eq!(schedule, DEFAULT_BACKUP_CRON);
        assert!(storage_path.is_none());
        assert!(!no_compression);
        assert!(!disabled);
    }

    #[test]
    fn test_parse_target_add_engine() {
        let cli = Cli::parse_from([
            "backup-cli",
            "--json",
            "target",
            "add",
            "--name",
            "shop",
            "--engine",
            "postgresql",
            "--username",
            "backup",
            "--password",
            "s3cret",
            "--database",
            "shop",
        ]);
        assert!(cli.json);
        let Commands::Target(TargetCommand::Add { engine, port, host, .. }) = cli.command else {
            panic!("expected target add");
        };
        assert_eq!(engine, EngineKind::Postgres);
        assert_eq!(port, None);
        assert_eq!(host, "localhost");
    }

    #[test]
    fn test_unknown_engine_is_rejected() {
        let result = Cli::try_parse_from([
            "backup-cli",
            "target",
            "update",
            "t1",
            "--engine",
            "oracle",
        ]);
        assert!(result.is_err());
    }
}
