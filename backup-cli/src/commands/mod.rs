mod job;
mod logs;
mod restore;
mod serve;
mod stats;
mod target;

use anyhow::Result;
use backup_core::config::AppConfig;
use chrono::{DateTime, Local, Utc};
use serde::Serialize;

use crate::cli::Commands;
use crate::service::BackupService;

// Target commands
pub use target::handle_target_command;

// Job commands
pub use job::handle_job_command;

// Log commands
pub use logs::handle_logs_command;

// Restore commands
pub use restore::handle_restore_command;

// Scheduler daemon
pub use serve::run_serve;

// Dashboard
pub use stats::run_stats;

/// 命令执行上下文
pub struct CommandContext<'a> {
    /// 本地存储或运行中的调度服务
    pub service: &'a dyn BackupService,
    pub config: &'a AppConfig,
    /// 以 JSON 输出结果
    pub json: bool,
}

/// 运行管理命令
pub async fn run_command(ctx: &CommandContext<'_>, command: Commands) -> Result<()> {
    match command {
        // 已经在 main.rs 中处理
        Commands::Init { .. } | Commands::Serve => Ok(()),
        Commands::Target(cmd) => handle_target_command(ctx, cmd).await,
        Commands::Job(cmd) => handle_job_command(ctx, cmd).await,
        Commands::Logs(cmd) => handle_logs_command(ctx, cmd).await,
        Commands::Restore(cmd) => handle_restore_command(ctx, cmd).await,
        Commands::Stats => run_stats(ctx).await,
    }
}

/// 以 JSON 输出到标准输出，供脚本使用
pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// 以本地时区显示时间
pub(crate) fn format_time(time: DateTime<Utc>) -> String {
    time.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

pub(crate) fn format_optional_time(time: Option<DateTime<Utc>>) -> String {
    time.map(format_time).unwrap_or_else(|| "-".to_string())
}

/// 人类可读的文件大小
pub(crate) fn format_size(bytes: i64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}
