use anyhow::Result;
use backup_core::models::{BackupLogView, LogStatus};
use tracing::info;

use super::{CommandContext, format_optional_time, format_size, format_time, print_json};
use crate::cli::LogsCommand;

/// 运行备份日志相关命令
pub async fn handle_logs_command(ctx: &CommandContext<'_>, cmd: LogsCommand) -> Result<()> {
    match cmd {
        LogsCommand::List { job } => {
            let logs = ctx.service.list_backup_logs(job.as_deref()).await?;
            if ctx.json {
                return print_json(&logs);
            }
            if logs.is_empty() {
                info!("📋 暂无备份记录");
                return Ok(());
            }
            info!("📋 备份记录 ({} 条):", logs.len());
            for view in &logs {
                print_log_line(view);
            }
            Ok(())
        }
        LogsCommand::Show { id } => {
            let view = ctx.service.get_backup_log(&id).await?;
            if ctx.json {
                return print_json(&view);
            }
            show_log(&view);
            Ok(())
        }
    }
}

pub(crate) fn status_icon(status: LogStatus) -> &'static str {
    match status {
        LogStatus::Success => "✅",
        LogStatus::Failed => "❌",
        LogStatus::Running => "⏳",
        LogStatus::Pending => "🕐",
    }
}

pub(crate) fn print_log_line(view: &BackupLogView) {
    let log = &view.log;
    info!(
        "   {} {}  {}  {:<14} {:>10}  {}",
        status_icon(log.status),
        log.id,
        format_time(log.start_time),
        view.target_name.as_deref().unwrap_or("-"),
        log.file_size.map(format_size).unwrap_or_else(|| "-".to_string()),
        log.file_path.as_deref().unwrap_or("")
    );
}

fn show_log(view: &BackupLogView) {
    let log = &view.log;
    info!("📋 备份记录: {}", log.id);
    info!("   状态: {} {}", status_icon(log.status), log.status);
    info!("   任务: {}", log.job_id.as_deref().unwrap_or("(已删除)"));
    if let (Some(name), Some(engine)) = (&view.target_name, view.target_engine) {
        info!("   目标: {} ({})", name, engine);
    }
    info!("   开始时间: {}", format_time(log.start_time));
    info!("   结束时间: {}", format_optional_time(log.end_time));
    if let Some(path) = &log.file_path {
        info!("   文件: {}", path);
    }
    if let Some(size) = log.file_size {
        info!("   大小: {}", format_size(size));
    }
    if let Some(message) = &log.message {
        info!("   消息: {}", message);
    }
}
