use anyhow::Result;
use tracing::info;

use super::logs::status_icon;
use super::{CommandContext, format_optional_time, format_time, print_json};
use crate::cli::RestoreCommand;

/// 运行恢复相关命令
pub async fn handle_restore_command(ctx: &CommandContext<'_>, cmd: RestoreCommand) -> Result<()> {
    match cmd {
        RestoreCommand::Run {
            backup_log_id,
            target_id,
        } => {
            info!("🔄 开始恢复: 备份 {} -> 目标 {}", backup_log_id, target_id);
            let log = ctx.service.start_restore(&backup_log_id, &target_id).await?;
            if ctx.json {
                return print_json(&log);
            }
            info!("✅ 恢复完成: {}", log.id);
            Ok(())
        }
        RestoreCommand::List => {
            let logs = ctx.service.list_restore_logs().await?;
            if ctx.json {
                return print_json(&logs);
            }
            if logs.is_empty() {
                info!("📋 暂无恢复记录");
                return Ok(());
            }
            info!("📋 恢复记录 ({} 条):", logs.len());
            for view in &logs {
                let log = &view.log;
                info!(
                    "   {} {}  {}  -> {:<14} 源: {} @ {}  {}",
                    status_icon(log.status),
                    log.id,
                    format_time(log.start_time),
                    view.target_name.as_deref().unwrap_or("-"),
                    view.source_target_name.as_deref().unwrap_or("-"),
                    format_optional_time(view.source_started_at),
                    log.message.as_deref().unwrap_or("")
                );
            }
            Ok(())
        }
    }
}
