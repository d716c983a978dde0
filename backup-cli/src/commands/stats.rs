use anyhow::Result;
use tracing::info;

use super::logs::print_log_line;
use super::{CommandContext, format_size, print_json};

/// 显示仪表盘统计
pub async fn run_stats(ctx: &CommandContext<'_>) -> Result<()> {
    let stats = ctx.service.dashboard_stats().await?;
    if ctx.json {
        return print_json(&stats);
    }

    info!("📊 备份统计");
    info!("===============");
    info!("   备份目标: {}", stats.total_targets);
    info!("   备份任务: {}（启用 {}）", stats.total_jobs, stats.enabled_jobs);
    info!(
        "   备份总数: {}（成功 {}，失败 {}）",
        stats.total_backups, stats.successful_backups, stats.failed_backups
    );
    info!(
        "   最近 24 小时: 成功 {}，失败 {}",
        stats.successful_last_24h, stats.failed_last_24h
    );
    info!("   备份文件总大小: {}", format_size(stats.total_artifact_bytes));

    if !stats.recent_logs.is_empty() {
        info!("📋 最近的备份:");
        for view in &stats.recent_logs {
            print_log_line(view);
        }
    }
    Ok(())
}
