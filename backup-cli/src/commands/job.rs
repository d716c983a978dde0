use anyhow::Result;
use backup_core::backup::BackupRunOutcome;
use backup_core::models::{JobUpdate, NewJob, RecurringJob};
use std::path::PathBuf;
use tracing::{error, info, warn};

use super::{CommandContext, format_size, format_time, print_json};
use crate::cli::JobCommand;
use crate::service::JobEntry;

/// 运行备份任务相关命令
pub async fn handle_job_command(ctx: &CommandContext<'_>, cmd: JobCommand) -> Result<()> {
    match cmd {
        JobCommand::Add {
            target,
            schedule,
            storage_path,
            no_compression,
            disabled,
        } => {
            let storage_path = storage_path.unwrap_or_else(|| ctx.config.get_default_storage_dir());
            let input = NewJob {
                target_id: target,
                schedule,
                backup_kind: Default::default(),
                storage_kind: Default::default(),
                storage_path: path_string(storage_path),
                compression: !no_compression,
                enabled: !disabled,
            };
            let job = ctx.service.create_job(input).await?;
            if ctx.json {
                return print_json(&job);
            }
            info!("✅ 已创建备份任务: {}", job.id);
            show_job(&job);
            Ok(())
        }
        JobCommand::List { target } => list_jobs(ctx, target.as_deref()).await,
        JobCommand::Show { id } => {
            let entry = ctx.service.get_job(&id).await?;
            if ctx.json {
                return print_json(&entry);
            }
            show_job(&entry.view.job);
            if let Some(name) = &entry.view.target_name {
                info!("   目标名称: {}", name);
            }
            if let Some(next) = entry.next_run {
                info!("   下次执行: {}", next.format("%Y-%m-%d %H:%M:%S"));
            }
            Ok(())
        }
        JobCommand::Update {
            id,
            target,
            schedule,
            storage_path,
            compression,
            enabled,
        } => {
            let update = JobUpdate {
                target_id: target,
                schedule,
                storage_path: storage_path.map(path_string),
                compression,
                enabled,
            };
            let job = ctx.service.update_job(&id, update).await?;
            if ctx.json {
                return print_json(&job);
            }
            info!("✅ 已更新备份任务: {}", job.id);
            show_job(&job);
            Ok(())
        }
        JobCommand::Delete { id } => {
            ctx.service.delete_job(&id).await?;
            info!("🗑️  已删除备份任务: {}（历史日志保留）", id);
            Ok(())
        }
        JobCommand::Run { id } => run_job(ctx, &id).await,
    }
}

async fn list_jobs(ctx: &CommandContext<'_>, target: Option<&str>) -> Result<()> {
    let entries: Vec<JobEntry> = ctx.service.list_jobs(target).await?;

    if ctx.json {
        return print_json(&entries);
    }

    if entries.is_empty() {
        info!("📋 暂无备份任务");
        info!("💡 使用 'backup-cli job add --target <目标ID>' 创建");
        return Ok(());
    }

    info!("📋 备份任务列表 ({} 个):", entries.len());
    for entry in &entries {
        let job = &entry.view.job;
        info!(
            "   {}  {:<14} {:<8} {} -> {}  {}",
            job.id,
            entry.view.target_name.as_deref().unwrap_or("(目标已删除)"),
            if job.enabled { "启用" } else { "禁用" },
            job.schedule,
            job.storage_path,
            entry
                .next_run
                .map(|t| format!("下次: {}", t.format("%Y-%m-%d %H:%M")))
                .unwrap_or_default()
        );
    }
    Ok(())
}

fn show_job(job: &RecurringJob) {
    info!("📋 备份任务: {}", job.id);
    info!("   目标: {}", job.target_id);
    info!("   计划: {}", job.schedule);
    info!("   存储目录: {}", job.storage_path);
    info!("   压缩: {}", if job.compression { "是" } else { "否" });
    info!("   状态: {}", if job.enabled { "启用" } else { "禁用" });
    info!("   创建时间: {}", format_time(job.created_at));
}

async fn run_job(ctx: &CommandContext<'_>, id: &str) -> Result<()> {
    info!("🔄 开始执行备份任务 {}", id);
    let outcome = ctx.service.run_job(id).await?;

    if ctx.json {
        print_json(&outcome)?;
    }

    match outcome {
        BackupRunOutcome::Succeeded(log) => {
            info!(
                "✅ 备份成功: {} ({})",
                log.file_path.as_deref().unwrap_or("-"),
                format_size(log.file_size.unwrap_or_default())
            );
            Ok(())
        }
        BackupRunOutcome::Failed(log) => {
            let message = log.message.unwrap_or_default();
            error!("❌ 备份失败: {}", message);
            anyhow::bail!("备份失败 (日志 {}): {}", log.id, message)
        }
        BackupRunOutcome::Skipped { running_log_id } => {
            warn!("⚠️  任务已有执行中的备份 {}，本次未执行", running_log_id);
            Ok(())
        }
    }
}

/// 存储目录由服务进程使用，相对路径先按当前目录解析
fn path_string(path: PathBuf) -> String {
    std::path::absolute(&path)
        .unwrap_or(path)
        .to_string_lossy()
        .to_string()
}
