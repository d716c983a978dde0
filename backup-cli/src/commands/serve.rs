use anyhow::{Context, Result};
use backup_core::driver::missing_programs;
use backup_core::models::EngineKind;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, instrument, warn};

use crate::api;
use crate::app::CliApp;

/// 启动调度器与控制接口，直到收到 Ctrl-C
///
/// 启动顺序：标记上次遗留的 running 记录 → 检查外部命令 → 安装所有启用任务的触发器 → 监听控制接口。
#[instrument(skip(app))]
pub async fn run_serve(app: Arc<CliApp>) -> Result<()> {
    info!("🚀 启动备份调度服务");

    if app.config.recovery.fail_interrupted_runs {
        app.history
            .fail_interrupted_runs()
            .await
            .context("清理中断的执行记录失败")?;
    }

    warn_missing_tools(&app).await?;

    let installed = app.scheduler.initialize().await?;
    for job_id in app.scheduler.scheduled_job_ids() {
        if let Some(next) = app.scheduler.next_fire(&job_id) {
            info!("   ⏰ {} 下次执行: {}", job_id, next.format("%Y-%m-%d %H:%M:%S"));
        }
    }

    let addr = app.config.server_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("无法监听控制接口 {addr}"))?;
    info!("🌐 控制接口: http://{}", listener.local_addr()?);
    info!("✅ 调度服务已启动，{} 个任务在调度中，按 Ctrl-C 退出", installed);

    let served = axum::serve(listener, api::router(app.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("控制接口异常退出");

    info!("⏹️  正在停止调度器...");
    app.scheduler.shutdown().await;
    served
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("收到退出信号"),
        Err(e) => error!("无法监听退出信号: {}", e),
    }
}

/// 已保存目标所需的外部命令缺失时给出警告
async fn warn_missing_tools(app: &CliApp) -> Result<()> {
    let mut engines: Vec<EngineKind> = Vec::new();
    for target in app.targets.list().await? {
        if !engines.contains(&target.engine) {
            engines.push(target.engine);
        }
    }

    for engine in engines {
        let missing = missing_programs(engine);
        if !missing.is_empty() {
            warn!(
                "⚠️  未找到 {} 所需的命令: {}，相关任务的备份/恢复会失败",
                engine,
                missing.join(", ")
            );
        }
    }
    Ok(())
}
