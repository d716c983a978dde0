use crate::constants::logs::{DEFAULT_RECENT_LIMIT, INTERRUPTED_MESSAGE, RECENT_WINDOW_HOURS};
use crate::database::{Database, now};
use crate::models::{BackupLogView, LogStatus, RestoreLogView};
use crate::{BackupError, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// 仪表盘统计
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_jobs: i64,
    pub enabled_jobs: i64,
    pub total_targets: i64,
    pub total_backups: i64,
    pub successful_backups: i64,
    pub failed_backups: i64,
    /// 最近 24 小时内开始的成功备份
    pub successful_last_24h: i64,
    pub failed_last_24h: i64,
    /// 成功备份文件的总字节数
    pub total_artifact_bytes: i64,
    pub recent_logs: Vec<BackupLogView>,
}

/// 执行历史查询
#[derive(Clone)]
pub struct HistoryManager {
    database: Database,
    recent_limit: usize,
}

impl HistoryManager {
    pub fn new(database: Database) -> Self {
        Self {
            database,
            recent_limit: DEFAULT_RECENT_LIMIT,
        }
    }

    pub fn with_recent_limit(mut self, recent_limit: usize) -> Self {
        self.recent_limit = recent_limit;
        self
    }

    /// 备份日志，按开始时间倒序，可按任务过滤
    pub async fn list_backup_logs(&self, job_id: Option<&str>) -> Result<Vec<BackupLogView>> {
        self.database.list_backup_logs(job_id).await
    }

    pub async fn get_backup_log(&self, id: &str) -> Result<BackupLogView> {
        self.database
            .get_backup_log(id)
            .await?
            .ok_or_else(|| BackupError::BackupLogNotFound(id.to_string()))
    }

    pub async fn list_restore_logs(&self) -> Result<Vec<RestoreLogView>> {
        self.database.list_restore_logs().await
    }

    pub async fn dashboard_stats(&self) -> Result<DashboardStats> {
        let db = &self.database;
        let since = now() - Duration::hours(RECENT_WINDOW_HOURS);

        Ok(DashboardStats {
            total_jobs: db.count_jobs(false).await?,
            enabled_jobs: db.count_jobs(true).await?,
            total_targets: db.count_targets().await?,
            total_backups: db.count_backup_logs(None, None).await?,
            successful_backups: db.count_backup_logs(Some(LogStatus::Success), None).await?,
            failed_backups: db.count_backup_logs(Some(LogStatus::Failed), None).await?,
            successful_last_24h: db
                .count_backup_logs(Some(LogStatus::Success), Some(since))
                .await?,
            failed_last_24h: db
                .count_backup_logs(Some(LogStatus::Failed), Some(since))
                .await?,
            total_artifact_bytes: db.sum_artifact_size().await?,
            recent_logs: db.recent_backup_logs(self.recent_limit).await?,
        })
    }

    /// 启动时把上次进程遗留的 running 记录标记为失败，返回（备份，恢复）条数
    pub async fn fail_interrupted_runs(&self) -> Result<(usize, usize)> {
        let (backups, restores) = self.database.fail_interrupted_logs(INTERRUPTED_MESSAGE).await?;
        if backups + restores > 0 {
            warn!(
                "发现 {} 条中断的备份记录、{} 条中断的恢复记录，已标记为失败",
                backups, restores
            );
        } else {
            info!("没有中断的执行记录");
        }
        Ok((backups, restores))
    }
}
