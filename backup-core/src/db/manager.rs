use crate::constants::store::CHANNEL_CAPACITY;
use crate::{BackupError, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use tokio::sync::{mpsc, oneshot};

use super::actor::DuckDbActor;
use super::messages::DbMessage;
use super::models::{
    BackupLogListRow, BackupLogRow, JobListRow, JobRow, LogAdmission, LogCompletion,
    LogCountFilter, RestoreLogListRow, RestoreLogRow, TargetRow,
};

/// DuckDB数据库管理器
#[derive(Debug, Clone)]
pub struct DuckDbManager {
    sender: mpsc::Sender<DbMessage>,
}

impl DuckDbManager {
    /// 创建新的DuckDB管理器
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        // 确保数据库文件的父目录存在
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let actor = DuckDbActor::new(db_path)?;
        Self::start(actor).await
    }

    /// 创建内存数据库管理器
    pub async fn new_memory() -> Result<Self> {
        let actor = DuckDbActor::new_memory()?;
        Self::start(actor).await
    }

    async fn start(actor: DuckDbActor) -> Result<Self> {
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(actor.run(receiver));

        let manager = Self { sender };
        manager
            .request(|respond_to| DbMessage::InitTables { respond_to })
            .await?;

        Ok(manager)
    }

    /// 发送消息并等待 Actor 回复
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> DbMessage,
    ) -> Result<T> {
        let (respond_to, receiver) = oneshot::channel();

        self.sender
            .send(build(respond_to))
            .await
            .map_err(|_| BackupError::StoreClosed)?;

        receiver.await.map_err(|_| BackupError::StoreClosed)?
    }

    // ========== 备份目标 ==========

    pub async fn insert_target(&self, row: TargetRow) -> Result<()> {
        self.request(|respond_to| DbMessage::InsertTarget { row, respond_to })
            .await
    }

    pub async fn list_targets(&self) -> Result<Vec<TargetRow>> {
        self.request(|respond_to| DbMessage::ListTargets { respond_to })
            .await
    }

    pub async fn get_target(&self, id: &str) -> Result<Option<TargetRow>> {
        let id = id.to_string();
        self.request(|respond_to| DbMessage::GetTarget { id, respond_to })
            .await
    }

    pub async fn update_target(&self, row: TargetRow) -> Result<bool> {
        self.request(|respond_to| DbMessage::UpdateTarget { row, respond_to })
            .await
    }

    pub async fn delete_target(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.request(|respond_to| DbMessage::DeleteTarget { id, respond_to })
            .await
    }

    pub async fn count_targets(&self) -> Result<i64> {
        self.request(|respond_to| DbMessage::CountTargets { respond_to })
            .await
    }

    // ========== 备份任务 ==========

    pub async fn insert_job(&self, row: JobRow) -> Result<()> {
        self.request(|respond_to| DbMessage::InsertJob { row, respond_to })
            .await
    }

    pub async fn list_jobs(&self, target_id: Option<&str>) -> Result<Vec<JobListRow>> {
        let target_id = target_id.map(str::to_string);
        self.request(|respond_to| DbMessage::ListJobs {
            target_id,
            respond_to,
        })
        .await
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<JobRow>> {
        let id = id.to_string();
        self.request(|respond_to| DbMessage::GetJob { id, respond_to })
            .await
    }

    pub async fn list_enabled_jobs(&self) -> Result<Vec<JobRow>> {
        self.request(|respond_to| DbMessage::ListEnabledJobs { respond_to })
            .await
    }

    pub async fn update_job(&self, row: JobRow) -> Result<bool> {
        self.request(|respond_to| DbMessage::UpdateJob { row, respond_to })
            .await
    }

    pub async fn delete_job(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.request(|respond_to| DbMessage::DeleteJob { id, respond_to })
            .await
    }

    pub async fn count_jobs(&self, enabled_only: bool) -> Result<i64> {
        self.request(|respond_to| DbMessage::CountJobs {
            enabled_only,
            respond_to,
        })
        .await
    }

    pub async fn count_jobs_by_target(&self, target_id: &str) -> Result<i64> {
        let target_id = target_id.to_string();
        self.request(|respond_to| DbMessage::CountJobsByTarget {
            target_id,
            respond_to,
        })
        .await
    }

    // ========== 备份日志 ==========

    pub async fn start_backup_log(&self, row: BackupLogRow) -> Result<LogAdmission> {
        self.request(|respond_to| DbMessage::StartBackupLog { row, respond_to })
            .await
    }

    pub async fn insert_backup_log(&self, row: BackupLogRow) -> Result<()> {
        self.request(|respond_to| DbMessage::InsertBackupLog { row, respond_to })
            .await
    }

    pub async fn finish_backup_log(&self, id: &str, completion: LogCompletion) -> Result<bool> {
        let id = id.to_string();
        self.request(|respond_to| DbMessage::FinishBackupLog {
            id,
            completion,
            respond_to,
        })
        .await
    }

    pub async fn count_backup_logs(&self, filter: LogCountFilter) -> Result<i64> {
        self.request(|respond_to| DbMessage::CountBackupLogs { filter, respond_to })
            .await
    }

    pub async fn sum_artifact_size(&self) -> Result<i64> {
        self.request(|respond_to| DbMessage::SumArtifactSize { respond_to })
            .await
    }

    pub async fn recent_backup_logs(&self, limit: usize) -> Result<Vec<BackupLogListRow>> {
        self.request(|respond_to| DbMessage::RecentBackupLogs { limit, respond_to })
            .await
    }

    pub async fn get_backup_log(&self, id: &str) -> Result<Option<BackupLogListRow>> {
        let id = id.to_string();
        self.request(|respond_to| DbMessage::GetBackupLog { id, respond_to })
            .await
    }

    pub async fn list_backup_logs(&self, job_id: Option<&str>) -> Result<Vec<BackupLogListRow>> {
        let job_id = job_id.map(str::to_string);
        self.request(|respond_to| DbMessage::ListBackupLogs { job_id, respond_to })
            .await
    }

    pub async fn count_running_by_job(&self, job_id: &str) -> Result<i64> {
        let job_id = job_id.to_string();
        self.request(|respond_to| DbMessage::CountRunningByJob { job_id, respond_to })
            .await
    }

    // ========== 恢复日志 ==========

    pub async fn insert_restore_log(&self, row: RestoreLogRow) -> Result<()> {
        self.request(|respond_to| DbMessage::InsertRestoreLog { row, respond_to })
            .await
    }

    pub async fn finish_restore_log(&self, id: &str, completion: LogCompletion) -> Result<bool> {
        let id = id.to_string();
        self.request(|respond_to| DbMessage::FinishRestoreLog {
            id,
            completion,
            respond_to,
        })
        .await
    }

    pub async fn get_restore_log(&self, id: &str) -> Result<Option<RestoreLogRow>> {
        let id = id.to_string();
        self.request(|respond_to| DbMessage::GetRestoreLog { id, respond_to })
            .await
    }

    pub async fn list_restore_logs(&self) -> Result<Vec<RestoreLogListRow>> {
        self.request(|respond_to| DbMessage::ListRestoreLogs { respond_to })
            .await
    }

    pub async fn fail_interrupted_logs(
        &self,
        end_time: DateTime<Utc>,
        message: &str,
    ) -> Result<(usize, usize)> {
        let message = message.to_string();
        self.request(|respond_to| DbMessage::FailInterruptedLogs {
            end_time,
            message,
            respond_to,
        })
        .await
    }
}
