use crate::db::{
    BackupLogListRow, BackupLogRow, DuckDbManager, JobListRow, JobRow, LogAdmission,
    LogCompletion, LogCountFilter, RestoreLogListRow, RestoreLogRow, TargetRow,
};
use crate::models::{
    BackupLogView, DatabaseTarget, ExecutionLog, JobView, LogOutcome, LogStatus,
    RecurringJob, RestoreLog, RestoreLogView, TargetWithSecret,
};
use crate::{BackupError, Result};
use chrono::{DateTime, SubsecRound, Utc};
use std::path::Path;
use uuid::Uuid;

/// 存储层使用的当前时间（DuckDB TIMESTAMP 精度为微秒）
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// 生成新的记录 ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// 开始备份的结果
#[derive(Debug, Clone)]
pub enum BackupLogStart {
    /// 已创建 running 日志
    Started(ExecutionLog),
    /// 任务已在运行
    AlreadyRunning { log_id: String },
}

/// 数据库管理器 - DuckDB适配器
///
/// 把原始行转换为领域类型，并维护表之间的引用关系。
#[derive(Debug, Clone)]
pub struct Database {
    manager: DuckDbManager,
}

impl Database {
    /// 连接到数据库
    pub async fn connect<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let manager = DuckDbManager::new(db_path).await?;
        Ok(Database { manager })
    }

    /// 连接到内存数据库（主要用于测试）
    pub async fn connect_memory() -> Result<Self> {
        let manager = DuckDbManager::new_memory().await?;
        Ok(Database { manager })
    }

    // ========== 备份目标 ==========

    pub async fn create_target(&self, target: &DatabaseTarget, encrypted_secret: &str) -> Result<()> {
        self.manager
            .insert_target(target_row(target, encrypted_secret))
            .await
    }

    /// 列出全部目标（不含密码）
    pub async fn list_targets(&self) -> Result<Vec<DatabaseTarget>> {
        self.manager
            .list_targets()
            .await?
            .into_iter()
            .map(DatabaseTarget::try_from)
            .collect()
    }

    /// 获取目标（不含密码）
    pub async fn get_target(&self, id: &str) -> Result<Option<DatabaseTarget>> {
        self.manager
            .get_target(id)
            .await?
            .map(DatabaseTarget::try_from)
            .transpose()
    }

    /// 获取目标及其加密密码，仅供执行引擎与更新流程使用
    pub async fn get_target_with_secret(&self, id: &str) -> Result<Option<TargetWithSecret>> {
        self.manager
            .get_target(id)
            .await?
            .map(TargetWithSecret::try_from)
            .transpose()
    }

    pub async fn update_target(&self, target: &TargetWithSecret) -> Result<bool> {
        self.manager
            .update_target(target_row(&target.target, &target.encrypted_secret))
            .await
    }

    /// 删除目标，仍被任务引用时返回 `TargetInUse`
    pub async fn delete_target(&self, id: &str) -> Result<bool> {
        self.manager.delete_target(id).await
    }

    pub async fn count_targets(&self) -> Result<i64> {
        self.manager.count_targets().await
    }

    // ========== 备份任务 ==========

    pub async fn create_job(&self, job: &RecurringJob) -> Result<()> {
        self.manager.insert_job(job_row(job)).await
    }

    /// 列出任务，可按目标过滤
    pub async fn list_jobs(&self, target_id: Option<&str>) -> Result<Vec<JobView>> {
        self.manager
            .list_jobs(target_id)
            .await?
            .into_iter()
            .map(JobView::try_from)
            .collect()
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<RecurringJob>> {
        self.manager
            .get_job(id)
            .await?
            .map(RecurringJob::try_from)
            .transpose()
    }

    pub async fn list_enabled_jobs(&self) -> Result<Vec<RecurringJob>> {
        self.manager
            .list_enabled_jobs()
            .await?
            .into_iter()
            .map(RecurringJob::try_from)
            .collect()
    }

    pub async fn update_job(&self, job: &RecurringJob) -> Result<bool> {
        self.manager.update_job(job_row(job)).await
    }

    /// 删除任务，历史日志保留且 job_id 置空
    pub async fn delete_job(&self, id: &str) -> Result<bool> {
        self.manager.delete_job(id).await
    }

    pub async fn count_jobs(&self, enabled_only: bool) -> Result<i64> {
        self.manager.count_jobs(enabled_only).await
    }

    pub async fn count_jobs_by_target(&self, target_id: &str) -> Result<i64> {
        self.manager.count_jobs_by_target(target_id).await
    }

    // ========== 备份日志 ==========

    /// 为任务创建 running 日志；已有 running 日志时不创建
    pub async fn start_backup_log(&self, job_id: &str) -> Result<BackupLogStart> {
        let log = ExecutionLog {
            id: new_id(),
            job_id: Some(job_id.to_string()),
            status: LogStatus::Running,
            start_time: now(),
            end_time: None,
            file_path: None,
            file_size: None,
            message: None,
        };

        match self.manager.start_backup_log(backup_log_row(&log)).await? {
            LogAdmission::Started => Ok(BackupLogStart::Started(log)),
            LogAdmission::AlreadyRunning(log_id) => Ok(BackupLogStart::AlreadyRunning { log_id }),
        }
    }

    /// 直接写入一条日志（导入或测试数据）
    pub async fn create_backup_log(&self, log: &ExecutionLog) -> Result<()> {
        self.manager.insert_backup_log(backup_log_row(log)).await
    }

    /// 写入终态，同时更新内存中的日志
    pub async fn finish_backup_log(&self, log: &mut ExecutionLog, outcome: LogOutcome) -> Result<()> {
        let end_time = now();
        let status = outcome.status();
        let (file_path, file_size, message) = match outcome {
            LogOutcome::Success {
                file_path,
                file_size,
                message,
            } => (Some(file_path), Some(file_size), message),
            LogOutcome::Failed { message } => (None, None, message),
        };
        let message = crate::constants::logs::truncate_message(&message);

        self.manager
            .finish_backup_log(
                &log.id,
                LogCompletion {
                    status: status.as_str().to_string(),
                    end_time,
                    file_path: file_path.clone(),
                    file_size,
                    message: Some(message.clone()),
                },
            )
            .await?;

        log.status = status;
        log.end_time = Some(end_time);
        log.file_path = file_path;
        log.file_size = file_size;
        log.message = Some(message);
        Ok(())
    }

    /// 按状态和起始时间下限统计备份日志
    pub async fn count_backup_logs(
        &self,
        status: Option<LogStatus>,
        since: Option<DateTime<Utc>>,
    ) -> Result<i64> {
        self.manager
            .count_backup_logs(LogCountFilter {
                status: status.map(|s| s.as_str().to_string()),
                since,
            })
            .await
    }

    /// 成功备份的文件总大小
    pub async fn sum_artifact_size(&self) -> Result<i64> {
        self.manager.sum_artifact_size().await
    }

    pub async fn recent_backup_logs(&self, limit: usize) -> Result<Vec<BackupLogView>> {
        self.manager
            .recent_backup_logs(limit)
            .await?
            .into_iter()
            .map(BackupLogView::try_from)
            .collect()
    }

    pub async fn get_backup_log(&self, id: &str) -> Result<Option<BackupLogView>> {
        self.manager
            .get_backup_log(id)
            .await?
            .map(BackupLogView::try_from)
            .transpose()
    }

    pub async fn list_backup_logs(&self, job_id: Option<&str>) -> Result<Vec<BackupLogView>> {
        self.manager
            .list_backup_logs(job_id)
            .await?
            .into_iter()
            .map(BackupLogView::try_from)
            .collect()
    }

    pub async fn count_running_by_job(&self, job_id: &str) -> Result<i64> {
        self.manager.count_running_by_job(job_id).await
    }

    // ========== 恢复日志 ==========

    pub async fn create_restore_log(&self, log: &RestoreLog) -> Result<()> {
        self.manager.insert_restore_log(restore_log_row(log)).await
    }

    pub async fn finish_restore_log(
        &self,
        log: &mut RestoreLog,
        status: LogStatus,
        message: &str,
    ) -> Result<()> {
        let end_time = now();
        let message = crate::constants::logs::truncate_message(message);

        self.manager
            .finish_restore_log(
                &log.id,
                LogCompletion {
                    status: status.as_str().to_string(),
                    end_time,
                    file_path: None,
                    file_size: None,
                    message: Some(message.clone()),
                },
            )
            .await?;

        log.status = status;
        log.end_time = Some(end_time);
        log.message = Some(message);
        Ok(())
    }

    pub async fn get_restore_log(&self, id: &str) -> Result<Option<RestoreLog>> {
        self.manager
            .get_restore_log(id)
            .await?
            .map(RestoreLog::try_from)
            .transpose()
    }

    pub async fn list_restore_logs(&self) -> Result<Vec<RestoreLogView>> {
        self.manager
            .list_restore_logs()
            .await?
            .into_iter()
            .map(RestoreLogView::try_from)
            .collect()
    }

    /// 将进程异常退出遗留的 running 记录标记为失败
    pub async fn fail_interrupted_logs(&self, message: &str) -> Result<(usize, usize)> {
        self.manager.fail_interrupted_logs(now(), message).await
    }
}

// ========== 行 <-> 领域类型 ==========

fn target_row(target: &DatabaseTarget, encrypted_secret: &str) -> TargetRow {
    TargetRow {
        id: target.id.clone(),
        name: target.name.clone(),
        engine: target.engine.as_str().to_string(),
        host: target.host.clone(),
        port: i32::from(target.port),
        username: target.username.clone(),
        encrypted_secret: encrypted_secret.to_string(),
        database_name: target.database_name.clone(),
        created_at: target.created_at,
        updated_at: target.updated_at,
    }
}

fn job_row(job: &RecurringJob) -> JobRow {
    JobRow {
        id: job.id.clone(),
        target_id: job.target_id.clone(),
        schedule: job.schedule.clone(),
        backup_kind: job.backup_kind.as_str().to_string(),
        storage_kind: job.storage_kind.as_str().to_string(),
        storage_path: job.storage_path.clone(),
        compression: job.compression,
        enabled: job.enabled,
        created_at: job.created_at,
        updated_at: job.updated_at,
    }
}

fn backup_log_row(log: &ExecutionLog) -> BackupLogRow {
    BackupLogRow {
        id: log.id.clone(),
        job_id: log.job_id.clone(),
        status: log.status.as_str().to_string(),
        start_time: log.start_time,
        end_time: log.end_time,
        file_path: log.file_path.clone(),
        file_size: log.file_size,
        message: log.message.clone(),
    }
}

fn restore_log_row(log: &RestoreLog) -> RestoreLogRow {
    RestoreLogRow {
        id: log.id.clone(),
        target_id: log.target_id.clone(),
        backup_log_id: log.backup_log_id.clone(),
        status: log.status.as_str().to_string(),
        start_time: log.start_time,
        end_time: log.end_time,
        message: log.message.clone(),
    }
}

fn parse_optional<T: std::str::FromStr<Err = BackupError>>(value: Option<String>) -> Result<Option<T>> {
    value.map(|v| v.parse()).transpose()
}

impl TryFrom<TargetRow> for DatabaseTarget {
    type Error = BackupError;

    fn try_from(row: TargetRow) -> Result<Self> {
        let port = u16::try_from(row.port)
            .map_err(|_| BackupError::DuckDb(format!("目标 {} 的端口无效: {}", row.id, row.port)))?;
        Ok(DatabaseTarget {
            engine: row.engine.parse()?,
            port,
            id: row.id,
            name: row.name,
            host: row.host,
            username: row.username,
            database_name: row.database_name,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<TargetRow> for TargetWithSecret {
    type Error = BackupError;

    fn try_from(mut row: TargetRow) -> Result<Self> {
        let encrypted_secret = std::mem::take(&mut row.encrypted_secret);
        Ok(TargetWithSecret {
            target: DatabaseTarget::try_from(row)?,
            encrypted_secret,
        })
    }
}

impl TryFrom<JobRow> for RecurringJob {
    type Error = BackupError;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(RecurringJob {
            backup_kind: row.backup_kind.parse()?,
            storage_kind: row.storage_kind.parse()?,
            id: row.id,
            target_id: row.target_id,
            schedule: row.schedule,
            storage_path: row.storage_path,
            compression: row.compression,
            enabled: row.enabled,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<JobListRow> for JobView {
    type Error = BackupError;

    fn try_from(row: JobListRow) -> Result<Self> {
        Ok(JobView {
            job: RecurringJob::try_from(row.job)?,
            target_name: row.target_name,
            target_engine: parse_optional(row.target_engine)?,
        })
    }
}

impl TryFrom<BackupLogRow> for ExecutionLog {
    type Error = BackupError;

    fn try_from(row: BackupLogRow) -> Result<Self> {
        Ok(ExecutionLog {
            status: row.status.parse()?,
            id: row.id,
            job_id: row.job_id,
            start_time: row.start_time,
            end_time: row.end_time,
            file_path: row.file_path,
            file_size: row.file_size,
            message: row.message,
        })
    }
}

impl TryFrom<BackupLogListRow> for BackupLogView {
    type Error = BackupError;

    fn try_from(row: BackupLogListRow) -> Result<Self> {
        Ok(BackupLogView {
            log: ExecutionLog::try_from(row.log)?,
            target_name: row.target_name,
            target_engine: parse_optional(row.target_engine)?,
        })
    }
}

impl TryFrom<RestoreLogRow> for RestoreLog {
    type Error = BackupError;

    fn try_from(row: RestoreLogRow) -> Result<Self> {
        Ok(RestoreLog {
            status: row.status.parse()?,
            id: row.id,
            target_id: row.target_id,
            backup_log_id: row.backup_log_id,
            start_time: row.start_time,
            end_time: row.end_time,
            message: row.message,
        })
    }
}

impl TryFrom<RestoreLogListRow> for RestoreLogView {
    type Error = BackupError;

    fn try_from(row: RestoreLogListRow) -> Result<Self> {
        Ok(RestoreLogView {
            log: RestoreLog::try_from(row.log)?,
            target_name: row.target_name,
            target_engine: parse_optional(row.target_engine)?,
            source_started_at: row.source_started_at,
            source_target_name: row.source_target_name,
        })
    }
}
