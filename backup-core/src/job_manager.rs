use crate::backup::{BackupExecutor, BackupRunOutcome};
use crate::cron;
use crate::database::{Database, new_id, now};
use crate::models::{JobUpdate, JobView, NewJob, RecurringJob};
use crate::scheduler::Scheduler;
use crate::{BackupError, Result};
use std::sync::Arc;
use tracing::{info, instrument};

/// 备份任务管理
///
/// 存储与调度器保持一致：启用的任务在写入后立即安装触发器，
/// 更新后重新调度，删除前先取消调度。
#[derive(Clone)]
pub struct JobManager {
    database: Database,
    scheduler: Arc<Scheduler>,
    executor: BackupExecutor,
}

impl JobManager {
    pub fn new(database: Database, scheduler: Arc<Scheduler>, executor: BackupExecutor) -> Self {
        Self {
            database,
            scheduler,
            executor,
        }
    }

    #[instrument(skip_all, fields(target_id = %input.target_id))]
    pub async fn create(&self, input: NewJob) -> Result<RecurringJob> {
        self.ensure_target(&input.target_id).await?;
        cron::validate(&input.schedule)?;
        validate_storage_path(&input.storage_path)?;

        let now = now();
        let job = RecurringJob {
            id: new_id(),
            target_id: input.target_id,
            schedule: input.schedule,
            backup_kind: input.backup_kind,
            storage_kind: input.storage_kind,
            storage_path: input.storage_path,
            compression: input.compression,
            enabled: input.enabled,
            created_at: now,
            updated_at: now,
        };

        self.database.create_job(&job).await?;
        if job.enabled {
            self.scheduler.schedule(&job)?;
        }
        info!("已创建备份任务 {} ({})", job.id, job.schedule);
        Ok(job)
    }

    pub async fn list(&self, target_id: Option<&str>) -> Result<Vec<JobView>> {
        self.database.list_jobs(target_id).await
    }

    pub async fn get(&self, id: &str) -> Result<RecurringJob> {
        self.database
            .get_job(id)
            .await?
            .ok_or_else(|| BackupError::JobNotFound(id.to_string()))
    }

    #[instrument(skip_all, fields(job_id = %id))]
    pub async fn update(&self, id: &str, update: JobUpdate) -> Result<RecurringJob> {
        let mut job = self.get(id).await?;

        if let Some(target_id) = update.target_id {
            self.ensure_target(&target_id).await?;
            job.target_id = target_id;
        }
        if let Some(schedule) = update.schedule {
            cron::validate(&schedule)?;
            job.schedule = schedule;
        }
        if let Some(storage_path) = update.storage_path {
            validate_storage_path(&storage_path)?;
            job.storage_path = storage_path;
        }
        if let Some(compression) = update.compression {
            job.compression = compression;
        }
        if let Some(enabled) = update.enabled {
            job.enabled = enabled;
        }
        job.updated_at = now();

        if !self.database.update_job(&job).await? {
            return Err(BackupError::JobNotFound(id.to_string()));
        }
        self.scheduler.reschedule(&job)?;
        info!("已更新备份任务 {}", id);
        Ok(job)
    }

    /// 取消调度后删除任务，历史日志保留
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.get(id).await?;
        if self.scheduler.is_scheduled(id) {
            self.scheduler.unschedule(id);
        }
        self.database.delete_job(id).await?;
        info!("已删除备份任务 {}", id);
        Ok(())
    }

    /// 立即执行一次备份，走与定时触发相同的流程
    pub async fn run_now(&self, id: &str) -> Result<BackupRunOutcome> {
        self.executor.run_job(id).await
    }

    async fn ensure_target(&self, target_id: &str) -> Result<()> {
        match self.database.get_target(target_id).await? {
            Some(_) => Ok(()),
            None => Err(BackupError::TargetNotFound(target_id.to_string())),
        }
    }
}

fn validate_storage_path(path: &str) -> Result<()> {
    if path.trim().is_empty() {
        return Err(BackupError::invalid_input("存储路径不能为空"));
    }
    Ok(())
}
