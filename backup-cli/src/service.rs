use anyhow::Result;
use async_trait::async_trait;
use backup_core::BackupError;
use backup_core::backup::BackupRunOutcome;
use backup_core::cron::CronSchedule;
use backup_core::history::DashboardStats;
use backup_core::models::{
    BackupLogView, ConnectionParams, DatabaseTarget, JobUpdate, JobView, NewJob, NewTarget,
    RecurringJob, RestoreLog, RestoreLogView, TargetUpdate,
};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::app::CliApp;

/// 目标详情，附带引用它的任务数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetDetail {
    #[serde(flatten)]
    pub target: DatabaseTarget,
    pub job_count: i64,
}

/// 任务条目，附带下次执行时间
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEntry {
    #[serde(flatten)]
    pub view: JobView,
    pub next_run: Option<DateTime<Local>>,
}

/// 连通性检测结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionCheck {
    pub ok: bool,
    pub error: Option<String>,
}

impl ConnectionCheck {
    fn from_result(result: backup_core::Result<()>) -> Result<Self> {
        match result {
            Ok(()) => Ok(Self {
                ok: true,
                error: None,
            }),
            // 目标不存在等准入错误不算检测结果
            Err(e) if e.is_admission() => Err(e.into()),
            Err(e) => Ok(Self {
                ok: false,
                error: Some(e.to_string()),
            }),
        }
    }
}

/// 命令行可调用的全部管理操作
///
/// 调度服务未运行时由 [`CliApp`] 直接访问本地存储；
/// 服务运行时由 [`crate::RemoteService`] 转发给服务进程，
/// 这样任务变更会立即作用到服务中的调度器。
#[async_trait]
pub trait BackupService: Send + Sync {
    async fn create_target(&self, input: NewTarget) -> Result<DatabaseTarget>;
    async fn list_targets(&self) -> Result<Vec<DatabaseTarget>>;
    async fn get_target(&self, id: &str) -> Result<TargetDetail>;
    async fn update_target(&self, id: &str, update: TargetUpdate) -> Result<DatabaseTarget>;
    async fn delete_target(&self, id: &str) -> Result<()>;
    async fn test_target(&self, id: &str) -> Result<ConnectionCheck>;
    async fn test_connection(&self, params: ConnectionParams) -> Result<ConnectionCheck>;

    async fn create_job(&self, input: NewJob) -> Result<RecurringJob>;
    async fn list_jobs(&self, target_id: Option<&str>) -> Result<Vec<JobEntry>>;
    async fn get_job(&self, id: &str) -> Result<JobEntry>;
    async fn update_job(&self, id: &str, update: JobUpdate) -> Result<RecurringJob>;
    async fn delete_job(&self, id: &str) -> Result<()>;
    async fn run_job(&self, id: &str) -> Result<BackupRunOutcome>;

    async fn list_backup_logs(&self, job_id: Option<&str>) -> Result<Vec<BackupLogView>>;
    async fn get_backup_log(&self, id: &str) -> Result<BackupLogView>;

    async fn start_restore(&self, backup_log_id: &str, target_id: &str) -> Result<RestoreLog>;
    async fn list_restore_logs(&self) -> Result<Vec<RestoreLogView>>;

    async fn dashboard_stats(&self) -> Result<DashboardStats>;
}

impl CliApp {
    /// 已调度的任务取调度器中的时间，其余按表达式推算
    fn next_run(&self, job: &RecurringJob) -> Option<DateTime<Local>> {
        if !job.enabled {
            return None;
        }
        self.scheduler.next_fire(&job.id).or_else(|| {
            CronSchedule::parse(&job.schedule)
                .ok()
                .and_then(|schedule| schedule.next_after(&Local::now()))
        })
    }

    fn job_entry(&self, view: JobView) -> JobEntry {
        let next_run = self.next_run(&view.job);
        JobEntry { view, next_run }
    }
}

#[async_trait]
impl BackupService for CliApp {
    async fn create_target(&self, input: NewTarget) -> Result<DatabaseTarget> {
        Ok(self.targets.create(input).await?)
    }

    async fn list_targets(&self) -> Result<Vec<DatabaseTarget>> {
        Ok(self.targets.list().await?)
    }

    async fn get_target(&self, id: &str) -> Result<TargetDetail> {
        let target = self.targets.get(id).await?;
        let job_count = self.database.count_jobs_by_target(id).await?;
        Ok(TargetDetail { target, job_count })
    }

    async fn update_target(&self, id: &str, update: TargetUpdate) -> Result<DatabaseTarget> {
        Ok(self.targets.update(id, update).await?)
    }

    async fn delete_target(&self, id: &str) -> Result<()> {
        Ok(self.targets.delete(id).await?)
    }

    async fn test_target(&self, id: &str) -> Result<ConnectionCheck> {
        ConnectionCheck::from_result(self.targets.test_saved(id).await)
    }

    async fn test_connection(&self, params: ConnectionParams) -> Result<ConnectionCheck> {
        ConnectionCheck::from_result(self.targets.test_connection(&params).await)
    }

    async fn create_job(&self, input: NewJob) -> Result<RecurringJob> {
        Ok(self.jobs.create(input).await?)
    }

    async fn list_jobs(&self, target_id: Option<&str>) -> Result<Vec<JobEntry>> {
        let views = self.jobs.list(target_id).await?;
        Ok(views.into_iter().map(|view| self.job_entry(view)).collect())
    }

    async fn get_job(&self, id: &str) -> Result<JobEntry> {
        let job = self.jobs.get(id).await?;
        let target = match self.targets.get(&job.target_id).await {
            Ok(target) => Some(target),
            Err(BackupError::TargetNotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        let view = JobView {
            target_name: target.as_ref().map(|t| t.name.clone()),
            target_engine: target.map(|t| t.engine),
            job,
        };
        Ok(self.job_entry(view))
    }

    async fn update_job(&self, id: &str, update: JobUpdate) -> Result<RecurringJob> {
        Ok(self.jobs.update(id, update).await?)
    }

    async fn delete_job(&self, id: &str) -> Result<()> {
        Ok(self.jobs.delete(id).await?)
    }

    async fn run_job(&self, id: &str) -> Result<BackupRunOutcome> {
        Ok(self.jobs.run_now(id).await?)
    }

    async fn list_backup_logs(&self, job_id: Option<&str>) -> Result<Vec<BackupLogView>> {
        Ok(self.history.list_backup_logs(job_id).await?)
    }

    async fn get_backup_log(&self, id: &str) -> Result<BackupLogView> {
        Ok(self.history.get_backup_log(id).await?)
    }

    async fn start_restore(&self, backup_log_id: &str, target_id: &str) -> Result<RestoreLog> {
        Ok(self.restores.start_restore(backup_log_id, target_id).await?)
    }

    async fn list_restore_logs(&self) -> Result<Vec<RestoreLogView>> {
        Ok(self.history.list_restore_logs().await?)
    }

    async fn dashboard_stats(&self) -> Result<DashboardStats> {
        Ok(self.history.dashboard_stats().await?)
    }
}
