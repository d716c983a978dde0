use crate::backup::{BackupExecutor, BackupRunOutcome};
use crate::cron::{self, CronSchedule};
use crate::database::Database;
use crate::models::RecurringJob;
use crate::Result;
use chrono::{DateTime, Local, TimeZone};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 单个任务的定时触发器
struct Trigger {
    schedule: CronSchedule,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// 定时调度器
///
/// 每个启用的任务对应一个后台循环：按 cron 表达式（本地时区）计算下次触发时间，
/// 到点后把备份交给 [`BackupExecutor`]，不等待其完成。
/// 同一任务的并发执行由执行器的 running 检查拦截。
pub struct Scheduler {
    database: Database,
    executor: BackupExecutor,
    triggers: DashMap<String, Trigger>,
    root: CancellationToken,
}

impl Scheduler {
    pub fn new(database: Database, executor: BackupExecutor) -> Self {
        Self {
            database,
            executor,
            triggers: DashMap::new(),
            root: CancellationToken::new(),
        }
    }

    /// 为所有启用的任务安装触发器，表达式无效的任务跳过
    pub async fn initialize(&self) -> Result<usize> {
        let jobs = self.database.list_enabled_jobs().await?;
        let mut installed = 0;

        for job in &jobs {
            match self.schedule(job) {
                Ok(true) => installed += 1,
                Ok(false) => {}
                Err(e) => warn!("跳过任务 {} 的调度: {}", job.id, e),
            }
        }

        info!("调度器已初始化: {}/{} 个任务", installed, jobs.len());
        Ok(installed)
    }

    /// 安装触发器；已存在时不做任何事并返回 `false`
    ///
    /// 永远不会触发的表达式（如 `0 0 31 2 *`）与语法错误一样被拒绝。
    pub fn schedule(&self, job: &RecurringJob) -> Result<bool> {
        let schedule = cron::validate(&job.schedule)?;

        match self.triggers.entry(job.id.clone()) {
            Entry::Occupied(_) => {
                warn!("任务 {} 已在调度中", job.id);
                Ok(false)
            }
            Entry::Vacant(entry) => {
                entry.insert(self.spawn_trigger(&job.id, schedule));
                info!("已调度任务 {}: {}", job.id, job.schedule);
                Ok(true)
            }
        }
    }

    /// 移除触发器，正在执行的备份不受影响
    pub fn unschedule(&self, job_id: &str) -> bool {
        match self.triggers.remove(job_id) {
            Some((_, trigger)) => {
                trigger.cancel.cancel();
                info!("已取消任务 {} 的调度", job_id);
                true
            }
            None => {
                warn!("任务 {} 未在调度中", job_id);
                false
            }
        }
    }

    /// 按任务的最新配置替换触发器
    ///
    /// 禁用的任务只做移除。新表达式无效时保留原触发器并返回错误。
    pub fn reschedule(&self, job: &RecurringJob) -> Result<()> {
        if !job.enabled {
            if self.triggers.contains_key(&job.id) {
                self.unschedule(&job.id);
            }
            return Ok(());
        }

        let schedule = cron::validate(&job.schedule)?;
        let trigger = self.spawn_trigger(&job.id, schedule);
        if let Some(old) = self.triggers.insert(job.id.clone(), trigger) {
            old.cancel.cancel();
        }
        info!("已重新调度任务 {}: {}", job.id, job.schedule);
        Ok(())
    }

    pub fn is_scheduled(&self, job_id: &str) -> bool {
        self.triggers.contains_key(job_id)
    }

    pub fn scheduled_job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.triggers.iter().map(|t| t.key().clone()).collect();
        ids.sort();
        ids
    }

    /// 任务的下一次触发时间（本地时区）
    pub fn next_fire(&self, job_id: &str) -> Option<DateTime<Local>> {
        self.triggers
            .get(job_id)
            .and_then(|t| t.schedule.next_after(&Local::now()))
    }

    /// 停止所有触发器并等待循环退出
    pub async fn shutdown(&self) {
        self.root.cancel();

        let ids = self.scheduled_job_ids();
        for id in ids {
            if let Some((_, trigger)) = self.triggers.remove(&id) {
                if let Err(e) = trigger.handle.await {
                    error!("任务 {} 的调度循环异常退出: {}", id, e);
                }
            }
        }
        info!("调度器已停止");
    }

    fn spawn_trigger(&self, job_id: &str, schedule: CronSchedule) -> Trigger {
        let cancel = self.root.child_token();
        let handle = tokio::spawn(trigger_loop(
            job_id.to_string(),
            schedule.clone(),
            self.executor.clone(),
            cancel.clone(),
        ));
        Trigger {
            schedule,
            cancel,
            handle,
        }
    }
}

async fn trigger_loop(
    job_id: String,
    schedule: CronSchedule,
    executor: BackupExecutor,
    cancel: CancellationToken,
) {
    let mut last_fire: Option<DateTime<Local>> = None;

    loop {
        let now = Local::now();
        let Some(next) = next_fire_time(&schedule, now, last_fire) else {
            warn!("任务 {} 的表达式 {} 没有后续触发时间", job_id, schedule.expression());
            break;
        };
        let wait = (next - now).to_std().unwrap_or_default();
        debug!("任务 {} 下次触发: {}", job_id, next);

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("任务 {} 的调度循环退出", job_id);
                break;
            }
            _ = tokio::time::sleep(wait) => {
                last_fire = Some(next);
                let executor = executor.clone();
                let job_id = job_id.clone();
                tokio::spawn(async move {
                    match executor.run_job(&job_id).await {
                        Ok(BackupRunOutcome::Skipped { running_log_id }) => {
                            debug!("任务 {} 跳过，执行中: {}", job_id, running_log_id);
                        }
                        Ok(_) => {}
                        Err(e) => warn!("定时备份未执行: 任务 {}: {}", job_id, e),
                    }
                });
            }
        }
    }
}

/// 下次触发时间，从“现在”和“上次触发”中较晚的一个开始计算，避免时钟抖动导致重复触发
fn next_fire_time<Tz: TimeZone>(
    schedule: &CronSchedule,
    now: DateTime<Tz>,
    last_fire: Option<DateTime<Tz>>,
) -> Option<DateTime<Tz>> {
    let from = match last_fire {
        Some(last) if last > now => last,
        _ => now,
    };
    schedule.next_after(&from)
}
