use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use backup_core::backup::BackupRunOutcome;
use backup_core::config::AppConfig;
use backup_core::constants::api::{DETECT_TIMEOUT_MS, endpoints};
use backup_core::history::DashboardStats;
use backup_core::models::{
    BackupLogView, ConnectionParams, DatabaseTarget, JobUpdate, NewJob, NewTarget, RecurringJob,
    RestoreLog, RestoreLogView, TargetUpdate,
};
use backup_core::vault::CredentialVault;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::service::{BackupService, ConnectionCheck, JobEntry, TargetDetail};

/// 控制接口健康检查响应
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// 控制接口错误响应
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

/// 发起恢复的请求体
#[derive(Debug, Serialize, Deserialize)]
pub struct RestoreRequest {
    pub backup_log_id: String,
    pub target_id: String,
}

/// 运行中调度服务的客户端
#[derive(Debug, Clone)]
pub struct RemoteService {
    client: Client,
    base_url: String,
    token: String,
}

impl RemoteService {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        // 恢复会同步等待完成，只限制建立连接的时间
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(DETECT_TIMEOUT_MS))
            .build()
            .context("无法创建 HTTP 客户端")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            token: token.into(),
        })
    }

    /// 检测配置中的控制接口上是否有调度服务在运行
    pub async fn detect(config: &AppConfig, vault: &CredentialVault) -> Option<Self> {
        let base_url = config.server_base_url().ok()?;
        let remote = Self::new(base_url, vault.control_token()).ok()?;
        match remote.health().await {
            Ok(health) if health.service == env!("CARGO_PKG_NAME") => Some(remote),
            Ok(health) => {
                debug!("{} 上运行的不是调度服务: {}", remote.base_url, health.service);
                None
            }
            Err(e) => {
                debug!("调度服务未运行: {:#}", e);
                None
            }
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn health(&self) -> Result<HealthResponse> {
        let response = self
            .client
            .get(self.url(endpoints::HEALTH))
            .timeout(Duration::from_millis(DETECT_TIMEOUT_MS * 4))
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .bearer_auth(&self.token)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await.context("无法连接调度服务")?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn send_empty(&self, request: RequestBuilder) -> Result<()> {
        let response = request.send().await.context("无法连接调度服务")?;
        check_status(response).await?;
        Ok(())
    }
}

fn with_id(path: &str, id: &str) -> String {
    path.replace("{id}", id)
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(anyhow!(
            "调度服务拒绝了请求，请确认两边使用相同的加密密钥"
        ));
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or(text);
    Err(anyhow!("{message} (HTTP {status})"))
}

#[async_trait]
impl BackupService for RemoteService {
    async fn create_target(&self, input: NewTarget) -> Result<DatabaseTarget> {
        self.send(self.request(Method::POST, endpoints::TARGETS).json(&input))
            .await
    }

    async fn list_targets(&self) -> Result<Vec<DatabaseTarget>> {
        self.send(self.request(Method::GET, endpoints::TARGETS)).await
    }

    async fn get_target(&self, id: &str) -> Result<TargetDetail> {
        self.send(self.request(Method::GET, &with_id(endpoints::TARGET, id)))
            .await
    }

    async fn update_target(&self, id: &str, update: TargetUpdate) -> Result<DatabaseTarget> {
        self.send(
            self.request(Method::PUT, &with_id(endpoints::TARGET, id))
                .json(&update),
        )
        .await
    }

    async fn delete_target(&self, id: &str) -> Result<()> {
        self.send_empty(self.request(Method::DELETE, &with_id(endpoints::TARGET, id)))
            .await
    }

    async fn test_target(&self, id: &str) -> Result<ConnectionCheck> {
        self.send(self.request(Method::POST, &with_id(endpoints::TARGET_TEST, id)))
            .await
    }

    async fn test_connection(&self, params: ConnectionParams) -> Result<ConnectionCheck> {
        self.send(
            self.request(Method::POST, endpoints::CONNECTION_TEST)
                .json(&params),
        )
        .await
    }

    async fn create_job(&self, input: NewJob) -> Result<RecurringJob> {
        self.send(self.request(Method::POST, endpoints::JOBS).json(&input))
            .await
    }

    async fn list_jobs(&self, target_id: Option<&str>) -> Result<Vec<JobEntry>> {
        let mut request = self.request(Method::GET, endpoints::JOBS);
        if let Some(target_id) = target_id {
            request = request.query(&[("target", target_id)]);
        }
        self.send(request).await
    }

    async fn get_job(&self, id: &str) -> Result<JobEntry> {
        self.send(self.request(Method::GET, &with_id(endpoints::JOB, id)))
            .await
    }

    async fn update_job(&self, id: &str, update: JobUpdate) -> Result<RecurringJob> {
        self.send(
            self.request(Method::PUT, &with_id(endpoints::JOB, id))
                .json(&update),
        )
        .await
    }

    async fn delete_job(&self, id: &str) -> Result<()> {
        self.send_empty(self.request(Method::DELETE, &with_id(endpoints::JOB, id)))
            .await
    }

    async fn run_job(&self, id: &str) -> Result<BackupRunOutcome> {
        self.send(self.request(Method::POST, &with_id(endpoints::JOB_RUN, id)))
            .await
    }

    async fn list_backup_logs(&self, job_id: Option<&str>) -> Result<Vec<BackupLogView>> {
        let mut request = self.request(Method::GET, endpoints::BACKUP_LOGS);
        if let Some(job_id) = job_id {
            request = request.query(&[("job", job_id)]);
        }
        self.send(request).await
    }

    async fn get_backup_log(&self, id: &str) -> Result<BackupLogView> {
        self.send(self.request(Method::GET, &with_id(endpoints::BACKUP_LOG, id)))
            .await
    }

    async fn start_restore(&self, backup_log_id: &str, target_id: &str) -> Result<RestoreLog> {
        let body = RestoreRequest {
            backup_log_id: backup_log_id.to_string(),
            target_id: target_id.to_string(),
        };
        self.send(self.request(Method::POST, endpoints::RESTORES).json(&body))
            .await
    }

    async fn list_restore_logs(&self) -> Result<Vec<RestoreLogView>> {
        self.send(self.request(Method::GET, endpoints::RESTORES)).await
    }

    async fn dashboard_stats(&self) -> Result<DashboardStats> {
        self.send(self.request(Method::GET, endpoints::STATS)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_id() {
        assert_eq!(with_id(endpoints::JOB_RUN, "abc"), "/api/jobs/abc/run");
        assert_eq!(with_id(endpoints::TARGETS, "abc"), "/api/targets");
    }

    #[tokio::test]
    async fn test_detect_without_service() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = AppConfig::default();
        config.server.listen = listener.local_addr().unwrap().to_string();
        drop(listener);

        let vault = CredentialVault::new("test-key").unwrap();
        assert!(RemoteService::detect(&config, &vault).await.is_none());
    }
}
