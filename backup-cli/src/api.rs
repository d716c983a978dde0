//! 调度服务的本机控制接口
//!
//! `serve` 运行期间独占本地存储，其他命令通过这里把操作交给服务进程执行，
//! 任务的增删改因此能立即作用到正在运行的调度器。

use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use backup_core::BackupError;
use backup_core::constants::api::endpoints;
use backup_core::models::{ConnectionParams, JobUpdate, NewJob, NewTarget, TargetUpdate};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::app::CliApp;
use crate::remote::{ErrorBody, HealthResponse, RestoreRequest};
use crate::service::BackupService;

#[derive(Clone)]
struct ApiState {
    app: Arc<CliApp>,
    token: Arc<str>,
}

/// 接口错误，按核心错误类型映射 HTTP 状态码
pub enum ApiError {
    Unauthorized,
    Service(anyhow::Error),
}

type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Service(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "缺少或无效的访问令牌".to_string(),
            ),
            ApiError::Service(err) => {
                let (status, code) = classify(err.downcast_ref::<BackupError>());
                if status.is_server_error() {
                    error!("控制接口请求失败: {:#}", err);
                }
                (status, code, format!("{err:#}"))
            }
        };

        let body = ErrorBody {
            error: message,
            code: code.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn classify(err: Option<&BackupError>) -> (StatusCode, &'static str) {
    match err {
        Some(
            BackupError::JobNotFound(_)
            | BackupError::TargetNotFound(_)
            | BackupError::BackupLogNotFound(_),
        ) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        Some(BackupError::TargetInUse { .. }) => (StatusCode::CONFLICT, "CONFLICT"),
        Some(e) if e.is_admission() => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    }
}

#[derive(Debug, Deserialize)]
struct JobFilter {
    target: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LogFilter {
    job: Option<String>,
}

/// 构建控制接口路由，除健康检查外都需要 `Bearer` 令牌
pub fn router(app: Arc<CliApp>) -> Router {
    let state = ApiState {
        token: Arc::from(app.vault.control_token()),
        app,
    };

    let protected = Router::new()
        .route(endpoints::TARGETS, get(list_targets).post(create_target))
        .route(
            endpoints::TARGET,
            get(get_target).put(update_target).delete(delete_target),
        )
        .route(endpoints::TARGET_TEST, post(test_target))
        .route(endpoints::CONNECTION_TEST, post(test_connection))
        .route(endpoints::JOBS, get(list_jobs).post(create_job))
        .route(
            endpoints::JOB,
            get(get_job).put(update_job).delete(delete_job),
        )
        .route(endpoints::JOB_RUN, post(run_job))
        .route(endpoints::BACKUP_LOGS, get(list_backup_logs))
        .route(endpoints::BACKUP_LOG, get(get_backup_log))
        .route(endpoints::RESTORES, get(list_restore_logs).post(start_restore))
        .route(endpoints::STATS, get(dashboard_stats))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route(endpoints::HEALTH, get(health))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn require_token(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    let authorized = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| token == state.token.as_ref());

    if !authorized {
        return ApiError::Unauthorized.into_response();
    }
    next.run(request).await
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ========== 备份目标 ==========

async fn list_targets(State(state): State<ApiState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.app.list_targets().await?))
}

async fn create_target(
    State(state): State<ApiState>,
    Json(input): Json<NewTarget>,
) -> ApiResult<impl IntoResponse> {
    let target = state.app.create_target(input).await?;
    Ok((StatusCode::CREATED, Json(target)))
}

async fn get_target(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.app.get_target(&id).await?))
}

async fn update_target(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(update): Json<TargetUpdate>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.app.update_target(&id, update).await?))
}

async fn delete_target(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.app.delete_target(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn test_target(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.app.test_target(&id).await?))
}

async fn test_connection(
    State(state): State<ApiState>,
    Json(params): Json<ConnectionParams>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.app.test_connection(params).await?))
}

// ========== 备份任务 ==========

async fn list_jobs(
    State(state): State<ApiState>,
    Query(filter): Query<JobFilter>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.app.list_jobs(filter.target.as_deref()).await?))
}

async fn create_job(
    State(state): State<ApiState>,
    Json(input): Json<NewJob>,
) -> ApiResult<impl IntoResponse> {
    let job = state.app.create_job(input).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

async fn get_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.app.get_job(&id).await?))
}

async fn update_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(update): Json<JobUpdate>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.app.update_job(&id, update).await?))
}

async fn delete_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.app.delete_job(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn run_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.app.run_job(&id).await?))
}

// ========== 日志与恢复 ==========

async fn list_backup_logs(
    State(state): State<ApiState>,
    Query(filter): Query<LogFilter>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.app.list_backup_logs(filter.job.as_deref()).await?))
}

async fn get_backup_log(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.app.get_backup_log(&id).await?))
}

async fn start_restore(
    State(state): State<ApiState>,
    Json(request): Json<RestoreRequest>,
) -> ApiResult<impl IntoResponse> {
    let log = state
        .app
        .start_restore(&request.backup_log_id, &request.target_id)
        .await?;
    Ok(Json(log))
}

async fn list_restore_logs(State(state): State<ApiState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.app.list_restore_logs().await?))
}

async fn dashboard_stats(State(state): State<ApiState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.app.dashboard_stats().await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteService;
    use backup_core::config::AppConfig;
    use backup_core::database::Database;
    use backup_core::models::EngineKind;
    use backup_core::vault::CredentialVault;

    async fn spawn_service(dir: &std::path::Path) -> (Arc<CliApp>, String) {
        let mut config = AppConfig::default();
        config.backup.default_storage_dir = dir.join("backups").to_string_lossy().to_string();
        let app = Arc::new(CliApp::assemble(
            config,
            Database::connect_memory().await.unwrap(),
            Arc::new(CredentialVault::new("test-key").unwrap()),
        ));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = router(app.clone());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (app, format!("http://{addr}"))
    }

    fn new_target() -> NewTarget {
        NewTarget {
            name: "shop".to_string(),
            connection: ConnectionParams {
                engine: EngineKind::Postgres,
                host: "localhost".to_string(),
                port: 5432,
                username: "backup".to_string(),
                password: "s3cret".to_string(),
                database_name: "shop".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_job_changes_reach_running_scheduler() {
        let dir = tempfile::tempdir().unwrap();
        let (app, base_url) = spawn_service(dir.path()).await;
        let remote = RemoteService::new(base_url, app.vault.control_token()).unwrap();

        let target = remote.create_target(new_target()).await.unwrap();
        let job = remote
            .create_job(NewJob {
                target_id: target.id.clone(),
                schedule: "0 2 * * *".to_string(),
                backup_kind: Default::default(),
                storage_kind: Default::default(),
                storage_path: dir.path().join("backups").to_string_lossy().to_string(),
                compression: true,
                enabled: true,
            })
            .await
            .unwrap();
        assert!(app.scheduler.is_scheduled(&job.id));

        let entry = remote.get_job(&job.id).await.unwrap();
        assert_eq!(entry.view.target_name.as_deref(), Some("shop"));
        assert_eq!(
            entry.next_run.map(|t| t.format("%H:%M").to_string()).as_deref(),
            Some("02:00")
        );

        let update = JobUpdate {
            schedule: Some("30 4 * * *".to_string()),
            ..Default::default()
        };
        remote.update_job(&job.id, update).await.unwrap();
        let next = app.scheduler.next_fire(&job.id).unwrap();
        assert_eq!(next.format("%H:%M").to_string(), "04:30");

        let disable = JobUpdate {
            enabled: Some(false),
            ..Default::default()
        };
        remote.update_job(&job.id, disable).await.unwrap();
        assert!(!app.scheduler.is_scheduled(&job.id));

        remote.delete_job(&job.id).await.unwrap();
        assert!(remote.list_jobs(None).await.unwrap().is_empty());

        app.scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_errors_keep_status_and_message() {
        let dir = tempfile::tempdir().unwrap();
        let (app, base_url) = spawn_service(dir.path()).await;
        let remote = RemoteService::new(base_url, app.vault.control_token()).unwrap();

        let err = remote.get_job("missing").await.unwrap_err().to_string();
        assert!(err.contains("备份任务不存在: missing"), "{err}");
        assert!(err.contains("404"), "{err}");

        let err = remote
            .start_restore("missing-log", "missing-target")
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("备份记录不存在"), "{err}");
        assert!(app.history.list_restore_logs().await.unwrap().is_empty());

        let stats = remote.dashboard_stats().await.unwrap();
        assert_eq!(stats.total_jobs, 0);
    }

    #[tokio::test]
    async fn test_requests_require_matching_token() {
        let dir = tempfile::tempdir().unwrap();
        let (_app, base_url) = spawn_service(dir.path()).await;

        let other_key = CredentialVault::new("another-key").unwrap();
        let remote = RemoteService::new(base_url, other_key.control_token()).unwrap();
        let err = remote.list_targets().await.unwrap_err().to_string();
        assert!(err.contains("加密密钥"), "{err}");
    }

    #[tokio::test]
    async fn test_detect_running_service() {
        let dir = tempfile::tempdir().unwrap();
        let (app, base_url) = spawn_service(dir.path()).await;

        let mut config = AppConfig::default();
        config.server.listen = base_url.trim_start_matches("http://").to_string();
        let remote = RemoteService::detect(&config, &app.vault).await.unwrap();
        assert_eq!(remote.base_url(), base_url);
    }

    #[test]
    fn test_error_classification() {
        assert_eq!(
            classify(Some(&BackupError::TargetNotFound("t".into()))).0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            classify(Some(&BackupError::TargetInUse { jobs: 1 })).0,
            StatusCode::CONFLICT
        );
        assert_eq!(
            classify(Some(&BackupError::invalid_input("bad"))).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            classify(Some(&BackupError::ArtifactMissing("/b/x.zip".into()))).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(classify(None).0, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
