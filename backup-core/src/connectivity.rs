use crate::constants::connectivity::DEFAULT_TIMEOUT_SECS;
use crate::models::{ConnectionParams, EngineKind};
use crate::{BackupError, Result};
use sqlx::mysql::MySqlConnectOptions;
use sqlx::postgres::PgConnectOptions;
use sqlx::{ConnectOptions, Connection};
use std::time::Duration;
use tracing::{debug, info};

/// 目标数据库连通性检测
///
/// 建立一次短连接，执行 `SELECT 1` 后关闭，不读写本地存储。
#[derive(Debug, Clone)]
pub struct ConnectionTester {
    timeout: Duration,
}

impl Default for ConnectionTester {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }
}

impl ConnectionTester {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn check(&self, params: &ConnectionParams) -> Result<()> {
        debug!(
            "检测连接: {}://{}@{}:{}/{}",
            params.engine, params.username, params.host, params.port, params.database_name
        );

        let attempt = async {
            match params.engine {
                EngineKind::Postgres => check_postgres(params).await,
                EngineKind::Mysql => check_mysql(params).await,
                EngineKind::Sqlite => Err(BackupError::unsupported_engine(EngineKind::Sqlite.as_str())),
            }
        };

        match tokio::time::timeout(self.timeout, attempt).await {
            Ok(result) => {
                if result.is_ok() {
                    info!("连接成功: {}:{}", params.host, params.port);
                }
                result
            }
            Err(_) => Err(BackupError::connection_failed(format!(
                "连接超时 ({} 秒)",
                self.timeout.as_secs_f32()
            ))),
        }
    }
}

async fn check_postgres(params: &ConnectionParams) -> Result<()> {
    let options = PgConnectOptions::new()
        .host(&params.host)
        .port(params.port)
        .username(&params.username)
        .password(&params.password)
        .database(&params.database_name);

    let mut conn = options.connect().await.map_err(connect_error)?;
    sqlx::query("SELECT 1")
        .execute(&mut conn)
        .await
        .map_err(connect_error)?;
    conn.close().await.map_err(connect_error)
}

async fn check_mysql(params: &ConnectionParams) -> Result<()> {
    let options = MySqlConnectOptions::new()
        .host(&params.host)
        .port(params.port)
        .username(&params.username)
        .password(&params.password)
        .database(&params.database_name);

    let mut conn = options.connect().await.map_err(connect_error)?;
    sqlx::query("SELECT 1")
        .execute(&mut conn)
        .await
        .map_err(connect_error)?;
    conn.close().await.map_err(connect_error)
}

fn connect_error(err: sqlx::Error) -> BackupError {
    BackupError::connection_failed(err.to_string())
}
