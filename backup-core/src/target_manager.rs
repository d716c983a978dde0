use crate::database::{Database, new_id, now};
use crate::models::{
    ConnectionParams, DatabaseTarget, EngineKind, NewTarget, TargetUpdate, TargetWithSecret,
};
use crate::connectivity::ConnectionTester;
use crate::vault::CredentialVault;
use crate::{BackupError, Result};
use std::sync::Arc;
use tracing::{info, instrument};

/// 备份目标管理
///
/// 密码在写入前加密，对外返回的目标一律不含密码。
#[derive(Clone)]
pub struct TargetManager {
    database: Database,
    vault: Arc<CredentialVault>,
    tester: ConnectionTester,
}

impl TargetManager {
    pub fn new(database: Database, vault: Arc<CredentialVault>, tester: ConnectionTester) -> Self {
        Self {
            database,
            vault,
            tester,
        }
    }

    #[instrument(skip_all, fields(name = %input.name))]
    pub async fn create(&self, input: NewTarget) -> Result<DatabaseTarget> {
        validate_name(&input.name)?;
        let conn = &input.connection;
        validate_connection(conn.engine, &conn.host, conn.port, &conn.database_name)?;

        let encrypted = self.vault.encrypt(&input.connection.password)?;
        let now = now();
        let target = DatabaseTarget {
            id: new_id(),
            name: input.name,
            engine: input.connection.engine,
            host: input.connection.host,
            port: input.connection.port,
            username: input.connection.username,
            database_name: input.connection.database_name,
            created_at: now,
            updated_at: now,
        };

        self.database.create_target(&target, &encrypted).await?;
        info!("已创建备份目标 {} ({})", target.name, target.id);
        Ok(target)
    }

    pub async fn list(&self) -> Result<Vec<DatabaseTarget>> {
        self.database.list_targets().await
    }

    pub async fn get(&self, id: &str) -> Result<DatabaseTarget> {
        self.database
            .get_target(id)
            .await?
            .ok_or_else(|| BackupError::TargetNotFound(id.to_string()))
    }

    /// 部分更新，只有提供新密码时才重新加密
    #[instrument(skip_all, fields(target_id = %id))]
    pub async fn update(&self, id: &str, update: TargetUpdate) -> Result<DatabaseTarget> {
        let TargetWithSecret {
            mut target,
            mut encrypted_secret,
        } = self
            .database
            .get_target_with_secret(id)
            .await?
            .ok_or_else(|| BackupError::TargetNotFound(id.to_string()))?;

        if let Some(name) = update.name {
            validate_name(&name)?;
            target.name = name;
        }
        if let Some(engine) = update.engine {
            target.engine = engine;
        }
        if let Some(host) = update.host {
            target.host = host;
        }
        if let Some(port) = update.port {
            target.port = port;
        }
        if let Some(username) = update.username {
            target.username = username;
        }
        if let Some(database_name) = update.database_name {
            target.database_name = database_name;
        }
        validate_connection(target.engine, &target.host, target.port, &target.database_name)?;

        if let Some(password) = update.password {
            encrypted_secret = self.vault.encrypt(&password)?;
        }
        target.updated_at = now();

        let saved = TargetWithSecret {
            target,
            encrypted_secret,
        };
        if !self.database.update_target(&saved).await? {
            return Err(BackupError::TargetNotFound(id.to_string()));
        }
        info!("已更新备份目标 {}", id);
        Ok(saved.target)
    }

    /// 删除目标，仍被任务引用时拒绝
    pub async fn delete(&self, id: &str) -> Result<()> {
        if !self.database.delete_target(id).await? {
            return Err(BackupError::TargetNotFound(id.to_string()));
        }
        info!("已删除备份目标 {}", id);
        Ok(())
    }

    /// 用给定参数检测连通性，不读写存储
    pub async fn test_connection(&self, params: &ConnectionParams) -> Result<()> {
        self.tester.check(params).await
    }

    /// 用已保存的目标配置检测连通性
    pub async fn test_saved(&self, id: &str) -> Result<()> {
        let saved = self
            .database
            .get_target_with_secret(id)
            .await?
            .ok_or_else(|| BackupError::TargetNotFound(id.to_string()))?;
        let secret = self.vault.decrypt(&saved.encrypted_secret)?;

        let params = ConnectionParams {
            engine: saved.target.engine,
            host: saved.target.host,
            port: saved.target.port,
            username: saved.target.username,
            password: secret.expose().to_string(),
            database_name: saved.target.database_name,
        };
        self.tester.check(&params).await
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(BackupError::invalid_input("名称不能为空"));
    }
    Ok(())
}

fn validate_connection(
    engine: EngineKind,
    host: &str,
    port: u16,
    database_name: &str,
) -> Result<()> {
    if host.trim().is_empty() {
        return Err(BackupError::invalid_input("主机不能为空"));
    }
    // SQLite 没有网络端口
    if port == 0 && engine.default_port().is_some() {
        return Err(BackupError::invalid_input("端口必须大于 0"));
    }
    if database_name.trim().is_empty() {
        return Err(BackupError::invalid_input("数据库名不能为空"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::job;

    async fn manager() -> (TargetManager, Database, Arc<CredentialVault>) {
        let database = Database::connect_memory().await.unwrap();
        let vault = Arc::new(CredentialVault::new("test-key").unwrap());
        let manager = TargetManager::new(database.clone(), vault.clone(), ConnectionTester::default());
        (manager, database, vault)
    }

    fn new_target(name: &str) -> NewTarget {
        NewTarget {
            name: name.to_string(),
            connection: ConnectionParams {
                engine: EngineKind::Postgres,
                host: "db.internal".to_string(),
                port: 5432,
                username: "backup".to_string(),
                password: "s3cret".to_string(),
                database_name: "shop".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_create_encrypts_password() {
        let (manager, database, vault) = manager().await;
        let target = manager.create(new_target("shop")).await.unwrap();

        assert_eq!(manager.get(&target.id).await.unwrap(), target);
        assert_eq!(manager.list().await.unwrap(), vec![target.clone()]);

        let saved = database.get_target_with_secret(&target.id).await.unwrap().unwrap();
        assert_ne!(saved.encrypted_secret, "s3cret");
        assert_eq!(vault.decrypt(&saved.encrypted_secret).unwrap().expose(), "s3cret");
    }

    #[tokio::test]
    async fn test_create_rejects_blank_fields() {
        let (manager, _, _) = manager().await;

        let mut input = new_target(" ");
        assert!(matches!(
            manager.create(input.clone()).await,
            Err(BackupError::InvalidInput(_))
        ));

        input.name = "shop".to_string();
        input.connection.port = 0;
        assert!(matches!(
            manager.create(input).await,
            Err(BackupError::InvalidInput(_))
        ));
        assert!(manager.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_keeps_secret_unless_given() {
        let (manager, database, vault) = manager().await;
        let target = manager.create(new_target("shop")).await.unwrap();
        let before = database.get_target_with_secret(&target.id).await.unwrap().unwrap();

        let updated = manager
            .update(
                &target.id,
                TargetUpdate {
                    host: Some("db2.internal".to_string()),
                    port: Some(6432),
                    ..TargetUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.host, "db2.internal");
        assert_eq!(updated.port, 6432);
        assert_eq!(updated.name, "shop");
        assert!(updated.updated_at >= target.updated_at);

        let after = database.get_target_with_secret(&target.id).await.unwrap().unwrap();
        assert_eq!(after.encrypted_secret, before.encrypted_secret);

        manager
            .update(
                &target.id,
                TargetUpdate {
                    password: Some("rotated".to_string()),
                    ..TargetUpdate::default()
                },
            )
            .await
            .unwrap();
        let rotated = database.get_target_with_secret(&target.id).await.unwrap().unwrap();
        assert_eq!(vault.decrypt(&rotated.encrypted_secret).unwrap().expose(), "rotated");

        assert!(matches!(
            manager.update("missing", TargetUpdate::default()).await,
            Err(BackupError::TargetNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_refused_while_referenced() {
        let (manager, database, _) = manager().await;
        let target = manager.create(new_target("shop")).await.unwrap();
        let j = job(&target.id, "/tmp/backups");
        database.create_job(&j).await.unwrap();

        assert!(matches!(
            manager.delete(&target.id).await,
            Err(BackupError::TargetInUse { jobs: 1 })
        ));

        database.delete_job(&j.id).await.unwrap();
        manager.delete(&target.id).await.unwrap();
        assert!(matches!(
            manager.get(&target.id).await,
            Err(BackupError::TargetNotFound(_))
        ));
        assert!(matches!(
            manager.delete(&target.id).await,
            Err(BackupError::TargetNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_saved_sqlite_target_is_unsupported() {
        let (manager, _, _) = manager().await;
        let mut input = new_target("local");
        input.connection.engine = EngineKind::Sqlite;
        let target = manager.create(input).await.unwrap();

        assert!(matches!(
            manager.test_saved(&target.id).await,
            Err(BackupError::UnsupportedEngine(_))
        ));
        assert!(matches!(
            manager.test_saved("missing").await,
            Err(BackupError::TargetNotFound(_))
        ));
    }
}
