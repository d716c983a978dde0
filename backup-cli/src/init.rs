use anyhow::{Context, Result};
use backup_core::{config::AppConfig, constants::config::ENCRYPTION_KEY_ENV, database::Database};
use std::path::Path;
use tracing::{info, warn};

/// 运行独立的初始化流程，不需要加密密钥
pub async fn run_init(config_path: &Path, force: bool) -> Result<()> {
    info!("🗄️  数据库备份管理器初始化");
    info!("======================");

    if config_path.exists() && !force {
        warn!("⚠️  配置文件已存在: {}", config_path.display());
        info!("如果您要重新初始化，请使用 --force 参数");
        info!("示例: backup-cli init --force");
        return Ok(());
    }

    info!("📋 步骤 1: 创建配置文件和目录结构");
    let config = AppConfig::default();
    config
        .save_to_file(config_path)
        .with_context(|| format!("无法写入配置文件 {}", config_path.display()))?;
    info!("   ✅ 创建配置文件: {}", config_path.display());

    let storage_dir = config.get_default_storage_dir();
    std::fs::create_dir_all(&storage_dir)?;
    info!("   ✅ 创建备份目录: {}", storage_dir.display());

    info!("📋 步骤 2: 初始化数据库");
    let store_path = config.get_store_path();
    Database::connect(&store_path).await?;
    info!("   ✅ 创建DuckDB数据库: {}", store_path.display());

    info!("🎉 初始化完成");
    if std::env::var(ENCRYPTION_KEY_ENV).is_err() {
        warn!("⚠️  尚未设置 {}，其他命令需要它来加密数据库密码", ENCRYPTION_KEY_ENV);
        info!("💡 可以写入 .env 文件: {}=<随机字符串>", ENCRYPTION_KEY_ENV);
    }
    info!("💡 下一步: backup-cli target add --help");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_respects_existing_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "# custom\n").unwrap();

        run_init(&path, false).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# custom\n");
    }
}
