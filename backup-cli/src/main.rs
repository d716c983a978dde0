use backup_cli::{Cli, Commands, execute, load_environment, run_init, serve, setup_logging};
use backup_core::BackupError;
use backup_core::constants::config::ENCRYPTION_KEY_ENV;
use clap::Parser;
use tracing::error;

#[tokio::main]
async fn main() {
    // .env 中的变量（加密密钥、日志文件）
    let _ = dotenvy::dotenv();

    // 解析命令行参数
    let cli = Cli::parse();

    // 设置日志记录，guard 需要存活到退出前
    let guard = setup_logging(cli.verbose);

    let code = run(cli).await;

    drop(guard);
    std::process::exit(code);
}

async fn run(cli: Cli) -> i32 {
    // `init` 命令是特例，它不需要预先加载配置和密钥
    if let Commands::Init { force } = cli.command {
        if let Err(e) = run_init(&cli.config, force).await {
            error!("❌ 初始化失败: {:#}", e);
            return 1;
        }
        return 0;
    }

    let (config, vault) = match load_environment(&cli.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            match e.downcast_ref::<BackupError>() {
                Some(BackupError::MissingEncryptionKey(_)) => {
                    error!("❌ 未设置加密密钥 {}", ENCRYPTION_KEY_ENV);
                    error!("👉 请在环境变量或 .env 文件中设置后重试。");
                }
                Some(BackupError::Config(_)) => {
                    error!("❌ 配置文件 '{}' 格式错误: {}", cli.config.display(), e);
                }
                _ => error!("❌ 应用初始化失败: {:#}", e),
            }
            return 1;
        }
    };

    let result = match cli.command {
        Commands::Serve => serve(config, vault).await,
        command => execute(config, vault, cli.json, command).await,
    };

    if let Err(e) = result {
        error!("❌ 操作失败: {:#}", e);
        return 1;
    }
    0
}
