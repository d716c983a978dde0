use crate::constants::runner::{COPY_BUFFER_SIZE, DEFAULT_STDERR_LIMIT};
use crate::{BackupError, Result};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

/// 命令行参数中需要脱敏的前缀
const SECRET_ARG_PREFIX: &str = "--password=";

/// 外部命令执行计划
///
/// 由驱动生成，不做任何 I/O。`Debug` 与 [`CommandPlan::display_command`]
/// 都不会输出密码。
#[derive(Clone, Default)]
pub struct CommandPlan {
    pub program: String,
    pub args: Vec<String>,
    /// 附加环境变量，叠加在继承的环境之上
    pub env: Vec<(String, String)>,
    /// 将该文件内容写入子进程 stdin
    pub stdin_from: Option<PathBuf>,
    /// 将子进程 stdout 写入该文件
    pub stdout_to: Option<PathBuf>,
}

impl CommandPlan {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin_from(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin_from = Some(path.into());
        self
    }

    pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout_to = Some(path.into());
        self
    }

    /// 脱敏后的命令行，用于日志
    pub fn display_command(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 3);
        parts.push(self.program.clone());
        parts.extend(self.args.iter().map(|arg| redact_arg(arg)));
        if let Some(path) = &self.stdin_from {
            parts.push(format!("< {}", path.display()));
        }
        if let Some(path) = &self.stdout_to {
            parts.push(format!("> {}", path.display()));
        }
        parts.join(" ")
    }
}

fn redact_arg(arg: &str) -> String {
    if arg.starts_with(SECRET_ARG_PREFIX) {
        format!("{SECRET_ARG_PREFIX}***")
    } else {
        arg.to_string()
    }
}

impl fmt::Debug for CommandPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self.args.iter().map(|arg| redact_arg(arg)).collect();
        let env: Vec<String> = self.env.iter().map(|(k, _)| format!("{k}=***")).collect();
        f.debug_struct("CommandPlan")
            .field("program", &self.program)
            .field("args", &args)
            .field("env", &env)
            .field("stdin_from", &self.stdin_from)
            .field("stdout_to", &self.stdout_to)
            .finish()
    }
}

/// 命令成功执行后的输出
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// 写入 `stdout_to` 的字节数
    pub stdout_bytes: u64,
    /// stderr 内容（已截断到上限）
    pub stderr: String,
}

/// 外部命令执行器
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// 执行命令，退出码 0 视为成功
    async fn run(&self, plan: &CommandPlan) -> Result<ProcessOutput>;
}

/// 基于 `tokio::process` 的系统命令执行器
#[derive(Debug, Clone)]
pub struct SystemRunner {
    stderr_limit: usize,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new(DEFAULT_STDERR_LIMIT)
    }
}

impl SystemRunner {
    pub fn new(stderr_limit: usize) -> Self {
        Self { stderr_limit }
    }

    fn spawn_failed(plan: &CommandPlan, cause: impl fmt::Display) -> BackupError {
        BackupError::SpawnFailed {
            program: plan.program.clone(),
            cause: cause.to_string(),
        }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, plan: &CommandPlan) -> Result<ProcessOutput> {
        let program_path =
            which::which(&plan.program).map_err(|e| Self::spawn_failed(plan, e))?;
        debug!("执行外部命令: {}", plan.display_command());

        let stdin_file = match &plan.stdin_from {
            Some(path) => Some(File::open(path).await?),
            None => None,
        };
        let stdout_file = match &plan.stdout_to {
            Some(path) => Some(File::create(path).await?),
            None => None,
        };

        let mut command = Command::new(&program_path);
        command
            .args(&plan.args)
            .envs(plan.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if stdin_file.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(if stdout_file.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| Self::spawn_failed(plan, e))?;

        let stdin_pipe = child.stdin.take();
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        let (stdin_result, stdout_result, stderr_result, status) = tokio::join!(
            feed_stdin(stdin_file, stdin_pipe),
            drain_stdout(stdout_pipe, stdout_file),
            read_bounded(stderr_pipe, self.stderr_limit),
            child.wait()
        );

        let status = status?;
        let stderr = match stderr_result {
            Ok(bytes) => String::from_utf8_lossy(&bytes).trim().to_string(),
            Err(e) => {
                warn!("读取 {} 的 stderr 失败: {}", plan.program, e);
                String::new()
            }
        };

        if !status.success() {
            return Err(BackupError::ProcessFailed {
                program: plan.program.clone(),
                exit_code: status.code(),
                stderr,
            });
        }

        if let Err(e) = stdin_result {
            // 进程提前关闭 stdin 且正常退出，视为已消费完所需输入
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(e.into());
            }
            debug!("{} 提前关闭了 stdin", plan.program);
        }
        let stdout_bytes = stdout_result?;

        Ok(ProcessOutput {
            stdout_bytes,
            stderr,
        })
    }
}

async fn feed_stdin(file: Option<File>, pipe: Option<ChildStdin>) -> std::io::Result<()> {
    let (Some(mut file), Some(mut pipe)) = (file, pipe) else {
        return Ok(());
    };
    tokio::io::copy(&mut file, &mut pipe).await?;
    // 关闭管道，子进程才能读到 EOF
    pipe.shutdown().await
}

async fn drain_stdout(pipe: Option<ChildStdout>, file: Option<File>) -> std::io::Result<u64> {
    let (Some(mut pipe), Some(mut file)) = (pipe, file) else {
        return Ok(0);
    };
    let written = tokio::io::copy(&mut pipe, &mut file).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

/// 读取到 EOF，只保留前 `limit` 字节，避免子进程因管道写满而阻塞
async fn read_bounded<R: AsyncRead + Unpin>(
    reader: Option<R>,
    limit: usize,
) -> std::io::Result<Vec<u8>> {
    let mut kept = Vec::new();
    let Some(mut reader) = reader else {
        return Ok(kept);
    };
    let mut chunk = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        let room = limit.saturating_sub(kept.len());
        kept.extend_from_slice(&chunk[..read.min(room)]);
    }
    Ok(kept)
}

/// 检查外部命令是否可用
pub fn command_available(program: &str) -> bool {
    which::which(program).is_ok()
}

/// 删除文件，不存在时忽略
pub(crate) async fn remove_if_exists(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("已清理文件: {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("清理文件 {} 失败: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_command_hides_password() {
        let plan = CommandPlan::new("mysqldump")
            .arg("--host=db")
            .arg("--password=hunter2")
            .arg("shop")
            .env("PGPASSWORD", "hunter2")
            .stdout_to("/tmp/out.sql");
        let display = plan.display_command();
        assert!(!display.contains("hunter2"));
        assert!(display.contains("--password=***"));
        assert!(display.ends_with("> /tmp/out.sql"));
        assert!(!format!("{plan:?}").contains("hunter2"));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_failure() {
        let plan = CommandPlan::new("definitely-not-a-real-binary-4821");
        let err = SystemRunner::default().run(&plan).await.unwrap_err();
        assert!(matches!(err, BackupError::SpawnFailed { ref program, .. } if program == "definitely-not-a-real-binary-4821"));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_available() {
        assert!(command_available("sh"));
        assert!(!command_available("definitely-not-a-real-binary-4821"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdout_is_streamed_to_file_with_env() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let plan = CommandPlan::new("sh")
            .arg("-c")
            .arg("printf '%s' \"$BACKUP_TEST_VALUE\"")
            .env("BACKUP_TEST_VALUE", "from-env")
            .stdout_to(&out);

        let output = SystemRunner::default().run(&plan).await.unwrap();
        assert_eq!(output.stdout_bytes, 8);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "from-env");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdin_and_stdout_streaming() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.sql");
        let out = dir.path().join("out.sql");
        let content: String = (0..5000).map(|i| format!("INSERT INTO t VALUES ({i});\n")).collect();
        std::fs::write(&input, &content).unwrap();

        let plan = CommandPlan::new("cat").stdin_from(&input).stdout_to(&out);
        SystemRunner::default().run(&plan).await.unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), content);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_reports_stderr() {
        let plan = CommandPlan::new("sh").arg("-c").arg("echo boom >&2; exit 3");
        match SystemRunner::default().run(&plan).await {
            Err(BackupError::ProcessFailed {
                program,
                exit_code,
                stderr,
            }) => {
                assert_eq!(program, "sh");
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stderr_is_bounded() {
        let plan = CommandPlan::new("sh")
            .arg("-c")
            .arg("i=0; while [ $i -lt 2000 ]; do echo 0123456789abcdef >&2; i=$((i+1)); done; exit 1");
        let err = SystemRunner::new(1024).run(&plan).await.unwrap_err();
        match err {
            BackupError::ProcessFailed { stderr, .. } => assert!(stderr.len() <= 1024),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_remove_if_exists_ignores_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.sql");
        remove_if_exists(&path).await;
        std::fs::write(&path, "x").unwrap();
        remove_if_exists(&path).await;
        assert!(!path.exists());
    }
}
