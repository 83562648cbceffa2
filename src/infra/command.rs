//! 命令执行器
//!
//! 提供统一的外部命令执行接口，支持：
//! - 超时控制
//! - 标准输入写入
//! - 日志行的惰性流式读取
//! - stdout 原样写入文件（二进制安全）
//! - stdout/stderr 分离

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use futures::stream::{BoxStream, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, error};

use crate::domain::release::LogLine;

/// 命令执行器
pub struct CommandRunner;

/// 命令执行错误
#[derive(Debug)]
pub enum CommandError {
    /// 命令启动失败
    SpawnFailed { program: String, source: std::io::Error },
    /// 命令超时
    Timeout { program: String, after: Duration },
    /// 命令以非零状态退出
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
    /// 读写子进程管道失败
    Io(std::io::Error),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::SpawnFailed { program, source } => {
                write!(f, "Failed to spawn {}: {}", program, source)
            }
            CommandError::Timeout { program, after } => {
                write!(f, "{} timed out after {:?}", program, after)
            }
            CommandError::Failed {
                program,
                code,
                stderr,
            } => {
                let code = code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string());
                let stderr = stderr.trim();
                if stderr.is_empty() {
                    write!(f, "{} exited with {}", program, code)
                } else {
                    write!(f, "{} exited with {}: {}", program, code, stderr)
                }
            }
            CommandError::Io(e) => write!(f, "Command pipe error: {}", e),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::SpawnFailed { source, .. } => Some(source),
            CommandError::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// 命令执行结果
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl CommandRunner {
    /// 执行命令并收集输出（不检查退出码）
    pub async fn run(
        program: &str,
        args: &[&str],
        work_dir: &Path,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        Self::run_with_input(program, args, work_dir, None, timeout).await
    }

    /// 执行命令，非零退出视为错误
    pub async fn run_checked(
        program: &str,
        args: &[&str],
        work_dir: &Path,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        let output = Self::run(program, args, work_dir, timeout).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(CommandError::Failed {
                program: program.to_string(),
                code: output.code,
                stderr: output.stderr,
            })
        }
    }

    /// 执行命令，可选地写入标准输入
    pub async fn run_with_input(
        program: &str,
        args: &[&str],
        work_dir: &Path,
        input: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        debug!(program, ?args, work_dir = %work_dir.display(), "Running command");

        let mut child = Command::new(program)
            .args(args)
            .current_dir(work_dir)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CommandError::SpawnFailed {
                program: program.to_string(),
                source,
            })?;

        if let Some(input) = input {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input).await.map_err(CommandError::Io)?;
                // 关闭 stdin，让子进程看到 EOF
                drop(stdin);
            }
        }

        tokio::select! {
            result = child.wait_with_output() => {
                let output = result.map_err(CommandError::Io)?;
                Ok(CommandOutput {
                    code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
            _ = tokio::time::sleep(timeout) => {
                // kill_on_drop 负责终止子进程
                error!(program, "Command timed out after {:?}", timeout);
                Err(CommandError::Timeout { program: program.to_string(), after: timeout })
            }
        }
    }

    /// 执行命令，stdout 字节原样写入 `dest`，不经过内存缓冲或文本解码
    ///
    /// 返回值的 stdout 为空；非零退出不视为错误，由调用方判断
    pub async fn run_to_file(
        program: &str,
        args: &[&str],
        work_dir: &Path,
        dest: &Path,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        debug!(program, ?args, dest = %dest.display(), "Running command into file");

        let mut file = tokio::fs::File::create(dest).await.map_err(CommandError::Io)?;
        let mut child = Command::new(program)
            .args(args)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CommandError::SpawnFailed {
                program: program.to_string(),
                source,
            })?;

        let (mut stdout, mut stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            _ => {
                return Err(CommandError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "output not captured",
                )))
            }
        };

        let transfer = async {
            let mut errors = Vec::new();
            tokio::try_join!(tokio::io::copy(&mut stdout, &mut file), stderr.read_to_end(&mut errors))?;
            file.flush().await?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, errors))
        };

        tokio::select! {
            result = transfer => {
                let (status, errors) = result.map_err(CommandError::Io)?;
                Ok(CommandOutput {
                    code: status.code(),
                    stdout: String::new(),
                    stderr: String::from_utf8_lossy(&errors).into_owned(),
                })
            }
            _ = tokio::time::sleep(timeout) => {
                error!(program, "Command timed out after {:?}", timeout);
                Err(CommandError::Timeout { program: program.to_string(), after: timeout })
            }
        }
    }

    /// 以惰性流的形式读取命令的 stdout
    ///
    /// 流在子进程结束时终止；丢弃流会终止子进程
    pub fn stream_lines(
        program: &str,
        args: &[&str],
        work_dir: &Path,
    ) -> Result<BoxStream<'static, Result<LogLine, CommandError>>, CommandError> {
        let mut child = Command::new(program)
            .args(args)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CommandError::SpawnFailed {
                program: program.to_string(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            CommandError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "stdout not captured",
            ))
        })?;

        let lines = FramedRead::new(stdout, LinesCodec::new());
        let stream = futures::stream::unfold((lines, child), |(mut lines, child)| async move {
            match lines.next().await {
                Some(Ok(line)) => Some((Ok(LogLine::stdout(line)), (lines, child))),
                Some(Err(e)) => Some((
                    Err(CommandError::Io(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        e.to_string(),
                    ))),
                    (lines, child),
                )),
                None => None,
            }
        });

        Ok(stream.boxed())
    }

    /// 检查程序是否可执行
    pub async fn is_available(program: &str, args: &[&str], work_dir: &Path) -> bool {
        Self::run(program, args, work_dir, Duration::from_secs(15))
            .await
            .map(|o| o.success())
            .unwrap_or(false)
    }
}
