use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

type RunError = Box<dyn std::error::Error + Send + Sync>;

/// massdns二进制的常见安装位置
const BINARY_LOCATIONS: [&str; 2] = ["/usr/bin/massdns", "/usr/local/bin/massdns"];

/// 一次massdns执行的产物
#[derive(Debug)]
pub struct MassdnsOutput {
    /// 标准输出落盘的临时文件
    pub stdout_path: PathBuf,
    /// 保留标准错误时的临时文件
    pub stderr_path: Option<PathBuf>,
    /// 执行耗时
    pub elapsed: Duration,
}

/// 外部massdns驱动
///
/// 每个分块起一个massdns子进程，标准输出重定向到新的临时文件，
/// 标准错误默认丢弃。取消时杀掉子进程。
pub struct MassdnsRunner {
    binary_path: PathBuf,
    resolvers_file: PathBuf,
    threads: usize,
    extra_args: Option<String>,
    keep_stderr: bool,
    temp_dir: PathBuf,
}

impl MassdnsRunner {
    /// 创建驱动
    pub fn new(
        binary_path: PathBuf,
        resolvers_file: PathBuf,
        threads: usize,
        extra_args: Option<String>,
        keep_stderr: bool,
        temp_dir: PathBuf,
    ) -> Self {
        MassdnsRunner {
            binary_path,
            resolvers_file,
            threads,
            extra_args,
            keep_stderr,
            temp_dir,
        }
    }

    /// 在预定义路径中寻找massdns二进制
    pub fn find_binary() -> Option<PathBuf> {
        BINARY_LOCATIONS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }

    /// 对一个分块文件执行massdns
    ///
    /// 返回标准输出文件路径、可选的标准错误文件路径和耗时；
    /// 非零退出码视为错误，保留的stderr内容并入错误信息。
    pub async fn run(
        &self,
        input_file: &Path,
        cancel: &CancellationToken,
    ) -> Result<MassdnsOutput, RunError> {
        let (stdout_file, stdout_path) = tempfile::Builder::new()
            .prefix("massdns-stdout-")
            .tempfile_in(&self.temp_dir)
            .map_err(|e| format!("无法创建massdns输出文件: {}", e))?
            .keep()?;

        let mut stderr_path = None;
        let stderr = if self.keep_stderr {
            let (file, path) = tempfile::Builder::new()
                .prefix("massdns-stderr-")
                .tempfile_in(&self.temp_dir)
                .map_err(|e| format!("无法创建massdns错误输出文件: {}", e))?
                .keep()?;
            stderr_path = Some(path);
            Stdio::from(file)
        } else {
            Stdio::null()
        };

        let mut cmd = Command::new(&self.binary_path);
        cmd.arg("-r")
            .arg(&self.resolvers_file)
            .arg("-o")
            .arg("Snl")
            .arg("--retry")
            .arg("REFUSED")
            .arg("--retry")
            .arg("SERVFAIL")
            .arg("-t")
            .arg("A")
            .arg(input_file)
            .arg("-s")
            .arg(self.threads.to_string());

        if let Some(extra) = &self.extra_args {
            for token in extra.split_whitespace() {
                cmd.arg(token);
            }
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(stdout_file))
            .stderr(stderr)
            .kill_on_drop(true);

        let start = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| format!("无法启动massdns {}: {}", self.binary_path.display(), e))?;

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err("massdns执行被取消".into());
            }
        };
        let elapsed = start.elapsed();

        if !status.success() {
            let stderr_text = stderr_path
                .as_ref()
                .and_then(|path| std::fs::read_to_string(path).ok())
                .unwrap_or_default();
            return Err(format!(
                "massdns执行失败: {}，stderr: {}",
                status,
                stderr_text.trim()
            )
            .into());
        }

        Ok(MassdnsOutput {
            stdout_path,
            stderr_path,
            elapsed,
        })
    }
}
