//! Bash 工具：持久化 /bin/bash 会话
//!
//! 命令在当前 shell 中以命令组执行（环境变量与工作目录跨调用保留），后接带退出码的哨兵横幅；每 0.2 秒轮询输出直至看到哨兵。
//! 超时后会话被标记为不可用，必须以 restart=true 重启。设置数据目录时，
//! 访问文件的命令只允许使用数据目录下的绝对路径。

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::core::ToolError;
use crate::tools::registry::{Tool, ToolArguments, ToolOutput, ToolParameter};

const SENTINEL_BEFORE: &str = ",,,,bash-command-exit-";
const SENTINEL_AFTER: &str = "-banner,,,,";
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// 禁止的子串
const FORBIDDEN_SUBSTR: &[&str] = &[
    "rm -rf /*",
    "rm -rf ~",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    "curl | sh",
    "wget | sh",
    ":(){ :|:& };:",
];

/// 会访问文件系统、需要做目录约束检查的命令
const FILE_COMMANDS: &[&str] = &[
    "ls", "cat", "find", "grep", "head", "tail", "less", "more", "cd", "pwd", "touch", "mkdir", "rm", "mv", "cp",
];

type SharedBuf = Arc<StdMutex<Vec<u8>>>;

fn spawn_reader<R>(mut reader: R, buf: SharedBuf) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => buf
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .extend_from_slice(&chunk[..n]),
            }
        }
    })
}

fn take_text(buf: &SharedBuf) -> String {
    let mut guard = buf.lock().unwrap_or_else(|e| e.into_inner());
    let text = String::from_utf8_lossy(&guard).to_string();
    guard.clear();
    text
}

fn peek_text(buf: &SharedBuf) -> String {
    String::from_utf8_lossy(&buf.lock().unwrap_or_else(|e| e.into_inner())).to_string()
}

/// 从输出中找到最后一个哨兵，返回（哨兵前的输出，退出码）
fn split_sentinel(output: &str) -> Option<(String, i32)> {
    let idx = output.rfind(SENTINEL_BEFORE)?;
    let banner = &output[idx + SENTINEL_BEFORE.len()..];
    let end = banner.find(SENTINEL_AFTER)?;
    let code = &banner[..end];
    if code.is_empty() || !code.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((output[..idx].to_string(), code.parse().ok()?))
}

fn strip_trailing_newline(mut s: String) -> String {
    if s.ends_with('\n') {
        s.pop();
    }
    s
}

struct BashSession {
    child: Child,
    stdin: ChildStdin,
    stdout: SharedBuf,
    stderr: SharedBuf,
    readers: Vec<JoinHandle<()>>,
    timed_out: bool,
}

impl BashSession {
    fn start() -> Result<Self, ToolError> {
        let mut child = Command::new("/bin/bash")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let stdin = child.stdin.take().ok_or(ToolError::NotStarted)?;
        let out = child.stdout.take().ok_or(ToolError::NotStarted)?;
        let err = child.stderr.take().ok_or(ToolError::NotStarted)?;
        let stdout: SharedBuf = Arc::default();
        let stderr: SharedBuf = Arc::default();
        let readers = vec![spawn_reader(out, stdout.clone()), spawn_reader(err, stderr.clone())];
        Ok(Self {
            child,
            stdin,
            stdout,
            stderr,
            readers,
            timed_out: false,
        })
    }

    async fn stop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.start_kill();
            if tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await.is_err() {
                tracing::warn!("bash session did not exit within 5s");
            }
        }
        for reader in self.readers.drain(..) {
            reader.abort();
        }
    }

    async fn run(&mut self, command: &str, timeout: Duration) -> Result<ToolOutput, ToolError> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(ToolOutput::err(format!(
                "bash 已退出，返回码 {}。工具必须重启。",
                status.code().unwrap_or(-1)
            )));
        }
        if self.timed_out {
            return Err(ToolError::Timeout { secs: timeout.as_secs() });
        }

        let wrapped = format!("{{\n{}\n}}; echo {}$?{}\n", command, SENTINEL_BEFORE, SENTINEL_AFTER);
        self.stdin.write_all(wrapped.as_bytes()).await?;
        self.stdin.flush().await?;

        let stdout = self.stdout.clone();
        let waited = tokio::time::timeout(timeout, async move {
            loop {
                tokio::time::sleep(POLL_INTERVAL).await;
                if let Some(found) = split_sentinel(&peek_text(&stdout)) {
                    return found;
                }
            }
        })
        .await;

        let (output, error_code) = match waited {
            Ok(found) => found,
            Err(_) => {
                self.timed_out = true;
                return Err(ToolError::Timeout { secs: timeout.as_secs() });
            }
        };
        take_text(&self.stdout);
        let stderr = strip_trailing_newline(take_text(&self.stderr));
        let output = strip_trailing_newline(output);

        if error_code == 0 {
            let output = if stderr.is_empty() {
                output
            } else {
                format!("{}\nstderr: {}", output, stderr)
            };
            return Ok(ToolOutput::ok(output));
        }
        Ok(ToolOutput {
            output: Some(output),
            error: Some(stderr),
            error_code,
        })
    }
}

/// 词法规范化（处理 . 与 ..），不访问文件系统
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

fn resolve(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| normalize_lexically(path))
}

/// Bash 工具
pub struct BashTool {
    session: Mutex<Option<BashSession>>,
    data_dir: Option<PathBuf>,
    timeout: Duration,
    description: String,
}

impl BashTool {
    pub fn new(data_dir: Option<PathBuf>, timeout_secs: u64) -> Self {
        let data_dir = data_dir.map(|d| resolve(&d));
        let description = Self::build_description(data_dir.as_deref());
        Self {
            session: Mutex::new(None),
            data_dir,
            timeout: Duration::from_secs(timeout_secs),
            description,
        }
    }

    fn build_description(data_dir: Option<&Path>) -> String {
        let mut desc = String::from(
            "在 bash shell 中运行命令\n\
             * 状态在多次调用之间保持持久\n\
             * 查看文件的特定行范围，例如第 10-25 行，请使用 'sed -n 10,25p /path/to/the/file'\n\
             * 请避免可能产生大量输出的命令\n\
             * 长时间运行的命令请放到后台，例如 'sleep 10 &'\n\
             * 使用 python3 -c 时，不要在 f-string 中直接写字典访问，先提取变量再格式化\n",
        );
        if let Some(dir) = data_dir {
            let dir = dir.display();
            desc.push_str(&format!(
                "\n**重要约束**：所有文件操作必须在数据目录及其子目录下进行\n\
                 * 数据目录：{dir}\n\
                 * **必须使用绝对路径**，例如 `ls {dir}`、`cat {dir}/README.md`、`find {dir} -name '*.csv'`\n\
                 * **禁止**：不带路径的 `ls`、`pwd` 等命令，以及数据目录外的路径\n"
            ));
        }
        desc
    }

    fn check_forbidden(command: &str) -> Result<(), String> {
        let lower = command.to_lowercase();
        match FORBIDDEN_SUBSTR.iter().find(|f| lower.contains(*f)) {
            Some(f) => Err(format!("错误：命令包含禁止的操作 '{}'", f)),
            None => Ok(()),
        }
    }

    /// 数据目录约束：文件类命令的路径参数必须是数据目录下的绝对路径
    fn check_confinement(&self, command: &str) -> Result<(), String> {
        let Some(data_dir) = &self.data_dir else {
            return Ok(());
        };
        let words: Vec<&str> = command.split_whitespace().collect();
        let Some(first) = words.first() else {
            return Ok(());
        };
        if !FILE_COMMANDS.contains(first) {
            return Ok(());
        }

        let paths: Vec<&str> = words[1..]
            .iter()
            .copied()
            .filter(|w| !w.starts_with('-'))
            .filter(|w| w.contains('/') || w.starts_with('.') || w.ends_with('/'))
            .collect();
        let dir = data_dir.display();

        if paths.is_empty() {
            if matches!(*first, "ls" | "pwd" | "cd") {
                return Err(format!(
                    "错误：命令 '{command}' 没有指定数据目录路径。\n\
                     所有文件操作必须在数据目录及其子目录下进行：{dir}\n\
                     请使用绝对路径，例如：`ls {dir}` 或 `ls {dir}/example`"
                ));
            }
            return Ok(());
        }

        let invalid: Vec<&str> = paths
            .into_iter()
            .filter(|p| {
                let path = Path::new(p);
                !path.is_absolute() || !resolve(path).starts_with(data_dir)
            })
            .collect();
        if invalid.is_empty() {
            return Ok(());
        }
        Err(format!(
            "错误：命令 '{command}' 中的以下路径不在数据目录下：{}\n\
             所有文件操作必须在数据目录及其子目录下进行：{dir}\n\
             请使用数据目录下的绝对路径，例如：`ls {dir}`、`cat {dir}/README.md`",
            invalid.join(", ")
        ))
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("command", "string", "要运行的 bash 命令"),
            ToolParameter::optional("restart", "boolean", "设置为 true 以重启 bash 会话"),
        ]
    }

    async fn execute(&self, args: &ToolArguments) -> Result<ToolOutput, ToolError> {
        let mut guard = self.session.lock().await;

        if args.get("restart").and_then(|v| v.as_bool()).unwrap_or(false) {
            if let Some(mut old) = guard.take() {
                old.stop().await;
            }
            *guard = Some(BashSession::start()?);
            tracing::info!("bash session restarted");
            return Ok(ToolOutput::ok("工具已重启"));
        }

        let command = match args.get("command").and_then(|v| v.as_str()).map(str::trim) {
            Some(c) if !c.is_empty() => c.to_string(),
            _ => return Ok(ToolOutput::err(format!("未为 {} 工具提供命令", self.name()))),
        };
        if let Err(e) = Self::check_forbidden(&command).and_then(|_| self.check_confinement(&command)) {
            return Ok(ToolOutput::err(e));
        }

        if guard.is_none() {
            match BashSession::start() {
                Ok(session) => *guard = Some(session),
                Err(e) => return Ok(ToolOutput::err(format!("启动 bash 会话时出错: {}", e))),
            }
        }
        let session = guard.as_mut().ok_or(ToolError::NotStarted)?;

        tracing::info!(command = %command, "bash tool execute");
        match session.run(&command, self.timeout).await {
            Ok(output) => Ok(output),
            Err(e @ ToolError::Timeout { .. }) => Err(e),
            Err(e) => Ok(ToolOutput::err(format!("运行 bash 命令时出错: {}", e))),
        }
    }

    async fn close(&self) -> Result<(), ToolError> {
        if let Some(mut session) = self.session.lock().await.take() {
            session.stop().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(v: serde_json::Value) -> ToolArguments {
        match v {
            serde_json::Value::Object(m) => m,
            _ => ToolArguments::new(),
        }
    }

    #[test]
    fn test_split_sentinel() {
        let out = format!("hello\n{}0{}\n", SENTINEL_BEFORE, SENTINEL_AFTER);
        assert_eq!(split_sentinel(&out), Some(("hello\n".to_string(), 0)));
        let out = format!("x{}12{}", SENTINEL_BEFORE, SENTINEL_AFTER);
        assert_eq!(split_sentinel(&out), Some(("x".to_string(), 12)));
        assert_eq!(split_sentinel("no banner yet"), None);
        assert_eq!(split_sentinel(&format!("{}1", SENTINEL_BEFORE)), None);
    }

    #[test]
    fn test_confinement_rejects_bare_ls_and_outside_paths() {
        let dir = tempfile::tempdir().unwrap();
        let tool = BashTool::new(Some(dir.path().to_path_buf()), 5);
        assert!(tool.check_confinement("ls").is_err());
        assert!(tool.check_confinement("cat /etc/passwd").is_err());
        assert!(tool.check_confinement("cat ./relative.txt").is_err());
        let inside = format!("ls {}", dir.path().display());
        assert!(tool.check_confinement(&inside).is_ok());
        let escape = format!("cat {}/../x", dir.path().display());
        assert!(tool.check_confinement(&escape).is_err());
        assert!(tool.check_confinement("echo hi").is_ok());
    }

    #[test]
    fn test_forbidden_patterns() {
        assert!(BashTool::check_forbidden("rm -rf /*").is_err());
        assert!(BashTool::check_forbidden("echo ok").is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_session_keeps_state_and_reports_exit_code() {
        let tool = BashTool::new(None, 10);
        let out = tool.execute(&args(json!({"command": "export FOO=bar"}))).await.unwrap();
        assert!(out.is_success());
        let out = tool.execute(&args(json!({"command": "echo $FOO"}))).await.unwrap();
        assert_eq!(out.output.as_deref(), Some("bar"));
        let out = tool.execute(&args(json!({"command": "ls /definitely/missing/dir"}))).await.unwrap();
        assert!(!out.is_success());
        assert_ne!(out.error_code, 0);
        tool.close().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_marks_session_unusable_until_restart() {
        let tool = BashTool::new(None, 1);
        let err = tool.execute(&args(json!({"command": "sleep 3"}))).await;
        assert!(matches!(err, Err(ToolError::Timeout { .. })));
        let err = tool.execute(&args(json!({"command": "echo again"}))).await;
        assert!(matches!(err, Err(ToolError::Timeout { .. })));
        let out = tool.execute(&args(json!({"command": "", "restart": true}))).await.unwrap();
        assert_eq!(out.output.as_deref(), Some("工具已重启"));
        let out = tool.execute(&args(json!({"command": "echo again"}))).await.unwrap();
        assert_eq!(out.output.as_deref(), Some("again"));
        tool.close().await.unwrap();
    }
}
