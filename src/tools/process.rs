//! 命令执行提供方：长期存活的进程会话
//!
//! start_process 启动 `sh -c <command>` 并以 PID 为键登记会话，后台任务持续把 stdout/stderr 追加到会话缓冲区；
//! interact_with_process 向 stdin 写入一行，read_process_output 返回上次读取之后的新输出，
//! force_terminate 结束会话（连同其进程组），list_sessions 列出会话；
//! list_processes / kill_process 面向系统中的任意进程。
//! 命令按 `;` `|` `&` 换行拆段，每段首词须在白名单内（白名单为空表示不限），且不得包含危险子串或命令替换。
//! 输出按字节缓存，上限之外丢弃最旧部分；单次读取超过 max_output_chars 时保留末尾并标记 ...[truncated]。

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};

use crate::core::ShutdownCleanup;
use crate::tools::{RegistryProvider, Tool, ToolRegistry};

/// 禁止的命令/子串（即使首词在白名单中也不允许）
const FORBIDDEN_SUBSTR: &[&str] = &[
    "rm -rf",
    "rm -fr",
    "rm -r",
    "wget ",
    "curl | sh",
    "chmod 777",
    "chmod +s",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    ":(){ :|:& };:",
];

const READ_CHUNK: usize = 4096;

pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 8000;

const TRUNCATED: &str = "...[truncated]";

/// 原始字节缓冲：读取时只解码到最后一个完整的 UTF-8 字符，残缺尾部留待下次
struct OutputBuffer {
    pending: Vec<u8>,
    dropped: usize,
    limit_bytes: usize,
}

impl OutputBuffer {
    fn new(limit_bytes: usize) -> Self {
        Self {
            pending: Vec::new(),
            dropped: 0,
            limit_bytes,
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        if self.pending.len() > self.limit_bytes {
            let excess = self.pending.len() - self.limit_bytes;
            self.pending.drain(..excess);
            self.dropped += excess;
        }
    }

    /// 取走已完整的新输出；第二项表示自上次读取以来是否丢弃过旧字节
    fn take_new(&mut self) -> (String, bool) {
        let complete = self.pending.len() - incomplete_tail(&self.pending);
        let bytes: Vec<u8> = self.pending.drain(..complete).collect();
        let dropped = std::mem::take(&mut self.dropped) > 0;
        (String::from_utf8_lossy(&bytes).into_owned(), dropped)
    }
}

/// 末尾残缺 UTF-8 序列的字节数（0..=3）
fn incomplete_tail(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let b = bytes[bytes.len() - back];
        if b & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let need = if b >= 0xF0 {
            4
        } else if b >= 0xE0 {
            3
        } else if b >= 0xC0 {
            2
        } else {
            1
        };
        return if need > back { back } else { 0 };
    }
    0
}

/// 超长时保留末尾 max_chars 个字符
fn keep_tail(text: String, max_chars: usize, already_truncated: bool) -> String {
    let count = text.chars().count();
    if count <= max_chars && !already_truncated {
        return text;
    }
    let tail: String = text.chars().skip(count.saturating_sub(max_chars)).collect();
    format!("{}\n{}", TRUNCATED, tail)
}

/// 超长时保留开头 max_chars 个字符
fn keep_head(text: String, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text;
    }
    text.chars().take(max_chars).collect::<String>() + "\n" + TRUNCATED
}

struct ProcessSession {
    command: String,
    child: Child,
    stdin: Option<ChildStdin>,
    output: Arc<Mutex<OutputBuffer>>,
}

/// 会话表：被该族所有工具共享
pub struct ProcessTable {
    sessions: tokio::sync::Mutex<BTreeMap<u32, ProcessSession>>,
    allowed_commands: HashSet<String>,
    settle: Duration,
    working_dir: Option<PathBuf>,
    max_output_chars: usize,
}

impl ProcessTable {
    /// settle：启动或写入后等待多久再收集输出
    pub fn new(allowed_commands: Vec<String>, settle: Duration) -> Self {
        Self {
            sessions: tokio::sync::Mutex::new(BTreeMap::new()),
            allowed_commands: allowed_commands
                .into_iter()
                .map(|s| s.to_lowercase())
                .collect(),
            settle,
            working_dir: None,
            max_output_chars: DEFAULT_MAX_OUTPUT_CHARS,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_max_output(mut self, max_chars: usize) -> Self {
        self.max_output_chars = max_chars.max(1);
        self
    }

    fn buffer_limit(&self) -> usize {
        self.max_output_chars.saturating_mul(4).max(READ_CHUNK)
    }

    fn check_command(&self, raw: &str) -> Result<(), String> {
        let raw_lower = raw.to_lowercase();
        for forbidden in FORBIDDEN_SUBSTR {
            if raw_lower.contains(forbidden) {
                return Err(format!("Forbidden pattern: {}", forbidden));
            }
        }
        if raw_lower.trim().is_empty() {
            return Err("Empty command".to_string());
        }
        if self.allowed_commands.is_empty() {
            return Ok(());
        }
        if raw_lower.contains('`') || raw_lower.contains("$(") {
            return Err("Command substitution is not allowed".to_string());
        }
        // 重定向里的 & 不是命令分隔符
        let normalized = raw_lower
            .replace("&>", "> ")
            .replace(">&", "> ")
            .replace("<&", "< ");
        for segment in normalized.split(|c: char| matches!(c, ';' | '|' | '&' | '\n')) {
            let Some(name) = segment.split_whitespace().next() else {
                continue;
            };
            if !self.allowed_commands.contains(name) {
                return Err(format!("Command '{}' not in allowlist", name));
            }
        }
        Ok(())
    }

    pub async fn start(&self, command: &str) -> Result<String, String> {
        self.check_command(command)?;

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        // 独立进程组，结束会话时可连同后代一起结束
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| format!("Spawn failed: {}", e))?;
        let pid = child
            .id()
            .ok_or_else(|| "Process exited before it could be tracked".to_string())?;
        let output = Arc::new(Mutex::new(OutputBuffer::new(self.buffer_limit())));
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, output.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, output.clone());
        }
        let stdin = child.stdin.take();

        tracing::info!(pid, command = %command, "process started");
        self.sessions.lock().await.insert(
            pid,
            ProcessSession {
                command: command.to_string(),
                child,
                stdin,
                output,
            },
        );

        tokio::time::sleep(self.settle).await;
        let initial = self.read(pid).await?;
        Ok(format!("Process started with PID {}\n{}", pid, initial))
    }

    pub async fn interact(&self, pid: u32, input: &str) -> Result<String, String> {
        {
            let mut sessions = self.sessions.lock().await;
            let session = sessions
                .get_mut(&pid)
                .ok_or_else(|| format!("No session with PID {}", pid))?;
            let stdin = session
                .stdin
                .as_mut()
                .ok_or_else(|| format!("PID {} does not accept input", pid))?;
            let line = format!("{}\n", input.trim_end_matches('\n'));
            stdin
                .write_all(line.as_bytes())
                .await
                .map_err(|e| format!("Write to PID {} failed: {}", pid, e))?;
            stdin
                .flush()
                .await
                .map_err(|e| format!("Flush to PID {} failed: {}", pid, e))?;
        }
        tokio::time::sleep(self.settle).await;
        self.read(pid).await
    }

    /// 返回上次读取之后的新输出，并附带进程状态
    pub async fn read(&self, pid: u32) -> Result<String, String> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(&pid)
            .ok_or_else(|| format!("No session with PID {}", pid))?;
        let (fresh, dropped) = session
            .output
            .lock()
            .map(|mut buf| buf.take_new())
            .unwrap_or_default();
        let status = match session.child.try_wait() {
            Ok(Some(status)) => format!("[exited: {}]", status),
            Ok(None) => "[running]".to_string(),
            Err(e) => format!("[status unknown: {}]", e),
        };
        if fresh.is_empty() && !dropped {
            Ok(format!("{} (no new output)", status))
        } else {
            Ok(format!(
                "{}\n{}",
                status,
                keep_tail(fresh, self.max_output_chars, dropped)
            ))
        }
    }

    pub async fn terminate(&self, pid: u32) -> Result<String, String> {
        let session = self.sessions.lock().await.remove(&pid);
        let mut session = session.ok_or_else(|| format!("No session with PID {}", pid))?;
        kill_session(pid, &mut session)
            .await
            .map_err(|e| format!("Kill PID {} failed: {}", pid, e))?;
        tracing::info!(pid, command = %session.command, "process terminated");
        Ok(format!("Terminated PID {}", pid))
    }

    pub async fn list(&self) -> String {
        let mut sessions = self.sessions.lock().await;
        if sessions.is_empty() {
            return "No active sessions".to_string();
        }
        sessions
            .iter_mut()
            .map(|(pid, s)| {
                let state = match s.child.try_wait() {
                    Ok(None) => "running",
                    _ => "exited",
                };
                format!("{}\t{}\t{}", pid, state, s.command)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// 结束全部会话（运行结束时由清理任务调用）
    pub async fn terminate_all(&self) -> usize {
        let drained: Vec<(u32, ProcessSession)> = {
            let mut sessions = self.sessions.lock().await;
            std::mem::take(&mut *sessions).into_iter().collect()
        };
        let count = drained.len();
        for (pid, mut session) in drained {
            if let Err(e) = kill_session(pid, &mut session).await {
                tracing::warn!(pid, error = %e, "kill failed during cleanup");
            }
        }
        count
    }
}

/// 先结束整个进程组，再收尸 sh 本身
async fn kill_session(pid: u32, session: &mut ProcessSession) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let group = format!("kill -9 -{} 2>/dev/null", pid);
        if let Err(e) = Command::new("sh").args(["-c", group.as_str()]).status().await {
            tracing::warn!(pid, error = %e, "process group kill failed");
        }
    }
    match session.child.try_wait() {
        Ok(None) => session.child.kill().await,
        Ok(Some(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

fn spawn_reader<R>(mut reader: R, output: Arc<Mutex<OutputBuffer>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Ok(mut buf) = output.lock() {
                        buf.push(&chunk[..n]);
                    }
                }
            }
        }
    });
}

/// 系统进程快照：`pid stat elapsed command`
async fn list_system_processes() -> Result<String, String> {
    match Command::new("ps")
        .args(["-eo", "pid,stat,etime,comm"])
        .output()
        .await
    {
        Ok(out) if out.status.success() => Ok(String::from_utf8_lossy(&out.stdout).into_owned()),
        Ok(out) => Err(format!(
            "ps failed: {}",
            String::from_utf8_lossy(&out.stderr).trim()
        )),
        Err(e) => list_from_proc().ok_or_else(|| format!("ps unavailable: {}", e)),
    }
}

/// 没有 ps 时退回读取 /proc
#[cfg(target_os = "linux")]
fn list_from_proc() -> Option<String> {
    let mut lines = vec!["PID STAT COMMAND".to_string()];
    let mut pids: Vec<u32> = std::fs::read_dir("/proc")
        .ok()?
        .filter_map(|e| e.ok()?.file_name().to_str()?.parse().ok())
        .collect();
    pids.sort_unstable();
    for pid in pids {
        let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) else {
            continue;
        };
        // 格式：pid (comm) state ...
        let (Some(open), Some(close)) = (stat.find('('), stat.rfind(')')) else {
            continue;
        };
        let comm = &stat[open + 1..close];
        let state = stat[close + 1..].split_whitespace().next().unwrap_or("?");
        lines.push(format!("{} {} {}", pid, state, comm));
    }
    Some(lines.join("\n"))
}

#[cfg(not(target_os = "linux"))]
fn list_from_proc() -> Option<String> {
    None
}

/// 向任意进程发送 SIGKILL；拒绝 init 与自身
async fn kill_system_process(pid: u32) -> Result<String, String> {
    if pid <= 1 || pid == std::process::id() {
        return Err(format!("Refusing to kill PID {}", pid));
    }
    let out = if cfg!(target_os = "windows") {
        Command::new("taskkill")
            .args(["/F", "/PID", pid.to_string().as_str()])
            .output()
            .await
    } else {
        Command::new("sh")
            .args(["-c", format!("kill -9 {}", pid).as_str()])
            .output()
            .await
    }
    .map_err(|e| format!("Kill PID {} failed: {}", pid, e))?;
    if out.status.success() {
        tracing::info!(pid, "system process killed");
        Ok(format!("Killed PID {}", pid))
    } else {
        Err(format!(
            "Kill PID {} failed: {}",
            pid,
            String::from_utf8_lossy(&out.stderr).trim()
        ))
    }
}

fn pid_arg(args: &Value) -> Result<u32, String> {
    args.get("pid")
        .and_then(|v| v.as_u64())
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| "Missing or invalid 'pid'".to_string())
}

fn pid_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": { "pid": { "type": "integer" } },
        "required": ["pid"]
    })
}

pub struct StartProcessTool(Arc<ProcessTable>);

#[async_trait]
impl Tool for StartProcessTool {
    fn name(&self) -> &str {
        "start_process"
    }

    fn description(&self) -> &str {
        "Start a long-running command and return its PID plus initial output. Args: {\"command\": \"flutter run -d chrome\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "command": { "type": "string" } },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        self.0.start(command).await
    }
}

pub struct InteractWithProcessTool(Arc<ProcessTable>);

#[async_trait]
impl Tool for InteractWithProcessTool {
    fn name(&self) -> &str {
        "interact_with_process"
    }

    fn description(&self) -> &str {
        "Send one line of input to a running process and return what it printed. Args: {\"pid\": 123, \"input\": \"r\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pid": { "type": "integer" },
                "input": { "type": "string" }
            },
            "required": ["pid", "input"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let pid = pid_arg(&args)?;
        let input = args.get("input").and_then(|v| v.as_str()).unwrap_or("");
        self.0.interact(pid, input).await
    }
}

pub struct ReadProcessOutputTool(Arc<ProcessTable>);

#[async_trait]
impl Tool for ReadProcessOutputTool {
    fn name(&self) -> &str {
        "read_process_output"
    }

    fn description(&self) -> &str {
        "Read output produced by a process since the last read. Args: {\"pid\": 123}"
    }

    fn parameters_schema(&self) -> Value {
        pid_schema()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        self.0.read(pid_arg(&args)?).await
    }
}

pub struct ForceTerminateTool(Arc<ProcessTable>);

#[async_trait]
impl Tool for ForceTerminateTool {
    fn name(&self) -> &str {
        "force_terminate"
    }

    fn description(&self) -> &str {
        "Kill a process started with start_process. Args: {\"pid\": 123}"
    }

    fn parameters_schema(&self) -> Value {
        pid_schema()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        self.0.terminate(pid_arg(&args)?).await
    }
}

pub struct ListSessionsTool(Arc<ProcessTable>);

#[async_trait]
impl Tool for ListSessionsTool {
    fn name(&self) -> &str {
        "list_sessions"
    }

    fn description(&self) -> &str {
        "List process sessions as 'pid<TAB>state<TAB>command'."
    }

    async fn execute(&self, _args: Value) -> Result<String, String> {
        Ok(self.0.list().await)
    }
}

pub struct ListProcessesTool(Arc<ProcessTable>);

#[async_trait]
impl Tool for ListProcessesTool {
    fn name(&self) -> &str {
        "list_processes"
    }

    fn description(&self) -> &str {
        "List all processes on the system (pid, state, elapsed time, command)."
    }

    async fn execute(&self, _args: Value) -> Result<String, String> {
        let listing = list_system_processes().await?;
        Ok(keep_head(listing, self.0.max_output_chars))
    }
}

pub struct KillProcessTool;

#[async_trait]
impl Tool for KillProcessTool {
    fn name(&self) -> &str {
        "kill_process"
    }

    fn description(&self) -> &str {
        "Kill any process by PID, e.g. a dev server left over from an earlier run. Args: {\"pid\": 123}"
    }

    fn parameters_schema(&self) -> Value {
        pid_schema()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        kill_system_process(pid_arg(&args)?).await
    }
}

/// 命令执行族提供方
pub fn process_provider(table: Arc<ProcessTable>, timeout: Duration) -> RegistryProvider {
    let mut registry = ToolRegistry::new();
    registry.register(StartProcessTool(table.clone()));
    registry.register(InteractWithProcessTool(table.clone()));
    registry.register(ReadProcessOutputTool(table.clone()));
    registry.register(ForceTerminateTool(table.clone()));
    registry.register(ListSessionsTool(table.clone()));
    registry.register(ListProcessesTool(table));
    registry.register(KillProcessTool);
    RegistryProvider::new("process", registry, timeout)
}

/// 运行结束时结束所有仍存活的会话
pub struct ProcessCleanup {
    table: Arc<ProcessTable>,
}

impl ProcessCleanup {
    pub fn new(table: Arc<ProcessTable>) -> Self {
        Self { table }
    }
}

#[async_trait]
impl ShutdownCleanup for ProcessCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        let killed = self.table.terminate_all().await;
        tracing::info!(killed, "process sessions terminated");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ProcessSessions"
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::tools::ToolProvider;

    fn table() -> Arc<ProcessTable> {
        Arc::new(ProcessTable::new(
            vec!["echo".into(), "cat".into(), "sleep".into()],
            Duration::from_millis(200),
        ))
    }

    fn pid_of(started: &str) -> u32 {
        started
            .lines()
            .next()
            .and_then(|l| l.rsplit(' ').next())
            .and_then(|p| p.parse().ok())
            .unwrap()
    }

    #[tokio::test]
    async fn test_rejects_command_outside_allowlist() {
        let table = table();
        let err = table.start("python3 -c 'print(1)'").await.unwrap_err();
        assert!(err.contains("not in allowlist"));
        let err = table.start("echo hi; rm -rf /").await.unwrap_err();
        assert!(err.contains("Forbidden"));
    }

    #[tokio::test]
    async fn test_chained_command_checked_per_segment() {
        let victim = tempfile::tempdir().unwrap();
        let target = victim.path().join("keep");
        std::fs::create_dir(&target).unwrap();
        let table = table();

        let chained = format!("echo hi && rm -r {}", target.display());
        assert!(table.start(&chained).await.is_err());
        let err = table
            .start(&format!("echo hi; touch {}/x", target.display()))
            .await
            .unwrap_err();
        assert!(err.contains("'touch' not in allowlist"));
        let err = table.start("echo $(touch /tmp/x)").await.unwrap_err();
        assert!(err.contains("substitution"));
        assert!(table.start("echo `id`").await.is_err());
        assert!(target.exists());

        let started = table.start("echo one && echo two 2>&1 | cat").await.unwrap();
        assert!(started.contains("one"));
        assert!(started.contains("two"));
    }

    #[tokio::test]
    async fn test_forbidden_patterns_apply_without_allowlist() {
        let table = ProcessTable::new(vec![], Duration::from_millis(50));
        let err = table.start("rm -r build").await.unwrap_err();
        assert!(err.contains("Forbidden"));
        assert!(table.start("wget http://example.com/x").await.is_err());
    }

    #[test]
    fn test_output_buffer_reassembles_split_utf8() {
        let mut buf = OutputBuffer::new(1024);
        let bytes = "café ok".as_bytes();
        // 在 é 的两个字节之间切开
        let split = "caf".len() + 1;
        buf.push(&bytes[..split]);
        assert_eq!(buf.take_new(), ("caf".to_string(), false));
        buf.push(&bytes[split..]);
        assert_eq!(buf.take_new(), ("é ok".to_string(), false));
        assert_eq!(buf.take_new(), (String::new(), false));
    }

    #[test]
    fn test_output_buffer_drops_oldest_bytes() {
        let mut buf = OutputBuffer::new(8);
        buf.push(b"0123456789abcdef");
        assert_eq!(buf.take_new(), ("89abcdef".to_string(), true));
        buf.push(b"xy");
        assert_eq!(buf.take_new(), ("xy".to_string(), false));
    }

    #[tokio::test]
    async fn test_read_truncates_long_output() {
        let table = Arc::new(
            ProcessTable::new(vec!["echo".into()], Duration::from_millis(200)).with_max_output(20),
        );
        let long = format!("{}END", "x".repeat(500));
        let started = table.start(&format!("echo {}", long)).await.unwrap();
        assert!(started.contains(TRUNCATED));
        assert!(started.contains("END"));
        assert!(!started.contains(&"x".repeat(30)));
    }

    #[tokio::test]
    async fn test_start_captures_initial_output() {
        let table = table();
        let started = table.start("echo hello").await.unwrap();
        assert!(started.starts_with("Process started with PID"));
        assert!(started.contains("hello"));
    }

    #[tokio::test]
    async fn test_interact_and_terminate_session() {
        let table = table();
        let pid = pid_of(&table.start("cat").await.unwrap());
        let echoed = table.interact(pid, "ping").await.unwrap();
        assert!(echoed.contains("ping"));
        assert!(echoed.contains("[running]"));
        assert!(table.list().await.contains("cat"));

        table.terminate(pid).await.unwrap();
        assert!(table.read(pid).await.is_err());
        assert_eq!(table.list().await, "No active sessions");
    }

    #[tokio::test]
    async fn test_terminate_all_clears_sessions() {
        let table = table();
        table.start("sleep 30").await.unwrap();
        table.start("sleep 30").await.unwrap();
        assert_eq!(table.terminate_all().await, 2);
        assert_eq!(table.list().await, "No active sessions");
    }

    #[tokio::test]
    async fn test_list_processes_includes_self() {
        let table = Arc::new(
            ProcessTable::new(vec![], Duration::from_millis(50)).with_max_output(1_000_000),
        );
        let listing = ListProcessesTool(table)
            .execute(serde_json::json!({}))
            .await
            .unwrap();
        let me = std::process::id().to_string();
        assert!(listing
            .lines()
            .any(|l| l.split_whitespace().next() == Some(me.as_str())));
    }

    #[tokio::test]
    async fn test_kill_process_signals_target() {
        use std::os::unix::process::ExitStatusExt;

        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id().unwrap();
        let out = KillProcessTool
            .execute(serde_json::json!({ "pid": pid }))
            .await
            .unwrap();
        assert_eq!(out, format!("Killed PID {}", pid));
        let status = child.wait().await.unwrap();
        assert_eq!(status.signal(), Some(9));

        let own = KillProcessTool
            .execute(serde_json::json!({ "pid": std::process::id() }))
            .await;
        assert!(own.unwrap_err().contains("Refusing"));
        assert!(KillProcessTool
            .execute(serde_json::json!({ "pid": 1 }))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_provider_exposes_system_process_tools() {
        let provider = process_provider(table(), Duration::from_secs(5));
        let names: Vec<String> = provider.tools().into_iter().map(|t| t.name).collect();
        assert!(names.contains(&"list_processes".to_string()));
        assert!(names.contains(&"kill_process".to_string()));
        assert_eq!(names.len(), 7);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_terminate_kills_background_children() {
        let table = Arc::new(ProcessTable::new(vec![], Duration::from_millis(300)));
        let started = table.start("sleep 30 & echo $!").await.unwrap();
        let pid = pid_of(&started);
        let grandchild: u32 = started
            .lines()
            .skip(1)
            .filter_map(|l| l.trim().parse().ok())
            .last()
            .unwrap();

        table.terminate(pid).await.unwrap();

        let mut gone = false;
        for _ in 0..40 {
            match std::fs::read_to_string(format!("/proc/{}/stat", grandchild)) {
                Err(_) => gone = true,
                Ok(stat) => {
                    let state = stat
                        .rsplit(')')
                        .next()
                        .and_then(|rest| rest.split_whitespace().next())
                        .unwrap_or("");
                    gone = state == "Z" || state == "X";
                }
            }
            if gone {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(gone, "background child {} survived terminate", grandchild);
    }
}
