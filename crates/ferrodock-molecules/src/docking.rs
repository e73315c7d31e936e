//! Docking engine discovery and subprocess execution.

use crate::error::{MoleculeError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Executable names tried on the search path, in order.
pub const ENGINE_NAMES: &[&str] = &["vina", "qvina2", "qvina", "smina"];

/// Conventional install locations searched after `PATH` and the tools directory.
pub const INSTALL_DIRS: &[&str] = &["/usr/local/bin", "/usr/bin", "/opt/vina/bin", "/opt/homebrew/bin"];

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1800);

/// How long to wait for output pipes after the process is gone.
const PIPE_GRACE: Duration = Duration::from_secs(2);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Program plus any launcher arguments placed before `--config`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    pub program: PathBuf,
    pub prefix_args: Vec<String>,
}

impl EngineCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.prefix_args);
        command
    }
}

impl std::fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.prefix_args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Engine location settings.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Explicit binary (path or bare name). Skips name discovery.
    pub binary: Option<PathBuf>,
    /// Wrapper command, e.g. a container runner. When set, the engine is
    /// invoked as `launcher... [binary] --config <path>`.
    pub launcher: Vec<String>,
    /// Local tools directory searched after `PATH`.
    pub tools_dir: Option<PathBuf>,
    pub timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            binary: None,
            launcher: Vec::new(),
            tools_dir: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Result of one engine invocation.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub cancelled: bool,
    pub duration: Duration,
}

impl ExecutionOutcome {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Stdout on success, otherwise the matching error.
    pub fn into_result(self) -> Result<String> {
        if self.success {
            return Ok(self.stdout);
        }
        if self.timed_out {
            return Err(MoleculeError::Timeout(self.duration.as_secs()));
        }
        Err(MoleculeError::Execution(
            self.error.unwrap_or_else(|| "docking engine failed".to_string()),
        ))
    }
}

enum Finish {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Runs the docking engine as a subprocess.
#[derive(Debug, Clone)]
pub struct DockingExecutor {
    command: EngineCommand,
    default_timeout: Duration,
}

impl DockingExecutor {
    pub fn new(command: EngineCommand) -> Self {
        Self {
            command,
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Locate an engine with default options.
    pub fn discover() -> Result<Self> {
        Self::from_options(&EngineOptions::default())
    }

    pub fn from_options(options: &EngineOptions) -> Result<Self> {
        let command = resolve_command(options)?;
        info!(engine = %command, "Using docking engine");
        Ok(Self {
            command,
            default_timeout: options.timeout,
        })
    }

    pub fn command(&self) -> &EngineCommand {
        &self.command
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Run `<engine> --config <config>` and wait up to `timeout`.
    pub async fn execute(&self, config: &Path, timeout: Duration) -> ExecutionOutcome {
        self.run(config, timeout, None).await
    }

    /// Like [`execute`](Self::execute), but kills the engine as soon as
    /// `cancel` turns true.
    pub async fn execute_cancellable(
        &self,
        config: &Path,
        timeout: Duration,
        cancel: watch::Receiver<bool>,
    ) -> ExecutionOutcome {
        self.run(config, timeout, Some(cancel)).await
    }

    /// Blocking form of [`execute`](Self::execute) for worker threads.
    ///
    /// Builds its own runtime, so it must not be called from async context.
    pub fn execute_blocking(&self, config: &Path, timeout: Duration) -> ExecutionOutcome {
        match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime.block_on(self.execute(config, timeout)),
            Err(e) => ExecutionOutcome::failure(format!("failed to start runtime: {e}")),
        }
    }

    async fn run(
        &self,
        config: &Path,
        timeout: Duration,
        mut cancel: Option<watch::Receiver<bool>>,
    ) -> ExecutionOutcome {
        if !config.is_file() {
            return ExecutionOutcome::failure(format!("config file not found: {}", config.display()));
        }

        let started = Instant::now();
        let mut child = match self
            .command
            .command()
            .arg("--config")
            .arg(config)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return ExecutionOutcome::failure(format!("failed to start {}: {e}", self.command));
            }
        };
        info!(engine = %self.command, config = %config.display(), pid = ?child.id(), "Docking engine started");

        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        let finish = tokio::select! {
            status = child.wait() => Finish::Exited(status),
            _ = tokio::time::sleep(timeout) => Finish::TimedOut,
            _ = cancellation(&mut cancel) => Finish::Cancelled,
        };
        if !matches!(finish, Finish::Exited(_)) {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill docking engine");
            }
        }

        let mut outcome = ExecutionOutcome {
            stdout: collect(stdout).await,
            stderr: collect(stderr).await,
            duration: started.elapsed(),
            ..Default::default()
        };

        match finish {
            Finish::Exited(Ok(status)) if status.success() => {
                outcome.success = true;
                outcome.exit_code = status.code();
                debug!(duration_ms = outcome.duration.as_millis() as u64, "Docking engine finished");
            }
            Finish::Exited(Ok(status)) => {
                outcome.exit_code = status.code();
                let stderr = outcome.stderr.trim();
                outcome.error = Some(if !stderr.is_empty() {
                    stderr.to_string()
                } else {
                    match status.code() {
                        Some(code) => format!("exited with code {code}"),
                        None => "terminated by signal".to_string(),
                    }
                });
                warn!(exit_code = ?outcome.exit_code, "Docking engine failed");
            }
            Finish::Exited(Err(e)) => {
                outcome.error = Some(format!("failed to wait for docking engine: {e}"));
            }
            Finish::TimedOut => {
                outcome.timed_out = true;
                outcome.error = Some(format!("docking engine timed out after {}s", timeout.as_secs()));
                warn!(timeout_secs = timeout.as_secs(), "Docking engine killed after timeout");
            }
            Finish::Cancelled => {
                outcome.cancelled = true;
                outcome.error = Some("cancelled".to_string());
                info!("Docking engine killed on cancellation");
            }
        }
        outcome
    }

    /// True if the engine answers `--help`.
    pub async fn is_available(&self) -> bool {
        let mut command = self.command.command();
        command.arg("--help").stdout(Stdio::null()).stderr(Stdio::null()).kill_on_drop(true);
        matches!(tokio::time::timeout(PROBE_TIMEOUT, command.status()).await, Ok(Ok(status)) if status.success())
    }

    /// First non-empty line of `--version`, if the engine reports one.
    pub async fn version(&self) -> Option<String> {
        let mut command = self.command.command();
        command.arg("--version").stdin(Stdio::null()).kill_on_drop(true);
        let output = tokio::time::timeout(PROBE_TIMEOUT, command.output()).await.ok()?.ok()?;
        let text = if output.stdout.is_empty() { output.stderr } else { output.stdout };
        String::from_utf8_lossy(&text)
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
    }
}

async fn cancellation(cancel: &mut Option<watch::Receiver<bool>>) {
    let Some(rx) = cancel else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone without cancelling.
            return std::future::pending().await;
        }
    }
}

fn spawn_reader<R>(mut pipe: R) -> JoinHandle<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            debug!(error = %e, "Engine output pipe closed with error");
        }
        buf
    })
}

async fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    let Some(mut handle) = handle else { return String::new() };
    match tokio::time::timeout(PIPE_GRACE, &mut handle).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(_)) => String::new(),
        Err(_) => {
            handle.abort();
            String::new()
        }
    }
}

// ── Discovery ───────────────────────────────────────────────────────────────

fn resolve_command(options: &EngineOptions) -> Result<EngineCommand> {
    if let Some((program, rest)) = options.launcher.split_first() {
        let mut prefix_args = rest.to_vec();
        if let Some(binary) = &options.binary {
            prefix_args.push(binary.display().to_string());
        }
        return Ok(EngineCommand {
            program: PathBuf::from(program),
            prefix_args,
        });
    }

    let dirs = search_dirs(options.tools_dir.as_deref());
    match &options.binary {
        Some(binary) if binary.components().count() > 1 => {
            if is_executable(binary) {
                Ok(EngineCommand::new(binary.clone()))
            } else {
                Err(MoleculeError::EngineNotFound {
                    searched: binary.display().to_string(),
                })
            }
        }
        Some(name) => find_in(&dirs, &[name.as_path()]).map(EngineCommand::new).ok_or_else(|| {
            MoleculeError::EngineNotFound {
                searched: describe(&dirs, &[name.display().to_string()]),
            }
        }),
        None => {
            let names: Vec<&Path> = ENGINE_NAMES.iter().map(Path::new).collect();
            find_in(&dirs, &names).map(EngineCommand::new).ok_or_else(|| MoleculeError::EngineNotFound {
                searched: describe(&dirs, &ENGINE_NAMES.iter().map(|n| n.to_string()).collect::<Vec<_>>()),
            })
        }
    }
}

/// `PATH`, then the tools directory, then the install locations.
fn search_dirs(tools_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = std::env::var_os("PATH")
        .map(|path| std::env::split_paths(&path).collect())
        .unwrap_or_default();
    dirs.extend(tools_dir.map(Path::to_path_buf));
    dirs.extend(INSTALL_DIRS.iter().map(PathBuf::from));
    dirs
}

/// Names take priority over directories: every directory is tried for the
/// first name before moving to the next.
fn find_in(dirs: &[PathBuf], names: &[&Path]) -> Option<PathBuf> {
    names
        .iter()
        .flat_map(|name| dirs.iter().map(move |dir| dir.join(name)))
        .find(|candidate| is_executable(candidate))
}

fn describe(dirs: &[PathBuf], names: &[String]) -> String {
    let dirs: Vec<String> = dirs.iter().map(|d| d.display().to_string()).collect();
    format!("{} in {}", names.join(", "), dirs.join(":"))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    /// Executor running `script` through `/bin/sh`.
    fn scripted(dir: &Path, script: &str) -> DockingExecutor {
        let path = dir.join("engine.sh");
        std::fs::write(&path, script).unwrap();
        DockingExecutor::new(EngineCommand {
            program: PathBuf::from("/bin/sh"),
            prefix_args: vec![path.display().to_string()],
        })
    }

    fn config(dir: &Path) -> PathBuf {
        let path = dir.join("config.txt");
        std::fs::write(&path, "receptor = r.pdbqt\n").unwrap();
        path
    }

    #[tokio::test]
    async fn test_missing_config_fails_without_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let executor = DockingExecutor::new(EngineCommand::new("/nonexistent/engine"));
        let outcome = executor.execute(&dir.path().join("absent.txt"), DEFAULT_TIMEOUT).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("config file not found"));
    }

    #[tokio::test]
    async fn test_success_captures_stdout_and_config_arg() {
        let dir = tempfile::tempdir().unwrap();
        let executor = scripted(dir.path(), "echo \"args: $1 $2\"\necho 'mode |   affinity'\n");
        let config = config(dir.path());
        let outcome = executor.execute(&config, Duration::from_secs(10)).await;
        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.stdout.contains(&format!("args: --config {}", config.display())));
        assert!(outcome.stdout.contains("affinity"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_reports_stderr_or_code() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());

        let outcome = scripted(dir.path(), "echo 'bad receptor' >&2\nexit 1\n")
            .execute(&config, Duration::from_secs(10))
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("bad receptor"));

        let outcome = scripted(dir.path(), "exit 3\n").execute(&config, Duration::from_secs(10)).await;
        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(outcome.error.as_deref(), Some("exited with code 3"));
        assert!(matches!(outcome.into_result(), Err(MoleculeError::Execution(_))));
    }

    #[tokio::test]
    async fn test_timeout_kills_engine() {
        let dir = tempfile::tempdir().unwrap();
        let executor = scripted(dir.path(), "exec sleep 30\n");
        let outcome = executor.execute(&config(dir.path()), Duration::from_millis(200)).await;
        assert!(outcome.timed_out);
        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap_or_default().contains("timed out"));
        assert!(outcome.duration < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_cancellation_kills_engine() {
        let dir = tempfile::tempdir().unwrap();
        let executor = scripted(dir.path(), "exec sleep 30\n");
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = tx.send(true);
        });
        let outcome = executor.execute_cancellable(&config(dir.path()), Duration::from_secs(30), rx).await;
        assert!(outcome.cancelled);
        assert!(!outcome.timed_out);
        assert!(outcome.duration < Duration::from_secs(10));
    }

    #[test]
    fn test_blocking_matches_async() {
        let dir = tempfile::tempdir().unwrap();
        let executor = scripted(dir.path(), "echo done\n");
        let outcome = executor.execute_blocking(&config(dir.path()), Duration::from_secs(10));
        assert!(outcome.success);
        assert_eq!(outcome.stdout.trim(), "done");
    }

    #[tokio::test]
    async fn test_probes() {
        let dir = tempfile::tempdir().unwrap();
        let executor = scripted(dir.path(), "echo 'AutoDock Vina v1.2.5'\n");
        assert!(executor.is_available().await);
        assert_eq!(executor.version().await.as_deref(), Some("AutoDock Vina v1.2.5"));

        let missing = DockingExecutor::new(EngineCommand::new("/nonexistent/engine"));
        assert!(!missing.is_available().await);
        assert_eq!(missing.version().await, None);
    }

    #[test]
    fn test_discovery_paths() {
        let dir = tempfile::tempdir().unwrap();
        let err = DockingExecutor::from_options(&EngineOptions {
            binary: Some(dir.path().join("vina")),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, MoleculeError::EngineNotFound { .. }));

        let launched = DockingExecutor::from_options(&EngineOptions {
            binary: Some(PathBuf::from("vina")),
            launcher: vec!["docker".into(), "run".into(), "--rm".into(), "vina-image".into()],
            ..Default::default()
        })
        .unwrap();
        assert_eq!(launched.command().to_string(), "docker run --rm vina-image vina");
    }

    #[test]
    fn test_tools_dir_searched() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("ferrodock-test-engine");
        std::fs::write(&binary, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();

        let executor = DockingExecutor::from_options(&EngineOptions {
            binary: Some(PathBuf::from("ferrodock-test-engine")),
            tools_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(executor.command().program, binary);
    }
}
