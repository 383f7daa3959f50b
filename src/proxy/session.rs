//! Scoped tunnel sessions
//!
//! A [`TunnelSession`] owns one running tunnel process (as the leader of its
//! own process group) and the temporary configuration file it was started
//! with. [`TunnelSession::shutdown`] tears both down; if a session is dropped
//! without it (panic, cancelled task) `Drop` does a synchronous best-effort
//! kill and file removal instead.

use crate::error::ProbeError;
use crate::proxy::tunnel_config::TunnelConfig;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, warn};
use uuid::Uuid;

/// Replaced by the config file path in tunnel arguments
pub const CONFIG_PLACEHOLDER: &str = "{config}";

const DEFAULT_TUNNEL_PROGRAM: &str = "xray";
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(1);

/// How to launch the external tunnel executable
#[derive(Debug, Clone)]
pub struct TunnelCommand {
    pub program: PathBuf,
    /// Arguments; `{config}` is substituted with the config file path
    pub args: Vec<String>,
    /// Directory for temporary config files
    pub config_dir: PathBuf,
    /// How long to wait after each termination signal
    pub grace_period: Duration,
}

impl Default for TunnelCommand {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_TUNNEL_PROGRAM),
            args: vec![
                "run".to_string(),
                "-c".to_string(),
                CONFIG_PLACEHOLDER.to_string(),
            ],
            config_dir: std::env::temp_dir(),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

impl TunnelCommand {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program<P: Into<PathBuf>>(mut self, program: P) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_config_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config_dir = dir.into();
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }
}

/// What teardown had to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Teardown {
    /// The process ignored the graceful signal and was killed
    pub forced: bool,
    /// The config file is gone (removed now or already absent)
    pub config_removed: bool,
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Terminate,
    Kill,
}

pub struct TunnelSession {
    child: Option<Child>,
    pgid: Option<i32>,
    config_path: Option<PathBuf>,
    grace: Duration,
}

impl TunnelSession {
    /// Write `config` to a fresh temp file and start the tunnel against it
    pub async fn start(command: &TunnelCommand, config: &TunnelConfig) -> Result<Self, ProbeError> {
        let path = command
            .config_dir
            .join(format!("node-probe-{}.json", Uuid::new_v4().simple()));
        let json = config.to_json_pretty().map_err(std::io::Error::from)?;
        tokio::fs::write(&path, json).await?;

        let mut session = Self {
            child: None,
            pgid: None,
            config_path: Some(path.clone()),
            grace: command.grace_period,
        };

        let path_arg = path.to_string_lossy();
        let mut cmd = Command::new(&command.program);
        cmd.args(
            command
                .args
                .iter()
                .map(|arg| arg.replace(CONFIG_PLACEHOLDER, &path_arg)),
        )
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| {
            session.remove_config();
            ProbeError::ProcessLifecycle(format!(
                "failed to spawn {}: {}",
                command.program.display(),
                e
            ))
        })?;

        session.pgid = child.id().and_then(|id| i32::try_from(id).ok());
        debug!(pid = ?child.id(), config = %path.display(), "tunnel started");
        session.child = Some(child);
        Ok(session)
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    /// Stop the process group and delete the config file
    ///
    /// Both steps always run; a failure in one does not skip the other.
    pub async fn shutdown(mut self) -> Teardown {
        let forced = match self.terminate().await {
            Ok(forced) => forced,
            Err(e) => {
                warn!(error = %e, "tunnel teardown incomplete");
                true
            }
        };
        let config_removed = self.remove_config();

        Teardown {
            forced,
            config_removed,
        }
    }

    /// Graceful signal, bounded wait, then forced kill. Returns whether the
    /// kill was needed.
    async fn terminate(&mut self) -> Result<bool, ProbeError> {
        let Some(mut child) = self.child.take() else {
            return Ok(false);
        };
        let pgid = self.pgid.take();

        signal_group(pgid, GroupSignal::Terminate);
        if let Ok(Ok(status)) = tokio::time::timeout(self.grace, child.wait()).await {
            debug!(%status, "tunnel exited");
            // the leader is gone; sweep any children it left in the group
            signal_group(pgid, GroupSignal::Kill);
            return Ok(false);
        }

        debug!(pid = ?child.id(), "tunnel ignored SIGTERM, killing");
        signal_group(pgid, GroupSignal::Kill);
        if let Err(e) = child.start_kill() {
            debug!(error = %e, "direct kill failed");
        }

        match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(Ok(_)) => Ok(true),
            Ok(Err(e)) => Err(ProbeError::ProcessLifecycle(format!(
                "failed to reap tunnel: {}",
                e
            ))),
            Err(_) => Err(ProbeError::timeout("tunnel reap", self.grace)),
        }
    }

    fn remove_config(&mut self) -> bool {
        let Some(path) = self.config_path.take() else {
            return true;
        };
        match std::fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "failed to remove tunnel config");
                false
            }
        }
    }
}

impl Drop for TunnelSession {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            signal_group(self.pgid.take(), GroupSignal::Kill);
            let _ = child.start_kill();
        }
        self.remove_config();
    }
}

#[cfg(unix)]
fn signal_group(pgid: Option<i32>, signal: GroupSignal) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pgid) = pgid else { return };
    let signal = match signal {
        GroupSignal::Terminate => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };
    match killpg(Pid::from_raw(pgid), signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => debug!(pgid, error = %e, "failed to signal process group"),
    }
}

#[cfg(not(unix))]
fn signal_group(_pgid: Option<i32>, _signal: GroupSignal) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::proxy::models::{NodeProtocol, NodeSpec, Transport};
    use std::time::Instant;

    fn config() -> TunnelConfig {
        let spec = NodeSpec {
            protocol: NodeProtocol::Vless,
            identity: "11111111-1111-1111-1111-111111111111".to_string(),
            host: "203.0.113.5".to_string(),
            port: 443,
            transport: Some(Transport::default()),
            display_tag: "t".to_string(),
            raw_original: String::new(),
        };
        TunnelConfig::for_node(&spec, 10808)
    }

    fn shell(dir: &Path, script: &str) -> TunnelCommand {
        TunnelCommand::new()
            .with_program("sh")
            .with_args(vec![
                "-c".to_string(),
                script.to_string(),
                CONFIG_PLACEHOLDER.to_string(),
            ])
            .with_config_dir(dir)
            .with_grace_period(Duration::from_millis(300))
    }

    #[tokio::test]
    async fn test_config_written_and_passed() {
        let dir = tempfile::tempdir().unwrap();
        let session = TunnelSession::start(&shell(dir.path(), "sleep 30"), &config())
            .await
            .unwrap();

        let path = session.config_path().unwrap().to_path_buf();
        assert!(path.starts_with(dir.path()));
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["inbounds"][0]["port"], 10808);

        let teardown = session.shutdown().await;
        assert!(!teardown.forced);
        assert!(teardown.config_removed);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_forced_kill_when_term_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let session = TunnelSession::start(&shell(dir.path(), "trap '' TERM; sleep 30"), &config())
            .await
            .unwrap();
        let path = session.config_path().unwrap().to_path_buf();

        // let the shell install its trap
        tokio::time::sleep(Duration::from_millis(300)).await;

        let started = Instant::now();
        let teardown = session.shutdown().await;
        assert!(teardown.forced);
        assert!(teardown.config_removed);
        assert!(!path.exists());
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_spawn_failure_removes_config() {
        let dir = tempfile::tempdir().unwrap();
        let command = TunnelCommand::new()
            .with_program("/nonexistent/tunnel-binary")
            .with_config_dir(dir.path());

        let err = TunnelSession::start(&command, &config()).await.err().unwrap();
        assert!(matches!(err, ProbeError::ProcessLifecycle(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_drop_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let session = TunnelSession::start(&shell(dir.path(), "sleep 30"), &config())
            .await
            .unwrap();
        let path = session.config_path().unwrap().to_path_buf();
        assert!(session.id().is_some());

        drop(session);
        assert!(!path.exists());
    }
}
