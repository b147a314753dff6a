//! adb-backed device collaborators.
//!
//! [`AdbLink`] drives the platform `adb` binary: `adb push` for the
//! agent payload, `adb forward` plus `adb shell app_process` to launch
//! the agent, and two localhost TCP connections for the video and
//! control streams. [`DirPayloadSource`] serves the agent artifact
//! from a local directory.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::{debug, info, warn};

use glimpse_core::{AGENT_VERSION, AgentConfig, AgentStreams, GlimpseError, PayloadSource};

/// Abstract socket name the agent listens on.
const SOCKET_NAME: &str = "glimpse";

/// How long to keep retrying the localhost connect while the agent
/// starts up.
const CONNECT_DEADLINE: Duration = Duration::from_secs(5);
const CONNECT_BACKOFF: Duration = Duration::from_millis(100);

// ── DirPayloadSource ─────────────────────────────────────────────

/// Serves agent payloads from a directory on the viewer machine.
pub struct DirPayloadSource {
    dir: PathBuf,
}

impl DirPayloadSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl PayloadSource for DirPayloadSource {
    async fn fetch(&self, name: &str) -> Result<Bytes, GlimpseError> {
        let path = self.dir.join(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(e) => Err(GlimpseError::Fetch(format!("{}: {e}", path.display()))),
        }
    }
}

// ── AdbLink ──────────────────────────────────────────────────────

/// A device reachable through `adb`.
pub struct AdbLink {
    adb_path: String,
    serial: Option<String>,
    forward_port: u16,
}

impl AdbLink {
    pub fn new(adb_path: impl Into<String>, serial: Option<String>, forward_port: u16) -> Self {
        Self {
            adb_path: adb_path.into(),
            serial,
            forward_port,
        }
    }

    fn adb(&self) -> Command {
        let mut cmd = Command::new(&self.adb_path);
        if let Some(serial) = &self.serial {
            cmd.arg("-s").arg(serial);
        }
        cmd
    }

    async fn run_adb(&self, args: &[&str], context: &str) -> Result<(), GlimpseError> {
        let output = self
            .adb()
            .args(args)
            .output()
            .await
            .map_err(|e| GlimpseError::Other(format!("{context}: {e}")))?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(GlimpseError::Other(format!(
                "{context}: {}",
                stderr.trim()
            )))
        }
    }

    async fn connect_stream(&self) -> Result<TcpStream, GlimpseError> {
        let addr = format!("127.0.0.1:{}", self.forward_port);
        let deadline = tokio::time::Instant::now() + CONNECT_DEADLINE;
        loop {
            match TcpStream::connect(&addr).await {
                Ok(stream) => {
                    stream.set_nodelay(true).ok();
                    return Ok(stream);
                }
                Err(e) if tokio::time::Instant::now() < deadline => {
                    debug!("agent socket not ready ({e}); retrying");
                    tokio::time::sleep(CONNECT_BACKOFF).await;
                }
                Err(e) => {
                    return Err(GlimpseError::AgentStart(format!(
                        "connect to {addr}: {e}"
                    )));
                }
            }
        }
    }
}

/// Key=value argument list passed to the agent process.
fn agent_args(config: &AgentConfig) -> Vec<String> {
    vec![
        format!("video={}", config.video),
        format!("audio={}", config.audio),
        format!("control={}", config.control),
        format!("max_size={}", config.max_size),
        format!("video_bit_rate={}", config.video_bit_rate),
        format!("tunnel_forward={}", config.tunnel_forward),
    ]
}

#[async_trait]
impl glimpse_core::DeviceLink for AdbLink {
    async fn push(&self, remote_path: &str, payload: Bytes) -> Result<(), GlimpseError> {
        // adb push only takes files, so stage the payload locally.
        let staging = std::env::temp_dir().join(format!("glimpse-push-{}.tmp", std::process::id()));
        tokio::fs::write(&staging, &payload)
            .await
            .map_err(|e| GlimpseError::Push(format!("stage payload: {e}")))?;

        let staging_path = staging.to_string_lossy().into_owned();
        let result = self
            .run_adb(&["push", &staging_path, remote_path], "adb push")
            .await;
        let _ = tokio::fs::remove_file(&staging).await;
        result.map_err(|e| GlimpseError::Push(e.to_string()))
    }

    async fn start_agent(
        &self,
        remote_path: &str,
        config: &AgentConfig,
    ) -> Result<AgentStreams, GlimpseError> {
        let forward = format!("tcp:{}", self.forward_port);
        let socket = format!("localabstract:{SOCKET_NAME}");
        self.run_adb(&["forward", &forward, &socket], "adb forward")
            .await
            .map_err(|e| GlimpseError::AgentStart(e.to_string()))?;

        let classpath = format!("CLASSPATH={remote_path}");
        let mut shell = self.adb();
        shell
            .arg("shell")
            .arg(classpath)
            .arg("app_process")
            .arg("/")
            .arg("com.glimpse.Agent")
            .arg(AGENT_VERSION)
            .args(agent_args(config))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let mut child = shell
            .spawn()
            .map_err(|e| GlimpseError::AgentStart(format!("spawn agent: {e}")))?;
        let log = child
            .stdout
            .take()
            .ok_or(GlimpseError::AgentStart("agent stdout unavailable".into()))?;

        // Reap the shell process when the agent exits.
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => info!("agent process exited: {status}"),
                Err(e) => warn!("agent process wait failed: {e}"),
            }
        });

        // First connection carries video, second carries control.
        let video = self.connect_stream().await?;
        let control = self.connect_stream().await?;
        let (video_read, _) = video.into_split();
        let (_, control_write) = control.into_split();

        Ok(AgentStreams {
            control: Box::new(control_write),
            video: Box::new(video_read),
            log: Box::new(log),
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use glimpse_core::AGENT_ARTIFACT;

    #[test]
    fn agent_args_reflect_config() {
        let args = agent_args(&AgentConfig::default());
        assert!(args.contains(&"video=true".to_string()));
        assert!(args.contains(&"audio=false".to_string()));
        assert!(args.contains(&"max_size=1024".to_string()));
        assert!(args.contains(&"video_bit_rate=4000000".to_string()));
        assert!(args.contains(&"tunnel_forward=true".to_string()));
    }

    #[tokio::test]
    async fn dir_source_serves_the_artifact() {
        let dir = std::env::temp_dir().join(format!("glimpse-test-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join(AGENT_ARTIFACT), b"jar bytes")
            .await
            .unwrap();

        let source = DirPayloadSource::new(&dir);
        let bytes = source.fetch(AGENT_ARTIFACT).await.unwrap();
        assert_eq!(&bytes[..], b"jar bytes");

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn dir_source_reports_missing_artifact() {
        let source = DirPayloadSource::new("/nonexistent-glimpse-dir");
        let err = source.fetch(AGENT_ARTIFACT).await.unwrap_err();
        assert!(matches!(err, GlimpseError::Fetch(_)));
        assert!(err.to_string().contains(AGENT_ARTIFACT));
    }
}
