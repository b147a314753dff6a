//! Collaborator interfaces to the host environment.
//!
//! Device discovery, authentication and the concrete transport to the
//! device are out of scope for the mirroring engine; they are consumed
//! through the traits below. `glimpse-viewer` provides the adb-backed
//! implementations.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::GlimpseError;

// ── Agent artifact ───────────────────────────────────────────────

/// Well-known relative name of the device-side agent payload.
pub const AGENT_ARTIFACT: &str = "glimpse-agent.jar";

/// Fixed path the payload is pushed to on the device.
pub const AGENT_DEVICE_PATH: &str = "/data/local/tmp/glimpse-agent.jar";

/// Protocol version identifier; must match the agent build.
pub const AGENT_VERSION: &str = "0.4.0";

/// Content hash of the agent payload, for push-integrity logging.
pub fn payload_digest(payload: &[u8]) -> blake3::Hash {
    blake3::hash(payload)
}

// ── AgentConfig ──────────────────────────────────────────────────

/// Start configuration for the device-side agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Stream video.
    pub video: bool,
    /// Stream audio (unsupported; always off).
    pub audio: bool,
    /// Open the control channel.
    pub control: bool,
    /// Longest edge of the encoded video, in device pixels.
    pub max_size: u32,
    /// Target encoder bitrate in bits/second.
    pub video_bit_rate: u32,
    /// Connect through a forward tunnel rather than a reverse one.
    pub tunnel_forward: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            video: true,
            audio: false,
            control: true,
            max_size: 1024,
            video_bit_rate: 4_000_000,
            tunnel_forward: true,
        }
    }
}

impl AgentConfig {
    /// Set the maximum video edge size.
    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the target bitrate.
    pub fn with_bit_rate(mut self, bits_per_second: u32) -> Self {
        self.video_bit_rate = bits_per_second;
        self
    }
}

// ── Streams ──────────────────────────────────────────────────────

/// Boxed byte source.
pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;
/// Boxed byte sink.
pub type ByteWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The three long-lived byte streams a running agent exposes.
pub struct AgentStreams {
    /// Outbound command channel (touch / key injection).
    pub control: ByteWriter,
    /// Compressed video elementary stream.
    pub video: ByteReader,
    /// Line-oriented diagnostic log stream.
    pub log: ByteReader,
}

// ── Collaborator traits ──────────────────────────────────────────

/// Fetches the agent payload by its well-known relative name.
#[async_trait]
pub trait PayloadSource: Send + Sync {
    async fn fetch(&self, name: &str) -> Result<Bytes, GlimpseError>;
}

/// An established, authenticated connection to the device.
#[async_trait]
pub trait DeviceLink: Send + Sync {
    /// Copy the agent payload to `remote_path` on the device.
    async fn push(&self, remote_path: &str, payload: Bytes) -> Result<(), GlimpseError>;

    /// Launch the agent process and open its streams.
    async fn start_agent(
        &self,
        remote_path: &str,
        config: &AgentConfig,
    ) -> Result<AgentStreams, GlimpseError>;
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_agent_contract() {
        let cfg = AgentConfig::default();
        assert!(cfg.video);
        assert!(!cfg.audio);
        assert!(cfg.control);
        assert_eq!(cfg.max_size, 1024);
        assert_eq!(cfg.video_bit_rate, 4_000_000);
        assert!(cfg.tunnel_forward);
    }

    #[test]
    fn builders_override_defaults() {
        let cfg = AgentConfig::default()
            .with_max_size(1920)
            .with_bit_rate(8_000_000);
        assert_eq!(cfg.max_size, 1920);
        assert_eq!(cfg.video_bit_rate, 8_000_000);
    }

    #[test]
    fn digest_is_stable() {
        let a = payload_digest(b"agent bytes");
        let b = payload_digest(b"agent bytes");
        assert_eq!(a, b);
        assert_ne!(a, payload_digest(b"other bytes"));
    }
}
