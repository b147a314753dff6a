//! # glimpse-core
//!
//! Engine library for the glimpse screen-mirroring session.
//!
//! This crate contains:
//! - **Session**: `SessionController` and the `SessionPhase` lifecycle machine
//! - **Video**: `VideoStreamCodec` framing and the `VideoPipeline` decode pump
//! - **Control**: `ControlChannel` with the fixed-layout injection commands
//! - **Input**: `InputMapper` for window-space → device-space pointer mapping
//! - **Geometry**: `VideoGeometry`, aspect-fit and coordinate transforms
//! - **Device**: collaborator traits (`DeviceLink`, `PayloadSource`) and the
//!   agent start configuration
//! - **Error**: `GlimpseError` — typed, `thiserror`-based error hierarchy
//!
//! Device discovery/authentication, pixel presentation and the rest of the
//! viewer surface live in `glimpse-viewer`.

pub mod control;
pub mod device;
pub mod error;
pub mod geometry;
pub mod input;
pub mod session;
pub mod video;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use control::{
    ControlChannel, ControlMessage, KEYCODE_BACK, KeyAction, MotionAction, MotionButtons,
    PERMISSION_DENIED_MARKER, POINTER_ID,
};
pub use device::{
    AGENT_ARTIFACT, AGENT_DEVICE_PATH, AGENT_VERSION, AgentConfig, AgentStreams, ByteReader,
    ByteWriter, DeviceLink, PayloadSource,
};
pub use error::GlimpseError;
pub use geometry::{SurfaceRect, VideoGeometry, map_to_device};
pub use input::InputMapper;
pub use session::{DecoderFactory, SessionController, SessionPhase};
pub use video::{
    DecodedFrame, MAX_PACKET_SIZE, PipelineStats, VideoDecoder, VideoPacket, VideoPipeline,
    VideoStreamCodec,
};
