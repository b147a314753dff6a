//! Control channel to the device-side agent.
//!
//! # Wire Protocol
//!
//! Outbound commands are fixed-layout big-endian records, one message
//! type byte followed by the message body:
//!
//! ```text
//! InjectTouch      type(1) action(1) pointer_id(8) x(4) y(4)
//!                  video_width(2) video_height(2) pressure(2)
//!                  action_button(4) buttons(4)
//! InjectKey        type(1) action(1) keycode(4) repeat(4) meta_state(4)
//! BackOrScreenOn   type(1) action(1)
//! ```
//!
//! Pressure is a `u16` fixed-point fraction (`0xFFFF` = full pressure).
//!
//! Inbound traffic is a line-oriented diagnostic text stream pumped by
//! the session controller; a line containing
//! [`PERMISSION_DENIED_MARKER`] is the sole trigger for the
//! permission-warning state.

use bitflags::bitflags;
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::GlimpseError;
use crate::geometry::VideoGeometry;

// ── Constants ────────────────────────────────────────────────────

/// Single-pointer mirroring: all touch commands carry this pointer id.
pub const POINTER_ID: u64 = 0;

/// Android `KEYCODE_BACK`.
pub const KEYCODE_BACK: u32 = 4;

/// Substring of an agent log line that indicates the injection
/// permission is restricted on the device.
pub const PERMISSION_DENIED_MARKER: &str = "INJECT_EVENTS permission";

const MSG_INJECT_KEY: u8 = 0;
const MSG_INJECT_TOUCH: u8 = 2;
const MSG_BACK_OR_SCREEN_ON: u8 = 4;

// ── Actions ──────────────────────────────────────────────────────

/// Touch motion phase, matching Android motion-event actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MotionAction {
    Down = 0,
    Up = 1,
    Move = 2,
}

/// Key phase, matching Android key-event actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyAction {
    Down = 0,
    Up = 1,
}

bitflags! {
    /// Pointer button state carried in touch commands.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MotionButtons: u32 {
        const PRIMARY = 1;
        const SECONDARY = 1 << 1;
        const TERTIARY = 1 << 2;
    }
}

// ── ControlMessage ───────────────────────────────────────────────

/// An outbound command for the device-side agent.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// Inject a single-pointer touch event at device coordinates.
    ///
    /// `video` carries the geometry the coordinates were computed
    /// against, so the agent can rescale if the display changed
    /// between mapping and delivery.
    InjectTouch {
        action: MotionAction,
        pointer_id: u64,
        x: i32,
        y: i32,
        video: VideoGeometry,
        pressure: f32,
        action_button: u32,
        buttons: MotionButtons,
    },

    /// Inject a key event.
    InjectKey {
        action: KeyAction,
        keycode: u32,
        repeat: u32,
        meta_state: u32,
    },

    /// Composite "press back, or wake the screen if it is off".
    BackOrScreenOn { action: KeyAction },
}

impl ControlMessage {
    /// Serialise into the wire layout described in the module docs.
    pub fn encode(&self, buf: &mut BytesMut) {
        match *self {
            ControlMessage::InjectTouch {
                action,
                pointer_id,
                x,
                y,
                video,
                pressure,
                action_button,
                buttons,
            } => {
                buf.put_u8(MSG_INJECT_TOUCH);
                buf.put_u8(action as u8);
                buf.put_u64(pointer_id);
                buf.put_i32(x);
                buf.put_i32(y);
                buf.put_u16(video.width as u16);
                buf.put_u16(video.height as u16);
                buf.put_u16((pressure.clamp(0.0, 1.0) * f32::from(u16::MAX)) as u16);
                buf.put_u32(action_button);
                buf.put_u32(buttons.bits());
            }
            ControlMessage::InjectKey {
                action,
                keycode,
                repeat,
                meta_state,
            } => {
                buf.put_u8(MSG_INJECT_KEY);
                buf.put_u8(action as u8);
                buf.put_u32(keycode);
                buf.put_u32(repeat);
                buf.put_u32(meta_state);
            }
            ControlMessage::BackOrScreenOn { action } => {
                buf.put_u8(MSG_BACK_OR_SCREEN_ON);
                buf.put_u8(action as u8);
            }
        }
    }

    /// A key press or release with no repeat and no meta state.
    pub fn key(action: KeyAction, keycode: u32) -> Self {
        ControlMessage::InjectKey {
            action,
            keycode,
            repeat: 0,
            meta_state: 0,
        }
    }
}

// ── ControlChannel ───────────────────────────────────────────────

/// Outbound half of the control connection.
///
/// Owned 1:1 by the live session; [`close`](Self::close) is idempotent
/// and must be called exactly once per session during teardown.
pub struct ControlChannel {
    writer: Option<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl ControlChannel {
    pub fn new(writer: Box<dyn AsyncWrite + Send + Unpin>) -> Self {
        Self {
            writer: Some(writer),
        }
    }

    /// Encode and transmit one command.
    ///
    /// Fails with [`GlimpseError::ChannelClosed`] after [`close`](Self::close).
    pub async fn send(&mut self, msg: &ControlMessage) -> Result<(), GlimpseError> {
        let writer = self.writer.as_mut().ok_or(GlimpseError::ChannelClosed)?;
        let mut buf = BytesMut::with_capacity(32);
        msg.encode(&mut buf);
        writer.write_all(&buf).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Shut the channel down. Safe to call more than once; errors from
    /// an already-broken transport are swallowed.
    pub async fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }
}

// ── Tests ────────────────────────────────────────────────────────
