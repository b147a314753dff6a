//! Pointer and key input mapping.
//!
//! Converts viewer-side pointer events (window pixel space) into
//! device-side touch commands (device pixel space) using the rendering
//! surface's current bounding rectangle and the latest
//! [`VideoGeometry`], and forwards them over the control channel.
//!
//! Injection failures (device busy, channel torn down mid-flight) are
//! logged and dropped; they never affect the session phase.

use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tracing::warn;

use crate::control::{
    ControlChannel, ControlMessage, KEYCODE_BACK, KeyAction, MotionAction, MotionButtons,
    POINTER_ID,
};
use crate::geometry::{SurfaceRect, VideoGeometry, map_to_device};

/// Maps pointer events onto the device and injects them.
///
/// Cheap to clone; all clones share the session's control channel.
#[derive(Clone)]
pub struct InputMapper {
    control: Arc<Mutex<ControlChannel>>,
    geometry: watch::Receiver<Option<VideoGeometry>>,
}

impl InputMapper {
    pub fn new(
        control: Arc<Mutex<ControlChannel>>,
        geometry: watch::Receiver<Option<VideoGeometry>>,
    ) -> Self {
        Self { control, geometry }
    }

    /// Map a window-space pointer position and inject a touch command.
    ///
    /// Dropped silently when no geometry has been reported yet or the
    /// position falls outside the surface rectangle.
    pub async fn inject_touch(&self, action: MotionAction, rect: &SurfaceRect, x: f64, y: f64) {
        let Some(geometry) = *self.geometry.borrow() else {
            return;
        };
        let Some((dx, dy)) = map_to_device(rect, geometry, x, y) else {
            return;
        };

        let msg = ControlMessage::InjectTouch {
            action,
            pointer_id: POINTER_ID,
            x: dx.round() as i32,
            y: dy.round() as i32,
            video: geometry,
            pressure: 1.0,
            action_button: 0,
            buttons: MotionButtons::empty(),
        };
        if let Err(e) = self.control.lock().await.send(&msg).await {
            warn!("touch injection failed: {e}");
        }
    }

    /// Press and release the Back key.
    pub async fn press_back(&self) {
        self.send_logged(&ControlMessage::key(KeyAction::Down, KEYCODE_BACK))
            .await;
        self.send_logged(&ControlMessage::key(KeyAction::Up, KEYCODE_BACK))
            .await;
    }

    /// Composite back-or-screen-on press (the "home" control of the
    /// viewer window).
    pub async fn back_or_screen_on(&self) {
        self.send_logged(&ControlMessage::BackOrScreenOn {
            action: KeyAction::Down,
        })
        .await;
        self.send_logged(&ControlMessage::BackOrScreenOn {
            action: KeyAction::Up,
        })
        .await;
    }

    async fn send_logged(&self, msg: &ControlMessage) {
        if let Err(e) = self.control.lock().await.send(msg).await {
            warn!("key injection failed: {e}");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn mapper_with_device(
        geometry: Option<VideoGeometry>,
    ) -> (InputMapper, tokio::io::DuplexStream) {
        let (client, device) = tokio::io::duplex(1024);
        let control = Arc::new(Mutex::new(ControlChannel::new(Box::new(client))));
        let (tx, rx) = watch::channel(geometry);
        // borrow() keeps working after the sender is gone.
        drop(tx);
        (InputMapper::new(control, rx), device)
    }

    #[tokio::test]
    async fn maps_and_injects_touch() {
        let (mapper, mut device) = mapper_with_device(VideoGeometry::new(1080, 2400));
        let rect = SurfaceRect::new(0.0, 0.0, 342.0, 760.0);

        mapper
            .inject_touch(MotionAction::Down, &rect, 50.0, 50.0)
            .await;

        let mut buf = [0u8; 32];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf[0], 2); // InjectTouch
        assert_eq!(buf[1], 0); // Down
        assert_eq!(i32::from_be_bytes(buf[10..14].try_into().unwrap()), 158);
        assert_eq!(i32::from_be_bytes(buf[14..18].try_into().unwrap()), 158);
        assert_eq!(u16::from_be_bytes(buf[18..20].try_into().unwrap()), 1080);
        assert_eq!(u16::from_be_bytes(buf[20..22].try_into().unwrap()), 2400);
    }

    #[tokio::test]
    async fn outside_surface_emits_nothing() {
        let (mapper, mut device) = mapper_with_device(VideoGeometry::new(1080, 2400));
        let rect = SurfaceRect::new(0.0, 0.0, 342.0, 760.0);

        mapper
            .inject_touch(MotionAction::Down, &rect, 500.0, 50.0)
            .await;
        // A key tap afterwards must be the first bytes on the wire,
        // proving the out-of-bounds touch emitted nothing.
        mapper.press_back().await;

        let mut buf = [0u8; 14];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf[0], 0); // InjectKey, not InjectTouch
        assert_eq!(u32::from_be_bytes(buf[2..6].try_into().unwrap()), KEYCODE_BACK);
    }

    #[tokio::test]
    async fn no_geometry_emits_nothing() {
        let (mapper, mut device) = mapper_with_device(None);
        let rect = SurfaceRect::new(0.0, 0.0, 342.0, 760.0);

        mapper
            .inject_touch(MotionAction::Down, &rect, 50.0, 50.0)
            .await;
        mapper.back_or_screen_on().await;

        let mut buf = [0u8; 2];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf[0], 4); // BackOrScreenOn
    }

    #[tokio::test]
    async fn back_is_down_then_up() {
        let (mapper, mut device) = mapper_with_device(VideoGeometry::new(1080, 2400));

        mapper.press_back().await;

        let mut buf = [0u8; 28];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!((buf[0], buf[1]), (0, 0)); // key down
        assert_eq!((buf[14], buf[15]), (0, 1)); // key up
    }

    #[tokio::test]
    async fn channel_failure_is_swallowed() {
        let (mapper, device) = mapper_with_device(VideoGeometry::new(1080, 2400));
        drop(device); // device side gone

        // Must not panic or propagate.
        mapper.press_back().await;
        let rect = SurfaceRect::new(0.0, 0.0, 342.0, 760.0);
        mapper
            .inject_touch(MotionAction::Move, &rect, 10.0, 10.0)
            .await;
    }
}
