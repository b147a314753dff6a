//! Floating mirror window placement.
//!
//! The window is a borderless rectangle whose top strip acts as the
//! drag handle; everything inside the rectangle is the rendering
//! surface. Dragging never applies pointer positions directly: moves
//! record a candidate origin and the host applies at most one of them
//! per animation frame, so a burst of pointer events costs one layout
//! pass. Releasing the pointer applies the final position immediately
//! and cancels any still-scheduled frame.
//!
//! Resizes preserve the window origin: a device rotation swaps the
//! aspect-fitted edges in place.

use glimpse_core::{SurfaceRect, VideoGeometry};

use crate::config::WindowConfig;

/// Height of the drag-handle strip at the top of the window.
pub const HANDLE_HEIGHT: f64 = 48.0;

/// Window placement in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl WindowRect {
    fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }

    fn handle_contains(&self, x: f64, y: f64) -> bool {
        self.contains(x, y) && y < self.y + HANDLE_HEIGHT.min(self.height)
    }
}

/// One in-progress drag.
struct DragGesture {
    /// Pointer offset from the window origin at grab time.
    grab_dx: f64,
    grab_dy: f64,
    /// Most recent candidate origin, not yet applied.
    candidate: Option<(f64, f64)>,
    /// An animation frame has been requested and not yet delivered.
    frame_scheduled: bool,
}

/// Drag and resize logic for the floating mirror window.
pub struct FloatingWindow {
    rect: WindowRect,
    gesture: Option<DragGesture>,
    max_edge: u32,
}

impl FloatingWindow {
    /// A window at the configured origin, unsized until the first
    /// geometry report arrives.
    pub fn new(config: &WindowConfig) -> Self {
        Self {
            rect: WindowRect {
                x: config.initial_x,
                y: config.initial_y,
                width: 0.0,
                height: 0.0,
            },
            gesture: None,
            max_edge: config.max_edge,
        }
    }

    pub fn rect(&self) -> WindowRect {
        self.rect
    }

    /// The rendering surface, for pointer-to-device mapping.
    pub fn surface_rect(&self) -> SurfaceRect {
        SurfaceRect::new(self.rect.x, self.rect.y, self.rect.width, self.rect.height)
    }

    /// Content pointer events are swallowed while a drag is active.
    pub fn content_blocked(&self) -> bool {
        self.gesture.is_some()
    }

    /// Fit the window to the reported video geometry, preserving the
    /// origin. Returns the new placement.
    pub fn apply_geometry(&mut self, geometry: VideoGeometry) -> WindowRect {
        let (width, height) = geometry.aspect_fit(self.max_edge);
        self.rect.width = f64::from(width);
        self.rect.height = f64::from(height);
        self.rect
    }

    /// Pointer pressed at screen position `(x, y)`. Starts a drag when
    /// the position falls inside the handle strip; returns whether a
    /// drag started.
    pub fn pointer_down(&mut self, x: f64, y: f64) -> bool {
        if !self.rect.handle_contains(x, y) {
            return false;
        }
        self.gesture = Some(DragGesture {
            grab_dx: x - self.rect.x,
            grab_dy: y - self.rect.y,
            candidate: None,
            frame_scheduled: false,
        });
        true
    }

    /// Pointer moved during a drag. Records the candidate origin and
    /// returns `true` when the host should schedule an animation
    /// frame; at most one frame is outstanding at a time.
    pub fn pointer_move(&mut self, x: f64, y: f64) -> bool {
        let Some(gesture) = &mut self.gesture else {
            return false;
        };
        gesture.candidate = Some((x - gesture.grab_dx, y - gesture.grab_dy));
        if gesture.frame_scheduled {
            return false;
        }
        gesture.frame_scheduled = true;
        true
    }

    /// Animation frame delivered: apply the latest candidate origin.
    pub fn on_frame(&mut self) -> Option<WindowRect> {
        let gesture = self.gesture.as_mut()?;
        if !gesture.frame_scheduled {
            return None;
        }
        gesture.frame_scheduled = false;
        let (x, y) = gesture.candidate.take()?;
        self.rect.x = x;
        self.rect.y = y;
        Some(self.rect)
    }

    /// Pointer released: apply the final position immediately and end
    /// the drag. Any scheduled frame is cancelled. Returns the final
    /// placement when a drag was active.
    pub fn pointer_up(&mut self) -> Option<WindowRect> {
        let gesture = self.gesture.take()?;
        if let Some((x, y)) = gesture.candidate {
            self.rect.x = x;
            self.rect.y = y;
        }
        Some(self.rect)
    }
}

// ── Tests ────────────────────────────────────────────────────────
