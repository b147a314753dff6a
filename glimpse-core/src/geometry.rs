//! Coordinate-space types shared across the mirroring pipeline.
//!
//! Two spaces are involved: **device pixel space** (the physical display
//! being mirrored) and **window pixel space** (the floating viewer window
//! on the controlling machine's screen). The video pipeline reports
//! device-space dimensions; the window controller sizes itself from them
//! and the input mapper transforms pointer positions back.

// ── VideoGeometry ────────────────────────────────────────────────

/// Intrinsic dimensions of the mirrored video, in device pixels.
///
/// Replaced wholesale whenever the encoded stream changes size
/// (e.g. device rotation). Width and height are always strictly
/// positive; [`VideoGeometry::new`] rejects anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoGeometry {
    pub width: u32,
    pub height: u32,
}

impl VideoGeometry {
    /// Create a geometry, rejecting zero-sized dimensions.
    pub fn new(width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        Some(Self { width, height })
    }

    /// Whether the display is wider than it is tall.
    pub fn is_landscape(self) -> bool {
        self.width > self.height
    }

    /// Scale to fit under `max_edge` while preserving aspect ratio.
    ///
    /// The longer edge becomes exactly `max_edge`; the shorter edge is
    /// rounded to the nearest pixel. Returns `(width, height)` in
    /// window pixels.
    pub fn aspect_fit(self, max_edge: u32) -> (u32, u32) {
        let (w, h) = (self.width as f64, self.height as f64);
        if self.is_landscape() {
            (max_edge, (max_edge as f64 * h / w).round() as u32)
        } else {
            ((max_edge as f64 * w / h).round() as u32, max_edge)
        }
    }
}

impl std::fmt::Display for VideoGeometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ── SurfaceRect ──────────────────────────────────────────────────

/// The rendering surface's bounding rectangle in window pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl SurfaceRect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Whether a window-space point falls inside the rectangle.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let (ox, oy) = (x - self.left, y - self.top);
        ox >= 0.0 && ox <= self.width && oy >= 0.0 && oy <= self.height
    }
}

// ── Pointer mapping ──────────────────────────────────────────────

/// Map a window-space pointer position onto the device display.
///
/// Returns device-space coordinates, or `None` when the position falls
/// outside the surface rectangle (such events are dropped, no command
/// is sent) or the rectangle is degenerate.
pub fn map_to_device(
    rect: &SurfaceRect,
    geometry: VideoGeometry,
    x: f64,
    y: f64,
) -> Option<(f64, f64)> {
    if rect.width <= 0.0 || rect.height <= 0.0 || !rect.contains(x, y) {
        return None;
    }
    let fx = (x - rect.left) / rect.width;
    let fy = (y - rect.top) / rect.height;
    Some((fx * geometry.width as f64, fy * geometry.height as f64))
}

// ── Tests ────────────────────────────────────────────────────────
