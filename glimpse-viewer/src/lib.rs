//! # glimpse-viewer
//!
//! Viewer-side pieces of the glimpse mirror: configuration, the
//! adb-backed device collaborators, H.264 decoding and the floating
//! window placement logic. The `glimpse-viewer` binary wires these to
//! a [`glimpse_core::SessionController`].

pub mod config;
pub mod decode;
pub mod link;
pub mod window;

pub use config::ViewerConfig;
pub use decode::H264Decoder;
pub use link::{AdbLink, DirPayloadSource};
pub use window::{FloatingWindow, HANDLE_HEIGHT, WindowRect};
