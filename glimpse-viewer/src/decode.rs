//! H.264 decoding for the video pipeline.
//!
//! Enabled through the `h264` cargo feature. Without it the viewer
//! still brings the session up and tracks stream statistics, but no
//! pixels are produced.

use glimpse_core::{DecodedFrame, GlimpseError, VideoPacket, VideoDecoder};

#[cfg(feature = "h264")]
mod openh264_impl {
    use openh264::OpenH264API;
    use openh264::decoder::{Decoder, DecoderConfig};

    use super::*;

    /// Software H.264 decoder producing RGB frames.
    pub struct H264Decoder {
        decoder: Decoder,
    }

    impl H264Decoder {
        pub fn new() -> Result<Self, GlimpseError> {
            let api = OpenH264API::from_source();
            let decoder = Decoder::with_api_config(api, DecoderConfig::new())
                .map_err(|e| GlimpseError::Decode(e.to_string()))?;
            Ok(Self { decoder })
        }
    }

    impl VideoDecoder for H264Decoder {
        fn decode(&mut self, packet: &VideoPacket) -> Result<Option<DecodedFrame>, GlimpseError> {
            match self.decoder.decode(&packet.data) {
                Ok(Some(yuv)) => {
                    let (width, height) = yuv.dimensions();
                    let mut rgb = vec![0u8; width * height * 3];
                    yuv.write_rgb8(&mut rgb);
                    Ok(Some(DecodedFrame {
                        width: width as u32,
                        height: height as u32,
                        data: rgb,
                    }))
                }
                // Parameter sets and partial units produce no frame.
                Ok(None) => Ok(None),
                Err(e) => Err(GlimpseError::Decode(e.to_string())),
            }
        }
    }
}

#[cfg(feature = "h264")]
pub use openh264_impl::H264Decoder;

#[cfg(not(feature = "h264"))]
mod stub {
    use super::*;

    /// Stats-only stand-in used when the `h264` feature is off.
    pub struct H264Decoder;

    impl H264Decoder {
        pub fn new() -> Result<Self, GlimpseError> {
            tracing::warn!("built without the h264 feature; frames will not be decoded");
            Ok(Self)
        }
    }

    impl VideoDecoder for H264Decoder {
        fn decode(&mut self, _packet: &VideoPacket) -> Result<Option<DecodedFrame>, GlimpseError> {
            Ok(None)
        }
    }
}

#[cfg(not(feature = "h264"))]
pub use stub::H264Decoder;

// ── Tests ────────────────────────────────────────────────────────
