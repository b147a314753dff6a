//! Video ingest pipeline.
//!
//! Consumes the agent's compressed video elementary stream, decodes it
//! through a [`VideoDecoder`] collaborator, and publishes decoded frames
//! and display geometry over `tokio::sync::watch` channels so the viewer
//! can render without blocking the pump.
//!
//! # Stream framing
//!
//! ```text
//! Preamble   codec_id(4) width(4) height(4)              — once
//! Packet     pts_flags(8) payload_len(4) payload(len)    — repeated
//! ```
//!
//! All integers big-endian. The top two bits of `pts_flags` mark config
//! and key-frame packets; the remaining 62 bits are the presentation
//! timestamp in microseconds.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes, BytesMut};
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::watch;
use tokio_util::codec::{Decoder, FramedRead};
use tracing::{debug, info, warn};

use crate::error::GlimpseError;
use crate::geometry::VideoGeometry;

// ── Framing constants ────────────────────────────────────────────

const PREAMBLE_LEN: usize = 12;
const PACKET_HEADER_LEN: usize = 12;

const FLAG_CONFIG: u64 = 1 << 63;
const FLAG_KEY_FRAME: u64 = 1 << 62;
const PTS_MASK: u64 = !(FLAG_CONFIG | FLAG_KEY_FRAME);

/// Upper bound for a single encoded packet.
pub const MAX_PACKET_SIZE: usize = 8 * 1024 * 1024;

// ── Stream items ─────────────────────────────────────────────────

/// One encoded packet from the elementary stream.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoPacket {
    /// Presentation timestamp in microseconds.
    pub pts: u64,
    /// Codec configuration data (SPS/PPS), not a picture.
    pub is_config: bool,
    pub is_key_frame: bool,
    pub data: Bytes,
}

/// Items produced by [`VideoStreamCodec`].
#[derive(Debug, Clone, PartialEq)]
pub enum VideoEvent {
    /// The stream preamble: codec identifier and initial geometry.
    Stream {
        codec_id: u32,
        geometry: VideoGeometry,
    },
    Packet(VideoPacket),
}

// ── VideoStreamCodec ─────────────────────────────────────────────

/// `tokio_util` decoder for the agent's video stream framing.
#[derive(Debug, Default)]
pub struct VideoStreamCodec {
    preamble_done: bool,
    /// Header of a packet whose payload has not fully arrived yet.
    pending: Option<(u64, usize)>,
}

impl VideoStreamCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for VideoStreamCodec {
    type Item = VideoEvent;
    type Error = GlimpseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<VideoEvent>, GlimpseError> {
        if !self.preamble_done {
            if src.len() < PREAMBLE_LEN {
                return Ok(None);
            }
            let codec_id = src.get_u32();
            let width = src.get_u32();
            let height = src.get_u32();
            let geometry = VideoGeometry::new(width, height)
                .ok_or(GlimpseError::InvalidStream("zero-sized stream preamble"))?;
            self.preamble_done = true;
            return Ok(Some(VideoEvent::Stream { codec_id, geometry }));
        }

        let (pts_flags, len) = match self.pending {
            Some(header) => header,
            None => {
                if src.len() < PACKET_HEADER_LEN {
                    return Ok(None);
                }
                let pts_flags = src.get_u64();
                let len = src.get_u32() as usize;
                if len > MAX_PACKET_SIZE {
                    return Err(GlimpseError::PacketTooLarge {
                        size: len,
                        max: MAX_PACKET_SIZE,
                    });
                }
                self.pending = Some((pts_flags, len));
                (pts_flags, len)
            }
        };

        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }
        self.pending = None;
        let data = src.split_to(len).freeze();

        Ok(Some(VideoEvent::Packet(VideoPacket {
            pts: pts_flags & PTS_MASK,
            is_config: pts_flags & FLAG_CONFIG != 0,
            is_key_frame: pts_flags & FLAG_KEY_FRAME != 0,
            data,
        })))
    }
}

// ── Decoder collaborator ─────────────────────────────────────────

/// A decoded picture, tightly packed RGB rows.
#[derive(Debug, Clone, Default)]
pub struct DecodedFrame {
    pub width: u32,
    pub height: u32,
    /// `width * height * 3` bytes.
    pub data: Vec<u8>,
}

/// Hardware (or software) video decode, consumed as a collaborator.
///
/// Implementations are created fresh per session attempt and dropped on
/// teardown; dropping releases the underlying decoder resources.
pub trait VideoDecoder: Send {
    /// Feed one encoded packet. Returns a picture when one is ready;
    /// config packets typically return `None`.
    fn decode(&mut self, packet: &VideoPacket) -> Result<Option<DecodedFrame>, GlimpseError>;
}

// ── PipelineStats ────────────────────────────────────────────────

/// Per-stream statistics exposed to the viewer.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Current smoothed frames per second.
    pub fps: f64,
    /// Total packets consumed from the stream.
    pub total_packets: u64,
    /// Total pictures produced by the decoder.
    pub total_frames: u64,
    /// Total compressed bytes received.
    pub total_bytes: u64,
}

// ── VideoPipeline ────────────────────────────────────────────────

/// Long-running pump: elementary stream in, rendered frames out.
///
/// The latest decoded frame and the current [`VideoGeometry`] are
/// published via `watch` channels; geometry is re-published only when
/// the intrinsic dimensions actually change (e.g. device rotation).
pub struct VideoPipeline {
    decoder: Box<dyn VideoDecoder>,
    running: Arc<AtomicBool>,
    frame_tx: watch::Sender<Option<DecodedFrame>>,
    frame_rx: watch::Receiver<Option<DecodedFrame>>,
    geometry_tx: watch::Sender<Option<VideoGeometry>>,
    geometry_rx: watch::Receiver<Option<VideoGeometry>>,
    stats_tx: watch::Sender<PipelineStats>,
    stats_rx: watch::Receiver<PipelineStats>,
}

impl VideoPipeline {
    pub fn new(decoder: Box<dyn VideoDecoder>) -> Self {
        let (frame_tx, frame_rx) = watch::channel(None);
        let (geometry_tx, geometry_rx) = watch::channel(None);
        let (stats_tx, stats_rx) = watch::channel(PipelineStats::default());
        Self {
            decoder,
            running: Arc::new(AtomicBool::new(false)),
            frame_tx,
            frame_rx,
            geometry_tx,
            geometry_rx,
            stats_tx,
            stats_rx,
        }
    }

    /// Latest decoded frame, `None` until the first picture.
    pub fn frame_receiver(&self) -> watch::Receiver<Option<DecodedFrame>> {
        self.frame_rx.clone()
    }

    /// Current display geometry, `None` until the stream preamble.
    pub fn geometry_receiver(&self) -> watch::Receiver<Option<VideoGeometry>> {
        self.geometry_rx.clone()
    }

    pub fn stats_receiver(&self) -> watch::Receiver<PipelineStats> {
        self.stats_rx.clone()
    }

    /// A cloneable stop handle.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Signal the pump to stop after the current packet.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run the decode pump until the stream ends, an unrecoverable
    /// stream error occurs, or [`stop`](Self::stop) is observed.
    ///
    /// Decoder failures on individual packets are logged and skipped;
    /// only framing and transport errors abort the pump.
    pub async fn run<R>(&mut self, reader: R) -> Result<(), GlimpseError>
    where
        R: AsyncRead + Unpin,
    {
        self.running.store(true, Ordering::SeqCst);
        let mut framed = FramedRead::new(reader, VideoStreamCodec::new());

        let mut current: Option<VideoGeometry> = None;
        let mut stats = PipelineStats::default();
        let mut fps_samples: Vec<Duration> = Vec::with_capacity(120);
        let mut last_frame_time = Instant::now();

        while self.running.load(Ordering::SeqCst) {
            let event = match framed.next().await {
                None => break, // stream ended
                Some(Ok(ev)) => ev,
                Some(Err(e)) => {
                    self.running.store(false, Ordering::SeqCst);
                    return Err(e);
                }
            };

            match event {
                VideoEvent::Stream { codec_id, geometry } => {
                    info!("video stream: codec {codec_id:#x}, {geometry}");
                    current = Some(geometry);
                    let _ = self.geometry_tx.send(Some(geometry));
                }
                VideoEvent::Packet(packet) => {
                    stats.total_packets += 1;
                    stats.total_bytes += packet.data.len() as u64;

                    let frame = match self.decoder.decode(&packet) {
                        Ok(Some(frame)) => frame,
                        Ok(None) => {
                            let _ = self.stats_tx.send(stats.clone());
                            continue;
                        }
                        Err(e) => {
                            // Best effort: a bad packet does not kill the stream.
                            warn!("decode error (packet skipped): {e}");
                            continue;
                        }
                    };

                    if let Some(geometry) = VideoGeometry::new(frame.width, frame.height) {
                        if current != Some(geometry) {
                            debug!("geometry changed: {geometry}");
                            current = Some(geometry);
                            let _ = self.geometry_tx.send(Some(geometry));
                        }
                    }

                    // FPS tracking.
                    let now = Instant::now();
                    fps_samples.push(now.duration_since(last_frame_time));
                    last_frame_time = now;
                    if fps_samples.len() > 60 {
                        fps_samples.remove(0);
                    }
                    let avg_secs: f64 = fps_samples.iter().map(|d| d.as_secs_f64()).sum::<f64>()
                        / fps_samples.len() as f64;

                    stats.total_frames += 1;
                    stats.fps = if avg_secs > 0.0 { 1.0 / avg_secs } else { 0.0 };
                    let _ = self.frame_tx.send(Some(frame));
                    let _ = self.stats_tx.send(stats.clone());
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;
    use tokio::io::AsyncWriteExt;

    fn preamble(codec_id: u32, w: u32, h: u32) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u32(codec_id);
        buf.put_u32(w);
        buf.put_u32(h);
        buf
    }

    fn packet(pts: u64, config: bool, payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        let mut flags = pts;
        if config {
            flags |= FLAG_CONFIG;
        }
        buf.put_u64(flags);
        buf.put_u32(payload.len() as u32);
        buf.put_slice(payload);
        buf
    }

    #[test]
    fn codec_parses_preamble_then_packets() {
        let mut codec = VideoStreamCodec::new();
        let mut src = preamble(0x68_32_36_34, 1080, 2400);
        src.extend_from_slice(&packet(0, true, b"sps"));
        src.extend_from_slice(&packet(40_000, false, b"frame-data"));

        let ev = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(
            ev,
            VideoEvent::Stream {
                codec_id: 0x68_32_36_34,
                geometry: VideoGeometry::new(1080, 2400).unwrap(),
            }
        );

        let ev = codec.decode(&mut src).unwrap().unwrap();
        match ev {
            VideoEvent::Packet(p) => {
                assert!(p.is_config);
                assert_eq!(p.pts, 0);
                assert_eq!(&p.data[..], b"sps");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let ev = codec.decode(&mut src).unwrap().unwrap();
        match ev {
            VideoEvent::Packet(p) => {
                assert!(!p.is_config);
                assert_eq!(p.pts, 40_000);
                assert_eq!(&p.data[..], b"frame-data");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        assert!(codec.decode(&mut src).unwrap().is_none());
    }

    #[test]
    fn codec_handles_split_arrivals() {
        let mut codec = VideoStreamCodec::new();
        let mut full = preamble(1, 720, 1280);
        full.extend_from_slice(&packet(7, false, b"abcdef"));

        // Feed one byte at a time; events must appear only when complete.
        let mut src = BytesMut::new();
        let mut events = Vec::new();
        for byte in full.iter() {
            src.put_u8(*byte);
            while let Some(ev) = codec.decode(&mut src).unwrap() {
                events.push(ev);
            }
        }

        assert_eq!(events.len(), 2);
        match &events[1] {
            VideoEvent::Packet(p) => assert_eq!(&p.data[..], b"abcdef"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn codec_rejects_zero_preamble() {
        let mut codec = VideoStreamCodec::new();
        let mut src = preamble(1, 0, 1280);
        assert!(matches!(
            codec.decode(&mut src),
            Err(GlimpseError::InvalidStream(_))
        ));
    }

    #[test]
    fn codec_rejects_oversized_packet() {
        let mut codec = VideoStreamCodec::new();
        let mut src = preamble(1, 720, 1280);
        let _ = codec.decode(&mut src).unwrap();

        let mut hdr = BytesMut::new();
        hdr.put_u64(0);
        hdr.put_u32(MAX_PACKET_SIZE as u32 + 1);
        src.extend_from_slice(&hdr);

        assert!(matches!(
            codec.decode(&mut src),
            Err(GlimpseError::PacketTooLarge { .. })
        ));
    }

    // Decoder stub: frame packets carry "w h" as two u32s, config
    // packets produce no picture.
    struct StubDecoder;

    impl VideoDecoder for StubDecoder {
        fn decode(
            &mut self,
            packet: &VideoPacket,
        ) -> Result<Option<DecodedFrame>, GlimpseError> {
            if packet.is_config {
                return Ok(None);
            }
            let mut data = packet.data.clone();
            let width = data.get_u32();
            let height = data.get_u32();
            Ok(Some(DecodedFrame {
                width,
                height,
                data: vec![0; (width * height * 3) as usize],
            }))
        }
    }

    fn frame_payload(w: u32, h: u32) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u32(w);
        buf.put_u32(h);
        buf
    }

    #[tokio::test]
    async fn pipeline_publishes_geometry_and_frames() {
        let (mut device, viewer) = tokio::io::duplex(4096);
        let mut pipeline = VideoPipeline::new(Box::new(StubDecoder));
        let mut geometry_rx = pipeline.geometry_receiver();
        let mut frame_rx = pipeline.frame_receiver();
        let stats_rx = pipeline.stats_receiver();

        let pump = tokio::spawn(async move { pipeline.run(viewer).await });

        device.write_all(&preamble(1, 1080, 2400)).await.unwrap();
        device.write_all(&packet(0, true, b"sps")).await.unwrap();
        device
            .write_all(&packet(1, false, &frame_payload(1080, 2400)))
            .await
            .unwrap();

        geometry_rx.changed().await.unwrap();
        assert_eq!(
            *geometry_rx.borrow_and_update(),
            VideoGeometry::new(1080, 2400)
        );

        frame_rx.changed().await.unwrap();
        let frame = frame_rx.borrow_and_update().clone().unwrap();
        assert_eq!((frame.width, frame.height), (1080, 2400));

        // Rotation: a frame with swapped dimensions re-publishes geometry.
        device
            .write_all(&packet(2, false, &frame_payload(2400, 1080)))
            .await
            .unwrap();
        geometry_rx.changed().await.unwrap();
        assert_eq!(
            *geometry_rx.borrow_and_update(),
            VideoGeometry::new(2400, 1080)
        );

        // Same dimensions again: no geometry re-publish.
        device
            .write_all(&packet(3, false, &frame_payload(2400, 1080)))
            .await
            .unwrap();
        frame_rx.changed().await.unwrap();
        assert!(!geometry_rx.has_changed().unwrap());

        drop(device); // stream end
        pump.await.unwrap().unwrap();

        let stats = stats_rx.borrow().clone();
        assert_eq!(stats.total_packets, 4);
        assert_eq!(stats.total_frames, 3);
    }

    #[tokio::test]
    async fn pipeline_stops_on_stop_flag() {
        let (mut device, viewer) = tokio::io::duplex(4096);
        let mut pipeline = VideoPipeline::new(Box::new(StubDecoder));
        let stop = pipeline.stop_handle();
        let mut frame_rx = pipeline.frame_receiver();

        let pump = tokio::spawn(async move { pipeline.run(viewer).await });

        device.write_all(&preamble(1, 720, 1280)).await.unwrap();
        device
            .write_all(&packet(1, false, &frame_payload(720, 1280)))
            .await
            .unwrap();
        frame_rx.changed().await.unwrap();

        stop.store(false, Ordering::SeqCst);
        // The pump may exit before or after this write lands; either
        // way it must return cleanly.
        let _ = device
            .write_all(&packet(2, false, &frame_payload(720, 1280)))
            .await;

        pump.await.unwrap().unwrap();
    }
}
