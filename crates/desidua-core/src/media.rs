//! Media plumbing between the native shells and the LiveKit room.
//!
//! Shells push captured microphone PCM and camera I420 frames in, pull
//! decoded remote audio out of a playout buffer, and subscribe a
//! [`VideoSink`] per remote video track to draw tiles.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use livekit::track::{RemoteTrack, RemoteVideoTrack};
use livekit::webrtc::audio_source::native::NativeAudioSource;
use livekit::webrtc::audio_stream::native::NativeAudioStream;
use livekit::webrtc::prelude::*;
use livekit::webrtc::video_source::native::NativeVideoSource;
use livekit::webrtc::video_stream::native::NativeVideoStream;
use tokio::task::JoinHandle;

use crate::errors::DesiduaError;

/// 2 seconds of 48kHz mono.
const PLAYOUT_CAPACITY: usize = 48_000 * 2;

/// Thread-safe ring buffer for decoded remote audio.
///
/// Remote audio streams push samples in; the platform audio output pulls
/// them. When the consumer falls behind the oldest samples are dropped.
pub struct PlayoutBuffer {
    samples: Mutex<VecDeque<i16>>,
    capacity: usize,
}

impl PlayoutBuffer {
    pub fn new() -> Self {
        Self::with_capacity(PLAYOUT_CAPACITY)
    }

    fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, samples: &[i16]) {
        let mut buf = self.samples.lock().unwrap();
        buf.extend(samples.iter().copied());
        let overflow = buf.len().saturating_sub(self.capacity);
        if overflow > 0 {
            buf.drain(..overflow);
        }
    }

    /// Fill `out` with buffered samples and pad the rest with silence.
    /// Returns how many real samples were written.
    pub fn pull(&self, out: &mut [i16]) -> usize {
        let mut buf = self.samples.lock().unwrap();
        let available = buf.len().min(out.len());
        for (slot, sample) in out.iter_mut().zip(buf.drain(..available)) {
            *slot = sample;
        }
        out[available..].fill(0);
        available
    }

    pub fn clear(&self) {
        self.samples.lock().unwrap().clear();
    }
}

impl Default for PlayoutBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// A planar YUV 4:2:0 frame as exchanged with the shells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I420Frame {
    pub width: u32,
    pub height: u32,
    /// Clockwise rotation in degrees: 0, 90, 180 or 270.
    pub rotation: u32,
    pub y: Vec<u8>,
    pub stride_y: u32,
    pub u: Vec<u8>,
    pub stride_u: u32,
    pub v: Vec<u8>,
    pub stride_v: u32,
}

impl I420Frame {
    fn chroma_size(&self) -> (usize, usize) {
        (
            (self.width as usize).div_ceil(2),
            (self.height as usize).div_ceil(2),
        )
    }

    /// Reject frames whose planes cannot hold the declared dimensions.
    pub fn validate(&self) -> Result<(), DesiduaError> {
        if self.width == 0 || self.height == 0 {
            return Err(DesiduaError::InvalidInput("empty video frame".into()));
        }
        if !matches!(self.rotation, 0 | 90 | 180 | 270) {
            return Err(DesiduaError::InvalidInput(format!(
                "unsupported rotation {}",
                self.rotation
            )));
        }
        let (chroma_w, chroma_h) = self.chroma_size();
        check_plane("y", &self.y, self.stride_y, self.width as usize, self.height as usize)?;
        check_plane("u", &self.u, self.stride_u, chroma_w, chroma_h)?;
        check_plane("v", &self.v, self.stride_v, chroma_w, chroma_h)
    }

    fn to_buffer(&self) -> I420Buffer {
        let (w, h) = (self.width as usize, self.height as usize);
        let (chroma_w, chroma_h) = self.chroma_size();

        let mut i420 = I420Buffer::new(self.width, self.height);
        let (dst_y, dst_u, dst_v) = i420.strides();
        let (y, u, v) = i420.data_mut();
        copy_plane(&self.y, self.stride_y as usize, y, dst_y as usize, w, h);
        copy_plane(&self.u, self.stride_u as usize, u, dst_u as usize, chroma_w, chroma_h);
        copy_plane(&self.v, self.stride_v as usize, v, dst_v as usize, chroma_w, chroma_h);
        i420
    }

    fn from_buffer(width: u32, height: u32, rotation: u32, i420: &I420Buffer) -> Self {
        let (y, u, v) = i420.data();
        let (stride_y, stride_u, stride_v) = i420.strides();
        Self {
            width,
            height,
            rotation,
            y: y.to_vec(),
            stride_y,
            u: u.to_vec(),
            stride_u,
            v: v.to_vec(),
            stride_v,
        }
    }
}

fn check_plane(
    name: &str,
    data: &[u8],
    stride: u32,
    width: usize,
    rows: usize,
) -> Result<(), DesiduaError> {
    let stride = stride as usize;
    if stride < width {
        return Err(DesiduaError::InvalidInput(format!(
            "{name} stride {stride} is narrower than {width}"
        )));
    }
    let needed = stride * (rows - 1) + width;
    if data.len() < needed {
        return Err(DesiduaError::InvalidInput(format!(
            "{name} plane holds {} bytes, needs {needed}",
            data.len()
        )));
    }
    Ok(())
}

fn copy_plane(src: &[u8], src_stride: usize, dst: &mut [u8], dst_stride: usize, width: usize, rows: usize) {
    for row in 0..rows {
        let from = row * src_stride;
        let to = row * dst_stride;
        dst[to..to + width].copy_from_slice(&src[from..from + width]);
    }
}

fn rotation_from_degrees(degrees: u32) -> VideoRotation {
    match degrees {
        90 => VideoRotation::VideoRotation90,
        180 => VideoRotation::VideoRotation180,
        270 => VideoRotation::VideoRotation270,
        _ => VideoRotation::VideoRotation0,
    }
}

fn rotation_degrees(rotation: VideoRotation) -> u32 {
    match rotation {
        VideoRotation::VideoRotation90 => 90,
        VideoRotation::VideoRotation180 => 180,
        VideoRotation::VideoRotation270 => 270,
        _ => 0,
    }
}

/// Receives decoded frames of one remote video track.
/// Called from a tokio task, once per frame.
pub trait VideoSink: Send + Sync {
    fn on_frame(&self, track_sid: &str, frame: I420Frame);
}

/// Shared between the room adapter and the shell-facing API.
///
/// The adapter attaches the capture sources it publishes and registers
/// remote tracks as they are subscribed; `reset` drops all of it when the
/// room goes away.
#[derive(Default)]
pub struct MediaBridge {
    playout: Arc<PlayoutBuffer>,
    microphone: Mutex<Option<NativeAudioSource>>,
    camera: Mutex<Option<NativeVideoSource>>,
    remote_video: Mutex<HashMap<String, RemoteVideoTrack>>,
    playout_tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    renderers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl MediaBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed captured microphone PCM into the published audio track.
    /// Frames arriving while no microphone is published are dropped.
    pub async fn push_audio(
        &self,
        samples: &[i16],
        sample_rate: u32,
        channels: u32,
    ) -> Result<(), DesiduaError> {
        if sample_rate == 0 || channels == 0 {
            return Err(DesiduaError::InvalidInput(format!(
                "bad audio format {sample_rate}Hz/{channels}ch"
            )));
        }
        if samples.is_empty() || samples.len() % channels as usize != 0 {
            return Err(DesiduaError::InvalidInput(format!(
                "{} samples do not fill {channels} channels",
                samples.len()
            )));
        }
        let source = self.microphone.lock().unwrap().clone();
        let Some(source) = source else {
            tracing::trace!("audio frame dropped, no microphone published");
            return Ok(());
        };

        let frame = AudioFrame {
            data: samples.into(),
            sample_rate,
            num_channels: channels,
            samples_per_channel: (samples.len() / channels as usize) as u32,
        };
        source
            .capture_frame(&frame)
            .await
            .map_err(|e| DesiduaError::Device(format!("audio capture: {e}")))
    }

    /// Feed a captured camera frame into the published video track.
    /// Frames arriving while no camera is published are dropped.
    pub fn push_video(&self, frame: &I420Frame) -> Result<(), DesiduaError> {
        frame.validate()?;
        let source = self.camera.lock().unwrap().clone();
        let Some(source) = source else {
            tracing::trace!("video frame dropped, no camera published");
            return Ok(());
        };
        source.capture_frame(&VideoFrame {
            rotation: rotation_from_degrees(frame.rotation),
            timestamp_us: 0,
            buffer: frame.to_buffer(),
        });
        Ok(())
    }

    /// Pull up to `capacity` samples of mixed remote audio (48kHz mono).
    /// Missing samples are returned as silence.
    pub fn pull_playout(&self, capacity: usize) -> Vec<i16> {
        let mut out = vec![0; capacity];
        self.playout.pull(&mut out);
        out
    }

    /// Start delivering frames of a subscribed remote video track to `sink`.
    /// Replaces any renderer already running for the track.
    ///
    /// Must be called within a tokio runtime.
    pub fn start_renderer(
        &self,
        track_sid: &str,
        sink: Arc<dyn VideoSink>,
    ) -> Result<(), DesiduaError> {
        let track = self
            .remote_video
            .lock()
            .unwrap()
            .get(track_sid)
            .cloned()
            .ok_or_else(|| DesiduaError::NotFound(format!("video track {track_sid}")))?;

        let task = tokio::spawn(render_loop(track_sid.to_string(), track, sink));
        if let Some(previous) = self.renderers.lock().unwrap().insert(track_sid.to_string(), task) {
            previous.abort();
        }
        Ok(())
    }

    pub fn stop_renderer(&self, track_sid: &str) {
        if let Some(task) = self.renderers.lock().unwrap().remove(track_sid) {
            task.abort();
            tracing::debug!("renderer stopped for {track_sid}");
        }
    }

    pub(crate) fn attach_microphone(&self, source: NativeAudioSource) {
        *self.microphone.lock().unwrap() = Some(source);
    }

    pub(crate) fn attach_camera(&self, source: NativeVideoSource) {
        *self.camera.lock().unwrap() = Some(source);
    }

    pub(crate) fn track_subscribed(&self, track: &RemoteTrack) {
        let sid = track.sid().to_string();
        match track {
            RemoteTrack::Audio(audio) => {
                let mut stream = NativeAudioStream::new(audio.rtc_track(), 48_000, 1);
                let playout = self.playout.clone();
                let task_sid = sid.clone();
                let task = tokio::spawn(async move {
                    tracing::info!("playout started for {task_sid}");
                    while let Some(frame) = stream.next().await {
                        playout.push(&frame.data);
                    }
                    tracing::info!("playout ended for {task_sid}");
                });
                if let Some(previous) = self.playout_tasks.lock().unwrap().insert(sid, task) {
                    previous.abort();
                }
            }
            RemoteTrack::Video(video) => {
                self.remote_video.lock().unwrap().insert(sid, video.clone());
            }
        }
    }

    pub(crate) fn track_unsubscribed(&self, track_sid: &str) {
        if let Some(task) = self.playout_tasks.lock().unwrap().remove(track_sid) {
            task.abort();
        }
        self.remote_video.lock().unwrap().remove(track_sid);
        self.stop_renderer(track_sid);
    }

    /// Forget every source, track and task of the current room.
    pub(crate) fn reset(&self) {
        self.microphone.lock().unwrap().take();
        self.camera.lock().unwrap().take();
        self.remote_video.lock().unwrap().clear();
        for (_, task) in self.playout_tasks.lock().unwrap().drain() {
            task.abort();
        }
        for (_, task) in self.renderers.lock().unwrap().drain() {
            task.abort();
        }
        self.playout.clear();
        tracing::debug!("media bridge reset");
    }
}

async fn render_loop(track_sid: String, track: RemoteVideoTrack, sink: Arc<dyn VideoSink>) {
    tracing::info!("renderer started for {track_sid}");
    let mut stream = NativeVideoStream::new(track.rtc_track());
    while let Some(frame) = stream.next().await {
        let width = frame.buffer.width();
        let height = frame.buffer.height();
        let i420 = frame.buffer.to_i420();
        sink.on_frame(
            &track_sid,
            I420Frame::from_buffer(width, height, rotation_degrees(frame.rotation), &i420),
        );
    }
    tracing::info!("renderer for {track_sid} ended");
}
