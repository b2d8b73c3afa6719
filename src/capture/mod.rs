//! Live camera capture.
//!
//! A [`CaptureBackend`] opens video streams and lists devices; the
//! [`CaptureSource`] is the state machine that owns the active stream and
//! decides what to open next. The backend calls are asynchronous, their
//! results are handed back to the source through [`CaptureSource::on_opened`].
//!
//! ```text
//! Unrequested --begin_request--> Requesting --on_opened(Ok)--> Active
//!                                     |                          |
//!                                     +--on_opened(Err)--> Failed |
//!                               Active --plan_switch--> Requesting (old stream kept)
//! ```

use std::{fmt, str::FromStr};

use crate::{
    error::CaptureError,
    flow::{MaybeSend, Task},
};

#[cfg(target_arch = "wasm32")]
pub mod web;

/// Which way the requested camera should face.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FacingMode {
    /// Rear camera.
    #[default]
    Environment,
    /// Front camera.
    User,
}

impl FacingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FacingMode::Environment => "environment",
            FacingMode::User => "user",
        }
    }
}

impl FromStr for FacingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "environment" | "rear" | "back" => Ok(FacingMode::Environment),
            "user" | "front" => Ok(FacingMode::User),
            other => anyhow::bail!("unknown facing mode {other:?}"),
        }
    }
}

/// What to ask the platform for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VideoConstraint {
    Facing(FacingMode),
    /// Exactly this device.
    Device(String),
}

impl Default for VideoConstraint {
    fn default() -> Self {
        VideoConstraint::Facing(FacingMode::default())
    }
}

impl fmt::Display for VideoConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoConstraint::Facing(mode) => write!(f, "facing {}", mode.as_str()),
            VideoConstraint::Device(id) => write!(f, "device {id}"),
        }
    }
}

/// A video input as reported by device enumeration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_id: String,
    /// Empty until the user granted camera access once.
    pub label: String,
}

/// The latest picture of a stream.
#[derive(Clone, Copy, Debug)]
pub enum Frame<'a> {
    /// Tightly packed RGBA8 rows.
    Rgba {
        width: u32,
        height: u32,
        data: &'a [u8],
    },
    /// A playing video element the GPU can copy from directly.
    #[cfg(target_arch = "wasm32")]
    Video(&'a web_sys::HtmlVideoElement),
}

/// A live stream from one camera.
pub trait VideoStream: MaybeSend {
    /// The device the stream comes from, if the platform says.
    fn device_id(&self) -> Option<String>;

    /// The current frame, `None` until the first one arrived.
    fn current_frame(&self) -> Option<Frame<'_>>;

    /// Release the camera. The stream shows nothing afterwards.
    fn stop_tracks(&mut self);
}

impl fmt::Debug for dyn VideoStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoStream")
            .field("device_id", &self.device_id())
            .finish_non_exhaustive()
    }
}

pub type StreamResult = Result<Box<dyn VideoStream>, CaptureError>;

/// Platform access to cameras.
pub trait CaptureBackend: Send + Sync {
    fn open(&self, constraint: VideoConstraint) -> Task<StreamResult>;

    /// Video inputs only.
    fn enumerate(&self) -> Task<Result<Vec<DeviceInfo>, CaptureError>>;
}

/// Backend for platforms without a camera integration.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoCapture;

impl CaptureBackend for NoCapture {
    fn open(&self, _constraint: VideoConstraint) -> Task<StreamResult> {
        Box::pin(async { Err(CaptureError::NoDevice) })
    }

    fn enumerate(&self) -> Task<Result<Vec<DeviceInfo>, CaptureError>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

/// The camera backend of the current platform.
pub fn platform_backend() -> std::sync::Arc<dyn CaptureBackend> {
    #[cfg(target_arch = "wasm32")]
    {
        std::sync::Arc::new(web::WebCapture)
    }
    #[cfg(not(target_arch = "wasm32"))]
    {
        std::sync::Arc::new(NoCapture)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaptureState {
    Unrequested,
    Requesting,
    Active,
    /// The last request failed. The viewer runs on without video.
    Failed(CaptureError),
}

/// Owns the active stream and tracks which device it belongs to.
#[derive(Debug)]
pub struct CaptureSource {
    state: CaptureState,
    stream: Option<Box<dyn VideoStream>>,
    active_index: Option<usize>,
    pending_index: Option<usize>,
}

impl Default for CaptureSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSource {
    pub fn new() -> Self {
        Self {
            state: CaptureState::Unrequested,
            stream: None,
            active_index: None,
            pending_index: None,
        }
    }

    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    pub fn stream(&self) -> Option<&dyn VideoStream> {
        self.stream.as_deref()
    }

    /// Position of the active device in the last enumerated list.
    pub fn active_index(&self) -> Option<usize> {
        self.active_index
    }

    pub fn current_frame(&self) -> Option<Frame<'_>> {
        self.stream.as_ref()?.current_frame()
    }

    /// Start the first request. Returns the constraint to open, or `None`
    /// while a stream is active or a request is already running.
    pub fn begin_request(&mut self, constraint: VideoConstraint) -> Option<VideoConstraint> {
        match self.state {
            CaptureState::Unrequested | CaptureState::Failed(_) => {
                log::info!("Requesting camera ({constraint})");
                self.state = CaptureState::Requesting;
                Some(constraint)
            }
            CaptureState::Requesting | CaptureState::Active => None,
        }
    }

    /// Apply the outcome of an open request.
    pub fn on_opened(&mut self, result: StreamResult) {
        match result {
            Ok(stream) => {
                if let Some(mut previous) = self.stream.replace(stream) {
                    previous.stop_tracks();
                    log::info!("Stopped the previous camera stream");
                }
                if let Some(index) = self.pending_index.take() {
                    self.active_index = Some(index);
                    log::info!("Switched to camera {index}");
                }
                self.state = CaptureState::Active;
            }
            Err(e) if self.stream.is_some() => {
                self.pending_index = None;
                self.state = CaptureState::Active;
                log::error!("Could not switch camera: {e}, keeping the current one");
            }
            Err(e) => {
                log::error!("Camera unavailable: {e}");
                self.state = CaptureState::Failed(e);
            }
        }
    }

    /// Release the camera for good, e.g. on shutdown.
    pub fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop_tracks();
            log::info!("Camera stream stopped");
        }
        self.pending_index = None;
        self.active_index = None;
        self.state = CaptureState::Unrequested;
    }

    /// Plan a switch to the next device of `devices`.
    ///
    /// With fewer than two devices this is a no-op that only logs a warning.
    /// Otherwise the returned constraint selects device `(active + 1) % N`;
    /// the new index takes effect once that stream is opened.
    pub fn plan_switch(&mut self, devices: &[DeviceInfo]) -> Option<VideoConstraint> {
        if devices.len() < 2 {
            log::warn!(
                "Camera switch ignored: {} video input(s) available",
                devices.len()
            );
            return None;
        }
        if self.state != CaptureState::Active {
            log::warn!("Camera switch ignored: no active stream ({:?})", self.state);
            return None;
        }
        let current = self
            .active_index
            .filter(|i| *i < devices.len())
            .or_else(|| {
                let id = self.stream.as_ref()?.device_id()?;
                devices.iter().position(|d| d.device_id == id)
            })
            .unwrap_or(0);
        let next = (current + 1) % devices.len();
        self.active_index = Some(current);
        self.pending_index = Some(next);
        self.state = CaptureState::Requesting;
        log::info!(
            "Switching camera {} -> {} ({})",
            current,
            next,
            devices[next].label
        );
        Some(VideoConstraint::Device(devices[next].device_id.clone()))
    }
}
