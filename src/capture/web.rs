//! Browser camera access through `navigator.mediaDevices`.

use js_sys::{Array, Object, Reflect};
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    DomException, HtmlVideoElement, MediaDeviceInfo, MediaDeviceKind, MediaDevices, MediaStream,
    MediaStreamConstraints, MediaStreamTrack,
};

use super::{CaptureBackend, DeviceInfo, Frame, StreamResult, VideoConstraint, VideoStream};
use crate::{error::CaptureError, flow::Task};

/// `HAVE_CURRENT_DATA`: the element can paint the current frame.
const HAVE_CURRENT_DATA: u16 = 2;

#[derive(Clone, Copy, Debug, Default)]
pub struct WebCapture;

impl CaptureBackend for WebCapture {
    fn open(&self, constraint: VideoConstraint) -> Task<StreamResult> {
        Box::pin(async move {
            let stream = open_stream(&constraint).await?;
            Ok(Box::new(stream) as Box<dyn VideoStream>)
        })
    }

    fn enumerate(&self) -> Task<Result<Vec<DeviceInfo>, CaptureError>> {
        Box::pin(async move {
            let devices = media_devices()?;
            let listed = JsFuture::from(devices.enumerate_devices().map_err(capture_error)?)
                .await
                .map_err(capture_error)?;
            let inputs = Array::from(&listed)
                .iter()
                .filter_map(|entry| entry.dyn_into::<MediaDeviceInfo>().ok())
                .filter(|info| info.kind() == MediaDeviceKind::Videoinput)
                .map(|info| DeviceInfo {
                    device_id: info.device_id(),
                    label: info.label(),
                })
                .collect();
            Ok(inputs)
        })
    }
}

/// A `MediaStream` playing into a detached `<video>` element.
pub struct WebVideoStream {
    stream: MediaStream,
    video: HtmlVideoElement,
}

impl WebVideoStream {
    fn tracks(&self) -> Vec<MediaStreamTrack> {
        self.stream
            .get_video_tracks()
            .iter()
            .map(|track| track.unchecked_into::<MediaStreamTrack>())
            .collect()
    }
}

impl VideoStream for WebVideoStream {
    fn device_id(&self) -> Option<String> {
        let settings = self.tracks().first()?.get_settings();
        Reflect::get(&settings, &JsValue::from_str("deviceId"))
            .ok()?
            .as_string()
    }

    fn current_frame(&self) -> Option<Frame<'_>> {
        let ready = self.video.ready_state() >= HAVE_CURRENT_DATA && self.video.video_width() > 0;
        ready.then_some(Frame::Video(&self.video))
    }

    fn stop_tracks(&mut self) {
        for track in self.tracks() {
            track.stop();
        }
        self.video.set_src_object(None);
    }
}

fn media_devices() -> Result<MediaDevices, CaptureError> {
    let window = web_sys::window().ok_or_else(|| CaptureError::Backend("no window".into()))?;
    window.navigator().media_devices().map_err(capture_error)
}

fn video_constraint(constraint: &VideoConstraint) -> Result<JsValue, CaptureError> {
    let video = Object::new();
    let set = |target: &Object, key: &str, value: &JsValue| {
        Reflect::set(target, &JsValue::from_str(key), value).map_err(capture_error)
    };
    match constraint {
        VideoConstraint::Facing(mode) => {
            set(&video, "facingMode", &JsValue::from_str(mode.as_str()))?;
        }
        VideoConstraint::Device(id) => {
            let exact = Object::new();
            set(&exact, "exact", &JsValue::from_str(id))?;
            set(&video, "deviceId", &exact)?;
        }
    }
    Ok(video.into())
}

async fn open_stream(constraint: &VideoConstraint) -> Result<WebVideoStream, CaptureError> {
    let devices = media_devices()?;
    let constraints = MediaStreamConstraints::new();
    constraints.set_video(&video_constraint(constraint)?);
    constraints.set_audio(&JsValue::FALSE);

    let request = devices
        .get_user_media_with_constraints(&constraints)
        .map_err(capture_error)?;
    let stream: MediaStream = JsFuture::from(request)
        .await
        .map_err(capture_error)?
        .dyn_into()
        .map_err(capture_error)?;

    let document = web_sys::window()
        .and_then(|w| w.document())
        .ok_or_else(|| CaptureError::Backend("no document".into()))?;
    let video: HtmlVideoElement = document
        .create_element("video")
        .map_err(capture_error)?
        .dyn_into()
        .map_err(|element| capture_error(element.into()))?;
    video.set_autoplay(true);
    video.set_muted(true);
    video
        .set_attribute("playsinline", "")
        .map_err(capture_error)?;
    video.set_src_object(Some(&stream));
    if let Ok(playing) = video.play() {
        // Autoplay of a muted element may still be refused; frames then arrive once it starts.
        if let Err(e) = JsFuture::from(playing).await {
            log::warn!("Video playback did not start yet: {:?}", e);
        }
    }
    log::info!("Camera stream opened ({})", constraint);
    Ok(WebVideoStream { stream, video })
}

fn capture_error(value: JsValue) -> CaptureError {
    match value.dyn_ref::<DomException>().map(|e| e.name()) {
        Some(name) if name == "NotAllowedError" || name == "SecurityError" => CaptureError::Denied,
        Some(name) if name == "NotFoundError" || name == "OverconstrainedError" => {
            CaptureError::NoDevice
        }
        Some(name) => CaptureError::Backend(name),
        None => CaptureError::Backend(format!("{value:?}")),
    }
}
