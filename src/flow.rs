//! Application lifecycle and the render loop.
//!
//! [`App`] is the winit [`ApplicationHandler`]. It owns the [`Stage`], the GPU
//! state and every background task it started. Tasks never touch the stage
//! directly: a finished model load, an opened camera or a device list comes
//! back as an [`AppEvent`] through the event loop proxy and is applied on the
//! event loop thread, between two frames.
//!
//! # Lifecycle
//!
//! 1. `resumed` creates the window and the GPU context (natively blocking, on
//!    the web in a spawned task that reports back with `Initialized`)
//! 2. the configured model load and the first camera request are started
//! 3. every `RedrawRequested` advances the stage by one frame, draws it and
//!    asks for the next frame while the [`RenderLoop`] runs
//! 4. closing the window or suspending the app stops the loop; on exit the
//!    camera is released

use std::sync::Arc;

use instant::{Duration, Instant};
use winit::{
    application::ApplicationHandler,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop, EventLoopProxy},
    keyboard::{Key, NamedKey},
    window::Window,
};

use crate::{
    capture::{CaptureBackend, DeviceInfo, StreamResult, VideoConstraint, platform_backend},
    config::ViewerConfig,
    context::Context,
    data_structures::{model::Material, scene_graph::SceneNode},
    error::{CaptureError, LoadError},
    render::SceneRenderer,
    resources::loader::{ModelLoader, PendingLoad},
    stage::Stage,
};

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

/// `Send` wherever background tasks run on a thread pool, nothing on the web.
#[cfg(not(target_arch = "wasm32"))]
pub trait MaybeSend: Send {}
#[cfg(not(target_arch = "wasm32"))]
impl<T: Send + ?Sized> MaybeSend for T {}

#[cfg(target_arch = "wasm32")]
pub trait MaybeSend {}
#[cfg(target_arch = "wasm32")]
impl<T: ?Sized> MaybeSend for T {}

/// A boxed background task.
#[cfg(not(target_arch = "wasm32"))]
pub type Task<T> = futures::future::BoxFuture<'static, T>;
#[cfg(target_arch = "wasm32")]
pub type Task<T> = futures::future::LocalBoxFuture<'static, T>;

/// Start/stop switch of the per-frame work.
///
/// A stopped loop refuses to tick and the window stops requesting redraws.
/// The time between ticks is only collected for the frame time log; the
/// stage advances by a fixed step per frame.
#[derive(Debug, Default)]
pub struct RenderLoop {
    last_tick: Option<Instant>,
    running: bool,
    frames: u64,
    /// Time spent between consecutive ticks and how many such gaps there were.
    busy: Duration,
    intervals: u64,
}

impl RenderLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        if !self.running {
            log::info!("Render loop started");
            self.running = true;
            self.last_tick = None;
        }
    }

    pub fn stop(&mut self) {
        if self.running {
            match self.average_frame_time() {
                Some(avg) => log::info!(
                    "Render loop stopped after {} frames ({:.1} ms per frame)",
                    self.frames,
                    avg.as_secs_f64() * 1000.0
                ),
                None => log::info!("Render loop stopped after {} frames", self.frames),
            }
            self.running = false;
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Frames ticked since creation.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Mean time between two ticks while running. Pauses are not counted.
    pub fn average_frame_time(&self) -> Option<Duration> {
        let intervals = u32::try_from(self.intervals).ok().filter(|n| *n > 0)?;
        Some(self.busy / intervals)
    }

    /// Begin a frame. Returns `false` when stopped.
    pub fn tick(&mut self) -> bool {
        if !self.running {
            return false;
        }
        let now = Instant::now();
        if let Some(last) = self.last_tick.replace(now) {
            self.busy += now - last;
            self.intervals += 1;
        }
        self.frames += 1;
        true
    }
}

/// Window-bound state that only exists once the GPU is ready.
#[derive(Debug)]
pub struct AppState {
    pub(crate) ctx: Context,
    renderer: SceneRenderer,
    is_surface_configured: bool,
}

impl AppState {
    async fn new(window: Arc<Window>, backdrop: Arc<Material>) -> anyhow::Result<Self> {
        let ctx = Context::new(window).await?;
        let renderer = SceneRenderer::new(&ctx, &backdrop);
        Ok(Self {
            ctx,
            renderer,
            is_surface_configured: false,
        })
    }

    fn resize(&mut self, width: u32, height: u32) {
        if self.ctx.resize(width, height) {
            self.is_surface_configured = true;
        }
    }

    fn render(&mut self, stage: &Stage) -> Result<(), wgpu::SurfaceError> {
        // Rendering requires the surface to be configured
        if !self.is_surface_configured {
            return Ok(());
        }
        self.renderer.render(&mut self.ctx, stage)
    }
}

/// Results of background tasks, delivered through the event loop.
pub enum AppEvent {
    #[cfg(target_arch = "wasm32")]
    Initialized(AppState),
    ModelLoaded {
        url: String,
        result: Result<SceneNode, LoadError>,
    },
    CaptureOpened(StreamResult),
    DevicesListed(Result<Vec<DeviceInfo>, CaptureError>),
}

impl std::fmt::Debug for AppEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(target_arch = "wasm32")]
            Self::Initialized(_) => f.write_str("Initialized"),
            Self::ModelLoaded { url, result } => f
                .debug_struct("ModelLoaded")
                .field("url", url)
                .field("ok", &result.is_ok())
                .finish(),
            Self::CaptureOpened(result) => {
                f.debug_tuple("CaptureOpened").field(&result.is_ok()).finish()
            }
            Self::DevicesListed(result) => f.debug_tuple("DevicesListed").field(result).finish(),
        }
    }
}

impl AppEvent {
    /// Wait for `pending` and wrap its outcome for the event loop.
    pub async fn model_loaded(pending: PendingLoad) -> Self {
        let url = pending.url().to_string();
        let result = pending.await;
        AppEvent::ModelLoaded { url, result }
    }

    /// Apply the events that only change the stage. Everything else is
    /// handed back for the app to act on.
    pub fn apply(self, stage: &mut Stage) -> Option<Self> {
        match self {
            AppEvent::ModelLoaded { url, result } => {
                stage.insert_model(&url, result);
                None
            }
            AppEvent::CaptureOpened(result) => {
                stage.capture_mut().on_opened(result);
                None
            }
            other => Some(other),
        }
    }
}

pub struct App {
    #[cfg(not(target_arch = "wasm32"))]
    async_runtime: tokio::runtime::Runtime,
    proxy: EventLoopProxy<AppEvent>,
    state: Option<AppState>,
    stage: Stage,
    loader: ModelLoader,
    capture: Arc<dyn CaptureBackend>,
    render_loop: RenderLoop,
    started: bool,
}

impl App {
    fn new(event_loop: &EventLoop<AppEvent>, config: ViewerConfig) -> anyhow::Result<Self> {
        let proxy = event_loop.create_proxy();
        Ok(Self {
            #[cfg(not(target_arch = "wasm32"))]
            async_runtime: tokio::runtime::Runtime::new()?,
            proxy,
            state: None,
            stage: Stage::new(config, 1, 1),
            loader: ModelLoader::default(),
            capture: platform_backend(),
            render_loop: RenderLoop::new(),
            started: false,
        })
    }

    /// Run `task` in the background and post its result to the event loop.
    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = AppEvent> + MaybeSend + 'static,
    {
        let proxy = self.proxy.clone();
        let deliver = async move {
            let event = task.await;
            if let Err(e) = proxy.send_event(event) {
                log::warn!("Event loop closed before a task finished: {:?}", e.0);
            }
        };
        #[cfg(not(target_arch = "wasm32"))]
        self.async_runtime.spawn(deliver);
        #[cfg(target_arch = "wasm32")]
        wasm_bindgen_futures::spawn_local(deliver);
    }

    /// Kick off the configured model and the first camera request. Runs once.
    fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        if let Some(url) = self.stage.config().model_url.clone() {
            self.load_model(&url);
        }
        let constraint = self.stage.initial_constraint();
        if let Some(constraint) = self.stage.capture_mut().begin_request(constraint) {
            self.open_camera(constraint);
        }
    }

    /// Start loading `url`. Unsupported formats are reported here and fetch nothing.
    pub fn load_model(&self, url: &str) {
        match self.loader.load(url) {
            Ok(pending) => self.spawn(AppEvent::model_loaded(pending)),
            Err(e) => log::error!("Not loading {}: {}", url, e),
        }
    }

    fn open_camera(&self, constraint: VideoConstraint) {
        let opening = self.capture.open(constraint);
        self.spawn(async move { AppEvent::CaptureOpened(opening.await) });
    }

    fn switch_camera(&self) {
        log::info!("Looking for another camera");
        let listing = self.capture.enumerate();
        self.spawn(async move { AppEvent::DevicesListed(listing.await) });
    }

    /// Bring a freshly created GPU state in line with the window and start drawing.
    fn attach(&mut self, mut state: AppState) {
        let size = state.ctx.window.inner_size();
        state.resize(size.width, size.height);
        self.stage.resize(size.width, size.height);
        state.ctx.window.request_redraw();
        self.state = Some(state);
        self.render_loop.start();
    }

    fn redraw(&mut self) {
        let Some(state) = &mut self.state else {
            return;
        };
        if !self.render_loop.tick() {
            return;
        }
        self.stage.update();
        match state.render(&self.stage) {
            Ok(()) => {}
            // Reconfigure the surface if it's lost or outdated
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                let size = state.ctx.window.inner_size();
                state.resize(size.width, size.height);
            }
            Err(e) => {
                log::error!("Unable to render {}", e);
            }
        }
        state.ctx.window.request_redraw();
    }
}

impl ApplicationHandler<AppEvent> for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            self.render_loop.start();
            state.ctx.window.request_redraw();
            return;
        }

        #[allow(unused_mut)]
        let mut window_attributes = Window::default_attributes().with_title("flow-ar");

        #[cfg(target_arch = "wasm32")]
        {
            use wasm_bindgen::JsCast;
            use winit::platform::web::WindowAttributesExtWebSys;

            const CANVAS_ID: &str = "canvas";

            let canvas = web_sys::window()
                .and_then(|window| window.document())
                .and_then(|document| document.get_element_by_id(CANVAS_ID));
            match canvas {
                Some(canvas) => {
                    window_attributes = window_attributes.with_canvas(Some(canvas.unchecked_into()))
                }
                None => log::warn!("No element #{}, winit creates its own canvas", CANVAS_ID),
            }
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("Cannot create the window: {}", e);
                event_loop.exit();
                return;
            }
        };

        self.start();
        let backdrop = self.stage.backdrop().mesh().material.clone();

        #[cfg(not(target_arch = "wasm32"))]
        {
            match self.async_runtime.block_on(AppState::new(window, backdrop)) {
                Ok(state) => self.attach(state),
                Err(e) => {
                    log::error!("App initialization failed: {:#}", e);
                    event_loop.exit();
                }
            }
        }

        #[cfg(target_arch = "wasm32")]
        {
            let proxy = self.proxy.clone();
            wasm_bindgen_futures::spawn_local(async move {
                match AppState::new(window, backdrop).await {
                    Ok(state) => {
                        if proxy.send_event(AppEvent::Initialized(state)).is_err() {
                            log::error!("Event loop closed during initialization");
                        }
                    }
                    Err(e) => log::error!("App initialization failed: {:#}", e),
                }
            });
        }
    }

    fn suspended(&mut self, _event_loop: &ActiveEventLoop) {
        self.render_loop.stop();
    }

    fn user_event(&mut self, _event_loop: &ActiveEventLoop, event: AppEvent) {
        log::debug!("{:?}", event);
        let Some(event) = event.apply(&mut self.stage) else {
            return;
        };
        match event {
            #[cfg(target_arch = "wasm32")]
            AppEvent::Initialized(state) => self.attach(state),
            AppEvent::DevicesListed(Ok(devices)) => {
                if let Some(constraint) = self.stage.capture_mut().plan_switch(&devices) {
                    self.open_camera(constraint);
                }
            }
            AppEvent::DevicesListed(Err(e)) => {
                log::error!("Cannot list cameras: {}", e);
            }
            AppEvent::ModelLoaded { .. } | AppEvent::CaptureOpened(_) => {}
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                self.render_loop.stop();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                // surface and aspect ratio change in the same event, before the next redraw
                if let Some(state) = &mut self.state {
                    state.resize(size.width, size.height);
                }
                self.stage.resize(size.width, size.height);
            }
            WindowEvent::RedrawRequested => self.redraw(),
            WindowEvent::CursorMoved { position, .. } => {
                self.stage.pointer_moved(position.x, position.y);
            }
            WindowEvent::MouseInput { state, button, .. } => {
                self.stage.mouse_input(button, state.is_pressed());
            }
            WindowEvent::MouseWheel { delta, .. } => self.stage.mouse_wheel(delta),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key,
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => match logical_key.as_ref() {
                Key::Character("c") | Key::Character("C") => self.switch_camera(),
                Key::Named(NamedKey::Escape) => {
                    self.render_loop.stop();
                    event_loop.exit();
                }
                _ => {}
            },
            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.render_loop.stop();
        self.stage.capture_mut().stop();
    }
}

/// Set up logging the way the platform expects it.
pub fn init_logging() {
    #[cfg(not(target_arch = "wasm32"))]
    {
        if let Err(e) = env_logger::try_init() {
            println!("Warning: Could not initialize logger: {}", e);
        };
    }

    #[cfg(target_arch = "wasm32")]
    {
        std::panic::set_hook(Box::new(|info| log::error!("{info}")));
        if let Err(e) = console_log::init_with_level(log::Level::Info) {
            web_sys::console::log_1(&format!("Could not initialize logger: {e}").into());
        }
    }
}

/// Run the viewer with settings from the command line or the page URL.
pub fn run() -> anyhow::Result<()> {
    init_logging();
    run_with(ViewerConfig::from_env())
}

/// Run the viewer until its window closes.
pub fn run_with(config: ViewerConfig) -> anyhow::Result<()> {
    log::info!("Starting with {:?}", config);
    let event_loop: EventLoop<AppEvent> = EventLoop::with_user_event().build()?;
    let mut app = App::new(&event_loop, config)?;
    event_loop.run_app(&mut app)?;
    Ok(())
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen(start)]
pub fn start() -> Result<(), JsValue> {
    run().map_err(|e| JsValue::from_str(&format!("{e:#}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_loop_does_not_tick() {
        let mut render_loop = RenderLoop::new();
        assert!(!render_loop.is_running());
        assert!(!render_loop.tick());

        render_loop.start();
        assert!(render_loop.tick());
        assert!(render_loop.tick());
        assert_eq!(render_loop.frames(), 2);

        render_loop.stop();
        assert!(!render_loop.tick());
        assert_eq!(render_loop.frames(), 2);
    }

    #[test]
    fn restart_does_not_count_the_pause() {
        let mut render_loop = RenderLoop::new();
        render_loop.start();
        assert!(render_loop.tick());
        assert_eq!(render_loop.average_frame_time(), None);
        assert!(render_loop.tick());
        assert!(render_loop.average_frame_time().is_some());

        render_loop.stop();
        render_loop.start();
        assert!(render_loop.tick());
        assert_eq!(render_loop.intervals, 1);
    }
}
