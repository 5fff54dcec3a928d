//! Window creation and event handling via winit.
//!
//! [`Viewer`] implements winit's [`ApplicationHandler`]: it owns the window,
//! the GPU context and the frame orchestrator, feeds finished asset loads into
//! the scene and renders on every redraw.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use keel_assets::fetcher_for;
use keel_config::Config;
use keel_render::{
    FrameOrchestrator, RenderContext, RenderError, SurfaceError, init_render_context_blocking,
};
use keel_scene::TextureKey;
use tracing::{error, info, instrument, warn};
use winit::application::ApplicationHandler;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::PhysicalKey;
use winit::window::{Window, WindowId};

use crate::controls::{Action, OrbitDrag, action_for, zoom_factor};
use crate::session::{Session, load_catalog};
use crate::settings::{render_settings, window_attributes_from_config};

const STATS_INTERVAL: Duration = Duration::from_secs(1);

pub struct Viewer {
    config: Config,
    session: Session,
    window: Option<Arc<Window>>,
    gpu: Option<RenderContext>,
    orchestrator: Option<FrameOrchestrator>,
    drag: OrbitDrag,
    last_stats: Instant,
    screenshots: u32,
}

impl Viewer {
    pub fn new(config: Config) -> Self {
        let fetcher = fetcher_for(&config.assets.base);
        let catalog = load_catalog(config.assets.catalog.as_deref());
        let session = Session::new(&config, fetcher, catalog);
        Self {
            config,
            session,
            window: None,
            gpu: None,
            orchestrator: None,
            drag: OrbitDrag::default(),
            last_stats: Instant::now(),
            screenshots: 0,
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        // Minimised windows report a zero size.
        if width == 0 || height == 0 {
            return;
        }
        self.session.camera.set_aspect(width, height);
        if let Some(gpu) = &mut self.gpu {
            gpu.resize(width, height);
            if let Some(orchestrator) = &mut self.orchestrator {
                orchestrator.resize(&gpu.device, &gpu.queue, width, height);
            }
        }
    }

    /// Feed finished loads into the scene and upload decoded textures.
    #[instrument(skip_all)]
    fn pump_loads(&mut self) {
        let mut ready = self.session.poll_loads();
        let (Some(gpu), Some(orchestrator)) = (&self.gpu, &mut self.orchestrator) else {
            return;
        };
        ready.extend(
            self.session
                .request_missing_textures(orchestrator.scene_gpu().textures()),
        );
        for key in ready {
            upload(&self.session, gpu, orchestrator, &key);
        }
    }

    fn perform(&mut self, action: Action, event_loop: &ActiveEventLoop) {
        match action {
            Action::CycleWeather => {
                if self.session.cycle_weather() {
                    self.push_lighting();
                }
            }
            Action::ToggleEnvironment => {
                if self.session.toggle_environment() {
                    self.push_lighting();
                }
            }
            Action::NextVariant => self.session.next_variant(),
            Action::NextMaterialOption => self.session.next_material_option(),
            Action::FocusNextPart => {
                if let Some(name) = self.session.focus_next_part() {
                    info!("Focused {name}");
                }
            }
            Action::ResetView => self.session.reset_view(),
            Action::ToggleShadows | Action::ToggleAmbientOcclusion | Action::ToggleReflections => {
                self.toggle_effect(action)
            }
            Action::Screenshot => self.screenshot(),
            Action::Quit => {
                info!("Quit requested");
                event_loop.exit();
            }
        }
    }

    fn push_lighting(&mut self) {
        if let Some(orchestrator) = &mut self.orchestrator {
            orchestrator.set_lighting(&self.session.lighting);
        }
    }

    fn toggle_effect(&mut self, action: Action) {
        let Some(orchestrator) = &mut self.orchestrator else {
            return;
        };
        let settings = orchestrator.settings();
        let (mut shadows, mut ssao, mut ssr) = (settings.shadows, settings.ssao, settings.ssr);
        match action {
            Action::ToggleShadows => shadows = !shadows,
            Action::ToggleAmbientOcclusion => ssao = !ssao,
            Action::ToggleReflections => ssr = !ssr,
            _ => return,
        }
        orchestrator.set_effects(shadows, ssao, ssr);
        info!("Effects now {:?}", orchestrator.effects());
    }

    fn screenshot(&mut self) {
        let (Some(gpu), Some(orchestrator)) = (&self.gpu, &self.orchestrator) else {
            return;
        };
        let frame = match orchestrator.capture_frame(&gpu.device, &gpu.queue) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Screenshot failed: {e}");
                return;
            }
        };
        self.screenshots += 1;
        let path = PathBuf::from(format!("keel-screenshot-{}.png", self.screenshots));
        match image::save_buffer(
            &path,
            &frame.rgba,
            frame.width,
            frame.height,
            image::ColorType::Rgba8,
        ) {
            Ok(()) => info!(
                "Saved {}x{} screenshot to {}",
                frame.width,
                frame.height,
                path.display()
            ),
            Err(e) => warn!("Could not write {}: {e}", path.display()),
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let (Some(gpu), Some(orchestrator)) = (&mut self.gpu, &mut self.orchestrator) else {
            return;
        };
        orchestrator.sync_scene(&gpu.device, &gpu.queue, &mut self.session.scene);
        let camera = &self.session.camera;
        orchestrator.set_camera(camera.view(), camera.projection(), camera.position());

        match gpu.get_current_texture() {
            Ok(output) => {
                let view = output
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default());
                match orchestrator.render(&gpu.device, &gpu.queue, &view) {
                    Ok(()) => {}
                    Err(RenderError::NotSized) => {
                        let (w, h) = (gpu.surface_config.width, gpu.surface_config.height);
                        orchestrator.resize(&gpu.device, &gpu.queue, w, h);
                    }
                    Err(e) => error!("Frame failed: {e}"),
                }
                output.present();
            }
            Err(SurfaceError::Lost) => {
                let (w, h) = (gpu.surface_config.width, gpu.surface_config.height);
                gpu.resize(w, h);
            }
            Err(SurfaceError::OutOfMemory) => {
                error!("GPU out of memory");
                event_loop.exit();
                return;
            }
            Err(SurfaceError::Timeout) => {
                warn!("Surface timeout, skipping frame");
            }
        }

        if self.config.debug.log_draw_stats && self.last_stats.elapsed() >= STATS_INTERVAL {
            self.last_stats = Instant::now();
            info!("{}", orchestrator.stats());
        }
    }
}

fn upload(session: &Session, gpu: &RenderContext, orchestrator: &mut FrameOrchestrator, key: &TextureKey) {
    let Some((image, wrap)) = session.texture_upload(key) else {
        return;
    };
    if let Err(e) = orchestrator.upload_texture(
        &gpu.device,
        &gpu.queue,
        key,
        image.width,
        image.height,
        &image.rgba,
        wrap,
    ) {
        warn!("Texture {key} upload failed: {e}");
    }
}

impl ApplicationHandler for Viewer {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = window_attributes_from_config(&self.config);
        let window = match event_loop.create_window(attrs) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                error!("Window creation failed: {e}");
                event_loop.exit();
                return;
            }
        };

        let gpu = match init_render_context_blocking(window.clone(), self.config.window.vsync) {
            Ok(ctx) => ctx,
            Err(e) => {
                error!("GPU initialization failed: {e}");
                event_loop.exit();
                return;
            }
        };

        let orchestrator = match FrameOrchestrator::new(
            &gpu.device,
            &gpu.queue,
            gpu.capabilities,
            render_settings(&self.config.render),
            &self.session.lighting,
            gpu.surface_format,
        ) {
            Ok(orchestrator) => orchestrator,
            Err(e) => {
                error!("Renderer initialization failed: {e}");
                event_loop.exit();
                return;
            }
        };

        let size = window.inner_size();
        info!("Window created: {}x{}", size.width, size.height);
        self.gpu = Some(gpu);
        self.orchestrator = Some(orchestrator);
        self.window = Some(window);
        self.resize(size.width, size.height);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(new_size) => self.resize(new_size.width, new_size.height),
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state == ElementState::Pressed
                    && !event.repeat
                    && let PhysicalKey::Code(code) = event.physical_key
                    && let Some(action) = action_for(code)
                {
                    self.perform(action, event_loop);
                }
            }
            WindowEvent::MouseInput { state, button, .. } => self.drag.on_button(button, state),
            WindowEvent::CursorMoved { position, .. } => {
                if let Some((yaw, pitch)) = self.drag.on_cursor_moved(position.x, position.y) {
                    self.session.camera.orbit(yaw, pitch);
                }
            }
            WindowEvent::MouseWheel { delta, .. } => self.session.camera.zoom(zoom_factor(delta)),
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        self.pump_loads();
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

/// Creates an event loop and runs the viewer with the given config.
///
/// This function blocks until the window is closed.
#[instrument(skip(config))]
pub fn run(config: Config) {
    let event_loop = EventLoop::new().expect("Failed to create event loop");
    let mut viewer = Viewer::new(config);
    event_loop.run_app(&mut viewer).expect("Event loop failed");
}
