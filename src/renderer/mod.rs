//! Renderer
//!
//! [`Renderer`] owns a [`GpuDevice`] and a [`RenderContext`] and turns a
//! [`Scene`] into draw calls once per [`Renderer::render`]:
//!
//! ```text
//! disposals ─▶ world matrices ─▶ render list ─▶ lights ─▶ shadow maps
//!           ─▶ transmission copy ─▶ clear ─▶ opaque ─▶ transmissive ─▶ transparent
//! ```
//!
//! Everything GPU-resident hangs off the renderer instance, so two renderers
//! never observe each other's caches.
//!
//! # Context loss
//!
//! A lost device aborts the frame with [`StrataError::ContextLost`]. Every
//! cache is invalidated and [`RenderEvent::ContextLost`] is sent once; the
//! first frame that renders again sends [`RenderEvent::ContextRestored`] and
//! recreates resources lazily.

pub mod device;
pub mod program;
pub mod settings;

pub mod context;
pub mod geometries;
pub mod info;
pub mod lights;
pub mod readback;
pub mod render_list;
pub mod shadow;
pub mod state;
pub mod targets;
pub mod textures;
pub mod uniforms;

use flume::{Receiver, Sender};

use crate::errors::{Result, StrataError};
use crate::resources::assets::DisposeEvent;
use crate::resources::color::{Color, ColorSpace};
use crate::resources::render_target::RenderTargetDescriptor;
use crate::resources::texture::{FilterMode, Sampler, TextureFormat};
use crate::scene::{NodeHandle, Scene};

pub use context::RenderContext;
pub use device::{ClearFlags, DeviceCapabilities, GpuDevice, Rect, RecordingDevice};
pub use info::RenderInfo;
pub use program::{ProgramCache, ProgramState};
pub use readback::ReadbackHandle;
pub use render_list::{RenderItem, RenderList};
pub use settings::{Precision, RendererSettings, ShadowSettings, ShadowType, ToneMapping};
pub use targets::RenderTargetHandle;

use self::context::PassInputs;
use self::device::FramebufferId;
use self::lights::LightState;
use self::program::ProgramVariant;
use self::readback::Readbacks;
use self::state::StateTracker;
use self::targets::RenderTargets;
use self::uniforms::{CameraUniforms, FrameUniforms};

/// Notifications for the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderEvent {
    /// The device was lost. Rendering fails until it comes back.
    ContextLost,
    /// The first frame after a loss rendered; caches are being rebuilt.
    ContextRestored,
    /// Programs that finished compiling during [`Renderer::poll_programs`].
    ProgramsReady(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BoundTarget {
    handle: RenderTargetHandle,
    face: u32,
    level: u32,
}

pub struct Renderer<D: GpuDevice> {
    device: D,
    settings: RendererSettings,
    ctx: RenderContext,
    targets: RenderTargets,
    readbacks: Readbacks,

    target: Option<BoundTarget>,
    /// CSS-pixel size of the default framebuffer.
    size: (u32, u32),
    /// Default-framebuffer viewport, in device pixels.
    viewport: Rect,
    scissor: Option<Rect>,

    transmission: Option<RenderTargetHandle>,
    frame: u64,
    context_lost: bool,

    events_tx: Sender<RenderEvent>,
    events_rx: Receiver<RenderEvent>,
}

impl<D: GpuDevice> Renderer<D> {
    pub fn new(device: D, settings: RendererSettings) -> Self {
        let tracker = StateTracker::new(device.capabilities());
        let ctx = RenderContext::new(&settings, tracker);
        let (width, height) = device.drawing_buffer_size();
        let (events_tx, events_rx) = flume::unbounded();
        log::info!(
            "Renderer created: {width}x{height}, {} texture units, uniform buffers: {}",
            device.capabilities().max_texture_units,
            device.capabilities().uniform_buffers
        );
        Self {
            device,
            settings,
            ctx,
            targets: RenderTargets::new(),
            readbacks: Readbacks::new(),
            target: None,
            size: (width, height),
            viewport: Rect::new(0, 0, width, height),
            scissor: None,
            transmission: None,
            frame: 0,
            context_lost: false,
            events_tx,
            events_rx,
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    #[must_use]
    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    #[must_use]
    pub fn capabilities(&self) -> &DeviceCapabilities {
        self.device.capabilities()
    }

    #[must_use]
    pub fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    /// Settings take effect on the next frame. Settings that change shader
    /// source select different cached programs.
    pub fn settings_mut(&mut self) -> &mut RendererSettings {
        &mut self.settings
    }

    #[must_use]
    pub fn info(&self) -> &RenderInfo {
        &self.ctx.info
    }

    #[must_use]
    pub fn programs(&self) -> &ProgramCache {
        &self.ctx.programs
    }

    #[must_use]
    pub fn context(&self) -> &RenderContext {
        &self.ctx
    }

    /// Receiver for [`RenderEvent`]s. Every clone shares one queue.
    #[must_use]
    pub fn events(&self) -> Receiver<RenderEvent> {
        self.events_rx.clone()
    }

    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    /// Size of the default framebuffer in device pixels.
    #[must_use]
    pub fn drawing_buffer_size(&self) -> (u32, u32) {
        self.device.drawing_buffer_size()
    }

    #[must_use]
    pub fn viewport(&self) -> Rect {
        self.viewport
    }

    // ------------------------------------------------------------------
    // Size & viewport
    // ------------------------------------------------------------------

    /// Resizes the default framebuffer and resets the viewport to cover it.
    /// Cameras with `auto_aspect` follow on the next frame.
    pub fn set_size(&mut self, width: u32, height: u32, pixel_ratio: f32) {
        let pixel_ratio = if pixel_ratio > 0.0 { pixel_ratio } else { 1.0 };
        self.settings.pixel_ratio = pixel_ratio;
        self.size = (width, height);
        let (pw, ph) = (scale(width, pixel_ratio), scale(height, pixel_ratio));
        self.device.resize_drawing_buffer(pw, ph);
        self.viewport = Rect::new(0, 0, pw, ph);
        self.scissor = None;
        log::debug!("Resized to {width}x{height} @{pixel_ratio} ({pw}x{ph} device pixels)");
    }

    /// Viewport of the default framebuffer, in CSS pixels.
    pub fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32) {
        self.viewport = self.scaled_rect(x, y, width, height);
    }

    /// Scissor of the default framebuffer, in CSS pixels. `None` disables it.
    pub fn set_scissor(&mut self, rect: Option<(i32, i32, u32, u32)>) {
        self.scissor = rect.map(|(x, y, w, h)| self.scaled_rect(x, y, w, h));
    }

    fn scaled_rect(&self, x: i32, y: i32, width: u32, height: u32) -> Rect {
        let ratio = self.settings.pixel_ratio;
        Rect::new(
            (x as f32 * ratio).floor() as i32,
            (y as f32 * ratio).floor() as i32,
            scale(width, ratio),
            scale(height, ratio),
        )
    }

    // ------------------------------------------------------------------
    // Render targets
    // ------------------------------------------------------------------

    pub fn create_render_target(&mut self, desc: RenderTargetDescriptor) -> RenderTargetHandle {
        self.targets.create(desc)
    }

    #[must_use]
    pub fn render_target_descriptor(&self, handle: RenderTargetHandle) -> Option<&RenderTargetDescriptor> {
        self.targets.descriptor(handle)
    }

    /// Device texture holding the target's color, once it has been rendered to.
    #[must_use]
    pub fn render_target_texture(&self, handle: RenderTargetHandle) -> Option<device::TextureId> {
        self.targets.color_texture(handle)
    }

    /// Selects where subsequent draws write. `None` is the default
    /// framebuffer. `face` selects a cube face, `level` a mip level.
    pub fn set_render_target(&mut self, target: Option<RenderTargetHandle>, face: u32, level: u32) -> Result<()> {
        self.target = match target {
            None => None,
            Some(handle) => {
                if !self.targets.contains(handle) {
                    return Err(StrataError::ResourceNotFound(format!("render target {handle:?}")));
                }
                Some(BoundTarget { handle, face, level })
            }
        };
        Ok(())
    }

    #[must_use]
    pub fn render_target(&self) -> Option<RenderTargetHandle> {
        self.target.map(|t| t.handle)
    }

    /// Releases a target's device objects. Disposing the bound target is a
    /// caller error.
    pub fn dispose_render_target(&mut self, handle: RenderTargetHandle) -> Result<()> {
        if self.target.is_some_and(|t| t.handle == handle) {
            return Err(StrataError::ResourceInUse(format!("render target {handle:?} is bound")));
        }
        if !self.targets.dispose(&mut self.device, &mut self.ctx.tracker, handle) {
            return Err(StrataError::ResourceNotFound(format!("render target {handle:?}")));
        }
        Ok(())
    }

    /// Framebuffer and viewport for the current target.
    fn output(&mut self) -> Result<(Option<FramebufferId>, Rect, Option<Rect>)> {
        let Some(bound) = self.target else {
            return Ok((None, self.viewport, self.scissor));
        };
        let framebuffer = self
            .targets
            .framebuffer(&mut self.device, bound.handle, bound.face, bound.level)?;
        let (w, h) = self.targets.size(bound.handle, bound.level).unwrap_or((1, 1));
        Ok((framebuffer, Rect::new(0, 0, w, h), None))
    }

    /// Encoding the fragment shaders must produce for the current target.
    fn output_color_space(&self) -> ColorSpace {
        let Some(bound) = self.target else {
            return self.settings.output_color_space;
        };
        match self.targets.descriptor(bound.handle) {
            // sRGB RGBA8 textures encode in hardware.
            Some(desc) if desc.color_space == ColorSpace::Srgb && desc.color_format == Some(TextureFormat::Rgba8) => {
                ColorSpace::Linear
            }
            Some(desc) => desc.color_space,
            None => ColorSpace::Linear,
        }
    }

    // ------------------------------------------------------------------
    // Disposal & programs
    // ------------------------------------------------------------------

    /// Releases GPU state for resources disposed from `scene.assets`.
    /// Runs at the start of every frame; call it directly to free memory
    /// between frames.
    pub fn process_disposals(&mut self, scene: &Scene) -> usize {
        let mut processed = 0;
        for event in scene.assets.dispose_events().try_iter() {
            let ctx = &mut self.ctx;
            match event {
                DisposeEvent::Material(id) => {
                    for program in ctx.programs.release_material(&mut self.device, id) {
                        ctx.tracker.forget_program(program);
                    }
                }
                DisposeEvent::Geometry(id) => {
                    ctx.geometries.dispose(&mut self.device, &mut ctx.tracker, id);
                }
                DisposeEvent::Texture(id) => {
                    if let Some(texture) = ctx.textures.dispose(&mut self.device, id) {
                        ctx.tracker.forget_texture(texture);
                    }
                }
            }
            processed += 1;
        }
        if processed > 0 {
            self.ctx.refresh_counts();
        }
        processed
    }

    /// Advances asynchronous compiles. Sends [`RenderEvent::ProgramsReady`]
    /// when any finished.
    pub fn poll_programs(&mut self) -> Result<usize> {
        let ready = self.ctx.programs.poll_all(&mut self.device)?;
        if ready > 0 {
            self.send(RenderEvent::ProgramsReady(ready));
        }
        Ok(ready)
    }

    // ------------------------------------------------------------------
    // Readback
    // ------------------------------------------------------------------

    /// Reads RGBA8 pixels of the current target, blocking on prior GPU work.
    pub fn read_pixels(&mut self, rect: Rect, out: &mut [u8]) -> Result<()> {
        let needed = rect.width as usize * rect.height as usize * 4;
        if out.len() < needed {
            return Err(StrataError::Device(device::DeviceError::InvalidOperation(format!(
                "readback needs {needed} bytes, buffer holds {}",
                out.len()
            ))));
        }
        let (framebuffer, ..) = self.output()?;
        self.ctx.tracker.bind_framebuffer(&mut self.device, framebuffer)?;
        self.device.read_pixels(rect, out)?;
        Ok(())
    }

    /// Queues a non-blocking read of the current target.
    pub fn read_pixels_async(&mut self, rect: Rect) -> Result<ReadbackHandle> {
        let (framebuffer, ..) = self.output()?;
        self.ctx.tracker.bind_framebuffer(&mut self.device, framebuffer)?;
        Ok(self.readbacks.request(&mut self.device, rect)?)
    }

    /// `Ok(None)` until the readback has completed.
    pub fn poll_readback(&mut self, handle: ReadbackHandle) -> Result<Option<Vec<u8>>> {
        if !self.readbacks.contains(handle) {
            return Err(StrataError::ResourceNotFound(format!("readback {handle:?}")));
        }
        Ok(self.readbacks.poll(&mut self.device, handle)?)
    }

    // ------------------------------------------------------------------
    // Frame
    // ------------------------------------------------------------------

    /// Renders `scene` as seen from the camera on node `camera` into the
    /// current target.
    pub fn render(&mut self, scene: &mut Scene, camera: NodeHandle) -> Result<()> {
        if self.device.is_context_lost() {
            self.handle_context_loss();
            return Err(StrataError::ContextLost);
        }
        if self.context_lost {
            self.context_lost = false;
            log::info!("GPU context restored; recreating resources");
            self.send(RenderEvent::ContextRestored);
        }

        match self.render_frame(scene, camera) {
            Err(StrataError::ContextLost) => {
                self.handle_context_loss();
                Err(StrataError::ContextLost)
            }
            other => other,
        }
    }

    fn render_frame(&mut self, scene: &mut Scene, camera_node: NodeHandle) -> Result<()> {
        self.process_disposals(scene);
        self.frame += 1;
        self.ctx.info.begin_frame();
        self.ctx.tracker.reset_texture_units();

        let (framebuffer, viewport, scissor) = self.output()?;
        if viewport.height > 0 {
            let aspect = viewport.width as f32 / viewport.height as f32;
            scene.for_each_auto_aspect_camera(|camera| {
                if (camera.aspect() - aspect).abs() > f32::EPSILON {
                    camera.set_aspect(aspect);
                }
            });
        }
        scene.update_world_matrices();
        scene.update_skins();

        let camera = scene.camera(camera_node).ok_or(StrataError::NotACamera)?.clone();
        self.ctx.list.collect(scene, &camera);
        if self.settings.sort_objects {
            self.ctx.list.sort();
        }

        let block_supported = self.device.capabilities().uniform_buffers;
        self.ctx
            .setup_lights(scene, camera.view_matrix(), &self.settings, block_supported);
        self.ctx
            .render_shadows(&mut self.device, scene, &self.settings, self.frame)?;
        self.ctx.upload_light_block(&mut self.device)?;

        let scene: &Scene = scene;
        let camera_uniforms = CameraUniforms::from_camera(&camera);
        // Draws borrow the context mutably; uniforms read this snapshot.
        let lights = self.ctx.lights.clone();
        let to_screen = self.target.is_none();
        let output_color_space = self.output_color_space();
        let transmission = self.render_transmission(scene, &camera_uniforms, &lights, viewport)?;

        // Main pass.
        self.ctx.tracker.bind_framebuffer(&mut self.device, framebuffer)?;
        self.ctx.tracker.set_viewport(&mut self.device, viewport)?;
        self.clear_output(scene, output_color_space)?;
        self.ctx.tracker.set_scissor(&mut self.device, scissor)?;

        let scene_state = self
            .ctx
            .scene_state(scene, &self.settings, to_screen, output_color_space);
        let pass = PassInputs {
            variant: ProgramVariant::Main,
            uniforms: FrameUniforms {
                frame: self.frame,
                camera: &camera_uniforms,
                lights: &lights,
                fog: scene.fog.as_ref(),
                exposure: self.settings.tone_mapping_exposure,
                color_management: &self.settings.color_management,
                environment: scene.environment,
                transmission: None,
            },
            to_screen,
            output_color_space,
            global_planes: &self.settings.clipping_planes,
            reference: None,
            frustum: None,
            scene_state,
        };
        let list = std::mem::take(&mut self.ctx.list);
        let drawn = draw_buckets(&mut self.ctx, &mut self.device, scene, &self.settings, &pass, transmission, &list);
        self.ctx.list = list;
        let drawn = drawn?;

        self.ctx.refresh_counts();
        log::trace!(
            "Frame {}: {drawn} draws, {} state commands",
            self.frame,
            self.ctx.tracker.issued_commands()
        );
        Ok(())
    }

    /// Renders the opaque bucket into the transmission target and returns
    /// its texture, or `None` when nothing transmissive is visible.
    fn render_transmission(
        &mut self,
        scene: &Scene,
        camera: &CameraUniforms,
        lights: &LightState,
        viewport: Rect,
    ) -> Result<Option<(device::TextureId, (u32, u32))>> {
        if self.ctx.list.transmissive().is_empty() {
            return Ok(None);
        }
        let size = (viewport.width.max(1), viewport.height.max(1));
        let handle = match self.transmission {
            Some(handle) if self.targets.size(handle, 0) == Some(size) => handle,
            previous => {
                if let Some(previous) = previous {
                    self.targets.dispose(&mut self.device, &mut self.ctx.tracker, previous);
                }
                let desc = RenderTargetDescriptor {
                    generate_mipmaps: true,
                    color_format: Some(if self.device.capabilities().float_render_targets {
                        TextureFormat::Rgba16Float
                    } else {
                        TextureFormat::Rgba8
                    }),
                    sampler: Sampler {
                        min_filter: FilterMode::LinearMipmapLinear,
                        ..Sampler::default()
                    },
                    ..RenderTargetDescriptor::new(size.0, size.1)
                };
                let handle = self.targets.create(desc);
                self.transmission = Some(handle);
                handle
            }
        };

        let framebuffer = self.targets.framebuffer(&mut self.device, handle, 0, 0)?;
        let tracker = &mut self.ctx.tracker;
        tracker.bind_framebuffer(&mut self.device, framebuffer)?;
        tracker.set_viewport(&mut self.device, Rect::new(0, 0, size.0, size.1))?;
        let clear = self.settings.color_management.to_working(Color::from(self.settings.clear_color));
        let [r, g, b] = clear.to_array();
        tracker.clear(
            &mut self.device,
            ClearFlags::COLOR | ClearFlags::DEPTH,
            [r, g, b, self.settings.clear_alpha],
            1.0,
            0,
        )?;
        tracker.set_scissor(&mut self.device, None)?;

        let list = std::mem::take(&mut self.ctx.list);
        let scene_state = self
            .ctx
            .scene_state(scene, &self.settings, false, ColorSpace::Linear);
        let pass = PassInputs {
            variant: ProgramVariant::Main,
            uniforms: FrameUniforms {
                frame: self.frame,
                camera,
                lights,
                fog: scene.fog.as_ref(),
                exposure: self.settings.tone_mapping_exposure,
                color_management: &self.settings.color_management,
                environment: scene.environment,
                transmission: None,
            },
            to_screen: false,
            output_color_space: ColorSpace::Linear,
            global_planes: &self.settings.clipping_planes,
            reference: None,
            frustum: None,
            scene_state,
        };
        let drawn = self
            .ctx
            .draw_items(&mut self.device, scene, &self.settings, &pass, list.opaque());
        self.ctx.list = list;
        drawn?;

        self.targets.generate_mipmaps(&mut self.device, handle)?;
        Ok(self.targets.color_texture(handle).map(|texture| (texture, size)))
    }

    /// Auto-clear of the bound output. The background is authored color and
    /// is converted to the output encoding exactly once, here.
    fn clear_output(&mut self, scene: &Scene, output: ColorSpace) -> Result<()> {
        let mut flags = ClearFlags::empty();
        flags.set(ClearFlags::COLOR, self.settings.auto_clear_color);
        flags.set(ClearFlags::DEPTH, self.settings.auto_clear_depth);
        flags.set(ClearFlags::STENCIL, self.settings.auto_clear_stencil);

        let management = self.settings.color_management;
        let (color, alpha) = match scene.background {
            Some(background) => (background, 1.0),
            None => (Color::from(self.settings.clear_color), self.settings.clear_alpha),
        };
        let color = management.to_output(management.to_working(color), output);
        let [r, g, b] = color.to_array();
        self.ctx
            .tracker
            .clear(&mut self.device, flags, [r, g, b, alpha], 1.0, 0)?;
        Ok(())
    }

    fn handle_context_loss(&mut self) {
        if self.context_lost {
            return;
        }
        self.context_lost = true;
        log::error!("GPU context lost; invalidating every GPU-resident resource");
        self.ctx.invalidate();
        self.targets.invalidate();
        self.readbacks.invalidate();
        self.send(RenderEvent::ContextLost);
    }

    fn send(&self, event: RenderEvent) {
        // The renderer holds a receiver, so the channel never disconnects.
        let _ = self.events_tx.send(event);
    }
}

/// Opaque, then transmissive, then transparent.
fn draw_buckets<D: GpuDevice>(
    ctx: &mut RenderContext,
    device: &mut D,
    scene: &Scene,
    settings: &RendererSettings,
    pass: &PassInputs<'_>,
    transmission: Option<(device::TextureId, (u32, u32))>,
    list: &RenderList,
) -> Result<usize> {
    let mut drawn = ctx.draw_items(device, scene, settings, pass, list.opaque())?;
    let transmissive = PassInputs {
        uniforms: FrameUniforms { transmission, ..pass.uniforms },
        ..*pass
    };
    drawn += ctx.draw_items(device, scene, settings, &transmissive, list.transmissive())?;
    drawn += ctx.draw_items(device, scene, settings, pass, list.transparent())?;
    Ok(drawn)
}

fn scale(value: u32, ratio: f32) -> u32 {
    (value as f32 * ratio).floor().max(0.0) as u32
}
