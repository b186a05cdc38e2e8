//! Headless device that records every command.
//!
//! `RecordingDevice` keeps just enough object bookkeeping to behave like a
//! strict GL context (unknown ids are rejected, draws need a bound program)
//! and appends every successful call to a [`CommandLog`]. Uniform reflection
//! scans the `uniform` declarations of the submitted sources, so programs
//! generated from the shader templates reflect exactly what they declare.
//!
//! Faults can be injected for compile failures, rejected capabilities,
//! context loss and slow parallel compiles.

use rustc_hash::{FxHashMap, FxHashSet};

use super::{
    ActiveUniform, BufferId, BufferKind, BufferUsageHint, Capability, ClearFlags, CullFace,
    DeviceCapabilities, DeviceError, DrawCall, FenceId, FenceStatus, FramebufferDesc,
    FramebufferId, FrontFace, GpuDevice, ProgramId, ProgramStatus, Rect, ShaderId, ShaderStage,
    TextureDesc, TextureId, UniformData, UniformLocation, UniformType, VertexBinding,
};
use crate::resources::material::{BlendEquation, BlendFactor, CompareFunc, StencilOp};
use crate::resources::texture::TextureKind;

/// One recorded device call.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CompileShader { id: ShaderId, stage: ShaderStage },
    DeleteShader(ShaderId),
    LinkProgram { id: ProgramId, vertex: ShaderId, fragment: ShaderId },
    DeleteProgram(ProgramId),
    UseProgram(Option<ProgramId>),
    UniformBlockBinding { program: ProgramId, block: u32, binding: u32 },
    SetUniform { program: ProgramId, name: String, value: RecordedUniform },

    SetCapability(Capability, bool),
    BlendEquation(BlendEquation, BlendEquation),
    BlendFunc([BlendFactor; 4]),
    BlendColor([f32; 4]),
    DepthFunc(CompareFunc),
    DepthMask(bool),
    ColorMask([bool; 4]),
    StencilFunc(CompareFunc, i32, u32),
    StencilOp(StencilOp, StencilOp, StencilOp),
    StencilMask(u32),
    PolygonOffset(f32, f32),
    Scissor(Rect),
    Viewport(Rect),
    CullFace(CullFace),
    FrontFace(FrontFace),
    LineWidth(f32),
    ClearColor([f32; 4]),
    ClearDepth(f32),
    ClearStencil(i32),
    Clear { flags: ClearFlags, framebuffer: Option<FramebufferId> },

    CreateTexture { id: TextureId, desc: TextureDesc },
    UploadTexture { id: TextureId, face: u32, level: u32, bytes: usize },
    GenerateMipmaps(TextureId),
    DeleteTexture(TextureId),
    ActiveTexture(u32),
    BindTexture { unit: u32, kind: TextureKind, texture: Option<TextureId> },

    CreateBuffer { id: BufferId, kind: BufferKind },
    BufferData { id: BufferId, bytes: usize },
    BufferSubData { id: BufferId, offset: usize, bytes: usize },
    DeleteBuffer(BufferId),
    BindBufferBase { binding: u32, buffer: Option<BufferId> },
    VertexAttribute { location: u32, binding: Option<VertexBinding> },
    BindIndexBuffer(Option<BufferId>),

    CreateFramebuffer { id: FramebufferId, desc: FramebufferDesc },
    BindFramebuffer(Option<FramebufferId>),
    DeleteFramebuffer(FramebufferId),

    Draw { program: ProgramId, framebuffer: Option<FramebufferId>, call: DrawCall },
    ReadPixels(Rect),
    ReadPixelsToBuffer { rect: Rect, buffer: BufferId },
    Fence(FenceId),
    DeleteFence(FenceId),
    Flush,
}

impl Command {
    /// Fixed-function state calls, the ones the state tracker deduplicates.
    #[must_use]
    pub fn is_state_change(&self) -> bool {
        matches!(
            self,
            Self::UseProgram(_)
                | Self::SetCapability(..)
                | Self::BlendEquation(..)
                | Self::BlendFunc(_)
                | Self::BlendColor(_)
                | Self::DepthFunc(_)
                | Self::DepthMask(_)
                | Self::ColorMask(_)
                | Self::StencilFunc(..)
                | Self::StencilOp(..)
                | Self::StencilMask(_)
                | Self::PolygonOffset(..)
                | Self::Scissor(_)
                | Self::Viewport(_)
                | Self::CullFace(_)
                | Self::FrontFace(_)
                | Self::LineWidth(_)
                | Self::ActiveTexture(_)
                | Self::BindTexture { .. }
                | Self::BindFramebuffer(_)
                | Self::VertexAttribute { .. }
                | Self::BindIndexBuffer(_)
                | Self::BindBufferBase { .. }
        )
    }
}

/// Uploaded uniform payload as seen by the device.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedUniform {
    Floats(Vec<f32>),
    Ints(Vec<i32>),
}

impl RecordedUniform {
    #[must_use]
    pub fn as_floats(&self) -> Option<&[f32]> {
        match self {
            Self::Floats(v) => Some(v),
            Self::Ints(_) => None,
        }
    }

    #[must_use]
    pub fn as_ints(&self) -> Option<&[i32]> {
        match self {
            Self::Ints(v) => Some(v),
            Self::Floats(_) => None,
        }
    }
}

/// Append-only command history.
#[derive(Debug, Default, Clone)]
pub struct CommandLog {
    commands: Vec<Command>,
}

impl CommandLog {
    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    /// Commands recorded after position `mark`.
    #[must_use]
    pub fn since(&self, mark: usize) -> &[Command] {
        &self.commands[mark.min(self.commands.len())..]
    }

    pub fn draws(&self) -> impl Iterator<Item = (ProgramId, Option<FramebufferId>, &DrawCall)> {
        self.commands.iter().filter_map(|c| match c {
            Command::Draw { program, framebuffer, call } => Some((*program, *framebuffer, call)),
            _ => None,
        })
    }

    #[must_use]
    pub fn state_change_count(&self) -> usize {
        self.commands.iter().filter(|c| c.is_state_change()).count()
    }

    fn push(&mut self, command: Command) {
        self.commands.push(command);
    }
}

#[derive(Debug)]
struct ShaderObject {
    source: String,
}

#[derive(Debug)]
struct ProgramObject {
    uniforms: Vec<ActiveUniform>,
    blocks: Vec<String>,
    values: FxHashMap<String, RecordedUniform>,
    pending_polls: u32,
}

#[derive(Debug, Default)]
struct Faults {
    compile_error_marker: Option<String>,
    rejected_capabilities: FxHashSet<Capability>,
    compile_latency: u32,
    fence_latency: u32,
    texture_upload_limit: Option<usize>,
}

/// In-memory [`GpuDevice`].
#[derive(Debug)]
pub struct RecordingDevice {
    caps: DeviceCapabilities,
    log: CommandLog,
    lost: bool,
    next_id: u32,
    size: (u32, u32),

    shaders: FxHashMap<u32, ShaderObject>,
    programs: FxHashMap<u32, ProgramObject>,
    textures: FxHashSet<u32>,
    buffers: FxHashMap<u32, Vec<u8>>,
    framebuffers: FxHashMap<u32, FramebufferDesc>,
    fences: FxHashMap<u32, u32>,

    bound_program: Option<ProgramId>,
    bound_framebuffer: Option<FramebufferId>,
    active_unit: u32,
    clear_color: [f32; 4],
    framebuffer_colors: FxHashMap<Option<FramebufferId>, [u8; 4]>,

    faults: Faults,
}

impl Default for RecordingDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingDevice {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capabilities(DeviceCapabilities::webgl2_baseline())
    }

    #[must_use]
    pub fn with_capabilities(caps: DeviceCapabilities) -> Self {
        Self {
            caps,
            log: CommandLog::default(),
            lost: false,
            next_id: 1,
            size: (300, 150),
            shaders: FxHashMap::default(),
            programs: FxHashMap::default(),
            textures: FxHashSet::default(),
            buffers: FxHashMap::default(),
            framebuffers: FxHashMap::default(),
            fences: FxHashMap::default(),
            bound_program: None,
            bound_framebuffer: None,
            active_unit: 0,
            clear_color: [0.0; 4],
            framebuffer_colors: FxHashMap::default(),
            faults: Faults { fence_latency: 1, ..Faults::default() },
        }
    }

    #[must_use]
    pub fn log(&self) -> &CommandLog {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut CommandLog {
        &mut self.log
    }

    #[must_use]
    pub fn bound_program(&self) -> Option<ProgramId> {
        self.bound_program
    }

    #[must_use]
    pub fn bound_framebuffer(&self) -> Option<FramebufferId> {
        self.bound_framebuffer
    }

    /// Last value uploaded to `name` in `program`.
    #[must_use]
    pub fn uniform_value(&self, program: ProgramId, name: &str) -> Option<&RecordedUniform> {
        self.programs.get(&program.0)?.values.get(name)
    }

    /// Reflected uniform names of a live program.
    #[must_use]
    pub fn program_uniforms(&self, program: ProgramId) -> Option<&[ActiveUniform]> {
        self.programs.get(&program.0).map(|p| p.uniforms.as_slice())
    }

    #[must_use]
    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    #[must_use]
    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    #[must_use]
    pub fn buffer_contents(&self, buffer: BufferId) -> Option<&[u8]> {
        self.buffers.get(&buffer.0).map(Vec::as_slice)
    }

    // --- fault injection ---

    /// Shaders whose source contains `marker` fail to compile.
    pub fn fail_compile_containing(&mut self, marker: impl Into<String>) {
        self.faults.compile_error_marker = Some(marker.into());
    }

    pub fn clear_compile_failures(&mut self) {
        self.faults.compile_error_marker = None;
    }

    /// `set_capability(cap, ..)` answers with `InvalidEnum`.
    pub fn reject_capability(&mut self, cap: Capability) {
        self.faults.rejected_capabilities.insert(cap);
    }

    /// Programs report `Pending` for `polls` status queries after linking.
    /// Only effective when the capabilities advertise parallel compile.
    pub fn set_compile_latency(&mut self, polls: u32) {
        self.faults.compile_latency = polls;
    }

    /// Texture uploads carrying more than `bytes` bytes answer with
    /// `OutOfMemory`. `None` lifts the limit.
    pub fn limit_texture_uploads(&mut self, bytes: Option<usize>) {
        self.faults.texture_upload_limit = bytes;
    }

    pub fn set_fence_latency(&mut self, polls: u32) {
        self.faults.fence_latency = polls;
    }

    pub fn lose_context(&mut self) {
        self.lost = true;
    }

    /// Brings the context back. Every object created before the loss is gone.
    pub fn restore_context(&mut self) {
        self.lost = false;
        self.shaders.clear();
        self.programs.clear();
        self.textures.clear();
        self.buffers.clear();
        self.framebuffers.clear();
        self.fences.clear();
        self.bound_program = None;
        self.bound_framebuffer = None;
        self.active_unit = 0;
        self.framebuffer_colors.clear();
    }

    fn alive(&self) -> Result<(), DeviceError> {
        if self.lost { Err(DeviceError::ContextLost) } else { Ok(()) }
    }

    fn alloc(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn record(&mut self, command: Command) -> Result<(), DeviceError> {
        self.log.push(command);
        Ok(())
    }
}

/// Scans GLSL for plain `uniform` declarations, skipping interface blocks.
fn reflect_source(
    source: &str,
    uniforms: &mut Vec<ActiveUniform>,
    blocks: &mut Vec<String>,
) {
    let mut in_block = false;
    for raw in source.lines() {
        let line = raw.trim();
        if in_block {
            if line.starts_with('}') {
                in_block = false;
            }
            continue;
        }
        let Some(pos) = line.find("uniform ") else { continue };
        if line.starts_with("//") || !line[..pos].trim().is_empty() && !line.starts_with("layout") {
            continue;
        }
        let decl = line[pos + "uniform ".len()..].trim();

        if !decl.ends_with(';') {
            // `uniform Block {`
            let name = decl.trim_end_matches('{').trim();
            if !name.is_empty() && !blocks.iter().any(|b| b == name) {
                blocks.push(name.to_string());
            }
            in_block = !decl.contains('}');
            continue;
        }

        let mut tokens = decl
            .trim_end_matches(';')
            .split_whitespace()
            .filter(|t| !matches!(*t, "highp" | "mediump" | "lowp"));
        let (Some(ty), Some(name)) = (tokens.next(), tokens.next()) else { continue };
        let Some(ty) = UniformType::from_glsl(ty) else { continue };

        let (base, array_len) = match name.split_once('[') {
            Some((base, rest)) => {
                let len = rest.trim_end_matches(']').trim().parse::<u32>().unwrap_or(1);
                (base, len)
            }
            None => (name, 1),
        };
        if uniforms.iter().any(|u| u.name == base) {
            continue;
        }
        let location = UniformLocation(uniforms.len() as u32);
        uniforms.push(ActiveUniform { name: base.to_string(), ty, array_len, location });
    }
}

impl GpuDevice for RecordingDevice {
    fn capabilities(&self) -> &DeviceCapabilities {
        &self.caps
    }

    fn is_context_lost(&self) -> bool {
        self.lost
    }

    fn drawing_buffer_size(&self) -> (u32, u32) {
        self.size
    }

    fn resize_drawing_buffer(&mut self, width: u32, height: u32) {
        self.size = (width, height);
    }

    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderId, DeviceError> {
        self.alive()?;
        if let Some(marker) = &self.faults.compile_error_marker
            && source.contains(marker.as_str())
        {
            return Err(DeviceError::CompileFailed {
                stage,
                log: format!("ERROR: 0:1: '{marker}' : injected failure"),
            });
        }
        let id = ShaderId(self.alloc());
        self.shaders.insert(id.0, ShaderObject { source: source.to_string() });
        self.record(Command::CompileShader { id, stage })?;
        Ok(id)
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        if self.shaders.remove(&shader.0).is_some() {
            self.log.push(Command::DeleteShader(shader));
        }
    }

    fn link_program(
        &mut self,
        vertex: ShaderId,
        fragment: ShaderId,
        _attribute_locations: &[(String, u32)],
    ) -> Result<ProgramId, DeviceError> {
        self.alive()?;
        let (Some(vs), Some(fs)) = (self.shaders.get(&vertex.0), self.shaders.get(&fragment.0)) else {
            return Err(DeviceError::LinkFailed("unknown shader object".into()));
        };

        let mut uniforms = Vec::new();
        let mut blocks = Vec::new();
        reflect_source(&vs.source, &mut uniforms, &mut blocks);
        reflect_source(&fs.source, &mut uniforms, &mut blocks);

        let pending_polls =
            if self.caps.parallel_shader_compile { self.faults.compile_latency } else { 0 };

        let id = ProgramId(self.alloc());
        self.programs.insert(
            id.0,
            ProgramObject { uniforms, blocks, values: FxHashMap::default(), pending_polls },
        );
        self.record(Command::LinkProgram { id, vertex, fragment })?;
        Ok(id)
    }

    fn program_status(&mut self, program: ProgramId) -> ProgramStatus {
        if self.lost {
            return ProgramStatus::Failed("context lost".into());
        }
        match self.programs.get_mut(&program.0) {
            None => ProgramStatus::Failed("unknown program".into()),
            Some(p) if p.pending_polls > 0 => {
                p.pending_polls -= 1;
                ProgramStatus::Pending
            }
            Some(_) => ProgramStatus::Linked,
        }
    }

    fn active_uniforms(&mut self, program: ProgramId) -> Result<Vec<ActiveUniform>, DeviceError> {
        self.alive()?;
        self.programs
            .get(&program.0)
            .map(|p| p.uniforms.clone())
            .ok_or_else(|| DeviceError::InvalidOperation(format!("unknown program {}", program.0)))
    }

    fn uniform_block_index(&mut self, program: ProgramId, name: &str) -> Option<u32> {
        let p = self.programs.get(&program.0)?;
        p.blocks.iter().position(|b| b == name).map(|i| i as u32)
    }

    fn uniform_block_binding(&mut self, program: ProgramId, block: u32, binding: u32) -> Result<(), DeviceError> {
        self.alive()?;
        if !self.programs.contains_key(&program.0) {
            return Err(DeviceError::InvalidOperation("unknown program".into()));
        }
        self.record(Command::UniformBlockBinding { program, block, binding })
    }

    fn delete_program(&mut self, program: ProgramId) {
        if self.programs.remove(&program.0).is_some() {
            if self.bound_program == Some(program) {
                self.bound_program = None;
            }
            self.log.push(Command::DeleteProgram(program));
        }
    }

    fn use_program(&mut self, program: Option<ProgramId>) -> Result<(), DeviceError> {
        self.alive()?;
        if let Some(p) = program
            && !self.programs.contains_key(&p.0)
        {
            return Err(DeviceError::InvalidOperation(format!("unknown program {}", p.0)));
        }
        self.bound_program = program;
        self.record(Command::UseProgram(program))
    }

    fn set_uniform(&mut self, location: UniformLocation, ty: UniformType, data: UniformData<'_>) -> Result<(), DeviceError> {
        self.alive()?;
        let program = self
            .bound_program
            .ok_or_else(|| DeviceError::InvalidOperation("no program bound".into()))?;
        let object = self
            .programs
            .get_mut(&program.0)
            .ok_or_else(|| DeviceError::InvalidOperation("bound program deleted".into()))?;
        let slot = object
            .uniforms
            .get(location.0 as usize)
            .ok_or_else(|| DeviceError::InvalidOperation(format!("bad uniform location {}", location.0)))?;
        if slot.ty != ty {
            return Err(DeviceError::InvalidOperation(format!("type mismatch for {}", slot.name)));
        }
        let name = slot.name.clone();
        let value = match data {
            UniformData::Floats(v) => RecordedUniform::Floats(v.to_vec()),
            UniformData::Ints(v) => RecordedUniform::Ints(v.to_vec()),
        };
        object.values.insert(name.clone(), value.clone());
        self.record(Command::SetUniform { program, name, value })
    }

    fn set_capability(&mut self, cap: Capability, enabled: bool) -> Result<(), DeviceError> {
        self.alive()?;
        if self.faults.rejected_capabilities.contains(&cap) {
            return Err(DeviceError::InvalidEnum(format!("{cap:?}")));
        }
        self.record(Command::SetCapability(cap, enabled))
    }

    fn blend_equation(&mut self, rgb: BlendEquation, alpha: BlendEquation) -> Result<(), DeviceError> {
        self.alive()?;
        self.record(Command::BlendEquation(rgb, alpha))
    }

    fn blend_func(&mut self, src: BlendFactor, dst: BlendFactor, src_alpha: BlendFactor, dst_alpha: BlendFactor) -> Result<(), DeviceError> {
        self.alive()?;
        self.record(Command::BlendFunc([src, dst, src_alpha, dst_alpha]))
    }

    fn blend_color(&mut self, color: [f32; 4]) -> Result<(), DeviceError> {
        self.alive()?;
        self.record(Command::BlendColor(color))
    }

    fn depth_func(&mut self, func: CompareFunc) -> Result<(), DeviceError> {
        self.alive()?;
        self.record(Command::DepthFunc(func))
    }

    fn depth_mask(&mut self, write: bool) -> Result<(), DeviceError> {
        self.alive()?;
        self.record(Command::DepthMask(write))
    }

    fn color_mask(&mut self, mask: [bool; 4]) -> Result<(), DeviceError> {
        self.alive()?;
        self.record(Command::ColorMask(mask))
    }

    fn stencil_func(&mut self, func: CompareFunc, reference: i32, mask: u32) -> Result<(), DeviceError> {
        self.alive()?;
        self.record(Command::StencilFunc(func, reference, mask))
    }

    fn stencil_op(&mut self, fail: StencilOp, z_fail: StencilOp, z_pass: StencilOp) -> Result<(), DeviceError> {
        self.alive()?;
        self.record(Command::StencilOp(fail, z_fail, z_pass))
    }

    fn stencil_mask(&mut self, mask: u32) -> Result<(), DeviceError> {
        self.alive()?;
        self.record(Command::StencilMask(mask))
    }

    fn polygon_offset(&mut self, factor: f32, units: f32) -> Result<(), DeviceError> {
        self.alive()?;
        self.record(Command::PolygonOffset(factor, units))
    }

    fn scissor(&mut self, rect: Rect) -> Result<(), DeviceError> {
        self.alive()?;
        self.record(Command::Scissor(rect))
    }

    fn viewport(&mut self, rect: Rect) -> Result<(), DeviceError> {
        self.alive()?;
        self.record(Command::Viewport(rect))
    }

    fn cull_face(&mut self, face: CullFace) -> Result<(), DeviceError> {
        self.alive()?;
        self.record(Command::CullFace(face))
    }

    fn front_face(&mut self, face: FrontFace) -> Result<(), DeviceError> {
        self.alive()?;
        self.record(Command::FrontFace(face))
    }

    fn line_width(&mut self, width: f32) -> Result<(), DeviceError> {
        self.alive()?;
        self.record(Command::LineWidth(width))
    }

    fn clear_color(&mut self, color: [f32; 4]) -> Result<(), DeviceError> {
        self.alive()?;
        self.clear_color = color;
        self.record(Command::ClearColor(color))
    }

    fn clear_depth(&mut self, depth: f32) -> Result<(), DeviceError> {
        self.alive()?;
        self.record(Command::ClearDepth(depth))
    }

    fn clear_stencil(&mut self, value: i32) -> Result<(), DeviceError> {
        self.alive()?;
        self.record(Command::ClearStencil(value))
    }

    fn clear(&mut self, flags: ClearFlags) -> Result<(), DeviceError> {
        self.alive()?;
        if flags.contains(ClearFlags::COLOR) {
            let rgba = self.clear_color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
            self.framebuffer_colors.insert(self.bound_framebuffer, rgba);
        }
        let framebuffer = self.bound_framebuffer;
        self.record(Command::Clear { flags, framebuffer })
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId, DeviceError> {
        self.alive()?;
        let limit = match desc.kind {
            TextureKind::D2 => self.caps.max_texture_size,
            TextureKind::Cube => self.caps.max_cube_map_size,
        };
        if desc.width > limit || desc.height > limit {
            return Err(DeviceError::InvalidOperation(format!(
                "texture {}x{} exceeds limit {limit}",
                desc.width, desc.height
            )));
        }
        let id = TextureId(self.alloc());
        self.textures.insert(id.0);
        self.record(Command::CreateTexture { id, desc: *desc })?;
        Ok(id)
    }

    fn upload_texture(&mut self, texture: TextureId, _desc: &TextureDesc, face: u32, level: u32, data: Option<&[u8]>) -> Result<(), DeviceError> {
        self.alive()?;
        if !self.textures.contains(&texture.0) {
            return Err(DeviceError::InvalidOperation(format!("unknown texture {}", texture.0)));
        }
        let bytes = data.map_or(0, <[u8]>::len);
        if self.faults.texture_upload_limit.is_some_and(|limit| bytes > limit) {
            return Err(DeviceError::OutOfMemory);
        }
        self.record(Command::UploadTexture { id: texture, face, level, bytes })
    }

    fn generate_mipmaps(&mut self, texture: TextureId, _kind: TextureKind) -> Result<(), DeviceError> {
        self.alive()?;
        self.record(Command::GenerateMipmaps(texture))
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if self.textures.remove(&texture.0) {
            self.log.push(Command::DeleteTexture(texture));
        }
    }

    fn active_texture(&mut self, unit: u32) -> Result<(), DeviceError> {
        self.alive()?;
        if unit >= self.caps.max_texture_units {
            return Err(DeviceError::InvalidEnum(format!("texture unit {unit}")));
        }
        self.active_unit = unit;
        self.record(Command::ActiveTexture(unit))
    }

    fn bind_texture(&mut self, kind: TextureKind, texture: Option<TextureId>) -> Result<(), DeviceError> {
        self.alive()?;
        if let Some(t) = texture
            && !self.textures.contains(&t.0)
        {
            return Err(DeviceError::InvalidOperation(format!("unknown texture {}", t.0)));
        }
        let unit = self.active_unit;
        self.record(Command::BindTexture { unit, kind, texture })
    }

    fn create_buffer(&mut self, kind: BufferKind) -> Result<BufferId, DeviceError> {
        self.alive()?;
        let id = BufferId(self.alloc());
        self.buffers.insert(id.0, Vec::new());
        self.record(Command::CreateBuffer { id, kind })?;
        Ok(id)
    }

    fn buffer_data(&mut self, buffer: BufferId, _kind: BufferKind, data: &[u8], _usage: BufferUsageHint) -> Result<(), DeviceError> {
        self.alive()?;
        let store = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| DeviceError::InvalidOperation(format!("unknown buffer {}", buffer.0)))?;
        store.clear();
        store.extend_from_slice(data);
        self.record(Command::BufferData { id: buffer, bytes: data.len() })
    }

    fn buffer_sub_data(&mut self, buffer: BufferId, _kind: BufferKind, offset: usize, data: &[u8]) -> Result<(), DeviceError> {
        self.alive()?;
        let store = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| DeviceError::InvalidOperation(format!("unknown buffer {}", buffer.0)))?;
        let end = offset + data.len();
        if end > store.len() {
            return Err(DeviceError::InvalidOperation(format!(
                "sub-data range {offset}..{end} exceeds buffer size {}",
                store.len()
            )));
        }
        store[offset..end].copy_from_slice(data);
        self.record(Command::BufferSubData { id: buffer, offset, bytes: data.len() })
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        if self.buffers.remove(&buffer.0).is_some() {
            self.log.push(Command::DeleteBuffer(buffer));
        }
    }

    fn bind_buffer_base(&mut self, binding: u32, buffer: Option<BufferId>) -> Result<(), DeviceError> {
        self.alive()?;
        self.record(Command::BindBufferBase { binding, buffer })
    }

    fn vertex_attribute(&mut self, location: u32, binding: Option<VertexBinding>) -> Result<(), DeviceError> {
        self.alive()?;
        if location >= self.caps.max_vertex_attributes {
            return Err(DeviceError::InvalidOperation(format!("attribute location {location}")));
        }
        self.record(Command::VertexAttribute { location, binding })
    }

    fn bind_index_buffer(&mut self, buffer: Option<BufferId>) -> Result<(), DeviceError> {
        self.alive()?;
        self.record(Command::BindIndexBuffer(buffer))
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<FramebufferId, DeviceError> {
        self.alive()?;
        for attachment in [desc.color, desc.depth].into_iter().flatten() {
            if !self.textures.contains(&attachment.texture.0) {
                return Err(DeviceError::InvalidOperation("incomplete framebuffer".into()));
            }
        }
        let id = FramebufferId(self.alloc());
        self.framebuffers.insert(id.0, *desc);
        self.record(Command::CreateFramebuffer { id, desc: *desc })?;
        Ok(id)
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) -> Result<(), DeviceError> {
        self.alive()?;
        if let Some(fb) = framebuffer
            && !self.framebuffers.contains_key(&fb.0)
        {
            return Err(DeviceError::InvalidOperation(format!("unknown framebuffer {}", fb.0)));
        }
        self.bound_framebuffer = framebuffer;
        self.record(Command::BindFramebuffer(framebuffer))
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.framebuffers.remove(&framebuffer.0).is_some() {
            if self.bound_framebuffer == Some(framebuffer) {
                self.bound_framebuffer = None;
            }
            self.log.push(Command::DeleteFramebuffer(framebuffer));
        }
    }

    fn draw(&mut self, call: &DrawCall) -> Result<(), DeviceError> {
        self.alive()?;
        let program = self
            .bound_program
            .ok_or_else(|| DeviceError::InvalidOperation("draw without program".into()))?;
        let framebuffer = self.bound_framebuffer;
        self.record(Command::Draw { program, framebuffer, call: *call })
    }

    fn read_pixels(&mut self, rect: Rect, out: &mut [u8]) -> Result<(), DeviceError> {
        self.alive()?;
        let needed = rect.width as usize * rect.height as usize * 4;
        if out.len() < needed {
            return Err(DeviceError::InvalidOperation(format!(
                "readback buffer holds {} bytes, need {needed}",
                out.len()
            )));
        }
        let rgba = self.framebuffer_colors.get(&self.bound_framebuffer).copied().unwrap_or([0; 4]);
        for px in out[..needed].chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
        self.record(Command::ReadPixels(rect))
    }

    fn read_pixels_to_buffer(&mut self, rect: Rect, buffer: BufferId) -> Result<(), DeviceError> {
        self.alive()?;
        let rgba = self.framebuffer_colors.get(&self.bound_framebuffer).copied().unwrap_or([0; 4]);
        let store = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| DeviceError::InvalidOperation(format!("unknown buffer {}", buffer.0)))?;
        let needed = rect.width as usize * rect.height as usize * 4;
        store.clear();
        store.extend(rgba.iter().copied().cycle().take(needed));
        self.record(Command::ReadPixelsToBuffer { rect, buffer })
    }

    fn get_buffer_data(&mut self, buffer: BufferId, out: &mut [u8]) -> Result<(), DeviceError> {
        self.alive()?;
        let store = self
            .buffers
            .get(&buffer.0)
            .ok_or_else(|| DeviceError::InvalidOperation(format!("unknown buffer {}", buffer.0)))?;
        let n = out.len().min(store.len());
        out[..n].copy_from_slice(&store[..n]);
        Ok(())
    }

    fn fence(&mut self) -> Result<FenceId, DeviceError> {
        self.alive()?;
        let id = FenceId(self.alloc());
        self.fences.insert(id.0, self.faults.fence_latency);
        self.record(Command::Fence(id))?;
        Ok(id)
    }

    fn fence_status(&mut self, fence: FenceId) -> FenceStatus {
        match self.fences.get_mut(&fence.0) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                FenceStatus::Pending
            }
            _ => FenceStatus::Signaled,
        }
    }

    fn delete_fence(&mut self, fence: FenceId) {
        if self.fences.remove(&fence.0).is_some() {
            self.log.push(Command::DeleteFence(fence));
        }
    }

    fn flush(&mut self) {
        if !self.lost {
            self.log.push(Command::Flush);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VS: &str = "\
#version 300 es
uniform mat4 modelMatrix;
uniform highp mat4 boneMatrices[4];
layout(std140) uniform LightBlock {
    vec4 ambient;
};
void main() {}
";

    const FS: &str = "\
#version 300 es
uniform vec3 diffuse;
uniform sampler2D map;
uniform mat4 modelMatrix;
void main() {}
";

    #[test]
    fn reflects_plain_uniforms_and_blocks() {
        let mut dev = RecordingDevice::new();
        let vs = dev.compile_shader(ShaderStage::Vertex, VS).unwrap();
        let fs = dev.compile_shader(ShaderStage::Fragment, FS).unwrap();
        let program = dev.link_program(vs, fs, &[]).unwrap();

        let uniforms = dev.active_uniforms(program).unwrap();
        let names: Vec<_> = uniforms.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, ["modelMatrix", "boneMatrices", "diffuse", "map"]);
        assert_eq!(uniforms[1].array_len, 4);
        assert_eq!(uniforms[3].ty, UniformType::Sampler2D);
        assert_eq!(dev.uniform_block_index(program, "LightBlock"), Some(0));
    }

    #[test]
    fn captures_uploaded_values() {
        let mut dev = RecordingDevice::new();
        let vs = dev.compile_shader(ShaderStage::Vertex, VS).unwrap();
        let fs = dev.compile_shader(ShaderStage::Fragment, FS).unwrap();
        let program = dev.link_program(vs, fs, &[]).unwrap();
        dev.use_program(Some(program)).unwrap();

        dev.set_uniform(UniformLocation(2), UniformType::Vec3, UniformData::Floats(&[0.1, 0.2, 0.3]))
            .unwrap();
        let value = dev.uniform_value(program, "diffuse").unwrap();
        assert_eq!(value.as_floats(), Some(&[0.1, 0.2, 0.3][..]));

        let err = dev.set_uniform(UniformLocation(2), UniformType::Float, UniformData::Floats(&[1.0]));
        assert!(matches!(err, Err(DeviceError::InvalidOperation(_))));
    }

    #[test]
    fn lost_context_rejects_calls_and_restore_forgets_objects() {
        let mut dev = RecordingDevice::new();
        let vs = dev.compile_shader(ShaderStage::Vertex, VS).unwrap();
        let fs = dev.compile_shader(ShaderStage::Fragment, FS).unwrap();
        let program = dev.link_program(vs, fs, &[]).unwrap();

        dev.lose_context();
        assert_eq!(dev.viewport(Rect::new(0, 0, 1, 1)), Err(DeviceError::ContextLost));

        dev.restore_context();
        assert!(matches!(dev.use_program(Some(program)), Err(DeviceError::InvalidOperation(_))));
        assert_eq!(dev.live_programs(), 0);
    }

    #[test]
    fn injected_faults() {
        let mut dev = RecordingDevice::new();
        dev.reject_capability(Capability::SampleAlphaToCoverage);
        assert!(matches!(
            dev.set_capability(Capability::SampleAlphaToCoverage, true),
            Err(DeviceError::InvalidEnum(_))
        ));
        assert!(dev.set_capability(Capability::Blend, true).is_ok());

        dev.fail_compile_containing("BROKEN");
        assert!(matches!(
            dev.compile_shader(ShaderStage::Fragment, "// BROKEN"),
            Err(DeviceError::CompileFailed { stage: ShaderStage::Fragment, .. })
        ));
    }
}
