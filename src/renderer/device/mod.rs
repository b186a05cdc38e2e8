//! GPU command interface
//!
//! [`GpuDevice`] is the raw, GL-shaped command surface every renderer
//! subsystem talks to. It does no caching of its own: redundant-state
//! elimination lives in the [`StateTracker`](crate::renderer::state::StateTracker),
//! which is the only component allowed to issue state-setting calls.
//!
//! Two implementations ship with the crate:
//!
//! | Backend             | Use                                                  |
//! |---------------------|------------------------------------------------------|
//! | [`RecordingDevice`] | headless rendering and the capturing test double     |
//! | `GlowDevice`        | OpenGL 3.3 / OpenGL ES 3.0 / WebGL2 (feature `glow`) |
//!
//! Every call returns `Result<_, DeviceError>`. [`DeviceError::ContextLost`]
//! is the only error callers must propagate; everything else is a per-call
//! failure the caller may absorb.

pub mod recording;

#[cfg(feature = "glow")]
pub mod glow;

pub use recording::{Command, RecordingDevice};

use std::fmt;

use bitflags::bitflags;
use thiserror::Error;

use crate::resources::geometry::PrimitiveMode;
use crate::resources::material::{BlendEquation, BlendFactor, CompareFunc, StencilOp};
use crate::resources::texture::{Sampler, TextureFormat, TextureKind};

// ============================================================================
// Handles
// ============================================================================

macro_rules! device_id {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u32);
        )*
    };
}

device_id!(
    /// Compiled shader stage.
    ShaderId,
    /// Linked program.
    ProgramId,
    TextureId,
    BufferId,
    FramebufferId,
    FenceId,
);

/// Location of an active uniform within its program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u32);

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("context lost")]
    ContextLost,
    #[error("invalid enum: {0}")]
    InvalidEnum(String),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("out of memory")]
    OutOfMemory,
    #[error("{stage:?} shader failed to compile: {log}")]
    CompileFailed { stage: ShaderStage, log: String },
    #[error("program failed to link: {0}")]
    LinkFailed(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
}

// ============================================================================
// Capability query surface
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub max_texture_units: u32,
    pub max_texture_size: u32,
    pub max_cube_map_size: u32,
    pub max_samples: u32,
    pub max_vertex_uniform_vectors: u32,
    pub max_vertex_attributes: u32,
    pub uniform_buffers: bool,
    /// Program status can be polled without blocking.
    pub parallel_shader_compile: bool,
    pub shader_texture_lod: bool,
    pub float_textures: bool,
    pub float_render_targets: bool,
    pub extensions: Vec<String>,
}

impl DeviceCapabilities {
    /// WebGL2 minimums.
    #[must_use]
    pub fn webgl2_baseline() -> Self {
        Self {
            max_texture_units: 16,
            max_texture_size: 2048,
            max_cube_map_size: 2048,
            max_samples: 4,
            max_vertex_uniform_vectors: 256,
            max_vertex_attributes: 16,
            uniform_buffers: true,
            parallel_shader_compile: false,
            shader_texture_lod: true,
            float_textures: true,
            float_render_targets: false,
            extensions: Vec::new(),
        }
    }

    #[must_use]
    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|e| e == name)
    }
}

// ============================================================================
// Command vocabulary
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Blend,
    DepthTest,
    CullFace,
    StencilTest,
    PolygonOffsetFill,
    ScissorTest,
    SampleAlphaToCoverage,
    Dither,
}

impl Capability {
    pub const COUNT: usize = 8;

    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullFace {
    Front,
    Back,
    FrontAndBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrontFace {
    Ccw,
    Cw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    #[must_use]
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClearFlags: u8 {
        const COLOR   = 1 << 0;
        const DEPTH   = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

/// GLSL type of a reflected uniform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformType {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat3,
    Mat4,
    Int,
    Bool,
    Sampler2D,
    SamplerCube,
    Sampler2DShadow,
}

impl UniformType {
    #[must_use]
    pub fn from_glsl(name: &str) -> Option<Self> {
        Some(match name {
            "float" => Self::Float,
            "vec2" => Self::Vec2,
            "vec3" => Self::Vec3,
            "vec4" => Self::Vec4,
            "mat3" => Self::Mat3,
            "mat4" => Self::Mat4,
            "int" => Self::Int,
            "bool" => Self::Bool,
            "sampler2D" => Self::Sampler2D,
            "samplerCube" => Self::SamplerCube,
            "sampler2DShadow" => Self::Sampler2DShadow,
            _ => return None,
        })
    }

    #[must_use]
    pub fn glsl_name(self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Vec2 => "vec2",
            Self::Vec3 => "vec3",
            Self::Vec4 => "vec4",
            Self::Mat3 => "mat3",
            Self::Mat4 => "mat4",
            Self::Int => "int",
            Self::Bool => "bool",
            Self::Sampler2D => "sampler2D",
            Self::SamplerCube => "samplerCube",
            Self::Sampler2DShadow => "sampler2DShadow",
        }
    }

    /// Scalar components per element.
    #[must_use]
    pub fn components(self) -> usize {
        match self {
            Self::Float | Self::Int | Self::Bool => 1,
            Self::Vec2 => 2,
            Self::Vec3 => 3,
            Self::Vec4 => 4,
            Self::Mat3 => 9,
            Self::Mat4 => 16,
            Self::Sampler2D | Self::SamplerCube | Self::Sampler2DShadow => 1,
        }
    }

    #[must_use]
    pub fn is_sampler(self) -> bool {
        matches!(self, Self::Sampler2D | Self::SamplerCube | Self::Sampler2DShadow)
    }

    #[must_use]
    pub fn texture_kind(self) -> Option<TextureKind> {
        match self {
            Self::Sampler2D | Self::Sampler2DShadow => Some(TextureKind::D2),
            Self::SamplerCube => Some(TextureKind::Cube),
            _ => None,
        }
    }

    /// Uploaded through the integer entry points.
    #[must_use]
    pub fn is_integer(self) -> bool {
        matches!(self, Self::Int | Self::Bool) || self.is_sampler()
    }
}

/// One reflected active uniform. Arrays report their base name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveUniform {
    pub name: String,
    pub ty: UniformType,
    pub array_len: u32,
    pub location: UniformLocation,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformData<'a> {
    Floats(&'a [f32]),
    Ints(&'a [i32]),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramStatus {
    Pending,
    Linked,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
    Uniform,
    PixelPack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsageHint {
    StaticDraw,
    DynamicDraw,
    StreamRead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub kind: TextureKind,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub mip_levels: u32,
    pub sampler: Sampler,
    /// Texels are sRGB-encoded and decoded by the sampler.
    pub srgb: bool,
}

/// Vertex attribute source. `divisor` > 0 makes it per-instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexBinding {
    pub buffer: BufferId,
    pub components: u32,
    pub stride: u32,
    pub offset: u32,
    pub divisor: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureAttachment {
    pub texture: TextureId,
    pub kind: TextureKind,
    /// Cube face index, ignored for 2D textures.
    pub face: u32,
    pub level: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferDesc {
    pub color: Option<TextureAttachment>,
    pub depth: Option<TextureAttachment>,
    pub stencil: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    Pending,
    Signaled,
}

/// Draw submission parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCall {
    pub mode: PrimitiveMode,
    pub first: u32,
    pub count: u32,
    pub instances: u32,
    pub indexed: bool,
}

// ============================================================================
// The device trait
// ============================================================================

pub trait GpuDevice {
    fn capabilities(&self) -> &DeviceCapabilities;
    fn is_context_lost(&self) -> bool;
    /// Surface size in physical pixels.
    fn drawing_buffer_size(&self) -> (u32, u32);
    fn resize_drawing_buffer(&mut self, width: u32, height: u32);

    // --- programs ---
    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderId, DeviceError>;
    fn delete_shader(&mut self, shader: ShaderId);
    /// Links with fixed attribute locations. With parallel compile support
    /// the result may still be [`ProgramStatus::Pending`].
    fn link_program(
        &mut self,
        vertex: ShaderId,
        fragment: ShaderId,
        attribute_locations: &[(String, u32)],
    ) -> Result<ProgramId, DeviceError>;
    fn program_status(&mut self, program: ProgramId) -> ProgramStatus;
    fn active_uniforms(&mut self, program: ProgramId) -> Result<Vec<ActiveUniform>, DeviceError>;
    fn uniform_block_index(&mut self, program: ProgramId, name: &str) -> Option<u32>;
    fn uniform_block_binding(&mut self, program: ProgramId, block: u32, binding: u32) -> Result<(), DeviceError>;
    fn delete_program(&mut self, program: ProgramId);
    fn use_program(&mut self, program: Option<ProgramId>) -> Result<(), DeviceError>;
    fn set_uniform(&mut self, location: UniformLocation, ty: UniformType, data: UniformData<'_>) -> Result<(), DeviceError>;

    // --- fixed-function state ---
    fn set_capability(&mut self, cap: Capability, enabled: bool) -> Result<(), DeviceError>;
    fn blend_equation(&mut self, rgb: BlendEquation, alpha: BlendEquation) -> Result<(), DeviceError>;
    fn blend_func(
        &mut self,
        src: BlendFactor,
        dst: BlendFactor,
        src_alpha: BlendFactor,
        dst_alpha: BlendFactor,
    ) -> Result<(), DeviceError>;
    fn blend_color(&mut self, color: [f32; 4]) -> Result<(), DeviceError>;
    fn depth_func(&mut self, func: CompareFunc) -> Result<(), DeviceError>;
    fn depth_mask(&mut self, write: bool) -> Result<(), DeviceError>;
    fn color_mask(&mut self, mask: [bool; 4]) -> Result<(), DeviceError>;
    fn stencil_func(&mut self, func: CompareFunc, reference: i32, mask: u32) -> Result<(), DeviceError>;
    fn stencil_op(&mut self, fail: StencilOp, z_fail: StencilOp, z_pass: StencilOp) -> Result<(), DeviceError>;
    fn stencil_mask(&mut self, mask: u32) -> Result<(), DeviceError>;
    fn polygon_offset(&mut self, factor: f32, units: f32) -> Result<(), DeviceError>;
    fn scissor(&mut self, rect: Rect) -> Result<(), DeviceError>;
    fn viewport(&mut self, rect: Rect) -> Result<(), DeviceError>;
    fn cull_face(&mut self, face: CullFace) -> Result<(), DeviceError>;
    fn front_face(&mut self, face: FrontFace) -> Result<(), DeviceError>;
    fn line_width(&mut self, width: f32) -> Result<(), DeviceError>;
    fn clear_color(&mut self, color: [f32; 4]) -> Result<(), DeviceError>;
    fn clear_depth(&mut self, depth: f32) -> Result<(), DeviceError>;
    fn clear_stencil(&mut self, value: i32) -> Result<(), DeviceError>;
    fn clear(&mut self, flags: ClearFlags) -> Result<(), DeviceError>;

    // --- textures ---
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId, DeviceError>;
    /// Uploads one face / level. `data` is `None` to allocate storage only.
    fn upload_texture(
        &mut self,
        texture: TextureId,
        desc: &TextureDesc,
        face: u32,
        level: u32,
        data: Option<&[u8]>,
    ) -> Result<(), DeviceError>;
    fn generate_mipmaps(&mut self, texture: TextureId, kind: TextureKind) -> Result<(), DeviceError>;
    fn delete_texture(&mut self, texture: TextureId);
    fn active_texture(&mut self, unit: u32) -> Result<(), DeviceError>;
    fn bind_texture(&mut self, kind: TextureKind, texture: Option<TextureId>) -> Result<(), DeviceError>;

    // --- buffers & vertex input ---
    fn create_buffer(&mut self, kind: BufferKind) -> Result<BufferId, DeviceError>;
    fn buffer_data(&mut self, buffer: BufferId, kind: BufferKind, data: &[u8], usage: BufferUsageHint) -> Result<(), DeviceError>;
    fn buffer_sub_data(&mut self, buffer: BufferId, kind: BufferKind, offset: usize, data: &[u8]) -> Result<(), DeviceError>;
    fn delete_buffer(&mut self, buffer: BufferId);
    fn bind_buffer_base(&mut self, binding: u32, buffer: Option<BufferId>) -> Result<(), DeviceError>;
    fn vertex_attribute(&mut self, location: u32, binding: Option<VertexBinding>) -> Result<(), DeviceError>;
    fn bind_index_buffer(&mut self, buffer: Option<BufferId>) -> Result<(), DeviceError>;

    // --- framebuffers ---
    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<FramebufferId, DeviceError>;
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) -> Result<(), DeviceError>;
    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);

    // --- draw & readback ---
    fn draw(&mut self, call: &DrawCall) -> Result<(), DeviceError>;
    fn read_pixels(&mut self, rect: Rect, out: &mut [u8]) -> Result<(), DeviceError>;
    /// Starts an asynchronous read into a pixel-pack buffer.
    fn read_pixels_to_buffer(&mut self, rect: Rect, buffer: BufferId) -> Result<(), DeviceError>;
    fn get_buffer_data(&mut self, buffer: BufferId, out: &mut [u8]) -> Result<(), DeviceError>;
    fn fence(&mut self) -> Result<FenceId, DeviceError>;
    fn fence_status(&mut self, fence: FenceId) -> FenceStatus;
    fn delete_fence(&mut self, fence: FenceId);
    fn flush(&mut self);
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Vertex => "vertex",
            Self::Fragment => "fragment",
        })
    }
}
