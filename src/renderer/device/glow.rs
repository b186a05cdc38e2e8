//! OpenGL 3.3 / OpenGL ES 3.0 / WebGL2 backend on top of `glow`.
//!
//! Object ids handed out to the renderer are plain integers mapped to the
//! native `glow` handles, so the rest of the crate never sees backend types.
//! A single vertex array object is created up front and stays bound.

use glow::HasContext;
use log::{debug, warn};
use rustc_hash::FxHashMap;

use super::{
    ActiveUniform, BufferId, BufferKind, BufferUsageHint, Capability, ClearFlags, CullFace,
    DeviceCapabilities, DeviceError, DrawCall, FenceId, FenceStatus, FramebufferDesc,
    FramebufferId, FrontFace, GpuDevice, ProgramId, ProgramStatus, Rect, ShaderId, ShaderStage,
    TextureDesc, TextureId, UniformData, UniformLocation, UniformType, VertexBinding,
};
use crate::resources::geometry::PrimitiveMode;
use crate::resources::material::{BlendEquation, BlendFactor, CompareFunc, StencilOp};
use crate::resources::texture::{FilterMode, TextureFormat, TextureKind, WrapMode};

const PARALLEL_COMPILE_EXT: &str = "GL_KHR_parallel_shader_compile";

struct ProgramObject {
    native: glow::Program,
    locations: Vec<Option<glow::UniformLocation>>,
}

pub struct GlowDevice {
    gl: glow::Context,
    caps: DeviceCapabilities,
    lost: bool,
    size: (u32, u32),
    next_id: u32,

    shaders: FxHashMap<u32, glow::Shader>,
    programs: FxHashMap<u32, ProgramObject>,
    textures: FxHashMap<u32, glow::Texture>,
    buffers: FxHashMap<u32, glow::Buffer>,
    framebuffers: FxHashMap<u32, glow::Framebuffer>,
    fences: FxHashMap<u32, glow::Fence>,

    bound_program: Option<u32>,
    _vao: Option<glow::VertexArray>,
}

impl GlowDevice {
    /// Wraps a current GL context.
    ///
    /// # Safety
    /// `gl` must be current on the calling thread for the lifetime of the device.
    pub unsafe fn new(gl: glow::Context, width: u32, height: u32) -> Result<Self, DeviceError> {
        let caps = unsafe { query_capabilities(&gl) };
        debug!("GL capabilities: {caps:?}");

        let vao = unsafe {
            let vao = gl.create_vertex_array().map_err(DeviceError::Unsupported)?;
            gl.bind_vertex_array(Some(vao));
            vao
        };

        Ok(Self {
            gl,
            caps,
            lost: false,
            size: (width, height),
            next_id: 1,
            shaders: FxHashMap::default(),
            programs: FxHashMap::default(),
            textures: FxHashMap::default(),
            buffers: FxHashMap::default(),
            framebuffers: FxHashMap::default(),
            fences: FxHashMap::default(),
            bound_program: None,
            _vao: Some(vao),
        })
    }

    #[must_use]
    pub fn context(&self) -> &glow::Context {
        &self.gl
    }

    fn alloc(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Drains the GL error queue into a `DeviceError`.
    fn check(&mut self, what: &str) -> Result<(), DeviceError> {
        if self.lost {
            return Err(DeviceError::ContextLost);
        }
        let code = unsafe { self.gl.get_error() };
        match code {
            glow::NO_ERROR => Ok(()),
            glow::CONTEXT_LOST => {
                self.lost = true;
                Err(DeviceError::ContextLost)
            }
            glow::INVALID_ENUM => Err(DeviceError::InvalidEnum(what.to_string())),
            glow::OUT_OF_MEMORY => Err(DeviceError::OutOfMemory),
            _ => Err(DeviceError::InvalidOperation(format!("{what}: 0x{code:04x}"))),
        }
    }

    fn texture(&self, id: TextureId) -> Result<glow::Texture, DeviceError> {
        self.textures
            .get(&id.0)
            .copied()
            .ok_or_else(|| DeviceError::InvalidOperation(format!("unknown texture {}", id.0)))
    }

    fn buffer(&self, id: BufferId) -> Result<glow::Buffer, DeviceError> {
        self.buffers
            .get(&id.0)
            .copied()
            .ok_or_else(|| DeviceError::InvalidOperation(format!("unknown buffer {}", id.0)))
    }
}

unsafe fn query_capabilities(gl: &glow::Context) -> DeviceCapabilities {
    unsafe {
        let extensions: Vec<String> = gl.supported_extensions().iter().cloned().collect();
        let has = |name: &str| extensions.iter().any(|e| e == name);
        DeviceCapabilities {
            max_texture_units: gl.get_parameter_i32(glow::MAX_TEXTURE_IMAGE_UNITS) as u32,
            max_texture_size: gl.get_parameter_i32(glow::MAX_TEXTURE_SIZE) as u32,
            max_cube_map_size: gl.get_parameter_i32(glow::MAX_CUBE_MAP_TEXTURE_SIZE) as u32,
            max_samples: gl.get_parameter_i32(glow::MAX_SAMPLES) as u32,
            max_vertex_uniform_vectors: gl.get_parameter_i32(glow::MAX_VERTEX_UNIFORM_VECTORS) as u32,
            max_vertex_attributes: gl.get_parameter_i32(glow::MAX_VERTEX_ATTRIBS) as u32,
            uniform_buffers: true,
            parallel_shader_compile: has(PARALLEL_COMPILE_EXT),
            shader_texture_lod: true,
            float_textures: true,
            float_render_targets: has("GL_EXT_color_buffer_float") || !gl.version().is_embedded,
            extensions,
        }
    }
}

fn stage_enum(stage: ShaderStage) -> u32 {
    match stage {
        ShaderStage::Vertex => glow::VERTEX_SHADER,
        ShaderStage::Fragment => glow::FRAGMENT_SHADER,
    }
}

fn capability_enum(cap: Capability) -> u32 {
    match cap {
        Capability::Blend => glow::BLEND,
        Capability::DepthTest => glow::DEPTH_TEST,
        Capability::CullFace => glow::CULL_FACE,
        Capability::StencilTest => glow::STENCIL_TEST,
        Capability::PolygonOffsetFill => glow::POLYGON_OFFSET_FILL,
        Capability::ScissorTest => glow::SCISSOR_TEST,
        Capability::SampleAlphaToCoverage => glow::SAMPLE_ALPHA_TO_COVERAGE,
        Capability::Dither => glow::DITHER,
    }
}

fn equation_enum(eq: BlendEquation) -> u32 {
    match eq {
        BlendEquation::Add => glow::FUNC_ADD,
        BlendEquation::Subtract => glow::FUNC_SUBTRACT,
        BlendEquation::ReverseSubtract => glow::FUNC_REVERSE_SUBTRACT,
        BlendEquation::Min => glow::MIN,
        BlendEquation::Max => glow::MAX,
    }
}

fn factor_enum(f: BlendFactor) -> u32 {
    match f {
        BlendFactor::Zero => glow::ZERO,
        BlendFactor::One => glow::ONE,
        BlendFactor::SrcColor => glow::SRC_COLOR,
        BlendFactor::OneMinusSrcColor => glow::ONE_MINUS_SRC_COLOR,
        BlendFactor::SrcAlpha => glow::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => glow::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstAlpha => glow::DST_ALPHA,
        BlendFactor::OneMinusDstAlpha => glow::ONE_MINUS_DST_ALPHA,
        BlendFactor::DstColor => glow::DST_COLOR,
        BlendFactor::OneMinusDstColor => glow::ONE_MINUS_DST_COLOR,
        BlendFactor::SrcAlphaSaturate => glow::SRC_ALPHA_SATURATE,
        BlendFactor::ConstantColor => glow::CONSTANT_COLOR,
        BlendFactor::OneMinusConstantColor => glow::ONE_MINUS_CONSTANT_COLOR,
    }
}

fn compare_enum(f: CompareFunc) -> u32 {
    match f {
        CompareFunc::Never => glow::NEVER,
        CompareFunc::Less => glow::LESS,
        CompareFunc::Equal => glow::EQUAL,
        CompareFunc::LessEqual => glow::LEQUAL,
        CompareFunc::Greater => glow::GREATER,
        CompareFunc::NotEqual => glow::NOTEQUAL,
        CompareFunc::GreaterEqual => glow::GEQUAL,
        CompareFunc::Always => glow::ALWAYS,
    }
}

fn stencil_op_enum(op: StencilOp) -> u32 {
    match op {
        StencilOp::Keep => glow::KEEP,
        StencilOp::Zero => glow::ZERO,
        StencilOp::Replace => glow::REPLACE,
        StencilOp::Increment => glow::INCR,
        StencilOp::IncrementWrap => glow::INCR_WRAP,
        StencilOp::Decrement => glow::DECR,
        StencilOp::DecrementWrap => glow::DECR_WRAP,
        StencilOp::Invert => glow::INVERT,
    }
}

fn texture_target(kind: TextureKind) -> u32 {
    match kind {
        TextureKind::D2 => glow::TEXTURE_2D,
        TextureKind::Cube => glow::TEXTURE_CUBE_MAP,
    }
}

fn image_target(kind: TextureKind, face: u32) -> u32 {
    match kind {
        TextureKind::D2 => glow::TEXTURE_2D,
        TextureKind::Cube => glow::TEXTURE_CUBE_MAP_POSITIVE_X + face,
    }
}

/// `(internal format, format, type)`
fn format_triple(format: TextureFormat, srgb: bool) -> (u32, u32, u32) {
    match format {
        TextureFormat::Rgba8 if srgb => (glow::SRGB8_ALPHA8, glow::RGBA, glow::UNSIGNED_BYTE),
        TextureFormat::Rgba8 => (glow::RGBA8, glow::RGBA, glow::UNSIGNED_BYTE),
        TextureFormat::Rgb8 if srgb => (glow::SRGB8, glow::RGB, glow::UNSIGNED_BYTE),
        TextureFormat::Rgb8 => (glow::RGB8, glow::RGB, glow::UNSIGNED_BYTE),
        TextureFormat::R8 => (glow::R8, glow::RED, glow::UNSIGNED_BYTE),
        TextureFormat::Rgba16Float => (glow::RGBA16F, glow::RGBA, glow::HALF_FLOAT),
        TextureFormat::Rgba32Float => (glow::RGBA32F, glow::RGBA, glow::FLOAT),
        TextureFormat::Depth24 => (glow::DEPTH_COMPONENT24, glow::DEPTH_COMPONENT, glow::UNSIGNED_INT),
        TextureFormat::Depth24Stencil8 => {
            (glow::DEPTH24_STENCIL8, glow::DEPTH_STENCIL, glow::UNSIGNED_INT_24_8)
        }
    }
}

fn filter_enum(f: FilterMode) -> u32 {
    match f {
        FilterMode::Nearest => glow::NEAREST,
        FilterMode::Linear => glow::LINEAR,
        FilterMode::NearestMipmapNearest => glow::NEAREST_MIPMAP_NEAREST,
        FilterMode::LinearMipmapLinear => glow::LINEAR_MIPMAP_LINEAR,
    }
}

fn wrap_enum(w: WrapMode) -> u32 {
    match w {
        WrapMode::Repeat => glow::REPEAT,
        WrapMode::ClampToEdge => glow::CLAMP_TO_EDGE,
        WrapMode::MirroredRepeat => glow::MIRRORED_REPEAT,
    }
}

fn mode_enum(mode: PrimitiveMode) -> u32 {
    match mode {
        PrimitiveMode::Triangles => glow::TRIANGLES,
        PrimitiveMode::TriangleStrip => glow::TRIANGLE_STRIP,
        PrimitiveMode::Lines => glow::LINES,
        PrimitiveMode::LineStrip => glow::LINE_STRIP,
        PrimitiveMode::Points => glow::POINTS,
    }
}

fn buffer_target(kind: BufferKind) -> u32 {
    match kind {
        BufferKind::Vertex => glow::ARRAY_BUFFER,
        BufferKind::Index => glow::ELEMENT_ARRAY_BUFFER,
        BufferKind::Uniform => glow::UNIFORM_BUFFER,
        BufferKind::PixelPack => glow::PIXEL_PACK_BUFFER,
    }
}

fn uniform_type(gl_type: u32) -> Option<UniformType> {
    Some(match gl_type {
        glow::FLOAT => UniformType::Float,
        glow::FLOAT_VEC2 => UniformType::Vec2,
        glow::FLOAT_VEC3 => UniformType::Vec3,
        glow::FLOAT_VEC4 => UniformType::Vec4,
        glow::FLOAT_MAT3 => UniformType::Mat3,
        glow::FLOAT_MAT4 => UniformType::Mat4,
        glow::INT => UniformType::Int,
        glow::BOOL => UniformType::Bool,
        glow::SAMPLER_2D => UniformType::Sampler2D,
        glow::SAMPLER_CUBE => UniformType::SamplerCube,
        glow::SAMPLER_2D_SHADOW => UniformType::Sampler2DShadow,
        _ => return None,
    })
}

impl GpuDevice for GlowDevice {
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
        self.check("before compile")?;
        let shader = unsafe {
            let shader = self.gl.create_shader(stage_enum(stage)).map_err(DeviceError::Unsupported)?;
            self.gl.shader_source(shader, source);
            self.gl.compile_shader(shader);
            shader
        };
        // Compile status is deferred to link time when compiling in parallel.
        if !self.caps.parallel_shader_compile && !unsafe { self.gl.get_shader_compile_status(shader) } {
            let log = unsafe { self.gl.get_shader_info_log(shader) };
            unsafe { self.gl.delete_shader(shader) };
            return Err(DeviceError::CompileFailed { stage, log });
        }
        let id = self.alloc();
        self.shaders.insert(id, shader);
        Ok(ShaderId(id))
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        if let Some(native) = self.shaders.remove(&shader.0) {
            unsafe { self.gl.delete_shader(native) };
        }
    }

    fn link_program(&mut self, vertex: ShaderId, fragment: ShaderId, attribute_locations: &[(String, u32)]) -> Result<ProgramId, DeviceError> {
        self.check("before link")?;
        let (Some(&vs), Some(&fs)) = (self.shaders.get(&vertex.0), self.shaders.get(&fragment.0)) else {
            return Err(DeviceError::LinkFailed("unknown shader object".into()));
        };
        let native = unsafe {
            let program = self.gl.create_program().map_err(DeviceError::Unsupported)?;
            self.gl.attach_shader(program, vs);
            self.gl.attach_shader(program, fs);
            for (name, location) in attribute_locations {
                self.gl.bind_attrib_location(program, *location, name);
            }
            self.gl.link_program(program);
            program
        };
        if !self.caps.parallel_shader_compile && !unsafe { self.gl.get_program_link_status(native) } {
            let log = unsafe { self.gl.get_program_info_log(native) };
            unsafe { self.gl.delete_program(native) };
            return Err(DeviceError::LinkFailed(log));
        }
        let id = self.alloc();
        self.programs.insert(id, ProgramObject { native, locations: Vec::new() });
        Ok(ProgramId(id))
    }

    fn program_status(&mut self, program: ProgramId) -> ProgramStatus {
        if self.lost {
            return ProgramStatus::Failed("context lost".into());
        }
        let Some(object) = self.programs.get(&program.0) else {
            return ProgramStatus::Failed("unknown program".into());
        };
        unsafe {
            if self.caps.parallel_shader_compile && !self.gl.get_program_completion_status(object.native) {
                return ProgramStatus::Pending;
            }
            if self.gl.get_program_link_status(object.native) {
                ProgramStatus::Linked
            } else {
                ProgramStatus::Failed(self.gl.get_program_info_log(object.native))
            }
        }
    }

    fn active_uniforms(&mut self, program: ProgramId) -> Result<Vec<ActiveUniform>, DeviceError> {
        self.check("before reflect")?;
        let gl = &self.gl;
        let object = self
            .programs
            .get_mut(&program.0)
            .ok_or_else(|| DeviceError::InvalidOperation(format!("unknown program {}", program.0)))?;

        let mut out = Vec::new();
        object.locations.clear();
        unsafe {
            let count = gl.get_active_uniforms(object.native);
            for index in 0..count {
                let Some(info) = gl.get_active_uniform(object.native, index) else { continue };
                let Some(ty) = uniform_type(info.utype) else {
                    warn!("Skipping uniform {} with unsupported type 0x{:04x}", info.name, info.utype);
                    continue;
                };
                // Block members report no location.
                let Some(location) = gl.get_uniform_location(object.native, &info.name) else { continue };
                let name = info.name.trim_end_matches("[0]").to_string();
                let slot = object.locations.len() as u32;
                object.locations.push(Some(location));
                out.push(ActiveUniform {
                    name,
                    ty,
                    array_len: info.size.max(1) as u32,
                    location: UniformLocation(slot),
                });
            }
        }
        Ok(out)
    }

    fn uniform_block_index(&mut self, program: ProgramId, name: &str) -> Option<u32> {
        let object = self.programs.get(&program.0)?;
        unsafe { self.gl.get_uniform_block_index(object.native, name) }
    }

    fn uniform_block_binding(&mut self, program: ProgramId, block: u32, binding: u32) -> Result<(), DeviceError> {
        let native = self
            .programs
            .get(&program.0)
            .map(|p| p.native)
            .ok_or_else(|| DeviceError::InvalidOperation("unknown program".into()))?;
        unsafe { self.gl.uniform_block_binding(native, block, binding) };
        self.check("uniform_block_binding")
    }

    fn delete_program(&mut self, program: ProgramId) {
        if let Some(object) = self.programs.remove(&program.0) {
            if self.bound_program == Some(program.0) {
                self.bound_program = None;
            }
            unsafe { self.gl.delete_program(object.native) };
        }
    }

    fn use_program(&mut self, program: Option<ProgramId>) -> Result<(), DeviceError> {
        let native = match program {
            Some(p) => Some(
                self.programs
                    .get(&p.0)
                    .map(|o| o.native)
                    .ok_or_else(|| DeviceError::InvalidOperation(format!("unknown program {}", p.0)))?,
            ),
            None => None,
        };
        unsafe { self.gl.use_program(native) };
        self.bound_program = program.map(|p| p.0);
        self.check("use_program")
    }

    fn set_uniform(&mut self, location: UniformLocation, ty: UniformType, data: UniformData<'_>) -> Result<(), DeviceError> {
        let object = self
            .bound_program
            .and_then(|id| self.programs.get(&id))
            .ok_or_else(|| DeviceError::InvalidOperation("no program bound".into()))?;
        let loc = object
            .locations
            .get(location.0 as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| DeviceError::InvalidOperation(format!("bad uniform location {}", location.0)))?;
        unsafe {
            match (ty, data) {
                (UniformType::Float, UniformData::Floats(v)) => self.gl.uniform_1_f32_slice(Some(loc), v),
                (UniformType::Vec2, UniformData::Floats(v)) => self.gl.uniform_2_f32_slice(Some(loc), v),
                (UniformType::Vec3, UniformData::Floats(v)) => self.gl.uniform_3_f32_slice(Some(loc), v),
                (UniformType::Vec4, UniformData::Floats(v)) => self.gl.uniform_4_f32_slice(Some(loc), v),
                (UniformType::Mat3, UniformData::Floats(v)) => {
                    self.gl.uniform_matrix_3_f32_slice(Some(loc), false, v);
                }
                (UniformType::Mat4, UniformData::Floats(v)) => {
                    self.gl.uniform_matrix_4_f32_slice(Some(loc), false, v);
                }
                (_, UniformData::Ints(v)) if ty.is_integer() => self.gl.uniform_1_i32_slice(Some(loc), v),
                _ => {
                    return Err(DeviceError::InvalidOperation(format!("payload does not match {ty:?}")));
                }
            }
        }
        self.check("set_uniform")
    }

    fn set_capability(&mut self, cap: Capability, enabled: bool) -> Result<(), DeviceError> {
        unsafe {
            if enabled {
                self.gl.enable(capability_enum(cap));
            } else {
                self.gl.disable(capability_enum(cap));
            }
        }
        self.check("set_capability")
    }

    fn blend_equation(&mut self, rgb: BlendEquation, alpha: BlendEquation) -> Result<(), DeviceError> {
        unsafe { self.gl.blend_equation_separate(equation_enum(rgb), equation_enum(alpha)) };
        self.check("blend_equation")
    }

    fn blend_func(&mut self, src: BlendFactor, dst: BlendFactor, src_alpha: BlendFactor, dst_alpha: BlendFactor) -> Result<(), DeviceError> {
        unsafe {
            self.gl.blend_func_separate(
                factor_enum(src),
                factor_enum(dst),
                factor_enum(src_alpha),
                factor_enum(dst_alpha),
            );
        }
        self.check("blend_func")
    }

    fn blend_color(&mut self, c: [f32; 4]) -> Result<(), DeviceError> {
        unsafe { self.gl.blend_color(c[0], c[1], c[2], c[3]) };
        self.check("blend_color")
    }

    fn depth_func(&mut self, func: CompareFunc) -> Result<(), DeviceError> {
        unsafe { self.gl.depth_func(compare_enum(func)) };
        self.check("depth_func")
    }

    fn depth_mask(&mut self, write: bool) -> Result<(), DeviceError> {
        unsafe { self.gl.depth_mask(write) };
        self.check("depth_mask")
    }

    fn color_mask(&mut self, m: [bool; 4]) -> Result<(), DeviceError> {
        unsafe { self.gl.color_mask(m[0], m[1], m[2], m[3]) };
        self.check("color_mask")
    }

    fn stencil_func(&mut self, func: CompareFunc, reference: i32, mask: u32) -> Result<(), DeviceError> {
        unsafe { self.gl.stencil_func(compare_enum(func), reference, mask) };
        self.check("stencil_func")
    }

    fn stencil_op(&mut self, fail: StencilOp, z_fail: StencilOp, z_pass: StencilOp) -> Result<(), DeviceError> {
        unsafe {
            self.gl.stencil_op(stencil_op_enum(fail), stencil_op_enum(z_fail), stencil_op_enum(z_pass));
        }
        self.check("stencil_op")
    }

    fn stencil_mask(&mut self, mask: u32) -> Result<(), DeviceError> {
        unsafe { self.gl.stencil_mask(mask) };
        self.check("stencil_mask")
    }

    fn polygon_offset(&mut self, factor: f32, units: f32) -> Result<(), DeviceError> {
        unsafe { self.gl.polygon_offset(factor, units) };
        self.check("polygon_offset")
    }

    fn scissor(&mut self, r: Rect) -> Result<(), DeviceError> {
        unsafe { self.gl.scissor(r.x, r.y, r.width as i32, r.height as i32) };
        self.check("scissor")
    }

    fn viewport(&mut self, r: Rect) -> Result<(), DeviceError> {
        unsafe { self.gl.viewport(r.x, r.y, r.width as i32, r.height as i32) };
        self.check("viewport")
    }

    fn cull_face(&mut self, face: CullFace) -> Result<(), DeviceError> {
        let mode = match face {
            CullFace::Front => glow::FRONT,
            CullFace::Back => glow::BACK,
            CullFace::FrontAndBack => glow::FRONT_AND_BACK,
        };
        unsafe { self.gl.cull_face(mode) };
        self.check("cull_face")
    }

    fn front_face(&mut self, face: FrontFace) -> Result<(), DeviceError> {
        let mode = match face {
            FrontFace::Ccw => glow::CCW,
            FrontFace::Cw => glow::CW,
        };
        unsafe { self.gl.front_face(mode) };
        self.check("front_face")
    }

    fn line_width(&mut self, width: f32) -> Result<(), DeviceError> {
        unsafe { self.gl.line_width(width) };
        self.check("line_width")
    }

    fn clear_color(&mut self, c: [f32; 4]) -> Result<(), DeviceError> {
        unsafe { self.gl.clear_color(c[0], c[1], c[2], c[3]) };
        self.check("clear_color")
    }

    fn clear_depth(&mut self, depth: f32) -> Result<(), DeviceError> {
        unsafe { self.gl.clear_depth_f32(depth) };
        self.check("clear_depth")
    }

    fn clear_stencil(&mut self, value: i32) -> Result<(), DeviceError> {
        unsafe { self.gl.clear_stencil(value) };
        self.check("clear_stencil")
    }

    fn clear(&mut self, flags: ClearFlags) -> Result<(), DeviceError> {
        let mut mask = 0;
        if flags.contains(ClearFlags::COLOR) {
            mask |= glow::COLOR_BUFFER_BIT;
        }
        if flags.contains(ClearFlags::DEPTH) {
            mask |= glow::DEPTH_BUFFER_BIT;
        }
        if flags.contains(ClearFlags::STENCIL) {
            mask |= glow::STENCIL_BUFFER_BIT;
        }
        unsafe { self.gl.clear(mask) };
        self.check("clear")
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId, DeviceError> {
        self.check("before create_texture")?;
        let target = texture_target(desc.kind);
        let native = unsafe {
            let tex = self.gl.create_texture().map_err(DeviceError::Unsupported)?;
            self.gl.bind_texture(target, Some(tex));
            self.gl.tex_parameter_i32(target, glow::TEXTURE_MAG_FILTER, filter_enum(desc.sampler.mag_filter) as i32);
            let min = if desc.mip_levels > 1 { desc.sampler.min_filter } else { base_filter(desc.sampler.min_filter) };
            self.gl.tex_parameter_i32(target, glow::TEXTURE_MIN_FILTER, filter_enum(min) as i32);
            self.gl.tex_parameter_i32(target, glow::TEXTURE_WRAP_S, wrap_enum(desc.sampler.wrap_s) as i32);
            self.gl.tex_parameter_i32(target, glow::TEXTURE_WRAP_T, wrap_enum(desc.sampler.wrap_t) as i32);
            if desc.format.is_depth() {
                self.gl.tex_parameter_i32(target, glow::TEXTURE_COMPARE_MODE, glow::COMPARE_REF_TO_TEXTURE as i32);
                self.gl.tex_parameter_i32(target, glow::TEXTURE_COMPARE_FUNC, glow::LEQUAL as i32);
            }
            tex
        };
        let id = self.alloc();
        self.textures.insert(id, native);
        self.check("create_texture")?;
        Ok(TextureId(id))
    }

    fn upload_texture(&mut self, texture: TextureId, desc: &TextureDesc, face: u32, level: u32, data: Option<&[u8]>) -> Result<(), DeviceError> {
        let native = self.texture(texture)?;
        let (internal, format, ty) = format_triple(desc.format, desc.srgb);
        let width = (desc.width >> level).max(1) as i32;
        let height = (desc.height >> level).max(1) as i32;
        unsafe {
            self.gl.bind_texture(texture_target(desc.kind), Some(native));
            self.gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            self.gl.tex_image_2d(
                image_target(desc.kind, face),
                level as i32,
                internal as i32,
                width,
                height,
                0,
                format,
                ty,
                data,
            );
        }
        self.check("upload_texture")
    }

    fn generate_mipmaps(&mut self, texture: TextureId, kind: TextureKind) -> Result<(), DeviceError> {
        let native = self.texture(texture)?;
        unsafe {
            self.gl.bind_texture(texture_target(kind), Some(native));
            self.gl.generate_mipmap(texture_target(kind));
        }
        self.check("generate_mipmaps")
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if let Some(native) = self.textures.remove(&texture.0) {
            unsafe { self.gl.delete_texture(native) };
        }
    }

    fn active_texture(&mut self, unit: u32) -> Result<(), DeviceError> {
        unsafe { self.gl.active_texture(glow::TEXTURE0 + unit) };
        self.check("active_texture")
    }

    fn bind_texture(&mut self, kind: TextureKind, texture: Option<TextureId>) -> Result<(), DeviceError> {
        let native = texture.map(|t| self.texture(t)).transpose()?;
        unsafe { self.gl.bind_texture(texture_target(kind), native) };
        self.check("bind_texture")
    }

    fn create_buffer(&mut self, _kind: BufferKind) -> Result<BufferId, DeviceError> {
        self.check("before create_buffer")?;
        let native = unsafe { self.gl.create_buffer().map_err(DeviceError::Unsupported)? };
        let id = self.alloc();
        self.buffers.insert(id, native);
        Ok(BufferId(id))
    }

    fn buffer_data(&mut self, buffer: BufferId, kind: BufferKind, data: &[u8], usage: BufferUsageHint) -> Result<(), DeviceError> {
        let native = self.buffer(buffer)?;
        let usage = match usage {
            BufferUsageHint::StaticDraw => glow::STATIC_DRAW,
            BufferUsageHint::DynamicDraw => glow::DYNAMIC_DRAW,
            BufferUsageHint::StreamRead => glow::STREAM_READ,
        };
        let target = buffer_target(kind);
        unsafe {
            self.gl.bind_buffer(target, Some(native));
            self.gl.buffer_data_u8_slice(target, data, usage);
        }
        self.check("buffer_data")
    }

    fn buffer_sub_data(&mut self, buffer: BufferId, kind: BufferKind, offset: usize, data: &[u8]) -> Result<(), DeviceError> {
        let native = self.buffer(buffer)?;
        let target = buffer_target(kind);
        unsafe {
            self.gl.bind_buffer(target, Some(native));
            self.gl.buffer_sub_data_u8_slice(target, offset as i32, data);
        }
        self.check("buffer_sub_data")
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        if let Some(native) = self.buffers.remove(&buffer.0) {
            unsafe { self.gl.delete_buffer(native) };
        }
    }

    fn bind_buffer_base(&mut self, binding: u32, buffer: Option<BufferId>) -> Result<(), DeviceError> {
        let native = buffer.map(|b| self.buffer(b)).transpose()?;
        unsafe { self.gl.bind_buffer_base(glow::UNIFORM_BUFFER, binding, native) };
        self.check("bind_buffer_base")
    }

    fn vertex_attribute(&mut self, location: u32, binding: Option<VertexBinding>) -> Result<(), DeviceError> {
        match binding {
            Some(b) => {
                let native = self.buffer(b.buffer)?;
                unsafe {
                    self.gl.bind_buffer(glow::ARRAY_BUFFER, Some(native));
                    self.gl.enable_vertex_attrib_array(location);
                    self.gl.vertex_attrib_pointer_f32(
                        location,
                        b.components as i32,
                        glow::FLOAT,
                        false,
                        b.stride as i32,
                        b.offset as i32,
                    );
                    self.gl.vertex_attrib_divisor(location, b.divisor);
                }
            }
            None => unsafe { self.gl.disable_vertex_attrib_array(location) },
        }
        self.check("vertex_attribute")
    }

    fn bind_index_buffer(&mut self, buffer: Option<BufferId>) -> Result<(), DeviceError> {
        let native = buffer.map(|b| self.buffer(b)).transpose()?;
        unsafe { self.gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, native) };
        self.check("bind_index_buffer")
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<FramebufferId, DeviceError> {
        self.check("before create_framebuffer")?;
        let color = desc.color.map(|a| self.texture(a.texture).map(|t| (t, a))).transpose()?;
        let depth = desc.depth.map(|a| self.texture(a.texture).map(|t| (t, a))).transpose()?;
        let native = unsafe {
            let fb = self.gl.create_framebuffer().map_err(DeviceError::Unsupported)?;
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fb));
            if let Some((tex, a)) = color {
                let target = image_target(a.kind, a.face);
                self.gl.framebuffer_texture_2d(glow::FRAMEBUFFER, glow::COLOR_ATTACHMENT0, target, Some(tex), a.level as i32);
            }
            if let Some((tex, a)) = depth {
                let point = if desc.stencil { glow::DEPTH_STENCIL_ATTACHMENT } else { glow::DEPTH_ATTACHMENT };
                self.gl.framebuffer_texture_2d(glow::FRAMEBUFFER, point, glow::TEXTURE_2D, Some(tex), a.level as i32);
            }
            let status = self.gl.check_framebuffer_status(glow::FRAMEBUFFER);
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            if status != glow::FRAMEBUFFER_COMPLETE {
                self.gl.delete_framebuffer(fb);
                return Err(DeviceError::InvalidOperation(format!("framebuffer incomplete: 0x{status:04x}")));
            }
            fb
        };
        let id = self.alloc();
        self.framebuffers.insert(id, native);
        Ok(FramebufferId(id))
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) -> Result<(), DeviceError> {
        let native = match framebuffer {
            Some(fb) => Some(
                self.framebuffers
                    .get(&fb.0)
                    .copied()
                    .ok_or_else(|| DeviceError::InvalidOperation(format!("unknown framebuffer {}", fb.0)))?,
            ),
            None => None,
        };
        unsafe { self.gl.bind_framebuffer(glow::FRAMEBUFFER, native) };
        self.check("bind_framebuffer")
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        if let Some(native) = self.framebuffers.remove(&framebuffer.0) {
            unsafe { self.gl.delete_framebuffer(native) };
        }
    }

    fn draw(&mut self, call: &DrawCall) -> Result<(), DeviceError> {
        let mode = mode_enum(call.mode);
        unsafe {
            if call.indexed {
                self.gl.draw_elements_instanced(
                    mode,
                    call.count as i32,
                    glow::UNSIGNED_INT,
                    (call.first * 4) as i32,
                    call.instances as i32,
                );
            } else {
                self.gl.draw_arrays_instanced(mode, call.first as i32, call.count as i32, call.instances as i32);
            }
        }
        self.check("draw")
    }

    fn read_pixels(&mut self, r: Rect, out: &mut [u8]) -> Result<(), DeviceError> {
        unsafe {
            self.gl.bind_buffer(glow::PIXEL_PACK_BUFFER, None);
            self.gl.read_pixels(
                r.x,
                r.y,
                r.width as i32,
                r.height as i32,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelPackData::Slice(out),
            );
        }
        self.check("read_pixels")
    }

    fn read_pixels_to_buffer(&mut self, r: Rect, buffer: BufferId) -> Result<(), DeviceError> {
        let native = self.buffer(buffer)?;
        let bytes = (r.width * r.height * 4) as i32;
        unsafe {
            self.gl.bind_buffer(glow::PIXEL_PACK_BUFFER, Some(native));
            self.gl.buffer_data_size(glow::PIXEL_PACK_BUFFER, bytes, glow::STREAM_READ);
            self.gl.read_pixels(
                r.x,
                r.y,
                r.width as i32,
                r.height as i32,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelPackData::BufferOffset(0),
            );
            self.gl.bind_buffer(glow::PIXEL_PACK_BUFFER, None);
        }
        self.check("read_pixels_to_buffer")
    }

    fn get_buffer_data(&mut self, buffer: BufferId, out: &mut [u8]) -> Result<(), DeviceError> {
        let native = self.buffer(buffer)?;
        unsafe {
            self.gl.bind_buffer(glow::PIXEL_PACK_BUFFER, Some(native));
            self.gl.get_buffer_sub_data(glow::PIXEL_PACK_BUFFER, 0, out);
            self.gl.bind_buffer(glow::PIXEL_PACK_BUFFER, None);
        }
        self.check("get_buffer_data")
    }

    fn fence(&mut self) -> Result<FenceId, DeviceError> {
        self.check("before fence")?;
        let native = unsafe {
            self.gl
                .fence_sync(glow::SYNC_GPU_COMMANDS_COMPLETE, 0)
                .map_err(DeviceError::Unsupported)?
        };
        unsafe { self.gl.flush() };
        let id = self.alloc();
        self.fences.insert(id, native);
        Ok(FenceId(id))
    }

    fn fence_status(&mut self, fence: FenceId) -> FenceStatus {
        let Some(&native) = self.fences.get(&fence.0) else {
            return FenceStatus::Signaled;
        };
        match unsafe { self.gl.client_wait_sync(native, 0, 0) } {
            glow::ALREADY_SIGNALED | glow::CONDITION_SATISFIED | glow::WAIT_FAILED => FenceStatus::Signaled,
            _ => FenceStatus::Pending,
        }
    }

    fn delete_fence(&mut self, fence: FenceId) {
        if let Some(native) = self.fences.remove(&fence.0) {
            unsafe { self.gl.delete_sync(native) };
        }
    }

    fn flush(&mut self) {
        unsafe { self.gl.flush() };
    }
}

fn base_filter(filter: FilterMode) -> FilterMode {
    match filter {
        FilterMode::NearestMipmapNearest => FilterMode::Nearest,
        FilterMode::LinearMipmapLinear => FilterMode::Linear,
        other => other,
    }
}
