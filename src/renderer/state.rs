//! GPU state mirror.
//!
//! [`StateTracker`] sits between the renderer and the [`GpuDevice`]. Each
//! piece of fixed-function state is mirrored independently, so changing the
//! depth function never re-issues the blend function and vice versa. A
//! mirror slot of `None` means "unknown": the next request for that slot is
//! always forwarded to the device.
//!
//! Device failures on state calls are absorbed here. Context loss is the one
//! error that escapes; anything else is logged once and the mirror keeps the
//! last value that actually reached the device.

use super::device::{
    BufferId, Capability, ClearFlags, CullFace, DeviceCapabilities, DeviceError, FramebufferId,
    FrontFace, GpuDevice, ProgramId, Rect, TextureId, VertexBinding,
};
use crate::resources::material::{
    BlendEquation, BlendFactor, BlendState, CompareFunc, MaterialCommon, PolygonOffset, Side,
    StencilOp, StencilState,
};
use crate::resources::texture::TextureKind;
use crate::utils::warn_once::WarnOnce;

type TextureBinding = (TextureKind, Option<TextureId>);

/// Forwards `value` to the device when it differs from `mirror`.
///
/// Returns `Ok(true)` when a command was issued and accepted.
fn sync<T: PartialEq + Copy>(
    mirror: &mut Option<T>,
    value: T,
    warn_once: &mut WarnOnce,
    issued: &mut u64,
    what: &str,
    issue: impl FnOnce() -> Result<(), DeviceError>,
) -> Result<bool, DeviceError> {
    if *mirror == Some(value) {
        return Ok(false);
    }
    match issue() {
        Ok(()) => {
            *mirror = Some(value);
            *issued += 1;
            Ok(true)
        }
        Err(DeviceError::ContextLost) => Err(DeviceError::ContextLost),
        Err(err) => {
            warn_once.warn(&format!("{what} rejected by device ({err}); keeping previous state"));
            Ok(false)
        }
    }
}

#[derive(Debug)]
pub struct StateTracker {
    capabilities: [Option<bool>; Capability::COUNT],
    blend_equation: Option<(BlendEquation, BlendEquation)>,
    blend_func: Option<[BlendFactor; 4]>,
    blend_color: Option<[f32; 4]>,
    depth_func: Option<CompareFunc>,
    depth_mask: Option<bool>,
    color_mask: Option<[bool; 4]>,
    stencil_func: Option<(CompareFunc, i32, u32)>,
    stencil_op: Option<(StencilOp, StencilOp, StencilOp)>,
    stencil_mask: Option<u32>,
    polygon_offset: Option<(f32, f32)>,
    scissor: Option<Rect>,
    viewport: Option<Rect>,
    cull_face: Option<CullFace>,
    front_face: Option<FrontFace>,
    line_width: Option<f32>,
    clear_color: Option<[f32; 4]>,
    clear_depth: Option<f32>,
    clear_stencil: Option<i32>,

    program: Option<Option<ProgramId>>,
    framebuffer: Option<Option<FramebufferId>>,
    active_unit: Option<u32>,
    units: Vec<Option<TextureBinding>>,
    attributes: Vec<Option<Option<VertexBinding>>>,
    attributes_used: u64,
    index_buffer: Option<Option<BufferId>>,
    uniform_buffers: Vec<Option<Option<BufferId>>>,

    next_unit: u32,
    max_units: u32,
    issued: u64,
    warn_once: WarnOnce,
}

impl StateTracker {
    #[must_use]
    pub fn new(caps: &DeviceCapabilities) -> Self {
        let max_units = caps.max_texture_units.max(1);
        Self {
            capabilities: [None; Capability::COUNT],
            blend_equation: None,
            blend_func: None,
            blend_color: None,
            depth_func: None,
            depth_mask: None,
            color_mask: None,
            stencil_func: None,
            stencil_op: None,
            stencil_mask: None,
            polygon_offset: None,
            scissor: None,
            viewport: None,
            cull_face: None,
            front_face: None,
            line_width: None,
            clear_color: None,
            clear_depth: None,
            clear_stencil: None,
            program: None,
            framebuffer: None,
            active_unit: None,
            units: vec![None; max_units as usize],
            attributes: vec![None; caps.max_vertex_attributes.clamp(1, 64) as usize],
            attributes_used: 0,
            index_buffer: None,
            uniform_buffers: Vec::new(),
            next_unit: 0,
            max_units,
            issued: 0,
            warn_once: WarnOnce::new(),
        }
    }

    /// Forgets everything the tracker believes is bound.
    pub fn reset(&mut self) {
        self.capabilities = [None; Capability::COUNT];
        self.blend_equation = None;
        self.blend_func = None;
        self.blend_color = None;
        self.depth_func = None;
        self.depth_mask = None;
        self.color_mask = None;
        self.stencil_func = None;
        self.stencil_op = None;
        self.stencil_mask = None;
        self.polygon_offset = None;
        self.scissor = None;
        self.viewport = None;
        self.cull_face = None;
        self.front_face = None;
        self.line_width = None;
        self.clear_color = None;
        self.clear_depth = None;
        self.clear_stencil = None;
        self.program = None;
        self.framebuffer = None;
        self.active_unit = None;
        self.units.fill(None);
        self.attributes.fill(None);
        self.attributes_used = 0;
        self.index_buffer = None;
        self.uniform_buffers.clear();
        self.next_unit = 0;
    }

    /// State commands that reached the device since creation.
    #[must_use]
    pub fn issued_commands(&self) -> u64 {
        self.issued
    }

    #[must_use]
    pub fn current_program(&self) -> Option<ProgramId> {
        self.program.flatten()
    }

    #[must_use]
    pub fn current_framebuffer(&self) -> Option<FramebufferId> {
        self.framebuffer.flatten()
    }

    #[must_use]
    pub fn current_viewport(&self) -> Option<Rect> {
        self.viewport
    }

    // ------------------------------------------------------------------
    // Fixed-function state
    // ------------------------------------------------------------------

    pub fn enable<D: GpuDevice + ?Sized>(&mut self, device: &mut D, cap: Capability, on: bool) -> Result<(), DeviceError> {
        sync(&mut self.capabilities[cap.index()], on, &mut self.warn_once, &mut self.issued, "capability", || {
            device.set_capability(cap, on)
        })?;
        Ok(())
    }

    /// `None` disables blending.
    pub fn set_blending<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        blend: Option<BlendState>,
        constant: Option<[f32; 4]>,
    ) -> Result<(), DeviceError> {
        let Some(b) = blend else {
            return self.enable(device, Capability::Blend, false);
        };
        self.enable(device, Capability::Blend, true)?;
        let eq = (b.equation, b.equation_alpha);
        sync(&mut self.blend_equation, eq, &mut self.warn_once, &mut self.issued, "blend equation", || {
            device.blend_equation(eq.0, eq.1)
        })?;
        let func = [b.src, b.dst, b.src_alpha, b.dst_alpha];
        sync(&mut self.blend_func, func, &mut self.warn_once, &mut self.issued, "blend func", || {
            device.blend_func(func[0], func[1], func[2], func[3])
        })?;
        if let Some(color) = constant {
            sync(&mut self.blend_color, color, &mut self.warn_once, &mut self.issued, "blend color", || {
                device.blend_color(color)
            })?;
        }
        Ok(())
    }

    pub fn set_depth<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        test: bool,
        write: bool,
        func: CompareFunc,
    ) -> Result<(), DeviceError> {
        self.enable(device, Capability::DepthTest, test)?;
        if test {
            sync(&mut self.depth_func, func, &mut self.warn_once, &mut self.issued, "depth func", || {
                device.depth_func(func)
            })?;
        }
        self.set_depth_mask(device, write)
    }

    pub fn set_depth_mask<D: GpuDevice + ?Sized>(&mut self, device: &mut D, write: bool) -> Result<(), DeviceError> {
        sync(&mut self.depth_mask, write, &mut self.warn_once, &mut self.issued, "depth mask", || {
            device.depth_mask(write)
        })?;
        Ok(())
    }

    pub fn set_color_mask<D: GpuDevice + ?Sized>(&mut self, device: &mut D, mask: [bool; 4]) -> Result<(), DeviceError> {
        sync(&mut self.color_mask, mask, &mut self.warn_once, &mut self.issued, "color mask", || {
            device.color_mask(mask)
        })?;
        Ok(())
    }

    pub fn set_stencil<D: GpuDevice + ?Sized>(&mut self, device: &mut D, stencil: &StencilState) -> Result<(), DeviceError> {
        self.enable(device, Capability::StencilTest, stencil.enabled)?;
        if !stencil.enabled {
            return Ok(());
        }
        let func = (stencil.func, stencil.reference, stencil.func_mask);
        sync(&mut self.stencil_func, func, &mut self.warn_once, &mut self.issued, "stencil func", || {
            device.stencil_func(func.0, func.1, func.2)
        })?;
        let op = (stencil.fail, stencil.z_fail, stencil.z_pass);
        sync(&mut self.stencil_op, op, &mut self.warn_once, &mut self.issued, "stencil op", || {
            device.stencil_op(op.0, op.1, op.2)
        })?;
        self.set_stencil_mask(device, stencil.write_mask)
    }

    fn set_stencil_mask<D: GpuDevice + ?Sized>(&mut self, device: &mut D, mask: u32) -> Result<(), DeviceError> {
        sync(&mut self.stencil_mask, mask, &mut self.warn_once, &mut self.issued, "stencil mask", || {
            device.stencil_mask(mask)
        })?;
        Ok(())
    }

    pub fn set_polygon_offset<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        offset: Option<PolygonOffset>,
    ) -> Result<(), DeviceError> {
        self.enable(device, Capability::PolygonOffsetFill, offset.is_some())?;
        if let Some(o) = offset {
            let value = (o.factor, o.units);
            sync(&mut self.polygon_offset, value, &mut self.warn_once, &mut self.issued, "polygon offset", || {
                device.polygon_offset(value.0, value.1)
            })?;
        }
        Ok(())
    }

    /// Culling and winding for `side`. `front_face_cw` is set for objects
    /// whose world transform mirrors geometry.
    pub fn set_side<D: GpuDevice + ?Sized>(&mut self, device: &mut D, side: Side, front_face_cw: bool) -> Result<(), DeviceError> {
        if side == Side::Double {
            return self.enable(device, Capability::CullFace, false);
        }
        self.enable(device, Capability::CullFace, true)?;
        sync(&mut self.cull_face, CullFace::Back, &mut self.warn_once, &mut self.issued, "cull face", || {
            device.cull_face(CullFace::Back)
        })?;
        let flipped = (side == Side::Back) != front_face_cw;
        let winding = if flipped { FrontFace::Cw } else { FrontFace::Ccw };
        sync(&mut self.front_face, winding, &mut self.warn_once, &mut self.issued, "front face", || {
            device.front_face(winding)
        })?;
        Ok(())
    }

    /// Applies every piece of render state a material carries.
    pub fn set_material_state<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        material: &MaterialCommon,
        front_face_cw: bool,
    ) -> Result<(), DeviceError> {
        self.set_side(device, material.side, front_face_cw)?;
        self.set_blending(device, material.effective_blend(), material.blending.constant_color())?;
        self.set_depth(device, material.depth_test, material.depth_write, material.depth_func)?;
        let cw = material.color_write;
        self.set_color_mask(device, [cw; 4])?;
        self.set_stencil(device, &material.stencil)?;
        self.set_polygon_offset(device, material.polygon_offset)?;
        self.enable(device, Capability::SampleAlphaToCoverage, material.alpha_to_coverage)?;
        if material.wireframe {
            self.set_line_width(device, 1.0)?;
        }
        Ok(())
    }

    pub fn set_line_width<D: GpuDevice + ?Sized>(&mut self, device: &mut D, width: f32) -> Result<(), DeviceError> {
        sync(&mut self.line_width, width, &mut self.warn_once, &mut self.issued, "line width", || {
            device.line_width(width)
        })?;
        Ok(())
    }

    pub fn set_viewport<D: GpuDevice + ?Sized>(&mut self, device: &mut D, rect: Rect) -> Result<(), DeviceError> {
        sync(&mut self.viewport, rect, &mut self.warn_once, &mut self.issued, "viewport", || {
            device.viewport(rect)
        })?;
        Ok(())
    }

    /// `None` disables the scissor test.
    pub fn set_scissor<D: GpuDevice + ?Sized>(&mut self, device: &mut D, rect: Option<Rect>) -> Result<(), DeviceError> {
        self.enable(device, Capability::ScissorTest, rect.is_some())?;
        if let Some(rect) = rect {
            sync(&mut self.scissor, rect, &mut self.warn_once, &mut self.issued, "scissor", || {
                device.scissor(rect)
            })?;
        }
        Ok(())
    }

    /// Clears the bound framebuffer, opening the write masks the clear
    /// depends on first.
    pub fn clear<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        flags: ClearFlags,
        color: [f32; 4],
        depth: f32,
        stencil: i32,
    ) -> Result<(), DeviceError> {
        if flags.is_empty() {
            return Ok(());
        }
        self.enable(device, Capability::ScissorTest, false)?;
        if flags.contains(ClearFlags::COLOR) {
            self.set_color_mask(device, [true; 4])?;
            sync(&mut self.clear_color, color, &mut self.warn_once, &mut self.issued, "clear color", || {
                device.clear_color(color)
            })?;
        }
        if flags.contains(ClearFlags::DEPTH) {
            self.set_depth_mask(device, true)?;
            sync(&mut self.clear_depth, depth, &mut self.warn_once, &mut self.issued, "clear depth", || {
                device.clear_depth(depth)
            })?;
        }
        if flags.contains(ClearFlags::STENCIL) {
            self.set_stencil_mask(device, u32::MAX)?;
            sync(&mut self.clear_stencil, stencil, &mut self.warn_once, &mut self.issued, "clear stencil", || {
                device.clear_stencil(stencil)
            })?;
        }
        match device.clear(flags) {
            Err(DeviceError::ContextLost) => Err(DeviceError::ContextLost),
            Err(err) => {
                self.warn_once.warn(&format!("clear rejected by device ({err})"));
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Object bindings
    // ------------------------------------------------------------------

    /// Returns `true` when the program actually changed.
    pub fn use_program<D: GpuDevice + ?Sized>(&mut self, device: &mut D, program: Option<ProgramId>) -> Result<bool, DeviceError> {
        sync(&mut self.program, program, &mut self.warn_once, &mut self.issued, "use program", || {
            device.use_program(program)
        })
    }

    pub fn bind_framebuffer<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        framebuffer: Option<FramebufferId>,
    ) -> Result<(), DeviceError> {
        sync(&mut self.framebuffer, framebuffer, &mut self.warn_once, &mut self.issued, "bind framebuffer", || {
            device.bind_framebuffer(framebuffer)
        })?;
        Ok(())
    }

    /// Next free texture unit for the current draw. Wraps around with a
    /// warning once the hardware limit is reached.
    pub fn allocate_texture_unit(&mut self) -> u32 {
        let unit = self.next_unit;
        if unit >= self.max_units {
            self.warn_once.warn(&format!(
                "Trying to use more texture units than the device supports ({})",
                self.max_units
            ));
            self.next_unit = 1;
            return 0;
        }
        self.next_unit += 1;
        unit
    }

    pub fn reset_texture_units(&mut self) {
        self.next_unit = 0;
    }

    pub fn bind_texture<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        unit: u32,
        kind: TextureKind,
        texture: Option<TextureId>,
    ) -> Result<(), DeviceError> {
        let Some(slot) = self.units.get(unit as usize) else {
            self.warn_once.warn(&format!("texture unit {unit} out of range"));
            return Ok(());
        };
        if *slot == Some((kind, texture)) {
            return Ok(());
        }
        sync(&mut self.active_unit, unit, &mut self.warn_once, &mut self.issued, "active texture", || {
            device.active_texture(unit)
        })?;
        if self.active_unit != Some(unit) {
            return Ok(());
        }
        sync(&mut self.units[unit as usize], (kind, texture), &mut self.warn_once, &mut self.issued, "bind texture", || {
            device.bind_texture(kind, texture)
        })?;
        Ok(())
    }

    pub fn set_vertex_attribute<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        location: u32,
        binding: Option<VertexBinding>,
    ) -> Result<(), DeviceError> {
        let Some(slot) = self.attributes.get_mut(location as usize) else {
            self.warn_once.warn(&format!("vertex attribute location {location} out of range"));
            return Ok(());
        };
        if binding.is_some() && location < 64 {
            self.attributes_used |= 1 << location;
        }
        sync(slot, binding, &mut self.warn_once, &mut self.issued, "vertex attribute", || {
            device.vertex_attribute(location, binding)
        })?;
        Ok(())
    }

    /// Disables attribute arrays left enabled by a previous draw but not
    /// bound since the last call.
    pub fn disable_unused_attributes<D: GpuDevice + ?Sized>(&mut self, device: &mut D) -> Result<(), DeviceError> {
        let used = std::mem::take(&mut self.attributes_used);
        for location in 0..self.attributes.len() {
            let enabled = matches!(self.attributes[location], Some(Some(_)));
            if enabled && used & (1 << location) == 0 {
                let slot = &mut self.attributes[location];
                sync(slot, None, &mut self.warn_once, &mut self.issued, "vertex attribute", || {
                    device.vertex_attribute(location as u32, None)
                })?;
            }
        }
        Ok(())
    }

    pub fn bind_index_buffer<D: GpuDevice + ?Sized>(&mut self, device: &mut D, buffer: Option<BufferId>) -> Result<(), DeviceError> {
        sync(&mut self.index_buffer, buffer, &mut self.warn_once, &mut self.issued, "index buffer", || {
            device.bind_index_buffer(buffer)
        })?;
        Ok(())
    }

    pub fn bind_uniform_buffer<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        binding: u32,
        buffer: Option<BufferId>,
    ) -> Result<(), DeviceError> {
        let index = binding as usize;
        if self.uniform_buffers.len() <= index {
            self.uniform_buffers.resize(index + 1, None);
        }
        sync(&mut self.uniform_buffers[index], buffer, &mut self.warn_once, &mut self.issued, "uniform buffer", || {
            device.bind_buffer_base(binding, buffer)
        })?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Deleted objects
    // ------------------------------------------------------------------

    pub fn forget_texture(&mut self, texture: TextureId) {
        for slot in &mut self.units {
            if matches!(slot, Some((_, Some(t))) if *t == texture) {
                *slot = None;
            }
        }
    }

    pub fn forget_buffer(&mut self, buffer: BufferId) {
        for slot in &mut self.attributes {
            if matches!(slot, Some(Some(b)) if b.buffer == buffer) {
                *slot = None;
            }
        }
        if self.index_buffer == Some(Some(buffer)) {
            self.index_buffer = None;
        }
        for slot in &mut self.uniform_buffers {
            if *slot == Some(Some(buffer)) {
                *slot = None;
            }
        }
    }

    pub fn forget_program(&mut self, program: ProgramId) {
        if self.program == Some(Some(program)) {
            self.program = None;
        }
    }

    pub fn forget_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.framebuffer == Some(Some(framebuffer)) {
            self.framebuffer = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::device::RecordingDevice;
    use crate::resources::material::Blending;

    fn tracker(dev: &RecordingDevice) -> StateTracker {
        StateTracker::new(dev.capabilities())
    }

    #[test]
    fn same_material_state_is_issued_once() {
        let mut dev = RecordingDevice::new();
        let mut state = tracker(&dev);
        let material = MaterialCommon { transparent: true, ..MaterialCommon::default() };

        state.set_material_state(&mut dev, &material, false).unwrap();
        let after_first = dev.log().len();
        assert!(after_first > 0);

        state.set_material_state(&mut dev, &material, false).unwrap();
        assert_eq!(dev.log().len(), after_first);
    }

    #[test]
    fn sibling_state_is_tracked_independently() {
        let mut dev = RecordingDevice::new();
        let mut state = tracker(&dev);
        let mut material = MaterialCommon { transparent: true, ..MaterialCommon::default() };
        state.set_material_state(&mut dev, &material, false).unwrap();

        let mark = dev.log().len();
        material.depth_func = CompareFunc::Always;
        state.set_material_state(&mut dev, &material, false).unwrap();

        let issued = dev.log().since(mark);
        assert_eq!(issued.len(), 1);
        assert!(matches!(issued[0], super::super::device::Command::DepthFunc(CompareFunc::Always)));
    }

    #[test]
    fn reset_forces_reissue() {
        let mut dev = RecordingDevice::new();
        let mut state = tracker(&dev);
        let rect = Rect::new(0, 0, 800, 600);
        state.set_viewport(&mut dev, rect).unwrap();
        state.set_viewport(&mut dev, rect).unwrap();
        assert_eq!(dev.log().len(), 1);

        state.reset();
        state.set_viewport(&mut dev, rect).unwrap();
        assert_eq!(dev.log().len(), 2);
    }

    #[test]
    fn rejected_state_call_is_absorbed() {
        let mut dev = RecordingDevice::new();
        dev.reject_capability(Capability::SampleAlphaToCoverage);
        let mut state = tracker(&dev);
        let material = MaterialCommon { alpha_to_coverage: true, ..MaterialCommon::default() };

        assert!(state.set_material_state(&mut dev, &material, false).is_ok());
        assert!(!dev.log().commands().iter().any(|c| matches!(
            c,
            super::super::device::Command::SetCapability(Capability::SampleAlphaToCoverage, _)
        )));
    }

    #[test]
    fn context_loss_escapes() {
        let mut dev = RecordingDevice::new();
        let mut state = tracker(&dev);
        dev.lose_context();
        let material = MaterialCommon { blending: Blending::Additive, transparent: true, ..MaterialCommon::default() };
        assert_eq!(state.set_material_state(&mut dev, &material, false), Err(DeviceError::ContextLost));
    }

    #[test]
    fn texture_units_wrap_at_device_limit() {
        let dev = RecordingDevice::new();
        let mut state = tracker(&dev);
        let max = dev.capabilities().max_texture_units;
        for expected in 0..max {
            assert_eq!(state.allocate_texture_unit(), expected);
        }
        assert_eq!(state.allocate_texture_unit(), 0);
        state.reset_texture_units();
        assert_eq!(state.allocate_texture_unit(), 0);
    }

    #[test]
    fn texture_binding_skips_active_unit_when_unchanged() {
        let mut dev = RecordingDevice::new();
        let mut state = tracker(&dev);
        let tex = dev
            .create_texture(&crate::renderer::device::TextureDesc {
                kind: TextureKind::D2,
                width: 1,
                height: 1,
                format: crate::resources::texture::TextureFormat::Rgba8,
                mip_levels: 1,
                sampler: crate::resources::texture::Sampler::default(),
                srgb: false,
            })
            .unwrap();
        let mark = dev.log().len();
        state.bind_texture(&mut dev, 2, TextureKind::D2, Some(tex)).unwrap();
        state.bind_texture(&mut dev, 2, TextureKind::D2, Some(tex)).unwrap();
        assert_eq!(dev.log().since(mark).len(), 2);
    }
}
