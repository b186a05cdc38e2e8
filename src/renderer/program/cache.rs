//! Program Cache
//!
//! Central owner of every linked GPU program. Programs are stored in a
//! slotmap and addressed through [`ProgramHandle`]s; materials never see a
//! raw device id.
//!
//! # Two-Level Lookup (L1 / L2)
//!
//! Building [`ProgramParameters`] walks the material, geometry and scene
//! state, which is wasteful to repeat for every draw of every frame. The
//! **L1 fast cache** maps a cheap [`FastProgramKey`] (ids + version counters)
//! straight to a handle. On an L1 miss the full parameters are built and the
//! **L2 canonical cache** is consulted by the define-set hash.
//!
//! # Lifecycle
//!
//! ```text
//! Uncompiled ──compile──▶ Compiling ──poll──▶ Ready
//!      ▲                      │
//!      │ context loss         └──────▶ Failed
//!      │
//!  (any state) ── last material released ──▶ Released (entry removed)
//! ```
//!
//! Every material using a program holds one reference, counted once per
//! `(material, program)` pair. Releasing a material drops all of its
//! references; a program whose count reaches zero is deleted on the device.

use rustc_hash::FxHashMap;
use slotmap::{SlotMap, new_key_type};
use smallvec::SmallVec;

use crate::errors::{Result, StrataError};
use crate::renderer::device::{DeviceError, GpuDevice, ProgramId, ProgramStatus, ShaderStage};
use crate::renderer::lights::{LIGHT_BLOCK_BINDING, LIGHT_BLOCK_NAME};
use crate::renderer::program::ProgramError;
use crate::renderer::program::parameters::{ProgramParameters, ProgramVariant};
use crate::renderer::program::shader_gen::{self, GeneratedSource};
use crate::renderer::program::uniform_table::UniformTable;
use crate::utils::WarnOnce;

new_key_type! {
    pub struct ProgramHandle;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramState {
    Uncompiled,
    /// Linked on the device, completion not yet observed.
    Compiling,
    Ready,
    Failed(ProgramError),
    /// The handle no longer resolves.
    Released,
}

/// L1 key. Every field is an id, a version counter or a precomputed hash, so
/// building it is cheap. Only define-relevant material state is included;
/// uniform-only edits keep hitting the same entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FastProgramKey {
    pub material_id: u64,
    /// [`Material::layout_key`](crate::resources::Material::layout_key).
    pub material_layout: u64,
    pub geometry_id: u64,
    pub geometry_layout: u64,
    pub variant: ProgramVariant,
    /// Hash of the scene-level inputs (light counts, fog, environment,
    /// output target, settings).
    pub scene_state: u64,
}

/// Per-program binder bookkeeping.
#[derive(Debug, Clone, Default)]
pub(crate) struct BindState {
    pub frame: Option<u64>,
    pub camera_version: Option<u64>,
    pub material: Option<(u64, u64)>,
    pub lights_version: Option<u64>,
}

#[derive(Debug)]
pub struct ProgramEntry {
    key: u128,
    params: ProgramParameters,
    source: GeneratedSource,
    state: ProgramState,
    program: Option<ProgramId>,
    uniforms: UniformTable,
    ref_count: usize,
    pub(crate) bind: BindState,
}

impl ProgramEntry {
    #[must_use]
    pub fn key(&self) -> u128 {
        self.key
    }

    #[must_use]
    pub fn params(&self) -> &ProgramParameters {
        &self.params
    }

    #[must_use]
    pub fn source(&self) -> &GeneratedSource {
        &self.source
    }

    #[must_use]
    pub fn state(&self) -> &ProgramState {
        &self.state
    }

    /// Device program, present once linked.
    #[must_use]
    pub fn program(&self) -> Option<ProgramId> {
        self.program
    }

    #[must_use]
    pub fn uniforms(&self) -> &UniformTable {
        &self.uniforms
    }

    pub fn uniforms_mut(&mut self) -> &mut UniformTable {
        &mut self.uniforms
    }

    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.ref_count
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == ProgramState::Ready
    }
}

pub struct ProgramCache {
    entries: SlotMap<ProgramHandle, ProgramEntry>,
    by_key: FxHashMap<u128, ProgramHandle>,
    fast: FxHashMap<FastProgramKey, ProgramHandle>,
    users: FxHashMap<u64, SmallVec<[ProgramHandle; 4]>>,
    async_compile: bool,
    warnings: WarnOnce,
}

impl Default for ProgramCache {
    fn default() -> Self {
        Self::new(false)
    }
}

impl ProgramCache {
    #[must_use]
    pub fn new(async_compile: bool) -> Self {
        Self {
            entries: SlotMap::with_key(),
            by_key: FxHashMap::default(),
            fast: FxHashMap::default(),
            users: FxHashMap::default(),
            async_compile,
            warnings: WarnOnce::new(),
        }
    }

    pub fn set_async_compile(&mut self, enabled: bool) {
        self.async_compile = enabled;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, handle: ProgramHandle) -> Option<&ProgramEntry> {
        self.entries.get(handle)
    }

    pub fn get_mut(&mut self, handle: ProgramHandle) -> Option<&mut ProgramEntry> {
        self.entries.get_mut(handle)
    }

    #[must_use]
    pub fn state(&self, handle: ProgramHandle) -> ProgramState {
        self.entries
            .get(handle)
            .map_or(ProgramState::Released, |e| e.state.clone())
    }

    /// Handles currently referenced by `material_id`.
    #[must_use]
    pub fn programs_of(&self, material_id: u64) -> &[ProgramHandle] {
        self.users.get(&material_id).map_or(&[][..], SmallVec::as_slice)
    }

    // ── L1 ───────────────────────────────────────────────────────────────────

    #[must_use]
    pub fn lookup_fast(&self, key: &FastProgramKey) -> Option<ProgramHandle> {
        self.fast
            .get(key)
            .copied()
            .filter(|h| self.entries.contains_key(*h))
    }

    /// Number of L1 entries.
    #[must_use]
    pub fn fast_len(&self) -> usize {
        self.fast.len()
    }

    // ── L2 ───────────────────────────────────────────────────────────────────

    /// Returns the program for `params`, compiling it on a miss.
    ///
    /// Template errors fail the call; compile and link failures do not. They
    /// leave the entry in [`ProgramState::Failed`] so the caller can fall back
    /// to a default program. Only context loss escapes.
    pub fn resolve<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        material_id: u64,
        fast_key: Option<FastProgramKey>,
        params: ProgramParameters,
        light_declarations: &str,
    ) -> Result<ProgramHandle> {
        let key = params.key_hash();

        let handle = if let Some(&handle) = self.by_key.get(&key) {
            handle
        } else {
            let source = shader_gen::generate(&params, light_declarations)?;
            #[cfg(debug_assertions)]
            log::trace!("Generated program {key:032x}:\n{}\n----\n{}", source.vertex, source.fragment);

            let handle = self.entries.insert(ProgramEntry {
                key,
                params,
                source,
                state: ProgramState::Uncompiled,
                program: None,
                uniforms: UniformTable::default(),
                ref_count: 0,
                bind: BindState::default(),
            });
            self.by_key.insert(key, handle);
            log::debug!("Program cache miss {key:032x} ({} cached)", self.entries.len());
            handle
        };

        self.add_user(material_id, handle);
        if let Some(fast_key) = fast_key {
            // One live L1 entry per (material, geometry, variant).
            self.fast.retain(|k, _| {
                k.material_id != fast_key.material_id
                    || k.geometry_id != fast_key.geometry_id
                    || k.variant != fast_key.variant
            });
            self.fast.insert(fast_key, handle);
        }
        self.ensure_compiled(device, handle)?;
        Ok(handle)
    }

    fn add_user(&mut self, material_id: u64, handle: ProgramHandle) {
        let list = self.users.entry(material_id).or_default();
        if !list.contains(&handle) {
            list.push(handle);
            if let Some(entry) = self.entries.get_mut(handle) {
                entry.ref_count += 1;
            }
        }
    }

    /// Starts compilation of an `Uncompiled` entry. Synchronous mode waits for
    /// the link to finish; async mode leaves the entry `Compiling`.
    pub fn ensure_compiled<D: GpuDevice + ?Sized>(&mut self, device: &mut D, handle: ProgramHandle) -> Result<()> {
        let Some(entry) = self.entries.get_mut(handle) else {
            return Ok(());
        };
        if entry.state != ProgramState::Uncompiled {
            return Ok(());
        }

        match link(device, entry) {
            Ok(program) => {
                entry.program = Some(program);
                entry.state = ProgramState::Compiling;
            }
            Err(DeviceError::ContextLost) => return Err(StrataError::ContextLost),
            Err(err) => {
                let err = program_error(err);
                self.warnings
                    .error(&format!("Program {:032x} failed: {err}", entry.key));
                entry.state = ProgramState::Failed(err);
                return Ok(());
            }
        }

        if self.async_compile && device.capabilities().parallel_shader_compile {
            return Ok(());
        }
        while self.poll(device, handle)? == ProgramState::Compiling {}
        Ok(())
    }

    /// Advances a `Compiling` entry. Returns the resulting state.
    pub fn poll<D: GpuDevice + ?Sized>(&mut self, device: &mut D, handle: ProgramHandle) -> Result<ProgramState> {
        let Some(entry) = self.entries.get_mut(handle) else {
            return Ok(ProgramState::Released);
        };
        let (ProgramState::Compiling, Some(program)) = (&entry.state, entry.program) else {
            return Ok(entry.state.clone());
        };

        if device.is_context_lost() {
            return Err(StrataError::ContextLost);
        }
        match device.program_status(program) {
            ProgramStatus::Pending => {}
            ProgramStatus::Linked => {
                let active = device.active_uniforms(program)?;
                entry.uniforms = UniformTable::from_reflection(active);
                if entry.params.light_block
                    && let Some(block) = device.uniform_block_index(program, LIGHT_BLOCK_NAME)
                {
                    device.uniform_block_binding(program, block, LIGHT_BLOCK_BINDING)?;
                }
                entry.bind = BindState::default();
                entry.state = ProgramState::Ready;
            }
            ProgramStatus::Failed(log) => {
                device.delete_program(program);
                entry.program = None;
                let err = ProgramError::LinkFailed(log);
                self.warnings
                    .error(&format!("Program {:032x} failed: {err}", entry.key));
                entry.state = ProgramState::Failed(err);
            }
        }
        Ok(entry.state.clone())
    }

    /// Non-blocking readiness check for async compiles.
    pub fn is_ready<D: GpuDevice + ?Sized>(&mut self, device: &mut D, handle: ProgramHandle) -> Result<bool> {
        Ok(self.poll(device, handle)? == ProgramState::Ready)
    }

    /// Polls every compiling entry once. Returns how many became ready.
    pub fn poll_all<D: GpuDevice + ?Sized>(&mut self, device: &mut D) -> Result<usize> {
        let compiling: SmallVec<[ProgramHandle; 16]> = self
            .entries
            .iter()
            .filter(|(_, e)| e.state == ProgramState::Compiling)
            .map(|(h, _)| h)
            .collect();
        let mut ready = 0;
        for handle in compiling {
            if self.poll(device, handle)? == ProgramState::Ready {
                ready += 1;
            }
        }
        Ok(ready)
    }

    /// Drops every reference `material_id` holds. Programs left without users
    /// are deleted. Returns the device programs that were deleted.
    pub fn release_material<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        material_id: u64,
    ) -> SmallVec<[ProgramId; 2]> {
        let mut released = SmallVec::new();
        let Some(handles) = self.users.remove(&material_id) else {
            return released;
        };
        self.fast.retain(|k, _| k.material_id != material_id);

        for handle in handles {
            let Some(entry) = self.entries.get_mut(handle) else {
                continue;
            };
            entry.ref_count = entry.ref_count.saturating_sub(1);
            if entry.ref_count > 0 {
                continue;
            }
            if let Some(entry) = self.entries.remove(handle) {
                if let Some(program) = entry.program {
                    device.delete_program(program);
                    released.push(program);
                }
                self.by_key.remove(&entry.key);
                self.fast.retain(|_, h| *h != handle);
                log::debug!("Released program {:032x}", entry.key);
            }
        }
        released
    }

    /// Context loss: every device program is gone. Entries return to
    /// `Uncompiled` and keep their reference counts.
    pub fn invalidate(&mut self) {
        for (_, entry) in &mut self.entries {
            entry.program = None;
            entry.uniforms = UniformTable::default();
            entry.bind = BindState::default();
            entry.state = ProgramState::Uncompiled;
        }
        self.warnings.clear();
    }

    /// Forgets binder bookkeeping, forcing a full upload on next use.
    pub fn reset_bindings(&mut self) {
        for (_, entry) in &mut self.entries {
            entry.bind = BindState::default();
            entry.uniforms.invalidate();
        }
    }
}

fn link<D: GpuDevice + ?Sized>(device: &mut D, entry: &ProgramEntry) -> std::result::Result<ProgramId, DeviceError> {
    let vs = device.compile_shader(ShaderStage::Vertex, &entry.source.vertex)?;
    let fs = match device.compile_shader(ShaderStage::Fragment, &entry.source.fragment) {
        Ok(fs) => fs,
        Err(err) => {
            device.delete_shader(vs);
            return Err(err);
        }
    };
    let locations: SmallVec<[(String, u32); 16]> = entry
        .params
        .attributes
        .iter()
        .map(|a| (a.name.clone(), a.location))
        .collect();
    let program = device.link_program(vs, fs, &locations);
    device.delete_shader(vs);
    device.delete_shader(fs);
    program
}

fn program_error(err: DeviceError) -> ProgramError {
    match err {
        DeviceError::CompileFailed { stage, log } => ProgramError::CompileFailed { stage, log },
        DeviceError::LinkFailed(log) => ProgramError::LinkFailed(log),
        other => ProgramError::LinkFailed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::device::{DeviceCapabilities, RecordingDevice};
    use crate::renderer::lights::{LightCounts, light_uniform_declarations};
    use crate::renderer::program::parameters::{ProgramInputs, ShadowConfig, build_parameters};
    use crate::renderer::settings::{Precision, ShadowType, ToneMapping};
    use crate::resources::color::{Color, ColorSpace};
    use crate::resources::geometry::GeometryFeatures;
    use crate::resources::material::Material;

    fn params(material: &Material) -> ProgramParameters {
        let lights = LightCounts::default();
        let inputs = ProgramInputs {
            variant: ProgramVariant::Main,
            material,
            geometry: GeometryFeatures::HAS_NORMAL,
            morph_targets: 0,
            morph_relative: true,
            bones: 0,
            lights: &lights,
            shadows: ShadowConfig { enabled: false, kind: ShadowType::Pcf },
            fog: None,
            env_mapping: None,
            to_screen: true,
            output_color_space: ColorSpace::Srgb,
            tone_mapping: ToneMapping::None,
            clipping_planes: 0,
            clip_intersection: 0,
            precision: Precision::High,
            light_block: false,
            physically_correct_lights: true,
        };
        build_parameters(&inputs, &DeviceCapabilities::webgl2_baseline()).unwrap()
    }

    fn decl() -> String {
        light_uniform_declarations(&LightCounts::default(), false)
    }

    #[test]
    fn shared_program_is_released_after_last_user() {
        let mut device = RecordingDevice::new();
        let mut cache = ProgramCache::new(false);
        let a = Material::lambert(Color::WHITE);
        let b = Material::lambert(Color::from_hex(0xff0000));

        let ha = cache.resolve(&mut device, a.id(), None, params(&a), &decl()).unwrap();
        let hb = cache.resolve(&mut device, b.id(), None, params(&b), &decl()).unwrap();
        assert_eq!(ha, hb);
        assert_eq!(cache.get(ha).unwrap().ref_count(), 2);
        assert_eq!(cache.state(ha), ProgramState::Ready);

        // A second resolve by the same material does not add a reference.
        cache.resolve(&mut device, a.id(), None, params(&a), &decl()).unwrap();
        assert_eq!(cache.get(ha).unwrap().ref_count(), 2);

        assert!(cache.release_material(&mut device, a.id()).is_empty());
        assert_eq!(cache.state(ha), ProgramState::Ready);
        assert!(cache.release_material(&mut device, a.id()).is_empty());
        assert_eq!(cache.release_material(&mut device, b.id()).len(), 1);
        assert_eq!(cache.state(ha), ProgramState::Released);
        assert_eq!(device.live_programs(), 0);
    }

    #[test]
    fn compile_failure_marks_entry_failed() {
        let mut device = RecordingDevice::new();
        device.fail_compile_containing("SHADING_MODEL TOON");
        let mut cache = ProgramCache::new(false);
        let toon = Material::toon(Color::WHITE);

        let h = cache.resolve(&mut device, toon.id(), None, params(&toon), &decl()).unwrap();
        assert!(matches!(cache.state(h), ProgramState::Failed(ProgramError::CompileFailed { .. })));
        assert_eq!(device.live_programs(), 0);
    }

    #[test]
    fn async_compile_is_polled_to_ready() {
        let mut caps = DeviceCapabilities::webgl2_baseline();
        caps.parallel_shader_compile = true;
        let mut device = RecordingDevice::with_capabilities(caps);
        device.set_compile_latency(2);
        let mut cache = ProgramCache::new(true);
        let m = Material::basic(Color::WHITE);

        let h = cache.resolve(&mut device, m.id(), None, params(&m), &decl()).unwrap();
        assert_eq!(cache.state(h), ProgramState::Compiling);
        assert!(!cache.is_ready(&mut device, h).unwrap());
        assert!(!cache.is_ready(&mut device, h).unwrap());
        assert!(cache.is_ready(&mut device, h).unwrap());
        assert!(!cache.get(h).unwrap().uniforms().is_empty());
    }

    #[test]
    fn context_loss_returns_entries_to_uncompiled() {
        let mut device = RecordingDevice::new();
        let mut cache = ProgramCache::new(false);
        let m = Material::phong(Color::WHITE);
        let h = cache.resolve(&mut device, m.id(), None, params(&m), &decl()).unwrap();

        cache.invalidate();
        assert_eq!(cache.state(h), ProgramState::Uncompiled);
        assert_eq!(cache.get(h).unwrap().ref_count(), 1);

        cache.ensure_compiled(&mut device, h).unwrap();
        assert_eq!(cache.state(h), ProgramState::Ready);
    }

    fn fast_key(material: &Material, scene_state: u64) -> FastProgramKey {
        FastProgramKey {
            material_id: material.id(),
            material_layout: material.layout_key(),
            geometry_id: 7,
            geometry_layout: 0,
            variant: ProgramVariant::Main,
            scene_state,
        }
    }

    #[test]
    fn uniform_edits_keep_the_fast_key() {
        let mut m = Material::standard(Color::WHITE);
        let before = m.layout_key();
        m.set_color(Color::from_hex(0x123456));
        m.set_opacity(0.25);
        assert_eq!(m.layout_key(), before);

        m.common_mut().flat_shading = true;
        assert_ne!(m.layout_key(), before);
    }

    #[test]
    fn fast_entries_stay_bounded_per_material() {
        let mut device = RecordingDevice::new();
        let mut cache = ProgramCache::new(false);
        let mut m = Material::lambert(Color::WHITE);

        for frame in 0..500u32 {
            m.set_color(Color::new(frame as f32 / 500.0, 0.5, 0.5));
            let key = fast_key(&m, 1);
            if cache.lookup_fast(&key).is_none() {
                cache.resolve(&mut device, m.id(), Some(key), params(&m), &decl()).unwrap();
            }
        }
        assert_eq!(cache.fast_len(), 1);
        assert_eq!(cache.len(), 1);

        // Scene-state churn replaces the entry instead of adding to it.
        for state in 2..50 {
            cache.resolve(&mut device, m.id(), Some(fast_key(&m, state)), params(&m), &decl()).unwrap();
        }
        assert_eq!(cache.fast_len(), 1);
    }
}
