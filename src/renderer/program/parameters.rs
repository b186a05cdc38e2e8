//! Program parameters
//!
//! Everything that changes generated shader source is folded into one
//! [`ShaderDefines`] set. The program key is the hash of that set in
//! canonical (name-sorted) form, so two materials that reach the same
//! defines through different paths share one compiled program.

use crate::renderer::device::DeviceCapabilities;
use crate::renderer::lights::LightCounts;
use crate::renderer::program::ProgramError;
use crate::renderer::settings::{Precision, ShadowType, ToneMapping};
use crate::resources::color::ColorSpace;
use crate::resources::geometry::{GeometryFeatures, VertexAttribute};
use crate::resources::material::{Material, MaterialFeatures};
use crate::resources::shader_defines::ShaderDefines;
use crate::resources::texture::TextureMapping;
use crate::scene::Fog;

/// Uniform vectors reserved for non-bone uniforms in the vertex stage.
const RESERVED_VERTEX_VECTORS: u32 = 20;

/// Which pass a program is generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProgramVariant {
    /// Full shading.
    #[default]
    Main,
    /// Depth-only, for directional and spot shadow maps.
    Depth,
    /// Linear distance to the light, for point light shadow maps.
    Distance,
}

impl ProgramVariant {
    #[must_use]
    pub fn define_name(self) -> &'static str {
        match self {
            Self::Main => "MAIN_PASS",
            Self::Depth => "DEPTH_PASS",
            Self::Distance => "DISTANCE_PASS",
        }
    }

    #[must_use]
    pub fn is_shadow(self) -> bool {
        !matches!(self, Self::Main)
    }
}

/// Shadow-related settings that reach the shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowConfig {
    pub enabled: bool,
    pub kind: ShadowType,
}

/// Inputs gathered by the renderer for one draw.
#[derive(Debug, Clone, Copy)]
pub struct ProgramInputs<'a> {
    pub variant: ProgramVariant,
    pub material: &'a Material,
    pub geometry: GeometryFeatures,
    pub morph_targets: usize,
    pub morph_relative: bool,
    pub bones: usize,
    pub lights: &'a LightCounts,
    pub shadows: ShadowConfig,
    pub fog: Option<&'a Fog>,
    /// Mapping of the environment map bound to this draw, if any.
    pub env_mapping: Option<TextureMapping>,
    /// Drawing to the default framebuffer.
    pub to_screen: bool,
    pub output_color_space: ColorSpace,
    pub tone_mapping: ToneMapping,
    pub clipping_planes: usize,
    pub clip_intersection: usize,
    pub precision: Precision,
    pub light_block: bool,
    pub physically_correct_lights: bool,
}

/// One vertex input of a generated program.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct AttributeSlot {
    pub name: String,
    /// GLSL type.
    pub ty: &'static str,
    pub location: u32,
    #[serde(skip)]
    pub source: AttributeSource,
}

/// Where the binder finds data for an [`AttributeSlot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttributeSource {
    #[default]
    None,
    Vertex(VertexAttribute),
    MorphPosition(usize),
    MorphNormal(usize),
}

/// Resolved parameters for one program.
#[derive(Debug, Clone)]
pub struct ProgramParameters {
    pub variant: ProgramVariant,
    pub defines: ShaderDefines,
    pub attributes: Vec<AttributeSlot>,
    pub precision: Precision,
    pub light_block: bool,
    /// `(requested, used)` when the skin had more bones than fit.
    pub clamped_bones: Option<(usize, usize)>,
    /// `(requested, used)` when morph targets were dropped.
    pub clamped_morphs: Option<(usize, usize)>,
}

impl ProgramParameters {
    #[must_use]
    pub fn key_hash(&self) -> u128 {
        self.defines.key_hash()
    }

    /// Number of morph targets the program consumes.
    #[must_use]
    pub fn morph_count(&self) -> usize {
        self.attributes
            .iter()
            .filter(|a| matches!(a.source, AttributeSource::MorphPosition(_)))
            .count()
    }
}

/// Largest bone palette the vertex stage can hold.
#[must_use]
pub fn max_bones(caps: &DeviceCapabilities) -> usize {
    (caps.max_vertex_uniform_vectors.saturating_sub(RESERVED_VERTEX_VECTORS) / 4) as usize
}

fn env_defines(defines: &mut ShaderDefines, mapping: TextureMapping, caps: &DeviceCapabilities) -> Result<(), ProgramError> {
    match mapping {
        TextureMapping::CubeReflection => {
            defines.set("ENVMAP_TYPE", "CUBE");
            defines.set("ENVMAP_MODE", "REFLECTION");
        }
        TextureMapping::CubeRefraction => {
            defines.set("ENVMAP_TYPE", "CUBE");
            defines.set("ENVMAP_MODE", "REFRACTION");
        }
        TextureMapping::EquirectangularReflection => {
            defines.set("ENVMAP_TYPE", "EQUIREC");
            defines.set("ENVMAP_MODE", "REFLECTION");
        }
        TextureMapping::CubeUv => {
            if !caps.shader_texture_lod {
                return Err(ProgramError::Unsupported(
                    "cube-UV environment maps need explicit-LOD texture sampling".into(),
                ));
            }
            defines.set("ENVMAP_TYPE", "CUBE_UV");
            defines.set("ENVMAP_MODE", "REFLECTION");
        }
        TextureMapping::Uv => {
            return Err(ProgramError::Unsupported(
                "a UV-mapped texture cannot be used as an environment map".into(),
            ));
        }
    }
    defines.flag("USE_ENV_MAP");
    Ok(())
}

/// Builds the define set and vertex layout for one draw.
pub fn build_parameters(inputs: &ProgramInputs<'_>, caps: &DeviceCapabilities) -> Result<ProgramParameters, ProgramError> {
    let mut defines = ShaderDefines::new();
    let material = inputs.material;
    let common = material.common();
    let variant = inputs.variant;

    defines.flag(variant.define_name());
    defines.set("PRECISION", inputs.precision.qualifier());

    // --- vertex-stage features shared by every variant ---
    let skinning = inputs.geometry.contains(GeometryFeatures::HAS_SKIN) && inputs.bones > 0;
    let mut clamped_bones = None;
    if skinning {
        let limit = max_bones(caps);
        if limit == 0 {
            return Err(ProgramError::Unsupported("device has no room for a bone palette".into()));
        }
        let used = inputs.bones.min(limit);
        if used < inputs.bones {
            clamped_bones = Some((inputs.bones, used));
        }
        defines.flag("USE_SKINNING");
        defines.set_count("NUM_BONES", used);
    }

    let instancing = inputs.geometry.contains(GeometryFeatures::INSTANCED);
    if instancing {
        defines.flag("USE_INSTANCING");
    }

    let clip_planes = if variant.is_shadow() && !common.clip_shadows { 0 } else { inputs.clipping_planes };
    if clip_planes > 0 {
        defines.set_count("NUM_CLIPPING_PLANES", clip_planes);
        let intersection = inputs.clip_intersection.min(clip_planes);
        if intersection > 0 {
            defines.set_count("NUM_CLIP_INTERSECTION", intersection);
        }
    }

    let features = if variant.is_shadow() { MaterialFeatures::empty() } else { material.features() };
    let lit = !variant.is_shadow() && material.shading_model().is_lit();
    let has_normals = inputs.geometry.contains(GeometryFeatures::HAS_NORMAL);
    let use_normal = lit && has_normals;

    if !variant.is_shadow() {
        defines.set("SHADING_MODEL", material.shading_model().name());
        for (name, _) in features.iter_names() {
            defines.flag(name);
        }
        if lit && !has_normals {
            defines.flag("FLAT_SHADING");
        }
        if use_normal {
            defines.flag("USE_NORMAL");
        }

        let uses_uv = features.intersects(
            MaterialFeatures::USE_MAP
                | MaterialFeatures::USE_ALPHA_MAP
                | MaterialFeatures::USE_NORMAL_MAP
                | MaterialFeatures::USE_EMISSIVE_MAP
                | MaterialFeatures::USE_ROUGHNESS_MAP
                | MaterialFeatures::USE_METALNESS_MAP
                | MaterialFeatures::USE_SPECULAR_MAP
                | MaterialFeatures::USE_TRANSMISSION_MAP
                | MaterialFeatures::USE_AO_MAP,
        );
        if uses_uv {
            defines.flag("USE_UV");
        }
        if features.contains(MaterialFeatures::USE_AO_MAP) && inputs.geometry.contains(GeometryFeatures::HAS_UV1) {
            defines.flag("USE_UV1");
        }
        if features.contains(MaterialFeatures::USE_NORMAL_MAP)
            && use_normal
            && inputs.geometry.contains(GeometryFeatures::HAS_TANGENT)
        {
            defines.flag("USE_TANGENT");
        }
        if features.contains(MaterialFeatures::VERTEX_COLORS) && inputs.geometry.contains(GeometryFeatures::HAS_COLOR) {
            defines.flag("USE_COLOR");
        }
        if instancing && inputs.geometry.contains(GeometryFeatures::INSTANCE_COLOR) {
            defines.flag("USE_INSTANCING_COLOR");
        }

        if let Some(mapping) = inputs.env_mapping {
            env_defines(&mut defines, mapping, caps)?;
        }

        if lit {
            let l = inputs.lights;
            defines.set_count("NUM_DIR_LIGHTS", l.directional);
            defines.set_count("NUM_POINT_LIGHTS", l.point);
            defines.set_count("NUM_SPOT_LIGHTS", l.spot);
            defines.set_count("NUM_RECT_AREA_LIGHTS", l.rect_area);
            if inputs.shadows.enabled && l.has_shadows() {
                defines.flag("USE_SHADOWMAP");
                defines.set("SHADOWMAP_TYPE", inputs.shadows.kind.define_name());
                defines.set_count("NUM_DIR_LIGHT_SHADOWS", l.directional_shadows);
                defines.set_count("NUM_POINT_LIGHT_SHADOWS", l.point_shadows);
                defines.set_count("NUM_SPOT_LIGHT_SHADOWS", l.spot_shadows);
            }
            if inputs.light_block {
                defines.flag("USE_LIGHT_BLOCK");
            }
            if inputs.physically_correct_lights {
                defines.flag("PHYSICALLY_CORRECT_LIGHTS");
            }
        }

        if common.fog
            && let Some(fog) = inputs.fog
        {
            defines.flag("USE_FOG");
            if fog.is_exp2() {
                defines.flag("FOG_EXP2");
            }
        }

        if inputs.to_screen
            && common.tone_mapped
            && let Some(name) = inputs.tone_mapping.define_name()
        {
            defines.set("TONE_MAPPING", name);
        }
        defines.set("OUTPUT_COLOR_SPACE", inputs.output_color_space.define_name());
    }

    // --- vertex layout ---
    let max_attributes = caps.max_vertex_attributes;
    let mut attributes = Vec::new();
    let mut next_location = 0u32;
    let mut push = |name: String, ty: &'static str, span: u32, source: AttributeSource| {
        attributes.push(AttributeSlot { name, ty, location: next_location, source });
        next_location += span;
    };

    push("position".into(), "vec3", 1, AttributeSource::Vertex(VertexAttribute::Position));
    if use_normal {
        push("normal".into(), "vec3", 1, AttributeSource::Vertex(VertexAttribute::Normal));
    }
    if defines.contains("USE_TANGENT") {
        push("tangent".into(), "vec4", 1, AttributeSource::Vertex(VertexAttribute::Tangent));
    }
    if defines.contains("USE_UV") {
        push("uv".into(), "vec2", 1, AttributeSource::Vertex(VertexAttribute::Uv));
    }
    if defines.contains("USE_UV1") {
        push("uv1".into(), "vec2", 1, AttributeSource::Vertex(VertexAttribute::Uv1));
    }
    if defines.contains("USE_COLOR") {
        push("color".into(), "vec3", 1, AttributeSource::Vertex(VertexAttribute::Color));
    }
    if skinning {
        push("skinIndex".into(), "vec4", 1, AttributeSource::Vertex(VertexAttribute::SkinIndex));
        push("skinWeight".into(), "vec4", 1, AttributeSource::Vertex(VertexAttribute::SkinWeight));
    }
    if instancing {
        push("instanceMatrix".into(), "mat4", 4, AttributeSource::Vertex(VertexAttribute::InstanceMatrix));
        if defines.contains("USE_INSTANCING_COLOR") {
            push("instanceColor".into(), "vec3", 1, AttributeSource::Vertex(VertexAttribute::InstanceColor));
        }
    }

    if next_location > max_attributes {
        return Err(ProgramError::Unsupported(format!(
            "program needs {next_location} vertex attributes, device supports {max_attributes}"
        )));
    }

    // Morph targets take whatever attribute slots remain, first targets first.
    let mut clamped_morphs = None;
    if inputs.geometry.contains(GeometryFeatures::HAS_MORPH) && inputs.morph_targets > 0 {
        let normals = use_normal && inputs.geometry.contains(GeometryFeatures::HAS_MORPH_NORMALS);
        let per_target = if normals { 2 } else { 1 };
        let room = ((max_attributes - next_location) / per_target) as usize;
        let count = inputs.morph_targets.min(room);
        if count < inputs.morph_targets {
            clamped_morphs = Some((inputs.morph_targets, count));
        }
        if count > 0 {
            defines.flag("USE_MORPHTARGETS");
            defines.set_count("MORPHTARGETS_COUNT", count);
            if inputs.morph_relative {
                defines.flag("MORPHTARGETS_RELATIVE");
            }
            for i in 0..count {
                attributes.push(AttributeSlot {
                    name: format!("morphTarget{i}"),
                    ty: "vec3",
                    location: next_location,
                    source: AttributeSource::MorphPosition(i),
                });
                next_location += 1;
            }
            if normals {
                defines.flag("USE_MORPHNORMALS");
                for i in 0..count {
                    attributes.push(AttributeSlot {
                        name: format!("morphNormal{i}"),
                        ty: "vec3",
                        location: next_location,
                        source: AttributeSource::MorphNormal(i),
                    });
                    next_location += 1;
                }
            }
        }
    }

    Ok(ProgramParameters {
        variant,
        defines,
        attributes,
        precision: inputs.precision,
        light_block: inputs.light_block && lit,
        clamped_bones,
        clamped_morphs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::color::Color;
    use crate::resources::material::{Side, StandardConfig};

    fn inputs<'a>(material: &'a Material, lights: &'a LightCounts) -> ProgramInputs<'a> {
        ProgramInputs {
            variant: ProgramVariant::Main,
            material,
            geometry: GeometryFeatures::HAS_NORMAL | GeometryFeatures::HAS_UV,
            morph_targets: 0,
            morph_relative: true,
            bones: 0,
            lights,
            shadows: ShadowConfig { enabled: true, kind: ShadowType::Pcf },
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
        }
    }

    #[test]
    fn equivalent_materials_share_a_key() {
        let caps = DeviceCapabilities::webgl2_baseline();
        let lights = LightCounts { directional: 1, ..LightCounts::default() };

        let a = Material::standard(Color::WHITE).with_common(|c| {
            c.side = Side::Double;
            c.vertex_colors = true;
        });
        let b = Material::new(StandardConfig { roughness: 0.2, ..StandardConfig::default() })
            .with_common(|c| {
                c.vertex_colors = true;
                c.side = Side::Double;
            });

        let pa = build_parameters(&inputs(&a, &lights), &caps).unwrap();
        let pb = build_parameters(&inputs(&b, &lights), &caps).unwrap();
        assert_eq!(pa.key_hash(), pb.key_hash());
    }

    #[test]
    fn light_counts_change_the_key_for_lit_models_only() {
        let caps = DeviceCapabilities::webgl2_baseline();
        let one = LightCounts { point: 1, ..LightCounts::default() };
        let two = LightCounts { point: 2, ..LightCounts::default() };

        let lit = Material::standard(Color::WHITE);
        let k1 = build_parameters(&inputs(&lit, &one), &caps).unwrap().key_hash();
        let k2 = build_parameters(&inputs(&lit, &two), &caps).unwrap().key_hash();
        assert_ne!(k1, k2);

        let unlit = Material::basic(Color::WHITE);
        let k1 = build_parameters(&inputs(&unlit, &one), &caps).unwrap().key_hash();
        let k2 = build_parameters(&inputs(&unlit, &two), &caps).unwrap().key_hash();
        assert_eq!(k1, k2);
    }

    #[test]
    fn cube_uv_env_needs_lod_sampling() {
        let mut caps = DeviceCapabilities::webgl2_baseline();
        caps.shader_texture_lod = false;
        let lights = LightCounts::default();
        let mat = Material::standard(Color::WHITE);
        let mut i = inputs(&mat, &lights);
        i.env_mapping = Some(TextureMapping::CubeUv);
        assert!(matches!(build_parameters(&i, &caps), Err(ProgramError::Unsupported(_))));
    }

    #[test]
    fn bones_are_clamped_to_uniform_space() {
        let caps = DeviceCapabilities::webgl2_baseline();
        let lights = LightCounts::default();
        let mat = Material::basic(Color::WHITE);
        let mut i = inputs(&mat, &lights);
        i.geometry |= GeometryFeatures::HAS_SKIN;
        i.bones = 500;
        let p = build_parameters(&i, &caps).unwrap();
        let limit = max_bones(&caps);
        assert_eq!(p.clamped_bones, Some((500, limit)));
        assert_eq!(p.defines.get("NUM_BONES"), Some(limit.to_string()));
    }

    #[test]
    fn morph_targets_fill_remaining_attribute_slots() {
        let caps = DeviceCapabilities::webgl2_baseline();
        let lights = LightCounts::default();
        let mat = Material::standard(Color::WHITE);
        let mut i = inputs(&mat, &lights);
        i.geometry |= GeometryFeatures::HAS_MORPH | GeometryFeatures::HAS_MORPH_NORMALS;
        i.morph_targets = 40;
        let p = build_parameters(&i, &caps).unwrap();

        let last = p.attributes.iter().map(|a| a.location).max().unwrap();
        assert!(last < caps.max_vertex_attributes);
        assert!(p.clamped_morphs.is_some());
        assert_eq!(p.morph_count() * 2 + 2, p.attributes.len());
    }

    #[test]
    fn depth_variant_drops_shading_defines() {
        let caps = DeviceCapabilities::webgl2_baseline();
        let lights = LightCounts { directional: 1, directional_shadows: 1, ..LightCounts::default() };
        let mat = Material::standard(Color::WHITE);
        let mut i = inputs(&mat, &lights);
        i.variant = ProgramVariant::Depth;
        let p = build_parameters(&i, &caps).unwrap();
        assert!(p.defines.contains("DEPTH_PASS"));
        assert!(!p.defines.contains("SHADING_MODEL"));
        assert!(!p.defines.contains("NUM_DIR_LIGHTS"));
        assert_eq!(p.attributes.len(), 1);
    }
}
