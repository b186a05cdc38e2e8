//! Shader source generation
//!
//! GLSL ES 3.00 sources are rendered from minijinja templates embedded with
//! `rust-embed`. Conditionals are resolved at template time, so a program
//! only declares the uniforms its feature set actually reads, and loops over
//! lights and shadow maps are unrolled (sampler arrays need constant indices).
//!
//! | Variant    | Vertex template | Fragment template |
//! |------------|-----------------|-------------------|
//! | `Main`     | `mesh.vert`     | `mesh.frag`       |
//! | `Depth`    | `shadow.vert`   | `depth.frag`      |
//! | `Distance` | `shadow.vert`   | `distance.frag`   |

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::OnceLock;

use minijinja::value::Value;
use minijinja::{Environment, Error, ErrorKind, syntax::SyntaxConfig};
use rust_embed::RustEmbed;
use serde::Serialize;
use xxhash_rust::xxh3::xxh3_128;

use super::ProgramError;
use super::parameters::{AttributeSlot, ProgramParameters, ProgramVariant};

static SHADER_ENV: OnceLock<Environment<'static>> = OnceLock::new();

#[derive(RustEmbed)]
#[folder = "src/renderer/program/shaders"]
struct ShaderAssets;

fn get_env() -> &'static Environment<'static> {
    SHADER_ENV.get_or_init(|| {
        let mut env = Environment::new();

        let syntax = SyntaxConfig::builder()
            .block_delimiters("{$", "$}")
            .variable_delimiters("{{", "}}")
            .line_statement_prefix("$$")
            .build()
            .expect("Failed to configure shader template syntax");

        env.set_syntax(syntax);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_keep_trailing_newline(true);
        env.set_undefined_behavior(minijinja::UndefinedBehavior::SemiStrict);
        env.set_loader(shader_loader);
        env.set_path_join_callback(|name, _parent| format!("chunks/{name}").into());

        env
    })
}

fn shader_loader(name: &str) -> Result<Option<String>, Error> {
    let filename = if std::path::Path::new(name).extension().is_some() {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("{name}.glsl"))
    };

    #[cfg(all(debug_assertions, not(target_arch = "wasm32")))]
    {
        let path = std::path::Path::new("src/renderer/program/shaders").join(filename.as_ref());
        if path.exists() {
            return std::fs::read_to_string(&path).map(Some).map_err(|e| {
                Error::new(ErrorKind::TemplateNotFound, format!("Failed to read {}: {e}", path.display()))
            });
        }
    }

    if let Some(file) = ShaderAssets::get(&filename)
        && let Ok(source) = std::str::from_utf8(file.data.as_ref())
    {
        return Ok(Some(source.to_string()));
    }

    Ok(None)
}

#[derive(Serialize)]
struct ShaderContext<'a> {
    #[serde(flatten)]
    defines: BTreeMap<String, Value>,
    define_block: &'a str,
    attributes: &'a [AttributeSlot],
    light_uniforms: &'a str,
    precision: &'static str,
}

/// Rendered vertex + fragment pair.
#[derive(Debug, Clone)]
pub struct GeneratedSource {
    pub vertex: String,
    pub fragment: String,
    /// xxh3-128 over both stages.
    pub hash: u128,
}

fn template_names(variant: ProgramVariant) -> (&'static str, &'static str) {
    match variant {
        ProgramVariant::Main => ("mesh.vert", "mesh.frag"),
        ProgramVariant::Depth => ("shadow.vert", "depth.frag"),
        ProgramVariant::Distance => ("shadow.vert", "distance.frag"),
    }
}

/// Template values: numeric defines become integers so templates can loop
/// over them, everything else stays a string.
fn template_defines(params: &ProgramParameters) -> BTreeMap<String, Value> {
    params
        .defines
        .sorted()
        .into_iter()
        .map(|(k, v)| {
            let value = v.parse::<i64>().map_or_else(|_| Value::from(v), Value::from);
            (k.to_string(), value)
        })
        .collect()
}

fn define_block(params: &ProgramParameters) -> String {
    let mut out = String::new();
    for (k, v) in params.defines.sorted() {
        let _ = writeln!(out, "#define {k} {v}");
    }
    out
}

fn render(env: &Environment<'_>, name: &str, ctx: &ShaderContext<'_>) -> Result<String, ProgramError> {
    let template = env
        .get_template(name)
        .map_err(|e| ProgramError::Template(format!("{name}: {e}")))?;
    template
        .render(ctx)
        .map_err(|e| ProgramError::Template(format!("{name}: {e:#}")))
}

/// Renders both stages for `params`. `light_uniforms` is the declaration
/// text for the light inputs (discrete uniforms or a std140 block).
pub fn generate(params: &ProgramParameters, light_uniforms: &str) -> Result<GeneratedSource, ProgramError> {
    let env = get_env();
    let define_block = define_block(params);
    let ctx = ShaderContext {
        defines: template_defines(params),
        define_block: &define_block,
        attributes: &params.attributes,
        light_uniforms,
        precision: params.precision.qualifier(),
    };

    let (vs_name, fs_name) = template_names(params.variant);
    let vertex = render(env, vs_name, &ctx)?;
    let fragment = render(env, fs_name, &ctx)?;

    let mut hasher_input = Vec::with_capacity(vertex.len() + fragment.len() + 1);
    hasher_input.extend_from_slice(vertex.as_bytes());
    hasher_input.push(0);
    hasher_input.extend_from_slice(fragment.as_bytes());
    let hash = xxh3_128(&hasher_input);

    Ok(GeneratedSource { vertex, fragment, hash })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::device::DeviceCapabilities;
    use crate::renderer::lights::{LightCounts, light_uniform_declarations};
    use crate::renderer::program::parameters::{ProgramInputs, ShadowConfig, build_parameters};
    use crate::renderer::settings::{Precision, ShadowType, ToneMapping};
    use crate::resources::color::{Color, ColorSpace};
    use crate::resources::geometry::GeometryFeatures;
    use crate::resources::material::Material;

    fn params(material: &Material, lights: &LightCounts, variant: ProgramVariant) -> ProgramParameters {
        let inputs = ProgramInputs {
            variant,
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
            tone_mapping: ToneMapping::AcesFilmic,
            clipping_planes: 0,
            clip_intersection: 0,
            precision: Precision::High,
            light_block: false,
            physically_correct_lights: true,
        };
        build_parameters(&inputs, &DeviceCapabilities::webgl2_baseline()).unwrap()
    }

    #[test]
    fn unused_features_declare_no_uniforms() {
        let lights = LightCounts::default();
        let p = params(&Material::basic(Color::WHITE), &lights, ProgramVariant::Main);
        let src = generate(&p, &light_uniform_declarations(&lights, false)).unwrap();
        assert!(src.vertex.starts_with("#version 300 es"));
        assert!(src.fragment.contains("uniform vec3 diffuse;"));
        assert!(!src.fragment.contains("uniform sampler2D map;"));
        assert!(!src.fragment.contains("directionalLightColor"));
    }

    #[test]
    fn shadowed_lights_unroll_sampler_access() {
        let lights = LightCounts { directional: 2, directional_shadows: 2, ..LightCounts::default() };
        let p = params(&Material::standard(Color::WHITE), &lights, ProgramVariant::Main);
        let src = generate(&p, &light_uniform_declarations(&lights, false)).unwrap();
        assert!(src.fragment.contains("uniform sampler2D directionalShadowMap[2];"));
        assert!(src.fragment.contains("directionalShadowMap[1]"));
        assert!(src.fragment.contains("toneMappingExposure"));
    }

    #[test]
    fn depth_variant_renders() {
        let lights = LightCounts::default();
        let p = params(&Material::standard(Color::WHITE), &lights, ProgramVariant::Depth);
        let src = generate(&p, "").unwrap();
        assert!(src.vertex.contains("in vec3 position;"));
        assert!(!src.fragment.contains("diffuse"));
    }

    #[test]
    fn source_hash_is_stable() {
        let lights = LightCounts::default();
        let p = params(&Material::lambert(Color::WHITE), &lights, ProgramVariant::Main);
        let decl = light_uniform_declarations(&lights, false);
        assert_eq!(generate(&p, &decl).unwrap().hash, generate(&p, &decl).unwrap().hash);
    }
}
