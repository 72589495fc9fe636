//! Program families: typed options in, shader definition out.

mod basic;
mod lit;

pub use basic::BasicGenerator;
pub use lit::LitGenerator;

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::chunks::ChunkRegistry;
use super::definition::{ShaderDefinition, SourceBuilder};
use super::options::{non_default_fields, FogMode, GammaMode, ShaderPass, ToneMapping};
use crate::device::DeviceCapabilities;
use crate::error::Result;

/// A family of programs built from chunks according to typed options.
pub trait ShaderGenerator {
    /// Family name; the first component of every generation key.
    const NAME: &'static str;

    type Options: Serialize + DeserializeOwned + Default + Clone + Debug;

    /// Deterministic cache key for `options`.
    ///
    /// Only options that differ from their defaults are part of the key.
    fn generate_key(_caps: &DeviceCapabilities, options: &Self::Options) -> Result<String> {
        let fields = non_default_fields(options)?;
        if fields.is_empty() {
            return Ok(Self::NAME.to_string());
        }
        let fields: Vec<String> = fields
            .into_iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        Ok(format!("{}[{}]", Self::NAME, fields.join(",")))
    }

    fn create_shader_definition(
        caps: &DeviceCapabilities,
        options: &Self::Options,
        chunks: &ChunkRegistry,
    ) -> ShaderDefinition;
}

/// Names of the families `precompile` can rebuild from recorded options.
pub const FAMILIES: [&str; 2] = [BasicGenerator::NAME, LitGenerator::NAME];

/// Defines shared by every family's fragment stage.
fn output_defines(
    source: &mut SourceBuilder,
    fog: FogMode,
    gamma: GammaMode,
    tonemap: ToneMapping,
    pass: ShaderPass,
) {
    source
        .flag("FOG_LINEAR", fog == FogMode::Linear)
        .flag("FOG_EXP", fog == FogMode::Exp)
        .flag("FOG_EXP2", fog == FogMode::Exp2)
        .flag("GAMMA_SRGB", gamma == GammaMode::Srgb)
        .flag("TONEMAP_LINEAR", tonemap == ToneMapping::Linear)
        .flag("TONEMAP_FILMIC", tonemap == ToneMapping::Filmic)
        .flag("TONEMAP_ACES", tonemap == ToneMapping::Aces)
        .flag("PASS_DEPTH", pass == ShaderPass::Depth)
        .flag("PASS_PICK", pass == ShaderPass::Pick);
}

/// Vertex-stage transform defines and chunks shared by every family.
fn transform_chunks(
    source: &mut SourceBuilder,
    caps: &DeviceCapabilities,
    skin: bool,
    instancing: bool,
) {
    source.flag("SKIN", skin).flag("INSTANCING", instancing);
    if skin {
        source.define("BONE_VECTORS", caps.bone_limit * 3);
    }
    source
        .include("transformDeclVS")
        .include_if("skinVS", skin)
        .include_if("instancingVS", instancing)
        .include("transformVS");
}

#[cfg(test)]
pub(crate) fn test_caps() -> DeviceCapabilities {
    use crate::device::{BackendKind, ShaderTarget};

    DeviceCapabilities {
        backend: BackendKind::Null,
        shader_target: ShaderTarget::Glsl450,
        supports_multi_draw: false,
        supports_u8_indices: true,
        max_texture_size: 4096,
        max_uniform_block_size: 65536,
        bone_limit: 64,
        adapter_name: "test".to_string(),
    }
}
