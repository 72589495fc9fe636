use std::collections::BTreeMap;

use super::{output_defines, transform_chunks, ShaderGenerator};
use crate::device::DeviceCapabilities;
use crate::shader::chunks::ChunkRegistry;
use crate::shader::definition::{ShaderDefinition, SourceBuilder};
use crate::shader::options::BasicOptions;

/// Unlit family: a constant color, optionally modulated by vertex colors and
/// a diffuse map.
pub struct BasicGenerator;

impl ShaderGenerator for BasicGenerator {
    const NAME: &'static str = "basic";

    type Options = BasicOptions;

    fn create_shader_definition(
        caps: &DeviceCapabilities,
        options: &BasicOptions,
        _chunks: &ChunkRegistry,
    ) -> ShaderDefinition {
        let mut vs = SourceBuilder::new();
        vs.flag("SCREENSPACE", options.screen_space)
            .flag("VERTEX_COLORS", options.vertex_colors)
            .flag("DIFFUSE_MAP", options.diffuse_map);
        transform_chunks(&mut vs, caps, options.skin, options.instancing);
        vs.include_if("colorVS", options.vertex_colors)
            .include_if("uv0VS", options.diffuse_map)
            .include("basicMainVS");

        let mut fs = SourceBuilder::new();
        fs.flag("VERTEX_COLORS", options.vertex_colors)
            .flag("DIFFUSE_MAP", options.diffuse_map)
            .flag("ALPHA_TEST", options.alpha_test);
        output_defines(&mut fs, options.fog, options.gamma, options.tonemap, options.pass);
        fs.include("basicDeclPS")
            .include("fogPS")
            .include("gammaPS")
            .include("tonemapPS")
            .include_if("alphaTestPS", options.alpha_test)
            .include("passPS")
            .include("basicMainPS");

        ShaderDefinition {
            name: Self::NAME.to_string(),
            attributes: BTreeMap::new(),
            vshader: vs.build(),
            fshader: fs.build(),
            defines: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::generators::test_caps;

    #[test]
    fn default_options_use_the_family_name_as_key() {
        let key = BasicGenerator::generate_key(&test_caps(), &BasicOptions::default()).unwrap();
        assert_eq!(key, "basic");
    }

    #[test]
    fn skin_changes_key_and_source() {
        let caps = test_caps();
        let chunks = ChunkRegistry::builtin();
        let plain = BasicOptions::default();
        let skinned = BasicOptions::skinned();

        assert_eq!(
            BasicGenerator::generate_key(&caps, &skinned).unwrap(),
            "basic[skin=true]"
        );

        let a = BasicGenerator::create_shader_definition(&caps, &plain, &chunks);
        let b = BasicGenerator::create_shader_definition(&caps, &skinned, &chunks);
        assert_ne!(a.vshader, b.vshader);
        assert!(b.vshader.contains("#define BONE_VECTORS 192"));
        assert!(b.vshader.contains("#include \"skinVS\""));
        assert_eq!(a.fshader, b.fshader);
    }

    #[test]
    fn generation_is_deterministic() {
        let caps = test_caps();
        let chunks = ChunkRegistry::builtin();
        let options = BasicOptions {
            diffuse_map: true,
            alpha_test: true,
            ..BasicOptions::default()
        };
        let a = BasicGenerator::create_shader_definition(&caps, &options, &chunks);
        let b = BasicGenerator::create_shader_definition(&caps, &options, &chunks);
        assert_eq!(a, b);
    }
}
