use std::collections::BTreeMap;

use super::{output_defines, transform_chunks, ShaderGenerator};
use crate::device::DeviceCapabilities;
use crate::shader::chunks::ChunkRegistry;
use crate::shader::definition::{ShaderDefinition, SourceBuilder};
use crate::shader::options::{LightKind, LitOptions};

/// Blinn-Phong family with a fixed list of directional, omni and spot lights.
pub struct LitGenerator;

impl ShaderGenerator for LitGenerator {
    const NAME: &'static str = "lit";

    type Options = LitOptions;

    fn create_shader_definition(
        caps: &DeviceCapabilities,
        options: &LitOptions,
        _chunks: &ChunkRegistry,
    ) -> ShaderDefinition {
        let mut vs = SourceBuilder::new();
        vs.flag("VERTEX_COLORS", options.vertex_colors)
            .flag("DIFFUSE_MAP", options.diffuse_map);
        transform_chunks(&mut vs, caps, options.skin, options.instancing);
        vs.include("normalVS")
            .include_if("colorVS", options.vertex_colors)
            .include_if("uv0VS", options.diffuse_map)
            .include("litMainVS");

        let mut fs = SourceBuilder::new();
        fs.flag("VERTEX_COLORS", options.vertex_colors)
            .flag("DIFFUSE_MAP", options.diffuse_map)
            .flag("ALPHA_TEST", options.alpha_test)
            .flag("SPECULAR", options.specular)
            .flag("TWO_SIDED_LIGHTING", options.two_sided_lighting);
        output_defines(&mut fs, options.fog, options.gamma, options.tonemap, options.pass);
        fs.define("LIGHT_COUNT", options.lights.len());
        for (index, light) in options.lights.iter().enumerate() {
            let kind = match light {
                LightKind::Directional => "DIRECTIONAL",
                LightKind::Omni => "OMNI",
                LightKind::Spot => "SPOT",
            };
            fs.flag(&format!("LIGHT{index}_{kind}"), true);
        }
        fs.include("litDeclPS")
            .include("fogPS")
            .include("gammaPS")
            .include("tonemapPS")
            .include_if("alphaTestPS", options.alpha_test)
            .include_repeated("lightPS", "LIGHT_COUNT")
            .include("passPS")
            .include("litMainPS");

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
    use crate::shader::preprocessor::preprocess;

    #[test]
    fn lights_expand_into_numbered_functions() {
        let caps = test_caps();
        let chunks = ChunkRegistry::builtin();
        let options = LitOptions {
            lights: vec![LightKind::Directional, LightKind::Spot],
            ..LitOptions::default()
        };
        let definition = LitGenerator::create_shader_definition(&caps, &options, &chunks);
        let fragment = preprocess(&definition.fshader, &definition.defines, &chunks).unwrap();

        assert!(fragment.contains("void addLight0("));
        assert!(fragment.contains("uniform vec3 light0_direction;"));
        assert!(fragment.contains("uniform float light1_outerConeAngle;"));
        assert!(fragment.contains("    addLight1(normal, viewDir, diffuseLight, specularLight);"));
        assert!(!fragment.contains("addLight2"));
    }

    #[test]
    fn light_order_is_part_of_the_key() {
        let caps = test_caps();
        let a = LitOptions {
            lights: vec![LightKind::Omni, LightKind::Spot],
            ..LitOptions::default()
        };
        let b = LitOptions {
            lights: vec![LightKind::Spot, LightKind::Omni],
            ..LitOptions::default()
        };
        assert_ne!(
            LitGenerator::generate_key(&caps, &a).unwrap(),
            LitGenerator::generate_key(&caps, &b).unwrap()
        );
    }
}
