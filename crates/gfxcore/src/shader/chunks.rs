//! Named GLSL fragments that programs are assembled from.
//!
//! Chunks are written in a portable dialect (`attribute`, `varying`, loose
//! `uniform`s, `texture2D`, `gl_FragColor`) which the shader processor later
//! rewrites for the device's target. Chunks may `#include` each other; an
//! include of the form `"name, COUNT"` repeats the chunk `COUNT` times with
//! `{i}` replaced by the repetition index.

use std::collections::BTreeMap;

/// Registry of chunk sources, keyed by chunk name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkRegistry {
    chunks: BTreeMap<String, String>,
}

impl ChunkRegistry {
    /// Registry holding only the engine's built-in chunks.
    pub fn builtin() -> Self {
        let chunks = BUILTIN_CHUNKS
            .iter()
            .map(|(name, source)| (name.to_string(), source.to_string()))
            .collect();
        Self { chunks }
    }

    /// Registry with no chunks at all.
    pub fn empty() -> Self {
        Self {
            chunks: BTreeMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.chunks.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.chunks.contains_key(name)
    }

    /// Adds or replaces a chunk. Returns the previous source, if any.
    pub fn set(&mut self, name: impl Into<String>, source: impl Into<String>) -> Option<String> {
        self.chunks.insert(name.into(), source.into())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.chunks.remove(name)
    }

    /// Returns a copy of `self` with `overrides` layered on top.
    pub fn with_overrides<'a, I>(&self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut merged = self.clone();
        for (name, source) in overrides {
            merged.set(name.clone(), source.clone());
        }
        merged
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.chunks.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

impl Default for ChunkRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

const BUILTIN_CHUNKS: &[(&str, &str)] = &[
    ("transformDeclVS", TRANSFORM_DECL_VS),
    ("skinVS", SKIN_VS),
    ("instancingVS", INSTANCING_VS),
    ("transformVS", TRANSFORM_VS),
    ("normalVS", NORMAL_VS),
    ("uv0VS", UV0_VS),
    ("colorVS", COLOR_VS),
    ("basicMainVS", BASIC_MAIN_VS),
    ("litMainVS", LIT_MAIN_VS),
    ("fogPS", FOG_PS),
    ("gammaPS", GAMMA_PS),
    ("tonemapPS", TONEMAP_PS),
    ("alphaTestPS", ALPHA_TEST_PS),
    ("basicDeclPS", BASIC_DECL_PS),
    ("basicMainPS", BASIC_MAIN_PS),
    ("litDeclPS", LIT_DECL_PS),
    ("lightPS", LIGHT_PS),
    ("lightEvalPS", LIGHT_EVAL_PS),
    ("litMainPS", LIT_MAIN_PS),
    ("passPS", PASS_PS),
];

const TRANSFORM_DECL_VS: &str = r"attribute vec3 vertex_position;
uniform mat4 matrix_model;
uniform mat4 matrix_viewProjection;
";

const SKIN_VS: &str = r"attribute vec4 vertex_boneWeights;
attribute vec4 vertex_boneIndices;
uniform vec4 matrix_pose[BONE_VECTORS];

mat4 getBoneMatrix(float index) {
    int base = int(index) * 3;
    vec4 v1 = matrix_pose[base];
    vec4 v2 = matrix_pose[base + 1];
    vec4 v3 = matrix_pose[base + 2];
    return mat4(
        v1.x, v2.x, v3.x, 0.0,
        v1.y, v2.y, v3.y, 0.0,
        v1.z, v2.z, v3.z, 0.0,
        v1.w, v2.w, v3.w, 1.0
    );
}

mat4 getSkinMatrix() {
    return getBoneMatrix(vertex_boneIndices.x) * vertex_boneWeights.x +
           getBoneMatrix(vertex_boneIndices.y) * vertex_boneWeights.y +
           getBoneMatrix(vertex_boneIndices.z) * vertex_boneWeights.z +
           getBoneMatrix(vertex_boneIndices.w) * vertex_boneWeights.w;
}
";

const INSTANCING_VS: &str = r"attribute vec4 instance_line1;
attribute vec4 instance_line2;
attribute vec4 instance_line3;
attribute vec4 instance_line4;
";

const TRANSFORM_VS: &str = r"mat4 getModelMatrix() {
#ifdef SKIN
    return matrix_model * getSkinMatrix();
#elif defined(INSTANCING)
    return mat4(instance_line1, instance_line2, instance_line3, instance_line4);
#else
    return matrix_model;
#endif
}

vec4 getPosition(mat4 modelMatrix) {
#ifdef SCREENSPACE
    return vec4(vertex_position.xy, 0.0, 1.0);
#else
    return matrix_viewProjection * (modelMatrix * vec4(vertex_position, 1.0));
#endif
}
";

const NORMAL_VS: &str = r"attribute vec3 vertex_normal;
uniform mat3 matrix_normal;
varying vec3 vNormalW;
varying vec3 vPositionW;

vec3 getNormal(mat4 modelMatrix) {
#if defined(SKIN) || defined(INSTANCING)
    return normalize(mat3(modelMatrix) * vertex_normal);
#else
    return normalize(matrix_normal * vertex_normal);
#endif
}
";

const UV0_VS: &str = r"attribute vec2 vertex_texCoord0;
varying vec2 vUv0;
";

const COLOR_VS: &str = r"attribute vec4 vertex_color;
varying vec4 vColor;
";

const BASIC_MAIN_VS: &str = r"void main() {
    mat4 modelMatrix = getModelMatrix();
    gl_Position = getPosition(modelMatrix);
#ifdef VERTEX_COLORS
    vColor = vertex_color;
#endif
#ifdef DIFFUSE_MAP
    vUv0 = vertex_texCoord0;
#endif
}
";

const LIT_MAIN_VS: &str = r"void main() {
    mat4 modelMatrix = getModelMatrix();
    gl_Position = getPosition(modelMatrix);
    vPositionW = (modelMatrix * vec4(vertex_position, 1.0)).xyz;
    vNormalW = getNormal(modelMatrix);
#ifdef VERTEX_COLORS
    vColor = vertex_color;
#endif
#ifdef DIFFUSE_MAP
    vUv0 = vertex_texCoord0;
#endif
}
";

const FOG_PS: &str = r"#if defined(FOG_LINEAR)
uniform vec3 fog_color;
uniform float fog_start;
uniform float fog_end;

vec3 addFog(vec3 color) {
    float depth = gl_FragCoord.z / gl_FragCoord.w;
    float fogFactor = clamp((fog_end - depth) / (fog_end - fog_start), 0.0, 1.0);
    return mix(fog_color, color, fogFactor);
}
#elif defined(FOG_EXP)
uniform vec3 fog_color;
uniform float fog_density;

vec3 addFog(vec3 color) {
    float depth = gl_FragCoord.z / gl_FragCoord.w;
    float fogFactor = clamp(exp(-depth * fog_density), 0.0, 1.0);
    return mix(fog_color, color, fogFactor);
}
#elif defined(FOG_EXP2)
uniform vec3 fog_color;
uniform float fog_density;

vec3 addFog(vec3 color) {
    float depth = gl_FragCoord.z / gl_FragCoord.w;
    float fogFactor = clamp(exp(-depth * depth * fog_density * fog_density), 0.0, 1.0);
    return mix(fog_color, color, fogFactor);
}
#else
vec3 addFog(vec3 color) {
    return color;
}
#endif
";

const GAMMA_PS: &str = r"#ifdef GAMMA_SRGB
vec3 gammaCorrectOutput(vec3 color) {
    return pow(color + 0.0000001, vec3(1.0 / 2.2));
}
#else
vec3 gammaCorrectOutput(vec3 color) {
    return color;
}
#endif
";

const TONEMAP_PS: &str = r"#if defined(TONEMAP_FILMIC)
uniform float exposure;

vec3 toneMap(vec3 color) {
    vec3 x = max(vec3(0.0), color * exposure - 0.004);
    return (x * (6.2 * x + 0.5)) / (x * (6.2 * x + 1.7) + 0.06);
}
#elif defined(TONEMAP_ACES)
uniform float exposure;

vec3 toneMap(vec3 color) {
    float tA = 2.51;
    float tB = 0.03;
    float tC = 2.43;
    float tD = 0.59;
    float tE = 0.14;
    vec3 x = color * exposure;
    return clamp((x * (tA * x + tB)) / (x * (tC * x + tD) + tE), 0.0, 1.0);
}
#elif defined(TONEMAP_LINEAR)
uniform float exposure;

vec3 toneMap(vec3 color) {
    return color * exposure;
}
#else
vec3 toneMap(vec3 color) {
    return color;
}
#endif
";

const ALPHA_TEST_PS: &str = r"uniform float alpha_ref;

void alphaTest(float alpha) {
    if (alpha < alpha_ref) {
        discard;
    }
}
";

const BASIC_DECL_PS: &str = r"uniform vec4 uColor;
#ifdef VERTEX_COLORS
varying vec4 vColor;
#endif
#ifdef DIFFUSE_MAP
varying vec2 vUv0;
uniform sampler2D texture_diffuseMap;
#endif
";

const PASS_PS: &str = r"#ifdef PASS_PICK
uniform vec4 pick_color;
#endif

vec4 finalizeColor(vec4 color) {
#if defined(PASS_DEPTH)
    return vec4(vec3(gl_FragCoord.z), 1.0);
#elif defined(PASS_PICK)
    return pick_color;
#else
    return vec4(gammaCorrectOutput(toneMap(addFog(color.rgb))), color.a);
#endif
}
";

const BASIC_MAIN_PS: &str = r"void main() {
    vec4 color = uColor;
#ifdef VERTEX_COLORS
    color *= vColor;
#endif
#ifdef DIFFUSE_MAP
    color *= texture2D(texture_diffuseMap, vUv0);
#endif
#ifdef ALPHA_TEST
    alphaTest(color.a);
#endif
    gl_FragColor = finalizeColor(color);
}
";

const LIT_DECL_PS: &str = r"varying vec3 vPositionW;
varying vec3 vNormalW;
uniform vec3 view_position;
uniform vec3 light_globalAmbient;
uniform vec3 material_diffuse;
uniform float material_opacity;
#ifdef SPECULAR
uniform vec3 material_specular;
uniform float material_gloss;
#endif
#ifdef VERTEX_COLORS
varying vec4 vColor;
#endif
#ifdef DIFFUSE_MAP
varying vec2 vUv0;
uniform sampler2D texture_diffuseMap;
#endif

float specularTerm(vec3 normal, vec3 viewDir, vec3 lightDir) {
#ifdef SPECULAR
    vec3 halfDir = normalize(lightDir + viewDir);
    float power = exp2(material_gloss * 11.0);
    return pow(max(dot(normal, halfDir), 0.0), power);
#else
    return 0.0;
#endif
}
";

const LIGHT_PS: &str = r"#if defined(LIGHT{i}_DIRECTIONAL)
uniform vec3 light{i}_color;
uniform vec3 light{i}_direction;

void addLight{i}(vec3 normal, vec3 viewDir, inout vec3 diffuseLight, inout vec3 specularLight) {
    vec3 lightDir = normalize(-light{i}_direction);
    float ndotl = max(dot(normal, lightDir), 0.0);
    diffuseLight += light{i}_color * ndotl;
    specularLight += light{i}_color * specularTerm(normal, viewDir, lightDir) * ndotl;
}
#elif defined(LIGHT{i}_OMNI)
uniform vec3 light{i}_color;
uniform vec3 light{i}_position;
uniform float light{i}_radius;

void addLight{i}(vec3 normal, vec3 viewDir, inout vec3 diffuseLight, inout vec3 specularLight) {
    vec3 toLight = light{i}_position - vPositionW;
    float distance = length(toLight);
    vec3 lightDir = toLight / max(distance, 0.0001);
    float falloff = clamp(1.0 - distance / light{i}_radius, 0.0, 1.0);
    float ndotl = max(dot(normal, lightDir), 0.0) * falloff * falloff;
    diffuseLight += light{i}_color * ndotl;
    specularLight += light{i}_color * specularTerm(normal, viewDir, lightDir) * ndotl;
}
#elif defined(LIGHT{i}_SPOT)
uniform vec3 light{i}_color;
uniform vec3 light{i}_position;
uniform vec3 light{i}_direction;
uniform float light{i}_radius;
uniform float light{i}_innerConeAngle;
uniform float light{i}_outerConeAngle;

void addLight{i}(vec3 normal, vec3 viewDir, inout vec3 diffuseLight, inout vec3 specularLight) {
    vec3 toLight = light{i}_position - vPositionW;
    float distance = length(toLight);
    vec3 lightDir = toLight / max(distance, 0.0001);
    float falloff = clamp(1.0 - distance / light{i}_radius, 0.0, 1.0);
    float cosAngle = dot(-lightDir, normalize(light{i}_direction));
    float cone = smoothstep(light{i}_outerConeAngle, light{i}_innerConeAngle, cosAngle);
    float ndotl = max(dot(normal, lightDir), 0.0) * falloff * falloff * cone;
    diffuseLight += light{i}_color * ndotl;
    specularLight += light{i}_color * specularTerm(normal, viewDir, lightDir) * ndotl;
}
#endif
";

const LIGHT_EVAL_PS: &str = r"    addLight{i}(normal, viewDir, diffuseLight, specularLight);
";

const LIT_MAIN_PS: &str = r#"void main() {
    vec3 normal = normalize(vNormalW);
#ifdef TWO_SIDED_LIGHTING
    if (!gl_FrontFacing) {
        normal = -normal;
    }
#endif
    vec3 viewDir = normalize(view_position - vPositionW);

    vec4 albedo = vec4(material_diffuse, material_opacity);
#ifdef VERTEX_COLORS
    albedo *= vColor;
#endif
#ifdef DIFFUSE_MAP
    albedo *= texture2D(texture_diffuseMap, vUv0);
#endif
#ifdef ALPHA_TEST
    alphaTest(albedo.a);
#endif

    vec3 diffuseLight = light_globalAmbient;
    vec3 specularLight = vec3(0.0);
#include "lightEvalPS, LIGHT_COUNT"

    vec3 color = albedo.rgb * diffuseLight;
#ifdef SPECULAR
    color += material_specular * specularLight;
#endif
    gl_FragColor = finalizeColor(vec4(color, albedo.a));
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_exposes_every_chunk() {
        let registry = ChunkRegistry::builtin();
        assert_eq!(registry.len(), BUILTIN_CHUNKS.len());
        assert!(registry.get("transformVS").unwrap().contains("getModelMatrix"));
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn overrides_replace_builtins_without_touching_the_registry() {
        let registry = ChunkRegistry::builtin();
        let mut overrides = BTreeMap::new();
        overrides.insert("gammaPS".to_string(), "// custom gamma".to_string());

        let merged = registry.with_overrides(&overrides);
        assert_eq!(merged.get("gammaPS"), Some("// custom gamma"));
        assert_ne!(registry.get("gammaPS"), Some("// custom gamma"));
    }
}
