//! Typed per-draw option sets for the built-in program families.
//!
//! Options are plain data. Every field has a default, and only fields that
//! differ from the default contribute to a program's generation key, so a new
//! option never changes the keys of variants that don't use it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FogMode {
    #[default]
    None,
    Linear,
    Exp,
    Exp2,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GammaMode {
    #[default]
    None,
    Srgb,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToneMapping {
    #[default]
    None,
    Linear,
    Filmic,
    Aces,
}

/// Which render pass the program is built for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShaderPass {
    #[default]
    Forward,
    Depth,
    Pick,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightKind {
    Directional,
    Omni,
    Spot,
}

/// Options of the unlit `basic` family.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BasicOptions {
    pub skin: bool,
    pub instancing: bool,
    pub screen_space: bool,
    pub vertex_colors: bool,
    pub diffuse_map: bool,
    pub alpha_test: bool,
    pub fog: FogMode,
    pub gamma: GammaMode,
    pub tonemap: ToneMapping,
    pub pass: ShaderPass,
}

impl BasicOptions {
    pub fn skinned() -> Self {
        Self {
            skin: true,
            ..Self::default()
        }
    }
}

/// Options of the `lit` family.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LitOptions {
    pub skin: bool,
    pub instancing: bool,
    pub vertex_colors: bool,
    pub diffuse_map: bool,
    pub alpha_test: bool,
    pub specular: bool,
    pub two_sided_lighting: bool,
    pub fog: FogMode,
    pub gamma: GammaMode,
    pub tonemap: ToneMapping,
    pub pass: ShaderPass,
    /// Lights in evaluation order.
    pub lights: Vec<LightKind>,
}

/// Canonical `name=value` list of the fields of `options` that differ from
/// `O::default()`, sorted by field name.
pub fn non_default_fields<O>(options: &O) -> Result<Vec<(String, String)>, serde_json::Error>
where
    O: Serialize + Default,
{
    let value = serde_json::to_value(options)?;
    let defaults = serde_json::to_value(O::default())?;

    let (Value::Object(fields), Value::Object(defaults)) = (value, defaults) else {
        return Ok(Vec::new());
    };
    let mut changed: Vec<(String, String)> = fields
        .into_iter()
        .filter(|(name, value)| defaults.get(name) != Some(value))
        .map(|(name, value)| (name, render(&value)))
        .collect();
    changed.sort();
    Ok(changed)
}

fn render(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(render).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_no_fields() {
        assert!(non_default_fields(&BasicOptions::default()).unwrap().is_empty());
        assert!(non_default_fields(&LitOptions::default()).unwrap().is_empty());
    }

    #[test]
    fn changed_fields_are_sorted_and_rendered() {
        let options = LitOptions {
            skin: true,
            fog: FogMode::Exp2,
            lights: vec![LightKind::Directional, LightKind::Spot],
            ..LitOptions::default()
        };
        let fields = non_default_fields(&options).unwrap();
        assert_eq!(
            fields,
            vec![
                ("fog".to_string(), "exp2".to_string()),
                ("lights".to_string(), "[directional,spot]".to_string()),
                ("skin".to_string(), "true".to_string()),
            ]
        );
    }

    #[test]
    fn unknown_option_names_are_rejected() {
        let err = serde_json::from_str::<BasicOptions>(r#"{ "skinn": true }"#).unwrap_err();
        assert!(err.to_string().contains("unknown field"));

        let options: BasicOptions = serde_json::from_str(r#"{ "skin": true }"#).unwrap();
        assert_eq!(options, BasicOptions::skinned());
    }
}
