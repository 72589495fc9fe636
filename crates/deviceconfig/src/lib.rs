//! `device.toml`: which backends to try, the canvas size and how program
//! variants are built.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use gfxcore::device::{BackendKind, Canvas, DeviceOptions, PowerPreference, DEFAULT_BONE_LIMIT};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DeviceConfig {
    pub version: u32,
    /// Preference order; the first backend that initialises wins.
    #[serde(
        default = "default_backends",
        deserialize_with = "deserialize_backends"
    )]
    pub backends: Vec<BackendKind>,
    #[serde(default)]
    pub power: PowerPreference,
    #[serde(default)]
    pub reject_software: bool,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_bone_limit")]
    pub bone_limit: u32,
    #[serde(default)]
    pub shaders: ShaderSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ShaderSettings {
    /// Variant list written by `shaderdump`, built when the device starts.
    pub precompile: Option<PathBuf>,
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(
        default,
        deserialize_with = "deserialize_duration_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub slow_compile_warning: Option<Duration>,
}

fn default_backends() -> Vec<BackendKind> {
    vec![BackendKind::WebGpu, BackendKind::WebGl2]
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

fn default_bone_limit() -> u32 {
    DEFAULT_BONE_LIMIT
}

fn deserialize_backends<'de, D>(deserializer: D) -> Result<Vec<BackendKind>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Helper {
        One(String),
        Many(Vec<String>),
    }

    let names = match Helper::deserialize(deserializer)? {
        Helper::One(name) => vec![name],
        Helper::Many(names) => names,
    };
    let mut backends = Vec::with_capacity(names.len());
    for name in names {
        let kind = name.parse::<BackendKind>().map_err(de::Error::custom)?;
        if !backends.contains(&kind) {
            backends.push(kind);
        }
    }
    Ok(backends)
}

fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<Duration>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration in milliseconds or a human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map(Some)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(Duration::from_millis(v)))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_millis(v as u64)))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Duration::try_from_secs_f64(v / 1000.0)
                .map(Some)
                .map_err(|err| E::custom(format!("duration out of range: {err}")))
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(Visitor)
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            version: 1,
            backends: default_backends(),
            power: PowerPreference::default(),
            reject_software: false,
            width: default_width(),
            height: default_height(),
            bone_limit: default_bone_limit(),
            shaders: ShaderSettings::default(),
        }
    }
}

impl DeviceConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: DeviceConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    /// Reads and validates `path`. A relative `shaders.precompile` is taken
    /// relative to the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let input = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&input)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    pub fn resolve_paths(&mut self, base: &Path) {
        if let Some(list) = &self.shaders.precompile {
            if list.is_relative() {
                self.shaders.precompile = Some(base.join(list));
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        if self.backends.is_empty() {
            return Err(ConfigError::Invalid(
                "backends must list at least one backend".into(),
            ));
        }

        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "canvas size {}x{} must be non-zero",
                self.width, self.height
            )));
        }

        if self.bone_limit == 0 {
            return Err(ConfigError::Invalid("bone_limit must be > 0".into()));
        }

        if let Some(list) = &self.shaders.precompile {
            if list.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(
                    "shaders.precompile may not be empty".into(),
                ));
            }
        }

        Ok(())
    }

    pub fn canvas(&self) -> Canvas {
        Canvas::new(self.width, self.height)
    }

    pub fn device_options(&self) -> DeviceOptions {
        DeviceOptions {
            backends: self.backends.clone(),
            power_preference: self.power,
            fail_if_major_performance_caveat: self.reject_software,
            bone_limit: self.bone_limit,
            slow_compile_threshold: self.shaders.slow_compile_warning,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version = 1
backends = ["wgpu", "gl", "headless"]
power = "low"
reject_software = true
width = 640
height = 480
bone_limit = 32

[shaders]
precompile = "variants.json"
fail_fast = true
slow_compile_warning = "250ms"
"#;

    #[test]
    fn parses_sample_config() {
        let config = DeviceConfig::from_toml_str(SAMPLE).expect("parse config");
        assert_eq!(
            config.backends,
            vec![BackendKind::WebGpu, BackendKind::WebGl2, BackendKind::Null]
        );
        assert_eq!(config.power, PowerPreference::Low);
        assert_eq!(config.canvas(), Canvas::new(640, 480));
        assert_eq!(config.shaders.precompile, Some(PathBuf::from("variants.json")));
        assert_eq!(
            config.shaders.slow_compile_warning,
            Some(Duration::from_millis(250))
        );

        let options = config.device_options();
        assert!(options.fail_if_major_performance_caveat);
        assert_eq!(options.bone_limit, 32);
        assert_eq!(options.slow_compile_threshold, Some(Duration::from_millis(250)));
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config = DeviceConfig::from_toml_str("version = 1\n").unwrap();
        assert_eq!(config, DeviceConfig::default());
        assert_eq!(config.bone_limit, DEFAULT_BONE_LIMIT);
        assert!(!config.shaders.fail_fast);
    }

    #[test]
    fn single_backend_string_is_accepted() {
        let config = DeviceConfig::from_toml_str("version = 1\nbackends = \"null\"\n").unwrap();
        assert_eq!(config.backends, vec![BackendKind::Null]);
    }

    #[test]
    fn duplicate_backends_collapse() {
        let source = "version = 1\nbackends = [\"webgpu\", \"wgpu\"]\n";
        let config = DeviceConfig::from_toml_str(source).unwrap();
        assert_eq!(config.backends, vec![BackendKind::WebGpu]);
    }

    #[test]
    fn numeric_durations_are_milliseconds() {
        let config = DeviceConfig::from_toml_str(
            "version = 1\n[shaders]\nslow_compile_warning = 40\n",
        )
        .unwrap();
        assert_eq!(
            config.shaders.slow_compile_warning,
            Some(Duration::from_millis(40))
        );
    }

    #[test]
    fn fractional_durations_must_be_finite_and_non_negative() {
        let config = DeviceConfig::from_toml_str(
            "version = 1\n[shaders]\nslow_compile_warning = 62.5\n",
        )
        .unwrap();
        assert_eq!(
            config.shaders.slow_compile_warning,
            Some(Duration::from_micros(62_500))
        );

        for value in ["inf", "nan", "-5.0", "1e300"] {
            let source = format!("version = 1\n[shaders]\nslow_compile_warning = {value}\n");
            let err = DeviceConfig::from_toml_str(&source).unwrap_err();
            assert!(matches!(err, ConfigError::Parse(_)), "{value}: {err}");
        }
    }

    #[test]
    fn rejects_unknown_backend() {
        let err =
            DeviceConfig::from_toml_str("version = 1\nbackends = [\"vulkan\"]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("vulkan"));
    }

    #[test]
    fn rejects_invalid_values() {
        for input in [
            "version = 2\n",
            "version = 1\nbackends = []\n",
            "version = 1\nwidth = 0\n",
            "version = 1\nbone_limit = 0\n",
        ] {
            let err = DeviceConfig::from_toml_str(input).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{input}: {err}");
        }
    }

    #[test]
    fn relative_precompile_paths_follow_the_config_file() {
        let mut config = DeviceConfig::from_toml_str(SAMPLE).unwrap();
        config.resolve_paths(Path::new("/etc/gfx"));
        assert_eq!(
            config.shaders.precompile,
            Some(PathBuf::from("/etc/gfx/variants.json"))
        );

        config.shaders.precompile = Some(PathBuf::from("/abs/list.json"));
        config.resolve_paths(Path::new("/etc/gfx"));
        assert_eq!(config.shaders.precompile, Some(PathBuf::from("/abs/list.json")));
    }

    #[test]
    fn load_reports_missing_files() {
        let err = DeviceConfig::load(Path::new("/nonexistent/device.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
