use std::collections::BTreeMap;

use serde::Serialize;

use crate::device::Semantic;

/// Unprocessed program description produced by a generator.
///
/// Sources are in the portable chunk dialect and still contain `#include`
/// and conditional directives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ShaderDefinition {
    pub name: String,
    /// Semantic overrides for attribute names the built-in table doesn't know.
    pub attributes: BTreeMap<String, Semantic>,
    pub vshader: String,
    pub fshader: String,
    /// Defines seeded into the preprocessor for both stages.
    pub defines: BTreeMap<String, String>,
}

/// Assembles a stage source from defines and chunk includes.
///
/// Output depends only on the order of calls, so equal inputs produce
/// byte-identical text.
#[derive(Clone, Debug, Default)]
pub struct SourceBuilder {
    defines: Vec<(String, Option<String>)>,
    body: Vec<String>,
}

impl SourceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `#define name` when `enabled`.
    pub fn flag(&mut self, name: &str, enabled: bool) -> &mut Self {
        if enabled {
            self.defines.push((name.to_string(), None));
        }
        self
    }

    pub fn define(&mut self, name: &str, value: impl ToString) -> &mut Self {
        self.defines.push((name.to_string(), Some(value.to_string())));
        self
    }

    pub fn include(&mut self, chunk: &str) -> &mut Self {
        self.body.push(format!("#include \"{chunk}\""));
        self
    }

    pub fn include_if(&mut self, chunk: &str, enabled: bool) -> &mut Self {
        if enabled {
            self.include(chunk);
        }
        self
    }

    /// Includes `chunk` once per value of the integer define `count`.
    pub fn include_repeated(&mut self, chunk: &str, count: &str) -> &mut Self {
        self.body.push(format!("#include \"{chunk}, {count}\""));
        self
    }

    pub fn raw(&mut self, code: &str) -> &mut Self {
        self.body.push(code.trim_end().to_string());
        self
    }

    pub fn build(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.defines {
            match value {
                Some(value) => out.push_str(&format!("#define {name} {value}\n")),
                None => out.push_str(&format!("#define {name}\n")),
            }
        }
        for line in &self.body {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_defines_before_includes() {
        let source = SourceBuilder::new()
            .flag("SKIN", true)
            .flag("INSTANCING", false)
            .define("BONE_VECTORS", 192)
            .include("transformDeclVS")
            .include_if("skinVS", true)
            .include_if("instancingVS", false)
            .include_repeated("lightPS", "LIGHT_COUNT")
            .build();
        assert_eq!(
            source,
            "#define SKIN\n#define BONE_VECTORS 192\n#include \"transformDeclVS\"\n#include \"skinVS\"\n#include \"lightPS, LIGHT_COUNT\"\n"
        );
    }
}
