//! Named uniform slots and the namespaces that own them.
//!
//! High-level code resolves a [`ScopeId`] once (`"matrix_model"`,
//! `"material_diffuse"`, …) and keeps the handle around; every `set_value`
//! bumps the slot's [`Version`] so the device can skip uploads whose value
//! has not been touched since the previous draw.

use std::cell::{Ref, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde::{Serialize, Serializer};

use crate::device::Texture;
use crate::version::{Version, VersionedObject};

/// Value a scope slot can hold.
///
/// Plain data compares by value; textures compare by handle identity.
#[derive(Clone, Debug, PartialEq)]
pub enum UniformValue {
    Bool(bool),
    Int(i32),
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    IVec2([i32; 2]),
    IVec3([i32; 3]),
    IVec4([i32; 4]),
    Mat3([f32; 9]),
    Mat4([f32; 16]),
    FloatArray(Vec<f32>),
    Vec4Array(Vec<[f32; 4]>),
    Mat4Array(Vec<[f32; 16]>),
    Texture(Texture),
}

impl UniformValue {
    pub fn as_texture(&self) -> Option<&Texture> {
        match self {
            UniformValue::Texture(texture) => Some(texture),
            _ => None,
        }
    }

    /// Short type name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            UniformValue::Bool(_) => "bool",
            UniformValue::Int(_) => "int",
            UniformValue::Float(_) => "float",
            UniformValue::Vec2(_) => "vec2",
            UniformValue::Vec3(_) => "vec3",
            UniformValue::Vec4(_) => "vec4",
            UniformValue::IVec2(_) => "ivec2",
            UniformValue::IVec3(_) => "ivec3",
            UniformValue::IVec4(_) => "ivec4",
            UniformValue::Mat3(_) => "mat3",
            UniformValue::Mat4(_) => "mat4",
            UniformValue::FloatArray(_) => "float[]",
            UniformValue::Vec4Array(_) => "vec4[]",
            UniformValue::Mat4Array(_) => "mat4[]",
            UniformValue::Texture(_) => "sampler2D",
        }
    }
}

impl From<bool> for UniformValue {
    fn from(value: bool) -> Self {
        UniformValue::Bool(value)
    }
}

impl From<i32> for UniformValue {
    fn from(value: i32) -> Self {
        UniformValue::Int(value)
    }
}

impl From<f32> for UniformValue {
    fn from(value: f32) -> Self {
        UniformValue::Float(value)
    }
}

impl From<[f32; 2]> for UniformValue {
    fn from(value: [f32; 2]) -> Self {
        UniformValue::Vec2(value)
    }
}

impl From<[f32; 3]> for UniformValue {
    fn from(value: [f32; 3]) -> Self {
        UniformValue::Vec3(value)
    }
}

impl From<[f32; 4]> for UniformValue {
    fn from(value: [f32; 4]) -> Self {
        UniformValue::Vec4(value)
    }
}

impl From<[f32; 9]> for UniformValue {
    fn from(value: [f32; 9]) -> Self {
        UniformValue::Mat3(value)
    }
}

impl From<[f32; 16]> for UniformValue {
    fn from(value: [f32; 16]) -> Self {
        UniformValue::Mat4(value)
    }
}

impl From<Vec<f32>> for UniformValue {
    fn from(value: Vec<f32>) -> Self {
        UniformValue::FloatArray(value)
    }
}

impl From<Texture> for UniformValue {
    fn from(value: Texture) -> Self {
        UniformValue::Texture(value)
    }
}

impl From<&Texture> for UniformValue {
    fn from(value: &Texture) -> Self {
        UniformValue::Texture(value.clone())
    }
}

struct ScopeSlot {
    name: String,
    value: RefCell<Option<UniformValue>>,
    version: VersionedObject,
}

/// Shared handle to one named slot inside a [`ScopeSpace`].
///
/// Clones refer to the same slot.
#[derive(Clone)]
pub struct ScopeId {
    slot: Rc<ScopeSlot>,
}

impl ScopeId {
    fn new(name: &str) -> Self {
        Self {
            slot: Rc::new(ScopeSlot {
                name: name.to_string(),
                value: RefCell::new(None),
                version: VersionedObject::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.slot.name
    }

    /// Stores `value` and advances the version, even if the value is equal to
    /// the current one.
    pub fn set_value(&self, value: impl Into<UniformValue>) {
        *self.slot.value.borrow_mut() = Some(value.into());
        self.slot.version.increment();
    }

    /// Returns a copy of the current value, `None` when never set or cleared.
    pub fn value(&self) -> Option<UniformValue> {
        self.slot.value.borrow().clone()
    }

    /// Borrows the current value without cloning array payloads.
    pub fn value_ref(&self) -> Ref<'_, Option<UniformValue>> {
        self.slot.value.borrow()
    }

    pub fn is_set(&self) -> bool {
        self.slot.value.borrow().is_some()
    }

    pub fn version(&self) -> Version {
        self.slot.version.version()
    }

    pub fn ptr_eq(&self, other: &ScopeId) -> bool {
        Rc::ptr_eq(&self.slot, &other.slot)
    }

    fn clear_value(&self) {
        *self.slot.value.borrow_mut() = None;
    }
}

impl fmt::Debug for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeId")
            .field("name", &self.slot.name)
            .field("version", &self.version())
            .field("set", &self.is_set())
            .finish()
    }
}

/// Scope slots hold transient GPU state and always serialize as `null`.
impl Serialize for ScopeId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_none()
    }
}

/// Namespace of [`ScopeId`]s; the device owns one named `"Device"`.
pub struct ScopeSpace {
    name: String,
    variables: RefCell<HashMap<String, ScopeId>>,
}

impl ScopeSpace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variables: RefCell::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the slot registered under `name`, creating it on first use.
    pub fn resolve(&self, name: &str) -> ScopeId {
        if let Some(existing) = self.variables.borrow().get(name) {
            return existing.clone();
        }
        let id = ScopeId::new(name);
        self.variables
            .borrow_mut()
            .insert(name.to_string(), id.clone());
        id
    }

    /// Looks up a slot without creating it.
    pub fn find(&self, name: &str) -> Option<ScopeId> {
        self.variables.borrow().get(name).cloned()
    }

    /// Clears every slot currently holding `value`. Versions are left alone,
    /// so a later draw sees the slot as unset rather than as changed.
    pub fn remove_value(&self, value: &UniformValue) -> usize {
        let mut cleared = 0;
        for id in self.variables.borrow().values() {
            let matches = id.value_ref().as_ref() == Some(value);
            if matches {
                id.clear_value();
                cleared += 1;
            }
        }
        cleared
    }

    pub fn len(&self) -> usize {
        self.variables.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.borrow().is_empty()
    }
}

impl fmt::Debug for ScopeSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeSpace")
            .field("name", &self.name)
            .field("variables", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_returns_the_same_slot() {
        let space = ScopeSpace::new("Device");
        let a = space.resolve("matrix_model");
        let b = space.resolve("matrix_model");
        assert!(a.ptr_eq(&b));
        assert_eq!(space.len(), 1);

        let c = space.resolve("matrix_view");
        assert!(!a.ptr_eq(&c));
        assert_eq!(space.len(), 2);
    }

    #[test]
    fn set_value_always_bumps_revision() {
        let space = ScopeSpace::new("Device");
        let id = space.resolve("material_opacity");
        let before = id.version();

        id.set_value(0.5f32);
        assert_eq!(id.value(), Some(UniformValue::Float(0.5)));
        assert_eq!(id.version().revision, before.revision + 1);

        id.set_value(0.5f32);
        assert_eq!(id.version().revision, before.revision + 2);
        assert_eq!(id.version().global_id, before.global_id);
    }

    #[test]
    fn unset_slot_reports_none() {
        let space = ScopeSpace::new("Device");
        let id = space.resolve("fog_density");
        assert!(id.value().is_none());
        assert!(!id.is_set());
    }

    #[test]
    fn remove_value_clears_matches_without_version_change() {
        let space = ScopeSpace::new("Device");
        let a = space.resolve("a");
        let b = space.resolve("b");
        let c = space.resolve("c");
        a.set_value([1.0f32, 0.0, 0.0, 1.0]);
        b.set_value([1.0f32, 0.0, 0.0, 1.0]);
        c.set_value(2.0f32);

        let before = a.version();
        let cleared = space.remove_value(&UniformValue::Vec4([1.0, 0.0, 0.0, 1.0]));
        assert_eq!(cleared, 2);
        assert!(a.value().is_none());
        assert!(b.value().is_none());
        assert_eq!(c.value(), Some(UniformValue::Float(2.0)));
        assert_eq!(a.version(), before);

        assert_eq!(space.remove_value(&UniformValue::Int(7)), 0);
    }

    #[test]
    fn scope_ids_serialize_as_null() {
        let space = ScopeSpace::new("Device");
        let id = space.resolve("camera_params");
        id.set_value([1.0f32, 2.0, 3.0, 4.0]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "null");
    }
}
