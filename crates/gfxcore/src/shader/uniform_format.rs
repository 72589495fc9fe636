//! std140 layout of a program's loose uniforms.
//!
//! The WebGPU-style target gathers every non-sampler uniform into one block;
//! this module computes that block's layout and packs [`UniformValue`]s into
//! it. The WebGL-style target uses the same field list for per-uniform
//! upload bookkeeping.

use std::fmt;

use serde::Serialize;

use crate::scope::UniformValue;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UniformType {
    Int,
    Float,
    Vec2,
    Vec3,
    Vec4,
    IVec2,
    IVec3,
    IVec4,
    Mat3,
    Mat4,
}

impl UniformType {
    pub fn from_glsl(name: &str) -> Option<Self> {
        Some(match name {
            "int" => UniformType::Int,
            "float" => UniformType::Float,
            "vec2" => UniformType::Vec2,
            "vec3" => UniformType::Vec3,
            "vec4" => UniformType::Vec4,
            "ivec2" => UniformType::IVec2,
            "ivec3" => UniformType::IVec3,
            "ivec4" => UniformType::IVec4,
            "mat3" => UniformType::Mat3,
            "mat4" => UniformType::Mat4,
            _ => return None,
        })
    }

    pub fn glsl_name(&self) -> &'static str {
        match self {
            UniformType::Int => "int",
            UniformType::Float => "float",
            UniformType::Vec2 => "vec2",
            UniformType::Vec3 => "vec3",
            UniformType::Vec4 => "vec4",
            UniformType::IVec2 => "ivec2",
            UniformType::IVec3 => "ivec3",
            UniformType::IVec4 => "ivec4",
            UniformType::Mat3 => "mat3",
            UniformType::Mat4 => "mat4",
        }
    }

    /// `(alignment, size)` of a single element under std140.
    fn std140(&self) -> (u32, u32) {
        match self {
            UniformType::Int | UniformType::Float => (4, 4),
            UniformType::Vec2 | UniformType::IVec2 => (8, 8),
            UniformType::Vec3 | UniformType::IVec3 => (16, 12),
            UniformType::Vec4 | UniformType::IVec4 => (16, 16),
            UniformType::Mat3 => (16, 48),
            UniformType::Mat4 => (16, 64),
        }
    }
}

impl fmt::Display for UniformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.glsl_name())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UniformField {
    pub name: String,
    pub ty: UniformType,
    pub array_len: Option<u32>,
    pub offset: u32,
    pub size: u32,
}

impl UniformField {
    /// Declaration as it appears inside a GLSL block or as a loose uniform.
    pub fn declaration(&self) -> String {
        match self.array_len {
            Some(len) => format!("{} {}[{len}];", self.ty, self.name),
            None => format!("{} {};", self.ty, self.name),
        }
    }
}

/// Ordered std140 block description.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct UniformBufferFormat {
    fields: Vec<UniformField>,
    size: u32,
}

impl UniformBufferFormat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field and returns its index.
    pub fn push(&mut self, name: &str, ty: UniformType, array_len: Option<u32>) -> usize {
        let (align, size) = match array_len {
            Some(len) => {
                let stride = ty.std140().1.next_multiple_of(16);
                (16, stride * len)
            }
            None => ty.std140(),
        };
        let offset = self.size.next_multiple_of(align);
        self.fields.push(UniformField {
            name: name.to_string(),
            ty,
            array_len,
            offset,
            size,
        });
        self.size = offset + size;
        self.fields.len() - 1
    }

    pub fn fields(&self) -> &[UniformField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&UniformField> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Block size rounded up to a whole vec4.
    pub fn size(&self) -> u32 {
        self.size.next_multiple_of(16).max(16)
    }

    /// Packs `value` into `block` at field `index`.
    ///
    /// Array fields accept shorter inputs; extra elements are ignored.
    pub fn write(
        &self,
        index: usize,
        value: &UniformValue,
        block: &mut [u8],
    ) -> Result<(), String> {
        let field = self
            .fields
            .get(index)
            .ok_or_else(|| format!("uniform slot {index} out of range"))?;
        if block.len() < (field.offset + field.size) as usize {
            return Err(format!(
                "uniform block of {} bytes cannot hold '{}'",
                block.len(),
                field.name
            ));
        }
        let offset = field.offset as usize;

        match (field.ty, field.array_len, value) {
            (UniformType::Float, None, UniformValue::Float(v)) => put_f32(block, offset, &[*v]),
            (UniformType::Int, None, UniformValue::Int(v)) => put_i32(block, offset, &[*v]),
            (UniformType::Int, None, UniformValue::Bool(v)) => {
                put_i32(block, offset, &[i32::from(*v)])
            }
            (UniformType::Vec2, None, UniformValue::Vec2(v)) => put_f32(block, offset, v),
            (UniformType::Vec3, None, UniformValue::Vec3(v)) => put_f32(block, offset, v),
            (UniformType::Vec4, None, UniformValue::Vec4(v)) => put_f32(block, offset, v),
            (UniformType::IVec2, None, UniformValue::IVec2(v)) => put_i32(block, offset, v),
            (UniformType::IVec3, None, UniformValue::IVec3(v)) => put_i32(block, offset, v),
            (UniformType::IVec4, None, UniformValue::IVec4(v)) => put_i32(block, offset, v),
            (UniformType::Mat3, None, UniformValue::Mat3(m)) => {
                for column in 0..3 {
                    put_f32(block, offset + column * 16, &m[column * 3..column * 3 + 3]);
                }
            }
            (UniformType::Mat4, None, UniformValue::Mat4(m)) => put_f32(block, offset, m),
            (UniformType::Float, Some(len), UniformValue::FloatArray(values)) => {
                for (i, v) in values.iter().take(len as usize).enumerate() {
                    put_f32(block, offset + i * 16, &[*v]);
                }
            }
            (UniformType::Vec4, Some(len), UniformValue::Vec4Array(values)) => {
                for (i, v) in values.iter().take(len as usize).enumerate() {
                    put_f32(block, offset + i * 16, v);
                }
            }
            (UniformType::Vec4, Some(len), UniformValue::FloatArray(values)) => {
                for (i, chunk) in values.chunks(4).take(len as usize).enumerate() {
                    put_f32(block, offset + i * 16, chunk);
                }
            }
            (UniformType::Mat4, Some(len), UniformValue::Mat4Array(values)) => {
                for (i, m) in values.iter().take(len as usize).enumerate() {
                    put_f32(block, offset + i * 64, m);
                }
            }
            (ty, array_len, other) => {
                let expected = match array_len {
                    Some(len) => format!("{ty}[{len}]"),
                    None => ty.to_string(),
                };
                return Err(format!(
                    "uniform '{}' expects {expected}, got {}",
                    field.name,
                    other.type_name()
                ));
            }
        }
        Ok(())
    }
}

fn put_f32(block: &mut [u8], offset: usize, values: &[f32]) {
    let bytes: &[u8] = bytemuck::cast_slice(values);
    block[offset..offset + bytes.len()].copy_from_slice(bytes);
}

fn put_i32(block: &mut [u8], offset: usize, values: &[i32]) {
    let bytes: &[u8] = bytemuck::cast_slice(values);
    block[offset..offset + bytes.len()].copy_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_f32(block: &[u8], offset: usize) -> f32 {
        f32::from_ne_bytes(block[offset..offset + 4].try_into().unwrap())
    }

    #[test]
    fn std140_offsets_follow_alignment_rules() {
        let mut format = UniformBufferFormat::new();
        format.push("a", UniformType::Float, None);
        format.push("b", UniformType::Vec3, None);
        format.push("c", UniformType::Float, None);
        format.push("d", UniformType::Vec2, None);
        format.push("e", UniformType::Mat3, None);
        format.push("f", UniformType::Float, Some(3));

        let offsets: Vec<u32> = format.fields().iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 16, 28, 32, 48, 96]);
        assert_eq!(format.size(), 144);
    }

    #[test]
    fn writes_values_at_their_offsets() {
        let mut format = UniformBufferFormat::new();
        format.push("opacity", UniformType::Float, None);
        let color = format.push("uColor", UniformType::Vec4, None);
        let mut block = vec![0u8; format.size() as usize];

        format
            .write(color, &UniformValue::Vec4([1.0, 0.0, 0.0, 1.0]), &mut block)
            .unwrap();
        assert_eq!(read_f32(&block, 16), 1.0);
        assert_eq!(read_f32(&block, 28), 1.0);
    }

    #[test]
    fn mat3_columns_are_padded() {
        let mut format = UniformBufferFormat::new();
        let index = format.push("matrix_normal", UniformType::Mat3, None);
        let mut block = vec![0u8; format.size() as usize];
        let m = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        format.write(index, &UniformValue::Mat3(m), &mut block).unwrap();
        assert_eq!(read_f32(&block, 16), 4.0);
        assert_eq!(read_f32(&block, 32), 7.0);
        assert_eq!(read_f32(&block, 12), 0.0);
    }

    #[test]
    fn float_arrays_fill_vec4_arrays() {
        let mut format = UniformBufferFormat::new();
        let index = format.push("matrix_pose", UniformType::Vec4, Some(2));
        let mut block = vec![0u8; format.size() as usize];
        let values: Vec<f32> = (0..8).map(|v| v as f32).collect();
        format
            .write(index, &UniformValue::FloatArray(values), &mut block)
            .unwrap();
        assert_eq!(read_f32(&block, 16), 4.0);
        assert_eq!(read_f32(&block, 28), 7.0);
    }

    #[test]
    fn type_mismatch_is_reported() {
        let mut format = UniformBufferFormat::new();
        let index = format.push("uColor", UniformType::Vec4, None);
        let mut block = vec![0u8; format.size() as usize];
        let err = format
            .write(index, &UniformValue::Float(1.0), &mut block)
            .unwrap_err();
        assert!(err.contains("expects vec4"));
    }
}
