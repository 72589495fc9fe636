use wgpu::util::DeviceExt;

use crate::device::UniformUpload;
use crate::shader::UniformBufferFormat;

/// CPU copy of one program's `ub_program` block.
///
/// Uploads patch the copy; every draw snapshots it into its own buffer so
/// draws already encoded keep the values they were issued with.
pub(crate) struct UniformStaging {
    format: UniformBufferFormat,
    block: Vec<u8>,
}

impl UniformStaging {
    pub fn new(format: UniformBufferFormat) -> Self {
        let block = vec![0; format.size() as usize];
        Self { format, block }
    }

    pub fn is_empty(&self) -> bool {
        self.format.is_empty()
    }

    pub fn size(&self) -> u64 {
        self.block.len() as u64
    }

    pub fn apply(&mut self, uploads: &[UniformUpload]) -> Result<(), String> {
        for upload in uploads {
            self.format.write(upload.slot, &upload.value, &mut self.block)?;
        }
        Ok(())
    }

    pub fn snapshot(&self, device: &wgpu::Device) -> wgpu::Buffer {
        device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("uniform snapshot"),
            contents: &self.block,
            usage: wgpu::BufferUsages::UNIFORM,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::UniformValue;
    use crate::shader::UniformType;

    #[test]
    fn uploads_patch_the_block_in_place() {
        let mut format = UniformBufferFormat::new();
        format.push("uScale", UniformType::Float, None);
        format.push("uColor", UniformType::Vec4, None);
        let mut staging = UniformStaging::new(format);
        assert_eq!(staging.size(), 32);

        staging
            .apply(&[UniformUpload {
                slot: 1,
                name: "uColor".into(),
                value: UniformValue::Vec4([1.0, 0.0, 0.0, 1.0]),
            }])
            .unwrap();
        let color: Vec<f32> = staging.block[16..32]
            .chunks_exact(4)
            .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            .collect();
        assert_eq!(color, vec![1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn mismatched_values_are_rejected() {
        let mut format = UniformBufferFormat::new();
        format.push("uScale", UniformType::Float, None);
        let mut staging = UniformStaging::new(format);
        let result = staging.apply(&[UniformUpload {
            slot: 0,
            name: "uScale".into(),
            value: UniformValue::Vec4([0.0; 4]),
        }]);
        assert!(result.is_err());
    }
}
