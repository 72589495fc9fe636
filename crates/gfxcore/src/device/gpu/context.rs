use crate::error::{GraphicsError, Result};

use super::super::types::{BackendKind, PowerPreference};

/// Adapter facts worth logging and reporting through capabilities.
#[derive(Clone, Debug)]
pub(crate) struct AdapterProfile {
    pub name: String,
    pub backend: wgpu::Backend,
    pub device_type: wgpu::DeviceType,
}

impl AdapterProfile {
    fn from_wgpu(info: &wgpu::AdapterInfo) -> Self {
        Self {
            name: info.name.clone(),
            backend: info.backend,
            device_type: info.device_type,
        }
    }

    pub fn is_software(&self) -> bool {
        matches!(self.device_type, wgpu::DeviceType::Cpu)
    }
}

pub(crate) struct GpuContext {
    pub _instance: wgpu::Instance,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub limits: wgpu::Limits,
    pub adapter_profile: AdapterProfile,
}

impl GpuContext {
    /// Requests an adapter and device for `kind`. `WebGpu` maps to the
    /// explicit-API backends and `WebGl2` to wgpu's GL backend.
    pub(crate) async fn new(
        kind: BackendKind,
        power: PowerPreference,
        reject_software: bool,
    ) -> Result<Self> {
        let backends = match kind {
            BackendKind::WebGpu => wgpu::Backends::PRIMARY,
            BackendKind::WebGl2 => wgpu::Backends::GL,
            BackendKind::Null => {
                return Err(GraphicsError::Backend(
                    "the null backend does not use wgpu".to_string(),
                ))
            }
        };
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends,
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
            backend_options: wgpu::BackendOptions::default(),
        });

        let power_preference = match power {
            PowerPreference::Low => wgpu::PowerPreference::LowPower,
            PowerPreference::High => wgpu::PowerPreference::HighPerformance,
        };
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|err| GraphicsError::Backend(format!("no {kind} adapter: {err}")))?;

        let adapter_profile = AdapterProfile::from_wgpu(&adapter.get_info());
        let is_software = adapter_profile.is_software();
        tracing::debug!(
            name = %adapter_profile.name,
            backend = ?adapter_profile.backend,
            device_type = ?adapter_profile.device_type,
            is_software,
            "selected GPU adapter"
        );
        if reject_software && is_software {
            return Err(GraphicsError::Backend(format!(
                "adapter '{}' is a software rasterizer",
                adapter_profile.name
            )));
        }

        let limits = adapter.limits();
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("gfxcore device"),
                required_features: wgpu::Features::empty(),
                required_limits: limits.clone(),
                memory_hints: wgpu::MemoryHints::MemoryUsage,
                trace: wgpu::Trace::default(),
            })
            .await
            .map_err(|err| GraphicsError::Backend(format!("failed to create GPU device: {err}")))?;

        Ok(Self {
            _instance: instance,
            device,
            queue,
            limits,
            adapter_profile,
        })
    }

    /// Runs `build` inside a validation error scope and returns the first
    /// error it raised.
    pub(crate) fn validated<T>(&self, build: impl FnOnce(&wgpu::Device) -> T) -> Result<T, String> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = build(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(err.to_string()),
            None => Ok(value),
        }
    }
}
