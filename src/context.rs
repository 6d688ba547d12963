//! GPU context initialization.
//!
//! This module provides a thin wrapper around wgpu's instance, adapter,
//! device and queue objects.  The `new_blocking` constructor hides the
//! asynchronous nature of requesting an adapter and device by using the
//! [`pollster`] crate.

use wgpu::{Adapter, Device, Instance, Queue};

use crate::error::{Result, TunerError};

/// A GPU context encapsulates all state needed to submit compute work.
///
/// Creating a context picks the default adapter on the system.  If no
/// adapter is available or it does not support compute shaders, an
/// error is returned.  Timestamp queries are enabled when the adapter
/// offers them; without them kernel timings fall back to the host clock.
pub struct GpuContext {
    pub instance: Instance,
    /// The physical device selected for computation.
    pub adapter: Adapter,
    /// Logical device used to create resources and command encoders.
    pub device: Device,
    pub queue: Queue,
    timestamps: bool,
}

impl GpuContext {
    /// Create a new GPU context, blocking the current thread while the
    /// adapter and device requests complete.
    pub fn new_blocking() -> Result<Self> {
        pollster::block_on(Self::new_async())
    }

    pub async fn new_async() -> Result<Self> {
        let instance = Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                ..Default::default()
            })
            .await
            .map_err(|e| TunerError::backend("request_adapter", e.to_string()))?;
        let capabilities = adapter.get_downlevel_capabilities();
        if !capabilities.flags.contains(wgpu::DownlevelFlags::COMPUTE_SHADERS) {
            return Err(TunerError::backend(
                "request_adapter",
                "selected adapter does not support compute shaders",
            ));
        }
        let avail = adapter.features();
        let mut features = wgpu::Features::empty();
        let timestamps = avail.contains(wgpu::Features::TIMESTAMP_QUERY);
        if timestamps {
            features |= wgpu::Features::TIMESTAMP_QUERY;
        } else {
            log::warn!("adapter has no timestamp queries; kernel times use the host clock");
        }
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("conv_autotune_device"),
                required_features: features,
                required_limits: wgpu::Limits::downlevel_defaults(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| TunerError::backend("request_device", e.to_string()))?;
        let info = adapter.get_info();
        log::info!("Device: {} ({:?}, {:?})", info.name, info.device_type, info.backend);

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            timestamps,
        })
    }

    /// Whether compute passes can carry timestamp writes.
    pub fn has_timestamps(&self) -> bool {
        self.timestamps
    }

    /// Block until all submitted work has finished.
    pub fn wait_idle(&self, operation: &'static str) -> Result<()> {
        self.device
            .poll(wgpu::PollType::Wait)
            .map(|_| ())
            .map_err(|e| TunerError::backend(operation, e.to_string()))
    }

    /// Run `f` inside a validation error scope and turn a captured
    /// validation error into a backend error for `operation`.
    pub fn scoped<T>(&self, operation: &'static str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let out = f();
        let captured = pollster::block_on(self.device.pop_error_scope());
        match (out, captured) {
            (Err(e), _) => Err(e),
            (Ok(_), Some(err)) => Err(TunerError::backend(operation, err.to_string())),
            (Ok(v), None) => {
                log::debug!("{operation} success");
                Ok(v)
            }
        }
    }
}
