//! Host backend wrapper that substitutes device timings and can corrupt
//! one output element on readback.

use std::cell::RefCell;
use std::collections::VecDeque;

use bytemuck::Pod;
use wgpu_conv_autotune::environment::{ExecutionEnvironment, KernelArg, KernelSource, ProfilingInfo};
use wgpu_conv_autotune::host::{HostBuffer, HostEnvironment, HostKernel};
use wgpu_conv_autotune::{Result, WorkGroupShape, WorkSize};

#[derive(Default)]
pub struct ScriptedEnvironment {
    pub inner: HostEnvironment,
    timings: RefCell<VecDeque<u64>>,
    corrupt: Option<usize>,
    /// Local shape of every dispatch, in order.
    pub dispatched: RefCell<Vec<WorkGroupShape>>,
    /// Live buffer count observed at each dispatch.
    pub live_at_dispatch: RefCell<Vec<usize>>,
    /// Byte sum of every uploaded `source` tensor.
    pub source_checksums: RefCell<Vec<u64>>,
}

impl ScriptedEnvironment {
    /// Dispatch `i` reports an execution time of `timings[i]` ns.
    pub fn with_timings(timings: &[u64]) -> Self {
        Self {
            timings: RefCell::new(timings.iter().copied().collect()),
            ..Self::default()
        }
    }

    /// Output element `index` reads back 1.0 larger than computed.
    pub fn corrupting(index: usize) -> Self {
        Self {
            corrupt: Some(index),
            ..Self::default()
        }
    }
}

impl ExecutionEnvironment for ScriptedEnvironment {
    type Buffer = HostBuffer;
    type Kernel = HostKernel;

    fn describe(&self) -> String {
        format!("scripted {}", self.inner.describe())
    }

    fn create_kernel(&self, source: &KernelSource) -> Result<HostKernel> {
        self.inner.create_kernel(source)
    }

    fn upload<T: Pod>(&self, label: &'static str, data: &[T]) -> Result<HostBuffer> {
        if label == "source" {
            let sum: u64 = bytemuck::cast_slice::<T, u8>(data).iter().map(|&b| b as u64).sum();
            self.source_checksums.borrow_mut().push(sum);
        }
        self.inner.upload(label, data)
    }

    fn allocate(&self, label: &'static str, bytes: usize) -> Result<HostBuffer> {
        self.inner.allocate(label, bytes)
    }

    fn set_args(&self, kernel: &mut HostKernel, args: &[KernelArg<'_, HostBuffer>]) -> Result<()> {
        self.inner.set_args(kernel, args)
    }

    fn enqueue(&self, kernel: &mut HostKernel, global: WorkSize, local: WorkGroupShape) -> Result<ProfilingInfo> {
        self.dispatched.borrow_mut().push(local);
        self.live_at_dispatch.borrow_mut().push(self.inner.live_buffers());
        let mut timing = self.inner.enqueue(kernel, global, local)?;
        if let Some(ns) = self.timings.borrow_mut().pop_front() {
            timing.end = timing.start + ns;
        }
        Ok(timing)
    }

    fn read_buffer<T: Pod>(&self, buffer: &HostBuffer) -> Result<Vec<T>> {
        let mut out = self.inner.read_buffer::<T>(buffer)?;
        if let (Some(index), "output") = (self.corrupt, buffer.label()) {
            if let Ok(values) = bytemuck::try_cast_slice_mut::<T, f32>(&mut out) {
                values[index] += 1.0;
            }
        }
        Ok(out)
    }
}
