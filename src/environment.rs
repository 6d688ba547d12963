//! The compute backend seam.
//!
//! An [`ExecutionEnvironment`] owns a device, a queue and whatever it
//! needs to turn a [`KernelSource`] into something dispatchable.  The
//! tuner only ever talks to this trait, so the same trial pipeline runs
//! on the GPU through [`crate::WgpuEnvironment`] and on the CPU through
//! [`crate::HostEnvironment`].

use bytemuck::Pod;

use crate::error::Result;
use crate::host::HostLaunch;
use crate::problem::{WorkGroupShape, WorkSize};

/// How a kernel parameter is bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    /// Storage buffer the kernel only reads.
    ReadOnly,
    /// Storage buffer the kernel only writes.
    WriteOnly,
    /// A 32-bit scalar.
    Scalar,
}

/// CPU rendition of a kernel, used by the host backend.
pub type HostKernelFn = fn(&mut HostLaunch<'_>) -> Result<()>;

/// Everything a backend needs to build a kernel.
#[derive(Clone, Copy)]
pub struct KernelSource {
    pub name: &'static str,
    /// WGSL with `{{WG_X}}` and `{{WG_Y}}` placeholders for the local
    /// work-group shape.
    pub wgsl: &'static str,
    /// Parameter kinds in binding order.
    pub params: &'static [ParamKind],
    pub host: HostKernelFn,
}

impl KernelSource {
    /// WGSL specialised for one work-group shape.
    pub fn render(&self, local: WorkGroupShape) -> String {
        self.wgsl
            .replace("{{WG_X}}", &local.x.to_string())
            .replace("{{WG_Y}}", &local.y.to_string())
    }
}

/// One bound kernel argument.
pub enum KernelArg<'a, B> {
    Buffer(&'a B),
    Scalar(u32),
}

impl<B> KernelArg<'_, B> {
    pub fn kind_name(&self) -> &'static str {
        match self {
            KernelArg::Buffer(_) => "buffer",
            KernelArg::Scalar(_) => "scalar",
        }
    }
}

/// The four profiling timestamps of one dispatch, in nanoseconds on a
/// single monotonic timeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProfilingInfo {
    pub queued: u64,
    pub submit: u64,
    pub start: u64,
    pub end: u64,
}

impl ProfilingInfo {
    pub fn queued_to_submit(&self) -> u64 {
        self.submit.saturating_sub(self.queued)
    }

    pub fn submit_to_start(&self) -> u64 {
        self.start.saturating_sub(self.submit)
    }

    /// Execution time used for tuning: end − start.
    pub fn execution_ns(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn log_breakdown(&self) {
        log::info!("Time between queued and submit: {}", self.queued_to_submit());
        log::info!("Time between submit and start: {}", self.submit_to_start());
        log::info!("Time between start and end: {}", self.execution_ns());
    }
}

/// A compute backend: buffers, kernels, dispatch and readback.
///
/// Buffers are released when dropped.  Kernel argument bindings are
/// state of the kernel object: `set_args` replaces whatever a previous
/// call bound, and a dispatch uses the most recent bindings.
pub trait ExecutionEnvironment {
    type Buffer;
    type Kernel;

    /// Human-readable description of the device.
    fn describe(&self) -> String;

    fn create_kernel(&self, source: &KernelSource) -> Result<Self::Kernel>;

    /// Read-only buffer initialised from host data.
    fn upload<T: Pod>(&self, label: &'static str, data: &[T]) -> Result<Self::Buffer>;

    /// Write-only, device-allocated buffer of `bytes` bytes.
    fn allocate(&self, label: &'static str, bytes: usize) -> Result<Self::Buffer>;

    /// Bind `args` to the kernel's parameters in order.
    fn set_args(&self, kernel: &mut Self::Kernel, args: &[KernelArg<'_, Self::Buffer>]) -> Result<()>;

    /// Dispatch and block until the device signals completion.
    fn enqueue(
        &self,
        kernel: &mut Self::Kernel,
        global: WorkSize,
        local: WorkGroupShape,
    ) -> Result<ProfilingInfo>;

    /// Copy a buffer back to host memory, blocking.
    fn read_buffer<T: Pod>(&self, buffer: &Self::Buffer) -> Result<Vec<T>>;
}
