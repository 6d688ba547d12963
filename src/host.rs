//! CPU emulation of the compute backend.
//!
//! [`HostEnvironment`] runs a kernel's CPU rendition work-group by
//! work-group with the same argument binding rules as the GPU backend.
//! It is what the test-suite drives, and lets the tool run on machines
//! without a usable adapter.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Instant;

use bytemuck::{cast_slice, cast_slice_mut, Pod};

use crate::environment::{ExecutionEnvironment, KernelArg, KernelSource, ParamKind, ProfilingInfo};
use crate::error::{Result, TunerError};
use crate::problem::{WorkGroupShape, WorkSize};

type Memory = Rc<RefCell<Vec<u32>>>;

/// Host memory standing in for a device buffer.  Storage is kept in
/// 32-bit words so every 4-byte element type can be viewed in place.
pub struct HostBuffer {
    label: &'static str,
    len: usize,
    memory: Memory,
    live: Rc<Cell<usize>>,
}

impl HostBuffer {
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        self.live.set(self.live.get().saturating_sub(1));
    }
}

enum BoundArg {
    Buffer {
        label: &'static str,
        len: usize,
        memory: Weak<RefCell<Vec<u32>>>,
    },
    Scalar(u32),
}

enum ResolvedArg {
    Buffer {
        label: &'static str,
        len: usize,
        memory: Memory,
    },
    Scalar(u32),
}

pub struct HostKernel {
    source: KernelSource,
    bound: Option<Vec<BoundArg>>,
}

/// View of one dispatch handed to a kernel's CPU rendition.
pub struct HostLaunch<'a> {
    global: WorkSize,
    local: WorkGroupShape,
    args: &'a [ResolvedArg],
}

impl HostLaunch<'_> {
    fn buffer(&self, index: usize) -> Result<(&'static str, usize, &Memory)> {
        match self.args.get(index) {
            Some(ResolvedArg::Buffer { label, len, memory }) => Ok((*label, *len, memory)),
            Some(ResolvedArg::Scalar(_)) => Err(TunerError::backend(
                "kernel_arg",
                format!("argument {index} is a scalar, expected a buffer"),
            )),
            None => Err(TunerError::backend(
                "kernel_arg",
                format!("argument {index} is not bound"),
            )),
        }
    }

    /// Copy of the buffer bound at `index`.
    pub fn read<T: Pod>(&self, index: usize) -> Result<Vec<T>> {
        let (label, len, memory) = self.buffer(index)?;
        let words = memory.borrow();
        let bytes: &[u8] = &cast_slice::<u32, u8>(words.as_slice())[..len];
        to_elements(label, bytes)
    }

    /// Overwrite the buffer bound at `index`; sizes must match exactly.
    pub fn write<T: Pod>(&self, index: usize, data: &[T]) -> Result<()> {
        let (label, len, memory) = self.buffer(index)?;
        let src: &[u8] = cast_slice(data);
        if src.len() != len {
            return Err(TunerError::backend(
                "kernel_write",
                format!("{label}: wrote {} bytes into a {len} byte buffer", src.len()),
            ));
        }
        let mut words = memory.borrow_mut();
        cast_slice_mut::<u32, u8>(words.as_mut_slice())[..len].copy_from_slice(src);
        Ok(())
    }

    pub fn scalar(&self, index: usize) -> Result<u32> {
        match self.args.get(index) {
            Some(ResolvedArg::Scalar(v)) => Ok(*v),
            _ => Err(TunerError::backend(
                "kernel_arg",
                format!("argument {index} is not a bound scalar"),
            )),
        }
    }

    /// Visit every work-item, one work-group at a time, passing its
    /// global id.
    pub fn for_each_item(&self, mut item: impl FnMut(u32, u32) -> Result<()>) -> Result<()> {
        let (groups_x, groups_y) = self.global.groups(self.local).ok_or_else(|| {
            TunerError::backend(
                "enqueue_kernel",
                format!("local size {} does not divide global size {}", self.local, self.global),
            )
        })?;
        for gy in 0..groups_y {
            for gx in 0..groups_x {
                for ly in 0..self.local.y {
                    for lx in 0..self.local.x {
                        item(gx * self.local.x + lx, gy * self.local.y + ly)?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn to_elements<T: Pod>(label: &str, bytes: &[u8]) -> Result<Vec<T>> {
    let size = std::mem::size_of::<T>();
    if size == 0 || bytes.len() % size != 0 {
        return Err(TunerError::backend(
            "read_buffer",
            format!("{label}: {} bytes is not a whole number of {size}-byte elements", bytes.len()),
        ));
    }
    let mut out = vec![T::zeroed(); bytes.len() / size];
    cast_slice_mut::<T, u8>(&mut out).copy_from_slice(bytes);
    Ok(out)
}

/// CPU backend with host-clock profiling.
pub struct HostEnvironment {
    epoch: Instant,
    live: Rc<Cell<usize>>,
}

impl HostEnvironment {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            live: Rc::new(Cell::new(0)),
        }
    }

    /// Number of buffers created and not yet dropped.
    pub fn live_buffers(&self) -> usize {
        self.live.get()
    }

    fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    fn new_buffer(&self, label: &'static str, bytes: &[u8]) -> HostBuffer {
        let mut words = vec![0u32; bytes.len().div_ceil(4)];
        cast_slice_mut::<u32, u8>(&mut words)[..bytes.len()].copy_from_slice(bytes);
        self.live.set(self.live.get() + 1);
        HostBuffer {
            label,
            len: bytes.len(),
            memory: Rc::new(RefCell::new(words)),
            live: Rc::clone(&self.live),
        }
    }
}

impl Default for HostEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionEnvironment for HostEnvironment {
    type Buffer = HostBuffer;
    type Kernel = HostKernel;

    fn describe(&self) -> String {
        "host (CPU emulation)".to_string()
    }

    fn create_kernel(&self, source: &KernelSource) -> Result<HostKernel> {
        log::debug!("create_kernel({}) success", source.name);
        Ok(HostKernel {
            source: *source,
            bound: None,
        })
    }

    fn upload<T: Pod>(&self, label: &'static str, data: &[T]) -> Result<HostBuffer> {
        let buffer = self.new_buffer(label, cast_slice(data));
        log::debug!("create_buffer({label}) success");
        Ok(buffer)
    }

    fn allocate(&self, label: &'static str, bytes: usize) -> Result<HostBuffer> {
        let buffer = self.new_buffer(label, &vec![0u8; bytes]);
        log::debug!("create_buffer({label}) success");
        Ok(buffer)
    }

    fn set_args(&self, kernel: &mut HostKernel, args: &[KernelArg<'_, HostBuffer>]) -> Result<()> {
        let params = kernel.source.params;
        if args.len() != params.len() {
            return Err(TunerError::backend(
                "set_kernel_arg",
                format!("{} takes {} arguments, got {}", kernel.source.name, params.len(), args.len()),
            ));
        }
        let mut bound = Vec::with_capacity(args.len());
        for (index, (arg, param)) in args.iter().zip(params).enumerate() {
            let value = match (arg, param) {
                (KernelArg::Buffer(b), ParamKind::ReadOnly | ParamKind::WriteOnly) => BoundArg::Buffer {
                    label: b.label,
                    len: b.len,
                    memory: Rc::downgrade(&b.memory),
                },
                (KernelArg::Scalar(v), ParamKind::Scalar) => BoundArg::Scalar(*v),
                (arg, param) => {
                    return Err(TunerError::backend(
                        "set_kernel_arg",
                        format!("argument {index}: {} given for a {param:?} parameter", arg.kind_name()),
                    ))
                }
            };
            bound.push(value);
        }
        kernel.bound = Some(bound);
        log::debug!("set_kernel_arg({}) success", kernel.source.name);
        Ok(())
    }

    fn enqueue(
        &self,
        kernel: &mut HostKernel,
        global: WorkSize,
        local: WorkGroupShape,
    ) -> Result<ProfilingInfo> {
        let queued = self.now_ns();
        if global.groups(local).is_none() {
            return Err(TunerError::backend(
                "enqueue_kernel",
                format!("local size {local} does not divide global size {global}"),
            ));
        }
        let bound = kernel.bound.as_ref().ok_or_else(|| {
            TunerError::backend("enqueue_kernel", format!("{} has no bound arguments", kernel.source.name))
        })?;
        let mut args = Vec::with_capacity(bound.len());
        for arg in bound {
            args.push(match arg {
                BoundArg::Buffer { label, len, memory } => ResolvedArg::Buffer {
                    label: *label,
                    len: *len,
                    memory: memory.upgrade().ok_or_else(|| {
                        TunerError::backend("enqueue_kernel", format!("use of released buffer {label}"))
                    })?,
                },
                BoundArg::Scalar(v) => ResolvedArg::Scalar(*v),
            });
        }
        let submit = self.now_ns();
        let start = self.now_ns();
        let mut launch = HostLaunch {
            global,
            local,
            args: &args,
        };
        (kernel.source.host)(&mut launch)?;
        let end = self.now_ns();
        log::debug!("enqueue_kernel({}) success", kernel.source.name);
        Ok(ProfilingInfo {
            queued,
            submit,
            start,
            end,
        })
    }

    fn read_buffer<T: Pod>(&self, buffer: &HostBuffer) -> Result<Vec<T>> {
        let words = buffer.memory.borrow();
        let bytes: &[u8] = &cast_slice::<u32, u8>(words.as_slice())[..buffer.len];
        let out = to_elements(buffer.label, bytes)?;
        log::debug!("read_buffer({}) success", buffer.label);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: &[ParamKind] = &[ParamKind::ReadOnly, ParamKind::WriteOnly, ParamKind::Scalar];

    // out[i] = in[i] * k, one element per work-item along x.
    fn scale(launch: &mut HostLaunch<'_>) -> Result<()> {
        let input: Vec<f32> = launch.read(0)?;
        let k = launch.scalar(2)? as f32;
        let mut out = vec![0.0f32; input.len()];
        launch.for_each_item(|x, _| {
            out[x as usize] = input[x as usize] * k;
            Ok(())
        })?;
        launch.write(1, &out)
    }

    fn scale_source() -> KernelSource {
        KernelSource {
            name: "scale",
            wgsl: "",
            params: PARAMS,
            host: scale,
        }
    }

    #[test]
    fn dispatch_and_readback() {
        let env = HostEnvironment::new();
        let mut kernel = env.create_kernel(&scale_source()).unwrap();
        let input = env.upload("in", &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        let output = env.allocate("out", 16).unwrap();
        env.set_args(&mut kernel, &[KernelArg::Buffer(&input), KernelArg::Buffer(&output), KernelArg::Scalar(3)])
            .unwrap();
        let timing = env
            .enqueue(&mut kernel, WorkSize { x: 4, y: 1 }, WorkGroupShape::new(2, 1))
            .unwrap();
        assert!(timing.end >= timing.start && timing.start >= timing.submit && timing.submit >= timing.queued);
        assert_eq!(env.read_buffer::<f32>(&output).unwrap(), vec![3.0, 6.0, 9.0, 12.0]);
    }

    #[test]
    fn live_buffer_count_follows_drops() {
        let env = HostEnvironment::new();
        let a = env.upload("a", &[1i32, 2, 3]).unwrap();
        let b = env.allocate("b", 8).unwrap();
        assert_eq!(env.live_buffers(), 2);
        drop(a);
        assert_eq!(env.live_buffers(), 1);
        drop(b);
        assert_eq!(env.live_buffers(), 0);
    }

    #[test]
    fn stale_binding_is_rejected() {
        let env = HostEnvironment::new();
        let mut kernel = env.create_kernel(&scale_source()).unwrap();
        let input = env.upload("in", &[1.0f32; 4]).unwrap();
        let output = env.allocate("out", 16).unwrap();
        env.set_args(&mut kernel, &[KernelArg::Buffer(&input), KernelArg::Buffer(&output), KernelArg::Scalar(1)])
            .unwrap();
        drop(input);
        let err = env
            .enqueue(&mut kernel, WorkSize { x: 4, y: 1 }, WorkGroupShape::new(1, 1))
            .unwrap_err();
        assert!(matches!(err, TunerError::Backend { operation: "enqueue_kernel", .. }), "{err}");
    }

    #[test]
    fn uneven_local_size_fails_dispatch() {
        let env = HostEnvironment::new();
        let mut kernel = env.create_kernel(&scale_source()).unwrap();
        let input = env.upload("in", &[1.0f32; 3]).unwrap();
        let output = env.allocate("out", 12).unwrap();
        env.set_args(&mut kernel, &[KernelArg::Buffer(&input), KernelArg::Buffer(&output), KernelArg::Scalar(1)])
            .unwrap();
        let err = env
            .enqueue(&mut kernel, WorkSize { x: 3, y: 1 }, WorkGroupShape::new(2, 1))
            .unwrap_err();
        assert!(matches!(err, TunerError::Backend { operation: "enqueue_kernel", .. }));
    }

    #[test]
    fn argument_kinds_are_checked() {
        let env = HostEnvironment::new();
        let mut kernel = env.create_kernel(&scale_source()).unwrap();
        let input = env.upload("in", &[1.0f32; 4]).unwrap();
        let err = env
            .set_args(&mut kernel, &[KernelArg::Buffer(&input), KernelArg::Scalar(1), KernelArg::Scalar(1)])
            .unwrap_err();
        assert!(matches!(err, TunerError::Backend { operation: "set_kernel_arg", .. }));
        assert!(env.set_args(&mut kernel, &[KernelArg::Buffer(&input)]).is_err());
    }
}
