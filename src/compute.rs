//! wgpu implementation of [`ExecutionEnvironment`].
//!
//! WGSL fixes the work-group size at shader compile time, so a kernel
//! keeps one compute pipeline per local shape, compiled the first time
//! that shape is dispatched.  Arguments live in a bind group owned by
//! the kernel; scalars are carried in small uniform buffers.
//!
//! Kernel timing comes from compute-pass timestamp queries when the
//! device supports them.  The device interval is placed on the host
//! timeline by anchoring its end to the instant the host observed
//! completion, which keeps all four profiling timestamps comparable.

use std::collections::HashMap;
use std::time::Instant;

use bytemuck::Pod;

use crate::buffer::GpuBuffer;
use crate::context::GpuContext;
use crate::environment::{ExecutionEnvironment, KernelArg, KernelSource, ParamKind, ProfilingInfo};
use crate::error::{Result, TunerError};
use crate::problem::{WorkGroupShape, WorkSize};

pub struct WgpuKernel {
    source: KernelSource,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: HashMap<WorkGroupShape, wgpu::ComputePipeline>,
    bind_group: Option<wgpu::BindGroup>,
    /// Keeps the uniforms behind scalar bindings alive; dropping them
    /// destroys the buffers.
    _scalars: Vec<GpuBuffer>,
}

/// A pair of timestamp queries around one compute pass.
struct PassTimestamps {
    set: wgpu::QuerySet,
    resolve: GpuBuffer,
}

impl PassTimestamps {
    fn new(context: &GpuContext) -> Self {
        let set = context.device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("kernel_timestamps"),
            ty: wgpu::QueryType::Timestamp,
            count: 2,
        });
        let resolve = GpuBuffer::new_query_resolve(context, "kernel_timestamps_resolve", 2 * std::mem::size_of::<u64>());
        Self { set, resolve }
    }

    fn writes(&self) -> wgpu::ComputePassTimestampWrites<'_> {
        wgpu::ComputePassTimestampWrites {
            query_set: &self.set,
            beginning_of_pass_write_index: Some(0),
            end_of_pass_write_index: Some(1),
        }
    }

    fn resolve(&self, encoder: &mut wgpu::CommandEncoder) {
        encoder.resolve_query_set(&self.set, 0..2, &self.resolve.buffer, 0);
    }

    /// Pass duration in nanoseconds.
    fn elapsed_ns(&self, context: &GpuContext) -> Result<u64> {
        let ticks: Vec<u64> = self.resolve.read_to_vec(context)?;
        let [begin, end] = ticks[..] else {
            return Err(TunerError::backend("get_event_profiling_info", format!("expected 2 timestamps, got {}", ticks.len())));
        };
        let period = context.queue.get_timestamp_period() as f64;
        Ok((end.saturating_sub(begin) as f64 * period) as u64)
    }
}

/// Compute backend running on the default wgpu adapter.
pub struct WgpuEnvironment {
    context: GpuContext,
    epoch: Instant,
}

impl WgpuEnvironment {
    pub fn new() -> Result<Self> {
        Ok(Self::from_context(GpuContext::new_blocking()?))
    }

    pub fn from_context(context: GpuContext) -> Self {
        Self {
            context,
            epoch: Instant::now(),
        }
    }

    fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    fn ensure_pipeline(&self, kernel: &mut WgpuKernel, local: WorkGroupShape) -> Result<()> {
        if kernel.pipelines.contains_key(&local) {
            return Ok(());
        }
        let device = &self.context.device;
        let wgsl = kernel.source.render(local);
        let name = kernel.source.name;
        let layout = &kernel.pipeline_layout;
        let pipeline = self.context.scoped("create_pipeline", || {
            // The work-group size is part of the shader text, so every
            // local shape gets its own module and pipeline.
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(name),
                source: wgpu::ShaderSource::Wgsl(wgsl.into()),
            });
            Ok(device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(name),
                layout: Some(layout),
                module: &module,
                entry_point: Some(name),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            }))
        })?;
        log::debug!("compiled {name} for local size {local}");
        kernel.pipelines.insert(local, pipeline);
        Ok(())
    }
}

fn layout_entry(binding: u32, kind: ParamKind) -> wgpu::BindGroupLayoutEntry {
    let ty = match kind {
        ParamKind::ReadOnly => wgpu::BufferBindingType::Storage { read_only: true },
        ParamKind::WriteOnly => wgpu::BufferBindingType::Storage { read_only: false },
        ParamKind::Scalar => wgpu::BufferBindingType::Uniform,
    };
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl ExecutionEnvironment for WgpuEnvironment {
    type Buffer = GpuBuffer;
    type Kernel = WgpuKernel;

    fn describe(&self) -> String {
        let info = self.context.adapter.get_info();
        format!("{} ({:?})", info.name, info.backend)
    }

    fn create_kernel(&self, source: &KernelSource) -> Result<WgpuKernel> {
        let device = &self.context.device;
        let (bind_group_layout, pipeline_layout) = self.context.scoped("create_kernel", || {
            let entries: Vec<_> = source
                .params
                .iter()
                .enumerate()
                .map(|(i, kind)| layout_entry(i as u32, *kind))
                .collect();
            // One entry per kernel parameter, in argument order.
            let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(source.name),
                entries: &entries,
            });
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(source.name),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });
            Ok((bind_group_layout, pipeline_layout))
        })?;
        Ok(WgpuKernel {
            source: *source,
            bind_group_layout,
            pipeline_layout,
            pipelines: HashMap::new(),
            bind_group: None,
            _scalars: Vec::new(),
        })
    }

    fn upload<T: Pod>(&self, label: &'static str, data: &[T]) -> Result<GpuBuffer> {
        self.context
            .scoped("create_buffer", || Ok(GpuBuffer::from_slice(&self.context, label, data)))
    }

    fn allocate(&self, label: &'static str, bytes: usize) -> Result<GpuBuffer> {
        self.context
            .scoped("create_buffer", || Ok(GpuBuffer::new_output(&self.context, label, bytes)))
    }

    fn set_args(&self, kernel: &mut WgpuKernel, args: &[KernelArg<'_, GpuBuffer>]) -> Result<()> {
        let params = kernel.source.params;
        if args.len() != params.len() {
            return Err(TunerError::backend(
                "set_kernel_arg",
                format!("{} takes {} arguments, got {}", kernel.source.name, params.len(), args.len()),
            ));
        }
        for (index, (arg, param)) in args.iter().zip(params).enumerate() {
            match (arg, param) {
                (KernelArg::Buffer(_), ParamKind::ReadOnly | ParamKind::WriteOnly) => {}
                (KernelArg::Scalar(_), ParamKind::Scalar) => {}
                (arg, param) => {
                    return Err(TunerError::backend(
                        "set_kernel_arg",
                        format!("argument {index}: {} given for a {param:?} parameter", arg.kind_name()),
                    ))
                }
            }
        }

        let (bind_group, scalars) = self.context.scoped("set_kernel_arg", || {
            // Scalars have no buffer of their own; give each a uniform.
            let scalars: Vec<GpuBuffer> = args
                .iter()
                .filter_map(|arg| match arg {
                    KernelArg::Scalar(v) => Some(GpuBuffer::new_scalar(&self.context, "scalar_arg", *v)),
                    KernelArg::Buffer(_) => None,
                })
                .collect();
            let mut scalar_iter = scalars.iter();
            let mut entries = Vec::with_capacity(args.len());
            for (index, arg) in args.iter().enumerate() {
                let buffer = match arg {
                    KernelArg::Buffer(b) => &b.buffer,
                    KernelArg::Scalar(_) => match scalar_iter.next() {
                        Some(s) => &s.buffer,
                        None => return Err(TunerError::backend("set_kernel_arg", "scalar bookkeeping")),
                    },
                };
                entries.push(wgpu::BindGroupEntry {
                    binding: index as u32,
                    resource: buffer.as_entire_binding(),
                });
            }
            // Replaces any previous bind group, so a trial never sees the
            // previous trial's buffers.
            let bind_group = self.context.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(kernel.source.name),
                layout: &kernel.bind_group_layout,
                entries: &entries,
            });
            drop(entries);
            Ok((bind_group, scalars))
        })?;
        kernel.bind_group = Some(bind_group);
        kernel._scalars = scalars;
        Ok(())
    }

    fn enqueue(
        &self,
        kernel: &mut WgpuKernel,
        global: WorkSize,
        local: WorkGroupShape,
    ) -> Result<ProfilingInfo> {
        let (groups_x, groups_y) = global.groups(local).ok_or_else(|| {
            TunerError::backend(
                "enqueue_kernel",
                format!("local size {local} does not divide global size {global}"),
            )
        })?;
        self.ensure_pipeline(kernel, local)?;
        let pipeline = kernel
            .pipelines
            .get(&local)
            .ok_or_else(|| TunerError::backend("enqueue_kernel", "pipeline missing"))?;
        let bind_group = kernel.bind_group.as_ref().ok_or_else(|| {
            TunerError::backend("enqueue_kernel", format!("{} has no bound arguments", kernel.source.name))
        })?;
        let timestamps = self.context.has_timestamps().then(|| PassTimestamps::new(&self.context));

        // Host instants bracket encoding and submission; the device
        // interval comes from the timestamp queries below.
        let queued = self.now_ns();
        self.context.scoped("enqueue_kernel", || {
            let mut encoder = self
                .context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("kernel_encoder") });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(kernel.source.name),
                    timestamp_writes: timestamps.as_ref().map(|t| t.writes()),
                });
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, bind_group, &[]);
                pass.dispatch_workgroups(groups_x, groups_y, 1);
            }
            // Resolve into a buffer in the same submission so the ticks
            // are ready once the queue drains.
            if let Some(t) = &timestamps {
                t.resolve(&mut encoder);
            }
            self.context.queue.submit([encoder.finish()]);
            Ok(())
        })?;
        let submit = self.now_ns();
        // Trials are serialized: block until the dispatch has finished.
        self.context.wait_idle("wait_for_events")?;
        let completed = self.now_ns();

        let (start, end) = match &timestamps {
            Some(t) => {
                let elapsed = t.elapsed_ns(&self.context)?;
                let start = completed.saturating_sub(elapsed).max(submit);
                (start, start + elapsed)
            }
            None => (submit, completed),
        };
        Ok(ProfilingInfo {
            queued,
            submit,
            start,
            end,
        })
    }

    fn read_buffer<T: Pod>(&self, buffer: &GpuBuffer) -> Result<Vec<T>> {
        buffer.read_to_vec(&self.context)
    }
}
