//! Device buffers and host readback.
//!
//! A [`GpuBuffer`] owns one `wgpu::Buffer` for its whole lifetime and
//! destroys it on drop, so the device memory goes away at the end of
//! the scope that created it even while a bind group still refers to
//! the buffer.  Any later use of such a bind group is a validation
//! error instead of a read of freed memory.

use bytemuck::{cast_slice, cast_slice_mut, Pod};
use wgpu::{Buffer, BufferDescriptor, BufferUsages};

use crate::context::GpuContext;
use crate::error::{Result, TunerError};

pub struct GpuBuffer {
    pub buffer: Buffer,
    label: &'static str,
    /// Size in bytes.
    len: usize,
}

impl GpuBuffer {
    /// Storage buffer initialised from `data`.  The contents are written
    /// through the queue, which avoids requiring `MAP_WRITE`.
    pub fn from_slice<T: Pod>(context: &GpuContext, label: &'static str, data: &[T]) -> Self {
        let bytes: &[u8] = cast_slice(data);
        let buffer = context.device.create_buffer(&BufferDescriptor {
            label: Some(label),
            size: bytes.len() as u64,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        context.queue.write_buffer(&buffer, 0, bytes);
        Self {
            buffer,
            label,
            len: bytes.len(),
        }
    }

    /// Storage buffer the kernel writes and the host can copy out of.
    pub fn new_output(context: &GpuContext, label: &'static str, len: usize) -> Self {
        // COPY_SRC so readback can copy it into a staging buffer.
        let buffer = context.device.create_buffer(&BufferDescriptor {
            label: Some(label),
            size: len as u64,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        Self { buffer, label, len }
    }

    /// 16-byte uniform holding one scalar kernel argument.
    pub fn new_scalar(context: &GpuContext, label: &'static str, value: u32) -> Self {
        // Uniform bindings are sized in 16-byte units; pad the value.
        let words = [value, 0, 0, 0];
        let bytes: &[u8] = cast_slice(&words);
        let buffer = context.device.create_buffer(&BufferDescriptor {
            label: Some(label),
            size: bytes.len() as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        context.queue.write_buffer(&buffer, 0, bytes);
        Self {
            buffer,
            label,
            len: bytes.len(),
        }
    }

    /// Host-mappable staging buffer of `len` bytes.
    pub fn new_download(context: &GpuContext, label: &'static str, len: usize) -> Self {
        let buffer = context.device.create_buffer(&BufferDescriptor {
            label: Some(label),
            size: len as u64,
            // MAP_READ may only be combined with COPY_DST.
            usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        Self { buffer, label, len }
    }

    /// Destination for resolved timestamp queries.
    pub fn new_query_resolve(context: &GpuContext, label: &'static str, len: usize) -> Self {
        let buffer = context.device.create_buffer(&BufferDescriptor {
            label: Some(label),
            size: len as u64,
            usage: BufferUsages::QUERY_RESOLVE | BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        Self { buffer, label, len }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy this buffer to a staging buffer and read it back as `T`s,
    /// blocking until the device is done.
    pub fn read_to_vec<T: Pod>(&self, context: &GpuContext) -> Result<Vec<T>> {
        let size = std::mem::size_of::<T>();
        if size == 0 || self.len % size != 0 {
            return Err(TunerError::backend(
                "read_buffer",
                format!("{}: {} bytes is not a whole number of {size}-byte elements", self.label, self.len),
            ));
        }
        // Storage buffers cannot be mapped directly; go through a
        // staging buffer.
        let download = GpuBuffer::new_download(context, "readback", self.len);
        context.scoped("read_buffer", || {
            let mut encoder = context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("readback_encoder") });
            encoder.copy_buffer_to_buffer(&self.buffer, 0, &download.buffer, 0, self.len as u64);
            context.queue.submit([encoder.finish()]);
            Ok(())
        })?;
        download.map_to_vec(context)
    }

    fn map_to_vec<T: Pod>(&self, context: &GpuContext) -> Result<Vec<T>> {
        let slice = self.buffer.slice(..);
        // map_async reports through a callback; forward the result over
        // a channel and poll the device until it fires.
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            let _ = tx.send(r);
        });
        context.wait_idle("map_buffer")?;
        rx.recv()
            .map_err(|e| TunerError::backend("map_buffer", e.to_string()))?
            .map_err(|e| TunerError::backend("map_buffer", e.to_string()))?;

        let data = slice.get_mapped_range();
        let mut out = vec![T::zeroed(); self.len / std::mem::size_of::<T>()];
        cast_slice_mut::<T, u8>(&mut out).copy_from_slice(&data);
        // The mapped view must be gone before unmapping.
        drop(data);
        self.buffer.unmap();
        Ok(out)
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        // Frees device memory now rather than when the last bind group
        // referring to the buffer goes away.
        self.buffer.destroy();
    }
}
