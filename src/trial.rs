//! Per-trial device buffers.

use crate::data::ConvolutionInputs;
use crate::environment::{ExecutionEnvironment, KernelArg};
use crate::error::Result;
use crate::problem::ProblemSize;

/// The four buffers one trial owns exclusively.
///
/// They are created at trial start and released at trial end; nothing
/// is shared with another trial.  Dropping the value releases all four.
pub struct TrialBuffers<B> {
    pub source: B,
    pub output: B,
    pub filter: B,
    pub map: B,
}

impl<B> TrialBuffers<B> {
    /// Upload the inputs and allocate the output for `problem`.
    pub fn allocate<E>(env: &E, problem: &ProblemSize, inputs: &ConvolutionInputs) -> Result<Self>
    where
        E: ExecutionEnvironment<Buffer = B>,
    {
        let source = env.upload("source", inputs.source.as_slice())?;
        let output = env.allocate("output", problem.output_len() * std::mem::size_of::<f32>())?;
        let filter = env.upload("filter", inputs.filters.as_slice())?;
        let map = env.upload("map", inputs.index_map.as_slice())?;
        Ok(Self {
            source,
            output,
            filter,
            map,
        })
    }

    /// Bind `{source, output, filter, map, width}` in that order.
    ///
    /// Bindings belong to the kernel, not to a dispatch, so every trial
    /// binds again; otherwise the kernel still refers to the previous
    /// trial's released buffers.
    pub fn bind<E>(&self, env: &E, kernel: &mut E::Kernel, width: u32) -> Result<()>
    where
        E: ExecutionEnvironment<Buffer = B>,
    {
        env.set_args(
            kernel,
            &[
                KernelArg::Buffer(&self.source),
                KernelArg::Buffer(&self.output),
                KernelArg::Buffer(&self.filter),
                KernelArg::Buffer(&self.map),
                KernelArg::Scalar(width),
            ],
        )
    }

    /// Release each buffer explicitly.
    pub fn release(self) {
        let Self {
            source,
            output,
            filter,
            map,
        } = self;
        for (label, buffer) in [("source", source), ("output", output), ("filter", filter), ("map", map)] {
            drop(buffer);
            log::debug!("release_buffer({label}) success");
        }
    }
}
