//! Work-group autotuning for a 7×7 convolution compute kernel, built on
//! [wgpu](https://github.com/gfx-rs/wgpu).
//!
//! The tuner sweeps a fixed, ordered list of local work-group shapes.
//! Each trial generates the inputs from a fixed seed, uploads them into
//! buffers owned by that trial alone, binds the kernel arguments,
//! dispatches, reads the device timestamps and releases the buffers.
//! The shape with the strictly smallest start→end time wins; the kernel
//! then runs once more with that shape and its output is checked
//! against a host-side convolution.
//!
//! All device work goes through the [`ExecutionEnvironment`] trait.
//! [`WgpuEnvironment`] runs on the GPU; [`HostEnvironment`] emulates the
//! kernel on the CPU.  The API is synchronous and blocking, and every
//! error is returned to the caller rather than ending the process.

pub mod autotune;
pub mod buffer;
pub mod compute;
pub mod config;
pub mod context;
pub mod convolution7x7;
pub mod data;
pub mod environment;
pub mod error;
pub mod host;
pub mod problem;
pub mod trial;
pub mod validate;

pub use autotune::{Algorithm, Autotuner, BestResult, TrialMode, TrialOutcome, TrialRecord, Tuned, TuningReport};
pub use buffer::GpuBuffer;
pub use compute::WgpuEnvironment;
pub use config::TunerConfig;
pub use context::GpuContext;
pub use convolution7x7::{run_convolution7x7, Convolution7x7};
pub use data::{ConvolutionInputs, DataGenerator, HostTensor};
pub use environment::{ExecutionEnvironment, KernelArg, KernelSource, ParamKind, ProfilingInfo};
pub use error::{Result, TunerError};
pub use host::HostEnvironment;
pub use problem::{ProblemSize, WorkGroupShape, WorkSize, DEFAULT_SHAPE, SHIPPED_CANDIDATES};
pub use trial::TrialBuffers;
pub use validate::{ValidationReport, Validator, DEFAULT_TOLERANCE};
