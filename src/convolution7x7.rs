//! The 7×7 convolution algorithm and its tuning driver.

use crate::autotune::{Algorithm, Autotuner, TrialMode, TrialOutcome, TuningReport};
use crate::config::TunerConfig;
use crate::data::{ConvolutionInputs, DataGenerator, HostTensor};
use crate::environment::{ExecutionEnvironment, KernelSource, ParamKind};
use crate::error::{Result, TunerError};
use crate::host::HostLaunch;
use crate::problem::{ProblemSize, WorkGroupShape, FILTER_SIDE, FILTER_TAPS, PIXELS_PER_ITEM};
use crate::trial::TrialBuffers;
use crate::validate::Validator;

pub const KERNEL_NAME: &str = "convolution7x7";

/// `{source, output, filter, map, width}`
const PARAMS: &[ParamKind] = &[
    ParamKind::ReadOnly,
    ParamKind::WriteOnly,
    ParamKind::ReadOnly,
    ParamKind::ReadOnly,
    ParamKind::Scalar,
];

pub const KERNEL: KernelSource = KernelSource {
    name: KERNEL_NAME,
    wgsl: include_str!("kernels/convolution7x7.wgsl"),
    params: PARAMS,
    host: convolution7x7_host,
};

fn fetch<T: Copy>(data: &[T], index: usize, name: &'static str) -> Result<T> {
    data.get(index).copied().ok_or_else(|| {
        TunerError::backend("enqueue_kernel", format!("{name}[{index}] out of bounds ({})", data.len()))
    })
}

/// CPU rendition of `convolution7x7.wgsl`, item for item.
fn convolution7x7_host(launch: &mut HostLaunch<'_>) -> Result<()> {
    let src: Vec<f32> = launch.read(0)?;
    let mut dst: Vec<f32> = launch.read(1)?;
    let filters: Vec<f32> = launch.read(2)?;
    let map: Vec<i32> = launch.read(3)?;
    let width = launch.scalar(4)? as usize;
    let src_pitch = width + 6;
    let dst_pitch = width / 2;

    launch.for_each_item(|x, y| {
        let row = y as usize;
        let parity = row % 2;
        for p in 0..PIXELS_PER_ITEM as usize {
            let col = x as usize * PIXELS_PER_ITEM as usize + p;
            let out_idx = row * dst_pitch + col;
            let base = fetch(&map, out_idx, "map")? as u32 as usize * FILTER_TAPS;
            let mut acc = 0.0f32;
            for fr in 0..FILTER_SIDE {
                let src_row = (row + fr) * src_pitch + col * 2 + parity;
                for fc in 0..FILTER_SIDE {
                    acc += fetch(&src, src_row + fc, "src")? * fetch(&filters, base + fr * FILTER_SIDE + fc, "filters")?;
                }
            }
            let len = dst.len();
            *dst.get_mut(out_idx).ok_or_else(|| {
                TunerError::backend("enqueue_kernel", format!("dst[{out_idx}] out of bounds ({len})"))
            })? = acc;
        }
        Ok(())
    })?;
    launch.write(1, &dst)
}

/// Tunable 7×7 convolution over a fixed problem size.
pub struct Convolution7x7<E: ExecutionEnvironment> {
    problem: ProblemSize,
    generator: DataGenerator,
    validator: Validator,
    kernel: Option<E::Kernel>,
}

impl<E: ExecutionEnvironment> Convolution7x7<E> {
    pub fn new(problem: ProblemSize, generator: DataGenerator, tolerance: f32) -> Self {
        Self {
            problem,
            generator,
            validator: Validator::new(problem, tolerance),
            kernel: None,
        }
    }
}

impl<E: ExecutionEnvironment> Algorithm<E> for Convolution7x7<E> {
    fn name(&self) -> &'static str {
        KERNEL_NAME
    }

    fn create_kernel(&mut self, env: &E) -> Result<()> {
        self.kernel = Some(env.create_kernel(&KERNEL)?);
        Ok(())
    }

    fn run_trial(&mut self, env: &E, local: WorkGroupShape, mode: TrialMode) -> Result<TrialOutcome> {
        let kernel = self
            .kernel
            .as_mut()
            .ok_or_else(|| TunerError::backend("enqueue_kernel", "kernel has not been created"))?;

        let inputs = ConvolutionInputs::generate(&self.problem, &self.generator);
        let buffers = TrialBuffers::allocate(env, &self.problem, &inputs)?;
        buffers.bind(env, kernel, self.problem.width())?;

        let timing = env.enqueue(kernel, self.problem.global_work_size(), local)?;
        timing.log_breakdown();

        match mode {
            TrialMode::Tuning => {
                buffers.release();
                Ok(TrialOutcome {
                    timing,
                    validation: None,
                })
            }
            TrialMode::Final => {
                let output = HostTensor::new("output", env.read_buffer::<f32>(&buffers.output)?);
                let checked = self.validator.check(&inputs, &output);
                buffers.release();
                Ok(TrialOutcome {
                    timing,
                    validation: Some(checked?),
                })
            }
        }
    }
}

/// Create the kernel, sweep `config.candidates`, then run the best shape
/// once more and validate it.
pub fn run_convolution7x7<E: ExecutionEnvironment>(env: &E, config: &TunerConfig) -> Result<TuningReport> {
    log::info!(
        "Start testing convolution7x7 with width: {}, height: {}",
        config.problem.width(),
        config.problem.height()
    );
    log::info!("Backend: {}", env.describe());

    let mut algorithm = Convolution7x7::<E>::new(config.problem, DataGenerator::new(config.seed), config.tolerance);
    algorithm.create_kernel(env)?;
    let tuned = Autotuner::new(config.candidates.clone()).sweep(env, &mut algorithm)?;
    let report = tuned.run_final(env, &mut algorithm)?;

    log::info!("End testing convolution7x7");
    Ok(report)
}
