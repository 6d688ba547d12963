//! Criterion benchmarks for one 7×7 convolution trial.
//!
//! Run with `cargo bench`.  Each iteration includes buffer upload,
//! dispatch and release, so the numbers are what one tuning trial costs
//! end to end.  The wgpu bench is skipped when no adapter is available.

use criterion::{criterion_group, criterion_main, Criterion};

use wgpu_conv_autotune::{
    Algorithm, Convolution7x7, ConvolutionInputs, DataGenerator, ExecutionEnvironment, HostEnvironment, ProblemSize,
    TrialMode, Validator, WgpuEnvironment, DEFAULT_SHAPE, DEFAULT_TOLERANCE,
};

fn trial_bench<E: ExecutionEnvironment>(c: &mut Criterion, name: &str, env: &E, problem: ProblemSize) {
    let mut conv = Convolution7x7::<E>::new(problem, DataGenerator::default(), DEFAULT_TOLERANCE);
    conv.create_kernel(env).expect("failed to create kernel");
    c.bench_function(name, |bencher| {
        bencher.iter(|| {
            conv.run_trial(env, DEFAULT_SHAPE, TrialMode::Tuning)
                .expect("trial failed")
        });
    });
}

fn convolution_benchmark(c: &mut Criterion) {
    // Small enough for the CPU emulation to finish in reasonable time.
    let problem = ProblemSize::new(256, 64).expect("valid problem size");
    let inputs = ConvolutionInputs::generate(&problem, &DataGenerator::default());
    let validator = Validator::new(problem, DEFAULT_TOLERANCE);

    c.bench_function("host reference convolution", |bencher| {
        bencher.iter(|| validator.reference(&inputs).expect("reference failed"));
    });

    trial_bench(c, "host emulated trial", &HostEnvironment::new(), problem);

    match WgpuEnvironment::new() {
        Ok(env) => {
            trial_bench(c, "gpu trial 256x64", &env, problem);
            trial_bench(c, "gpu trial 2560x1440", &env, ProblemSize::default());
        }
        Err(e) => eprintln!("skipping gpu benches: {e}"),
    }
}

criterion_group!(benches, convolution_benchmark);
criterion_main!(benches);
