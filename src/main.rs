//! CLI for wgpu-conv-autotune.

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use wgpu_conv_autotune::{
    run_convolution7x7, HostEnvironment, ProblemSize, TunerConfig, WgpuEnvironment, WorkGroupShape,
};

#[derive(Parser)]
#[command(name = "conv-autotune")]
#[command(about = "Tune the work-group shape of the 7x7 convolution kernel and validate the result")]
struct Cli {
    /// Algorithm to tune; nothing runs without one
    #[arg(value_enum)]
    algorithm: Option<AlgorithmChoice>,

    /// Image width
    #[arg(short = 'w', long, default_value_t = 2560)]
    width: u32,

    /// Image height
    #[arg(short = 'H', long, default_value_t = 1440)]
    height: u32,

    /// Comma-separated local sizes to sweep, e.g. 8x4,16x8
    #[arg(long, value_delimiter = ',')]
    candidates: Option<Vec<WorkGroupShape>>,

    /// Seed for the generated inputs
    #[arg(long, default_value_t = 0)]
    seed: u64,

    #[arg(long, value_enum, default_value_t = Backend::Wgpu)]
    backend: Backend,
}

#[derive(Clone, Copy, ValueEnum)]
enum AlgorithmChoice {
    Convolution7x7,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Default wgpu adapter
    Wgpu,
    /// CPU emulation
    Host,
}

fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let Some(AlgorithmChoice::Convolution7x7) = cli.algorithm else {
        log::warn!("no algorithm selected, nothing to do");
        return Ok(ExitCode::SUCCESS);
    };

    let mut config = TunerConfig::new(ProblemSize::new(cli.width, cli.height)?).with_seed(cli.seed);
    if let Some(candidates) = cli.candidates {
        config = config.with_candidates(candidates);
    }

    let report = match cli.backend {
        Backend::Wgpu => WgpuEnvironment::new().and_then(|env| run_convolution7x7(&env, &config)),
        Backend::Host => run_convolution7x7(&HostEnvironment::new(), &config),
    };
    // Run failures are logged once and end with a failing exit status.
    match report {
        Ok(report) => {
            println!("{}", report.summary());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            log::error!("{e}");
            Ok(ExitCode::FAILURE)
        }
    }
}
