use sphsim::{Diagnostics, Scenario, ScenarioConfig};
use sphsim::{bench_neighbours, bench_neighbours_curve, bench_schemes};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

#[derive(Parser, Debug)]
struct Args {
    #[arg(short, default_value = "test_file.yaml")]
    file_name: String,

    /// Frames to run; defaults to enough frames to reach `t_end`
    #[arg(long)]
    frames: Option<usize>,

    /// Run the benchmarks instead of a scenario
    #[arg(long)]
    bench: bool,
}

// load here to keep main clean
fn load_scenario_from_yaml(file_name: &str) -> Result<ScenarioConfig> {
    let config_path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("scenarios").join(file_name);
    let file = File::open(&config_path).with_context(|| format!("cannot open scenario {}", config_path.display()))?;
    let reader = BufReader::new(file);
    let scenario_cfg: ScenarioConfig = serde_yaml::from_reader(reader)
        .with_context(|| format!("cannot parse scenario {}", config_path.display()))?;

    Ok(scenario_cfg)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    if args.bench {
        bench_neighbours();
        bench_neighbours_curve();
        bench_schemes();
        return Ok(());
    }

    let scenario_cfg = load_scenario_from_yaml(&args.file_name)?;
    let scenario = Scenario::build_scenario(scenario_cfg)?;
    let frames = args.frames.unwrap_or_else(|| scenario.frame_count());

    let (mut solver, mut objects) = scenario.into_solver(Diagnostics::tracing())?;

    for frame in 0..frames {
        let report = solver.advance_frame(&mut objects);
        for object in &objects {
            let momentum = object.momentum(solver.params().default_mass);
            let lowest = object.x.iter().map(|x| x.y).fold(f64::INFINITY, f64::min);
            println!(
                "frame {frame:4}  t = {:8.4}  {}: n = {}, substeps = {}, rejected = {}, |p| = {:.4e}, min y = {:.4}",
                report.t,
                object.name,
                object.len(),
                report.steps,
                report.rejections,
                momentum.norm(),
                lowest
            );
        }
    }

    Ok(())
}
