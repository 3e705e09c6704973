use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use tgp::{FileFormat, Hypers, MaxTime, ProcessConfig, ResultSet, Scores};

/// Predict with a gaussian, transformed gaussian or Student-t process
/// described in a JSON file
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON description of the process, observations and hyper-parameters
    #[arg(short, long)]
    config: PathBuf,
    /// Number of point estimation attempts before predicting, none when 0
    #[arg(short, long, default_value_t = 0)]
    attempts: usize,
    /// Time budget of the point estimation in seconds
    #[arg(long)]
    max_time: Option<f64>,
    /// Number of samples, overrides the configuration request
    #[arg(short, long)]
    samples: Option<usize>,
    /// Predict from the prior even when observations are given
    #[arg(long, default_value_t = false)]
    prior: bool,
    /// Write the results in this file instead of the standard output
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Save the process with the final hyper-parameters in this JSON file
    #[arg(long)]
    save: Option<PathBuf>,
}

#[derive(Serialize)]
struct Report {
    process: String,
    hypers: Hypers,
    scores: Option<Scores>,
    results: ResultSet,
}

fn main() -> Result<()> {
    let env = env_logger::Env::new().filter_or("TGP_LOG", "info");
    let mut builder = env_logger::Builder::from_env(env);
    let builder = builder.target(env_logger::Target::Stderr);
    builder.try_init().ok();

    let args = Args::parse();
    let config = ProcessConfig::from_file(&args.config)
        .with_context(|| format!("reading {}", args.config.display()))?;
    let mut process = config.build().context("building the process")?;

    if args.attempts > 0 {
        let deadline = args.max_time.map(MaxTime::seconds);
        let estimate = process.find_point_estimate(None, args.attempts, deadline)?;
        process.set_params(&estimate)?;
    }

    let mut request = config.request.clone();
    if let Some(n) = args.samples {
        request.samples = n;
    }
    request.prior |= args.prior;

    let hypers = process.current_params()?;
    let scores = match process.record() {
        Some(_) => Some(process.scores(None, None)?),
        None => None,
    };
    let results = process.predict(None, None, &request)?;
    let report = Report {
        process: process.to_string(),
        hypers,
        scores,
        results,
    };
    let json = serde_json::to_string_pretty(&report)?;
    match &args.output {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("writing {}", path.display()))?,
        None => println!("{json}"),
    }

    if let Some(path) = &args.save {
        process.save(path, None, FileFormat::Json)?;
    }
    Ok(())
}
