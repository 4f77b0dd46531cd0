//! Experiment Runner for the Accuracy Analysis.
//!
//! This executable compares every fast displacement product against its dense
//! reference on seeded Gaussian data. For each operator family and each power-of-two
//! size in the requested range it draws one random case, runs both paths and records
//! the relative error of the fast result in a CSV file.

use anyhow::{Context, Result, anyhow, ensure};
use clap::Parser;
use ldr_krylov::validation::{DEFAULT_TOLERANCE, Family, RandomCase, relative_error};
use rand::{SeedableRng, rngs::StdRng};
use serde::Serialize;
use std::path::PathBuf;

/// Command-line arguments for the accuracy experiment.
#[derive(Parser, Debug)]
#[clap(
    name = "accuracy-runner",
    about = "Compares the fast displacement products against their dense references."
)]
struct AccuracyArgs {
    /// Restrict the run to a single operator family. All families by default.
    #[clap(long, value_enum)]
    family: Option<Family>,

    /// Smallest matrix dimension (a power of two).
    #[clap(long, default_value_t = 4)]
    n_min: usize,

    /// Largest matrix dimension (a power of two).
    #[clap(long, default_value_t = 256)]
    n_max: usize,

    /// Displacement rank of the random factors.
    #[clap(long, default_value_t = 4)]
    rank: usize,

    /// Number of input vectors per product.
    #[clap(long, default_value_t = 8)]
    batch: usize,

    /// Seed of the random generator.
    #[clap(long, default_value_t = 42)]
    seed: u64,

    /// Relative error above which a warning is logged.
    #[clap(long, default_value_t = DEFAULT_TOLERANCE)]
    tolerance: f64,

    /// Path to the output CSV file where results will be written.
    #[clap(long, value_name = "PATH")]
    output: PathBuf,
}

/// Represents a single row of data for the accuracy analysis CSV.
#[derive(Debug, Serialize)]
struct AccuracyResult {
    family: Family,
    n: usize,
    rank: usize,
    batch: usize,
    /// Frobenius relative error of the fast product against the reference.
    relative_error: f64,
}

/// The main entry point for the accuracy experiment.
fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logger: {}", e))?;
    let args = AccuracyArgs::parse();
    ensure!(
        args.n_min.is_power_of_two() && args.n_max.is_power_of_two() && args.n_min <= args.n_max,
        "n_min and n_max must be powers of two with n_min <= n_max"
    );

    let families = match args.family {
        Some(family) => vec![family],
        None => Family::ALL.to_vec(),
    };
    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut results = Vec::new();

    for &family in &families {
        log::info!("Running accuracy sweep for family: {family}");
        let mut n = args.n_min;
        while n <= args.n_max {
            let case = RandomCase::generate(family, n, args.rank, args.batch, &mut rng)
                .with_context(|| format!("Failed to generate a {family} case with n={n}"))?;
            let fast = case.fast().with_context(|| format!("Fast {family} product failed at n={n}"))?;
            let slow = case.slow().with_context(|| format!("Reference {family} product failed at n={n}"))?;
            let error = relative_error(fast.as_ref(), slow.as_ref());
            if error.is_nan() || error > args.tolerance {
                log::warn!("{family} n={n}: relative error {error:e} exceeds {:e}", args.tolerance);
            } else {
                log::info!("{family} n={n}: relative error {error:e}");
            }
            results.push(AccuracyResult {
                family,
                n,
                rank: args.rank,
                batch: args.batch,
                relative_error: error,
            });
            n *= 2;
        }
    }

    log::info!("Writing results to {:?}...", &args.output);
    let mut writer = csv::Writer::from_path(&args.output)
        .with_context(|| format!("Failed to create CSV writer for {:?}", &args.output))?;
    for record in results {
        writer.serialize(record)?;
    }
    writer.flush()?;

    log::info!("Accuracy analysis complete.");
    Ok(())
}
