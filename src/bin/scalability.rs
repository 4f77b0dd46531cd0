//! Experiment Runner for the Scalability Analysis.
//!
//! This executable measures the wall-clock time of the fast displacement products
//! against their dense references as the matrix dimension grows. The reference costs
//! O(r·n³), so it is only timed up to `--slow-max`; above that the `slow_ms` column is
//! left empty. Each timing is the median of `--repeats` runs on the same operands.

use anyhow::{Context, Result, anyhow, ensure};
use clap::Parser;
use faer::Mat;
use ldr_krylov::{
    KrylovError,
    validation::{Family, RandomCase},
};
use rand::{SeedableRng, rngs::StdRng};
use serde::Serialize;
use std::{path::PathBuf, time::Instant};

/// Command-line arguments for the scalability experiment.
#[derive(Parser, Debug)]
#[clap(
    name = "scalability-runner",
    about = "Times the fast displacement products against their dense references."
)]
struct ScalabilityArgs {
    /// Restrict the run to a single operator family. All families by default.
    #[clap(long, value_enum)]
    family: Option<Family>,

    /// Smallest matrix dimension (a power of two).
    #[clap(long, default_value_t = 16)]
    n_min: usize,

    /// Largest matrix dimension (a power of two).
    #[clap(long, default_value_t = 4096)]
    n_max: usize,

    /// Largest dimension at which the dense reference is timed.
    #[clap(long, default_value_t = 256)]
    slow_max: usize,

    /// Displacement rank of the random factors.
    #[clap(long, default_value_t = 4)]
    rank: usize,

    /// Number of input vectors per product.
    #[clap(long, default_value_t = 16)]
    batch: usize,

    /// Number of timed runs per measurement.
    #[clap(long, default_value_t = 5)]
    repeats: usize,

    /// Path to the output CSV file for storing results.
    #[clap(long, value_name = "PATH")]
    output: PathBuf,
}

/// Represents a single row of data in the output CSV.
#[derive(Debug, Serialize)]
struct ScalabilityResult {
    family: Family,
    n: usize,
    fast_ms: f64,
    slow_ms: Option<f64>,
}

/// Median wall-clock time of `repeats` calls to `run`, in milliseconds.
fn median_ms<F>(repeats: usize, mut run: F) -> Result<f64>
where
    F: FnMut() -> Result<Mat<f32>, KrylovError>,
{
    let mut times = Vec::with_capacity(repeats);
    for _ in 0..repeats {
        let start = Instant::now();
        run()?;
        times.push(start.elapsed().as_secs_f64() * 1e3);
    }
    times.sort_by(|a, b| a.total_cmp(b));
    Ok(times[times.len() / 2])
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logger: {}", e))?;
    let args = ScalabilityArgs::parse();
    ensure!(args.repeats > 0, "repeats must be at least 1");
    ensure!(
        args.n_min.is_power_of_two() && args.n_max.is_power_of_two() && args.n_min <= args.n_max,
        "n_min and n_max must be powers of two with n_min <= n_max"
    );
    log::info!("Starting scalability experiment...");

    // Create the CSV writer. Opening the file here will truncate it if it exists.
    let mut writer = csv::Writer::from_path(&args.output)
        .with_context(|| format!("Failed to create CSV writer for {:?}", &args.output))?;

    let families = match args.family {
        Some(family) => vec![family],
        None => Family::ALL.to_vec(),
    };
    let mut rng = StdRng::seed_from_u64(42);

    for &family in &families {
        let mut n = args.n_min;
        while n <= args.n_max {
            let case = RandomCase::generate(family, n, args.rank, args.batch, &mut rng)?;
            let fast_ms = median_ms(args.repeats, || case.fast())
                .with_context(|| format!("Fast {family} product failed at n={n}"))?;
            let slow_ms = if n <= args.slow_max {
                Some(
                    median_ms(args.repeats, || case.slow())
                        .with_context(|| format!("Reference {family} product failed at n={n}"))?,
                )
            } else {
                None
            };
            log::info!("{family} n={n}: fast {fast_ms:.3} ms, slow {slow_ms:?} ms");

            // Results are written incrementally so a long run keeps its finished rows.
            writer.serialize(ScalabilityResult {
                family,
                n,
                fast_ms,
                slow_ms,
            })?;
            writer.flush()?;
            n *= 2;
        }
    }

    log::info!("Scalability experiment complete.");
    Ok(())
}
