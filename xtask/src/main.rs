use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

mod phantom;

use phantom::{mean_field_error, phantom_pair, BarProgress};
use warpkit_core::{Transform, VectorField};
use warpkit_registration::{
    normalize_jointly, FluidConfig, FluidRegistration, MultiResolutionRegistration, RegistrationConfig, Registry,
};

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Developer tasks for warpkit")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Dimension {
    #[value(name = "2d")]
    Two,
    #[value(name = "3d")]
    Three,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a synthetic phantom pair with the spline driver
    Spline {
        #[arg(short, long, value_enum, default_value = "2d")]
        dim: Dimension,

        /// Image edge length in pixels
        #[arg(short, long, default_value_t = 64)]
        size: usize,

        /// Largest phantom displacement in pixels
        #[arg(short, long, default_value_t = 2.0)]
        amplitude: f64,

        /// JSON registration configuration, defaults otherwise
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Register a synthetic phantom pair with the fluid driver
    Fluid {
        #[arg(short, long, value_enum, default_value = "2d")]
        dim: Dimension,

        #[arg(short, long, default_value_t = 64)]
        size: usize,

        #[arg(short, long, default_value_t = 2.0)]
        amplitude: f64,

        /// JSON fluid configuration, defaults otherwise
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the default configurations as JSON
    DefaultConfig,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Spline {
            dim,
            size,
            amplitude,
            config,
        } => {
            let config = match config {
                Some(path) => RegistrationConfig::from_json(&read(&path)?)?,
                None => RegistrationConfig::default(),
            };
            match dim {
                Dimension::Two => run_spline::<2>(size, amplitude, &config)?,
                Dimension::Three => run_spline::<3>(size, amplitude, &config)?,
            }
        }
        Commands::Fluid {
            dim,
            size,
            amplitude,
            config,
        } => {
            let config = match config {
                Some(path) => FluidConfig::from_json(&read(&path)?)?,
                None => FluidConfig::default(),
            };
            match dim {
                Dimension::Two => run_fluid::<2>(size, amplitude, &config)?,
                Dimension::Three => run_fluid::<3>(size, amplitude, &config)?,
            }
        }
        Commands::DefaultConfig => {
            println!("{}", RegistrationConfig::default().to_json()?);
            println!("{}", FluidConfig::default().to_json()?);
        }
    }

    Ok(())
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn check_size(size: usize, levels: usize) -> Result<()> {
    let shift = u32::try_from(levels.saturating_sub(1)).unwrap_or(u32::MAX);
    if size.checked_shr(shift).unwrap_or(0) < 4 {
        bail!("size {} is too small for {} levels", size, levels);
    }
    Ok(())
}

fn run_spline<const D: usize>(size: usize, amplitude: f64, config: &RegistrationConfig) -> Result<()> {
    check_size(size, config.levels)?;
    let pair = phantom_pair([size; D], amplitude)?;
    info!(dim = D, size, amplitude, "spline registration of a phantom pair");

    let (moving, reference) =
        normalize_jointly(&pair.moving, &pair.reference).context("phantom pair holds a single value")?;

    let registry = Registry::<D>::new();
    let progress = Arc::new(BarProgress::new()?);
    let mut registration =
        MultiResolutionRegistration::from_config(&registry, config, &moving, &reference)?.with_progress(progress);
    let outcome = registration.run()?;

    for level in &outcome.levels {
        info!(
            level = level.level + 1,
            size = ?level.size,
            coefficients = ?level.coefficient_size,
            refined = level.refined,
            value = level.final_value(),
            "level summary"
        );
    }
    report(&pair.deformation, &outcome.transform.displacement_field());
    Ok(())
}

fn run_fluid<const D: usize>(size: usize, amplitude: f64, config: &FluidConfig) -> Result<()> {
    check_size(size, config.levels)?;
    let pair = phantom_pair([size; D], amplitude)?;
    info!(dim = D, size, amplitude, "fluid registration of a phantom pair");

    let registry = Registry::<D>::new();
    let fluid = FluidRegistration::from_config(&registry, config)?.with_progress(Arc::new(BarProgress::new()?));
    let outcome = fluid.run(&pair.moving, &pair.reference)?;

    for level in &outcome.levels {
        info!(
            level = level.level + 1,
            size = ?level.size,
            iterations = level.iterations,
            status = %level.status,
            initial = level.initial_value,
            value = level.final_value,
            "level summary"
        );
    }
    report(&pair.deformation, outcome.transform.field());
    Ok(())
}

/// The recovered displacement approximates the inverse of the phantom
/// deformation, i.e. its negation for small amplitudes.
fn report<const D: usize>(deformation: &VectorField<D>, recovered: &VectorField<D>) {
    let mut expected = deformation.clone();
    expected.scale(-1.0);
    let before = mean_field_error(&expected, &VectorField::zeros(deformation.size()));
    let after = mean_field_error(&expected, recovered);
    info!(before, after, "mean displacement error in pixels");
    println!("mean displacement error: {:.4} px (identity {:.4} px)", after, before);
}
