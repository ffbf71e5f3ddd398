// Fokker-Planck surrogate CLI
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fp_surrogate::config::{SimulationConfig, KINETIC_PARAM_COUNT};
use fp_surrogate::ml::{DensityNetwork, ModelParameters, SurrogateModel};
use fp_surrogate::record::{RunKind, RunRecord};
use fp_surrogate::rl::{
    rollout, survival_envelope, Episode, RLEnv, SimulationEnvironment, TreatmentSchedule,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "fp-surrogate")]
#[command(version)]
#[command(about = "Fokker-Planck surrogate simulator for CSF1R-I / IGF1R-I therapy", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Roll a fixed schedule through the surrogate and write the trajectory
    Simulate {
        #[command(flatten)]
        model: ModelArgs,

        /// Treatment schedule (switch, add or rl-optimized)
        #[arg(short, long, default_value = "add")]
        schedule: String,

        /// Trailing bins counted as death in the survival curve
        #[arg(long)]
        tail_bins: Option<usize>,

        /// Steps held at full survival before the envelope may decrease
        #[arg(long, default_value = "0")]
        grace_steps: usize,

        /// Output JSON file
        #[arg(short, long, value_name = "OUTPUT")]
        output: PathBuf,
    },

    /// Drive the treatment environment with a schedule and report rewards
    Episode {
        #[command(flatten)]
        model: ModelArgs,

        /// Treatment schedule (switch, add or rl-optimized)
        #[arg(short, long, default_value = "add")]
        schedule: String,

        /// Stop after this many steps even if the episode is still running
        #[arg(long)]
        max_steps: Option<usize>,

        /// Optional output JSON file for the full episode
        #[arg(short, long, value_name = "OUTPUT")]
        output: Option<PathBuf>,
    },

    /// Write freshly initialised parameter blobs for smoke testing
    InitWeights {
        /// Output network state dictionary
        #[arg(long, value_name = "NETWORK")]
        network: PathBuf,

        /// Output kinetic log-parameters (all zero)
        #[arg(long, value_name = "KINETIC")]
        kinetic: PathBuf,

        /// Layer widths, comma separated (defaults to the reference network)
        #[arg(long, value_delimiter = ',')]
        widths: Option<Vec<usize>>,

        /// Random seed for reproducibility
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Run record (JSON); defaults to the network path with a `.record.json` suffix
        #[arg(long, value_name = "RECORD")]
        record: Option<PathBuf>,
    },
}

#[derive(clap::Args)]
struct ModelArgs {
    /// Kinetic log-parameter blob (JSON)
    #[arg(long, value_name = "KINETIC")]
    kinetic: PathBuf,

    /// Density network state dictionary (JSON)
    #[arg(long, value_name = "NETWORK")]
    network: PathBuf,

    /// Simulation configuration (JSON); defaults reproduce the reference setup
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Compute backend override (cpu, cpu_parallel or auto)
    #[arg(short, long)]
    backend: Option<String>,
}

impl ModelArgs {
    fn load(&self) -> Result<(SimulationConfig, Arc<SurrogateModel>)> {
        let mut config = match &self.config {
            Some(path) => SimulationConfig::load(path)
                .with_context(|| format!("Failed to load config: {}", path.display()))?,
            None => SimulationConfig::default(),
        };
        if let Some(backend) = &self.backend {
            config.backend = backend.clone();
        }
        config.validate().context("Invalid configuration")?;

        let params = ModelParameters::load(&self.kinetic, &self.network, &config.layer_widths)
            .with_context(|| {
                format!(
                    "Failed to load parameters from {} and {}",
                    self.kinetic.display(),
                    self.network.display()
                )
            })?;
        let surrogate = SurrogateModel::new(Arc::new(params), &config)
            .context("Failed to build surrogate model")?;
        Ok((config, Arc::new(surrogate)))
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            model,
            schedule,
            tail_bins,
            grace_steps,
            output,
        } => simulate_command(model, schedule, tail_bins, grace_steps, output),
        Commands::Episode {
            model,
            schedule,
            max_steps,
            output,
        } => episode_command(model, schedule, max_steps, output),
        Commands::InitWeights {
            network,
            kinetic,
            widths,
            seed,
            record,
        } => init_weights_command(network, kinetic, widths, seed, record),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

fn simulate_command(
    model: ModelArgs,
    schedule: String,
    tail_bins: Option<usize>,
    grace_steps: usize,
    output: PathBuf,
) -> Result<()> {
    let (config, surrogate) = model.load()?;
    let schedule = TreatmentSchedule::preset(&schedule)?;
    let record = RunRecord::start(RunKind::Rollout, surrogate.backend(), &config)
        .with_schedule(schedule.name.clone());

    let trajectory = rollout(&surrogate, &schedule, &config).context("Rollout failed")?;
    let tail_bins = tail_bins.unwrap_or(config.survival_tail_bins);
    let survival = trajectory.survival_curve(tail_bins);
    let envelope = survival_envelope(&survival, grace_steps);

    let final_tumor = trajectory.tumor_expectation.last().copied().unwrap_or_default();
    let final_survival = envelope.last().copied().unwrap_or(1.0);
    let record = record.finish(serde_json::json!({
        "steps": trajectory.steps(),
        "tail_bins": tail_bins,
        "final_tumor_expectation": final_tumor,
        "final_survival": final_survival,
    }));

    write_json(
        &output,
        &serde_json::json!({
            "record": record,
            "trajectory": trajectory,
            "survival": survival,
            "survival_envelope": envelope,
        }),
    )?;

    eprintln!(
        "✓ {} rollout: {} steps, final tumor expectation {:.4}, survival {:.4}",
        schedule.name,
        trajectory.steps(),
        final_tumor,
        final_survival
    );
    eprintln!("  Output: {}", output.display());
    Ok(())
}

fn episode_command(
    model: ModelArgs,
    schedule: String,
    max_steps: Option<usize>,
    output: Option<PathBuf>,
) -> Result<()> {
    let (config, surrogate) = model.load()?;
    let schedule = TreatmentSchedule::preset(&schedule)?;
    let record = RunRecord::start(RunKind::Episode, surrogate.backend(), &config)
        .with_schedule(schedule.name.clone());

    let mut env = SimulationEnvironment::from_simulation(Arc::clone(&surrogate), &config);
    RLEnv::reset(&mut env)?;

    let actions = schedule.expand(config.decision_interval);
    let limit = max_steps.unwrap_or(actions.len()).min(actions.len());
    let mut episode = Episode::new();
    for action in actions.into_iter().take(limit) {
        let outcome = env.step_action(action)?;
        episode.add_step(action, &outcome);
        if outcome.done {
            break;
        }
    }

    let last = episode.infos.last().copied().unwrap_or_default();
    eprintln!(
        "✓ {} episode: {} steps, return {:.4}, terminated {}",
        schedule.name, episode.length, episode.total_return, episode.terminated
    );
    eprintln!(
        "  t = {:.3} d, survival {:.4}, cure {:.4}, tumor expectation {:.4}",
        last.time, last.survival_probability, last.cure_probability, last.tumor_expectation
    );

    if let Some(path) = output {
        let record = record.finish(serde_json::json!({
            "steps": episode.length,
            "total_return": episode.total_return,
            "terminated": episode.terminated,
        }));
        write_json(&path, &serde_json::json!({ "record": record, "episode": episode }))?;
        eprintln!("  Output: {}", path.display());
    }
    Ok(())
}

fn init_weights_command(
    network: PathBuf,
    kinetic: PathBuf,
    widths: Option<Vec<usize>>,
    seed: u64,
    record_path: Option<PathBuf>,
) -> Result<()> {
    let widths = widths.unwrap_or_else(|| SimulationConfig::default().layer_widths);
    if widths.first() != Some(&5) || widths.last() != Some(&1) {
        bail!("Layer widths must start at 5 and end at 1, got {:?}", widths);
    }
    let config = SimulationConfig {
        layer_widths: widths.clone(),
        ..SimulationConfig::default()
    };
    let backend = config.backend_kind().context("Invalid default backend")?;
    let record = RunRecord::start(RunKind::InitWeights, backend, &config);

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let net = DensityNetwork::xavier_normal(&widths, 2f64.sqrt(), &mut rng)
        .context("Failed to initialise network")?;
    let params = ModelParameters::from_parts([0.0; KINETIC_PARAM_COUNT], net);

    write_json(&network, &params.to_state_dict())?;
    write_json(&kinetic, &params.to_kinetic_blob())?;

    let record_path = record_path.unwrap_or_else(|| RunRecord::sidecar_path(&network));
    let record = record.finish(serde_json::json!({
        "seed": seed,
        "widths": widths,
        "network": network.display().to_string(),
        "kinetic": kinetic.display().to_string(),
    }));
    write_json(&record_path, &record)?;

    eprintln!("✓ Initialised network {:?} (seed {})", widths, seed);
    eprintln!("  Network: {}", network.display());
    eprintln!("  Kinetic: {}", kinetic.display());
    eprintln!("  Record:  {}", record_path.display());
    Ok(())
}
