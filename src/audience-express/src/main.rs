//! Audience Express: segment a customer dataset, save segments, and export them
//! on demand or on a schedule.
//!
//! Main entry point that loads configuration and the dataset snapshot, then
//! either runs the scheduler loop or performs one management operation.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use audience_core::config::AppConfig;
use audience_core::loader::load_csv;
use audience_core::{Condition, Creator, Destination, ExportFormat, SegmentDefinition, SystemClock};
use audience_export::ExportRequest;
use audience_management::{AudienceService, CreateScheduleRequest, SaveSegmentRequest};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "audience-express")]
#[command(about = "Customer segmentation with scheduled exports")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, short, env = "AUDIENCE_EXPRESS_CONFIG")]
    config: Option<PathBuf>,

    /// Dataset CSV (overrides config)
    #[arg(long, env = "AUDIENCE_EXPRESS__DATASET__PATH")]
    dataset: Option<PathBuf>,

    /// Segment/schedule store directory (overrides config)
    #[arg(long, env = "AUDIENCE_EXPRESS__STORE__ROOT")]
    store_root: Option<PathBuf>,

    /// Export artifact directory (overrides config)
    #[arg(long, env = "AUDIENCE_EXPRESS__EXPORT__OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the schedule loop until Ctrl-C
    Run {
        /// Seconds between ticks (overrides config)
        #[arg(long)]
        tick_secs: Option<u64>,
    },
    /// List dataset columns with their types
    Columns,
    /// Count the rows a definition selects
    Evaluate(DefinitionArgs),
    /// List saved segments
    Segments,
    /// Save (or overwrite) a named segment
    SaveSegment {
        #[arg(long)]
        name: String,
        #[command(flatten)]
        definition: DefinitionArgs,
        #[arg(long, default_value = "cli")]
        creator_name: String,
        #[arg(long, default_value = "")]
        creator_email: String,
    },
    /// Delete a segment and its schedules
    DeleteSegment { name: String },
    /// List schedules with their run state
    Schedules,
    /// Add a recurring export
    Schedule {
        #[arg(long)]
        segment: String,
        #[arg(long, default_value = "csv")]
        format: String,
        /// Daily run time, HH:MM
        #[arg(long, conflicts_with = "interval_hours")]
        run_time: Option<String>,
        #[arg(long)]
        interval_hours: Option<u32>,
        #[arg(long, default_value = "none")]
        destination: String,
    },
    /// Remove the schedule at INDEX
    Unschedule { index: usize },
    /// Export a segment now
    Export {
        #[arg(long)]
        segment: String,
        #[arg(long, default_value = "csv")]
        format: String,
        #[arg(long, default_value = "none")]
        destination: String,
    },
}

#[derive(Args, Debug)]
struct DefinitionArgs {
    /// Boolean expression, e.g. "Age > 30 and AccountType == 'Savings'"
    #[arg(long, conflicts_with = "conditions", required_unless_present = "conditions")]
    expression: Option<String>,

    /// Per-column conditions as JSON, e.g. '{"Age": {"min": 18, "max": 35}}'
    #[arg(long)]
    conditions: Option<String>,
}

impl DefinitionArgs {
    fn into_definition(self) -> anyhow::Result<SegmentDefinition> {
        match (self.expression, self.conditions) {
            (Some(expression), _) => Ok(SegmentDefinition::Expression { expression }),
            (None, Some(json)) => {
                let conditions: BTreeMap<String, Condition> =
                    serde_json::from_str(&json).context("invalid --conditions JSON")?;
                Ok(SegmentDefinition::Predicate { conditions })
            }
            (None, None) => anyhow::bail!("give --expression or --conditions"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs on stderr, command output on stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "audience_express=info,audience_management=info,audience_scheduler=info,\
                 audience_export=info,audience_store=info"
                    .into()
            }),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load(Some(path.as_path()))
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AppConfig::load(None).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load config, using defaults");
            AppConfig::default()
        }),
    };

    if let Some(path) = cli.dataset {
        config.dataset.path = path;
    }
    if let Some(root) = cli.store_root {
        config.store.root = root;
    }
    if let Some(dir) = cli.output_dir {
        config.export.output_dir = dir;
    }

    let dataset = load_csv(&config.dataset.path, config.dataset.infer_rows)
        .with_context(|| format!("loading dataset {}", config.dataset.path.display()))?;
    let service =
        AudienceService::bootstrap(&config, Arc::new(dataset), Arc::new(SystemClock)).await?;

    match cli.command {
        Command::Run { tick_secs } => {
            if let Some(secs) = tick_secs {
                config.scheduler.tick_interval_secs = secs;
            }
            run(&config, &service).await?;
        }
        Command::Columns => print_json(&service.columns())?,
        Command::Evaluate(definition) => {
            print_json(&service.evaluate(&definition.into_definition()?)?)?
        }
        Command::Segments => print_json(&service.list_segments())?,
        Command::SaveSegment {
            name,
            definition,
            creator_name,
            creator_email,
        } => {
            let saved = service
                .save_segment(SaveSegmentRequest {
                    name,
                    definition: definition.into_definition()?,
                    created_by: Creator::new(creator_name, creator_email),
                })
                .await?;
            print_json(&saved)?
        }
        Command::DeleteSegment { name } => print_json(&service.delete_segment(&name).await?)?,
        Command::Schedules => print_json(&service.list_schedules())?,
        Command::Schedule {
            segment,
            format,
            run_time,
            interval_hours,
            destination,
        } => {
            let created = service
                .create_schedule(CreateScheduleRequest {
                    segment_name: segment,
                    format: format.parse::<ExportFormat>()?,
                    destination: Destination::from(destination),
                    run_time,
                    interval_hours,
                })
                .await?;
            print_json(&created)?
        }
        Command::Unschedule { index } => print_json(&service.delete_schedule(index).await?)?,
        Command::Export {
            segment,
            format,
            destination,
        } => {
            let artifact = service
                .export_and_wait(ExportRequest {
                    segment_name: segment,
                    format: format.parse::<ExportFormat>()?,
                    destination: Destination::from(destination),
                })
                .await?;
            print_json(&artifact)?
        }
    }

    Ok(())
}

async fn run(config: &AppConfig, service: &AudienceService) -> anyhow::Result<()> {
    if config.metrics.enabled {
        if let Err(e) = start_metrics(config) {
            warn!(error = %e, "Failed to start metrics exporter");
        }
    }

    if !config.scheduler.enabled {
        warn!("scheduler disabled in config; nothing to run");
        return Ok(());
    }

    let period = config.scheduler_tick();
    let loop_handle = service.spawn_scheduler(period);
    info!(
        node_id = %config.node_id,
        tick_secs = period.as_secs(),
        "Audience Express scheduler running"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    loop_handle.abort();
    Ok(())
}

fn start_metrics(config: &AppConfig) -> anyhow::Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(SocketAddr::new(
            config.metrics.host.parse()?,
            config.metrics.port,
        ))
        .install()?;
    info!(port = config.metrics.port, "Metrics exporter started");
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
