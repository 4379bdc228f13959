//! Golden Image CLI
//!
//! Commands:
//! - register: report a finished Packer build and write last-build-<env>.json
//! - latest: print the latest valid image for an environment
//! - validate: check a recorded image against the registry policy
//! - deregister / history / show

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use golden_common::{ImageRecord, ImageState, PackerManifest};
use image_ctl::{build_report, parse_tag, RegisterOptions, Registration, RegistryClient};
use std::env;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_REGISTRY_URL: &str = "http://127.0.0.1:8083";

#[derive(Parser)]
#[command(name = "golden-image")]
#[command(about = "Golden machine image registration and lookup")]
struct Cli {
    /// Image Registry URL (falls back to REGISTRY_URL)
    #[arg(long, global = true)]
    registry_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report a finished Packer build to the registry
    Register {
        /// Packer manifest.json
        #[arg(short, long, default_value = "manifest.json")]
        manifest: PathBuf,

        /// Target environment
        #[arg(short, long)]
        env: String,

        /// Image name (defaults to golden-ami-<os>-<version>-<buildid>)
        #[arg(long)]
        name: Option<String>,

        #[arg(long, default_value = "golden-ami")]
        purpose: String,

        #[arg(long, default_value = "ubuntu")]
        os: String,

        /// Defaults to the manifest's os_version custom data
        #[arg(long)]
        os_version: Option<String>,

        /// Extra KEY=VALUE tags
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        /// State to report the image in
        #[arg(long, default_value = "available")]
        state: ImageState,

        /// Directory for last-build-<env>.json
        #[arg(long, default_value = ".")]
        snapshot_dir: PathBuf,

        /// Build log recorded in the snapshot
        #[arg(long, default_value = "")]
        log_file: String,
    },

    /// Print the latest valid image for an environment
    Latest {
        #[arg(short, long)]
        env: String,

        /// Print only the image id
        #[arg(long)]
        id_only: bool,
    },

    /// Validate a recorded image against the registry policy
    Validate {
        #[arg(short, long)]
        image_id: String,
    },

    /// Retire an available image
    Deregister {
        #[arg(short, long)]
        image_id: String,
    },

    /// Report a state change (e.g. pending -> available)
    SetState {
        #[arg(short, long)]
        image_id: String,

        #[arg(short, long)]
        state: ImageState,
    },

    /// List every image recorded for an environment
    History {
        #[arg(short, long)]
        env: String,
    },

    /// Show one image
    Show {
        #[arg(short, long)]
        image_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "image_ctl=info,golden_image=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let registry_url = cli
        .registry_url
        .or_else(|| env::var("REGISTRY_URL").ok())
        .unwrap_or_else(|| DEFAULT_REGISTRY_URL.to_string());
    let client = RegistryClient::new(registry_url);

    match cli.command {
        Commands::Register {
            manifest,
            env,
            name,
            purpose,
            os,
            os_version,
            tags,
            state,
            snapshot_dir,
            log_file,
        } => {
            let mut options = RegisterOptions::new(env);
            options.name = name;
            options.purpose = purpose;
            options.os = os;
            options.os_version = os_version;
            options.state = state;
            for raw in &tags {
                let (key, value) = parse_tag(raw)?;
                options.extra_tags.insert(key, value);
            }
            register(&client, &manifest, &options, &snapshot_dir, &log_file).await?
        }
        Commands::Latest { env, id_only } => latest(&client, &env, id_only).await?,
        Commands::Validate { image_id } => validate(&client, &image_id).await?,
        Commands::Deregister { image_id } => {
            let image = client.deregister(&image_id).await?;
            info!("Deregistered {}", image.id);
            print_json(&image)?;
        }
        Commands::SetState { image_id, state } => {
            let image = client.set_state(&image_id, state).await?;
            info!("Image {} is now {}", image.id, image.state);
            print_json(&image)?;
        }
        Commands::History { env } => {
            for image in client.history(&env).await? {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    image.created_at.to_rfc3339(),
                    image.id,
                    image.region,
                    image.state,
                    image.name
                );
            }
        }
        Commands::Show { image_id } => match client.get(&image_id).await? {
            Some(image) => print_json(&image)?,
            None => anyhow::bail!("Image not found: {}", image_id),
        },
    }

    Ok(())
}

async fn register(
    client: &RegistryClient,
    manifest_path: &Path,
    options: &RegisterOptions,
    snapshot_dir: &Path,
    log_file: &str,
) -> Result<()> {
    let manifest = PackerManifest::from_file(manifest_path)
        .with_context(|| format!("Failed to read manifest {}", manifest_path.display()))?;
    let build = manifest.last_build()?;
    let report = build_report(build, options)?;

    info!(
        "Registering build {} ({} images) with {}",
        report.build_id,
        report.records.len(),
        client.base_url()
    );

    for record in &report.records {
        match client.ingest(record).await? {
            Registration::Recorded(response) => {
                info!("{}", response.message);
                if response.out_of_order {
                    warn!("Image {} is older than the last recorded build", record.id);
                }
                for failure in &response.validation.failures {
                    warn!("Image {}: {}", record.id, failure);
                }
            }
            Registration::AlreadyRecorded => {
                warn!("Image {} was already recorded, skipping", record.id);
            }
        }
    }

    let build_user = env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    if let Some(snapshot) = report.snapshot(&build_user, log_file) {
        let path = snapshot.write_to_dir(snapshot_dir)?;
        info!("Build information saved to {}", path.display());
    }

    for record in &report.records {
        println!("{}\t{}", record.region, record.id);
    }
    Ok(())
}

async fn latest(client: &RegistryClient, environment: &str, id_only: bool) -> Result<()> {
    let image = client
        .latest(environment)
        .await?
        .with_context(|| format!("No golden image available for {}", environment))?;

    if id_only {
        println!("{}", image.id);
    } else {
        print_json(&image)?;
    }
    Ok(())
}

async fn validate(client: &RegistryClient, image_id: &str) -> Result<()> {
    let result = client
        .validation(image_id)
        .await?
        .with_context(|| format!("Image not found: {}", image_id))?;

    if result.passed {
        println!("Image {} passed validation", image_id);
        return Ok(());
    }

    for failure in &result.failures {
        if failure.is_fatal() {
            println!("FAIL  {}", failure);
        } else {
            println!("WARN  {}", failure);
        }
    }

    if result.has_fatal() {
        anyhow::bail!("Image {} failed validation", image_id);
    }
    warn!("Image {} is usable but incompletely tagged", image_id);
    Ok(())
}

fn print_json(image: &ImageRecord) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(image)?);
    Ok(())
}
