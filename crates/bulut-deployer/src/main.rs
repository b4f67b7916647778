// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! bulut - operator CLI for the rollout engine.
//!
//! Administrative commands talk to the database directly; `deploy` starts an
//! in-process [`DeployerRuntime`], submits one build job and waits for it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use bulut_core::{Deployment, Namespace, Persistence};
use bulut_deployer::{Config, DeployerRuntime, RolloutState};

/// bulut - build uploaded artifacts into running containers.
#[derive(Parser, Debug)]
#[command(name = "bulut", version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,

    /// Database URL (`postgres://...` or `sqlite:...`).
    #[arg(long, global = true, env = "BULUT_DATABASE_URL")]
    database_url: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply database migrations.
    Migrate,
    /// Manage namespaces.
    #[command(subcommand)]
    Namespace(NamespaceCommand),
    /// Manage deployments.
    #[command(subcommand)]
    Deployment(DeploymentCommand),
    /// Build an archive and roll it out to a deployment.
    Deploy(DeployArgs),
    /// List a deployment's revisions, oldest first.
    Revisions(TargetArgs),
}

#[derive(Subcommand, Debug)]
enum NamespaceCommand {
    /// Create a namespace.
    Create {
        /// Namespace name.
        name: String,
    },
    /// Show a namespace.
    Show {
        /// Namespace name.
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum DeploymentCommand {
    /// Create a deployment.
    Create(TargetArgs),
    /// Show a deployment.
    Show(TargetArgs),
}

#[derive(clap::Args, Debug)]
struct TargetArgs {
    /// Namespace name.
    #[arg(long, short)]
    namespace: String,
    /// Deployment name.
    #[arg(long, short)]
    deployment: String,
}

#[derive(clap::Args, Debug)]
struct DeployArgs {
    #[command(flatten)]
    target: TargetArgs,
    /// Entrypoint relative to the archive root.
    #[arg(long, short, default_value = "")]
    entrypoint: String,
    /// Zip archive of the build output.
    archive: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bulut_deployer=info,bulut_core=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let cli = Cli::parse();
    let config = load_config(cli.database_url.as_deref())?;
    let persistence = bulut_core::persistence::connect(&config.database_url)
        .await
        .context("failed to connect to database")?;

    match cli.command {
        Command::Migrate => {
            // `connect` already applied pending migrations.
            info!("Database schema is up to date");
        }
        Command::Namespace(NamespaceCommand::Create { name }) => {
            print_json(&persistence.create_namespace(&name).await?)?;
        }
        Command::Namespace(NamespaceCommand::Show { name }) => {
            print_json(&namespace(persistence.as_ref(), &name).await?)?;
        }
        Command::Deployment(DeploymentCommand::Create(target)) => {
            let ns = namespace(persistence.as_ref(), &target.namespace).await?;
            print_json(&persistence.create_deployment(&ns.id, &target.deployment).await?)?;
        }
        Command::Deployment(DeploymentCommand::Show(target)) => {
            print_json(&deployment(persistence.as_ref(), &target).await?)?;
        }
        Command::Revisions(target) => {
            let dep = deployment(persistence.as_ref(), &target).await?;
            print_json(&persistence.list_revisions(&dep.id).await?)?;
        }
        Command::Deploy(args) => deploy(config, persistence, args).await?,
    }

    Ok(())
}

fn load_config(database_url: Option<&str>) -> anyhow::Result<Config> {
    Ok(Config::from_lookup(|var| match (var, database_url) {
        ("BULUT_DATABASE_URL", Some(url)) => Some(url.to_string()),
        _ => std::env::var(var).ok(),
    })?)
}

async fn deploy(
    config: Config,
    persistence: Arc<dyn Persistence>,
    args: DeployArgs,
) -> anyhow::Result<()> {
    let dep = deployment(persistence.as_ref(), &args.target).await?;

    let runtime = DeployerRuntime::builder()
        .config(config)
        .persistence(persistence)
        .build()?
        .start()
        .await?;

    // The job removes its archive when it ends, so hand it a copy.
    let upload = runtime
        .uploads_dir()
        .join(format!("{}.zip", uuid::Uuid::new_v4()));
    tokio::fs::copy(&args.archive, &upload)
        .await
        .with_context(|| format!("failed to stage {}", args.archive.display()))?;

    let job_id = match runtime
        .queue()
        .submit_build(&dep.namespace_id, &dep.id, &upload, &args.entrypoint)
        .await
    {
        Ok(id) => id,
        Err(e) => {
            let _ = tokio::fs::remove_file(&upload).await;
            return Err(e.into());
        }
    };

    let status = runtime.tracker().wait(&job_id).await;
    runtime.shutdown().await?;

    let Some(status) = status else {
        bail!("job {} is no longer tracked", job_id);
    };
    print_json(&status)?;

    if status.state == RolloutState::Failed {
        bail!(
            "rollout failed: {}",
            status.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

async fn namespace(persistence: &dyn Persistence, name: &str) -> anyhow::Result<Namespace> {
    persistence
        .find_namespace_by_name(name)
        .await?
        .with_context(|| format!("namespace '{}' not found", name))
}

async fn deployment(persistence: &dyn Persistence, target: &TargetArgs) -> anyhow::Result<Deployment> {
    let ns = namespace(persistence, &target.namespace).await?;
    persistence
        .find_deployment_by_name(&ns.id, &target.deployment)
        .await?
        .with_context(|| {
            format!(
                "deployment '{}' not found in namespace '{}'",
                target.deployment, target.namespace
            )
        })
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
