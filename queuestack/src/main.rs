//! QueueStack - in-process queue storage service
//!
//! Runs the sample walkthroughs against an in-process service and issues
//! shared access signatures signed with the configured account key.

mod config;
mod samples;

use anyhow::Context;
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use queuestack_auth::{AccessController, AccountPermissions, QueuePermissions, ResourceTypes};
use queuestack_queue::spawn_reclaimer;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::samples::Samples;

#[derive(Parser, Debug)]
#[command(name = "queuestack")]
#[command(about = "In-process queue storage service", long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "QUEUESTACK_LOG_LEVEL")]
    log_level: String,

    /// Configuration file (TOML)
    #[arg(short, long, env = "QUEUESTACK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run sample walkthroughs (all of them when no names are given)
    Samples {
        names: Vec<String>,
    },

    /// Print a queue shared access signature
    Sas {
        /// Queue the token is scoped to
        #[arg(long)]
        queue: String,

        /// Permission letters drawn from "raup"
        #[arg(long, required_unless_present = "id", conflicts_with = "id")]
        permissions: Option<String>,

        /// Lifetime in seconds
        #[arg(long, default_value = "3600")]
        expires_in: i64,

        /// Stored access policy to take the grant from
        #[arg(long)]
        id: Option<String>,
    },

    /// Print an account shared access signature
    AccountSas {
        /// Resource type letters drawn from "sco"
        #[arg(long, default_value = "sco")]
        resource_types: String,

        /// Permission letters drawn from "rwdlacup"
        #[arg(long)]
        permissions: String,

        /// Lifetime in seconds
        #[arg(long, default_value = "3600")]
        expires_in: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "queuestack={0},queuestack_queue={0},queuestack_auth={0},queuestack_core={0}",
                    args.log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load(args.config.as_deref()).context("failed to load configuration")?;
    let key = config.shared_key()?;

    match args.command {
        Command::Samples { names } => {
            let samples = Samples::new(&config.account.name, key, config.queue.encoding);

            let reclaimer = config.reclaimer.interval_secs.map(|secs| {
                info!(interval_secs = secs, "Starting expiry reclaimer");
                spawn_reclaimer(
                    samples.service().clone(),
                    std::time::Duration::from_secs(secs.max(1)),
                )
            });

            let ran = samples.run(&names)?;
            info!(samples = ran, "All samples passed");

            if let Some(handle) = reclaimer {
                handle.abort();
            }
        }
        Command::Sas {
            queue,
            permissions,
            expires_in,
            id,
        } => {
            let access = AccessController::new(config.account.name, key);
            let token = match (id, permissions) {
                (Some(id), _) => access.generate_identifier_token(&queue, &id),
                (None, Some(permissions)) => access.generate_queue_token(
                    &queue,
                    permissions.parse::<QueuePermissions>()?,
                    Utc::now() + Duration::seconds(expires_in),
                    None,
                ),
                (None, None) => anyhow::bail!("either --permissions or --id is required"),
            };
            println!("{}", token);
        }
        Command::AccountSas {
            resource_types,
            permissions,
            expires_in,
        } => {
            let access = AccessController::new(config.account.name, key);
            let token = access.generate_account_token(
                resource_types.parse::<ResourceTypes>()?,
                permissions.parse::<AccountPermissions>()?,
                Utc::now() + Duration::seconds(expires_in),
                None,
            );
            println!("{}", token);
        }
    }

    Ok(())
}
