mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use mdman_core::MdError;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mdman")]
#[command(about = "Inspect and manage the Managed Domain store")]
#[command(version = "0.1.0")]
pub struct Cli {
    /// Store directory
    #[arg(short = 'd', long, default_value = "md")]
    pub store_dir: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List managed domains with freshly derived state
    List {
        /// Names to list; all records when empty
        names: Vec<String>,
    },
    /// Add a managed domain to the store
    Add {
        /// Hostnames, primary first
        #[arg(required = true)]
        domains: Vec<String>,
    },
    /// Update one aspect of an existing managed domain
    Update {
        /// Primary name of the record
        name: String,

        /// Aspect to update
        #[arg(value_parser = ["domains", "contacts", "agreement", "ca"])]
        aspect: String,

        /// New values for the aspect
        #[arg(required = true)]
        values: Vec<String>,
    },
    /// Remove a managed domain from the store
    Remove {
        /// Primary name of the record
        name: String,
    },
    /// Parse a configuration file and reconcile it into the store
    Sync {
        /// Path to the directive text
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::List { names } => commands::list(&cli.store_dir, &names),
        Commands::Add { domains } => commands::add(&cli.store_dir, &domains),
        Commands::Update {
            name,
            aspect,
            values,
        } => commands::update(&cli.store_dir, &name, &aspect, &values),
        Commands::Remove { name } => commands::remove(&cli.store_dir, &name),
        Commands::Sync { config } => commands::sync(&cli.store_dir, &config),
    };

    match result {
        Ok(output) => {
            let envelope = serde_json::json!({ "status": 0, "output": output });
            println!("{}", serde_json::to_string_pretty(&envelope)?);
            Ok(())
        }
        Err(e) => {
            let code = error_code(&e);
            let envelope = serde_json::json!({ "status": code, "description": e.to_string() });
            println!("{}", serde_json::to_string_pretty(&envelope)?);
            std::process::exit(code);
        }
    }
}

fn error_code(e: &anyhow::Error) -> i32 {
    match e.downcast_ref::<MdError>() {
        Some(md) => md.status_code(),
        None => 1,
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
