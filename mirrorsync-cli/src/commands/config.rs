//! `mirrorsync config`: local configuration file, no daemon needed.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;

use mirrorsync_core::config::{config_path_at, init_at, load_at};
use mirrorsync_core::ConfigError;

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Write a default config unless one already exists.
    Init(InitArgs),
    /// Print the config file.
    Show,
    /// Check the config and list every problem found.
    Validate,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Source root in engine syntax (`remote:path` or a local path).
    #[arg(long)]
    pub source: Option<String>,

    /// Destination root in engine syntax.
    #[arg(long)]
    pub destination: Option<String>,
}

pub fn run(command: ConfigCommand) -> Result<()> {
    let home = super::home()?;
    let path = config_path_at(&home);

    match command {
        ConfigCommand::Init(args) => {
            let existed = path.exists();
            init_at(&home, args.source, args.destination)
                .with_context(|| format!("failed to initialise {}", path.display()))?;
            if existed {
                println!("config already exists: {}", path.display());
            } else {
                println!("✓ Wrote {}", path.display());
            }
        }
        ConfigCommand::Show => {
            let contents = std::fs::read_to_string(&path).with_context(|| {
                format!(
                    "cannot read {}; run `mirrorsync config init`",
                    path.display()
                )
            })?;
            print!("{contents}");
        }
        ConfigCommand::Validate => {
            let config = load_at(&home).context("failed to load configuration")?;
            match config.validate() {
                Ok(()) => println!("{} {}", "✓".green(), path.display()),
                Err(ConfigError::Invalid { problems }) => {
                    for problem in &problems {
                        println!("{} {problem}", "✗".red());
                    }
                    anyhow::bail!("{} problem(s) in {}", problems.len(), path.display());
                }
                Err(err) => return Err(err).context("failed to validate configuration"),
            }
        }
    }

    Ok(())
}
