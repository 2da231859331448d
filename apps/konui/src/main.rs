mod commands;
mod config;
mod progress_view;
mod prompt;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use konsave_interface::KonsaveInterface;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::config::load_settings;

#[derive(Parser, Debug)]
#[command(name = "konui", version, about = "Manage Plasma desktop profiles through konsave")]
struct Cli {
    /// Settings file (defaults to ./konui.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the installed konsave version.
    Version,
    List {
        #[arg(long)]
        json: bool,
    },
    /// Save the current desktop configuration as a profile.
    Save {
        name: String,
        #[arg(long)]
        force: bool,
    },
    Apply {
        name: String,
        /// Restart the desktop shell afterwards.
        #[arg(long)]
        reload: bool,
    },
    Delete {
        name: String,
        #[arg(long, short)]
        yes: bool,
    },
    /// Export profiles to archives in the export directory.
    Export {
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        names: Vec<String>,
        #[arg(long)]
        all: bool,
    },
    Import {
        #[arg(required = true)]
        archives: Vec<PathBuf>,
        #[arg(long)]
        overwrite: bool,
    },
    ReloadSession,
}

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref())?;
    init_tracing(&settings.log_filter);
    debug!(?settings, "settings loaded");

    let konsave = KonsaveInterface::system().with_program(settings.konsave_bin.clone());
    if !matches!(cli.command, Command::Version) {
        commands::ensure_installed(&konsave).await?;
    }

    match cli.command {
        Command::Version => commands::version(&konsave).await,
        Command::List { json } => commands::list(&konsave, json).await,
        Command::Save { name, force } => commands::save(&konsave, &name, force).await,
        Command::Apply { name, reload } => commands::apply(&konsave, &name, reload).await,
        Command::Delete { name, yes } => commands::delete(&konsave, &name, yes).await,
        Command::Export { names, all } => commands::export(&konsave, &settings, &names, all).await,
        Command::Import {
            archives,
            overwrite,
        } => commands::import(&konsave, &settings, &archives, overwrite).await,
        Command::ReloadSession => commands::reload_session(konsave.runner()).await,
    }
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};

    use super::{Cli, Command};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn export_needs_names_or_all() {
        assert!(Cli::try_parse_from(["konui", "export"]).is_err());
        assert!(Cli::try_parse_from(["konui", "export", "Dark", "--all"]).is_err());

        let cli = Cli::try_parse_from(["konui", "export", "--all"]).expect("parse");
        assert!(matches!(cli.command, Command::Export { all: true, ref names } if names.is_empty()));
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from(["konui", "list", "--json", "--config", "/etc/konui.toml"])
            .expect("parse");
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("/etc/konui.toml")));
        assert!(matches!(cli.command, Command::List { json: true }));
    }
}
