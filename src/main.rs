use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use indicatif::MultiProgress;
use std::path::PathBuf;
use tarpon::catalog::Catalog;
use tarpon::error::Result;
use tarpon::installer::{InstallOptions, Installer};
use tarpon::paths::{self, InstallDirs};
use tarpon::resolver::{self, VersionConstraint};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "tarpon")]
#[command(author, version, about = "Release-artifact installer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Catalog file of release manifests
    #[arg(long, global = true, env = "TARPON_CATALOG")]
    catalog: Option<PathBuf>,

    /// Install prefix (bin/, completions and state derive from it)
    #[arg(long, global = true)]
    prefix: Option<PathBuf>,

    /// Override the executable directory
    #[arg(long, global = true)]
    bin_dir: Option<PathBuf>,

    /// Override the completion-script directory
    #[arg(long, global = true)]
    completion_dir: Option<PathBuf>,

    /// Override the state directory (records, locks, staging)
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve, fetch, verify and install a package
    Install {
        /// Package name
        name: String,

        /// Exact version, or "latest"
        #[arg(long, default_value = "latest")]
        version: String,

        /// Also install the package's shell-completion script
        #[arg(long)]
        with_completion: bool,
    },

    /// Remove an installed package
    Uninstall {
        /// Package name
        name: String,
    },

    /// Show what is installed for a package
    Query {
        /// Package name
        name: String,
    },

    /// List catalog packages and installed versions
    List,

    /// Generate shell completions for tarpon itself
    Completions {
        /// Target shell
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "✗".red(), e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let prefix = cli.prefix.clone().unwrap_or_else(paths::detect_prefix);
    let mut dirs = InstallDirs::from_prefix(&prefix);
    if let Some(bin) = cli.bin_dir.clone() {
        dirs.bin_dir = bin;
    }
    if let Some(completion) = cli.completion_dir.clone() {
        dirs.completion_dir = completion;
    }
    if let Some(state) = cli.state_dir.clone() {
        dirs.state_dir = state;
    }

    match cli.command {
        Commands::Install {
            name,
            version,
            with_completion,
        } => {
            let catalog = load_catalog(cli.catalog.as_deref())?;
            let constraint = VersionConstraint::parse(&version);
            let manifest = resolver::resolve(&catalog, &name, &constraint)?;

            let installer = Installer::new(dirs)?;
            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    ctrl_c.cancel();
                }
            });

            let progress = MultiProgress::new();
            let outcome = installer
                .install(
                    manifest,
                    &InstallOptions { with_completion },
                    &cancel,
                    Some(&progress),
                )
                .await?;

            if outcome.already_installed {
                println!(
                    "{} {} {} already installed",
                    "✓".green(),
                    outcome.record.name.bold(),
                    outcome.record.version.dimmed()
                );
            } else {
                println!(
                    "{} Installed {} {} to {}",
                    "✓".green(),
                    outcome.record.name.bold().green(),
                    outcome.record.version.dimmed(),
                    outcome.record.bin_path.display()
                );
            }
            if !outcome.verified {
                println!(
                    "{} {} has no checksum in the catalog; installed unverified",
                    "⚠".yellow(),
                    outcome.record.name.bold()
                );
            }
        }
        Commands::Uninstall { name } => {
            let installer = Installer::new(dirs)?;
            let removed = installer.uninstall(&name)?;
            println!(
                "{} Uninstalled {} {}",
                "✓".green(),
                removed.name.bold(),
                removed.version.dimmed()
            );
        }
        Commands::Query { name } => {
            let installer = Installer::new(dirs)?;
            match installer.query(&name)? {
                Some(record) => {
                    println!("{} {}", record.name.bold(), record.version);
                    println!("  binary: {}", record.bin_path.display());
                    if let Some(completion) = &record.completion_path {
                        println!("  completion: {}", completion.display());
                    }
                    match &record.checksum {
                        Some(checksum) => println!("  checksum: {}", checksum.dimmed()),
                        None => println!("  checksum: {}", "unverified".yellow()),
                    }
                    println!("  installed: {}", record.installed_at.to_rfc3339().dimmed());
                }
                None => println!("{} is not installed", name.bold()),
            }
        }
        Commands::List => {
            let catalog = load_catalog(cli.catalog.as_deref())?;
            let installer = Installer::new(dirs)?;
            for name in catalog.names() {
                let releases = catalog.manifests_for(name).unwrap_or_default();
                let latest = releases.last().map(|m| m.version.as_str()).unwrap_or("-");
                match installer.query(name)? {
                    Some(record) if record.version == latest => {
                        println!("{} {} {}", name.bold(), latest, "(installed)".green());
                    }
                    Some(record) => {
                        println!(
                            "{} {} {}",
                            name.bold(),
                            latest,
                            format!("(installed: {})", record.version).yellow()
                        );
                    }
                    None => println!("{} {}", name.bold(), latest),
                }
            }
            // Installed packages whose manifests left the catalog
            for record in installer.installed()? {
                if catalog.manifests_for(&record.name).is_none() {
                    println!(
                        "{} {} {}",
                        record.name.bold(),
                        record.version,
                        "(installed, not in catalog)".dimmed()
                    );
                }
            }
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "tarpon", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn load_catalog(path: Option<&std::path::Path>) -> Result<Catalog> {
    let path =
        path.ok_or_else(|| anyhow::anyhow!("no catalog: pass --catalog or set TARPON_CATALOG"))?;
    let catalog = Catalog::load(path)?;
    for warning in catalog.warnings() {
        eprintln!("{} {}", "⚠".yellow(), warning);
    }
    Ok(catalog)
}
