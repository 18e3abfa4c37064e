use anyhow::Context;
use cim_core::{CimError, ImageEngine, ImageIdentity, PipelineConfig, RelativePath};
use cim_image::{ImageBuilder, ImageExtender, ImageForker, ImageVerifier, LinkOutcome};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cimkit")]
#[command(about = "Build, fork and verify composite filesystem images", long_about = None)]
struct Cli {
    /// Pipeline configuration (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log debug detail
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new image holding one source entry
    Build {
        container: PathBuf,
        image: String,
        source: PathBuf,
        /// Path of the entry inside the image
        target: String,
    },
    /// Create a new image holding a whole source tree
    BuildTree {
        container: PathBuf,
        image: String,
        source: PathBuf,
    },
    /// Add a hardlink to an existing image
    Link {
        container: PathBuf,
        image: String,
        existing: String,
        new: String,
    },
    /// Fork an image with one path deleted
    Fork {
        container: PathBuf,
        image: String,
        delete: String,
        fork: String,
    },
    /// Compare one image entry with its source
    Verify {
        container: PathBuf,
        image: String,
        source: PathBuf,
        target: String,
    },
    /// Compare a whole image with a source tree
    VerifyTree {
        container: PathBuf,
        image: String,
        source: PathBuf,
    },
    /// Report whether a path is present in an image
    Exists {
        container: PathBuf,
        image: String,
        path: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(err) = run(cli) {
        eprintln!("Error: {:#}", err);
        let code = err.downcast_ref::<CimError>().map(CimError::code).unwrap_or(1);
        std::process::exit(code);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if !cim_platform::is_elevated() {
        log::debug!("Not running elevated; some source metadata may be unreadable");
    }
    cim_platform::enable_image_privileges()?;

    #[cfg(windows)]
    let engine = cim_image::CimFsEngine::new();
    #[cfg(not(windows))]
    let engine = cim_image::LocalEngine::new(&config);

    execute(&engine, &config, cli.command)?;
    Ok(())
}

fn execute<E: ImageEngine>(engine: &E, config: &PipelineConfig, command: Commands) -> cim_core::Result<()> {
    match command {
        Commands::Build { container, image, source, target } => {
            let identity = ImageBuilder::new(engine, config).build_new(
                &container,
                &image,
                &source,
                &RelativePath::parse(&target)?,
            )?;
            println!("Built {}", identity);
        }
        Commands::BuildTree { container, image, source } => {
            let identity = ImageBuilder::new(engine, config).build_tree(&container, &image, &source)?;
            println!("Built {}", identity);
        }
        Commands::Link { container, image, existing, new } => {
            let identity = ImageIdentity::new(container, image)?;
            let outcome = ImageExtender::new(engine).add_hardlink(
                &identity,
                &RelativePath::parse(&existing)?,
                &RelativePath::parse(&new)?,
            )?;
            match outcome {
                LinkOutcome::Linked => println!("Linked {} -> {}", new, existing),
                LinkOutcome::DirectoryNotLinked => {
                    println!("{} is a directory; directories cannot be hardlinked", existing)
                }
            }
        }
        Commands::Fork { container, image, delete, fork } => {
            let identity = ImageIdentity::new(container, image)?;
            let forked =
                ImageForker::new(engine).fork_with_deletion(&identity, &RelativePath::parse(&delete)?, &fork)?;
            println!("Forked {}", forked);
        }
        Commands::Verify { container, image, source, target } => {
            let identity = ImageIdentity::new(container, image)?;
            let verifier = ImageVerifier::new(engine, config);
            let path = RelativePath::parse(&target)?;
            let mismatches = verifier.verify_entry(&identity, &source, &path)?;
            for mismatch in &mismatches {
                log::warn!("{}: {}", path, mismatch);
            }
            println!("{}: {} mismatch(es)", path, mismatches.len());
        }
        Commands::VerifyTree { container, image, source } => {
            let identity = ImageIdentity::new(container, image)?;
            let report = ImageVerifier::new(engine, config).verify_image_tree(&identity, &source)?;
            for (path, mismatches) in &report.mismatches {
                for mismatch in mismatches {
                    log::warn!("{}: {}", path, mismatch);
                }
            }
            println!(
                "Checked {} entries: {} mismatch(es)",
                report.entries_checked,
                report.mismatch_count()
            );
        }
        Commands::Exists { container, image, path } => {
            let identity = ImageIdentity::new(container, image)?;
            let exists = ImageVerifier::new(engine, config).path_exists(&identity, &RelativePath::parse(&path)?)?;
            println!("{}", exists);
        }
    }
    Ok(())
}
