use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

use code_runner::config::{get_config, init_config, EngineConfig};
use code_runner::core::{supported_languages, FaultClass, Language};
use code_runner::sandbox::{build_base_images, clean_base_images, list_base_images, BaseImageStatus};
use code_runner::Engine;

#[derive(Debug, Parser)]
#[command(name = "code-runner", version, about = "Run untrusted code in a throwaway sandbox")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a source file (language inferred from its extension)
    Run {
        source: PathBuf,
        #[arg(short, long)]
        language: Option<String>,
        /// Dependency tokens: local paths or registry package names
        #[arg(short, long, num_args = 1..)]
        deps: Vec<String>,
    },
    /// Run inline code
    Exec {
        #[arg(short, long)]
        language: String,
        #[arg(short, long)]
        code: String,
        #[arg(short, long, num_args = 1..)]
        deps: Vec<String>,
    },
    /// Manage cached base images
    Images {
        #[command(subcommand)]
        action: ImagesCommand,
    },
}

#[derive(Debug, Subcommand)]
enum ImagesCommand {
    /// Build base images (all languages when none are given)
    Build { languages: Vec<String> },
    /// Show the state of every base image
    List,
    /// Remove every cached base image
    Clean,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("code_runner=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    init_config(EngineConfig::load().context("Failed to load configuration")?)?;
    let config = get_config();

    let exit_code = match cli.command {
        Command::Run {
            source,
            language,
            deps,
        } => {
            let language = match language {
                Some(language) => language,
                None => source
                    .extension()
                    .and_then(|ext| Language::from_extension(&ext.to_string_lossy()))
                    .map(|l| l.id().to_string())
                    .ok_or_else(|| {
                        anyhow!(
                            "Cannot infer the language of {:?}; pass --language (one of: {})",
                            source,
                            supported_languages().join(", ")
                        )
                    })?,
            };
            let code = tokio::fs::read(&source)
                .await
                .with_context(|| format!("Failed to read {:?}", source))?;
            run_submission(config, &language, &code, &deps).await?
        }
        Command::Exec {
            language,
            code,
            deps,
        } => run_submission(config, &language, code.as_bytes(), &deps).await?,
        Command::Images { action } => manage_images(action, config).await?,
    };

    std::process::exit(exit_code);
}

/// Execute one submission and print its merged output
async fn run_submission(config: &EngineConfig, language: &str, code: &[u8], deps: &[String]) -> Result<i32> {
    let engine = Engine::docker(config.clone());

    match engine.execute_combined(language, code, deps).await {
        Ok(output) => {
            let mut stdout = std::io::stdout();
            stdout.write_all(output.combined_output.as_bytes())?;
            stdout.flush()?;
            Ok(output.exit_code.clamp(0, 255) as i32)
        }
        Err(e) => {
            eprintln!("{}", e.user_message());
            Ok(match e.class() {
                FaultClass::Client => 1,
                FaultClass::Server => 2,
            })
        }
    }
}

async fn manage_images(action: ImagesCommand, config: &EngineConfig) -> Result<i32> {
    match action {
        ImagesCommand::Build { languages } => {
            let languages = if languages.is_empty() {
                Language::ALL.to_vec()
            } else {
                languages
                    .iter()
                    .map(|id| Language::lookup(id))
                    .collect::<Result<Vec<_>, _>>()?
            };

            let report = build_base_images(&languages, config.limits().build_timeout).await?;
            let mut failed = 0;
            for (language, outcome) in report {
                match outcome {
                    Ok(BaseImageStatus::Cached) => println!("{:<12} already built", language),
                    Ok(BaseImageStatus::Built) => println!("{:<12} built", language),
                    Err(e) => {
                        failed += 1;
                        println!("{:<12} FAILED: {}", language, e.user_message());
                    }
                }
            }
            if failed > 0 {
                bail!("{} base image(s) failed to build", failed);
            }
            Ok(0)
        }
        ImagesCommand::List => {
            for image in list_base_images().await? {
                match image.details {
                    Some((created, size)) => println!(
                        "{:<12} {:<40} {} {:.1}MB",
                        image.language,
                        image.tag,
                        created,
                        size as f64 / 1024.0 / 1024.0
                    ),
                    None => println!("{:<12} {:<40} not built", image.language, image.tag),
                }
            }
            Ok(0)
        }
        ImagesCommand::Clean => {
            let removed = clean_base_images().await?;
            info!("Removed {} base image(s)", removed);
            println!("Removed {} base image(s)", removed);
            Ok(0)
        }
    }
}
