// Entrypoint for the CLI application.
// - Init once: logger, config, HTTP client, face detector.
// - Then hand the pipeline to the menu loop, which runs until "end".
// - Only startup problems are fatal; command failures stay inside the loop.

use anyhow::{bail, Context, Result};
use clap::Parser;
use dialoguer::Input;
use env_logger::Builder;
use log::{info, warn, LevelFilter};
use std::io::Write;
use std::path::PathBuf;

use sensify_cli::anonymize::{Anonymizer, GaussianBlur};
use sensify_cli::api::{HttpTransport, ResilientClient, RetryPolicy};
use sensify_cli::config::{self, AnonymizerConfig, Config, DEFAULT_CONFIG_FILE};
use sensify_cli::detect::{NoDetector, RegionDetector};
use sensify_cli::{ui, Pipeline};

/// Command-line arguments for the client binary
#[derive(Parser, Debug)]
#[command(author, version, about = "Blur faces locally and talk to the Sensify photo service", long_about = None)]
struct Args {
    /// Path to the client configuration file (TOML format).
    ///
    /// Prompted for when omitted. Example: sensify-client-config.toml
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// `[HH:MM:SS] [LEVEL] message` on stderr, warn and up unless `RUST_LOG` says
/// otherwise.
fn init_logger() {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] [{}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter_level(LevelFilter::Warn)
        .parse_default_env()
        .init();
}

fn choose_config(args: &Args) -> Result<PathBuf> {
    let requested = match &args.config {
        Some(path) => path.clone(),
        None => {
            let answer: String = Input::<String>::new()
                .with_prompt("What config file to use for this session?")
                .default(DEFAULT_CONFIG_FILE.into())
                .interact_text()?;
            PathBuf::from(answer)
        }
    };
    match config::resolve_path(&requested) {
        Some(path) => Ok(path),
        None => bail!("config file '{}' does not exist", requested.display()),
    }
}

fn build_detector(config: &AnonymizerConfig) -> Result<Box<dyn RegionDetector>> {
    match &config.model_path {
        #[cfg(feature = "face-detection")]
        Some(path) => {
            let detector = sensify_cli::detect::RustfaceDetector::from_file(path)
                .with_context(|| format!("loading face model '{}'", path.display()))?;
            info!("face model loaded from '{}'", path.display());
            Ok(Box::new(detector))
        }
        #[cfg(not(feature = "face-detection"))]
        Some(path) => {
            warn!(
                "built without face detection, ignoring model '{}'; uploads will not be blurred",
                path.display()
            );
            Ok(Box::new(NoDetector))
        }
        None => {
            warn!("no face model configured; uploads will not be blurred");
            Ok(Box::new(NoDetector))
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logger();

    println!("** Welcome to Sensify Client **");
    println!();

    let config_path = choose_config(&args)?;
    let config = Config::load(&config_path)?;
    let base_url = config.base_url()?;

    let (strength, quality) = config.anonymizer.checked()?;
    let anonymizer = Anonymizer::new(
        build_detector(&config.anonymizer)?,
        GaussianBlur::new(strength, config.anonymizer.blur_sigma),
        quality,
    );

    let transport = HttpTransport::new(config.timeout()).context("Failed to build HTTP client")?;
    let client = ResilientClient::new(transport, base_url, RetryPolicy::default());
    info!("using web service at {}", client.base_url());

    let pipeline = Pipeline::new(client, anonymizer, config.client.download_dir.clone());

    // Blocks until the user picks "end".
    ui::main_menu(&pipeline)?;

    println!();
    println!("** done **");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn argument_definitions_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn config_flag_is_optional() {
        let args = Args::try_parse_from(["sensify"]).unwrap();
        assert!(args.config.is_none());

        let args = Args::try_parse_from(["sensify", "--config", "lab.toml"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("lab.toml")));

        let args = Args::try_parse_from(["sensify", "-c", "lab.toml"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("lab.toml")));
    }

    #[test]
    fn help_is_not_mistaken_for_a_config_file() {
        let err = Args::try_parse_from(["sensify", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn stray_positional_is_rejected() {
        assert!(Args::try_parse_from(["sensify", "lab.toml"]).is_err());
    }
}
