// Client configuration, loaded once at startup from a TOML file.
//
// ```toml
// [client]
// webservice = "http://localhost:8080"
//
// [anonymizer]
// blur_strength = 99
// model_path = "seeta_fd_frontal_v1.0.bin"
// ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::anonymize::{BlurStrength, JpegQuality};

pub const DEFAULT_CONFIG_FILE: &str = "sensify-client-config.toml";

/// Overrides `client.webservice` when set.
pub const WEBSERVICE_ENV: &str = "SENSIFY_WEBSERVICE";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub client: ClientConfig,
    #[serde(default)]
    pub anonymizer: AnonymizerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the web service.
    pub webservice: String,
    /// Per-attempt HTTP timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Where downloaded `image_<id>.jpg` files are written.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnonymizerConfig {
    pub blur_strength: u32,
    pub blur_sigma: f32,
    pub jpeg_quality: u8,
    /// SeetaFace model file. Without one, nothing gets blurred.
    pub model_path: Option<PathBuf>,
}

impl Default for AnonymizerConfig {
    fn default() -> Self {
        AnonymizerConfig {
            blur_strength: 99,
            blur_sigma: 30.0,
            jpeg_quality: 95,
            model_path: None,
        }
    }
}

impl AnonymizerConfig {
    /// Blur strength and JPEG quality, checked.
    pub fn checked(&self) -> Result<(BlurStrength, JpegQuality)> {
        let strength =
            BlurStrength::new(self.blur_strength).context("invalid anonymizer.blur_strength")?;
        let quality =
            JpegQuality::new(self.jpeg_quality).context("invalid anonymizer.jpeg_quality")?;
        Ok((strength, quality))
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Config {
    /// Read and parse `path`, then apply the environment override.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file '{}'", path.display()))?;
        let mut config = Self::from_toml(&content)
            .with_context(|| format!("parsing config file '{}'", path.display()))?;
        if let Ok(url) = std::env::var(WEBSERVICE_ENV) {
            config.client.webservice = url;
        }
        Ok(config)
    }

    /// Parse and reject out-of-range anonymizer settings.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.anonymizer.checked()?;
        Ok(config)
    }

    /// The validated base URL, without a trailing `/`.
    pub fn base_url(&self) -> Result<String> {
        normalize_base_url(&self.client.webservice)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.client.timeout_secs.map(Duration::from_secs)
    }
}

/// Check that `raw` is an absolute `http` URL and strip any trailing slash.
pub fn normalize_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let url = Url::parse(trimmed).with_context(|| format!("baseurl '{}' is not a valid URL", trimmed))?;
    match url.scheme() {
        "http" => {}
        "https" => bail!("baseurl '{}' starts with https, which is not supported (use http)", trimmed),
        other => bail!("baseurl '{}' has unsupported scheme '{}'", trimmed, other),
    }
    if url.host_str().map_or(true, str::is_empty) {
        bail!("baseurl '{}' has no host", trimmed);
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

/// Pick the config file to use: `requested` if it exists, else the per-user
/// `<config dir>/sensify/client.toml` if that exists.
pub fn resolve_path(requested: &Path) -> Option<PathBuf> {
    if requested.is_file() {
        return Some(requested.to_path_buf());
    }
    let fallback = dirs::config_dir()?.join("sensify").join("client.toml");
    fallback.is_file().then_some(fallback)
}
