use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::debug;
use trigger_core::platform::DEFAULT_FLOW_COMPONENT;
use trigger_core::{Credential, PlatformSettings, RetryPolicy};
use url::Url;

pub const CONFIG_FILE: &str = "config.json";
pub const DEFAULT_DATA_DIR: &str = "data";

/// Values read from the process environment.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub token: Option<String>,
    pub url: Option<String>,
    pub data_dir: Option<PathBuf>,
}

impl Environment {
    /// Reads `KBC_TOKEN`, `KBC_URL` and `KBC_DATADIR`. Empty values count as unset.
    pub fn from_env() -> Self {
        let read = |name: &str| env::var(name).ok().filter(|value| !value.trim().is_empty());
        Self {
            token: read("KBC_TOKEN"),
            url: read("KBC_URL"),
            data_dir: read("KBC_DATADIR").map(PathBuf::from),
        }
    }
}

/// Command-line values that take precedence over the environment and `config.json`.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub data_dir: Option<PathBuf>,
    pub url: Option<String>,
    pub flow_ids: Vec<String>,
    pub output_list_flows: bool,
}

/// The `parameters` object of `config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Parameters {
    pub flow_trigger_ids: Vec<String>,
    pub output_list_flows: bool,
    pub flow_component_id: String,
    pub page_size: u32,
    pub retry: RetryParameters,
    pub request_timeout_secs: u64,
    pub debug: bool,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            flow_trigger_ids: Vec::new(),
            output_list_flows: false,
            flow_component_id: DEFAULT_FLOW_COMPONENT.to_string(),
            page_size: 100,
            retry: RetryParameters::default(),
            request_timeout_secs: 30,
            debug: false,
        }
    }
}

impl Parameters {
    /// Loads the parameters from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file; using defaults");
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        let file: ConfigFile = serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(file.parameters)
    }

    fn validate(&self) -> Result<()> {
        if self.flow_component_id.trim().is_empty() {
            bail!("parameters.flow_component_id must not be empty");
        }
        if self.page_size == 0 {
            bail!("parameters.page_size must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            bail!("parameters.retry.max_attempts must be at least 1");
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            bail!("parameters.retry.initial_backoff_ms exceeds max_backoff_ms");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryParameters {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryParameters {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
        }
    }
}

impl From<&RetryParameters> for RetryPolicy {
    fn from(value: &RetryParameters) -> Self {
        Self {
            max_attempts: value.max_attempts,
            initial_backoff: Duration::from_millis(value.initial_backoff_ms),
            max_backoff: Duration::from_millis(value.max_backoff_ms),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    parameters: Parameters,
}

/// Fully resolved configuration of one invocation.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub data_dir: PathBuf,
    pub parameters: Parameters,
    pub platform: PlatformSettings,
    pub retry: RetryPolicy,
}

impl RunConfig {
    pub fn load(env: &Environment, overrides: &Overrides) -> Result<Self> {
        let data_dir = overrides
            .data_dir
            .clone()
            .or_else(|| env.data_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        let mut parameters = Parameters::load(&data_dir.join(CONFIG_FILE))?;
        if !overrides.flow_ids.is_empty() {
            parameters.flow_trigger_ids = overrides.flow_ids.clone();
        }
        if overrides.output_list_flows {
            parameters.output_list_flows = true;
        }
        parameters.validate()?;

        let raw_url = overrides
            .url
            .as_deref()
            .or(env.url.as_deref())
            .context("KBC_URL is required to reach the platform")?;
        let base_url = parse_base_url(raw_url)?;
        let token = env
            .token
            .as_deref()
            .context("KBC_TOKEN is required to authenticate against the platform")?;

        let mut platform = PlatformSettings::new(base_url, Credential::new(token));
        platform.flow_component = parameters.flow_component_id.clone();
        platform.page_size = parameters.page_size;
        platform.request_timeout = Duration::from_secs(parameters.request_timeout_secs.max(1));
        let retry = RetryPolicy::from(&parameters.retry);

        Ok(Self {
            data_dir,
            parameters,
            platform,
            retry,
        })
    }

    pub fn flow_ids(&self) -> &[String] {
        &self.parameters.flow_trigger_ids
    }

    pub fn debug(&self) -> bool {
        self.parameters.debug
    }
}

fn parse_base_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).with_context(|| format!("KBC_URL `{raw}` is not a valid URL"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("KBC_URL must use http or https, got `{}`", url.scheme());
    }
    if url.cannot_be_a_base() {
        bail!("KBC_URL `{raw}` cannot be used as a base URL");
    }
    Ok(url)
}
