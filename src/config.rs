use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use clap::Args;

pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_ENRICHMENT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_SLUG_ATTEMPTS: usize = 5;
const DB_FILENAME: &str = "bazaar.db.json";
const WORKDIR_NAME: &str = ".bazaar";

#[derive(Args, Debug, Clone)]
pub struct FlatConfig {
    #[arg(long, global = true, env = "BAZAAR_WORKDIR", help = "Directory holding the item database (default: ~/.bazaar)")]
    workdir: Option<PathBuf>,

    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true, help = "API key for image generation; images are skipped when unset")]
    api_key: Option<String>,

    #[arg(long, global = true, env = "OPENAI_API_URL", default_value = DEFAULT_API_URL, help = "Base URL of the image generation API")]
    api_url: String,

    #[arg(long, global = true, env = "BAZAAR_ENRICHMENT_TIMEOUT", default_value = "5s", value_parser = humantime::parse_duration, help = "Upper bound for one image generation call")]
    enrichment_timeout: Duration,

    #[arg(long, global = true, env = "BAZAAR_SLUG_ATTEMPTS", default_value_t = DEFAULT_SLUG_ATTEMPTS, help = "How many slugs to try before giving up on a collision")]
    slug_attempts: usize,

    #[arg(long, global = true, env = "BAZAAR_LOG_LEVEL", default_value = "info", help = "Log level (error, warn, info, debug, trace)")]
    log_level: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub storage: StorageConfiguration,
    pub enrichment: EnrichmentConfiguration,
    pub identifiers: IdentifierConfiguration,
    pub log_level: log::LevelFilter,
}

#[derive(Debug, Clone)]
pub struct StorageConfiguration {
    pub workdir: PathBuf, // BAZAAR_WORKDIR
    pub db_path: PathBuf,
}

#[derive(Clone)]
pub struct EnrichmentConfiguration {
    pub api_key: Option<String>, // OPENAI_API_KEY
    pub api_url: String,         // OPENAI_API_URL
    pub timeout: Duration,       // BAZAAR_ENRICHMENT_TIMEOUT
}

impl std::fmt::Debug for EnrichmentConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrichmentConfiguration")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("api_url", &self.api_url)
            .field("timeout", &humantime::format_duration(self.timeout).to_string())
            .finish()
    }
}

impl Default for EnrichmentConfiguration {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: DEFAULT_API_URL.to_string(),
            timeout: DEFAULT_ENRICHMENT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IdentifierConfiguration {
    pub max_attempts: usize, // BAZAAR_SLUG_ATTEMPTS
}

impl Default for IdentifierConfiguration {
    fn default() -> Self {
        Self { max_attempts: DEFAULT_SLUG_ATTEMPTS }
    }
}

impl TryFrom<FlatConfig> for Config {
    type Error = anyhow::Error;

    fn try_from(value: FlatConfig) -> Result<Self, Self::Error> {
        let workdir = match value.workdir {
            Some(workdir) => workdir,
            None => home::home_dir()
                .ok_or_else(|| anyhow::anyhow!("cannot determine home directory, pass --workdir"))?
                .join(WORKDIR_NAME),
        };
        if value.slug_attempts == 0 {
            anyhow::bail!("slug attempts must be at least 1");
        }
        let log_level = log::LevelFilter::from_str(&value.log_level)
            .map_err(|_| anyhow::anyhow!("unknown log level '{}'", value.log_level))?;
        let db_path = workdir.join(DB_FILENAME);
        Ok(Config {
            storage: StorageConfiguration {
                workdir,
                db_path,
            },
            enrichment: EnrichmentConfiguration {
                api_key: value.api_key.filter(|x| !x.trim().is_empty()),
                api_url: value.api_url,
                timeout: value.enrichment_timeout,
            },
            identifiers: IdentifierConfiguration {
                max_attempts: value.slug_attempts,
            },
            log_level,
        })
    }
}

pub fn get_or_create_workdir(workdir: &Path) -> anyhow::Result<()> {
    if !workdir.exists() {
        std::fs::create_dir_all(workdir)?;
    }
    if !workdir.is_dir() {
        anyhow::bail!("workdir is not a directory");
    }
    Ok(())
}
