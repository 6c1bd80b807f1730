//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    env,
    num::{NonZeroU32, NonZeroU64, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

mod cli;

pub use cli::{
    CliArgs, Command, DataOverride, FallbackOverride, LookupArgs, PinsArgs, PreviewsArgs,
    ScreenshotsArgs, SiteConfigArgs, SiteOverride,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "sitebake";
const ENV_PREFIX: &str = "SITEBAKE";

const DEFAULT_INTERNAL_DATA_DIR: &str = "src/_data";
const DEFAULT_PUBLIC_DATA_DIR: &str = "public/data";
const DEFAULT_CACHE_TTL_MS: u64 = 5 * 60 * 1000;
const DEFAULT_SITE_CONFIG_DIR: &str = "src/_data/site";
const DEFAULT_PREVIEW_CHUNK_SIZE: u64 = 5;
const DEFAULT_PREVIEW_CHUNK_DELAY_MS: u64 = 2000;
const DEFAULT_FRESHNESS_DAYS: u64 = 7;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 20;
const DEFAULT_MAX_BODY_BYTES: u64 = 2 * 1024 * 1024;
const DEFAULT_SCREENSHOT_CLI_PATH: &str = "shot-scraper";
const DEFAULT_SCREENSHOT_OUTPUT_DIR: &str = "public/images/screenshots";
const DEFAULT_SCREENSHOT_PUBLIC_PREFIX: &str = "/images/screenshots";
const DEFAULT_SCREENSHOT_WIDTH: u64 = 1280;
const DEFAULT_SCREENSHOT_HEIGHT: u64 = 800;
const DEFAULT_SCREENSHOT_QUALITY: u64 = 80;
const DEFAULT_SCREENSHOT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SCREENSHOT_WAIT_MS: u64 = 1000;
const DEFAULT_SCREENSHOT_CHUNK_SIZE: u64 = 2;
const DEFAULT_SCREENSHOT_CHUNK_DELAY_MS: u64 = 1000;
const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com/graphql";
const DEFAULT_FALLBACK_DIR: &str = "fallback-data";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub data: DataSettings,
    pub site: SiteSettings,
    pub previews: PreviewSettings,
    pub screenshots: ScreenshotSettings,
    pub github: GithubSettings,
    pub fallback: FallbackSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DataSettings {
    pub internal_dir: PathBuf,
    pub public_dir: PathBuf,
    pub use_public: bool,
    pub cache_ttl: Duration,
}

impl DataSettings {
    /// Directory that reads resolve against.
    pub fn read_dir(&self) -> &PathBuf {
        if self.use_public {
            &self.public_dir
        } else {
            &self.internal_dir
        }
    }
}

#[derive(Debug, Clone)]
pub struct SiteSettings {
    pub config_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PreviewSettings {
    pub chunk_size: NonZeroUsize,
    pub chunk_delay: Duration,
    pub freshness: Duration,
    pub fetch_timeout: Duration,
    pub max_body_bytes: NonZeroU64,
    pub user_agent: Option<String>,
    pub skip_domains: Option<Vec<String>>,
    pub capture_screenshots: bool,
}

#[derive(Debug, Clone)]
pub struct ScreenshotSettings {
    pub cli_path: PathBuf,
    pub output_dir: PathBuf,
    pub public_prefix: String,
    pub width: NonZeroU32,
    pub height: NonZeroU32,
    pub quality: u8,
    pub timeout: Duration,
    pub wait: Duration,
    pub chunk_size: NonZeroUsize,
    pub chunk_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct GithubSettings {
    pub user: Option<String>,
    pub token: Option<String>,
    pub api_url: Url,
}

#[derive(Debug, Clone)]
pub struct FallbackSettings {
    pub enabled: bool,
    pub dir: PathBuf,
}

/// Process environment the defaults depend on, captured once so it can be injected.
#[derive(Debug, Clone, Default)]
pub struct AmbientEnv {
    pub node_env: Option<String>,
    pub github_token: Option<String>,
    pub gh_token: Option<String>,
    pub ci: Option<String>,
    pub use_fallback_data: Option<String>,
}

impl AmbientEnv {
    pub fn from_process() -> Self {
        let var = |name: &str| env::var(name).ok();
        Self {
            node_env: var("NODE_ENV"),
            github_token: var("GITHUB_TOKEN"),
            gh_token: var("GH_TOKEN"),
            ci: var("CI"),
            use_fallback_data: var("USE_FALLBACK_DATA"),
        }
    }

    fn is_production(&self) -> bool {
        self.node_env.as_deref().map(str::trim) == Some("production")
    }

    fn wants_fallback(&self) -> bool {
        is_truthy(self.ci.as_deref()) || is_truthy(self.use_fallback_data.as_deref())
    }

    fn token(&self) -> Option<String> {
        non_blank(self.github_token.clone()).or_else(|| non_blank(self.gh_token.clone()))
    }
}

fn is_truthy(value: Option<&str>) -> bool {
    match value.map(|value| value.trim().to_ascii_lowercase()) {
        None => false,
        Some(value) => !matches!(value.as_str(), "" | "0" | "false" | "no" | "off"),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    load_with_env(cli, &AmbientEnv::from_process())
}

pub fn load_with_env(cli: &CliArgs, ambient: &AmbientEnv) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("previews.skip_domains")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_cli(cli);

    Settings::from_raw(raw, ambient)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    data: RawDataSettings,
    site: RawSiteSettings,
    previews: RawPreviewSettings,
    screenshots: RawScreenshotSettings,
    github: RawGithubSettings,
    fallback: RawFallbackSettings,
}

impl RawSettings {
    fn apply_cli(&mut self, cli: &CliArgs) {
        if let Some(level) = cli.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = cli.log_json {
            self.logging.json = Some(json);
        }

        match &cli.command {
            Command::Previews(args) => {
                self.apply_data_override(&args.data);
                self.apply_site_override(&args.site);
                self.apply_fallback_override(&args.fallback);
                if let Some(capture) = args.capture_screenshots {
                    self.previews.capture_screenshots = Some(capture);
                }
                if let Some(size) = args.chunk_size {
                    self.previews.chunk_size = Some(size as u64);
                }
                if let Some(delay) = args.chunk_delay_ms {
                    self.previews.chunk_delay_ms = Some(delay);
                }
            }
            Command::Screenshots(args) => {
                self.apply_data_override(&args.data);
                if let Some(path) = args.cli_path.as_ref() {
                    self.screenshots.cli_path = Some(path.clone());
                }
                if let Some(dir) = args.output_dir.as_ref() {
                    self.screenshots.output_dir = Some(dir.clone());
                }
            }
            Command::Pins(args) => {
                self.apply_data_override(&args.data);
                self.apply_fallback_override(&args.fallback);
                if let Some(user) = args.user.as_ref() {
                    self.github.user = Some(user.clone());
                }
            }
            Command::SiteConfig(args) => self.apply_site_override(&args.site),
            Command::Lookup(args) => self.apply_data_override(&args.data),
        }
    }

    fn apply_data_override(&mut self, overrides: &DataOverride) {
        if let Some(dir) = overrides.internal_dir.as_ref() {
            self.data.internal_dir = Some(dir.clone());
        }
        if let Some(dir) = overrides.public_dir.as_ref() {
            self.data.public_dir = Some(dir.clone());
        }
        if let Some(use_public) = overrides.use_public {
            self.data.use_public = Some(use_public);
        }
    }

    fn apply_site_override(&mut self, overrides: &SiteOverride) {
        if let Some(dir) = overrides.config_dir.as_ref() {
            self.site.config_dir = Some(dir.clone());
        }
    }

    fn apply_fallback_override(&mut self, overrides: &FallbackOverride) {
        if let Some(enabled) = overrides.enabled {
            self.fallback.enabled = Some(enabled);
        }
        if let Some(dir) = overrides.dir.as_ref() {
            self.fallback.dir = Some(dir.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings, ambient: &AmbientEnv) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            data,
            site,
            previews,
            screenshots,
            github,
            fallback,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            data: build_data_settings(data, ambient)?,
            site: build_site_settings(site)?,
            previews: build_preview_settings(previews)?,
            screenshots: build_screenshot_settings(screenshots)?,
            github: build_github_settings(github, ambient)?,
            fallback: build_fallback_settings(fallback, ambient)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_data_settings(data: RawDataSettings, ambient: &AmbientEnv) -> Result<DataSettings, LoadError> {
    let internal_dir = non_empty_path(
        data.internal_dir,
        DEFAULT_INTERNAL_DATA_DIR,
        "data.internal_dir",
    )?;
    let public_dir = non_empty_path(data.public_dir, DEFAULT_PUBLIC_DATA_DIR, "data.public_dir")?;
    let use_public = data.use_public.unwrap_or_else(|| ambient.is_production());
    let cache_ttl = Duration::from_millis(data.cache_ttl_ms.unwrap_or(DEFAULT_CACHE_TTL_MS));

    Ok(DataSettings {
        internal_dir,
        public_dir,
        use_public,
        cache_ttl,
    })
}

fn build_site_settings(site: RawSiteSettings) -> Result<SiteSettings, LoadError> {
    Ok(SiteSettings {
        config_dir: non_empty_path(site.config_dir, DEFAULT_SITE_CONFIG_DIR, "site.config_dir")?,
    })
}

fn build_preview_settings(previews: RawPreviewSettings) -> Result<PreviewSettings, LoadError> {
    let chunk_size = non_zero_usize(
        previews.chunk_size.unwrap_or(DEFAULT_PREVIEW_CHUNK_SIZE),
        "previews.chunk_size",
    )?;
    let chunk_delay = Duration::from_millis(
        previews
            .chunk_delay_ms
            .unwrap_or(DEFAULT_PREVIEW_CHUNK_DELAY_MS),
    );

    let freshness_days = previews.freshness_days.unwrap_or(DEFAULT_FRESHNESS_DAYS);
    if freshness_days == 0 {
        return Err(LoadError::invalid(
            "previews.freshness_days",
            "must be greater than zero",
        ));
    }
    let freshness = Duration::from_secs(freshness_days.saturating_mul(24 * 60 * 60));

    let fetch_timeout = non_zero_secs(
        previews
            .fetch_timeout_secs
            .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS),
        "previews.fetch_timeout_secs",
    )?;
    let max_body_bytes = NonZeroU64::new(
        previews
            .max_body_bytes
            .unwrap_or(DEFAULT_MAX_BODY_BYTES),
    )
    .ok_or_else(|| LoadError::invalid("previews.max_body_bytes", "must be greater than zero"))?;

    let skip_domains = previews.skip_domains.map(|domains| {
        domains
            .into_iter()
            .map(|domain| domain.trim().to_string())
            .filter(|domain| !domain.is_empty())
            .collect()
    });

    Ok(PreviewSettings {
        chunk_size,
        chunk_delay,
        freshness,
        fetch_timeout,
        max_body_bytes,
        user_agent: non_blank(previews.user_agent),
        skip_domains,
        capture_screenshots: previews.capture_screenshots.unwrap_or(false),
    })
}

fn build_screenshot_settings(
    screenshots: RawScreenshotSettings,
) -> Result<ScreenshotSettings, LoadError> {
    let cli_path = non_empty_path(
        screenshots.cli_path,
        DEFAULT_SCREENSHOT_CLI_PATH,
        "screenshots.cli_path",
    )?;
    let output_dir = non_empty_path(
        screenshots.output_dir,
        DEFAULT_SCREENSHOT_OUTPUT_DIR,
        "screenshots.output_dir",
    )?;
    let public_prefix = screenshots
        .public_prefix
        .unwrap_or_else(|| DEFAULT_SCREENSHOT_PUBLIC_PREFIX.to_string());

    let quality = screenshots.quality.unwrap_or(DEFAULT_SCREENSHOT_QUALITY);
    if !(1..=100).contains(&quality) {
        return Err(LoadError::invalid(
            "screenshots.quality",
            "must be between 1 and 100",
        ));
    }

    Ok(ScreenshotSettings {
        cli_path,
        output_dir,
        public_prefix,
        width: non_zero_u32(
            screenshots.width.unwrap_or(DEFAULT_SCREENSHOT_WIDTH),
            "screenshots.width",
        )?,
        height: non_zero_u32(
            screenshots.height.unwrap_or(DEFAULT_SCREENSHOT_HEIGHT),
            "screenshots.height",
        )?,
        quality: quality as u8,
        timeout: non_zero_secs(
            screenshots
                .timeout_secs
                .unwrap_or(DEFAULT_SCREENSHOT_TIMEOUT_SECS),
            "screenshots.timeout_secs",
        )?,
        wait: Duration::from_millis(screenshots.wait_ms.unwrap_or(DEFAULT_SCREENSHOT_WAIT_MS)),
        chunk_size: non_zero_usize(
            screenshots
                .chunk_size
                .unwrap_or(DEFAULT_SCREENSHOT_CHUNK_SIZE),
            "screenshots.chunk_size",
        )?,
        chunk_delay: Duration::from_millis(
            screenshots
                .chunk_delay_ms
                .unwrap_or(DEFAULT_SCREENSHOT_CHUNK_DELAY_MS),
        ),
    })
}

fn build_github_settings(
    github: RawGithubSettings,
    ambient: &AmbientEnv,
) -> Result<GithubSettings, LoadError> {
    let api_url = github
        .api_url
        .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string());
    let api_url = Url::parse(api_url.trim())
        .map_err(|err| LoadError::invalid("github.api_url", format!("failed to parse: {err}")))?;

    Ok(GithubSettings {
        user: non_blank(github.user),
        token: non_blank(github.token).or_else(|| ambient.token()),
        api_url,
    })
}

fn build_fallback_settings(
    fallback: RawFallbackSettings,
    ambient: &AmbientEnv,
) -> Result<FallbackSettings, LoadError> {
    Ok(FallbackSettings {
        enabled: fallback
            .enabled
            .unwrap_or_else(|| ambient.wants_fallback()),
        dir: non_empty_path(fallback.dir, DEFAULT_FALLBACK_DIR, "fallback.dir")?,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDataSettings {
    internal_dir: Option<PathBuf>,
    public_dir: Option<PathBuf>,
    use_public: Option<bool>,
    cache_ttl_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSiteSettings {
    config_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPreviewSettings {
    chunk_size: Option<u64>,
    chunk_delay_ms: Option<u64>,
    freshness_days: Option<u64>,
    fetch_timeout_secs: Option<u64>,
    max_body_bytes: Option<u64>,
    user_agent: Option<String>,
    skip_domains: Option<Vec<String>>,
    capture_screenshots: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawScreenshotSettings {
    cli_path: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    public_prefix: Option<String>,
    width: Option<u64>,
    height: Option<u64>,
    quality: Option<u64>,
    timeout_secs: Option<u64>,
    wait_ms: Option<u64>,
    chunk_size: Option<u64>,
    chunk_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawGithubSettings {
    user: Option<String>,
    token: Option<String>,
    api_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFallbackSettings {
    enabled: Option<bool>,
    dir: Option<PathBuf>,
}

fn non_empty_path(
    value: Option<PathBuf>,
    default: &str,
    key: &'static str,
) -> Result<PathBuf, LoadError> {
    let path = value.unwrap_or_else(|| PathBuf::from(default));
    if path.as_os_str().is_empty() {
        return Err(LoadError::invalid(key, "path must not be empty"));
    }
    Ok(path)
}

fn non_zero_secs(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
