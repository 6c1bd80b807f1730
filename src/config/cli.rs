use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the sitebake binary.
#[derive(Debug, Parser)]
#[command(
    name = "sitebake",
    version,
    about = "Bake link previews, screenshots and site data for a static site"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "SITEBAKE_CONFIG_FILE",
        value_name = "PATH",
        global = true
    )]
    pub config_file: Option<PathBuf>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Refresh link previews from the site configuration.
    Previews(PreviewsArgs),
    /// Capture page screenshots for a window of the baked previews.
    Screenshots(ScreenshotsArgs),
    /// Bake pinned GitHub repositories.
    Pins(PinsArgs),
    /// Print or write the merged site configuration.
    #[command(name = "site-config")]
    SiteConfig(SiteConfigArgs),
    /// Print the baked preview for a URL.
    Lookup(LookupArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DataOverride {
    /// Override the internal data directory.
    #[arg(long = "data-internal-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub internal_dir: Option<PathBuf>,

    /// Override the published data directory.
    #[arg(long = "data-public-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub public_dir: Option<PathBuf>,

    /// Read from the published data directory.
    #[arg(
        long = "data-use-public",
        value_name = "BOOL",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub use_public: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct SiteOverride {
    /// Override the site configuration directory.
    #[arg(long = "site-config-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub config_dir: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct FallbackOverride {
    /// Use pre-committed fallback data instead of live fetches.
    #[arg(
        long = "use-fallback",
        value_name = "BOOL",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub enabled: Option<bool>,

    /// Override the fallback data directory.
    #[arg(long = "fallback-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct PreviewsArgs {
    #[command(flatten)]
    pub data: DataOverride,

    #[command(flatten)]
    pub site: SiteOverride,

    #[command(flatten)]
    pub fallback: FallbackOverride,

    /// Recompute every preview regardless of age.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub force: bool,

    /// Maximum number of pages fetched in this run.
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,

    /// Only refresh previews without metadata or with error metadata.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub missing: bool,

    /// Capture screenshots alongside metadata.
    #[arg(
        long = "previews-capture-screenshots",
        value_name = "BOOL",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub capture_screenshots: Option<bool>,

    /// Override the number of previews fetched concurrently.
    #[arg(long = "previews-chunk-size", value_name = "COUNT")]
    pub chunk_size: Option<usize>,

    /// Override the pause between preview chunks.
    #[arg(long = "previews-chunk-delay-ms", value_name = "MILLIS")]
    pub chunk_delay_ms: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ScreenshotsArgs {
    #[command(flatten)]
    pub data: DataOverride,

    /// Index of the first preview (sorted by id) to capture.
    #[arg(value_name = "START", default_value_t = 0)]
    pub start: usize,

    /// Number of previews to capture; all remaining when omitted.
    #[arg(value_name = "COUNT")]
    pub count: Option<usize>,

    /// Override the screenshot CLI executable path.
    #[arg(long = "screenshots-cli-path", value_name = "PATH", value_hint = ValueHint::ExecutablePath)]
    pub cli_path: Option<PathBuf>,

    /// Override the screenshot output directory.
    #[arg(long = "screenshots-output-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct PinsArgs {
    #[command(flatten)]
    pub data: DataOverride,

    #[command(flatten)]
    pub fallback: FallbackOverride,

    /// Override the GitHub user whose pins are fetched.
    #[arg(long = "github-user", value_name = "LOGIN")]
    pub user: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct SiteConfigArgs {
    #[command(flatten)]
    pub site: SiteOverride,

    /// Write the merged configuration to a file instead of stdout.
    #[arg(long, value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct LookupArgs {
    #[command(flatten)]
    pub data: DataOverride,

    /// URL of the link to look up.
    #[arg(value_name = "URL", value_hint = ValueHint::Url)]
    pub url: String,
}
