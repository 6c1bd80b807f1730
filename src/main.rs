use std::{process, sync::Arc};

use serde::Serialize;
use sitebake::{
    application::{
        batch::BatchOptions,
        error::AppError,
        fallback::FallbackStore,
        loader::{DataLoader, LoadOptions},
        pins::{PinsOutcome, PinsService},
        previews::{PreviewPipeline, RefreshOptions, write_category_splits},
        screenshots::{ScreenshotPipeline, ScreenshotStore},
        site_config::merge_site_config,
    },
    config,
    domain::preview::PREVIEWS_FILE,
    infra::{
        fetch::{
            CliScreenshotCapturer, HttpMetadataFetcher, MetadataFetcherConfig, ScreenshotConfig,
            SkipList,
        },
        github::GithubClient,
        json_store::write_json_pretty,
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    let chain = error.chain().join(": caused by: ");
    if dispatcher::has_been_set() {
        error!(error = %chain, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %chain, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match cli_args.command {
        config::Command::Previews(args) => run_previews(settings, args).await,
        config::Command::Screenshots(args) => run_screenshots(settings, args).await,
        config::Command::Pins(_) => run_pins(settings).await,
        config::Command::SiteConfig(args) => run_site_config(settings, args),
        config::Command::Lookup(args) => run_lookup(settings, args),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn fetcher_config(settings: &config::Settings) -> MetadataFetcherConfig {
    let defaults = MetadataFetcherConfig::default();
    MetadataFetcherConfig {
        timeout: settings.previews.fetch_timeout,
        max_body_bytes: settings.previews.max_body_bytes.get(),
        user_agent: settings
            .previews
            .user_agent
            .clone()
            .unwrap_or(defaults.user_agent),
    }
}

fn skip_list(settings: &config::Settings) -> SkipList {
    settings
        .previews
        .skip_domains
        .as_ref()
        .map(SkipList::new)
        .unwrap_or_default()
}

fn screenshot_store(settings: &config::Settings) -> ScreenshotStore {
    let shots = &settings.screenshots;
    let capturer = CliScreenshotCapturer::new(ScreenshotConfig {
        cli_path: shots.cli_path.clone(),
        width: shots.width.get(),
        height: shots.height.get(),
        quality: shots.quality,
        wait: shots.wait,
        timeout: shots.timeout,
    });
    ScreenshotStore::new(
        Arc::new(capturer),
        shots.output_dir.clone(),
        shots.public_prefix.clone(),
    )
}

async fn run_previews(
    settings: config::Settings,
    args: config::PreviewsArgs,
) -> Result<(), AppError> {
    let data_dir = settings.data.internal_dir.clone();
    let fallback = FallbackStore::new(settings.fallback.dir.clone(), settings.fallback.enabled);

    if fallback.enabled() {
        let restored = fallback.restore_or_empty(PREVIEWS_FILE, &data_dir)?;
        let categories = write_category_splits(&data_dir)?;
        info!(
            target = "sitebake::previews",
            op = "refresh",
            result = "fallback",
            restored,
            categories = categories.len(),
            "Fallback mode, skipped live preview fetches"
        );
        return Ok(());
    }

    let fetcher = HttpMetadataFetcher::new(fetcher_config(&settings))?;
    let freshness = time::Duration::try_from(settings.previews.freshness)
        .map_err(|err| AppError::validation(format!("invalid freshness window: {err}")))?;

    let mut pipeline = PreviewPipeline::new(
        Arc::new(fetcher),
        data_dir,
        settings.site.config_dir.clone(),
    )
    .with_skip_list(skip_list(&settings))
    .with_batch(BatchOptions::new(
        settings.previews.chunk_size.get(),
        settings.previews.chunk_delay,
    ))
    .with_freshness(freshness);
    if settings.previews.capture_screenshots {
        pipeline = pipeline.with_screenshots(screenshot_store(&settings));
    }

    let report = pipeline
        .refresh(RefreshOptions {
            force: args.force,
            limit: args.limit,
            missing_only: args.missing,
        })
        .await?;
    print_json(&report.stats)
}

async fn run_screenshots(
    settings: config::Settings,
    args: config::ScreenshotsArgs,
) -> Result<(), AppError> {
    let pipeline = ScreenshotPipeline::new(
        screenshot_store(&settings),
        settings.data.internal_dir.clone(),
    )
    .with_skip_list(skip_list(&settings))
    .with_batch(BatchOptions::new(
        settings.screenshots.chunk_size.get(),
        settings.screenshots.chunk_delay,
    ));

    let report = pipeline.capture_range(args.start, args.count).await?;
    if report.failed > 0 {
        info!(
            target = "sitebake::screenshots",
            op = "capture_range",
            failed = report.failed,
            "Some screenshots failed; rerun the same window to retry"
        );
    }
    Ok(())
}

async fn run_pins(settings: config::Settings) -> Result<(), AppError> {
    let github = &settings.github;
    let client = match github.token.clone() {
        Some(token) => Some(GithubClient::new(
            github.api_url.clone(),
            token,
            &fetcher_config(&settings),
        )?),
        None => None,
    };

    let service = PinsService::new(
        client,
        github.user.clone(),
        FallbackStore::new(settings.fallback.dir.clone(), settings.fallback.enabled),
        settings.data.internal_dir.clone(),
    );
    match service.refresh().await? {
        PinsOutcome::Fetched(count) => info!(target = "sitebake::pins", count, "Pins baked"),
        PinsOutcome::Restored => info!(target = "sitebake::pins", "Pins restored from fallback"),
        PinsOutcome::Empty => info!(target = "sitebake::pins", "No pins available"),
    }
    Ok(())
}

fn run_site_config(
    settings: config::Settings,
    args: config::SiteConfigArgs,
) -> Result<(), AppError> {
    let merged = merge_site_config(&settings.site.config_dir);
    match args.output {
        Some(path) => {
            write_json_pretty(&path, &merged)?;
            info!(
                target = "sitebake::site_config",
                output = %path.display(),
                "Wrote merged site configuration"
            );
            Ok(())
        }
        None => print_json(&merged),
    }
}

fn run_lookup(settings: config::Settings, args: config::LookupArgs) -> Result<(), AppError> {
    let loader = DataLoader::new(
        settings.data.internal_dir.clone(),
        settings.data.public_dir.clone(),
    )
    .with_defaults(LoadOptions {
        use_public: settings.data.use_public,
        cache: true,
        ttl: settings.data.cache_ttl,
    });

    match loader.get_preview_by_url(&args.url) {
        Some(record) => print_json(&record),
        None => Err(AppError::validation(format!(
            "no preview found for `{}`",
            args.url
        ))),
    }
}
