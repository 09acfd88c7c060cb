//! CLI entry point for the meteo-medallion pipelines.

mod error;

use std::path::PathBuf;

use arrow::util::pretty::pretty_format_batches;
use chrono::{NaiveDate, Utc};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use log::info;
use meteo_medallion_core::{
    config::{
        ConditionalPutMode, DEFAULT_LOCAL_ROOT, PipelineConfig, StationApiConfig, StorageConfig,
    },
    extract::{
        DEFAULT_REQUEST_TIMEOUT, ExtractRequest, Extractor, LOOKBACK_WINDOW_DAYS,
        NearestStationsExtractor, OpenMeteoEndpoint, OpenMeteoExtractor, http_client,
    },
    pipeline::{Pipeline, RunReport, Stage},
    registry::{self, City},
};
use snafu::ResultExt;

use crate::error::{
    CliResult, ConfigSnafu, DatasetsFailedSnafu, FetchSnafu, HttpClientSnafu, PipelineSnafu,
    RenderSnafu, StationsNotConfiguredSnafu, UnknownCitySnafu,
};

/// Obelisco, Buenos Aires.
const DEFAULT_LATITUDE: f64 = -34.603722;
const DEFAULT_LONGITUDE: f64 = -58.381592;

#[derive(Debug, Args)]
struct StorageArgs {
    /// S3 bucket holding the layers; local storage when unset
    #[arg(long, env = "BUCKET_NAME")]
    bucket: Option<String>,

    /// Root directory used without a bucket
    #[arg(long = "local-root", env = "METEO_LOCAL_ROOT", default_value = DEFAULT_LOCAL_ROOT)]
    local_root: PathBuf,

    #[arg(long, env = "AWS_ENDPOINT_URL")]
    endpoint: Option<String>,

    #[arg(long = "access-key-id", env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    access_key_id: Option<String>,

    #[arg(
        long = "secret-access-key",
        env = "AWS_SECRET_ACCESS_KEY",
        hide_env_values = true
    )]
    secret_access_key: Option<String>,

    #[arg(long, env = "AWS_REGION")]
    region: Option<String>,

    #[arg(long = "allow-http", env = "AWS_ALLOW_HTTP", default_value_t = true, action = ArgAction::Set)]
    allow_http: bool,

    /// Accept create-only writes on buckets without conditional put
    #[arg(
        long = "allow-unsafe-rename",
        env = "AWS_S3_ALLOW_UNSAFE_RENAME",
        default_value_t = true,
        action = ArgAction::Set
    )]
    allow_unsafe_rename: bool,

    /// none or etag
    #[arg(long = "conditional-put", env = "AWS_CONDITIONAL_PUT", default_value = "none")]
    conditional_put: String,
}

impl StorageArgs {
    fn into_config(self) -> CliResult<StorageConfig> {
        let conditional_put = self
            .conditional_put
            .parse::<ConditionalPutMode>()
            .context(ConfigSnafu)?;
        Ok(StorageConfig {
            bucket: self.bucket.filter(|b| !b.is_empty()),
            local_root: self.local_root,
            endpoint: self.endpoint,
            access_key_id: self.access_key_id,
            secret_access_key: self.secret_access_key,
            region: self.region,
            allow_http: self.allow_http,
            allow_unsafe_rename: self.allow_unsafe_rename,
            conditional_put,
        })
    }
}

#[derive(Debug, Args)]
struct StationArgs {
    #[arg(long = "stations-host", env = "METEO_STAT_HOST")]
    host: Option<String>,

    #[arg(long = "stations-api-key", env = "METEO_STAT_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

impl StationArgs {
    fn into_config(self) -> Option<StationApiConfig> {
        match (self.host, self.api_key) {
            (Some(host), Some(api_key)) if !host.is_empty() && !api_key.is_empty() => {
                Some(StationApiConfig { host, api_key })
            }
            _ => None,
        }
    }
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Day stamped on raw snapshots (default: today, UTC)
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Repeatable; defaults to every registered city
    #[arg(long = "city")]
    cities: Vec<String>,

    #[arg(long = "max-concurrency", env = "METEO_MAX_CONCURRENCY", default_value_t = 4)]
    max_concurrency: usize,

    /// Days of history fetched from the archive
    #[arg(long = "lookback-days", default_value_t = LOOKBACK_WINDOW_DAYS)]
    lookback_days: u64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EndpointArg {
    Forecast,
    Historical,
    AirQuality,
    Stations,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Extract every raw dataset for every city into the bronze layer
    Raw(RunArgs),

    /// Rebuild the silver layer from bronze
    Enriched(RunArgs),

    /// Rebuild the gold layer from silver
    Curated(RunArgs),

    /// Run raw, enriched and curated in order
    All(RunArgs),

    /// Fetch one dataset for a coordinate and print it
    Fetch {
        #[arg(long, value_enum)]
        endpoint: EndpointArg,

        #[arg(long, default_value_t = DEFAULT_LATITUDE, allow_negative_numbers = true)]
        latitude: f64,

        #[arg(long, default_value_t = DEFAULT_LONGITUDE, allow_negative_numbers = true)]
        longitude: f64,

        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[derive(Debug, Parser)]
#[command(name = "meteo-medallion", version, about)]
struct Cli {
    #[command(flatten)]
    storage: StorageArgs,

    #[command(flatten)]
    stations: StationArgs,

    #[command(subcommand)]
    cmd: Command,
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn select_cities(names: &[String]) -> CliResult<Vec<City>> {
    if names.is_empty() {
        return Ok(registry::cities());
    }
    names
        .iter()
        .map(|name| {
            registry::find(name).ok_or_else(|| {
                let known: Vec<String> = registry::cities().into_iter().map(|c| c.name).collect();
                UnknownCitySnafu {
                    name: name.clone(),
                    known: known.join(", "),
                }
                .build()
            })
        })
        .collect()
}

fn pipeline_config(
    storage: StorageArgs,
    stations: StationArgs,
    args: &RunArgs,
) -> CliResult<PipelineConfig> {
    let storage = storage.into_config()?.build().context(ConfigSnafu)?;
    let mut config = PipelineConfig::new(storage);
    config.cities = select_cities(&args.cities)?;
    config.max_concurrency = args.max_concurrency;
    config.lookback_days = args.lookback_days;
    config.stations = stations.into_config();
    config.validate().context(ConfigSnafu)?;
    Ok(config)
}

fn print_report(report: &RunReport) -> CliResult<()> {
    println!("{report}");
    let (_, _, failed) = report.counts();
    if failed > 0 {
        return DatasetsFailedSnafu {
            failed,
            total: report.outcomes().len(),
        }
        .fail();
    }
    Ok(())
}

async fn cmd_run(
    stage: Stage,
    storage: StorageArgs,
    stations: StationArgs,
    args: RunArgs,
) -> CliResult<()> {
    let config = pipeline_config(storage, stations, &args)?;
    let today = args.date.unwrap_or_else(today);
    info!(
        "running {stage} for {} cities against {}",
        config.cities.len(),
        config.storage
    );

    let pipeline = Pipeline::new(config).context(PipelineSnafu)?;
    let report = pipeline.run(stage, today).await;
    print_report(&report)
}

async fn cmd_fetch(
    endpoint: EndpointArg,
    stations: StationArgs,
    latitude: f64,
    longitude: f64,
    date: Option<NaiveDate>,
) -> CliResult<()> {
    let client = http_client(DEFAULT_REQUEST_TIMEOUT).context(HttpClientSnafu)?;
    let extractor: Box<dyn Extractor> = match endpoint {
        EndpointArg::Forecast => Box::new(OpenMeteoExtractor::new(
            OpenMeteoEndpoint::Forecast,
            client,
        )),
        EndpointArg::Historical => Box::new(OpenMeteoExtractor::new(
            OpenMeteoEndpoint::Historical,
            client,
        )),
        EndpointArg::AirQuality => Box::new(OpenMeteoExtractor::new(
            OpenMeteoEndpoint::AirQuality,
            client,
        )),
        EndpointArg::Stations => {
            let api = stations
                .into_config()
                .ok_or_else(|| StationsNotConfiguredSnafu.build())?;
            Box::new(NearestStationsExtractor::new(client, &api.host).with_auth(api.auth()))
        }
    };

    let dataset = extractor.dataset();
    let request = ExtractRequest::new(
        City::new("requested", latitude, longitude),
        date.unwrap_or_else(today),
    );
    let batch = extractor
        .extract(&request)
        .await
        .context(FetchSnafu { dataset })?;

    let rendered = pretty_format_batches(&[batch]).context(RenderSnafu)?;
    println!("{rendered}");
    Ok(())
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();

    match cli.cmd {
        Command::Raw(args) => cmd_run(Stage::Raw, cli.storage, cli.stations, args).await,
        Command::Enriched(args) => {
            cmd_run(Stage::Enriched, cli.storage, cli.stations, args).await
        }
        Command::Curated(args) => cmd_run(Stage::Curated, cli.storage, cli.stations, args).await,
        Command::All(args) => cmd_run(Stage::All, cli.storage, cli.stations, args).await,
        Command::Fetch {
            endpoint,
            latitude,
            longitude,
            date,
        } => cmd_fetch(endpoint, cli.stations, latitude, longitude, date).await,
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
