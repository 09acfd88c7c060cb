use arrow::error::ArrowError;
use meteo_medallion_core::{
    config::ConfigError, extract::ExtractError, pipeline::PipelineError,
};
use snafu::Snafu;

pub type CliResult<T> = std::result::Result<T, CliError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(display("Invalid configuration: {source}"))]
    Config { source: ConfigError },

    #[snafu(display(
        "Unknown city '{name}'. Registered cities: {known}"
    ))]
    UnknownCity { name: String, known: String },

    #[snafu(display("Failed to start the pipeline: {source}"))]
    Pipeline {
        #[snafu(source(from(PipelineError, Box::new)))]
        source: Box<PipelineError>,
    },

    #[snafu(display("Failed to build the HTTP client: {source}"))]
    HttpClient { source: ExtractError },

    #[snafu(display(
        "Station lookups need METEO_STAT_HOST and METEO_STAT_API_KEY. \
         Set both to use --endpoint stations."
    ))]
    StationsNotConfigured,

    #[snafu(display("Fetching {dataset} failed: {source}"))]
    Fetch {
        dataset: String,
        #[snafu(source(from(ExtractError, Box::new)))]
        source: Box<ExtractError>,
    },

    #[snafu(display("Failed to render the batch: {source}"))]
    Render { source: ArrowError },

    #[snafu(display("{failed} of {total} datasets failed"))]
    DatasetsFailed { failed: usize, total: usize },
}
