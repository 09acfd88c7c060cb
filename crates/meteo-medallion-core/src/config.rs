//! Process-wide configuration, built once at startup and passed down.
use std::{fmt, path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use object_store::{
    aws::{AmazonS3Builder, S3ConditionalPut},
    path::Path as ObjectPath,
};
use snafu::prelude::*;

use crate::{
    extract::{DEFAULT_REQUEST_TIMEOUT, LOOKBACK_WINDOW_DAYS, RapidApiAuth},
    pipeline::{DEFAULT_OPERATION_TIMEOUT, RetryPolicy},
    registry::{self, City},
    storage::{CreateMode, ObjectLocation, StorageLocation},
};

/// Local directory used when no bucket is configured.
pub const DEFAULT_LOCAL_ROOT: &str = "./out";

/// Default region when none is configured (MinIO and most S3 clones accept it).
pub const DEFAULT_REGION: &str = "us-east-1";

/// Errors detected while resolving configuration.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    /// Object storage was selected but a credential is missing.
    #[snafu(display("Missing required credential {name} for bucket {bucket}"))]
    MissingCredential {
        /// Environment name of the credential.
        name: &'static str,
        /// Configured bucket.
        bucket: String,
    },

    /// The bucket offers no conditional put and unsafe renames were not allowed.
    #[snafu(display(
        "Bucket {bucket} has no conditional put; enable AWS_S3_ALLOW_UNSAFE_RENAME or use AWS_CONDITIONAL_PUT=etag"
    ))]
    UnsafeRenameRequired {
        /// Configured bucket.
        bucket: String,
    },

    /// Unknown conditional-put mode.
    #[snafu(display("Unknown conditional put mode {value:?} (expected none or etag)"))]
    InvalidConditionalPut {
        /// The rejected value.
        value: String,
    },

    /// A numeric setting is out of range.
    #[snafu(display("Invalid setting {name}: {detail}"))]
    InvalidSetting {
        /// Setting name.
        name: &'static str,
        /// Why it was rejected.
        detail: String,
    },

    /// The object store client could not be built.
    #[snafu(display("Failed to configure object store for bucket {bucket}: {source}"))]
    ObjectStore {
        /// Configured bucket.
        bucket: String,
        /// Underlying object store error.
        source: object_store::Error,
    },
}

/// How the bucket enforces create-only writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConditionalPutMode {
    /// No conditional put support.
    #[default]
    None,
    /// `If-Match`/`If-None-Match` on ETags.
    ETag,
}

impl FromStr for ConditionalPutMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(ConditionalPutMode::None),
            "etag" => Ok(ConditionalPutMode::ETag),
            _ => InvalidConditionalPutSnafu { value: s }.fail(),
        }
    }
}

impl fmt::Display for ConditionalPutMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionalPutMode::None => f.write_str("none"),
            ConditionalPutMode::ETag => f.write_str("etag"),
        }
    }
}

/// Where tables are stored.
#[derive(Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Bucket name; `None` selects the local filesystem.
    pub bucket: Option<String>,
    /// Local root used when `bucket` is `None`.
    pub local_root: PathBuf,
    /// Custom S3 endpoint (MinIO, LocalStack).
    pub endpoint: Option<String>,
    /// Access key id.
    pub access_key_id: Option<String>,
    /// Secret access key.
    pub secret_access_key: Option<String>,
    /// Region.
    pub region: Option<String>,
    /// Allow plain HTTP endpoints.
    pub allow_http: bool,
    /// Accept create-only writes without conditional put.
    pub allow_unsafe_rename: bool,
    /// Conditional put support of the bucket.
    pub conditional_put: ConditionalPutMode,
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("bucket", &self.bucket)
            .field("local_root", &self.local_root)
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("region", &self.region)
            .field("allow_http", &self.allow_http)
            .field("allow_unsafe_rename", &self.allow_unsafe_rename)
            .field("conditional_put", &self.conditional_put)
            .finish()
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::local(DEFAULT_LOCAL_ROOT)
    }
}

impl StorageConfig {
    /// Local filesystem storage under `root`.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self {
            bucket: None,
            local_root: root.into(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            region: None,
            allow_http: true,
            allow_unsafe_rename: true,
            conditional_put: ConditionalPutMode::None,
        }
    }

    /// Resolve the storage root.
    ///
    /// Object storage requires both credentials. Without conditional put,
    /// create-only writes fall back to a probe that two racing writers can
    /// both pass, so that mode must be allowed explicitly.
    pub fn build(&self) -> Result<StorageLocation, ConfigError> {
        let Some(bucket) = self.bucket.as_deref().filter(|b| !b.is_empty()) else {
            return Ok(StorageLocation::local(&self.local_root));
        };

        let access_key_id = self.access_key_id.as_deref().context(MissingCredentialSnafu {
            name: "AWS_ACCESS_KEY_ID",
            bucket,
        })?;
        let secret_access_key =
            self.secret_access_key
                .as_deref()
                .context(MissingCredentialSnafu {
                    name: "AWS_SECRET_ACCESS_KEY",
                    bucket,
                })?;

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_access_key_id(access_key_id)
            .with_secret_access_key(secret_access_key)
            .with_region(self.region.as_deref().unwrap_or(DEFAULT_REGION))
            .with_allow_http(self.allow_http);
        if let Some(endpoint) = &self.endpoint {
            builder = builder.with_endpoint(endpoint);
        }

        let create_mode = match self.conditional_put {
            ConditionalPutMode::ETag => {
                builder = builder.with_conditional_put(S3ConditionalPut::ETagMatch);
                CreateMode::Conditional
            }
            ConditionalPutMode::None => {
                ensure!(self.allow_unsafe_rename, UnsafeRenameRequiredSnafu { bucket });
                CreateMode::ProbeThenPut
            }
        };

        let store = builder.build().context(ObjectStoreSnafu { bucket })?;
        Ok(StorageLocation::Object(ObjectLocation::new(
            Arc::new(store),
            format!("s3://{bucket}"),
            ObjectPath::default(),
            create_mode,
        )))
    }
}

/// Credentials for the station lookup API.
#[derive(Clone, PartialEq, Eq)]
pub struct StationApiConfig {
    /// RapidAPI host, e.g. `meteostat.p.rapidapi.com`.
    pub host: String,
    /// RapidAPI key.
    pub api_key: String,
}

impl fmt::Debug for StationApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StationApiConfig")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl StationApiConfig {
    /// Header authenticator for these credentials.
    pub fn auth(&self) -> RapidApiAuth {
        RapidApiAuth::new(&self.host, &self.api_key)
    }
}

/// Settings threaded through every pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Storage root holding the medallion layers.
    pub storage: StorageLocation,
    /// Cities processed by each run.
    pub cities: Vec<City>,
    /// Days of history fetched from the archive.
    pub lookback_days: u64,
    /// Cities processed concurrently within a layer.
    pub max_concurrency: usize,
    /// Backoff for retryable failures.
    pub retry: RetryPolicy,
    /// Upper bound for one extraction or one store operation.
    pub operation_timeout: Duration,
    /// HTTP client timeout.
    pub request_timeout: Duration,
    /// Station API credentials; stations are skipped when absent.
    pub stations: Option<StationApiConfig>,
}

impl PipelineConfig {
    /// Defaults: every registered city, a seven-day lookback and up to four
    /// cities in flight.
    pub fn new(storage: StorageLocation) -> Self {
        Self {
            storage,
            cities: registry::cities(),
            lookback_days: LOOKBACK_WINDOW_DAYS,
            max_concurrency: 4,
            retry: RetryPolicy::default(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            stations: None,
        }
    }

    /// Reject settings no run could honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            self.max_concurrency > 0,
            InvalidSettingSnafu {
                name: "max_concurrency",
                detail: "must be at least 1",
            }
        );
        ensure!(
            self.retry.max_attempts > 0,
            InvalidSettingSnafu {
                name: "retry.max_attempts",
                detail: "must be at least 1",
            }
        );
        ensure!(
            !self.operation_timeout.is_zero(),
            InvalidSettingSnafu {
                name: "operation_timeout",
                detail: "must be positive",
            }
        );
        ensure!(
            !self.cities.is_empty(),
            InvalidSettingSnafu {
                name: "cities",
                detail: "at least one city is required",
            }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s3(bucket: &str) -> StorageConfig {
        StorageConfig {
            bucket: Some(bucket.to_string()),
            endpoint: Some("http://localhost:9000".to_string()),
            access_key_id: Some("minio".to_string()),
            secret_access_key: Some("minio123".to_string()),
            ..StorageConfig::default()
        }
    }

    #[test]
    fn no_bucket_selects_local_storage() -> Result<(), ConfigError> {
        let location = StorageConfig::local("/tmp/lake").build()?;

        assert!(matches!(location, StorageLocation::Local(p) if p == PathBuf::from("/tmp/lake")));
        Ok(())
    }

    #[test]
    fn missing_secret_is_fatal() {
        let config = StorageConfig {
            secret_access_key: None,
            ..s3("weather")
        };

        let err = config.build().expect_err("secret missing");

        assert!(matches!(
            err,
            ConfigError::MissingCredential {
                name: "AWS_SECRET_ACCESS_KEY",
                ..
            }
        ));
    }

    #[test]
    fn object_store_without_conditional_put_needs_unsafe_rename() -> Result<(), ConfigError> {
        let strict = StorageConfig {
            allow_unsafe_rename: false,
            ..s3("weather")
        };
        assert!(matches!(
            strict.build(),
            Err(ConfigError::UnsafeRenameRequired { .. })
        ));

        assert!(matches!(s3("weather").build()?, StorageLocation::Object(_)));
        let etag = StorageConfig {
            allow_unsafe_rename: false,
            conditional_put: ConditionalPutMode::ETag,
            ..s3("weather")
        };
        assert!(matches!(etag.build()?, StorageLocation::Object(_)));
        Ok(())
    }

    #[test]
    fn conditional_put_mode_parses_case_insensitively() -> Result<(), ConfigError> {
        assert_eq!("ETag".parse::<ConditionalPutMode>()?, ConditionalPutMode::ETag);
        assert_eq!("none".parse::<ConditionalPutMode>()?, ConditionalPutMode::None);
        assert!("dynamo".parse::<ConditionalPutMode>().is_err());
        Ok(())
    }

    #[test]
    fn secrets_are_redacted_in_debug_output() {
        let rendered = format!("{:?}", s3("weather"));

        assert!(!rendered.contains("minio123"));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut config = PipelineConfig::new(StorageLocation::local("/tmp/lake"));
        config.max_concurrency = 0;

        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSetting {
                name: "max_concurrency",
                ..
            })
        ));
    }
}
