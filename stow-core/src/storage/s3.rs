/*!
Amazon S3 storage backend.

Objects are keyed by their logical path. S3 has no rename, so moves are a
server-side copy followed by a delete and the backend reports
`atomic_rename = false`.
*/

use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::{debug, error, info};

use super::{normalize_dir, BackendCapabilities, StorageBackend};
use crate::retry::{cloud_storage_backoff_policy, retry_transient};
use crate::{Result, StowError};

/// Amazon S3 storage backend
///
/// Credentials come from the standard AWS provider chain (environment
/// variables, shared credentials file, instance or task roles).
///
/// # Example
/// ```rust,no_run
/// use stow_core::storage::{S3StorageAdapter, StorageBackend};
///
/// let adapter = S3StorageAdapter::new("my-models-bucket".to_string(), None)?;
/// adapter.write("classifiers/spam.model", b"serialized model")?;
/// # Ok::<(), stow_core::StowError>(())
/// ```
#[derive(Debug)]
pub struct S3StorageAdapter {
    client: S3Client,
    bucket: String,
    runtime: Arc<Runtime>,
}

impl S3StorageAdapter {
    /// Create a new S3 backend for `bucket`, optionally pinning the region
    ///
    /// # Errors
    /// Returns an error if no credentials are available or the async runtime
    /// cannot be created.
    pub fn new(bucket: String, region: Option<String>) -> Result<Self> {
        let runtime = Runtime::new().map_err(|e| {
            StowError::storage(format!("Failed to create async runtime for S3 client: {e}"))
        })?;

        let sdk_config = runtime.block_on(async {
            let mut loader = aws_config::defaults(BehaviorVersion::latest());
            if let Some(region) = region {
                loader = loader.region(Region::new(region));
            }
            loader.load().await
        });

        if sdk_config.credentials_provider().is_none() {
            return Err(StowError::storage(
                "AWS credentials not found. Please set AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, and AWS_REGION environment variables",
            ));
        }

        let client = S3Client::new(&sdk_config);
        info!(bucket = %bucket, "Initialized S3 storage backend");

        Ok(Self {
            client,
            bucket,
            runtime: Arc::new(runtime),
        })
    }

    /// Create a new S3 backend with an explicit AWS configuration
    pub fn with_config(bucket: String, config: &SdkConfig) -> Result<Self> {
        let runtime = Runtime::new().map_err(|e| {
            StowError::storage(format!("Failed to create async runtime for S3 client: {e}"))
        })?;

        let client = S3Client::new(config);
        info!(bucket = %bucket, "Initialized S3 storage backend with custom config");

        Ok(Self {
            client,
            bucket,
            runtime: Arc::new(runtime),
        })
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn head_once(&self, key: &str) -> Result<bool> {
        let result = self.runtime.block_on(async {
            self.client
                .head_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
        });

        match result {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(service_err)) if service_err.err().is_not_found() => {
                Ok(false)
            }
            Err(e) => Err(map_s3_error("head_object", e, key)),
        }
    }

    fn get_once(&self, key: &str) -> Result<Vec<u8>> {
        let result = self.runtime.block_on(async {
            self.client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
        });

        let output = match result {
            Ok(output) => output,
            Err(SdkError::ServiceError(service_err)) if service_err.err().is_no_such_key() => {
                return Err(StowError::NotFound(key.to_string()));
            }
            Err(e) => return Err(map_s3_error("get_object", e, key)),
        };

        let data = self
            .runtime
            .block_on(async { output.body.collect().await })
            .map_err(|e| StowError::storage(format!("Failed to read S3 object stream: {e}")))?;
        Ok(data.into_bytes().to_vec())
    }

    fn list_once(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let token = continuation.take();
            let page = self
                .runtime
                .block_on(async {
                    self.client
                        .list_objects_v2()
                        .bucket(&self.bucket)
                        .prefix(prefix)
                        .delimiter("/")
                        .set_continuation_token(token)
                        .send()
                        .await
                })
                .map_err(|e| map_s3_error("list_objects_v2", e, prefix))?;

            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .filter(|key| !key.ends_with('/'))
                    .map(str::to_string),
            );

            match page.next_continuation_token() {
                Some(next) if page.is_truncated().unwrap_or(false) => {
                    continuation = Some(next.to_string());
                }
                _ => break,
            }
        }

        keys.sort();
        Ok(keys)
    }
}

impl StorageBackend for S3StorageAdapter {
    fn exists(&self, path: &str) -> Result<bool> {
        debug!(bucket = %self.bucket, key = %path, "Checking if S3 object exists");
        retry_transient("head_object", cloud_storage_backoff_policy(), || {
            self.head_once(path)
        })
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        debug!(bucket = %self.bucket, key = %path, "Loading object from S3");
        retry_transient("get_object", cloud_storage_backoff_policy(), || {
            self.get_once(path)
        })
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        debug!(bucket = %self.bucket, key = %path, size = data.len(), "Saving object to S3");

        let result = self.runtime.block_on(async {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(path)
                .body(ByteStream::from(data.to_vec()))
                .send()
                .await
        });

        result.map(|_| ()).map_err(|e| {
            let mapped = map_s3_error("put_object", e, path);
            error!(bucket = %self.bucket, key = %path, error = %mapped, "Failed to save object to S3");
            StowError::write_failed(path, mapped)
        })
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        if !self.exists(from).map_err(|e| StowError::rename_failed(from, to, e))? {
            return Err(StowError::rename_failed(from, to, "source does not exist"));
        }
        if self.exists(to).map_err(|e| StowError::rename_failed(from, to, e))? {
            return Err(StowError::rename_failed(from, to, "destination already exists"));
        }

        let copy_source = format!("{}/{}", self.bucket, encode_copy_source(from));
        self.runtime
            .block_on(async {
                self.client
                    .copy_object()
                    .bucket(&self.bucket)
                    .copy_source(copy_source)
                    .key(to)
                    .send()
                    .await
            })
            .map_err(|e| StowError::rename_failed(from, to, map_s3_error("copy_object", e, from)))?;

        self.runtime
            .block_on(async {
                self.client
                    .delete_object()
                    .bucket(&self.bucket)
                    .key(from)
                    .send()
                    .await
            })
            .map_err(|e| {
                let mapped = map_s3_error("delete_object", e, from);
                error!(
                    bucket = %self.bucket,
                    from = %from,
                    to = %to,
                    error = %mapped,
                    "Copied object but could not remove the source"
                );
                StowError::rename_failed(from, to, format!("copied, but source remains: {mapped}"))
            })?;

        debug!(bucket = %self.bucket, from = %from, to = %to, "Moved object in S3");
        Ok(())
    }

    fn list(&self, directory: &str) -> Result<Vec<String>> {
        let prefix = list_prefix(directory);
        retry_transient("list_objects_v2", cloud_storage_backoff_policy(), || {
            self.list_once(&prefix)
        })
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.runtime
            .block_on(async {
                self.client
                    .delete_object()
                    .bucket(&self.bucket)
                    .key(path)
                    .send()
                    .await
            })
            .map(|_| ())
            .map_err(|e| map_s3_error("delete_object", e, path))
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            atomic_write: true,
            atomic_rename: false,
        }
    }
}

/// Key prefix selecting the objects directly inside `directory`
fn list_prefix(directory: &str) -> String {
    match normalize_dir(directory) {
        "" => String::new(),
        "/" => "/".to_string(),
        dir => format!("{dir}/"),
    }
}

/// Percent-encode a key for the `x-amz-copy-source` header, keeping "/"
fn encode_copy_source(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

/// Map AWS SDK errors to StowError with appropriate context
fn map_s3_error<E, R>(op: &str, error: SdkError<E, R>, key: &str) -> StowError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match &error {
        SdkError::DispatchFailure(dispatch_err) => {
            StowError::storage(format!("S3 {op} request failed to dispatch: {dispatch_err:?}"))
        }
        SdkError::TimeoutError(_) => {
            StowError::storage(format!("S3 {op} request timed out (key: {key})"))
        }
        SdkError::ResponseError(response_err) => {
            StowError::storage(format!("S3 {op} response error: {response_err:?}"))
        }
        SdkError::ServiceError(service_err) => match service_err.err().code() {
            Some("NoSuchBucket") => StowError::storage("S3 bucket not found"),
            Some("NoSuchKey") => StowError::NotFound(key.to_string()),
            Some("AccessDenied") | Some("Forbidden") => StowError::storage(
                "Access denied to S3 (check credentials and permissions)",
            ),
            Some(code) => StowError::storage(format!(
                "S3 service error ({}): {}",
                code,
                service_err.err().message().unwrap_or("Unknown error")
            )),
            None => StowError::storage(format!("S3 {op} service error: {service_err:?}")),
        },
        _ => StowError::storage(format!("S3 {op} error: {error}")),
    }
}
