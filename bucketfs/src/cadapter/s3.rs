//! S3 adapter built on aws-sdk-s3: multipart upload for large objects, basic
//! retry with backoff and Content-MD5 checks on the write path.

use crate::cadapter::client::{
    ObjectBackend, ObjectError, ObjectListing, ObjectReader, ObjectResult, ObjectSummary,
};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use std::sync::Arc;
use std::time::{Duration as StdDuration, SystemTime, UNIX_EPOCH};
use tokio::{
    sync::Semaphore,
    time::{Duration, sleep},
};
use tracing::{debug, warn};

/// S3 backend options
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Endpoint of an S3-compatible service; `None` uses the AWS default.
    pub endpoint: Option<String>,
    pub region: String,
    /// Path-style addressing, required by most self-hosted gateways.
    pub force_path_style: bool,
    /// Part size in bytes; 8-64MiB recommended
    pub part_size: usize,
    /// Max concurrently uploaded parts
    pub max_concurrency: usize,
    pub max_retries: u32,
    /// Initial retry delay (ms), doubled per attempt
    pub initial_retry_delay_ms: u64,
    pub timeout: Duration,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: "us-east-1".to_string(),
            force_path_style: true,
            part_size: 8 * 1024 * 1024, // 8MB
            max_concurrency: 8,
            max_retries: 3,
            initial_retry_delay_ms: 100,
            timeout: Duration::from_secs(30),
        }
    }
}

impl S3Config {
    pub fn endpoint(self, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            ..self
        }
    }

    pub fn region(self, region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            ..self
        }
    }
}

pub struct S3Backend {
    client: Client,
    bucket: String,
    config: S3Config,
}

impl S3Backend {
    pub async fn new(bucket: impl Into<String>, config: S3Config) -> ObjectResult<Self> {
        let mut loader = aws_config::ConfigLoader::default()
            .credentials_provider(
                aws_config::environment::EnvironmentVariableCredentialsProvider::new(),
            )
            .region(Region::new(config.region.clone()));
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let conf = loader.load().await;
        let s3_conf = aws_sdk_s3::config::Builder::from(&conf)
            .force_path_style(config.force_path_style)
            .build();
        Ok(Self {
            client: Client::from_conf(s3_conf),
            bucket: bucket.into(),
            config,
        })
    }

    fn md5_base64(data: &[u8]) -> String {
        let sum = md5::compute(data);
        B64.encode(sum.0)
    }

    fn to_system_time(dt: &aws_sdk_s3::primitives::DateTime) -> Option<SystemTime> {
        let secs = u64::try_from(dt.secs()).ok()?;
        Some(UNIX_EPOCH + StdDuration::new(secs, dt.subsec_nanos()))
    }

    async fn execute_with_retry<T, F, Fut, E>(
        &self,
        operation: F,
        operation_name: &'static str,
        key: &str,
    ) -> ObjectResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        let max_retries = self.config.max_retries;
        loop {
            attempt += 1;
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if attempt > max_retries {
                        return Err(ObjectError::transfer(
                            operation_name,
                            key,
                            format!("failed after {max_retries} retries: {e}"),
                        ));
                    }
                    debug!(operation_name, key, attempt, error = %e, "retrying");
                    let delay_ms = self.config.initial_retry_delay_ms * 2u64.pow(attempt - 1);
                    sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Vec<u8>,
        semaphore: Arc<Semaphore>,
    ) -> ObjectResult<(i32, Option<String>)> {
        let _permit = semaphore
            .acquire()
            .await
            .map_err(|e| ObjectError::transfer("upload_part", key, e))?;
        let checksum = Self::md5_base64(&data);

        let operation = || async {
            self.client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .content_md5(checksum.clone())
                .body(data.clone().into())
                .send()
                .await
        };

        self.execute_with_retry(operation, "upload_part", key)
            .await
            .map(|resp| (part_number, resp.e_tag().map(|s| s.to_string())))
    }

    async fn put_multipart(&self, key: &str, data: &[u8]) -> ObjectResult<String> {
        let create = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| ObjectError::transfer("create_multipart_upload", key, e))?;
        let upload_id = create.upload_id().unwrap_or_default().to_string();
        let sem = Arc::new(Semaphore::new(self.config.max_concurrency));

        let parts = data
            .chunks(self.config.part_size)
            .enumerate()
            .map(|(idx, chunk)| {
                self.upload_part(key, &upload_id, idx as i32 + 1, chunk.to_vec(), sem.clone())
            })
            .collect::<Vec<_>>();

        let results = match futures::future::try_join_all(parts).await {
            Ok(v) => v,
            Err(e) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(key, error = %abort_err, "abort multipart upload failed");
                }
                return Err(e);
            }
        };

        let completed_parts = results
            .into_iter()
            .map(|(pn, etag)| {
                aws_sdk_s3::types::CompletedPart::builder()
                    .part_number(pn)
                    .set_e_tag(etag)
                    .build()
            })
            .collect::<Vec<_>>();

        let completed = aws_sdk_s3::types::CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        let resp = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| ObjectError::transfer("complete_multipart_upload", key, e))?;

        Ok(resp.e_tag().unwrap_or_default().to_string())
    }
}

#[async_trait]
impl ObjectBackend for S3Backend {
    async fn get_object(&self, key: &str) -> ObjectResult<ObjectReader> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;
        match resp {
            Ok(o) => Ok(Box::pin(o.body.into_async_read())),
            Err(e) => {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    Err(ObjectError::not_found(key))
                } else {
                    Err(ObjectError::transfer("get_object", key, e))
                }
            }
        }
    }

    async fn put_object(&self, key: &str, data: &[u8]) -> ObjectResult<String> {
        // Small objects go through a single PUT; large ones through multipart.
        if data.len() > self.config.part_size {
            return self.put_multipart(key, data).await;
        }
        let checksum = Self::md5_base64(data);
        let operation = || async {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(data.to_owned().into())
                .content_md5(checksum.clone())
                .send()
                .await
        };
        let resp = self.execute_with_retry(operation, "put_object", key).await?;
        Ok(resp.e_tag().unwrap_or_default().to_string())
    }

    async fn delete_object(&self, key: &str) -> ObjectResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| ObjectError::transfer("delete_object", key, e))?;
        Ok(())
    }

    async fn copy_object(&self, src: &str, dst: &str) -> ObjectResult<String> {
        let resp = self
            .client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(copy_source(&self.bucket, src))
            .key(dst)
            .send()
            .await;
        match resp {
            Ok(o) => Ok(o
                .copy_object_result()
                .and_then(|r| r.e_tag())
                .unwrap_or_default()
                .to_string()),
            Err(e) => {
                let msg = format!("{e}");
                if msg.contains("NoSuchKey") {
                    Err(ObjectError::not_found(src))
                } else {
                    Err(ObjectError::transfer("copy_object", src, msg))
                }
            }
        }
    }

    async fn list_objects(&self, prefix: &str, recursive: bool) -> ObjectResult<ObjectListing> {
        let mut listing = ObjectListing::default();
        let mut token: Option<String> = None;
        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(token.take());
            if !recursive {
                req = req.delimiter("/");
            }
            let resp = req
                .send()
                .await
                .map_err(|e| ObjectError::transfer("list_objects", prefix, e))?;

            for obj in resp.contents() {
                let Some(key) = obj.key() else { continue };
                if !recursive && key == prefix {
                    continue;
                }
                listing.objects.push(ObjectSummary {
                    key: key.to_string(),
                    size: obj.size().unwrap_or_default().max(0) as u64,
                    etag: obj.e_tag().unwrap_or_default().to_string(),
                    last_modified: obj.last_modified().and_then(Self::to_system_time),
                });
            }
            for cp in resp.common_prefixes() {
                if let Some(p) = cp.prefix() {
                    listing.prefixes.push(p.to_string());
                }
            }

            match resp.next_continuation_token() {
                Some(next) if resp.is_truncated().unwrap_or(false) => {
                    token = Some(next.to_string())
                }
                _ => break,
            }
        }
        Ok(listing)
    }
}

/// `CopySource` is `bucket/key` with the key percent-encoded.
fn copy_source(bucket: &str, key: &str) -> String {
    let mut out = format!("{bucket}/");
    for b in key.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
