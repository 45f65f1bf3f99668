//! S3 (or S3-compatible) result sink.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use matte_core::types::JobId;

use crate::config::S3Config;
use crate::error::StorageError;
use crate::sink::{result_key, ResultSink};

pub struct S3ResultSink {
    client: Client,
    bucket: String,
    url_prefix: String,
}

impl S3ResultSink {
    /// Build a client from static credentials and make sure the bucket
    /// exists, creating it if needed.
    pub async fn connect(config: &S3Config) -> Result<Self, StorageError> {
        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "matte-static",
        );
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        let client = Client::from_conf(builder.build());

        let sink = Self {
            client,
            bucket: config.bucket.clone(),
            url_prefix: url_prefix(config)?,
        };
        sink.ensure_bucket(&config.region).await?;
        Ok(sink)
    }

    async fn ensure_bucket(&self, region: &str) -> Result<(), StorageError> {
        if self
            .client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .is_ok()
        {
            return Ok(());
        }

        tracing::info!(bucket = %self.bucket, "Creating result bucket");
        let mut request = self.client.create_bucket().bucket(&self.bucket);
        if region != "us-east-1" {
            request = request.create_bucket_configuration(
                aws_sdk_s3::types::CreateBucketConfiguration::builder()
                    .location_constraint(aws_sdk_s3::types::BucketLocationConstraint::from(region))
                    .build(),
            );
        }
        request
            .send()
            .await
            .map_err(|e| StorageError::Unavailable(format!("create bucket: {e}")))?;
        Ok(())
    }
}

/// URL prefix under which objects are reachable.
///
/// `S3_PUBLIC_URL` wins; a custom endpoint gives path-style
/// `{scheme}://{host}/{bucket}`; plain AWS gives the virtual-hosted form.
fn url_prefix(config: &S3Config) -> Result<String, StorageError> {
    if let Some(public) = &config.public_url {
        return Ok(public.trim_end_matches('/').to_string());
    }
    match &config.endpoint {
        Some(endpoint) => {
            let (scheme, rest) = endpoint.split_once("://").ok_or_else(|| {
                StorageError::Config(format!("S3 endpoint '{endpoint}' has no scheme"))
            })?;
            let host = rest.split('/').next().unwrap_or(rest);
            Ok(format!("{scheme}://{host}/{}", config.bucket))
        }
        None => Ok(format!(
            "https://{}.s3.{}.amazonaws.com",
            config.bucket, config.region
        )),
    }
}

#[async_trait]
impl ResultSink for S3ResultSink {
    async fn store(&self, job_id: JobId, artifact: &[u8]) -> Result<String, StorageError> {
        let key = result_key(job_id);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type("image/png")
            .body(ByteStream::from(artifact.to_vec()))
            .send()
            .await
            .map_err(|e| StorageError::Unavailable(format!("put_object {key}: {e}")))?;

        tracing::debug!(job_id = %job_id, key = %key, "Result uploaded to S3");
        Ok(format!("{}/{key}", self.url_prefix))
    }

    fn backend(&self) -> &'static str {
        "s3"
    }
}
