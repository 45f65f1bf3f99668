use std::path::PathBuf;

/// Storage settings loaded from environment variables.
///
/// | Env var            | Default               |
/// |--------------------|-----------------------|
/// | `TEMP_UPLOAD_DIR`  | `/tmp/matte-uploads`  |
/// | `RESULT_DIR`       | `/tmp/matte-results`  |
/// | `RESULT_BASE_URL`  | unset (`file://` URLs) |
///
/// S3 is enabled when both `S3_ACCESS_KEY` and `S3_SECRET_KEY` are set; see
/// [`S3Config`].
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
    pub result_dir: PathBuf,
    /// Public URL prefix under which `result_dir` is served.
    pub result_base_url: Option<String>,
    pub s3: Option<S3Config>,
}

/// S3 settings.
///
/// | Env var          | Default        |
/// |------------------|----------------|
/// | `S3_BUCKET_NAME` | `rmbg-results` |
/// | `S3_REGION`      | `us-east-1`    |
/// | `S3_ENDPOINT`    | unset (AWS)    |
/// | `S3_PUBLIC_URL`  | unset          |
#[derive(Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO etc.).
    pub endpoint: Option<String>,
    pub access_key: String,
    pub secret_key: String,
    /// Overrides the URL prefix returned for stored objects.
    pub public_url: Option<String>,
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("public_url", &self.public_url)
            .finish_non_exhaustive()
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl StorageConfig {
    pub fn from_env() -> Self {
        let upload_dir = non_empty_var("TEMP_UPLOAD_DIR")
            .unwrap_or_else(|| "/tmp/matte-uploads".into())
            .into();
        let result_dir = non_empty_var("RESULT_DIR")
            .unwrap_or_else(|| "/tmp/matte-results".into())
            .into();

        let s3 = match (non_empty_var("S3_ACCESS_KEY"), non_empty_var("S3_SECRET_KEY")) {
            (Some(access_key), Some(secret_key)) => Some(S3Config {
                bucket: non_empty_var("S3_BUCKET_NAME").unwrap_or_else(|| "rmbg-results".into()),
                region: non_empty_var("S3_REGION").unwrap_or_else(|| "us-east-1".into()),
                endpoint: non_empty_var("S3_ENDPOINT"),
                access_key,
                secret_key,
                public_url: non_empty_var("S3_PUBLIC_URL"),
            }),
            _ => None,
        };

        Self {
            upload_dir,
            result_dir,
            result_base_url: non_empty_var("RESULT_BASE_URL"),
            s3,
        }
    }
}
