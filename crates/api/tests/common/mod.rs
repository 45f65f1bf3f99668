#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use image::{ImageFormat, Rgb, RgbImage};
use matte_api::config::ServerConfig;
use matte_api::gateway::SubmissionGateway;
use matte_api::router::build_app_router;
use matte_api::state::AppState;
use matte_db::{Backends, QueueConfig};
use matte_storage::InputStore;
use tempfile::TempDir;
use tower::ServiceExt;

pub const BOUNDARY: &str = "matte-test-boundary";

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["*".to_string()],
        request_timeout_secs: 30,
        max_upload_bytes: 1024 * 1024,
        embedded_workers: false,
        health_slot_window_secs: 30,
    }
}

/// Router plus handles on the state behind it.
pub struct TestApp {
    pub app: Router,
    pub backends: Backends,
    pub inputs: InputStore,
    pub uploads: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with(Backends::in_memory(&QueueConfig::default()), test_config())
    }

    /// Same middleware stack as `main.rs`, over the given backends.
    pub fn with(backends: Backends, config: ServerConfig) -> Self {
        let uploads = TempDir::new().unwrap();
        let inputs = InputStore::new(uploads.path());
        let gateway = SubmissionGateway::new(
            Arc::clone(&backends.store),
            Arc::clone(&backends.queue),
            inputs.clone(),
        );
        let state = AppState {
            backends: backends.clone(),
            gateway: Arc::new(gateway),
            config: Arc::new(config.clone()),
        };
        Self {
            app: build_app_router(state, &config),
            backends,
            inputs,
            uploads,
        }
    }

    pub fn upload_count(&self) -> usize {
        count_files(self.uploads.path())
    }
}

pub fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_multipart(app: Router, uri: &str, body: Vec<u8>) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// ---------------------------------------------------------------------------
// Multipart bodies
// ---------------------------------------------------------------------------

pub enum Part<'a> {
    File {
        name: &'a str,
        filename: &'a str,
        content_type: &'a str,
        bytes: &'a [u8],
    },
    Text {
        name: &'a str,
        value: &'a str,
    },
}

/// Encode `parts` as a `multipart/form-data` body delimited by [`BOUNDARY`].
pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::File {
                name,
                filename,
                content_type,
                bytes,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                         Content-Type: {content_type}\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
            Part::Text { name, value } => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn png_part(bytes: &[u8]) -> Part<'_> {
    Part::File {
        name: "file",
        filename: "photo.png",
        content_type: "image/png",
        bytes,
    }
}

/// White 16x16 PNG with a dark square in the middle.
pub fn sample_png() -> Vec<u8> {
    let image = RgbImage::from_fn(16, 16, |x, y| {
        if (4..12).contains(&x) && (4..12).contains(&y) {
            Rgb([30, 30, 30])
        } else {
            Rgb([255, 255, 255])
        }
    });
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}
