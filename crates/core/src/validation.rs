//! Validation for submission metadata.

use validator::ValidateUrl;

use crate::error::CoreError;
use crate::job::CallbackConfig;

/// Content types accepted for uploads.
pub const ALLOWED_IMAGE_CONTENT_TYPES: &[&str] = &["image/jpeg", "image/jpg", "image/png"];

/// Maximum length of a callback URL.
const MAX_URL_LEN: usize = 2048;

/// Maximum length of a callback auth token.
const MAX_TOKEN_LEN: usize = 4096;

/// Validate that `url` is a well-formed `http`/`https` endpoint.
pub fn validate_callback_url(url: &str) -> Result<(), CoreError> {
    if url.len() > MAX_URL_LEN {
        return Err(CoreError::Validation(format!(
            "Callback URL must not exceed {MAX_URL_LEN} characters"
        )));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(CoreError::Validation(
            "Callback URL must start with http:// or https://".to_string(),
        ));
    }
    if !url.validate_url() {
        return Err(CoreError::Validation(format!(
            "Callback URL '{url}' is not a valid URL"
        )));
    }
    Ok(())
}

/// Validate a full callback configuration.
///
/// - `url` must pass [`validate_callback_url`].
/// - `auth_token` must be printable ASCII (it is sent as a header value).
/// - `custom_data` must be a JSON object.
pub fn validate_callback(callback: &CallbackConfig) -> Result<(), CoreError> {
    validate_callback_url(&callback.url)?;

    if let Some(token) = &callback.auth_token {
        if token.len() > MAX_TOKEN_LEN {
            return Err(CoreError::Validation(format!(
                "Callback auth token must not exceed {MAX_TOKEN_LEN} characters"
            )));
        }
        if !token.chars().all(|c| c.is_ascii_graphic() || c == ' ') {
            return Err(CoreError::Validation(
                "Callback auth token may only contain printable ASCII characters".to_string(),
            ));
        }
    }

    if let Some(data) = &callback.custom_data {
        if !data.is_object() {
            return Err(CoreError::Validation(
                "custom_data must be a JSON object".to_string(),
            ));
        }
    }

    Ok(())
}

/// Validate an upload's declared content type.
pub fn validate_image_content_type(content_type: Option<&str>) -> Result<(), CoreError> {
    match content_type {
        Some(ct) if ALLOWED_IMAGE_CONTENT_TYPES.contains(&ct) => Ok(()),
        Some(ct) => Err(CoreError::Validation(format!(
            "Invalid file type '{ct}'. Supported types: JPEG, PNG."
        ))),
        None => Err(CoreError::Validation(
            "Missing file content type. Supported types: JPEG, PNG.".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn callback(url: &str) -> CallbackConfig {
        CallbackConfig {
            url: url.to_string(),
            auth_token: None,
            custom_data: None,
        }
    }

    #[test]
    fn accepts_http_and_https_urls() {
        assert!(validate_callback_url("https://example.com/callback").is_ok());
        assert!(validate_callback_url("http://localhost:9000/hook?x=1").is_ok());
    }

    #[test]
    fn rejects_other_schemes_and_garbage() {
        assert!(validate_callback_url("ftp://example.com").is_err());
        assert!(validate_callback_url("example.com/callback").is_err());
        assert!(validate_callback_url("").is_err());
        assert!(validate_callback_url("http://").is_err());
    }

    #[test]
    fn rejects_overlong_url() {
        let url = format!("https://example.com/{}", "a".repeat(MAX_URL_LEN));
        assert!(validate_callback_url(&url).is_err());
    }

    #[test]
    fn custom_data_must_be_object() {
        let mut cb = callback("https://example.com/cb");
        cb.custom_data = Some(serde_json::json!({"user_id": "123"}));
        assert!(validate_callback(&cb).is_ok());

        cb.custom_data = Some(serde_json::json!([1, 2, 3]));
        assert!(validate_callback(&cb).is_err());
    }

    #[test]
    fn auth_token_must_be_header_safe() {
        let mut cb = callback("https://example.com/cb");
        cb.auth_token = Some("Bearer token123".into());
        assert!(validate_callback(&cb).is_ok());

        cb.auth_token = Some("line\nbreak".into());
        assert!(validate_callback(&cb).is_err());
    }

    #[test]
    fn content_type_allow_list() {
        assert!(validate_image_content_type(Some("image/png")).is_ok());
        assert!(validate_image_content_type(Some("image/jpeg")).is_ok());
        assert!(validate_image_content_type(Some("image/jpg")).is_ok());
        assert!(validate_image_content_type(Some("image/gif")).is_err());
        assert!(validate_image_content_type(None).is_err());
    }
}
