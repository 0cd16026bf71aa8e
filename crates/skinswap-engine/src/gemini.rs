use std::thread;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::StatusCode;
use serde_json::{json, Map, Value};
use skinswap_contracts::{BackendError, BackendErrorKind, ImageData, RequestPayload};

use crate::backend::ImageBackend;
use crate::settings::StudioSettings;

const RETRY_BACKOFF_S: f64 = 1.2;
const ERROR_BODY_MAX_CHARS: usize = 512;

pub struct GeminiBackend {
    api_base: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
    transport_retries: usize,
    http: HttpClient,
}

impl GeminiBackend {
    pub fn from_settings(settings: &StudioSettings) -> Self {
        Self {
            api_base: settings.gemini_api_base.clone(),
            api_key: settings.gemini_api_key.clone(),
            model: settings.image_model.clone(),
            timeout: Duration::from_secs_f64(settings.request_timeout_s),
            transport_retries: settings.transport_retries,
            http: HttpClient::new(),
        }
    }

    fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn build_payload(payload: &RequestPayload) -> Value {
        let mut parts: Vec<Value> = payload
            .images()
            .map(|image| {
                json!({
                    "inlineData": {
                        "mimeType": image.mime_type,
                        "data": image.to_base64(),
                    }
                })
            })
            .collect();
        parts.push(json!({ "text": payload.instruction }));

        json!({
            "contents": [{
                "role": "user",
                "parts": parts,
            }],
            "generationConfig": {
                "candidateCount": 1,
                "responseModalities": ["IMAGE"],
                "imageConfig": {
                    "aspectRatio": payload.aspect_ratio.as_str(),
                },
            },
        })
    }

    fn post_with_transport_retries(
        &self,
        endpoint: &str,
        api_key: &str,
        body: &Value,
    ) -> Result<HttpResponse, BackendError> {
        let mut attempt = 0;
        loop {
            let sent = self
                .http
                .post(endpoint)
                .query(&[("key", api_key)])
                .timeout(self.timeout)
                .json(body)
                .send();
            match sent {
                Ok(response) => return Ok(response),
                Err(err) => {
                    let retryable = err.is_timeout() || err.is_connect() || err.is_request();
                    if !retryable || attempt >= self.transport_retries {
                        return Err(BackendError::new(
                            BackendErrorKind::Transport,
                            format!("Gemini request failed ({endpoint}): {err}"),
                        ));
                    }
                    attempt += 1;
                    thread::sleep(Duration::from_secs_f64(RETRY_BACKOFF_S * attempt as f64));
                }
            }
        }
    }
}

impl ImageBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    fn submit(&self, payload: &RequestPayload) -> Result<ImageData, BackendError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(BackendError::new(
                BackendErrorKind::Configuration,
                "GEMINI_API_KEY or GOOGLE_API_KEY not set",
            ));
        };
        let endpoint = self.endpoint();
        let body = Self::build_payload(payload);
        let response = self.post_with_transport_retries(&endpoint, api_key, &body)?;
        let status = response.status();
        let text = response.text().map_err(|err| {
            BackendError::new(
                BackendErrorKind::Transport,
                format!("Gemini response body read failed: {err}"),
            )
        })?;
        let parsed = response_json_or_error(status, &text)?;
        extract_first_image(&parsed)
    }
}

fn response_json_or_error(status: StatusCode, body: &str) -> Result<Value, BackendError> {
    if !status.is_success() {
        let kind = if status == StatusCode::TOO_MANY_REQUESTS {
            BackendErrorKind::Quota
        } else {
            BackendErrorKind::Service
        };
        return Err(BackendError::new(
            kind,
            format!(
                "Gemini request failed ({}): {}",
                status.as_u16(),
                truncate_text(body, ERROR_BODY_MAX_CHARS)
            ),
        ));
    }
    serde_json::from_str(body).map_err(|err| {
        BackendError::new(
            BackendErrorKind::Malformed,
            format!("Gemini returned invalid JSON payload: {err}"),
        )
    })
}

fn extract_first_image(response: &Value) -> Result<ImageData, BackendError> {
    let parts = response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for part in parts {
        let inline = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_else(Map::new);
        let data = inline
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if data.is_empty() {
            continue;
        }
        let bytes = BASE64.decode(data.as_bytes()).map_err(|err| {
            BackendError::new(
                BackendErrorKind::Malformed,
                format!("Gemini image base64 decode failed: {err}"),
            )
        })?;
        let mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .unwrap_or("image/png");
        return Ok(ImageData::new(mime_type, bytes));
    }

    Err(BackendError::no_image())
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use skinswap_contracts::{build_request, AspectRatio, StudioMode};

    use super::*;

    fn backend(api_key: Option<&str>) -> GeminiBackend {
        let mut settings = StudioSettings::from_lookup(|_| None);
        settings.gemini_api_key = api_key.map(str::to_string);
        GeminiBackend::from_settings(&settings)
    }

    fn transfer_payload() -> anyhow::Result<RequestPayload> {
        Ok(build_request(
            StudioMode::Transfer,
            &ImageData::new("image/png", vec![1]),
            Some(&ImageData::new("image/jpeg", vec![2])),
            "velvet",
            0.5,
            AspectRatio::Tall,
        )?)
    }

    #[test]
    fn endpoint_prefixes_models_path_once() {
        let mut gemini = backend(None);
        assert_eq!(
            gemini.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash-image:generateContent"
        );
        gemini.model = "models/custom".to_string();
        assert!(gemini.endpoint().ends_with("/models/custom:generateContent"));
    }

    #[test]
    fn payload_orders_images_before_instruction() -> anyhow::Result<()> {
        let body = GeminiBackend::build_payload(&transfer_payload()?);
        let parts = body["contents"][0]["parts"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[0]["inlineData"]["data"], "AQ==");
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/jpeg");
        assert!(parts[2]["text"]
            .as_str()
            .unwrap_or_default()
            .contains("velvet"));
        assert_eq!(
            body["generationConfig"]["imageConfig"]["aspectRatio"],
            "9:16"
        );
        Ok(())
    }

    #[test]
    fn missing_key_is_configuration_error() -> anyhow::Result<()> {
        let err = backend(None).submit(&transfer_payload()?).err();
        assert_eq!(
            err.map(|err| err.kind),
            Some(BackendErrorKind::Configuration)
        );
        Ok(())
    }

    #[test]
    fn extracts_first_inline_image() -> anyhow::Result<()> {
        let response = json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "here you go"},
                    {"inlineData": {"mimeType": "image/webp", "data": "AQID"}},
                ]}
            }]
        });
        let image = extract_first_image(&response)?;
        assert_eq!(image.mime_type, "image/webp");
        assert_eq!(image.bytes, vec![1, 2, 3]);
        Ok(())
    }

    #[test]
    fn text_only_response_is_no_image() {
        let response = json!({
            "candidates": [{"content": {"parts": [{"text": "I cannot do that"}]}}]
        });
        assert_eq!(extract_first_image(&response), Err(BackendError::no_image()));
        assert_eq!(extract_first_image(&json!({})), Err(BackendError::no_image()));
    }

    #[test]
    fn status_codes_map_to_error_kinds() {
        let quota = response_json_or_error(StatusCode::TOO_MANY_REQUESTS, "slow down").err();
        assert_eq!(quota.map(|err| err.kind), Some(BackendErrorKind::Quota));

        let service = response_json_or_error(StatusCode::INTERNAL_SERVER_ERROR, "oops").err();
        assert_eq!(service.map(|err| err.kind), Some(BackendErrorKind::Service));

        let malformed = response_json_or_error(StatusCode::OK, "<html>").err();
        assert_eq!(
            malformed.map(|err| err.kind),
            Some(BackendErrorKind::Malformed)
        );
    }
}
