//! Integration probe against a running model server

use tracing::info;

use crate::core::errors::{Result, ServingError};
use crate::core::models::{InferenceRequest, Instance};

/// Default prediction endpoint of a locally running server
pub const DEFAULT_PROBE_URL: &str = "http://localhost:8080/predictions/model";

/// The fixed two-item batch sent by the probe
pub fn probe_request() -> InferenceRequest {
    InferenceRequest {
        instances: vec![
            Instance::new("uuid", "Hola me llamo Alex"),
            Instance::new("uuid", "The text is irrelevant, checking that the model works"),
        ],
    }
}

/// Send the probe batch and return the predictions
///
/// Fails on any status other than 200 or when `predictions` is missing.
pub async fn run_probe(url: &str) -> Result<Vec<String>> {
    info!("Integration test: sending request to {}", url);

    let response = reqwest::Client::new()
        .post(url)
        .header("Content-Type", "application/json")
        .json(&probe_request())
        .send()
        .await
        .map_err(|e| ServingError::NetworkError {
            message: e.to_string(),
        })?;

    let status = response.status();
    let text = response.text().await?;
    if status != reqwest::StatusCode::OK {
        return Err(ServingError::ApiError {
            status: status.as_u16(),
            message: format!("Failed to get predictions: {}", text),
        });
    }
    info!("Integration test: response {} received.", status);

    let body: serde_json::Value = serde_json::from_str(&text)?;
    let predictions = body
        .get("predictions")
        .ok_or_else(|| ServingError::InvalidResponseError {
            message: format!("No predictions found. Response {}", text),
        })?;

    let predictions: Vec<String> = serde_json::from_value(predictions.clone())?;
    info!("Integration test: predictions found. Response {}.", text);
    Ok(predictions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_body() {
        let body = serde_json::to_value(probe_request()).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "instances": [
                    ["uuid", "Hola me llamo Alex"],
                    ["uuid", "The text is irrelevant, checking that the model works"]
                ]
            })
        );
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let err = run_probe("http://127.0.0.1:9/predictions/model")
            .await
            .unwrap_err();
        assert!(matches!(err, ServingError::NetworkError { .. }));
    }
}
