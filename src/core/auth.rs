//! Access-token resolution for Google Cloud APIs

use tracing::{debug, info};

use crate::core::errors::{Result, ServingError};
use crate::core::process::{CommandRunner, CommandSpec};

/// Environment variable holding a pre-issued OAuth access token
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

/// Resolve a bearer token from the environment, falling back to `gcloud`
pub async fn resolve_access_token(runner: &dyn CommandRunner) -> Result<String> {
    if let Some(token) = std::env::var(ACCESS_TOKEN_ENV)
        .ok()
        .filter(|t| !t.trim().is_empty())
    {
        debug!("Using access token from {}", ACCESS_TOKEN_ENV);
        return Ok(token.trim().to_string());
    }

    info!("Requesting access token from gcloud");
    let output = runner
        .run_checked(&CommandSpec::new("gcloud").args(["auth", "print-access-token"]))
        .await?;

    let token = output.stdout.trim().to_string();
    if token.is_empty() {
        return Err(ServingError::ConfigError {
            message: "gcloud returned an empty access token".to_string(),
        });
    }
    Ok(token)
}
