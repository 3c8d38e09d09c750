// src/warehouse/auth.rs

use async_trait::async_trait;
use google_cloud_auth::{
    credentials::CredentialsFile, project::Config, token::DefaultTokenSourceProvider,
};
use google_cloud_token::{TokenSource, TokenSourceProvider};
use std::{path::Path, sync::Arc};
use tracing::debug;

use super::WarehouseError;

const BIGQUERY_SCOPES: [&str; 1] = ["https://www.googleapis.com/auth/bigquery"];

/// Supplies the `Authorization` header value for each request.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn authorization(&self) -> Result<String, WarehouseError>;
}

/// Tokens minted from a service-account key file. The path is handed in by
/// the caller; nothing is read from or written to the process environment.
pub struct ServiceAccountTokens {
    source: Arc<dyn TokenSource>,
}

impl ServiceAccountTokens {
    pub async fn from_file(path: &Path) -> Result<Self, WarehouseError> {
        debug!(path = %path.display(), "loading service account credentials");
        let creds = CredentialsFile::new_from_file(path.display().to_string())
            .await
            .map_err(|e| {
                WarehouseError::Auth(format!("reading credentials {}: {}", path.display(), e))
            })?;
        let provider = DefaultTokenSourceProvider::new_with_credentials(
            Config::default().with_scopes(&BIGQUERY_SCOPES),
            Box::new(creds),
        )
        .await
        .map_err(|e| WarehouseError::Auth(e.to_string()))?;

        Ok(Self {
            source: provider.token_source(),
        })
    }
}

#[async_trait]
impl TokenProvider for ServiceAccountTokens {
    async fn authorization(&self) -> Result<String, WarehouseError> {
        // the token source already prefixes the token type
        self.source
            .token()
            .await
            .map_err(|e| WarehouseError::Auth(e.to_string()))
    }
}

/// A fixed bearer token, for tests and short-lived tokens minted elsewhere.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn authorization(&self) -> Result<String, WarehouseError> {
        Ok(format!("Bearer {}", self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_token_is_a_bearer_header() {
        let token = StaticToken::new("abc");
        assert_eq!(token.authorization().await.unwrap(), "Bearer abc");
    }

    #[tokio::test]
    async fn missing_key_file_is_an_auth_error() {
        let res = ServiceAccountTokens::from_file(Path::new("/nonexistent/key.json")).await;
        match res {
            Err(WarehouseError::Auth(msg)) => assert!(msg.contains("/nonexistent/key.json")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected an error"),
        }
    }
}
