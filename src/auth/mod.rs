use async_trait::async_trait;

use crate::error::{Error, Result};

/// Supplies the bearer token attached to backend requests.
///
/// The token is an opaque header value here; how it is minted or refreshed
/// is the auth provider's business, outside this crate.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<String>;
}

/// Fixed token handed over at construction.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn bearer_token(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}

/// Reads the token from an environment variable on every call, so an
/// externally refreshed value is picked up without restarting.
pub struct EnvTokenProvider {
    var_name: String,
}

impl EnvTokenProvider {
    pub fn new(var_name: impl Into<String>) -> Self {
        Self {
            var_name: var_name.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for EnvTokenProvider {
    async fn bearer_token(&self) -> Result<String> {
        std::env::var(&self.var_name)
            .map_err(|_| Error::auth(format!("Environment variable {} is not set", self.var_name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_provider() {
        let provider = StaticTokenProvider::new("tok-123");
        assert_eq!(provider.bearer_token().await.unwrap(), "tok-123");
    }

    #[tokio::test]
    async fn test_env_provider_missing_var() {
        let provider = EnvTokenProvider::new("KBCHAT_TEST_TOKEN_UNSET");
        let err = provider.bearer_token().await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }
}
