use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::time::Duration;

use super::{ServerEndpoint, TokenProvider};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

/// Fetches the socket credential with `GET /api/auth/token`.
pub struct HttpTokenProvider {
    agent: ureq::Agent,
}

impl HttpTokenProvider {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { agent }
    }
}

impl TokenProvider for HttpTokenProvider {
    fn fetch_token(&self, endpoint: &ServerEndpoint) -> Result<String> {
        let url = endpoint.token_url()?;
        let body = self
            .agent
            .get(url.as_str())
            .call()
            .with_context(|| format!("GET {}", url))?
            .into_string()
            .context("read token response")?;
        parse_token_response(&body)
    }
}

fn parse_token_response(body: &str) -> Result<String> {
    let response: TokenResponse =
        serde_json::from_str(body).map_err(|e| anyhow!("invalid token response: {}", e))?;
    if response.token.trim().is_empty() {
        return Err(anyhow!("token response carried an empty token"));
    }
    Ok(response.token)
}

/// Fixed credential, for loopback runs and tests.
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl TokenProvider for StaticToken {
    fn fetch_token(&self, _endpoint: &ServerEndpoint) -> Result<String> {
        Ok(self.token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_token_body() -> Result<()> {
        assert_eq!(parse_token_response(r#"{"token":"abc123"}"#)?, "abc123");
        Ok(())
    }

    #[test]
    fn rejects_empty_or_missing_token() {
        assert!(parse_token_response(r#"{"token":"  "}"#).is_err());
        assert!(parse_token_response(r#"{"jwt":"abc"}"#).is_err());
        assert!(parse_token_response("<html>").is_err());
    }
}
