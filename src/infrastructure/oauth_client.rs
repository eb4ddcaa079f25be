use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;

/// The two grants this tool needs from Google's token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenGrant {
    AuthorizationCode { code: String, redirect_uri: String },
    RefreshToken(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    pub token_endpoint: String,
    pub client_id: String,
    pub client_secret: String,
    pub grant: TokenGrant,
}

impl TokenRequest {
    fn form(&self) -> Vec<(&'static str, &str)> {
        let mut params = vec![
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        match &self.grant {
            TokenGrant::AuthorizationCode { code, redirect_uri } => {
                params.push(("grant_type", "authorization_code"));
                params.push(("code", code.as_str()));
                params.push(("redirect_uri", redirect_uri.as_str()));
            }
            TokenGrant::RefreshToken(refresh_token) => {
                params.push(("grant_type", "refresh_token"));
                params.push(("refresh_token", refresh_token.as_str()));
            }
        }
        params
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthTokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    pub token_type: Option<String>,
    pub scope: Option<String>,
}

#[async_trait]
pub trait OAuthHttpClient: Send + Sync {
    async fn request_token(&self, request: TokenRequest) -> Result<OAuthTokenResponse, InfraError>;
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestOAuthClient {
    client: Client,
}

#[derive(Debug, serde::Deserialize)]
struct TokenResponsePayload {
    #[serde(default)]
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    token_type: Option<String>,
    scope: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl ReqwestOAuthClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

fn parse_token_response(status: u16, body: &str) -> Result<OAuthTokenResponse, InfraError> {
    let parsed = serde_json::from_str::<TokenResponsePayload>(body).map_err(|error| {
        InfraError::OAuth(format!("invalid token response payload: {error}; body={body}"))
    })?;

    if !(200..300).contains(&status) || parsed.error.is_some() {
        let code = parsed.error.unwrap_or_else(|| format!("http_{status}"));
        let detail = parsed.error_description.unwrap_or_else(|| body.to_string());
        return Err(InfraError::OAuth(format!("token endpoint error: {code}; {detail}")));
    }
    if parsed.access_token.trim().is_empty() {
        return Err(InfraError::OAuth("token response did not include an access token".to_string()));
    }

    Ok(OAuthTokenResponse {
        access_token: parsed.access_token,
        refresh_token: parsed.refresh_token,
        expires_in: parsed.expires_in.unwrap_or(0).max(0),
        token_type: parsed.token_type,
        scope: parsed.scope,
    })
}

#[async_trait]
impl OAuthHttpClient for ReqwestOAuthClient {
    async fn request_token(&self, request: TokenRequest) -> Result<OAuthTokenResponse, InfraError> {
        let response = self
            .client
            .post(&request.token_endpoint)
            .form(&request.form())
            .send()
            .await
            .map_err(|error| InfraError::OAuth(format!("network error while requesting token: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::OAuth(format!("network error while reading token response: {error}")))?;

        parse_token_response(status.as_u16(), &body)
    }
}
