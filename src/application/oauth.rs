use crate::domain::models::OAuthToken;
use crate::infrastructure::config::ClientSecrets;
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::oauth_client::{OAuthHttpClient, OAuthTokenResponse, TokenGrant, TokenRequest};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

const DEFAULT_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_AUTHORIZATION_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const DEFAULT_REDIRECT_URI: &str = "http://localhost";
pub const CALENDAR_SCOPE: &str = "https://www.googleapis.com/auth/calendar";
const TOKEN_LEEWAY_SECONDS: i64 = 60;

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub token_endpoint: String,
    pub authorization_endpoint: String,
}

impl OAuthConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            scopes,
            token_endpoint: DEFAULT_TOKEN_ENDPOINT.to_string(),
            authorization_endpoint: DEFAULT_AUTHORIZATION_ENDPOINT.to_string(),
        }
    }

    /// Builds the config from Google's client registration, honouring its endpoints and
    /// first redirect URI when present.
    pub fn from_client_secrets(secrets: &ClientSecrets, scopes: Vec<String>) -> Self {
        let redirect_uri = secrets
            .redirect_uris
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_REDIRECT_URI);
        let mut config = Self::new(&secrets.client_id, &secrets.client_secret, redirect_uri, scopes);
        if let Some(token_uri) = secrets.token_uri.as_deref().filter(|value| !value.trim().is_empty()) {
            config.token_endpoint = token_uri.to_string();
        }
        if let Some(auth_uri) = secrets.auth_uri.as_deref().filter(|value| !value.trim().is_empty()) {
            config.authorization_endpoint = auth_uri.to_string();
        }
        config
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureTokenResult {
    Existing(OAuthToken),
    Refreshed(OAuthToken),
    ReauthenticationRequired,
}

impl EnsureTokenResult {
    pub fn into_token(self) -> Option<OAuthToken> {
        match self {
            EnsureTokenResult::Existing(token) | EnsureTokenResult::Refreshed(token) => Some(token),
            EnsureTokenResult::ReauthenticationRequired => None,
        }
    }
}

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct OAuthManager<S, C>
where
    S: CredentialStore,
    C: OAuthHttpClient,
{
    config: OAuthConfig,
    credential_store: Arc<S>,
    oauth_client: Arc<C>,
    now_provider: NowProvider,
}

impl<S, C> OAuthManager<S, C>
where
    S: CredentialStore,
    C: OAuthHttpClient,
{
    pub fn new(config: OAuthConfig, credential_store: Arc<S>, oauth_client: Arc<C>) -> Self {
        Self {
            config,
            credential_store,
            oauth_client,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn is_token_valid(&self, token: &OAuthToken) -> bool {
        token.is_valid_at((self.now_provider)(), TOKEN_LEEWAY_SECONDS)
    }

    pub fn build_authorization_url(&self, state: &str) -> Result<String, InfraError> {
        if state.trim().is_empty() {
            return Err(InfraError::OAuth("state must not be empty".to_string()));
        }
        if self.config.scopes.is_empty() {
            return Err(InfraError::OAuth("at least one scope is required".to_string()));
        }

        let mut url = Url::parse(&self.config.authorization_endpoint)
            .map_err(|error| InfraError::OAuth(format!("invalid authorization endpoint: {error}")))?;
        let scope = self.config.scopes.join(" ");

        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("scope", &scope)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("state", state);

        Ok(url.to_string())
    }

    fn token_request(&self, grant: TokenGrant) -> TokenRequest {
        TokenRequest {
            token_endpoint: self.config.token_endpoint.clone(),
            client_id: self.config.client_id.clone(),
            client_secret: self.config.client_secret.clone(),
            grant,
        }
    }

    pub async fn authenticate_with_code(&self, authorization_code: &str) -> Result<OAuthToken, InfraError> {
        let authorization_code = authorization_code.trim();
        if authorization_code.is_empty() {
            return Err(InfraError::OAuth("authorization code must not be empty".to_string()));
        }

        let response = self
            .oauth_client
            .request_token(self.token_request(TokenGrant::AuthorizationCode {
                code: authorization_code.to_string(),
                redirect_uri: self.config.redirect_uri.clone(),
            }))
            .await?;

        let token = self.token_from_response(response, None);
        self.credential_store.save_token(&token)?;
        info!(expires_at = %token.expires_at, "stored new access token");
        Ok(token)
    }

    pub async fn ensure_access_token(&self) -> Result<EnsureTokenResult, InfraError> {
        let Some(stored_token) = self.credential_store.load_token()? else {
            debug!("no stored token");
            return Ok(EnsureTokenResult::ReauthenticationRequired);
        };

        if self.is_token_valid(&stored_token) {
            return Ok(EnsureTokenResult::Existing(stored_token));
        }

        let Some(refresh_token) = stored_token.refresh_token.clone() else {
            debug!("stored token expired without refresh token");
            return Ok(EnsureTokenResult::ReauthenticationRequired);
        };

        let refreshed = self
            .oauth_client
            .request_token(self.token_request(TokenGrant::RefreshToken(refresh_token.clone())))
            .await;

        match refreshed {
            Ok(response) => {
                let token = self.token_from_response(response, Some(refresh_token));
                self.credential_store.save_token(&token)?;
                info!(expires_at = %token.expires_at, "refreshed access token");
                Ok(EnsureTokenResult::Refreshed(token))
            }
            Err(error @ InfraError::OAuth(_)) if error.is_transient() => Err(error),
            Err(InfraError::OAuth(message)) => {
                warn!(%message, "token refresh rejected");
                Ok(EnsureTokenResult::ReauthenticationRequired)
            }
            Err(error) => Err(error),
        }
    }

    fn token_from_response(
        &self,
        response: OAuthTokenResponse,
        fallback_refresh_token: Option<String>,
    ) -> OAuthToken {
        let expires_at = (self.now_provider)() + Duration::seconds(response.expires_in.max(0));
        OAuthToken {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(fallback_refresh_token),
            expires_at,
            token_type: response.token_type.unwrap_or_else(|| "Bearer".to_string()),
            scope: response.scope,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::credential_store::InMemoryCredentialStore;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn success() -> Result<OAuthTokenResponse, InfraError> {
        Ok(OAuthTokenResponse {
            access_token: "fake_access".to_string(),
            refresh_token: Some("fake_refresh".to_string()),
            expires_in: 3600,
            token_type: Some("Bearer".to_string()),
            scope: Some(CALENDAR_SCOPE.to_string()),
        })
    }

    #[derive(Debug, Default)]
    struct FakeOAuthHttpClient {
        response: Mutex<Option<Result<OAuthTokenResponse, InfraError>>>,
        requests: Mutex<Vec<TokenRequest>>,
        calls: AtomicUsize,
    }

    impl FakeOAuthHttpClient {
        fn respond_with(&self, response: Result<OAuthTokenResponse, InfraError>) {
            *self.response.lock().expect("response mutex poisoned") = Some(response);
        }

        fn last_grant(&self) -> Option<TokenGrant> {
            self.requests
                .lock()
                .expect("requests mutex poisoned")
                .last()
                .map(|request| request.grant.clone())
        }
    }

    #[async_trait]
    impl OAuthHttpClient for FakeOAuthHttpClient {
        async fn request_token(&self, request: TokenRequest) -> Result<OAuthTokenResponse, InfraError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().expect("requests mutex poisoned").push(request);
            self.response
                .lock()
                .expect("response mutex poisoned")
                .take()
                .unwrap_or_else(success)
        }
    }

    fn test_config() -> OAuthConfig {
        OAuthConfig::new(
            "client-id",
            "client-secret",
            "http://localhost",
            vec![CALENDAR_SCOPE.to_string()],
        )
    }

    fn token_pattern() -> impl Strategy<Value = String> {
        "[A-Za-z0-9._\\-]{1,64}".prop_map(|value| value.to_string())
    }

    fn arb_oauth_token() -> impl Strategy<Value = OAuthToken> {
        (
            token_pattern(),
            prop::option::of(token_pattern()),
            120i64..604800i64,
            prop::option::of(token_pattern()),
            token_pattern(),
        )
            .prop_map(
                |(access_token, refresh_token, expires_in_seconds, scope, token_type)| OAuthToken {
                    access_token,
                    refresh_token,
                    expires_at: Utc::now() + Duration::seconds(expires_in_seconds),
                    token_type,
                    scope,
                },
            )
    }

    proptest! {
        #[test]
        fn valid_token_is_used_without_contacting_the_token_endpoint(token in arb_oauth_token()) {
            let runtime = tokio::runtime::Runtime::new().expect("runtime");
            runtime.block_on(async move {
                let store = Arc::new(InMemoryCredentialStore::default());
                store.save_token(&token).expect("save token");

                let client = Arc::new(FakeOAuthHttpClient::default());
                let manager = OAuthManager::new(test_config(), Arc::clone(&store), Arc::clone(&client));
                let result = manager.ensure_access_token().await.expect("ensure token");

                assert_eq!(result, EnsureTokenResult::Existing(token));
                assert_eq!(client.calls.load(Ordering::SeqCst), 0);
            });
        }
    }

    proptest! {
        #[test]
        fn rejected_refresh_requires_reauthentication(
            access_token in token_pattern(),
            refresh_token in prop::option::of(token_pattern()),
            expired_seconds_ago in 1i64..86400i64
        ) {
            let runtime = tokio::runtime::Runtime::new().expect("runtime");
            runtime.block_on(async move {
                let expired = OAuthToken {
                    access_token,
                    refresh_token: refresh_token.clone(),
                    expires_at: Utc::now() - Duration::seconds(expired_seconds_ago),
                    token_type: "Bearer".to_string(),
                    scope: None,
                };

                let store = Arc::new(InMemoryCredentialStore::default());
                store.save_token(&expired).expect("save token");

                let client = Arc::new(FakeOAuthHttpClient::default());
                client.respond_with(Err(InfraError::OAuth("token endpoint error: invalid_grant; revoked".to_string())));

                let manager = OAuthManager::new(test_config(), Arc::clone(&store), Arc::clone(&client));
                let result = manager.ensure_access_token().await.expect("ensure token");

                assert_eq!(result, EnsureTokenResult::ReauthenticationRequired);
                let expected_calls = usize::from(refresh_token.is_some());
                assert_eq!(client.calls.load(Ordering::SeqCst), expected_calls);
            });
        }
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_and_keeps_refresh_token() {
        let store = Arc::new(InMemoryCredentialStore::default());
        let expired = OAuthToken {
            access_token: "expired-token".to_string(),
            refresh_token: Some("refresh-token".to_string()),
            expires_at: Utc::now() - Duration::seconds(120),
            token_type: "Bearer".to_string(),
            scope: None,
        };
        store.save_token(&expired).expect("save token");

        let client = Arc::new(FakeOAuthHttpClient::default());
        client.respond_with(Ok(OAuthTokenResponse {
            access_token: "new-access-token".to_string(),
            refresh_token: None,
            expires_in: 3600,
            token_type: Some("Bearer".to_string()),
            scope: None,
        }));

        let manager = OAuthManager::new(test_config(), Arc::clone(&store), Arc::clone(&client));
        let result = manager.ensure_access_token().await.expect("ensure access token");

        let EnsureTokenResult::Refreshed(token) = result else {
            panic!("expected refreshed result");
        };
        assert_eq!(token.access_token, "new-access-token");
        assert_eq!(token.refresh_token.as_deref(), Some("refresh-token"));
        assert_eq!(client.last_grant(), Some(TokenGrant::RefreshToken("refresh-token".to_string())));
        assert_eq!(store.load_token().expect("load").map(|t| t.access_token).as_deref(), Some("new-access-token"));
    }

    #[tokio::test]
    async fn network_failure_during_refresh_is_an_error_not_a_reauth() {
        let store = Arc::new(InMemoryCredentialStore::default());
        store
            .save_token(&OAuthToken {
                access_token: "old".to_string(),
                refresh_token: Some("refresh".to_string()),
                expires_at: Utc::now() - Duration::seconds(5),
                token_type: "Bearer".to_string(),
                scope: None,
            })
            .expect("save token");

        let client = Arc::new(FakeOAuthHttpClient::default());
        client.respond_with(Err(InfraError::OAuth("network error while requesting token: dns".to_string())));

        let manager = OAuthManager::new(test_config(), store, client);
        assert!(manager.ensure_access_token().await.is_err());
    }

    #[tokio::test]
    async fn authenticate_with_code_saves_token_to_store() {
        let store = Arc::new(InMemoryCredentialStore::default());
        let client = Arc::new(FakeOAuthHttpClient::default());
        let fixed_now = Utc::now();

        let manager = OAuthManager::new(test_config(), Arc::clone(&store), Arc::clone(&client))
            .with_now_provider(Arc::new(move || fixed_now));
        let token = manager
            .authenticate_with_code(" 4/sample-code ")
            .await
            .expect("authenticate with code");

        assert_eq!(token.access_token, "fake_access");
        assert_eq!(token.expires_at, fixed_now + Duration::seconds(3600));
        assert_eq!(
            client.last_grant(),
            Some(TokenGrant::AuthorizationCode {
                code: "4/sample-code".to_string(),
                redirect_uri: "http://localhost".to_string(),
            })
        );
        assert_eq!(store.load_token().expect("load token"), Some(token));
    }

    #[test]
    fn authorization_url_requests_offline_calendar_access() {
        let manager = OAuthManager::new(
            test_config(),
            Arc::new(InMemoryCredentialStore::default()),
            Arc::new(FakeOAuthHttpClient::default()),
        );
        let url = Url::parse(&manager.build_authorization_url("state-1").expect("url")).expect("parse url");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();

        assert!(pairs.contains(&("access_type".to_string(), "offline".to_string())));
        assert!(pairs.contains(&("scope".to_string(), CALENDAR_SCOPE.to_string())));
        assert!(pairs.contains(&("client_id".to_string(), "client-id".to_string())));
        assert!(manager.build_authorization_url(" ").is_err());
    }

    #[test]
    fn config_from_client_secrets_prefers_registered_endpoints() {
        let secrets = ClientSecrets {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            redirect_uris: vec!["http://127.0.0.1:8080".to_string()],
            auth_uri: Some("https://accounts.example/auth".to_string()),
            token_uri: None,
        };
        let config = OAuthConfig::from_client_secrets(&secrets, vec![CALENDAR_SCOPE.to_string()]);
        assert_eq!(config.redirect_uri, "http://127.0.0.1:8080");
        assert_eq!(config.authorization_endpoint, "https://accounts.example/auth");
        assert_eq!(config.token_endpoint, DEFAULT_TOKEN_ENDPOINT);
    }
}
