use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

const IDENTITY_TOOLKIT_BASE: &str = "https://identitytoolkit.googleapis.com/v1/";
const SECURE_TOKEN_ENDPOINT: &str = "https://securetoken.googleapis.com/v1/token";
const NETWORK_ERROR_MESSAGE: &str = "Network error. Check your connection.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthTokenResponse {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub id_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub is_anonymous: bool,
}

#[async_trait]
pub trait AuthClient: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthTokenResponse, InfraError>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthTokenResponse, InfraError>;

    async fn sign_in_anonymously(&self) -> Result<AuthTokenResponse, InfraError>;

    async fn refresh(&self, refresh_token: &str) -> Result<AuthTokenResponse, InfraError>;

    async fn update_display_name(
        &self,
        id_token: &str,
        display_name: &str,
    ) -> Result<(), InfraError>;
}

/// Maps Firebase Auth error codes to the messages shown next to the forms.
pub fn friendly_auth_message(code: &str) -> String {
    match code {
        "EMAIL_EXISTS" => "This email is already registered. Please login.".to_string(),
        "INVALID_EMAIL" | "MISSING_EMAIL" => "Please enter a valid email address.".to_string(),
        "EMAIL_NOT_FOUND" => "No account found with this email.".to_string(),
        "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" => "Incorrect password.".to_string(),
        "WEAK_PASSWORD" => "Password should be at least 6 characters.".to_string(),
        "NETWORK_REQUEST_FAILED" => NETWORK_ERROR_MESSAGE.to_string(),
        other => format!("Error: {other}"),
    }
}

#[derive(Debug, Clone)]
pub struct ReqwestAuthClient {
    client: Client,
    api_key: String,
    identity_base: String,
    token_endpoint: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInPayload {
    local_id: String,
    email: Option<String>,
    display_name: Option<String>,
    id_token: String,
    refresh_token: String,
    expires_in: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefreshPayload {
    user_id: String,
    id_token: String,
    refresh_token: String,
    expires_in: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorPayload>,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    message: Option<String>,
}

impl ReqwestAuthClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            identity_base: IDENTITY_TOOLKIT_BASE.to_string(),
            token_endpoint: SECURE_TOKEN_ENDPOINT.to_string(),
        }
    }

    fn accounts_endpoint(&self, method: &str) -> Result<Url, InfraError> {
        let mut url = Url::parse(&self.identity_base)
            .map_err(|error| InfraError::Auth(format!("invalid identity toolkit url: {error}")))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| {
                    InfraError::Auth("identity toolkit URL cannot be a base".to_string())
                })?;
            segments.pop_if_empty();
            segments.push(&format!("accounts:{method}"));
        }
        url.query_pairs_mut().append_pair("key", &self.api_key);
        Ok(url)
    }

    async fn post_json(&self, method: &str, body: serde_json::Value) -> Result<String, InfraError> {
        let url = self.accounts_endpoint(method)?;
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|error| {
                tracing::warn!(method, %error, "auth request failed");
                InfraError::Http(NETWORK_ERROR_MESSAGE.to_string())
            })?;
        read_body(response).await
    }

    async fn sign_in_request(
        &self,
        method: &str,
        body: serde_json::Value,
        is_anonymous: bool,
    ) -> Result<AuthTokenResponse, InfraError> {
        let body = self.post_json(method, body).await?;
        parse_sign_in(&body, is_anonymous)
    }
}

async fn read_body(response: reqwest::Response) -> Result<String, InfraError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|error| InfraError::Http(format!("failed reading auth response: {error}")))?;
    if !status.is_success() {
        let code = error_code(&body).unwrap_or_else(|| format!("HTTP_{}", status.as_u16()));
        return Err(InfraError::Auth(friendly_auth_message(&code)));
    }
    Ok(body)
}

/// Firebase reports codes such as `WEAK_PASSWORD : Password should be...`;
/// only the leading token is significant.
fn error_code(body: &str) -> Option<String> {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()?
        .error?
        .message?;
    message
        .split([' ', ':'])
        .map(str::trim)
        .find(|part| !part.is_empty())
        .map(ToOwned::to_owned)
}

fn parse_expires_in(raw: Option<&str>) -> i64 {
    raw.and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or(3_600)
        .max(0)
}

fn parse_sign_in(body: &str, is_anonymous: bool) -> Result<AuthTokenResponse, InfraError> {
    let payload: SignInPayload = serde_json::from_str(body)
        .map_err(|error| InfraError::Auth(format!("invalid sign-in payload: {error}")))?;
    Ok(AuthTokenResponse {
        uid: payload.local_id,
        email: payload.email.filter(|email| !email.trim().is_empty()),
        display_name: payload.display_name.filter(|name| !name.trim().is_empty()),
        id_token: payload.id_token,
        refresh_token: payload.refresh_token,
        expires_in: parse_expires_in(payload.expires_in.as_deref()),
        is_anonymous,
    })
}

fn parse_refresh(body: &str) -> Result<AuthTokenResponse, InfraError> {
    let payload: RefreshPayload = serde_json::from_str(body)
        .map_err(|error| InfraError::Auth(format!("invalid token refresh payload: {error}")))?;
    Ok(AuthTokenResponse {
        uid: payload.user_id,
        email: None,
        display_name: None,
        id_token: payload.id_token,
        refresh_token: payload.refresh_token,
        expires_in: parse_expires_in(payload.expires_in.as_deref()),
        is_anonymous: false,
    })
}

#[async_trait]
impl AuthClient for ReqwestAuthClient {
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthTokenResponse, InfraError> {
        self.sign_in_request(
            "signUp",
            serde_json::json!({ "email": email, "password": password, "returnSecureToken": true }),
            false,
        )
        .await
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthTokenResponse, InfraError> {
        self.sign_in_request(
            "signInWithPassword",
            serde_json::json!({ "email": email, "password": password, "returnSecureToken": true }),
            false,
        )
        .await
    }

    async fn sign_in_anonymously(&self) -> Result<AuthTokenResponse, InfraError> {
        self.sign_in_request("signUp", serde_json::json!({ "returnSecureToken": true }), true)
            .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthTokenResponse, InfraError> {
        if refresh_token.trim().is_empty() {
            return Err(InfraError::Auth("refresh token must not be empty".to_string()));
        }
        let mut url = Url::parse(&self.token_endpoint)
            .map_err(|error| InfraError::Auth(format!("invalid token endpoint: {error}")))?;
        url.query_pairs_mut().append_pair("key", &self.api_key);

        let response = self
            .client
            .post(url)
            .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .send()
            .await
            .map_err(|error| {
                tracing::warn!(%error, "token refresh request failed");
                InfraError::Http(NETWORK_ERROR_MESSAGE.to_string())
            })?;
        let body = read_body(response).await?;
        parse_refresh(&body)
    }

    async fn update_display_name(
        &self,
        id_token: &str,
        display_name: &str,
    ) -> Result<(), InfraError> {
        self.post_json(
            "update",
            serde_json::json!({
                "idToken": id_token,
                "displayName": display_name,
                "returnSecureToken": false
            }),
        )
        .await
        .map(|_| ())
    }
}
