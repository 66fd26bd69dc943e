use reqwest::{
    Method, RequestBuilder, Response,
    header::{AUTHORIZATION, HeaderValue},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::identity::{AuthUser, Session};
use harness_error::{
    HarnessError,
    anyhow::{self, Context as _},
};

const API_KEY_HEADER: &str = "apikey";

/// HTTP client for the auth and data APIs of one backend.
///
/// Every request carries the project key in the `apikey` header and a bearer token: the key
/// itself for the anonymous and service clients, or a session's access token for a scoped
/// client built with [`ApiClient::with_access_token`].
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    bearer: String,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("scoped", &(self.bearer != self.api_key))
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

/// Attributes accepted by the admin user update endpoint.
#[derive(Clone, Debug, Default, Serialize)]
pub struct AdminUserAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_confirm: Option<bool>,
}

/// Sign-up answers with a session when the backend auto-confirms, and with the bare user
/// otherwise.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SignUpResponse {
    Session(Session),
    User(AuthUser),
}

impl SignUpResponse {
    #[must_use]
    pub fn user(&self) -> &AuthUser {
        match self {
            SignUpResponse::Session(session) => &session.user,
            SignUpResponse::User(user) => user,
        }
    }
}

// The auth API reports `msg` or `error_description`, the data API reports `message`.
#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    msg: Option<String>,
    message: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
}

pub(crate) fn api_error(status: u16, body: &str) -> HarnessError {
    let parsed = serde_json::from_str::<ApiErrorBody>(body).unwrap_or_default();

    let message = parsed
        .msg
        .or(parsed.message)
        .or(parsed.error_description)
        .or(parsed.error)
        .unwrap_or_else(|| {
            if body.is_empty() {
                "empty response body".to_string()
            } else {
                body.to_string()
            }
        });

    HarnessError::api(status, message)
}

impl ApiClient {
    #[must_use]
    pub fn new(http: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            bearer: api_key.to_string(),
        }
    }

    /// A client with the same key that authenticates as the session behind `access_token`.
    #[must_use]
    pub fn with_access_token(&self, access_token: &str) -> Self {
        Self {
            bearer: access_token.to_string(),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    fn request(&self, method: Method, path: &str) -> anyhow::Result<RequestBuilder> {
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.bearer))
            .context("Bearer token is not a valid header value")?;

        Ok(self
            .http
            .request(method, format!("{}{path}", self.base_url))
            .header(API_KEY_HEADER, self.api_key.as_str())
            .header(AUTHORIZATION, bearer))
    }

    async fn decode<T: DeserializeOwned>(res: Response) -> anyhow::Result<T> {
        let status = res.status();

        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(api_error(status.as_u16(), &body).into());
        }

        let url = res.url().clone();

        res.json::<T>()
            .await
            .with_context(|| format!("Failed to decode response body from {url}"))
    }

    /// Self-service sign-up with email and password.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails or the auth API rejects the sign-up.
    #[instrument(err, skip(self, password))]
    pub async fn sign_up(&self, email: &str, password: &str) -> anyhow::Result<SignUpResponse> {
        let res = self
            .request(Method::POST, "/auth/v1/signup")?
            .json(&Credentials { email, password })
            .send()
            .await
            .with_context(|| format!("Failed to send sign-up request for {email}"))?;

        Self::decode(res).await
    }

    /// # Errors
    ///
    /// Will return `Err` if the request fails or the credentials are rejected.
    #[instrument(err, skip(self, password))]
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> anyhow::Result<Session> {
        let res = self
            .request(Method::POST, "/auth/v1/token?grant_type=password")?
            .json(&Credentials { email, password })
            .send()
            .await
            .with_context(|| format!("Failed to send password login request for {email}"))?;

        Self::decode(res).await
    }

    /// Administrative user update. Requires the service key.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the request fails or the auth API rejects the update.
    #[instrument(err, skip(self))]
    pub async fn admin_update_user_by_id(
        &self,
        id: Uuid,
        attributes: &AdminUserAttributes,
    ) -> anyhow::Result<AuthUser> {
        let res = self
            .request(Method::PUT, &format!("/auth/v1/admin/users/{id}"))?
            .json(attributes)
            .send()
            .await
            .with_context(|| format!("Failed to send admin update request for user {id}"))?;

        Self::decode(res).await
    }

    /// Starts a read of `table` through the data API.
    #[must_use]
    pub fn table(&self, table: &str) -> TableQuery<'_> {
        TableQuery {
            client: self,
            table: table.to_string(),
            columns: "*".to_string(),
            filters: Vec::new(),
        }
    }
}

/// Read of one table through the data API, subject to the caller's row-level policies.
#[derive(Debug)]
pub struct TableQuery<'a> {
    client: &'a ApiClient,
    table: String,
    columns: String,
    filters: Vec<(String, String)>,
}

impl TableQuery<'_> {
    #[must_use]
    pub fn select(mut self, columns: &str) -> Self {
        self.columns = columns.to_string();
        self
    }

    #[must_use]
    pub fn eq(mut self, column: &str, value: impl std::fmt::Display) -> Self {
        self.filters.push((column.to_string(), format!("eq.{value}")));
        self
    }

    pub(crate) fn query_pairs(&self) -> Vec<(&str, &str)> {
        std::iter::once(("select", self.columns.as_str()))
            .chain(
                self.filters
                    .iter()
                    .map(|(column, filter)| (column.as_str(), filter.as_str())),
            )
            .collect()
    }

    /// # Errors
    ///
    /// Will return `Err` if the request fails, the data API rejects it, or the rows do not
    /// decode as `T`.
    #[instrument(err, skip(self), fields(table = %self.table))]
    pub async fn fetch<T: DeserializeOwned>(self) -> anyhow::Result<Vec<T>> {
        let res = self
            .client
            .request(Method::GET, &format!("/rest/v1/{}", self.table))?
            .query(&self.query_pairs())
            .send()
            .await
            .with_context(|| format!("Failed to send read request for table {}", self.table))?;

        let rows: Vec<T> = ApiClient::decode(res).await?;

        debug!(rows = rows.len(), "Fetched rows");

        Ok(rows)
    }
}
