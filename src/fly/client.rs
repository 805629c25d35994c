//! Authenticated request/response exchange with the Machines API.

use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::config::{ConfigError, FlyConfig};
use crate::control_plane::{ApiFailure, ErrorBody};

const USER_AGENT: &str = concat!("jupyfly/", env!("CARGO_PKG_VERSION"));

/// Successful response: the status code and the decoded JSON body, absent for
/// `204 No Content` and empty bodies.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Decoded JSON body.
    pub data: Option<Value>,
}

impl ApiResponse {
    /// Decodes the body into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiFailure::Transport`] when the body is missing or does not
    /// match `T`; the response is considered malformed.
    pub fn decode<T: DeserializeOwned>(self) -> Result<T, ApiFailure> {
        let data = self
            .data
            .ok_or_else(|| ApiFailure::transport("malformed response: empty body"))?;
        serde_json::from_value(data)
            .map_err(|err| ApiFailure::transport(format!("malformed response: {err}")))
    }
}

/// Thin client over `reqwest` carrying the bearer credential and base URL.
#[derive(Clone, Debug)]
pub struct FlyClient {
    http: reqwest::Client,
    base_url: String,
}

impl FlyClient {
    /// Builds a client from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the API token is missing or unusable as a
    /// header value, or when the HTTP client cannot be constructed. No request
    /// is attempted in either case.
    pub fn new(config: &FlyConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_token.trim()))
            .map_err(|err| ConfigError::Invalid(format!("api_token: {err}")))?;
        bearer.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout())
            .build()
            .map_err(|err| ConfigError::Client(err.to_string()))?;

        Ok(Self {
            http,
            base_url: config.api_base_url(),
        })
    }

    /// Base URL requests are issued against.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issues `method path` with an optional JSON body.
    ///
    /// 2xx responses resolve to [`ApiResponse`]. Any other status resolves to
    /// [`ApiFailure::Status`] with the body parsed as JSON when possible and
    /// kept as text otherwise. Connection problems, timeouts, and unreadable
    /// bodies resolve to [`ApiFailure::Transport`].
    ///
    /// # Errors
    ///
    /// Returns [`ApiFailure`] as described above.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<ApiResponse, ApiFailure> {
        let url = format!("{}{path}", self.base_url);
        let mut builder = self.http.request(method.clone(), &url);
        if let Some(payload) = body {
            builder = builder.json(payload);
        }

        let response = builder.send().await.map_err(|err| {
            debug!(%method, path, error = %err, "request did not complete");
            ApiFailure::transport(err)
        })?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(ApiFailure::transport)?;
        debug!(%method, path, status = status.as_u16(), "control plane responded");

        if !status.is_success() {
            return Err(ApiFailure::Status {
                status: status.as_u16(),
                body: ErrorBody::from_bytes(&bytes),
            });
        }

        let data = if status == StatusCode::NO_CONTENT || bytes.iter().all(u8::is_ascii_whitespace)
        {
            None
        } else {
            Some(
                serde_json::from_slice(&bytes)
                    .map_err(|err| ApiFailure::transport(format!("malformed response: {err}")))?,
            )
        };

        Ok(ApiResponse {
            status: status.as_u16(),
            data,
        })
    }

    /// Issues a request with a serialisable body.
    ///
    /// # Errors
    ///
    /// Returns [`ApiFailure::Transport`] when the body cannot be encoded, and
    /// otherwise behaves like [`Self::request`].
    pub async fn request_json<B: serde::Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<ApiResponse, ApiFailure> {
        let value = serde_json::to_value(body)
            .map_err(|err| ApiFailure::transport(format!("failed to encode request: {err}")))?;
        self.request(method, path, Some(&value)).await
    }
}
