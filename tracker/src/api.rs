//! HTTP client for the DevBoost API.
//!
//! Every request carries:
//!
//! - `Accept` / `Content-Type: application/json`
//! - `User-Agent`: `<editor>/<version> devboost-tracker/<version>`
//! - `cockepit-Plugin-Offset`: local UTC offset in minutes, positive west of
//!   UTC
//! - `cockepit-Plugin-TZ`: the `TZ` zone name, or `UTC`
//! - `Authorization: Bearer <token>` and `Token-Type: <code>` from the stored
//!   [`AuthToken`](crate::types::AuthToken)
//!
//! Requests are attempted once; callers decide how to degrade. A 401 is
//! reported as [`ApiError::Unauthorized`] and, the first time per client,
//! published as a [`TrackerNotice::AuthRequired`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Local;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::events::{NoticeBus, TrackerNotice};
use crate::store::LocalStore;

const OFFSET_HEADER: &str = "cockepit-Plugin-Offset";
const TZ_HEADER: &str = "cockepit-Plugin-TZ";
const TOKEN_TYPE_HEADER: &str = "Token-Type";

const AUTH_REQUIRED_MESSAGE: &str = "Invalid DevBoost authorization, run `devboost-tracker login`";

/// Errors that can occur when talking to the API.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Transport failure (connect, timeout, body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server returned a non-success status other than 401.
    #[error("server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    /// Server rejected the token (401).
    #[error("authentication failed: invalid or expired token")]
    Unauthorized,

    /// No token is stored locally.
    #[error("authentication token is required, please log in")]
    MissingToken,

    /// Caller asked for an HTTP method the client does not speak.
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    /// Response body could not be decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A header value contains invalid characters.
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
}

impl ApiError {
    /// Returns true for failures the caller should treat as "offline".
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::ServerError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Parses an HTTP method name.
///
/// # Errors
///
/// Returns `ApiError::UnsupportedMethod` for anything other than GET, POST,
/// PATCH, PUT and DELETE.
pub fn parse_method(method: &str) -> Result<Method, ApiError> {
    match method.to_ascii_uppercase().as_str() {
        "GET" => Ok(Method::GET),
        "POST" => Ok(Method::POST),
        "PATCH" => Ok(Method::PATCH),
        "PUT" => Ok(Method::PUT),
        "DELETE" => Ok(Method::DELETE),
        _ => Err(ApiError::UnsupportedMethod(method.to_string())),
    }
}

/// Local UTC offset in minutes with the JavaScript sign convention
/// (`Date#getTimezoneOffset`): positive west of UTC.
#[must_use]
pub fn offset_minutes() -> i32 {
    -(Local::now().offset().local_minus_utc() / 60)
}

/// Zone name reported to the service.
#[must_use]
pub fn time_zone_name() -> String {
    std::env::var("TZ")
        .ok()
        .map(|tz| tz.trim_start_matches(':').to_string())
        .filter(|tz| !tz.is_empty())
        .unwrap_or_else(|| "UTC".to_string())
}

/// API client bound to one base URL and one local store.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    client: Client,
    store: LocalStore,
    notices: NoticeBus,
    auth_notified: Arc<AtomicBool>,
}

impl ApiClient {
    /// Creates a client using the API URL, timeout and user agent from
    /// `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if a header value is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: &Config, store: LocalStore, notices: NoticeBus) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_str(&config.user_agent())?);

        let client = Client::builder()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            client,
            store,
            notices,
            auth_notified: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Base URL of the API.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Credential and time zone headers, read fresh for every request.
    fn request_headers(&self) -> Result<HeaderMap, ApiError> {
        let token = self.store.auth_token().ok_or(ApiError::MissingToken)?;
        let mut headers = HeaderMap::new();
        headers.insert(OFFSET_HEADER, HeaderValue::from(offset_minutes()));
        headers.insert(TZ_HEADER, HeaderValue::from_str(&time_zone_name())?);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token.token))?,
        );
        headers.insert(
            TOKEN_TYPE_HEADER,
            HeaderValue::from(u16::from(token.token_type.code())),
        );
        Ok(headers)
    }

    /// Sends a request and returns the response if its status is 2xx.
    ///
    /// # Errors
    ///
    /// - `UnsupportedMethod` for an unknown `method`
    /// - `MissingToken` when no token is stored
    /// - `Unauthorized` on 401, `ServerError` on any other non-2xx status
    /// - `Http` on transport failure
    pub async fn send<B: Serialize + ?Sized>(
        &self,
        method: &str,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<Response, ApiError> {
        let method = parse_method(method)?;
        let headers = self.request_headers()?;
        let url = self.url(path);

        let mut request = self.client.request(method.clone(), &url).headers(headers);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            if method == Method::POST || method == Method::PUT || method == Method::PATCH {
                request = request.body(serde_json::to_string(body)?);
            }
        }

        debug!(method = %method, url = %url, "Sending API request");
        let response = request.send().await?;
        let status = response.status();

        match status {
            _ if status.is_success() => {
                debug!(
                    method = %method,
                    url = %url,
                    status = status.as_u16(),
                    "API request succeeded"
                );
                Ok(response)
            }
            StatusCode::UNAUTHORIZED => {
                self.notify_unauthorized(&method, &url);
                Err(ApiError::Unauthorized)
            }
            _ => {
                let message = response.text().await.unwrap_or_default();
                warn!(
                    method = %method,
                    url = %url,
                    status = status.as_u16(),
                    message = %message,
                    "API request failed"
                );
                Err(ApiError::ServerError {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }

    fn notify_unauthorized(&self, method: &Method, url: &str) {
        if self.auth_notified.swap(true, Ordering::SeqCst) {
            debug!(method = %method, url = %url, "Unauthorized (already reported)");
            return;
        }
        warn!(method = %method, url = %url, "Invalid DevBoost authorization token");
        self.notices.publish(TrackerNotice::AuthRequired {
            message: AUTH_REQUIRED_MESSAGE.to_string(),
        });
    }

    /// Decodes a JSON body; an empty or `null` body yields `None`.
    async fn decode<T: DeserializeOwned>(response: Response) -> Result<Option<T>, ApiError> {
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(serde_json::from_str::<Option<T>>(&text)?)
    }

    /// `GET path` and decode the JSON body.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::send`]; also fails if the body is not valid `T`.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>, ApiError> {
        let response = self.send::<()>("GET", path, query, None).await?;
        Self::decode(response).await
    }

    /// `POST path` with a JSON body and decode the JSON response.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::send`]; also fails if the body is not valid `T`.
    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Option<T>, ApiError> {
        let response = self.send("POST", path, &[], Some(body)).await?;
        Self::decode(response).await
    }

    /// `DELETE path`, discarding the body.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::send`].
    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.send::<()>("DELETE", path, &[], None).await?;
        Ok(())
    }

    /// `GET path` and return the body as text.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::send`].
    pub async fn get_text(&self, path: &str) -> Result<String, ApiError> {
        let response = self.send::<()>("GET", path, &[], None).await?;
        let text = response.text().await?;
        info!(path, bytes = text.len(), "Fetched text response");
        Ok(text)
    }
}
