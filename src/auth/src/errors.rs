// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Errors created while using external account credentials.

use crate::transport::RawResponse;
use http::StatusCode;
use serde::Deserialize;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

type ArcError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Represents an error using external account credentials.
///
/// The credentials may fail to fetch the subject token, the Security Token
/// Service may reject the exchange, the impersonation endpoint may deny the
/// request, or the network may simply fail. The predicates on this type
/// distinguish these cases, and the original message of the underlying error
/// is always preserved.
///
/// Applications rarely need to create instances of this error type. The
/// exception might be when testing application code, or when implementing a
/// [SubjectTokenProvider][crate::credentials::subject_token::SubjectTokenProvider].
#[derive(Clone, Debug)]
pub struct CredentialsError {
    /// If `true`, the operation that resulted in this error might succeed
    /// upon retry.
    is_transient: bool,
    kind: ErrorKind,
    response: Option<Arc<RawResponse>>,
}

#[derive(thiserror::Error, Clone, Debug)]
enum ErrorKind {
    #[error("{message}")]
    SourceUnavailable {
        message: String,
        source: Option<ArcError>,
    },
    #[error("failed to read subject token field `{field}` as a non-empty string, body=<{body}>")]
    FieldNotFound { field: String, body: String },
    #[error(transparent)]
    OAuth(OAuthError),
    #[error(transparent)]
    Api(ApiError),
    #[error("{message}")]
    Transport {
        message: String,
        status: Option<StatusCode>,
        source: Option<ArcError>,
    },
    #[error("{message}")]
    Other {
        message: String,
        source: Option<ArcError>,
    },
}

impl CredentialsError {
    /// Creates an error from a message.
    ///
    /// # Example
    /// ```
    /// # use google_cloud_external_account::errors::CredentialsError;
    /// let err = CredentialsError::from_msg(true, "simulated transient failure");
    /// assert!(err.is_transient());
    /// assert!(err.to_string().contains("simulated transient failure"));
    /// ```
    pub fn from_msg<T: Into<String>>(is_transient: bool, message: T) -> Self {
        Self::new(
            is_transient,
            ErrorKind::Other {
                message: message.into(),
                source: None,
            },
        )
    }

    /// Creates an error wrapping `source`.
    pub fn from_source<T>(is_transient: bool, source: T) -> Self
    where
        T: std::error::Error + Send + Sync + 'static,
    {
        Self::new(
            is_transient,
            ErrorKind::Other {
                message: source.to_string(),
                source: Some(Arc::new(source)),
            },
        )
    }

    /// Returns `true` if a future attempt of the failed operation may succeed.
    pub fn is_transient(&self) -> bool {
        self.is_transient
    }

    /// The subject token could not be read from its source.
    ///
    /// For example, the configured file does not exist, it is not a regular
    /// file, or its contents cannot be parsed.
    pub fn is_source_unavailable(&self) -> bool {
        matches!(self.kind, ErrorKind::SourceUnavailable { .. })
    }

    /// The configured JSON field is missing or empty in the subject token
    /// source.
    pub fn is_field_not_found(&self) -> bool {
        matches!(self.kind, ErrorKind::FieldNotFound { .. })
    }

    /// The token exchange endpoint returned an OAuth 2.0 error response.
    pub fn is_oauth(&self) -> bool {
        matches!(self.kind, ErrorKind::OAuth(_))
    }

    /// A Google Cloud API returned a structured error response.
    pub fn is_api(&self) -> bool {
        matches!(self.kind, ErrorKind::Api(_))
    }

    /// The request failed in the network, timed out, or returned an HTTP
    /// error without a recognized error payload.
    pub fn is_transport(&self) -> bool {
        matches!(self.kind, ErrorKind::Transport { .. })
    }

    /// The HTTP status code associated with this error, if any.
    pub fn http_status(&self) -> Option<StatusCode> {
        match &self.kind {
            ErrorKind::Transport {
                status: Some(status),
                ..
            } => Some(*status),
            _ => self.response.as_ref().map(|r| r.status),
        }
    }

    /// The HTTP status code associated with this error, formatted as a
    /// string (e.g. `"401"`).
    pub fn status_code(&self) -> Option<String> {
        self.http_status().map(|s| s.as_u16().to_string())
    }

    /// The OAuth 2.0 error details, if this is an OAuth error.
    pub fn oauth_error(&self) -> Option<&OAuthError> {
        match &self.kind {
            ErrorKind::OAuth(e) => Some(e),
            _ => None,
        }
    }

    /// The API error details, if this is an API error.
    pub fn api_error(&self) -> Option<&ApiError> {
        match &self.kind {
            ErrorKind::Api(e) => Some(e),
            _ => None,
        }
    }

    /// The HTTP response that caused this error, if any.
    pub fn response(&self) -> Option<&RawResponse> {
        self.response.as_deref()
    }

    fn new(is_transient: bool, kind: ErrorKind) -> Self {
        Self {
            is_transient,
            kind,
            response: None,
        }
    }

    fn with_response(mut self, response: RawResponse) -> Self {
        self.response = Some(Arc::new(response));
        self
    }

    pub(crate) fn source_unavailable<T: Into<String>>(message: T) -> Self {
        Self::new(
            false,
            ErrorKind::SourceUnavailable {
                message: message.into(),
                source: None,
            },
        )
    }

    pub(crate) fn source_unavailable_from<M, T>(is_transient: bool, message: M, source: T) -> Self
    where
        M: Into<String>,
        T: std::error::Error + Send + Sync + 'static,
    {
        Self::new(
            is_transient,
            ErrorKind::SourceUnavailable {
                message: message.into(),
                source: Some(Arc::new(source)),
            },
        )
    }

    pub(crate) fn field_not_found<F, B>(field: F, body: B) -> Self
    where
        F: Into<String>,
        B: Into<String>,
    {
        Self::new(
            false,
            ErrorKind::FieldNotFound {
                field: field.into(),
                body: body.into(),
            },
        )
    }

    pub(crate) fn transport<T: Into<String>>(
        is_transient: bool,
        message: T,
        status: Option<StatusCode>,
    ) -> Self {
        Self::new(
            is_transient,
            ErrorKind::Transport {
                message: message.into(),
                status,
                source: None,
            },
        )
    }

    pub(crate) fn transport_from<M, T>(is_transient: bool, message: M, source: T) -> Self
    where
        M: Into<String>,
        T: std::error::Error + Send + Sync + 'static,
    {
        Self::new(
            is_transient,
            ErrorKind::Transport {
                message: message.into(),
                status: None,
                source: Some(Arc::new(source)),
            },
        )
    }
}

impl Display for CredentialsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for CredentialsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ErrorKind::SourceUnavailable { source, .. }
            | ErrorKind::Transport { source, .. }
            | ErrorKind::Other { source, .. } => source
                .as_deref()
                .map(|e| e as &(dyn std::error::Error + 'static)),
            ErrorKind::FieldNotFound { .. } | ErrorKind::OAuth(_) | ErrorKind::Api(_) => None,
        }
    }
}

/// An error returned by an application-provided subject token source.
///
/// The credentials use [is_transient][SubjectTokenProviderError::is_transient]
/// to report if the failure may go away in future attempts.
pub trait SubjectTokenProviderError: std::error::Error + Send + Sync + 'static {
    /// Returns `true` if a future attempt may succeed.
    fn is_transient(&self) -> bool;
}

impl SubjectTokenProviderError for CredentialsError {
    fn is_transient(&self) -> bool {
        self.is_transient
    }
}

/// An OAuth 2.0 error response, as defined in [RFC 6749 section 5.2].
///
/// [RFC 6749 section 5.2]: https://datatracker.ietf.org/doc/html/rfc6749#section-5.2
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct OAuthError {
    /// The error code, e.g. `invalid_request`.
    pub error: String,
    /// A human-readable description of the error.
    pub error_description: Option<String>,
    /// A URI identifying a human-readable page with more information.
    pub error_uri: Option<String>,
}

impl Display for OAuthError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Error code {}", self.error)?;
        if let Some(description) = &self.error_description {
            write!(f, ": {description}")?;
        }
        if let Some(uri) = &self.error_uri {
            write!(f, " - {uri}")?;
        }
        Ok(())
    }
}

impl std::error::Error for OAuthError {}

/// A structured error returned by Google Cloud APIs.
///
/// These are returned by the IAM Credentials service and the Cloud Resource
/// Manager as `{"error": {"code": ..., "message": ..., "status": ...}}`.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    /// The HTTP status code.
    pub code: u16,
    /// A developer-facing error message.
    pub message: String,
    /// The canonical error status, e.g. `PERMISSION_DENIED`.
    #[serde(default)]
    pub status: String,
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code={}", self.message, self.code)?;
        if !self.status.is_empty() {
            write!(f, ", status={}", self.status)?;
        }
        write!(f, ")")
    }
}

impl std::error::Error for ApiError {}

#[derive(Deserialize)]
struct ApiErrorResponse {
    error: ApiError,
}

pub(crate) fn is_retryable(c: StatusCode) -> bool {
    match c {
        // Internal server errors do not indicate that there is anything wrong
        // with our request, so we retry them.
        StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::REQUEST_TIMEOUT
        | StatusCode::TOO_MANY_REQUESTS => true,
        _ => false,
    }
}

/// Creates an error for a request that did not produce an HTTP response.
pub(crate) fn from_http_error(err: reqwest::Error, msg: &str) -> CredentialsError {
    let status = err.status();
    let is_transient = status.is_none_or(is_retryable);
    CredentialsError::new(
        is_transient,
        ErrorKind::Transport {
            message: format!("{msg}: {err}"),
            status,
            source: Some(Arc::new(err)),
        },
    )
}

/// Creates an error from an unsuccessful HTTP response.
///
/// Recognizes OAuth 2.0 and Google Cloud API error payloads, any other
/// payload produces a transport error.
pub(crate) async fn from_http_response(response: reqwest::Response, msg: &str) -> CredentialsError {
    let status = response.status();
    let headers = response.headers().clone();
    match response.bytes().await {
        Ok(body) => from_raw_response(
            RawResponse {
                status,
                headers,
                body,
            },
            msg,
        ),
        Err(e) => CredentialsError::new(
            is_retryable(status),
            ErrorKind::Transport {
                message: format!("{msg}, failed with status {status}: {e}"),
                status: Some(status),
                source: Some(Arc::new(e)),
            },
        ),
    }
}

/// Classifies an unsuccessful HTTP response already read into memory.
pub(crate) fn from_raw_response(response: RawResponse, msg: &str) -> CredentialsError {
    let is_transient = is_retryable(response.status);
    if let Ok(e) = serde_json::from_slice::<OAuthError>(&response.body) {
        return CredentialsError::new(is_transient, ErrorKind::OAuth(e)).with_response(response);
    }
    if let Ok(e) = serde_json::from_slice::<ApiErrorResponse>(&response.body) {
        return CredentialsError::new(is_transient, ErrorKind::Api(e.error))
            .with_response(response);
    }
    transport_from_raw_response(response, msg)
}

/// Creates a transport error from an unsuccessful HTTP response, without
/// interpreting its payload.
pub(crate) fn transport_from_raw_response(response: RawResponse, msg: &str) -> CredentialsError {
    let status = response.status;
    let body = String::from_utf8_lossy(&response.body).to_string();
    CredentialsError::transport(
        is_retryable(status),
        format!("{msg}, failed with status {status}, body=<{body}>"),
        Some(status),
    )
    .with_response(response)
}
