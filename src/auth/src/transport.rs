// Copyright 2025 Google LLC
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

//! HTTP responses returned by the credentials.
//!
//! The credentials read every response into memory. Token endpoints return
//! small payloads, and [request][crate::credentials::external_account::ExternalAccountCredentials::request]
//! needs the complete response to decide if the request must be retried.

use crate::Result;
use crate::errors::{self, CredentialsError};
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;

/// An HTTP response, fully read into memory.
#[derive(Clone, Debug, PartialEq)]
pub struct RawResponse {
    /// The HTTP status code.
    pub status: StatusCode,
    /// The response headers.
    pub headers: HeaderMap,
    /// The response body.
    pub body: Bytes,
}

impl RawResponse {
    /// Deserializes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    /// The body as text, replacing any invalid UTF-8 sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub(crate) async fn from_response(response: reqwest::Response, msg: &str) -> Result<Self> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| errors::from_http_error(e, msg))?;
        Ok(Self {
            status,
            headers,
            body,
        })
    }
}

/// Sends the request and reads the response, regardless of its status code.
pub(crate) async fn execute(builder: reqwest::RequestBuilder, msg: &str) -> Result<RawResponse> {
    let response = builder
        .send()
        .await
        .map_err(|e| errors::from_http_error(e, msg))?;
    RawResponse::from_response(response, msg).await
}

/// Sends the request and returns the response if it was successful.
///
/// Unsuccessful responses are classified using their payload, see
/// [errors::from_raw_response].
pub(crate) async fn send(builder: reqwest::RequestBuilder, msg: &str) -> Result<RawResponse> {
    let response = execute(builder, msg).await?;
    if !response.status.is_success() {
        return Err(errors::from_raw_response(response, msg));
    }
    Ok(response)
}

/// Deserializes a successful response, reporting which field was missing or
/// malformed.
pub(crate) fn parse_json<T: DeserializeOwned>(response: &RawResponse, msg: &str) -> Result<T> {
    response.json::<T>().map_err(|e| {
        CredentialsError::transport_from(false, format!("{msg}, cannot parse response: {e}"), e)
    })
}
