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

//! Types and functions to work with auth [Tokens].
//!
//! [Tokens]: https://cloud.google.com/docs/authentication#token

use crate::Result;
use crate::transport::RawResponse;

/// An access token, as held by the credentials cache.
#[derive(Clone, PartialEq)]
pub struct CachedAccessToken {
    /// The actual token string.
    ///
    /// This is the value used in `Authorization:` header.
    pub access_token: String,

    /// The expiration time, in milliseconds since the Unix epoch.
    ///
    /// If `None`, the token never expires and it is never refreshed.
    pub expiry_millis: Option<i64>,

    /// The HTTP response that produced this token, if any.
    ///
    /// Tokens installed with `set_credentials` have no response.
    pub response: Option<RawResponse>,
}

impl CachedAccessToken {
    /// Creates a token with the given value and expiration.
    pub fn new<T: Into<String>>(access_token: T, expiry_millis: Option<i64>) -> Self {
        Self {
            access_token: access_token.into(),
            expiry_millis,
            response: None,
        }
    }

    /// Returns `true` if the token can be used at `now_millis`.
    ///
    /// Tokens are refreshed `threshold_millis` before they expire.
    pub fn is_usable(&self, now_millis: i64, threshold_millis: i64) -> bool {
        match self.expiry_millis {
            None => true,
            Some(expiry) => now_millis < expiry.saturating_sub(threshold_millis),
        }
    }
}

impl std::fmt::Debug for CachedAccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedAccessToken")
            .field("access_token", &"[censored]")
            .field("expiry_millis", &self.expiry_millis)
            .field("response", &self.response.as_ref().map(|r| r.status))
            .finish()
    }
}

/// The payload of a token refresh notification.
///
/// Subscribers receive one of these each time the credentials obtain a new
/// access token from the token exchange (and impersonation) endpoints.
#[derive(Clone, PartialEq)]
pub struct TokenRefresh {
    /// The new access token.
    pub access_token: String,
    /// The expiration time, in milliseconds since the Unix epoch.
    pub expiry_millis: Option<i64>,
    /// Always `"Bearer"`.
    pub token_type: String,
    /// External account credentials never produce refresh tokens.
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for TokenRefresh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRefresh")
            .field("access_token", &"[censored]")
            .field("expiry_millis", &self.expiry_millis)
            .field("token_type", &self.token_type)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[censored]"))
            .finish()
    }
}

#[async_trait::async_trait]
pub(crate) trait TokenProvider: std::fmt::Debug + Send + Sync {
    async fn token(&self) -> Result<CachedAccessToken>;
}
