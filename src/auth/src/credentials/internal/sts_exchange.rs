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

use crate::Result;
use crate::constants::{ACCESS_TOKEN_TYPE, TOKEN_EXCHANGE_GRANT_TYPE};
use crate::errors::CredentialsError;
use crate::transport::{self, RawResponse};
use base64::Engine;
use http::HeaderMap;
use http::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use serde::Deserialize;
use serde_json::Value;

const MSG: &str = "failed to exchange subject token";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Handles OAuth2 Secure Token Service (STS) exchange.
/// Reference: https://datatracker.ietf.org/doc/html/rfc8693
#[derive(Clone, Debug)]
pub(crate) struct StsExchangeClient {
    client: reqwest::Client,
    token_url: String,
    authentication: ClientAuthentication,
}

impl StsExchangeClient {
    pub(crate) fn new(
        client: reqwest::Client,
        token_url: String,
        authentication: ClientAuthentication,
    ) -> Self {
        Self {
            client,
            token_url,
            authentication,
        }
    }

    /// Performs an oauth2 token exchange with the provided [ExchangeTokenRequest] information.
    ///
    /// `headers` are sent with the request, but they never replace the
    /// content type or the client authentication headers.
    pub(crate) async fn exchange(
        &self,
        req: ExchangeTokenRequest,
        headers: HeaderMap,
        options: Option<Value>,
    ) -> Result<TokenResponse> {
        let mut params: Vec<(&str, String)> =
            vec![("grant_type", TOKEN_EXCHANGE_GRANT_TYPE.to_string())];
        if let Some(resource) = req.resource {
            params.push(("resource", resource));
        }
        params.push(("audience", req.audience));
        if !req.scope.is_empty() {
            params.push(("scope", req.scope.join(" ")));
        }
        params.push(("requested_token_type", ACCESS_TOKEN_TYPE.to_string()));
        params.push(("subject_token", req.subject_token));
        params.push(("subject_token_type", req.subject_token_type));
        if let Some(party) = req.acting_party {
            params.push(("actor_token", party.actor_token));
            params.push(("actor_token_type", party.actor_token_type));
        }
        if let Some(options) = options {
            params.push(("options", options.to_string()));
        }

        let mut headers = headers;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
        self.authentication.inject_auth(&mut headers, &mut params)?;

        let builder = self
            .client
            .post(&self.token_url)
            .headers(headers)
            .form(&params);
        let response = transport::send(builder, MSG).await?;
        let mut token_response: TokenResponse = transport::parse_json(&response, MSG)?;
        token_response.response = Some(response);
        Ok(token_response)
    }
}

/// TokenResponse is used to decode the remote server response during
/// an oauth2 token exchange.
#[derive(Deserialize, Default, PartialEq, Debug)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub issued_token_type: String,
    #[serde(default)]
    pub token_type: String,
    pub expires_in: Option<u64>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    #[serde(skip)]
    pub response: Option<RawResponse>,
}

/// The OAuth client credentials used to authenticate with the Security Token
/// Service.
///
/// See [RFC 6749 section 2.3.1].
///
/// [RFC 6749 section 2.3.1]: https://datatracker.ietf.org/doc/html/rfc6749#section-2.3.1
#[derive(Clone, Default, PartialEq)]
pub enum ClientAuthentication {
    /// The exchange request is not authenticated.
    #[default]
    None,
    /// Send the client credentials in an `Authorization: Basic` header.
    Basic {
        client_id: String,
        client_secret: String,
    },
    /// Send the client credentials as `client_id` and `client_secret` form
    /// parameters.
    RequestBody {
        client_id: String,
        client_secret: String,
    },
}

impl std::fmt::Debug for ClientAuthentication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Basic { client_id, .. } => f
                .debug_struct("Basic")
                .field("client_id", client_id)
                .field("client_secret", &"[censored]")
                .finish(),
            Self::RequestBody { client_id, .. } => f
                .debug_struct("RequestBody")
                .field("client_id", client_id)
                .field("client_secret", &"[censored]")
                .finish(),
        }
    }
}

impl ClientAuthentication {
    // Add authentication to a Secure Token Service exchange request.
    // Modifies either the passed headers or form parameters
    // depending on the desired authentication format.
    fn inject_auth(&self, headers: &mut HeaderMap, params: &mut Vec<(&str, String)>) -> Result<()> {
        match self {
            Self::None => {}
            Self::Basic {
                client_id,
                client_secret,
            } => {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{client_id}:{client_secret}"));
                let mut value = HeaderValue::from_str(&format!("Basic {encoded}"))
                    .map_err(|e| CredentialsError::from_source(false, e))?;
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
            Self::RequestBody {
                client_id,
                client_secret,
            } => {
                params.push(("client_id", client_id.clone()));
                params.push(("client_secret", client_secret.clone()));
            }
        }
        Ok(())
    }
}

/// The party acting on behalf of the subject, see RFC 8693 section 4.1.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ActingParty {
    pub actor_token: String,
    pub actor_token_type: String,
}

/// Information required to perform an oauth2 token exchange with the provided endpoint.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct ExchangeTokenRequest {
    pub audience: String,
    pub scope: Vec<String>,
    pub subject_token: String,
    pub subject_token_type: String,
    pub resource: Option<String>,
    pub acting_party: Option<ActingParty>,
}
