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
use crate::errors::CredentialsError;
use crate::headers_util::build_bearer_headers;
use crate::token::CachedAccessToken;
use crate::transport;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

const MSG: &str = "failed to generate service account access token";

/// Exchanges an access token for a service account access token, using the
/// IAM Credentials [generateAccessToken] method.
///
/// [generateAccessToken]: https://cloud.google.com/iam/docs/reference/credentials/rest/v1/projects.serviceAccounts/generateAccessToken
#[derive(Clone, Debug)]
pub(crate) struct ImpersonationExchanger {
    client: reqwest::Client,
    url: String,
}

#[derive(Serialize)]
struct GenerateAccessTokenRequest<'a> {
    scope: &'a [String],
}

#[derive(Deserialize)]
struct GenerateAccessTokenResponse {
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(rename = "expireTime")]
    expire_time: String,
}

impl ImpersonationExchanger {
    pub(crate) fn new(client: reqwest::Client, url: String) -> Self {
        Self { client, url }
    }

    pub(crate) async fn impersonate(
        &self,
        access_token: &str,
        scopes: &[String],
    ) -> Result<CachedAccessToken> {
        let headers = build_bearer_headers(&CachedAccessToken::new(access_token, None), &None)?;
        let builder = self
            .client
            .post(&self.url)
            .headers(headers)
            .json(&GenerateAccessTokenRequest { scope: scopes });
        let response = transport::send(builder, MSG).await?;
        let token_response: GenerateAccessTokenResponse = transport::parse_json(&response, MSG)?;

        let expire_time = OffsetDateTime::parse(&token_response.expire_time, &Rfc3339)
            .map_err(|e| CredentialsError::from_source(false, e))?;
        let expiry_millis =
            i64::try_from(expire_time.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX);

        Ok(CachedAccessToken {
            access_token: token_response.access_token,
            expiry_millis: Some(expiry_millis),
            response: Some(response),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_SCOPE;
    use httptest::{Expectation, Server, matchers::*, responders::*};
    use serde_json::json;

    type TestResult = anyhow::Result<()>;

    const IMPERSONATION_PATH: &str =
        "/v1/projects/-/serviceAccounts/test-sa@example.iam.gserviceaccount.com:generateAccessToken";

    #[tokio::test]
    async fn impersonate_success() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", IMPERSONATION_PATH),
                request::headers(contains(("authorization", "Bearer sts-token"))),
                request::headers(contains(("content-type", "application/json"))),
                request::body(json_decoded(eq(json!({
                    "scope": ["scope1", "scope2"]
                })))),
            ])
            .respond_with(json_encoded(json!({
                "accessToken": "impersonated-token",
                "expireTime": "2025-01-01T01:00:00Z",
            }))),
        );

        let exchanger =
            ImpersonationExchanger::new(reqwest::Client::new(), server.url_str(IMPERSONATION_PATH));
        let token = exchanger
            .impersonate("sts-token", &["scope1".to_string(), "scope2".to_string()])
            .await?;
        assert_eq!(token.access_token, "impersonated-token");
        // 2025-01-01T01:00:00Z
        assert_eq!(token.expiry_millis, Some(1_735_693_200_000));
        assert!(token.response.is_some(), "{token:?}");
        Ok(())
    }

    #[tokio::test]
    async fn impersonate_api_error() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", IMPERSONATION_PATH)).respond_with(
                status_code(403).body(
                    json!({
                        "error": {
                            "code": 403,
                            "message": "The caller does not have permission",
                            "status": "PERMISSION_DENIED",
                        }
                    })
                    .to_string(),
                ),
            ),
        );

        let exchanger =
            ImpersonationExchanger::new(reqwest::Client::new(), server.url_str(IMPERSONATION_PATH));
        let err = exchanger
            .impersonate("sts-token", &[DEFAULT_SCOPE.to_string()])
            .await
            .unwrap_err();
        assert!(err.is_api(), "{err:?}");
        assert!(!err.is_transient(), "{err:?}");
        let details = err.api_error().unwrap();
        assert_eq!(details.code, 403);
        assert_eq!(details.message, "The caller does not have permission");
        assert_eq!(details.status, "PERMISSION_DENIED");
        Ok(())
    }

    #[tokio::test]
    async fn impersonate_bad_expire_time() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", IMPERSONATION_PATH)).respond_with(
                json_encoded(json!({
                    "accessToken": "impersonated-token",
                    "expireTime": "tomorrow",
                })),
            ),
        );

        let exchanger =
            ImpersonationExchanger::new(reqwest::Client::new(), server.url_str(IMPERSONATION_PATH));
        let err = exchanger
            .impersonate("sts-token", &[DEFAULT_SCOPE.to_string()])
            .await
            .unwrap_err();
        assert!(!err.is_transient(), "{err:?}");
        Ok(())
    }
}
