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

//! [External Account] credentials, also known as [Workload Identity Federation].
//!
//! These credentials exchange a token issued by an external identity
//! provider (the *subject token*) for a Google Cloud access token, using the
//! Security Token Service (STS). Optionally, the resulting token is exchanged
//! again for a service account access token.
//!
//! Most applications create these credentials from an
//! [external account configuration file] using [Builder]. Applications that
//! fetch the subject token themselves use [ProgrammaticBuilder].
//!
//! [External Account]: https://cloud.google.com/iam/docs/workload-identity-federation
//! [Workload Identity Federation]: https://cloud.google.com/iam/docs/workload-identity-federation
//! [external account configuration file]: https://google.aip.dev/auth/4117#configuration-file-generation-and-usage

use super::external_account_sources::file_sourced::FileSourcedCredentials;
use super::external_account_sources::programmatic_sourced::ProgrammaticSourcedCredentials;
use super::external_account_sources::source_format::{CredentialSourceFormat, SourceFormat};
use super::external_account_sources::url_sourced::UrlSourcedCredentials;
use super::internal::impersonation::ImpersonationExchanger;
use super::internal::sts_exchange::{ExchangeTokenRequest, StsExchangeClient};
use super::subject_token::{SubjectToken, SubjectTokenProvider, dynamic};
use crate::build_errors::Error as BuilderError;
use crate::clock::{Clock, SystemClock};
use crate::constants::{
    CLOUD_RESOURCE_MANAGER, DEFAULT_EAGER_REFRESH_THRESHOLD, DEFAULT_SCOPE, EXTERNAL_ACCOUNT_TYPE,
    GOOGLE_CLOUD_QUOTA_PROJECT_VAR,
};
use crate::errors;
use crate::headers_util::build_bearer_headers;
use crate::project::ProjectResolver;
use crate::token::{CachedAccessToken, TokenProvider, TokenRefresh};
use crate::token_cache::TokenCache;
use crate::{BuildResult, Result};
use http::{HeaderMap, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub use super::internal::sts_exchange::ClientAuthentication;

const REQUEST_MSG: &str = "failed to send authenticated request";

#[derive(Deserialize, Debug)]
struct CredentialSourceFile {
    file: Option<String>,
    url: Option<String>,
    headers: Option<HashMap<String, String>>,
    format: Option<CredentialSourceFormat>,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum ScopesFile {
    Single(String),
    Multiple(Vec<String>),
}

/// A representation of a [external account config file].
///
/// Required fields are optional here, so missing fields are reported by name.
///
/// [external account config file]: https://google.aip.dev/auth/4117#configuration-file-generation-and-usage
#[derive(Deserialize, Debug)]
struct ExternalAccountFile {
    audience: Option<String>,
    subject_token_type: Option<String>,
    token_url: Option<String>,
    credential_source: Option<CredentialSourceFile>,
    client_id: Option<String>,
    client_secret: Option<String>,
    service_account_impersonation_url: Option<String>,
    quota_project_id: Option<String>,
    scopes: Option<ScopesFile>,
}

impl ExternalAccountFile {
    fn from_value(value: Value) -> BuildResult<Self> {
        match value.get("type") {
            Some(Value::String(t)) if t == EXTERNAL_ACCOUNT_TYPE => {}
            Some(Value::String(t)) => {
                return Err(BuilderError::unknown_type(format!(
                    "Expected \"{EXTERNAL_ACCOUNT_TYPE}\" type but received \"{t}\""
                )));
            }
            Some(other) => {
                return Err(BuilderError::unknown_type(format!(
                    "Expected \"{EXTERNAL_ACCOUNT_TYPE}\" type but received {other}"
                )));
            }
            None => return Err(BuilderError::missing_field("type")),
        }
        serde_json::from_value(value).map_err(BuilderError::parsing)
    }

    fn into_config(self, options: &Options) -> BuildResult<ExternalAccountConfig> {
        let audience = self
            .audience
            .ok_or_else(|| BuilderError::missing_field("audience"))?;
        let subject_token_type = self
            .subject_token_type
            .ok_or_else(|| BuilderError::missing_field("subject_token_type"))?;
        let token_url = self
            .token_url
            .ok_or_else(|| BuilderError::missing_field("token_url"))?;
        let source = self
            .credential_source
            .ok_or_else(|| BuilderError::missing_field("credential_source"))?;

        let format = SourceFormat::try_from(source.format)?;
        let credential_source = match (source.file, source.url) {
            (Some(file), None) => CredentialSource::File(FileSourcedCredentials::new(file, format)),
            (None, Some(url)) => {
                validate_url("credential_source.url", &url)?;
                CredentialSource::Url(UrlSourcedCredentials::new(
                    url,
                    source.headers,
                    format,
                    options.client(),
                )?)
            }
            (Some(_), Some(_)) => {
                return Err(BuilderError::invalid_source(
                    "credential_source must contain exactly one of `file` or `url`, found both",
                ));
            }
            (None, None) => {
                return Err(BuilderError::invalid_source(
                    "credential_source must contain exactly one of `file` or `url`, found neither",
                ));
            }
        };

        // A `client_id` in the configuration file selects basic authentication.
        let file_authentication = match self.client_id {
            Some(client_id) => ClientAuthentication::Basic {
                client_id,
                client_secret: self.client_secret.unwrap_or_default(),
            },
            None => ClientAuthentication::None,
        };
        let scopes = match self.scopes {
            Some(ScopesFile::Single(s)) => vec![s],
            Some(ScopesFile::Multiple(v)) => v,
            None => Vec::new(),
        };

        ExternalAccountConfig {
            audience,
            subject_token_type,
            token_url,
            client_authentication: file_authentication,
            credential_source,
            service_account_impersonation_url: self.service_account_impersonation_url,
            quota_project_id: self.quota_project_id,
            scopes,
        }
        .validate()
    }
}

fn validate_url(field: &'static str, value: &str) -> BuildResult<()> {
    url::Url::parse(value)
        .map(|_| ())
        .map_err(|e| BuilderError::parsing(format!("invalid `{field}` value {value:?}: {e}")))
}

/// The configuration of external account credentials, immutable after
/// construction.
#[derive(Debug, Clone)]
struct ExternalAccountConfig {
    audience: String,
    subject_token_type: String,
    token_url: String,
    client_authentication: ClientAuthentication,
    credential_source: CredentialSource,
    service_account_impersonation_url: Option<String>,
    quota_project_id: Option<String>,
    scopes: Vec<String>,
}

impl ExternalAccountConfig {
    fn validate(self) -> BuildResult<Self> {
        validate_url("token_url", &self.token_url)?;
        if let Some(url) = &self.service_account_impersonation_url {
            validate_url("service_account_impersonation_url", url)?;
        }
        Ok(self)
    }
}

/// The strategies to fetch a subject token.
#[derive(Debug, Clone)]
enum CredentialSource {
    File(FileSourcedCredentials),
    Url(UrlSourcedCredentials),
    Programmatic(ProgrammaticSourcedCredentials),
}

impl CredentialSource {
    async fn retrieve(&self) -> Result<SubjectToken> {
        match self {
            Self::File(source) => source.subject_token().await,
            Self::Url(source) => source.subject_token().await,
            Self::Programmatic(source) => source.subject_token().await,
        }
    }
}

/// Controls when the credentials refresh their access token.
///
/// # Example
/// ```
/// # use google_cloud_external_account::credentials::external_account::RefreshPolicy;
/// # use std::time::Duration;
/// let policy = RefreshPolicy::default()
///     .with_eager_refresh_threshold(Duration::from_secs(60))
///     .with_force_refresh_on_failure(true);
/// assert_eq!(policy.eager_refresh_threshold(), Duration::from_secs(60));
/// assert!(policy.force_refresh_on_failure());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefreshPolicy {
    eager_refresh_threshold: Duration,
    force_refresh_on_failure: bool,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            eager_refresh_threshold: DEFAULT_EAGER_REFRESH_THRESHOLD,
            force_refresh_on_failure: false,
        }
    }
}

impl RefreshPolicy {
    /// Refresh tokens this long before they expire.
    ///
    /// The default is 5 minutes. A zero threshold refreshes tokens only once
    /// they have expired.
    pub fn with_eager_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.eager_refresh_threshold = threshold;
        self
    }

    /// If `true`, [request][ExternalAccountCredentials::request] refreshes the
    /// access token and resends the request once when the response is a `401`
    /// or `403`.
    ///
    /// The default is `false`.
    pub fn with_force_refresh_on_failure(mut self, value: bool) -> Self {
        self.force_refresh_on_failure = value;
        self
    }

    /// The eager refresh threshold.
    pub fn eager_refresh_threshold(&self) -> Duration {
        self.eager_refresh_threshold
    }

    /// Whether authentication failures trigger a refresh and a retry.
    pub fn force_refresh_on_failure(&self) -> bool {
        self.force_refresh_on_failure
    }
}

// Settings shared by `Builder` and `ProgrammaticBuilder`.
#[derive(Debug, Default)]
struct Options {
    quota_project_id: Option<String>,
    scopes: Option<Vec<String>>,
    refresh_policy: RefreshPolicy,
    client: Option<reqwest::Client>,
    clock: Option<Arc<dyn Clock>>,
    cloud_resource_manager_url: Option<String>,
    client_authentication: Option<ClientAuthentication>,
}

impl Options {
    fn client(&self) -> reqwest::Client {
        self.client.clone().unwrap_or_default()
    }

    fn build_credentials(self, config: ExternalAccountConfig) -> ExternalAccountCredentials {
        let client = self.client();
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let quota_project_id = self
            .quota_project_id
            .or_else(|| std::env::var(GOOGLE_CLOUD_QUOTA_PROJECT_VAR).ok())
            .or(config.quota_project_id);
        let mut scopes = self.scopes.unwrap_or(config.scopes);
        if scopes.is_empty() {
            scopes.push(DEFAULT_SCOPE.to_string());
        }
        let authentication = self
            .client_authentication
            .unwrap_or(config.client_authentication);

        let provider = ExternalAccountTokenProvider {
            source: config.credential_source,
            sts: StsExchangeClient::new(client.clone(), config.token_url, authentication),
            impersonation: config
                .service_account_impersonation_url
                .map(|url| ImpersonationExchanger::new(client.clone(), url)),
            audience: config.audience.clone(),
            subject_token_type: config.subject_token_type,
            scopes,
            clock: clock.clone(),
        };
        let cache = TokenCache::new(
            Arc::new(provider),
            self.refresh_policy.eager_refresh_threshold,
            clock,
        );
        let project = ProjectResolver::new(
            &config.audience,
            self.cloud_resource_manager_url
                .unwrap_or_else(|| CLOUD_RESOURCE_MANAGER.to_string()),
        );
        ExternalAccountCredentials {
            inner: Arc::new(CredentialsInner {
                cache,
                client,
                quota_project_id,
                refresh_policy: self.refresh_policy,
                project,
            }),
        }
    }
}

#[derive(Debug)]
struct ExternalAccountTokenProvider {
    source: CredentialSource,
    sts: StsExchangeClient,
    impersonation: Option<ImpersonationExchanger>,
    audience: String,
    subject_token_type: String,
    scopes: Vec<String>,
    clock: Arc<dyn Clock>,
}

#[async_trait::async_trait]
impl TokenProvider for ExternalAccountTokenProvider {
    async fn token(&self) -> Result<CachedAccessToken> {
        let subject_token = self.source.retrieve().await?;

        // generateAccessToken requires the cloud-platform scope on the STS
        // token. The service account token receives the configured scopes.
        let scope = match self.impersonation {
            Some(_) => vec![DEFAULT_SCOPE.to_string()],
            None => self.scopes.clone(),
        };
        let req = ExchangeTokenRequest {
            audience: self.audience.clone(),
            scope,
            subject_token: subject_token.token,
            subject_token_type: self.subject_token_type.clone(),
            ..ExchangeTokenRequest::default()
        };
        let token_res = self.sts.exchange(req, HeaderMap::new(), None).await?;

        if let Some(impersonation) = &self.impersonation {
            return impersonation
                .impersonate(&token_res.access_token, &self.scopes)
                .await;
        }

        let now = self.clock.now_millis();
        let expiry_millis = token_res
            .expires_in
            .map(|secs| {
                let secs = i64::try_from(secs).unwrap_or(i64::MAX);
                now.saturating_add(secs.saturating_mul(1000))
            });
        Ok(CachedAccessToken {
            access_token: token_res.access_token,
            expiry_millis,
            response: token_res.response,
        })
    }
}

#[derive(Debug)]
struct CredentialsInner {
    cache: TokenCache,
    client: reqwest::Client,
    quota_project_id: Option<String>,
    refresh_policy: RefreshPolicy,
    project: ProjectResolver,
}

/// External account credentials.
///
/// Obtains, caches, and refreshes Google Cloud access tokens, and uses them
/// to authenticate HTTP requests. Clones share the same token cache.
#[derive(Clone, Debug)]
pub struct ExternalAccountCredentials {
    inner: Arc<CredentialsInner>,
}

impl ExternalAccountCredentials {
    /// Returns the current access token, refreshing it if needed.
    ///
    /// A token is refreshed once the current time is within the eager refresh
    /// threshold of its expiration. Tokens without an expiration are never
    /// refreshed.
    pub async fn access_token(&self) -> Result<CachedAccessToken> {
        self.inner.cache.token().await
    }

    /// Returns the headers to authenticate a request.
    ///
    /// The headers contain `Authorization: Bearer {token}`, and
    /// `x-goog-user-project` if a quota project is configured.
    pub async fn headers(&self) -> Result<HeaderMap> {
        let token = self.access_token().await?;
        build_bearer_headers(&token, &self.inner.quota_project_id)
    }

    /// Authenticates and sends `request`.
    ///
    /// Authentication headers already present in `request` are sent
    /// unchanged. Unsuccessful responses are returned as errors.
    ///
    /// If the policy enables [force_refresh_on_failure][RefreshPolicy::with_force_refresh_on_failure]
    /// and the response status is `401` or `403`, the access token is
    /// refreshed and the request is sent one more time. Requests with a
    /// streaming body cannot be sent again, and are never retried.
    pub async fn request(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        self.execute(request, false).await
    }

    /// Installs an access token, bypassing the token exchange.
    ///
    /// The token is used until it expires, then the credentials go back to
    /// exchanging subject tokens.
    pub fn set_credentials(&self, token: CachedAccessToken) {
        self.inner.cache.set(token);
    }

    /// The project number of the workload identity pool, if the audience
    /// contains one.
    pub fn project_number(&self) -> Option<&str> {
        self.inner.project.project_number()
    }

    /// The project id of the workload identity pool.
    ///
    /// Returns `Ok(None)`, without any network calls, if the audience does not
    /// contain a project number. Otherwise the project id is fetched from the
    /// Cloud Resource Manager on the first successful call and cached.
    /// The credentials need the `resourcemanager.projects.get` permission.
    pub async fn project_id(&self) -> Result<Option<String>> {
        self.inner
            .project
            .project_id(&self.inner.client, self.headers())
            .await
    }

    /// Receives a notification each time the credentials obtain a new token
    /// through the token exchange.
    pub fn subscribe(&self) -> broadcast::Receiver<TokenRefresh> {
        self.inner.cache.subscribe()
    }

    /// The quota project sent in the `x-goog-user-project` header, if any.
    pub fn quota_project_id(&self) -> Option<&str> {
        self.inner.quota_project_id.as_deref()
    }

    // `retry` is `true` when `request` is the resend after an authentication
    // failure. Resends are never retried.
    async fn execute(&self, request: reqwest::Request, retry: bool) -> Result<reqwest::Response> {
        let replay = match retry || !self.inner.refresh_policy.force_refresh_on_failure {
            true => None,
            false => request.try_clone(),
        };

        let response = self.send_authenticated(request).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let replay = match replay {
            Some(r) if is_auth_failure(status) => r,
            _ => return Err(errors::from_http_response(response, REQUEST_MSG).await),
        };

        tracing::info!(%status, "authentication failure, refreshing the access token and retrying once");
        self.inner.cache.force_refresh().await?;
        let response = self.send_authenticated(replay).await?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(errors::from_http_response(response, REQUEST_MSG).await)
    }

    async fn send_authenticated(&self, mut request: reqwest::Request) -> Result<reqwest::Response> {
        let headers = self.headers().await?;
        for (name, value) in headers.iter() {
            if !request.headers().contains_key(name) {
                request.headers_mut().insert(name.clone(), value.clone());
            }
        }
        self.inner
            .client
            .execute(request)
            .await
            .map_err(|e| errors::from_http_error(e, REQUEST_MSG))
    }
}

fn is_auth_failure(status: StatusCode) -> bool {
    matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
}

#[derive(Debug)]
enum ConfigInput {
    Json(Value),
    File(PathBuf),
}

/// A builder for [ExternalAccountCredentials] instances.
///
/// # Example
/// ```
/// # use google_cloud_external_account::credentials::external_account::Builder;
/// let project_number = "123456";
/// let provider_name = format!(
///     "//iam.googleapis.com/projects/{project_number}/locations/global/workloadIdentityPools/my-pool/providers/my-provider"
/// );
/// let config = serde_json::json!({
///     "type": "external_account",
///     "audience": provider_name,
///     "subject_token_type": "urn:ietf:params:oauth:token-type:jwt",
///     "token_url": "https://sts.googleapis.com/v1/token",
///     "credential_source": {
///         "url": "http://169.254.169.254/metadata/identity/oauth2/token",
///         "headers": {
///           "Metadata": "True"
///         },
///         "format": {
///           "type": "json",
///           "subject_token_field_name": "access_token"
///         }
///     }
/// });
/// let credentials = Builder::new(config)
///     .with_quota_project_id("quota_project")
///     .build()
///     .unwrap();
/// assert_eq!(credentials.project_number(), Some("123456"));
/// ```
#[derive(Debug)]
pub struct Builder {
    input: ConfigInput,
    options: Options,
}

impl Builder {
    /// Creates a new builder using [external_account_credentials] JSON value.
    ///
    /// [external_account_credentials]: https://google.aip.dev/auth/4117#configuration-file-generation-and-usage
    pub fn new(external_account_config: Value) -> Self {
        Self {
            input: ConfigInput::Json(external_account_config),
            options: Options::default(),
        }
    }

    /// Creates a new builder that loads the configuration from a file.
    ///
    /// The file is read by [build][Builder::build].
    pub fn from_file<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            input: ConfigInput::File(path.into()),
            options: Options::default(),
        }
    }

    /// Sets the [quota project] for this credentials.
    ///
    /// In some services, you can use a service account in
    /// one project for authentication and authorization, and charge
    /// the usage to a different project. This requires that the
    /// service account has `serviceusage.services.use` permissions on the quota project.
    ///
    /// This value takes precedence over the `GOOGLE_CLOUD_QUOTA_PROJECT`
    /// environment variable, which takes precedence over the
    /// `quota_project_id` in the configuration.
    ///
    /// [quota project]: https://cloud.google.com/docs/quotas/quota-project
    pub fn with_quota_project_id<S: Into<String>>(mut self, quota_project_id: S) -> Self {
        self.options.quota_project_id = Some(quota_project_id.into());
        self
    }

    /// Overrides the [scopes] for this credentials.
    ///
    /// [scopes]: https://developers.google.com/identity/protocols/oauth2/scopes
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.scopes = Some(scopes.into_iter().map(|s| s.into()).collect());
        self
    }

    /// Sets the [RefreshPolicy].
    pub fn with_refresh_policy(mut self, policy: RefreshPolicy) -> Self {
        self.options.refresh_policy = policy;
        self
    }

    /// Sets the HTTP client used for all requests.
    ///
    /// Configure timeouts and proxies on this client.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.options.client = Some(client);
        self
    }

    /// Sets the clock used to compute and check token expirations.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.options.clock = Some(clock);
        self
    }

    /// Overrides the Cloud Resource Manager endpoint used by
    /// [project_id][ExternalAccountCredentials::project_id].
    ///
    /// The project number is appended to this URL.
    pub fn with_cloud_resource_manager_url<S: Into<String>>(mut self, url: S) -> Self {
        self.options.cloud_resource_manager_url = Some(url.into());
        self
    }

    /// Overrides the client authentication for the token exchange.
    ///
    /// By default, a `client_id` in the configuration selects
    /// [ClientAuthentication::Basic].
    pub fn with_client_authentication(mut self, authentication: ClientAuthentication) -> Self {
        self.options.client_authentication = Some(authentication);
        self
    }

    /// Returns a [ExternalAccountCredentials] instance with the configured settings.
    ///
    /// # Errors
    ///
    /// Returns a [BuilderError] if the configuration cannot be loaded, if its
    /// `type` is not `external_account`, if required fields are missing, or if
    /// the credential source is malformed. For more information on the
    /// expected format, consult the relevant section in the
    /// [external_account_credentials] guide.
    ///
    /// [external_account_credentials]: https://google.aip.dev/auth/4117#configuration-file-generation-and-usage
    pub fn build(self) -> BuildResult<ExternalAccountCredentials> {
        let value = match self.input {
            ConfigInput::Json(value) => value,
            ConfigInput::File(path) => {
                let contents = std::fs::read_to_string(&path).map_err(BuilderError::loading)?;
                serde_json::from_str(&contents).map_err(BuilderError::parsing)?
            }
        };
        let config = ExternalAccountFile::from_value(value)?.into_config(&self.options)?;
        tracing::debug!(
            audience = %config.audience,
            impersonation = config.service_account_impersonation_url.is_some(),
            "creating external account credentials"
        );
        Ok(self.options.build_credentials(config))
    }
}

/// A builder for [ExternalAccountCredentials] that uses a user provided
/// subject token provider.
///
/// This builder is designed for advanced use cases where the subject token is
/// provided directly by the application through a custom implementation of the
/// [SubjectTokenProvider] trait.
///
/// # Example
///
/// ```
/// # use google_cloud_external_account::credentials::external_account::ProgrammaticBuilder;
/// # use google_cloud_external_account::credentials::subject_token::{SubjectTokenProvider, SubjectToken, Builder as SubjectTokenBuilder};
/// # use google_cloud_external_account::errors::SubjectTokenProviderError;
/// # use std::error::Error;
/// # use std::fmt;
/// # use std::sync::Arc;
/// #
/// # #[derive(Debug)]
/// # struct MyTokenProvider;
/// #
/// # #[derive(Debug)]
/// # struct MyProviderError;
/// # impl fmt::Display for MyProviderError { fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "MyProviderError") } }
/// # impl Error for MyProviderError {}
/// # impl SubjectTokenProviderError for MyProviderError { fn is_transient(&self) -> bool { false } }
/// #
/// # impl SubjectTokenProvider for MyTokenProvider {
/// #     type Error = MyProviderError;
/// #     async fn subject_token(&self) -> Result<SubjectToken, Self::Error> {
/// #         Ok(SubjectTokenBuilder::new("my-programmatic-token").build())
/// #     }
/// # }
/// #
/// let provider = Arc::new(MyTokenProvider);
///
/// let credentials = ProgrammaticBuilder::new(provider)
///     .with_audience("//iam.googleapis.com/projects/123/locations/global/workloadIdentityPools/my-pool/providers/my-provider")
///     .with_subject_token_type("urn:ietf:params:oauth:token-type:jwt")
///     .with_token_url("https://sts.googleapis.com/v1/token")
///     .with_quota_project_id("my-quota-project")
///     .with_scopes(["https://www.googleapis.com/auth/devstorage.read_only"])
///     .build()
///     .unwrap();
/// ```
#[derive(Debug)]
pub struct ProgrammaticBuilder {
    subject_token_provider: Arc<dyn dynamic::SubjectTokenProvider>,
    audience: Option<String>,
    subject_token_type: Option<String>,
    token_url: Option<String>,
    service_account_impersonation_url: Option<String>,
    options: Options,
}

impl ProgrammaticBuilder {
    /// Creates a new builder that uses the provided [SubjectTokenProvider] to
    /// fetch the third-party subject token.
    pub fn new<T>(subject_token_provider: Arc<T>) -> Self
    where
        T: SubjectTokenProvider + 'static,
    {
        Self {
            subject_token_provider,
            audience: None,
            subject_token_type: None,
            token_url: None,
            service_account_impersonation_url: None,
            options: Options::default(),
        }
    }

    /// Sets the optional [quota project] for this credentials.
    ///
    /// [quota project]: https://cloud.google.com/docs/quotas/quota-project
    pub fn with_quota_project_id<S: Into<String>>(mut self, quota_project_id: S) -> Self {
        self.options.quota_project_id = Some(quota_project_id.into());
        self
    }

    /// Sets the [scopes] for these credentials.
    /// By default `https://www.googleapis.com/auth/cloud-platform` scope is used.
    ///
    /// [scopes]: https://developers.google.com/identity/protocols/oauth2/scopes
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.scopes = Some(scopes.into_iter().map(|s| s.into()).collect());
        self
    }

    /// Sets the required audience for the token exchange.
    ///
    /// This is the resource name for the workload identity pool and the provider
    /// identifier in that pool.
    pub fn with_audience<S: Into<String>>(mut self, audience: S) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Sets the required subject token type.
    ///
    /// This is the STS subject token type defined by RFC 8693.
    pub fn with_subject_token_type<S: Into<String>>(mut self, subject_token_type: S) -> Self {
        self.subject_token_type = Some(subject_token_type.into());
        self
    }

    /// Sets the required token URL for the STS token exchange.
    pub fn with_token_url<S: Into<String>>(mut self, token_url: S) -> Self {
        self.token_url = Some(token_url.into());
        self
    }

    /// Sets the optional service account impersonation URL.
    pub fn with_service_account_impersonation_url<S: Into<String>>(mut self, url: S) -> Self {
        self.service_account_impersonation_url = Some(url.into());
        self
    }

    /// Sets the client authentication for the token exchange.
    pub fn with_client_authentication(mut self, authentication: ClientAuthentication) -> Self {
        self.options.client_authentication = Some(authentication);
        self
    }

    /// Sets the [RefreshPolicy].
    pub fn with_refresh_policy(mut self, policy: RefreshPolicy) -> Self {
        self.options.refresh_policy = policy;
        self
    }

    /// Sets the HTTP client used for all requests.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.options.client = Some(client);
        self
    }

    /// Sets the clock used to compute and check token expirations.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.options.clock = Some(clock);
        self
    }

    /// Overrides the Cloud Resource Manager endpoint.
    pub fn with_cloud_resource_manager_url<S: Into<String>>(mut self, url: S) -> Self {
        self.options.cloud_resource_manager_url = Some(url.into());
        self
    }

    /// Returns a [ExternalAccountCredentials] instance with the configured settings.
    ///
    /// # Errors
    ///
    /// Returns a [BuilderError] if any of the required fields (such as
    /// `audience`, `subject_token_type`, or `token_url`) have not been set.
    pub fn build(self) -> BuildResult<ExternalAccountCredentials> {
        let config = ExternalAccountConfig {
            audience: self
                .audience
                .ok_or_else(|| BuilderError::missing_field("audience"))?,
            subject_token_type: self
                .subject_token_type
                .ok_or_else(|| BuilderError::missing_field("subject_token_type"))?,
            token_url: self
                .token_url
                .ok_or_else(|| BuilderError::missing_field("token_url"))?,
            client_authentication: ClientAuthentication::None,
            credential_source: CredentialSource::Programmatic(
                ProgrammaticSourcedCredentials::new(self.subject_token_provider),
            ),
            service_account_impersonation_url: self.service_account_impersonation_url,
            quota_project_id: None,
            scopes: Vec::new(),
        }
        .validate()?;
        Ok(self.options.build_credentials(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::constants::{ACCESS_TOKEN_TYPE, JWT_TOKEN_TYPE, TOKEN_EXCHANGE_GRANT_TYPE};
    use crate::credentials::subject_token::Builder as SubjectTokenBuilder;
    use crate::errors::{CredentialsError, SubjectTokenProviderError};
    use httptest::{Expectation, Server, matchers::*, responders::*};
    use scoped_env::ScopedEnv;
    use serde_json::{Value, json};
    use std::error::Error;
    use std::fmt;
    use test_case::test_case;

    type TestResult = anyhow::Result<()>;

    const AUDIENCE: &str = "//iam.googleapis.com/projects/123456/locations/global/workloadIdentityPools/pool/providers/provider";

    #[derive(Debug)]
    struct TestProviderError;
    impl fmt::Display for TestProviderError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "TestProviderError")
        }
    }
    impl Error for TestProviderError {}
    impl SubjectTokenProviderError for TestProviderError {
        fn is_transient(&self) -> bool {
            false
        }
    }

    #[derive(Debug)]
    struct TestSubjectTokenProvider;
    impl SubjectTokenProvider for TestSubjectTokenProvider {
        type Error = TestProviderError;
        async fn subject_token(&self) -> std::result::Result<SubjectToken, Self::Error> {
            Ok(SubjectTokenBuilder::new("test-subject-token").build())
        }
    }

    #[derive(Debug)]
    struct FailingSubjectTokenProvider;
    impl SubjectTokenProvider for FailingSubjectTokenProvider {
        type Error = TestProviderError;
        async fn subject_token(&self) -> std::result::Result<SubjectToken, Self::Error> {
            Err(TestProviderError)
        }
    }

    fn url_config() -> Value {
        json!({
            "type": "external_account",
            "audience": AUDIENCE,
            "subject_token_type": JWT_TOKEN_TYPE,
            "token_url": "https://sts.googleapis.com/v1/token",
            "credential_source": {
                "url": "https://example.com/token",
                "headers": {
                  "Metadata": "True"
                },
                "format": {
                  "type": "json",
                  "subject_token_field_name": "access_token"
                }
            }
        })
    }

    fn parse(value: Value) -> BuildResult<ExternalAccountConfig> {
        ExternalAccountFile::from_value(value)?.into_config(&Options::default())
    }

    #[test]
    fn detect_url_sourced() {
        let config = parse(url_config()).unwrap();
        match &config.credential_source {
            CredentialSource::Url(source) => {
                assert_eq!(source.url, "https://example.com/token");
                assert_eq!(
                    source.headers.get("metadata").and_then(|v| v.to_str().ok()),
                    Some("True")
                );
                assert_eq!(
                    source.format,
                    SourceFormat::Json {
                        subject_token_field_name: "access_token".into()
                    }
                );
            }
            other => unreachable!("expected Url Sourced credential, got {other:?}"),
        }
        assert_eq!(config.audience, AUDIENCE);
        assert_eq!(config.subject_token_type, JWT_TOKEN_TYPE);
        assert_eq!(config.client_authentication, ClientAuthentication::None);
        assert!(config.scopes.is_empty(), "{config:?}");
    }

    #[test]
    fn detect_file_sourced() {
        let mut value = url_config();
        value["credential_source"] = json!({"file": "/var/run/token"});
        let config = parse(value).unwrap();
        match &config.credential_source {
            CredentialSource::File(source) => {
                assert_eq!(source.file, "/var/run/token");
                assert_eq!(source.format, SourceFormat::Text);
            }
            other => unreachable!("expected File Sourced credential, got {other:?}"),
        }
    }

    #[test]
    fn optional_fields() {
        let mut value = url_config();
        value["client_id"] = json!("test-client-id");
        value["client_secret"] = json!("test-client-secret");
        value["service_account_impersonation_url"] = json!("https://iamcredentials.googleapis.com/v1/projects/-/serviceAccounts/sa@p.iam.gserviceaccount.com:generateAccessToken");
        value["quota_project_id"] = json!("test-quota-project");
        value["scopes"] = json!("scope1");
        let config = parse(value).unwrap();
        assert_eq!(
            config.client_authentication,
            ClientAuthentication::Basic {
                client_id: "test-client-id".into(),
                client_secret: "test-client-secret".into(),
            }
        );
        assert!(config.service_account_impersonation_url.is_some());
        assert_eq!(config.quota_project_id.as_deref(), Some("test-quota-project"));
        assert_eq!(config.scopes, vec!["scope1".to_string()]);
    }

    #[test]
    fn scopes_array() {
        let mut value = url_config();
        value["scopes"] = json!(["scope1", "scope2"]);
        let config = parse(value).unwrap();
        assert_eq!(config.scopes, vec!["scope1".to_string(), "scope2".to_string()]);
    }

    #[test]
    fn wrong_type() {
        let mut value = url_config();
        value["type"] = json!("authorized_user");
        let err = Builder::new(value).build().unwrap_err();
        assert!(err.is_unknown_type(), "{err:?}");
        assert!(
            err.to_string()
                .contains(r#"Expected "external_account" type but received "authorized_user""#),
            "{err}"
        );
    }

    #[test]
    fn missing_type() {
        let mut value = url_config();
        value.as_object_mut().unwrap().remove("type");
        let err = Builder::new(value).build().unwrap_err();
        assert!(err.is_missing_field(), "{err:?}");
    }

    #[test_case("audience")]
    #[test_case("subject_token_type")]
    #[test_case("token_url")]
    #[test_case("credential_source")]
    fn missing_required_field(field: &str) {
        let mut value = url_config();
        value.as_object_mut().unwrap().remove(field);
        let err = Builder::new(value).build().unwrap_err();
        assert!(err.is_missing_field(), "{err:?}");
        assert!(err.to_string().contains(field), "{err}");
    }

    #[test_case(json!({"file": "/a", "url": "https://example.com"}); "both")]
    #[test_case(json!({"environment_id": "aws1"}); "neither")]
    #[test_case(json!({"file": "/a", "format": {"type": "xml"}}); "bad format")]
    fn invalid_source(source: Value) {
        let mut value = url_config();
        value["credential_source"] = source;
        let err = Builder::new(value).build().unwrap_err();
        assert!(err.is_invalid_source(), "{err:?}");
    }

    #[test]
    fn json_format_requires_field_name() {
        let mut value = url_config();
        value["credential_source"] = json!({"file": "/a", "format": {"type": "json"}});
        let err = Builder::new(value).build().unwrap_err();
        assert!(err.is_missing_field(), "{err:?}");
    }

    #[test]
    fn invalid_token_url() {
        let mut value = url_config();
        value["token_url"] = json!("not a url");
        let err = Builder::new(value).build().unwrap_err();
        assert!(err.is_parsing(), "{err:?}");
        assert!(err.to_string().contains("token_url"), "{err}");
    }

    #[test]
    fn malformed_field() {
        let mut value = url_config();
        value["audience"] = json!(42);
        let err = Builder::new(value).build().unwrap_err();
        assert!(err.is_parsing(), "{err:?}");
    }

    #[test]
    fn from_file() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.json");
        std::fs::write(&path, url_config().to_string())?;
        let creds = Builder::from_file(&path).build()?;
        assert_eq!(creds.project_number(), Some("123456"));

        let err = Builder::from_file(dir.path().join("missing.json"))
            .build()
            .unwrap_err();
        assert!(err.is_loading(), "{err:?}");

        std::fs::write(&path, "not json")?;
        let err = Builder::from_file(&path).build().unwrap_err();
        assert!(err.is_parsing(), "{err:?}");
        Ok(())
    }

    #[test]
    #[serial_test::serial]
    fn quota_project_precedence() {
        let mut value = url_config();
        value["quota_project_id"] = json!("from-config");

        let _e = ScopedEnv::remove(GOOGLE_CLOUD_QUOTA_PROJECT_VAR);
        let creds = Builder::new(value.clone()).build().unwrap();
        assert_eq!(creds.quota_project_id(), Some("from-config"));

        let _e = ScopedEnv::set(GOOGLE_CLOUD_QUOTA_PROJECT_VAR, "from-env");
        let creds = Builder::new(value.clone()).build().unwrap();
        assert_eq!(creds.quota_project_id(), Some("from-env"));

        let creds = Builder::new(value)
            .with_quota_project_id("from-builder")
            .build()
            .unwrap();
        assert_eq!(creds.quota_project_id(), Some("from-builder"));
    }

    #[test]
    fn refresh_policy_default() {
        let policy = RefreshPolicy::default();
        assert_eq!(policy.eager_refresh_threshold(), Duration::from_secs(300));
        assert!(!policy.force_refresh_on_failure());
    }

    #[test]
    fn programmatic_builder_missing_fields() {
        let err = ProgrammaticBuilder::new(Arc::new(TestSubjectTokenProvider))
            .with_subject_token_type(JWT_TOKEN_TYPE)
            .with_token_url("https://sts.googleapis.com/v1/token")
            .build()
            .unwrap_err();
        assert!(err.is_missing_field(), "{err:?}");
        assert!(err.to_string().contains("audience"), "{err}");

        let err = ProgrammaticBuilder::new(Arc::new(TestSubjectTokenProvider))
            .with_audience(AUDIENCE)
            .with_token_url("https://sts.googleapis.com/v1/token")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("subject_token_type"), "{err}");

        let err = ProgrammaticBuilder::new(Arc::new(TestSubjectTokenProvider))
            .with_audience(AUDIENCE)
            .with_subject_token_type(JWT_TOKEN_TYPE)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("token_url"), "{err}");
    }

    fn sts_success(token: &str, expires_in: u64) -> impl httptest::responders::Responder {
        json_encoded(json!({
            "access_token": token,
            "issued_token_type": ACCESS_TOKEN_TYPE,
            "token_type": "Bearer",
            "expires_in": expires_in,
        }))
    }

    #[tokio::test]
    async fn programmatic_token_exchange() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/token"),
                request::body(url_decoded(contains((
                    "grant_type",
                    TOKEN_EXCHANGE_GRANT_TYPE
                )))),
                request::body(url_decoded(contains(("subject_token", "test-subject-token")))),
                request::body(url_decoded(contains(("subject_token_type", JWT_TOKEN_TYPE)))),
                request::body(url_decoded(contains(("audience", AUDIENCE)))),
                request::body(url_decoded(contains(("scope", "scope1 scope2")))),
            ])
            .respond_with(sts_success("sts-token", 3600)),
        );

        let clock = ManualClock::new(1_000_000);
        let creds = ProgrammaticBuilder::new(Arc::new(TestSubjectTokenProvider))
            .with_audience(AUDIENCE)
            .with_subject_token_type(JWT_TOKEN_TYPE)
            .with_token_url(server.url_str("/token"))
            .with_scopes(["scope1", "scope2"])
            .with_clock(Arc::new(clock.clone()))
            .build()?;
        let token = creds.access_token().await?;
        assert_eq!(token.access_token, "sts-token");
        assert_eq!(token.expiry_millis, Some(1_000_000 + 3_600_000));
        Ok(())
    }

    #[tokio::test]
    async fn programmatic_provider_error() -> TestResult {
        let creds = ProgrammaticBuilder::new(Arc::new(FailingSubjectTokenProvider))
            .with_audience(AUDIENCE)
            .with_subject_token_type(JWT_TOKEN_TYPE)
            // Never contacted.
            .with_token_url("http://127.0.0.1:1/token")
            .build()?;
        let err = creds.access_token().await.unwrap_err();
        assert!(err.is_source_unavailable(), "{err:?}");
        assert!(!err.is_transient(), "{err:?}");
        assert!(err.to_string().contains("TestProviderError"), "{err}");
        Ok(())
    }

    #[tokio::test]
    async fn impersonation_scopes() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/token"),
                request::body(url_decoded(contains(("scope", DEFAULT_SCOPE)))),
            ])
            .respond_with(sts_success("sts-token", 3600)),
        );
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/impersonate"),
                request::headers(contains(("authorization", "Bearer sts-token"))),
                request::body(json_decoded(eq(json!({"scope": ["scope1", "scope2"]})))),
            ])
            .respond_with(json_encoded(json!({
                "accessToken": "sa-token",
                "expireTime": "2030-01-01T00:00:00Z",
            }))),
        );

        let creds = ProgrammaticBuilder::new(Arc::new(TestSubjectTokenProvider))
            .with_audience(AUDIENCE)
            .with_subject_token_type(JWT_TOKEN_TYPE)
            .with_token_url(server.url_str("/token"))
            .with_service_account_impersonation_url(server.url_str("/impersonate"))
            .with_scopes(["scope1", "scope2"])
            .build()?;
        let token = creds.access_token().await?;
        assert_eq!(token.access_token, "sa-token");
        // 2030-01-01T00:00:00Z
        assert_eq!(token.expiry_millis, Some(1_893_456_000_000));
        Ok(())
    }

    #[tokio::test]
    async fn huge_expires_in_saturates() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/token"))
                .times(1)
                .respond_with(json_encoded(json!({
                    "access_token": "sts-token",
                    "issued_token_type": ACCESS_TOKEN_TYPE,
                    "token_type": "Bearer",
                    "expires_in": u64::MAX,
                }))),
        );

        let clock = ManualClock::new(1_000_000);
        let creds = ProgrammaticBuilder::new(Arc::new(TestSubjectTokenProvider))
            .with_audience(AUDIENCE)
            .with_subject_token_type(JWT_TOKEN_TYPE)
            .with_token_url(server.url_str("/token"))
            .with_clock(Arc::new(clock.clone()))
            .build()?;
        let token = creds.access_token().await?;
        assert_eq!(token.expiry_millis, Some(i64::MAX));
        // Served from the cache, the token is still usable.
        let token = creds.access_token().await?;
        assert_eq!(token.access_token, "sts-token");
        Ok(())
    }

    #[tokio::test]
    async fn missing_expires_in_never_expires() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/token"))
                .times(1)
                .respond_with(json_encoded(json!({
                    "access_token": "sts-token",
                    "issued_token_type": ACCESS_TOKEN_TYPE,
                    "token_type": "Bearer",
                }))),
        );

        let creds = ProgrammaticBuilder::new(Arc::new(TestSubjectTokenProvider))
            .with_audience(AUDIENCE)
            .with_subject_token_type(JWT_TOKEN_TYPE)
            .with_token_url(server.url_str("/token"))
            .build()?;
        let token = creds.access_token().await?;
        assert_eq!(token.expiry_millis, None);
        let token = creds.access_token().await?;
        assert_eq!(token.access_token, "sts-token");
        Ok(())
    }

    #[tokio::test]
    async fn headers_with_quota_project() -> TestResult {
        let creds = ProgrammaticBuilder::new(Arc::new(TestSubjectTokenProvider))
            .with_audience(AUDIENCE)
            .with_subject_token_type(JWT_TOKEN_TYPE)
            .with_token_url("http://127.0.0.1:1/token")
            .with_quota_project_id("test-quota")
            .build()?;
        creds.set_credentials(CachedAccessToken::new("injected", None));
        let headers = creds.headers().await?;
        assert_eq!(
            headers
                .get(http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok()),
            Some("Bearer injected")
        );
        assert_eq!(
            headers
                .get("x-goog-user-project")
                .and_then(|v| v.to_str().ok()),
            Some("test-quota")
        );
        Ok(())
    }

    #[tokio::test]
    async fn sts_error_propagates() -> TestResult {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/token")).respond_with(
                status_code(400).body(
                    json!({"error": "invalid_grant", "error_description": "expired"}).to_string(),
                ),
            ),
        );

        let creds = ProgrammaticBuilder::new(Arc::new(TestSubjectTokenProvider))
            .with_audience(AUDIENCE)
            .with_subject_token_type(JWT_TOKEN_TYPE)
            .with_token_url(server.url_str("/token"))
            .build()?;
        let err: CredentialsError = creds.access_token().await.unwrap_err();
        assert!(err.is_oauth(), "{err:?}");
        assert_eq!(err.to_string(), "Error code invalid_grant: expired");
        Ok(())
    }

    #[test]
    fn is_auth_failure_statuses() {
        assert!(is_auth_failure(StatusCode::UNAUTHORIZED));
        assert!(is_auth_failure(StatusCode::FORBIDDEN));
        assert!(!is_auth_failure(StatusCode::NOT_FOUND));
        assert!(!is_auth_failure(StatusCode::INTERNAL_SERVER_ERROR));
    }
}
