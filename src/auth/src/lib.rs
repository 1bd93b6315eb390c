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

//! Google Cloud Client Libraries for Rust - External Account Credentials
//!
//! This crate exchanges identity evidence issued outside of Google Cloud (a
//! Kubernetes service account token, an Azure managed identity token, an OIDC
//! token written to a file, ...) for short-lived Google Cloud access tokens,
//! using [Workload Identity Federation].
//!
//! The exchange follows the [OAuth 2.0 Token Exchange] protocol against the
//! Security Token Service (STS). The resulting access token may be further
//! exchanged for a [service account impersonation] token. Tokens are cached,
//! refreshed ahead of their expiration, and used to authenticate HTTP
//! requests.
//!
//! The main entry point is [credentials::external_account::Builder], which
//! consumes an [external account configuration file].
//!
//! [Workload Identity Federation]: https://cloud.google.com/iam/docs/workload-identity-federation
//! [OAuth 2.0 Token Exchange]: https://datatracker.ietf.org/doc/html/rfc8693
//! [service account impersonation]: https://cloud.google.com/iam/docs/service-account-impersonation
//! [external account configuration file]: https://google.aip.dev/auth/4117#configuration-file-generation-and-usage

pub mod build_errors;
pub mod errors;

/// Types and functions to work with Google Cloud authentication [Credentials].
///
/// [Credentials]: https://cloud.google.com/docs/authentication#credentials
pub mod credentials;

/// Types and functions to work with auth [Tokens].
///
/// [Tokens]: https://cloud.google.com/docs/authentication#token
pub mod token;

pub mod clock;
pub mod project;
pub mod transport;

pub(crate) mod constants;
pub(crate) mod headers_util;

/// The token cache
pub(crate) mod token_cache;

/// A `Result` alias where the `Err` case is
/// `google_cloud_external_account::errors::CredentialsError`.
pub(crate) type Result<T> = std::result::Result<T, crate::errors::CredentialsError>;

/// A `Result` alias where the `Err` case is
/// `google_cloud_external_account::build_errors::Error`.
pub(crate) type BuildResult<T> = std::result::Result<T, crate::build_errors::Error>;
