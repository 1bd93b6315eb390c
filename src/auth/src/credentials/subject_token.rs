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

//! Subject tokens: the external identity evidence exchanged for Google Cloud
//! access tokens.
//!
//! Most applications use one of the sources configured in the external
//! account configuration file (a file or a URL). Applications that obtain the
//! external token some other way implement [SubjectTokenProvider] and use
//! [ProgrammaticBuilder][crate::credentials::external_account::ProgrammaticBuilder].

use crate::errors::SubjectTokenProviderError;

/// Creates [SubjectToken] instances.
pub struct Builder {
    token: String,
}

impl Builder {
    /// Creates a builder for the given token value.
    pub fn new<S: Into<String>>(token: S) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Returns the [SubjectToken].
    pub fn build(self) -> SubjectToken {
        SubjectToken { token: self.token }
    }
}

/// A token issued by an external identity provider.
#[derive(Clone, PartialEq)]
pub struct SubjectToken {
    pub(crate) token: String,
}

impl std::fmt::Debug for SubjectToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubjectToken")
            .field("token", &"[censored]")
            .finish()
    }
}

/// Fetches subject tokens on behalf of the credentials.
///
/// The credentials call this provider every time they need to exchange a new
/// access token. Implementations should not cache tokens that may expire.
pub trait SubjectTokenProvider: std::fmt::Debug + Send + Sync {
    /// The error type returned by [subject_token][SubjectTokenProvider::subject_token].
    type Error: SubjectTokenProviderError;

    /// Returns a fresh subject token.
    fn subject_token(&self) -> impl Future<Output = Result<SubjectToken, Self::Error>> + Send;
}

pub(crate) mod dynamic {
    use super::SubjectToken;
    use crate::errors::{CredentialsError, SubjectTokenProviderError};

    /// A dyn-compatible, crate-private version of `SubjectTokenProvider`.
    #[async_trait::async_trait]
    pub trait SubjectTokenProvider: std::fmt::Debug + Send + Sync {
        async fn subject_token(&self) -> Result<SubjectToken, CredentialsError>;
    }

    /// The public SubjectTokenProvider implements the dyn-compatible SubjectTokenProvider.
    #[async_trait::async_trait]
    impl<T> SubjectTokenProvider for T
    where
        T: super::SubjectTokenProvider,
    {
        async fn subject_token(&self) -> Result<SubjectToken, CredentialsError> {
            T::subject_token(self).await.map_err(|e| {
                CredentialsError::source_unavailable_from(
                    e.is_transient(),
                    format!("failed to fetch subject token: {e}"),
                    e,
                )
            })
        }
    }
}
