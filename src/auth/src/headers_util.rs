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
use crate::constants::BEARER_TOKEN_TYPE;
use crate::errors::CredentialsError;
use crate::token::CachedAccessToken;

use http::HeaderMap;
use http::header::{AUTHORIZATION, HeaderName, HeaderValue};

/// The header used to attribute quota and billing to a project.
pub(crate) const QUOTA_PROJECT_KEY: &str = "x-goog-user-project";

/// A utility function to create bearer headers.
pub(crate) fn build_bearer_headers(
    token: &CachedAccessToken,
    quota_project_id: &Option<String>,
) -> Result<HeaderMap> {
    let mut value =
        HeaderValue::from_str(&format!("{BEARER_TOKEN_TYPE} {}", token.access_token))
            .map_err(|e| CredentialsError::from_source(false, e))?;
    value.set_sensitive(true);

    let mut header_map = HeaderMap::new();
    header_map.insert(AUTHORIZATION, value);

    if let Some(project) = quota_project_id {
        header_map.insert(
            HeaderName::from_static(QUOTA_PROJECT_KEY),
            HeaderValue::from_str(project).map_err(|e| CredentialsError::from_source(false, e))?,
        );
    }

    Ok(header_map)
}
