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

use std::time::Duration;

pub(crate) const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
pub(crate) const GOOGLE_CLOUD_QUOTA_PROJECT_VAR: &str = "GOOGLE_CLOUD_QUOTA_PROJECT";
/// The `type` discriminator for external account configuration files.
pub(crate) const EXTERNAL_ACCOUNT_TYPE: &str = "external_account";
/// Token Exchange OAuth Grant Type
pub(crate) const TOKEN_EXCHANGE_GRANT_TYPE: &str =
    "urn:ietf:params:oauth:grant-type:token-exchange";
/// Access Token Oauth Token Type
pub(crate) const ACCESS_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";
/// JWT OAuth Token Type
#[cfg(test)]
pub(crate) const JWT_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:jwt";
/// Cloud Resource Manager endpoint used to map project numbers to project ids.
pub(crate) const CLOUD_RESOURCE_MANAGER: &str =
    "https://cloudresourcemanager.googleapis.com/v1/projects/";
/// Offset to take into account network delays and server clock skews.
pub(crate) const DEFAULT_EAGER_REFRESH_THRESHOLD: Duration = Duration::from_secs(5 * 60);
/// The token type reported for every access token produced by this crate.
pub(crate) const BEARER_TOKEN_TYPE: &str = "Bearer";
