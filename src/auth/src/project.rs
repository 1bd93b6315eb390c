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

//! Resolves the Google Cloud project associated with external account
//! credentials.
//!
//! The audience of a workload identity pool provider has the form
//! `//iam.googleapis.com/projects/{project_number}/locations/global/workloadIdentityPools/{pool}/providers/{provider}`.
//! The project number can be extracted from it without any network calls.
//! The project id requires a lookup in the [Cloud Resource Manager].
//!
//! [Cloud Resource Manager]: https://cloud.google.com/resource-manager/reference/rest/v1/projects/get

use crate::Result;
use crate::transport;
use http::HeaderMap;
use serde::Deserialize;
use tokio::sync::OnceCell;

const PROJECTS_SEGMENT: &str = "/projects/";
const MSG: &str = "failed to fetch project id";

/// Extracts the project number from a workload identity pool audience.
///
/// Returns `None` if the audience does not contain a non-empty
/// `/projects/{project_number}` path segment.
///
/// # Example
/// ```
/// # use google_cloud_external_account::project::project_number;
/// let audience = "//iam.googleapis.com/projects/123456/locations/global/workloadIdentityPools/pool/providers/provider";
/// assert_eq!(project_number(audience).as_deref(), Some("123456"));
/// assert_eq!(project_number("identitynamespace:1f12345:my_provider"), None);
/// ```
pub fn project_number(audience: &str) -> Option<String> {
    audience
        .match_indices(PROJECTS_SEGMENT)
        .find_map(|(start, segment)| {
            let rest = &audience[start + segment.len()..];
            let number = rest.split('/').next().unwrap_or_default();
            (!number.is_empty()).then(|| number.to_string())
        })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectResponse {
    project_id: String,
}

/// Caches the project number and project id for one set of credentials.
#[derive(Debug)]
pub(crate) struct ProjectResolver {
    project_number: Option<String>,
    project_id: OnceCell<String>,
    base_url: String,
}

impl ProjectResolver {
    pub(crate) fn new(audience: &str, base_url: String) -> Self {
        Self {
            project_number: project_number(audience),
            project_id: OnceCell::new(),
            base_url,
        }
    }

    pub(crate) fn project_number(&self) -> Option<&str> {
        self.project_number.as_deref()
    }

    /// Returns the project id, fetching it on the first successful call.
    ///
    /// `headers` is only awaited if a lookup is needed.
    pub(crate) async fn project_id<F>(
        &self,
        client: &reqwest::Client,
        headers: F,
    ) -> Result<Option<String>>
    where
        F: Future<Output = Result<HeaderMap>>,
    {
        let Some(number) = self.project_number.as_deref() else {
            return Ok(None);
        };
        let id = self
            .project_id
            .get_or_try_init(|| async {
                let headers = headers.await?;
                let url = format!("{}{number}", self.base_url);
                let response = transport::send(client.get(url).headers(headers), MSG).await?;
                let project: ProjectResponse = transport::parse_json(&response, MSG)?;
                tracing::debug!(project_number = number, project_id = %project.project_id, "resolved project id");
                Ok::<_, crate::errors::CredentialsError>(project.project_id)
            })
            .await?;
        Ok(Some(id.clone()))
    }
}
