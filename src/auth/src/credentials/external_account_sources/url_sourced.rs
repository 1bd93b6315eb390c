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

use super::source_format::SourceFormat;
use crate::build_errors::Error as BuilderError;
use crate::credentials::subject_token::SubjectToken;
use crate::{BuildResult, Result, errors, transport};
use http::HeaderMap;
use http::header::{HeaderName, HeaderValue};
use reqwest::Client;
use std::collections::HashMap;

const MSG: &str = "failed to request subject token";

#[derive(Debug, Clone)]
pub(crate) struct UrlSourcedCredentials {
    pub url: String,
    pub headers: HeaderMap,
    pub format: SourceFormat,
    client: Client,
}

impl UrlSourcedCredentials {
    pub(crate) fn new(
        url: String,
        headers: Option<HashMap<String, String>>,
        format: SourceFormat,
        client: Client,
    ) -> BuildResult<Self> {
        let headers = headers
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| {
                let name = HeaderName::try_from(k).map_err(BuilderError::invalid_source)?;
                let value = HeaderValue::try_from(v).map_err(BuilderError::invalid_source)?;
                Ok((name, value))
            })
            .collect::<BuildResult<HeaderMap>>()?;
        Ok(Self {
            url,
            headers,
            format,
            client,
        })
    }

    pub(crate) async fn subject_token(&self) -> Result<SubjectToken> {
        let request = self.client.get(&self.url).headers(self.headers.clone());
        let response = transport::execute(request, MSG).await?;
        if !response.status.is_success() {
            return Err(errors::transport_from_raw_response(response, MSG));
        }
        tracing::debug!(url = %self.url, "fetched subject token");
        self.format.extract(response.text(), &self.url)
    }
}
