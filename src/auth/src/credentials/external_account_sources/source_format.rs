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

use crate::build_errors::Error as BuilderError;
use crate::credentials::subject_token::{Builder as SubjectTokenBuilder, SubjectToken};
use crate::errors::CredentialsError;
use crate::{BuildResult, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const TEXT_FORMAT_TYPE: &str = "text";
const JSON_FORMAT_TYPE: &str = "json";

/// The `format` object of a credential source, as it appears in the
/// configuration file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct CredentialSourceFormat {
    #[serde(rename = "type")]
    pub format_type: Option<String>,
    pub subject_token_field_name: Option<String>,
}

/// How to find the subject token in the contents of a file or a response.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SourceFormat {
    /// The contents are the subject token.
    Text,
    /// The contents are a JSON object, the token is in the named field.
    Json { subject_token_field_name: String },
}

impl TryFrom<Option<CredentialSourceFormat>> for SourceFormat {
    type Error = BuilderError;

    fn try_from(value: Option<CredentialSourceFormat>) -> BuildResult<Self> {
        let Some(format) = value else {
            return Ok(Self::Text);
        };
        match format.format_type.as_deref() {
            None | Some(TEXT_FORMAT_TYPE) => Ok(Self::Text),
            Some(JSON_FORMAT_TYPE) => match format.subject_token_field_name {
                Some(name) if !name.is_empty() => Ok(Self::Json {
                    subject_token_field_name: name,
                }),
                _ => Err(BuilderError::missing_field(
                    "credential_source.format.subject_token_field_name",
                )),
            },
            Some(other) => Err(BuilderError::invalid_source(format!(
                "invalid credential_source format type `{other}`, expected `{TEXT_FORMAT_TYPE}` or `{JSON_FORMAT_TYPE}`"
            ))),
        }
    }
}

impl SourceFormat {
    /// Extracts the subject token from `content`, read from `origin`.
    pub(crate) fn extract(&self, content: String, origin: &str) -> Result<SubjectToken> {
        match self {
            Self::Text if content.is_empty() => Err(CredentialsError::source_unavailable(
                format!("unable to parse the subject token from {origin}: the contents are empty"),
            )),
            Self::Text => Ok(SubjectTokenBuilder::new(content).build()),
            Self::Json {
                subject_token_field_name,
            } => {
                let json: Value = serde_json::from_str(&content).map_err(|e| {
                    CredentialsError::source_unavailable_from(
                        false,
                        format!("unable to parse the subject token from {origin}: {e}"),
                        e,
                    )
                })?;
                match json.get(subject_token_field_name) {
                    Some(Value::String(token)) if !token.is_empty() => {
                        Ok(SubjectTokenBuilder::new(token.clone()).build())
                    }
                    _ => Err(CredentialsError::field_not_found(
                        subject_token_field_name.clone(),
                        json.to_string(),
                    )),
                }
            }
        }
    }
}
