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
use crate::Result;
use crate::credentials::subject_token::SubjectToken;
use crate::errors::CredentialsError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FileSourcedCredentials {
    pub file: String,
    pub format: SourceFormat,
}

impl FileSourcedCredentials {
    pub(crate) fn new(file: String, format: SourceFormat) -> Self {
        Self { file, format }
    }

    pub(crate) async fn subject_token(&self) -> Result<SubjectToken> {
        let unavailable = |e: std::io::Error| {
            CredentialsError::source_unavailable_from(
                false,
                format!(
                    "the file at {} does not exist, or it is not a file: {e}",
                    self.file
                ),
                e,
            )
        };
        // Follow symlinks, the subject token is often mounted through one.
        let path = tokio::fs::canonicalize(&self.file)
            .await
            .map_err(unavailable)?;
        let metadata = tokio::fs::metadata(&path).await.map_err(unavailable)?;
        if !metadata.is_file() {
            return Err(CredentialsError::source_unavailable(format!(
                "the file at {} does not exist, or it is not a file",
                self.file
            )));
        }

        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            CredentialsError::source_unavailable_from(
                false,
                format!("failed to read subject token file {}: {e}", self.file),
                e,
            )
        })?;
        tracing::debug!(file = %self.file, "read subject token file");
        self.format.extract(content, &self.file)
    }
}
