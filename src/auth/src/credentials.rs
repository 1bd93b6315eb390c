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

pub mod external_account;
pub mod subject_token;

pub(crate) mod external_account_sources {
    pub(crate) mod file_sourced;
    pub(crate) mod programmatic_sourced;
    pub(crate) mod source_format;
    pub(crate) mod url_sourced;
}

pub(crate) mod internal {
    pub(crate) mod impersonation;
    pub(crate) mod sts_exchange;
}
