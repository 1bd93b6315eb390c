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
use crate::clock::Clock;
use crate::constants::BEARER_TOKEN_TYPE;
use crate::token::{CachedAccessToken, TokenProvider, TokenRefresh};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};

// Notifications are dropped for subscribers that fall this far behind.
const NOTIFICATION_CAPACITY: usize = 16;

#[derive(Clone, Debug)]
pub(crate) struct TokenCache {
    // The current token, replaced as a whole on each refresh.
    token: Arc<RwLock<Option<CachedAccessToken>>>,

    // Tracks if a refresh is ongoing. If the lock is held, there is a refresh.
    refresh_in_progress: Arc<Mutex<()>>,

    // The token provider. This thing does the refreshing.
    inner: Arc<dyn TokenProvider>,

    notifier: broadcast::Sender<TokenRefresh>,
    threshold_millis: i64,
    clock: Arc<dyn Clock>,
}

impl TokenCache {
    pub(crate) fn new(
        inner: Arc<dyn TokenProvider>,
        eager_refresh_threshold: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (notifier, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            token: Arc::new(RwLock::new(None)),
            refresh_in_progress: Arc::new(Mutex::new(())),
            inner,
            notifier,
            threshold_millis: i64::try_from(eager_refresh_threshold.as_millis())
                .unwrap_or(i64::MAX),
            clock,
        }
    }

    /// Returns the cached token if it is usable, refreshing it otherwise.
    pub(crate) async fn token(&self) -> Result<CachedAccessToken> {
        if let Some(token) = self.usable() {
            tracing::debug!("using cached access token");
            return Ok(token);
        }

        let _guard = self.refresh_in_progress.lock().await;
        // Another task may have completed a refresh while we waited.
        if let Some(token) = self.usable() {
            tracing::debug!("using access token refreshed by a concurrent caller");
            return Ok(token);
        }
        self.refresh().await
    }

    /// Refreshes the token, ignoring the contents of the cache.
    pub(crate) async fn force_refresh(&self) -> Result<CachedAccessToken> {
        let _guard = self.refresh_in_progress.lock().await;
        self.refresh().await
    }

    /// Installs `token`, bypassing the token provider.
    pub(crate) fn set(&self, token: CachedAccessToken) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    pub(crate) fn cached(&self) -> Option<CachedAccessToken> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<TokenRefresh> {
        self.notifier.subscribe()
    }

    fn usable(&self) -> Option<CachedAccessToken> {
        let now = self.clock.now_millis();
        self.cached()
            .filter(|t| t.is_usable(now, self.threshold_millis))
    }

    // Must be called with `refresh_in_progress` held.
    async fn refresh(&self) -> Result<CachedAccessToken> {
        tracing::debug!("refreshing access token");
        let token = match self.inner.token().await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("access token refresh failed: {e}");
                return Err(e);
            }
        };
        self.set(token.clone());
        // Sending only fails if there are no subscribers.
        let _ = self.notifier.send(TokenRefresh {
            access_token: token.access_token.clone(),
            expiry_millis: token.expiry_millis,
            token_type: BEARER_TOKEN_TYPE.to_string(),
            refresh_token: None,
        });
        tracing::debug!(expiry_millis = ?token.expiry_millis, "access token refreshed");
        Ok(token)
    }
}
