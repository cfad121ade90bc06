use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use platform_http_client::AccessToken;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::services::{CredentialExchange, DynError};

/// Identity the verifier acts as. `tenant` is the namespace its resources and
/// published events live in.
#[derive(Clone, PartialEq, Eq)]
pub struct Principal {
    pub username: String,
    pub tenant: String,
    pub password: String,
}

impl Principal {
    #[must_use]
    pub fn new(
        username: impl Into<String>,
        tenant: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            tenant: tenant.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("username", &self.username)
            .field("tenant", &self.tenant)
            .finish_non_exhaustive()
    }
}

/// Per-principal access token cache.
///
/// At most one credential exchange is in flight per principal; concurrent
/// callers wait for it and share its token. A failed exchange is not
/// remembered, so the next caller starts a fresh one.
pub struct PrincipalSession {
    credentials: Arc<dyn CredentialExchange>,
    tokens: Mutex<HashMap<String, Arc<OnceCell<AccessToken>>>>,
}

impl PrincipalSession {
    pub fn new(credentials: Arc<dyn CredentialExchange>) -> Self {
        Self {
            credentials,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub async fn token(&self, principal: &Principal) -> Result<AccessToken, DynError> {
        let cell = {
            let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(tokens.entry(principal.username.clone()).or_default())
        };

        if let Some(token) = cell.get() {
            debug!(username = %principal.username, "reusing cached token");
            return Ok(token.clone());
        }

        cell.get_or_try_init(|| async {
            info!(username = %principal.username, "logging in");
            self.credentials
                .login(&principal.username, &principal.password)
                .await
        })
        .await
        .cloned()
    }
}
