use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::api::BackendClient;
use crate::credentials::{AUTH_TOKEN_KEY, CredentialStore};
use crate::errors::DesiduaError;

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: Option<String>,
    message: Option<String>,
}

/// Doctor login. The only writer of the stored bearer credential.
pub struct AuthService {
    client: BackendClient,
    store: Arc<dyn CredentialStore>,
}

impl AuthService {
    pub fn new(client: BackendClient, store: Arc<dyn CredentialStore>) -> Self {
        Self { client, store }
    }

    /// `POST /api/doctor/login`; on success the token is persisted.
    pub async fn login(&self, email: &str, password: &str) -> Result<(), DesiduaError> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(DesiduaError::InvalidInput(
                "Email and password are required.".into(),
            ));
        }

        tracing::info!("logging in as {email}");
        let resp: LoginResponse = self
            .client
            .post_json("/api/doctor/login", &LoginRequest { email, password })
            .await?;

        match resp.token.filter(|t| !t.trim().is_empty()) {
            Some(token) => {
                self.store.set(AUTH_TOKEN_KEY, &token)?;
                tracing::info!("login succeeded");
                Ok(())
            }
            None => Err(DesiduaError::Unauthorized(
                resp.message.unwrap_or_else(|| "login rejected".into()),
            )),
        }
    }

    pub fn logout(&self) -> Result<(), DesiduaError> {
        tracing::info!("logging out");
        self.store.remove(AUTH_TOKEN_KEY)
    }

    pub fn is_logged_in(&self) -> bool {
        self.store
            .get(AUTH_TOKEN_KEY)
            .is_some_and(|t| !t.trim().is_empty())
    }
}
