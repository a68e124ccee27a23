use std::fmt;

use serde::Deserialize;

use crate::api::BackendClient;
use crate::errors::DesiduaError;

/// Short-lived credential for one call room. Kept in memory only.
#[derive(Clone, PartialEq, Eq)]
pub struct RoomToken(String);

impl RoomToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for RoomToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RoomToken(..)")
    }
}

#[derive(Debug, Deserialize)]
struct CallTokenResponse {
    token: Option<String>,
}

/// Exchanges a booking id for a room token.
#[derive(Clone)]
pub struct CallAccessResolver {
    client: BackendClient,
}

impl CallAccessResolver {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }

    /// `GET /api/call/{booking_id}` with the stored bearer credential.
    ///
    /// Never retried. A blank booking id fails before any request is made.
    pub async fn resolve(&self, booking_id: &str) -> Result<RoomToken, DesiduaError> {
        let booking_id = booking_id.trim();
        if booking_id.is_empty() {
            return Err(DesiduaError::InvalidInput("booking id is required".into()));
        }

        let path = format!("/api/call/{}", urlencoding::encode(booking_id));
        tracing::info!("requesting call token for booking {booking_id}");
        let resp: CallTokenResponse = self.client.get_json(&path).await?;

        match resp.token.filter(|t| !t.trim().is_empty()) {
            Some(token) => Ok(RoomToken::new(token)),
            None => Err(DesiduaError::MalformedResponse(
                "call response has no token".into(),
            )),
        }
    }
}
