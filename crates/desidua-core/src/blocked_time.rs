use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::api::BackendClient;
use crate::errors::DesiduaError;
use crate::wire::{opt_string_or_number, parse_date, parse_time, string_or_number};

/// A period on a given day when the doctor takes no bookings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BlockedTime {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub doctor_id: Option<String>,
    pub date: String,
    pub time_start: String,
    pub time_end: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BlockedTimeDraft {
    /// Left out to block time for the signed-in doctor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doctor_id: Option<String>,
    pub date: String,
    pub time_start: String,
    pub time_end: String,
}

impl BlockedTimeDraft {
    pub fn validate(&self) -> Result<(), DesiduaError> {
        if parse_date(&self.date).is_none_or(|_| self.date.len() != 10) {
            return Err(DesiduaError::InvalidInput("date must be YYYY-MM-DD".into()));
        }
        let (Some(start), Some(end)) = (parse_time(&self.time_start), parse_time(&self.time_end))
        else {
            return Err(DesiduaError::InvalidInput("start and end time are required".into()));
        };
        if start >= end {
            return Err(DesiduaError::InvalidInput("blocked time ends before it starts".into()));
        }
        Ok(())
    }
}

pub struct BlockedTimeService {
    client: BackendClient,
}

impl BlockedTimeService {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }

    /// `GET /api/blocked-time/my`, soonest first.
    pub async fn mine(&self) -> Result<Vec<BlockedTime>, DesiduaError> {
        let mut blocked: Vec<BlockedTime> = self.client.get_json("/api/blocked-time/my").await?;
        blocked.sort_by_key(|b| (parse_date(&b.date), parse_time(&b.time_start)));
        Ok(blocked)
    }

    /// `POST /api/blocked-time/doctor`
    pub async fn add(&self, draft: &BlockedTimeDraft) -> Result<(), DesiduaError> {
        draft.validate()?;
        self.client
            .send_json(Method::POST, "/api/blocked-time/doctor", draft)
            .await?;
        tracing::info!(
            "blocked {} {}-{}",
            draft.date,
            draft.time_start,
            draft.time_end
        );
        Ok(())
    }

    /// `DELETE /api/blocked-time/{id}`
    pub async fn remove(&self, id: &str) -> Result<(), DesiduaError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(DesiduaError::InvalidInput("blocked time id is empty".into()));
        }
        self.client
            .delete(&format!("/api/blocked-time/{}", urlencoding::encode(id)))
            .await?;
        tracing::info!("blocked time {id} removed");
        Ok(())
    }
}
