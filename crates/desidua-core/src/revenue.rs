use serde::Deserialize;

use crate::api::BackendClient;
use crate::errors::DesiduaError;
use crate::wire::{amount, count};

/// Income of one paid booking.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RevenueLine {
    #[serde(default)]
    pub booking_code: String,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub is_live: bool,
    #[serde(default, deserialize_with = "amount")]
    pub price: f64,
    #[serde(default, deserialize_with = "amount")]
    pub doctor_income: f64,
}

/// Revenue dashboard of the signed-in doctor. Amounts are in rupiah.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RevenueSummary {
    #[serde(default, deserialize_with = "amount")]
    pub total_doctor_income: f64,
    #[serde(default, deserialize_with = "amount")]
    pub total_app_income: f64,
    #[serde(default, deserialize_with = "count")]
    pub total_booking: u32,
    #[serde(default)]
    pub detail: Vec<RevenueLine>,
}

impl RevenueSummary {
    /// What the doctor earned from telemedicine bookings alone.
    pub fn live_income(&self) -> f64 {
        self.detail
            .iter()
            .filter(|line| line.is_live)
            .map(|line| line.doctor_income)
            .sum()
    }
}

pub struct RevenueService {
    client: BackendClient,
}

impl RevenueService {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }

    /// `GET /api/booking/doctor/revenue`
    pub async fn summary(&self) -> Result<RevenueSummary, DesiduaError> {
        let summary: RevenueSummary = self.client.get_json("/api/booking/doctor/revenue").await?;
        tracing::info!(
            "revenue: {} bookings, {} line items",
            summary.total_booking,
            summary.detail.len()
        );
        Ok(summary)
    }
}
