use serde::{Deserialize, Serialize};

use crate::api::BackendClient;
use crate::bookings::Person;
use crate::errors::DesiduaError;
use crate::wire::{opt_string_or_number, string_or_number};

/// A consultation's SOAP note.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SoapNote {
    pub subjective: String,
    pub objective: String,
    pub assessment: String,
    pub plan: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MedicalRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub patient_id: Option<String>,
    #[serde(default)]
    pub patient: Option<Person>,
    #[serde(default)]
    pub consultation_date: Option<String>,
    #[serde(default)]
    pub subjective: Option<String>,
    #[serde(default)]
    pub objective: Option<String>,
    #[serde(default)]
    pub assessment: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
}

impl MedicalRecord {
    pub fn patient_name(&self) -> Option<&str> {
        self.patient.as_ref()?.name.as_deref()
    }

    /// The stored note, with missing sections as empty text.
    pub fn soap(&self) -> SoapNote {
        let text = |field: &Option<String>| field.clone().unwrap_or_default();
        SoapNote {
            subjective: text(&self.subjective),
            objective: text(&self.objective),
            assessment: text(&self.assessment),
            plan: text(&self.plan),
        }
    }

    /// Sections already filled in, in S, O, A, P order.
    pub fn filled_sections(&self) -> [bool; 4] {
        let filled = |field: &Option<String>| field.as_deref().is_some_and(|s| !s.trim().is_empty());
        [
            filled(&self.subjective),
            filled(&self.objective),
            filled(&self.assessment),
            filled(&self.plan),
        ]
    }
}

/// Case-insensitive match on the patient's name. A blank query keeps all.
pub fn filter_by_patient<'a>(records: &'a [MedicalRecord], query: &str) -> Vec<&'a MedicalRecord> {
    let query = query.trim().to_lowercase();
    records
        .iter()
        .filter(|r| {
            query.is_empty()
                || r.patient_name()
                    .is_some_and(|name| name.to_lowercase().contains(&query))
        })
        .collect()
}

pub struct MedicalRecordService {
    client: BackendClient,
}

impl MedicalRecordService {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }

    /// `GET /api/medical-record`. A `null` body counts as no records.
    pub async fn records(&self) -> Result<Vec<MedicalRecord>, DesiduaError> {
        let records: Option<Vec<MedicalRecord>> = self.client.get_json("/api/medical-record").await?;
        let records = records.unwrap_or_default();
        tracing::info!("{} medical records", records.len());
        Ok(records)
    }

    /// `PATCH /api/medical-record/{id}` with the four SOAP sections.
    pub async fn update(&self, id: &str, note: &SoapNote) -> Result<(), DesiduaError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(DesiduaError::InvalidInput("medical record id is empty".into()));
        }
        self.client
            .patch_json(&format!("/api/medical-record/{}", urlencoding::encode(id)), note)
            .await?;
        tracing::info!("medical record {id} updated");
        Ok(())
    }
}
