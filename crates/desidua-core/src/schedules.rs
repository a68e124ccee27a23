use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::api::BackendClient;
use crate::bookings::Person;
use crate::errors::DesiduaError;
use crate::wire::{parse_time, string_or_number};

/// Day names indexed by `day_of_week`, Sunday first.
pub const DAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// A doctor as offered in the schedule editor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Doctor {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// A weekly practice slot.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DoctorSchedule {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub doctor_id: String,
    pub day_of_week: u8,
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub break_start: Option<String>,
    #[serde(default)]
    pub break_end: Option<String>,
    #[serde(rename = "Doctor", default)]
    pub doctor: Option<Person>,
}

impl DoctorSchedule {
    pub fn day_name(&self) -> Option<&'static str> {
        DAY_NAMES.get(self.day_of_week as usize).copied()
    }
}

/// Fields of a slot being created or edited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleDraft {
    pub doctor_id: String,
    pub day_of_week: u8,
    pub start_time: String,
    pub end_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub break_start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub break_end: Option<String>,
}

impl ScheduleDraft {
    /// Doctor, day and working hours are required; a break must come as a
    /// pair and sit inside the working hours.
    pub fn validate(&self) -> Result<(), DesiduaError> {
        let invalid = |msg: &str| Err(DesiduaError::InvalidInput(msg.to_string()));
        if self.doctor_id.trim().is_empty() {
            return invalid("schedule needs a doctor");
        }
        if self.day_of_week as usize >= DAY_NAMES.len() {
            return invalid("day of week must be 0 (Sunday) to 6 (Saturday)");
        }
        let (Some(start), Some(end)) = (parse_time(&self.start_time), parse_time(&self.end_time))
        else {
            return invalid("working hours must be HH:MM");
        };
        if start >= end {
            return invalid("working hours end before they start");
        }
        match (self.break_start.as_deref(), self.break_end.as_deref()) {
            (None, None) => Ok(()),
            (Some(from), Some(to)) => match (parse_time(from), parse_time(to)) {
                (Some(from), Some(to)) if start <= from && from < to && to <= end => Ok(()),
                (Some(_), Some(_)) => invalid("break must fall inside working hours"),
                _ => invalid("break times must be HH:MM"),
            },
            _ => invalid("break needs both a start and an end"),
        }
    }
}

/// Weekly practice hours.
pub struct ScheduleService {
    client: BackendClient,
}

impl ScheduleService {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }

    /// `GET /api/doctor`
    pub async fn doctors(&self) -> Result<Vec<Doctor>, DesiduaError> {
        #[derive(Deserialize)]
        struct DoctorList {
            #[serde(default)]
            data: Vec<Doctor>,
        }
        let list: DoctorList = self.client.get_json("/api/doctor").await?;
        Ok(list.data)
    }

    /// `GET /api/doctor-schedule`, optionally narrowed to one doctor,
    /// ordered by weekday then start time.
    pub async fn schedules(&self, doctor_id: Option<&str>) -> Result<Vec<DoctorSchedule>, DesiduaError> {
        let all: Vec<DoctorSchedule> = self.client.get_json("/api/doctor-schedule").await?;
        let mut schedules: Vec<DoctorSchedule> = all
            .into_iter()
            .filter(|s| doctor_id.is_none_or(|id| s.doctor_id == id))
            .collect();
        schedules.sort_by_key(|s| (s.day_of_week, parse_time(&s.start_time)));
        Ok(schedules)
    }

    /// `POST /api/doctor-schedule` for a new slot, `PUT …/{id}` to edit one.
    pub async fn save(&self, id: Option<&str>, draft: &ScheduleDraft) -> Result<(), DesiduaError> {
        draft.validate()?;
        match id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => {
                let path = format!("/api/doctor-schedule/{}", urlencoding::encode(id));
                self.client.send_json(Method::PUT, &path, draft).await?;
                tracing::info!("schedule {id} updated");
            }
            None => {
                self.client
                    .send_json(Method::POST, "/api/doctor-schedule", draft)
                    .await?;
                tracing::info!("schedule created for doctor {}", draft.doctor_id);
            }
        }
        Ok(())
    }

    /// `DELETE /api/doctor-schedule/{id}`
    pub async fn delete(&self, id: &str) -> Result<(), DesiduaError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(DesiduaError::InvalidInput("schedule id is empty".into()));
        }
        self.client
            .delete(&format!("/api/doctor-schedule/{}", urlencoding::encode(id)))
            .await?;
        tracing::info!("schedule {id} deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Config;
    use crate::testing::{StaticCredential, serve_once};

    fn service(base: &str) -> ScheduleService {
        let config = Config {
            api_url: base.to_string(),
            ..Config::default()
        };
        let client =
            BackendClient::new(&config, Arc::new(StaticCredential(Some("jwt".into())))).unwrap();
        ScheduleService::new(client)
    }

    fn draft() -> ScheduleDraft {
        ScheduleDraft {
            doctor_id: "3".into(),
            day_of_week: 1,
            start_time: "08:00".into(),
            end_time: "16:00".into(),
            break_start: None,
            break_end: None,
        }
    }

    #[test]
    fn drafts_are_checked_before_sending() {
        assert_eq!(draft().validate(), Ok(()));

        let bad = [
            ScheduleDraft { doctor_id: " ".into(), ..draft() },
            ScheduleDraft { day_of_week: 7, ..draft() },
            ScheduleDraft { start_time: "8am".into(), ..draft() },
            ScheduleDraft { end_time: "07:00".into(), ..draft() },
            ScheduleDraft { break_start: Some("12:00".into()), ..draft() },
            ScheduleDraft {
                break_start: Some("15:30".into()),
                break_end: Some("17:00".into()),
                ..draft()
            },
        ];
        for draft in bad {
            assert!(
                matches!(draft.validate(), Err(DesiduaError::InvalidInput(_))),
                "{draft:?}"
            );
        }

        let with_break = ScheduleDraft {
            break_start: Some("12:00".into()),
            break_end: Some("13:00:00".into()),
            ..draft()
        };
        assert_eq!(with_break.validate(), Ok(()));
    }

    #[tokio::test]
    async fn schedules_are_filtered_and_ordered() {
        let server = serve_once(
            200,
            r#"[
              {"id":1,"doctor_id":3,"day_of_week":3,"start_time":"09:00","end_time":"12:00","Doctor":{"name":"Dr. Sari"}},
              {"id":2,"doctor_id":4,"day_of_week":1,"start_time":"09:00","end_time":"12:00"},
              {"id":3,"doctor_id":"3","day_of_week":1,"start_time":"13:00:00","end_time":"17:00:00"},
              {"id":4,"doctor_id":3,"day_of_week":1,"start_time":"08:00","end_time":"11:00"}
            ]"#,
        )
        .await;

        let schedules = service(&server.base_url).schedules(Some("3")).await.unwrap();
        let ids: Vec<&str> = schedules.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["4", "3", "1"]);
        assert_eq!(schedules[2].day_name(), Some("Wednesday"));

        let request = server.request().await;
        assert!(request.starts_with("GET /api/doctor-schedule "));
    }

    #[tokio::test]
    async fn new_slot_is_posted_without_empty_break() {
        let server = serve_once(201, r#"{"id":9}"#).await;
        service(&server.base_url).save(None, &draft()).await.unwrap();

        let request = server.request().await;
        assert!(request.starts_with("POST /api/doctor-schedule "));
        assert!(request.ends_with(
            r#"{"doctor_id":"3","day_of_week":1,"start_time":"08:00","end_time":"16:00"}"#
        ));
    }

    #[tokio::test]
    async fn existing_slot_is_put() {
        let server = serve_once(200, "{}").await;
        service(&server.base_url).save(Some("9"), &draft()).await.unwrap();
        assert!(server.request().await.starts_with("PUT /api/doctor-schedule/9 "));
    }

    #[tokio::test]
    async fn invalid_draft_never_reaches_the_backend() {
        let bad = ScheduleDraft { end_time: "06:00".into(), ..draft() };
        let err = service("http://127.0.0.1:9").save(None, &bad).await.unwrap_err();
        assert!(matches!(err, DesiduaError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn delete_targets_the_slot() {
        let server = serve_once(200, "{}").await;
        service(&server.base_url).delete("9").await.unwrap();
        assert!(server.request().await.starts_with("DELETE /api/doctor-schedule/9 "));
    }

    #[tokio::test]
    async fn doctors_come_from_the_data_envelope() {
        let server = serve_once(200, r#"{"data":[{"id":3,"name":"Dr. Sari"}]}"#).await;
        let doctors = service(&server.base_url).doctors().await.unwrap();
        assert_eq!(
            doctors,
            vec![Doctor {
                id: "3".into(),
                name: Some("Dr. Sari".into())
            }]
        );
    }
}
