use std::sync::Mutex;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::api::BackendClient;
use crate::errors::DesiduaError;
use crate::wire::{parse_date, parse_time, string_or_number};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
    #[serde(other)]
    Unknown,
}

impl BookingStatus {
    /// pending → confirmed | cancelled, confirmed → completed,
    /// cancelled → pending. Completed is terminal.
    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Completed) | (Cancelled, Pending)
        )
    }

    pub fn next_actions(self) -> Vec<BookingStatus> {
        use BookingStatus::*;
        [Pending, Confirmed, Cancelled, Completed]
            .into_iter()
            .filter(|next| self.can_transition_to(*next))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Paid,
    Unpaid,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Person {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Service {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_live: bool,
}

/// A consultation booking as listed for the signed-in doctor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Booking {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub booking_code: String,
    pub status: BookingStatus,
    #[serde(default)]
    pub payment_status: PaymentStatus,
    #[serde(default)]
    pub patient: Option<Person>,
    #[serde(rename = "Service", default)]
    pub service: Option<Service>,
    #[serde(rename = "Doctor", default)]
    pub doctor: Option<Person>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub time_start: Option<String>,
    #[serde(default)]
    pub time_end: Option<String>,
}

impl Booking {
    pub fn is_live(&self) -> bool {
        self.service.as_ref().is_some_and(|s| s.is_live)
    }

    pub fn patient_name(&self) -> Option<&str> {
        self.patient.as_ref()?.name.as_deref()
    }

    /// Start of the consultation, when `date` and `time_start` parse.
    pub fn scheduled_at(&self) -> Option<NaiveDateTime> {
        let date = parse_date(self.date.as_deref()?)?;
        let time = parse_time(self.time_start.as_deref()?)?;
        Some(date.and_time(time))
    }

    /// Local check before asking the backend to change the status.
    pub fn check_transition(&self, next: BookingStatus) -> Result<(), DesiduaError> {
        if !self.status.can_transition_to(next) {
            return Err(DesiduaError::Booking(format!(
                "cannot move booking {} from {:?} to {:?}",
                self.booking_code, self.status, next
            )));
        }
        if next == BookingStatus::Confirmed && self.payment_status != PaymentStatus::Paid {
            return Err(DesiduaError::Booking(format!(
                "booking {} is not paid yet",
                self.booking_code
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct BookingList {
    #[serde(default)]
    data: Vec<Booking>,
}

#[derive(Debug, Serialize)]
struct StatusUpdate {
    status: BookingStatus,
}

/// Telemedicine bookings of the signed-in doctor.
///
/// Keeps the last fetched list so status changes can be validated locally.
pub struct BookingService {
    client: BackendClient,
    cache: Mutex<Vec<Booking>>,
}

impl BookingService {
    pub fn new(client: BackendClient) -> Self {
        Self {
            client,
            cache: Mutex::new(Vec::new()),
        }
    }

    /// Live-service bookings, earliest first. Unscheduled ones go last.
    pub async fn telemedicine_bookings(&self) -> Result<Vec<Booking>, DesiduaError> {
        let list: BookingList = self.client.get_json("/api/booking/doctor").await?;
        let total = list.data.len();
        let mut bookings: Vec<Booking> = list.data.into_iter().filter(Booking::is_live).collect();
        bookings.sort_by_key(|b| {
            let at = b.scheduled_at();
            (at.is_none(), at)
        });
        tracing::info!("{} of {total} bookings are telemedicine", bookings.len());

        *self.cache.lock().unwrap() = bookings.clone();
        Ok(bookings)
    }

    /// `PATCH /api/booking/{id}/status` after checking the transition
    /// against the last fetched list.
    pub async fn update_status(&self, id: &str, next: BookingStatus) -> Result<(), DesiduaError> {
        let booking = self
            .cache
            .lock()
            .unwrap()
            .iter()
            .find(|b| b.id == id)
            .cloned()
            .ok_or_else(|| DesiduaError::NotFound(format!("booking {id}")))?;
        booking.check_transition(next)?;

        let path = format!("/api/booking/{}/status", urlencoding::encode(id));
        tracing::info!("booking {id}: {:?} -> {next:?}", booking.status);
        self.client
            .patch_json(&path, &StatusUpdate { status: next })
            .await?;

        if let Some(cached) = self.cache.lock().unwrap().iter_mut().find(|b| b.id == id) {
            cached.status = next;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Config;
    use crate::testing::{StaticCredential, serve_once};

    const LIST: &str = r#"{"data":[
        {"id":7,"booking_code":"BK-7","status":"confirmed","payment_status":"paid",
         "patient":{"name":"Budi"},"Service":{"name":"Tele consult","is_live":true},
         "Doctor":{"name":"Dr. Sari"},"date":"2025-03-02","time_start":"10:00","time_end":"10:30"},
        {"id":"8","booking_code":"BK-8","status":"pending","payment_status":"unpaid",
         "Service":{"name":"Clinic visit","is_live":false},"date":"2025-03-01","time_start":"09:00"},
        {"id":9,"booking_code":"BK-9","status":"pending","payment_status":"paid",
         "Service":{"name":"Tele consult","is_live":true},
         "date":"2025-03-01T00:00:00.000Z","time_start":"08:30:00"},
        {"id":10,"booking_code":"BK-10","status":"rescheduled",
         "Service":{"is_live":true}}
    ]}"#;

    fn service(base: &str) -> BookingService {
        let config = Config {
            api_url: base.to_string(),
            ..Config::default()
        };
        let client =
            BackendClient::new(&config, Arc::new(StaticCredential(Some("jwt".into())))).unwrap();
        BookingService::new(client)
    }

    fn booking(status: BookingStatus, payment: PaymentStatus) -> Booking {
        Booking {
            id: "1".into(),
            booking_code: "BK-1".into(),
            status,
            payment_status: payment,
            patient: None,
            service: None,
            doctor: None,
            date: None,
            time_start: None,
            time_end: None,
        }
    }

    #[tokio::test]
    async fn lists_only_live_bookings_in_schedule_order() {
        let server = serve_once(200, LIST).await;
        let svc = service(&server.base_url);

        let bookings = svc.telemedicine_bookings().await.unwrap();
        let ids: Vec<&str> = bookings.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["9", "7", "10"]);
        assert_eq!(bookings[1].patient_name(), Some("Budi"));
        assert_eq!(bookings[2].status, BookingStatus::Unknown);
        assert_eq!(*svc.cache.lock().unwrap(), bookings);

        let request = server.request().await;
        assert!(request.starts_with("GET /api/booking/doctor "));
    }

    #[tokio::test]
    async fn update_sends_new_status() {
        let server = serve_once(200, "{}").await;
        let svc = service(&server.base_url);
        svc.cache
            .lock()
            .unwrap()
            .push(booking(BookingStatus::Pending, PaymentStatus::Paid));

        svc.update_status("1", BookingStatus::Confirmed).await.unwrap();

        assert_eq!(svc.cache.lock().unwrap()[0].status, BookingStatus::Confirmed);
        let request = server.request().await;
        assert!(request.starts_with("PATCH /api/booking/1/status "));
        assert!(request.ends_with(r#"{"status":"confirmed"}"#));
    }

    #[tokio::test]
    async fn unpaid_booking_cannot_be_confirmed() {
        let svc = service("http://127.0.0.1:9");
        svc.cache
            .lock()
            .unwrap()
            .push(booking(BookingStatus::Pending, PaymentStatus::Unpaid));
        let err = svc
            .update_status("1", BookingStatus::Confirmed)
            .await
            .unwrap_err();
        assert!(matches!(err, DesiduaError::Booking(_)));
        assert_eq!(svc.cache.lock().unwrap()[0].status, BookingStatus::Pending);
    }

    #[tokio::test]
    async fn unknown_booking_is_not_found() {
        let svc = service("http://127.0.0.1:9");
        let err = svc
            .update_status("42", BookingStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, DesiduaError::NotFound(_)));
    }

    #[test]
    fn transition_table() {
        use BookingStatus::*;
        assert_eq!(Pending.next_actions(), vec![Confirmed, Cancelled]);
        assert_eq!(Confirmed.next_actions(), vec![Completed]);
        assert_eq!(Cancelled.next_actions(), vec![Pending]);
        assert!(Completed.next_actions().is_empty());
        assert!(Unknown.next_actions().is_empty());
    }

    #[test]
    fn completed_is_terminal() {
        let b = booking(BookingStatus::Completed, PaymentStatus::Paid);
        assert!(b.check_transition(BookingStatus::Pending).is_err());
    }

    #[test]
    fn cancel_and_reactivate_ignore_payment() {
        let b = booking(BookingStatus::Pending, PaymentStatus::Unpaid);
        assert!(b.check_transition(BookingStatus::Cancelled).is_ok());
        let b = booking(BookingStatus::Cancelled, PaymentStatus::Unpaid);
        assert!(b.check_transition(BookingStatus::Pending).is_ok());
    }

    #[test]
    fn schedule_parses_both_time_formats() {
        let mut b = booking(BookingStatus::Pending, PaymentStatus::Paid);
        b.date = Some("2025-03-01".into());
        b.time_start = Some("08:30".into());
        let short = b.scheduled_at().unwrap();
        b.time_start = Some("08:30:00".into());
        assert_eq!(b.scheduled_at(), Some(short));
        b.time_start = Some("half past eight".into());
        assert_eq!(b.scheduled_at(), None);
    }
}
