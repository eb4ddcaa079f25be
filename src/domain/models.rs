use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentType {
    Campus,
    Online,
    Exam,
    Holiday,
    Empty,
}

impl AppointmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentType::Campus => "CAMPUS",
            AppointmentType::Online => "ONLINE",
            AppointmentType::Exam => "EXAM",
            AppointmentType::Holiday => "HOLIDAY",
            AppointmentType::Empty => "EMPTY",
        }
    }
}

impl fmt::Display for AppointmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings that shape how an appointment is rendered on the remote calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventOptions {
    pub time_zone: Tz,
    pub exams_all_day: bool,
    pub campus_location: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appointment {
    pub title: String,
    pub appointment_type: AppointmentType,
    pub begin_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub remote_event_id: Option<String>,
}

impl Appointment {
    pub fn new(
        title: impl Into<String>,
        appointment_type: AppointmentType,
        begin_time: NaiveDateTime,
        end_time: NaiveDateTime,
    ) -> Self {
        Self {
            title: title.into(),
            appointment_type,
            begin_time,
            end_time,
            remote_event_id: None,
        }
    }

    pub fn is_all_day(&self, options: &EventOptions) -> bool {
        match self.appointment_type {
            AppointmentType::Holiday => true,
            AppointmentType::Exam => options.exams_all_day,
            _ => false,
        }
    }

    pub fn location<'a>(&self, options: &'a EventOptions) -> Option<&'a str> {
        if self.appointment_type != AppointmentType::Campus {
            return None;
        }
        let location = options.campus_location.trim();
        (!location.is_empty()).then_some(location)
    }

    /// Local calendar date of the last day covered by the appointment.
    pub fn end_date(&self) -> NaiveDate {
        self.end_time.date()
    }

    pub fn is_historic(&self, time_zone: Tz, now: DateTime<Utc>) -> bool {
        local_to_utc(time_zone, self.end_time) < now
    }
}

/// Resolves a wall-clock time in `time_zone`. Times inside a DST gap fall back to UTC.
pub fn local_to_utc(time_zone: Tz, local: NaiveDateTime) -> DateTime<Utc> {
    time_zone
        .from_local_datetime(&local)
        .earliest()
        .map(|value| value.with_timezone(&Utc))
        .unwrap_or_else(|| local.and_utc())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub token_type: String,
    pub scope: Option<String>,
}

impl OAuthToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>, leeway_seconds: i64) -> bool {
        self.expires_at > now + chrono::Duration::seconds(leeway_seconds)
            && !self.access_token.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(date: (i32, u32, u32), hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(date.0, date.1, date.2)
            .expect("valid date")
            .and_hms_opt(hour, minute, 0)
            .expect("valid time")
    }

    fn options(exams_all_day: bool) -> EventOptions {
        EventOptions {
            time_zone: chrono_tz::Europe::Amsterdam,
            exams_all_day,
            campus_location: "Niels Bohrweg 1, Leiden".to_string(),
        }
    }

    #[test]
    fn holidays_are_always_all_day_and_exams_follow_the_flag() {
        let holiday = Appointment::new("Christmas", AppointmentType::Holiday, at((2024, 12, 23), 9, 0), at((2024, 12, 25), 18, 0));
        let exam = Appointment::new("Logic", AppointmentType::Exam, at((2024, 12, 16), 9, 0), at((2024, 12, 16), 12, 0));
        let online = Appointment::new("Logic", AppointmentType::Online, at((2024, 12, 16), 9, 0), at((2024, 12, 16), 12, 0));

        assert!(holiday.is_all_day(&options(false)));
        assert!(exam.is_all_day(&options(true)));
        assert!(!exam.is_all_day(&options(false)));
        assert!(!online.is_all_day(&options(true)));
    }

    #[test]
    fn only_campus_appointments_carry_a_location() {
        let opts = options(false);
        let campus = Appointment::new("Algorithms", AppointmentType::Campus, at((2024, 9, 2), 9, 0), at((2024, 9, 2), 9, 45));
        let online = Appointment::new("Algorithms", AppointmentType::Online, at((2024, 9, 2), 9, 15), at((2024, 9, 2), 10, 0));

        assert_eq!(campus.location(&opts), Some("Niels Bohrweg 1, Leiden"));
        assert_eq!(online.location(&opts), None);

        let blank = EventOptions {
            campus_location: "  ".to_string(),
            ..opts
        };
        assert_eq!(campus.location(&blank), None);
    }

    #[test]
    fn historic_compares_end_time_in_configured_zone() {
        let appointment = Appointment::new("Algorithms", AppointmentType::Campus, at((2024, 9, 2), 9, 0), at((2024, 9, 2), 10, 0));
        // 10:00 in Amsterdam (CEST) is 08:00 UTC.
        let just_before = DateTime::parse_from_rfc3339("2024-09-02T07:59:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc);
        let just_after = DateTime::parse_from_rfc3339("2024-09-02T08:01:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc);

        assert!(!appointment.is_historic(chrono_tz::Europe::Amsterdam, just_before));
        assert!(appointment.is_historic(chrono_tz::Europe::Amsterdam, just_after));
    }

    #[test]
    fn token_validity_respects_leeway() {
        let now = Utc::now();
        let token = OAuthToken {
            access_token: "access".to_string(),
            refresh_token: None,
            expires_at: now + chrono::Duration::seconds(30),
            token_type: "Bearer".to_string(),
            scope: None,
        };
        assert!(token.is_valid_at(now, 0));
        assert!(!token.is_valid_at(now, 60));
    }
}
