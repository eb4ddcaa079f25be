use crate::domain::models::{Appointment, EventOptions};
use crate::infrastructure::error::InfraError;
use chrono::{Days, NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;

const KEY_APPOINTMENT_TYPE: &str = "ss_appointment_type";
const DATE_FORMAT: &str = "%Y-%m-%d";
const DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct CalendarEventDateTime {
    #[serde(rename = "dateTime", skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(rename = "timeZone", skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct CalendarEventReminders {
    #[serde(rename = "useDefault")]
    pub use_default: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
pub struct CalendarEventExtendedProperties {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub private: BTreeMap<String, String>,
}

/// Event resource as sent to and returned by the Calendar API. Field order is the
/// canonical order used for checksums.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct GoogleCalendarEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub start: CalendarEventDateTime,
    pub end: CalendarEventDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminders: Option<CalendarEventReminders>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(rename = "extendedProperties", skip_serializing_if = "Option::is_none")]
    pub extended_properties: Option<CalendarEventExtendedProperties>,
}

pub fn encode_appointment_event(appointment: &Appointment, options: &EventOptions) -> GoogleCalendarEvent {
    let time_zone = options.time_zone.name().to_string();
    let (start, end) = if appointment.is_all_day(options) {
        // The API treats the end date of an all-day event as exclusive.
        let last_day = appointment.end_time.date();
        let exclusive_end = last_day.checked_add_days(Days::new(1)).unwrap_or(last_day);
        (
            all_day(appointment.begin_time.date(), &time_zone),
            all_day(exclusive_end, &time_zone),
        )
    } else {
        (
            timed(appointment.begin_time, &time_zone),
            timed(appointment.end_time, &time_zone),
        )
    };

    let mut private = BTreeMap::new();
    private.insert(
        KEY_APPOINTMENT_TYPE.to_string(),
        appointment.appointment_type.as_str().to_string(),
    );

    GoogleCalendarEvent {
        id: None,
        summary: Some(appointment.title.clone()),
        start,
        end,
        reminders: Some(CalendarEventReminders { use_default: true }),
        location: appointment.location(options).map(ToOwned::to_owned),
        extended_properties: Some(CalendarEventExtendedProperties { private }),
    }
}

fn all_day(date: NaiveDate, time_zone: &str) -> CalendarEventDateTime {
    CalendarEventDateTime {
        date_time: None,
        date: Some(date.format(DATE_FORMAT).to_string()),
        time_zone: Some(time_zone.to_string()),
    }
}

fn timed(value: NaiveDateTime, time_zone: &str) -> CalendarEventDateTime {
    CalendarEventDateTime {
        date_time: Some(value.format(DATE_TIME_FORMAT).to_string()),
        date: None,
        time_zone: Some(time_zone.to_string()),
    }
}

/// MD5 over the compact JSON of the encoded event. Any change to title, type, begin or
/// end (or to the rendering options) yields a new key.
pub fn appointment_checksum(appointment: &Appointment, options: &EventOptions) -> Result<String, InfraError> {
    let canonical = serde_json::to_string(&encode_appointment_event(appointment, options))?;
    Ok(format!("{:x}", md5::compute(canonical.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AppointmentType;
    use proptest::prelude::*;

    fn at(value: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M").expect("valid datetime")
    }

    fn options() -> EventOptions {
        EventOptions {
            time_zone: chrono_tz::Europe::Amsterdam,
            exams_all_day: true,
            campus_location: "Niels Bohrweg 1, Leiden".to_string(),
        }
    }

    fn sample(appointment_type: AppointmentType) -> Appointment {
        Appointment::new("Algorithms", appointment_type, at("2024-09-02T09:00"), at("2024-09-02T10:45"))
    }

    #[test]
    fn timed_event_carries_datetime_zone_and_location() {
        let event = encode_appointment_event(&sample(AppointmentType::Campus), &options());

        assert_eq!(event.summary.as_deref(), Some("Algorithms"));
        assert_eq!(event.start.date_time.as_deref(), Some("2024-09-02T09:00:00"));
        assert_eq!(event.end.date_time.as_deref(), Some("2024-09-02T10:45:00"));
        assert_eq!(event.start.time_zone.as_deref(), Some("Europe/Amsterdam"));
        assert!(event.start.date.is_none());
        assert_eq!(event.location.as_deref(), Some("Niels Bohrweg 1, Leiden"));
        assert_eq!(event.reminders, Some(CalendarEventReminders { use_default: true }));
    }

    #[test]
    fn all_day_event_bumps_exclusive_end_date() {
        let holiday = Appointment::new(
            "Christmas break",
            AppointmentType::Holiday,
            at("2024-12-23T09:15"),
            at("2024-12-25T18:00"),
        );
        let event = encode_appointment_event(&holiday, &options());

        assert_eq!(event.start.date.as_deref(), Some("2024-12-23"));
        assert_eq!(event.end.date.as_deref(), Some("2024-12-26"));
        assert!(event.start.date_time.is_none());
        assert!(event.location.is_none());
    }

    #[test]
    fn serialized_payload_uses_calendar_api_field_names() {
        let event = encode_appointment_event(&sample(AppointmentType::Online), &options());
        let json = serde_json::to_value(&event).expect("serialize event");

        assert_eq!(json["start"]["dateTime"], "2024-09-02T09:00:00");
        assert_eq!(json["reminders"]["useDefault"], true);
        assert_eq!(json["extendedProperties"]["private"][KEY_APPOINTMENT_TYPE], "ONLINE");
        assert!(json.get("id").is_none());
        assert!(json.get("location").is_none());
    }

    #[test]
    fn checksum_ignores_remote_id_but_tracks_type() {
        let opts = EventOptions {
            exams_all_day: false,
            ..options()
        };
        let online = sample(AppointmentType::Online);
        let mut bound = online.clone();
        bound.remote_event_id = Some("evt-1".to_string());

        let checksum = appointment_checksum(&online, &opts).expect("checksum");
        assert_eq!(checksum.len(), 32);
        assert_eq!(checksum, appointment_checksum(&bound, &opts).expect("checksum"));
        assert_ne!(
            checksum,
            appointment_checksum(&sample(AppointmentType::Exam), &opts).expect("checksum")
        );
    }

    fn arb_appointment() -> impl Strategy<Value = Appointment> {
        ("[A-Za-z ]{1,24}", 0i64..400, 0i64..600, 1i64..240).prop_map(|(title, day, minute, length)| {
            let begin = at("2024-01-01T00:00") + chrono::Duration::days(day) + chrono::Duration::minutes(minute);
            Appointment::new(title, AppointmentType::Campus, begin, begin + chrono::Duration::minutes(length))
        })
    }

    proptest! {
        #[test]
        fn checksum_is_stable_and_sensitive_to_every_field(appointment in arb_appointment()) {
            let opts = options();
            let checksum = appointment_checksum(&appointment, &opts).expect("checksum");
            prop_assert_eq!(&checksum, &appointment_checksum(&appointment.clone(), &opts).expect("checksum"));

            let mut retitled = appointment.clone();
            retitled.title.push('!');
            let mut moved = appointment.clone();
            moved.begin_time -= chrono::Duration::minutes(5);
            let mut extended = appointment.clone();
            extended.end_time += chrono::Duration::minutes(5);

            for changed in [retitled, moved, extended] {
                prop_assert_ne!(&checksum, &appointment_checksum(&changed, &opts).expect("checksum"));
            }
        }
    }
}
