use crate::domain::grid::CellPosition;
use crate::domain::models::AppointmentType;
use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime};

pub const SLOTS_PER_DAY: u32 = 9;
const DAYS_PER_WEEK: u32 = 7;
pub const SHEET_DATE_FORMAT: &str = "%d/%m/%y";
const LAST_EXCEL_SERIAL: f64 = 2_958_465.0;

/// Reads a date cell as written by spreadsheet tools: either an Excel serial day number
/// (1900 date system) or `dd/mm/yy` text.
pub fn parse_sheet_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if let Ok(serial) = value.parse::<f64>() {
        if !(1.0..=LAST_EXCEL_SERIAL).contains(&serial) {
            return None;
        }
        // Serial 60 is the phantom 1900-02-29, so counting from 1899-12-30 is exact after it.
        let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
        return epoch.checked_add_days(Days::new(serial.trunc() as u64));
    }
    NaiveDate::parse_from_str(value, SHEET_DATE_FORMAT).ok()
}

/// Begin and end times for the nine daily slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeTable {
    pub begin: [NaiveTime; SLOTS_PER_DAY as usize],
    pub end: [NaiveTime; SLOTS_PER_DAY as usize],
}

impl TimeTable {
    pub fn from_hhmm(begin: &[&str], end: &[&str]) -> Result<Self, String> {
        Ok(Self {
            begin: parse_slots(begin, "begin")?,
            end: parse_slots(end, "end")?,
        })
    }
}

fn parse_slots(values: &[&str], label: &str) -> Result<[NaiveTime; SLOTS_PER_DAY as usize], String> {
    if values.len() != SLOTS_PER_DAY as usize {
        return Err(format!(
            "{label} time table must have {SLOTS_PER_DAY} entries, found {}",
            values.len()
        ));
    }
    let mut slots = [NaiveTime::MIN; SLOTS_PER_DAY as usize];
    for (slot, value) in slots.iter_mut().zip(values) {
        *slot = NaiveTime::parse_from_str(value.trim(), "%H:%M")
            .map_err(|error| format!("{label} time '{value}' must be HH:MM: {error}"))?;
    }
    Ok(slots)
}

/// Turns grid positions into wall-clock timestamps. Campus cells use the campus table,
/// every other category uses the online table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSlotResolver {
    pub first_date: NaiveDate,
    /// Cell holding the reference date on each sheet. Overrides `first_date` when readable.
    pub first_date_cell: Option<CellPosition>,
    pub first_row: u32,
    pub first_column: u32,
    pub campus: TimeTable,
    pub online: TimeTable,
}

impl TimeSlotResolver {
    pub fn date_at(&self, position: CellPosition) -> NaiveDate {
        let weeks = position.row.saturating_sub(self.first_row);
        let column_offset = position.column.saturating_sub(self.first_column);
        let days = weeks * DAYS_PER_WEEK + column_offset / SLOTS_PER_DAY;
        self.first_date
            .checked_add_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MAX)
    }

    pub fn slot_index(&self, column: u32) -> usize {
        (column.saturating_sub(self.first_column) % SLOTS_PER_DAY) as usize
    }

    fn table(&self, appointment_type: AppointmentType) -> &TimeTable {
        match appointment_type {
            AppointmentType::Campus => &self.campus,
            _ => &self.online,
        }
    }

    pub fn begin_time(&self, first: CellPosition, appointment_type: AppointmentType) -> NaiveDateTime {
        let time = self.table(appointment_type).begin[self.slot_index(first.column)];
        self.date_at(first).and_time(time)
    }

    /// End of a cell, taken from its last (bottom-right) position.
    pub fn end_time(&self, last: CellPosition, appointment_type: AppointmentType) -> NaiveDateTime {
        let time = self.table(appointment_type).end[self.slot_index(last.column)];
        self.date_at(last).and_time(time)
    }
}
