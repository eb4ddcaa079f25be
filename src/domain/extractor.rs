use crate::domain::classifier::classify_cell;
use crate::domain::grid::{Grid, LogicalCell, ScanRegion};
use crate::domain::models::{Appointment, AppointmentType};
use crate::domain::time_slots::{parse_sheet_date, TimeSlotResolver};
use std::borrow::Cow;
use tracing::{debug, warn};

pub const TITLE_SEPARATOR: &str = " / ";

pub fn split_titles(value: Option<&str>) -> Vec<String> {
    value
        .map(|value| {
            value
                .split(TITLE_SEPARATOR)
                .map(str::trim)
                .filter(|title| !title.is_empty())
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

/// Accumulator threaded through the walk. `open` holds the appointments of the previous
/// non-empty cell that may still be extended by the current one.
#[derive(Debug, Default)]
struct ExtractionState {
    finished: Vec<Appointment>,
    open: Vec<Appointment>,
}

impl ExtractionState {
    fn flush(mut self) -> Self {
        self.finished.append(&mut self.open);
        self
    }

    fn advance(mut self, cell: LogicalCell, resolver: &TimeSlotResolver) -> Self {
        let titles = split_titles(cell.value.as_deref());
        if titles.is_empty() {
            return self.flush();
        }

        let appointment_type = classify_cell(cell.value.as_deref(), &cell.fill);
        if appointment_type == AppointmentType::Empty {
            warn!(
                value = cell.value.as_deref().unwrap_or_default(),
                row = cell.first_row,
                column = cell.first_column,
                color = %cell.fill,
                "failed to determine appointment type; skipping cell"
            );
            return self.flush();
        }

        let begin_time = resolver.begin_time(cell.first(), appointment_type);
        let end_time = resolver.end_time(cell.last(), appointment_type);

        let mut current = Vec::with_capacity(titles.len());
        for title in titles {
            let continued = self.open.iter().position(|previous| {
                previous.title == title && previous.appointment_type == appointment_type
            });
            match continued {
                Some(index) => {
                    let mut appointment = self.open.remove(index);
                    appointment.end_time = end_time;
                    current.push(appointment);
                }
                None => current.push(Appointment::new(title, appointment_type, begin_time, end_time)),
            }
        }

        self.finished.append(&mut self.open);
        self.open = current;
        self
    }
}

/// Folds a logical-cell sequence into appointments. Horizontally adjacent cells with the
/// same title and type become one appointment; output is ordered by when each run ended.
pub fn extract_appointments<I>(cells: I, resolver: &TimeSlotResolver) -> Vec<Appointment>
where
    I: IntoIterator<Item = LogicalCell>,
{
    cells
        .into_iter()
        .fold(ExtractionState::default(), |state, cell| state.advance(cell, resolver))
        .flush()
        .finished
}

/// Uses the sheet's own reference date when a date cell is configured. An empty or
/// unreadable cell keeps the configured first date.
fn sheet_resolver<'a>(grid: &Grid, resolver: &'a TimeSlotResolver) -> Cow<'a, TimeSlotResolver> {
    let Some(position) = resolver.first_date_cell else {
        return Cow::Borrowed(resolver);
    };
    let value = grid.cell(position).and_then(|cell| cell.value.as_deref());
    match value.and_then(parse_sheet_date) {
        Some(first_date) => {
            debug!(sheet = grid.name(), %first_date, "read reference date from sheet");
            Cow::Owned(TimeSlotResolver {
                first_date,
                ..resolver.clone()
            })
        }
        None => {
            warn!(
                sheet = grid.name(),
                row = position.row,
                column = position.column,
                value = value.unwrap_or_default(),
                fallback = %resolver.first_date,
                "unreadable reference date; using configured first date"
            );
            Cow::Borrowed(resolver)
        }
    }
}

/// Extracts every sheet independently; runs never continue across sheets.
pub fn extract_from_grids(
    grids: &[Grid],
    region: &ScanRegion,
    resolver: &TimeSlotResolver,
) -> Vec<Appointment> {
    let mut appointments = Vec::new();
    for grid in grids {
        let resolver = sheet_resolver(grid, resolver);
        let extracted = extract_appointments(grid.logical_cells(region), &resolver);
        debug!(sheet = grid.name(), count = extracted.len(), "extracted appointments");
        appointments.extend(extracted);
    }
    appointments
}
