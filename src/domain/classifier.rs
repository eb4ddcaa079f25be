use crate::domain::models::AppointmentType;
use std::fmt;

const RGB_CAMPUS: &str = "FF5B9BD5";
const RGB_ONLINE: &str = "00000000";
const RGB_HOLIDAY: &str = "FFFFC000";
const THEME_CAMPUS: u32 = 8;
const THEME_EXAM: u32 = 5;
const THEME_HOLIDAY: u32 = 7;

/// Foreground colour of a cell fill, as stored in the workbook's style table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FillColor {
    Rgb(String),
    Theme(u32),
    Indexed(u32),
}

impl FillColor {
    pub fn rgb(hex: impl AsRef<str>) -> Self {
        FillColor::Rgb(hex.as_ref().trim().to_ascii_uppercase())
    }

    fn is_rgb(&self, expected: &str) -> bool {
        matches!(self, FillColor::Rgb(value) if value == expected)
    }

    fn is_theme(&self, expected: u32) -> bool {
        matches!(self, FillColor::Theme(value) if *value == expected)
    }
}

/// Cells without an explicit foreground colour read back as transparent black.
impl Default for FillColor {
    fn default() -> Self {
        FillColor::Rgb(RGB_ONLINE.to_string())
    }
}

impl fmt::Display for FillColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FillColor::Rgb(value) => write!(f, "rgb:{value}"),
            FillColor::Theme(value) => write!(f, "theme:{value}"),
            FillColor::Indexed(value) => write!(f, "indexed:{value}"),
        }
    }
}

/// Maps a fill colour to an appointment category. Rule order matters: campus and exam
/// are checked before online and holiday. `None` means the colour is not recognised.
pub fn classify_fill(fill: &FillColor) -> Option<AppointmentType> {
    if fill.is_rgb(RGB_CAMPUS) || fill.is_theme(THEME_CAMPUS) {
        Some(AppointmentType::Campus)
    } else if fill.is_theme(THEME_EXAM) {
        Some(AppointmentType::Exam)
    } else if fill.is_rgb(RGB_ONLINE) {
        Some(AppointmentType::Online)
    } else if fill.is_rgb(RGB_HOLIDAY) || fill.is_theme(THEME_HOLIDAY) {
        Some(AppointmentType::Holiday)
    } else {
        None
    }
}

pub fn classify_cell(value: Option<&str>, fill: &FillColor) -> AppointmentType {
    let has_value = value.map(str::trim).is_some_and(|value| !value.is_empty());
    if !has_value {
        return AppointmentType::Empty;
    }
    classify_fill(fill).unwrap_or(AppointmentType::Empty)
}
