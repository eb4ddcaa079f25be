use crate::domain::grid::{column_index, CellPosition, ScanRegion};
use crate::domain::models::EventOptions;
use crate::domain::time_slots::{TimeSlotResolver, TimeTable};
use crate::infrastructure::error::InfraError;
use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_DIR: &str = "config";
pub const STATE_DIR: &str = "state";
pub const SCHEDULE_JSON: &str = "schedule.json";
const SUPPORTED_SCHEMA: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeTableConfig {
    pub begin: Vec<String>,
    pub end: Vec<String>,
}

impl TimeTableConfig {
    fn new(begin: &[&str], end: &[&str]) -> Self {
        Self {
            begin: begin.iter().map(|value| value.to_string()).collect(),
            end: end.iter().map(|value| value.to_string()).collect(),
        }
    }

    fn parse(&self, label: &str) -> Result<TimeTable, InfraError> {
        let begin: Vec<&str> = self.begin.iter().map(String::as_str).collect();
        let end: Vec<&str> = self.end.iter().map(String::as_str).collect();
        TimeTable::from_hhmm(&begin, &end)
            .map_err(|message| InfraError::InvalidConfig(format!("timeTables.{label}: {message}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeTablesConfig {
    pub campus: TimeTableConfig,
    pub online: TimeTableConfig,
}

/// On-disk shape of `config/schedule.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConfig {
    pub schema: u8,
    pub schedule_path: String,
    pub calendar_id: String,
    pub timezone: String,
    pub first_date: NaiveDate,
    /// Cell such as `B3` holding each sheet's reference date. Falls back to `first_date`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_date_cell: Option<String>,
    pub first_row: u32,
    #[serde(default)]
    pub last_row: Option<u32>,
    pub first_column: String,
    pub last_column: String,
    #[serde(default)]
    pub sheets: Option<Vec<String>>,
    #[serde(default)]
    pub exams_all_day: bool,
    #[serde(default)]
    pub campus_location: String,
    pub time_tables: TimeTablesConfig,
    pub cache_file: String,
    pub token_file: String,
    pub client_secrets_file: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            schema: 1,
            schedule_path: "rooster.xlsx".to_string(),
            calendar_id: "primary".to_string(),
            timezone: "Europe/Amsterdam".to_string(),
            first_date: NaiveDate::from_ymd_opt(2020, 8, 31).unwrap_or_default(),
            first_date_cell: None,
            first_row: 3,
            last_row: Some(56),
            first_column: "C".to_string(),
            last_column: "AU".to_string(),
            sheets: None,
            exams_all_day: true,
            campus_location: String::new(),
            time_tables: TimeTablesConfig {
                campus: TimeTableConfig::new(
                    &["09:00", "10:00", "11:00", "12:00", "13:30", "14:30", "15:30", "16:30", "17:30"],
                    &["09:45", "10:45", "11:45", "12:45", "14:15", "15:15", "16:15", "17:15", "18:15"],
                ),
                online: TimeTableConfig::new(
                    &["09:15", "10:15", "11:15", "12:15", "13:15", "14:15", "15:15", "16:15", "17:15"],
                    &["10:00", "11:00", "12:00", "13:00", "14:00", "15:00", "16:00", "17:00", "18:00"],
                ),
            },
            cache_file: format!("{STATE_DIR}/storage"),
            token_file: format!("{STATE_DIR}/token.json"),
            client_secrets_file: format!("{CONFIG_DIR}/credentials.json"),
        }
    }
}

/// Validated, typed view of [`ScheduleConfig`] with paths resolved against the workspace root.
#[derive(Debug, Clone)]
pub struct Settings {
    pub workspace_root: PathBuf,
    pub schedule_path: PathBuf,
    pub calendar_id: String,
    pub region: ScanRegion,
    pub resolver: TimeSlotResolver,
    pub event_options: EventOptions,
    pub sheets: Option<Vec<String>>,
    pub cache_file: PathBuf,
    pub token_file: PathBuf,
    pub client_secrets_file: PathBuf,
}

impl ScheduleConfig {
    pub fn resolve(&self, workspace_root: &Path) -> Result<Settings, InfraError> {
        let calendar_id = self.calendar_id.trim();
        if calendar_id.is_empty() {
            return Err(InfraError::InvalidConfig("calendarId must not be empty".to_string()));
        }
        let time_zone = self
            .timezone
            .trim()
            .parse::<Tz>()
            .map_err(|error| InfraError::InvalidConfig(format!("invalid timezone '{}': {error}", self.timezone)))?;

        let first_column = parse_column(&self.first_column, "firstColumn")?;
        let last_column = parse_column(&self.last_column, "lastColumn")?;
        if first_column > last_column {
            return Err(InfraError::InvalidConfig(format!(
                "firstColumn {} is right of lastColumn {}",
                self.first_column, self.last_column
            )));
        }
        if self.first_row == 0 {
            return Err(InfraError::InvalidConfig("firstRow must be at least 1".to_string()));
        }
        let first_date_cell = self
            .first_date_cell
            .as_deref()
            .map(str::trim)
            .filter(|reference| !reference.is_empty())
            .map(|reference| {
                CellPosition::from_a1(reference).ok_or_else(|| {
                    InfraError::InvalidConfig(format!("firstDateCell must be an A1 reference, got '{reference}'"))
                })
            })
            .transpose()?;
        if let Some(last_row) = self.last_row.filter(|last_row| *last_row < self.first_row) {
            return Err(InfraError::InvalidConfig(format!(
                "lastRow {last_row} is above firstRow {}",
                self.first_row
            )));
        }

        Ok(Settings {
            workspace_root: workspace_root.to_path_buf(),
            schedule_path: resolve_path(workspace_root, &self.schedule_path),
            calendar_id: calendar_id.to_string(),
            region: ScanRegion {
                first_row: self.first_row,
                last_row: self.last_row,
                first_column,
                last_column,
            },
            resolver: TimeSlotResolver {
                first_date: self.first_date,
                first_date_cell,
                first_row: self.first_row,
                first_column,
                campus: self.time_tables.campus.parse("campus")?,
                online: self.time_tables.online.parse("online")?,
            },
            event_options: EventOptions {
                time_zone,
                exams_all_day: self.exams_all_day,
                campus_location: self.campus_location.trim().to_string(),
            },
            sheets: self.sheets.clone().filter(|sheets| !sheets.is_empty()),
            cache_file: resolve_path(workspace_root, &self.cache_file),
            token_file: resolve_path(workspace_root, &self.token_file),
            client_secrets_file: resolve_path(workspace_root, &self.client_secrets_file),
        })
    }
}

fn parse_column(letters: &str, field: &str) -> Result<u32, InfraError> {
    column_index(letters.trim())
        .ok_or_else(|| InfraError::InvalidConfig(format!("{field} must be column letters, got '{letters}'")))
}

fn resolve_path(workspace_root: &Path, value: &str) -> PathBuf {
    let path = Path::new(value.trim());
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace_root.join(path)
    }
}

/// The workspace root is the directory holding `config/`. A bare file name resolves to the
/// current directory.
pub fn workspace_root_for(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .and_then(Path::parent)
        .filter(|root| !root.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn default_config_path(workspace_root: &Path) -> PathBuf {
    workspace_root.join(CONFIG_DIR).join(SCHEDULE_JSON)
}

/// Writes the default config unless a file already exists. Returns whether it wrote one.
pub fn ensure_default_config(path: &Path) -> Result<bool, InfraError> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let formatted = serde_json::to_string_pretty(&ScheduleConfig::default())?;
    fs::write(path, format!("{formatted}\n"))?;
    Ok(true)
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SUPPORTED_SCHEMA {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_config(path: &Path) -> Result<ScheduleConfig, InfraError> {
    let value = read_config(path)?;
    serde_json::from_value(value)
        .map_err(|error| InfraError::InvalidConfig(format!("{}: {error}", path.display())))
}

/// Loads and validates the config at `path`, resolving relative paths against its workspace.
pub fn load_settings(path: &Path) -> Result<Settings, InfraError> {
    load_config(path)?.resolve(&workspace_root_for(path))
}

/// OAuth client registration from Google's downloaded `credentials.json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    pub auth_uri: Option<String>,
    pub token_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

pub fn parse_client_secrets(raw: &str) -> Result<ClientSecrets, InfraError> {
    let file: ClientSecretsFile = serde_json::from_str(raw)?;
    let secrets = file.installed.or(file.web).ok_or_else(|| {
        InfraError::InvalidConfig("client secrets must contain an 'installed' or 'web' section".to_string())
    })?;
    if secrets.client_id.trim().is_empty() {
        return Err(InfraError::InvalidConfig("client secrets have an empty client_id".to_string()));
    }
    Ok(secrets)
}

pub fn load_client_secrets(path: &Path) -> Result<ClientSecrets, InfraError> {
    let raw = fs::read_to_string(path).map_err(|error| {
        InfraError::InvalidConfig(format!("cannot read client secrets {}: {error}", path.display()))
    })?;
    parse_client_secrets(&raw)
}
