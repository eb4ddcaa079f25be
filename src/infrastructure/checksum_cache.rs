use crate::infrastructure::error::InfraError;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

const DATE_FORMAT: &str = "%Y-%m-%d";
const UNKNOWN_DATE: &str = "-";

/// One remote event tracked under the checksum of the appointment that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub remote_event_id: String,
    pub end_date: Option<NaiveDate>,
    pub historic: bool,
}

impl CacheEntry {
    pub fn new(remote_event_id: impl Into<String>, end_date: Option<NaiveDate>, today: NaiveDate) -> Self {
        Self {
            remote_event_id: remote_event_id.into(),
            end_date,
            historic: is_historic(end_date, today),
        }
    }
}

/// Unknown end dates are never historic, so such entries stay eligible for deletion.
fn is_historic(end_date: Option<NaiveDate>, today: NaiveDate) -> bool {
    end_date.is_some_and(|end_date| end_date < today)
}

pub trait ChecksumCacheStore: Send + Sync {
    /// Loads every entry, deriving `historic` against `today`. A missing store is empty.
    fn load(&self, today: NaiveDate) -> Result<HashMap<String, CacheEntry>, InfraError>;
    fn save(&self, entries: &BTreeMap<String, CacheEntry>) -> Result<(), InfraError>;
}

pub fn parse_cache(contents: &str, today: NaiveDate) -> HashMap<String, CacheEntry> {
    let mut entries = HashMap::new();
    for (index, line) in contents.lines().enumerate() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [] => continue,
            [checksum, remote_event_id] => {
                entries.insert(checksum.to_string(), CacheEntry::new(*remote_event_id, None, today));
            }
            [checksum, remote_event_id, end_date, rest @ ..] => {
                if !rest.is_empty() {
                    warn!(line = index + 1, "cache line has extra fields; ignoring them");
                }
                let parsed = NaiveDate::parse_from_str(end_date, DATE_FORMAT).ok();
                if parsed.is_none() && *end_date != UNKNOWN_DATE {
                    warn!(line = index + 1, end_date = *end_date, "unparsable end date in cache; treating as not historic");
                }
                entries.insert(checksum.to_string(), CacheEntry::new(*remote_event_id, parsed, today));
            }
            _ => warn!(line = index + 1, "malformed cache line skipped"),
        }
    }
    entries
}

pub fn render_cache(entries: &BTreeMap<String, CacheEntry>) -> String {
    entries
        .iter()
        .map(|(checksum, entry)| {
            let end_date = entry
                .end_date
                .map(|date| date.format(DATE_FORMAT).to_string())
                .unwrap_or_else(|| UNKNOWN_DATE.to_string());
            format!("{checksum} {} {end_date}\n", entry.remote_event_id)
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct FileChecksumCacheStore {
    path: PathBuf,
}

impl FileChecksumCacheStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ChecksumCacheStore for FileChecksumCacheStore {
    fn load(&self, today: NaiveDate) -> Result<HashMap<String, CacheEntry>, InfraError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no cache file found");
                return Ok(HashMap::new());
            }
            Err(error) => return Err(error.into()),
        };
        let entries = parse_cache(&contents, today);
        debug!(path = %self.path.display(), count = entries.len(), "loaded cached appointments");
        Ok(entries)
    }

    fn save(&self, entries: &BTreeMap<String, CacheEntry>) -> Result<(), InfraError> {
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let staging = self.path.with_extension("tmp");
        fs::write(&staging, render_cache(entries))?;
        fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryChecksumCacheStore {
    lines: Mutex<Option<String>>,
}

impl ChecksumCacheStore for InMemoryChecksumCacheStore {
    fn load(&self, today: NaiveDate) -> Result<HashMap<String, CacheEntry>, InfraError> {
        let lines = self
            .lines
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("checksum cache lock poisoned: {error}")))?;
        Ok(lines
            .as_deref()
            .map(|contents| parse_cache(contents, today))
            .unwrap_or_default())
    }

    fn save(&self, entries: &BTreeMap<String, CacheEntry>) -> Result<(), InfraError> {
        let mut lines = self
            .lines
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("checksum cache lock poisoned: {error}")))?;
        *lines = Some(render_cache(entries));
        Ok(())
    }
}
