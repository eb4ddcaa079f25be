use crate::application::bootstrap::bootstrap_workspace;
use crate::application::oauth::{OAuthConfig, OAuthManager, CALENDAR_SCOPE};
use crate::application::reconcile::track_appointments;
use crate::application::schedule_sync::{ScheduleSyncService, SyncReport};
use crate::domain::extractor::extract_from_grids;
use crate::domain::grid::Grid;
use crate::domain::models::Appointment;
use crate::infrastructure::checksum_cache::FileChecksumCacheStore;
use crate::infrastructure::config::{load_client_secrets, load_settings, Settings};
use crate::infrastructure::credential_store::{CredentialStore, FileCredentialStore};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::google_calendar_client::ReqwestGoogleCalendarClient;
use crate::infrastructure::oauth_client::ReqwestOAuthClient;
use crate::infrastructure::workbook::load_workbook;
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitResponse {
    pub workspace_root: PathBuf,
    pub config_path: PathBuf,
    pub created_config: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRow {
    pub title: String,
    pub appointment_type: String,
    pub begin: String,
    pub end: String,
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub status: String,
    pub authorization_url: Option<String>,
    pub expires_at: Option<String>,
}

pub fn init_impl(config_path: &Path) -> Result<InitResponse, InfraError> {
    let result = bootstrap_workspace(config_path)?;
    Ok(InitResponse {
        workspace_root: result.workspace_root,
        config_path: result.config_path,
        created_config: result.created_config,
    })
}

/// Keeps the configured sheets in workbook order. Unknown names are reported and skipped.
fn select_sheets(grids: Vec<Grid>, sheets: Option<&[String]>) -> Vec<Grid> {
    let Some(wanted) = sheets else {
        return grids;
    };
    for name in wanted {
        if !grids.iter().any(|grid| grid.name() == name.as_str()) {
            warn!(sheet = %name, "configured sheet not found in workbook");
        }
    }
    grids
        .into_iter()
        .filter(|grid| wanted.iter().any(|name| name.as_str() == grid.name()))
        .collect()
}

pub fn extract_schedule(settings: &Settings) -> Result<Vec<Appointment>, InfraError> {
    let grids = load_workbook(&settings.schedule_path)?;
    let grids = select_sheets(grids, settings.sheets.as_deref());
    let appointments = extract_from_grids(&grids, &settings.region, &settings.resolver);
    info!(
        path = %settings.schedule_path.display(),
        sheets = grids.len(),
        appointments = appointments.len(),
        "extracted schedule"
    );
    Ok(appointments)
}

pub fn preview_impl(config_path: &Path) -> Result<Vec<PreviewRow>, InfraError> {
    let settings = load_settings(config_path)?;
    let appointments = extract_schedule(&settings)?;
    let tracked = track_appointments(appointments, &settings.event_options)?;
    Ok(tracked
        .into_iter()
        .map(|tracked| PreviewRow {
            title: tracked.appointment.title,
            appointment_type: tracked.appointment.appointment_type.to_string(),
            begin: tracked.appointment.begin_time.to_string(),
            end: tracked.appointment.end_time.to_string(),
            checksum: tracked.checksum,
        })
        .collect())
}

pub async fn sync_impl(config_path: &Path, dry_run: bool) -> Result<SyncReport, InfraError> {
    let settings = load_settings(config_path)?;
    let appointments = extract_schedule(&settings)?;

    let service = ScheduleSyncService::new(
        Arc::new(ReqwestGoogleCalendarClient::new()),
        Arc::new(FileChecksumCacheStore::new(&settings.cache_file)),
        settings.event_options.clone(),
    );
    let plan = service.plan(appointments)?;
    if dry_run {
        return Ok(service.dry_run(&plan));
    }
    if plan.is_noop() {
        info!(unchanged = plan.unchanged.len(), "calendar already up to date");
    }

    let access_token = required_access_token(&settings).await?;
    service.apply(&access_token, &settings.calendar_id, plan).await
}

pub async fn auth_impl(config_path: &Path, authorization_code: Option<String>) -> Result<AuthResponse, InfraError> {
    let settings = load_settings(config_path)?;
    let manager = oauth_manager(&settings)?;

    if let Some(code) = authorization_code {
        let token = manager.authenticate_with_code(&code).await?;
        return Ok(AuthResponse {
            status: "authenticated".to_string(),
            authorization_url: None,
            expires_at: Some(token.expires_at.to_rfc3339()),
        });
    }

    let state = format!("schedule-sync-{}", Utc::now().timestamp_micros());
    let authorization_url = manager.build_authorization_url(&state)?;
    Ok(AuthResponse {
        status: "authorization_required".to_string(),
        authorization_url: Some(authorization_url),
        expires_at: None,
    })
}

/// Forgets the stored Google token. Returns whether one was present.
pub fn logout_impl(config_path: &Path) -> Result<bool, InfraError> {
    let settings = load_settings(config_path)?;
    let had_token = settings.token_file.exists();
    FileCredentialStore::new(&settings.token_file).delete_token()?;
    if had_token {
        info!(path = %settings.token_file.display(), "removed stored token");
    }
    Ok(had_token)
}

fn oauth_manager(settings: &Settings) -> Result<OAuthManager<FileCredentialStore, ReqwestOAuthClient>, InfraError> {
    let secrets = load_client_secrets(&settings.client_secrets_file)?;
    let config = OAuthConfig::from_client_secrets(&secrets, vec![CALENDAR_SCOPE.to_string()]);
    let credential_store = Arc::new(FileCredentialStore::new(&settings.token_file));
    let oauth_client = Arc::new(ReqwestOAuthClient::new());
    Ok(OAuthManager::new(config, credential_store, oauth_client))
}

async fn required_access_token(settings: &Settings) -> Result<String, InfraError> {
    let manager = oauth_manager(settings)?;
    manager
        .ensure_access_token()
        .await?
        .into_token()
        .map(|token| token.access_token)
        .ok_or_else(|| {
            InfraError::OAuth("google authentication required; run `schedule-sync auth` first".to_string())
        })
}
