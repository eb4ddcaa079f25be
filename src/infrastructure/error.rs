use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("xml parse error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("xml attribute error: {0}")]
    XmlAttr(#[from] quick_xml::events::attributes::AttrError),
    #[error("invalid workbook: {0}")]
    Workbook(String),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("OAuth error: {0}")]
    OAuth(String),
    #[error("credential store error: {0}")]
    Credential(String),
    #[error("google calendar api error: http {status}; body={body}")]
    CalendarApi { status: u16, body: String },
    #[error("remote event not found")]
    NotFound,
}

impl InfraError {
    pub fn is_transient(&self) -> bool {
        match self {
            InfraError::OAuth(message) => {
                let message = message.to_ascii_lowercase();
                message.contains("network error")
                    || message.contains("timeout")
                    || message.contains("timed out")
                    || message.contains("temporarily unavailable")
                    || message.contains("connection reset")
            }
            InfraError::CalendarApi { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
