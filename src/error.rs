use thiserror::Error;

#[derive(Debug, Error)]
pub enum DashboardError {
    /// Non-success status or transport failure. `status` is `None` when no
    /// response arrived at all.
    #[error("{message}")]
    Fetch { status: Option<u16>, message: String },

    #[error("could not parse server response")]
    Parse { raw: String },

    #[error("{action} failed: {message}")]
    Action { action: String, message: String },

    #[error("failed to write export: {0}")]
    Io(#[from] std::io::Error),

    #[error("export is not valid CSV: {0}")]
    Csv(#[from] csv::Error),
}

impl DashboardError {
    pub fn action(action: impl Into<String>, message: impl Into<String>) -> Self {
        DashboardError::Action {
            action: action.into(),
            message: message.into(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            DashboardError::Fetch { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for DashboardError {
    fn from(err: reqwest::Error) -> Self {
        DashboardError::Fetch {
            status: err.status().map(|status| status.as_u16()),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DashboardError>;
