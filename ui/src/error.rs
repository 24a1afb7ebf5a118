use rocket::http::Status;
use rocket::request::Request;
use rocket::response::{self, status::Custom, Responder};
use rocket::serde::json::Json;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DashboardError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Gateway returned {status}: {message}")]
    Gateway { status: u16, message: String },

    #[error("Gateway rejected request: {0}")]
    Rejected(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Prompts can only be edited once per company")]
    EditLimit,

    #[error("Daily audit limit of {0} reached")]
    AuditLimit(u32),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timeout error: operation timed out after {0:?}")]
    Timeout(Duration),
}

impl From<config::ConfigError> for DashboardError {
    fn from(err: config::ConfigError) -> Self {
        DashboardError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DashboardError>;

impl DashboardError {
    pub fn status(&self) -> Status {
        match self {
            DashboardError::Validation(_) => Status::BadRequest,
            DashboardError::EditLimit | DashboardError::AuditLimit(_) => Status::Forbidden,
            DashboardError::NotFound(_) => Status::NotFound,
            DashboardError::Network(_)
            | DashboardError::Gateway { .. }
            | DashboardError::Rejected(_) => Status::BadGateway,
            DashboardError::Timeout(_) => Status::GatewayTimeout,
            _ => Status::InternalServerError,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl<'r> Responder<'r, 'static> for DashboardError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();
        if status.code >= 500 {
            tracing::error!("{} {} failed: {}", req.method(), req.uri(), self);
        }
        Custom(status, Json(ErrorBody { error: self.to_string() })).respond_to(req)
    }
}
