//! Shell errors and their HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use appshell_core::auth::AuthError;
use appshell_core::config::ConfigError;
use appshell_core::secret::SecretError;
use appshell_core::templates::TemplateError;

#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Page '{0}' is in the page table but has no handler")]
    MissingHandler(String),

    #[error("Invalid method '{method}' for page '{page}'")]
    InvalidMethod { page: String, method: String },

    #[error("Invalid route '{route}' for page '{page}': {reason}")]
    InvalidRoute {
        page: String,
        route: String,
        reason: &'static str,
    },

    #[error("Route '{route}' of page '{page}' is already registered")]
    DuplicateRoute { page: String, route: String },

    #[error("auth mode is radius but [auth.radius] is missing")]
    MissingRadiusConfig,

    #[error("Shell is not initialized")]
    NotInitialized,

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for ShellError {
    fn into_response(self) -> Response {
        let status = match &self {
            ShellError::Template(TemplateError::NotFound(_)) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::error!(status = ?status, "Request failed: {}", self);
        return_error(status)
    }
}

/// Bare status response with the canonical reason as body
pub fn return_error(status: StatusCode) -> Response {
    (status, status.canonical_reason().unwrap_or("Error")).into_response()
}
