//! Error types for the visit counter server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Dependency resolution failed: {0}")]
    Resolution(#[from] tally_inject::Error),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let Error::Resolution(e) = &self;
        tracing::error!(
            dependency = e.type_name(),
            error = %e,
            "Dependency resolution failed"
        );
        let body = json!({
            "error": "dependency_resolution",
            "dependency": e.type_name(),
            "message": self.to_string(),
        });

        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}
