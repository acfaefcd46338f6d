// src/error.rs
use crate::models::Envelope;
use log::error;
use std::convert::Infallible;
use thiserror::Error;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Rejection, Reply};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("upstream responded with {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            // Key-related statuses mean the whole key pool was rejected.
            ApiError::Upstream {
                status: 401 | 403 | 429,
                ..
            } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Upstream { status, .. } if (400..600).contains(status) => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            ApiError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand to clients. Upstream and internal details are
    /// only exposed in development.
    pub fn public_message(&self, expose_details: bool) -> String {
        match self {
            ApiError::Validation(msg) | ApiError::NotFound(msg) => msg.clone(),
            _ if expose_details => self.to_string(),
            ApiError::Upstream { .. } => "Upstream stock service unavailable".to_string(),
            ApiError::Internal(_) => "Internal server error".to_string(),
        }
    }

    pub fn into_reply(self, expose_details: bool) -> Response {
        let envelope: Envelope<()> = Envelope::error(self.public_message(expose_details));
        warp::reply::with_status(warp::reply::json(&envelope), self.status_code()).into_response()
    }
}

/// Renders warp's own rejections (unknown route, bad query, wrong method)
/// with the same JSON envelope the handlers use.
pub async fn handle_rejection(
    err: Rejection,
    expose_details: bool,
) -> Result<impl Reply, Infallible> {
    let (code, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Route not found".to_string())
    } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, format!("Invalid query string: {}", e))
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed".to_string(),
        )
    } else {
        error!("Unhandled rejection: {:?}", err);
        let message = if expose_details {
            format!("Unhandled rejection: {:?}", err)
        } else {
            "Internal server error".to_string()
        };
        (StatusCode::INTERNAL_SERVER_ERROR, message)
    };

    let envelope: Envelope<()> = Envelope::error(message);
    Ok(warp::reply::with_status(warp::reply::json(&envelope), code))
}
