/// HTTP error type
///
/// Handlers return `Result<_, ApiError>`; anything coming up from the lower
/// layers as `anyhow::Error` becomes a 500.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::content::RewriteError;
use crate::models::PatchRejected;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// The request body or query string could not be extracted
    #[error("{message}")]
    Rejected { status: StatusCode, message: String },

    /// An external API call failed
    #[error("{message}")]
    Upstream {
        message: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn upstream(message: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Upstream {
            message: message.into(),
            source,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, details) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, None),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, None),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, None),
            ApiError::Rejected { status, .. } => (*status, None),
            ApiError::Upstream { message, source } => {
                log::error!("{}: {:#}", message, source);
                (StatusCode::INTERNAL_SERVER_ERROR, Some(format!("{:#}", source)))
            }
            ApiError::Internal(e) => {
                log::error!("Internal error: {:#}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, Some(format!("{:#}", e)))
            }
        };

        let body = match details {
            Some(details) => json!({ "error": self.to_string(), "details": details }),
            None => json!({ "error": self.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<PatchRejected> for ApiError {
    fn from(err: PatchRejected) -> Self {
        match err {
            PatchRejected::EmptyContent => ApiError::BadRequest(err.to_string()),
            PatchRejected::AlreadyPosted => ApiError::Conflict(err.to_string()),
        }
    }
}

impl From<RewriteError> for ApiError {
    fn from(err: RewriteError) -> Self {
        match err {
            RewriteError::NotCrypto | RewriteError::AlreadyRewritten | RewriteError::AlreadyUsed => {
                ApiError::BadRequest(err.to_string())
            }
            RewriteError::Generation(source) => {
                ApiError::upstream("Rewrite failed. Please check your API key and try again.", source)
            }
            RewriteError::Store(source) => ApiError::Internal(source),
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_variant() {
        let cases = [
            (ApiError::bad_request("x"), StatusCode::BAD_REQUEST),
            (ApiError::not_found("x"), StatusCode::NOT_FOUND),
            (ApiError::Conflict("x".into()), StatusCode::CONFLICT),
            (
                ApiError::Rejected { status: StatusCode::UNSUPPORTED_MEDIA_TYPE, message: "x".into() },
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ),
            (ApiError::upstream("x", anyhow::anyhow!("boom")), StatusCode::INTERNAL_SERVER_ERROR),
            (ApiError::Internal(anyhow::anyhow!("boom")), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn patch_rejections_map_to_client_errors() {
        assert!(matches!(ApiError::from(PatchRejected::EmptyContent), ApiError::BadRequest(_)));
        assert!(matches!(ApiError::from(PatchRejected::AlreadyPosted), ApiError::Conflict(_)));
    }

    #[test]
    fn rewrite_refusals_are_bad_requests() {
        let err = ApiError::from(RewriteError::NotCrypto);
        assert_eq!(err.to_string(), "This post is not crypto/airdrop related");
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
