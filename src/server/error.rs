use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, error};

pub type AppResult<T> = Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("gatekeeper error: {0}")]
    Gatekeeper(String),

    #[error("upstream responded with {0}")]
    Upstream(StatusCode),

    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("upstream timed out")]
    Timeout,

    #[error("no mirror is available, channel looks offline")]
    NoneAvailable,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("platform resolution failed: {0}")]
    Platform(String),

    #[error("internal server error")]
    InternalServerError,

    #[error("{0}")]
    InternalServerErrorWithContext(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NoneAvailable | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            // a 4xx from the origin is the client's problem so it goes back as-is, anything
            // else (5xx, an unfollowed 3xx) is ours to report as a bad gateway
            Self::Upstream(status) if status.is_client_error() => *status,
            Self::Upstream(_)
            | Self::UpstreamUnreachable(_)
            | Self::Gatekeeper(_)
            | Self::Platform(_) => StatusCode::BAD_GATEWAY,
            Self::InternalServerError
            | Self::InternalServerErrorWithContext(_)
            | Self::Anyhow(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            error!("request failed with {}: {}", status, self);
        } else {
            debug!("request rejected with {}: {}", status, self);
        }

        // internals don't leak their context to the player
        let message = match &self {
            Self::InternalServerErrorWithContext(_) | Self::Anyhow(_) => {
                Self::InternalServerError.to_string()
            }
            _ => self.to_string(),
        };

        let mut response = (status, Json(json!({ "error": message }))).into_response();
        // players read the failure from js so errors need cors as much as successes do
        response.headers_mut().insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Error::InvalidUrl("x".into()), StatusCode::BAD_REQUEST)]
    #[case(Error::Forbidden("x".into()), StatusCode::FORBIDDEN)]
    #[case(Error::Gatekeeper("x".into()), StatusCode::BAD_GATEWAY)]
    #[case(Error::Upstream(StatusCode::NOT_FOUND), StatusCode::NOT_FOUND)]
    #[case(Error::Upstream(StatusCode::SERVICE_UNAVAILABLE), StatusCode::BAD_GATEWAY)]
    #[case(Error::Upstream(StatusCode::FOUND), StatusCode::BAD_GATEWAY)]
    #[case(Error::Timeout, StatusCode::GATEWAY_TIMEOUT)]
    #[case(Error::NoneAvailable, StatusCode::NOT_FOUND)]
    fn maps_errors_to_status(#[case] error: Error, #[case] expected: StatusCode) {
        assert_eq!(error.status_code(), expected);
    }

    #[test]
    fn error_responses_carry_cors() {
        let response = Error::Forbidden("evil.example".into()).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN),
            Some(&HeaderValue::from_static("*"))
        );
    }
}
