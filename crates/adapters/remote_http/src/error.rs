//! Classification of HTTP failures into [`RemoteErrorKind`]s.

use reqwest::StatusCode;

use autoedge_domain::error::{RemoteError, RemoteErrorKind};

/// Errors raised while building the client.
#[derive(Debug, thiserror::Error)]
pub enum RemoteHttpError {
    #[error("invalid base url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to build http client")]
    Client(#[source] reqwest::Error),
}

/// Map a non-success status to the kind the engine retries on.
pub(crate) fn status_kind(status: StatusCode) -> RemoteErrorKind {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteErrorKind::Forbidden,
        StatusCode::NOT_FOUND => RemoteErrorKind::NotFound,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => RemoteErrorKind::Timeout,
        StatusCode::TOO_MANY_REQUESTS => RemoteErrorKind::Unavailable,
        status if status.is_server_error() => RemoteErrorKind::Unavailable,
        _ => RemoteErrorKind::Rejected,
    }
}

pub(crate) fn transport(err: &reqwest::Error) -> RemoteError {
    let kind = if err.is_timeout() {
        RemoteErrorKind::Timeout
    } else if err.is_decode() {
        RemoteErrorKind::Protocol
    } else if let Some(status) = err.status() {
        status_kind(status)
    } else {
        RemoteErrorKind::Unavailable
    };
    RemoteError::new(kind, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_classify_statuses() {
        assert_eq!(status_kind(StatusCode::UNAUTHORIZED), RemoteErrorKind::Forbidden);
        assert_eq!(status_kind(StatusCode::NOT_FOUND), RemoteErrorKind::NotFound);
        assert_eq!(status_kind(StatusCode::BAD_REQUEST), RemoteErrorKind::Rejected);
        assert_eq!(
            status_kind(StatusCode::SERVICE_UNAVAILABLE),
            RemoteErrorKind::Unavailable
        );
        assert_eq!(
            status_kind(StatusCode::TOO_MANY_REQUESTS),
            RemoteErrorKind::Unavailable
        );
        assert_eq!(status_kind(StatusCode::GATEWAY_TIMEOUT), RemoteErrorKind::Timeout);
    }
}
