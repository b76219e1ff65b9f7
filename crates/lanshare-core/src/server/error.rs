//! 请求错误与 HTTP 响应映射

use crate::fs::PathError;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};

/// 请求处理的终止错误
///
/// 响应体只包含简短的状态描述，不会泄露内部路径或错误细节。
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("forbidden path")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("method {0} not allowed")]
    MethodNotAllowed(String),

    #[error("range not satisfiable for size {size}")]
    RangeNotSatisfiable { size: u64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServeError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServeError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServeError::Forbidden => StatusCode::FORBIDDEN,
            ServeError::NotFound => StatusCode::NOT_FOUND,
            ServeError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            ServeError::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            ServeError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PathError> for ServeError {
    fn from(e: PathError) -> Self {
        match e {
            PathError::Forbidden(_) => ServeError::Forbidden,
            PathError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ServeError::NotFound,
            PathError::Io(e) => ServeError::Io(e),
        }
    }
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = status.canonical_reason().unwrap_or("Error");
        let mut response = (status, body).into_response();

        match &self {
            ServeError::MethodNotAllowed(_) => {
                response
                    .headers_mut()
                    .insert(header::ALLOW, HeaderValue::from_static("GET"));
            }
            ServeError::RangeNotSatisfiable { size } => {
                if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
                    response.headers_mut().insert(header::CONTENT_RANGE, value);
                }
            }
            _ => {}
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ServeError::from(PathError::Forbidden(PathBuf::from("/etc"))).status(),
            StatusCode::FORBIDDEN
        );
        let missing = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert_eq!(
            ServeError::from(PathError::Io(missing)).status(),
            StatusCode::NOT_FOUND
        );
        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert_eq!(
            ServeError::from(PathError::Io(denied)).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_response_headers() {
        let response = ServeError::MethodNotAllowed("POST".into()).into_response();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "GET");

        let response = ServeError::RangeNotSatisfiable { size: 100 }.into_response();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */100");
    }

    #[test]
    fn test_error_body_hides_details() {
        let err = ServeError::Io(std::io::Error::other("/home/user/secret: EIO"));
        let response = err.into_response();
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
