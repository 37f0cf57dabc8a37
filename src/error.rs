//! Errors as seen by a client.
//!
//! Handlers return [`AppError`], which decides on the status code and logs every failure
//! once, right before it is turned into a response.

use axum::extract::multipart::MultipartError;
use axum::extract::multipart::MultipartRejection;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::http::header::CONTENT_RANGE;
use axum::response::IntoResponse;
use axum::response::Response;

use crate::range::InvalidRange;
use crate::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Unable to parse form: {0}")]
    BadForm(#[from] MultipartRejection),

    #[error("Unable to read form: {0}")]
    Multipart(#[from] MultipartError),

    #[error("No file in the `video` field")]
    MissingFile,

    #[error("Upload is too large, it must be smaller than {limit} bytes")]
    TooLarge { limit: u64 },

    #[error(transparent)]
    Range(#[from] InvalidRange),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl AppError {
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadForm(_) | Self::Multipart(_) | Self::MissingFile | Self::TooLarge { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::Range(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::Storage(StorageError::InvalidName(_)) => StatusCode::BAD_REQUEST,
            Self::Storage(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Storage(StorageError::Io { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        match &self {
            Self::Range(invalid) => {
                tracing::warn!("{self}");

                let mut response = (status, "Requested Range Not Satisfiable").into_response();

                match HeaderValue::from_str(&invalid.content_range()) {
                    Ok(content_range) => {
                        response.headers_mut().insert(CONTENT_RANGE, content_range);
                    }

                    Err(err) => {
                        tracing::warn!("Could not set content range header: {err}");
                    }
                }

                response
            }

            // paths and OS errors stay in the logs
            Self::Storage(StorageError::Io { .. }) => {
                tracing::error!("{self}");

                (status, "Internal Server Error").into_response()
            }

            _ => {
                tracing::warn!("{self}");

                (status, self.to_string()).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::path::PathBuf;

    use axum::body::to_bytes;

    use super::*;

    async fn body(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn invalid_range_is_416_with_total() {
        let response = AppError::from(InvalidRange {
            reason: "start is after end",
            total: 1000,
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[CONTENT_RANGE], "bytes */1000");
        assert_eq!(body(response).await, "Requested Range Not Satisfiable");
    }

    #[tokio::test]
    async fn io_errors_do_not_leak_paths() {
        let response = AppError::from(StorageError::Io {
            op: "seek",
            path: PathBuf::from("/srv/videos/a.mp4"),
            source: io::Error::other("device gone"),
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body(response).await, "Internal Server Error");
    }

    #[test]
    fn client_errors() {
        assert_eq!(AppError::MissingFile.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::TooLarge { limit: 10 }.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(StorageError::InvalidName(String::from(".."))).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(StorageError::NotFound(String::from("a.mp4"))).status(),
            StatusCode::NOT_FOUND
        );
    }
}
