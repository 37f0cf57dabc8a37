//! Full and partial content responses for stored videos.
//!
//! The body is read from the file in fixed-size chunks while it is being sent. The reader
//! is cut off after exactly the number of bytes announced in `Content-Length`, whatever
//! the size of the file is by then.

use std::io;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

use axum::body::Body;
use axum::http::HeaderMap;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::http::header::ACCEPT_RANGES;
use axum::http::header::CONTENT_LENGTH;
use axum::http::header::CONTENT_RANGE;
use axum::http::header::CONTENT_TYPE;
use axum::http::header::LAST_MODIFIED;
use axum::response::IntoResponse;
use axum::response::Response;
use axum_extra::body::AsyncReadBody;
use httpdate::HttpDate;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt as _;
use tokio::io::AsyncSeekExt as _;
use tokio::io::ReadBuf;
use tokio_util::io::ReaderStream;

use crate::error::AppError;
use crate::range::ByteRange;
use crate::range::parse_range;
use crate::storage::StorageError;
use crate::storage::StoredFile;

/// Size of the chunks a partial body is read in
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Content type when the extension tells us nothing
const DEFAULT_VIDEO_CONTENT_TYPE: &str = "video/mp4";

/// Content type of a video, only `video/*` types are guessed
fn video_content_type(stored: &StoredFile) -> HeaderValue {
    mime_guess::from_path(&stored.path)
        .iter()
        .find(|mime| mime.type_() == mime::VIDEO)
        .and_then(|mime| HeaderValue::from_str(mime.as_ref()).ok())
        .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_VIDEO_CONTENT_TYPE))
}

/// Headers shared by the full and partial responses
fn common_headers(stored: &StoredFile) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, video_content_type(stored));
    headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    if let Some(modified) = stored.modified {
        match HeaderValue::from_str(&HttpDate::from(modified).to_string()) {
            Ok(last_modified) => {
                headers.insert(LAST_MODIFIED, last_modified);
            }

            Err(err) => {
                tracing::warn!("Could not set last modified header: {err}");
            }
        }
    }

    headers
}

/// Respond with the stored video, or the part of it the `Range` header asks for
///
/// # Errors
///
/// Unsatisfiable ranges and failures to seek are returned before anything is sent.
pub async fn serve_video(stored: StoredFile, range: Option<&HeaderValue>) -> Result<Response, AppError> {
    match parse_range(range, stored.size)? {
        Some(range) => serve_partial(stored, range).await,
        None => Ok(serve_full(stored)),
    }
}

fn serve_full(stored: StoredFile) -> Response {
    let mut headers = common_headers(&stored);
    headers.insert(CONTENT_LENGTH, stored.size.into());

    tracing::debug!("Serving all {} bytes of {:?}", stored.size, stored.path);

    let file = stored.file.take(stored.size);
    let body = AsyncReadBody::new(SentBytes::new(file, stored.path, stored.size));

    (StatusCode::OK, headers, body).into_response()
}

async fn serve_partial(mut stored: StoredFile, range: ByteRange) -> Result<Response, AppError> {
    let mut headers = common_headers(&stored);

    match HeaderValue::from_str(&range.content_range()) {
        Ok(content_range) => {
            headers.insert(CONTENT_RANGE, content_range);
        }

        Err(err) => {
            tracing::warn!("Could not set content range header: {err}");
        }
    }

    headers.insert(CONTENT_LENGTH, range.length().into());

    stored
        .file
        .seek(SeekFrom::Start(range.start()))
        .await
        .map_err(|source| StorageError::Io {
            op: "seek",
            path: stored.path.clone(),
            source,
        })?;

    tracing::debug!(
        "Serving bytes {}-{}/{} of {:?}",
        range.start(),
        range.end(),
        range.total(),
        stored.path
    );

    // never read past the end of the requested range
    let window = stored.file.take(range.length());
    let reader = SentBytes::new(window, stored.path, range.length());
    let stream = ReaderStream::with_capacity(reader, STREAM_CHUNK_SIZE);

    Ok((StatusCode::PARTIAL_CONTENT, headers, Body::from_stream(stream)).into_response())
}

/// Reader keeping track of how much of a body made it out
///
/// The body is dropped when the client goes away, a short body is logged at that point.
struct SentBytes<R> {
    inner: R,
    path: PathBuf,
    sent: u64,
    expected: u64,
}

impl<R> SentBytes<R> {
    fn new(inner: R, path: PathBuf, expected: u64) -> Self {
        Self {
            inner,
            path,
            sent: 0,
            expected,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for SentBytes<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();

        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);

        match &poll {
            Poll::Ready(Ok(())) => {
                this.sent += (buf.filled().len() - before) as u64;
            }

            Poll::Ready(Err(err)) => {
                tracing::error!("Could not read {:?} after {} bytes: {err}", this.path, this.sent);
            }

            Poll::Pending => {}
        }

        poll
    }
}

impl<R> Drop for SentBytes<R> {
    fn drop(&mut self) {
        if self.sent < self.expected {
            tracing::warn!(
                "Stream of {:?} ended after {} of {} bytes",
                self.path,
                self.sent,
                self.expected
            );
        } else {
            tracing::trace!("Stream of {:?} complete", self.path);
        }
    }
}
