use futures_lite::StreamExt;
use lumen_util::http::{Client, ClientError, HeaderMap, Method, Response, StatusCode, Uri};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::partition::{PartitionError, SlotWriter};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Request(#[from] ClientError),

    #[error("unexpected response status: {0}")]
    Status(StatusCode),

    #[error("image stream ended after {written} of {expected} bytes")]
    Incomplete { written: u64, expected: u64 },

    #[error("failed to write image: {0}")]
    Write(#[from] PartitionError),
}

/// Streams firmware images from an HTTP source
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    buffer_size: usize,
    max_resumes: u32,
}

impl Fetcher {
    /// Create a fetcher writing at most `buffer_size` bytes per write and
    /// resuming an interrupted transfer at most `max_resumes` times
    pub fn new(client: Client, buffer_size: usize, max_resumes: u32) -> Self {
        Self {
            client,
            buffer_size: buffer_size.max(1),
            max_resumes,
        }
    }

    /// Request the image at `source`.
    ///
    /// Returns `None` when there is no image to download, either because
    /// the source has none or because it matches `etag`.
    #[instrument(name = "fetch", skip_all, fields(source = %source), err)]
    pub async fn start(
        &self,
        source: &Uri,
        etag: Option<&str>,
    ) -> Result<Option<Download>, FetchError> {
        let res = self
            .client
            .request(Method::GET, source, |req| match etag {
                Some(etag) => req.header("If-None-Match", etag),
                None => req,
            })
            .await?;

        match res.status() {
            StatusCode::NOT_MODIFIED => {
                debug!("image not modified");
                Ok(None)
            }
            StatusCode::NOT_FOUND => {
                debug!("no image available");
                Ok(None)
            }
            StatusCode::OK => {
                let headers = res.headers();
                let etag = header(headers, "etag");
                let resumable = header(headers, "accept-ranges").as_deref() == Some("bytes");
                let expected = res.content_length();
                debug!(?etag, ?expected, resumable, "image found");

                Ok(Some(Download {
                    fetcher: self.clone(),
                    source: source.clone(),
                    response: res,
                    etag,
                    expected,
                    resumable,
                }))
            }
            status => Err(FetchError::Status(status)),
        }
    }
}

/// An image download in progress
#[derive(Debug)]
pub struct Download {
    fetcher: Fetcher,
    source: Uri,
    response: Response,
    etag: Option<String>,
    expected: Option<u64>,
    resumable: bool,
}

impl Download {
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    /// Stream the image into `writer`.
    ///
    /// If the transfer is interrupted and the source supports byte ranges,
    /// the download continues from the last written byte.
    #[instrument(name = "download", skip_all, fields(slot = %writer.slot()), err)]
    pub async fn copy_to<W: SlotWriter>(self, writer: &mut W) -> Result<u64, FetchError> {
        let Download {
            fetcher,
            source,
            mut response,
            etag,
            expected,
            resumable,
        } = self;

        let mut resumes = 0;
        loop {
            let interrupted = match copy_body(response, writer, fetcher.buffer_size).await {
                Ok(()) => match expected {
                    Some(expected) if writer.written() < expected => FetchError::Incomplete {
                        written: writer.written(),
                        expected,
                    },
                    _ => return Ok(writer.written()),
                },
                // write errors are never retried
                Err(e @ FetchError::Write(_)) => return Err(e),
                Err(e) => e,
            };

            if !resumable || resumes >= fetcher.max_resumes {
                return Err(interrupted);
            }
            resumes += 1;

            let offset = writer.written();
            warn!("download interrupted at byte {offset}: {interrupted}, resuming");
            response = fetcher
                .client
                .request(Method::GET, &source, |req| {
                    let req = req.header("Range", range_from(offset));
                    // only resume if the image did not change meanwhile
                    match etag.as_deref() {
                        Some(etag) => req.header("If-Range", etag),
                        None => req,
                    }
                })
                .await?;

            if response.status() != StatusCode::PARTIAL_CONTENT {
                return Err(FetchError::Status(response.status()));
            }
        }
    }
}

async fn copy_body<W: SlotWriter>(
    response: Response,
    writer: &mut W,
    buffer_size: usize,
) -> Result<(), FetchError> {
    let mut stream = Box::pin(response.stream());
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        for piece in chunk.chunks(buffer_size) {
            writer.write(piece).await?;
        }
    }
    Ok(())
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

fn range_from(offset: u64) -> String {
    format!("bytes={offset}-")
}
