//! Server-sent-events transport: opens the feed endpoint over HTTP and
//! decodes the `text/event-stream` framing into raw event payloads.

use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use url::Url;

use crate::error::FeedError;

/// Incremental decoder for the event-stream wire format. Bytes go in as they
/// arrive off the socket; completed `data:` payloads come out. Field lines
/// other than `data:` (event ids, retry hints, comments) are skipped, since
/// the feed only carries unnamed messages.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: BytesMut,
    // data lines of the event currently being assembled
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb one chunk and return every event payload it completed.
    /// Multi-line data is joined with '\n'. A chunk may complete zero, one,
    /// or several events; partial lines stay buffered for the next chunk.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(line) = self.take_line() {
            if line.is_empty() {
                // blank line dispatches the pending event, if any
                if !self.data.is_empty() {
                    out.push(self.data.join("\n"));
                    self.data.clear();
                }
            } else if let Some(rest) = line.strip_prefix("data:") {
                let rest = rest.strip_prefix(' ').unwrap_or(rest);
                self.data.push(rest.to_string());
            } else if line == "data" {
                self.data.push(String::new());
            }
        }
        out
    }

    // Pop one complete line off the front of the buffer. Lines end with \n;
    // a trailing \r is stripped so CRLF framing decodes the same as LF.
    fn take_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line = self.buf.split_to(pos + 1);
        line.truncate(pos);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

/// One open feed connection. Yields decoded event payloads until the
/// transport fails or the server closes the stream.
pub struct SseFeed {
    body: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    decoder: SseDecoder,
    ready: VecDeque<String>,
    done: bool,
}

impl std::fmt::Debug for SseFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseFeed")
            .field("decoder", &self.decoder)
            .field("ready", &self.ready)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

/// Open the feed endpoint. Non-2xx responses and bodies that are not an
/// event stream are connect failures; nothing is consumed from them.
pub async fn connect(
    client: &reqwest::Client,
    url: Url,
    bearer: Option<&str>,
) -> Result<SseFeed, FeedError> {
    let mut req = client.get(url).header(ACCEPT, "text/event-stream");
    if let Some(token) = bearer {
        req = req.bearer_auth(token);
    }
    let resp = req.send().await.map_err(FeedError::Connect)?;

    let status = resp.status();
    if !status.is_success() {
        return Err(FeedError::Status(status.as_u16()));
    }
    let content_type = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    if !content_type.starts_with("text/event-stream") {
        return Err(FeedError::NotEventStream(content_type));
    }

    Ok(SseFeed {
        body: Box::pin(resp.bytes_stream()),
        decoder: SseDecoder::new(),
        ready: VecDeque::new(),
        done: false,
    })
}

impl Stream for SseFeed {
    type Item = Result<String, FeedError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(payload) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(payload)));
            }
            if this.done {
                return Poll::Ready(None);
            }
            match this.body.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.ready.extend(this.decoder.feed(&chunk));
                }
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(FeedError::Read(e))));
                }
                Poll::Ready(None) => {
                    // orderly end of body; the driver turns this into an error
                    this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
