use bytes::Bytes;
use futures_util::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};

pub enum SseEvent {
    /// Payload of a `data:` line.
    Data(String),
    /// Comment or blank line; the server sends these to keep the
    /// connection warm.
    Heartbeat,
}

/// Splits a chunked SSE body into events. Chunk boundaries do not align
/// with line boundaries, so partial lines are buffered across polls.
pub struct SseStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    buffer: String,
}

impl SseStream {
    pub fn new(stream: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(stream),
            buffer: String::new(),
        }
    }

    fn take_line(&mut self) -> Option<String> {
        let pos = self.buffer.find('\n')?;
        let mut line = self.buffer[..pos].to_string();
        self.buffer.drain(..=pos);
        if line.ends_with('\r') {
            line.pop();
        }
        Some(line)
    }
}

fn classify(line: &str) -> SseEvent {
    match line.strip_prefix("data:") {
        Some(payload) => SseEvent::Data(payload.trim().to_string()),
        None => SseEvent::Heartbeat,
    }
}

impl Stream for SseStream {
    type Item = Result<SseEvent, reqwest::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(line) = this.take_line() {
                return Poll::Ready(Some(Ok(classify(&line))));
            }

            match futures_util::ready!(this.inner.as_mut().poll_next(cx)) {
                Some(Ok(chunk)) => {
                    this.buffer.push_str(&String::from_utf8_lossy(&chunk));
                }
                Some(Err(e)) => return Poll::Ready(Some(Err(e))),
                None => {
                    if this.buffer.is_empty() {
                        return Poll::Ready(None);
                    }
                    let line = std::mem::take(&mut this.buffer);
                    return Poll::Ready(Some(Ok(classify(&line))));
                }
            }
        }
    }
}
