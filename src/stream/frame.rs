//! Frame decoding for the inbound `data:` block stream.
//!
//! Bytes arrive at arbitrary boundaries. [`FrameDecoder`] buffers them and
//! only releases a record once its blank-line delimiter has been seen, so the
//! output is identical however the input was fragmented.

use futures::{Stream, StreamExt};

use crate::error::Error;

/// Payload value that marks the end of the stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One complete `data:` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Value of a preceding `event:` annotation, kept for diagnostics only.
    pub event: Option<String>,
    /// Joined `data:` lines of the block.
    pub data: String,
}

/// Output of the decoder for one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A data record to hand to the normalizer.
    Record(RawRecord),
    /// The `[DONE]` sentinel.
    Done,
}

/// Incremental decoder for blank-line delimited blocks.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    done: bool,
}

impl FrameDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the `[DONE]` sentinel has been decoded.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Append a chunk and return every block completed by it.
    ///
    /// Nothing is returned after the sentinel; later bytes are ignored.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        if self.done {
            return Vec::new();
        }

        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some((pos, delim_len)) = find_block_end(&self.buf) {
            let block = self.buf.drain(..pos + delim_len).collect::<Vec<_>>();
            let text = String::from_utf8_lossy(&block[..pos]);

            match parse_block(&text) {
                Some(Frame::Done) => {
                    self.done = true;
                    self.buf.clear();
                    frames.push(Frame::Done);
                    break;
                }
                Some(frame) => frames.push(frame),
                None => {}
            }
        }
        frames
    }

    /// End of input. Any incomplete trailing block is discarded.
    ///
    /// Returns the number of discarded bytes.
    pub fn finish(&mut self) -> usize {
        let residual = self.buf.len();
        self.buf.clear();
        if residual > 0 && !self.done {
            tracing::debug!(
                name: "frame.residual.discarded",
                bytes = residual,
                "Discarding incomplete trailing record"
            );
        }
        residual
    }
}

/// Find the end of the first complete block: `(position, delimiter length)`.
fn find_block_end(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| (p, 4));

    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if b.0 < a.0 { b } else { a }),
        (a, b) => a.or(b),
    }
}

/// Parse one block into a frame. Blocks without `data:` lines yield `None`.
fn parse_block(text: &str) -> Option<Frame> {
    let mut event = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        } else if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim().to_string());
        }
        // `id:`, `retry:` and `:` comment lines carry nothing we use.
    }

    if data_lines.is_empty() {
        return None;
    }

    let data = data_lines.join("\n");
    if data.trim() == DONE_SENTINEL {
        return Some(Frame::Done);
    }

    Some(Frame::Record(RawRecord { event, data }))
}

/// Lazily decode a byte stream into records.
///
/// The sequence ends at the `[DONE]` sentinel or when the input ends. A
/// transport error is yielded once and ends the sequence. The input stream is
/// dropped as soon as the output ends or is dropped.
pub fn decode_frames<S, B>(bytes: S) -> impl Stream<Item = Result<RawRecord, Error>> + Send
where
    S: Stream<Item = Result<B, Error>> + Send,
    B: AsRef<[u8]> + Send,
{
    async_stream::try_stream! {
        let mut decoder = FrameDecoder::new();

        futures::pin_mut!(bytes);
        while let Some(chunk) = bytes.next().await {
            let chunk = chunk?;
            for frame in decoder.push(chunk.as_ref()) {
                match frame {
                    Frame::Record(record) => yield record,
                    Frame::Done => {
                        tracing::debug!(name: "frame.done", "Stream end sentinel received");
                    }
                }
            }
            if decoder.is_done() {
                break;
            }
        }

        decoder.finish();
    }
}
