// Motion-JPEG multiplexer
//
// Wraps a frame sequence as a multipart/x-mixed-replace body. Each part
// replaces the previous one in the client, so a browser renders it as video.

use async_stream::stream;
use bytes::{BufMut, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::convert::Infallible;

use super::{Frame, StreamResult};

/// Part separator used in every body
pub const BOUNDARY: &str = "frame";

/// Response content type matching [`BOUNDARY`]
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Encode one frame as a multipart part
pub fn encode_part(frame: &Frame) -> Bytes {
    let header = format!("--{}\r\nContent-Type: {}\r\n\r\n", BOUNDARY, frame.content_type);
    let mut part = BytesMut::with_capacity(header.len() + frame.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(&frame.data);
    part.put_slice(b"\r\n");
    part.freeze()
}

/// Body stream of encoded parts
///
/// Ends after the first frame error. The error is logged, not propagated, so
/// the client sees a clean end of body instead of an aborted connection.
pub fn multipart_stream<S>(frames: S) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static
where
    S: Stream<Item = StreamResult<Frame>> + Send + 'static,
{
    stream! {
        let mut frames = Box::pin(frames);
        while let Some(item) = frames.next().await {
            match item {
                Ok(frame) => yield Ok(encode_part(&frame)),
                Err(e) => {
                    log::error!("Live stream ended: {}", e);
                    break;
                }
            }
        }
        log::debug!("Live stream closed");
    }
}
