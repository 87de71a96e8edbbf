// Live frame source

use async_stream::try_stream;
use futures::Stream;
use std::sync::Arc;

use super::device::DeviceSession;
use super::{Frame, StreamResult};

/// Per-viewer producer of live frames
pub struct FrameSource {
    session: Arc<DeviceSession>,
}

impl FrameSource {
    pub fn new(session: Arc<DeviceSession>) -> Self {
        Self { session }
    }

    /// Infinite sequence of frames, opening the camera on first poll
    ///
    /// Each call starts a fresh sequence. The sequence ends at the first
    /// error; dropping it stops the capture loop at its next poll.
    pub fn frames(&self) -> impl Stream<Item = StreamResult<Frame>> + Send + use<> {
        let session = self.session.clone();
        try_stream! {
            session.acquire().await?;
            loop {
                let frame = session.capture_frame().await?;
                if frame.is_empty() {
                    log::debug!("Skipping empty frame {}", frame.sequence);
                    continue;
                }
                yield frame;
            }
        }
    }
}
