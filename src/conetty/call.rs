use std::io::{self, Write};
use std::sync::Arc;

use bytes::Bytes;
use may::sync::mpsc;

use super::frame::{Frame, FrameBuf, FrameKind};
use super::queued_writer::QueuedWriter;
use crate::Status;

/// something whole frames can be written into, shared by the calls of a connection
pub(crate) trait FrameSink: Send + Sync {
    fn write_frame(&self, data: Vec<u8>) -> io::Result<()>;
}

impl<W: Write + Send> FrameSink for QueuedWriter<W> {
    fn write_frame(&self, data: Vec<u8>) -> io::Result<()> {
        self.write(data)
    }
}

/// The raw request stream of one call.
///
/// Blocks until the next request arrives. Ends cleanly when the client half
/// closes, or yields one error if the connection broke before that.
pub struct Requests {
    rx: mpsc::Receiver<Result<Bytes, Status>>,
    done: bool,
}

impl Requests {
    pub(crate) fn new(rx: mpsc::Receiver<Result<Bytes, Status>>) -> Self {
        Requests { rx, done: false }
    }

    /// a request stream over already known items, used to drive handlers
    /// without a connection
    pub fn from_items<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Result<Bytes, Status>>,
    {
        let (tx, rx) = mpsc::channel();
        for item in items {
            // the receiver is alive, this never fails
            tx.send(item).ok();
        }
        Requests::new(rx)
    }
}

impl Iterator for Requests {
    type Item = Result<Bytes, Status>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.rx.recv() {
            Ok(Ok(data)) => Some(Ok(data)),
            Ok(Err(status)) => {
                self.done = true;
                Some(Err(status))
            }
            // the sender is dropped when the client half closes
            Err(_) => {
                self.done = true;
                None
            }
        }
    }
}

/// The raw response stream of one call.
pub struct Responses {
    id: u64,
    sink: Arc<dyn FrameSink>,
}

impl Responses {
    pub(crate) fn new(id: u64, sink: Arc<dyn FrameSink>) -> Self {
        Responses { id, sink }
    }

    /// the call id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// send one serialized response message to the client
    pub fn send(&self, buf: FrameBuf) -> Result<(), Status> {
        let data = buf
            .finish(self.id, FrameKind::Message)
            .map_err(|e| Status::internal(e.to_string()))?;
        self.sink
            .write_frame(data)
            .map_err(|e| Status::unavailable(format!("sending response failed: {e}")))
    }

    /// send the terminal status of the call
    pub(crate) fn finish(&self, status: &Status) -> io::Result<()> {
        self.sink.write_frame(Frame::encode_status(self.id, status)?)
    }
}
