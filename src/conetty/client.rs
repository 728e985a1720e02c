use std::collections::HashMap;
use std::fmt;
use std::io::{self, BufReader};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;

use super::call::FrameSink;
use super::errors::Error;
use super::frame::{Frame, FrameBuf, FrameKind};
use super::queued_writer::QueuedWriter;
use super::stream_ext::StreamExt;

use bytes::{Bytes, BytesMut};
use may::sync::{mpsc, Mutex};
use may::{coroutine, go};

type CallMap = Mutex<HashMap<u64, mpsc::Sender<Frame>>>;

fn lock_calls(calls: &CallMap) -> may::sync::MutexGuard<'_, HashMap<u64, mpsc::Sender<Frame>>> {
    calls.lock().unwrap_or_else(|e| e.into_inner())
}

/// Multiplexed Client
///
/// many calls, each with its own request and response stream,
/// share one connection
pub struct MultiplexClient {
    // default is no timeout
    timeout: Option<Duration>,
    // each call would have a unique id
    next_id: AtomicU64,
    // the connection
    sock: Arc<dyn FrameSink>,
    // the calls waiting for response frames
    calls: Arc<CallMap>,
    // the listening coroutine
    listener: Option<coroutine::JoinHandle<()>>,
}

impl fmt::Debug for MultiplexClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiplexClient")
            .field("timeout", &self.timeout)
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl Drop for MultiplexClient {
    fn drop(&mut self) {
        if let Some(h) = self.listener.take() {
            unsafe { h.coroutine().cancel() };
            h.join().ok();
        }
    }
}

impl MultiplexClient {
    /// create a client over a connected stream
    pub fn new<S: StreamExt>(stream: S) -> io::Result<Self> {
        let (reader, writer) = stream.split()?;
        let mut r_stream = BufReader::new(reader);
        let calls: Arc<CallMap> = Arc::new(Mutex::new(HashMap::new()));
        let listener_calls = calls.clone();
        let listener = go!(
            coroutine::Builder::new().name("MultiPlexClientListener".to_owned()),
            move || {
                let mut buf = BytesMut::with_capacity(1024 * 32);
                loop {
                    let rsp_frame = match Frame::decode_from(&mut r_stream, &mut buf) {
                        Ok(r) => r,
                        Err(ref e) => {
                            if e.kind() == io::ErrorKind::UnexpectedEof {
                                info!("multiplex_client decode rsp: connection closed");
                            } else {
                                error!("multiplex_client decode rsp: err = {e:?}");
                            }
                            break;
                        }
                    };
                    info!("receive rsp, id={}, kind={:?}", rsp_frame.id, rsp_frame.kind);

                    let mut calls = lock_calls(&listener_calls);
                    let id = rsp_frame.id;
                    let tx = if rsp_frame.kind == FrameKind::Status {
                        // the status frame is the last frame of a call
                        calls.remove(&id)
                    } else {
                        calls.get(&id).cloned()
                    };
                    match tx {
                        Some(tx) => {
                            tx.send(rsp_frame).ok();
                        }
                        None => info!("drop rsp of an unknown call, id={id}"),
                    }
                }
                // dropping the senders wakes every waiting call
                lock_calls(&listener_calls).clear();
            }
        )?;

        Ok(MultiplexClient {
            timeout: None,
            next_id: AtomicU64::new(0),
            sock: Arc::new(QueuedWriter::new(writer)),
            calls,
            listener: Some(listener),
        })
    }

    /// set the default timeout value for waiting on each response frame
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    /// open a new call of the given method
    pub fn call(&self, method: &str) -> Result<Call, Error> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!("open call, id={id}, method={method}");
        let (tx, rx) = mpsc::channel();
        lock_calls(&self.calls).insert(id, tx);

        let call = Call {
            id,
            timeout: self.timeout,
            sock: self.sock.clone(),
            calls: self.calls.clone(),
            rx,
            half_closed: AtomicBool::new(false),
            done: false,
        };
        self.sock.write_frame(Frame::encode_open(id, method)?)?;
        Ok(call)
    }
}

/// One open call of a `MultiplexClient`.
pub struct Call {
    id: u64,
    timeout: Option<Duration>,
    sock: Arc<dyn FrameSink>,
    calls: Arc<CallMap>,
    rx: mpsc::Receiver<Frame>,
    // no more requests for this call
    half_closed: AtomicBool,
    done: bool,
}

impl Call {
    /// the call id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// send one serialized request message
    pub fn send(&self, buf: FrameBuf) -> Result<(), Error> {
        let data = buf.finish(self.id, FrameKind::Message)?;
        self.sock.write_frame(data)?;
        Ok(())
    }

    /// tell the server no more requests will be sent
    pub fn close_send(&self) -> Result<(), Error> {
        if self.half_closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.sock.write_frame(Frame::encode_half_close(self.id)?)?;
        Ok(())
    }

    /// wait for the next response message
    ///
    /// returns `Ok(None)` once the server finished the call with an ok status
    pub fn recv(&mut self) -> Result<Option<Bytes>, Error> {
        if self.done {
            return Ok(None);
        }
        let frame = match self.timeout {
            Some(timeout) => self.rx.recv_timeout(timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => Error::Timeout,
                RecvTimeoutError::Disconnected => connection_closed(),
            }),
            None => self.rx.recv().map_err(|_| connection_closed()),
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };

        match frame.kind {
            FrameKind::Message => Ok(Some(frame.into_body())),
            FrameKind::Status => {
                self.done = true;
                let status = frame.decode_status();
                if status.is_ok() {
                    Ok(None)
                } else {
                    Err(Error::Status(status))
                }
            }
            kind => {
                self.done = true;
                Err(Error::ClientDeserialize(format!(
                    "unexpected {kind:?} frame from server"
                )))
            }
        }
    }
}

fn connection_closed() -> Error {
    Error::StreamRead("connection closed before the call finished".to_owned())
}

impl Drop for Call {
    fn drop(&mut self) {
        lock_calls(&self.calls).remove(&self.id);
        // end the request stream, or the server keeps waiting on it
        self.close_send().ok();
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("id", &self.id)
            .field("done", &self.done)
            .finish()
    }
}

