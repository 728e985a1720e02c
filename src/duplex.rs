//! Push to pull stream adapter.
//!
//! A producer coroutine pushes response items, then finishes the stream with
//! exactly one terminal marker: an end-of-stream sentinel or an error. The
//! consumer pulls the items as a blocking `Iterator` in push order. Both
//! terminal operations consume the producer handle, so nothing can be pushed
//! after them.
//!
//! ```no_run
//! use may_interop::{duplex, Status};
//!
//! let stream = duplex::spawn(|tx| {
//!     for i in 0..3 {
//!         tx.push(i)?;
//!     }
//!     Ok(())
//! });
//! let items: Vec<Result<i32, Status>> = stream.collect();
//! assert_eq!(items.len(), 3);
//! ```

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use may::go;
use may::sync::mpsc;

use crate::Status;

/// one entry of the adapter queue
enum StreamItem<T> {
    Message(T),
    Error(Status),
    EndOfStream,
}

/// create a connected producer/consumer pair
pub fn channel<T>() -> (Producer<T>, ResponseStream<T>) {
    let (tx, rx) = mpsc::channel();
    (Producer { tx }, ResponseStream { rx, done: false })
}

/// run `f` as the producer on a new coroutine and return the consumer side
///
/// `Ok(())` ends the stream cleanly, `Err(status)` ends it with that error,
/// and a panic inside `f` ends it with an internal error
pub fn spawn<T, F>(f: F) -> ResponseStream<T>
where
    T: Send + 'static,
    F: FnOnce(&Producer<T>) -> Result<(), Status> + Send + 'static,
{
    let (tx, stream) = channel();
    go!(move || {
        match panic::catch_unwind(AssertUnwindSafe(|| f(&tx))) {
            Ok(Ok(())) => tx.push_end_of_stream(),
            Ok(Err(status)) => tx.push_error(status),
            Err(_) => {
                error!("duplex producer panicked");
                tx.push_error(Status::internal("duplex producer panicked"))
            }
        }
    });
    stream
}

/// The producer side of the adapter.
pub struct Producer<T> {
    tx: mpsc::Sender<StreamItem<T>>,
}

impl<T> Producer<T> {
    /// enqueue one item, never blocks
    ///
    /// fails with `Cancelled` once the consumer has gone away
    pub fn push(&self, item: T) -> Result<(), Status> {
        self.tx
            .send(StreamItem::Message(item))
            .map_err(|_| Status::new(crate::Code::Cancelled, "response stream dropped"))
    }

    /// end the stream with an error
    pub fn push_error(self, status: Status) {
        // nobody to report to if the consumer is gone
        self.tx.send(StreamItem::Error(status)).ok();
    }

    /// end the stream cleanly
    pub fn push_end_of_stream(self) {
        self.tx.send(StreamItem::EndOfStream).ok();
    }
}

impl<T> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer").finish_non_exhaustive()
    }
}

/// The consumer side of the adapter.
///
/// Yields `Ok(item)` for every pushed item, then either stops, after the
/// end-of-stream sentinel, or yields a single `Err` for the terminal error.
/// A producer dropped without a terminal marker counts as an internal error.
pub struct ResponseStream<T> {
    rx: mpsc::Receiver<StreamItem<T>>,
    done: bool,
}

impl<T> Iterator for ResponseStream<T> {
    type Item = Result<T, Status>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.rx.recv() {
            Ok(StreamItem::Message(item)) => Some(Ok(item)),
            Ok(StreamItem::EndOfStream) => {
                self.done = true;
                None
            }
            Ok(StreamItem::Error(status)) => {
                self.done = true;
                Some(Err(status))
            }
            Err(_) => {
                self.done = true;
                Some(Err(Status::internal(
                    "response producer ended without finishing the stream",
                )))
            }
        }
    }
}

impl<T> std::iter::FusedIterator for ResponseStream<T> {}

impl<T> fmt::Debug for ResponseStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseStream")
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}
