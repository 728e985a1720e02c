use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bytes::BytesMut;
use may::queue::mpsc::Queue;
use may::sync::Mutex;

#[derive(Debug)]
struct BufWriter<W: Write> {
    writer: W,
    buf: BytesMut,
}

impl<W: Write> BufWriter<W> {
    fn new(writer: W) -> Self {
        BufWriter {
            writer,
            buf: BytesMut::with_capacity(1024 * 32),
        }
    }

    #[inline]
    fn put_data(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data)
    }

    #[inline]
    fn write_all(&mut self) -> io::Result<()> {
        let ret = self
            .writer
            .write_all(&self.buf)
            .and_then(|_| self.writer.flush());
        self.buf.clear();
        ret
    }
}

/// frame writer shared by all the calls of one connection
///
/// every `write` pushes a whole frame, so frames of different calls
/// never interleave on the wire
#[derive(Debug)]
pub struct QueuedWriter<W: Write> {
    data_count: AtomicUsize,
    data_queue: Queue<Vec<u8>>,
    broken: AtomicBool,
    writer: Mutex<BufWriter<W>>,
}

impl<W: Write> QueuedWriter<W> {
    /// wrap the write half of a connection
    pub fn new(writer: W) -> Self {
        QueuedWriter {
            data_count: AtomicUsize::new(0),
            data_queue: Queue::new(),
            broken: AtomicBool::new(false),
            writer: Mutex::new(BufWriter::new(writer)),
        }
    }

    /// it's safe and efficient to call this API concurrently
    ///
    /// returns `BrokenPipe` once any earlier write to the connection failed
    pub fn write(&self, data: Vec<u8>) -> io::Result<()> {
        if self.broken.load(Ordering::Acquire) {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "connection write half is broken",
            ));
        }

        self.data_queue.push(data);
        // only allow the first writer perform the write operation
        // other concurrent writers would just push the data
        if self.data_count.fetch_add(1, Ordering::AcqRel) == 0 {
            // in any cases this should not block since we have only one writer
            let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());

            loop {
                let mut cnt = 0;
                while let Some(data) = self.data_queue.pop() {
                    writer.put_data(&data);
                    cnt += 1;
                }

                // detect if there are more packet need to deal with
                if self.data_count.fetch_sub(cnt, Ordering::AcqRel) == cnt {
                    break;
                }
            }

            if let Err(e) = writer.write_all() {
                error!("QueuedWriter failed, err={e}");
                self.broken.store(true, Ordering::Release);
                return Err(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct FailWriter;

    impl Write for FailWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn concurrent_frames_are_not_interleaved() {
        let w = Arc::new(QueuedWriter::new(Vec::new()));
        let handles: Vec<_> = (0..4u8)
            .map(|i| {
                let w = w.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        w.write(vec![i; 8]).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let out = w.writer.lock().unwrap().writer.clone();
        assert_eq!(out.len(), 4 * 100 * 8);
        for chunk in out.chunks(8) {
            assert!(chunk.iter().all(|b| *b == chunk[0]));
        }
    }

    #[test]
    fn broken_after_failed_write() {
        let w = QueuedWriter::new(FailWriter);
        assert!(w.write(vec![1]).is_err());
        let err = w.write(vec![2]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
