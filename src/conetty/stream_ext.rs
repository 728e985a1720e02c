use std::io::{self, Read, Write};

use crate::tls::{TlsReader, TlsStream, TlsWriter};

/// Stream Extension
///
/// a connection that can be split into a read half, driven by one
/// coroutine, and a write half, shared by the coroutines serving calls
pub trait StreamExt: Sized + Send + 'static {
    /// the read half
    type Reader: Read + Send + 'static;
    /// the write half
    type Writer: Write + Send + 'static;

    /// split the stream into the read and write half
    fn split(self) -> io::Result<(Self::Reader, Self::Writer)>;
}

impl StreamExt for may::net::TcpStream {
    type Reader = may::net::TcpStream;
    type Writer = may::net::TcpStream;

    fn split(self) -> io::Result<(Self::Reader, Self::Writer)> {
        let rs = self.try_clone()?;
        Ok((rs, self))
    }
}

impl StreamExt for TlsStream {
    type Reader = TlsReader;
    type Writer = TlsWriter;

    fn split(self) -> io::Result<(Self::Reader, Self::Writer)> {
        TlsStream::split(self)
    }
}
