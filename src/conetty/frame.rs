use std::io::{self, Cursor, ErrorKind, Read, Write};

use crate::{Code, Status};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::{Bytes, BytesMut};

// Frame layout
// id(u64) + len(u64) + kind(u8) + body([u8; len - 1])

// open frame body: method path (utf8)
// message frame body: bincode encoded message
// half close frame body: empty
// status frame body: code(u8) + message (utf8)

/// max frame len, counting the kind byte and the body
pub const FRAME_MAX_LEN: u64 = 4 * 1024 * 1024;
// id + len + kind
const HEAD_LEN: usize = 17;

/// what a frame means for the call it belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// client starts a new call, the body is the method path
    Open = 0,
    /// one request or response message
    Message = 1,
    /// client has finished sending requests
    HalfClose = 2,
    /// server finished the call, always the last frame of a call
    Status = 3,
}

impl FrameKind {
    fn from_u8(v: u8) -> io::Result<Self> {
        match v {
            0 => Ok(FrameKind::Open),
            1 => Ok(FrameKind::Message),
            2 => Ok(FrameKind::HalfClose),
            3 => Ok(FrameKind::Status),
            _ => {
                let s = format!("invalid frame kind. kind={v}");
                error!("{s}");
                Err(io::Error::new(ErrorKind::InvalidData, s))
            }
        }
    }
}

/// raw frame wrapper, low level protocol
#[derive(Debug)]
pub struct Frame {
    /// call id, every frame of a call carries the same id
    pub id: u64,
    /// frame kind
    pub kind: FrameKind,
    /// body data without the frame head
    body: Bytes,
}

impl Frame {
    /// decode a frame from the reader
    pub fn decode_from<R: Read>(r: &mut R, buf: &mut BytesMut) -> io::Result<Self> {
        let id = r.read_u64::<BigEndian>()?;
        let len = r.read_u64::<BigEndian>()?;
        info!("decode id = {id:?}, len = {len:?}");

        if len == 0 || len > FRAME_MAX_LEN {
            let s = format!("decode bad frame length. len={len}");
            error!("{s}");
            return Err(io::Error::new(ErrorKind::InvalidData, s));
        }

        let kind = FrameKind::from_u8(r.read_u8()?)?;
        let body_len = (len - 1) as usize;
        buf.clear();
        buf.resize(body_len, 0);
        r.read_exact(&mut buf[..])?;
        let body = buf.split_to(body_len).freeze();

        Ok(Frame { id, kind, body })
    }

    /// the raw body, for message frames this is the encoded message
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// take the raw body out of the frame
    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// decode the method path of an open frame
    pub fn decode_method(&self) -> io::Result<&str> {
        std::str::from_utf8(&self.body).map_err(|e| io::Error::new(ErrorKind::InvalidData, e))
    }

    /// decode the status of a status frame
    pub fn decode_status(&self) -> Status {
        match self.body.split_first() {
            Some((code, msg)) => {
                Status::new(Code::from_u8(*code), String::from_utf8_lossy(msg).into_owned())
            }
            None => Status::new(Code::Unknown, "empty status frame"),
        }
    }

    /// encode the open frame of a call
    pub fn encode_open(id: u64, method: &str) -> io::Result<Vec<u8>> {
        let mut buf = FrameBuf::new();
        buf.write_all(method.as_bytes())?;
        buf.finish(id, FrameKind::Open)
    }

    /// encode the half close frame of a call
    pub fn encode_half_close(id: u64) -> io::Result<Vec<u8>> {
        FrameBuf::new().finish(id, FrameKind::HalfClose)
    }

    /// encode the terminal status frame of a call
    pub fn encode_status(id: u64, status: &Status) -> io::Result<Vec<u8>> {
        let mut buf = FrameBuf::new();
        buf.write_u8(status.code as u8)?;
        buf.write_all(status.message.as_bytes())?;
        buf.finish(id, FrameKind::Status)
    }
}

/// frame buffer that a message can be serialized into
pub struct FrameBuf(Cursor<Vec<u8>>);

impl Default for FrameBuf {
    fn default() -> Self {
        FrameBuf::new()
    }
}

impl FrameBuf {
    /// crate a new `FrameBuf` instance
    pub fn new() -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.resize(HEAD_LEN, 0);
        let mut cursor = Cursor::new(buf);
        // leave enough space to write id, len and kind
        cursor.set_position(HEAD_LEN as u64);
        FrameBuf(cursor)
    }

    /// convert self into raw buf that can be send as a frame
    pub fn finish(self, id: u64, kind: FrameKind) -> io::Result<Vec<u8>> {
        let mut cursor = self.0;
        let len = (cursor.get_ref().len() - HEAD_LEN + 1) as u64;
        if len > FRAME_MAX_LEN {
            let s = format!("encode too big frame length. len={len}");
            error!("{s}");
            return Err(io::Error::new(ErrorKind::InvalidInput, s));
        }

        // write from start
        cursor.set_position(0);
        cursor.write_u64::<BigEndian>(id)?;
        cursor.write_u64::<BigEndian>(len)?;
        cursor.write_u8(kind as u8)?;
        info!("encode id = {id:?}, len = {len:?}, kind = {kind:?}");

        Ok(cursor.into_inner())
    }
}

impl Write for FrameBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
