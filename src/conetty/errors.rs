use std::fmt;
use std::io;

use thiserror::Error;

/// All errors that can occur during the use of the interop server and client.
#[derive(Debug, Error)]
pub enum Error {
    /// Any IO error.
    #[error("IO err: {0}")]
    Io(#[from] io::Error),
    /// The request asked for something that can't be produced,
    /// e.g. a payload with a negative size.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The request asked for more than a single message can carry.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    /// The inbound request stream broke before it was fully read.
    #[error("reading the request stream err: {0}")]
    StreamRead(String),
    /// Error in serializing a client request.
    ///
    /// Typically this indicates a faulty implementation of `serde::Serialize`.
    #[error("serializing a client request err: {0}")]
    ClientSerialize(String),
    /// Error in deserializing a server response.
    ///
    /// Typically this indicates a faulty implementation of `serde::Serialize` or
    /// `serde::Deserialize`.
    #[error("deserializing a server response err: {0}")]
    ClientDeserialize(String),
    /// The server was unable to reply to the rpc client within some time.
    ///
    /// You can set the default timeout value in the client instance
    #[error("The server was unable to reply to the rpc client within some time")]
    Timeout,
    /// The server finished the call with a non-ok status.
    #[error("The server returns an error status: {0}")]
    Status(Status),
    /// The TLS layer failed.
    #[error("tls err: {0}")]
    Tls(#[from] rustls::Error),
    /// A certificate or key file could not be parsed.
    #[error("certificate err: {0}")]
    Certificate(String),
}

/// Status codes carried by the terminal frame of a call.
///
/// The numbering follows the gRPC status codes so interop clients can map
/// them directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Code {
    /// not an error
    Ok = 0,
    /// the call was cancelled by the caller
    Cancelled = 1,
    /// unknown error
    Unknown = 2,
    /// the client specified an invalid argument
    InvalidArgument = 3,
    /// the deadline expired before the call could complete
    DeadlineExceeded = 4,
    /// some requested entity was not found
    NotFound = 5,
    /// the entity a client tried to create already exists
    AlreadyExists = 6,
    /// the caller may not execute the call
    PermissionDenied = 7,
    /// some resource has been exhausted
    ResourceExhausted = 8,
    /// the system is not in a state required for the call
    FailedPrecondition = 9,
    /// the call was aborted
    Aborted = 10,
    /// the call was attempted past the valid range
    OutOfRange = 11,
    /// the call is not implemented
    Unimplemented = 12,
    /// internal error
    Internal = 13,
    /// the service is currently unavailable
    Unavailable = 14,
    /// unrecoverable data loss or corruption
    DataLoss = 15,
    /// the request has no valid authentication credentials
    Unauthenticated = 16,
}

impl Code {
    /// decode a code from the wire, unknown values map to `Unknown`
    pub fn from_u8(v: u8) -> Code {
        use Code::*;
        match v {
            0 => Ok,
            1 => Cancelled,
            3 => InvalidArgument,
            4 => DeadlineExceeded,
            5 => NotFound,
            6 => AlreadyExists,
            7 => PermissionDenied,
            8 => ResourceExhausted,
            9 => FailedPrecondition,
            10 => Aborted,
            11 => OutOfRange,
            12 => Unimplemented,
            13 => Internal,
            14 => Unavailable,
            15 => DataLoss,
            16 => Unauthenticated,
            _ => Unknown,
        }
    }
}

/// The outcome of a single call, sent as the last frame of every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// status code
    pub code: Code,
    /// human readable detail, empty for `Code::Ok`
    pub message: String,
}

impl Status {
    /// create a status with the given code and message
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Status {
            code,
            message: message.into(),
        }
    }

    /// the status of a successfully completed call
    pub fn ok() -> Self {
        Status::new(Code::Ok, "")
    }

    /// the request is malformed
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Status::new(Code::InvalidArgument, message)
    }

    /// the server failed while serving the call
    pub fn internal(message: impl Into<String>) -> Self {
        Status::new(Code::Internal, message)
    }

    /// the connection broke
    pub fn unavailable(message: impl Into<String>) -> Self {
        Status::new(Code::Unavailable, message)
    }

    /// the method is unknown
    pub fn unimplemented(message: impl Into<String>) -> Self {
        Status::new(Code::Unimplemented, message)
    }

    /// a value went past its valid range
    pub fn out_of_range(message: impl Into<String>) -> Self {
        Status::new(Code::OutOfRange, message)
    }

    /// check if the status is `Code::Ok`
    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for Status {}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidArgument(s) => Status::invalid_argument(s),
            Error::ResourceExhausted(s) => Status::new(Code::ResourceExhausted, s),
            Error::StreamRead(s) => Status::unavailable(s),
            Error::Status(s) => s,
            Error::Timeout => Status::new(Code::DeadlineExceeded, err.to_string()),
            e => Status::internal(e.to_string()),
        }
    }
}
