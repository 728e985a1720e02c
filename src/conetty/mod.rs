//! general streaming CS framework for rust based on coroutines.
//!
//! the communication procedure of one call is as below
//! 1. client opens a call with the method path
//! 2. client sends zero or more request messages, then half closes
//! 3. server dispatches the call to a coroutine as soon as it is opened,
//!    the handler reads the request stream while it is still arriving
//! 4. server sends zero or more response messages
//! 5. server finishes the call with exactly one status frame
//!
//! many calls are multiplexed over one connection by their call id.
//! messages are raw `Bytes`, the (de)serialization is done by the layer above
//!
pub use call::{Requests, Responses};
pub use client::{Call, MultiplexClient};
pub use errors::{Code, Error, Status};
pub use frame::{Frame, FrameBuf, FrameKind, FRAME_MAX_LEN};
pub use server::{ServerInstance, TcpServer, TlsServer};
pub use stream_ext::StreamExt;

/// must impl this trait for your server
pub trait Server: Send + Sync + Sized + 'static {
    /// serve one call, this runs in its own coroutine
    /// the requests are the raw messages sent by the client, in order
    /// the responses should be serialized and sent through `rsp`
    /// returning `Ok` finishes the call with an ok status,
    /// returning `Err` finishes the call with that status
    /// here passed in a self ref to impl stateful service if you want
    fn service(&self, method: &str, req: Requests, rsp: &Responses) -> Result<(), Status>;
}

/// per call request and response streams
pub(crate) mod call;
/// Provides the multiplexed client
mod client;
/// Provides a few different error types
mod errors;
/// raw frame protocol
mod frame;
mod queued_writer;
/// Provides server framework
mod server;

mod stream_ext;
