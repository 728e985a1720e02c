//! may_interop is an interop test server for a streaming RPC protocol, based on coroutines.
//!
//! The server implements the `grpc.testing.TestService` contract that interop
//! clients drive to check a transport: an empty call, an unary call, a client
//! streaming call, a server streaming call and the bidirectional calls.
//!
//! Every call is multiplexed over one connection (plain TCP or TLS) by the
//! `conetty` layer. Its handler runs in its own coroutine and reads the request
//! stream while the client is still writing it, so a full duplex call answers
//! each request as soon as it arrives.
//!
//! Example usage:
//!
//! ```no_run
//! use may_interop::messages::SimpleRequest;
//! use may_interop::{TcpServer, TestServiceClient, TestServiceServer, TestTarget};
//!
//! let server = TestServiceServer(TestTarget).start("127.0.0.1:0").unwrap();
//! let stream = may::net::TcpStream::connect(server.local_addr()).unwrap();
//! let client = TestServiceClient::new(stream).unwrap();
//! let req = SimpleRequest {
//!     response_size: 314159,
//!     ..Default::default()
//! };
//! let rsp = client.unary_call(&req).unwrap();
//! assert_eq!(rsp.payload.body.len(), 314159);
//! ```
//!

#![deny(missing_docs)]

#[macro_use]
extern crate log;

pub extern crate bincode;
#[doc(hidden)]
pub extern crate may;
pub extern crate serde;

pub mod conetty;
pub mod duplex;
pub mod messages;
pub mod payload;
pub mod service;
pub mod tls;

pub use conetty::{
    Code, Error, Frame, FrameBuf, FrameKind, Requests, Responses, Server, ServerInstance,
    Status, StreamExt, TcpServer, TlsServer,
};
pub use service::{DuplexCall, TestService, TestServiceClient, TestServiceServer, TestTarget};
pub use tls::ServerCredentials;
