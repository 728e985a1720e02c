//! The interop test service.
//!
//! `TestService` is the schema of the test contract, `TestTarget` the
//! conformance implementation, `TestServiceServer` dispatches raw calls of the
//! transport to a `TestService`, and `TestServiceClient` is the client stub.

use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::conetty::{Call, MultiplexClient, Requests, Responses, StreamExt};
use crate::duplex::{self, ResponseStream};
use crate::messages::*;
use crate::payload::{check_size, synthesize};
use crate::{Code, Error, FrameBuf, Server, Status};

/// method paths of the test service
pub mod method {
    /// one empty request, one empty response
    pub const EMPTY_CALL: &str = "/grpc.testing.TestService/EmptyCall";
    /// one request, one response
    pub const UNARY_CALL: &str = "/grpc.testing.TestService/UnaryCall";
    /// streamed upload
    pub const STREAMING_INPUT_CALL: &str = "/grpc.testing.TestService/StreamingInputCall";
    /// streamed download
    pub const STREAMING_OUTPUT_CALL: &str = "/grpc.testing.TestService/StreamingOutputCall";
    /// each request answered as soon as it is read
    pub const FULL_DUPLEX_CALL: &str = "/grpc.testing.TestService/FullDuplexCall";
    /// requests first, then the responses
    pub const HALF_DUPLEX_CALL: &str = "/grpc.testing.TestService/HalfDuplexCall";
}

/// A typed request stream, decoding the raw requests of a call.
pub struct Streaming<T> {
    inner: Requests,
    _msg: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Streaming<T> {
    /// decode the raw requests of a call
    pub fn new(inner: Requests) -> Self {
        Streaming {
            inner,
            _msg: PhantomData,
        }
    }

    /// a stream over already decoded requests, an `Err` item breaks the stream there
    pub fn from_messages<I>(items: I) -> Result<Self, Status>
    where
        T: Serialize,
        I: IntoIterator<Item = Result<T, Status>>,
    {
        let raw = items
            .into_iter()
            .map(|item| match item {
                Ok(msg) => bincode::serialize(&msg)
                    .map(|data| Ok(Bytes::from(data)))
                    .map_err(|e| Status::internal(e.to_string())),
                Err(status) => Ok(Err(status)),
            })
            .collect::<Result<Vec<_>, Status>>()?;
        Ok(Streaming::new(Requests::from_items(raw)))
    }
}

impl<T: DeserializeOwned> Iterator for Streaming<T> {
    type Item = Result<T, Status>;

    fn next(&mut self) -> Option<Self::Item> {
        let data = match self.inner.next()? {
            Ok(data) => data,
            Err(status) => return Some(Err(status)),
        };
        Some(decode(&data))
    }
}

fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, Status> {
    bincode::deserialize(data)
        .map_err(|e| Status::internal(format!("deserializing a client request: {e}")))
}

fn encode<T: Serialize>(msg: &T) -> Result<FrameBuf, Status> {
    let mut buf = FrameBuf::new();
    bincode::serialize_into(&mut buf, msg)
        .map_err(|e| Status::internal(format!("serializing a server response: {e}")))?;
    Ok(buf)
}

/// the most payload bytes one server streaming call builds up front
pub const MAX_STREAMING_OUTPUT_SIZE: usize = 64 * 1024 * 1024;

/// the interop test contract
pub trait TestService: Send + Sync + 'static {
    /// One empty request followed by one empty response.
    fn empty_call(&self, req: Empty) -> Result<Empty, Status>;

    /// One request followed by one response.
    fn unary_call(&self, req: SimpleRequest) -> Result<SimpleResponse, Status>;

    /// A sequence of requests followed by one response (streamed upload).
    fn streaming_input_call(
        &self,
        reqs: Streaming<StreamingInputCallRequest>,
    ) -> Result<StreamingInputCallResponse, Status>;

    /// One request followed by a sequence of responses (streamed download).
    fn streaming_output_call(
        &self,
        req: StreamingOutputCallRequest,
    ) -> Result<Vec<StreamingOutputCallResponse>, Status>;

    /// A sequence of requests with each request served by the server immediately.
    fn full_duplex_call(
        &self,
        reqs: Streaming<StreamingOutputCallRequest>,
    ) -> ResponseStream<StreamingOutputCallResponse>;

    /// A sequence of requests followed by a sequence of responses.
    fn half_duplex_call(
        &self,
        reqs: Streaming<StreamingOutputCallRequest>,
    ) -> ResponseStream<StreamingOutputCallResponse>;
}

/// The conformance implementation of the test service. It's stateless.
#[derive(Debug, Default, Clone, Copy)]
pub struct TestTarget;

impl TestService for TestTarget {
    fn empty_call(&self, _req: Empty) -> Result<Empty, Status> {
        Ok(Empty {})
    }

    fn unary_call(&self, req: SimpleRequest) -> Result<SimpleResponse, Status> {
        let payload = synthesize(PayloadType::Compressable, req.response_size)?;
        Ok(SimpleResponse { payload })
    }

    fn streaming_input_call(
        &self,
        reqs: Streaming<StreamingInputCallRequest>,
    ) -> Result<StreamingInputCallResponse, Status> {
        let mut sum: usize = 0;
        for req in reqs {
            sum += req?.payload.body.len();
        }
        let aggregated_payload_size = i32::try_from(sum).map_err(|_| {
            Status::out_of_range(format!("aggregated payload size {sum} overflows"))
        })?;
        Ok(StreamingInputCallResponse {
            aggregated_payload_size,
        })
    }

    fn streaming_output_call(
        &self,
        req: StreamingOutputCallRequest,
    ) -> Result<Vec<StreamingOutputCallResponse>, Status> {
        let mut total: usize = 0;
        for p in &req.response_parameters {
            total += check_size(p.size)?;
            if total > MAX_STREAMING_OUTPUT_SIZE {
                return Err(Status::new(
                    Code::ResourceExhausted,
                    format!("response payloads exceed {MAX_STREAMING_OUTPUT_SIZE} bytes"),
                ));
            }
        }
        req.response_parameters
            .iter()
            .map(|p| -> Result<_, Status> {
                let payload = synthesize(req.response_type, p.size)?;
                Ok(StreamingOutputCallResponse { payload })
            })
            .collect()
    }

    fn full_duplex_call(
        &self,
        reqs: Streaming<StreamingOutputCallRequest>,
    ) -> ResponseStream<StreamingOutputCallResponse> {
        duplex::spawn(move |tx| {
            for req in reqs {
                let req = req?;
                info!(
                    "read request: response_parameters={:?}, payload={} bytes",
                    req.response_parameters,
                    req.payload.body.len()
                );
                let size = match req.response_parameters.first() {
                    Some(p) => p.size,
                    None => {
                        return Err(Status::invalid_argument("request has no response parameters"))
                    }
                };
                let payload = synthesize(req.response_type, size)?;
                tx.push(StreamingOutputCallResponse { payload })?;
            }
            info!("finished reads");
            Ok(())
        })
    }

    fn half_duplex_call(
        &self,
        reqs: Streaming<StreamingOutputCallRequest>,
    ) -> ResponseStream<StreamingOutputCallResponse> {
        self.full_duplex_call(reqs)
    }
}

/// Dispatches the raw calls of the transport to a `TestService`.
#[derive(Debug)]
pub struct TestServiceServer<T>(pub T);

impl<T: TestService> TestServiceServer<T> {
    // read the single request of a call with an unary request
    fn unary_request<Req: DeserializeOwned>(&self, mut req: Requests) -> Result<Req, Status> {
        let data = req
            .next()
            .ok_or_else(|| Status::internal("missing request message"))??;
        decode(&data)
    }

    fn unary<Req, Rsp>(
        &self,
        req: Requests,
        rsp: &Responses,
        f: impl FnOnce(&T, Req) -> Result<Rsp, Status>,
    ) -> Result<(), Status>
    where
        Req: DeserializeOwned,
        Rsp: Serialize,
    {
        let ret = f(&self.0, self.unary_request(req)?)?;
        rsp.send(encode(&ret)?)
    }

    fn stream_out<I>(&self, responses: I, rsp: &Responses) -> Result<(), Status>
    where
        I: IntoIterator<Item = Result<StreamingOutputCallResponse, Status>>,
    {
        for item in responses {
            rsp.send(encode(&item?)?)?;
        }
        Ok(())
    }
}

impl<T: TestService> Server for TestServiceServer<T> {
    fn service(&self, method: &str, req: Requests, rsp: &Responses) -> Result<(), Status> {
        use method::*;

        match method {
            EMPTY_CALL => self.unary(req, rsp, T::empty_call),
            UNARY_CALL => self.unary(req, rsp, T::unary_call),
            STREAMING_INPUT_CALL => {
                let ret = self.0.streaming_input_call(Streaming::new(req))?;
                rsp.send(encode(&ret)?)
            }
            STREAMING_OUTPUT_CALL => {
                let responses = self.0.streaming_output_call(self.unary_request(req)?)?;
                self.stream_out(responses.into_iter().map(Ok), rsp)
            }
            FULL_DUPLEX_CALL => self.stream_out(self.0.full_duplex_call(Streaming::new(req)), rsp),
            HALF_DUPLEX_CALL => self.stream_out(self.0.half_duplex_call(Streaming::new(req)), rsp),
            m => Err(Status::unimplemented(format!("unknown method {m}"))),
        }
    }
}

/// The client stub that makes calls to the test service.
#[derive(Debug)]
pub struct TestServiceClient {
    transport: MultiplexClient,
}

impl TestServiceClient {
    /// Returns a new client stub that sends requests over the given stream.
    pub fn new<S: StreamExt>(stream: S) -> std::io::Result<Self> {
        let transport = MultiplexClient::new(stream)?;
        Ok(Self { transport })
    }

    /// set the timeout for waiting on each response
    pub fn set_timeout(&mut self, timeout: std::time::Duration) {
        self.transport.set_timeout(timeout);
    }

    fn unary<Req: Serialize, Rsp: DeserializeOwned>(
        &self,
        method: &str,
        req: &Req,
    ) -> Result<Rsp, Error> {
        let mut call = self.transport.call(method)?;
        call.send(client_encode(req)?)?;
        call.close_send()?;
        let rsp = call
            .recv()?
            .ok_or_else(|| Error::ClientDeserialize("server sent no response".to_owned()))?;
        // wait for the status
        call.recv()?;
        client_decode(&rsp)
    }

    /// `EmptyCall`
    pub fn empty_call(&self) -> Result<Empty, Error> {
        self.unary(method::EMPTY_CALL, &Empty {})
    }

    /// `UnaryCall`
    pub fn unary_call(&self, req: &SimpleRequest) -> Result<SimpleResponse, Error> {
        self.unary(method::UNARY_CALL, req)
    }

    /// `StreamingInputCall`, sends every request then waits for the aggregate
    pub fn streaming_input_call<'a, I>(&self, reqs: I) -> Result<StreamingInputCallResponse, Error>
    where
        I: IntoIterator<Item = &'a StreamingInputCallRequest>,
    {
        let mut call = self.transport.call(method::STREAMING_INPUT_CALL)?;
        for req in reqs {
            call.send(client_encode(req)?)?;
        }
        call.close_send()?;
        let rsp = call
            .recv()?
            .ok_or_else(|| Error::ClientDeserialize("server sent no response".to_owned()))?;
        call.recv()?;
        client_decode(&rsp)
    }

    /// `StreamingOutputCall`, collects every response
    pub fn streaming_output_call(
        &self,
        req: &StreamingOutputCallRequest,
    ) -> Result<Vec<StreamingOutputCallResponse>, Error> {
        let mut call = self.transport.call(method::STREAMING_OUTPUT_CALL)?;
        call.send(client_encode(req)?)?;
        call.close_send()?;
        let mut responses = Vec::new();
        while let Some(rsp) = call.recv()? {
            responses.push(client_decode(&rsp)?);
        }
        Ok(responses)
    }

    /// open a full duplex call, requests and responses can be interleaved
    pub fn full_duplex_call(&self) -> Result<DuplexCall, Error> {
        Ok(DuplexCall(self.transport.call(method::FULL_DUPLEX_CALL)?))
    }

    /// open a half duplex call
    pub fn half_duplex_call(&self) -> Result<DuplexCall, Error> {
        Ok(DuplexCall(self.transport.call(method::HALF_DUPLEX_CALL)?))
    }

    /// call an arbitrary method with raw bytes, returns the raw responses
    pub fn raw_call(&self, method: &str, req: &[u8]) -> Result<Vec<Bytes>, Error> {
        use std::io::Write;

        let mut call = self.transport.call(method)?;
        let mut buf = FrameBuf::new();
        buf.write_all(req)?;
        call.send(buf)?;
        call.close_send()?;
        let mut responses = Vec::new();
        while let Some(rsp) = call.recv()? {
            responses.push(rsp);
        }
        Ok(responses)
    }
}

/// Client side of a bidirectional streaming call.
#[derive(Debug)]
pub struct DuplexCall(Call);

impl DuplexCall {
    /// send one request
    pub fn send(&self, req: &StreamingOutputCallRequest) -> Result<(), Error> {
        self.0.send(client_encode(req)?)
    }

    /// no more requests
    pub fn close_send(&self) -> Result<(), Error> {
        self.0.close_send()
    }

    /// the next response, `None` once the call finished with an ok status
    pub fn recv(&mut self) -> Result<Option<StreamingOutputCallResponse>, Error> {
        match self.0.recv()? {
            Some(rsp) => client_decode(&rsp).map(Some),
            None => Ok(None),
        }
    }
}

fn client_encode<T: Serialize>(msg: &T) -> Result<FrameBuf, Error> {
    let mut buf = FrameBuf::new();
    bincode::serialize_into(&mut buf, msg).map_err(|e| Error::ClientSerialize(e.to_string()))?;
    Ok(buf)
}

fn client_decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, Error> {
    bincode::deserialize(data).map_err(|e| Error::ClientDeserialize(e.to_string()))
}
