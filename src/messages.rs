//! Request and response records of the interop test service.
//!
//! Field names follow the `grpc.testing` messages. Only payload sizes and
//! aggregate sizes carry meaning, the other fields are passed through.

use serde::{Deserialize, Serialize};

/// The type of payload that should be returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PayloadType {
    /// Compressable text format.
    #[default]
    Compressable,
    /// Uncompressable binary format.
    Uncompressable,
    /// Randomly chosen from all other formats defined in this enum.
    Random,
}

/// A block of data, to simply increase gRPC message size.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Payload {
    /// The type of data in body.
    #[serde(rename = "type")]
    pub r#type: PayloadType,
    /// Primary contents of payload.
    pub body: Vec<u8>,
}

/// An empty message, for calls that carry no data.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Empty {}

/// Unary request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SimpleRequest {
    /// Desired payload type in the response from the server.
    pub response_type: PayloadType,
    /// Desired payload size in the response from the server.
    pub response_size: i32,
    /// Optional input payload sent along with the request.
    pub payload: Payload,
}

/// Unary response, as configured by the request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SimpleResponse {
    /// Payload to increase message size.
    pub payload: Payload,
}

/// Client-streaming request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamingInputCallRequest {
    /// Optional input payload sent along with the request.
    pub payload: Payload,
}

/// Client-streaming response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamingInputCallResponse {
    /// Aggregated size of payloads received from the client.
    pub aggregated_payload_size: i32,
}

/// Configuration for a particular response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResponseParameters {
    /// Desired payload sizes in responses from the server.
    pub size: i32,
    /// Desired interval between consecutive responses in the response stream
    /// in microseconds.
    pub interval_us: i32,
}

impl ResponseParameters {
    /// parameters asking for one response of `size` bytes, without delay
    pub fn with_size(size: i32) -> Self {
        ResponseParameters {
            size,
            interval_us: 0,
        }
    }
}

/// Server-streaming request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamingOutputCallRequest {
    /// Desired payload type in the response from the server.
    pub response_type: PayloadType,
    /// Configuration for each expected response message.
    pub response_parameters: Vec<ResponseParameters>,
    /// Optional input payload sent along with the request.
    pub payload: Payload,
}

impl StreamingOutputCallRequest {
    /// a request asking for one response per given size
    pub fn with_sizes(response_type: PayloadType, sizes: &[i32]) -> Self {
        StreamingOutputCallRequest {
            response_type,
            response_parameters: sizes.iter().map(|s| ResponseParameters::with_size(*s)).collect(),
            payload: Payload::default(),
        }
    }
}

/// Server-streaming response, as configured by the request and parameters.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamingOutputCallResponse {
    /// Payload to increase response size.
    pub payload: Payload,
}
