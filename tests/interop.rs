use std::net::Shutdown;
use std::sync::mpsc;
use std::time::Duration;

use may::net::TcpStream;
use may_interop::messages::*;
use may_interop::service::method;
use may_interop::tls::{self, ServerCredentials, TlsStream, TEST_SERVER_HOST};
use may_interop::{
    Code, Error, Requests, Responses, Server, ServerInstance, Status, TcpServer,
    TestServiceClient, TestServiceServer, TestTarget, TlsServer,
};

fn plain() -> (ServerInstance, TestServiceClient) {
    let _ = env_logger::builder().is_test(true).try_init();
    let server = TestServiceServer(TestTarget).start("127.0.0.1:0").unwrap();
    let stream = TcpStream::connect(server.local_addr()).unwrap();
    let client = TestServiceClient::new(stream).unwrap();
    (server, client)
}

fn secure() -> (ServerInstance, TestServiceClient) {
    let _ = env_logger::builder().is_test(true).try_init();
    let creds = ServerCredentials::load(tls::default_testdata_dir()).unwrap();
    let server = TestServiceServer(TestTarget)
        .start_tls("127.0.0.1:0", creds.config())
        .unwrap();
    let sock = TcpStream::connect(server.local_addr()).unwrap();
    let config = tls::client_config(creds.ca()).unwrap();
    let stream = TlsStream::connect(sock, config, TEST_SERVER_HOST).unwrap();
    let client = TestServiceClient::new(stream).unwrap();
    (server, client)
}

/// reports how every call ended on the server side
struct Recorder {
    inner: TestServiceServer<TestTarget>,
    finished: mpsc::Sender<Result<(), Status>>,
}

impl Server for Recorder {
    fn service(&self, method: &str, req: Requests, rsp: &Responses) -> Result<(), Status> {
        let ret = self.inner.service(method, req, rsp);
        self.finished.send(ret.clone()).ok();
        ret
    }
}

struct Recorded {
    finished: mpsc::Receiver<Result<(), Status>>,
    // a handle on the raw connection of the client
    sock: TcpStream,
    client: TestServiceClient,
    _server: ServerInstance,
}

fn recorded() -> Recorded {
    let _ = env_logger::builder().is_test(true).try_init();
    let (tx, finished) = mpsc::channel();
    let recorder = Recorder {
        inner: TestServiceServer(TestTarget),
        finished: tx,
    };
    let server = recorder.start("127.0.0.1:0").unwrap();
    let sock = TcpStream::connect(server.local_addr()).unwrap();
    let client = TestServiceClient::new(sock.try_clone().unwrap()).unwrap();
    Recorded {
        finished,
        sock,
        client,
        _server: server,
    }
}

impl Recorded {
    fn next_finished(&self) -> Result<(), Status> {
        self.finished
            .recv_timeout(Duration::from_secs(10))
            .expect("the call never finished on the server")
    }
}

fn status_code(err: Error) -> Code {
    match err {
        Error::Status(status) => status.code,
        e => panic!("expected an error status, got {e:?}"),
    }
}

fn output_request(sizes: &[i32]) -> StreamingOutputCallRequest {
    StreamingOutputCallRequest::with_sizes(PayloadType::Compressable, sizes)
}

fn body_len(rsp: Option<StreamingOutputCallResponse>) -> usize {
    rsp.expect("missing response").payload.body.len()
}

fn empty_unary(client: &TestServiceClient) {
    assert_eq!(client.empty_call().unwrap(), Empty {});
}

fn large_unary(client: &TestServiceClient) {
    let req = SimpleRequest {
        response_type: PayloadType::Compressable,
        response_size: 314159,
        payload: Payload {
            r#type: PayloadType::Compressable,
            body: vec![0; 271828],
        },
    };
    let rsp = client.unary_call(&req).unwrap();
    assert_eq!(rsp.payload.r#type, PayloadType::Compressable);
    assert_eq!(rsp.payload.body.len(), 314159);

    let req = SimpleRequest {
        response_size: -1,
        ..Default::default()
    };
    let err = client.unary_call(&req).unwrap_err();
    assert_eq!(status_code(err), Code::InvalidArgument);
}

fn client_streaming(client: &TestServiceClient) {
    let reqs: Vec<_> = [27182, 8, 1828, 45904]
        .iter()
        .map(|n| StreamingInputCallRequest {
            payload: Payload {
                r#type: PayloadType::Compressable,
                body: vec![0; *n],
            },
        })
        .collect();
    let rsp = client.streaming_input_call(&reqs).unwrap();
    assert_eq!(rsp.aggregated_payload_size, 74922);

    let rsp = client.streaming_input_call(&[]).unwrap();
    assert_eq!(rsp.aggregated_payload_size, 0);
}

fn server_streaming(client: &TestServiceClient) {
    let rsp = client
        .streaming_output_call(&output_request(&[31415, 9, 2653, 58979]))
        .unwrap();
    let sizes: Vec<_> = rsp.iter().map(|r| r.payload.body.len()).collect();
    assert_eq!(sizes, vec![31415, 9, 2653, 58979]);
}

fn ping_pong(client: &TestServiceClient) {
    let mut call = client.full_duplex_call().unwrap();
    for size in [31415, 9, 2653, 58979] {
        call.send(&output_request(&[size])).unwrap();
        assert_eq!(body_len(call.recv().unwrap()), size as usize);
    }
    call.close_send().unwrap();
    assert!(call.recv().unwrap().is_none());
}

fn run_all(client: &TestServiceClient) {
    empty_unary(client);
    large_unary(client);
    client_streaming(client);
    server_streaming(client);
    ping_pong(client);
}

#[test]
fn all_shapes_over_tcp() {
    let (_server, client) = plain();
    run_all(&client);
}

#[test]
fn all_shapes_over_tls() {
    let (_server, client) = secure();
    run_all(&client);
}

#[test]
fn empty_stream_of_full_duplex() {
    let (_server, client) = plain();
    let mut call = client.full_duplex_call().unwrap();
    call.close_send().unwrap();
    assert!(call.recv().unwrap().is_none());
}

#[test]
fn half_duplex_answers_every_request() {
    let (_server, client) = plain();
    let mut call = client.half_duplex_call().unwrap();
    for size in [1, 2, 3] {
        call.send(&output_request(&[size])).unwrap();
    }
    call.close_send().unwrap();
    for size in [1, 2, 3] {
        assert_eq!(body_len(call.recv().unwrap()), size as usize);
    }
    assert!(call.recv().unwrap().is_none());
}

#[test]
fn full_duplex_bad_request_ends_call() {
    let (_server, client) = secure();
    let mut call = client.full_duplex_call().unwrap();
    call.send(&output_request(&[5])).unwrap();
    assert_eq!(body_len(call.recv().unwrap()), 5);

    // no response parameters
    call.send(&output_request(&[])).unwrap();
    assert_eq!(status_code(call.recv().unwrap_err()), Code::InvalidArgument);

    // the connection still serves new calls
    empty_unary(&client);
}

#[test]
fn calls_share_one_connection() {
    let (_server, client) = plain();
    let mut a = client.full_duplex_call().unwrap();
    let mut b = client.full_duplex_call().unwrap();

    a.send(&output_request(&[10])).unwrap();
    b.send(&output_request(&[20])).unwrap();
    assert_eq!(body_len(b.recv().unwrap()), 20);
    assert_eq!(body_len(a.recv().unwrap()), 10);

    large_unary(&client);

    b.close_send().unwrap();
    assert!(b.recv().unwrap().is_none());
    a.send(&output_request(&[30])).unwrap();
    assert_eq!(body_len(a.recv().unwrap()), 30);
    a.close_send().unwrap();
    assert!(a.recv().unwrap().is_none());
}

#[test]
fn unknown_method_is_unimplemented() {
    let (_server, client) = plain();
    let err = client
        .raw_call("/grpc.testing.TestService/UnimplementedCall", &[])
        .unwrap_err();
    assert_eq!(status_code(err), Code::Unimplemented);

    let err = client.raw_call(method::UNARY_CALL, b"\x01").unwrap_err();
    assert_eq!(status_code(err), Code::Internal);
}

#[test]
fn oversized_response_rejected() {
    let (_server, client) = plain();
    let req = SimpleRequest {
        response_size: 5_000_000,
        ..Default::default()
    };
    let err = client.unary_call(&req).unwrap_err();
    assert_eq!(status_code(err), Code::ResourceExhausted);

    let err = client
        .streaming_output_call(&output_request(&[i32::MAX; 8]))
        .unwrap_err();
    assert_eq!(status_code(err), Code::ResourceExhausted);

    empty_unary(&client);
}

#[test]
fn large_requests_before_reading_over_tls() {
    const SIZE: i32 = 1024 * 1024;
    const COUNT: usize = 32;

    let (_server, mut client) = secure();
    client.set_timeout(Duration::from_secs(60));
    let req = StreamingOutputCallRequest {
        response_type: PayloadType::Compressable,
        response_parameters: vec![ResponseParameters::with_size(SIZE)],
        payload: Payload {
            r#type: PayloadType::Compressable,
            body: vec![0; SIZE as usize],
        },
    };

    // both directions are far beyond the socket buffers before anything is read
    let mut call = client.half_duplex_call().unwrap();
    for _ in 0..COUNT {
        call.send(&req).unwrap();
    }
    call.close_send().unwrap();
    for _ in 0..COUNT {
        assert_eq!(body_len(call.recv().unwrap()), SIZE as usize);
    }
    assert!(call.recv().unwrap().is_none());
}

#[test]
fn dropped_call_ends_request_stream() {
    let r = recorded();
    let mut call = r.client.full_duplex_call().unwrap();
    call.send(&output_request(&[4])).unwrap();
    assert_eq!(body_len(call.recv().unwrap()), 4);

    // no close_send
    drop(call);
    assert_eq!(r.next_finished(), Ok(()));
}

#[test]
fn disconnect_fails_open_request_stream() {
    let r = recorded();
    let mut call = r.client.full_duplex_call().unwrap();
    for size in [1, 2] {
        call.send(&output_request(&[size])).unwrap();
        assert_eq!(body_len(call.recv().unwrap()), size as usize);
    }

    r.sock.shutdown(Shutdown::Both).unwrap();
    let err = r.next_finished().unwrap_err();
    assert_eq!(err.code, Code::Unavailable);
    assert!(call.recv().is_err());
}
