#[macro_use]
extern crate log;

use anyhow::{anyhow, bail, ensure, Context};
use may::net::TcpStream;
use may_interop::messages::*;
use may_interop::tls::{self, ServerCredentials, TlsStream, TEST_SERVER_HOST};
use may_interop::{Error, TcpServer, TestServiceClient, TestServiceServer, TestTarget, TlsServer};

type Case = fn(&TestServiceClient) -> anyhow::Result<()>;

fn payload(len: usize) -> Payload {
    Payload {
        r#type: PayloadType::Compressable,
        body: vec![0; len],
    }
}

fn empty_unary(client: &TestServiceClient) -> anyhow::Result<()> {
    client.empty_call()?;
    Ok(())
}

fn large_unary(client: &TestServiceClient) -> anyhow::Result<()> {
    let req = SimpleRequest {
        response_type: PayloadType::Compressable,
        response_size: 314159,
        payload: payload(271828),
    };
    let rsp = client.unary_call(&req)?;
    ensure!(
        rsp.payload.body.len() == 314159,
        "wrong response size {}",
        rsp.payload.body.len()
    );
    Ok(())
}

fn client_streaming(client: &TestServiceClient) -> anyhow::Result<()> {
    let reqs: Vec<_> = [27182, 8, 1828, 45904]
        .into_iter()
        .map(|n| StreamingInputCallRequest { payload: payload(n) })
        .collect();
    let rsp = client.streaming_input_call(&reqs)?;
    ensure!(
        rsp.aggregated_payload_size == 74922,
        "wrong aggregated size {}",
        rsp.aggregated_payload_size
    );
    Ok(())
}

fn server_streaming(client: &TestServiceClient) -> anyhow::Result<()> {
    let sizes = [31415, 9, 2653, 58979];
    let req = StreamingOutputCallRequest::with_sizes(PayloadType::Compressable, &sizes);
    let rsp = client.streaming_output_call(&req)?;
    let got: Vec<_> = rsp.iter().map(|r| r.payload.body.len() as i32).collect();
    ensure!(got == sizes, "wrong response sizes {got:?}");
    Ok(())
}

fn ping_pong(client: &TestServiceClient) -> anyhow::Result<()> {
    let mut call = client.full_duplex_call()?;
    for size in [31415, 9, 2653, 58979] {
        call.send(&StreamingOutputCallRequest::with_sizes(
            PayloadType::Compressable,
            &[size],
        ))?;
        let rsp = call.recv()?.ok_or_else(|| anyhow!("stream ended early"))?;
        ensure!(rsp.payload.body.len() == size as usize, "wrong response size");
    }
    call.close_send()?;
    ensure!(call.recv()?.is_none(), "unexpected extra response");
    Ok(())
}

fn empty_stream(client: &TestServiceClient) -> anyhow::Result<()> {
    let mut call = client.full_duplex_call()?;
    call.close_send()?;
    ensure!(call.recv()?.is_none(), "unexpected response");
    Ok(())
}

fn unimplemented_method(client: &TestServiceClient) -> anyhow::Result<()> {
    match client.raw_call("/grpc.testing.TestService/UnimplementedCall", &[]) {
        Err(Error::Status(status)) if status.code == may_interop::Code::Unimplemented => Ok(()),
        Err(e) => bail!("unexpected error {e}"),
        Ok(_) => bail!("unknown method succeeded"),
    }
}

const CASES: &[(&str, Case)] = &[
    ("empty_unary", empty_unary),
    ("large_unary", large_unary),
    ("client_streaming", client_streaming),
    ("server_streaming", server_streaming),
    ("ping_pong", ping_pong),
    ("empty_stream", empty_stream),
    ("unimplemented_method", unimplemented_method),
];

fn run_cases(transport: &str, client: &TestServiceClient) -> usize {
    let mut failed = 0;
    for (name, case) in CASES {
        match case(client) {
            Ok(()) => info!("{transport}/{name}: passed"),
            Err(e) => {
                error!("{transport}/{name}: failed, err={e:#}");
                failed += 1;
            }
        }
    }
    failed
}

fn test_plain() -> anyhow::Result<usize> {
    let server = TestServiceServer(TestTarget).start(("127.0.0.1", 0))?;
    let stream = TcpStream::connect(server.local_addr())?;
    let mut client = TestServiceClient::new(stream)?;
    client.set_timeout(std::time::Duration::from_secs(5));
    Ok(run_cases("tcp", &client))
}

fn test_tls() -> anyhow::Result<usize> {
    let creds = ServerCredentials::load(tls::default_testdata_dir())
        .context("loading test credentials")?;
    let server = TestServiceServer(TestTarget).start_tls(("127.0.0.1", 0), creds.config())?;
    let sock = TcpStream::connect(server.local_addr())?;
    let stream = TlsStream::connect(sock, tls::client_config(creds.ca())?, TEST_SERVER_HOST)?;
    let mut client = TestServiceClient::new(stream)?;
    client.set_timeout(std::time::Duration::from_secs(5));
    Ok(run_cases("tls", &client))
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let failed = test_plain()? + test_tls()?;
    if failed > 0 {
        bail!("{failed} interop cases failed");
    }
    info!("all interop cases passed");
    Ok(())
}
