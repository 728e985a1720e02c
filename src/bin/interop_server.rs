//! Interop test server
//!
//! Serves the `grpc.testing.TestService` contract so interop clients can drive
//! every call shape against it.

#[macro_use]
extern crate log;

use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgAction, Parser};

use may_interop::tls::{self, ServerCredentials};
use may_interop::{TcpServer, TestServiceServer, TestTarget, TlsServer};

/// Interop test server - serves the test service over TCP
#[derive(Parser, Debug)]
#[command(name = "interop_server")]
#[command(about = "Interop test server for the grpc.testing.TestService contract")]
struct Args {
    /// Port to listen on, all interfaces
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,

    /// Serve over TLS with the test credentials
    #[arg(long = "use_tls", action = ArgAction::Set, default_value_t = true)]
    use_tls: bool,

    /// Directory holding ca.pem, server1.key and server1.pem
    #[arg(long, default_value_os_t = tls::default_testdata_dir())]
    testdata: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let addr = ("0.0.0.0", args.port);

    let server = if args.use_tls {
        let creds = ServerCredentials::load(&args.testdata).with_context(|| {
            format!("loading test credentials from {}", args.testdata.display())
        })?;
        let server = TestServiceServer(TestTarget)
            .start_tls(addr, creds.config())
            .with_context(|| format!("binding port {}", args.port))?;
        info!("... running securely on {}", server.local_addr());
        server
    } else {
        let server = TestServiceServer(TestTarget)
            .start(addr)
            .with_context(|| format!("binding port {}", args.port))?;
        info!("... running insecurely on {}", server.local_addr());
        server
    };

    server
        .join()
        .map_err(|_| anyhow::anyhow!("server coroutine panicked"))
}
