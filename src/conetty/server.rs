use std::collections::HashMap;
use std::io::{self, BufReader};
use std::net::{SocketAddr, ToSocketAddrs};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::call::{FrameSink, Requests, Responses};
use super::frame::{Frame, FrameKind};
use super::queued_writer::QueuedWriter;
use super::stream_ext::StreamExt;
use crate::tls::TlsStream;
use crate::{Error, Server, Status};

use bytes::{Bytes, BytesMut};
use co_managed::Manager;
use may::net::{TcpListener, TcpStream};
use may::sync::mpsc;
use may::{coroutine, go};
use rustls::ServerConfig;

macro_rules! t {
    ($e: expr) => {
        match $e {
            Ok(val) => val,
            Err(err) => {
                error!("call = {:?}\nerr = {:?}", stringify!($e), err);
                continue;
            }
        }
    };
}

/// service instance
pub struct ServerInstance {
    addr: SocketAddr,
    handle: Option<coroutine::JoinHandle<()>>,
}

impl ServerInstance {
    /// the address the service is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// join the service, this would wait until the service is stopped
    pub fn join(mut self) -> std::thread::Result<()> {
        if let Some(handle) = self.handle.take() {
            handle.join()
        } else {
            Ok(())
        }
    }
}

impl Drop for ServerInstance {
    fn drop(&mut self) {
        if let Some(s) = self.handle.take() {
            unsafe { s.coroutine().cancel() };
            s.join().ok();
        }
    }
}

/// Provides a function for starting the tcp service.
pub trait TcpServer: Server {
    /// Spawns the service, binding to the given address
    /// return a coroutine that you can cancel it when need to stop the service
    fn start<L: ToSocketAddrs>(self, addr: L) -> io::Result<ServerInstance> {
        listen(self, addr, "TcpServer", |stream| Ok(stream))
    }
}

/// Provides a function for starting the tcp service over tls.
pub trait TlsServer: Server {
    /// Spawns the service, binding to the given address
    /// every accepted connection does the tls handshake with `config` first
    fn start_tls<L: ToSocketAddrs>(
        self,
        addr: L,
        config: Arc<ServerConfig>,
    ) -> io::Result<ServerInstance> {
        listen(self, addr, "TlsServer", move |stream| {
            TlsStream::accept(stream, config.clone())
        })
    }
}

impl<T: Server> TcpServer for T {}
impl<T: Server> TlsServer for T {}

fn listen<T, L, S, F>(server: T, addr: L, name: &str, accept: F) -> io::Result<ServerInstance>
where
    T: Server,
    L: ToSocketAddrs,
    S: StreamExt,
    F: Fn(TcpStream) -> Result<S, Error> + Send + Sync + 'static,
{
    let listener = TcpListener::bind(addr)?;
    let addr = listener.local_addr()?;
    let handle = go!(
        coroutine::Builder::new().name(name.to_owned()),
        move || {
            let server = Arc::new(server);
            let accept = Arc::new(accept);
            let manager = Manager::new();
            for stream in listener.incoming() {
                let stream = t!(stream);
                t!(stream.set_nodelay(true));
                let server = server.clone();
                let accept = accept.clone();
                manager.add(move || {
                    let peer = stream.peer_addr().ok();
                    info!("accept connection: peer={peer:?}");
                    match accept(stream) {
                        Ok(stream) => serve_connection(server, stream),
                        Err(e) => error!("connection setup failed: peer={peer:?}, err={e}"),
                    }
                });
            }
        }
    )?;
    Ok(ServerInstance {
        addr,
        handle: Some(handle),
    })
}

type RequestSender = mpsc::Sender<Result<Bytes, Status>>;

/// read frames of one connection and route them to their calls
///
/// every opened call runs in its own coroutine, its request stream is fed
/// from here while the handler is already running
fn serve_connection<T: Server, S: StreamExt>(server: Arc<T>, stream: S) {
    let (rs, ws) = match stream.split() {
        Ok(halves) => halves,
        Err(e) => {
            error!("split connection failed: err={e}");
            return;
        }
    };
    // the read half of the stream
    let mut rs = BufReader::new(rs);
    // the write half of the stream
    let ws: Arc<dyn FrameSink> = Arc::new(QueuedWriter::new(ws));
    let mut calls: HashMap<u64, RequestSender> = HashMap::new();
    let mut buf = BytesMut::with_capacity(1024 * 32);

    loop {
        let frame = match Frame::decode_from(&mut rs, &mut buf) {
            Ok(r) => r,
            Err(ref e) => {
                if e.kind() == io::ErrorKind::UnexpectedEof {
                    info!("server decode req: connection closed");
                } else {
                    error!("server decode req: err = {e:?}");
                }
                break;
            }
        };

        let id = frame.id;
        match frame.kind {
            FrameKind::Open => {
                let method = match frame.decode_method() {
                    Ok(m) => m.to_owned(),
                    Err(e) => {
                        error!("bad method path: id={id}, err={e}");
                        let rsp = Responses::new(id, ws.clone());
                        rsp.finish(&Status::internal("bad method path")).ok();
                        continue;
                    }
                };
                if calls.contains_key(&id) {
                    error!("call id reused while open: id={id}");
                    continue;
                }
                info!("open call: id={id}, method={method}");
                let (tx, rx) = mpsc::channel();
                calls.insert(id, tx);
                let rsp = Responses::new(id, ws.clone());
                let server = server.clone();
                go!(move || run_call(&*server, &method, Requests::new(rx), rsp));
            }
            FrameKind::Message => match calls.get(&id) {
                Some(tx) => {
                    if tx.send(Ok(frame.into_body())).is_err() {
                        // the handler no longer reads its requests
                        calls.remove(&id);
                    }
                }
                None => info!("drop message of a finished call: id={id}"),
            },
            FrameKind::HalfClose => {
                // dropping the sender ends the request stream
                calls.remove(&id);
            }
            FrameKind::Status => error!("client sent a status frame: id={id}"),
        }
    }

    // the connection is gone, fail every request stream still being read
    for (id, tx) in calls.drain() {
        info!("abort request stream: id={id}");
        tx.send(Err(Status::unavailable(
            "connection closed before the request stream ended",
        )))
        .ok();
    }
}

fn run_call<T: Server>(server: &T, method: &str, req: Requests, rsp: Responses) {
    let ret = panic::catch_unwind(AssertUnwindSafe(|| server.service(method, req, &rsp)));
    let status = match ret {
        Ok(Ok(())) => Status::ok(),
        Ok(Err(status)) => status,
        // panic happend inside!
        Err(_) => Status::internal("rpc panicked in server!"),
    };

    info!("finish call: id={}, status={}", rsp.id(), status);
    if let Err(e) = rsp.finish(&status) {
        error!("send status failed: id={}, err={e}", rsp.id());
    }
}
