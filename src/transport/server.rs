use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::frame::{write_frame, Frame, FrameReader};
use super::TransportError;

/// Listening end of the channel, bound on loopback.
pub struct ChannelListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    max_frame_len: usize,
}

impl ChannelListener {
    pub fn bind(addr: SocketAddr, max_frame_len: usize) -> Result<Self, TransportError> {
        let listener =
            TcpListener::bind(addr).map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        tracing::info!("Listening on {}", local_addr);
        Ok(Self {
            listener,
            local_addr,
            max_frame_len,
        })
    }

    /// Binds `127.0.0.1:<port>`; port 0 picks a free port.
    pub fn bind_loopback(port: u16, max_frame_len: usize) -> Result<Self, TransportError> {
        Self::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port)), max_frame_len)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Blocks until a peer connects.
    pub fn accept(&self) -> Result<ServerChannel, TransportError> {
        let (stream, peer) = self.listener.accept()?;
        stream.set_nodelay(true)?;
        Ok(ServerChannel {
            stream,
            peer,
            reader: FrameReader::new(self.max_frame_len),
            max_frame_len: self.max_frame_len,
        })
    }
}

/// Server end of one accepted connection.
pub struct ServerChannel {
    stream: TcpStream,
    peer: SocketAddr,
    reader: FrameReader,
    max_frame_len: usize,
}

impl ServerChannel {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Blocks for the next request. `None` once the peer hung up.
    pub fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        self.reader.read_frame(&mut self.stream)
    }

    /// Answers the request numbered `seq`.
    pub fn reply(&mut self, seq: u32, payload: &[u8]) -> Result<(), TransportError> {
        write_frame(&mut self.stream, seq, payload, self.max_frame_len)
    }

    fn try_clone_stream(&self) -> std::io::Result<TcpStream> {
        self.stream.try_clone()
    }
}

/// Reply produced by a [`FrameHandler`] for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub payload: Vec<u8>,
    /// Stop serving once this reply has been sent.
    pub stop: bool,
}

impl Response {
    pub fn reply(payload: Vec<u8>) -> Self {
        Self {
            payload,
            stop: false,
        }
    }

    pub fn reply_and_stop(payload: Vec<u8>) -> Self {
        Self {
            payload,
            stop: true,
        }
    }
}

/// Turns one request payload into one reply.
pub trait FrameHandler: Send + 'static {
    fn handle(&mut self, request: &[u8]) -> Response;
}

impl<F> FrameHandler for F
where
    F: FnMut(&[u8]) -> Response + Send + 'static,
{
    fn handle(&mut self, request: &[u8]) -> Response {
        self(request)
    }
}

/// Worker thread that serves a listener one connection at a time and one
/// request at a time.
pub struct ChannelServer {
    name: String,
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    /// Clone of the connection being served, so `stop` can unblock a read.
    peer: Arc<Mutex<Option<TcpStream>>>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl ChannelServer {
    pub fn spawn<H: FrameHandler>(name: &str, listener: ChannelListener, handler: H) -> Self {
        let local_addr = listener.local_addr();
        let running = Arc::new(AtomicBool::new(true));
        let peer = Arc::new(Mutex::new(None));

        let worker_running = Arc::clone(&running);
        let worker_peer = Arc::clone(&peer);
        let worker_name = name.to_string();

        let worker = std::thread::Builder::new()
            .name(format!("uwb-serve-{}", name))
            .spawn(move || serve(worker_name, listener, handler, worker_running, worker_peer))
            .expect("Failed to spawn channel server thread");

        Self {
            name: name.to_string(),
            local_addr,
            running,
            peer,
            worker: Some(worker),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stops the worker cooperatively and joins it. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(stream) = self.peer.lock().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }

        if let Some(handle) = self.worker.take() {
            // Wake a blocking accept; the worker re-checks the flag.
            let mut wake_addr = self.local_addr;
            if wake_addr.ip().is_unspecified() {
                wake_addr.set_ip(Ipv4Addr::LOCALHOST.into());
            }
            let _ = TcpStream::connect_timeout(&wake_addr, Duration::from_millis(200));

            let _ = handle.join();
            tracing::info!("Stopped {} server on {}", self.name, self.local_addr);
        }
    }

    /// Waits for the worker to finish on its own, i.e. after a handler asked
    /// to stop.
    pub fn join(mut self) {
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ChannelServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve<H: FrameHandler>(
    name: String,
    listener: ChannelListener,
    mut handler: H,
    running: Arc<AtomicBool>,
    peer: Arc<Mutex<Option<TcpStream>>>,
) {
    while running.load(Ordering::SeqCst) {
        let mut channel = match listener.accept() {
            Ok(channel) => channel,
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::error!("{} server accept failed: {}", name, e);
                }
                break;
            }
        };

        {
            // Checked under the lock so `stop` either sees this connection or
            // we see the cleared flag.
            let mut slot = peer.lock();
            if !running.load(Ordering::SeqCst) {
                break;
            }
            *slot = channel.try_clone_stream().ok();
        }

        tracing::info!("{} server accepted {}", name, channel.peer_addr());
        let stop_requested = serve_connection(&name, &mut channel, &mut handler, &running);
        peer.lock().take();

        if stop_requested {
            running.store(false, Ordering::SeqCst);
            break;
        }
    }

    tracing::debug!("{} server loop exited", name);
}

/// Returns true when the handler asked to stop.
fn serve_connection<H: FrameHandler>(
    name: &str,
    channel: &mut ServerChannel,
    handler: &mut H,
    running: &AtomicBool,
) -> bool {
    loop {
        let frame = match channel.recv() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::info!("{} peer {} disconnected", name, channel.peer_addr());
                return false;
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!("{} server read error: {}", name, e);
                }
                return false;
            }
        };

        let response = handler.handle(&frame.payload);
        if let Err(e) = channel.reply(frame.seq, &response.payload) {
            tracing::warn!("{} server failed to reply to seq {}: {}", name, frame.seq, e);
            return false;
        }
        if response.stop {
            return true;
        }
    }
}
