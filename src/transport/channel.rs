use std::io::Read;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::frame::{write_frame, FrameReader};
use super::{is_timeout_kind, ChannelConfig, RoundTrip, TransportError};

/// Client end of a request/reply connection.
///
/// Only one round trip runs at a time; concurrent callers queue on the
/// internal lock for the whole send-then-receive pair.
pub struct Channel {
    peer: SocketAddr,
    config: ChannelConfig,
    state: Mutex<ChannelState>,
}

struct ChannelState {
    stream: Option<TcpStream>,
    reader: FrameReader,
    next_seq: u32,
}

impl Channel {
    /// Connects to `addr`. Failure is reported immediately; there is no
    /// half-connected channel.
    pub fn connect(addr: SocketAddr, config: ChannelConfig) -> Result<Self, TransportError> {
        let stream = TcpStream::connect_timeout(&addr, config.timeout)
            .map_err(|source| TransportError::Connect { addr, source })?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(config.timeout))?;

        tracing::info!("Connected channel to {}", addr);

        Ok(Self {
            peer: addr,
            config,
            state: Mutex::new(ChannelState {
                stream: Some(stream),
                reader: FrameReader::new(config.max_frame_len),
                next_seq: 1,
            }),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Sends `request` and blocks for the matching reply, bounded by the
    /// configured timeout.
    pub fn round_trip(&self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(stream) = state.stream.as_mut() else {
            return Err(TransportError::Closed);
        };

        let seq = state.next_seq;
        state.next_seq = state.next_seq.wrapping_add(1);

        if let Err(err) = write_frame(stream, seq, request, self.config.max_frame_len) {
            let err = match err {
                // Nothing was written, the channel is still in sync.
                TransportError::FrameTooLarge { .. } => return Err(err),
                TransportError::Io(e) if is_timeout_kind(&e) => {
                    TransportError::SendTimeout(self.config.timeout)
                }
                other => other,
            };
            tracing::error!("Send to {} failed, closing channel: {}", self.peer, err);
            state.stream = None;
            return Err(err);
        }

        let deadline = Instant::now() + self.config.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::ReceiveTimeout(self.config.timeout));
            }
            stream.set_read_timeout(Some(remaining))?;

            match state.reader.read_frame(stream) {
                Ok(Some(frame)) if frame.seq == seq => return Ok(frame.payload),
                Ok(Some(frame)) => {
                    // Reply to an earlier request that already timed out.
                    tracing::debug!(
                        peer = %self.peer,
                        expected = seq,
                        got = frame.seq,
                        "Discarding late reply"
                    );
                }
                Ok(None) => {
                    tracing::warn!("Channel to {} closed by peer", self.peer);
                    state.stream = None;
                    return Err(TransportError::Closed);
                }
                Err(TransportError::Io(e)) if is_timeout_kind(&e) => continue,
                Err(err) => {
                    tracing::error!("Receive from {} failed, closing channel: {}", self.peer, err);
                    state.stream = None;
                    return Err(err);
                }
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().stream.is_some()
    }

    /// Closes the connection, honouring the linger duration. Idempotent.
    pub fn close(&self) {
        let stream = self.state.lock().stream.take();
        if let Some(stream) = stream {
            linger_close(stream, self.config.linger);
            tracing::info!("Closed channel to {}", self.peer);
        }
    }
}

impl RoundTrip for Channel {
    fn round_trip(&self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        Channel::round_trip(self, request)
    }

    fn close(&self) {
        Channel::close(self)
    }

    fn is_open(&self) -> bool {
        Channel::is_open(self)
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Half-closes the write side, then drains whatever the peer still sends
/// until it closes too or `linger` runs out.
fn linger_close(mut stream: TcpStream, linger: Duration) {
    let _ = stream.shutdown(Shutdown::Write);

    let deadline = Instant::now() + linger;
    let mut sink = [0u8; 1024];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        if stream.set_read_timeout(Some(remaining)).is_err() {
            break;
        }
        match stream.read(&mut sink) {
            Ok(0) => break,
            Ok(_) => continue,
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ChannelListener, DEFAULT_MAX_FRAME_LEN};
    use std::io::Write;
    use std::net::TcpListener;

    fn config(timeout_ms: u64) -> ChannelConfig {
        ChannelConfig {
            timeout: Duration::from_millis(timeout_ms),
            linger: Duration::from_millis(50),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    #[test]
    fn connect_to_closed_port_is_an_immediate_error() {
        // Bind then drop to get a port with nothing listening.
        let addr = TcpListener::bind("127.0.0.1:0")
            .expect("bind")
            .local_addr()
            .expect("addr");
        let err = Channel::connect(addr, config(500)).err().expect("connect should fail");
        assert!(matches!(err, TransportError::Connect { .. }));
    }

    #[test]
    fn round_trip_echoes_through_server_channel() {
        let listener = ChannelListener::bind_loopback(0, DEFAULT_MAX_FRAME_LEN).expect("bind");
        let addr = listener.local_addr();
        let server = std::thread::spawn(move || {
            let mut peer = listener.accept().expect("accept");
            while let Some(frame) = peer.recv().expect("recv") {
                let mut reply = frame.payload.clone();
                reply.reverse();
                peer.reply(frame.seq, &reply).expect("reply");
            }
        });

        let channel = Channel::connect(addr, config(2_000)).expect("connect");
        assert_eq!(channel.round_trip(b"abc").expect("round trip"), b"cba");
        assert_eq!(channel.round_trip(b"").expect("round trip"), b"");
        channel.close();
        assert!(!channel.is_open());
        assert!(matches!(channel.round_trip(b"x"), Err(TransportError::Closed)));
        server.join().expect("server thread");
    }

    #[test]
    fn late_reply_is_discarded_after_timeout() {
        let listener = ChannelListener::bind_loopback(0, DEFAULT_MAX_FRAME_LEN).expect("bind");
        let addr = listener.local_addr();
        let server = std::thread::spawn(move || {
            let mut peer = listener.accept().expect("accept");
            while let Some(frame) = peer.recv().expect("recv") {
                if frame.payload == b"slow" {
                    std::thread::sleep(Duration::from_millis(400));
                }
                peer.reply(frame.seq, &frame.payload).expect("reply");
            }
        });

        let channel = Channel::connect(addr, config(250)).expect("connect");
        let err = channel.round_trip(b"slow").unwrap_err();
        assert!(matches!(err, TransportError::ReceiveTimeout(_)));
        assert!(!err.is_fatal());

        // The stale "slow" reply arrives first and must not be mistaken for
        // this one.
        let reply = channel.round_trip(b"fast").expect("fast reply");
        assert_eq!(reply, b"fast");
        channel.close();
        server.join().expect("server thread");
    }

    #[test]
    fn close_drains_until_the_peer_hangs_up() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let peer = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            // Wait for the half-close, then flush a trailing burst and hang up.
            let mut inbound = Vec::new();
            stream.read_to_end(&mut inbound).expect("read to eof");
            stream.write_all(&[0u8; 64 * 1024]).expect("trailing burst");
        });

        let channel = Channel::connect(
            addr,
            ChannelConfig {
                linger: Duration::from_secs(5),
                ..config(2_000)
            },
        )
        .expect("connect");
        let started = Instant::now();
        channel.close();

        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(!channel.is_open());
        peer.join().expect("peer thread");
    }

    #[test]
    fn close_gives_up_when_linger_expires() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let peer = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut inbound = Vec::new();
            stream.read_to_end(&mut inbound).expect("read to eof");
            // Never hang up while the client lingers.
            std::thread::sleep(Duration::from_millis(1_500));
        });

        let channel = Channel::connect(
            addr,
            ChannelConfig {
                linger: Duration::from_millis(200),
                ..config(2_000)
            },
        )
        .expect("connect");
        let started = Instant::now();
        channel.close();
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(150));
        assert!(elapsed < Duration::from_millis(1_200));
        peer.join().expect("peer thread");
    }
}
