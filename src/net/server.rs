use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::descriptor::DescriptorCell;
use crate::net::connection::FrameConnection;
use crate::net::hostname::HostnameCache;
use crate::net::packet::hex_dump;
use crate::net::router::{route_connection, ConnectionContext, ProtocolError};
use crate::wake::WakeTrigger;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const INVALID_DATA_LOG_BYTES: usize = 256;

/// Cooperative run flags. Signal handlers only ever set them; the accept
/// loop polls.
#[derive(Debug, Default)]
pub struct ServerControl {
    shutdown: Arc<AtomicBool>,
    reset: Arc<AtomicBool>,
}

impl ServerControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// SIGINT/SIGTERM stop accepting, SIGHUP requests a wake reset.
    pub fn register_signals(&self) -> Result<(), String> {
        for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
            signal_hook::flag::register(signal, Arc::clone(&self.shutdown))
                .map_err(|err| format!("register signal {} failed: {}", signal, err))?;
        }
        signal_hook::flag::register(signal_hook::consts::SIGHUP, Arc::clone(&self.reset))
            .map_err(|err| format!("register SIGHUP failed: {}", err))?;
        Ok(())
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn request_wake_reset(&self) {
        self.reset.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::SeqCst)
    }

    fn take_reset_request(&self) -> bool {
        self.reset.swap(false, Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub bind_addr: String,
    pub max_connections: usize,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub max_frame_bytes: usize,
    /// How long shutdown waits for in-flight handlers.
    pub drain_timeout: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:25565".to_string(),
            max_connections: 64,
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            max_frame_bytes: 2_097_151,
            drain_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug)]
pub struct ServerContext {
    pub descriptor: DescriptorCell,
    pub wake: Option<WakeTrigger>,
    pub hostnames: HostnameCache,
    active_connections: AtomicUsize,
}

impl ServerContext {
    pub fn new(
        descriptor: DescriptorCell,
        wake: Option<WakeTrigger>,
        hostnames: HostnameCache,
    ) -> Self {
        Self {
            descriptor,
            wake,
            hostnames,
            active_connections: AtomicUsize::new(0),
        }
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }

    fn try_acquire(self: &Arc<Self>, max: usize) -> Option<ConnectionGuard> {
        let previous = self.active_connections.fetch_add(1, Ordering::SeqCst);
        if previous >= max {
            self.active_connections.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        Some(ConnectionGuard {
            context: Arc::clone(self),
        })
    }

    fn reset_wake(&self) {
        match self.wake.as_ref() {
            Some(wake) => wake.reset(&self.descriptor),
            None => debug!("wake reset requested but wake trigger is disabled"),
        }
    }
}

struct ConnectionGuard {
    context: Arc<ServerContext>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.context
            .active_connections
            .fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn bind_listener(bind_addr: &str) -> Result<TcpListener, String> {
    let listener =
        TcpListener::bind(bind_addr).map_err(|err| format!("bind {} failed: {}", bind_addr, err))?;
    listener
        .set_nonblocking(true)
        .map_err(|err| format!("listener nonblocking failed: {}", err))?;
    Ok(listener)
}

pub fn run_server(
    config: ListenerConfig,
    context: Arc<ServerContext>,
    control: Arc<ServerControl>,
) -> Result<(), String> {
    let listener = bind_listener(&config.bind_addr)?;
    serve(listener, config, context, control)
}

pub fn serve(
    listener: TcpListener,
    config: ListenerConfig,
    context: Arc<ServerContext>,
    control: Arc<ServerControl>,
) -> Result<(), String> {
    let local = listener
        .local_addr()
        .map_err(|err| format!("listener address failed: {}", err))?;
    info!("Server started on {local}! Waiting for incoming connections...");

    while control.is_running() {
        if control.take_reset_request() {
            context.reset_wake();
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!("connection from {peer}");
                let Some(guard) = context.try_acquire(config.max_connections) else {
                    warn!(
                        "[{peer}] connection limit of {} reached, dropping connection",
                        config.max_connections
                    );
                    continue;
                };
                let config = config.clone();
                let spawned = thread::Builder::new()
                    .name(format!("conn-{peer}"))
                    .spawn(move || {
                        let guard = guard;
                        handle_connection(stream, peer, &config, &guard.context);
                    });
                if let Err(err) = spawned {
                    error!("[{peer}] handler thread spawn failed: {err}");
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(err) => {
                error!("accept error: {err}");
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }

    info!("Shutting down server...");
    drop(listener);
    drain(&context, config.drain_timeout);
    Ok(())
}

fn drain(context: &ServerContext, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while context.active_connections() > 0 {
        if Instant::now() >= deadline {
            warn!(
                "{} connection(s) still running after {:?}, exiting anyway",
                context.active_connections(),
                timeout
            );
            return;
        }
        thread::sleep(ACCEPT_POLL_INTERVAL);
    }
}

/// Error boundary for one connection: nothing escapes this function.
fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    config: &ListenerConfig,
    context: &ServerContext,
) {
    if let Err(err) = configure_stream(&stream, config) {
        warn!("[{peer}] {err}");
        return;
    }

    let client = context
        .hostnames
        .display_name(peer.ip(), context.descriptor.show_hostname());
    let mut ctx = ConnectionContext::new(peer, client);
    let mut conn = FrameConnection::new(stream, config.max_frame_bytes);
    let result = route_connection(
        &mut conn,
        &mut ctx,
        &context.descriptor,
        context.wake.as_ref(),
    );
    let tag = ctx.tag();
    match result {
        Ok(exchange) => debug!("[{tag}] finished: {exchange:?}"),
        Err(ProtocolError::MalformedFrame(err)) => warn!(
            "[{tag}] Received invalid data ({}): {err}",
            hex_dump(conn.received(), INVALID_DATA_LOG_BYTES)
        ),
        Err(ProtocolError::UnknownPacketKind(kind)) => {
            warn!("[{tag}] Sent an unexpected packet: {kind}")
        }
        Err(ProtocolError::UnknownHandshakeState(state)) => info!(
            "[{tag}] Tried to request a login/ping with an unknown state: {state}"
        ),
        Err(err) => warn!("[{tag}] connection error: {err}"),
    }
}

fn configure_stream(stream: &TcpStream, config: &ListenerConfig) -> Result<(), String> {
    stream
        .set_nonblocking(false)
        .map_err(|err| format!("stream blocking mode failed: {}", err))?;
    stream
        .set_read_timeout(Some(config.read_timeout))
        .map_err(|err| format!("read timeout failed: {}", err))?;
    stream
        .set_write_timeout(Some(config.write_timeout))
        .map_err(|err| format!("write timeout failed: {}", err))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ServerDescriptor, StartingText};
    use crate::net::packet::{frame_packet, read_utf, read_var_int, PacketWriter};
    use crate::wake::tests::{FakeMetadata, RecordingBus};
    use std::io::{Read, Write};
    use std::net::Shutdown;
    use std::sync::Barrier;

    struct TestServer {
        addr: SocketAddr,
        control: Arc<ServerControl>,
        context: Arc<ServerContext>,
        handle: Option<thread::JoinHandle<Result<(), String>>>,
    }

    impl TestServer {
        fn start(wake: Option<WakeTrigger>, max_connections: usize) -> Self {
            Self::start_with_timeout(wake, max_connections, Duration::from_secs(2))
        }

        fn start_with_timeout(
            wake: Option<WakeTrigger>,
            max_connections: usize,
            timeout: Duration,
        ) -> Self {
            let descriptor = DescriptorCell::new(ServerDescriptor {
                motd: "Hello".to_string(),
                version_text: "§4Maintenance".to_string(),
                kick_message: "§bSorry\n§aThis server is offline!\n".to_string(),
                player_max: 20,
                player_online: 5,
                samples: vec!["§bexample.com".to_string()],
                show_hostname: false,
                ..ServerDescriptor::default()
            });
            let context = Arc::new(ServerContext::new(
                descriptor,
                wake,
                HostnameCache::with_resolver(8, Box::new(|_| None)),
            ));
            let control = Arc::new(ServerControl::new());
            let listener = bind_listener("127.0.0.1:0").expect("bind");
            let addr = listener.local_addr().expect("addr");
            let config = ListenerConfig {
                bind_addr: addr.to_string(),
                max_connections,
                read_timeout: timeout,
                write_timeout: timeout,
                drain_timeout: Duration::from_secs(5),
                ..ListenerConfig::default()
            };
            let handle = {
                let context = Arc::clone(&context);
                let control = Arc::clone(&control);
                thread::spawn(move || serve(listener, config, context, control))
            };
            Self {
                addr,
                control,
                context,
                handle: Some(handle),
            }
        }

        fn connect(&self) -> TcpStream {
            let stream = TcpStream::connect(self.addr).expect("connect");
            stream
                .set_read_timeout(Some(Duration::from_secs(5)))
                .expect("client timeout");
            stream
        }
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            self.control.request_shutdown();
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
        }
    }

    fn handshake(next_state: u32) -> Vec<u8> {
        let mut body = PacketWriter::new();
        body.write_var_int(763);
        body.write_utf("localhost");
        body.write_unsigned_short(25565);
        body.write_var_int(next_state);
        frame_packet(0, body.as_slice())
    }

    fn login_start(name: &str) -> Vec<u8> {
        let mut body = PacketWriter::new();
        body.write_utf(name);
        frame_packet(0, body.as_slice())
    }

    /// Sends `request`, half-closes, and collects everything until the server closes.
    fn exchange(stream: &mut TcpStream, request: &[u8]) -> Vec<u8> {
        stream.write_all(request).expect("write");
        stream.shutdown(Shutdown::Write).expect("half close");
        let mut response = Vec::new();
        stream.read_to_end(&mut response).expect("read to end");
        response
    }

    fn split_frames(output: &[u8]) -> Vec<(u32, Vec<u8>)> {
        let mut frames = Vec::new();
        let mut offset = 0;
        while offset < output.len() {
            let (len, body_start) = read_var_int(output, offset).expect("len");
            let end = body_start + len as usize;
            let (kind, payload_start) = read_var_int(output, body_start).expect("kind");
            frames.push((kind, output[payload_start..end].to_vec()));
            offset = end;
        }
        frames
    }

    fn json(payload: &[u8]) -> serde_json::Value {
        let (text, _) = read_utf(payload, 0).expect("utf");
        serde_json::from_str(&text).expect("json")
    }

    #[test]
    fn status_handshake_yields_single_response_then_close() {
        let server = TestServer::start(None, 8);
        let mut stream = server.connect();
        let response = exchange(&mut stream, &handshake(1));
        let frames = split_frames(&response);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, 0);
        let status = json(&frames[0].1);
        assert_eq!(status["players"]["online"], 5);
        assert_eq!(status["players"]["max"], 20);
        assert_eq!(status["description"]["text"], "Hello");
        assert!(status.get("favicon").is_none());
    }

    #[test]
    fn status_connection_closes_after_quiet_follow_up() {
        let server = TestServer::start_with_timeout(None, 8, Duration::from_millis(300));
        let mut stream = server.connect();
        stream.write_all(&handshake(1)).expect("write");
        let mut response = Vec::new();
        stream.read_to_end(&mut response).expect("server closes after timeout");
        assert_eq!(split_frames(&response).len(), 1);
    }

    #[test]
    fn ping_yields_identical_pong() {
        let server = TestServer::start(None, 8);
        let mut stream = server.connect();
        let payload = [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x42];
        let response = exchange(&mut stream, &frame_packet(1, &payload));
        assert_eq!(response, vec![9, 1, 0, 0, 0, 0, 0, 0, 0, 0x42]);
    }

    #[test]
    fn login_yields_disconnect_with_kick_message() {
        let bus = Arc::new(RecordingBus::default());
        let wake = WakeTrigger::new(
            Arc::new(FakeMetadata::default()),
            bus.clone(),
            StartingText::default(),
        );
        let server = TestServer::start(Some(wake), 8);
        let mut request = handshake(2);
        request.extend(login_start("Steve"));
        let mut stream = server.connect();
        let response = exchange(&mut stream, &request);
        let frames = split_frames(&response);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, 0);
        assert_eq!(json(&frames[0].1)["text"], "§bSorry\n§aThis server is offline!\n");
        assert_eq!(bus.count(), 1);
        assert_eq!(bus.published.lock().expect("bus")[0].client_address, "127.0.0.1");

        // The next status reflects the starting texts.
        let mut stream = server.connect();
        let status = json(&split_frames(&exchange(&mut stream, &handshake(1)))[0].1);
        assert_eq!(status["version"]["name"], "Starting");
    }

    #[test]
    fn concurrent_logins_publish_one_notification() {
        let bus = Arc::new(RecordingBus::default());
        let wake = WakeTrigger::new(
            Arc::new(FakeMetadata {
                delay: Duration::from_millis(50),
                ..FakeMetadata::default()
            }),
            bus.clone(),
            StartingText::default(),
        );
        let server = TestServer::start(Some(wake), 32);
        let clients = 8;
        let barrier = Arc::new(Barrier::new(clients));
        let handles: Vec<_> = (0..clients)
            .map(|idx| {
                let barrier = Arc::clone(&barrier);
                let mut stream = server.connect();
                thread::spawn(move || {
                    let mut request = handshake(2);
                    request.extend(login_start(&format!("player{idx}")));
                    barrier.wait();
                    exchange(&mut stream, &request)
                })
            })
            .collect();
        for handle in handles {
            let response = handle.join().expect("client thread");
            let frames = split_frames(&response);
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0].0, 0);
        }
        assert_eq!(bus.count(), 1);
    }

    #[test]
    fn truncated_frame_gets_no_reply_and_spares_other_connections() {
        let server = TestServer::start(None, 8);
        let mut broken = server.connect();
        let mut healthy = server.connect();

        // Declares 0x20 body bytes but sends only three.
        broken.write_all(&[0x20, 0x00, 0x01, 0x02]).expect("write");
        let healthy_response = exchange(&mut healthy, &handshake(1));
        let broken_response = exchange(&mut broken, &[]);

        assert!(broken_response.is_empty());
        let frames = split_frames(&healthy_response);
        assert_eq!(frames.len(), 1);
        assert_eq!(json(&frames[0].1)["players"]["online"], 5);
    }

    #[test]
    fn garbage_does_not_stop_the_listener() {
        let server = TestServer::start(None, 8);
        let mut garbage = server.connect();
        assert!(exchange(&mut garbage, &[0xff, 0xff, 0xff, 0xff, 0xff, 0xff]).is_empty());
        let mut stream = server.connect();
        assert_eq!(split_frames(&exchange(&mut stream, &handshake(1))).len(), 1);
    }

    #[test]
    fn connection_cap_drops_excess_connections() {
        let server = TestServer::start(None, 1);
        let idle = server.connect();
        // Let the idle connection occupy the only slot.
        for _ in 0..50 {
            if server.context.active_connections() == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(server.context.active_connections(), 1);

        let mut rejected = server.connect();
        let mut response = Vec::new();
        let _ = rejected.read_to_end(&mut response);
        assert!(response.is_empty());
        assert_eq!(server.context.active_connections(), 1);
        drop(idle);
    }

    #[test]
    fn shutdown_waits_for_in_flight_wake() {
        let bus = Arc::new(RecordingBus::default());
        let wake = WakeTrigger::new(
            Arc::new(FakeMetadata {
                delay: Duration::from_millis(800),
                ..FakeMetadata::default()
            }),
            bus.clone(),
            StartingText::default(),
        );
        let mut server = TestServer::start(Some(wake), 8);
        let mut request = handshake(2);
        request.extend(login_start("Steve"));
        let mut stream = server.connect();
        stream.write_all(&request).expect("write");
        for _ in 0..50 {
            if server.context.active_connections() == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        thread::sleep(Duration::from_millis(200));

        server.control.request_shutdown();
        let handle = server.handle.take().expect("server handle");
        handle.join().expect("server thread").expect("serve");
        assert_eq!(bus.count(), 1);
        assert_eq!(server.context.active_connections(), 0);
    }

    #[test]
    fn released_slot_is_reusable() {
        let server = TestServer::start(None, 1);
        let mut first = server.connect();
        assert_eq!(split_frames(&exchange(&mut first, &handshake(1))).len(), 1);
        for _ in 0..50 {
            if server.context.active_connections() == 0 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        let mut second = server.connect();
        assert_eq!(split_frames(&exchange(&mut second, &handshake(1))).len(), 1);
    }

    #[test]
    fn reset_request_reopens_wake_gate() {
        let bus = Arc::new(RecordingBus::default());
        let wake = WakeTrigger::new(
            Arc::new(FakeMetadata::default()),
            bus.clone(),
            StartingText::default(),
        );
        let server = TestServer::start(Some(wake), 8);
        let mut request = handshake(2);
        request.extend(login_start("Alex"));
        exchange(&mut server.connect(), &request);
        assert_eq!(bus.count(), 1);

        server.control.request_wake_reset();
        for _ in 0..50 {
            let reopened = server
                .context
                .wake
                .as_ref()
                .is_some_and(|wake| !wake.is_triggering());
            if reopened {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(server.context.descriptor.snapshot().version_text, "§4Maintenance");
        exchange(&mut server.connect(), &request);
        assert_eq!(bus.count(), 2);
    }
}
