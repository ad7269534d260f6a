//! UDP socket ownership and the transport event loop.
//!
//! A [`TransportSocket`] owns one non-blocking UDP socket and one
//! background thread that multiplexes every peer over it. Each loop
//! iteration:
//!
//! 1. drains a bounded batch of inbound datagrams (decode, route by kind,
//!    feed the reliability state machines),
//! 2. drains a bounded batch from the outbound queue (application sends
//!    and peer-close commands),
//! 3. services timers (ack flushes, retransmissions, pings, inactivity
//!    teardown),
//! 4. sleeps briefly when neither direction had work.
//!
//! All per-peer reliability state is confined to the loop thread and
//! never locked. The application talks to the loop through two channels:
//! the outbound queue going in and [`TransportEvent`]s coming out. The
//! shared [`Peer`] table carries only what both sides genuinely need
//! (address, MTU, session crypto).

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::core::constants::{
    DEAD_INTERVAL, DEFAULT_MTU, IDLE_SLEEP, MAX_RETRANSMITS, PING_INTERVAL, RECV_BATCH,
    RECV_BUFFER_SIZE, RETRANSMIT_BATCH, SEND_BATCH, UNRELIABLE_HEADER_SIZE,
};
use crate::core::{SequenceSpace, TransportError, TransportResult};
use crate::crypto::SessionKey;
use crate::reliability::{ReassemblyBuffer, RetransmitBuffer};
use crate::transport::event::TransportEvent;
use crate::transport::peer::Peer;
use crate::transport::rtt::RttEstimator;
use crate::wire::bytes::{get_i32_le, get_u64_le, put_i32_le};
use crate::wire::codec::WireError;
use crate::wire::packet::PacketKind;

/// Tunables for a [`TransportSocket`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// MTU assigned to peers on first contact.
    pub default_mtu: u16,
    /// Retransmission attempts per packet before the peer is declared
    /// unreachable.
    pub retransmit_budget: u32,
    /// Interval between RTT probe pings per peer.
    pub ping_interval: Duration,
    /// Silence span after which a peer is dropped.
    pub dead_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            default_mtu: DEFAULT_MTU,
            retransmit_budget: MAX_RETRANSMITS,
            ping_interval: PING_INTERVAL,
            dead_interval: DEAD_INTERVAL,
        }
    }
}

/// Commands the application hands to the loop thread.
enum Outbound {
    /// A fully encoded datagram; reliable ones carry their sequence so the
    /// loop can stash the wire image for retransmission.
    Packet {
        peer: Arc<Peer>,
        wire: Vec<u8>,
        sequence: Option<i32>,
    },
    /// Drop the loop-confined session state for an address.
    Close(SocketAddr),
}

/// State reachable from both the application and the loop thread.
struct Shared {
    udp: UdpSocket,
    config: TransportConfig,
    peers: Mutex<HashMap<SocketAddr, Arc<Peer>>>,
    sequences: SequenceSpace,
    outbound_rx: Mutex<mpsc::Receiver<Outbound>>,
    events_tx: mpsc::Sender<TransportEvent>,
    running: AtomicBool,
    stop: AtomicBool,
}

/// Loop-confined per-peer state; never shared, never locked.
struct PeerSession {
    peer: Arc<Peer>,
    rtt: RttEstimator,
    retransmit: RetransmitBuffer,
    reassembly: ReassemblyBuffer,
    last_heard: Instant,
    last_ping: Instant,
    auth_failures: u32,
}

impl PeerSession {
    fn new(peer: Arc<Peer>, now: Instant) -> Self {
        Self {
            peer,
            rtt: RttEstimator::new(),
            retransmit: RetransmitBuffer::new(),
            reassembly: ReassemblyBuffer::new(),
            last_heard: now,
            last_ping: now,
            auth_failures: 0,
        }
    }
}

/// A bound UDP transport endpoint.
///
/// Created with [`bind`](Self::bind), driven by a background thread after
/// [`start`](Self::start). Sends are queued from any thread; everything
/// the transport learns comes back as [`TransportEvent`]s.
pub struct TransportSocket {
    shared: Arc<Shared>,
    outbound_tx: mpsc::Sender<Outbound>,
    events_rx: Mutex<mpsc::Receiver<TransportEvent>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TransportSocket {
    /// Bind to an address with the default configuration.
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        Self::bind_with_config(addr, TransportConfig::default())
    }

    /// Bind to an address. The socket is placed in non-blocking mode; the
    /// loop thread is spawned later by [`start`](Self::start).
    pub fn bind_with_config<A: ToSocketAddrs>(
        addr: A,
        config: TransportConfig,
    ) -> io::Result<Self> {
        let udp = UdpSocket::bind(addr)?;
        udp.set_nonblocking(true)?;

        let (outbound_tx, outbound_rx) = mpsc::channel();
        let (events_tx, events_rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            udp,
            config,
            peers: Mutex::new(HashMap::new()),
            sequences: SequenceSpace::new(),
            outbound_rx: Mutex::new(outbound_rx),
            events_tx,
            running: AtomicBool::new(false),
            stop: AtomicBool::new(false),
        });
        Ok(Self {
            shared,
            outbound_tx,
            events_rx: Mutex::new(events_rx),
            thread: Mutex::new(None),
        })
    }

    /// The local address the socket is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.shared.udp.local_addr()
    }

    /// Spawn the loop thread and wait until it is running. Calling this
    /// on an already running transport is a no-op; after [`stop`](Self::stop)
    /// it starts a fresh loop over the same socket.
    pub fn start(&self) -> TransportResult<()> {
        let mut slot = lock(&self.thread);
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }
        if let Some(handle) = slot.take() {
            let _ = handle.join();
        }

        self.shared.stop.store(false, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("tether-transport".to_string())
            .spawn(move || run_loop(shared))?;

        while !self.shared.running.load(Ordering::SeqCst) && !handle.is_finished() {
            thread::sleep(Duration::from_millis(1));
        }
        *slot = Some(handle);
        Ok(())
    }

    /// Stop the loop thread and wait for it to exit. Idempotent.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = lock(&self.thread).take() {
            let _ = handle.join();
        }
    }

    /// Whether the loop thread is currently running.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Queue one unreliable message. Encrypted when the peer has a session
    /// key; oversized payloads are rejected here, nothing is queued.
    pub fn send_unreliable(&self, addr: SocketAddr, payload: &[u8]) -> TransportResult<()> {
        let peer = self.peer_or_insert(addr);
        let wire = peer.encode_unreliable(payload)?;
        self.enqueue(Outbound::Packet {
            peer,
            wire,
            sequence: None,
        })
    }

    /// Queue one reliable message, fragmenting transparently when it
    /// exceeds the peer's MTU. Delivery is retried until acknowledged or
    /// the retransmit budget declares the peer unreachable.
    pub fn send_reliable(&self, addr: SocketAddr, payload: &[u8]) -> TransportResult<()> {
        let peer = self.peer_or_insert(addr);
        let packets = peer.encode_reliable(&self.shared.sequences, payload)?;
        for (sequence, wire) in packets {
            self.enqueue(Outbound::Packet {
                peer: Arc::clone(&peer),
                wire,
                sequence: Some(sequence),
            })?;
        }
        Ok(())
    }

    /// Queue one handshake/probe packet. Only control kinds are accepted;
    /// the packet goes out unencrypted and unreliable, mirroring how the
    /// peer's control packets surface as [`TransportEvent::Control`].
    pub fn send_control(
        &self,
        addr: SocketAddr,
        kind: PacketKind,
        payload: &[u8],
    ) -> TransportResult<()> {
        if !kind.is_control() {
            return Err(TransportError::NotControlKind(kind));
        }
        let peer = self.peer_or_insert(addr);
        let wire = peer.encode_plain(kind, payload)?;
        self.enqueue(Outbound::Packet {
            peer,
            wire,
            sequence: None,
        })
    }

    /// Install a session key for an address, creating the peer entry if
    /// needed. Message traffic both ways is encrypted from here on.
    pub fn set_peer_key(&self, addr: SocketAddr, key: &SessionKey) {
        self.peer_or_insert(addr).set_session_key(key);
    }

    /// Adjust a peer's MTU, creating the peer entry if needed.
    pub fn set_peer_mtu(&self, addr: SocketAddr, mtu: u16) {
        self.peer_or_insert(addr).set_mtu(mtu);
    }

    /// The shared handle for a known peer.
    pub fn peer(&self, addr: SocketAddr) -> Option<Arc<Peer>> {
        lock(&self.shared.peers).get(&addr).cloned()
    }

    /// Forget a peer: its key, MTU and all reliability state. In-flight
    /// reliable packets to it are abandoned.
    pub fn close_peer(&self, addr: SocketAddr) {
        lock(&self.shared.peers).remove(&addr);
        // Session state is loop-confined; reaches the loop as a command.
        if self.is_running() {
            let _ = self.outbound_tx.send(Outbound::Close(addr));
        }
    }

    /// Take the next pending event without blocking.
    pub fn poll_event(&self) -> Option<TransportEvent> {
        match lock(&self.events_rx).try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Wait up to `timeout` for the next event.
    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<TransportEvent> {
        match lock(&self.events_rx).recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    fn peer_or_insert(&self, addr: SocketAddr) -> Arc<Peer> {
        let mut peers = lock(&self.shared.peers);
        let peer = peers
            .entry(addr)
            .or_insert_with(|| Arc::new(Peer::new(addr, self.shared.config.default_mtu)));
        Arc::clone(peer)
    }

    fn enqueue(&self, outbound: Outbound) -> TransportResult<()> {
        if !self.is_running() {
            return Err(TransportError::Closed);
        }
        self.outbound_tx
            .send(outbound)
            .map_err(|_| TransportError::Closed)
    }
}

impl Drop for TransportSocket {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // The protected state stays valid even if a holder panicked.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// EVENT LOOP
// =============================================================================

fn run_loop(shared: Arc<Shared>) {
    // Held for the whole incarnation; released on exit for the next one.
    let outbound = lock(&shared.outbound_rx);
    let mut sessions: HashMap<SocketAddr, PeerSession> = HashMap::new();
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    // Ping timestamps count microseconds from here; pongs echo them back.
    let epoch = Instant::now();

    shared.running.store(true, Ordering::SeqCst);
    log::debug!("transport loop running on {:?}", shared.udp.local_addr().ok());

    while !shared.stop.load(Ordering::SeqCst) {
        let received = match drain_inbound(&shared, &mut sessions, &mut buf, epoch) {
            Ok(received) => received,
            Err(err) => {
                log::error!("transport socket failed: {err}");
                let _ = shared.events_tx.send(TransportEvent::Fatal(err));
                break;
            }
        };
        let sent = drain_outbound(&shared, &outbound, &mut sessions);
        service_timers(&shared, &mut sessions, epoch);

        if received == 0 && sent == 0 {
            thread::sleep(IDLE_SLEEP);
        }
    }

    shared.running.store(false, Ordering::SeqCst);
    log::debug!("transport loop stopped");
}

fn drain_inbound(
    shared: &Shared,
    sessions: &mut HashMap<SocketAddr, PeerSession>,
    buf: &mut [u8],
    epoch: Instant,
) -> io::Result<usize> {
    let mut received = 0;
    while received < RECV_BATCH {
        match shared.udp.recv_from(buf) {
            Ok((len, from)) => {
                received += 1;
                handle_datagram(shared, sessions, &buf[..len], from, epoch);
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
            // ICMP unreachable bounced back from an earlier send; the
            // retransmit budget deals with genuinely dead peers.
            Err(err) if err.kind() == io::ErrorKind::ConnectionReset => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(received)
}

fn handle_datagram(
    shared: &Shared,
    sessions: &mut HashMap<SocketAddr, PeerSession>,
    datagram: &[u8],
    from: SocketAddr,
    epoch: Instant,
) {
    let now = Instant::now();
    let (peer, fresh) = {
        let mut peers = lock(&shared.peers);
        match peers.get(&from) {
            Some(peer) => (Arc::clone(peer), false),
            None => {
                let peer = Arc::new(Peer::new(from, shared.config.default_mtu));
                peers.insert(from, Arc::clone(&peer));
                (peer, true)
            }
        }
    };
    if fresh {
        log::debug!("new peer {from}");
        let _ = shared
            .events_tx
            .send(TransportEvent::PeerConnected { addr: from });
    }

    let session = sessions
        .entry(from)
        .or_insert_with(|| PeerSession::new(peer, now));
    session.last_heard = now;

    let packet = match session.peer.decode(datagram) {
        Ok(packet) => packet,
        Err(WireError::AuthenticationFailed) => {
            session.auth_failures += 1;
            log::warn!(
                "authentication failure #{} from {from}",
                session.auth_failures
            );
            return;
        }
        Err(err) => {
            log::debug!("dropping malformed datagram from {from}: {err}");
            return;
        }
    };

    match packet.kind {
        PacketKind::Ping => match session.peer.encode_plain(PacketKind::Pong, &packet.payload) {
            Ok(wire) => send_datagram(shared, from, &wire),
            Err(err) => log::debug!("cannot answer ping from {from}: {err}"),
        },
        PacketKind::Pong => {
            if let Some(sent_micros) = get_u64_le(&packet.payload, 0) {
                let now_micros = now.duration_since(epoch).as_micros() as u64;
                let sample = now_micros.saturating_sub(sent_micros);
                session.rtt.push_sample(Duration::from_micros(sample));
            }
        }
        PacketKind::AckBatch => match decode_ack_batch(&packet.payload) {
            Some(sequences) => {
                let acked = session.retransmit.acknowledge(&sequences);
                if acked > 0 {
                    log::trace!("{from} acknowledged {acked} packet(s)");
                }
            }
            None => log::debug!("dropping misaligned ack batch from {from}"),
        },
        PacketKind::Message => {
            if let Some(header) = packet.header {
                if let Some(payload) = session.reassembly.on_message(&header, packet.payload, now) {
                    let _ = shared
                        .events_tx
                        .send(TransportEvent::Message { from, payload });
                }
            } else {
                let _ = shared.events_tx.send(TransportEvent::Message {
                    from,
                    payload: packet.payload,
                });
            }
        }
        PacketKind::Fragment => {
            if let Some(header) = packet.header {
                let capacity = session.peer.fragment_capacity(packet.flags.is_encrypted());
                if let Some(payload) =
                    session.reassembly.on_fragment(&header, packet.payload, capacity, now)
                {
                    let _ = shared
                        .events_tx
                        .send(TransportEvent::Message { from, payload });
                }
            }
        }
        PacketKind::Certificate
        | PacketKind::CertificateRequest
        | PacketKind::KeyExchange
        | PacketKind::KeyExchangeRequest
        | PacketKind::MtuProbe => {
            let _ = shared.events_tx.send(TransportEvent::Control {
                from,
                kind: packet.kind,
                payload: packet.payload,
            });
        }
    }
}

fn drain_outbound(
    shared: &Shared,
    outbound: &mpsc::Receiver<Outbound>,
    sessions: &mut HashMap<SocketAddr, PeerSession>,
) -> usize {
    let mut handled = 0;
    while handled < SEND_BATCH {
        let command = match outbound.try_recv() {
            Ok(command) => command,
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
        };
        handled += 1;
        match command {
            Outbound::Packet {
                peer,
                wire,
                sequence,
            } => {
                let now = Instant::now();
                let addr = peer.addr();
                let session = sessions
                    .entry(addr)
                    .or_insert_with(|| PeerSession::new(peer, now));
                send_datagram(shared, addr, &wire);
                if let Some(sequence) = sequence {
                    session.retransmit.insert(sequence, wire, now);
                }
            }
            Outbound::Close(addr) => {
                sessions.remove(&addr);
            }
        }
    }
    handled
}

fn service_timers(
    shared: &Shared,
    sessions: &mut HashMap<SocketAddr, PeerSession>,
    epoch: Instant,
) {
    let now = Instant::now();
    let mut dropped: Vec<(SocketAddr, TransportEvent)> = Vec::new();

    for (addr, session) in sessions.iter_mut() {
        if now.duration_since(session.last_heard) >= shared.config.dead_interval {
            log::debug!(
                "peer {addr} silent for {:?}, dropping",
                shared.config.dead_interval
            );
            dropped.push((*addr, TransportEvent::PeerTimedOut { addr: *addr }));
            continue;
        }

        flush_acks(shared, session);

        let outcome = session.retransmit.tick_at(
            now,
            session.rtt.estimate(),
            shared.config.retransmit_budget,
            RETRANSMIT_BATCH,
        );
        if outcome.exhausted {
            log::warn!(
                "peer {addr} unreachable after {} attempts",
                shared.config.retransmit_budget
            );
            dropped.push((*addr, TransportEvent::PeerUnreachable { addr: *addr }));
            continue;
        }
        if !outcome.retransmit.is_empty() {
            log::debug!(
                "retransmitting {} packet(s) to {addr}",
                outcome.retransmit.len()
            );
            for sequence in &outcome.retransmit {
                if let Some(wire) = session.retransmit.wire(*sequence) {
                    send_datagram(shared, *addr, wire);
                }
            }
        }

        if now.duration_since(session.last_ping) >= shared.config.ping_interval {
            session.last_ping = now;
            let stamp = now.duration_since(epoch).as_micros() as u64;
            match session.peer.encode_plain(PacketKind::Ping, &stamp.to_le_bytes()) {
                Ok(wire) => send_datagram(shared, *addr, &wire),
                Err(err) => log::debug!("cannot ping {addr}: {err}"),
            }
        }
    }

    for (addr, event) in dropped {
        sessions.remove(&addr);
        lock(&shared.peers).remove(&addr);
        let _ = shared.events_tx.send(event);
    }
}

fn flush_acks(shared: &Shared, session: &mut PeerSession) {
    if !session.reassembly.has_pending_acks() {
        return;
    }
    let acks = session.reassembly.take_pending_acks();
    let per_packet = (session.peer.mtu() as usize - UNRELIABLE_HEADER_SIZE) / 4;
    for chunk in acks.chunks(per_packet) {
        let mut payload = vec![0u8; chunk.len() * 4];
        for (i, sequence) in chunk.iter().enumerate() {
            put_i32_le(&mut payload, i * 4, *sequence);
        }
        match session.peer.encode_plain(PacketKind::AckBatch, &payload) {
            Ok(wire) => send_datagram(shared, session.peer.addr(), &wire),
            Err(err) => log::debug!("cannot flush acks to {}: {err}", session.peer.addr()),
        }
    }
}

fn send_datagram(shared: &Shared, addr: SocketAddr, wire: &[u8]) {
    // Loss is the medium's native failure mode; reliability recovers it.
    if let Err(err) = shared.udp.send_to(wire, addr) {
        log::debug!("send to {addr} failed: {err}");
    }
}

fn decode_ack_batch(payload: &[u8]) -> Option<Vec<i32>> {
    if payload.len() % 4 != 0 {
        return None;
    }
    let mut sequences = Vec::with_capacity(payload.len() / 4);
    let mut offset = 0;
    while offset < payload.len() {
        sequences.push(get_i32_le(payload, offset)?);
        offset += 4;
    }
    Some(sequences)
}
