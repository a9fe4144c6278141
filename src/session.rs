//! Per-connection SSTP session.
//!
//! A session runs as three tasks:
//!
//! ```text
//!            +-----------------+   Packet    +---------------+
//! client --> | session task    | ----------> | writer task   | --> client
//!            | decode/dispatch |             | (sole writer) |
//!            +-----------------+             +---------------+
//!                 |  escape                          ^
//!                 v                                  | Packet::Data
//!            link stdin                        +---------------+
//!                                link stdout-> | downlink task |
//!                                              | unescape      |
//!                                              +---------------+
//! ```
//!
//! Bytes cross task boundaries only by value over bounded channels. The
//! downlink task owns the session's [`Unescaper`]; link exit or failure is
//! reported back to the session task as a [`LinkEvent`].

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, trace, warn};

use crate::codec::SstpCodec;
use crate::config::ServerConfig;
use crate::diagnostics::ServerStats;
use crate::frame::{connect_ack, disconnect_ack, echo_response};
use crate::link::{LinkProcess, LinkState};
use crate::ppp::{PppFramer, Unescaper};
use crate::types::{
    AttributeId, ControlMessage, DataMessage, MessageType, Packet, Result, SessionId, SstpError,
};

const LINK_EVENT_CAPACITY: usize = 4;

/// Control state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingConnect,
    Connected,
    Terminated,
}

/// Reported by the downlink task when it stops
#[derive(Debug)]
pub enum LinkEvent {
    /// EOF on the link process stdout
    Exited,
    Failed(SstpError),
}

/// SSTP control state machine for one client.
pub struct Session {
    id: SessionId,
    state: SessionState,
    link: LinkState,
    framer: PppFramer,
    config: Arc<ServerConfig>,
    stats: Arc<ServerStats>,
    outbound: mpsc::Sender<Packet>,
    events: mpsc::Sender<LinkEvent>,
    downlink: Option<JoinHandle<()>>,
}

impl Session {
    /// Create a session writing replies to `outbound`.
    ///
    /// The returned receiver yields link events and must be polled by
    /// whoever drives the session.
    pub fn new(
        id: SessionId,
        config: Arc<ServerConfig>,
        stats: Arc<ServerStats>,
        outbound: mpsc::Sender<Packet>,
    ) -> (Self, mpsc::Receiver<LinkEvent>) {
        let (events, events_rx) = mpsc::channel(LINK_EVENT_CAPACITY);
        let framer = PppFramer::new(config.link.accm(), config.link.hdlc_flags);
        let session = Self {
            id,
            state: SessionState::AwaitingConnect,
            link: LinkState::NotStarted,
            framer,
            config,
            stats,
            outbound,
            events,
            downlink: None,
        };
        (session, events_rx)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_link_running(&self) -> bool {
        self.link.is_running()
    }

    /// Dispatch one packet read from the client.
    pub async fn handle_packet(&mut self, packet: Packet) -> Result<()> {
        match packet {
            Packet::Control(msg) => self.handle_control(msg).await,
            Packet::Data(msg) => self.handle_data(msg).await,
        }
    }

    async fn handle_control(&mut self, msg: ControlMessage) -> Result<()> {
        debug!(
            session = self.id,
            "read: {} ({} attributes)",
            msg.message_type,
            msg.attributes.len()
        );

        match msg.message_type {
            MessageType::CallConnectRequest if self.state == SessionState::AwaitingConnect => {
                self.send(Packet::Control(connect_ack())).await?;
                self.start_link()?;
                self.state = SessionState::Connected;
                info!(session = self.id, "Call connected");
            }
            MessageType::CallConnectRequest => {
                warn!(
                    session = self.id,
                    "Ignoring CallConnectRequest in state {:?}", self.state
                );
            }
            MessageType::CallDisconnect => {
                self.send(Packet::Control(disconnect_ack())).await?;
                self.stop_link().await?;
                self.state = SessionState::Terminated;
                info!(session = self.id, "Call disconnected");
            }
            MessageType::EchoRequest => {
                self.send(Packet::Control(echo_response())).await?;
            }
            MessageType::CallAbort => {
                if let Some(status) = msg.attribute(AttributeId::StatusInfo) {
                    warn!(
                        session = self.id,
                        "Call aborted with status {:02x?}", &status.data[..]
                    );
                }
                self.stop_link().await?;
                self.state = SessionState::Terminated;
                return Err(SstpError::CallAborted);
            }
            other => {
                debug!(session = self.id, "Ignoring control message {}", other);
            }
        }
        Ok(())
    }

    async fn handle_data(&mut self, msg: DataMessage) -> Result<()> {
        let Some(process) = self.link.process_mut() else {
            return Err(SstpError::SubprocessNotStarted);
        };

        let block = self.framer.encode(&msg.payload);
        process.write(&block).await?;
        self.stats.record_uplink(msg.payload.len());
        trace!(
            session = self.id,
            "{} payload bytes written to link as {}",
            msg.payload.len(),
            block.len()
        );
        Ok(())
    }

    /// React to the downlink task stopping.
    pub async fn on_link_event(&mut self, event: LinkEvent) -> Result<()> {
        self.downlink = None;
        self.link.stop().await?;
        match event {
            LinkEvent::Exited => Err(SstpError::SubprocessExited),
            LinkEvent::Failed(e) => Err(e),
        }
    }

    /// Stop the link process and release the session.
    pub async fn shutdown(mut self) {
        if let Err(e) = self.stop_link().await {
            warn!(session = self.id, "Failed to stop link process: {}", e);
        }
        self.state = SessionState::Terminated;
    }

    fn start_link(&mut self) -> Result<()> {
        let (process, stdout) = LinkProcess::spawn(&self.config.link)?;

        self.downlink = Some(tokio::spawn(run_downlink(
            self.id,
            stdout,
            self.config.session.read_buffer_size,
            self.outbound.clone(),
            self.events.clone(),
            self.stats.clone(),
        )));
        self.link = LinkState::Running(process);
        Ok(())
    }

    async fn stop_link(&mut self) -> Result<()> {
        if let Some(downlink) = self.downlink.take() {
            downlink.abort();
        }
        if self.link.stop().await? {
            info!(session = self.id, "Link process stopped");
        }
        Ok(())
    }

    async fn send(&self, packet: Packet) -> Result<()> {
        if let Packet::Control(msg) = &packet {
            debug!(session = self.id, "write: {}", msg.message_type);
        }
        self.outbound
            .send(packet)
            .await
            .map_err(|_| SstpError::PeerDisconnected)
    }
}

/// Drain the link process output, forwarding each frame as a data message.
pub async fn run_downlink<R>(
    id: SessionId,
    mut reader: R,
    read_size: usize,
    outbound: mpsc::Sender<Packet>,
    events: mpsc::Sender<LinkEvent>,
    stats: Arc<ServerStats>,
) where
    R: AsyncRead + Unpin,
{
    let mut unescaper = Unescaper::new(Vec::new());
    let mut buf = vec![0u8; read_size.max(1)];

    let event = loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                unescaper.flush();
                match forward_frames(&mut unescaper, &outbound, &stats).await {
                    Ok(()) => break LinkEvent::Exited,
                    Err(e) => break LinkEvent::Failed(e),
                }
            }
            Ok(n) => {
                trace!(session = id, "{} bytes read from link", n);
                unescaper.feed(&buf[..n]);
                if let Err(e) = forward_frames(&mut unescaper, &outbound, &stats).await {
                    break LinkEvent::Failed(e);
                }
            }
            Err(e) => break LinkEvent::Failed(e.into()),
        }
    };

    debug!(session = id, "Downlink finished: {:?}", event);
    let _ = events.send(event).await;
}

async fn forward_frames(
    unescaper: &mut Unescaper<Vec<Bytes>>,
    outbound: &mpsc::Sender<Packet>,
    stats: &ServerStats,
) -> Result<()> {
    for frame in std::mem::take(unescaper.sink_mut()) {
        let len = frame.len();
        let msg = DataMessage::new(frame)?;
        outbound
            .send(Packet::Data(msg))
            .await
            .map_err(|_| SstpError::PeerDisconnected)?;
        stats.record_downlink(len);
    }
    Ok(())
}

/// Sole writer to the client connection.
async fn run_writer<T>(
    id: SessionId,
    mut sink: SplitSink<Framed<T, SstpCodec>, Packet>,
    mut outbound: mpsc::Receiver<Packet>,
) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(packet) = outbound.recv().await {
        sink.send(packet).await?;
    }
    trace!(session = id, "Writer draining");
    sink.close().await
}

async fn next_packet<S>(stream: &mut S, limit: Option<Duration>) -> Option<Result<Packet>>
where
    S: Stream<Item = Result<Packet>> + Unpin,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, stream.next()).await {
            Ok(next) => next,
            Err(_) => Some(Err(SstpError::Timeout)),
        },
        None => stream.next().await,
    }
}

/// Run one session over an established SSTP stream until it ends.
///
/// Peer EOF and link process exit end the session with `Ok(())`.
pub async fn serve<T>(
    id: SessionId,
    io: Framed<T, SstpCodec>,
    config: Arc<ServerConfig>,
    stats: Arc<ServerStats>,
) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    info!(session = id, "Starting session");
    stats.session_opened();

    let (sink, mut stream) = io.split();
    let (outbound, outbound_rx) = mpsc::channel(config.session.channel_capacity);
    let writer = tokio::spawn(run_writer(id, sink, outbound_rx));
    let read_timeout = config.session.read_timeout();
    let (mut session, mut events) = Session::new(id, config, stats.clone(), outbound);

    let result = loop {
        tokio::select! {
            next = next_packet(&mut stream, read_timeout) => {
                let outcome = match next {
                    Some(Ok(packet)) => session.handle_packet(packet).await,
                    Some(Err(e)) => Err(e),
                    None => Err(SstpError::PeerDisconnected),
                };
                if let Err(e) = outcome {
                    break Err(e);
                }
                if session.state() == SessionState::Terminated {
                    break Ok(());
                }
            }
            Some(event) = events.recv() => {
                if let Err(e) = session.on_link_event(event).await {
                    break Err(e);
                }
            }
        }
    };

    session.shutdown().await;
    match writer.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(session = id, "Writer stopped: {}", e),
        Err(e) => warn!(session = id, "Writer task failed: {}", e),
    }
    stats.session_closed();

    match result {
        Err(e) if e.is_graceful() => {
            info!(session = id, "Session ended: {}", e);
            Ok(())
        }
        Err(e) => {
            error!(session = id, "Session failed: {}", e);
            Err(e)
        }
        Ok(()) => {
            info!(session = id, "Session ended");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;
    use crate::ppp::fcs::trailer;
    use crate::ppp::{Accm, PppFramer};
    use crate::types::{Attribute, HEADER_LEN};
    use tokio::io::AsyncWriteExt;
    use tokio::sync::mpsc::error::TryRecvError;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn config_with(program: &str, hdlc_flags: bool) -> Arc<ServerConfig> {
        Arc::new(ServerConfig {
            link: LinkConfig {
                program: program.to_string(),
                args: Vec::new(),
                hdlc_flags,
                ..LinkConfig::default()
            },
            ..ServerConfig::default()
        })
    }

    fn session_with(program: &str) -> (Session, mpsc::Receiver<Packet>, mpsc::Receiver<LinkEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let (session, events) = Session::new(
            1,
            config_with(program, true),
            Arc::new(ServerStats::default()),
            tx,
        );
        (session, rx, events)
    }

    fn control(message_type: MessageType) -> Packet {
        Packet::Control(ControlMessage::new(message_type, Vec::new()))
    }

    fn expect_control(rx: &mut mpsc::Receiver<Packet>) -> ControlMessage {
        match rx.try_recv() {
            Ok(Packet::Control(msg)) => msg,
            other => panic!("expected control packet, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_echo_request_answered() {
        let (mut session, mut rx, _events) = session_with("cat");
        session
            .handle_packet(control(MessageType::EchoRequest))
            .await
            .unwrap();

        let reply = expect_control(&mut rx);
        assert_eq!(reply.message_type, MessageType::EchoResponse);
        assert_eq!(u16::from(reply.message_type), 9);
        assert_eq!(reply.header.length, 8);
        assert!(reply.attributes.is_empty());
        assert_eq!(session.state(), SessionState::AwaitingConnect);
    }

    #[tokio::test]
    async fn test_connect_request_starts_link() {
        let (mut session, mut rx, _events) = session_with("cat");
        session
            .handle_packet(control(MessageType::CallConnectRequest))
            .await
            .unwrap();

        let ack = expect_control(&mut rx);
        assert_eq!(ack.message_type, MessageType::CallConnectAck);
        assert_eq!(ack.header.length, 48);
        assert_eq!(ack.attributes.len(), 1);
        assert_eq!(ack.attributes[0].id, AttributeId::CryptoBindingReq);
        assert_eq!(&ack.attributes[0].data[..], &[0, 0, 0, 3]);

        assert_eq!(session.state(), SessionState::Connected);
        assert!(session.is_link_running());
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_second_connect_request_ignored() {
        let (mut session, mut rx, _events) = session_with("cat");
        session
            .handle_packet(control(MessageType::CallConnectRequest))
            .await
            .unwrap();
        expect_control(&mut rx);

        session
            .handle_packet(control(MessageType::CallConnectRequest))
            .await
            .unwrap();
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(session.state(), SessionState::Connected);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_disconnect_twice() {
        let (mut session, mut rx, _events) = session_with("cat");
        session
            .handle_packet(control(MessageType::CallConnectRequest))
            .await
            .unwrap();
        expect_control(&mut rx);

        session
            .handle_packet(control(MessageType::CallDisconnect))
            .await
            .unwrap();
        let ack = expect_control(&mut rx);
        assert_eq!(ack.message_type, MessageType::CallDisconnectAck);
        assert_eq!(ack.header.length, 8);
        assert!(ack.attributes.is_empty());
        assert_eq!(session.state(), SessionState::Terminated);
        assert!(!session.is_link_running());

        // No process left to kill; still acknowledged, no error.
        session
            .handle_packet(control(MessageType::CallDisconnect))
            .await
            .unwrap();
        assert_eq!(
            expect_control(&mut rx).message_type,
            MessageType::CallDisconnectAck
        );
    }

    #[tokio::test]
    async fn test_data_before_connect_is_fatal() {
        let (mut session, _rx, _events) = session_with("cat");
        let data = Packet::Data(DataMessage::new(vec![0xff, 0x03]).unwrap());
        assert!(matches!(
            session.handle_packet(data).await,
            Err(SstpError::SubprocessNotStarted)
        ));
    }

    #[tokio::test]
    async fn test_abort_terminates() {
        let (mut session, mut rx, _events) = session_with("cat");
        session
            .handle_packet(control(MessageType::CallConnectRequest))
            .await
            .unwrap();
        expect_control(&mut rx);

        let abort = ControlMessage::new(
            MessageType::CallAbort,
            vec![Attribute::new(AttributeId::StatusInfo, vec![0, 0, 0, 1])],
        );
        assert!(matches!(
            session.handle_packet(Packet::Control(abort)).await,
            Err(SstpError::CallAborted)
        ));
        assert_eq!(session.state(), SessionState::Terminated);
        assert!(!session.is_link_running());
    }

    #[tokio::test]
    async fn test_unknown_and_unhandled_types_ignored() {
        let (mut session, mut rx, _events) = session_with("cat");
        for typ in [
            MessageType::Unknown(0x42),
            MessageType::CallConnectNak,
            MessageType::CallConnected,
            MessageType::EchoResponse,
        ] {
            session.handle_packet(control(typ)).await.unwrap();
        }
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(session.state(), SessionState::AwaitingConnect);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_fatal() {
        let (mut session, _rx, _events) = session_with("/nonexistent/link-negotiator");
        assert!(matches!(
            session
                .handle_packet(control(MessageType::CallConnectRequest))
                .await,
            Err(SstpError::SubprocessSpawnFailure(_))
        ));
        assert!(!session.is_link_running());
    }

    #[tokio::test]
    async fn test_data_round_trips_through_link() {
        let (mut session, mut rx, _events) = session_with("cat");
        session
            .handle_packet(control(MessageType::CallConnectRequest))
            .await
            .unwrap();
        expect_control(&mut rx);

        let payload = vec![0xff, 0x03, 0xc0, 0x21, 0x01, 0x7e, 0x00, 0x04];
        session
            .handle_packet(Packet::Data(DataMessage::new(payload.clone()).unwrap()))
            .await
            .unwrap();

        let echoed = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        let Packet::Data(msg) = echoed else {
            panic!("expected data packet");
        };
        assert_eq!(&msg.payload[..payload.len()], &payload[..]);
        assert_eq!(&msg.payload[payload.len()..], &trailer(&payload));
        assert_eq!(msg.header.length as usize, payload.len() + 2 + HEADER_LEN);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_link_exit_reported() {
        let (mut session, mut rx, mut events) = session_with("true");
        session
            .handle_packet(control(MessageType::CallConnectRequest))
            .await
            .unwrap();
        expect_control(&mut rx);

        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        assert!(matches!(event, LinkEvent::Exited));
        assert!(matches!(
            session.on_link_event(event).await,
            Err(SstpError::SubprocessExited)
        ));
        assert!(!session.is_link_running());
    }

    #[tokio::test]
    async fn test_data_to_exited_link_is_graceful() {
        let (mut session, mut rx, mut events) = session_with("true");
        session
            .handle_packet(control(MessageType::CallConnectRequest))
            .await
            .unwrap();
        expect_control(&mut rx);

        // Exit noticed by the downlink but not yet handled by the session.
        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        assert!(matches!(event, LinkEvent::Exited));

        let mut outcome = Ok(());
        for _ in 0..50 {
            let data = Packet::Data(DataMessage::new(vec![0xff, 0x03, 0xc0, 0x21]).unwrap());
            outcome = session.handle_packet(data).await;
            if outcome.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let err = outcome.unwrap_err();
        assert!(matches!(err, SstpError::SubprocessExited));
        assert!(err.is_graceful());
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_downlink_splits_frames() {
        let (mut link_out, reader) = tokio::io::duplex(64);
        let (tx, mut rx) = mpsc::channel(16);
        let (events_tx, mut events) = mpsc::channel(1);
        let stats = Arc::new(ServerStats::default());
        let task = tokio::spawn(run_downlink(7, reader, 5, tx, events_tx, stats.clone()));

        let framer = PppFramer::new(Accm::ALL, true);
        let first = [0xc0, 0x21, 0x09, 0x01];
        let second = [0x80, 0x21, 0x7d, 0x11];
        link_out.write_all(&framer.encode(&first)).await.unwrap();
        link_out.write_all(&framer.encode(&second)).await.unwrap();
        drop(link_out);

        for expected in [&first[..], &second[..]] {
            match timeout(WAIT, rx.recv()).await.unwrap() {
                Some(Packet::Data(msg)) => {
                    assert_eq!(&msg.payload[..expected.len()], expected);
                    assert_eq!(msg.payload.len(), expected.len() + 2);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(matches!(events.recv().await, Some(LinkEvent::Exited)));
        task.await.unwrap();
        assert_eq!(stats.snapshot().downlink_frames, 2);
    }
}
