//! Session actor implementation
//!
//! The central actor that owns all session state and sequences the room
//! lifecycle: create-then-join, explicit join, leave, and
//! reconnect-then-rejoin. Uses the Actor pattern with mpsc channels for
//! message passing; UI-facing calls go through `SessionHandle` and get
//! their answer on a oneshot channel once the matching handshake frame
//! arrives.

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::message::{ChatMessage, ClientFrame, RejectCode, ServerFrame};
use crate::state::{SessionState, SessionSnapshot};
use crate::transport::{Connector, TransportEvent, TransportHandle};
use crate::typing::{TypingDebouncer, TypingSignal};
use crate::types::{ConnectionStatus, Identity, PendingOperation, RoomId};

/// Buffer size for the session command channel
const COMMAND_BUFFER_SIZE: usize = 64;

/// Commands sent from handles to the session actor
#[derive(Debug)]
pub enum SessionCommand {
    /// Create a room, then join it for the authoritative history
    CreateRoom {
        nickname: String,
        icon: Option<String>,
        reply: oneshot::Sender<Result<RoomId, SessionError>>,
    },
    /// Join an existing room by id
    JoinRoom {
        nickname: String,
        room_id: RoomId,
        icon: Option<String>,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    /// Send a chat message (best-effort)
    SendMessage { body: String },
    /// Leave the current room and drop the connection
    LeaveRoom {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    /// Replace the transport and rejoin the remembered room
    Reconnect {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    /// A keystroke happened in the composer
    NotifyTyping,
}

/// Where the create-then-join composite currently stands
#[derive(Debug)]
enum CreateStep {
    AwaitingCreate,
    AwaitingJoin,
}

/// The one operation that may be awaiting a handshake frame
#[derive(Debug)]
enum InFlight {
    Create {
        step: CreateStep,
        identity: Identity,
        reply: oneshot::Sender<Result<RoomId, SessionError>>,
    },
    Join {
        identity: Identity,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
}

impl InFlight {
    fn pending(&self) -> PendingOperation {
        match self {
            InFlight::Create { .. } => PendingOperation::Creating,
            InFlight::Join { .. } => PendingOperation::Joining,
        }
    }

    fn fail(self, err: SessionError) {
        match self {
            InFlight::Create { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            InFlight::Join { reply, .. } => {
                let _ = reply.send(Err(err));
            }
        }
    }
}

/// The session actor
///
/// Owns the transport handle, the state, the pending operation and the
/// typing debouncer. Single-threaded event-driven: commands, transport
/// events and the debounce timer interleave through one `select!` loop,
/// so state is consistent across every suspension point.
pub struct Session<C: Connector> {
    connector: C,
    state: SessionState,
    transport: Option<TransportHandle>,
    in_flight: Option<InFlight>,
    debouncer: TypingDebouncer,
    commands: mpsc::Receiver<SessionCommand>,
    watch_tx: watch::Sender<SessionSnapshot>,
}

impl<C: Connector> Session<C> {
    /// Connect and spawn the session actor, returning its handle
    ///
    /// The connection starts in `Connecting`; it flips to `Connected`
    /// when the transport delivers its ready event.
    pub async fn spawn(connector: C) -> Result<SessionHandle, SessionError> {
        let transport = connector.connect().await?;

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER_SIZE);
        let (watch_tx, watch_rx) = watch::channel(SessionSnapshot::default());

        let mut session = Session {
            connector,
            state: SessionState::new(),
            transport: Some(transport),
            in_flight: None,
            debouncer: TypingDebouncer::new(),
            commands: cmd_rx,
            watch_tx,
        };
        session.state.connection_status = ConnectionStatus::Connecting;
        session.publish();

        tokio::spawn(session.run());

        Ok(SessionHandle {
            commands: cmd_tx,
            watch: watch_rx,
        })
    }

    /// Run the session event loop until every handle is dropped
    async fn run(mut self) {
        info!("Session actor started");

        loop {
            let typing_deadline = self.debouncer.deadline();

            tokio::select! {
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => break,
                    }
                }
                event = Self::next_event(&mut self.transport) => {
                    match event {
                        Some(event) => self.handle_transport_event(event),
                        None => {
                            // Read task gone without a close frame
                            self.drop_transport();
                        }
                    }
                }
                _ = async { tokio::time::sleep_until(typing_deadline.unwrap()).await },
                        if typing_deadline.is_some() => {
                    if let Some(TypingSignal::Stop) = self.debouncer.expire() {
                        self.send_frame(ClientFrame::SetTyping { typing: false });
                    }
                }
            }
        }

        if let Some(mut transport) = self.transport.take() {
            transport.teardown();
        }
        info!("Session actor stopped");
    }

    async fn next_event(transport: &mut Option<TransportHandle>) -> Option<TransportEvent> {
        match transport {
            Some(handle) => handle.next_event().await,
            None => std::future::pending().await,
        }
    }

    /// Process a single command
    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::CreateRoom {
                nickname,
                icon,
                reply,
            } => self.handle_create_room(nickname, icon, reply),
            SessionCommand::JoinRoom {
                nickname,
                room_id,
                icon,
                reply,
            } => self.handle_join_room(nickname, room_id, icon, reply),
            SessionCommand::SendMessage { body } => self.handle_send_message(body),
            SessionCommand::LeaveRoom { reply } => self.handle_leave_room(reply),
            SessionCommand::Reconnect { reply } => self.handle_reconnect(reply).await,
            SessionCommand::NotifyTyping => self.handle_notify_typing(),
        }
    }

    /// Handle room creation (create-then-join composite)
    fn handle_create_room(
        &mut self,
        nickname: String,
        icon: Option<String>,
        reply: oneshot::Sender<Result<RoomId, SessionError>>,
    ) {
        if self.state.pending.is_pending() {
            let _ = reply.send(Err(SessionError::OperationInProgress));
            return;
        }
        let nickname = nickname.trim().to_string();
        if nickname.is_empty() {
            let _ = reply.send(Err(SessionError::InvalidArgument("nickname is required")));
            return;
        }
        if self.state.connection_status != ConnectionStatus::Connected || self.transport.is_none() {
            let _ = reply.send(Err(SessionError::NotReady));
            return;
        }

        info!("Creating room as '{}'", nickname);
        let identity = Identity::new(nickname.clone(), icon.clone());
        if let Err(e) = self.send_request(ClientFrame::CreateRoom { nickname, icon }) {
            let _ = reply.send(Err(e));
            return;
        }
        self.begin(InFlight::Create {
            step: CreateStep::AwaitingCreate,
            identity,
            reply,
        });
    }

    /// Handle joining an existing room
    fn handle_join_room(
        &mut self,
        nickname: String,
        room_id: RoomId,
        icon: Option<String>,
        reply: oneshot::Sender<Result<(), SessionError>>,
    ) {
        if self.state.pending.is_pending() {
            let _ = reply.send(Err(SessionError::OperationInProgress));
            return;
        }
        let nickname = nickname.trim().to_string();
        if nickname.is_empty() {
            let _ = reply.send(Err(SessionError::InvalidArgument("nickname is required")));
            return;
        }
        if room_id.is_empty() {
            let _ = reply.send(Err(SessionError::InvalidArgument("room id is required")));
            return;
        }
        if self.state.connection_status != ConnectionStatus::Connected || self.transport.is_none() {
            let _ = reply.send(Err(SessionError::NotReady));
            return;
        }

        info!("Joining room {} as '{}'", room_id, nickname);
        let identity = Identity::new(nickname.clone(), icon.clone());
        if let Err(e) = self.send_request(ClientFrame::JoinRoom {
            nickname,
            room_id,
            icon,
        }) {
            let _ = reply.send(Err(e));
            return;
        }
        self.begin(InFlight::Join { identity, reply });
    }

    /// Handle a chat send (best-effort, fire-and-forget)
    ///
    /// The stop-typing signal goes out first so it is never delayed
    /// behind the debounce timer.
    fn handle_send_message(&mut self, body: String) {
        if let Some(TypingSignal::Stop) = self.debouncer.flush() {
            self.send_frame(ClientFrame::SetTyping { typing: false });
        }
        if self.transport.is_none() {
            debug!("No transport; dropping chat message");
            return;
        }
        self.send_frame(ClientFrame::Chat { body });
    }

    /// Handle leaving the room: teardown plus a full room-state reset
    fn handle_leave_room(&mut self, reply: oneshot::Sender<Result<(), SessionError>>) {
        if self.state.pending.is_pending() {
            let _ = reply.send(Err(SessionError::OperationInProgress));
            return;
        }

        info!("Leaving room {:?}", self.state.room_id);
        if let Some(mut transport) = self.transport.take() {
            transport.teardown();
        }
        self.debouncer.reset();
        self.state.reset_room();
        self.state.connection_lost();
        self.publish();
        let _ = reply.send(Ok(()));
    }

    /// Handle reconnect: replace the transport, then rejoin if a room
    /// and identity are remembered
    async fn handle_reconnect(&mut self, reply: oneshot::Sender<Result<(), SessionError>>) {
        if self.state.pending.is_pending() {
            let _ = reply.send(Err(SessionError::OperationInProgress));
            return;
        }

        // At most one live handle: the old one is released before the
        // replacement exists, so it cannot deliver into this session.
        if let Some(mut transport) = self.transport.take() {
            transport.teardown();
        }
        self.debouncer.reset();
        self.state.connection_status = ConnectionStatus::Connecting;
        self.publish();

        info!("Reconnecting");
        match self.connector.connect().await {
            Ok(transport) => {
                self.transport = Some(transport);
            }
            Err(e) => {
                warn!("Reconnect failed: {}", e);
                self.state.connection_lost();
                self.publish();
                let _ = reply.send(Err(e));
                return;
            }
        }

        // The rejoin is issued only on a connection that has reported
        // ready, like any other operation
        if let Err(e) = self.await_ready().await {
            warn!("Reconnect lost before ready");
            self.drop_transport();
            let _ = reply.send(Err(e));
            return;
        }
        self.state.connection_status = ConnectionStatus::Connected;
        self.publish();

        let remembered = match (self.state.room_id.clone(), self.state.identity.clone()) {
            (Some(room_id), Some(identity)) => Some((room_id, identity)),
            _ => None,
        };
        let Some((room_id, identity)) = remembered else {
            // Nothing to rejoin; the transport alone was re-established
            let _ = reply.send(Ok(()));
            return;
        };

        info!("Rejoining room {} as '{}'", room_id, identity.nickname);
        // Rejoin starts from a clean log; the join's history refills it.
        // room_id itself stays set even if the rejoin fails, so the UI
        // can offer another attempt.
        self.state.messages.clear();
        self.state.typing_users.clear();
        if let Err(e) = self.send_request(ClientFrame::JoinRoom {
            nickname: identity.nickname.clone(),
            room_id,
            icon: identity.icon.clone(),
        }) {
            self.publish();
            let _ = reply.send(Err(e));
            return;
        }
        self.begin(InFlight::Join { identity, reply });
    }

    /// Wait for a freshly connected transport to report ready
    async fn await_ready(&mut self) -> Result<(), SessionError> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(SessionError::TransportLost);
        };
        loop {
            match transport.next_event().await {
                Some(TransportEvent::Ready) => return Ok(()),
                Some(TransportEvent::Frame(frame)) => {
                    debug!("Frame before ready: {:?}", frame);
                }
                Some(TransportEvent::Closed) | None => return Err(SessionError::TransportLost),
            }
        }
    }

    /// Handle a composer keystroke through the debouncer
    fn handle_notify_typing(&mut self) {
        if self.transport.is_none() {
            return;
        }
        if let Some(TypingSignal::Start) = self.debouncer.note_input() {
            self.send_frame(ClientFrame::SetTyping { typing: true });
        }
    }

    /// Dispatch one inbound transport event
    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Ready => {
                info!("Transport ready");
                self.state.connection_status = ConnectionStatus::Connected;
                self.publish();
            }
            TransportEvent::Closed => {
                info!("Transport closed");
                self.drop_transport();
            }
            TransportEvent::Frame(frame) => self.handle_frame(frame),
        }
    }

    /// Dispatch one inbound frame
    fn handle_frame(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::RoomCreated { room_id } => self.on_room_created(room_id),
            ServerFrame::RoomJoined { room_id, history } => self.on_room_joined(room_id, history),
            ServerFrame::Error { code, message } => self.on_reject(code, message),
            stream => {
                // Chat and typing presence: the single mutation point
                self.state.apply_frame(stream);
                self.publish();
            }
        }
    }

    /// First half of the create composite resolved; issue the follow-up
    /// join so the caller gets the authoritative history (including the
    /// system message announcing their own arrival)
    fn on_room_created(&mut self, room_id: RoomId) {
        let follow_up = match &mut self.in_flight {
            Some(InFlight::Create {
                step: step @ CreateStep::AwaitingCreate,
                identity,
                ..
            }) => {
                let frame = ClientFrame::JoinRoom {
                    nickname: identity.nickname.clone(),
                    room_id,
                    icon: identity.icon.clone(),
                };
                *step = CreateStep::AwaitingJoin;
                Some(frame)
            }
            _ => None,
        };
        let Some(frame) = follow_up else {
            debug!("Ignoring unsolicited room_created");
            return;
        };
        if let Err(e) = self.send_request(frame) {
            // The create half succeeded but the join half never left the
            // session; nothing was committed, so fail the whole composite
            if let Some(op) = self.in_flight.take() {
                self.state.pending = PendingOperation::None;
                self.publish();
                op.fail(e);
            }
        }
    }

    /// A join resolved: commit room id and history atomically
    fn on_room_joined(&mut self, room_id: RoomId, history: Vec<ChatMessage>) {
        match self.in_flight.take() {
            Some(InFlight::Create {
                step: CreateStep::AwaitingJoin,
                identity,
                reply,
            }) => {
                info!("Created and joined room {}", room_id);
                self.state.enter_room(room_id.clone(), history, identity);
                self.state.pending = PendingOperation::None;
                self.publish();
                let _ = reply.send(Ok(room_id));
            }
            Some(InFlight::Join { identity, reply }) => {
                info!("Joined room {}", room_id);
                self.state.enter_room(room_id, history, identity);
                self.state.pending = PendingOperation::None;
                self.publish();
                let _ = reply.send(Ok(()));
            }
            Some(other) => {
                // A join answer with no join outstanding; keep waiting
                debug!("Ignoring room_joined out of sequence");
                self.in_flight = Some(other);
            }
            None => debug!("Ignoring unsolicited room_joined"),
        }
    }

    /// The server denied the pending request; nothing was committed, so
    /// rollback is just clearing the pending marker
    fn on_reject(&mut self, code: RejectCode, message: String) {
        match self.in_flight.take() {
            Some(op) => {
                warn!("Server rejected {:?}: {}", self.state.pending, message);
                self.state.pending = PendingOperation::None;
                self.publish();
                op.fail(SessionError::TransportRejected { code, message });
            }
            None => warn!("Server error outside an operation: {}", message),
        }
    }

    /// The connection is gone: fail any pending operation, keep the
    /// room-scoped state for a later reconnect decision
    fn drop_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.teardown();
        }
        self.debouncer.reset();
        if let Some(op) = self.in_flight.take() {
            self.state.pending = PendingOperation::None;
            op.fail(SessionError::TransportLost);
        }
        self.state.connection_lost();
        self.publish();
    }

    /// Mark an operation in flight and publish the pending flag
    fn begin(&mut self, op: InFlight) {
        self.state.pending = op.pending();
        self.in_flight = Some(op);
        self.publish();
    }

    /// Best-effort send for chat and typing frames
    fn send_frame(&self, frame: ClientFrame) {
        match &self.transport {
            Some(transport) => {
                if let Err(e) = transport.send(frame) {
                    debug!("Dropping outbound frame: {}", e);
                }
            }
            None => debug!("No transport; dropping frame"),
        }
    }

    /// Handshake sends must reach the wire; a failed enqueue fails the
    /// operation instead of leaving it waiting on a frame that was
    /// never queued
    fn send_request(&self, frame: ClientFrame) -> Result<(), SessionError> {
        match &self.transport {
            Some(transport) => transport
                .send(frame)
                .map_err(|_| SessionError::TransportLost),
            None => Err(SessionError::NotReady),
        }
    }

    fn publish(&self) {
        self.watch_tx.send_replace(self.state.snapshot());
    }
}

/// Cloneable handle to a running session actor
///
/// The entire UI-facing surface: the five lifecycle operations,
/// `notify_typing`, and state observation via snapshots.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    watch: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// Create a room and join it; resolves with the new room id once
    /// the history has been received
    pub async fn create_room(
        &self,
        nickname: &str,
        icon: Option<String>,
    ) -> Result<RoomId, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(SessionCommand::CreateRoom {
            nickname: nickname.to_string(),
            icon,
            reply,
        })
        .await?;
        rx.await.map_err(|_| SessionError::SessionClosed)?
    }

    /// Join an existing room; resolves once the history has been received
    pub async fn join_room(
        &self,
        nickname: &str,
        room_id: RoomId,
        icon: Option<String>,
    ) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(SessionCommand::JoinRoom {
            nickname: nickname.to_string(),
            room_id,
            icon,
            reply,
        })
        .await?;
        rx.await.map_err(|_| SessionError::SessionClosed)?
    }

    /// Send a chat message (best-effort; failures are swallowed)
    pub async fn send_message(&self, body: &str) {
        let _ = self
            .commands
            .send(SessionCommand::SendMessage {
                body: body.to_string(),
            })
            .await;
    }

    /// Leave the current room and drop the connection
    pub async fn leave_room(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(SessionCommand::LeaveRoom { reply }).await?;
        rx.await.map_err(|_| SessionError::SessionClosed)?
    }

    /// Replace the transport; rejoins the remembered room if any
    pub async fn reconnect(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(SessionCommand::Reconnect { reply }).await?;
        rx.await.map_err(|_| SessionError::SessionClosed)?
    }

    /// Report a composer keystroke (debounced into typing signals)
    pub async fn notify_typing(&self) {
        let _ = self.commands.send(SessionCommand::NotifyTyping).await;
    }

    /// Current state snapshot
    pub fn snapshot(&self) -> SessionSnapshot {
        self.watch.borrow().clone()
    }

    /// Subscribe to state changes
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.watch.clone()
    }

    async fn send_command(&self, cmd: SessionCommand) -> Result<(), SessionError> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| SessionError::SessionClosed)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::message::ChatMessage;

    /// One scripted connection: the test side of a channel-backed handle
    struct TestWire {
        outbound: mpsc::Receiver<ClientFrame>,
        events: mpsc::Sender<TransportEvent>,
    }

    impl TestWire {
        async fn ready(&self) {
            self.events.send(TransportEvent::Ready).await.unwrap();
        }

        async fn frame(&self, frame: ServerFrame) {
            self.events
                .send(TransportEvent::Frame(frame))
                .await
                .unwrap();
        }

        async fn close(&self) {
            self.events.send(TransportEvent::Closed).await.unwrap();
        }

        async fn expect_frame(&mut self) -> ClientFrame {
            self.outbound.recv().await.expect("outbound channel closed")
        }
    }

    /// Connector handing out pre-wired handles, one per connect call
    struct MockConnector {
        handles: Mutex<VecDeque<TransportHandle>>,
    }

    impl MockConnector {
        fn new(count: usize) -> (Self, Vec<TestWire>) {
            let mut handles = VecDeque::new();
            let mut wires = Vec::new();
            for _ in 0..count {
                let (outbound_tx, outbound_rx) = mpsc::channel(32);
                let (event_tx, event_rx) = mpsc::channel(32);
                handles.push_back(TransportHandle::new(outbound_tx, event_rx));
                wires.push(TestWire {
                    outbound: outbound_rx,
                    events: event_tx,
                });
            }
            (
                Self {
                    handles: Mutex::new(handles),
                },
                wires,
            )
        }
    }

    impl Connector for MockConnector {
        async fn connect(&self) -> Result<TransportHandle, SessionError> {
            self.handles
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(SessionError::TransportLost)
        }
    }

    async fn connected_session() -> (SessionHandle, TestWire) {
        let (connector, mut wires) = MockConnector::new(1);
        let handle = Session::spawn(connector).await.unwrap();
        let wire = wires.remove(0);
        wire.ready().await;
        handle
            .watch()
            .wait_for(|s| s.connection_status == ConnectionStatus::Connected)
            .await
            .unwrap();
        (handle, wire)
    }

    fn history(bodies: &[&str]) -> Vec<ChatMessage> {
        bodies
            .iter()
            .map(|b| ChatMessage::from_user("someone", *b))
            .collect()
    }

    /// Drive a scripted join response on the wire
    async fn answer_join(wire: &mut TestWire, room: &str, bodies: &[&str]) {
        match wire.expect_frame().await {
            ClientFrame::JoinRoom { room_id, .. } => assert_eq!(room_id.as_str(), room),
            other => panic!("Expected join_room, got {:?}", other),
        }
        wire.frame(ServerFrame::RoomJoined {
            room_id: RoomId::from_input(room),
            history: history(bodies),
        })
        .await;
    }

    #[tokio::test]
    async fn test_create_room_composes_follow_up_join() {
        let (handle, mut wire) = connected_session().await;

        let script = tokio::spawn(async move {
            match wire.expect_frame().await {
                ClientFrame::CreateRoom { nickname, .. } => assert_eq!(nickname, "nick"),
                other => panic!("Expected create_room, got {:?}", other),
            }
            wire.frame(ServerFrame::RoomCreated {
                room_id: RoomId::from_input("R42"),
            })
            .await;
            answer_join(&mut wire, "R42", &["nick joined"]).await;
            wire
        });

        let room = handle.create_room("nick", None).await.unwrap();
        assert_eq!(room.as_str(), "R42");

        let snap = handle.snapshot();
        assert_eq!(snap.room_id.as_ref().unwrap().as_str(), "R42");
        assert_eq!(snap.messages.len(), 1);
        assert_eq!(snap.pending, PendingOperation::None);

        let _wire = script.await.unwrap();
    }

    #[tokio::test]
    async fn test_create_room_rejection_commits_nothing() {
        let (handle, mut wire) = connected_session().await;

        let script = tokio::spawn(async move {
            wire.expect_frame().await;
            wire.frame(ServerFrame::Error {
                code: RejectCode::Internal,
                message: "create failed".to_string(),
            })
            .await;
            wire
        });

        let err = handle.create_room("nick", None).await.unwrap_err();
        assert!(matches!(err, SessionError::TransportRejected { .. }));

        let snap = handle.snapshot();
        assert!(snap.room_id.is_none());
        assert_eq!(snap.pending, PendingOperation::None);

        let _wire = script.await.unwrap();
    }

    #[tokio::test]
    async fn test_join_replaces_history_wholesale() {
        let (handle, mut wire) = connected_session().await;

        // First join puts [A, B] in the log
        let script = tokio::spawn(async move {
            answer_join(&mut wire, "R1", &["A", "B"]).await;
            answer_join(&mut wire, "R2", &["X", "Y", "Z"]).await;
            wire
        });

        handle
            .join_room("nick", RoomId::from_input("R1"), None)
            .await
            .unwrap();
        handle
            .join_room("nick", RoomId::from_input("R2"), None)
            .await
            .unwrap();

        let snap = handle.snapshot();
        let bodies: Vec<&str> = snap.messages.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["X", "Y", "Z"]);
        assert_eq!(snap.room_id.as_ref().unwrap().as_str(), "R2");

        let _wire = script.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_join_keeps_prior_room() {
        let (handle, mut wire) = connected_session().await;

        let script = tokio::spawn(async move {
            answer_join(&mut wire, "R1", &["A"]).await;
            wire.expect_frame().await; // the doomed join_room
            wire.frame(ServerFrame::Error {
                code: RejectCode::RoomNotFound,
                message: "Room 'R9' not found".to_string(),
            })
            .await;
            wire
        });

        handle
            .join_room("nick", RoomId::from_input("R1"), None)
            .await
            .unwrap();
        let err = handle
            .join_room("nick", RoomId::from_input("R9"), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::TransportRejected {
                code: RejectCode::RoomNotFound,
                ..
            }
        ));

        let snap = handle.snapshot();
        assert_eq!(snap.room_id.as_ref().unwrap().as_str(), "R1");
        assert_eq!(snap.messages.len(), 1);
        assert_eq!(snap.pending, PendingOperation::None);

        let _wire = script.await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_arguments_rejected_synchronously() {
        let (handle, _wire) = connected_session().await;

        let err = handle.create_room("   ", None).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidArgument(_)));

        let err = handle
            .join_room("nick", RoomId::from_input("  "), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidArgument(_)));

        let err = handle
            .join_room("", RoomId::from_input("R1"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_operations_require_connected_transport() {
        let (connector, _wires) = MockConnector::new(1);
        let handle = Session::spawn(connector).await.unwrap();

        // Still Connecting: no ready event was delivered
        let err = handle.create_room("nick", None).await.unwrap_err();
        assert!(matches!(err, SessionError::NotReady));

        let err = handle
            .join_room("nick", RoomId::from_input("R1"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotReady));
    }

    #[tokio::test]
    async fn test_second_operation_rejected_while_pending() {
        let (handle, mut wire) = connected_session().await;

        let pending_create = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.create_room("nick", None).await })
        };
        handle
            .watch()
            .wait_for(|s| s.pending == PendingOperation::Creating)
            .await
            .unwrap();

        // Second operation fails fast instead of queueing
        let err = handle
            .join_room("nick", RoomId::from_input("R7"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::OperationInProgress));
        let err = handle.leave_room().await.unwrap_err();
        assert!(matches!(err, SessionError::OperationInProgress));
        let err = handle.reconnect().await.unwrap_err();
        assert!(matches!(err, SessionError::OperationInProgress));

        // Let the create finish
        wire.expect_frame().await;
        wire.frame(ServerFrame::RoomCreated {
            room_id: RoomId::from_input("R42"),
        })
        .await;
        answer_join(&mut wire, "R42", &[]).await;
        pending_create.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_chat_frames_apply_in_delivery_order() {
        let (handle, wire) = connected_session().await;

        wire.frame(ServerFrame::Chat(ChatMessage::from_user("Bob", "M1")))
            .await;
        wire.frame(ServerFrame::Chat(ChatMessage::from_user("Bob", "M2")))
            .await;

        let snap = handle
            .watch()
            .wait_for(|s| s.messages.len() == 2)
            .await
            .unwrap()
            .clone();
        let bodies: Vec<&str> = snap.messages.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["M1", "M2"]);
    }

    #[tokio::test]
    async fn test_typing_presence_updates_set() {
        let (handle, wire) = connected_session().await;

        wire.frame(ServerFrame::TypingPresence {
            nickname: "Bob".to_string(),
            typing: true,
        })
        .await;
        let snap = handle
            .watch()
            .wait_for(|s| s.typing_users.contains("Bob"))
            .await
            .unwrap()
            .clone();
        assert_eq!(snap.typing_users.len(), 1);

        wire.frame(ServerFrame::TypingPresence {
            nickname: "Bob".to_string(),
            typing: false,
        })
        .await;
        handle
            .watch()
            .wait_for(|s| s.typing_users.is_empty())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_notify_typing_burst_sends_one_start() {
        let (handle, mut wire) = connected_session().await;

        handle.notify_typing().await;
        handle.notify_typing().await;
        handle.notify_typing().await;
        handle.send_message("hello").await;

        match wire.expect_frame().await {
            ClientFrame::SetTyping { typing } => assert!(typing),
            other => panic!("Expected set_typing, got {:?}", other),
        }
        // The send flushes one stop ahead of the chat frame
        match wire.expect_frame().await {
            ClientFrame::SetTyping { typing } => assert!(!typing),
            other => panic!("Expected set_typing, got {:?}", other),
        }
        match wire.expect_frame().await {
            ClientFrame::Chat { body } => assert_eq!(body, "hello"),
            other => panic!("Expected chat, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_stops_after_quiet_period() {
        let (handle, mut wire) = connected_session().await;

        handle.notify_typing().await;
        match wire.expect_frame().await {
            ClientFrame::SetTyping { typing } => assert!(typing),
            other => panic!("Expected set_typing, got {:?}", other),
        }
        // Paused time auto-advances past the debounce window
        match wire.expect_frame().await {
            ClientFrame::SetTyping { typing } => assert!(!typing),
            other => panic!("Expected set_typing, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_leave_room_resets_everything() {
        let (handle, mut wire) = connected_session().await;

        let script = tokio::spawn(async move {
            answer_join(&mut wire, "R1", &["A", "B"]).await;
            wire
        });
        handle
            .join_room("nick", RoomId::from_input("R1"), None)
            .await
            .unwrap();
        let wire = script.await.unwrap();
        wire.frame(ServerFrame::TypingPresence {
            nickname: "Bob".to_string(),
            typing: true,
        })
        .await;
        handle
            .watch()
            .wait_for(|s| !s.typing_users.is_empty())
            .await
            .unwrap();

        handle.leave_room().await.unwrap();

        let snap = handle.snapshot();
        assert!(snap.room_id.is_none());
        assert!(snap.messages.is_empty());
        assert!(snap.typing_users.is_empty());
        assert_eq!(snap.connection_status, ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_unsolicited_close_preserves_room_state() {
        let (handle, mut wire) = connected_session().await;

        let script = tokio::spawn(async move {
            answer_join(&mut wire, "R42", &["A"]).await;
            wire
        });
        handle
            .join_room("nick", RoomId::from_input("R42"), None)
            .await
            .unwrap();
        let wire = script.await.unwrap();

        wire.close().await;
        let snap = handle
            .watch()
            .wait_for(|s| s.connection_status == ConnectionStatus::Disconnected)
            .await
            .unwrap()
            .clone();
        assert_eq!(snap.room_id.as_ref().unwrap().as_str(), "R42");
        assert_eq!(snap.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_close_during_pending_fails_with_transport_lost() {
        let (handle, mut wire) = connected_session().await;

        let script = tokio::spawn(async move {
            wire.expect_frame().await; // create_room
            wire.close().await;
            wire
        });

        let err = handle.create_room("nick", None).await.unwrap_err();
        assert!(matches!(err, SessionError::TransportLost));
        assert_eq!(handle.snapshot().pending, PendingOperation::None);

        let _wire = script.await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnect_rejoins_remembered_room() {
        let (connector, mut wires) = MockConnector::new(2);
        let handle = Session::spawn(connector).await.unwrap();
        let mut wire1 = wires.remove(0);
        let mut wire2 = wires.remove(0);

        wire1.ready().await;
        handle
            .watch()
            .wait_for(|s| s.connection_status == ConnectionStatus::Connected)
            .await
            .unwrap();

        let script = tokio::spawn(async move {
            answer_join(&mut wire1, "R42", &["old"]).await;
            wire1
        });
        handle
            .join_room("nick", RoomId::from_input("R42"), None)
            .await
            .unwrap();
        let wire1 = script.await.unwrap();
        wire1.close().await;
        handle
            .watch()
            .wait_for(|s| s.connection_status == ConnectionStatus::Disconnected)
            .await
            .unwrap();

        // Reconnect auto-rejoins R42 with the remembered identity
        let script = tokio::spawn(async move {
            wire2.ready().await;
            match wire2.expect_frame().await {
                ClientFrame::JoinRoom {
                    nickname, room_id, ..
                } => {
                    assert_eq!(nickname, "nick");
                    assert_eq!(room_id.as_str(), "R42");
                }
                other => panic!("Expected join_room, got {:?}", other),
            }
            wire2
                .frame(ServerFrame::RoomJoined {
                    room_id: RoomId::from_input("R42"),
                    history: history(&["fresh"]),
                })
                .await;
            wire2
        });

        handle.reconnect().await.unwrap();
        let snap = handle.snapshot();
        assert_eq!(snap.room_id.as_ref().unwrap().as_str(), "R42");
        let bodies: Vec<&str> = snap.messages.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["fresh"]);

        let _wire = script.await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnect_rejoin_failure_keeps_room_id() {
        let (connector, mut wires) = MockConnector::new(2);
        let handle = Session::spawn(connector).await.unwrap();
        let mut wire1 = wires.remove(0);
        let mut wire2 = wires.remove(0);

        wire1.ready().await;
        handle
            .watch()
            .wait_for(|s| s.connection_status == ConnectionStatus::Connected)
            .await
            .unwrap();

        let script = tokio::spawn(async move {
            answer_join(&mut wire1, "R42", &[]).await;
            wire1
        });
        handle
            .join_room("nick", RoomId::from_input("R42"), None)
            .await
            .unwrap();
        let wire1 = script.await.unwrap();
        wire1.close().await;

        let script = tokio::spawn(async move {
            wire2.ready().await;
            wire2.expect_frame().await; // rejoin attempt
            wire2
                .frame(ServerFrame::Error {
                    code: RejectCode::RoomNotFound,
                    message: "Room 'R42' not found".to_string(),
                })
                .await;
            wire2
        });

        let err = handle.reconnect().await.unwrap_err();
        assert!(matches!(err, SessionError::TransportRejected { .. }));

        // The room id survives so the UI can offer another attempt
        let snap = handle.snapshot();
        assert_eq!(snap.room_id.as_ref().unwrap().as_str(), "R42");
        assert_eq!(snap.pending, PendingOperation::None);

        let _wire = script.await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnect_without_identity_only_reestablishes() {
        let (connector, mut wires) = MockConnector::new(2);
        let handle = Session::spawn(connector).await.unwrap();
        let wire1 = wires.remove(0);
        let wire2 = wires.remove(0);

        wire1.ready().await;
        handle
            .watch()
            .wait_for(|s| s.connection_status == ConnectionStatus::Connected)
            .await
            .unwrap();
        wire1.close().await;

        // Never joined a room: reconnect resolves without any join frame.
        // The buffered ready is consumed once the replacement is wired in.
        wire2.ready().await;
        handle.reconnect().await.unwrap();

        let snap = handle.snapshot();
        assert_eq!(snap.connection_status, ConnectionStatus::Connected);
        assert!(snap.room_id.is_none());
    }

    #[tokio::test]
    async fn test_create_room_fails_fast_when_outbound_congested() {
        let (handle, mut wire) = connected_session().await;

        // Saturate the 32-slot outbound buffer without draining the wire
        for i in 0..32 {
            handle.send_message(&format!("filler {}", i)).await;
        }

        // The request frame cannot be queued, so the operation fails
        // instead of waiting on a frame that was never transmitted
        let err = handle.create_room("nick", None).await.unwrap_err();
        assert!(matches!(err, SessionError::TransportLost));
        assert_eq!(handle.snapshot().pending, PendingOperation::None);

        // Only the fillers ever reached the wire
        for _ in 0..32 {
            match wire.expect_frame().await {
                ClientFrame::Chat { .. } => {}
                other => panic!("Unexpected frame: {:?}", other),
            }
        }
        assert!(wire.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_congested_follow_up_join_fails_the_create() {
        let (handle, mut wire) = connected_session().await;

        let pending_create = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.create_room("nick", None).await })
        };
        handle
            .watch()
            .wait_for(|s| s.pending == PendingOperation::Creating)
            .await
            .unwrap();

        // Fill the outbound buffer behind the create request
        for i in 0..32 {
            handle.send_message(&format!("filler {}", i)).await;
        }
        // Round-trip the command queue so every filler is processed
        // before the server's answer arrives
        let err = handle.leave_room().await.unwrap_err();
        assert!(matches!(err, SessionError::OperationInProgress));

        wire.frame(ServerFrame::RoomCreated {
            room_id: RoomId::from_input("R42"),
        })
        .await;

        // The follow-up join could not be queued: the composite fails
        // and nothing is committed
        let err = pending_create.await.unwrap().unwrap_err();
        assert!(matches!(err, SessionError::TransportLost));
        let snap = handle.snapshot();
        assert!(snap.room_id.is_none());
        assert_eq!(snap.pending, PendingOperation::None);
    }

    #[tokio::test]
    async fn test_send_message_without_transport_is_swallowed() {
        let (handle, wire) = connected_session().await;
        wire.close().await;
        handle
            .watch()
            .wait_for(|s| s.connection_status == ConnectionStatus::Disconnected)
            .await
            .unwrap();

        // Best-effort: no error surfaces anywhere
        handle.send_message("into the void").await;
        assert!(handle.snapshot().messages.is_empty());
    }
}
