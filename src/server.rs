//! The server-side engine: accept, per-command dispatch, subscription/ack
//! book-keeping, transaction buffering and replay, receipt emission.
//!
//! Mirrors [`crate::client::ClientEngine`]'s shape (generic over the host
//! capability and the scheduler, bytes in through [`ServerEngine::feed`],
//! bytes out through [`ServerHandler::send_bytes`]) but drives the other
//! half of the protocol: it receives CONNECT/SEND/SUBSCRIBE/... and emits
//! CONNECTED/MESSAGE/RECEIPT/ERROR.

use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use tracing::{debug, error, trace, warn};

use crate::error::StompError;
use crate::frame::Frame;
use crate::heartbeat::{Heartbeat, HeartbeatHost, Scheduler};
use crate::ids::{Counter, IdGenerator};
use crate::parser::Parser;
use crate::subscription::{AckMode, Subscription};
use crate::version::StompVersion;

/// What a [`ServerHandler`] decides in response to a CONNECT/STOMP frame.
///
/// `Accept`'s payload is the callback's returned session id when it
/// supplies one, otherwise the engine's own generated UUID is used.
#[derive(Debug, Clone)]
pub enum ConnectOutcome {
    Accept { session_id: Option<String> },
    Reject,
}

/// Host callbacks a [`ServerEngine`] needs from its embedder.
pub trait ServerHandler: HeartbeatHost {
    fn on_connect(
        &mut self,
        frame: &Frame,
        login: Option<&str>,
        passcode: Option<&str>,
        host: Option<&str>,
        session_id: &str,
    ) -> ConnectOutcome;

    fn on_message(&mut self, frame: &Frame, destination: &str, body: &[u8], content_type: &str);

    fn on_subscribe(&mut self, frame: &Frame, id: &str, destination: &str, ack: AckMode);

    fn on_unsubscribe(&mut self, frame: &Frame, id: &str, destination: &str);

    fn on_ack(&mut self, frame: &Frame, ack_id: &str);

    fn on_nack(&mut self, frame: &Frame, ack_id: &str);

    fn on_disconnect(&mut self, frame: &Frame, reason: &str);

    fn on_error(&mut self, frame: Option<&Frame>, error: &StompError);
}

/// Per-session server configuration.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Populates the `server` header on CONNECTED as `"<name>[/<version>]"`.
    pub name: Option<String>,
    pub version: Option<String>,
    /// Floor applied to the client's requested incoming heartbeat rate.
    pub min_send_interval_ms: u32,
    /// Floor applied to the client's requested outgoing heartbeat rate.
    pub desired_receive_interval_ms: u32,
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            name: None,
            version: None,
            min_send_interval_ms: 5000,
            desired_receive_interval_ms: 60000,
        }
    }
}

/// A server-constructed MESSAGE to deliver to a subscriber.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub destination: String,
    pub subscription: Option<String>,
    pub message_id: Option<String>,
    pub ack: Option<String>,
    pub content_type: Option<String>,
    pub extra_headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl OutboundMessage {
    pub fn new(destination: impl Into<String>, body: Vec<u8>) -> Self {
        OutboundMessage {
            destination: destination.into(),
            subscription: None,
            message_id: None,
            ack: None,
            content_type: None,
            extra_headers: Vec::new(),
            body,
        }
    }

    pub fn with_subscription(mut self, subscription: impl Into<String>) -> Self {
        self.subscription = Some(subscription.into());
        self
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_ack(mut self, ack: impl Into<String>) -> Self {
        self.ack = Some(ack.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerCommand {
    Connect,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
}

impl ServerCommand {
    fn parse(command: &str) -> Option<Self> {
        match command.to_ascii_uppercase().as_str() {
            "CONNECT" | "STOMP" => Some(Self::Connect),
            "SEND" => Some(Self::Send),
            "SUBSCRIBE" => Some(Self::Subscribe),
            "UNSUBSCRIBE" => Some(Self::Unsubscribe),
            "ACK" => Some(Self::Ack),
            "NACK" => Some(Self::Nack),
            "BEGIN" => Some(Self::Begin),
            "COMMIT" => Some(Self::Commit),
            "ABORT" => Some(Self::Abort),
            "DISCONNECT" => Some(Self::Disconnect),
            _ => None,
        }
    }
}

/// The server-side STOMP engine.
///
/// Generic over the embedder's handler type `H`, scheduler type `S`, and id
/// generator type `G` — same rationale as [`crate::client::ClientEngine`]:
/// monomorphized capability injection, not `dyn`.
pub struct ServerEngine<H: ServerHandler, S: Scheduler, G: IdGenerator> {
    host: Rc<RefCell<H>>,
    scheduler: S,
    id_generator: G,
    options: ServerOptions,
    parser: Parser,

    connected: bool,
    version: StompVersion,
    session_id: Option<String>,
    heartbeat: Option<Heartbeat<H>>,

    subscriptions: HashMap<String, Subscription>,
    subscription_ids: HashMap<String, String>,
    subscribe_counter: Counter,

    ack_ids: HashMap<String, String>,
    message_id_to_ack_id: HashMap<String, String>,
    ack_counter: Counter,

    transactions: HashMap<String, Vec<Frame>>,
}

impl<H: ServerHandler + 'static, S: Scheduler, G: IdGenerator> ServerEngine<H, S, G> {
    pub fn new(host: Rc<RefCell<H>>, scheduler: S, id_generator: G, options: ServerOptions) -> Self {
        ServerEngine {
            host,
            scheduler,
            id_generator,
            options,
            parser: Parser::new(),
            connected: false,
            version: StompVersion::V1_0,
            session_id: None,
            heartbeat: None,
            subscriptions: HashMap::new(),
            subscription_ids: HashMap::new(),
            subscribe_counter: Counter::default(),
            ack_ids: HashMap::new(),
            message_id_to_ack_id: HashMap::new(),
            ack_counter: Counter::default(),
            transactions: HashMap::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn version(&self) -> StompVersion {
        self.version
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    // ---- inbound -------------------------------------------------------

    /// Feeds raw bytes received from the transport. Mirrors
    /// [`crate::client::ClientEngine::feed`]'s panic-boundary and
    /// error-propagation discipline.
    pub fn feed(&mut self, bytes: &[u8]) {
        if !bytes.is_empty() {
            if let Some(hb) = &mut self.heartbeat {
                hb.received_data();
            }
        }
        if let Err(e) = self.parser.feed(bytes) {
            self.error(&e);
            return;
        }
        while let Some(frame) = self.parser.next() {
            let outcome = catch_unwind(AssertUnwindSafe(|| self.dispatch_inbound(frame)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => self.error(&e),
                Err(_panic) => self.report_internal_error(),
            }
        }
    }

    fn dispatch_inbound(&mut self, frame: Frame) -> Result<(), StompError> {
        trace!(command = %frame.command, connected = self.connected, "dispatching inbound frame");
        let command = ServerCommand::parse(&frame.command).ok_or_else(|| {
            StompError::protocol(format!("Unknown command: {}", frame.command)).with_frame(frame.clone())
        })?;

        if !self.connected && command != ServerCommand::Connect {
            return Err(StompError::protocol("You must first issue a CONNECT frame").with_frame(frame));
        }

        let transaction = frame.header("transaction").map(str::to_string);
        let executed = match (transaction, command) {
            (Some(_), ServerCommand::Begin | ServerCommand::Commit | ServerCommand::Abort) => {
                self.dispatch_command(command, &frame)?;
                true
            }
            (Some(tx), ServerCommand::Send | ServerCommand::Ack | ServerCommand::Nack) => {
                let buffer = self.transactions.get_mut(&tx).ok_or_else(|| {
                    StompError::protocol(format!("Unknown transaction '{tx}'")).with_frame(frame.clone())
                })?;
                buffer.push(frame.clone());
                false
            }
            (Some(_), _) => {
                return Err(StompError::protocol("Transaction not permitted").with_frame(frame));
            }
            (None, _) => {
                self.dispatch_command(command, &frame)?;
                true
            }
        };

        if executed && command != ServerCommand::Connect {
            if let Some(receipt_id) = frame.header("receipt").map(str::to_string) {
                self.send_receipt(&receipt_id);
            }
        }
        Ok(())
    }

    fn dispatch_command(&mut self, command: ServerCommand, frame: &Frame) -> Result<(), StompError> {
        match command {
            ServerCommand::Connect => self.handle_connect(frame),
            ServerCommand::Send => self.handle_send(frame),
            ServerCommand::Subscribe => self.handle_subscribe(frame),
            ServerCommand::Unsubscribe => self.handle_unsubscribe(frame),
            ServerCommand::Ack => self.handle_ack(frame),
            ServerCommand::Nack => self.handle_nack(frame),
            ServerCommand::Begin => self.handle_begin(frame),
            ServerCommand::Commit => self.handle_commit(frame),
            ServerCommand::Abort => self.handle_abort(frame),
            ServerCommand::Disconnect => self.handle_disconnect(frame),
        }
    }

    fn handle_connect(&mut self, frame: &Frame) -> Result<(), StompError> {
        if self.connected {
            return Err(StompError::protocol("Already connected").with_frame(frame.clone()));
        }
        let version = StompVersion::negotiate(frame.header("accept-version"))?;
        if frame.header("receipt").is_some() {
            return Err(StompError::protocol("CONNECT must not carry a receipt header").with_frame(frame.clone()));
        }
        let host_header = frame
            .require(version, &[("host", &[StompVersion::V1_0])])?
            .pop()
            .flatten();
        let session_id = self.id_generator.generate();

        let negotiated_heartbeat = match frame.header("heart-beat") {
            Some(raw) => Some(Heartbeat::<H>::negotiate(
                raw,
                self.options.min_send_interval_ms,
                self.options.desired_receive_interval_ms,
            )?),
            None => None,
        };

        let login = frame.header("login").map(str::to_string);
        let passcode = frame.header("passcode").map(str::to_string);

        let outcome = self
            .host
            .borrow_mut()
            .on_connect(frame, login.as_deref(), passcode.as_deref(), host_header.as_deref(), &session_id);

        let session_id = match outcome {
            ConnectOutcome::Accept { session_id: override_id } => override_id.unwrap_or(session_id),
            ConnectOutcome::Reject => return Err(StompError::protocol("Invalid login").with_frame(frame.clone())),
        };

        self.version = version;
        self.connected = true;
        self.session_id = Some(session_id.clone());

        let mut reply = Frame::new("CONNECTED");
        reply.set_header("version", version.as_str());
        reply.set_header("session", session_id);

        if let Some((incoming, outgoing)) = negotiated_heartbeat {
            reply.set_header("heart-beat", format!("{outgoing},{incoming}"));
            let mut hb = Heartbeat::new(self.host.clone(), incoming, outgoing);
            hb.start(&mut self.scheduler);
            self.heartbeat = Some(hb);
        }

        if let Some(name) = &self.options.name {
            let server_header = match &self.options.version {
                Some(v) => format!("{name}/{v}"),
                None => name.clone(),
            };
            reply.set_header("server", server_header);
        }

        debug!(version = %self.version, session_id = %self.session_id.as_deref().unwrap_or(""), "accepted CONNECT");
        self.send_frame(reply);
        Ok(())
    }

    fn handle_send(&mut self, frame: &Frame) -> Result<(), StompError> {
        let destination = frame.require_one(self.version, "destination")?;
        let content_type = frame.header("content-type").unwrap_or("text/plain").to_string();
        self.host.borrow_mut().on_message(frame, &destination, &frame.body, &content_type);
        Ok(())
    }

    fn handle_subscribe(&mut self, frame: &Frame) -> Result<(), StompError> {
        let destination = frame.require_one(self.version, "destination")?;
        let id = match frame.header("id") {
            Some(id) => id.to_string(),
            None if self.version == StompVersion::V1_0 => self.subscribe_counter.next().to_string(),
            None => return Err(StompError::protocol("Missing 'id' header").with_frame(frame.clone())),
        };
        let ack_raw = frame.header("ack").unwrap_or("auto");
        let ack = AckMode::parse(ack_raw, self.version).map_err(|e| e.with_frame(frame.clone()))?;

        if self.subscriptions.contains_key(&destination) {
            return Err(
                StompError::application(format!("Already subscribed to '{destination}'")).with_frame(frame.clone())
            );
        }

        self.subscription_ids.insert(id.clone(), destination.clone());
        self.subscriptions.insert(destination.clone(), Subscription { id: id.clone(), ack });
        self.host.borrow_mut().on_subscribe(frame, &id, &destination, ack);
        Ok(())
    }

    fn handle_unsubscribe(&mut self, frame: &Frame) -> Result<(), StompError> {
        let id_header = frame.header("id").map(str::to_string);
        if id_header.is_none() && self.version != StompVersion::V1_0 {
            return Err(StompError::protocol("Missing 'id' header").with_frame(frame.clone()));
        }

        let destination = match &id_header {
            Some(id) => self
                .subscription_ids
                .get(id)
                .cloned()
                .ok_or_else(|| StompError::protocol("Subscription not found").with_frame(frame.clone()))?,
            None => frame.require_one(self.version, "destination")?,
        };

        let sub = self
            .subscriptions
            .remove(&destination)
            .ok_or_else(|| StompError::protocol("Subscription not found").with_frame(frame.clone()))?;
        self.subscription_ids.remove(&sub.id);
        self.host.borrow_mut().on_unsubscribe(frame, &sub.id, &destination);
        Ok(())
    }

    fn handle_ack(&mut self, frame: &Frame) -> Result<(), StompError> {
        let ack_id = self.resolve_ack_id(frame)?;
        self.forget_ack_id(&ack_id);
        self.host.borrow_mut().on_ack(frame, &ack_id);
        Ok(())
    }

    fn handle_nack(&mut self, frame: &Frame) -> Result<(), StompError> {
        if self.version == StompVersion::V1_0 {
            return Err(StompError::protocol("Invalid command").with_frame(frame.clone()));
        }
        let ack_id = self.resolve_ack_id(frame)?;
        self.forget_ack_id(&ack_id);
        self.host.borrow_mut().on_nack(frame, &ack_id);
        Ok(())
    }

    /// Common ACK/NACK header resolution: `id` is required
    /// from 1.2; earlier versions require `message-id` and fall back to the
    /// `message-id -> ack-id` correlation recorded by [`Self::message`].
    fn resolve_ack_id(&mut self, frame: &Frame) -> Result<String, StompError> {
        if self.version == StompVersion::V1_2 {
            frame.require_one(self.version, "id")
        } else {
            let message_id = frame.require_one(self.version, "message-id")?;
            frame
                .header("id")
                .map(str::to_string)
                .or_else(|| self.message_id_to_ack_id.get(&message_id).cloned())
                .ok_or_else(|| {
                    StompError::application(format!("No ack correlation for message '{message_id}'"))
                        .with_frame(frame.clone())
                })
        }
    }

    fn forget_ack_id(&mut self, ack_id: &str) {
        self.ack_ids.remove(ack_id);
        self.message_id_to_ack_id.retain(|_, v| v != ack_id);
    }

    fn handle_begin(&mut self, frame: &Frame) -> Result<(), StompError> {
        let tx = frame.require_one(self.version, "transaction")?;
        if self.transactions.contains_key(&tx) {
            return Err(
                StompError::protocol(format!("Transaction '{tx}' already exists")).with_frame(frame.clone())
            );
        }
        self.transactions.insert(tx, Vec::new());
        Ok(())
    }

    fn handle_commit(&mut self, frame: &Frame) -> Result<(), StompError> {
        let tx = frame.require_one(self.version, "transaction")?;
        let buffered = self
            .transactions
            .remove(&tx)
            .ok_or_else(|| StompError::protocol(format!("Unknown transaction '{tx}'")).with_frame(frame.clone()))?;
        for mut buffered_frame in buffered {
            buffered_frame.remove_header("transaction");
            self.dispatch_inbound(buffered_frame)?;
        }
        Ok(())
    }

    fn handle_abort(&mut self, frame: &Frame) -> Result<(), StompError> {
        let tx = frame.require_one(self.version, "transaction")?;
        self.transactions
            .remove(&tx)
            .ok_or_else(|| StompError::protocol(format!("Unknown transaction '{tx}'")).with_frame(frame.clone()))?;
        Ok(())
    }

    fn handle_disconnect(&mut self, frame: &Frame) -> Result<(), StompError> {
        self.host.borrow_mut().on_disconnect(frame, "client request");
        Ok(())
    }

    // ---- server-originated operations -------------------------------

    /// Delivers a MESSAGE to the embedder's transport. See
    /// [`OutboundMessage`] for the fields this requires.
    pub fn message(&mut self, outbound: OutboundMessage) -> Result<(String, Option<String>), StompError> {
        self.ensure_connected()?;

        let sub = self
            .subscriptions
            .get(&outbound.destination)
            .cloned()
            .ok_or_else(|| StompError::application(format!("No subscription for '{}'", outbound.destination)))?;

        if self.version != StompVersion::V1_0 {
            let subscription_id = outbound
                .subscription
                .as_deref()
                .ok_or_else(|| StompError::protocol("Missing 'subscription' header"))?;
            if subscription_id != sub.id {
                return Err(StompError::application("Subscription id mismatch"));
            }
        }

        let message_id = outbound.message_id.unwrap_or_else(|| self.id_generator.generate());

        let mut frame = Frame::new("MESSAGE");
        frame.set_header("destination", outbound.destination.clone());
        frame.set_header("message-id", message_id.clone());
        if self.version != StompVersion::V1_0 {
            frame.set_header("subscription", sub.id.clone());
        }
        if let Some(content_type) = outbound.content_type {
            frame.set_header("content-type", content_type);
        }
        for (name, value) in outbound.extra_headers {
            frame.set_header(name, value);
        }
        frame.body = outbound.body;

        let ack_id = if sub.ack != AckMode::Auto {
            let id = outbound.ack.unwrap_or_else(|| self.ack_counter.next().to_string());
            if self.version == StompVersion::V1_2 {
                frame.set_header("ack", id.clone());
            } else {
                self.message_id_to_ack_id.insert(message_id.clone(), id.clone());
            }
            self.ack_ids.insert(id.clone(), message_id.clone());
            Some(id)
        } else {
            None
        };

        self.send_frame(frame);
        Ok((message_id, ack_id))
    }

    /// Serializes `err` into an ERROR reply and notifies the embedder.
    /// Always called, never allowed to propagate past [`Self::feed`].
    pub fn error(&mut self, err: &StompError) {
        warn!(version = %self.version, message = %err.message(), "server error");
        let mut frame = Frame::new("ERROR");
        frame.set_header("message", err.message());
        for (name, value) in err.extra_headers() {
            frame.set_header(name.clone(), value.clone());
        }
        if let Some(triggering) = err.frame() {
            let is_connect = triggering.command.eq_ignore_ascii_case("CONNECT")
                || triggering.command.eq_ignore_ascii_case("STOMP");
            if !is_connect {
                if let Some(receipt_id) = triggering.header("receipt") {
                    frame.set_header("receipt-id", receipt_id);
                }
            }
            frame.body = triggering.pretty_print().into_bytes();
        }
        self.send_frame(frame);
        self.host.borrow_mut().on_error(err.frame(), err);
    }

    /// Stops the heartbeat and marks the session disconnected. Idempotent.
    pub fn disconnect(&mut self) {
        if let Some(hb) = &mut self.heartbeat {
            hb.stop();
        }
        self.connected = false;
    }

    // ---- internals -------------------------------------------------------

    fn ensure_connected(&self) -> Result<(), StompError> {
        if !self.connected {
            Err(StompError::protocol("Not connected"))
        } else {
            Ok(())
        }
    }

    fn send_frame(&mut self, frame: Frame) {
        let bytes = frame.serialize();
        self.host.borrow_mut().send_bytes(&bytes);
        if let Some(hb) = &mut self.heartbeat {
            hb.sent_data();
        }
    }

    fn send_receipt(&mut self, receipt_id: &str) {
        let mut frame = Frame::new("RECEIPT");
        frame.set_header("receipt-id", receipt_id);
        self.send_frame(frame);
    }

    /// No triggering frame is available here: a panic inside dispatch
    /// unwinds past whatever frame it was processing.
    fn report_internal_error(&mut self) {
        error!(version = %self.version, "internal server error");
        let mut frame = Frame::new("ERROR");
        frame.set_header("message", "Internal STOMP server error");
        self.send_frame(frame);
        self.host
            .borrow_mut()
            .on_error(None, &StompError::application("Internal STOMP server error"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::UuidGenerator;
    use crate::testing::ManualScheduler;
    use std::cell::RefCell as StdRefCell;

    #[derive(Default)]
    struct RecordingHandler {
        sent: Vec<Vec<u8>>,
        connects: Vec<(Option<String>, Option<String>, Option<String>, String)>,
        messages: Vec<(String, Vec<u8>, String)>,
        subscribes: Vec<(String, String, AckMode)>,
        unsubscribes: Vec<(String, String)>,
        acks: Vec<String>,
        nacks: Vec<String>,
        disconnects: Vec<String>,
        errors: Vec<String>,
        accept: bool,
    }

    impl HeartbeatHost for RecordingHandler {
        fn send_bytes(&mut self, bytes: &[u8]) {
            self.sent.push(bytes.to_vec());
        }
        fn heartbeat_failed(&mut self, message: &str) {
            self.errors.push(message.to_string());
        }
    }

    impl ServerHandler for RecordingHandler {
        fn on_connect(
            &mut self,
            _frame: &Frame,
            login: Option<&str>,
            passcode: Option<&str>,
            host: Option<&str>,
            session_id: &str,
        ) -> ConnectOutcome {
            self.connects.push((
                login.map(String::from),
                passcode.map(String::from),
                host.map(String::from),
                session_id.to_string(),
            ));
            if self.accept {
                ConnectOutcome::Accept { session_id: None }
            } else {
                ConnectOutcome::Reject
            }
        }

        fn on_message(&mut self, _frame: &Frame, destination: &str, body: &[u8], content_type: &str) {
            self.messages.push((destination.to_string(), body.to_vec(), content_type.to_string()));
        }

        fn on_subscribe(&mut self, _frame: &Frame, id: &str, destination: &str, ack: AckMode) {
            self.subscribes.push((id.to_string(), destination.to_string(), ack));
        }

        fn on_unsubscribe(&mut self, _frame: &Frame, id: &str, destination: &str) {
            self.unsubscribes.push((id.to_string(), destination.to_string()));
        }

        fn on_ack(&mut self, _frame: &Frame, ack_id: &str) {
            self.acks.push(ack_id.to_string());
        }

        fn on_nack(&mut self, _frame: &Frame, ack_id: &str) {
            self.nacks.push(ack_id.to_string());
        }

        fn on_disconnect(&mut self, _frame: &Frame, reason: &str) {
            self.disconnects.push(reason.to_string());
        }

        fn on_error(&mut self, _frame: Option<&Frame>, error: &StompError) {
            self.errors.push(error.message().to_string());
        }
    }

    fn engine() -> (
        ServerEngine<RecordingHandler, ManualScheduler, UuidGenerator>,
        Rc<StdRefCell<RecordingHandler>>,
    ) {
        let host = Rc::new(StdRefCell::new(RecordingHandler { accept: true, ..Default::default() }));
        let engine = ServerEngine::new(host.clone(), ManualScheduler::new(), UuidGenerator, ServerOptions::default());
        (engine, host)
    }

    fn connect_1_2(engine: &mut ServerEngine<RecordingHandler, ManualScheduler, UuidGenerator>) {
        let raw = b"CONNECT\naccept-version:1.0,1.1,1.2\nhost:stomp\n\n\x00\n";
        engine.feed(raw);
    }

    #[test]
    fn minimal_connect_negotiates_highest_version() {
        let (mut engine, host) = engine();
        connect_1_2(&mut engine);

        assert!(engine.is_connected());
        assert_eq!(engine.version(), StompVersion::V1_2);
        assert_eq!(host.borrow().connects.len(), 1);
        assert!(host.borrow().sent[0].starts_with(b"CONNECTED\n"));
        let text = String::from_utf8_lossy(&host.borrow().sent[0]).into_owned();
        assert!(text.contains("version:1.2"));
    }

    #[test]
    fn missing_host_on_1_2_is_protocol_error_with_failed_frame_body() {
        let (mut engine, host) = engine();
        engine.feed(b"CONNECT\naccept-version:1.2\n\n\x00\n");

        assert!(!engine.is_connected());
        let sent = host.borrow().sent[0].clone();
        let text = String::from_utf8_lossy(&sent).into_owned();
        assert!(text.starts_with("ERROR\n"));
        assert!(text.contains("message:Missing 'host' header"));
        assert!(text.contains("Failed frame:\n-----\nCONNECT\naccept-version:1.2"));
        assert_eq!(host.borrow().errors, vec!["Missing 'host' header".to_string()]);
    }

    #[test]
    fn rejecting_login_sends_invalid_login_error() {
        let (mut engine, host) = engine();
        host.borrow_mut().accept = false;
        connect_1_2(&mut engine);

        assert!(!engine.is_connected());
        let text = String::from_utf8_lossy(&host.borrow().sent[0]).into_owned();
        assert!(text.contains("message:Invalid login"));
    }

    #[test]
    fn subscribe_then_deliver_message_with_subscription_header() {
        let (mut engine, host) = engine();
        connect_1_2(&mut engine);

        let mut sub = Frame::new("SUBSCRIBE");
        sub.set_header("destination", "/q");
        sub.set_header("id", "1");
        engine.feed(&sub.serialize());
        assert_eq!(host.borrow().subscribes, vec![("1".to_string(), "/q".to_string(), AckMode::Auto)]);

        let (message_id, ack_id) = engine
            .message(
                OutboundMessage::new("/q", b"hi".to_vec())
                    .with_message_id("123")
                    .with_subscription("1"),
            )
            .unwrap();
        assert_eq!(message_id, "123");
        assert!(ack_id.is_none());

        let sent = host.borrow().sent.last().unwrap().clone();
        let text = String::from_utf8_lossy(&sent).into_owned();
        assert!(text.contains("content-length:2"));
        assert!(text.contains("content-type:text/plain"));
        assert!(text.contains("subscription:1"));
    }

    #[test]
    fn non_auto_ack_mints_ack_header_on_1_2() {
        let (mut engine, host) = engine();
        connect_1_2(&mut engine);

        let mut sub = Frame::new("SUBSCRIBE");
        sub.set_header("destination", "/q");
        sub.set_header("id", "1");
        sub.set_header("ack", "client");
        engine.feed(&sub.serialize());

        let (_message_id, ack_id) = engine
            .message(OutboundMessage::new("/q", b"hi".to_vec()).with_message_id("m1").with_subscription("1"))
            .unwrap();
        let ack_id = ack_id.unwrap();
        assert_eq!(ack_id, "1");
        let sent = host.borrow().sent.last().unwrap().clone();
        assert!(String::from_utf8_lossy(&sent).contains("ack:1"));

        let mut ack = Frame::new("ACK");
        ack.set_header("id", &ack_id);
        engine.feed(&ack.serialize());
        assert_eq!(host.borrow().acks, vec!["1".to_string()]);
    }

    #[test]
    fn transaction_replay_preserves_order_and_strips_transaction_header() {
        let (mut engine, host) = engine();
        connect_1_2(&mut engine);

        let mut begin = Frame::new("BEGIN");
        begin.set_header("transaction", "tx");
        engine.feed(&begin.serialize());

        let mut send_a = Frame::new("SEND");
        send_a.set_header("destination", "/q");
        send_a.set_header("transaction", "tx");
        send_a.body = b"a".to_vec();
        engine.feed(&send_a.serialize());

        let mut send_b = Frame::new("SEND");
        send_b.set_header("destination", "/q");
        send_b.set_header("transaction", "tx");
        send_b.body = b"b".to_vec();
        engine.feed(&send_b.serialize());

        assert!(host.borrow().messages.is_empty(), "buffered frames must not execute early");

        let mut commit = Frame::new("COMMIT");
        commit.set_header("transaction", "tx");
        engine.feed(&commit.serialize());

        let messages = host.borrow().messages.clone();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].1, b"a");
        assert_eq!(messages[1].1, b"b");
    }

    #[test]
    fn abort_discards_buffer_without_executing() {
        let (mut engine, host) = engine();
        connect_1_2(&mut engine);

        let mut begin = Frame::new("BEGIN");
        begin.set_header("transaction", "tx");
        engine.feed(&begin.serialize());

        let mut send_a = Frame::new("SEND");
        send_a.set_header("destination", "/q");
        send_a.set_header("transaction", "tx");
        send_a.body = b"a".to_vec();
        engine.feed(&send_a.serialize());

        let mut abort = Frame::new("ABORT");
        abort.set_header("transaction", "tx");
        engine.feed(&abort.serialize());

        assert!(host.borrow().messages.is_empty());

        let mut commit = Frame::new("COMMIT");
        commit.set_header("transaction", "tx");
        engine.feed(&commit.serialize());
        let text = String::from_utf8_lossy(host.borrow().sent.last().unwrap()).into_owned();
        assert!(text.contains("Unknown transaction"));
    }

    #[test]
    fn nack_is_rejected_on_1_0() {
        let (mut engine, host) = engine();
        engine.feed(b"CONNECT\n\n\x00\n");
        assert!(engine.is_connected());
        assert_eq!(engine.version(), StompVersion::V1_0);

        let mut nack = Frame::new("NACK");
        nack.set_header("message-id", "m1");
        engine.feed(&nack.serialize());
        let text = String::from_utf8_lossy(host.borrow().sent.last().unwrap()).into_owned();
        assert!(text.contains("message:Invalid command"));
    }

    #[test]
    fn receipt_header_triggers_a_receipt_reply() {
        let (mut engine, host) = engine();
        connect_1_2(&mut engine);

        let mut sub = Frame::new("SUBSCRIBE");
        sub.set_header("destination", "/q");
        sub.set_header("id", "1");
        sub.set_header("receipt", "r-1");
        engine.feed(&sub.serialize());

        let sent = host.borrow().sent.last().unwrap().clone();
        assert_eq!(sent, b"RECEIPT\nreceipt-id:r-1\n\n\x00\n");
    }

    #[test]
    fn unsubscribe_unknown_destination_is_protocol_error() {
        let (mut engine, host) = engine();
        connect_1_2(&mut engine);

        let mut unsub = Frame::new("UNSUBSCRIBE");
        unsub.set_header("id", "nope");
        engine.feed(&unsub.serialize());
        let text = String::from_utf8_lossy(host.borrow().sent.last().unwrap()).into_owned();
        assert!(text.contains("Subscription not found"));
    }
}
