//! The client-side engine: frames out for CONNECT/SEND/SUBSCRIBE/.../
//! DISCONNECT, frames in for CONNECTED/MESSAGE/RECEIPT/ERROR.
//!
//! This module owns the session-level bookkeeping a raw frame stream
//! doesn't carry on its own
//! (subscriptions, pending acks, open transactions, outstanding receipts).
//! It never touches a socket: bytes arrive through
//! [`ClientEngine::feed`] and leave through [`ClientHandler::send_bytes`],
//! so the engine can be driven by any transport the embedder chooses.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, error, trace, warn};

use crate::error::StompError;
use crate::frame::Frame;
use crate::heartbeat::{Heartbeat, HeartbeatHost, Scheduler};
use crate::ids::Counter;
use crate::json::{JsonCodec, SerdeJsonCodec, JSON_CONTENT_TYPE};
use crate::parser::Parser;
use crate::subscription::{AckMode, Subscription};
use crate::version::StompVersion;

/// Host callbacks a [`ClientEngine`] needs from its embedder: a byte sink
/// (inherited from [`HeartbeatHost`]) plus one notification per inbound
/// server frame kind.
pub trait ClientHandler: HeartbeatHost {
    fn on_connected(&mut self, version: StompVersion, session_id: Option<&str>, server_name: Option<&str>);

    /// `json_body` is populated only when `ClientOptions::auto_json` is set
    /// and the frame's `content-type` is `application/json`; it holds the
    /// generically-decoded value so this trait doesn't need a body type
    /// parameter of its own.
    fn on_message(
        &mut self,
        frame: &Frame,
        destination: &str,
        ack_id: Option<&str>,
        json_body: Option<&serde_json::Value>,
    );

    fn on_receipt(&mut self, receipt_id: &str);

    fn on_error(&mut self, message: Option<&str>, details: Option<&[u8]>, receipt_id: Option<&str>);
}

/// Per-session client configuration.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// The virtual host sent as the CONNECT `host` header.
    pub host: String,
    /// When set, every outgoing op auto-attaches a generated `receipt`
    /// header (callers may still pass an explicit id per-call).
    pub receipt: bool,
    /// Decode `application/json` MESSAGE bodies into `on_message`'s
    /// `json_body` parameter.
    pub auto_json: bool,
    /// Floor (ms) applied to the server's advertised incoming heartbeat
    /// rate during negotiation; see [`Heartbeat::negotiate`].
    pub min_send_interval_ms: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            host: "stomp".to_string(),
            receipt: false,
            auto_json: false,
            min_send_interval_ms: 0,
        }
    }
}

/// The client-side STOMP engine.
///
/// Generic over the embedder's handler type `H` and scheduler type `S`
/// rather than boxed trait objects, so the hot path (`feed`) never pays for
/// dynamic dispatch to the host beyond the one `Rc<RefCell<H>>` shared with
/// the heartbeat timers.
pub struct ClientEngine<H: ClientHandler, S: Scheduler> {
    host: Rc<RefCell<H>>,
    scheduler: S,
    options: ClientOptions,
    parser: Parser,
    json_codec: SerdeJsonCodec,

    connected: bool,
    version: StompVersion,
    session_id: Option<String>,
    server_name: Option<String>,
    heartbeat: Option<Heartbeat<H>>,

    subscriptions: HashMap<String, Subscription>,
    subscribe_counter: Counter,
    ack_ids: HashMap<String, String>,
    ack_counter: Counter,
    transactions: HashSet<String>,
    transaction_counter: Counter,
    receipts: HashMap<String, Frame>,
    receipt_counter: Counter,
}

impl<H: ClientHandler + 'static, S: Scheduler> ClientEngine<H, S> {
    pub fn new(host: Rc<RefCell<H>>, scheduler: S, options: ClientOptions) -> Self {
        ClientEngine {
            host,
            scheduler,
            options,
            parser: Parser::new(),
            json_codec: SerdeJsonCodec,
            connected: false,
            version: StompVersion::V1_0,
            session_id: None,
            server_name: None,
            heartbeat: None,
            subscriptions: HashMap::new(),
            subscribe_counter: Counter::default(),
            ack_ids: HashMap::new(),
            ack_counter: Counter::default(),
            transactions: HashSet::new(),
            transaction_counter: Counter::default(),
            receipts: HashMap::new(),
            receipt_counter: Counter::default(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn version(&self) -> StompVersion {
        self.version
    }

    // ---- outbound ops ---------------------------------------------------

    /// Emits CONNECT. Fails with a protocol error if already connected.
    pub fn connect(
        &mut self,
        heartbeat: Option<(u32, u32)>,
        login: Option<&str>,
        passcode: Option<&str>,
        extra_headers: &[(String, String)],
    ) -> Result<(), StompError> {
        if self.connected {
            return Err(StompError::protocol("Already connected"));
        }
        let mut frame = Frame::new("CONNECT");
        frame.set_header("accept-version", StompVersion::supported_list());
        frame.set_header("host", self.options.host.clone());
        if let Some((cx, cy)) = heartbeat {
            frame.set_header("heart-beat", format!("{cx},{cy}"));
        }
        if let Some(login) = login {
            frame.set_header("login", login);
        }
        if let Some(passcode) = passcode {
            frame.set_header("passcode", passcode);
        }
        for (name, value) in extra_headers {
            frame.set_header(name.clone(), value.clone());
        }
        debug!(host = %self.options.host, heartbeat = ?heartbeat, "sending CONNECT");
        self.send_frame(frame);
        Ok(())
    }

    pub fn subscribe(
        &mut self,
        destination: &str,
        ack: Option<AckMode>,
        receipt: Option<&str>,
        extra_headers: &[(String, String)],
    ) -> Result<Option<String>, StompError> {
        self.ensure_connected()?;
        if self.subscriptions.contains_key(destination) {
            return Err(StompError::application(format!(
                "Already subscribed to '{destination}'"
            )));
        }
        let ack = ack.unwrap_or(AckMode::Auto);
        let id = self.subscribe_counter.next().to_string();

        let mut frame = Frame::new("SUBSCRIBE");
        frame.set_header("destination", destination);
        frame.set_header("id", id.clone());
        frame.set_header("ack", ack.as_str());
        for (name, value) in extra_headers {
            frame.set_header(name.clone(), value.clone());
        }
        let receipt_id = self.attach_receipt(&mut frame, receipt);
        self.remember_receipt(&receipt_id, &frame);
        self.subscriptions.insert(destination.to_string(), Subscription { id, ack });
        self.send_frame(frame);
        Ok(receipt_id)
    }

    /// Unsubscribes from `destination`. For STOMP 1.0 the outbound frame
    /// carries both `destination` and `id`; for 1.1/1.2 only `id`.
    pub fn unsubscribe(
        &mut self,
        destination: &str,
        receipt: Option<&str>,
        extra_headers: &[(String, String)],
    ) -> Result<Option<String>, StompError> {
        self.ensure_connected()?;
        let sub = self
            .subscriptions
            .remove(destination)
            .ok_or_else(|| StompError::application(format!("No subscription for '{destination}'")))?;

        let mut frame = Frame::new("UNSUBSCRIBE");
        if self.version == StompVersion::V1_0 {
            frame.set_header("destination", destination);
        }
        frame.set_header("id", sub.id.clone());
        for (name, value) in extra_headers {
            frame.set_header(name.clone(), value.clone());
        }
        let receipt_id = self.attach_receipt(&mut frame, receipt);
        self.remember_receipt(&receipt_id, &frame);
        self.send_frame(frame);
        Ok(receipt_id)
    }

    /// Sends a message body to `destination`.
    pub fn message(
        &mut self,
        destination: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
        receipt: Option<&str>,
        transaction_id: Option<&str>,
        extra_headers: &[(String, String)],
    ) -> Result<Option<String>, StompError> {
        self.ensure_connected()?;
        let mut frame = Frame::new("SEND");
        frame.set_header("destination", destination);
        if let Some(content_type) = content_type {
            frame.set_header("content-type", content_type);
        }
        if let Some(tx) = transaction_id {
            frame.set_header("transaction", tx);
        }
        for (name, value) in extra_headers {
            frame.set_header(name.clone(), value.clone());
        }
        frame.body = body;
        let receipt_id = self.attach_receipt(&mut frame, receipt);
        self.remember_receipt(&receipt_id, &frame);
        self.send_frame(frame);
        Ok(receipt_id)
    }

    /// Convenience wrapper over [`ClientEngine::message`] that encodes
    /// `value` with the crate's [`SerdeJsonCodec`] and sets
    /// `content-type: application/json`.
    pub fn message_json<T: Serialize>(
        &mut self,
        destination: &str,
        value: &T,
        receipt: Option<&str>,
        transaction_id: Option<&str>,
        extra_headers: &[(String, String)],
    ) -> Result<Option<String>, StompError> {
        let body = self.json_codec.encode_json(value)?;
        self.message(
            destination,
            body,
            Some(JSON_CONTENT_TYPE),
            receipt,
            transaction_id,
            extra_headers,
        )
    }

    /// Acknowledges a delivered message. STOMP 1.0 requires a known
    /// `ack_id` (it's translated back to the original `message-id`);
    /// 1.1/1.2 send `ack_id` directly as `id`.
    pub fn ack(
        &mut self,
        ack_id: &str,
        receipt: Option<&str>,
        transaction_id: Option<&str>,
        extra_headers: &[(String, String)],
    ) -> Result<Option<String>, StompError> {
        self.ensure_connected()?;
        let mut frame = Frame::new("ACK");
        if self.version == StompVersion::V1_0 {
            let message_id = self
                .ack_ids
                .get(ack_id)
                .ok_or_else(|| StompError::application(format!("Unknown ack id '{ack_id}'")))?;
            frame.set_header("message-id", message_id.clone());
        } else {
            frame.set_header("id", ack_id);
        }
        if let Some(tx) = transaction_id {
            frame.set_header("transaction", tx);
        }
        for (name, value) in extra_headers {
            frame.set_header(name.clone(), value.clone());
        }
        let receipt_id = self.attach_receipt(&mut frame, receipt);
        self.remember_receipt(&receipt_id, &frame);
        self.ack_ids.remove(ack_id);
        self.send_frame(frame);
        Ok(receipt_id)
    }

    /// Negatively acknowledges a delivered message. Not available in
    /// STOMP 1.0.
    pub fn nack(
        &mut self,
        ack_id: &str,
        receipt: Option<&str>,
        transaction_id: Option<&str>,
        extra_headers: &[(String, String)],
    ) -> Result<Option<String>, StompError> {
        self.ensure_connected()?;
        if self.version == StompVersion::V1_0 {
            return Err(StompError::protocol("NACK is not supported in STOMP 1.0"));
        }
        let mut frame = Frame::new("NACK");
        frame.set_header("id", ack_id);
        if let Some(tx) = transaction_id {
            frame.set_header("transaction", tx);
        }
        for (name, value) in extra_headers {
            frame.set_header(name.clone(), value.clone());
        }
        let receipt_id = self.attach_receipt(&mut frame, receipt);
        self.remember_receipt(&receipt_id, &frame);
        self.ack_ids.remove(ack_id);
        self.send_frame(frame);
        Ok(receipt_id)
    }

    /// Opens a transaction, returning its freshly-minted id alongside any
    /// receipt id.
    pub fn begin(
        &mut self,
        receipt: Option<&str>,
        extra_headers: &[(String, String)],
    ) -> Result<(String, Option<String>), StompError> {
        self.ensure_connected()?;
        let id = format!("tx-{}", self.transaction_counter.next());
        let mut frame = Frame::new("BEGIN");
        frame.set_header("transaction", id.clone());
        for (name, value) in extra_headers {
            frame.set_header(name.clone(), value.clone());
        }
        let receipt_id = self.attach_receipt(&mut frame, receipt);
        self.remember_receipt(&receipt_id, &frame);
        self.transactions.insert(id.clone());
        self.send_frame(frame);
        Ok((id, receipt_id))
    }

    pub fn commit(
        &mut self,
        transaction_id: &str,
        receipt: Option<&str>,
        extra_headers: &[(String, String)],
    ) -> Result<Option<String>, StompError> {
        self.ensure_connected()?;
        if !self.transactions.remove(transaction_id) {
            return Err(StompError::application(format!(
                "Unknown transaction '{transaction_id}'"
            )));
        }
        let mut frame = Frame::new("COMMIT");
        frame.set_header("transaction", transaction_id);
        for (name, value) in extra_headers {
            frame.set_header(name.clone(), value.clone());
        }
        let receipt_id = self.attach_receipt(&mut frame, receipt);
        self.remember_receipt(&receipt_id, &frame);
        self.send_frame(frame);
        Ok(receipt_id)
    }

    pub fn abort(
        &mut self,
        transaction_id: &str,
        receipt: Option<&str>,
        extra_headers: &[(String, String)],
    ) -> Result<Option<String>, StompError> {
        self.ensure_connected()?;
        if !self.transactions.remove(transaction_id) {
            return Err(StompError::application(format!(
                "Unknown transaction '{transaction_id}'"
            )));
        }
        let mut frame = Frame::new("ABORT");
        frame.set_header("transaction", transaction_id);
        for (name, value) in extra_headers {
            frame.set_header(name.clone(), value.clone());
        }
        let receipt_id = self.attach_receipt(&mut frame, receipt);
        self.remember_receipt(&receipt_id, &frame);
        self.send_frame(frame);
        Ok(receipt_id)
    }

    pub fn disconnect(
        &mut self,
        receipt: Option<&str>,
        extra_headers: &[(String, String)],
    ) -> Result<Option<String>, StompError> {
        self.ensure_connected()?;
        let mut frame = Frame::new("DISCONNECT");
        for (name, value) in extra_headers {
            frame.set_header(name.clone(), value.clone());
        }
        let receipt_id = self.attach_receipt(&mut frame, receipt);
        self.remember_receipt(&receipt_id, &frame);
        self.send_frame(frame);
        if let Some(hb) = &mut self.heartbeat {
            hb.stop();
        }
        self.connected = false;
        Ok(receipt_id)
    }

    // ---- inbound ---------------------------------------------------

    /// Feeds raw bytes received from the transport. Parses as many complete
    /// frames as are available and dispatches each in turn; a callback
    /// panic is caught at the per-frame boundary and reported through
    /// `on_error` rather than unwinding into the embedder.
    pub fn feed(&mut self, bytes: &[u8]) {
        if !bytes.is_empty() {
            if let Some(hb) = &mut self.heartbeat {
                hb.received_data();
            }
        }
        if let Err(e) = self.parser.feed(bytes) {
            self.report_error(e);
            return;
        }
        while let Some(frame) = self.parser.next() {
            let outcome = catch_unwind(AssertUnwindSafe(|| self.dispatch_inbound(frame)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => self.report_error(e),
                Err(_panic) => self.report_internal_error(),
            }
        }
    }

    fn dispatch_inbound(&mut self, frame: Frame) -> Result<(), StompError> {
        trace!(command = %frame.command, "dispatching inbound frame");
        match frame.command.to_ascii_uppercase().as_str() {
            "CONNECTED" => self.handle_connected(frame),
            "MESSAGE" => self.handle_message(frame),
            "RECEIPT" => self.handle_receipt(frame),
            "ERROR" => self.handle_error(frame),
            other => Err(StompError::protocol(format!("Unhandled frame: {other}")).with_frame(frame)),
        }
    }

    fn handle_connected(&mut self, frame: Frame) -> Result<(), StompError> {
        let version = frame
            .header("version")
            .and_then(|v| StompVersion::from_str(v).ok())
            .unwrap_or(StompVersion::V1_0);
        self.version = version;
        self.session_id = frame.header("session").map(String::from);
        self.server_name = frame.header("server").map(String::from);

        if let Some(raw) = frame.header("heart-beat") {
            let (incoming, outgoing) =
                Heartbeat::<H>::negotiate(raw, self.options.min_send_interval_ms, 0)?;
            let mut hb = Heartbeat::new(self.host.clone(), incoming, outgoing);
            hb.start(&mut self.scheduler);
            self.heartbeat = Some(hb);
        }

        self.connected = true;
        debug!(version = %version, session_id = ?self.session_id, server = ?self.server_name, "connected");
        self.host.borrow_mut().on_connected(
            version,
            self.session_id.as_deref(),
            self.server_name.as_deref(),
        );
        Ok(())
    }

    fn handle_message(&mut self, frame: Frame) -> Result<(), StompError> {
        let destination = frame.require_one(self.version, "destination")?;
        let message_id = frame.require_one(self.version, "message-id")?;

        if self.version != StompVersion::V1_0 {
            let subscription_id = frame.require_one(self.version, "subscription")?;
            let sub = self.subscriptions.get(&destination).ok_or_else(|| {
                StompError::application(format!("No subscription for '{destination}'"))
                    .with_frame(frame.clone())
            })?;
            if subscription_id != sub.id {
                return Err(StompError::application("Subscription id mismatch").with_frame(frame.clone()));
            }
        } else if !self.subscriptions.contains_key(&destination) {
            return Err(StompError::application(format!("No subscription for '{destination}'"))
                .with_frame(frame.clone()));
        }

        let ack_mode = self
            .subscriptions
            .get(&destination)
            .map(|s| s.ack)
            .unwrap_or(AckMode::Auto);

        let ack_id = if ack_mode != AckMode::Auto {
            let id = if self.version == StompVersion::V1_2 {
                frame
                    .header("ack")
                    .map(str::to_string)
                    .ok_or_else(|| StompError::protocol("Missing 'ack' header").with_frame(frame.clone()))?
            } else {
                self.ack_counter.next().to_string()
            };
            if self.ack_ids.contains_key(&id) {
                return Err(StompError::application(format!("Duplicate ack id '{id}'"))
                    .with_frame(frame.clone()));
            }
            self.ack_ids.insert(id.clone(), message_id);
            Some(id)
        } else {
            None
        };

        let json_body = if self.options.auto_json && frame.header("content-type") == Some(JSON_CONTENT_TYPE) {
            Some(
                self.json_codec
                    .decode_json::<serde_json::Value>(&frame.body)
                    .map_err(|e| e.with_frame(frame.clone()))?,
            )
        } else {
            None
        };

        self.host
            .borrow_mut()
            .on_message(&frame, &destination, ack_id.as_deref(), json_body.as_ref());
        Ok(())
    }

    fn handle_receipt(&mut self, frame: Frame) -> Result<(), StompError> {
        let receipt_id = frame.require_one(self.version, "receipt-id")?;
        if self.receipts.remove(&receipt_id).is_none() {
            return Err(StompError::application(format!(
                "No frame awaiting receipt '{receipt_id}'"
            ))
            .with_frame(frame));
        }
        self.host.borrow_mut().on_receipt(&receipt_id);
        Ok(())
    }

    fn handle_error(&mut self, frame: Frame) -> Result<(), StompError> {
        let message = frame.header("message").map(str::to_string);
        let receipt_id = frame.header("receipt-id").map(str::to_string);
        let details = (!frame.body.is_empty()).then(|| frame.body.clone());
        self.host
            .borrow_mut()
            .on_error(message.as_deref(), details.as_deref(), receipt_id.as_deref());
        Ok(())
    }

    // ---- internals ---------------------------------------------------

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

    fn next_receipt(&mut self) -> Option<String> {
        self.options
            .receipt
            .then(|| format!("receipt-{}", self.receipt_counter.next()))
    }

    fn attach_receipt(&mut self, frame: &mut Frame, explicit: Option<&str>) -> Option<String> {
        let receipt_id = explicit.map(str::to_string).or_else(|| self.next_receipt());
        if let Some(id) = &receipt_id {
            frame.set_header("receipt", id.clone());
        }
        receipt_id
    }

    fn remember_receipt(&mut self, receipt_id: &Option<String>, frame: &Frame) {
        if let Some(id) = receipt_id {
            self.receipts.insert(id.clone(), frame.clone());
        }
    }

    fn report_error(&mut self, err: StompError) {
        let receipt_id = err.frame().and_then(|f| f.header("receipt")).map(str::to_string);
        let details = err.frame().map(|f| f.body.clone());
        warn!(version = %self.version, message = %err.message(), "client error");
        self.host
            .borrow_mut()
            .on_error(Some(err.message()), details.as_deref(), receipt_id.as_deref());
    }

    fn report_internal_error(&mut self) {
        error!(version = %self.version, "internal client error");
        self.host.borrow_mut().on_error(Some("Internal STOMP client error"), None, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualScheduler;
    use std::cell::RefCell as StdRefCell;

    #[derive(Default)]
    struct RecordingHandler {
        sent: Vec<Vec<u8>>,
        connected: Vec<(StompVersion, Option<String>)>,
        messages: Vec<(String, Option<String>)>,
        receipts: Vec<String>,
        errors: Vec<Option<String>>,
    }

    impl HeartbeatHost for RecordingHandler {
        fn send_bytes(&mut self, bytes: &[u8]) {
            self.sent.push(bytes.to_vec());
        }
        fn heartbeat_failed(&mut self, message: &str) {
            self.errors.push(Some(message.to_string()));
        }
    }

    impl ClientHandler for RecordingHandler {
        fn on_connected(&mut self, version: StompVersion, session_id: Option<&str>, _server_name: Option<&str>) {
            self.connected.push((version, session_id.map(String::from)));
        }
        fn on_message(&mut self, _frame: &Frame, destination: &str, ack_id: Option<&str>, _json: Option<&serde_json::Value>) {
            self.messages.push((destination.to_string(), ack_id.map(String::from)));
        }
        fn on_receipt(&mut self, receipt_id: &str) {
            self.receipts.push(receipt_id.to_string());
        }
        fn on_error(&mut self, message: Option<&str>, _details: Option<&[u8]>, _receipt_id: Option<&str>) {
            self.errors.push(message.map(String::from));
        }
    }

    fn engine() -> (ClientEngine<RecordingHandler, ManualScheduler>, Rc<StdRefCell<RecordingHandler>>) {
        let host = Rc::new(StdRefCell::new(RecordingHandler::default()));
        let engine = ClientEngine::new(host.clone(), ManualScheduler::new(), ClientOptions::default());
        (engine, host)
    }

    #[test]
    fn connect_then_connected_flips_state() {
        let (mut engine, host) = engine();
        engine.connect(None, None, None, &[]).unwrap();
        assert!(host.borrow().sent[0].starts_with(b"CONNECT\n"));

        let mut connected = Frame::new("CONNECTED");
        connected.set_header("version", "1.2");
        connected.set_header("session", "sess-1");
        engine.feed(&connected.serialize());

        assert!(engine.is_connected());
        assert_eq!(engine.version(), StompVersion::V1_2);
        assert_eq!(host.borrow().connected, vec![(StompVersion::V1_2, Some("sess-1".to_string()))]);
    }

    #[test]
    fn ops_before_connected_are_protocol_errors() {
        let (mut engine, _host) = engine();
        let err = engine.subscribe("/queue/a", None, None, &[]).unwrap_err();
        assert!(matches!(err, StompError::Protocol { .. }));
    }

    #[test]
    fn subscribe_then_message_surfaces_ack_id_for_client_mode() {
        let (mut engine, host) = engine();
        engine.connect(None, None, None, &[]).unwrap();
        let mut connected = Frame::new("CONNECTED");
        connected.set_header("version", "1.2");
        engine.feed(&connected.serialize());

        engine.subscribe("/queue/a", Some(AckMode::Client), None, &[]).unwrap();

        let mut message = Frame::new("MESSAGE");
        message.set_header("destination", "/queue/a");
        message.set_header("message-id", "m-1");
        message.set_header("subscription", "1");
        message.set_header("ack", "a-1");
        engine.feed(&message.serialize());

        assert_eq!(host.borrow().messages, vec![("/queue/a".to_string(), Some("a-1".to_string()))]);

        engine.ack("a-1", None, None, &[]).unwrap();
        assert!(host.borrow().sent.last().unwrap().starts_with(b"ACK\n"));
    }

    #[test]
    fn duplicate_subscribe_is_application_error() {
        let (mut engine, _host) = engine();
        engine.connect(None, None, None, &[]).unwrap();
        engine.feed(&Frame::new("CONNECTED").serialize());
        engine.subscribe("/queue/a", None, None, &[]).unwrap();
        let err = engine.subscribe("/queue/a", None, None, &[]).unwrap_err();
        assert!(matches!(err, StompError::Application { .. }));
    }

    #[test]
    fn receipt_for_unknown_id_is_application_error_reported_via_on_error() {
        let (mut engine, host) = engine();
        engine.connect(None, None, None, &[]).unwrap();
        engine.feed(&Frame::new("CONNECTED").serialize());

        let mut receipt = Frame::new("RECEIPT");
        receipt.set_header("receipt-id", "nope");
        engine.feed(&receipt.serialize());

        assert!(host.borrow().errors[0].as_ref().unwrap().contains("nope"));
    }

    #[test]
    fn commit_on_unknown_transaction_is_rejected_without_sending() {
        let (mut engine, host) = engine();
        engine.connect(None, None, None, &[]).unwrap();
        engine.feed(&Frame::new("CONNECTED").serialize());
        let sent_before = host.borrow().sent.len();

        let err = engine.commit("tx-missing", None, &[]).unwrap_err();
        assert!(matches!(err, StompError::Application { .. }));
        assert_eq!(host.borrow().sent.len(), sent_before);
    }
}
