#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use stonenet::{
    Connection, Engine, EngineConfig, Handler, Message, MessageHeader, MessageRouter, ParseError,
    ParseErrorPolicy, Parser, ParserFactory, Payload, WireMode, HEADER_SIZE,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time;

pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub enum Event {
    New(Arc<Connection>),
    Closed(u64),
    Message {
        conn: u64,
        head: Option<MessageHeader>,
        body: Vec<u8>,
        payload: Option<String>,
    },
}

/// Reports every callback on a channel.
pub struct RecordingHandler {
    pub admit: bool,
    pub echo: bool,
    pub closed: AtomicUsize,
    pub router: MessageRouter,
    events: mpsc::UnboundedSender<Event>,
}

impl RecordingHandler {
    pub fn new(admit: bool, echo: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        let (events, rx) = mpsc::unbounded_channel();
        let handler = Arc::new(RecordingHandler {
            admit,
            echo,
            closed: AtomicUsize::new(0),
            router: MessageRouter::new(),
            events,
        });
        (handler, rx)
    }

    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for RecordingHandler {
    async fn on_new_connection(&self, conn: &Arc<Connection>) -> bool {
        let _ = self.events.send(Event::New(conn.clone()));
        self.admit
    }

    fn on_connection_closed(&self, conn: &Connection) {
        self.closed.fetch_add(1, Ordering::SeqCst);
        let _ = self.events.send(Event::Closed(conn.id()));
    }

    async fn on_message(&self, conn: &Arc<Connection>, msg: Message) -> bool {
        let text = msg.body_bytes();
        let text = text.strip_suffix(b"\n").unwrap_or(text);
        if text == b"panic" {
            panic!("handler asked to panic");
        }
        if text == b"quit" {
            return false;
        }
        let _ = self.events.send(Event::Message {
            conn: conn.id(),
            head: msg.head().copied(),
            body: msg.body_bytes().to_vec(),
            payload: msg.payload::<String>().cloned(),
        });
        if self.echo {
            let reply = match msg.head() {
                Some(head) => Message::new(*head, msg.body().cloned().unwrap_or_default()),
                None => Message::raw(msg.body().cloned().unwrap_or_default()),
            };
            return conn.send(reply).await;
        }
        true
    }

    fn handler_for(&self, msg: &Message) -> Option<stonenet::network::MessageHandlerFn> {
        self.router.route(msg)
    }
}

/// Accepts UTF-8 bodies, fails everything else with `code`.
#[derive(Debug)]
pub struct Utf8ParserFactory {
    pub policy: ParseErrorPolicy,
    pub code: u16,
    pub created: AtomicUsize,
}

impl Utf8ParserFactory {
    pub fn new(policy: ParseErrorPolicy, code: u16) -> Arc<Self> {
        Arc::new(Utf8ParserFactory {
            policy,
            code,
            created: AtomicUsize::new(0),
        })
    }
}

struct Utf8Parser {
    policy: ParseErrorPolicy,
    code: u16,
}

impl Parser for Utf8Parser {
    fn parse_inbound(&mut self, msg: &Message) -> Result<Payload, ParseError> {
        std::str::from_utf8(msg.body_bytes())
            .map(|s| Box::new(s.to_string()) as Payload)
            .map_err(|e| ParseError::new(self.code, e.to_string()))
    }

    fn error_policy(&self) -> ParseErrorPolicy {
        self.policy
    }
}

impl ParserFactory for Utf8ParserFactory {
    fn get(&self) -> Box<dyn Parser> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Box::new(Utf8Parser {
            policy: self.policy,
            code: self.code,
        })
    }
}

pub fn test_config(timeout_secs: u64, max_body_size: u32) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.network.ip = "127.0.0.1".to_string();
    config.network.port = 0;
    config.network.timeout_secs = timeout_secs;
    config.network.max_body_size = max_body_size;
    config
}

/// Starts an engine listening on an ephemeral port.
pub async fn start_listener(
    config: EngineConfig,
    mode: WireMode,
    handler: Arc<dyn Handler>,
    parser_factory: Option<Arc<dyn ParserFactory>>,
) -> (Arc<Engine>, Arc<Connection>) {
    stonenet::setup_local_tracing().unwrap();
    let engine = Engine::new(config);
    let listener = engine
        .listen("127.0.0.1:0", mode, handler, parser_factory)
        .await
        .unwrap();
    (engine, listener)
}

pub async fn next_event(events: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Skips `New` events and returns the next other one.
pub async fn next_non_new(events: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    loop {
        match next_event(events).await {
            Event::New(_) => continue,
            other => return other,
        }
    }
}

pub async fn expect_new(events: &mut mpsc::UnboundedReceiver<Event>) -> Arc<Connection> {
    match next_event(events).await {
        Event::New(conn) => conn,
        other => panic!("expected new connection, got {:?}", other),
    }
}

pub fn frame(head: MessageHeader, body: &[u8]) -> Vec<u8> {
    let mut head = head;
    head.len = body.len() as u32;
    let mut bytes = head.to_bytes().to_vec();
    bytes.extend_from_slice(body);
    bytes
}

pub async fn read_frame(client: &mut TcpStream) -> (MessageHeader, Vec<u8>) {
    let mut head_buf = [0u8; HEADER_SIZE];
    time::timeout(WAIT, client.read_exact(&mut head_buf))
        .await
        .expect("timed out reading header")
        .expect("failed to read header");
    let head = MessageHeader::decode(&head_buf).expect("bad header");
    let mut body = vec![0u8; head.len as usize];
    time::timeout(WAIT, client.read_exact(&mut body))
        .await
        .expect("timed out reading body")
        .expect("failed to read body");
    (head, body)
}

/// Reads until the peer closes, returning whatever arrived.
pub async fn read_to_close(client: &mut TcpStream) -> Vec<u8> {
    let mut rest = Vec::new();
    time::timeout(WAIT, client.read_to_end(&mut rest))
        .await
        .expect("peer did not close")
        .unwrap_or_default();
    rest
}

pub async fn connect(listener: &Connection) -> TcpStream {
    TcpStream::connect(listener.local_addr()).await.unwrap()
}

pub async fn write_all(client: &mut TcpStream, bytes: &[u8]) {
    client.write_all(bytes).await.unwrap();
}
