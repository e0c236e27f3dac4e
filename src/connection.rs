//! Per-connection state machine.
//!
//! ```text
//! AwaitingFrame -> Classifying -> Dispatching -> Responding -> AwaitingFrame
//!        \______________\______________\______________\-----> Closed
//! ```
//!
//! [`Session`] holds the negotiation state and does the synchronous work:
//! classifying decoded terms (with `(gzip, _)` re-entry) and encoding
//! responses (with optional compression). [`Connection`] owns the stream and
//! drives the loop.
//!
//! Fault policy:
//! - Undecodable payloads, bad request shapes, bad `info` and unnegotiated
//!   gzip are answered with a wire error; the connection keeps serving.
//! - A truncated length prefix or an oversized frame is answered with a
//!   `BadHeader` error best-effort, then the connection closes.
//! - A clean close by the peer ends the loop without a response.

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::Instrument;

use crate::codec::{atoms, BertCodec, GzipCodec, Term};
use crate::config::ServerConfig;
use crate::control::{ConnectionState, Encoding, InfoDirective, Negotiation};
use crate::error::{BertletError, Result};
use crate::fault::Fault;
use crate::handler::{noreply, Dispatcher};
use crate::protocol::{
    read_frame, write_frame, CallKind, CallRequest, FrameRead, Request, DEFAULT_MAX_FRAME_SIZE,
};

/// Protocol limits applied to each connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Encoded response size at which gzip applies, once negotiated.
    pub gzip_threshold: usize,
    /// Frame payload limit, also the decompression limit.
    pub max_frame_size: u32,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            gzip_threshold: crate::config::DEFAULT_GZIP_THRESHOLD,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl From<&ServerConfig> for ConnectionSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            gzip_threshold: config.gzip_threshold,
            max_frame_size: config.max_frame_size,
        }
    }
}

/// Negotiation state and classification for one connection.
#[derive(Debug)]
pub struct Session {
    peer: Option<SocketAddr>,
    negotiation: Negotiation,
    settings: ConnectionSettings,
    state: ConnectionState,
}

impl Session {
    /// Fresh session with nothing negotiated.
    pub fn new(settings: ConnectionSettings) -> Self {
        Self {
            peer: None,
            negotiation: Negotiation::new(),
            settings,
            state: ConnectionState::new(),
        }
    }

    /// Stamp requests with this peer address.
    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Negotiated flags and info log.
    pub fn negotiation(&self) -> &Negotiation {
        &self.negotiation
    }

    /// State handed to middleware with every request of this connection.
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Limits in effect.
    pub fn settings(&self) -> ConnectionSettings {
        self.settings
    }

    /// Classify a decoded term.
    ///
    /// Returns `Ok(None)` for an `info` directive (no response frame),
    /// `Ok(Some(request))` for a call or cast. A `(gzip, _)` wrapper is
    /// unwrapped and its contents classified in its place.
    pub fn classify(&mut self, term: Term) -> std::result::Result<Option<CallRequest>, Fault> {
        // The pending-inbound flag covers only the next non-info frame.
        match Request::from_term(term) {
            Ok(Request::Info { command, options }) => {
                let directive = InfoDirective::parse(&command, &options)?;
                self.negotiation.apply(directive);
                Ok(None)
            }
            Ok(Request::Gzip(compressed)) => {
                // consumed even if the payload turns out to be bad
                if !self.negotiation.take_pending_inbound() {
                    return Err(Fault::gzip_not_negotiated());
                }
                let limit = self.settings.max_frame_size as usize;
                let inner = GzipCodec::decompress(&compressed, limit)
                    .and_then(|raw| BertCodec::decode(&raw))
                    .map_err(|e| Fault::from_error(&e))?;
                self.classify(inner)
            }
            Ok(Request::Call(mut request)) => {
                self.negotiation.take_pending_inbound();
                request.peer = self.peer;
                request.state = self.state.clone();
                Ok(Some(request))
            }
            Err(fault) => {
                self.negotiation.take_pending_inbound();
                Err(fault)
            }
        }
    }

    /// Encode a response into the frame payloads to send, in order.
    ///
    /// With gzip negotiated and the encoding at or above the threshold this
    /// yields an `(info, encoding, [{gzip}])` announcement followed by the
    /// `(gzip, Compressed)` frame; otherwise the single encoded term.
    pub fn encode_response(&self, response: &Term) -> Result<Vec<Vec<u8>>> {
        let encoded = BertCodec::encode(response)?;

        if !self.negotiation.gzip_enabled() || encoded.len() < self.settings.gzip_threshold {
            return Ok(vec![encoded]);
        }

        let compressed = GzipCodec::compress(&encoded)?;
        let announcement = BertCodec::encode(&InfoDirective::Encoding(Encoding::Gzip).to_term())?;
        let wrapped = BertCodec::encode(&Term::tuple(vec![
            Term::atom(atoms::GZIP),
            Term::binary(compressed),
        ]))?;

        Ok(vec![announcement, wrapped])
    }
}

/// One client connection: a stream, its session and the shared dispatcher.
pub struct Connection<S> {
    stream: S,
    session: Session,
    dispatcher: Dispatcher,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an accepted (and, for TLS, handshaken) stream.
    pub fn new(stream: S, session: Session, dispatcher: Dispatcher) -> Self {
        Self {
            stream,
            session,
            dispatcher,
        }
    }

    /// Session state.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Serve frames until the peer closes or a transport fault occurs.
    ///
    /// A clean close returns `Ok(())`.
    pub async fn run(mut self) -> Result<()> {
        let max_frame_size = self.session.settings.max_frame_size;

        loop {
            let payload = match read_frame(&mut self.stream, max_frame_size).await {
                Ok(FrameRead::Frame(payload)) => payload,
                Ok(FrameRead::Closed) => {
                    tracing::debug!("peer closed connection");
                    return Ok(());
                }
                Err(
                    err @ (BertletError::MalformedHeader(_) | BertletError::FrameTooLarge { .. }),
                ) => {
                    tracing::warn!("bad frame header, closing: {}", err);
                    let fault = Fault::from_error(&err);
                    if let Err(e) = self.respond(&fault.to_wire_term()).await {
                        tracing::debug!("could not report bad header: {}", e);
                    }
                    return Err(err);
                }
                Err(err) => return Err(err),
            };

            if let Some(response) = self.handle_payload(&payload).await {
                self.respond(&response).await?;
            }
        }
    }

    /// Decode, classify and dispatch one payload.
    async fn handle_payload(&mut self, payload: &[u8]) -> Option<Term> {
        let term = match BertCodec::decode(payload) {
            Ok(term) => term,
            Err(err) => {
                tracing::warn!("undecodable frame: {}", err);
                return Some(Fault::from_error(&err).to_wire_term());
            }
        };

        let request = match self.session.classify(term) {
            Ok(Some(request)) => request,
            Ok(None) => return None,
            Err(fault) => {
                tracing::warn!(%fault, "rejected frame");
                return Some(fault.to_wire_term());
            }
        };

        match request.kind {
            CallKind::Call => Some(self.dispatcher.dispatch(request).await),
            CallKind::Cast => {
                let dispatcher = self.dispatcher.clone();
                tokio::spawn(
                    async move {
                        dispatcher.dispatch(request).await;
                    }
                    .in_current_span(),
                );
                Some(noreply())
            }
        }
    }

    /// Write a response, compressed if negotiated.
    async fn respond(&mut self, response: &Term) -> Result<()> {
        let frames = match self.session.encode_response(response) {
            Ok(frames) => frames,
            Err(err) => {
                tracing::error!("failed to encode response: {}", err);
                self.session
                    .encode_response(&Fault::from_error(&err).to_wire_term())?
            }
        };

        for frame in &frames {
            write_frame(&mut self.stream, frame).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::is_wire_error;
    use crate::handler::{reply, MiddlewareChain, Module, ModuleRegistry};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream};

    fn gzip_opts() -> Term {
        Term::list(vec![Term::tuple(vec![Term::atom(atoms::GZIP)])])
    }

    fn info(command: &str) -> Term {
        Term::tuple(vec![Term::atom(atoms::INFO), Term::atom(command), gzip_opts()])
    }

    fn call(module: &str, function: &str, args: Vec<Term>) -> Term {
        CallRequest::call(module, function, args).to_term()
    }

    fn gzip_wrap(term: &Term) -> Term {
        let raw = BertCodec::encode(term).unwrap();
        Term::tuple(vec![
            Term::atom(atoms::GZIP),
            Term::binary(GzipCodec::compress(&raw).unwrap()),
        ])
    }

    fn fault_name(term: &Term) -> String {
        assert!(is_wire_error(term), "not an error: {term:?}");
        let inner = term.elements().unwrap()[1].elements().unwrap();
        inner[2].as_name().unwrap().to_string()
    }

    fn fault_type(term: &Term) -> String {
        let inner = term.elements().unwrap()[1].elements().unwrap();
        inner[0].as_atom().unwrap().to_string()
    }

    // --- Session ---

    #[test]
    fn test_classify_call() {
        let mut session = Session::new(ConnectionSettings::default())
            .with_peer("127.0.0.1:9000".parse().unwrap());
        let req = session
            .classify(call("m", "double", vec![Term::from(1)]))
            .unwrap()
            .unwrap();
        assert_eq!(req.function, "double");
        assert_eq!(req.peer, Some("127.0.0.1:9000".parse().unwrap()));
    }

    #[test]
    fn test_info_produces_no_request() {
        let mut session = Session::new(ConnectionSettings::default());
        assert_eq!(session.classify(info(atoms::ACCEPT_ENCODING)).unwrap(), None);
        assert!(session.negotiation().gzip_enabled());
        assert!(!session.negotiation().gzip_pending_inbound());

        // idempotent
        assert_eq!(session.classify(info(atoms::ACCEPT_ENCODING)).unwrap(), None);
        assert!(session.negotiation().gzip_enabled());
        assert_eq!(session.negotiation().log().len(), 2);
    }

    #[test]
    fn test_invalid_info() {
        let mut session = Session::new(ConnectionSettings::default());
        let term = Term::tuple(vec![
            Term::atom(atoms::INFO),
            Term::atom(atoms::ENCODING),
            Term::atom(atoms::GZIP),
        ]);
        let fault = session.classify(term).unwrap_err();
        assert_eq!(fault.name(), "InvalidInfo");
        assert!(!session.negotiation().gzip_enabled());
    }

    #[test]
    fn test_gzip_without_negotiation_never_decodes() {
        let mut session = Session::new(ConnectionSettings::default());
        // not even valid gzip: must not matter
        let term = Term::tuple(vec![Term::atom(atoms::GZIP), Term::binary(vec![0xde, 0xad])]);
        let fault = session.classify(term).unwrap_err();
        assert_eq!(fault.name(), "ProtocolError");
        assert_eq!(fault.error_type().as_str(), "protocol");
    }

    #[test]
    fn test_gzip_reentry() {
        let mut session = Session::new(ConnectionSettings::default());
        session.classify(info(atoms::ENCODING)).unwrap();
        assert!(session.negotiation().gzip_pending_inbound());

        let wrapped = gzip_wrap(&call("m", "double", vec![Term::from(2)]));
        let req = session.classify(wrapped.clone()).unwrap().unwrap();
        assert_eq!(req.args, vec![Term::from(2)]);
        assert!(!session.negotiation().gzip_pending_inbound());

        // one-shot
        let fault = session.classify(wrapped).unwrap_err();
        assert_eq!(fault.name(), "ProtocolError");
    }

    #[test]
    fn test_pending_gzip_expires_after_plain_request() {
        let mut session = Session::new(ConnectionSettings::default());
        session.classify(info(atoms::ENCODING)).unwrap();
        // a second directive keeps the flag armed
        session.classify(info(atoms::ACCEPT_ENCODING)).unwrap();
        assert!(session.negotiation().gzip_pending_inbound());

        session.classify(call("m", "double", vec![Term::from(1)])).unwrap();
        assert!(!session.negotiation().gzip_pending_inbound());
        assert!(session.negotiation().gzip_enabled());

        let wrapped = gzip_wrap(&call("m", "double", vec![Term::from(2)]));
        let fault = session.classify(wrapped).unwrap_err();
        assert_eq!(fault.name(), "ProtocolError");
        assert_eq!(fault.error_type().as_str(), "protocol");
    }

    #[test]
    fn test_pending_gzip_expires_after_bad_frame() {
        let mut session = Session::new(ConnectionSettings::default());
        session.classify(info(atoms::ENCODING)).unwrap();
        let junk = Term::tuple(vec![Term::atom("subscribe"), Term::atom("news")]);
        assert_eq!(session.classify(junk).unwrap_err().name(), "BadData");
        assert!(!session.negotiation().gzip_pending_inbound());
    }

    #[test]
    fn test_requests_share_connection_state() {
        let mut session = Session::new(ConnectionSettings::default());
        let first = session.classify(call("m", "f", vec![])).unwrap().unwrap();
        let second = session.classify(call("m", "g", vec![])).unwrap().unwrap();
        assert!(first.state.same_connection(session.state()));
        assert!(second.state.same_connection(&first.state));

        let other = Session::new(ConnectionSettings::default());
        assert!(!other.state().same_connection(session.state()));
    }

    #[test]
    fn test_gzip_garbage_is_bad_data() {
        let mut session = Session::new(ConnectionSettings::default());
        session.classify(info(atoms::ENCODING)).unwrap();
        let term = Term::tuple(vec![Term::atom(atoms::GZIP), Term::binary(vec![1, 2, 3])]);
        assert_eq!(session.classify(term).unwrap_err().name(), "BadData");
        assert!(!session.negotiation().gzip_pending_inbound());
    }

    #[test]
    fn test_gzip_bounded_by_max_frame_size() {
        let settings = ConnectionSettings {
            max_frame_size: 64,
            ..ConnectionSettings::default()
        };
        let mut session = Session::new(settings);
        session.classify(info(atoms::ENCODING)).unwrap();
        let big = call("m", "f", vec![Term::binary(vec![0u8; 4096])]);
        assert_eq!(session.classify(gzip_wrap(&big)).unwrap_err().name(), "BadData");
    }

    #[test]
    fn test_unknown_request_is_bad_data() {
        let mut session = Session::new(ConnectionSettings::default());
        let term = Term::tuple(vec![Term::atom("subscribe"), Term::atom("news")]);
        assert_eq!(session.classify(term).unwrap_err().name(), "BadData");
    }

    #[test]
    fn test_encode_response_below_threshold() {
        let mut session = Session::new(ConnectionSettings::default());
        session.classify(info(atoms::ACCEPT_ENCODING)).unwrap();
        let frames = session.encode_response(&reply(Term::from(1))).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(BertCodec::decode(&frames[0]).unwrap(), reply(Term::from(1)));
    }

    #[test]
    fn test_encode_response_not_negotiated() {
        let session = Session::new(ConnectionSettings {
            gzip_threshold: 0,
            ..ConnectionSettings::default()
        });
        let frames = session.encode_response(&reply(Term::from(1))).unwrap();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_encode_response_compressed() {
        let mut session = Session::new(ConnectionSettings {
            gzip_threshold: 8,
            ..ConnectionSettings::default()
        });
        session.classify(info(atoms::ACCEPT_ENCODING)).unwrap();

        let response = reply(Term::from(10_000));
        let frames = session.encode_response(&response).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(BertCodec::decode(&frames[0]).unwrap(), info(atoms::ENCODING));

        let wrapper = BertCodec::decode(&frames[1]).unwrap();
        let items = wrapper.elements().unwrap();
        assert!(items[0].is_atom(atoms::GZIP));
        let raw = GzipCodec::decompress(items[1].as_binary().unwrap(), 1024).unwrap();
        assert_eq!(BertCodec::decode(&raw).unwrap(), response);
    }

    // --- Connection ---

    fn spawn_connection(settings: ConnectionSettings, registry: Arc<ModuleRegistry>) -> (
        DuplexStream,
        tokio::task::JoinHandle<Result<()>>,
    ) {
        let (client, server) = duplex(64 * 1024);
        let dispatcher = Dispatcher::new(registry, MiddlewareChain::new());
        let conn = Connection::new(server, Session::new(settings), dispatcher);
        (client, tokio::spawn(conn.run()))
    }

    fn math_registry() -> Arc<ModuleRegistry> {
        let registry = Arc::new(ModuleRegistry::new());
        registry.register(Module::new("m").function("double", |args: Vec<Term>| async move {
            match args.as_slice() {
                [Term::Integer(n)] => Ok(Term::from(n * 2)),
                _ => Err(Fault::new("BadArgs", "expected one integer")),
            }
        }));
        registry
    }

    async fn send(client: &mut DuplexStream, term: &Term) {
        write_frame(client, &BertCodec::encode(term).unwrap())
            .await
            .unwrap();
    }

    async fn recv(client: &mut DuplexStream) -> Term {
        match read_frame(client, DEFAULT_MAX_FRAME_SIZE).await.unwrap() {
            FrameRead::Frame(payload) => BertCodec::decode(&payload).unwrap(),
            FrameRead::Closed => panic!("connection closed"),
        }
    }

    #[tokio::test]
    async fn test_call_round_trip() {
        let (mut client, task) = spawn_connection(ConnectionSettings::default(), math_registry());

        send(&mut client, &call("m", "double", vec![Term::from(21)])).await;
        assert_eq!(recv(&mut client).await, reply(Term::from(42)));

        send(&mut client, &call("missing", "f", vec![])).await;
        assert_eq!(fault_name(&recv(&mut client).await), "InvalidModule");

        client.shutdown().await.unwrap();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_silent_close() {
        let (mut client, task) = spawn_connection(ConnectionSettings::default(), math_registry());
        client.shutdown().await.unwrap();

        assert!(task.await.unwrap().is_ok());
        let end = read_frame(&mut client, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
        assert_eq!(end, FrameRead::Closed);
    }

    #[tokio::test]
    async fn test_cast_replies_noreply_and_runs() {
        let hits = Arc::new(AtomicUsize::new(0));
        let registry = math_registry();
        let counter = hits.clone();
        registry.register(Module::new("log").function("hit", move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Fault::new("Ignored", "cast faults are never sent"))
            }
        }));
        let (mut client, _task) = spawn_connection(ConnectionSettings::default(), registry);

        let cast = CallRequest::cast("log", "hit", vec![]).to_term();
        send(&mut client, &cast).await;
        assert_eq!(recv(&mut client).await, noreply());

        // a following call still answers in order
        send(&mut client, &call("m", "double", vec![Term::from(1)])).await;
        assert_eq!(recv(&mut client).await, reply(Term::from(2)));

        for _ in 0..100 {
            if hits.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_classification_faults_keep_connection_open() {
        let (mut client, _task) = spawn_connection(ConnectionSettings::default(), math_registry());

        // undecodable payload
        write_frame(&mut client, &[1, 2, 3]).await.unwrap();
        let err = recv(&mut client).await;
        assert_eq!((fault_name(&err), fault_type(&err)), ("BadData".into(), "protocol".into()));

        // gzip without negotiation
        let bogus = Term::tuple(vec![Term::atom(atoms::GZIP), Term::binary(vec![9; 4])]);
        send(&mut client, &bogus).await;
        let err = recv(&mut client).await;
        assert_eq!(
            (fault_name(&err), fault_type(&err)),
            ("ProtocolError".into(), "protocol".into())
        );

        send(&mut client, &call("m", "double", vec![Term::from(4)])).await;
        assert_eq!(recv(&mut client).await, reply(Term::from(8)));
    }

    #[tokio::test]
    async fn test_info_sends_nothing() {
        let (mut client, _task) = spawn_connection(ConnectionSettings::default(), math_registry());

        send(&mut client, &info(atoms::ACCEPT_ENCODING)).await;
        send(&mut client, &info(atoms::ACCEPT_ENCODING)).await;
        send(&mut client, &call("m", "double", vec![Term::from(3)])).await;

        // first frame back answers the call
        assert_eq!(recv(&mut client).await, reply(Term::from(6)));
    }

    #[tokio::test]
    async fn test_compressed_request_and_response() {
        let settings = ConnectionSettings {
            gzip_threshold: 8,
            ..ConnectionSettings::default()
        };
        let (mut client, _task) = spawn_connection(settings, math_registry());

        send(&mut client, &info(atoms::ENCODING)).await;
        send(&mut client, &gzip_wrap(&call("m", "double", vec![Term::from(5000)]))).await;

        assert_eq!(recv(&mut client).await, info(atoms::ENCODING));
        let wrapper = recv(&mut client).await;
        let items = wrapper.elements().unwrap();
        assert!(items[0].is_atom(atoms::GZIP));
        let raw = GzipCodec::decompress(items[1].as_binary().unwrap(), 1 << 20).unwrap();
        assert_eq!(BertCodec::decode(&raw).unwrap(), reply(Term::from(10_000)));
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_after_error() {
        let settings = ConnectionSettings {
            max_frame_size: 16,
            ..ConnectionSettings::default()
        };
        let (mut client, task) = spawn_connection(settings, math_registry());

        client.write_all(&[0, 0, 1, 0]).await.unwrap();
        let err = recv(&mut client).await;
        assert_eq!((fault_name(&err), fault_type(&err)), ("BadHeader".into(), "protocol".into()));

        let result = task.await.unwrap();
        assert!(matches!(result, Err(BertletError::FrameTooLarge { size: 256, max: 16 })));
    }

    #[tokio::test]
    async fn test_truncated_header_closes_after_error() {
        let (mut client, task) = spawn_connection(ConnectionSettings::default(), math_registry());

        client.write_all(&[0, 0]).await.unwrap();
        client.shutdown().await.unwrap();

        let err = recv(&mut client).await;
        assert_eq!(fault_name(&err), "BadHeader");
        assert!(matches!(
            task.await.unwrap(),
            Err(BertletError::MalformedHeader(2))
        ));
    }
}
