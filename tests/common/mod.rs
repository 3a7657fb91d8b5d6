//! Shared fixtures for the integration tests: a minimal text codec and an
//! in-process echo server.
//!
//! The server answers every 0800 with an 0810, echoing fields 2 and 11.
//! Two sentinel values in field 2 drive its behavior:
//! - [`DELAYED_RESPONSE_CARD`] makes it sleep 500 ms before replying;
//! - [`PING_COUNTER_CARD`] bumps a counter the tests read back.
//!
//! Each inbound message is handled on its own task, so a delayed reply
//! does not hold up later requests - that is what the out-of-order tests
//! rely on.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use iso8583_client::{BinaryU16Header, BoxError, IsoMessage, LengthHeader, MessageCodec};

/// Field 2 value that makes the server delay its reply by [`RESPONSE_DELAY`].
pub const DELAYED_RESPONSE_CARD: &str = "4242424242424242";

/// Field 2 value that makes the server count the message as a ping.
pub const PING_COUNTER_CARD: &str = "4111111111111111";

/// How long the server sits on a delayed response.
pub const RESPONSE_DELAY: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Test codec
// ---------------------------------------------------------------------------

/// A message for the test wire format: `MTI|field=value|field=value`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestMessage {
    mti: String,
    fields: BTreeMap<usize, String>,
}

impl TestMessage {
    pub fn new(mti: &str) -> Self {
        Self {
            mti: mti.to_string(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, field: usize, value: &str) -> Self {
        self.fields.insert(field, value.to_string());
        self
    }
}

impl IsoMessage for TestMessage {
    fn set_string(&mut self, field: usize, value: &str) -> Result<(), BoxError> {
        self.fields.insert(field, value.to_string());
        Ok(())
    }

    fn get_string(&self, field: usize) -> Option<String> {
        self.fields.get(&field).cloned()
    }

    fn mti(&self) -> Option<String> {
        if self.mti.is_empty() {
            None
        } else {
            Some(self.mti.clone())
        }
    }
}

/// Pipe-separated text codec over [`TestMessage`].
pub struct TestCodec;

impl MessageCodec for TestCodec {
    type Message = TestMessage;

    fn encode(&self, message: &TestMessage) -> Result<Vec<u8>, BoxError> {
        if message.mti.len() != 4 {
            return Err(format!("invalid MTI {:?}", message.mti).into());
        }
        let mut out = message.mti.clone();
        for (field, value) in &message.fields {
            out.push_str(&format!("|{field}={value}"));
        }
        Ok(out.into_bytes())
    }

    fn decode(&self, frame: &[u8]) -> Result<TestMessage, BoxError> {
        let text = std::str::from_utf8(frame)?;
        let mut parts = text.split('|');
        let mti = parts.next().unwrap_or_default();
        if mti.len() != 4 {
            return Err(format!("invalid MTI {mti:?}").into());
        }

        let mut message = TestMessage::new(mti);
        for part in parts {
            let (field, value) = part
                .split_once('=')
                .ok_or_else(|| format!("malformed field {part:?}"))?;
            let field: usize = field.parse().map_err(|_| format!("bad field number {field:?}"))?;
            message.fields.insert(field, value.to_string());
        }
        Ok(message)
    }
}

// ---------------------------------------------------------------------------
// Test server
// ---------------------------------------------------------------------------

type SharedWriter<S> = Arc<Mutex<WriteHalf<S>>>;

/// In-process fixture server.
///
/// `close` (and drop) tears down the listener and every open connection,
/// including replies still sitting in their delay.
pub struct TestServer {
    pub addr: String,
    pings: Arc<AtomicUsize>,
    accept_task: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl TestServer {
    /// Start a plain-TCP server framed with [`BinaryU16Header`].
    pub async fn start() -> std::io::Result<Self> {
        Self::start_with_header(Arc::new(BinaryU16Header)).await
    }

    /// Start a plain-TCP server with a custom length header.
    pub async fn start_with_header(header: Arc<dyn LengthHeader>) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?.to_string();
        let pings = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let counter = pings.clone();
        let token = shutdown.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(serve_connection(
                    stream,
                    header.clone(),
                    counter.clone(),
                    token.clone(),
                ));
            }
        });

        Ok(Self {
            addr,
            pings,
            accept_task,
            shutdown,
        })
    }

    /// Start a TLS server using the certificates under `tests/testdata`.
    pub async fn start_tls() -> std::io::Result<Self> {
        let certs = load_certs("tests/testdata/server.crt")?;
        let key = load_key("tests/testdata/server.key")?;
        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(std::io::Error::other)?;
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?.to_string();
        let pings = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let counter = pings.clone();
        let token = shutdown.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let acceptor = acceptor.clone();
                let counter = counter.clone();
                let token = token.clone();
                tokio::spawn(async move {
                    if let Ok(stream) = acceptor.accept(stream).await {
                        serve_connection(stream, Arc::new(BinaryU16Header), counter, token).await;
                    }
                });
            }
        });

        Ok(Self {
            addr,
            pings,
            accept_task,
            shutdown,
        })
    }

    /// How many ping-sentinel messages the server has seen.
    pub fn received_pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        self.accept_task.abort();
        self.shutdown.cancel();
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.close();
    }
}

async fn serve_connection<S>(
    stream: S,
    header: Arc<dyn LengthHeader>,
    pings: Arc<AtomicUsize>,
    shutdown: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, writer) = tokio::io::split(stream);
    let writer: SharedWriter<S> = Arc::new(Mutex::new(writer));

    loop {
        let len = tokio::select! {
            _ = shutdown.cancelled() => return,
            read = header.read_length(&mut reader) => match read {
                Ok(len) => len,
                Err(_) => return,
            },
        };
        let mut body = vec![0u8; len];
        if reader.read_exact(&mut body).await.is_err() {
            return;
        }
        let Ok(message) = TestCodec.decode(&body) else {
            return;
        };

        // One task per message so a delayed reply never blocks the next
        // request on the same connection. Cancellation drops the reply
        // (and with it the write half) mid-delay.
        let reply = respond(message, writer.clone(), header.clone(), pings.clone());
        let token = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = reply => {}
            }
        });
    }
}

async fn respond<S>(
    request: TestMessage,
    writer: SharedWriter<S>,
    header: Arc<dyn LengthHeader>,
    pings: Arc<AtomicUsize>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    if request.mti().as_deref() != Some("0800") {
        return;
    }

    match request.get_string(2).as_deref() {
        Some(DELAYED_RESPONSE_CARD) => tokio::time::sleep(RESPONSE_DELAY).await,
        Some(PING_COUNTER_CARD) => {
            pings.fetch_add(1, Ordering::SeqCst);
        }
        _ => {}
    }

    let mut reply = TestMessage::new("0810");
    for field in [2, 11] {
        if let Some(value) = request.get_string(field) {
            reply = reply.with_field(field, &value);
        }
    }
    let Ok(body) = TestCodec.encode(&reply) else {
        return;
    };

    let mut writer = writer.lock().await;
    if header.write_length(&mut *writer, body.len()).await.is_err() {
        return;
    }
    if writer.write_all(&body).await.is_err() {
        return;
    }
    let _ = writer.flush().await;
}

fn load_certs(
    path: &str,
) -> std::io::Result<Vec<tokio_rustls::rustls::pki_types::CertificateDer<'static>>> {
    let mut reader = std::io::BufReader::new(std::fs::File::open(path)?);
    rustls_pemfile::certs(&mut reader).collect()
}

fn load_key(path: &str) -> std::io::Result<tokio_rustls::rustls::pki_types::PrivateKeyDer<'static>> {
    let mut reader = std::io::BufReader::new(std::fs::File::open(path)?);
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| std::io::Error::other(format!("no private key in {path}")))
}
