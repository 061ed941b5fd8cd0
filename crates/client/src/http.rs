//! Monoio-native HTTPS transport
//!
//! TCP from monoio, TLS from rustls driven by hand through its buffer API,
//! HTTP/1.1 written directly. The same [`TlsStream`] carries the WebSocket
//! connection; once the upgrade completes it is split into independently
//! owned read and write halves.

use crate::errors::{ExchangeError, Result};
use backpack_core::PerfTimer;

use monoio::io::{AsyncReadRent, AsyncWriteRent, AsyncWriteRentExt, OwnedReadHalf, OwnedWriteHalf, Splitable};
use monoio::net::TcpStream;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection};
use std::cell::RefCell;
use std::fmt;
use std::io::{Cursor, Read, Write};
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;
use url::Url;

const READ_CHUNK: usize = 8192;

/// HTTP verbs used by the exchange API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// POST and PUT send a JSON body; GET and DELETE put parameters in the query
    pub fn carries_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Root store built from webpki-roots
pub fn default_tls_config() -> Arc<ClientConfig> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    Arc::new(
        ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    )
}

/// Open TCP, run the TLS handshake and return the encrypted stream
pub async fn connect_tls(url: &Url, tls_config: Arc<ClientConfig>) -> Result<TlsStream> {
    let host = url
        .host_str()
        .ok_or_else(|| ExchangeError::InvalidUrl(format!("no host in {url}")))?;
    let port = url.port_or_known_default().unwrap_or(443);

    let tcp_stream = TcpStream::connect(format!("{host}:{port}"))
        .await
        .map_err(|e| ExchangeError::ConnectionFailed(format!("TCP connect to {host}:{port} failed: {e}")))?;
    // Latency over throughput for small frames
    let _ = tcp_stream.set_nodelay(true);

    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| ExchangeError::InvalidUrl(format!("invalid server name {host}: {e}")))?;
    let tls_conn = ClientConnection::new(tls_config, server_name)
        .map_err(|e| ExchangeError::ConnectionFailed(format!("TLS setup failed: {e}")))?;

    let mut tls_stream = TlsStream::new(tcp_stream, tls_conn);
    tls_stream.complete_handshake().await?;
    debug!("✅ TLS handshake completed with {}", host);
    Ok(tls_stream)
}

/// Monoio-native HTTPS client
pub struct MonoioHttpsClient {
    tls_config: Arc<ClientConfig>,
    user_agent: String,
}

/// Parsed HTTP response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

impl MonoioHttpsClient {
    pub fn new() -> Self {
        Self::with_tls_config(default_tls_config())
    }

    pub fn with_tls_config(tls_config: Arc<ClientConfig>) -> Self {
        Self {
            tls_config,
            user_agent: concat!("backpack-client/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    pub async fn get(&self, url: &Url, headers: &[(&str, String)]) -> Result<HttpResponse> {
        self.request(HttpMethod::Get, url, None, headers).await
    }

    /// Issue one request on a fresh connection (`Connection: close`)
    pub async fn request(
        &self,
        method: HttpMethod,
        url: &Url,
        body: Option<&str>,
        headers: &[(&str, String)],
    ) -> Result<HttpResponse> {
        let timer = PerfTimer::start(format!("https_{}", method.as_str().to_lowercase()));
        let host = url
            .host_str()
            .ok_or_else(|| ExchangeError::InvalidUrl(format!("no host in {url}")))?;

        let mut path_and_query = if url.path().is_empty() { "/".to_string() } else { url.path().to_string() };
        if let Some(query) = url.query() {
            path_and_query.push('?');
            path_and_query.push_str(query);
        }

        let mut tls_stream = connect_tls(url, self.tls_config.clone()).await?;

        let request = build_request(method, host, &path_and_query, &self.user_agent, body, headers);
        tls_stream.write_all(request.as_bytes()).await?;

        let raw = tls_stream.read_to_end().await?;
        let response = parse_http_response(&raw)?;

        timer.finish();
        debug!("📡 {} {} -> {}", method, url, response.status);
        Ok(response)
    }
}

impl Default for MonoioHttpsClient {
    fn default() -> Self {
        Self::new()
    }
}

fn build_request(
    method: HttpMethod,
    host: &str,
    path_and_query: &str,
    user_agent: &str,
    body: Option<&str>,
    headers: &[(&str, String)],
) -> String {
    let body = body.unwrap_or("");
    let mut request = format!(
        "{method} {path_and_query} HTTP/1.1\r\n\
         Host: {host}\r\n\
         User-Agent: {user_agent}\r\n\
         Accept: application/json\r\n\
         Connection: close\r\n\
         Content-Length: {}\r\n",
        body.len()
    );
    if !body.is_empty() {
        request.push_str("Content-Type: application/json; charset=utf-8\r\n");
    }
    for (key, value) in headers {
        request.push_str(&format!("{key}: {value}\r\n"));
    }
    request.push_str("\r\n");
    request.push_str(body);
    request
}

/// Parse a complete HTTP/1.1 response, decoding chunked bodies
pub fn parse_http_response(data: &[u8]) -> Result<HttpResponse> {
    let header_end = find_subsequence(data, b"\r\n\r\n")
        .ok_or_else(|| ExchangeError::InvalidResponse("no header terminator".to_string()))?;

    let header_part = String::from_utf8_lossy(&data[..header_end]);
    let body_bytes = &data[header_end + 4..];

    let mut lines = header_part.lines();
    let status_line = lines
        .next()
        .ok_or_else(|| ExchangeError::InvalidResponse("empty response".to_string()))?;
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| ExchangeError::InvalidResponse(format!("invalid status line: {status_line}")))?;

    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect();

    let chunked = headers.iter().any(|(key, value)| {
        key.eq_ignore_ascii_case("transfer-encoding") && value.to_ascii_lowercase().contains("chunked")
    });
    let body = if chunked { decode_chunked(body_bytes)? } else { body_bytes.to_vec() };

    Ok(HttpResponse {
        status,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

fn decode_chunked(mut data: &[u8]) -> Result<Vec<u8>> {
    let mut body = Vec::with_capacity(data.len());
    loop {
        let line_end = find_subsequence(data, b"\r\n")
            .ok_or_else(|| ExchangeError::InvalidResponse("truncated chunk header".to_string()))?;
        let size_line = String::from_utf8_lossy(&data[..line_end]);
        let size_hex = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| ExchangeError::InvalidResponse(format!("invalid chunk size: {size_hex}")))?;
        data = &data[line_end + 2..];

        if size == 0 {
            return Ok(body);
        }
        if data.len() < size {
            return Err(ExchangeError::InvalidResponse("truncated chunk".to_string()));
        }
        body.extend_from_slice(&data[..size]);
        data = data.get(size + 2..).unwrap_or(&[]);
    }
}

pub(crate) fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn tls_err(context: &str, e: impl fmt::Display) -> ExchangeError {
    ExchangeError::NetworkError(format!("{context}: {e}"))
}

/// Drain everything rustls wants to send into one buffer
fn pending_tls_bytes(tls_conn: &mut ClientConnection) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    while tls_conn.wants_write() {
        tls_conn.write_tls(&mut out).map_err(|e| tls_err("TLS write failed", e))?;
    }
    Ok(out)
}

/// Feed ciphertext into rustls, processing records as they complete
fn ingest_tls_bytes(tls_conn: &mut ClientConnection, bytes: &[u8]) -> Result<()> {
    let mut cursor = Cursor::new(bytes);
    while (cursor.position() as usize) < bytes.len() {
        tls_conn.read_tls(&mut cursor).map_err(|e| tls_err("TLS read failed", e))?;
        tls_conn
            .process_new_packets()
            .map_err(|e| tls_err("TLS record processing failed", e))?;
    }
    Ok(())
}

/// Read decrypted bytes; `None` means rustls needs more ciphertext
fn read_plaintext(tls_conn: &mut ClientConnection, buf: &mut [u8]) -> Result<Option<usize>> {
    match tls_conn.reader().read(buf) {
        Ok(0) => Ok(None),
        Ok(n) => Ok(Some(n)),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
        Err(e) => Err(tls_err("TLS read failed", e)),
    }
}

/// TLS session over a monoio TCP stream
pub struct TlsStream {
    stream: TcpStream,
    tls_conn: ClientConnection,
    handshake_complete: bool,
}

impl TlsStream {
    pub fn new(stream: TcpStream, tls_conn: ClientConnection) -> Self {
        Self {
            stream,
            tls_conn,
            handshake_complete: false,
        }
    }

    pub async fn complete_handshake(&mut self) -> Result<()> {
        if self.handshake_complete {
            return Ok(());
        }

        loop {
            let outgoing = pending_tls_bytes(&mut self.tls_conn)?;
            if !outgoing.is_empty() {
                let (result, _) = self.stream.write_all(outgoing).await;
                result.map_err(|e| tls_err("TCP write failed", e))?;
            }

            if !self.tls_conn.is_handshaking() {
                self.handshake_complete = true;
                return Ok(());
            }

            if !self.tls_conn.wants_read() {
                return Err(ExchangeError::ConnectionFailed("TLS handshake stalled".to_string()));
            }

            let (result, buf) = self.stream.read(vec![0u8; READ_CHUNK]).await;
            let bytes_read = result.map_err(|e| tls_err("TCP read failed", e))?;
            if bytes_read == 0 {
                return Err(ExchangeError::ConnectionFailed("connection closed during TLS handshake".to_string()));
            }
            ingest_tls_bytes(&mut self.tls_conn, &buf[..bytes_read])?;
        }
    }

    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.complete_handshake().await?;

        self.tls_conn
            .writer()
            .write_all(data)
            .map_err(|e| tls_err("TLS application write failed", e))?;

        let outgoing = pending_tls_bytes(&mut self.tls_conn)?;
        if !outgoing.is_empty() {
            let (result, _) = self.stream.write_all(outgoing).await;
            result.map_err(|e| tls_err("TCP write failed", e))?;
        }
        Ok(())
    }

    /// Read some plaintext; `Ok(0)` means the peer closed the connection
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.complete_handshake().await?;

        loop {
            if let Some(n) = read_plaintext(&mut self.tls_conn, buf)? {
                return Ok(n);
            }

            let (result, tcp_buf) = self.stream.read(vec![0u8; READ_CHUNK]).await;
            let bytes_read = result.map_err(|e| tls_err("TCP read failed", e))?;
            if bytes_read == 0 {
                return Ok(0);
            }
            ingest_tls_bytes(&mut self.tls_conn, &tcp_buf[..bytes_read])?;
        }
    }

    /// Read until the peer closes the connection
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut response = Vec::new();
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            let n = self.read(&mut chunk).await?;
            if n == 0 {
                return Ok(response);
            }
            response.extend_from_slice(&chunk[..n]);
        }
    }

    /// Split into halves that can live in separate tasks
    ///
    /// The rustls session is shared through `Rc<RefCell<_>>`; neither half holds
    /// the borrow across an await point.
    pub fn into_split(self) -> (TlsReadHalf, TlsWriteHalf) {
        let tls_conn = Rc::new(RefCell::new(self.tls_conn));
        let (read_half, write_half) = self.stream.into_split();
        (
            TlsReadHalf {
                stream: read_half,
                tls_conn: Rc::clone(&tls_conn),
            },
            TlsWriteHalf {
                stream: write_half,
                tls_conn,
            },
        )
    }
}

/// Receiving half of a split [`TlsStream`]
pub struct TlsReadHalf {
    stream: OwnedReadHalf<TcpStream>,
    tls_conn: Rc<RefCell<ClientConnection>>,
}

impl TlsReadHalf {
    /// Read some plaintext; `Ok(0)` means the peer closed the connection
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            if let Some(n) = read_plaintext(&mut self.tls_conn.borrow_mut(), buf)? {
                return Ok(n);
            }

            let (result, tcp_buf) = self.stream.read(vec![0u8; READ_CHUNK]).await;
            let bytes_read = result.map_err(|e| tls_err("TCP read failed", e))?;
            if bytes_read == 0 {
                return Ok(0);
            }
            ingest_tls_bytes(&mut self.tls_conn.borrow_mut(), &tcp_buf[..bytes_read])?;
        }
    }
}

/// Sending half of a split [`TlsStream`]
pub struct TlsWriteHalf {
    stream: OwnedWriteHalf<TcpStream>,
    tls_conn: Rc<RefCell<ClientConnection>>,
}

impl TlsWriteHalf {
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let outgoing = {
            let mut tls_conn = self.tls_conn.borrow_mut();
            tls_conn
                .writer()
                .write_all(data)
                .map_err(|e| tls_err("TLS application write failed", e))?;
            pending_tls_bytes(&mut tls_conn)?
        };

        if !outgoing.is_empty() {
            let (result, _) = self.stream.write_all(outgoing).await;
            result.map_err(|e| tls_err("TCP write failed", e))?;
        }
        Ok(())
    }

    /// Send TLS close_notify and shut down the TCP write side
    pub async fn shutdown(&mut self) -> Result<()> {
        let outgoing = {
            let mut tls_conn = self.tls_conn.borrow_mut();
            tls_conn.send_close_notify();
            pending_tls_bytes(&mut tls_conn)?
        };

        if !outgoing.is_empty() {
            let (result, _) = self.stream.write_all(outgoing).await;
            result.map_err(|e| tls_err("TCP write failed", e))?;
        }
        self.stream
            .shutdown()
            .await
            .map_err(|e| tls_err("TCP shutdown failed", e))
    }
}
