//! SMTP client with support for implicit TLS and STARTTLS.
//!
//! Every blocking step (resolve, connect, handshake, each write and each
//! reply) is bounded by the same per-operation timeout.

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use mailprobe_common::tracing;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::{
    TlsConnector,
    rustls::{
        ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        pki_types::{CertificateDer, ServerName, UnixTime},
    },
};

use super::{
    auth::{Credentials, Mechanism},
    error::{ClientError, Result},
    response::Response,
};

/// Initial size of the read buffer for SMTP responses.
const BUFFER_SIZE: usize = 8192;

/// Maximum size of the read buffer to prevent unbounded growth (1MB).
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Upper bound on 334 round trips during AUTH.
const MAX_AUTH_CHALLENGES: usize = 10;

/// An SMTP client connection that can be either plain TCP or TLS-wrapped.
enum ClientConnection {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl ClientConnection {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Plain(stream) => {
                stream.write_all(data).await?;
                stream.flush().await?;
            }
            Self::Tls(stream) => {
                stream.write_all(data).await?;
                stream.flush().await?;
            }
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match self {
            Self::Plain(stream) => stream.read(buf).await?,
            Self::Tls(stream) => stream.read(buf).await?,
        };
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(n)
    }

    async fn shutdown(&mut self) -> Result<()> {
        match self {
            Self::Plain(stream) => stream.shutdown().await?,
            Self::Tls(stream) => stream.shutdown().await?,
        }
        Ok(())
    }

    async fn upgrade_to_tls(self, domain: &str, accept_invalid_certs: bool) -> Result<Self> {
        match self {
            Self::Plain(stream) => {
                let connector = TlsConnector::from(Arc::new(tls_config(accept_invalid_certs)?));
                let server_name = ServerName::try_from(domain.to_string())
                    .map_err(|e| ClientError::TlsError(format!("Invalid domain: {e}")))?;

                let tls_stream = connector
                    .connect(server_name, stream)
                    .await
                    .map_err(|e| ClientError::TlsError(e.to_string()))?;

                Ok(Self::Tls(Box::new(tls_stream)))
            }
            Self::Tls(_) => Err(ClientError::TlsError(
                "Connection is already TLS".to_string(),
            )),
        }
    }
}

fn tls_config(accept_invalid_certs: bool) -> Result<ClientConfig> {
    let mut root_store = RootCertStore::empty();

    let certs = rustls_native_certs::load_native_certs();
    if !certs.errors.is_empty() {
        tracing::warn!(errors = ?certs.errors, "Some certificates could not be loaded");
    }
    let (added, ignored) = root_store.add_parsable_certificates(certs.certs);
    tracing::trace!(added, ignored, "Loaded native root certificates");

    if root_store.is_empty() && !accept_invalid_certs {
        return Err(ClientError::TlsError(
            "No trusted root certificates available".to_string(),
        ));
    }

    let mut config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    if accept_invalid_certs {
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(NoVerifier));
    }

    Ok(config)
}

/// A certificate verifier that accepts every certificate.
///
/// Only installed when the caller turned certificate validation off.
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}

/// Runs `future`, failing with [`ClientError::Timeout`] after `after`.
async fn bounded<T>(
    operation: &'static str,
    after: Duration,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(after, future)
        .await
        .map_err(|_| ClientError::Timeout { operation, after })?
}

/// Outcome of an AUTH exchange.
#[derive(Debug)]
pub struct AuthExchange {
    /// The final reply from the server.
    pub response: Response,
    /// Number of challenges answered.
    pub challenges: usize,
}

/// An SMTP client for sending commands and receiving responses.
pub struct SmtpClient {
    connection: Option<ClientConnection>,
    buffer: Vec<u8>,
    buffer_pos: usize,
    server_domain: String,
    peer: SocketAddr,
    accept_invalid_certs: bool,
    timeout: Duration,
}

impl SmtpClient {
    /// Resolves `host` and connects to the first address that accepts.
    ///
    /// # Errors
    ///
    /// Returns `Resolve`/`NoAddresses` if name resolution fails, or the last
    /// connect error if no address could be reached.
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let addresses: Vec<SocketAddr> = bounded("DNS lookup", timeout, async {
            tokio::net::lookup_host((host, port))
                .await
                .map(|addresses| addresses.collect::<Vec<_>>())
                .map_err(|source| ClientError::Resolve {
                    host: host.to_string(),
                    source,
                })
        })
        .await?;

        let mut last_error = ClientError::NoAddresses(host.to_string());
        for address in addresses {
            tracing::debug!(%address, "Connecting");
            match bounded("Connection", timeout, async {
                TcpStream::connect(address).await.map_err(ClientError::Io)
            })
            .await
            {
                Ok(stream) => {
                    return Ok(Self {
                        connection: Some(ClientConnection::Plain(stream)),
                        buffer: vec![0u8; BUFFER_SIZE],
                        buffer_pos: 0,
                        server_domain: host.to_string(),
                        peer: address,
                        accept_invalid_certs: false,
                        timeout,
                    });
                }
                Err(e) => {
                    tracing::debug!(%address, error = %e, "Connection attempt failed");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    /// Sets whether to accept invalid TLS certificates.
    #[must_use]
    pub const fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// The address the socket is connected to.
    #[must_use]
    pub const fn peer(&self) -> SocketAddr {
        self.peer
    }

    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self.connection, Some(ClientConnection::Tls(_)))
    }

    /// Performs the TLS handshake on the current socket.
    ///
    /// Used directly for implicit TLS and by [`Self::starttls`] after the
    /// server agreed to upgrade.
    ///
    /// # Errors
    ///
    /// Returns an error if the handshake fails or times out.
    pub async fn handshake(&mut self) -> Result<()> {
        let connection = self
            .connection
            .take()
            .ok_or(ClientError::ConnectionClosed)?;

        let upgraded = bounded(
            "TLS handshake",
            self.timeout,
            connection.upgrade_to_tls(&self.server_domain, self.accept_invalid_certs),
        )
        .await?;

        self.connection = Some(upgraded);
        // Anything buffered before the handshake is a protocol violation.
        self.buffer_pos = 0;
        Ok(())
    }

    /// Reads the initial server greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or the greeting is malformed.
    pub async fn read_greeting(&mut self) -> Result<Response> {
        self.read_response("Greeting").await
    }

    /// Sends a command line.
    ///
    /// # Errors
    ///
    /// Returns an error if sending fails or times out.
    pub async fn send_command(&mut self, command: &str) -> Result<()> {
        let data = format!("{command}\r\n");
        self.write("Command", data.as_bytes()).await
    }

    /// Sends a command and reads the reply.
    ///
    /// # Errors
    ///
    /// Returns an error if sending or reading fails.
    pub async fn command(&mut self, command: &str) -> Result<Response> {
        self.send_command(command).await?;
        self.read_response("Response").await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn ehlo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("EHLO {domain}")).await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn helo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("HELO {domain}")).await
    }

    /// Sends STARTTLS and, if the server agrees, upgrades the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the command or the TLS handshake fails.
    pub async fn starttls(&mut self) -> Result<Response> {
        let response = self.command("STARTTLS").await?;

        if response.is_success() {
            self.handshake().await?;
        }

        Ok(response)
    }

    /// Authenticates with `mechanism`, answering up to ten challenges.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or if the server keeps
    /// challenging past the limit.
    pub async fn auth(
        &mut self,
        mechanism: Mechanism,
        credentials: &Credentials,
    ) -> Result<AuthExchange> {
        let mut response = self.command(&mechanism.initial_command(credentials)).await?;
        let mut challenges = 0;

        while response.code == 334 {
            if challenges == MAX_AUTH_CHALLENGES {
                // Leave the exchange rather than keep feeding a loop.
                self.send_command("*").await?;
                return Err(ClientError::Auth(format!(
                    "Too many challenges ({MAX_AUTH_CHALLENGES})"
                )));
            }
            challenges += 1;

            let challenge = response.lines.first().map_or("", String::as_str);
            let answer = match mechanism.respond(credentials, challenge) {
                Ok(answer) => answer,
                Err(e) => {
                    self.send_command("*").await?;
                    return Err(e);
                }
            };
            response = self.command(&answer).await?;
        }

        Ok(AuthExchange {
            response,
            challenges,
        })
    }

    /// Sends MAIL FROM, with a SIZE parameter when given.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn mail_from(&mut self, from: &str, size: Option<usize>) -> Result<Response> {
        let cmd = if let Some(sz) = size {
            format!("MAIL FROM:<{from}> SIZE={sz}")
        } else {
            format!("MAIL FROM:<{from}>")
        };
        self.command(&cmd).await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn rcpt_to(&mut self, to: &str) -> Result<Response> {
        self.command(&format!("RCPT TO:<{to}>")).await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn data(&mut self) -> Result<Response> {
        self.command("DATA").await
    }

    /// Sends the dot-stuffed message followed by the end-of-data marker.
    ///
    /// # Errors
    ///
    /// Returns an error if sending fails or no reply arrives in time.
    pub async fn send_data(&mut self, data: &str) -> Result<Response> {
        let mut payload = dot_stuff(data);
        if !payload.ends_with("\r\n") {
            payload.push_str("\r\n");
        }
        payload.push_str(".\r\n");

        self.write("Message transfer", payload.as_bytes()).await?;
        self.read_response("Message acceptance").await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn quit(&mut self) -> Result<Response> {
        self.command("QUIT").await
    }

    /// Closes the socket. Errors are ignored; the peer may already be gone.
    pub async fn close(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            let _ = bounded("Close", self.timeout, connection.shutdown()).await;
        }
    }

    async fn write(&mut self, operation: &'static str, data: &[u8]) -> Result<()> {
        let timeout = self.timeout;
        let connection = self
            .connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?;
        bounded(operation, timeout, connection.send(data)).await
    }

    /// Reads one complete SMTP reply, bounded as a whole by the timeout.
    async fn read_response(&mut self, operation: &'static str) -> Result<Response> {
        let timeout = self.timeout;
        bounded(operation, timeout, self.read_response_unbounded()).await
    }

    async fn read_response_unbounded(&mut self) -> Result<Response> {
        loop {
            if let Some((response, consumed)) =
                Response::parse_response(&self.buffer[..self.buffer_pos])?
            {
                self.buffer.copy_within(consumed..self.buffer_pos, 0);
                self.buffer_pos -= consumed;
                return Ok(response);
            }

            if self.buffer_pos >= self.buffer.len() {
                let new_size = self.buffer.len() * 2;
                if new_size > MAX_BUFFER_SIZE {
                    return Err(ClientError::ParseError(format!(
                        "Response too large (exceeds {MAX_BUFFER_SIZE} bytes)"
                    )));
                }
                self.buffer.resize(new_size, 0);
            }

            let connection = self
                .connection
                .as_mut()
                .ok_or(ClientError::ConnectionClosed)?;
            let n = connection.read(&mut self.buffer[self.buffer_pos..]).await?;
            self.buffer_pos += n;
        }
    }
}

/// Doubles a leading dot on every line and normalises line endings to CRLF.
fn dot_stuff(data: &str) -> String {
    let mut stuffed = String::with_capacity(data.len() + 16);
    for line in data.split_inclusive('\n') {
        if line.starts_with('.') {
            stuffed.push('.');
        }
        match line.strip_suffix('\n') {
            Some(content) => {
                stuffed.push_str(content.strip_suffix('\r').unwrap_or(content));
                stuffed.push_str("\r\n");
            }
            None => stuffed.push_str(line),
        }
    }
    stuffed
}
