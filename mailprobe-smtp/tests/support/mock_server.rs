//! Scripted SMTP server for driving probes in tests.
#![allow(dead_code)] // Not every test uses every knob.
//!
//! The server can:
//! - answer each command with a configured reply
//! - accept or reject AUTH PLAIN / AUTH LOGIN against fixed credentials
//! - delay the greeting or hang on the Nth command to exercise timeouts
//! - upgrade via STARTTLS or speak implicit TLS with a self-signed certificate
//! - record every command (and message body) for assertions
//!
//! ```rust,no_run
//! use support::mock_server::MockSmtpServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = MockSmtpServer::builder()
//!     .with_auth("user", "secret")
//!     .with_rcpt_to_response(550, "5.1.1 User unknown")
//!     .build()
//!     .await?;
//!
//! // probe 127.0.0.1:server.addr().port() ...
//!
//! server.shutdown();
//! # Ok(())
//! # }
//! ```

use std::{
    fmt::Write,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use base64::{Engine, engine::general_purpose::STANDARD};
use mailprobe_common::tracing;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    time::timeout,
};
use tokio_rustls::{
    TlsAcceptor,
    rustls::{
        ServerConfig,
        pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer},
    },
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A command as the mock saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    Helo(String),
    /// Mechanism name; payloads are checked, not stored here.
    Auth(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// Message content after DATA, dot-stuffing intact.
    MessageContent(String),
    Quit,
    StartTls,
    Other(String),
}

#[derive(Debug, Clone)]
pub struct SmtpResponse {
    pub code: u16,
    pub message: String,
}

impl SmtpResponse {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Clone)]
struct EhloResponse {
    code: u16,
    lines: Vec<String>,
}

impl EhloResponse {
    fn to_bytes(&self) -> Vec<u8> {
        let mut response = String::new();
        let last = self.lines.len().saturating_sub(1);

        for (i, line) in self.lines.iter().enumerate() {
            let separator = if i < last { '-' } else { ' ' };
            let _ = write!(&mut response, "{}{separator}{line}\r\n", self.code);
        }

        response.into_bytes()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum TlsKind {
    StartTls,
    Implicit,
}

/// How a command loop ended.
enum SessionEnd {
    Closed,
    /// The peer was told to start TLS on this socket.
    Upgrade,
}

/// A TLS acceptor for `localhost` backed by a fresh self-signed certificate.
fn self_signed_acceptor() -> Result<TlsAcceptor, BoxError> {
    let certificate = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])?;
    let chain = vec![CertificateDer::from(certificate.serialize_der()?)];
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        certificate.serialize_private_key_der(),
    ));

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

#[derive(Clone)]
struct MockServerConfig {
    greeting: SmtpResponse,
    ehlo_response: EhloResponse,
    helo_response: SmtpResponse,
    credentials: Option<(String, String)>,
    auth_failure: SmtpResponse,
    mail_from_response: SmtpResponse,
    rcpt_to_response: SmtpResponse,
    data_response: SmtpResponse,
    data_end_response: SmtpResponse,
    quit_response: SmtpResponse,
    starttls_response: Option<SmtpResponse>,
    tls: Option<(TlsKind, TlsAcceptor)>,

    greeting_delay: Option<Duration>,
    hang_on_command: Option<usize>,
    drop_on_quit: bool,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            greeting: SmtpResponse::new(220, "mock.example.com ESMTP ready"),
            ehlo_response: EhloResponse {
                code: 250,
                lines: vec![
                    "mock.example.com greets you".to_string(),
                    "SIZE 10240000".to_string(),
                    "8BITMIME".to_string(),
                ],
            },
            helo_response: SmtpResponse::new(250, "mock.example.com"),
            credentials: None,
            auth_failure: SmtpResponse::new(535, "5.7.8 Authentication credentials invalid"),
            mail_from_response: SmtpResponse::new(250, "2.1.0 OK"),
            rcpt_to_response: SmtpResponse::new(250, "2.1.5 OK"),
            data_response: SmtpResponse::new(354, "End data with <CR><LF>.<CR><LF>"),
            data_end_response: SmtpResponse::new(250, "2.0.0 OK: queued as 4F2A"),
            quit_response: SmtpResponse::new(221, "2.0.0 Bye"),
            starttls_response: None,
            tls: None,
            greeting_delay: None,
            hang_on_command: None,
            drop_on_quit: false,
        }
    }
}

pub struct MockSmtpServer {
    addr: SocketAddr,
    commands_received: Arc<RwLock<Vec<SmtpCommand>>>,
    shutdown: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    encrypted: Arc<AtomicBool>,
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder::new()
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands_received.read().await.clone()
    }

    /// Whether a client connection has ended (by QUIT or by the peer closing).
    #[must_use]
    pub fn connection_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Whether any session completed a TLS handshake.
    #[must_use]
    pub fn saw_tls(&self) -> bool {
        self.encrypted.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    async fn read_line<S: AsyncRead + Unpin>(
        reader: &mut BufReader<S>,
        line: &mut String,
    ) -> Result<bool, BoxError> {
        line.clear();
        match timeout(Duration::from_secs(10), reader.read_line(line)).await {
            Err(_) => Ok(false),
            Ok(read) => Ok(read? > 0),
        }
    }

    /// Checks an AUTH exchange and answers it. Returns the reply to send.
    async fn authenticate<S: AsyncRead + AsyncWrite + Unpin>(
        config: &MockServerConfig,
        argument: &str,
        stream: &mut BufReader<S>,
    ) -> Result<Vec<u8>, BoxError> {
        let Some((username, password)) = &config.credentials else {
            return Ok(SmtpResponse::new(503, "5.5.1 AUTH not available").to_bytes());
        };

        let mut words = argument.split_whitespace();
        let mechanism = words.next().unwrap_or_default().to_ascii_uppercase();

        let supplied = match mechanism.as_str() {
            "PLAIN" => {
                let payload = if let Some(initial) = words.next() {
                    initial.to_string()
                } else {
                    stream.write_all(b"334 \r\n").await?;
                    let mut line = String::new();
                    if !Self::read_line(stream, &mut line).await? {
                        return Ok(Vec::new());
                    }
                    line.trim().to_string()
                };
                let decoded = STANDARD.decode(payload).unwrap_or_default();
                let decoded = String::from_utf8_lossy(&decoded).to_string();
                let mut parts = decoded.split('\0').skip(1);
                (
                    parts.next().unwrap_or_default().to_string(),
                    parts.next().unwrap_or_default().to_string(),
                )
            }
            "LOGIN" => {
                let mut line = String::new();
                stream
                    .write_all(format!("334 {}\r\n", STANDARD.encode("Username:")).as_bytes())
                    .await?;
                if !Self::read_line(stream, &mut line).await? {
                    return Ok(Vec::new());
                }
                let user = STANDARD.decode(line.trim()).unwrap_or_default();

                stream
                    .write_all(format!("334 {}\r\n", STANDARD.encode("Password:")).as_bytes())
                    .await?;
                if !Self::read_line(stream, &mut line).await? {
                    return Ok(Vec::new());
                }
                let pass = STANDARD.decode(line.trim()).unwrap_or_default();

                (
                    String::from_utf8_lossy(&user).to_string(),
                    String::from_utf8_lossy(&pass).to_string(),
                )
            }
            _ => {
                let unknown = SmtpResponse::new(504, "5.5.4 Unrecognized authentication type");
                return Ok(unknown.to_bytes());
            }
        };

        if &supplied.0 == username && &supplied.1 == password {
            Ok(SmtpResponse::new(235, "2.7.0 Authentication successful").to_bytes())
        } else {
            Ok(config.auth_failure.to_bytes())
        }
    }

    async fn handle_client(
        stream: TcpStream,
        config: Arc<MockServerConfig>,
        commands: Arc<RwLock<Vec<SmtpCommand>>>,
        encrypted: Arc<AtomicBool>,
    ) -> Result<(), BoxError> {
        if let Some(delay) = config.greeting_delay {
            tokio::time::sleep(delay).await;
        }

        let mut command_index = 0;

        if let Some((TlsKind::Implicit, acceptor)) = &config.tls {
            let mut stream = BufReader::new(acceptor.accept(stream).await?);
            encrypted.store(true, Ordering::Relaxed);
            stream.write_all(&config.greeting.to_bytes()).await?;
            stream.flush().await?;
            Self::session(&mut stream, &config, &commands, &mut command_index, true).await?;
            return Ok(());
        }

        let mut stream = BufReader::new(stream);
        stream.write_all(&config.greeting.to_bytes()).await?;
        stream.flush().await?;

        let end = Self::session(&mut stream, &config, &commands, &mut command_index, false).await?;
        if let (SessionEnd::Upgrade, Some((_, acceptor))) = (end, &config.tls) {
            // The client sends nothing until the handshake, so no input is lost.
            let mut stream = BufReader::new(acceptor.accept(stream.into_inner()).await?);
            encrypted.store(true, Ordering::Relaxed);
            Self::session(&mut stream, &config, &commands, &mut command_index, true).await?;
        }

        Ok(())
    }

    /// Answers commands until the peer leaves or asks to start TLS.
    async fn session<S: AsyncRead + AsyncWrite + Unpin>(
        stream: &mut BufReader<S>,
        config: &MockServerConfig,
        commands: &RwLock<Vec<SmtpCommand>>,
        command_index: &mut usize,
        encrypted: bool,
    ) -> Result<SessionEnd, BoxError> {
        let offers_starttls =
            !encrypted && matches!(config.tls, Some((TlsKind::StartTls, _)));
        let mut line = String::new();

        loop {
            if let Some(hang_on) = config.hang_on_command
                && *command_index == hang_on
            {
                // Swallow input without answering until the peer goes away.
                while Self::read_line(stream, &mut line).await? {}
                return Ok(SessionEnd::Closed);
            }

            if !Self::read_line(stream, &mut line).await? {
                return Ok(SessionEnd::Closed);
            }
            *command_index += 1;

            let cmd_line = line.trim().to_string();
            tracing::debug!("Mock server received: {cmd_line}");

            let (verb, argument) = cmd_line
                .split_once(' ')
                .map_or((cmd_line.as_str(), ""), |(verb, rest)| (verb, rest));

            let (response, smtp_cmd) = match verb.to_uppercase().as_str() {
                "EHLO" => {
                    let mut ehlo = config.ehlo_response.clone();
                    if offers_starttls {
                        ehlo.lines.push("STARTTLS".to_string());
                    }
                    (ehlo.to_bytes(), SmtpCommand::Ehlo(argument.to_string()))
                }
                "HELO" => (
                    config.helo_response.to_bytes(),
                    SmtpCommand::Helo(argument.to_string()),
                ),
                "AUTH" => {
                    let mechanism = argument
                        .split_whitespace()
                        .next()
                        .unwrap_or_default()
                        .to_string();
                    commands.write().await.push(SmtpCommand::Auth(mechanism));
                    let response = Self::authenticate(config, argument, stream).await?;
                    if response.is_empty() {
                        return Ok(SessionEnd::Closed);
                    }
                    stream.write_all(&response).await?;
                    stream.flush().await?;
                    continue;
                }
                "MAIL" => (
                    config.mail_from_response.to_bytes(),
                    SmtpCommand::MailFrom(argument.to_string()),
                ),
                "RCPT" => (
                    config.rcpt_to_response.to_bytes(),
                    SmtpCommand::RcptTo(argument.to_string()),
                ),
                "DATA" => (config.data_response.to_bytes(), SmtpCommand::Data),
                "QUIT" => {
                    commands.write().await.push(SmtpCommand::Quit);
                    if config.drop_on_quit {
                        return Ok(SessionEnd::Closed);
                    }
                    stream.write_all(&config.quit_response.to_bytes()).await?;
                    stream.flush().await?;
                    return Ok(SessionEnd::Closed);
                }
                "STARTTLS" if offers_starttls => {
                    commands.write().await.push(SmtpCommand::StartTls);
                    stream
                        .write_all(&SmtpResponse::new(220, "2.0.0 Ready to start TLS").to_bytes())
                        .await?;
                    stream.flush().await?;
                    return Ok(SessionEnd::Upgrade);
                }
                "STARTTLS" => (
                    config.starttls_response.as_ref().map_or_else(
                        || SmtpResponse::new(502, "5.5.1 Command not implemented").to_bytes(),
                        SmtpResponse::to_bytes,
                    ),
                    SmtpCommand::StartTls,
                ),
                _ => (
                    SmtpResponse::new(500, "5.5.2 Unknown command").to_bytes(),
                    SmtpCommand::Other(cmd_line.clone()),
                ),
            };

            commands.write().await.push(smtp_cmd.clone());

            stream.write_all(&response).await?;
            stream.flush().await?;

            if matches!(smtp_cmd, SmtpCommand::Data) && config.data_response.code == 354 {
                let mut content = String::new();
                let mut data_line = String::new();

                loop {
                    if !Self::read_line(stream, &mut data_line).await? {
                        return Ok(SessionEnd::Closed);
                    }
                    if data_line == ".\r\n" || data_line == ".\n" {
                        break;
                    }
                    content.push_str(&data_line);
                }

                commands
                    .write()
                    .await
                    .push(SmtpCommand::MessageContent(content));
                stream.write_all(&config.data_end_response.to_bytes()).await?;
                stream.flush().await?;
            }
        }
    }
}

pub struct MockSmtpServerBuilder {
    config: MockServerConfig,
    tls: Option<TlsKind>,
}

impl MockSmtpServerBuilder {
    fn new() -> Self {
        Self {
            config: MockServerConfig::default(),
            tls: None,
        }
    }

    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.greeting = SmtpResponse::new(code, message);
        self
    }

    /// Replaces the EHLO reply. The first line is the server name.
    #[must_use]
    pub fn with_ehlo_response(mut self, code: u16, lines: &[&str]) -> Self {
        self.config.ehlo_response = EhloResponse {
            code,
            lines: lines.iter().map(ToString::to_string).collect(),
        };
        self
    }

    /// Adds one line to the EHLO reply.
    #[must_use]
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.config.ehlo_response.lines.push(capability.into());
        self
    }

    #[must_use]
    pub fn with_helo_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.helo_response = SmtpResponse::new(code, message);
        self
    }

    /// Accepts AUTH PLAIN and LOGIN for exactly these credentials and
    /// advertises both.
    #[must_use]
    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Some((username.into(), password.into()));
        self.config
            .ehlo_response
            .lines
            .push("AUTH PLAIN LOGIN".to_string());
        self
    }

    /// Like [`Self::with_auth`] but advertises only LOGIN.
    #[must_use]
    pub fn with_login_auth(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.config.credentials = Some((username.into(), password.into()));
        self.config
            .ehlo_response
            .lines
            .push("AUTH LOGIN".to_string());
        self
    }

    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.mail_from_response = SmtpResponse::new(code, message);
        self
    }

    #[must_use]
    pub fn with_rcpt_to_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.rcpt_to_response = SmtpResponse::new(code, message);
        self
    }

    #[must_use]
    pub fn with_data_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_response = SmtpResponse::new(code, message);
        self
    }

    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_end_response = SmtpResponse::new(code, message);
        self
    }

    /// Answers STARTTLS with this reply and never upgrades.
    #[must_use]
    pub fn with_starttls_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.starttls_response = Some(SmtpResponse::new(code, message));
        self
    }

    /// Advertises STARTTLS and upgrades when asked. The second EHLO no
    /// longer lists it.
    #[must_use]
    pub const fn with_starttls(mut self) -> Self {
        self.tls = Some(TlsKind::StartTls);
        self
    }

    /// Performs the TLS handshake before the greeting.
    #[must_use]
    pub const fn with_implicit_tls(mut self) -> Self {
        self.tls = Some(TlsKind::Implicit);
        self
    }

    #[must_use]
    pub const fn with_greeting_delay(mut self, delay: Duration) -> Self {
        self.config.greeting_delay = Some(delay);
        self
    }

    /// Never answer the Nth command (0-indexed).
    #[must_use]
    pub const fn with_hang_on_command(mut self, command_index: usize) -> Self {
        self.config.hang_on_command = Some(command_index);
        self
    }

    /// Close the socket instead of answering QUIT.
    #[must_use]
    pub const fn with_drop_on_quit(mut self) -> Self {
        self.config.drop_on_quit = true;
        self
    }

    /// Binds to a random local port and starts serving.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot bind or the certificate
    /// cannot be generated.
    pub async fn build(mut self) -> Result<MockSmtpServer, std::io::Error> {
        if let Some(kind) = self.tls {
            let acceptor = self_signed_acceptor().map_err(std::io::Error::other)?;
            self.config.tls = Some((kind, acceptor));
        }

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let config = Arc::new(self.config);
        let commands = Arc::new(RwLock::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));
        let encrypted = Arc::new(AtomicBool::new(false));

        let commands_clone = Arc::clone(&commands);
        let shutdown_clone = Arc::clone(&shutdown);
        let closed_clone = Arc::clone(&closed);
        let encrypted_clone = Arc::clone(&encrypted);

        tokio::spawn(async move {
            loop {
                if shutdown_clone.load(Ordering::Relaxed) {
                    break;
                }

                let accept_result = timeout(Duration::from_millis(100), listener.accept()).await;

                if let Ok(Ok((stream, _peer))) = accept_result {
                    let config = Arc::clone(&config);
                    let commands = Arc::clone(&commands_clone);
                    let closed = Arc::clone(&closed_clone);
                    let encrypted = Arc::clone(&encrypted_clone);

                    tokio::spawn(async move {
                        if let Err(e) =
                            MockSmtpServer::handle_client(stream, config, commands, encrypted).await
                        {
                            tracing::debug!("Mock server client error: {e}");
                        }
                        closed.store(true, Ordering::Relaxed);
                    });
                }
            }
        });

        Ok(MockSmtpServer {
            addr,
            commands_received: commands,
            shutdown,
            closed,
            encrypted,
        })
    }
}
