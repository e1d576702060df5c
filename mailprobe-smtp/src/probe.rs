//! The staged session driver.
//!
//! A run goes connect, then authenticate (only when requested), then send,
//! and always ends in finalize. The first failing stage is terminal. Every
//! step writes to the run's [`LogRecorder`] and is forwarded to the
//! [`ProgressEmitter`] in the order it was recorded.

use std::{sync::Arc, time::Instant};

use mailprobe_common::{
    Details, EmailDetails, LogLevel, LogRecorder, ServerInfo, SmtpConfig, TestResult, TestStatus,
    details, tracing,
};
use serde_json::{Value, json};
use tokio::{sync::mpsc, task::JoinError};
use ulid::Ulid;

use crate::{
    aggregator::{ResultBuilder, elapsed_ms},
    client::{
        Capabilities, ClientError, Credentials, Mailbox, Mechanism, MessageBuilder, Response,
        SmtpClient, generate_message_id,
    },
    emitter::{Buffered, ProbeEvent, ProgressEmitter, Streaming},
    error::{Failure, ProbeError},
    observer::ProbeObserver,
    options::{DEFAULT_HELO_NAME, SessionOptions, TlsMode},
};

/// One probe run, ready to go.
pub struct Probe {
    id: String,
    config: SmtpConfig,
    helo_name: String,
    observers: Vec<Arc<dyn ProbeObserver>>,
    recorder: LogRecorder,
}

impl Probe {
    #[must_use]
    pub fn new(config: SmtpConfig) -> Self {
        let id = Ulid::new().to_string();
        Self {
            recorder: LogRecorder::new(id.as_str()),
            id,
            config,
            helo_name: DEFAULT_HELO_NAME.to_string(),
            observers: Vec::new(),
        }
    }

    /// Name announced in EHLO/HELO.
    #[must_use]
    pub fn with_helo_name(mut self, helo_name: impl Into<String>) -> Self {
        self.helo_name = helo_name.into();
        self
    }

    /// Registers an observer notified after the run is finalized.
    ///
    /// Only [`Self::run_buffered`] and [`Self::run_streaming`] notify
    /// observers.
    #[must_use]
    pub fn observe(mut self, observer: Arc<dyn ProbeObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// A handle on the run's log. It stays readable after the run is gone.
    #[must_use]
    pub fn recorder(&self) -> LogRecorder {
        self.recorder.clone()
    }

    /// Drives the session to a terminal state on the current task.
    #[tracing::instrument(
        name = "probe",
        skip_all,
        fields(
            id = %self.id,
            host = %self.config.host,
            port = self.config.port,
            security = %self.config.security,
        )
    )]
    pub async fn run<E: ProgressEmitter>(self, emitter: &mut E) -> TestResult {
        let mut run = Run {
            builder: ResultBuilder::new(self.id.as_str(), &self.config),
            options: SessionOptions::from_config(&self.config, &self.helo_name),
            config: self.config,
            recorder: self.recorder,
            emitter,
        };

        run.begin();
        let client = run.execute().await;
        run.finish(client).await
    }

    /// Runs on its own task and returns the final result.
    ///
    /// A panic inside the run becomes an `error` result carrying whatever
    /// had been logged up to that point.
    pub async fn run_buffered(mut self) -> TestResult {
        let observers = std::mem::take(&mut self.observers);
        let recorder = self.recorder.clone();
        let id = self.id.clone();
        let started = Instant::now();

        let outcome = tokio::spawn(async move {
            let mut emitter = Buffered::new();
            self.run(&mut emitter).await
        })
        .await;

        let result = match outcome {
            Ok(result) => result,
            Err(error) => unexpected(
                &id,
                &recorder,
                started,
                &join_error_message(error),
                &mut Buffered::new(),
            ),
        };

        notify(&observers, &result);
        result
    }

    /// Runs on its own task, forwarding every event as it happens.
    ///
    /// Dropping the receiver aborts the run and closes its connection.
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn run_streaming(mut self) -> mpsc::UnboundedReceiver<ProbeEvent> {
        let (emitter, rx) = Streaming::channel();
        let observers = std::mem::take(&mut self.observers);
        let recorder = self.recorder.clone();
        let id = self.id.clone();
        let started = Instant::now();

        let mut run_emitter = emitter.clone();
        let mut handle = tokio::spawn(async move { self.run(&mut run_emitter).await });

        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                joined = &mut handle => joined,
                () = emitter.closed() => {
                    handle.abort();
                    // The run may have finished just before the abort landed.
                    match handle.await {
                        Ok(result) => Ok(result),
                        Err(error) if error.is_cancelled() => {
                            tracing::info!(probe = %id, "Caller disconnected, probe aborted");
                            return;
                        }
                        Err(error) => Err(error),
                    }
                }
            };

            let mut emitter = emitter;
            let result = match outcome {
                Ok(result) => result,
                Err(error) => unexpected(
                    &id,
                    &recorder,
                    started,
                    &join_error_message(error),
                    &mut emitter,
                ),
            };

            notify(&observers, &result);
        });

        rx
    }
}

/// A well-formed `error` result for a failure outside the modelled stages.
#[must_use]
pub fn unexpected_result(message: &str) -> TestResult {
    let id = Ulid::new().to_string();
    let recorder = LogRecorder::new(id.as_str());
    unexpected(&id, &recorder, Instant::now(), message, &mut Buffered::new())
}

fn unexpected<E: ProgressEmitter>(
    id: &str,
    recorder: &LogRecorder,
    started: Instant,
    message: &str,
    emitter: &mut E,
) -> TestResult {
    let total = elapsed_ms(started);
    let entry = recorder.record(
        LogLevel::Error,
        "SMTP test failed with unexpected error",
        details(json!({ "error": message })),
        Some(total),
    );
    emitter.log(&entry);

    let mut builder = ResultBuilder::unconfigured(id, started);
    builder.fail(ProbeError::Unexpected(message.to_string()));
    let result = builder.finish(recorder.entries(), total);

    emitter.status(TestStatus::Error, &result);
    emitter.complete(&result);
    result
}

fn join_error_message(error: JoinError) -> String {
    if !error.is_panic() {
        return "Probe task was cancelled".to_string();
    }

    let payload = error.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "Probe task panicked".to_string())
}

fn notify(observers: &[Arc<dyn ProbeObserver>], result: &TestResult) {
    for observer in observers {
        observer.on_complete(result);
    }
}

/// Human form of a mailbox for logs and the result record.
fn display(mailbox: &Mailbox) -> String {
    mailbox.name.as_ref().map_or_else(
        || mailbox.email.clone(),
        |name| format!("\"{name}\" <{}>", mailbox.email),
    )
}

/// What the send stage hands back on acceptance.
struct Delivery {
    message_id: String,
    response: String,
}

/// The state of one run while it is being driven.
struct Run<'e, E: ProgressEmitter> {
    config: SmtpConfig,
    options: SessionOptions,
    recorder: LogRecorder,
    builder: ResultBuilder,
    emitter: &'e mut E,
}

impl<E: ProgressEmitter> Run<'_, E> {
    fn log(
        &mut self,
        level: LogLevel,
        message: &str,
        details: Option<Details>,
        duration: Option<u64>,
    ) {
        let entry = self.recorder.record(level, message, details, duration);
        self.emitter.log(&entry);
    }

    fn status(&mut self, status: TestStatus) {
        self.builder.set_status(status);
        let snapshot = self.builder.snapshot(self.recorder.entries());
        self.emitter.status(status, &snapshot);
    }

    /// Records one command/reply pair. `command` is `None` for the greeting.
    fn transcript(&mut self, command: Option<&str>, response: &Response) {
        let message = command.map_or_else(
            || format!("Server greeting: {}", response.code),
            |command| format!("{command}: {}", response.code),
        );
        self.log(
            LogLevel::Debug,
            &message,
            details(json!({ "command": command, "response": response.to_string() })),
            None,
        );
    }

    fn stage_failed(&mut self, message: &str, timing: &str, elapsed: u64, error: ProbeError) {
        let mut fields = Details::new();
        fields.insert(
            "error".to_string(),
            Value::String(
                error
                    .failure()
                    .map_or_else(|| error.to_string(), |failure| failure.message.clone()),
            ),
        );
        fields.insert("code".to_string(), Value::String(error.code().to_string()));
        if let Some(failure) = error.failure() {
            if let Some(command) = &failure.command {
                fields.insert("command".to_string(), Value::String(command.clone()));
            }
            if let Some(response) = &failure.response {
                fields.insert("response".to_string(), Value::String(response.clone()));
            }
        }
        fields.insert(timing.to_string(), Value::String(format!("{elapsed}ms")));

        self.log(LogLevel::Error, message, Some(fields), Some(elapsed));
        self.builder.fail(error);
    }

    fn begin(&mut self) {
        self.log(LogLevel::Success, "Configuration validated successfully", None, None);
        self.status(TestStatus::Connecting);

        self.log(
            LogLevel::Info,
            "Preparing SMTP session",
            details(json!({
                "host": self.config.host,
                "port": self.config.port,
                "security": self.config.security,
                "requireAuth": self.config.require_auth,
                "timeout": format!("{}ms", self.config.timeout),
            })),
            None,
        );

        if self.options.accept_invalid_certs {
            self.log(
                LogLevel::Warning,
                "TLS certificate validation is disabled",
                details(json!({ "rejectUnauthorized": false })),
                None,
            );
        }
    }

    /// Runs the network stages. Returns the client if a connection was made.
    async fn execute(&mut self) -> Option<SmtpClient> {
        self.log(LogLevel::Info, "Testing SMTP connection...", None, None);
        let started = Instant::now();
        let (mut client, capabilities) = match self.connect().await {
            Ok(connected) => connected,
            Err(error) => {
                let elapsed = elapsed_ms(started);
                self.builder.connection_mut().connection_time = Some(elapsed);
                self.stage_failed("SMTP connection failed", "connectionTime", elapsed, error);
                return None;
            }
        };

        let elapsed = elapsed_ms(started);
        let connection = self.builder.connection_mut();
        connection.connected = true;
        connection.connection_time = Some(elapsed);
        self.log(
            LogLevel::Success,
            "SMTP connection successful",
            details(json!({
                "connectionTime": format!("{elapsed}ms"),
                "server": capabilities.name,
                "encrypted": client.is_tls(),
            })),
            Some(elapsed),
        );

        if let Some(credentials) = self.options.credentials.clone() {
            self.status(TestStatus::Authenticating);
            self.log(LogLevel::Info, "Testing authentication...", None, None);

            if self.options.tls == TlsMode::None {
                self.log(
                    LogLevel::Warning,
                    "Credentials will be sent over an unencrypted connection",
                    details(json!({ "security": self.config.security })),
                    None,
                );
            }

            let started = Instant::now();
            match self
                .authenticate(&mut client, &capabilities, &credentials)
                .await
            {
                Ok(mechanism) => {
                    let elapsed = elapsed_ms(started);
                    let connection = self.builder.connection_mut();
                    connection.authenticated = true;
                    connection.auth_time = Some(elapsed);
                    self.log(
                        LogLevel::Success,
                        "Authentication successful",
                        details(json!({
                            "username": credentials.username(),
                            "mechanism": mechanism.as_str(),
                            "authTime": format!("{elapsed}ms"),
                        })),
                        Some(elapsed),
                    );
                }
                Err(error) => {
                    let elapsed = elapsed_ms(started);
                    self.builder.connection_mut().auth_time = Some(elapsed);
                    self.stage_failed("Authentication failed", "authTime", elapsed, error);
                    return Some(client);
                }
            }
        }

        self.status(TestStatus::Sending);
        self.log(LogLevel::Info, "Sending test email...", None, None);

        let from = display(&self.options.from);
        let to = display(&self.options.to);
        self.log(
            LogLevel::Info,
            "Email configuration",
            details(json!({
                "from": from,
                "to": to,
                "subject": self.config.subject,
                "isHtml": self.config.is_html,
                "messageLength": self.config.message.chars().count(),
            })),
            None,
        );

        let started = Instant::now();
        match self.send(&mut client, &capabilities).await {
            Ok(delivery) => {
                let elapsed = elapsed_ms(started);
                self.builder.set_email(EmailDetails {
                    message_id: Some(delivery.message_id.clone()),
                    from,
                    to,
                    subject: self.config.subject.clone(),
                    size: self.config.message.len(),
                    sent: true,
                    send_time: Some(elapsed),
                    response: Some(delivery.response.clone()),
                });
                self.log(
                    LogLevel::Success,
                    "Email sent successfully",
                    details(json!({
                        "messageId": delivery.message_id,
                        "response": delivery.response,
                        "sendTime": format!("{elapsed}ms"),
                        "accepted": [self.options.to.email],
                        "rejected": [],
                    })),
                    Some(elapsed),
                );
                self.builder.succeed();
                self.quit(&mut client).await;
            }
            Err(error) => {
                let elapsed = elapsed_ms(started);
                self.stage_failed("Email sending failed", "sendTime", elapsed, error);
            }
        }

        Some(client)
    }

    async fn connect(&mut self) -> Result<(SmtpClient, Capabilities), ProbeError> {
        let options = self.options.clone();
        let connection_error = |e: ClientError| ProbeError::Connection(Failure::transport(&e));

        let mut client = SmtpClient::connect(&options.host, options.port, options.timeout)
            .await
            .map_err(connection_error)?
            .accept_invalid_certs(options.accept_invalid_certs);
        self.log(
            LogLevel::Debug,
            "TCP connection established",
            details(json!({ "address": client.peer().to_string() })),
            None,
        );

        if options.tls == TlsMode::Implicit {
            client.handshake().await.map_err(connection_error)?;
            self.log(LogLevel::Debug, "TLS handshake completed", None, None);
        }

        let greeting = client.read_greeting().await.map_err(connection_error)?;
        self.transcript(None, &greeting);
        if !greeting.is_success() {
            return Err(ProbeError::Connection(Failure {
                code: "EGREETING",
                message: format!("Server rejected connection: {greeting}"),
                command: None,
                response: Some(greeting.to_string()),
            }));
        }

        let mut capabilities = self.hello(&mut client, &options.helo_name).await?;

        match options.tls {
            TlsMode::StartTls => {
                if !capabilities.starttls {
                    return Err(ProbeError::Connection(Failure::new(
                        "ESTARTTLS",
                        "Server does not support STARTTLS",
                    )));
                }

                let response = client.starttls().await.map_err(|e| {
                    ProbeError::Connection(Failure::transport(&e).with_command("STARTTLS"))
                })?;
                self.transcript(Some("STARTTLS"), &response);
                if !response.is_success() {
                    return Err(ProbeError::Connection(Failure::rejected(
                        "ESTARTTLS",
                        "STARTTLS rejected",
                        "STARTTLS",
                        &response,
                    )));
                }
                self.log(LogLevel::Debug, "Connection upgraded to TLS", None, None);

                // Capabilities may differ once encrypted.
                capabilities = self.hello(&mut client, &options.helo_name).await?;
            }
            TlsMode::None if capabilities.starttls => {
                self.log(
                    LogLevel::Info,
                    "Server supports STARTTLS, but security is set to none; continuing without encryption",
                    None,
                    None,
                );
            }
            TlsMode::None | TlsMode::Implicit => {}
        }

        self.builder.connection_mut().server_info = Some(ServerInfo {
            greeting: Some(greeting.message()),
            name: capabilities.name.clone(),
            capabilities: capabilities.raw.clone(),
        });

        Ok((client, capabilities))
    }

    /// EHLO, falling back to HELO when the server refuses EHLO outright.
    async fn hello(
        &mut self,
        client: &mut SmtpClient,
        name: &str,
    ) -> Result<Capabilities, ProbeError> {
        let command = format!("EHLO {name}");
        let ehlo = client.ehlo(name).await.map_err(|e| {
            ProbeError::Connection(Failure::transport(&e).with_command(command.as_str()))
        })?;
        self.transcript(Some(&command), &ehlo);

        if ehlo.is_success() {
            return Ok(Capabilities::from_ehlo(&ehlo));
        }
        if !ehlo.is_permanent_error() {
            return Err(ProbeError::Connection(Failure::rejected(
                "EPROTOCOL",
                "EHLO rejected",
                &command,
                &ehlo,
            )));
        }

        self.log(LogLevel::Debug, "EHLO not supported, falling back to HELO", None, None);
        let command = format!("HELO {name}");
        let helo = client.helo(name).await.map_err(|e| {
            ProbeError::Connection(Failure::transport(&e).with_command(command.as_str()))
        })?;
        self.transcript(Some(&command), &helo);

        if helo.is_success() {
            Ok(Capabilities::from_helo(&helo))
        } else {
            Err(ProbeError::Connection(Failure::rejected(
                "EPROTOCOL",
                "HELO rejected",
                &command,
                &helo,
            )))
        }
    }

    async fn authenticate(
        &mut self,
        client: &mut SmtpClient,
        capabilities: &Capabilities,
        credentials: &Credentials,
    ) -> Result<Mechanism, ProbeError> {
        // Some servers accept AUTH without advertising it.
        let mechanism = Mechanism::negotiate(&capabilities.auth).unwrap_or(Mechanism::Plain);
        if capabilities.auth.is_empty() {
            self.log(
                LogLevel::Debug,
                "Server advertised no supported AUTH mechanism, trying PLAIN",
                None,
                None,
            );
        }

        // Only the mechanism name is ever logged.
        let command = format!("AUTH {mechanism}");
        let exchange = client.auth(mechanism, credentials).await.map_err(|e| {
            ProbeError::Authentication(Failure::transport(&e).with_command(command.as_str()))
        })?;
        self.transcript(Some(&command), &exchange.response);

        if exchange.response.is_success() {
            Ok(mechanism)
        } else {
            Err(ProbeError::Authentication(Failure::rejected(
                "EAUTH",
                "Invalid login",
                &command,
                &exchange.response,
            )))
        }
    }

    async fn send(
        &mut self,
        client: &mut SmtpClient,
        capabilities: &Capabilities,
    ) -> Result<Delivery, ProbeError> {
        let from = self.options.from.clone();
        let to = self.options.to.clone();
        let message_id = generate_message_id(&from);

        let content = MessageBuilder::new()
            .from(from.clone())
            .to(to.clone())
            .subject(self.config.subject.as_str())
            .body(self.config.message.as_str())
            .html(self.config.is_html)
            .message_id(message_id.as_str())
            .build()
            .map_err(|e| ProbeError::Submission(Failure::transport(&e)))?;

        let submission_error = |command: &str| {
            let command = command.to_string();
            move |e: ClientError| {
                ProbeError::Submission(Failure::transport(&e).with_command(command))
            }
        };

        let command = format!("MAIL FROM:<{}>", from.email);
        let size = capabilities.size.map(|_| content.len());
        let response = client
            .mail_from(&from.email, size)
            .await
            .map_err(submission_error(&command))?;
        self.transcript(Some(&command), &response);
        if !response.is_success() {
            return Err(ProbeError::Submission(Failure::rejected(
                "EENVELOPE",
                "Sender rejected",
                &command,
                &response,
            )));
        }

        let command = format!("RCPT TO:<{}>", to.email);
        let response = client
            .rcpt_to(&to.email)
            .await
            .map_err(submission_error(&command))?;
        self.transcript(Some(&command), &response);
        if !response.is_success() {
            return Err(ProbeError::Submission(Failure::rejected(
                "EENVELOPE",
                "Recipient rejected",
                &command,
                &response,
            )));
        }

        let response = client.data().await.map_err(submission_error("DATA"))?;
        self.transcript(Some("DATA"), &response);
        if response.code != 354 {
            return Err(ProbeError::Submission(Failure::rejected(
                "EMESSAGE",
                "DATA command rejected",
                "DATA",
                &response,
            )));
        }

        let response = client
            .send_data(&content)
            .await
            .map_err(submission_error("DATA"))?;
        self.transcript(Some("."), &response);
        if !response.is_success() {
            return Err(ProbeError::Submission(Failure::rejected(
                "EMESSAGE",
                "Message rejected",
                "DATA",
                &response,
            )));
        }

        Ok(Delivery {
            message_id,
            response: response.to_string(),
        })
    }

    /// QUIT after a delivery. Its outcome never changes the result.
    async fn quit(&mut self, client: &mut SmtpClient) {
        match client.quit().await {
            Ok(response) => self.transcript(Some("QUIT"), &response),
            Err(e) => self.log(
                LogLevel::Warning,
                "QUIT failed after successful delivery",
                details(json!({ "error": e.to_string() })),
                None,
            ),
        }
    }

    async fn finish(mut self, client: Option<SmtpClient>) -> TestResult {
        if let Some(mut client) = client {
            client.close().await;
        }

        let total = self.builder.elapsed_ms();
        let status = self.builder.status();
        self.log(
            LogLevel::Info,
            "SMTP test completed",
            details(json!({
                "success": status == TestStatus::Success,
                "totalDuration": format!("{total}ms"),
                "status": status,
            })),
            Some(total),
        );

        let result = self.builder.finish(self.recorder.entries(), total);
        self.emitter.status(result.status, &result);
        self.emitter.complete(&result);
        result
    }
}
