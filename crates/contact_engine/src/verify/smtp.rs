use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Dialogue step a reply answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpStep {
    Greeting,
    Helo,
    MailFrom,
    RcptTo,
    Quit,
}

/// Final reply of a mailbox probe.
///
/// Only a reply at [`SmtpStep::RcptTo`] says anything about the mailbox; an
/// earlier step ends the session when the server refuses to go on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpReply {
    pub step: SmtpStep,
    pub code: u16,
    pub message: String,
}

impl SmtpReply {
    pub fn new(step: SmtpStep, code: u16, message: impl Into<String>) -> Self {
        Self {
            step,
            code,
            message: message.into(),
        }
    }

    /// Answer to `RCPT TO`, the mailbox question itself.
    pub fn answers_mailbox(&self) -> bool {
        self.step == SmtpStep::RcptTo
    }

    pub fn is_positive(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SmtpError {
    #[error("smtp timed out: {0}")]
    Timeout(String),
    #[error("cannot connect to {host}: {message}")]
    Connect { host: String, message: String },
    #[error("smtp io error: {0}")]
    Io(String),
    #[error("smtp protocol error: {0}")]
    Protocol(String),
}

/// Mailbox-existence probe against one mail host. Never sends a message.
#[async_trait::async_trait]
pub trait SmtpProber: Send + Sync {
    async fn probe(&self, host: &str, email: &str) -> Result<SmtpReply, SmtpError>;
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub helo_name: String,
    pub mail_from: String,
    pub port: u16,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            helo_name: "localhost".to_string(),
            mail_from: "verify@localhost".to_string(),
            port: 25,
        }
    }
}

/// Plain-TCP prober: greeting, `HELO`, `MAIL FROM`, `RCPT TO`, `QUIT`.
#[derive(Debug, Clone, Default)]
pub struct TcpSmtpProber {
    settings: SmtpSettings,
}

impl TcpSmtpProber {
    pub fn new(settings: SmtpSettings) -> Self {
        Self { settings }
    }
}

#[async_trait::async_trait]
impl SmtpProber for TcpSmtpProber {
    async fn probe(&self, host: &str, email: &str) -> Result<SmtpReply, SmtpError> {
        let host = host.trim_end_matches('.');
        let stream = TcpStream::connect((host, self.settings.port))
            .await
            .map_err(|err| SmtpError::Connect {
                host: host.to_string(),
                message: err.to_string(),
            })?;
        let (read, write) = stream.into_split();
        let mut session = Session {
            reader: BufReader::new(read),
            writer: write,
        };

        let greeting = session.read_reply(SmtpStep::Greeting).await?;
        if greeting.code != 220 {
            return Ok(greeting);
        }
        let helo = session
            .command(SmtpStep::Helo, &format!("HELO {}", self.settings.helo_name))
            .await?;
        if !helo.is_positive() {
            session.quit().await;
            return Ok(helo);
        }
        let mail = session
            .command(
                SmtpStep::MailFrom,
                &format!("MAIL FROM:<{}>", self.settings.mail_from),
            )
            .await?;
        if !mail.is_positive() {
            session.quit().await;
            return Ok(mail);
        }
        let rcpt = session
            .command(SmtpStep::RcptTo, &format!("RCPT TO:<{email}>"))
            .await?;
        session.quit().await;
        Ok(rcpt)
    }
}

struct Session {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Session {
    async fn command(&mut self, step: SmtpStep, line: &str) -> Result<SmtpReply, SmtpError> {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .map_err(|err| SmtpError::Io(err.to_string()))?;
        self.writer
            .flush()
            .await
            .map_err(|err| SmtpError::Io(err.to_string()))?;
        self.read_reply(step).await
    }

    /// The answer is already known; a failed QUIT changes nothing.
    async fn quit(&mut self) {
        let _ = self.command(SmtpStep::Quit, "QUIT").await;
    }

    /// Read one reply, joining `NNN-` continuation lines.
    async fn read_reply(&mut self, step: SmtpStep) -> Result<SmtpReply, SmtpError> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            let read = self
                .reader
                .read_line(&mut line)
                .await
                .map_err(|err| SmtpError::Io(err.to_string()))?;
            if read == 0 {
                return Err(SmtpError::Io("connection closed by server".to_string()));
            }
            let line = line.trim_end_matches(['\r', '\n']);
            let (code, last, text) = parse_reply_line(line)?;
            lines.push(text.to_string());
            if last {
                return Ok(SmtpReply::new(step, code, lines.join("\n")));
            }
        }
    }
}

fn parse_reply_line(line: &str) -> Result<(u16, bool, &str), SmtpError> {
    let malformed = || SmtpError::Protocol(format!("malformed reply line {line:?}"));
    let code_text = line.get(..3).ok_or_else(malformed)?;
    if !code_text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let code = code_text.parse::<u16>().map_err(|_| malformed())?;
    match line.as_bytes().get(3) {
        None => Ok((code, true, "")),
        Some(b' ') => Ok((code, true, &line[4..])),
        Some(b'-') => Ok((code, false, &line[4..])),
        Some(_) => Err(malformed()),
    }
}
