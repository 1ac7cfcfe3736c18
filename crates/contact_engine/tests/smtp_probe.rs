mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{test_config, StubDns};
use contact_core::{ReasonCode, Verdict};
use contact_engine::verify::{
    EmailVerifier, SmtpError, SmtpProber, SmtpSettings, SmtpStep, TcpSmtpProber,
};
use contact_engine::{CacheStore, HostRateLimiter, TokioSleeper};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

const SENDER_OK: &str = "250 sender ok\r\n";

async fn fake_server(
    greeting: &'static str,
    rcpt_reply: &'static str,
) -> (u16, Arc<Mutex<Vec<String>>>) {
    scripted_server(greeting, SENDER_OK, rcpt_reply).await
}

/// One-connection SMTP server: answers commands from a script and records them.
async fn scripted_server(
    greeting: &'static str,
    mail_reply: &'static str,
    rcpt_reply: &'static str,
) -> (u16, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let received = Arc::new(Mutex::new(Vec::new()));
    let log = received.clone();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);
        write.write_all(greeting.as_bytes()).await.unwrap();

        let mut line = String::new();
        while reader.read_line(&mut line).await.unwrap() > 0 {
            let command = line.trim_end().to_string();
            line.clear();
            log.lock().unwrap().push(command.clone());
            let reply = match command.split(':').next().unwrap_or_default() {
                c if c.starts_with("HELO") => "250-fake.test greets you\r\n250 HELP\r\n",
                "MAIL FROM" => mail_reply,
                "RCPT TO" => rcpt_reply,
                "QUIT" => "221 bye\r\n",
                _ => "502 not implemented\r\n",
            };
            write.write_all(reply.as_bytes()).await.unwrap();
            if command == "QUIT" {
                break;
            }
        }
    });

    (port, received)
}

fn prober(port: u16) -> TcpSmtpProber {
    TcpSmtpProber::new(SmtpSettings {
        helo_name: "probe.test".to_string(),
        mail_from: "verify@probe.test".to_string(),
        port,
    })
}

#[tokio::test]
async fn accepted_mailbox_returns_rcpt_reply() {
    let (port, received) = fake_server("220 fake.test ESMTP\r\n", "250 recipient ok\r\n").await;

    let reply = prober(port)
        .probe("127.0.0.1", "someone@fake.test")
        .await
        .unwrap();
    assert_eq!(reply.step, SmtpStep::RcptTo);
    assert_eq!(reply.code, 250);
    assert_eq!(reply.message, "recipient ok");

    let commands = received.lock().unwrap().clone();
    assert_eq!(
        commands,
        [
            "HELO probe.test",
            "MAIL FROM:<verify@probe.test>",
            "RCPT TO:<someone@fake.test>",
            "QUIT",
        ]
    );
}

#[tokio::test]
async fn rejected_mailbox_is_reported_not_raised() {
    let (port, _) = fake_server(
        "220 fake.test ESMTP\r\n",
        "550-5.1.1 no such user\r\n550 5.1.1 try again never\r\n",
    )
    .await;

    let reply = prober(port)
        .probe("127.0.0.1", "nobody@fake.test")
        .await
        .unwrap();
    assert_eq!(reply.code, 550);
    assert_eq!(reply.message, "5.1.1 no such user\n5.1.1 try again never");
}

#[tokio::test]
async fn unwelcoming_greeting_ends_the_session() {
    let (port, received) = fake_server("421 too busy\r\n", "250 ok\r\n").await;

    let reply = prober(port)
        .probe("127.0.0.1", "someone@fake.test")
        .await
        .unwrap();
    assert_eq!(reply.step, SmtpStep::Greeting);
    assert_eq!(reply.code, 421);
    assert!(received.lock().unwrap().is_empty());
}

#[tokio::test]
async fn refused_sender_stops_before_rcpt() {
    let (port, received) = scripted_server(
        "220 fake.test ESMTP\r\n",
        "553 5.1.8 sender address domain does not exist\r\n",
        "250 ok\r\n",
    )
    .await;

    let reply = prober(port)
        .probe("127.0.0.1", "someone@fake.test")
        .await
        .unwrap();
    assert_eq!(reply.step, SmtpStep::MailFrom);
    assert_eq!(reply.code, 553);
    assert_eq!(
        received.lock().unwrap().clone(),
        ["HELO probe.test", "MAIL FROM:<verify@probe.test>", "QUIT"]
    );
}

#[tokio::test]
async fn refused_sender_leaves_the_address_unknown() {
    let (port, received) = scripted_server(
        "220 fake.test ESMTP\r\n",
        "553 5.1.8 sender address domain does not exist\r\n",
        "550 no such user\r\n",
    )
    .await;
    let dns = StubDns::default()
        .with_host("example.test")
        .with_mx("example.test", &[(10, "127.0.0.1.")]);
    let verifier = EmailVerifier::new(
        Arc::new(dns),
        Arc::new(TcpSmtpProber::new(SmtpSettings {
            port,
            ..SmtpSettings::default()
        })),
        Arc::new(HostRateLimiter::new(Duration::ZERO, Arc::new(TokioSleeper))),
        Arc::new(CacheStore::in_memory()),
        &test_config(),
    );

    let result = verifier.verify("real.person@example.test").await.unwrap();

    assert_eq!(result.verdict, Verdict::Unknown);
    assert_eq!(result.reason, ReasonCode::SmtpPolicyBlock);
    let commands = received.lock().unwrap().clone();
    assert!(!commands.iter().any(|c| c.starts_with("RCPT TO")), "{commands:?}");
}

#[tokio::test]
async fn closed_port_is_a_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let err = prober(port)
        .probe("127.0.0.1", "someone@fake.test")
        .await
        .unwrap_err();
    assert!(matches!(err, SmtpError::Connect { .. }));
}
