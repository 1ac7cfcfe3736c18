use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use contact_core::{
    ContactRecord, ReasonCode, RunSummary, StageKind, Target, Verdict, VerificationResult,
};
use contact_engine::{
    export_records, load_targets, write_records_csv, ExportOptions, InputError, RunReport,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn verified(email: &str, verdict: Verdict, reason: ReasonCode) -> VerificationResult {
    VerificationResult::new(
        email,
        StageKind::Smtp,
        verdict,
        reason,
        Vec::new(),
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
    )
}

fn record(
    url: &str,
    row: usize,
    emails: Vec<VerificationResult>,
    social: &[&str],
    passthrough: &[(&str, &str)],
) -> ContactRecord {
    let target = Target::new(url, row);
    ContactRecord {
        target_id: target.id,
        url: url.to_string(),
        source_row: row,
        emails,
        social_links: social.iter().map(|s| s.to_string()).collect(),
        passthrough: passthrough
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

#[test]
fn loads_targets_with_passthrough_columns() {
    let input = "companyName,Website,country\n\
                 Acme, https://acme.test ,SE\n\
                 Blank,,NO\n\
                 Beta,beta.test,DK\n";

    let targets = load_targets(input.as_bytes()).unwrap();

    assert_eq!(targets.len(), 2);
    assert_eq!(targets[0].url, "https://acme.test");
    assert_eq!(targets[0].source_row, 0);
    assert_eq!(
        targets[0].passthrough,
        BTreeMap::from([
            ("companyName".to_string(), "Acme".to_string()),
            ("country".to_string(), "SE".to_string()),
        ])
    );
    assert_eq!(targets[1].url, "beta.test");
    assert_eq!(targets[1].source_row, 2);
    assert_eq!(targets[1].fetch_url().as_deref(), Some("http://beta.test"));
}

#[test]
fn url_column_wins_over_website() {
    let input = "website,URL\nhttps://ignored.test,https://chosen.test\n";
    let targets = load_targets(input.as_bytes()).unwrap();
    assert_eq!(targets[0].url, "https://chosen.test");
    assert_eq!(
        targets[0].passthrough.get("website").map(String::as_str),
        Some("https://ignored.test")
    );
}

#[test]
fn input_without_url_column_is_rejected() {
    let input = "company,phone\nAcme,123\n";
    assert!(matches!(
        load_targets(input.as_bytes()),
        Err(InputError::MissingUrlColumn)
    ));
}

#[test]
fn one_row_per_email_with_shared_social_links() {
    let records = vec![
        record(
            "https://acme.test",
            0,
            vec![
                verified("sales@acme.test", Verdict::Valid, ReasonCode::MailboxAccepted),
                verified("old@acme.test", Verdict::Invalid, ReasonCode::MailboxRejected),
            ],
            &["linkedin.com/company/acme", "x.com/acme"],
            &[("companyName", "Acme")],
        ),
        record("https://quiet.test", 1, Vec::new(), &[], &[("country", "SE")]),
    ];

    let mut out = Vec::new();
    let rows = write_records_csv(&mut out, &records).unwrap();

    assert_eq!(rows, 3);
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "url,email,verificationVerdict,reasonCode,socialLinks,companyName,country\n\
         https://acme.test,sales@acme.test,valid,mailbox_accepted,linkedin.com/company/acme; x.com/acme,Acme,\n\
         https://acme.test,old@acme.test,invalid,mailbox_rejected,linkedin.com/company/acme; x.com/acme,Acme,\n\
         https://quiet.test,,,,,,SE\n"
    );
}

#[test]
fn export_writes_records_and_summary() {
    let out_dir = TempDir::new().unwrap();
    let mut summary = RunSummary::default();
    let done = record(
        "https://acme.test",
        0,
        vec![verified(
            "grey@acme.test",
            Verdict::Unknown,
            ReasonCode::SmtpDeferred,
        )],
        &[],
        &[],
    );
    summary.record_done(&done, false);
    let report = RunReport::new(vec![done], summary);

    let target_dir = out_dir.path().join("runs").join("latest");
    let exported = export_records(&target_dir, &report, ExportOptions::default()).unwrap();

    assert_eq!(exported.row_count, 1);
    assert_eq!(exported.records_path, target_dir.join("contacts.csv"));
    let csv = std::fs::read_to_string(&exported.records_path).unwrap();
    assert!(csv.contains("https://acme.test,grey@acme.test,unknown,smtp_deferred,"));
    let summary_path = exported.summary_path.expect("summary written");
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(summary_path).unwrap()).unwrap();
    assert_eq!(json["done"], 1);
    assert_eq!(json["verdicts"]["unknown"], 1);
}
