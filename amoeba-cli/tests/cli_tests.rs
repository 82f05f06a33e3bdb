use amoeba_cli::{Args, Command, import_leads, parse_import, render_fields, render_pull, render_push, run};
use amoeba_store::{LeadStore, SqliteStore};
use amoeba_sync::{LeadFieldInfo, PullReport, PushReport};
use amoeba_types::LocalId;
use clap::Parser;
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write_config(dir: &Path) -> PathBuf {
    let db = dir.join("leads.db");
    let config = format!(
        r#"
[keys]
instance_url = "https://crm.test"

[[features.lead_fields]]
local = "email"
remote = "email"

[database]
path = "{}"
"#,
        db.display()
    );
    let path = dir.join("amoeba.toml");
    std::fs::write(&path, config).unwrap();
    path
}

// ── Arguments ────────────────────────────────────────────────────

#[test]
fn config_defaults_to_amoeba_toml() {
    let args = Args::try_parse_from(["amoeba", "push"]).unwrap();
    assert_eq!(args.config, PathBuf::from("amoeba.toml"));
    assert!(!args.verbose);
    assert_eq!(args.command, Command::Push);
}

#[test]
fn pull_takes_page_size() {
    let args = Args::try_parse_from(["amoeba", "-v", "--config", "x.toml", "pull", "--page-size", "50"])
        .unwrap();
    assert!(args.verbose);
    assert_eq!(args.config, PathBuf::from("x.toml"));
    assert_eq!(args.command, Command::Pull { page_size: Some(50) });

    let args = Args::try_parse_from(["amoeba", "pull"]).unwrap();
    assert_eq!(args.command, Command::Pull { page_size: None });
}

#[test]
fn zero_page_size_is_refused() {
    assert!(Args::try_parse_from(["amoeba", "pull", "--page-size", "0"]).is_err());
    assert!(Args::try_parse_from(["amoeba", "pull", "--page-size", "1"]).is_ok());
}

#[test]
fn push_lead_parses_local_id() {
    let args = Args::try_parse_from(["amoeba", "push-lead", "42"]).unwrap();
    assert_eq!(args.command, Command::PushLead { id: LocalId::new(42) });

    assert!(Args::try_parse_from(["amoeba", "push-lead", "abc"]).is_err());
}

#[test]
fn other_commands_parse() {
    let args = Args::try_parse_from(["amoeba", "fields"]).unwrap();
    assert_eq!(args.command, Command::Fields);

    let args = Args::try_parse_from(["amoeba", "import", "leads.json"]).unwrap();
    assert_eq!(args.command, Command::Import { file: PathBuf::from("leads.json") });
}

#[test]
fn command_is_required() {
    assert!(Args::try_parse_from(["amoeba"]).is_err());
}

// ── Import ───────────────────────────────────────────────────────

#[test]
fn import_stringifies_scalars_and_skips_nulls() {
    let leads = parse_import(
        r#"[
            {"email": "ann@example.com", "points": 12, "active": true, "phone": null},
            {"email": "bob@example.com"}
        ]"#,
    )
    .unwrap();

    assert_eq!(leads.len(), 2);
    assert_eq!(leads[0]["points"], "12");
    assert_eq!(leads[0]["active"], "true");
    assert!(!leads[0].contains_key("phone"));
    assert_eq!(leads[1]["email"], "bob@example.com");
}

#[test]
fn import_rejects_bad_shapes() {
    assert!(parse_import("not json").is_err());
    assert!(parse_import(r#"{"email": "a@b.com"}"#).is_err());
    assert!(parse_import(r#"["a@b.com"]"#).is_err());
    assert!(parse_import(r#"[{"address": {"city": "Paris"}}]"#).is_err());
    assert!(parse_import(r#"[{"email": null}]"#).is_err());
    assert_eq!(parse_import("[]").unwrap().len(), 0);
}

#[test]
fn import_file_inserts_leads() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("leads.json");
    std::fs::write(&file, r#"[{"email": "a@example.com"}, {"email": "b@example.com"}]"#).unwrap();
    let store = SqliteStore::open_in_memory().unwrap();

    assert_eq!(import_leads(&store, &file).unwrap(), 2);
    assert_eq!(store.lead_count().unwrap(), 2);
}

#[test]
fn invalid_import_file_inserts_nothing() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("leads.json");
    std::fs::write(&file, r#"[{"email": "a@example.com"}, 7]"#).unwrap();
    let store = SqliteStore::open_in_memory().unwrap();

    assert!(import_leads(&store, &file).is_err());
    assert_eq!(store.lead_count().unwrap(), 0);
}

#[test]
fn store_failure_midway_rolls_back_import() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("leads.db");
    let store = SqliteStore::new(db.to_str().unwrap()).unwrap();
    rusqlite::Connection::open(&db)
        .unwrap()
        .execute_batch(
            "CREATE TRIGGER reject_second BEFORE INSERT ON leads
             WHEN json_extract(NEW.fields, '$.email') = 'b@example.com'
             BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        )
        .unwrap();
    let file = dir.path().join("leads.json");
    std::fs::write(
        &file,
        r#"[{"email": "a@example.com"}, {"email": "b@example.com"}, {"email": "c@example.com"}]"#,
    )
    .unwrap();

    assert!(import_leads(&store, &file).is_err());
    assert_eq!(store.lead_count().unwrap(), 0);
}

#[tokio::test]
async fn import_command_writes_configured_database() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());
    let file = dir.path().join("leads.json");
    std::fs::write(&file, r#"[{"email": "a@example.com"}]"#).unwrap();

    let args = Args::try_parse_from([
        "amoeba",
        "--config",
        config.to_str().unwrap(),
        "import",
        file.to_str().unwrap(),
    ])
    .unwrap();
    run(args).await.unwrap();

    let store = SqliteStore::new(dir.path().join("leads.db").to_str().unwrap()).unwrap();
    assert_eq!(store.lead_count().unwrap(), 1);
}

#[tokio::test]
async fn missing_config_fails() {
    let args = Args::try_parse_from(["amoeba", "--config", "/no/such/amoeba.toml", "push"]).unwrap();
    let err = run(args).await.unwrap_err();
    assert!(err.to_string().contains("/no/such/amoeba.toml"));
}

#[tokio::test]
async fn push_lead_for_unknown_id_fails_before_any_request() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());
    let args = Args::try_parse_from(["amoeba", "--config", config.to_str().unwrap(), "push-lead", "99"])
        .unwrap();

    let err = run(args).await.unwrap_err();
    assert!(err.to_string().contains("no lead with id 99"));
}

// ── Output ───────────────────────────────────────────────────────

#[test]
fn reports_render_counters() {
    let push = PushReport {
        total: 5,
        updated: 2,
        created: 1,
        errors: 1,
        ignored: 1,
    };
    assert_eq!(
        render_push(&push),
        "push: total=5 updated=2 created=1 errors=1 ignored=1"
    );

    let pull = PullReport {
        fetched: 3,
        created: 3,
        truncated: true,
        ..PullReport::default()
    };
    assert_eq!(
        render_pull(&pull),
        "pull: fetched=3 updated=0 created=3 unchanged=0 errors=0 ignored=0 (truncated)"
    );
}

#[test]
fn fields_mark_required() {
    let mut fields = BTreeMap::new();
    fields.insert(
        "email".to_string(),
        LeadFieldInfo {
            label: "Email".into(),
            field_type: "string".into(),
            required: true,
            group: "Contact".into(),
        },
    );
    fields.insert(
        "city".to_string(),
        LeadFieldInfo {
            label: "City".into(),
            field_type: "string".into(),
            required: false,
            group: "Contact".into(),
        },
    );

    let out = render_fields(&fields);
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("city"));
    assert!(lines[0].ends_with("City"));
    assert!(lines[1].ends_with("Email *"));
}
