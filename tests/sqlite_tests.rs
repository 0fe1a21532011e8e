/// SQLite end-to-end tests
///
/// Loads a JSON definition and a TOML configuration from a temporary
/// directory, runs the upgrader against a real database file and inspects
/// the control tables with a second connection.
/// Run with: cargo test --test sqlite_tests

use rusqlite::Connection;
use schemalift::{UpgradeConfig, UpgradeError, UpgradeOutcome, UpgradeTarget, Upgrader};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const DEFINITION: &str = r#"{
    "definition": [
        { "kind": "upgrade", "target": "1.0" },
        { "kind": "upgrade", "source": "1.0", "target": "1.1" }
    ],
    "segments": [
        {
            "kind": "upgrade",
            "target": "1.0",
            "commands": [
                "CREATE TABLE a (id INTEGER PRIMARY KEY, name TEXT)",
                { "sql": "INSERT INTO a (name) VALUES ('first')", "line": 12 }
            ]
        },
        {
            "kind": "upgrade",
            "source": "1.0",
            "target": "1.1",
            "commands": [
                { "directive": "SECTION \"audit\"" },
                "ALTER TABLE a ADD COLUMN created TEXT",
                "INSERT INTO b (id) VALUES (1)",
                "CREATE TABLE c (id INTEGER)"
            ]
        }
    ]
}"#;

fn write_project(definition: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("upgrade.json"), definition).unwrap();
    fs::write(
        dir.path().join("schemalift.toml"),
        "definition = \"upgrade.json\"\n\n[connections.default]\npath = \"app.db\"\nbusy_timeout_ms = 1000\n",
    )
    .unwrap();
    dir
}

fn open_upgrader(dir: &Path) -> Upgrader {
    let config = UpgradeConfig::load(dir.join("schemalift.toml")).unwrap();
    Upgrader::from_config(&config).unwrap()
}

fn version_row(conn: &Connection, table: &str) -> (Option<String>, Option<String>, i64) {
    conn.query_row(
        &format!("SELECT VERSION, TARGET, STATEMENTS FROM {}", table),
        [],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )
    .unwrap()
}

fn log_rows(conn: &Connection) -> Vec<(String, String, i64, Option<String>)> {
    let mut stmt = conn
        .prepare("SELECT TYPE, TARGET, STATEMENT, RESULT FROM DBVERSIONLOG ORDER BY rowid")
        .unwrap();
    stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
}

#[tokio::test]
async fn test_upgrade_sqlite_file_and_resume() {
    let dir = write_project(DEFINITION);

    let mut upgrader = open_upgrader(dir.path());
    let err = upgrader
        .upgrade(&UpgradeTarget::Latest, false)
        .await
        .unwrap_err();
    match &err {
        UpgradeError::Statement {
            failure, command, ..
        } => {
            assert_eq!(failure.code, "1");
            assert!(command.starts_with("INSERT INTO b"));
        }
        other => panic!("unexpected error: {other}"),
    }
    drop(upgrader);

    let conn = Connection::open(dir.path().join("app.db")).unwrap();
    assert_eq!(
        version_row(&conn, "DBVERSION"),
        (Some("1.0".to_string()), Some("1.1".to_string()), 1)
    );
    let failed = log_rows(&conn).pop().unwrap();
    assert_eq!(failed.0, "S");
    assert_eq!(failed.2, 2);
    assert!(failed.3.unwrap().starts_with("1: "));

    // fix the database by hand, then run again
    conn.execute_batch("CREATE TABLE b (id INTEGER)").unwrap();

    let mut upgrader = open_upgrader(dir.path());
    let outcome = upgrader.upgrade(&UpgradeTarget::Latest, false).await.unwrap();
    assert_eq!(
        outcome,
        UpgradeOutcome::Upgraded {
            from: Some("1.0".into()),
            to: "1.1".into(),
            segments: 1
        }
    );

    assert_eq!(version_row(&conn, "DBVERSION"), (Some("1.1".to_string()), None, 0));
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM b", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);

    let rows = log_rows(&conn);
    let completions: Vec<_> = rows
        .iter()
        .filter(|row| row.0 == "B")
        .map(|row| (row.1.as_str(), row.3.as_deref()))
        .collect();
    assert_eq!(completions, vec![("1.0", Some("COMPLETE")), ("1.1", Some("COMPLETE"))]);

    let outcome = upgrader.upgrade(&UpgradeTarget::Latest, false).await.unwrap();
    assert!(matches!(outcome, UpgradeOutcome::NoUpgradeNeeded { .. }));
}

#[tokio::test]
async fn test_ignored_error_on_sqlite() {
    let definition = r#"{
        "definition": [ { "kind": "patch", "target": "1.0" } ],
        "segments": [
            {
                "kind": "patch",
                "target": "1.0",
                "commands": [
                    { "directive": "IGNORE SQL ERROR 1" },
                    "DROP TABLE legacy",
                    { "directive": "/IGNORE SQL ERROR" },
                    "CREATE TABLE fresh (id INTEGER)"
                ]
            }
        ]
    }"#;
    let dir = write_project(definition);

    let mut upgrader = open_upgrader(dir.path());
    upgrader.upgrade(&UpgradeTarget::exact("1.0"), false).await.unwrap();

    let conn = Connection::open(dir.path().join("app.db")).unwrap();
    let rows = log_rows(&conn);
    assert!(rows[0].3.as_deref().unwrap().starts_with("IGNORED 1"));
    assert_eq!(rows[1].3, None);
    assert_eq!(version_row(&conn, "DBVERSION").0.as_deref(), Some("1.0"));
}

#[tokio::test]
async fn test_custom_control_tables() {
    let definition = r#"{
        "control_tables": { "version_table": "SCHEMA_STATE", "log_table": "SCHEMA_LOG" },
        "definition": [ { "kind": "upgrade", "target": "7" } ],
        "segments": [
            { "kind": "upgrade", "target": "7", "commands": [ "CREATE TABLE t (id INTEGER)" ] }
        ]
    }"#;
    let dir = write_project(definition);

    let mut upgrader = open_upgrader(dir.path());
    upgrader.upgrade(&UpgradeTarget::Latest, false).await.unwrap();
    assert_eq!(upgrader.current_version().await.unwrap().as_deref(), Some("7"));
    assert_eq!(upgrader.log_entries().await.unwrap().len(), 2);

    let conn = Connection::open(dir.path().join("app.db")).unwrap();
    assert_eq!(version_row(&conn, "SCHEMA_STATE").0.as_deref(), Some("7"));
    let missing = conn.prepare("SELECT * FROM DBVERSION");
    assert!(missing.is_err());
}

const AUDITED: &str = r#"{
    "definition": [ { "kind": "upgrade", "target": "1.0" } ],
    "segments": [
        {
            "kind": "upgrade",
            "target": "1.0",
            "commands": [
                "CREATE TABLE base (id INTEGER)",
                { "directive": "SELECT CONNECTION audit" },
                "CREATE TABLE audit_log (id INTEGER)",
                { "directive": "SELECT CONNECTION default" },
                "INSERT INTO pending (id) VALUES (1)"
            ]
        }
    ]
}"#;

fn write_audited_project(audit_file: &str) -> TempDir {
    let dir = write_project(AUDITED);
    fs::write(
        dir.path().join("schemalift.toml"),
        format!(
            "definition = \"upgrade.json\"\n\n\
             [connections.default]\npath = \"app.db\"\nbusy_timeout_ms = 1000\n\n\
             [connections.audit]\npath = \"{}\"\nbusy_timeout_ms = 1000\n",
            audit_file
        ),
    )
    .unwrap();
    dir
}

fn table_exists(conn: &Connection, table: &str) -> bool {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )
        .unwrap();
    count > 0
}

/// Runs the audited definition until it fails on the missing table, then
/// repairs the database and resumes.
async fn resume_across_connections(audit_file: &str) {
    let dir = write_audited_project(audit_file);

    let mut upgrader = open_upgrader(dir.path());
    let err = upgrader
        .upgrade(&UpgradeTarget::Latest, false)
        .await
        .unwrap_err();
    assert!(
        matches!(&err, UpgradeError::Statement { failure, .. } if failure.code == "1"),
        "unexpected error: {err}"
    );
    drop(upgrader);

    let conn = Connection::open(dir.path().join("app.db")).unwrap();
    let audit = Connection::open(dir.path().join(audit_file)).unwrap();
    assert_eq!(
        version_row(&conn, "DBVERSION"),
        (None, Some("1.0".to_string()), 2)
    );
    assert!(table_exists(&audit, "audit_log"));

    conn.execute_batch("CREATE TABLE pending (id INTEGER)").unwrap();

    // audit_log already exists, so running it again would fail
    let mut upgrader = open_upgrader(dir.path());
    upgrader.upgrade(&UpgradeTarget::Latest, false).await.unwrap();
    assert_eq!(version_row(&conn, "DBVERSION"), (Some("1.0".to_string()), None, 0));

    let audit_rows = log_rows(&conn)
        .into_iter()
        .filter(|row| row.0 == "S" && row.2 == 2)
        .count();
    assert_eq!(audit_rows, 1);
}

#[tokio::test]
async fn test_second_connection_on_same_file() {
    resume_across_connections("app.db").await;
}

#[tokio::test]
async fn test_second_connection_on_separate_file() {
    resume_across_connections("audit.db").await;
}
