//! End-to-end checks against a real SQLite file.

use std::collections::HashMap;

use common::config::AppConfig;
use common::models::{ConnectionConfig, DatabaseInfo, Dialect, ExecuteRequest, ExecutionMode};
use common::AppError;
use db_provider::{DatabaseProviderTrait, DatabaseTarget, DbProvider};
use serde_json::json;
use tokio_util::sync::CancellationToken;

struct Fixture {
    cache: tempfile::TempDir,
    db: tempfile::NamedTempFile,
    provider: DbProvider,
}

impl Fixture {
    fn new() -> Self {
        let cache = tempfile::tempdir().unwrap();
        let db = tempfile::NamedTempFile::new().unwrap();
        let config = AppConfig {
            dialect: Dialect::Sqlite,
            cache_dir: cache.path().to_path_buf(),
            instances_file: cache.path().join("instances.json"),
            ..AppConfig::default()
        };
        let provider = DbProvider::new(&config);
        Self {
            cache,
            db,
            provider,
        }
    }

    fn config(&self) -> ConnectionConfig {
        ConnectionConfig::from_connection_string(&format!("Data Source={}", self.db.path().display()), None).unwrap()
    }

    async fn write(&self, sql: &str) -> u64 {
        let request = ExecuteRequest::new(sql, "fixture setup", ExecutionMode::Write);
        self.provider
            .execute(&self.config(), &request, &CancellationToken::new())
            .await
            .unwrap()
            .affected_rows
    }

    async fn seed(&self) {
        self.write("CREATE TABLE teams (id INTEGER PRIMARY KEY, title TEXT NOT NULL)").await;
        self.write(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, team_id INTEGER REFERENCES teams(id))",
        )
        .await;
        self.write("INSERT INTO teams (id, title) VALUES (1, 'core')").await;
    }
}

#[tokio::test]
async fn test_write_then_read_round_trip() {
    let fixture = Fixture::new();
    let ct = CancellationToken::new();
    fixture.seed().await;

    let params = HashMap::from([
        ("id".to_string(), Some("1".to_string())),
        ("@name".to_string(), Some("'ann'".to_string())),
        ("team".to_string(), Some("1".to_string())),
    ]);
    let insert = ExecuteRequest::new(
        "INSERT INTO users (id, name, team_id) VALUES (@id, @name, @team)",
        "add ann",
        ExecutionMode::Write,
    )
    .with_parameters(params);
    let inserted = fixture.provider.execute(&fixture.config(), &insert, &ct).await.unwrap();
    assert_eq!(inserted.affected_rows, 1);

    let select = ExecuteRequest::new("SELECT id FROM users", "list ids", ExecutionMode::ReadOnly);
    let result = fixture.provider.execute(&fixture.config(), &select, &ct).await.unwrap();
    assert_eq!(result.columns, vec!["id"]);
    assert_eq!(result.rows, vec![vec![json!(1)]]);
    assert_eq!(result.affected_rows, 1);
}

#[tokio::test]
async fn test_null_cells_and_list_parameters() {
    let fixture = Fixture::new();
    let ct = CancellationToken::new();
    fixture.seed().await;
    fixture.write("INSERT INTO users (id, name) VALUES (1, 'ann'), (2, NULL), (3, 'cy')").await;

    let params = HashMap::from([("ids".to_string(), Some("[1, 2]".to_string()))]);
    let request = ExecuteRequest::new(
        "SELECT id, name FROM users WHERE id IN (@ids) ORDER BY id",
        "first two users",
        ExecutionMode::ReadOnly,
    )
    .with_parameters(params);
    let result = fixture.provider.execute(&fixture.config(), &request, &ct).await.unwrap();

    assert_eq!(result.rows, vec![vec![json!(1), json!("ann")], vec![json!(2), json!(null)]]);
    let echoed: Vec<&str> = result.parameters.as_ref().unwrap().iter().map(|p| p.name.as_str()).collect();
    assert_eq!(echoed, vec!["@ids_0", "@ids_1"]);
}

#[tokio::test]
async fn test_schema_reflects_writes() {
    let fixture = Fixture::new();
    let ct = CancellationToken::new();
    fixture.seed().await;

    let schema = fixture.provider.get_schema(&fixture.config(), false, &ct).await.unwrap();
    assert!(schema.cached_at_utc.is_some());

    let users = schema.table("main", "users").unwrap();
    assert_eq!(
        users.columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
        vec!["id", "name", "team_id"]
    );
    assert!(users.column("id").unwrap().is_primary_key);
    let team = users.column("team_id").unwrap();
    assert!(team.is_foreign_key);
    assert_eq!(team.references_table.as_deref(), Some("teams"));
    assert_eq!(team.references_column.as_deref(), Some("id"));
    assert_eq!(schema.relations.len(), 1);

    assert!(!schema.table("main", "teams").unwrap().column("title").unwrap().is_nullable);

    fixture.write("CREATE TABLE audits (id INTEGER PRIMARY KEY)").await;
    let refreshed = fixture.provider.get_schema(&fixture.config(), false, &ct).await.unwrap();
    assert!(refreshed.table("main", "audits").is_some());
}

#[tokio::test]
async fn test_read_only_blocks_writes() {
    let fixture = Fixture::new();
    let ct = CancellationToken::new();
    fixture.seed().await;

    let request = ExecuteRequest::new("DELETE FROM teams", "wipe", ExecutionMode::ReadOnly);
    let result = fixture.provider.execute(&fixture.config(), &request, &ct).await;
    assert!(matches!(result, Err(AppError::Validation(_))));

    let count = ExecuteRequest::new("SELECT COUNT(*) AS n FROM teams", "count", ExecutionMode::ReadOnly);
    let result = fixture.provider.execute(&fixture.config(), &count, &ct).await.unwrap();
    assert_eq!(result.rows, vec![vec![json!(1)]]);
}

#[tokio::test]
async fn test_statement_failure_carries_result() {
    let fixture = Fixture::new();
    let request = ExecuteRequest::new("SELECT * FROM missing_table", "missing", ExecutionMode::ReadOnly);
    let err = fixture
        .provider
        .execute(&fixture.config(), &request, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.code(), "EXECUTION_ERROR");
    let result = err.execution_result().unwrap();
    assert!(result.error_message.as_deref().unwrap().contains("missing_table"));
}

#[tokio::test]
async fn test_connection_checks_and_listing() {
    let fixture = Fixture::new();
    let ct = CancellationToken::new();
    fixture.seed().await;

    assert!(fixture.provider.check_connection(&fixture.config(), &ct).await.unwrap());

    let databases = fixture
        .provider
        .get_databases(DatabaseTarget::Config(fixture.config()), &ct)
        .await
        .unwrap();
    assert_eq!(databases, vec![DatabaseInfo::new("main", 2)]);

    let missing = ConnectionConfig::from_connection_string(
        &format!("Data Source={}", fixture.cache.path().join("absent.db").display()),
        None,
    )
    .unwrap();
    assert!(matches!(
        fixture.provider.check_connection(&missing, &ct).await,
        Err(AppError::Connectivity { .. })
    ));
}
