//! End-to-end import tests against a live PostgreSQL
//!
//! Ignored by default; see the runner header in ../integration.rs for how
//! to point them at a disposable database via TEST_DATABASE_URL. Each test
//! works in its own table and drops it afterwards.

use bulkgres::config::{ImportSettings, SecuritySettings, Settings};
use bulkgres::db::{FieldValue, PgConnector, PgSession, Record};
use bulkgres::error::ImportError;
use bulkgres::import::{ImportEngine, ImportStatus};
use bulkgres::pool::ConnectionPool;

use crate::common::{fast_pool_settings, injection_record, live_config, product_records};

const LIVE: &str = "requires live PostgreSQL (set TEST_DATABASE_URL)";

async fn engine_for(table_suffix: &str) -> (ImportEngine, PgSession, String) {
    let config = live_config().expect("TEST_DATABASE_URL must be set for live tests");
    let session = PgSession::connect(&config).await.expect("direct session");
    let pool = ConnectionPool::new(PgConnector::new(config), fast_pool_settings(1, 4)).await;
    let engine = ImportEngine::new(
        pool,
        ImportSettings::default(),
        &SecuritySettings::default(),
    );
    let table = format!("bulkgres_test_{}", table_suffix);
    drop_table(&session, &table).await;
    (engine, session, table)
}

async fn drop_table(session: &PgSession, table: &str) {
    let sql = format!("DROP TABLE IF EXISTS \"{}\"", table);
    let _ = session.client().execute(sql.as_str(), &[]).await;
}

async fn count_rows(session: &PgSession, table: &str) -> i64 {
    let sql = format!("SELECT count(*) FROM \"{}\"", table);
    let row = session
        .client()
        .query_one(sql.as_str(), &[])
        .await
        .expect("count query");
    row.get(0)
}

#[tokio::test]
#[ignore = "requires live PostgreSQL (set TEST_DATABASE_URL)"]
async fn two_records_run_single_row_phase() {
    let (engine, session, table) = engine_for("two_rows").await;

    let report = engine
        .import_records(product_records(2), &table)
        .await
        .expect(LIVE);

    assert_eq!(report.total_rows, 2);
    assert_eq!(report.processed_rows, 2);
    assert_eq!(report.skipped_rows, 0);
    assert_eq!(report.performance.optimization_phase.label(), "single_row");
    assert_eq!(report.status, ImportStatus::Success);
    assert_eq!(count_rows(&session, &table).await, 2);

    drop_table(&session, &table).await;
}

#[tokio::test]
#[ignore = "requires live PostgreSQL (set TEST_DATABASE_URL)"]
async fn medium_batch_persists_everything() {
    let (engine, session, table) = engine_for("medium").await;

    let report = engine
        .import_records(product_records(5_000), &table)
        .await
        .expect(LIVE);

    assert_eq!(report.processed_rows, 5_000);
    assert_eq!(report.skipped_rows, 0);
    assert_eq!(report.performance.optimization_phase.label(), "batched");
    assert_eq!(count_rows(&session, &table).await, 5_000);

    drop_table(&session, &table).await;
}

#[tokio::test]
#[ignore = "requires live PostgreSQL (set TEST_DATABASE_URL)"]
async fn large_import_streams_via_copy_and_filters_injections() {
    let (engine, session, table) = engine_for("copy_path").await;

    let mut records = product_records(25_000);
    records[100] = injection_record();
    records[200] = injection_record();
    records[300] = injection_record();
    let total = records.len();

    let report = engine.import_records(records, &table).await.expect(LIVE);

    assert_eq!(report.total_rows, total);
    assert_eq!(report.processed_rows, total - 3);
    assert_eq!(report.skipped_rows, 3);
    assert_eq!(report.rejections.len(), 3);
    assert_eq!(report.performance.optimization_phase.label(), "full_bulk");
    assert_eq!(count_rows(&session, &table).await, (total - 3) as i64);

    // Rejections name the field and rule, never the value
    assert_eq!(report.rejections[0].field, "name");
    assert_eq!(report.rejections[0].rule, "stacked_destructive");

    drop_table(&session, &table).await;
}

#[tokio::test]
#[ignore = "requires live PostgreSQL (set TEST_DATABASE_URL)"]
async fn existing_ids_update_unknown_ids_drop() {
    let (engine, session, table) = engine_for("upsert").await;

    // Seed two rows and learn their generated ids
    engine
        .import_records(product_records(2), &table)
        .await
        .expect(LIVE);
    let seed_sql = format!("SELECT id::text, name FROM \"{}\" ORDER BY name", table);
    let rows = session
        .client()
        .query(seed_sql.as_str(), &[])
        .await
        .expect("seed ids");
    let known_id: String = rows[0].get(0);

    // One update (known id), one drop (unknown id), one insert (no id)
    let mut update = Record::new();
    update.push("id", FieldValue::Text(known_id.clone()));
    update.push("name", FieldValue::Text("renamed".into()));

    let mut dropped = Record::new();
    dropped.push(
        "id",
        FieldValue::Text("00000000-0000-0000-0000-00000000beef".into()),
    );
    dropped.push("name", FieldValue::Text("ghost".into()));

    let mut insert = Record::new();
    insert.push("name", FieldValue::Text("brand-new".into()));

    let report = engine
        .import_records(vec![update, dropped, insert], &table)
        .await
        .expect(LIVE);

    assert_eq!(report.total_rows, 3);
    assert_eq!(report.updated_rows, 1);
    assert_eq!(report.inserted_rows, 1);
    assert_eq!(report.skipped_rows, 1);
    assert_eq!(report.dropped_ids.len(), 1);
    assert_eq!(report.processed_rows + report.skipped_rows, report.total_rows);

    let renamed_sql = format!("SELECT name FROM \"{}\" WHERE id::text = $1", table);
    let renamed = session
        .client()
        .query_one(renamed_sql.as_str(), &[&known_id])
        .await
        .expect("updated row");
    assert_eq!(renamed.get::<_, String>(0), "renamed");

    drop_table(&session, &table).await;
}

#[tokio::test]
#[ignore = "requires live PostgreSQL (set TEST_DATABASE_URL)"]
async fn failed_call_rolls_back_everything() {
    let (engine, session, table) = engine_for("rollback").await;

    // Create the destination with a constraint the import will violate
    // mid-batch, after some rows have already been written.
    let create_sql = format!(
        "CREATE TABLE \"{}\" ( \
           id UUID PRIMARY KEY DEFAULT gen_random_uuid(), \
           name TEXT, \
           price NUMERIC CHECK (price < 1000), \
           stock BIGINT)",
        table
    );
    session
        .client()
        .execute(create_sql.as_str(), &[])
        .await
        .expect("create constrained table");

    let mut records = product_records(50);
    let mut poison = Record::new();
    poison.push("name", FieldValue::Text("too-expensive".into()));
    poison.push("price", FieldValue::Float(10_000.0));
    poison.push("stock", FieldValue::Integer(1));
    records.push(poison);

    let err = engine
        .import_records(records, &table)
        .await
        .expect_err("constraint violation must fail the call");
    assert!(matches!(err, ImportError::Db(_)));

    // Idempotence of rollback: nothing from the failed call is visible
    assert_eq!(count_rows(&session, &table).await, 0);

    drop_table(&session, &table).await;
}

#[tokio::test]
#[ignore = "requires live PostgreSQL (set TEST_DATABASE_URL)"]
async fn missing_destination_fails_when_auto_create_is_off() {
    let config = live_config().expect("TEST_DATABASE_URL must be set for live tests");
    let pool = ConnectionPool::new(PgConnector::new(config), fast_pool_settings(1, 2)).await;
    let settings = Settings::default();
    let engine = ImportEngine::new(
        pool,
        ImportSettings {
            create_missing_tables: false,
            ..settings.import
        },
        &settings.security,
    );

    let err = engine
        .import_records(product_records(1), "bulkgres_test_no_such_table")
        .await
        .expect_err("destination must be unresolvable");
    assert!(matches!(err, ImportError::Destination(_)));
}
