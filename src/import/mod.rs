//! Bulk import engine
//!
//! Turns a sequence of untyped records into persisted rows: validates every
//! field, routes rows into insert/update/drop sets with one bulk id probe,
//! picks an execution phase by workload size, and runs the whole call on a
//! single pooled connection inside a single transaction. A mid-execution
//! failure rolls everything back; a concurrent reader never observes a
//! partial import.

pub mod report;
pub mod strategy;

use bytes::Bytes;
use chrono::Utc;
use futures::SinkExt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio_postgres::Transaction;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{ImportSettings, SecuritySettings};
use crate::db::schema::{self, Destination, quote_ident};
use crate::db::session::PgConnector;
use crate::db::types::{DataType, FieldValue, Record, append_copy_field};
use crate::error::{DbError, ImportError, ImportResult};
use crate::pool::ConnectionPool;
use crate::security::{FieldValidator, validate_identifier};

pub use report::{ImportReport, ImportStatus, Performance, Rejection};
pub use strategy::{DestinationProbe, ExecutionPhase, select_phase};

/// PostgreSQL's hard ceiling on parameters per statement
const MAX_STATEMENT_PARAMS: usize = 65_535;

/// Bytes buffered per COPY data message
const COPY_CHUNK_BYTES: usize = 64 * 1024;

/// Audit columns the engine stamps when the destination carries them
const AUDIT_COLUMNS: [&str; 2] = ["created_at", "updated_at"];

/// The bulk import engine.
///
/// Entry point consumed by the transport layer: construct once, share via
/// `Arc`, call [`import_records`](Self::import_records) from any number of
/// concurrent tasks.
pub struct ImportEngine {
    pool: Arc<ConnectionPool<PgConnector>>,
    settings: ImportSettings,
    validator: FieldValidator,
}

struct InsertRow {
    /// Generated id when the destination keys rows by UUID; `None` leaves
    /// id handling to the record/defaults
    id: Option<Uuid>,
    record: Record,
}

struct UpdateRow {
    id: Uuid,
    record: Record,
}

impl ImportEngine {
    /// Create an engine on top of a pool
    pub fn new(
        pool: Arc<ConnectionPool<PgConnector>>,
        settings: ImportSettings,
        security: &SecuritySettings,
    ) -> Self {
        Self {
            pool,
            settings,
            validator: FieldValidator::new(security),
        }
    }

    /// The pool backing this engine (for health endpoints)
    pub fn pool(&self) -> &Arc<ConnectionPool<PgConnector>> {
        &self.pool
    }

    /// Import a batch of records into `table`.
    ///
    /// Bad rows are filtered and counted, never fatal. The call fails only
    /// on an unresolvable destination, an exhausted pool, or a failure at
    /// the transaction boundary; in the latter case everything written by
    /// this call is rolled back before the error is returned.
    pub async fn import_records(
        &self,
        records: Vec<Record>,
        table: &str,
    ) -> ImportResult<ImportReport> {
        let started = Instant::now();

        if !validate_identifier(table) {
            return Err(ImportError::Destination(format!(
                "invalid table name '{}'",
                table
            )));
        }

        // One connection for the whole call: keeps the operation
        // transactional and avoids pool churn across batches.
        let mut conn = self.pool.acquire().await?;

        let result = self
            .run_import(conn.client_mut(), records, table, started)
            .await;

        match result {
            Ok(report) => {
                self.pool.release(conn, true).await;
                Ok(report)
            }
            Err(e) => {
                // Destination problems leave the connection healthy; any
                // mid-execution failure discards it.
                let healthy = matches!(e, ImportError::Destination(_));
                self.pool.release(conn, healthy).await;
                Err(e)
            }
        }
    }

    async fn run_import(
        &self,
        client: &mut tokio_postgres::Client,
        records: Vec<Record>,
        table: &str,
        started: Instant,
    ) -> ImportResult<ImportReport> {
        let total_rows = records.len();
        info!(table, total_rows, "starting import");

        let destination = self.resolve_destination(client, table, &records).await?;

        // Partition into accepted and rejected; rejected rows only feed
        // the report counters.
        let mut accepted: Vec<(usize, Record)> = Vec::with_capacity(records.len());
        let mut rejections: Vec<Rejection> = Vec::new();
        for (row, record) in records.into_iter().enumerate() {
            match self.validator.validate_record(&record) {
                Some(rejection) => rejections.push(Rejection::at_row(row, rejection)),
                None => accepted.push((row, record)),
            }
        }

        // Route accepted rows by id against one bulk existence probe
        let uuid_routing = matches!(
            destination.column("id").map(|c| &c.data_type),
            Some(DataType::Uuid)
        );
        let existing_ids = if uuid_routing {
            self.probe_existing_ids(client, &destination, &accepted)
                .await?
        } else {
            HashSet::new()
        };

        let mut inserts: Vec<InsertRow> = Vec::new();
        let mut updates: Vec<UpdateRow> = Vec::new();
        let mut dropped_ids: Vec<String> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();

        for (row, record) in accepted {
            if !uuid_routing {
                inserts.push(InsertRow { id: None, record });
                continue;
            }
            match record.get("id").and_then(FieldValue::as_text) {
                None => inserts.push(InsertRow {
                    id: Some(Uuid::new_v4()),
                    record,
                }),
                Some(text) => match Uuid::parse_str(text.trim()) {
                    Ok(id) if existing_ids.contains(&id) => {
                        updates.push(UpdateRow { id, record });
                    }
                    Ok(id) => {
                        warnings.push(format!("row {}: id not found in destination, dropped", row + 1));
                        dropped_ids.push(id.to_string());
                    }
                    Err(_) => {
                        warnings.push(format!("row {}: invalid id format, dropped", row + 1));
                        dropped_ids.push(text);
                    }
                },
            }
        }

        let writable = inserts.len() + updates.len();
        let probe = DestinationProbe {
            is_empty: schema::table_is_empty(client, table)
                .await
                .map_err(ImportError::Db)?,
            has_candidate_keys: !updates.is_empty(),
        };
        let phase = select_phase(writable, probe, &self.settings);
        debug!(
            table,
            writable,
            destination_empty = probe.is_empty,
            phase = phase.label(),
            "execution phase selected"
        );

        // One transaction per call; dropping it without commit rolls back.
        let tx = client.transaction().await.map_err(map_pg_error)?;
        let inserted = match phase {
            ExecutionPhase::SingleRow => self.run_single_row_inserts(&tx, &destination, &inserts).await?,
            ExecutionPhase::Batched => self.run_batched_inserts(&tx, &destination, &inserts).await?,
            ExecutionPhase::FullBulk => self.run_copy_inserts(&tx, &destination, &inserts).await?,
        };
        let updated = match phase {
            ExecutionPhase::SingleRow => self.run_single_row_updates(&tx, &destination, &updates).await?,
            // The full-bulk path only runs when no candidate keys exist,
            // so updates are empty there and the batched executor no-ops.
            ExecutionPhase::Batched | ExecutionPhase::FullBulk => {
                self.run_batched_updates(&tx, &destination, &updates).await?
            }
        };
        tx.commit().await.map_err(map_pg_error)?;

        let report = ImportReport::new(
            table.to_string(),
            total_rows,
            inserted,
            updated,
            dropped_ids,
            rejections,
            warnings,
            phase,
            started.elapsed(),
        );
        info!(
            table,
            processed = report.processed_rows,
            skipped = report.skipped_rows,
            phase = phase.label(),
            elapsed_secs = report.performance.execution_time_seconds,
            "import finished"
        );
        Ok(report)
    }

    /// Resolve the destination column set, creating the table or adding
    /// missing columns when settings allow it.
    async fn resolve_destination(
        &self,
        client: &tokio_postgres::Client,
        table: &str,
        records: &[Record],
    ) -> ImportResult<Destination> {
        let union_columns = column_union(records);
        for column in &union_columns {
            if !validate_identifier(column) {
                return Err(ImportError::Destination(format!(
                    "invalid column name '{}'",
                    column
                )));
            }
        }

        let exists = schema::table_exists(client, table)
            .await
            .map_err(ImportError::Db)?;

        if !exists {
            if !self.settings.create_missing_tables {
                return Err(ImportError::Destination(format!(
                    "table '{}' does not exist",
                    table
                )));
            }
            info!(table, "creating destination table");
            schema::create_table(client, table, &union_columns)
                .await
                .map_err(ImportError::Db)?;
        } else if self.settings.add_missing_columns {
            let existing = schema::load_columns(client, table)
                .await
                .map_err(ImportError::Db)?;
            for column in &union_columns {
                let known = existing.iter().any(|c| c.name == *column)
                    || column.eq_ignore_ascii_case("id");
                if !known {
                    info!(table, column = column.as_str(), "adding destination column");
                    schema::add_column(client, table, column)
                        .await
                        .map_err(ImportError::Db)?;
                }
            }
        }

        let columns = schema::load_columns(client, table)
            .await
            .map_err(ImportError::Db)?;
        if columns.is_empty() {
            return Err(ImportError::Destination(format!(
                "table '{}' has no resolvable columns",
                table
            )));
        }

        Ok(Destination {
            table: table.to_string(),
            columns,
        })
    }

    /// One round trip answering which incoming ids already exist
    async fn probe_existing_ids(
        &self,
        client: &tokio_postgres::Client,
        destination: &Destination,
        accepted: &[(usize, Record)],
    ) -> ImportResult<HashSet<Uuid>> {
        let incoming: Vec<Uuid> = accepted
            .iter()
            .filter_map(|(_, record)| record.get("id").and_then(FieldValue::as_text))
            .filter_map(|text| Uuid::parse_str(text.trim()).ok())
            .collect();
        if incoming.is_empty() {
            return Ok(HashSet::new());
        }

        let sql = format!(
            "SELECT id FROM {} WHERE id = ANY($1)",
            quote_ident(&destination.table)
        );
        let rows = client
            .query(sql.as_str(), &[&incoming])
            .await
            .map_err(map_pg_error)?;
        debug!(
            checked = incoming.len(),
            found = rows.len(),
            "bulk id existence probe"
        );
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    async fn run_single_row_inserts(
        &self,
        tx: &Transaction<'_>,
        destination: &Destination,
        inserts: &[InsertRow],
    ) -> ImportResult<usize> {
        if inserts.is_empty() {
            return Ok(0);
        }
        let columns = insert_columns(destination, inserts);
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&destination.table),
            quoted_list(&columns),
            placeholders.join(", ")
        );
        let statement = tx.prepare(&sql).await.map_err(map_pg_error)?;

        let now = Utc::now().to_rfc3339();
        let mut inserted = 0usize;
        for insert in inserts {
            let params: Vec<FieldValue> = columns
                .iter()
                .map(|column| bind_value(insert, column, &now))
                .collect();
            let refs = param_refs(&params);
            inserted += tx.execute(&statement, &refs).await.map_err(map_pg_error)? as usize;
        }
        Ok(inserted)
    }

    async fn run_batched_inserts(
        &self,
        tx: &Transaction<'_>,
        destination: &Destination,
        inserts: &[InsertRow],
    ) -> ImportResult<usize> {
        if inserts.is_empty() {
            return Ok(0);
        }
        let columns = insert_columns(destination, inserts);
        let per_chunk = rows_per_statement(columns.len(), self.settings.batch_size);

        let now = Utc::now().to_rfc3339();
        let mut inserted = 0usize;
        for chunk in inserts.chunks(per_chunk) {
            let mut values = Vec::with_capacity(chunk.len());
            let mut params: Vec<FieldValue> = Vec::with_capacity(chunk.len() * columns.len());
            for insert in chunk {
                let first = params.len() + 1;
                let row_placeholders: Vec<String> = (0..columns.len())
                    .map(|offset| format!("${}", first + offset))
                    .collect();
                values.push(format!("({})", row_placeholders.join(", ")));
                for column in &columns {
                    params.push(bind_value(insert, column, &now));
                }
            }
            let sql = format!(
                "INSERT INTO {} ({}) VALUES {}",
                quote_ident(&destination.table),
                quoted_list(&columns),
                values.join(", ")
            );
            let refs = param_refs(&params);
            inserted += tx.execute(sql.as_str(), &refs).await.map_err(map_pg_error)? as usize;
        }
        Ok(inserted)
    }

    /// Stream inserts through COPY, the store's bulk-load fast path
    async fn run_copy_inserts(
        &self,
        tx: &Transaction<'_>,
        destination: &Destination,
        inserts: &[InsertRow],
    ) -> ImportResult<usize> {
        if inserts.is_empty() {
            return Ok(0);
        }
        let columns = insert_columns(destination, inserts);
        let sql = format!(
            "COPY {} ({}) FROM STDIN",
            quote_ident(&destination.table),
            quoted_list(&columns)
        );
        let sink = tx.copy_in(sql.as_str()).await.map_err(map_pg_error)?;
        futures::pin_mut!(sink);

        let now = Utc::now().to_rfc3339();
        let mut buffer = String::with_capacity(COPY_CHUNK_BYTES);
        for insert in inserts {
            append_copy_row(&mut buffer, &columns, insert, &now);
            if buffer.len() >= COPY_CHUNK_BYTES {
                let chunk = Bytes::from(std::mem::take(&mut buffer).into_bytes());
                sink.send(chunk).await.map_err(map_pg_error)?;
                buffer.reserve(COPY_CHUNK_BYTES);
            }
        }
        if !buffer.is_empty() {
            sink.send(Bytes::from(buffer.into_bytes()))
                .await
                .map_err(map_pg_error)?;
        }

        let inserted = sink.finish().await.map_err(map_pg_error)?;
        Ok(inserted as usize)
    }

    async fn run_single_row_updates(
        &self,
        tx: &Transaction<'_>,
        destination: &Destination,
        updates: &[UpdateRow],
    ) -> ImportResult<usize> {
        let now_clause = if destination.has_column("updated_at") {
            ", updated_at = now()"
        } else {
            ""
        };

        let mut updated = 0usize;
        for update in updates {
            let columns = update_signature(destination, &update.record);
            if columns.is_empty() {
                continue;
            }
            let sets: Vec<String> = columns
                .iter()
                .enumerate()
                .map(|(i, column)| format!("{} = ${}", quote_ident(column), i + 1))
                .collect();
            let sql = format!(
                "UPDATE {} SET {}{} WHERE id = ${}",
                quote_ident(&destination.table),
                sets.join(", "),
                now_clause,
                columns.len() + 1
            );
            let mut params: Vec<FieldValue> = columns
                .iter()
                .map(|column| {
                    update
                        .record
                        .get(column)
                        .cloned()
                        .unwrap_or(FieldValue::Null)
                })
                .collect();
            params.push(FieldValue::Text(update.id.to_string()));
            let refs = param_refs(&params);
            updated += tx.execute(sql.as_str(), &refs).await.map_err(map_pg_error)? as usize;
        }
        Ok(updated)
    }

    /// One `UPDATE ... FROM (VALUES ...)` statement per column signature.
    ///
    /// Grouping by signature means a row only ever writes the columns it
    /// actually carries; a column union would overwrite missing fields
    /// with NULL.
    async fn run_batched_updates(
        &self,
        tx: &Transaction<'_>,
        destination: &Destination,
        updates: &[UpdateRow],
    ) -> ImportResult<usize> {
        if updates.is_empty() {
            return Ok(0);
        }

        let mut groups: HashMap<Vec<String>, Vec<&UpdateRow>> = HashMap::new();
        for update in updates {
            let signature = update_signature(destination, &update.record);
            if signature.is_empty() {
                continue;
            }
            groups.entry(signature).or_default().push(update);
        }

        let now_clause = if destination.has_column("updated_at") {
            ", updated_at = now()"
        } else {
            ""
        };

        let mut updated = 0usize;
        for (columns, rows) in groups {
            let casts: Vec<&'static str> = columns
                .iter()
                .map(|column| {
                    destination
                        .column(column)
                        .map(|c| c.data_type.cast_name())
                        .unwrap_or("text")
                })
                .collect();
            let per_chunk = rows_per_statement(columns.len() + 1, self.settings.batch_size);

            for chunk in rows.chunks(per_chunk) {
                let mut values = Vec::with_capacity(chunk.len());
                let mut params: Vec<FieldValue> =
                    Vec::with_capacity(chunk.len() * (columns.len() + 1));
                for update in chunk {
                    let mut slots = Vec::with_capacity(columns.len() + 1);
                    params.push(FieldValue::Text(update.id.to_string()));
                    slots.push(format!("${}::uuid", params.len()));
                    for (column, cast) in columns.iter().zip(&casts) {
                        params.push(
                            update
                                .record
                                .get(column)
                                .cloned()
                                .unwrap_or(FieldValue::Null),
                        );
                        slots.push(format!("${}::{}", params.len(), cast));
                    }
                    values.push(format!("({})", slots.join(", ")));
                }

                let sets: Vec<String> = columns
                    .iter()
                    .map(|column| {
                        let quoted = quote_ident(column);
                        format!("{} = v.{}", quoted, quoted)
                    })
                    .collect();
                let sql = format!(
                    "UPDATE {table} SET {sets}{now} FROM (VALUES {values}) AS v (id, {cols}) \
                     WHERE {table}.id = v.id",
                    table = quote_ident(&destination.table),
                    sets = sets.join(", "),
                    now = now_clause,
                    values = values.join(", "),
                    cols = quoted_list(&columns),
                );
                let refs = param_refs(&params);
                updated += tx.execute(sql.as_str(), &refs).await.map_err(map_pg_error)? as usize;
            }
        }
        Ok(updated)
    }
}

/// Classify a driver error: a dead connection is a retryable transient
/// failure, anything else is a plain query failure.
fn map_pg_error(e: tokio_postgres::Error) -> ImportError {
    if e.is_closed() {
        ImportError::TransientConnection(e.to_string())
    } else {
        ImportError::Db(DbError::QueryFailed(e.to_string()))
    }
}

/// First-seen-order union of all record columns
fn column_union(records: &[Record]) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut union: Vec<String> = Vec::new();
    for record in records {
        for (name, _) in record.fields() {
            if seen.insert(name) {
                union.push(name.to_string());
            }
        }
    }
    union
}

/// The destination columns an insert statement writes, in destination order:
/// id when the engine generates it (or the records carry it), audit columns
/// when present, and every destination column that appears in any record.
fn insert_columns(destination: &Destination, inserts: &[InsertRow]) -> Vec<String> {
    let mut present: HashSet<&str> = HashSet::new();
    let mut generated_id = false;
    for insert in inserts {
        for (name, _) in insert.record.fields() {
            present.insert(name);
        }
        generated_id |= insert.id.is_some();
    }

    destination
        .columns
        .iter()
        .filter(|column| match column.name.as_str() {
            "id" => generated_id || present.contains("id"),
            name if AUDIT_COLUMNS.contains(&name) => true,
            name => present.contains(name),
        })
        .map(|column| column.name.clone())
        .collect()
}

/// The data columns one update row writes: its own fields intersected with
/// the destination, id and audit columns excluded, destination order.
fn update_signature(destination: &Destination, record: &Record) -> Vec<String> {
    destination
        .columns
        .iter()
        .filter(|column| {
            column.name != "id"
                && !AUDIT_COLUMNS.contains(&column.name.as_str())
                && record.get(&column.name).is_some()
        })
        .map(|column| column.name.clone())
        .collect()
}

/// Rows per statement: the configured batch size, capped so one statement
/// never exceeds the parameter ceiling.
fn rows_per_statement(params_per_row: usize, batch_size: usize) -> usize {
    let cap = MAX_STATEMENT_PARAMS / params_per_row.max(1);
    batch_size.clamp(1, cap.max(1))
}

/// The value bound for one insert column
fn bind_value(insert: &InsertRow, column: &str, now: &str) -> FieldValue {
    match column {
        "id" => match insert.id {
            Some(id) => FieldValue::Text(id.to_string()),
            None => insert
                .record
                .get("id")
                .cloned()
                .unwrap_or(FieldValue::Null),
        },
        "created_at" | "updated_at" => insert
            .record
            .get(column)
            .filter(|value| !value.is_null())
            .cloned()
            .unwrap_or_else(|| FieldValue::Text(now.to_string())),
        _ => insert
            .record
            .get(column)
            .cloned()
            .unwrap_or(FieldValue::Null),
    }
}

/// Append one COPY text-format line for an insert row
fn append_copy_row(buffer: &mut String, columns: &[String], insert: &InsertRow, now: &str) {
    for (i, column) in columns.iter().enumerate() {
        if i > 0 {
            buffer.push('\t');
        }
        append_copy_field(buffer, &bind_value(insert, column, now));
    }
    buffer.push('\n');
}

fn quoted_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|column| quote_ident(column))
        .collect::<Vec<_>>()
        .join(", ")
}

fn param_refs(params: &[FieldValue]) -> Vec<&(dyn tokio_postgres::types::ToSql + Sync)> {
    params
        .iter()
        .map(|value| value as &(dyn tokio_postgres::types::ToSql + Sync))
        .collect()
}
