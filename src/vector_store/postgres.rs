//! Postgres + pgvector collection.
//!
//! The pipeline is synchronous, so the store owns a current-thread Tokio
//! runtime and blocks on each `tokio-postgres` call.

use pgvector::Vector;
use tokio::runtime::{Builder, Runtime};
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error};

use super::{InsertOutcome, StoreError, VectorStore};
use crate::document::{Chunk, SourceKind};
use crate::embeddings::{IndexedRecord, ScoredChunk};

/// Fully-qualified Postgres table name (schema + table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    schema: String,
    table: String,
}

impl TableName {
    /// Builds a new table identifier.
    pub fn new<S, T>(schema: S, table: T) -> Result<Self, StoreError>
    where
        S: Into<String>,
        T: Into<String>,
    {
        let schema = schema.into();
        let table = table.into();
        if schema.trim().is_empty() {
            return Err(StoreError::Config("schema name is required".to_string()));
        }
        if table.trim().is_empty() {
            return Err(StoreError::Config("table name is required".to_string()));
        }
        Ok(Self { schema, table })
    }

    /// Fully-qualified table reference with quoted identifiers.
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }

    /// Name of the HNSW cosine index on the embedding column.
    pub fn embedding_index_name(&self) -> String {
        format!(
            "{}_{}_embedding_idx",
            sanitize_ident(&self.schema),
            sanitize_ident(&self.table)
        )
    }
}

/// Quotes Postgres identifiers, escaping embedded quotes.
pub fn quote_ident(input: &str) -> String {
    let escaped = input.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

fn sanitize_ident(input: &str) -> String {
    input
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect()
}

/// Vector collection stored in a pgvector table keyed by chunk id.
pub struct PgVectorStore {
    runtime: Runtime,
    client: Client,
    table: TableName,
    prepared: bool,
}

impl PgVectorStore {
    /// Connects to `database_url`; the table is created on first insert.
    pub fn connect(database_url: &str, table: TableName) -> Result<Self, StoreError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| StoreError::Config(format!("failed to start runtime: {err}")))?;
        let (client, connection) = runtime.block_on(tokio_postgres::connect(database_url, NoTls))?;
        runtime.spawn(async move {
            if let Err(err) = connection.await {
                error!(error = %err, "postgres connection error");
            }
        });
        debug!(table = %table.qualified(), "connected to pgvector store");
        Ok(Self {
            runtime,
            client,
            table,
            prepared: false,
        })
    }

    fn prepare(&mut self, dims: usize) -> Result<(), StoreError> {
        if self.prepared {
            return Ok(());
        }
        let ddl = [
            "CREATE EXTENSION IF NOT EXISTS vector".to_string(),
            create_table_sql(&self.table, dims),
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} USING hnsw (embedding vector_cosine_ops)",
                self.table.embedding_index_name(),
                self.table.qualified()
            ),
        ];
        for statement in &ddl {
            self.runtime
                .block_on(self.client.execute(statement.as_str(), &[]))?;
        }
        self.prepared = true;
        Ok(())
    }
}

impl VectorStore for PgVectorStore {
    fn len(&self) -> Result<usize, StoreError> {
        let sql = format!("SELECT count(*) FROM {}", self.table.qualified());
        match self.runtime.block_on(self.client.query_one(sql.as_str(), &[])) {
            Ok(row) => to_usize(row.get::<_, i64>(0), "count"),
            Err(err) if err.code() == Some(&SqlState::UNDEFINED_TABLE) => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    fn model_id(&self) -> Result<Option<String>, StoreError> {
        let sql = format!("SELECT model FROM {} LIMIT 1", self.table.qualified());
        match self.runtime.block_on(self.client.query_opt(sql.as_str(), &[])) {
            Ok(row) => Ok(row.map(|row| row.get::<_, String>(0))),
            Err(err) if err.code() == Some(&SqlState::UNDEFINED_TABLE) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn insert(
        &mut self,
        records: &[IndexedRecord],
        model_id: &str,
        upsert: bool,
    ) -> Result<InsertOutcome, StoreError> {
        let Some(first) = records.first() else {
            return Ok(InsertOutcome::default());
        };
        self.prepare(first.embedding.len())?;

        let sql = insert_sql(&self.table, upsert);
        let mut outcome = InsertOutcome::default();
        let runtime = &self.runtime;
        let client = &mut self.client;
        runtime.block_on(async {
            let transaction = client.transaction().await?;
            let statement = transaction.prepare(&sql).await?;
            for record in records {
                let chunk = &record.chunk;
                let page = chunk.page.map(i64::from);
                let char_start = as_i64(chunk.char_start, "char_start")?;
                let char_end = as_i64(chunk.char_end, "char_end")?;
                let tokens = as_i64(chunk.token_estimate, "token_estimate")?;
                let checksum = i64::from(chunk.checksum);
                let vector = Vector::from(record.embedding.clone());
                let row = transaction
                    .query_one(
                        &statement,
                        &[
                            &chunk.id,
                            &chunk.text,
                            &chunk.source_document,
                            &chunk.source_kind.as_str(),
                            &page,
                            &char_start,
                            &char_end,
                            &tokens,
                            &checksum,
                            &model_id,
                            &vector,
                        ],
                    )
                    .await?;
                if row.get::<_, bool>(0) {
                    outcome.inserted += 1;
                } else {
                    outcome.replaced += 1;
                }
            }
            transaction.commit().await?;
            Ok::<_, StoreError>(())
        })?;
        Ok(outcome)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, StoreError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let sql = select_sql(&self.table);
        let vector = Vector::from(query.to_vec());
        let limit = as_i64(k, "k")?;
        let rows = match self
            .runtime
            .block_on(self.client.query(sql.as_str(), &[&vector, &limit]))
        {
            Ok(rows) => rows,
            Err(err) if err.code() == Some(&SqlState::UNDEFINED_TABLE) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        rows.iter().map(scored_from_row).collect()
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        let sql = format!("DROP TABLE IF EXISTS {}", self.table.qualified());
        self.runtime.block_on(self.client.execute(sql.as_str(), &[]))?;
        self.prepared = false;
        Ok(())
    }
}

fn create_table_sql(table: &TableName, dims: usize) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (
            chunk_id TEXT PRIMARY KEY,
            text TEXT NOT NULL,
            source_document TEXT NOT NULL,
            source_kind TEXT NOT NULL,
            page BIGINT,
            char_start BIGINT NOT NULL,
            char_end BIGINT NOT NULL,
            token_estimate BIGINT NOT NULL,
            checksum BIGINT NOT NULL,
            model TEXT NOT NULL,
            embedding VECTOR({dims}) NOT NULL
        )",
        table.qualified()
    )
}

fn insert_sql(table: &TableName, upsert: bool) -> String {
    let mut sql = format!(
        "INSERT INTO {} \
            (chunk_id, text, source_document, source_kind, page, char_start, char_end, token_estimate, checksum, model, embedding) \
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        table.qualified()
    );
    if upsert {
        sql.push_str(
            " ON CONFLICT (chunk_id) DO UPDATE SET \
                text = EXCLUDED.text, \
                source_document = EXCLUDED.source_document, \
                source_kind = EXCLUDED.source_kind, \
                page = EXCLUDED.page, \
                char_start = EXCLUDED.char_start, \
                char_end = EXCLUDED.char_end, \
                token_estimate = EXCLUDED.token_estimate, \
                checksum = EXCLUDED.checksum, \
                model = EXCLUDED.model, \
                embedding = EXCLUDED.embedding",
        );
    }
    // xmax is zero only for freshly inserted tuples.
    sql.push_str(" RETURNING (xmax = 0) AS inserted");
    sql
}

fn select_sql(table: &TableName) -> String {
    format!(
        "SELECT \
            chunk_id, \
            text, \
            source_document, \
            source_kind, \
            page, \
            char_start, \
            char_end, \
            token_estimate, \
            checksum, \
            embedding <=> $1 AS distance \
        FROM {} \
        ORDER BY embedding <=> $1 ASC, chunk_id ASC \
        LIMIT $2",
        table.qualified()
    )
}

fn scored_from_row(row: &Row) -> Result<ScoredChunk, StoreError> {
    let kind: String = row.get("source_kind");
    let source_kind = SourceKind::from_name(&kind)
        .ok_or_else(|| StoreError::Config(format!("unknown source kind '{kind}'")))?;
    let page = row
        .get::<_, Option<i64>>("page")
        .map(|page| {
            u32::try_from(page).map_err(|_| StoreError::Config(format!("page {page} out of range")))
        })
        .transpose()?;
    let checksum = row.get::<_, i64>("checksum");
    let distance: f64 = row.get("distance");
    Ok(ScoredChunk {
        chunk: Chunk {
            id: row.get("chunk_id"),
            text: row.get("text"),
            source_document: row.get("source_document"),
            source_kind,
            page,
            char_start: to_usize(row.get("char_start"), "char_start")?,
            char_end: to_usize(row.get("char_end"), "char_end")?,
            token_estimate: to_usize(row.get("token_estimate"), "token_estimate")?,
            checksum: u32::try_from(checksum)
                .map_err(|_| StoreError::Config(format!("checksum {checksum} out of range")))?,
        },
        score: (1.0 - distance) as f32,
    })
}

fn as_i64(value: usize, field: &str) -> Result<i64, StoreError> {
    i64::try_from(value)
        .map_err(|_| StoreError::Config(format!("{field} value {value} exceeds i64 range")))
}

fn to_usize(value: i64, field: &str) -> Result<usize, StoreError> {
    usize::try_from(value)
        .map_err(|_| StoreError::Config(format!("{field} value {value} is negative")))
}
