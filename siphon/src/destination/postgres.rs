//! Postgres-backed warehouse implementation.
//!
//! Owns a single connection, used exclusively by the destination engine loop. Catalog
//! metadata comes from `information_schema`, enum label lists from the destination
//! table's comment, bulk loads go through `COPY ... FROM STDIN` in CSV form, and the
//! durable position store is the `public.__siphon_positions` table.

use bytes::Bytes;
use futures::SinkExt;
use siphon_config::shared::{PgConnectionConfig, TlsConfig, WarehouseConfig};
use tokio_postgres::NoTls;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, info, warn};

use crate::destination::base::{
    ConstraintKind, CopyOutcome, TableConstraint, TableMeta, Warehouse,
};
use crate::destination::enums::parse_enum_metadata;
use crate::error::SiphonResult;
use crate::types::TableRef;

/// SQL creating the durable position store.
const CREATE_POSITIONS_TABLE: &str = "CREATE TABLE IF NOT EXISTS public.__siphon_positions (\
     source_name text PRIMARY KEY, \
     position text NOT NULL, \
     updated_at timestamptz NOT NULL DEFAULT now())";

/// SQL upserting one source's position.
const UPSERT_POSITION: &str = "INSERT INTO public.__siphon_positions (source_name, position, updated_at) \
     VALUES ($1, $2, now()) \
     ON CONFLICT (source_name) DO UPDATE SET position = excluded.position, updated_at = now()";

/// SQL reading one source's position.
const SELECT_POSITION: &str =
    "SELECT position FROM public.__siphon_positions WHERE source_name = $1";

/// SQL listing a table's columns in ordinal order.
const SELECT_COLUMNS: &str = "SELECT column_name FROM information_schema.columns \
     WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position";

/// SQL listing a table's primary and unique constraint columns.
const SELECT_CONSTRAINTS: &str = "SELECT tc.constraint_name, tc.constraint_type, kcu.column_name \
     FROM information_schema.table_constraints tc \
     JOIN information_schema.key_column_usage kcu \
       ON kcu.constraint_name = tc.constraint_name \
      AND kcu.constraint_schema = tc.constraint_schema \
     WHERE tc.table_schema = $1 AND tc.table_name = $2 \
       AND tc.constraint_type IN ('PRIMARY KEY', 'UNIQUE') \
     ORDER BY tc.constraint_name, kcu.ordinal_position";

/// SQL reading a table's comment, which may carry enum metadata.
const SELECT_TABLE_COMMENT: &str = "SELECT d.description \
     FROM pg_catalog.pg_description d \
     JOIN pg_catalog.pg_class c ON c.oid = d.objoid AND d.objsubid = 0 \
     JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
     WHERE n.nspname = $1 AND c.relname = $2";

/// A [`Warehouse`] writing to Postgres over a single dedicated connection.
pub struct PostgresWarehouse {
    client: tokio_postgres::Client,
}

impl PostgresWarehouse {
    /// Connects to the warehouse described by `config`.
    pub async fn connect(config: &WarehouseConfig) -> SiphonResult<Self> {
        let client = connect_client(&config.connection).await?;

        info!(
            host = %config.connection.host,
            database = %config.connection.name,
            "connected to warehouse"
        );

        Ok(Self { client })
    }

    fn copy_statement(table: &TableRef) -> String {
        format!(
            "COPY {} FROM STDIN WITH (FORMAT csv, DELIMITER ',', QUOTE '\"', NULL 'NULL')",
            table.quoted()
        )
    }
}

/// Establishes the warehouse connection, with or without TLS.
async fn connect_client(config: &PgConnectionConfig) -> SiphonResult<tokio_postgres::Client> {
    use secrecy::ExposeSecret;

    let mut pg_config = tokio_postgres::Config::new();
    pg_config
        .host(&config.host)
        .port(config.port)
        .dbname(&config.name)
        .user(&config.username)
        .application_name("siphon_replicator");

    if let Some(password) = &config.password {
        pg_config.password(password.expose_secret());
    }

    if config.tls.enabled {
        let tls = build_tls(&config.tls)?;
        let (client, connection) = pg_config.connect(tls).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                warn!(error = %err, "warehouse connection task ended with error");
            }
        });

        Ok(client)
    } else {
        let (client, connection) = pg_config.connect(NoTls).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                warn!(error = %err, "warehouse connection task ended with error");
            }
        });

        Ok(client)
    }
}

/// Builds the rustls connector from the configured trust anchors.
fn build_tls(tls: &TlsConfig) -> SiphonResult<MakeRustlsConnect> {
    let mut roots = rustls::RootCertStore::empty();
    let mut reader = std::io::Cursor::new(tls.trusted_root_certs.as_bytes());

    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert?;
        roots.add(cert)?;
    }

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(MakeRustlsConnect::new(config))
}

impl Warehouse for PostgresWarehouse {
    fn name() -> &'static str {
        "postgres"
    }

    async fn table_meta(&mut self, table: &TableRef) -> SiphonResult<Option<TableMeta>> {
        let columns: Vec<String> = self
            .client
            .query(SELECT_COLUMNS, &[&table.schema, &table.name])
            .await?
            .iter()
            .map(|row| row.get(0))
            .collect();

        if columns.is_empty() {
            info!(table = %table, "table not found in warehouse catalog");
            return Ok(None);
        }

        let mut constraints: Vec<TableConstraint> = Vec::new();
        let mut previous_name: Option<String> = None;
        for row in self
            .client
            .query(SELECT_CONSTRAINTS, &[&table.schema, &table.name])
            .await?
        {
            let name: String = row.get(0);
            let kind: String = row.get(1);
            let column: String = row.get(2);

            let kind = if kind == "PRIMARY KEY" {
                ConstraintKind::PrimaryKey
            } else {
                ConstraintKind::Unique
            };

            if previous_name.as_deref() == Some(name.as_str()) {
                if let Some(constraint) = constraints.last_mut() {
                    constraint.columns.push(column);
                }
            } else {
                constraints.push(TableConstraint {
                    kind,
                    columns: vec![column],
                });
                previous_name = Some(name);
            }
        }

        let comment: Option<String> = self
            .client
            .query_opt(SELECT_TABLE_COMMENT, &[&table.schema, &table.name])
            .await?
            .map(|row| row.get(0));
        let enums = comment
            .as_deref()
            .map(parse_enum_metadata)
            .unwrap_or_default();

        Ok(Some(TableMeta {
            columns,
            constraints,
            enums,
        }))
    }

    async fn execute(&mut self, sql: &str) -> SiphonResult<u64> {
        let affected = self.client.execute(sql, &[]).await?;
        debug!(affected, sql, "executed warehouse statement");

        Ok(affected)
    }

    async fn begin(&mut self) -> SiphonResult<()> {
        self.client.batch_execute("BEGIN").await?;
        Ok(())
    }

    async fn commit(&mut self) -> SiphonResult<()> {
        self.client.batch_execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> SiphonResult<()> {
        self.client.batch_execute("ROLLBACK").await?;
        Ok(())
    }

    async fn copy_rows(&mut self, table: &TableRef, artifact: String) -> SiphonResult<CopyOutcome> {
        let sink = self.client.copy_in(&Self::copy_statement(table)).await?;
        let mut sink = Box::pin(sink);

        sink.send(Bytes::from(artifact.into_bytes())).await?;
        let loaded = sink.as_mut().finish().await?;

        // COPY is all-or-nothing here: a bad record fails the whole statement rather
        // than producing per-row rejects.
        Ok(CopyOutcome {
            loaded,
            rejected: Vec::new(),
        })
    }

    async fn ensure_position_store(&mut self) -> SiphonResult<()> {
        self.client.batch_execute(CREATE_POSITIONS_TABLE).await?;
        Ok(())
    }

    async fn load_position(&mut self, source: &str) -> SiphonResult<Option<String>> {
        let row = self.client.query_opt(SELECT_POSITION, &[&source]).await?;
        Ok(row.map(|row| row.get(0)))
    }

    async fn save_position(&mut self, source: &str, position: &str) -> SiphonResult<()> {
        self.client
            .execute(UPSERT_POSITION, &[&source, &position])
            .await?;

        Ok(())
    }
}
