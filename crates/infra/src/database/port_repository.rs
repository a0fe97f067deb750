//! SQLite-backed endpoint inventory repository.
//!
//! Implements the `PortStore` port. Upserts keep locally-assigned routing
//! fields sticky: an existing row only ever receives upstream connectivity,
//! region, and refresh-timestamp updates. Occupancy is never touched here;
//! that column belongs to the lease repository's transactions.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use portbroker_core::inventory::ports::{PortStore, UpsertOutcome};
use portbroker_domain::{
    BrokerError, PortEndpoint, PortFilter, PortTier, Result, TierOccupancy, UpstreamAddr,
};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tokio::task;

use super::manager::{map_sql_error, DbManager};
use crate::errors::map_join_error;

/// Endpoint inventory repository backed by SQLite.
pub struct SqlitePortRepository {
    db: Arc<DbManager>,
}

impl SqlitePortRepository {
    /// Construct a repository backed by the shared database manager.
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PortStore for SqlitePortRepository {
    async fn upsert(&self, endpoint: &PortEndpoint) -> Result<UpsertOutcome> {
        let db = Arc::clone(&self.db);
        let endpoint = endpoint.clone();
        task::spawn_blocking(move || -> Result<UpsertOutcome> {
            let mut conn = db.get_connection()?;
            upsert_endpoint(&mut conn, &endpoint)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn get(&self, port_id: &str) -> Result<Option<PortEndpoint>> {
        let db = Arc::clone(&self.db);
        let port_id = port_id.to_string();
        task::spawn_blocking(move || -> Result<Option<PortEndpoint>> {
            let conn = db.get_connection()?;
            conn.query_row(
                &format!("{SELECT_PORT_BASE} WHERE id = ?1"),
                params![port_id],
                map_port_row,
            )
            .optional()
            .map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn get_by_provider_ref(&self, provider_ref: &str) -> Result<Option<PortEndpoint>> {
        let db = Arc::clone(&self.db);
        let provider_ref = provider_ref.to_string();
        task::spawn_blocking(move || -> Result<Option<PortEndpoint>> {
            let conn = db.get_connection()?;
            conn.query_row(
                &format!("{SELECT_PORT_BASE} WHERE provider_ref = ?1"),
                params![provider_ref],
                map_port_row,
            )
            .optional()
            .map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn list(&self, filter: &PortFilter) -> Result<Vec<PortEndpoint>> {
        let db = Arc::clone(&self.db);
        let filter = filter.clone();
        task::spawn_blocking(move || -> Result<Vec<PortEndpoint>> {
            let conn = db.get_connection()?;
            list_endpoints(&conn, &filter)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn occupancy_summary(&self) -> Result<Vec<TierOccupancy>> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> Result<Vec<TierOccupancy>> {
            let conn = db.get_connection()?;
            let mut stmt = conn.prepare(OCCUPANCY_SUMMARY_SQL).map_err(map_sql_error)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, u32>(2)?,
                        row.get::<_, u32>(3)?,
                        row.get::<_, u32>(4)?,
                    ))
                })
                .map_err(map_sql_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_sql_error)?;

            rows.into_iter()
                .map(|(tier, region, ports, capacity, occupancy)| {
                    Ok(TierOccupancy {
                        tier: parse_tier(&tier)?,
                        region,
                        ports,
                        capacity,
                        occupancy,
                    })
                })
                .collect()
        })
        .await
        .map_err(map_join_error)?
    }
}

const SELECT_PORT_BASE: &str = "SELECT id, public_host, public_port, upstream_host, upstream_port,
        upstream_username, upstream_password, tier, capacity, occupancy,
        region, active, provider_ref, imported_at, refreshed_at
    FROM port_endpoints";

const INSERT_PORT_SQL: &str = "INSERT INTO port_endpoints (
        id, public_host, public_port, upstream_host, upstream_port,
        upstream_username, upstream_password, tier, capacity, occupancy,
        region, active, provider_ref, imported_at, refreshed_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10, ?11, ?12, ?13, NULL)";

const REFRESH_PORT_SQL: &str = "UPDATE port_endpoints SET
        upstream_host = ?2, upstream_port = ?3, upstream_username = ?4,
        upstream_password = ?5, region = ?6, refreshed_at = ?7
    WHERE id = ?1";

const OCCUPANCY_SUMMARY_SQL: &str = "SELECT tier, region, COUNT(*),
        SUM(capacity), SUM(occupancy)
    FROM port_endpoints
    WHERE active = 1
    GROUP BY tier, region
    ORDER BY tier, region";

fn upsert_endpoint(conn: &mut Connection, endpoint: &PortEndpoint) -> Result<UpsertOutcome> {
    let tx =
        conn.transaction_with_behavior(TransactionBehavior::Immediate).map_err(map_sql_error)?;

    let existing_id: Option<String> = match &endpoint.provider_ref {
        Some(provider_ref) => tx
            .query_row(
                "SELECT id FROM port_endpoints WHERE provider_ref = ?1",
                params![provider_ref],
                |row| row.get(0),
            )
            .optional()
            .map_err(map_sql_error)?,
        None => tx
            .query_row("SELECT id FROM port_endpoints WHERE id = ?1", params![endpoint.id], |row| {
                row.get(0)
            })
            .optional()
            .map_err(map_sql_error)?,
    };

    let (up_host, up_port, up_user, up_pass) = upstream_columns(endpoint);
    let outcome = match existing_id {
        Some(id) => {
            tx.execute(
                REFRESH_PORT_SQL,
                params![
                    id,
                    up_host,
                    up_port,
                    up_user,
                    up_pass,
                    endpoint.region,
                    Utc::now().timestamp()
                ],
            )
            .map_err(map_sql_error)?;
            UpsertOutcome::Refreshed
        }
        None => {
            tx.execute(
                INSERT_PORT_SQL,
                params![
                    endpoint.id,
                    endpoint.public_host,
                    endpoint.public_port,
                    up_host,
                    up_port,
                    up_user,
                    up_pass,
                    endpoint.tier.to_string(),
                    endpoint.capacity,
                    endpoint.region,
                    endpoint.active,
                    endpoint.provider_ref,
                    endpoint.imported_at,
                ],
            )
            .map_err(map_sql_error)?;
            UpsertOutcome::Inserted
        }
    };

    tx.commit().map_err(map_sql_error)?;
    Ok(outcome)
}

fn list_endpoints(conn: &Connection, filter: &PortFilter) -> Result<Vec<PortEndpoint>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(tier) = filter.tier {
        clauses.push("tier = ?");
        values.push(Value::Text(tier.to_string()));
    }
    if let Some(region) = &filter.region {
        clauses.push("region = ?");
        values.push(Value::Text(region.clone()));
    }
    if let Some(active) = filter.active {
        clauses.push("active = ?");
        values.push(Value::Integer(i64::from(active)));
    }

    let sql = if clauses.is_empty() {
        format!("{SELECT_PORT_BASE} ORDER BY id")
    } else {
        format!("{SELECT_PORT_BASE} WHERE {} ORDER BY id", clauses.join(" AND "))
    };

    let mut stmt = conn.prepare(&sql).map_err(map_sql_error)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(values), map_port_row)
        .map_err(map_sql_error)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(map_sql_error)?;
    Ok(rows)
}

pub(crate) fn map_port_row(row: &Row<'_>) -> rusqlite::Result<PortEndpoint> {
    let upstream_host: Option<String> = row.get(3)?;
    let upstream = match upstream_host {
        Some(host) => Some(UpstreamAddr {
            host,
            port: row.get(4)?,
            username: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            password: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        }),
        None => None,
    };

    let tier_text: String = row.get(7)?;
    let tier = PortTier::from_str(&tier_text).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            rusqlite::types::Type::Text,
            err.into(),
        )
    })?;

    Ok(PortEndpoint {
        id: row.get(0)?,
        public_host: row.get(1)?,
        public_port: row.get(2)?,
        upstream,
        tier,
        capacity: row.get(8)?,
        occupancy: row.get(9)?,
        region: row.get(10)?,
        active: row.get(11)?,
        provider_ref: row.get(12)?,
        imported_at: row.get(13)?,
        refreshed_at: row.get(14)?,
    })
}

fn upstream_columns(
    endpoint: &PortEndpoint,
) -> (Option<String>, Option<u16>, Option<String>, Option<String>) {
    match &endpoint.upstream {
        Some(up) => {
            (Some(up.host.clone()), Some(up.port), Some(up.username.clone()), Some(up.password.clone()))
        }
        None => (None, None, None, None),
    }
}

fn parse_tier(text: &str) -> Result<PortTier> {
    PortTier::from_str(text).map_err(BrokerError::Database)
}
