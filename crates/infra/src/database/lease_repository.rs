//! SQLite-backed lease repository.
//!
//! Every mutating method runs one IMMEDIATE transaction so that occupancy
//! changes and lease row changes commit together or not at all, and
//! concurrent operations on the same port serialize. The occupancy guard is
//! a conditional UPDATE (`occupancy < capacity`), never a read-then-write.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use portbroker_core::lease::ports::{LeaseStore, ReleaseOutcome};
use portbroker_domain::{
    BrokerError, Lease, LeaseStatus, PortTier, ProxyCredential, RelayPortBlock, RelaySnapshot,
    Result, UpstreamAddr,
};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use tokio::task;

use super::manager::{map_sql_error, DbManager};
use crate::errors::map_join_error;

/// Lease repository backed by SQLite.
pub struct SqliteLeaseRepository {
    db: Arc<DbManager>,
}

impl SqliteLeaseRepository {
    /// Construct a repository backed by the shared database manager.
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LeaseStore for SqliteLeaseRepository {
    async fn insert_active(&self, lease: &Lease) -> Result<()> {
        let db = Arc::clone(&self.db);
        let lease = lease.clone();
        task::spawn_blocking(move || -> Result<()> {
            let mut conn = db.get_connection()?;
            insert_active_tx(&mut conn, &lease)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn get(&self, lease_id: &str) -> Result<Option<Lease>> {
        let db = Arc::clone(&self.db);
        let lease_id = lease_id.to_string();
        task::spawn_blocking(move || -> Result<Option<Lease>> {
            let conn = db.get_connection()?;
            get_lease(&conn, &lease_id)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn release(&self, lease_id: &str, released_at: DateTime<Utc>) -> Result<ReleaseOutcome> {
        let db = Arc::clone(&self.db);
        let lease_id = lease_id.to_string();
        task::spawn_blocking(move || -> Result<ReleaseOutcome> {
            let mut conn = db.get_connection()?;
            release_tx(&mut conn, &lease_id, released_at)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn update_credential(
        &self,
        lease_id: &str,
        credential: &ProxyCredential,
        rotated_at: DateTime<Utc>,
    ) -> Result<Lease> {
        let db = Arc::clone(&self.db);
        let lease_id = lease_id.to_string();
        let credential = credential.clone();
        task::spawn_blocking(move || -> Result<Lease> {
            let mut conn = db.get_connection()?;
            update_credential_tx(&mut conn, &lease_id, &credential, rotated_at)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn migrate(&self, lease_id: &str, new_region: &str) -> Result<Lease> {
        let db = Arc::clone(&self.db);
        let lease_id = lease_id.to_string();
        let new_region = new_region.to_string();
        task::spawn_blocking(move || -> Result<Lease> {
            let mut conn = db.get_connection()?;
            migrate_tx(&mut conn, &lease_id, &new_region)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn active_by_owner(&self, owner_id: &str) -> Result<Vec<Lease>> {
        let db = Arc::clone(&self.db);
        let owner_id = owner_id.to_string();
        task::spawn_blocking(move || -> Result<Vec<Lease>> {
            let conn = db.get_connection()?;
            let mut stmt = conn
                .prepare(&format!(
                    "{SELECT_LEASE_BASE} WHERE owner_id = ?1 AND status = 'active' ORDER BY created_at"
                ))
                .map_err(map_sql_error)?;
            let rows = stmt
                .query_map(params![owner_id], map_lease_row)
                .map_err(map_sql_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_sql_error)?;
            Ok(rows)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn has_active_for_owner(&self, owner_id: &str, port_id: &str) -> Result<bool> {
        let db = Arc::clone(&self.db);
        let owner_id = owner_id.to_string();
        let port_id = port_id.to_string();
        task::spawn_blocking(move || -> Result<bool> {
            let conn = db.get_connection()?;
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM leases
                     WHERE owner_id = ?1 AND port_id = ?2 AND status = 'active'",
                    params![owner_id, port_id],
                    |row| row.get(0),
                )
                .map_err(map_sql_error)?;
            Ok(count > 0)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn active_usernames_on_port(&self, port_id: &str) -> Result<Vec<String>> {
        let db = Arc::clone(&self.db);
        let port_id = port_id.to_string();
        task::spawn_blocking(move || -> Result<Vec<String>> {
            let conn = db.get_connection()?;
            let mut stmt = conn
                .prepare("SELECT username FROM leases WHERE port_id = ?1 AND status = 'active'")
                .map_err(map_sql_error)?;
            let rows = stmt
                .query_map(params![port_id], |row| row.get(0))
                .map_err(map_sql_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_sql_error)?;
            Ok(rows)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn due_lease_ids(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> Result<Vec<String>> {
            let conn = db.get_connection()?;
            let mut stmt = conn
                .prepare(
                    "SELECT id FROM leases
                     WHERE status = 'active' AND expires_at <= ?1
                     ORDER BY expires_at",
                )
                .map_err(map_sql_error)?;
            let rows = stmt
                .query_map(params![now.timestamp()], |row| row.get(0))
                .map_err(map_sql_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_sql_error)?;
            Ok(rows)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn relay_snapshot(&self) -> Result<RelaySnapshot> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> Result<RelaySnapshot> {
            let conn = db.get_connection()?;
            relay_snapshot_query(&conn)
        })
        .await
        .map_err(map_join_error)?
    }
}

const SELECT_LEASE_BASE: &str = "SELECT id, owner_id, port_id, tier, username, password,
        created_at, expires_at, rotated_at, rotation_interval_minutes,
        status, released_at
    FROM leases";

const INSERT_LEASE_SQL: &str = "INSERT INTO leases (
        id, owner_id, port_id, tier, username, password,
        created_at, expires_at, rotated_at, rotation_interval_minutes,
        status, released_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9, 'active', NULL)";

// The guard doubles as the capacity check: zero rows changed means the
// port is missing, inactive, or full, diagnosed afterwards inside the same
// transaction.
const OCCUPY_SLOT_SQL: &str = "UPDATE port_endpoints
    SET occupancy = occupancy + 1
    WHERE id = ?1 AND active = 1 AND occupancy < capacity";

const VACATE_SLOT_SQL: &str = "UPDATE port_endpoints
    SET occupancy = occupancy - 1
    WHERE id = ?1 AND occupancy > 0";

fn insert_active_tx(conn: &mut Connection, lease: &Lease) -> Result<()> {
    let tx =
        conn.transaction_with_behavior(TransactionBehavior::Immediate).map_err(map_sql_error)?;

    let occupied = tx.execute(OCCUPY_SLOT_SQL, params![lease.port_id]).map_err(map_sql_error)?;
    if occupied == 0 {
        let port: Option<(bool, u32, u32)> = tx
            .query_row(
                "SELECT active, occupancy, capacity FROM port_endpoints WHERE id = ?1",
                params![lease.port_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(map_sql_error)?;
        return Err(match port {
            None => BrokerError::NotFound(format!("port {}", lease.port_id)),
            Some((false, _, _)) => BrokerError::PortInactive(lease.port_id.clone()),
            Some((true, occupancy, capacity)) => BrokerError::CapacityExceeded(format!(
                "port {} is full ({occupancy}/{capacity})",
                lease.port_id
            )),
        });
    }

    tx.execute(
        INSERT_LEASE_SQL,
        params![
            lease.id,
            lease.owner_id,
            lease.port_id,
            lease.tier.to_string(),
            lease.credential.username,
            lease.credential.password,
            lease.created_at.timestamp(),
            lease.expires_at.timestamp(),
            lease.rotation_interval_minutes,
        ],
    )
    .map_err(map_sql_error)?;

    tx.commit().map_err(map_sql_error)?;
    Ok(())
}

fn release_tx(
    conn: &mut Connection,
    lease_id: &str,
    released_at: DateTime<Utc>,
) -> Result<ReleaseOutcome> {
    let tx =
        conn.transaction_with_behavior(TransactionBehavior::Immediate).map_err(map_sql_error)?;

    let transitioned = tx
        .execute(
            "UPDATE leases SET status = 'expired', released_at = ?2
             WHERE id = ?1 AND status = 'active'",
            params![lease_id, released_at.timestamp()],
        )
        .map_err(map_sql_error)?;

    if transitioned == 0 {
        // Distinguish the idempotent no-op from an unknown lease.
        let exists: Option<String> = tx
            .query_row("SELECT id FROM leases WHERE id = ?1", params![lease_id], |row| row.get(0))
            .optional()
            .map_err(map_sql_error)?;
        tx.commit().map_err(map_sql_error)?;
        return match exists {
            Some(_) => Ok(ReleaseOutcome::AlreadyExpired),
            None => Err(BrokerError::NotFound(format!("lease {lease_id}"))),
        };
    }

    let lease = get_lease_in_tx(&tx, lease_id)?
        .ok_or_else(|| BrokerError::Internal(format!("lease {lease_id} vanished mid-release")))?;
    tx.execute(VACATE_SLOT_SQL, params![lease.port_id]).map_err(map_sql_error)?;

    tx.commit().map_err(map_sql_error)?;
    Ok(ReleaseOutcome::Released(lease))
}

fn update_credential_tx(
    conn: &mut Connection,
    lease_id: &str,
    credential: &ProxyCredential,
    rotated_at: DateTime<Utc>,
) -> Result<Lease> {
    let tx =
        conn.transaction_with_behavior(TransactionBehavior::Immediate).map_err(map_sql_error)?;

    let updated = tx
        .execute(
            "UPDATE leases SET username = ?2, password = ?3, rotated_at = ?4
             WHERE id = ?1 AND status = 'active'",
            params![lease_id, credential.username, credential.password, rotated_at.timestamp()],
        )
        .map_err(map_sql_error)?;

    if updated == 0 {
        let existing = get_lease_in_tx(&tx, lease_id)?;
        return Err(match existing {
            None => BrokerError::NotFound(format!("lease {lease_id}")),
            Some(_) => BrokerError::AlreadyTerminal(lease_id.to_string()),
        });
    }

    let lease = get_lease_in_tx(&tx, lease_id)?
        .ok_or_else(|| BrokerError::Internal(format!("lease {lease_id} vanished mid-rotate")))?;
    tx.commit().map_err(map_sql_error)?;
    Ok(lease)
}

fn migrate_tx(conn: &mut Connection, lease_id: &str, new_region: &str) -> Result<Lease> {
    let tx =
        conn.transaction_with_behavior(TransactionBehavior::Immediate).map_err(map_sql_error)?;

    let lease = get_lease_in_tx(&tx, lease_id)?
        .ok_or_else(|| BrokerError::NotFound(format!("lease {lease_id}")))?;
    if lease.status != LeaseStatus::Active {
        return Err(BrokerError::AlreadyTerminal(lease_id.to_string()));
    }

    // Same tier, free capacity, target region; ports the owner already
    // leases (or where the username is taken) are not eligible.
    let candidate: Option<String> = tx
        .query_row(
            "SELECT id FROM port_endpoints
             WHERE region = ?1 AND tier = ?2 AND active = 1
               AND occupancy < capacity AND id != ?3
               AND id NOT IN (
                   SELECT port_id FROM leases WHERE owner_id = ?4 AND status = 'active'
               )
               AND id NOT IN (
                   SELECT port_id FROM leases WHERE username = ?5 AND status = 'active'
               )
             ORDER BY (capacity - occupancy) DESC, id
             LIMIT 1",
            params![
                new_region,
                lease.tier.to_string(),
                lease.port_id,
                lease.owner_id,
                lease.credential.username
            ],
            |row| row.get(0),
        )
        .optional()
        .map_err(map_sql_error)?;

    let Some(new_port_id) = candidate else {
        return Err(BrokerError::NoCapacity(format!(
            "no {} port with free capacity in {new_region}",
            lease.tier
        )));
    };

    let occupied = tx.execute(OCCUPY_SLOT_SQL, params![new_port_id]).map_err(map_sql_error)?;
    if occupied == 0 {
        return Err(BrokerError::NoCapacity(format!(
            "port {new_port_id} filled up during migration"
        )));
    }
    tx.execute(VACATE_SLOT_SQL, params![lease.port_id]).map_err(map_sql_error)?;
    tx.execute("UPDATE leases SET port_id = ?2 WHERE id = ?1", params![lease_id, new_port_id])
        .map_err(map_sql_error)?;

    let moved = get_lease_in_tx(&tx, lease_id)?
        .ok_or_else(|| BrokerError::Internal(format!("lease {lease_id} vanished mid-migrate")))?;
    tx.commit().map_err(map_sql_error)?;
    Ok(moved)
}

fn get_lease(conn: &Connection, lease_id: &str) -> Result<Option<Lease>> {
    conn.query_row(&format!("{SELECT_LEASE_BASE} WHERE id = ?1"), params![lease_id], map_lease_row)
        .optional()
        .map_err(map_sql_error)
}

fn get_lease_in_tx(tx: &Transaction<'_>, lease_id: &str) -> Result<Option<Lease>> {
    tx.query_row(&format!("{SELECT_LEASE_BASE} WHERE id = ?1"), params![lease_id], map_lease_row)
        .optional()
        .map_err(map_sql_error)
}

// Shared tiers only: dedicated leases bypass the relay entirely. One query
// keeps the snapshot consistent; assembling it from several reads could
// include a lease released in between.
const RELAY_SNAPSHOT_SQL: &str = "SELECT p.id, p.public_port, p.upstream_host,
        p.upstream_port, p.upstream_username, p.upstream_password,
        l.username, l.password
    FROM leases l
    JOIN port_endpoints p ON p.id = l.port_id
    WHERE l.status = 'active'
      AND p.tier IN ('shared_standard', 'shared_premium')
      AND p.upstream_host IS NOT NULL
    ORDER BY p.id, l.username";

fn relay_snapshot_query(conn: &Connection) -> Result<RelaySnapshot> {
    let mut stmt = conn.prepare(RELAY_SNAPSHOT_SQL).map_err(map_sql_error)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u16>(1)?,
                UpstreamAddr {
                    host: row.get(2)?,
                    port: row.get(3)?,
                    username: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                    password: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                },
                ProxyCredential { username: row.get(6)?, password: row.get(7)? },
            ))
        })
        .map_err(map_sql_error)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(map_sql_error)?;

    let mut snapshot = RelaySnapshot::default();
    for (port_id, bind_port, upstream, credential) in rows {
        match snapshot.blocks.last_mut() {
            Some(block) if block.port_id == port_id => block.credentials.push(credential),
            _ => snapshot.blocks.push(RelayPortBlock {
                port_id,
                bind_port,
                upstream,
                credentials: vec![credential],
            }),
        }
    }
    Ok(snapshot)
}

fn map_lease_row(row: &Row<'_>) -> rusqlite::Result<Lease> {
    let tier_text: String = row.get(3)?;
    let tier = PortTier::from_str(&tier_text).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, err.into())
    })?;
    let status_text: String = row.get(10)?;
    let status = LeaseStatus::from_str(&status_text).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(10, rusqlite::types::Type::Text, err.into())
    })?;

    Ok(Lease {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        port_id: row.get(2)?,
        tier,
        credential: ProxyCredential { username: row.get(4)?, password: row.get(5)? },
        created_at: timestamp_column(row, 6)?,
        expires_at: timestamp_column(row, 7)?,
        rotated_at: optional_timestamp_column(row, 8)?,
        rotation_interval_minutes: row.get(9)?,
        status,
        released_at: optional_timestamp_column(row, 11)?,
    })
}

fn timestamp_column(row: &Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let seconds: i64 = row.get(index)?;
    timestamp_from_seconds(index, seconds)
}

fn optional_timestamp_column(
    row: &Row<'_>,
    index: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let seconds: Option<i64> = row.get(index)?;
    seconds.map(|s| timestamp_from_seconds(index, s)).transpose()
}

fn timestamp_from_seconds(index: usize, seconds: i64) -> rusqlite::Result<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0).single().ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Integer,
            format!("timestamp {seconds} out of range").into(),
        )
    })
}
