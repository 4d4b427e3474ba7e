//! `PassengerStore` — the durable record of passenger lifecycle events, per
//! spec §4.8.
//!
//! Reservoirs own the authoritative *live* state of a waiting passenger;
//! this store is the append/update log other services and the admin
//! dashboard read from, and the place the expiration sweep writes its
//! final `EXPIRED` status. Grounded on the repository shape of
//! `device_repo.rs`/`fixes_repo.rs`: a `Pool<ConnectionManager<PgConnection>>`
//! wrapped in a `*Store` struct, a pooled connection acquired synchronously
//! inside each async method body (the teacher does not `spawn_blocking` its
//! Diesel calls either), and `INSERT ... ON CONFLICT DO UPDATE` for
//! idempotent writes.

use crate::errors::CoreError;
use crate::geo_types::{Direction, Point};
use crate::passenger::{Passenger, PassengerStatus, SpawnKind};
use crate::schema::passengers;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::upsert::excluded;
use tracing::info;
use uuid::Uuid;

pub type PgPool = Pool<ConnectionManager<PgConnection>>;
type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Queryable, Debug)]
struct PassengerRow {
    id: Uuid,
    origin_lat: f64,
    origin_lon: f64,
    destination_lat: f64,
    destination_lon: f64,
    route_id: String,
    direction: String,
    priority: f64,
    spawn_time: DateTime<Utc>,
    expiry_time: DateTime<Utc>,
    status: String,
    assigned_vehicle: Option<String>,
    depot_id: Option<String>,
    kind: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Insertable, AsChangeset)]
#[diesel(table_name = passengers)]
struct PassengerInsert<'a> {
    id: Uuid,
    origin_lat: f64,
    origin_lon: f64,
    destination_lat: f64,
    destination_lon: f64,
    route_id: &'a str,
    direction: &'a str,
    priority: f64,
    spawn_time: DateTime<Utc>,
    expiry_time: DateTime<Utc>,
    status: &'a str,
    assigned_vehicle: Option<&'a str>,
    depot_id: Option<&'a str>,
    kind: &'a str,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn direction_str(d: Direction) -> &'static str {
    match d {
        Direction::Outbound => "outbound",
        Direction::Inbound => "inbound",
    }
}

fn parse_direction(s: &str) -> Result<Direction> {
    match s {
        "outbound" => Ok(Direction::Outbound),
        "inbound" => Ok(Direction::Inbound),
        other => anyhow::bail!("unknown direction {other}"),
    }
}

fn status_str(s: PassengerStatus) -> &'static str {
    match s {
        PassengerStatus::Waiting => "waiting",
        PassengerStatus::Onboard => "onboard",
        PassengerStatus::Alighted => "alighted",
        PassengerStatus::Expired => "expired",
    }
}

fn parse_status(s: &str) -> Result<PassengerStatus> {
    match s {
        "waiting" => Ok(PassengerStatus::Waiting),
        "onboard" => Ok(PassengerStatus::Onboard),
        "alighted" => Ok(PassengerStatus::Alighted),
        "expired" => Ok(PassengerStatus::Expired),
        other => anyhow::bail!("unknown passenger status {other}"),
    }
}

fn kind_str(k: SpawnKind) -> &'static str {
    match k {
        SpawnKind::Depot => "depot",
        SpawnKind::Route => "route",
    }
}

fn parse_kind(s: &str) -> Result<SpawnKind> {
    match s {
        "depot" => Ok(SpawnKind::Depot),
        "route" => Ok(SpawnKind::Route),
        other => anyhow::bail!("unknown spawn kind {other}"),
    }
}

impl TryFrom<PassengerRow> for Passenger {
    type Error = anyhow::Error;

    fn try_from(row: PassengerRow) -> Result<Self> {
        Ok(Passenger {
            id: row.id,
            origin: Point::new(row.origin_lat, row.origin_lon),
            destination: Point::new(row.destination_lat, row.destination_lon),
            route_id: row.route_id,
            direction: parse_direction(&row.direction)?,
            priority: row.priority,
            spawn_time: row.spawn_time,
            expiry_time: row.expiry_time,
            status: parse_status(&row.status)?,
            assigned_vehicle: row.assigned_vehicle,
            depot_id: row.depot_id,
            kind: parse_kind(&row.kind)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn to_insert(p: &Passenger) -> PassengerInsert<'_> {
    PassengerInsert {
        id: p.id,
        origin_lat: p.origin.lat,
        origin_lon: p.origin.lon,
        destination_lat: p.destination.lat,
        destination_lon: p.destination.lon,
        route_id: &p.route_id,
        direction: direction_str(p.direction),
        priority: p.priority,
        spawn_time: p.spawn_time,
        expiry_time: p.expiry_time,
        status: status_str(p.status),
        assigned_vehicle: p.assigned_vehicle.as_deref(),
        depot_id: p.depot_id.as_deref(),
        kind: kind_str(p.kind),
        created_at: p.created_at,
        updated_at: p.updated_at,
    }
}

/// Diesel/r2d2-backed durable record of passengers, per spec §4.8.
#[derive(Clone)]
pub struct PassengerStore {
    pool: PgPool,
}

impl PassengerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn get_connection(&self) -> Result<PgPooledConnection> {
        self.pool
            .get()
            .context("failed to get database connection from pool")
    }

    /// Insert a new passenger, or update its mutable columns in place if
    /// the id already exists (e.g. a retried spawn).
    pub async fn insert(&self, passenger: &Passenger) -> Result<()> {
        let mut conn = self.get_connection()?;
        let insert = to_insert(passenger);
        diesel::insert_into(passengers::table)
            .values(&insert)
            .on_conflict(passengers::id)
            .do_update()
            .set((
                passengers::status.eq(excluded(passengers::status)),
                passengers::assigned_vehicle.eq(excluded(passengers::assigned_vehicle)),
                passengers::depot_id.eq(excluded(passengers::depot_id)),
                passengers::updated_at.eq(excluded(passengers::updated_at)),
            ))
            .execute(&mut conn)
            .context("failed to insert passenger")?;
        Ok(())
    }

    /// Update a passenger's status and `updated_at` timestamp. Returns
    /// `CoreError::NotFound` if no row with that id exists.
    pub async fn mark(&self, id: Uuid, status: PassengerStatus, now: DateTime<Utc>) -> Result<()> {
        let mut conn = self.get_connection()?;
        let rows = diesel::update(passengers::table.filter(passengers::id.eq(id)))
            .set((
                passengers::status.eq(status_str(status)),
                passengers::updated_at.eq(now),
            ))
            .execute(&mut conn)
            .context("failed to update passenger status")?;

        if rows == 0 {
            return Err(CoreError::not_found(format!("passenger {id}")).into());
        }
        Ok(())
    }

    /// Sweep every `WAITING` row past `now` to `EXPIRED`, returning the
    /// number of rows touched. This is the durable counterpart to each
    /// reservoir's in-memory `expire_pass`, and is what makes restart-time
    /// recovery possible: a process crash leaves `WAITING` rows in the
    /// table that this sweep will still catch on the next tick.
    pub async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut conn = self.get_connection()?;
        let rows = diesel::update(
            passengers::table
                .filter(passengers::status.eq(status_str(PassengerStatus::Waiting)))
                .filter(passengers::expiry_time.le(now)),
        )
        .set((
            passengers::status.eq(status_str(PassengerStatus::Expired)),
            passengers::updated_at.eq(now),
        ))
        .execute(&mut conn)
        .context("failed to sweep expired passengers")?;

        if rows > 0 {
            info!(rows, "expiration sweep marked passengers EXPIRED");
        }
        Ok(rows)
    }

    /// All passengers for a route, optionally filtered by status, most
    /// recently updated first. Bounded by `limit` per spec §4.8's
    /// query-surface note (no unbounded scans).
    pub async fn query_by_route(
        &self,
        route_id: &str,
        status: Option<PassengerStatus>,
        limit: i64,
    ) -> Result<Vec<Passenger>> {
        let mut conn = self.get_connection()?;
        let mut query = passengers::table
            .filter(passengers::route_id.eq(route_id))
            .into_boxed();
        if let Some(status) = status {
            query = query.filter(passengers::status.eq(status_str(status)));
        }
        let rows = query
            .order(passengers::updated_at.desc())
            .limit(limit)
            .load::<PassengerRow>(&mut conn)
            .context("failed to query passengers by route")?;

        rows.into_iter().map(Passenger::try_from).collect()
    }

    /// All passengers whose origin falls within a lat/lon bounding box,
    /// optionally filtered by status, most recently updated first. Bounded
    /// by `limit`, the third dimension of spec §4.8's query surface
    /// alongside `query_by_route`.
    pub async fn query_by_bbox(
        &self,
        min_lat: f64,
        max_lat: f64,
        min_lon: f64,
        max_lon: f64,
        status: Option<PassengerStatus>,
        limit: i64,
    ) -> Result<Vec<Passenger>> {
        let mut conn = self.get_connection()?;
        let mut query = passengers::table
            .filter(passengers::origin_lat.between(min_lat, max_lat))
            .filter(passengers::origin_lon.between(min_lon, max_lon))
            .into_boxed();
        if let Some(status) = status {
            query = query.filter(passengers::status.eq(status_str(status)));
        }
        let rows = query
            .order(passengers::updated_at.desc())
            .limit(limit)
            .load::<PassengerRow>(&mut conn)
            .context("failed to query passengers by bounding box")?;

        rows.into_iter().map(Passenger::try_from).collect()
    }

    /// A single passenger by id, if it exists.
    pub async fn get(&self, id: Uuid) -> Result<Option<Passenger>> {
        let mut conn = self.get_connection()?;
        let row = passengers::table
            .filter(passengers::id.eq(id))
            .first::<PassengerRow>(&mut conn)
            .optional()
            .context("failed to query passenger by id")?;

        row.map(Passenger::try_from).transpose()
    }
}

/// Runs every pending migration against `conn`. Mirrors the
/// `diesel_migrations::embed_migrations!`/`MigrationHarness` idiom the
/// teacher uses in its integration-test harness (`tests/common/mod.rs`)
/// to spin up a fresh schema per test database.
pub fn run_pending_migrations(conn: &mut PgConnection) -> Result<()> {
    use diesel_migrations::MigrationHarness;
    const MIGRATIONS: diesel_migrations::EmbeddedMigrations =
        diesel_migrations::embed_migrations!("migrations");
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("failed to run passenger store migrations: {e}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_round_trips_through_its_string_form() {
        assert_eq!(parse_direction(direction_str(Direction::Outbound)).unwrap(), Direction::Outbound);
        assert_eq!(parse_direction(direction_str(Direction::Inbound)).unwrap(), Direction::Inbound);
    }

    #[test]
    fn status_round_trips_through_its_string_form() {
        for status in [
            PassengerStatus::Waiting,
            PassengerStatus::Onboard,
            PassengerStatus::Alighted,
            PassengerStatus::Expired,
        ] {
            assert_eq!(parse_status(status_str(status)).unwrap(), status);
        }
    }

    #[test]
    fn kind_round_trips_through_its_string_form() {
        assert_eq!(parse_kind(kind_str(SpawnKind::Depot)).unwrap(), SpawnKind::Depot);
        assert_eq!(parse_kind(kind_str(SpawnKind::Route)).unwrap(), SpawnKind::Route);
    }

    #[test]
    fn unknown_status_string_fails_to_parse() {
        assert!(parse_status("boarding_now").is_err());
    }
}
