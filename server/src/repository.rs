//! Narrow read/write contracts the engine depends on, and their SQLite
//! implementation. Works over a plain connection or an open transaction.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

use toll_shared::model::{Fine, Gate, Plate, Route, Transit, Vehicle, VehicleType, timestamp};

use crate::error::EngineError;

pub(crate) const SCHEMA: &str = "
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS gates (
    id INTEGER PRIMARY KEY,
    highway TEXT NOT NULL,
    km REAL NOT NULL,
    smart INTEGER NOT NULL DEFAULT 0,
    raining INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS routes (
    id INTEGER PRIMARY KEY,
    entry_gate_id INTEGER NOT NULL REFERENCES gates(id),
    exit_gate_id INTEGER NOT NULL REFERENCES gates(id),
    distance REAL NOT NULL CHECK (distance >= 0),
    CHECK (entry_gate_id <> exit_gate_id)
);

CREATE TABLE IF NOT EXISTS vehicle_types (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    speed_limit INTEGER NOT NULL CHECK (speed_limit > 0)
);

CREATE TABLE IF NOT EXISTS vehicles (
    plate TEXT PRIMARY KEY,
    vehicle_type_id INTEGER NOT NULL REFERENCES vehicle_types(id),
    owner_id INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS gate_devices (
    user_id INTEGER PRIMARY KEY,
    gate_id INTEGER NOT NULL REFERENCES gates(id)
);

CREATE TABLE IF NOT EXISTS transits (
    id INTEGER PRIMARY KEY,
    plate TEXT NOT NULL,
    route_id INTEGER NOT NULL REFERENCES routes(id),
    entry_at INTEGER NOT NULL,
    exit_at INTEGER NOT NULL,
    average_speed REAL NOT NULL,
    speed_delta REAL NOT NULL,
    UNIQUE (plate, route_id, entry_at, exit_at)
);

CREATE INDEX IF NOT EXISTS transits_by_plate ON transits (plate, entry_at, exit_at);

CREATE TABLE IF NOT EXISTS fines (
    id INTEGER PRIMARY KEY,
    transit_id INTEGER NOT NULL UNIQUE REFERENCES transits(id),
    payment_id TEXT NOT NULL UNIQUE,
    amount REAL NOT NULL CHECK (amount > 0)
);
";

const TRANSIT_COLUMNS: &str =
    "t.id, t.plate, t.route_id, t.entry_at, t.exit_at, t.average_speed, t.speed_delta";

pub trait ReferenceReader {
    fn find_vehicle(&self, plate: &Plate) -> Result<Option<Vehicle>, EngineError>;
    fn find_vehicle_type(&self, id: i64) -> Result<Option<VehicleType>, EngineError>;
    fn find_route(&self, id: i64) -> Result<Option<Route>, EngineError>;
    fn find_route_by_exit_gate(&self, gate_id: i64) -> Result<Option<Route>, EngineError>;
    fn find_gate(&self, id: i64) -> Result<Option<Gate>, EngineError>;
    /// Gate bound to a gate-device user, if any.
    fn find_gate_binding(&self, user_id: i64) -> Result<Option<i64>, EngineError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTransit {
    pub plate: Plate,
    pub route_id: i64,
    pub entry_at: DateTime<Utc>,
    pub exit_at: DateTime<Utc>,
    pub average_speed: f64,
    pub speed_delta: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewFine {
    pub transit_id: i64,
    pub payment_id: String,
    pub amount: f64,
}

pub trait TransitWriter {
    fn create_transit(&self, transit: &NewTransit) -> Result<Transit, EngineError>;
    fn create_fine(&self, fine: &NewFine) -> Result<Fine, EngineError>;
}

pub trait FineReader {
    /// Transits for `plates` whose `[entry, exit]` interval overlaps
    /// `[from, to]`, optionally restricted to vehicles owned by `owner_id`.
    fn find_transits_in_window(
        &self,
        plates: &[Plate],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        owner_id: Option<i64>,
    ) -> Result<Vec<Transit>, EngineError>;
    fn find_fines_for_transits(&self, transit_ids: &[i64]) -> Result<Vec<Fine>, EngineError>;
    fn find_fine(&self, id: i64) -> Result<Option<Fine>, EngineError>;
    fn find_transit(&self, id: i64) -> Result<Option<Transit>, EngineError>;
}

pub struct SqliteRepository<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        SqliteRepository { conn }
    }
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(millis: i64, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        rusqlite::Error::IntegralValueOutOfRange(column, millis)
    })
}

fn plate_column(row: &Row, column: usize) -> rusqlite::Result<Plate> {
    let raw: String = row.get(column)?;
    raw.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })
}

pub(crate) fn gate_from_row(row: &Row) -> rusqlite::Result<Gate> {
    Ok(Gate {
        id: row.get(0)?,
        highway: row.get(1)?,
        km: row.get(2)?,
        smart: row.get(3)?,
        raining: row.get(4)?,
    })
}

pub(crate) fn route_from_row(row: &Row) -> rusqlite::Result<Route> {
    Ok(Route {
        id: row.get(0)?,
        entry_gate_id: row.get(1)?,
        exit_gate_id: row.get(2)?,
        distance: row.get(3)?,
    })
}

fn transit_from_row(row: &Row) -> rusqlite::Result<Transit> {
    Ok(Transit {
        id: row.get(0)?,
        plate: plate_column(row, 1)?,
        route_id: row.get(2)?,
        entry_at: from_millis(row.get(3)?, 3)?,
        exit_at: from_millis(row.get(4)?, 4)?,
        average_speed: row.get(5)?,
        speed_delta: row.get(6)?,
    })
}

fn fine_from_row(row: &Row) -> rusqlite::Result<Fine> {
    Ok(Fine {
        id: row.get(0)?,
        transit_id: row.get(1)?,
        payment_id: row.get(2)?,
        amount: row.get(3)?,
    })
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation
                && failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

impl ReferenceReader for SqliteRepository<'_> {
    fn find_vehicle(&self, plate: &Plate) -> Result<Option<Vehicle>, EngineError> {
        let vehicle = self
            .conn
            .query_row(
                "SELECT plate, vehicle_type_id, owner_id FROM vehicles WHERE plate = ?1",
                [plate.as_str()],
                |row| {
                    Ok(Vehicle {
                        plate: plate_column(row, 0)?,
                        vehicle_type_id: row.get(1)?,
                        owner_id: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(vehicle)
    }

    fn find_vehicle_type(&self, id: i64) -> Result<Option<VehicleType>, EngineError> {
        let vehicle_type = self
            .conn
            .query_row(
                "SELECT id, name, speed_limit FROM vehicle_types WHERE id = ?1",
                [id],
                |row| {
                    Ok(VehicleType {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        speed_limit: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(vehicle_type)
    }

    fn find_route(&self, id: i64) -> Result<Option<Route>, EngineError> {
        let route = self
            .conn
            .query_row(
                "SELECT id, entry_gate_id, exit_gate_id, distance FROM routes WHERE id = ?1",
                [id],
                route_from_row,
            )
            .optional()?;
        Ok(route)
    }

    fn find_route_by_exit_gate(&self, gate_id: i64) -> Result<Option<Route>, EngineError> {
        // Lowest id wins when several routes end at the same gate.
        let route = self
            .conn
            .query_row(
                "SELECT id, entry_gate_id, exit_gate_id, distance FROM routes
                 WHERE exit_gate_id = ?1 ORDER BY id LIMIT 1",
                [gate_id],
                route_from_row,
            )
            .optional()?;
        Ok(route)
    }

    fn find_gate(&self, id: i64) -> Result<Option<Gate>, EngineError> {
        let gate = self
            .conn
            .query_row(
                "SELECT id, highway, km, smart, raining FROM gates WHERE id = ?1",
                [id],
                gate_from_row,
            )
            .optional()?;
        Ok(gate)
    }

    fn find_gate_binding(&self, user_id: i64) -> Result<Option<i64>, EngineError> {
        let gate_id = self
            .conn
            .query_row(
                "SELECT gate_id FROM gate_devices WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(gate_id)
    }
}

impl TransitWriter for SqliteRepository<'_> {
    fn create_transit(&self, transit: &NewTransit) -> Result<Transit, EngineError> {
        let inserted = self.conn.execute(
            "INSERT INTO transits (plate, route_id, entry_at, exit_at, average_speed, speed_delta)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                transit.plate.as_str(),
                transit.route_id,
                to_millis(transit.entry_at),
                to_millis(transit.exit_at),
                transit.average_speed,
                transit.speed_delta,
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(EngineError::BadRequest(format!(
                    "transit for {} on route {} is already recorded",
                    transit.plate, transit.route_id
                )));
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Transit {
            id: self.conn.last_insert_rowid(),
            plate: transit.plate.clone(),
            route_id: transit.route_id,
            entry_at: timestamp::truncate_millis(transit.entry_at),
            exit_at: timestamp::truncate_millis(transit.exit_at),
            average_speed: transit.average_speed,
            speed_delta: transit.speed_delta,
        })
    }

    fn create_fine(&self, fine: &NewFine) -> Result<Fine, EngineError> {
        self.conn.execute(
            "INSERT INTO fines (transit_id, payment_id, amount) VALUES (?1, ?2, ?3)",
            params![fine.transit_id, fine.payment_id, fine.amount],
        )?;

        Ok(Fine {
            id: self.conn.last_insert_rowid(),
            transit_id: fine.transit_id,
            payment_id: fine.payment_id.clone(),
            amount: fine.amount,
        })
    }
}

impl FineReader for SqliteRepository<'_> {
    fn find_transits_in_window(
        &self,
        plates: &[Plate],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        owner_id: Option<i64>,
    ) -> Result<Vec<Transit>, EngineError> {
        if plates.is_empty() {
            return Ok(vec![]);
        }

        let (from, to) = (to_millis(from), to_millis(to));
        let mut sql = format!(
            "SELECT {TRANSIT_COLUMNS} FROM transits t
             WHERE t.plate IN ({})
               AND ((t.entry_at BETWEEN ? AND ?)
                 OR (t.exit_at BETWEEN ? AND ?)
                 OR (t.entry_at <= ? AND t.exit_at >= ?))",
            placeholders(plates.len())
        );
        let mut values: Vec<rusqlite::types::Value> = plates
            .iter()
            .map(|p| rusqlite::types::Value::Text(p.to_string()))
            .collect();
        for millis in [from, to, from, to, from, to] {
            values.push(rusqlite::types::Value::Integer(millis));
        }
        if let Some(owner_id) = owner_id {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM vehicles v WHERE v.plate = t.plate AND v.owner_id = ?)",
            );
            values.push(rusqlite::types::Value::Integer(owner_id));
        }
        sql.push_str(" ORDER BY t.entry_at, t.id");

        let mut stmt = self.conn.prepare(&sql)?;
        let transits = stmt
            .query_map(params_from_iter(values), transit_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(transits)
    }

    fn find_fines_for_transits(&self, transit_ids: &[i64]) -> Result<Vec<Fine>, EngineError> {
        if transit_ids.is_empty() {
            return Ok(vec![]);
        }

        let sql = format!(
            "SELECT id, transit_id, payment_id, amount FROM fines
             WHERE transit_id IN ({}) ORDER BY id",
            placeholders(transit_ids.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let fines = stmt
            .query_map(params_from_iter(transit_ids), fine_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(fines)
    }

    fn find_fine(&self, id: i64) -> Result<Option<Fine>, EngineError> {
        let fine = self
            .conn
            .query_row(
                "SELECT id, transit_id, payment_id, amount FROM fines WHERE id = ?1",
                [id],
                fine_from_row,
            )
            .optional()?;
        Ok(fine)
    }

    fn find_transit(&self, id: i64) -> Result<Option<Transit>, EngineError> {
        let transit = self
            .conn
            .query_row(
                &format!("SELECT {TRANSIT_COLUMNS} FROM transits t WHERE t.id = ?1"),
                [id],
                transit_from_row,
            )
            .optional()?;
        Ok(transit)
    }
}

/// Opens the schema on a fresh connection.
pub fn migrate(conn: &Connection) -> Result<(), EngineError> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RecordCounts {
    pub transits: i64,
    pub fines: i64,
}

#[cfg(test)]
pub(crate) fn count_records(conn: &Connection) -> Result<RecordCounts, EngineError> {
    let transits = conn.query_row("SELECT COUNT(*) FROM transits", [], |row| row.get(0))?;
    let fines = conn.query_row("SELECT COUNT(*) FROM fines", [], |row| row.get(0))?;
    Ok(RecordCounts { transits, fines })
}
