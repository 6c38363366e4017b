//! Writes for the reference data the engine reads: gates, vehicle types,
//! vehicles, routes and gate-device bindings, plus a JSON seed loader.

use log::info;
use rusqlite::{Connection, params};
use serde::Deserialize;

use toll_shared::model::{Gate, Plate, Route, Vehicle, VehicleType};

use crate::error::EngineError;
use crate::repository::{ReferenceReader, SqliteRepository};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewGate {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(rename = "autostrada")]
    pub highway: String,
    pub km: f64,
    #[serde(default)]
    pub smart: bool,
    #[serde(rename = "pioggia", default)]
    pub raining: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewVehicleType {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(rename = "tipo")]
    pub name: String,
    #[serde(rename = "limite_velocita")]
    pub speed_limit: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewVehicle {
    #[serde(rename = "targa")]
    pub plate: Plate,
    #[serde(rename = "tipo_veicolo")]
    pub vehicle_type_id: i64,
    #[serde(rename = "utente")]
    pub owner_id: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewRoute {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(rename = "varco_in")]
    pub entry_gate_id: i64,
    #[serde(rename = "varco_out")]
    pub exit_gate_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct GateBinding {
    #[serde(rename = "utente")]
    pub user_id: i64,
    #[serde(rename = "varco")]
    pub gate_id: i64,
}

/// Reference data loaded at startup, applied in dependency order.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Seed {
    #[serde(rename = "varchi", default)]
    pub gates: Vec<NewGate>,
    #[serde(rename = "tipi_veicolo", default)]
    pub vehicle_types: Vec<NewVehicleType>,
    #[serde(rename = "veicoli", default)]
    pub vehicles: Vec<NewVehicle>,
    #[serde(rename = "tratte", default)]
    pub routes: Vec<NewRoute>,
    #[serde(rename = "dispositivi", default)]
    pub gate_devices: Vec<GateBinding>,
}

pub fn create_gate(conn: &Connection, gate: &NewGate) -> Result<Gate, EngineError> {
    if !gate.km.is_finite() {
        return Err(EngineError::BadRequest(String::from("km must be a finite number")));
    }
    conn.execute(
        "INSERT INTO gates (id, highway, km, smart, raining) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![gate.id, gate.highway, gate.km, gate.smart, gate.raining],
    )?;
    Ok(Gate {
        id: conn.last_insert_rowid(),
        highway: gate.highway.clone(),
        km: gate.km,
        smart: gate.smart,
        raining: gate.raining,
    })
}

pub fn create_vehicle_type(
    conn: &Connection,
    vehicle_type: &NewVehicleType,
) -> Result<VehicleType, EngineError> {
    if vehicle_type.speed_limit == 0 {
        return Err(EngineError::BadRequest(String::from(
            "speed limit must be positive",
        )));
    }
    conn.execute(
        "INSERT INTO vehicle_types (id, name, speed_limit) VALUES (?1, ?2, ?3)",
        params![vehicle_type.id, vehicle_type.name, vehicle_type.speed_limit],
    )?;
    Ok(VehicleType {
        id: conn.last_insert_rowid(),
        name: vehicle_type.name.clone(),
        speed_limit: vehicle_type.speed_limit,
    })
}

pub fn create_vehicle(conn: &Connection, vehicle: &NewVehicle) -> Result<Vehicle, EngineError> {
    let repo = SqliteRepository::new(conn);
    if repo.find_vehicle_type(vehicle.vehicle_type_id)?.is_none() {
        return Err(EngineError::not_found("vehicle type", vehicle.vehicle_type_id));
    }
    if repo.find_vehicle(&vehicle.plate)?.is_some() {
        return Err(EngineError::BadRequest(format!(
            "vehicle {} already exists",
            vehicle.plate
        )));
    }
    conn.execute(
        "INSERT INTO vehicles (plate, vehicle_type_id, owner_id) VALUES (?1, ?2, ?3)",
        params![vehicle.plate.as_str(), vehicle.vehicle_type_id, vehicle.owner_id],
    )?;
    Ok(Vehicle {
        plate: vehicle.plate.clone(),
        vehicle_type_id: vehicle.vehicle_type_id,
        owner_id: vehicle.owner_id,
    })
}

/// Both gates must exist, differ and lie on the same highway. The distance
/// is fixed here and never derived again.
pub fn create_route(conn: &Connection, route: &NewRoute) -> Result<Route, EngineError> {
    let repo = SqliteRepository::new(conn);
    let entry = repo
        .find_gate(route.entry_gate_id)?
        .ok_or_else(|| EngineError::not_found("gate", route.entry_gate_id))?;
    let exit = repo
        .find_gate(route.exit_gate_id)?
        .ok_or_else(|| EngineError::not_found("gate", route.exit_gate_id))?;

    if entry.id == exit.id {
        return Err(EngineError::BadRequest(String::from(
            "entry and exit gate must differ",
        )));
    }
    if entry.highway != exit.highway {
        return Err(EngineError::BadRequest(format!(
            "gates {} and {} are on different highways ({} / {})",
            entry.id, exit.id, entry.highway, exit.highway
        )));
    }

    let distance = (entry.km - exit.km).abs();
    conn.execute(
        "INSERT INTO routes (id, entry_gate_id, exit_gate_id, distance) VALUES (?1, ?2, ?3, ?4)",
        params![route.id, entry.id, exit.id, distance],
    )?;
    Ok(Route {
        id: conn.last_insert_rowid(),
        entry_gate_id: entry.id,
        exit_gate_id: exit.id,
        distance,
    })
}

pub fn bind_gate_device(conn: &Connection, binding: &GateBinding) -> Result<(), EngineError> {
    if SqliteRepository::new(conn).find_gate(binding.gate_id)?.is_none() {
        return Err(EngineError::not_found("gate", binding.gate_id));
    }
    conn.execute(
        "INSERT INTO gate_devices (user_id, gate_id) VALUES (?1, ?2)
         ON CONFLICT (user_id) DO UPDATE SET gate_id = excluded.gate_id",
        params![binding.user_id, binding.gate_id],
    )?;
    Ok(())
}

pub fn set_gate_raining(
    conn: &Connection,
    gate_id: i64,
    raining: bool,
) -> Result<Gate, EngineError> {
    let updated = conn.execute(
        "UPDATE gates SET raining = ?1 WHERE id = ?2",
        params![raining, gate_id],
    )?;
    if updated == 0 {
        return Err(EngineError::not_found("gate", gate_id));
    }
    SqliteRepository::new(conn)
        .find_gate(gate_id)?
        .ok_or_else(|| EngineError::not_found("gate", gate_id))
}

pub fn apply_seed(conn: &mut Connection, seed: &Seed) -> Result<(), EngineError> {
    let tx = conn.transaction()?;
    for gate in &seed.gates {
        create_gate(&tx, gate)?;
    }
    for vehicle_type in &seed.vehicle_types {
        create_vehicle_type(&tx, vehicle_type)?;
    }
    for vehicle in &seed.vehicles {
        create_vehicle(&tx, vehicle)?;
    }
    for route in &seed.routes {
        create_route(&tx, route)?;
    }
    for binding in &seed.gate_devices {
        bind_gate_device(&tx, binding)?;
    }
    tx.commit()?;

    info!(
        "Seeded {} gates, {} vehicle types, {} vehicles, {} routes, {} gate devices",
        seed.gates.len(),
        seed.vehicle_types.len(),
        seed.vehicles.len(),
        seed.routes.len(),
        seed.gate_devices.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::migrate;

    fn connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn
    }

    fn gate(highway: &str, km: f64) -> NewGate {
        NewGate {
            id: None,
            highway: highway.to_string(),
            km,
            smart: false,
            raining: false,
        }
    }

    #[test]
    fn test_route_distance_is_absolute_km_difference() {
        let conn = connection();
        let a = create_gate(&conn, &gate("A1", 120.5)).unwrap();
        let b = create_gate(&conn, &gate("A1", 20.0)).unwrap();

        let route = create_route(
            &conn,
            &NewRoute {
                id: None,
                entry_gate_id: a.id,
                exit_gate_id: b.id,
            },
        )
        .unwrap();

        assert_eq!(route.distance, 100.5);
        let stored = SqliteRepository::new(&conn).find_route(route.id).unwrap();
        assert_eq!(stored, Some(route));
    }

    #[test]
    fn test_route_across_highways_is_rejected() {
        let conn = connection();
        let a = create_gate(&conn, &gate("A1", 10.0)).unwrap();
        let b = create_gate(&conn, &gate("A14", 50.0)).unwrap();

        let result = create_route(
            &conn,
            &NewRoute {
                id: None,
                entry_gate_id: a.id,
                exit_gate_id: b.id,
            },
        );
        assert!(matches!(result, Err(EngineError::BadRequest(_))));
        let same = create_route(
            &conn,
            &NewRoute {
                id: None,
                entry_gate_id: a.id,
                exit_gate_id: a.id,
            },
        );
        assert!(matches!(same, Err(EngineError::BadRequest(_))));
        let missing = create_route(
            &conn,
            &NewRoute {
                id: None,
                entry_gate_id: a.id,
                exit_gate_id: 99,
            },
        );
        assert!(matches!(missing, Err(EngineError::NotFound(_))));
    }

    #[test]
    fn test_vehicle_needs_type_and_unique_plate() {
        let conn = connection();
        let vehicle = NewVehicle {
            plate: "AA111AA".parse().unwrap(),
            vehicle_type_id: 1,
            owner_id: 7,
        };
        assert!(matches!(create_vehicle(&conn, &vehicle), Err(EngineError::NotFound(_))));

        create_vehicle_type(
            &conn,
            &NewVehicleType {
                id: Some(1),
                name: String::from("auto"),
                speed_limit: 130,
            },
        )
        .unwrap();
        create_vehicle(&conn, &vehicle).unwrap();
        assert!(matches!(create_vehicle(&conn, &vehicle), Err(EngineError::BadRequest(_))));
        assert!(matches!(
            create_vehicle_type(
                &conn,
                &NewVehicleType {
                    id: None,
                    name: String::from("broken"),
                    speed_limit: 0,
                },
            ),
            Err(EngineError::BadRequest(_))
        ));
    }

    #[test]
    fn test_gate_binding_and_rain() {
        let conn = connection();
        let a = create_gate(&conn, &gate("A1", 10.0)).unwrap();
        let b = create_gate(&conn, &gate("A1", 30.0)).unwrap();

        bind_gate_device(&conn, &GateBinding { user_id: 5, gate_id: a.id }).unwrap();
        bind_gate_device(&conn, &GateBinding { user_id: 5, gate_id: b.id }).unwrap();
        assert_eq!(
            SqliteRepository::new(&conn).find_gate_binding(5).unwrap(),
            Some(b.id)
        );
        assert!(matches!(
            bind_gate_device(&conn, &GateBinding { user_id: 6, gate_id: 99 }),
            Err(EngineError::NotFound(_))
        ));

        assert!(set_gate_raining(&conn, a.id, true).unwrap().raining);
        assert!(matches!(set_gate_raining(&conn, 99, true), Err(EngineError::NotFound(_))));
    }

    #[test]
    fn test_seed_is_all_or_nothing() {
        let mut conn = connection();
        let seed: Seed = serde_json::from_str(
            r#"{
                "varchi": [
                    { "id": 1, "autostrada": "A1", "km": 0 },
                    { "id": 2, "autostrada": "A1", "km": 100, "smart": true }
                ],
                "tipi_veicolo": [{ "id": 1, "tipo": "auto", "limite_velocita": 130 }],
                "veicoli": [{ "targa": "AA111AA", "tipo_veicolo": 1, "utente": 7 }],
                "tratte": [{ "id": 1, "varco_in": 1, "varco_out": 2 }],
                "dispositivi": [{ "utente": 20, "varco": 2 }]
            }"#,
        )
        .unwrap();
        apply_seed(&mut conn, &seed).unwrap();
        let repo = SqliteRepository::new(&conn);
        assert_eq!(repo.find_route(1).unwrap().unwrap().distance, 100.0);
        assert_eq!(repo.find_gate_binding(20).unwrap(), Some(2));

        let mut fresh = connection();
        let broken = Seed {
            routes: vec![NewRoute {
                id: None,
                entry_gate_id: 1,
                exit_gate_id: 42,
            }],
            ..seed
        };
        assert!(apply_seed(&mut fresh, &broken).is_err());
        assert!(SqliteRepository::new(&fresh).find_gate(1).unwrap().is_none());
    }
}
