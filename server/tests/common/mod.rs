#![allow(dead_code)]

use async_trait::async_trait;
use rusqlite::{Connection, OpenFlags};
use std::net::TcpListener as StdTcpListener;
use std::path::PathBuf;
use std::sync::{Arc, Once};
use tokio::net::TcpListener;
use uuid::Uuid;

use server::config::DatabaseLocation;
use server::document::PdfRenderer;
use server::error::EngineError;
use server::manager::Store;
use server::ocr::{ImageFormat, PlateReader};
use server::reference::{GateBinding, NewGate, NewRoute, NewVehicle, NewVehicleType, Seed};
use server::{AppState, serve};
use toll_shared::model::Plate;

pub const OPERATOR: (i64, &str) = (1, "operatore");
/// Bound to gate 2, which cannot read plates.
pub const PLAIN_GATE: (i64, &str) = (20, "varco");
/// Bound to gate 4, a smart gate.
pub const SMART_GATE: (i64, &str) = (40, "varco");
/// Owns AA111AA.
pub const OWNER_A: (i64, &str) = (7, "automobilista");
/// Owns BB222BB.
pub const OWNER_B: (i64, &str) = (8, "automobilista");

static INIT: Once = Once::new();

pub fn init_logger() {
    INIT.call_once(|| {
        env_logger::builder().is_test(true).init();
    });
}

fn get_free_address() -> String {
    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().to_string()
}

/// Answers every image with the same plate.
pub struct FixedPlateReader(pub Option<Plate>);

#[async_trait]
impl PlateReader for FixedPlateReader {
    async fn read_plate(
        &self,
        _image: &[u8],
        _format: ImageFormat,
    ) -> Result<Option<Plate>, EngineError> {
        Ok(self.0.clone())
    }
}

fn gate(id: i64, km: f64, smart: bool) -> NewGate {
    NewGate {
        id: Some(id),
        highway: String::from("A1"),
        km,
        smart,
        raining: false,
    }
}

fn route(id: i64, entry_gate_id: i64, exit_gate_id: i64) -> NewRoute {
    NewRoute {
        id: Some(id),
        entry_gate_id,
        exit_gate_id,
    }
}

/// Gates 1..4 on the A1 at km 0, 100, 150 and 250. Routes 1 (1 -> 2, 100 km),
/// 2 (2 -> 3, 50 km) and 3 (3 -> 4, 100 km). Cars limited to 130 km/h.
pub fn seed() -> Seed {
    Seed {
        gates: vec![
            gate(1, 0.0, false),
            gate(2, 100.0, false),
            gate(3, 150.0, true),
            gate(4, 250.0, true),
        ],
        vehicle_types: vec![NewVehicleType {
            id: Some(1),
            name: String::from("auto"),
            speed_limit: 130,
        }],
        vehicles: vec![
            NewVehicle {
                plate: "AA111AA".parse().unwrap(),
                vehicle_type_id: 1,
                owner_id: OWNER_A.0,
            },
            NewVehicle {
                plate: "BB222BB".parse().unwrap(),
                vehicle_type_id: 1,
                owner_id: OWNER_B.0,
            },
        ],
        routes: vec![route(1, 1, 2), route(2, 2, 3), route(3, 3, 4)],
        gate_devices: vec![
            GateBinding {
                user_id: PLAIN_GATE.0,
                gate_id: 2,
            },
            GateBinding {
                user_id: SMART_GATE.0,
                gate_id: 4,
            },
        ],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counts {
    pub transits: i64,
    pub fines: i64,
}

pub struct TestServer {
    pub base: String,
    pub store: Store,
    pub client: reqwest::Client,
    database: PathBuf,
}

impl TestServer {
    pub async fn start(plate: Option<&str>) -> Self {
        init_logger();
        let database = std::env::temp_dir().join(format!("toll-test-{}.db", Uuid::new_v4()));
        let store = Store::open(&DatabaseLocation::File(database.clone()), 16).unwrap();
        store.apply_seed(seed()).await.unwrap();

        let state = AppState {
            store: store.clone(),
            plate_reader: Arc::new(FixedPlateReader(plate.map(|p| p.parse().unwrap()))),
            renderer: Arc::new(PdfRenderer),
            max_upload_bytes: 1024,
        };

        let addr = get_free_address();
        let listener = TcpListener::bind(&addr).await.unwrap();
        tokio::spawn(async move {
            serve(listener, state).await.unwrap();
        });

        TestServer {
            base: format!("http://{addr}"),
            store,
            client: reqwest::Client::new(),
            database,
        }
    }

    /// Rows written so far, read through a separate read-only connection.
    pub fn counts(&self) -> Counts {
        let conn =
            Connection::open_with_flags(&self.database, OpenFlags::SQLITE_OPEN_READ_ONLY).unwrap();
        let count = |table: &str| {
            let sql = format!("SELECT COUNT(*) FROM {table}");
            conn.query_row(&sql, [], |row| row.get::<_, i64>(0)).unwrap()
        };
        Counts {
            transits: count("transits"),
            fines: count("fines"),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn get(&self, path: &str, who: (i64, &str)) -> reqwest::RequestBuilder {
        self.client
            .get(self.url(path))
            .header("x-user-id", who.0.to_string())
            .header("x-user-role", who.1)
    }

    pub fn post(&self, path: &str, who: (i64, &str)) -> reqwest::RequestBuilder {
        self.client
            .post(self.url(path))
            .header("x-user-id", who.0.to_string())
            .header("x-user-role", who.1)
    }

    pub fn put(&self, path: &str, who: (i64, &str)) -> reqwest::RequestBuilder {
        self.client
            .put(self.url(path))
            .header("x-user-id", who.0.to_string())
            .header("x-user-role", who.1)
    }
}

pub fn transit_body(plate: &str, route: i64, entry: &str, exit: &str) -> serde_json::Value {
    serde_json::json!({
        "targa": plate,
        "tratta": route,
        "data_in": entry,
        "data_out": exit,
    })
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.database);
    }
}
