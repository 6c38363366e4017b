use log::{debug, error};
use rusqlite::Connection;
use std::thread;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::oneshot;

use toll_shared::messages::{FineQuery, TransitCreated};
use toll_shared::model::{FineReport, Gate, Route, Vehicle, VehicleType};

use crate::actor::Actor;
use crate::config::DatabaseLocation;
use crate::error::EngineError;
use crate::fines;
use crate::policy::Submission;
use crate::reference::{self, GateBinding, NewGate, NewRoute, NewVehicle, NewVehicleType, Seed};
use crate::repository::{self, SqliteRepository};
use crate::writer;

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

pub enum ManagerCommand {
    RecordTransit(Actor, Submission, Reply<TransitCreated>),
    ListFines(Actor, FineQuery, Reply<Vec<FineReport>>),
    FineForOwner(i64, i64, Reply<FineReport>), // fine id, owner id
    CreateGate(NewGate, Reply<Gate>),
    CreateVehicleType(NewVehicleType, Reply<VehicleType>),
    CreateVehicle(NewVehicle, Reply<Vehicle>),
    CreateRoute(NewRoute, Reply<Route>),
    BindGateDevice(GateBinding, Reply<()>),
    SetGateRaining(i64, bool, Reply<Gate>), // gate id, raining
    ApplySeed(Seed, Reply<()>),
}

impl ManagerCommand {
    fn name(&self) -> &'static str {
        match self {
            ManagerCommand::RecordTransit(..) => "record transit",
            ManagerCommand::ListFines(..) => "list fines",
            ManagerCommand::FineForOwner(..) => "fine for owner",
            ManagerCommand::CreateGate(..) => "create gate",
            ManagerCommand::CreateVehicleType(..) => "create vehicle type",
            ManagerCommand::CreateVehicle(..) => "create vehicle",
            ManagerCommand::CreateRoute(..) => "create route",
            ManagerCommand::BindGateDevice(..) => "bind gate device",
            ManagerCommand::SetGateRaining(..) => "set gate raining",
            ManagerCommand::ApplySeed(..) => "apply seed",
        }
    }
}

/// Owns the database connection and runs one command at a time. Reads use
/// the bare connection; a transit submission runs in its own transaction.
pub fn manager(mut conn: Connection, mut rx: Receiver<ManagerCommand>) {
    while let Some(command) = rx.blocking_recv() {
        debug!("Store command: {}", command.name());
        match command {
            ManagerCommand::RecordTransit(actor, submission, reply) => {
                let _ = reply.send(writer::record_transit(&mut conn, &actor, &submission));
            }
            ManagerCommand::ListFines(actor, query, reply) => {
                let repo = SqliteRepository::new(&conn);
                let _ = reply.send(fines::list_fines(&repo, &actor, &query));
            }
            ManagerCommand::FineForOwner(fine_id, owner_id, reply) => {
                let repo = SqliteRepository::new(&conn);
                let _ = reply.send(fines::fine_for_owner(&repo, fine_id, owner_id));
            }
            ManagerCommand::CreateGate(gate, reply) => {
                let _ = reply.send(reference::create_gate(&conn, &gate));
            }
            ManagerCommand::CreateVehicleType(vehicle_type, reply) => {
                let _ = reply.send(reference::create_vehicle_type(&conn, &vehicle_type));
            }
            ManagerCommand::CreateVehicle(vehicle, reply) => {
                let _ = reply.send(reference::create_vehicle(&conn, &vehicle));
            }
            ManagerCommand::CreateRoute(route, reply) => {
                let _ = reply.send(reference::create_route(&conn, &route));
            }
            ManagerCommand::BindGateDevice(binding, reply) => {
                let _ = reply.send(reference::bind_gate_device(&conn, &binding));
            }
            ManagerCommand::SetGateRaining(gate_id, raining, reply) => {
                let _ = reply.send(reference::set_gate_raining(&conn, gate_id, raining));
            }
            ManagerCommand::ApplySeed(seed, reply) => {
                let _ = reply.send(reference::apply_seed(&mut conn, &seed));
            }
        }
    }
    debug!("Store manager stopped");
}

/// Handle to the store manager. Created once at startup and cloned into
/// every request handler.
#[derive(Clone)]
pub struct Store {
    tx: Sender<ManagerCommand>,
}

impl Store {
    pub fn open(location: &DatabaseLocation, queue: usize) -> Result<Self, EngineError> {
        let conn = match location {
            DatabaseLocation::Memory => Connection::open_in_memory()?,
            DatabaseLocation::File(path) => Connection::open(path)?,
        };
        repository::migrate(&conn)?;

        let (tx, rx) = mpsc::channel::<ManagerCommand>(queue);
        // rusqlite blocks, so the manager gets its own thread instead of a task.
        thread::Builder::new()
            .name(String::from("store-manager"))
            .spawn(move || manager(conn, rx))
            .map_err(|e| EngineError::Internal(format!("cannot start store manager: {e}")))?;

        Ok(Store { tx })
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> ManagerCommand,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(command(reply_tx)).await.is_err() {
            error!("Store manager is gone");
            return Err(EngineError::Internal(String::from("store is unavailable")));
        }
        reply_rx
            .await
            .map_err(|_| EngineError::Internal(String::from("store dropped the request")))?
    }

    pub async fn record_transit(
        &self,
        actor: Actor,
        submission: Submission,
    ) -> Result<TransitCreated, EngineError> {
        self.request(|reply| ManagerCommand::RecordTransit(actor, submission, reply))
            .await
    }

    pub async fn list_fines(
        &self,
        actor: Actor,
        query: FineQuery,
    ) -> Result<Vec<FineReport>, EngineError> {
        self.request(|reply| ManagerCommand::ListFines(actor, query, reply))
            .await
    }

    pub async fn fine_for_owner(
        &self,
        fine_id: i64,
        owner_id: i64,
    ) -> Result<FineReport, EngineError> {
        self.request(|reply| ManagerCommand::FineForOwner(fine_id, owner_id, reply))
            .await
    }

    pub async fn create_gate(&self, gate: NewGate) -> Result<Gate, EngineError> {
        self.request(|reply| ManagerCommand::CreateGate(gate, reply))
            .await
    }

    pub async fn create_vehicle_type(
        &self,
        vehicle_type: NewVehicleType,
    ) -> Result<VehicleType, EngineError> {
        self.request(|reply| ManagerCommand::CreateVehicleType(vehicle_type, reply))
            .await
    }

    pub async fn create_vehicle(&self, vehicle: NewVehicle) -> Result<Vehicle, EngineError> {
        self.request(|reply| ManagerCommand::CreateVehicle(vehicle, reply))
            .await
    }

    pub async fn create_route(&self, route: NewRoute) -> Result<Route, EngineError> {
        self.request(|reply| ManagerCommand::CreateRoute(route, reply))
            .await
    }

    pub async fn bind_gate_device(&self, binding: GateBinding) -> Result<(), EngineError> {
        self.request(|reply| ManagerCommand::BindGateDevice(binding, reply))
            .await
    }

    pub async fn set_gate_raining(&self, gate_id: i64, raining: bool) -> Result<Gate, EngineError> {
        self.request(|reply| ManagerCommand::SetGateRaining(gate_id, raining, reply))
            .await
    }

    pub async fn apply_seed(&self, seed: Seed) -> Result<(), EngineError> {
        self.request(|reply| ManagerCommand::ApplySeed(seed, reply))
            .await
    }
}
