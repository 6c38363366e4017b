//! Records a transit and, when it was too fast, its fine, as one transaction.

use log::{debug, info};
use rusqlite::Connection;
use uuid::Uuid;

use toll_shared::messages::TransitCreated;
use toll_shared::model::timestamp;

use crate::actor::Actor;
use crate::calculator::{self, SpeedInputs};
use crate::error::EngineError;
use crate::policy::{self, Submission};
use crate::repository::{NewFine, NewTransit, ReferenceReader, SqliteRepository, TransitWriter};

/// Validates, assesses and persists one submission. Any error rolls the
/// transaction back, so either both rows exist or neither does.
pub fn record_transit(
    conn: &mut Connection,
    actor: &Actor,
    submission: &Submission,
) -> Result<TransitCreated, EngineError> {
    let tx = conn.transaction()?;
    let created = assess_and_write(&SqliteRepository::new(&tx), actor, submission)?;
    tx.commit()?;

    match &created.fine {
        Some(fine) => info!(
            "Recorded transit {} for {} with fine {} of {}",
            created.transit.id, created.transit.plate, fine.id, fine.amount
        ),
        None => info!(
            "Recorded transit {} for {}",
            created.transit.id, created.transit.plate
        ),
    }
    Ok(created)
}

pub(crate) fn assess_and_write<R>(
    repo: &R,
    actor: &Actor,
    submission: &Submission,
) -> Result<TransitCreated, EngineError>
where
    R: ReferenceReader + TransitWriter,
{
    let route = policy::resolve_route(repo, actor, submission)?;
    // Assess the instants exactly as they will be stored.
    let entry_at = timestamp::truncate_millis(submission.entry_at);
    let exit_at = timestamp::truncate_millis(submission.exit_at);

    let vehicle = repo
        .find_vehicle(&submission.plate)?
        .ok_or_else(|| EngineError::not_found("vehicle", &submission.plate))?;
    let vehicle_type = repo
        .find_vehicle_type(vehicle.vehicle_type_id)?
        .ok_or_else(|| EngineError::not_found("vehicle type", vehicle.vehicle_type_id))?;
    let entry_gate = repo
        .find_gate(route.entry_gate_id)?
        .ok_or_else(|| EngineError::not_found("gate", route.entry_gate_id))?;
    let exit_gate = repo
        .find_gate(route.exit_gate_id)?
        .ok_or_else(|| EngineError::not_found("gate", route.exit_gate_id))?;

    let assessment = calculator::assess(&SpeedInputs {
        entry_at,
        exit_at,
        distance: route.distance,
        base_limit: vehicle_type.speed_limit,
        entry_raining: entry_gate.raining,
        exit_raining: exit_gate.raining,
    })?;
    debug!(
        "Transit of {} on route {}: {:?}",
        submission.plate, route.id, assessment
    );

    let transit = repo.create_transit(&NewTransit {
        plate: submission.plate.clone(),
        route_id: route.id,
        entry_at,
        exit_at,
        average_speed: assessment.average_speed,
        speed_delta: assessment.speed_delta,
    })?;

    let fine = match assessment.fine_amount() {
        Some(amount) => Some(repo.create_fine(&NewFine {
            transit_id: transit.id,
            payment_id: Uuid::new_v4().to_string(),
            amount,
        })?),
        None => None,
    };

    Ok(TransitCreated { transit, fine })
}
