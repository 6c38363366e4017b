//! Joins fine -> transit -> route -> gates into the records used for fine
//! listings and payment documents.
//!
//! The weather label is read from the gates at lookup time, not from the
//! moment of the transit, so it follows the current rain state.

use std::collections::HashMap;

use log::debug;

use toll_shared::messages::FineQuery;
use toll_shared::model::{Fine, FineReport, GateSummary, Role, RouteSummary, Transit, Weather};

use crate::actor::Actor;
use crate::error::EngineError;
use crate::repository::{FineReader, ReferenceReader};

/// Fines for the plates in `query` whose transits overlap its window.
/// Motorists only see fines of vehicles they own.
pub fn list_fines<R>(
    repo: &R,
    viewer: &Actor,
    query: &FineQuery,
) -> Result<Vec<FineReport>, EngineError>
where
    R: FineReader + ReferenceReader,
{
    let owner_id = match viewer.role {
        Role::Operator => None,
        Role::Motorist => Some(viewer.user_id),
        Role::GateDevice => {
            return Err(EngineError::Forbidden(String::from(
                "gate devices cannot list fines",
            )));
        }
    };
    debug!(
        "Listing fines for {:?} between {} and {} (owner {:?})",
        query.plates, query.from, query.to, owner_id
    );

    let mut transits: HashMap<i64, Transit> = repo
        .find_transits_in_window(&query.plates, query.from, query.to, owner_id)?
        .into_iter()
        .map(|t| (t.id, t))
        .collect();
    let mut transit_ids: Vec<i64> = transits.keys().copied().collect();
    transit_ids.sort_unstable();

    repo.find_fines_for_transits(&transit_ids)?
        .into_iter()
        .map(|fine| {
            let transit = transits.remove(&fine.transit_id).ok_or_else(|| {
                EngineError::Internal(format!("fine {} lost its transit", fine.id))
            })?;
            assemble(repo, fine, transit)
        })
        .collect()
}

/// A single fine, only if its transit belongs to a vehicle owned by `owner_id`.
pub fn fine_for_owner<R>(repo: &R, fine_id: i64, owner_id: i64) -> Result<FineReport, EngineError>
where
    R: FineReader + ReferenceReader,
{
    let fine = repo
        .find_fine(fine_id)?
        .ok_or_else(|| EngineError::not_found("fine", fine_id))?;
    let transit = repo
        .find_transit(fine.transit_id)?
        .ok_or_else(|| EngineError::not_found("fine", fine_id))?;
    let owned = repo
        .find_vehicle(&transit.plate)?
        .is_some_and(|vehicle| vehicle.owner_id == owner_id);
    if !owned {
        return Err(EngineError::not_found("fine", fine_id));
    }

    assemble(repo, fine, transit)
}

/// A route or gate missing behind an existing fine is an integrity failure,
/// never a partial report.
fn assemble<R: ReferenceReader>(
    repo: &R,
    fine: Fine,
    transit: Transit,
) -> Result<FineReport, EngineError> {
    let route = repo.find_route(transit.route_id)?.ok_or_else(|| {
        EngineError::Internal(format!(
            "route {} of transit {} is missing",
            transit.route_id, transit.id
        ))
    })?;
    let gate = |id: i64| {
        repo.find_gate(id)?.ok_or_else(|| {
            EngineError::Internal(format!("gate {} of route {} is missing", id, route.id))
        })
    };
    let entry_gate = gate(route.entry_gate_id)?;
    let exit_gate = gate(route.exit_gate_id)?;

    Ok(FineReport {
        id: fine.id,
        amount: fine.amount,
        payment_id: fine.payment_id,
        weather: Weather::from_gates(&entry_gate, &exit_gate),
        route: RouteSummary {
            id: route.id,
            distance: route.distance,
            entry_gate: GateSummary::from(&entry_gate),
            exit_gate: GateSummary::from(&exit_gate),
        },
        transit,
    })
}
