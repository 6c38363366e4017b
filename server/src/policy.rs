//! Decides whether an actor may submit a transit and which route it runs on.
//! Only reads reference data.

use chrono::{DateTime, Utc};
use log::warn;

use toll_shared::messages::TransitRequest;
use toll_shared::model::{Plate, Role, Route};

use crate::actor::Actor;
use crate::error::EngineError;
use crate::repository::ReferenceReader;

/// How a transit reached the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Structured payload naming the route.
    Direct { route_id: i64 },
    /// Plate read from a captured image; the route comes from the gate.
    Captured,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub plate: Plate,
    pub entry_at: DateTime<Utc>,
    pub exit_at: DateTime<Utc>,
    pub channel: Channel,
}

impl From<TransitRequest> for Submission {
    fn from(request: TransitRequest) -> Self {
        Submission {
            plate: request.plate,
            entry_at: request.entry_at,
            exit_at: request.exit_at,
            channel: Channel::Direct {
                route_id: request.route_id,
            },
        }
    }
}

fn reject(actor: &Actor, reason: String) -> EngineError {
    warn!("Rejecting transit from {} {}: {}", actor.role, actor.user_id, reason);
    EngineError::BadRequest(reason)
}

/// Captured images only come from gate devices. Checked before the image is
/// sent for recognition.
pub fn check_capturing_actor(actor: &Actor) -> Result<(), EngineError> {
    match actor.role {
        Role::GateDevice => Ok(()),
        Role::Operator => Err(reject(
            actor,
            String::from("operators must name the route of a transit"),
        )),
        Role::Motorist => Err(EngineError::Forbidden(String::from(
            "motorists cannot submit transits",
        ))),
    }
}

pub fn resolve_route<R: ReferenceReader>(
    reader: &R,
    actor: &Actor,
    submission: &Submission,
) -> Result<Route, EngineError> {
    match actor.role {
        Role::Operator => match submission.channel {
            Channel::Direct { route_id } => reader
                .find_route(route_id)?
                .ok_or_else(|| EngineError::not_found("route", route_id)),
            Channel::Captured => Err(reject(
                actor,
                String::from("operators must name the route of a transit"),
            )),
        },
        Role::GateDevice => {
            let gate_id = reader.find_gate_binding(actor.user_id)?.ok_or_else(|| {
                reject(actor, format!("user {} is not bound to a gate", actor.user_id))
            })?;
            let gate = reader
                .find_gate(gate_id)?
                .ok_or_else(|| EngineError::not_found("gate", gate_id))?;

            match submission.channel {
                Channel::Direct { route_id } => {
                    let route = reader
                        .find_route(route_id)?
                        .ok_or_else(|| EngineError::not_found("route", route_id))?;
                    if route.exit_gate_id != gate.id {
                        return Err(reject(
                            actor,
                            format!("gate {} is not the exit gate of route {}", gate.id, route.id),
                        ));
                    }
                    if !gate.smart {
                        return Err(reject(
                            actor,
                            format!("gate {} cannot submit transits directly", gate.id),
                        ));
                    }
                    Ok(route)
                }
                Channel::Captured => reader.find_route_by_exit_gate(gate.id)?.ok_or_else(|| {
                    reject(actor, format!("no route ends at gate {}", gate.id))
                }),
            }
        }
        Role::Motorist => Err(EngineError::Forbidden(String::from(
            "motorists cannot submit transits",
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{SqliteRepository, migrate};
    use chrono::{Duration, TimeZone};
    use rusqlite::Connection;

    // Gate 1 (smart) -> gate 2 (not smart) on route 1; gate 3 (smart) ends route 2.
    fn connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO gates (id, highway, km, smart, raining) VALUES
                (1, 'A1', 0.0, 1, 0), (2, 'A1', 100.0, 0, 0), (3, 'A1', 150.0, 1, 0), (4, 'A1', 200.0, 0, 0);
             INSERT INTO routes (id, entry_gate_id, exit_gate_id, distance) VALUES (1, 1, 2, 100.0), (2, 2, 3, 50.0);
             INSERT INTO gate_devices (user_id, gate_id) VALUES (20, 2), (30, 3), (40, 4);",
        )
        .unwrap();
        conn
    }

    fn submission(channel: Channel) -> Submission {
        let entry_at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        Submission {
            plate: "AA111AA".parse().unwrap(),
            entry_at,
            exit_at: entry_at + Duration::minutes(30),
            channel,
        }
    }

    #[test]
    fn test_operator_needs_existing_route() {
        let conn = connection();
        let repo = SqliteRepository::new(&conn);
        let actor = Actor::operator(1);

        let route =
            resolve_route(&repo, &actor, &submission(Channel::Direct { route_id: 1 })).unwrap();
        assert_eq!(route.id, 1);
        assert!(matches!(
            resolve_route(&repo, &actor, &submission(Channel::Direct { route_id: 9 })),
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(
            resolve_route(&repo, &actor, &submission(Channel::Captured)),
            Err(EngineError::BadRequest(_))
        ));
    }

    #[test]
    fn test_smart_exit_gate_may_submit_directly() {
        let conn = connection();
        let repo = SqliteRepository::new(&conn);

        let route = resolve_route(
            &repo,
            &Actor::gate_device(30),
            &submission(Channel::Direct { route_id: 2 }),
        )
        .unwrap();
        assert_eq!(route.id, 2);
    }

    #[test]
    fn test_gate_must_be_exit_of_route() {
        let conn = connection();
        let repo = SqliteRepository::new(&conn);

        assert!(matches!(
            resolve_route(
                &repo,
                &Actor::gate_device(30),
                &submission(Channel::Direct { route_id: 1 })
            ),
            Err(EngineError::BadRequest(_))
        ));
    }

    #[test]
    fn test_non_smart_gate_cannot_submit_directly() {
        let conn = connection();
        let repo = SqliteRepository::new(&conn);

        assert!(matches!(
            resolve_route(
                &repo,
                &Actor::gate_device(20),
                &submission(Channel::Direct { route_id: 1 })
            ),
            Err(EngineError::BadRequest(_))
        ));
    }

    #[test]
    fn test_captured_transit_resolves_route_from_gate() {
        let conn = connection();
        let repo = SqliteRepository::new(&conn);

        let route =
            resolve_route(&repo, &Actor::gate_device(20), &submission(Channel::Captured)).unwrap();
        assert_eq!(route.id, 1);
        // A smart gate may also use the image path.
        let route =
            resolve_route(&repo, &Actor::gate_device(30), &submission(Channel::Captured)).unwrap();
        assert_eq!(route.id, 2);
        assert!(matches!(
            resolve_route(&repo, &Actor::gate_device(40), &submission(Channel::Captured)),
            Err(EngineError::BadRequest(_))
        ));
    }

    #[test]
    fn test_unbound_gate_device_is_rejected() {
        let conn = connection();
        let repo = SqliteRepository::new(&conn);

        assert!(matches!(
            resolve_route(&repo, &Actor::gate_device(99), &submission(Channel::Captured)),
            Err(EngineError::BadRequest(_))
        ));
    }

    #[test]
    fn test_motorist_is_forbidden() {
        let conn = connection();
        let repo = SqliteRepository::new(&conn);

        assert!(matches!(
            resolve_route(
                &repo,
                &Actor::motorist(7),
                &submission(Channel::Direct { route_id: 1 })
            ),
            Err(EngineError::Forbidden(_))
        ));
    }

    #[test]
    fn test_only_gate_devices_capture() {
        assert!(check_capturing_actor(&Actor::gate_device(20)).is_ok());
        assert!(matches!(
            check_capturing_actor(&Actor::operator(1)),
            Err(EngineError::BadRequest(_))
        ));
        assert!(matches!(
            check_capturing_actor(&Actor::motorist(7)),
            Err(EngineError::Forbidden(_))
        ));
    }
}
