use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use toll_shared::model::Role;

use crate::error::EngineError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const ROLE_HEADER: &str = "x-user-role";

/// Authenticated caller. Token verification happens upstream; the proxy
/// forwards the verified identity in two headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: i64,
    pub role: Role,
}

impl Actor {
    pub fn operator(user_id: i64) -> Self {
        Actor {
            user_id,
            role: Role::Operator,
        }
    }

    pub fn gate_device(user_id: i64) -> Self {
        Actor {
            user_id,
            role: Role::GateDevice,
        }
    }

    pub fn motorist(user_id: i64) -> Self {
        Actor {
            user_id,
            role: Role::Motorist,
        }
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, EngineError> {
    parts
        .headers
        .get(name)
        .ok_or_else(|| EngineError::Unauthorized(format!("missing {name} header")))?
        .to_str()
        .map_err(|_| EngineError::Unauthorized(format!("unreadable {name} header")))
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = EngineError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header(parts, USER_ID_HEADER)?
            .trim()
            .parse()
            .map_err(|_| EngineError::Unauthorized(String::from("invalid user id")))?;
        let role = header(parts, ROLE_HEADER)?
            .trim()
            .parse()
            .map_err(EngineError::Unauthorized)?;
        Ok(Actor { user_id, role })
    }
}
