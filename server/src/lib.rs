use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use bytes::Bytes;
use chrono::Utc;
use log::{debug, info, warn};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;

use toll_shared::messages::{FineQuery, RequestError, TransitCreated, TransitRequest};
use toll_shared::model::{FineReport, Gate, Role, Route, Vehicle, VehicleType, timestamp};

pub mod actor;
pub mod calculator;
pub mod config;
pub mod document;
pub mod error;
pub mod fines;
pub mod manager;
pub mod ocr;
pub mod policy;
pub mod reference;
pub mod repository;
pub mod writer;

use crate::actor::Actor;
use crate::config::Config;
use crate::document::{DocumentRenderer, PdfRenderer};
use crate::error::{EngineError, StartupError};
use crate::manager::Store;
use crate::ocr::{DisabledPlateReader, HttpPlateReader, ImageFormat, PlateReader};
use crate::policy::{Channel, Submission};
use crate::reference::{GateBinding, NewGate, NewRoute, NewVehicle, NewVehicleType, Seed};

/// Room for the multipart boundaries and the `data_in` field on top of the
/// image itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub plate_reader: Arc<dyn PlateReader>,
    pub renderer: Arc<dyn DocumentRenderer>,
    pub max_upload_bytes: usize,
}

pub fn router(state: AppState) -> Router {
    let upload_limit = state.max_upload_bytes + MULTIPART_OVERHEAD;
    Router::new()
        .route("/transiti", post(submit_transit))
        .route(
            "/transiti/immagine",
            post(submit_image).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/multe", get(list_fines))
        .route("/multe/:id/bollettino", get(fine_document))
        .route("/varchi", post(create_gate))
        .route("/varchi/:id/pioggia", put(set_gate_raining))
        .route("/tipi-veicolo", post(create_vehicle_type))
        .route("/veicoli", post(create_vehicle))
        .route("/tratte", post(create_route))
        .route("/dispositivi", post(bind_gate_device))
        .with_state(state)
}

/// Serves on an already bound listener until the process stops.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), StartupError> {
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

pub async fn run(config: Config) -> Result<(), StartupError> {
    config.validate()?;

    let store = Store::open(&config.database, config.store_queue)?;
    if let Some(path) = &config.seed {
        let raw = tokio::fs::read(path).await?;
        let seed: Seed = serde_json::from_slice(&raw)?;
        store.apply_seed(seed).await?;
        info!("Applied seed file {}", path.display());
    }

    let plate_reader: Arc<dyn PlateReader> = match &config.ocr_endpoint {
        Some(endpoint) => {
            info!("Plate recognition at {}", endpoint);
            Arc::new(HttpPlateReader::new(endpoint.clone()))
        }
        None => {
            warn!("No plate recognition endpoint configured, image submissions are disabled");
            Arc::new(DisabledPlateReader)
        }
    };

    let state = AppState {
        store,
        plate_reader,
        renderer: Arc::new(PdfRenderer),
        max_upload_bytes: config.max_upload_bytes,
    };

    let listener = TcpListener::bind(config.bind).await?;
    serve(listener, state).await
}

fn only_operators(actor: &Actor) -> Result<(), EngineError> {
    if actor.role != Role::Operator {
        return Err(EngineError::Forbidden(String::from(
            "only operators manage reference data",
        )));
    }
    Ok(())
}

fn bad_body(rejection: JsonRejection) -> EngineError {
    EngineError::BadRequest(rejection.body_text())
}

async fn submit_transit(
    State(state): State<AppState>,
    actor: Actor,
    body: Result<Json<TransitRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TransitCreated>), EngineError> {
    let Json(request) = body.map_err(bad_body)?;
    request.check()?;
    debug!("Transit submission from {} {}: {:?}", actor.role, actor.user_id, request);

    let created = state.store.record_transit(actor, request.into()).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

struct CapturedImage {
    bytes: Bytes,
    format: ImageFormat,
}

async fn read_capture(
    mut multipart: Multipart,
    max_upload_bytes: usize,
) -> Result<(CapturedImage, chrono::DateTime<Utc>), EngineError> {
    let mut image = None;
    let mut entry_at = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| EngineError::BadRequest(e.body_text()))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("immagine") => {
                let format = field
                    .content_type()
                    .and_then(ImageFormat::from_content_type)
                    .ok_or_else(|| {
                        EngineError::BadRequest(String::from("image must be PNG or JPEG"))
                    })?;
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| EngineError::BadRequest(e.body_text()))?;
                if bytes.len() > max_upload_bytes {
                    return Err(EngineError::BadRequest(format!(
                        "image exceeds {max_upload_bytes} bytes"
                    )));
                }
                if !format.matches(&bytes) {
                    return Err(EngineError::BadRequest(format!(
                        "image content is not {}",
                        format.content_type()
                    )));
                }
                image = Some(CapturedImage { bytes, format });
            }
            Some("data_in") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| EngineError::BadRequest(e.body_text()))?;
                let parsed = timestamp::parse(text.trim())
                    .ok_or_else(|| RequestError::InvalidTimestamp(text.clone()))?;
                entry_at = Some(parsed);
            }
            other => debug!("Ignoring multipart field {:?}", other),
        }
    }

    let image = image.ok_or(RequestError::MissingParameter("immagine"))?;
    let entry_at = entry_at.ok_or(RequestError::MissingParameter("data_in"))?;
    Ok((image, entry_at))
}

async fn submit_image(
    State(state): State<AppState>,
    actor: Actor,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<TransitCreated>), EngineError> {
    policy::check_capturing_actor(&actor)?;
    let multipart = multipart.map_err(|e| EngineError::BadRequest(e.body_text()))?;
    let (image, entry_at) = read_capture(multipart, state.max_upload_bytes).await?;

    let exit_at = Utc::now();
    if exit_at < entry_at {
        return Err(RequestError::ExitBeforeEntry.into());
    }

    let plate = state
        .plate_reader
        .read_plate(&image.bytes, image.format)
        .await?
        .ok_or_else(|| EngineError::BadRequest(String::from("no plate found in the image")))?;
    debug!("Gate device {} captured {}", actor.user_id, plate);

    let submission = Submission {
        plate,
        entry_at,
        exit_at,
        channel: Channel::Captured,
    };
    let created = state.store.record_transit(actor, submission).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_fines(
    State(state): State<AppState>,
    actor: Actor,
    params: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Result<Json<Vec<FineReport>>, EngineError> {
    let Query(pairs) = params.map_err(|e| EngineError::BadRequest(e.body_text()))?;
    let query = FineQuery::from_pairs(&pairs)?;
    debug!("Fine listing for {} {}: {:?}", actor.role, actor.user_id, query);

    Ok(Json(state.store.list_fines(actor, query).await?))
}

async fn fine_document(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Response, EngineError> {
    if actor.role != Role::Motorist {
        return Err(EngineError::Forbidden(String::from(
            "only motorists download payment documents",
        )));
    }
    let fine_id: i64 = id
        .parse()
        .map_err(|_| EngineError::InvalidId(format!("'{id}' is not a valid fine id")))?;

    let report = state.store.fine_for_owner(fine_id, actor.user_id).await?;
    let pdf = state.renderer.render(&report)?;
    info!("Issued payment document for fine {}", fine_id);

    Ok((
        [
            (header::CONTENT_TYPE, String::from(document::CONTENT_TYPE)),
            (
                header::CONTENT_DISPOSITION,
                format!(
                    "attachment; filename=\"{}\"",
                    document::attachment_filename(fine_id)
                ),
            ),
        ],
        pdf,
    )
        .into_response())
}

async fn create_gate(
    State(state): State<AppState>,
    actor: Actor,
    body: Result<Json<NewGate>, JsonRejection>,
) -> Result<(StatusCode, Json<Gate>), EngineError> {
    only_operators(&actor)?;
    let Json(gate) = body.map_err(bad_body)?;
    Ok((StatusCode::CREATED, Json(state.store.create_gate(gate).await?)))
}

#[derive(Debug, Deserialize)]
struct RainUpdate {
    #[serde(rename = "pioggia")]
    raining: bool,
}

async fn set_gate_raining(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
    body: Result<Json<RainUpdate>, JsonRejection>,
) -> Result<Json<Gate>, EngineError> {
    only_operators(&actor)?;
    let gate_id: i64 = id
        .parse()
        .map_err(|_| EngineError::InvalidId(format!("'{id}' is not a valid gate id")))?;
    let Json(update) = body.map_err(bad_body)?;
    Ok(Json(
        state.store.set_gate_raining(gate_id, update.raining).await?,
    ))
}

async fn create_vehicle_type(
    State(state): State<AppState>,
    actor: Actor,
    body: Result<Json<NewVehicleType>, JsonRejection>,
) -> Result<(StatusCode, Json<VehicleType>), EngineError> {
    only_operators(&actor)?;
    let Json(vehicle_type) = body.map_err(bad_body)?;
    Ok((
        StatusCode::CREATED,
        Json(state.store.create_vehicle_type(vehicle_type).await?),
    ))
}

async fn create_vehicle(
    State(state): State<AppState>,
    actor: Actor,
    body: Result<Json<NewVehicle>, JsonRejection>,
) -> Result<(StatusCode, Json<Vehicle>), EngineError> {
    only_operators(&actor)?;
    let Json(vehicle) = body.map_err(bad_body)?;
    Ok((StatusCode::CREATED, Json(state.store.create_vehicle(vehicle).await?)))
}

async fn create_route(
    State(state): State<AppState>,
    actor: Actor,
    body: Result<Json<NewRoute>, JsonRejection>,
) -> Result<(StatusCode, Json<Route>), EngineError> {
    only_operators(&actor)?;
    let Json(route) = body.map_err(bad_body)?;
    Ok((StatusCode::CREATED, Json(state.store.create_route(route).await?)))
}

async fn bind_gate_device(
    State(state): State<AppState>,
    actor: Actor,
    body: Result<Json<GateBinding>, JsonRejection>,
) -> Result<StatusCode, EngineError> {
    only_operators(&actor)?;
    let Json(binding) = body.map_err(bad_body)?;
    state.store.bind_gate_device(binding).await?;
    Ok(StatusCode::NO_CONTENT)
}
