//! Reference data: the medication catalog and the drug interaction table.
//! Readable by any authenticated user, writable by admins.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;

use crate::api::endpoints::{body, created, parse_id, JsonBody};
use crate::api::error::ApiError;
use crate::api::types::{ApiContext, Requester};
use crate::authorization::Policy;
use crate::medications::{self, InteractionLookup, NewCatalogMedication, NewInteraction};
use crate::models::{DrugInteraction, Medication};

#[derive(Deserialize)]
pub struct CatalogQuery {
    pub search: Option<String>,
}

#[derive(Deserialize)]
pub struct InteractionQuery {
    pub medication1: Option<String>,
    pub medication2: Option<String>,
}

/// `GET /api/medications/catalog?search=`
pub async fn search(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    Query(query): Query<CatalogQuery>,
) -> Result<Json<Vec<Medication>>, ApiError> {
    requester.require(Policy::Authenticated)?;
    let conn = ctx.open_db()?;
    let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty());
    Ok(Json(medications::search_catalog(&conn, search)?))
}

pub async fn create_medication(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    payload: JsonBody<NewCatalogMedication>,
) -> Result<(StatusCode, Json<Medication>), ApiError> {
    requester.require(Policy::AdminOnly)?;
    let new = body(payload)?;
    let conn = ctx.open_db()?;
    Ok(created(medications::create_catalog_medication(&conn, new)?))
}

pub async fn list_interactions(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
) -> Result<Json<Vec<DrugInteraction>>, ApiError> {
    requester.require(Policy::Authenticated)?;
    let conn = ctx.open_db()?;
    Ok(Json(medications::list_interactions(&conn)?))
}

pub async fn create_interaction(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    payload: JsonBody<NewInteraction>,
) -> Result<(StatusCode, Json<DrugInteraction>), ApiError> {
    requester.require(Policy::AdminOnly)?;
    let new = body(payload)?;
    let conn = ctx.open_db()?;
    Ok(created(medications::create_interaction(&conn, new)?))
}

pub async fn retrieve_interaction(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    Path(id): Path<String>,
) -> Result<Json<DrugInteraction>, ApiError> {
    requester.require(Policy::Authenticated)?;
    let id = parse_id(&id, "Drug interaction")?;
    let conn = ctx.open_db()?;
    Ok(Json(medications::get_interaction(&conn, &id)?))
}

/// `GET /api/medications/interactions/check?medication1=&medication2=`
pub async fn check_interaction(
    State(ctx): State<ApiContext>,
    Extension(requester): Extension<Requester>,
    Query(query): Query<InteractionQuery>,
) -> Result<Json<InteractionLookup>, ApiError> {
    requester.require(Policy::Authenticated)?;
    let conn = ctx.open_db()?;
    let lookup = medications::check_interaction(
        &conn,
        query.medication1.as_deref(),
        query.medication2.as_deref(),
    )?;
    Ok(Json(lookup))
}
