use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::auth::{resolve_tenant_context, AuthenticatedUser};
use crate::shared::errors::ServiceError;
use crate::shared::schema::{clients, fiscal_devices, manufacturers, service_tickets};
use crate::shared::state::AppState;
use crate::shared::utils::locked_transaction;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = clients)]
pub struct Client {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub address: String,
    pub nip: String,
    pub regon: String,
    pub phone_number: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = manufacturers)]
pub struct Manufacturer {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateClientRequest {
    pub name: String,
    pub address: Option<String>,
    pub nip: String,
    pub regon: Option<String>,
    pub phone_number: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateClientRequest {
    pub name: Option<String>,
    pub address: Option<String>,
    pub regon: Option<String>,
    pub phone_number: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateManufacturerRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn create_client(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<CreateClientRequest>,
) -> Result<Json<Client>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(ServiceError::from)?;
    let ctx = resolve_tenant_context(&mut conn, user.0)?;

    if req.name.trim().is_empty() {
        return Err(ServiceError::Validation("name must not be empty".into()).into());
    }
    if req.nip.trim().is_empty() {
        return Err(ServiceError::Validation("nip must not be empty".into()).into());
    }

    let client = Client {
        id: Uuid::new_v4(),
        company_id: ctx.company_id,
        name: req.name,
        address: req.address.unwrap_or_default(),
        nip: req.nip,
        regon: req.regon.unwrap_or_default(),
        phone_number: req.phone_number.unwrap_or_default(),
        email: req.email.unwrap_or_default(),
        created_at: Utc::now(),
    };

    diesel::insert_into(clients::table)
        .values(&client)
        .execute(&mut conn)
        .map_err(|e| {
            if ServiceError::is_unique_violation(&e, "nip") {
                ServiceError::Conflict("a client with this NIP already exists".into())
            } else {
                e.into()
            }
        })?;

    Ok(Json(client))
}

pub async fn list_clients(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Client>>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(ServiceError::from)?;
    let ctx = resolve_tenant_context(&mut conn, user.0)?;

    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let offset = query.offset.unwrap_or(0).max(0);

    let mut q = clients::table
        .filter(clients::company_id.eq(ctx.company_id))
        .into_boxed();

    if let Some(search) = query.search {
        let pattern = format!("%{search}%");
        q = q.filter(clients::name.ilike(pattern.clone()).or(clients::nip.ilike(pattern)));
    }

    let rows: Vec<Client> = q
        .order(clients::name.asc())
        .limit(limit)
        .offset(offset)
        .load(&mut conn)
        .map_err(ServiceError::from)?;

    Ok(Json(rows))
}

pub async fn get_client(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Client>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(ServiceError::from)?;
    let ctx = resolve_tenant_context(&mut conn, user.0)?;

    let client: Client = clients::table
        .filter(clients::id.eq(id))
        .filter(clients::company_id.eq(ctx.company_id))
        .first(&mut conn)
        .map_err(ServiceError::from)?;

    Ok(Json(client))
}

pub async fn update_client(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateClientRequest>,
) -> Result<Json<Client>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(ServiceError::from)?;
    let ctx = resolve_tenant_context(&mut conn, user.0)?;

    let previous: Client = clients::table
        .filter(clients::id.eq(id))
        .filter(clients::company_id.eq(ctx.company_id))
        .first(&mut conn)
        .map_err(ServiceError::from)?;

    diesel::update(clients::table.find(id))
        .set((
            clients::name.eq(req.name.unwrap_or_else(|| previous.name.clone())),
            clients::address.eq(req.address.unwrap_or_else(|| previous.address.clone())),
            clients::regon.eq(req.regon.unwrap_or_else(|| previous.regon.clone())),
            clients::phone_number
                .eq(req.phone_number.unwrap_or_else(|| previous.phone_number.clone())),
            clients::email.eq(req.email.unwrap_or_else(|| previous.email.clone())),
        ))
        .execute(&mut conn)
        .map_err(ServiceError::from)?;

    let updated: Client = clients::table
        .find(id)
        .first(&mut conn)
        .map_err(ServiceError::from)?;

    Ok(Json(updated))
}

pub async fn delete_client(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(ServiceError::from)?;
    let ctx = resolve_tenant_context(&mut conn, user.0)?;

    locked_transaction(&mut conn, |conn| {
        clients::table
            .filter(clients::id.eq(id))
            .filter(clients::company_id.eq(ctx.company_id))
            .select(clients::id)
            .first::<Uuid>(conn)
            .optional()?
            .ok_or(ServiceError::NotFound)?;

        let has_devices: bool = diesel::select(diesel::dsl::exists(
            fiscal_devices::table.filter(fiscal_devices::client_id.eq(id)),
        ))
        .get_result(conn)?;
        let has_tickets: bool = diesel::select(diesel::dsl::exists(
            service_tickets::table.filter(service_tickets::client_id.eq(id)),
        ))
        .get_result(conn)?;
        if has_devices || has_tickets {
            return Err(ServiceError::Conflict(
                "a client with devices or tickets cannot be deleted".into(),
            ));
        }

        diesel::delete(clients::table.find(id)).execute(conn)?;
        Ok(())
    })?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_manufacturers(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<Manufacturer>>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(ServiceError::from)?;
    let ctx = resolve_tenant_context(&mut conn, user.0)?;

    let rows: Vec<Manufacturer> = manufacturers::table
        .filter(manufacturers::company_id.eq(ctx.company_id))
        .order(manufacturers::name.asc())
        .load(&mut conn)
        .map_err(ServiceError::from)?;

    Ok(Json(rows))
}

pub async fn create_manufacturer(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<CreateManufacturerRequest>,
) -> Result<Json<Manufacturer>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(ServiceError::from)?;
    let ctx = resolve_tenant_context(&mut conn, user.0)?;

    if req.name.trim().is_empty() {
        return Err(ServiceError::Validation("name must not be empty".into()).into());
    }

    let manufacturer = Manufacturer {
        id: Uuid::new_v4(),
        company_id: ctx.company_id,
        name: req.name,
    };

    diesel::insert_into(manufacturers::table)
        .values(&manufacturer)
        .execute(&mut conn)
        .map_err(|e| {
            if ServiceError::is_unique_violation(&e, "manufacturers") {
                ServiceError::Conflict("a manufacturer with this name already exists".into())
            } else {
                e.into()
            }
        })?;

    Ok(Json(manufacturer))
}

/// Shape of the subset of registry data the frontend needs.
#[derive(Debug, Serialize)]
pub struct RegistryCompanyData {
    pub name: String,
    pub nip: String,
    pub regon: String,
    pub address: String,
}

/// Proxies a lookup against the external tax-registry ("white list")
/// API. The registry is an opaque collaborator; its payload is reduced
/// to the fields the client form needs.
pub async fn fetch_company_data(
    State(state): State<Arc<AppState>>,
    _user: AuthenticatedUser,
    Path(nip): Path<String>,
) -> Result<Json<RegistryCompanyData>, (StatusCode, String)> {
    let today = Utc::now().date_naive().format("%Y-%m-%d").to_string();
    let url = format!(
        "{}/{}?date={}",
        state.config.service.registry_base_url, nip, today
    );

    let response = reqwest::Client::new()
        .get(&url)
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                ServiceError::External("the registry did not respond in time".into())
            } else {
                ServiceError::External("the registry is unreachable".into())
            }
        })?;

    let body: serde_json::Value = response
        .json()
        .await
        .map_err(|_| ServiceError::External("the registry returned an unreadable answer".into()))?;

    let subject = body
        .get("result")
        .and_then(|r| r.get("subject"))
        .ok_or(ServiceError::NotFound)?;

    let field = |key: &str| {
        subject
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };

    let address = subject
        .get("workingAddress")
        .or_else(|| subject.get("residenceAddress"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    Ok(Json(RegistryCompanyData {
        name: field("name"),
        nip: field("nip"),
        regon: field("regon"),
        address,
    }))
}

pub fn configure_clients_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/clients", get(list_clients).post(create_client))
        .route(
            "/api/clients/:id",
            get(get_client).put(update_client).delete(delete_client),
        )
        .route(
            "/api/manufacturers",
            get(list_manufacturers).post(create_manufacturer),
        )
        .route("/api/company-data/:nip", get(fetch_company_data))
}
