pub mod lifecycle;
pub mod sequence;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{resolve_tenant_context, AuthenticatedUser};
use crate::shared::errors::ServiceError;
use crate::shared::schema::service_tickets;
use crate::shared::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketStatus {
    Open,
    InProgress,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(Self::Open),
            "in_progress" => Some(Self::InProgress),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Open | Self::InProgress)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketType {
    Service,
    Reading,
    Repair,
    Other,
}

impl TicketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Reading => "reading",
            Self::Repair => "repair",
            Self::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "service" => Some(Self::Service),
            "reading" => Some(Self::Reading),
            "repair" => Some(Self::Repair),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketResolution {
    Resolved,
    Irreparable,
    NoFault,
    /// Sentinel for "not decided yet"; never accepted by `resolve`.
    Unresolved,
}

impl TicketResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolved => "resolved",
            Self::Irreparable => "irreparable",
            Self::NoFault => "no_fault",
            Self::Unresolved => "unresolved",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "resolved" => Some(Self::Resolved),
            "irreparable" => Some(Self::Irreparable),
            "no_fault" => Some(Self::NoFault),
            "unresolved" => Some(Self::Unresolved),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = service_tickets)]
pub struct ServiceTicket {
    pub id: Uuid,
    pub company_id: Uuid,
    pub client_id: Uuid,
    pub device_id: Uuid,
    pub assigned_technician_id: Option<Uuid>,
    pub ticket_number: String,
    pub title: String,
    pub description: String,
    pub ticket_type: String,
    pub status: String,
    pub resolution: Option<String>,
    pub resolution_notes: String,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTicketRequest {
    pub title: String,
    pub description: Option<String>,
    pub ticket_type: String,
    pub client_id: Uuid,
    pub device_id: Uuid,
    pub assigned_technician_id: Option<Uuid>,
    pub scheduled_for: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTicketRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub device_id: Option<Uuid>,
    pub assigned_technician_id: Option<Uuid>,
    pub scheduled_for: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ResolveTicketRequest {
    pub resolution: String,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
    pub status: Option<String>,
    pub ticket_type: Option<String>,
    pub client_id: Option<Uuid>,
    pub device_id: Option<Uuid>,
    pub assigned_technician_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn create_ticket(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<CreateTicketRequest>,
) -> Result<Json<ServiceTicket>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(ServiceError::from)?;
    let ctx = resolve_tenant_context(&mut conn, user.0)?;

    let ticket =
        lifecycle::create_ticket(&mut conn, &ctx, &state.config.service.ticket_prefix, req)?;
    Ok(Json(ticket))
}

pub async fn list_tickets(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ServiceTicket>>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(ServiceError::from)?;
    let ctx = resolve_tenant_context(&mut conn, user.0)?;

    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let offset = query.offset.unwrap_or(0).max(0);

    let mut q = service_tickets::table
        .filter(service_tickets::company_id.eq(ctx.company_id))
        .into_boxed();

    if let Some(status) = query.status {
        q = q.filter(service_tickets::status.eq(status));
    }

    if let Some(ticket_type) = query.ticket_type {
        q = q.filter(service_tickets::ticket_type.eq(ticket_type));
    }

    if let Some(client_id) = query.client_id {
        q = q.filter(service_tickets::client_id.eq(client_id));
    }

    if let Some(device_id) = query.device_id {
        q = q.filter(service_tickets::device_id.eq(device_id));
    }

    if let Some(technician_id) = query.assigned_technician_id {
        q = q.filter(service_tickets::assigned_technician_id.eq(technician_id));
    }

    if let Some(search) = query.search {
        let pattern = format!("%{search}%");
        q = q.filter(
            service_tickets::title
                .ilike(pattern.clone())
                .or(service_tickets::ticket_number.ilike(pattern)),
        );
    }

    let tickets: Vec<ServiceTicket> = q
        .order(service_tickets::created_at.desc())
        .limit(limit)
        .offset(offset)
        .load(&mut conn)
        .map_err(ServiceError::from)?;

    Ok(Json(tickets))
}

pub async fn get_ticket(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ServiceTicket>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(ServiceError::from)?;
    let ctx = resolve_tenant_context(&mut conn, user.0)?;

    let ticket: ServiceTicket = service_tickets::table
        .filter(service_tickets::id.eq(id))
        .filter(service_tickets::company_id.eq(ctx.company_id))
        .first(&mut conn)
        .map_err(ServiceError::from)?;

    Ok(Json(ticket))
}

pub async fn update_ticket(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateTicketRequest>,
) -> Result<Json<ServiceTicket>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(ServiceError::from)?;
    let ctx = resolve_tenant_context(&mut conn, user.0)?;

    let ticket = lifecycle::update_ticket(&mut conn, &ctx, id, req)?;
    Ok(Json(ticket))
}

pub async fn resolve_ticket(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(req): Json<ResolveTicketRequest>,
) -> Result<Json<ServiceTicket>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(ServiceError::from)?;
    let ctx = resolve_tenant_context(&mut conn, user.0)?;

    let ticket = lifecycle::resolve_ticket(&mut conn, &ctx, id, req)?;
    Ok(Json(ticket))
}

pub fn configure_tickets_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/tickets", get(list_tickets).post(create_ticket))
        .route("/api/tickets/:id", get(get_ticket).put(update_ticket))
        .route("/api/tickets/:id/resolve", put(resolve_ticket))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [TicketStatus::Open, TicketStatus::InProgress, TicketStatus::Closed] {
            assert_eq!(TicketStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TicketStatus::parse("resolved"), None);
    }

    #[test]
    fn test_active_statuses() {
        assert!(TicketStatus::Open.is_active());
        assert!(TicketStatus::InProgress.is_active());
        assert!(!TicketStatus::Closed.is_active());
    }

    #[test]
    fn test_ticket_type_round_trip() {
        for kind in [
            TicketType::Service,
            TicketType::Reading,
            TicketType::Repair,
            TicketType::Other,
        ] {
            assert_eq!(TicketType::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(TicketType::parse("inspection"), None);
    }

    #[test]
    fn test_resolution_round_trip() {
        for resolution in [
            TicketResolution::Resolved,
            TicketResolution::Irreparable,
            TicketResolution::NoFault,
            TicketResolution::Unresolved,
        ] {
            assert_eq!(TicketResolution::parse(resolution.as_str()), Some(resolution));
        }
        assert_eq!(TicketResolution::parse("done"), None);
    }
}
