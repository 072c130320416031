pub mod sync;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{resolve_tenant_context, AuthenticatedUser};
use crate::notify::{self, NotificationKind};
use crate::shared::errors::ServiceError;
use crate::shared::schema::{clients, device_history, fiscal_devices, manufacturers, service_tickets};
use crate::shared::state::AppState;
use crate::shared::utils::locked_transaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Active,
    Inactive,
    Serviced,
    Decommissioned,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Serviced => "serviced",
            Self::Decommissioned => "decommissioned",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "serviced" => Some(Self::Serviced),
            "decommissioned" => Some(Self::Decommissioned),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    DeviceCreated,
    ServicePerformed,
    TicketCreated,
    TicketCompleted,
    StatusChanged,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeviceCreated => "device_created",
            Self::ServicePerformed => "service_performed",
            Self::TicketCreated => "ticket_created",
            Self::TicketCompleted => "ticket_completed",
            Self::StatusChanged => "status_changed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = fiscal_devices)]
pub struct FiscalDevice {
    pub id: Uuid,
    pub client_id: Uuid,
    pub brand_id: Uuid,
    pub model_name: String,
    pub unique_number: String,
    pub serial_number: String,
    pub sale_date: NaiveDate,
    pub last_service_date: Option<NaiveDate>,
    pub status: String,
    pub operating_instructions: String,
    pub remarks: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = device_history)]
pub struct DeviceHistoryEntry {
    pub id: Uuid,
    pub device_id: Uuid,
    pub action: String,
    pub description: String,
    pub actor_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateDeviceRequest {
    pub client_id: Uuid,
    pub brand_id: Uuid,
    pub model_name: String,
    pub unique_number: String,
    pub serial_number: String,
    pub sale_date: NaiveDate,
    pub operating_instructions: Option<String>,
    pub remarks: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateDeviceRequest {
    pub brand_id: Option<Uuid>,
    pub model_name: Option<String>,
    pub serial_number: Option<String>,
    pub sale_date: Option<NaiveDate>,
    pub status: Option<String>,
    pub operating_instructions: Option<String>,
    pub remarks: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub client_id: Option<Uuid>,
    pub status: Option<String>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Appends an immutable audit entry to a device's history.
pub fn append_history(
    conn: &mut PgConnection,
    device_id: Uuid,
    action: ActionKind,
    description: String,
    actor_id: Option<Uuid>,
) -> Result<(), ServiceError> {
    let entry = DeviceHistoryEntry {
        id: Uuid::new_v4(),
        device_id,
        action: action.as_str().to_string(),
        description,
        actor_id,
        created_at: Utc::now(),
    };
    diesel::insert_into(device_history::table)
        .values(&entry)
        .execute(conn)?;
    Ok(())
}

/// Loads a device scoped to the company; a device of another tenant is
/// reported as missing.
fn load_device_scoped(
    conn: &mut PgConnection,
    company_id: Uuid,
    device_id: Uuid,
) -> Result<FiscalDevice, ServiceError> {
    fiscal_devices::table
        .inner_join(clients::table)
        .filter(fiscal_devices::id.eq(device_id))
        .filter(clients::company_id.eq(company_id))
        .select(fiscal_devices::all_columns)
        .first(conn)
        .optional()?
        .ok_or(ServiceError::NotFound)
}

fn ensure_client_in_company(
    conn: &mut PgConnection,
    company_id: Uuid,
    client_id: Uuid,
) -> Result<(), ServiceError> {
    clients::table
        .filter(clients::id.eq(client_id))
        .filter(clients::company_id.eq(company_id))
        .select(clients::id)
        .first::<Uuid>(conn)
        .optional()?
        .map(|_| ())
        .ok_or(ServiceError::NotFound)
}

fn ensure_brand_in_company(
    conn: &mut PgConnection,
    company_id: Uuid,
    brand_id: Uuid,
) -> Result<(), ServiceError> {
    manufacturers::table
        .filter(manufacturers::id.eq(brand_id))
        .filter(manufacturers::company_id.eq(company_id))
        .select(manufacturers::id)
        .first::<Uuid>(conn)
        .optional()?
        .map(|_| ())
        .ok_or(ServiceError::NotFound)
}

/// A device is due for inspection when the configured interval has
/// passed since the last recorded service, or when no service was ever
/// recorded.
pub fn inspection_due(
    last_service_date: Option<NaiveDate>,
    interval_days: i64,
    today: NaiveDate,
) -> bool {
    match last_service_date {
        Some(last) => last + Duration::days(interval_days) <= today,
        None => true,
    }
}

pub async fn create_device(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<CreateDeviceRequest>,
) -> Result<Json<FiscalDevice>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(ServiceError::from)?;
    let ctx = resolve_tenant_context(&mut conn, user.0)?;

    let device = locked_transaction(&mut conn, |conn| {
        ensure_client_in_company(conn, ctx.company_id, req.client_id)?;
        ensure_brand_in_company(conn, ctx.company_id, req.brand_id)?;

        let device = FiscalDevice {
            id: Uuid::new_v4(),
            client_id: req.client_id,
            brand_id: req.brand_id,
            model_name: req.model_name.clone(),
            unique_number: req.unique_number.clone(),
            serial_number: req.serial_number.clone(),
            sale_date: req.sale_date,
            last_service_date: None,
            status: DeviceStatus::Active.as_str().to_string(),
            operating_instructions: req.operating_instructions.clone().unwrap_or_default(),
            remarks: req.remarks.clone().unwrap_or_default(),
        };

        diesel::insert_into(fiscal_devices::table)
            .values(&device)
            .execute(conn)
            .map_err(|e| {
                if ServiceError::is_unique_violation(&e, "unique_number") {
                    ServiceError::Conflict(
                        "a device with this unique number is already registered".into(),
                    )
                } else {
                    e.into()
                }
            })?;

        append_history(
            conn,
            device.id,
            ActionKind::DeviceCreated,
            format!("Device {} {} registered.", device.model_name, device.serial_number),
            Some(ctx.technician_id),
        )?;

        Ok(device)
    })?;

    Ok(Json(device))
}

pub async fn list_devices(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<FiscalDevice>>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(ServiceError::from)?;
    let ctx = resolve_tenant_context(&mut conn, user.0)?;

    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let offset = query.offset.unwrap_or(0).max(0);

    let mut q = fiscal_devices::table
        .inner_join(clients::table)
        .filter(clients::company_id.eq(ctx.company_id))
        .select(fiscal_devices::all_columns)
        .into_boxed();

    if let Some(client_id) = query.client_id {
        q = q.filter(fiscal_devices::client_id.eq(client_id));
    }

    if let Some(status) = query.status {
        q = q.filter(fiscal_devices::status.eq(status));
    }

    if let Some(search) = query.search {
        let pattern = format!("%{search}%");
        q = q.filter(
            fiscal_devices::model_name
                .ilike(pattern.clone())
                .or(fiscal_devices::serial_number.ilike(pattern.clone()))
                .or(fiscal_devices::unique_number.ilike(pattern)),
        );
    }

    let devices: Vec<FiscalDevice> = q
        .order(fiscal_devices::sale_date.desc())
        .limit(limit)
        .offset(offset)
        .load(&mut conn)
        .map_err(ServiceError::from)?;

    Ok(Json(devices))
}

pub async fn get_device(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<FiscalDevice>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(ServiceError::from)?;
    let ctx = resolve_tenant_context(&mut conn, user.0)?;

    let device = load_device_scoped(&mut conn, ctx.company_id, id)?;
    Ok(Json(device))
}

pub async fn update_device(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateDeviceRequest>,
) -> Result<Json<FiscalDevice>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(ServiceError::from)?;
    let ctx = resolve_tenant_context(&mut conn, user.0)?;

    let new_status = req
        .status
        .as_deref()
        .map(|s| {
            DeviceStatus::parse(s)
                .ok_or_else(|| ServiceError::Validation(format!("unknown device status '{s}'")))
        })
        .transpose()
        .map_err(ServiceError::from)?;

    if new_status == Some(DeviceStatus::Serviced) {
        return Err(ServiceError::Validation(
            "'serviced' is derived from open tickets and cannot be set manually".into(),
        )
        .into());
    }

    let device = locked_transaction(&mut conn, |conn| {
        load_device_scoped(conn, ctx.company_id, id)?;

        // Lock before reading so a concurrent synchronizer run cannot
        // interleave with this manual edit.
        let previous: FiscalDevice = fiscal_devices::table
            .find(id)
            .for_update()
            .first(conn)?;

        if let Some(brand_id) = req.brand_id {
            ensure_brand_in_company(conn, ctx.company_id, brand_id)?;
        }

        let target_status = new_status
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|| previous.status.clone());

        diesel::update(fiscal_devices::table.find(id))
            .set((
                fiscal_devices::brand_id.eq(req.brand_id.unwrap_or(previous.brand_id)),
                fiscal_devices::model_name
                    .eq(req.model_name.clone().unwrap_or_else(|| previous.model_name.clone())),
                fiscal_devices::serial_number.eq(req
                    .serial_number
                    .clone()
                    .unwrap_or_else(|| previous.serial_number.clone())),
                fiscal_devices::sale_date.eq(req.sale_date.unwrap_or(previous.sale_date)),
                fiscal_devices::status.eq(target_status.clone()),
                fiscal_devices::operating_instructions.eq(req
                    .operating_instructions
                    .clone()
                    .unwrap_or_else(|| previous.operating_instructions.clone())),
                fiscal_devices::remarks
                    .eq(req.remarks.clone().unwrap_or_else(|| previous.remarks.clone())),
            ))
            .execute(conn)?;

        if target_status != previous.status {
            append_history(
                conn,
                id,
                ActionKind::StatusChanged,
                format!(
                    "Device status manually changed from '{}' to '{}'.",
                    previous.status, target_status
                ),
                Some(ctx.technician_id),
            )?;
        }

        let updated: FiscalDevice = fiscal_devices::table.find(id).first(conn)?;
        Ok(updated)
    })?;

    Ok(Json(device))
}

pub async fn delete_device(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(ServiceError::from)?;
    let ctx = resolve_tenant_context(&mut conn, user.0)?;

    locked_transaction(&mut conn, |conn| {
        load_device_scoped(conn, ctx.company_id, id)?;

        let has_tickets: bool = diesel::select(diesel::dsl::exists(
            service_tickets::table.filter(service_tickets::device_id.eq(id)),
        ))
        .get_result(conn)?;
        if has_tickets {
            return Err(ServiceError::Conflict(
                "a device with service tickets cannot be deleted".into(),
            ));
        }

        diesel::delete(device_history::table.filter(device_history::device_id.eq(id)))
            .execute(conn)?;
        diesel::delete(fiscal_devices::table.find(id)).execute(conn)?;
        Ok(())
    })?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_device_history(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<DeviceHistoryEntry>>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(ServiceError::from)?;
    let ctx = resolve_tenant_context(&mut conn, user.0)?;

    load_device_scoped(&mut conn, ctx.company_id, id)?;

    let entries: Vec<DeviceHistoryEntry> = device_history::table
        .filter(device_history::device_id.eq(id))
        .order(device_history::created_at.desc())
        .load(&mut conn)
        .map_err(ServiceError::from)?;

    Ok(Json(entries))
}

#[derive(Debug, Serialize)]
pub struct ReminderResponse {
    pub job_id: Uuid,
    pub due: bool,
}

/// Enqueues an inspection-reminder email for the device's owner.
/// Delivery is handled by the notification dispatcher, not here.
pub async fn send_inspection_reminder(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ReminderResponse>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(ServiceError::from)?;
    let ctx = resolve_tenant_context(&mut conn, user.0)?;

    let device = load_device_scoped(&mut conn, ctx.company_id, id)?;
    let (client_name, client_email): (String, String) = clients::table
        .filter(clients::id.eq(device.client_id))
        .select((clients::name, clients::email))
        .first(&mut conn)
        .map_err(ServiceError::from)?;

    if client_email.is_empty() {
        return Err(ServiceError::Validation(
            "the device owner has no email address on file".into(),
        )
        .into());
    }

    let interval_days = state.config.service.service_interval_days;
    let today = Utc::now().date_naive();
    let due = inspection_due(device.last_service_date, interval_days, today);
    let next_service_date = device
        .last_service_date
        .map(|last| last + Duration::days(interval_days));

    let job_id = notify::enqueue(
        &mut conn,
        NotificationKind::InspectionReminder,
        serde_json::json!({
            "device_id": device.id,
            "client_name": client_name,
            "client_email": client_email,
            "model_name": device.model_name,
            "unique_number": device.unique_number,
            "last_service_date": device.last_service_date,
            "next_service_date": next_service_date,
            "due": due,
        }),
    )?;

    Ok(Json(ReminderResponse { job_id, due }))
}

pub fn configure_devices_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/devices", get(list_devices).post(create_device))
        .route(
            "/api/devices/:id",
            get(get_device).put(update_device).delete(delete_device),
        )
        .route("/api/devices/:id/history", get(list_device_history))
        .route("/api/devices/:id/reminder", post(send_inspection_reminder))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_status_round_trip() {
        for status in [
            DeviceStatus::Active,
            DeviceStatus::Inactive,
            DeviceStatus::Serviced,
            DeviceStatus::Decommissioned,
        ] {
            assert_eq!(DeviceStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(DeviceStatus::parse("broken"), None);
    }

    #[test]
    fn test_inspection_due_without_service_history() {
        let today = NaiveDate::from_ymd_opt(2026, 8, 8).unwrap();
        assert!(inspection_due(None, 365, today));
    }

    #[test]
    fn test_inspection_due_after_interval() {
        let today = NaiveDate::from_ymd_opt(2026, 8, 8).unwrap();
        let last = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();
        assert!(inspection_due(Some(last), 365, today));
    }

    #[test]
    fn test_inspection_not_due_within_interval() {
        let today = NaiveDate::from_ymd_opt(2026, 8, 8).unwrap();
        let last = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();
        assert!(!inspection_due(Some(last), 365, today));
    }
}
