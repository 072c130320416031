use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{self, resolve_tenant_context, AuthenticatedUser, TechnicianRole};
use crate::billing::{ActivationCode, Order, OrderStatus};
use crate::shared::errors::ServiceError;
use crate::shared::schema::{activation_codes, companies, orders, technicians};
use crate::shared::state::AppState;
use crate::shared::utils::locked_transaction;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = companies)]
pub struct Company {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = technicians)]
pub struct Technician {
    pub id: Uuid,
    pub company_id: Uuid,
    pub user_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    pub code: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub company_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RedeemResponse {
    pub company_id: Uuid,
    pub company_name: String,
    pub technician_id: Uuid,
    pub role: String,
    pub created_company: bool,
}

/// Name for a company provisioned at redemption: the redeemer's choice
/// when given, the purchase email otherwise.
fn company_name_for(requested: Option<&str>, order_email: &str) -> String {
    match requested {
        Some(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => order_email.to_string(),
    }
}

/// The redeemer that caused the company to exist administers it; later
/// redeemers of codes against the same order join as technicians.
fn role_for_redeemer(created_company: bool) -> TechnicianRole {
    if created_company {
        TechnicianRole::Administrator
    } else {
        TechnicianRole::Technician
    }
}

/// The only code path that creates a company for an order.
///
/// The order row lock makes the get-or-create idempotent under
/// concurrent redemptions, so an order can never end up with two
/// companies.
pub fn get_or_create_company_for_order(
    conn: &mut PgConnection,
    order_id: Uuid,
    fallback_name: &str,
) -> Result<(Company, bool), ServiceError> {
    let order: Order = orders::table.find(order_id).for_update().first(conn)?;

    if let Some(company_id) = order.company_id {
        let company: Company = companies::table.find(company_id).first(conn)?;
        return Ok((company, false));
    }

    let company = Company {
        id: Uuid::new_v4(),
        name: fallback_name.to_string(),
        created_at: Utc::now(),
    };
    diesel::insert_into(companies::table)
        .values(&company)
        .execute(conn)?;
    diesel::update(orders::table.find(order_id))
        .set((
            orders::company_id.eq(Some(company.id)),
            orders::updated_at.eq(Utc::now()),
        ))
        .execute(conn)?;

    log::info!("provisioned company {} for order {order_id}", company.id);
    Ok((company, true))
}

/// Redeems an activation code for the acting identity.
///
/// Validation short-circuits in a fixed order so every failure mode has
/// one specific answer: unknown code, used code, expired code, identity
/// already attached, order unpaid.
pub fn redeem_activation_code(
    conn: &mut PgConnection,
    user_id: Uuid,
    req: RedeemRequest,
) -> Result<RedeemResponse, ServiceError> {
    if req.first_name.trim().is_empty() || req.last_name.trim().is_empty() {
        return Err(ServiceError::Validation(
            "first and last name must not be empty".into(),
        ));
    }

    locked_transaction(conn, |conn| {
        let code_row: ActivationCode = activation_codes::table
            .filter(activation_codes::code.eq(&req.code))
            .for_update()
            .first(conn)
            .optional()?
            .ok_or(ServiceError::NotFound)?;

        if code_row.used {
            return Err(ServiceError::Conflict(
                "the activation code has already been used".into(),
            ));
        }
        if code_row.is_expired(Utc::now()) {
            return Err(ServiceError::Conflict("the activation code has expired".into()));
        }
        if auth::identity_company(conn, user_id)?.is_some() {
            return Err(ServiceError::Conflict(
                "this account is already attached to a company".into(),
            ));
        }

        let order: Order = orders::table
            .find(code_row.order_id)
            .for_update()
            .first(conn)?;
        if OrderStatus::parse(&order.status) != Some(OrderStatus::Paid) {
            return Err(ServiceError::Conflict(
                "the order for this activation code has not been paid".into(),
            ));
        }

        let name = company_name_for(req.company_name.as_deref(), &order.email);
        let (company, created_company) = get_or_create_company_for_order(conn, order.id, &name)?;

        let role = role_for_redeemer(created_company);
        let technician = Technician {
            id: Uuid::new_v4(),
            company_id: company.id,
            user_id: Some(user_id),
            first_name: req.first_name.trim().to_string(),
            last_name: req.last_name.trim().to_string(),
            email: req.email.clone().unwrap_or_else(|| order.email.clone()),
            phone_number: req.phone_number.clone().unwrap_or_default(),
            role: role.as_str().to_string(),
            is_active: true,
            created_at: Utc::now(),
        };
        diesel::insert_into(technicians::table)
            .values(&technician)
            .execute(conn)?;

        diesel::update(activation_codes::table.find(code_row.id))
            .set((
                activation_codes::used.eq(true),
                activation_codes::used_by.eq(Some(user_id)),
            ))
            .execute(conn)?;

        Ok(RedeemResponse {
            company_id: company.id,
            company_name: company.name,
            technician_id: technician.id,
            role: role.as_str().to_string(),
            created_company,
        })
    })
}

pub async fn redeem(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<RedeemRequest>,
) -> Result<Json<RedeemResponse>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(ServiceError::from)?;
    let response = redeem_activation_code(&mut conn, user.0, req)?;
    Ok(Json(response))
}

pub async fn list_technicians(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<Technician>>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(ServiceError::from)?;
    let ctx = resolve_tenant_context(&mut conn, user.0)?;

    let rows: Vec<Technician> = technicians::table
        .filter(technicians::company_id.eq(ctx.company_id))
        .filter(technicians::is_active.eq(true))
        .order((technicians::last_name.asc(), technicians::first_name.asc()))
        .load(&mut conn)
        .map_err(ServiceError::from)?;

    Ok(Json(rows))
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub technician_id: Uuid,
    pub company_id: Uuid,
    pub company_name: String,
    pub role: String,
}

pub async fn current_profile(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<ProfileResponse>, (StatusCode, String)> {
    let mut conn = state.conn.get().map_err(ServiceError::from)?;
    let ctx = resolve_tenant_context(&mut conn, user.0)?;

    let company_name: String = companies::table
        .find(ctx.company_id)
        .select(companies::name)
        .first(&mut conn)
        .map_err(ServiceError::from)?;

    Ok(Json(ProfileResponse {
        technician_id: ctx.technician_id,
        company_id: ctx.company_id,
        company_name,
        role: ctx.role.as_str().to_string(),
    }))
}

pub fn configure_tenancy_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/activation/redeem", post(redeem))
        .route("/api/technicians", get(list_technicians))
        .route("/api/me", get(current_profile))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_company_name_prefers_requested() {
        assert_eq!(
            company_name_for(Some("Serwis Kasowy"), "buyer@example.com"),
            "Serwis Kasowy"
        );
        assert_eq!(
            company_name_for(Some("  padded  "), "buyer@example.com"),
            "padded"
        );
    }

    #[test]
    fn test_company_name_falls_back_to_order_email() {
        assert_eq!(company_name_for(None, "buyer@example.com"), "buyer@example.com");
        assert_eq!(
            company_name_for(Some("   "), "buyer@example.com"),
            "buyer@example.com"
        );
    }

    #[test]
    fn test_first_redeemer_becomes_administrator() {
        assert_eq!(role_for_redeemer(true), TechnicianRole::Administrator);
        assert_eq!(role_for_redeemer(false), TechnicianRole::Technician);
    }
}
