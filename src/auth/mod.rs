use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use diesel::prelude::*;
use uuid::Uuid;

use crate::shared::errors::ServiceError;
use crate::shared::schema::technicians;

/// Identity established by the session layer upstream of the core.
///
/// The session layer is trusted to authenticate, but every cross-entity
/// reference is still re-validated against the resolved company.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .ok_or((StatusCode::UNAUTHORIZED, "missing identity".to_string()))?;

        let user_id = Uuid::parse_str(value)
            .map_err(|_| (StatusCode::UNAUTHORIZED, "invalid identity".to_string()))?;

        Ok(Self(user_id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TechnicianRole {
    Administrator,
    Technician,
}

impl TechnicianRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Administrator => "administrator",
            Self::Technician => "technician",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "administrator" => Some(Self::Administrator),
            "technician" => Some(Self::Technician),
            _ => None,
        }
    }
}

/// Resolved tenant membership of the acting identity, established once
/// at the request boundary and passed into every core operation.
#[derive(Debug, Clone, Copy)]
pub struct TenantContext {
    pub user_id: Uuid,
    pub technician_id: Uuid,
    pub company_id: Uuid,
    pub role: TechnicianRole,
}

impl TenantContext {
    pub fn is_admin(&self) -> bool {
        self.role == TechnicianRole::Administrator
    }
}

/// Looks up the technician profile bound to the identity.
///
/// An identity without a profile has no tenant and gets `NotFound`, the
/// same answer a cross-tenant probe would get.
pub fn resolve_tenant_context(
    conn: &mut PgConnection,
    user_id: Uuid,
) -> Result<TenantContext, ServiceError> {
    let (technician_id, company_id, role): (Uuid, Uuid, String) = technicians::table
        .filter(technicians::user_id.eq(user_id))
        .filter(technicians::is_active.eq(true))
        .select((technicians::id, technicians::company_id, technicians::role))
        .first(conn)?;

    let role = TechnicianRole::parse(&role)
        .ok_or_else(|| ServiceError::Validation(format!("unknown role '{role}'")))?;

    Ok(TenantContext {
        user_id,
        technician_id,
        company_id,
        role,
    })
}

/// Company the identity is attached to, if any. Used by the checkout and
/// redemption guards, which apply to not-yet-provisioned identities.
pub fn identity_company(
    conn: &mut PgConnection,
    user_id: Uuid,
) -> Result<Option<Uuid>, ServiceError> {
    let company: Option<Uuid> = technicians::table
        .filter(technicians::user_id.eq(user_id))
        .select(technicians::company_id)
        .first(conn)
        .optional()?;
    Ok(company)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        assert_eq!(
            TechnicianRole::parse("administrator"),
            Some(TechnicianRole::Administrator)
        );
        assert_eq!(
            TechnicianRole::parse("technician"),
            Some(TechnicianRole::Technician)
        );
        assert_eq!(TechnicianRole::parse("root"), None);
        assert_eq!(TechnicianRole::Administrator.as_str(), "administrator");
    }

    #[test]
    fn test_admin_check() {
        let ctx = TenantContext {
            user_id: Uuid::new_v4(),
            technician_id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            role: TechnicianRole::Administrator,
        };
        assert!(ctx.is_admin());
    }
}
