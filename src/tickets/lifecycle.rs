use chrono::{Datelike, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::auth::TenantContext;
use crate::devices::sync;
use crate::shared::errors::ServiceError;
use crate::shared::schema::{clients, fiscal_devices, service_tickets, technicians};
use crate::shared::utils::locked_transaction;

use super::sequence;
use super::{
    CreateTicketRequest, ResolveTicketRequest, ServiceTicket, TicketResolution, TicketStatus,
    TicketType, UpdateTicketRequest,
};

/// Event emitted by a lifecycle operation, consumed synchronously by the
/// device synchronizer inside the same transaction. Carries the
/// pre-write persisted snapshot of the status/device pair so consumers
/// never trust an in-memory "old" value.
#[derive(Debug, Clone)]
pub enum TicketEvent {
    Created {
        ticket_id: Uuid,
        device_id: Uuid,
        ticket_number: String,
        title: String,
    },
    StatusChanged {
        ticket_id: Uuid,
        previous_status: Option<TicketStatus>,
        new_status: TicketStatus,
        previous_device_id: Option<Uuid>,
        new_device_id: Uuid,
    },
    Resolved {
        ticket_id: Uuid,
        device_id: Uuid,
        ticket_number: String,
        resolution: TicketResolution,
        ticket_type: TicketType,
    },
}

/// Status changes are restricted to the assigned technician and tenant
/// administrators.
fn can_modify(ctx: &TenantContext, assigned_technician_id: Option<Uuid>) -> bool {
    ctx.is_admin() || assigned_technician_id == Some(ctx.technician_id)
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

/// Returns the owning client of the device, scoped to the company.
/// A device of another tenant reads as missing.
fn device_owner_in_company(
    conn: &mut PgConnection,
    company_id: Uuid,
    device_id: Uuid,
) -> Result<Uuid, ServiceError> {
    fiscal_devices::table
        .inner_join(clients::table)
        .filter(fiscal_devices::id.eq(device_id))
        .filter(clients::company_id.eq(company_id))
        .select(fiscal_devices::client_id)
        .first::<Uuid>(conn)
        .optional()?
        .ok_or(ServiceError::NotFound)
}

fn ensure_technician_in_company(
    conn: &mut PgConnection,
    company_id: Uuid,
    technician_id: Uuid,
) -> Result<(), ServiceError> {
    technicians::table
        .filter(technicians::id.eq(technician_id))
        .filter(technicians::company_id.eq(company_id))
        .select(technicians::id)
        .first::<Uuid>(conn)
        .optional()?
        .map(|_| ())
        .ok_or(ServiceError::NotFound)
}

fn parse_stored_status(value: &str) -> Result<TicketStatus, ServiceError> {
    TicketStatus::parse(value)
        .ok_or_else(|| ServiceError::Validation(format!("stored status '{value}' is not valid")))
}

pub fn create_ticket(
    conn: &mut PgConnection,
    ctx: &TenantContext,
    prefix: &str,
    req: CreateTicketRequest,
) -> Result<ServiceTicket, ServiceError> {
    if req.title.trim().is_empty() {
        return Err(ServiceError::Validation("title must not be empty".into()));
    }
    let ticket_type = TicketType::parse(&req.ticket_type).ok_or_else(|| {
        ServiceError::Validation(format!("unknown ticket type '{}'", req.ticket_type))
    })?;

    let prefix = prefix.to_string();
    locked_transaction(conn, |conn| {
        ensure_client_in_company(conn, ctx.company_id, req.client_id)?;
        let device_owner = device_owner_in_company(conn, ctx.company_id, req.device_id)?;
        if device_owner != req.client_id {
            return Err(ServiceError::Validation(
                "device does not belong to the selected client".into(),
            ));
        }
        if let Some(technician_id) = req.assigned_technician_id {
            ensure_technician_in_company(conn, ctx.company_id, technician_id)?;
        }

        let now = Utc::now();
        let ticket_number =
            sequence::next_ticket_number(conn, ctx.company_id, now.year(), &prefix)?;

        let ticket = ServiceTicket {
            id: Uuid::new_v4(),
            company_id: ctx.company_id,
            client_id: req.client_id,
            device_id: req.device_id,
            assigned_technician_id: req.assigned_technician_id,
            ticket_number,
            title: req.title.clone(),
            description: req.description.clone().unwrap_or_default(),
            ticket_type: ticket_type.as_str().to_string(),
            status: TicketStatus::Open.as_str().to_string(),
            resolution: None,
            resolution_notes: String::new(),
            scheduled_for: req.scheduled_for,
            completed_at: None,
            created_at: now,
        };

        diesel::insert_into(service_tickets::table)
            .values(&ticket)
            .execute(conn)
            .map_err(|e| {
                // A duplicate number means we lost an allocation race;
                // the caller retries the whole creation.
                if ServiceError::is_unique_violation(&e, "ticket_number") {
                    ServiceError::Contention
                } else {
                    e.into()
                }
            })?;

        sync::apply_ticket_event(
            conn,
            &TicketEvent::Created {
                ticket_id: ticket.id,
                device_id: ticket.device_id,
                ticket_number: ticket.ticket_number.clone(),
                title: ticket.title.clone(),
            },
        )?;
        sync::apply_ticket_event(
            conn,
            &TicketEvent::StatusChanged {
                ticket_id: ticket.id,
                previous_status: None,
                new_status: TicketStatus::Open,
                previous_device_id: None,
                new_device_id: ticket.device_id,
            },
        )?;

        Ok(ticket)
    })
}

pub fn update_ticket(
    conn: &mut PgConnection,
    ctx: &TenantContext,
    ticket_id: Uuid,
    req: UpdateTicketRequest,
) -> Result<ServiceTicket, ServiceError> {
    let new_status = req
        .status
        .as_deref()
        .map(|s| {
            TicketStatus::parse(s)
                .ok_or_else(|| ServiceError::Validation(format!("unknown status '{s}'")))
        })
        .transpose()?;

    locked_transaction(conn, |conn| {
        let previous: ServiceTicket = service_tickets::table
            .filter(service_tickets::id.eq(ticket_id))
            .filter(service_tickets::company_id.eq(ctx.company_id))
            .for_update()
            .first(conn)?;
        let previous_status = parse_stored_status(&previous.status)?;

        if (new_status.is_some() || req.device_id.is_some())
            && !can_modify(ctx, previous.assigned_technician_id)
        {
            return Err(ServiceError::Validation(
                "only the assigned technician or an administrator can change ticket status"
                    .into(),
            ));
        }

        if let Some(new_status) = new_status {
            if previous_status == TicketStatus::Closed && new_status != TicketStatus::Closed {
                return Err(ServiceError::Conflict(
                    "a closed ticket cannot be reopened".into(),
                ));
            }
            if new_status == TicketStatus::Closed && previous_status != TicketStatus::Closed {
                return Err(ServiceError::Validation(
                    "closing a ticket requires a resolution, use the resolve operation".into(),
                ));
            }
        }

        if let Some(device_id) = req.device_id {
            let owner = device_owner_in_company(conn, ctx.company_id, device_id)?;
            if owner != previous.client_id {
                return Err(ServiceError::Validation(
                    "device does not belong to the ticket's client".into(),
                ));
            }
        }
        if let Some(technician_id) = req.assigned_technician_id {
            ensure_technician_in_company(conn, ctx.company_id, technician_id)?;
        }

        let target_status = new_status.unwrap_or(previous_status);
        let target_device = req.device_id.unwrap_or(previous.device_id);

        diesel::update(service_tickets::table.find(ticket_id))
            .set((
                service_tickets::title.eq(req.title.clone().unwrap_or_else(|| previous.title.clone())),
                service_tickets::description
                    .eq(req.description.clone().unwrap_or_else(|| previous.description.clone())),
                service_tickets::status.eq(target_status.as_str()),
                service_tickets::device_id.eq(target_device),
                service_tickets::assigned_technician_id
                    .eq(req.assigned_technician_id.or(previous.assigned_technician_id)),
                service_tickets::scheduled_for.eq(req.scheduled_for.or(previous.scheduled_for)),
            ))
            .execute(conn)?;

        // Synchronize only when the persisted status/device pair really
        // changed; a no-op write must not re-trigger the synchronizer.
        if target_status != previous_status || target_device != previous.device_id {
            sync::apply_ticket_event(
                conn,
                &TicketEvent::StatusChanged {
                    ticket_id,
                    previous_status: Some(previous_status),
                    new_status: target_status,
                    previous_device_id: Some(previous.device_id),
                    new_device_id: target_device,
                },
            )?;
        }

        let updated: ServiceTicket = service_tickets::table.find(ticket_id).first(conn)?;
        Ok(updated)
    })
}

pub fn resolve_ticket(
    conn: &mut PgConnection,
    ctx: &TenantContext,
    ticket_id: Uuid,
    req: ResolveTicketRequest,
) -> Result<ServiceTicket, ServiceError> {
    let resolution = TicketResolution::parse(&req.resolution).ok_or_else(|| {
        ServiceError::Validation(format!("unknown resolution '{}'", req.resolution))
    })?;
    if resolution == TicketResolution::Unresolved {
        return Err(ServiceError::Validation(
            "resolution must be a decided outcome".into(),
        ));
    }

    locked_transaction(conn, |conn| {
        let previous: ServiceTicket = service_tickets::table
            .filter(service_tickets::id.eq(ticket_id))
            .filter(service_tickets::company_id.eq(ctx.company_id))
            .for_update()
            .first(conn)?;
        let previous_status = parse_stored_status(&previous.status)?;

        if previous_status == TicketStatus::Closed {
            return Err(ServiceError::Conflict("ticket is already closed".into()));
        }
        if !can_modify(ctx, previous.assigned_technician_id) {
            return Err(ServiceError::Validation(
                "only the assigned technician or an administrator can resolve a ticket".into(),
            ));
        }

        let now = Utc::now();
        diesel::update(service_tickets::table.find(ticket_id))
            .set((
                service_tickets::status.eq(TicketStatus::Closed.as_str()),
                service_tickets::resolution.eq(Some(resolution.as_str())),
                service_tickets::resolution_notes.eq(req.notes.clone().unwrap_or_default()),
                service_tickets::completed_at.eq(Some(now)),
            ))
            .execute(conn)?;

        sync::apply_ticket_event(
            conn,
            &TicketEvent::Resolved {
                ticket_id,
                device_id: previous.device_id,
                ticket_number: previous.ticket_number.clone(),
                resolution,
                ticket_type: TicketType::parse(&previous.ticket_type)
                    .unwrap_or(TicketType::Other),
            },
        )?;
        sync::apply_ticket_event(
            conn,
            &TicketEvent::StatusChanged {
                ticket_id,
                previous_status: Some(previous_status),
                new_status: TicketStatus::Closed,
                previous_device_id: Some(previous.device_id),
                new_device_id: previous.device_id,
            },
        )?;

        let updated: ServiceTicket = service_tickets::table.find(ticket_id).first(conn)?;
        Ok(updated)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TechnicianRole;

    fn ctx_with_role(role: TechnicianRole) -> TenantContext {
        TenantContext {
            user_id: Uuid::new_v4(),
            technician_id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            role,
        }
    }

    #[test]
    fn test_admin_can_always_modify() {
        let ctx = ctx_with_role(TechnicianRole::Administrator);
        assert!(can_modify(&ctx, None));
        assert!(can_modify(&ctx, Some(Uuid::new_v4())));
    }

    #[test]
    fn test_assigned_technician_can_modify() {
        let ctx = ctx_with_role(TechnicianRole::Technician);
        assert!(can_modify(&ctx, Some(ctx.technician_id)));
    }

    #[test]
    fn test_unassigned_technician_cannot_modify() {
        let ctx = ctx_with_role(TechnicianRole::Technician);
        assert!(!can_modify(&ctx, None));
        assert!(!can_modify(&ctx, Some(Uuid::new_v4())));
    }
}
