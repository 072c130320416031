use chrono::Utc;
use diesel::prelude::*;
use uuid::Uuid;

use crate::shared::errors::ServiceError;
use crate::shared::schema::{fiscal_devices, service_tickets};
use crate::tickets::lifecycle::TicketEvent;
use crate::tickets::{TicketStatus, TicketType};

use super::{append_history, ActionKind, DeviceStatus, FiscalDevice};

/// Applies a ticket lifecycle event to the affected devices.
///
/// Runs inside the caller's transaction so history rows are never
/// orphaned from the status they document.
pub fn apply_ticket_event(conn: &mut PgConnection, event: &TicketEvent) -> Result<(), ServiceError> {
    match event {
        TicketEvent::Created {
            device_id,
            ticket_number,
            title,
            ..
        } => append_history(
            conn,
            *device_id,
            ActionKind::TicketCreated,
            format!("Created service ticket {ticket_number} ('{title}')."),
            None,
        ),
        TicketEvent::StatusChanged {
            previous_device_id,
            new_device_id,
            ..
        } => {
            resync_device_status(conn, *new_device_id)?;
            if let Some(previous) = *previous_device_id {
                if previous != *new_device_id {
                    resync_device_status(conn, previous)?;
                }
            }
            Ok(())
        }
        TicketEvent::Resolved {
            device_id,
            ticket_number,
            resolution,
            ticket_type,
            ..
        } => {
            append_history(
                conn,
                *device_id,
                ActionKind::TicketCompleted,
                format!(
                    "Service ticket {ticket_number} completed with resolution '{}'.",
                    resolution.as_str()
                ),
                None,
            )?;
            if *ticket_type == TicketType::Service {
                let today = Utc::now().date_naive();
                diesel::update(fiscal_devices::table.find(*device_id))
                    .set(fiscal_devices::last_service_date.eq(Some(today)))
                    .execute(conn)?;
                append_history(
                    conn,
                    *device_id,
                    ActionKind::ServicePerformed,
                    format!("Periodic service performed, recorded as ticket {ticket_number}."),
                    None,
                )?;
            }
            Ok(())
        }
    }
}

/// Recomputes the derived status of one device from its open tickets.
///
/// The device row is locked for the whole read-recompute-write cycle so
/// two tickets closing concurrently serialize instead of losing an
/// update.
pub fn resync_device_status(conn: &mut PgConnection, device_id: Uuid) -> Result<(), ServiceError> {
    let device: Option<FiscalDevice> = fiscal_devices::table
        .find(device_id)
        .for_update()
        .first(conn)
        .optional()?;
    let Some(device) = device else {
        return Ok(());
    };

    let has_active_demand: bool = diesel::select(diesel::dsl::exists(
        service_tickets::table
            .filter(service_tickets::device_id.eq(device_id))
            .filter(service_tickets::status.eq_any([
                TicketStatus::Open.as_str(),
                TicketStatus::InProgress.as_str(),
            ])),
    ))
    .get_result(conn)?;

    let current = DeviceStatus::parse(&device.status).ok_or_else(|| {
        ServiceError::Validation(format!("stored device status '{}' is not valid", device.status))
    })?;

    if let Some(next) = decide_status(current, has_active_demand) {
        diesel::update(fiscal_devices::table.find(device_id))
            .set(fiscal_devices::status.eq(next.as_str()))
            .execute(conn)?;

        let description = match next {
            DeviceStatus::Serviced => {
                "Device status automatically set to 'serviced' because of an active service ticket."
            }
            _ => "Device status automatically restored to 'active' after all service tickets were closed.",
        };
        append_history(
            conn,
            device_id,
            ActionKind::StatusChanged,
            description.to_string(),
            None,
        )?;
    }

    Ok(())
}

/// The synchronization rule. `inactive` and `decommissioned` are manual
/// states and are never overridden here.
pub fn decide_status(current: DeviceStatus, has_active_demand: bool) -> Option<DeviceStatus> {
    match (current, has_active_demand) {
        (DeviceStatus::Active, true) => Some(DeviceStatus::Serviced),
        (DeviceStatus::Serviced, false) => Some(DeviceStatus::Active),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_with_demand_becomes_serviced() {
        assert_eq!(
            decide_status(DeviceStatus::Active, true),
            Some(DeviceStatus::Serviced)
        );
    }

    #[test]
    fn test_serviced_without_demand_becomes_active() {
        assert_eq!(
            decide_status(DeviceStatus::Serviced, false),
            Some(DeviceStatus::Active)
        );
    }

    #[test]
    fn test_no_transition_when_state_already_matches() {
        assert_eq!(decide_status(DeviceStatus::Active, false), None);
        assert_eq!(decide_status(DeviceStatus::Serviced, true), None);
    }

    #[test]
    fn test_manual_states_are_never_overridden() {
        for demand in [true, false] {
            assert_eq!(decide_status(DeviceStatus::Inactive, demand), None);
            assert_eq!(decide_status(DeviceStatus::Decommissioned, demand), None);
        }
    }
}
