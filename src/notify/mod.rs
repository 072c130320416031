use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::errors::ServiceError;
use crate::shared::schema::notification_jobs;

/// Kinds of jobs the external notification dispatcher understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    ActivationCodeEmail,
    InspectionReminder,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActivationCodeEmail => "activation_code_email",
            Self::InspectionReminder => "inspection_reminder",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = notification_jobs)]
pub struct NotificationJob {
    pub id: Uuid,
    pub kind: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Enqueues a job for the dispatcher. The core only decides *when* a
/// notification should go out; delivery happens elsewhere.
pub fn enqueue(
    conn: &mut PgConnection,
    kind: NotificationKind,
    payload: serde_json::Value,
) -> Result<Uuid, ServiceError> {
    let job = NotificationJob {
        id: Uuid::new_v4(),
        kind: kind.as_str().to_string(),
        payload,
        status: "queued".to_string(),
        created_at: Utc::now(),
    };
    diesel::insert_into(notification_jobs::table)
        .values(&job)
        .execute(conn)?;
    log::info!("enqueued {} notification job {}", job.kind, job.id);
    Ok(job.id)
}
