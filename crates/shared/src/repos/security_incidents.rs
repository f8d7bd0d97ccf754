use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

use crate::models::{NewSecurityIncident, SecurityIncident};

use super::contracts::IncidentStore;
use super::{
    Store, StoreError, StoreFuture, incident_severity_from_db, incident_source_from_db, pg_text,
};

impl Store {
    pub async fn insert_security_incident(
        &self,
        incident: &NewSecurityIncident,
    ) -> Result<i64, StoreError> {
        let incident_id: i64 = sqlx::query_scalar(
            "INSERT INTO security_incidents (
                 user_id, source, category, offending_text, ip_address, user_agent,
                 endpoint, severity, attempt_count, blocked, alert_sent
             )
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, TRUE, FALSE)
             RETURNING id",
        )
        .bind(incident.user_id)
        .bind(incident.source.as_str())
        .bind(pg_text(&incident.category))
        .bind(pg_text(&incident.offending_text))
        .bind(incident.ip_address.as_deref().map(pg_text))
        .bind(incident.user_agent.as_deref().map(pg_text))
        .bind(incident.endpoint.as_deref().map(pg_text))
        .bind(incident.severity.as_str())
        .bind(incident.attempt_count)
        .fetch_one(&self.pool)
        .await?;

        Ok(incident_id)
    }

    pub async fn mark_security_incident_alert_sent(&self, incident_id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE security_incidents SET alert_sent = TRUE WHERE id = $1")
            .bind(incident_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_security_incidents_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<SecurityIncident>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, user_id, source, category, offending_text, ip_address, user_agent,
                    endpoint, severity, attempt_count, blocked, alert_sent, created_at
             FROM security_incidents
             WHERE user_id = $1
             ORDER BY created_at ASC, id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(incident_from_row).collect()
    }
}

impl IncidentStore for Store {
    fn insert_incident<'a>(&'a self, incident: NewSecurityIncident) -> StoreFuture<'a, i64> {
        Box::pin(async move { self.insert_security_incident(&incident).await })
    }

    fn mark_alert_sent<'a>(&'a self, incident_id: i64) -> StoreFuture<'a, ()> {
        Box::pin(self.mark_security_incident_alert_sent(incident_id))
    }
}

fn incident_from_row(row: &PgRow) -> Result<SecurityIncident, StoreError> {
    let source: String = row.try_get("source")?;
    let severity: String = row.try_get("severity")?;
    Ok(SecurityIncident {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        source: incident_source_from_db(&source)?,
        category: row.try_get("category")?,
        offending_text: row.try_get("offending_text")?,
        ip_address: row.try_get("ip_address")?,
        user_agent: row.try_get("user_agent")?,
        endpoint: row.try_get("endpoint")?,
        severity: incident_severity_from_db(&severity)?,
        attempt_count: row.try_get("attempt_count")?,
        blocked: row.try_get("blocked")?,
        alert_sent: row.try_get("alert_sent")?,
        created_at: row.try_get("created_at")?,
    })
}
