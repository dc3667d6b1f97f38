use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::common::{AlertId, BatchId, CoreError, CoreResult};

/// Alert kind enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    LowStock,
    OutOfStock,
    QualityIssue,
    ExpiryWarning,
    ReorderNeeded,
}

impl AlertKind {
    /// Fixed severity per kind.
    pub fn severity(self) -> AlertSeverity {
        match self {
            AlertKind::OutOfStock => AlertSeverity::Critical,
            AlertKind::LowStock => AlertSeverity::High,
            AlertKind::QualityIssue => AlertSeverity::Medium,
            AlertKind::ExpiryWarning => AlertSeverity::Medium,
            AlertKind::ReorderNeeded => AlertSeverity::Low,
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertKind::LowStock => write!(f, "low_stock"),
            AlertKind::OutOfStock => write!(f, "out_of_stock"),
            AlertKind::QualityIssue => write!(f, "quality_issue"),
            AlertKind::ExpiryWarning => write!(f, "expiry_warning"),
            AlertKind::ReorderNeeded => write!(f, "reorder_needed"),
        }
    }
}

impl std::str::FromStr for AlertKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low_stock" => Ok(AlertKind::LowStock),
            "out_of_stock" => Ok(AlertKind::OutOfStock),
            "quality_issue" => Ok(AlertKind::QualityIssue),
            "expiry_warning" => Ok(AlertKind::ExpiryWarning),
            "reorder_needed" => Ok(AlertKind::ReorderNeeded),
            _ => Err(anyhow::anyhow!("Invalid alert kind: {}", s)),
        }
    }
}

/// Severity enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Low => write!(f, "low"),
            AlertSeverity::Medium => write!(f, "medium"),
            AlertSeverity::High => write!(f, "high"),
            AlertSeverity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for AlertSeverity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(AlertSeverity::Low),
            "medium" => Ok(AlertSeverity::Medium),
            "high" => Ok(AlertSeverity::High),
            "critical" => Ok(AlertSeverity::Critical),
            _ => Err(anyhow::anyhow!("Invalid alert severity: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Acknowledged,
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertStatus::Active => write!(f, "active"),
            AlertStatus::Acknowledged => write!(f, "acknowledged"),
        }
    }
}

impl std::str::FromStr for AlertStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(AlertStatus::Active),
            "acknowledged" => Ok(AlertStatus::Acknowledged),
            _ => Err(anyhow::anyhow!("Invalid alert status: {}", s)),
        }
    }
}

/// Operational alert raised by the inventory scan.
///
/// Alerts are an append-only audit trail: acknowledgement flips the status,
/// nothing is ever deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryAlert {
    pub id: AlertId,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    pub metadata: serde_json::Value,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
}

impl InventoryAlert {
    pub fn new(kind: AlertKind, message: impl Into<String>, metadata: serde_json::Value) -> Self {
        Self {
            id: AlertId::new(),
            kind,
            severity: kind.severity(),
            message: message.into(),
            metadata,
            status: AlertStatus::Active,
            created_at: Utc::now(),
        }
    }

    /// Batch the alert refers to, when recorded in the metadata.
    pub fn batch_id(&self) -> Option<BatchId> {
        self.metadata
            .get("batch_id")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
    }
}

// =============================================================================
// Postgres access
// =============================================================================

#[derive(sqlx::FromRow)]
struct InventoryAlertRow {
    id: Uuid,
    kind: String,
    severity: String,
    message: String,
    metadata: serde_json::Value,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<InventoryAlertRow> for InventoryAlert {
    type Error = CoreError;

    fn try_from(row: InventoryAlertRow) -> CoreResult<Self> {
        Ok(Self {
            id: AlertId::from_uuid(row.id),
            kind: row.kind.parse()?,
            severity: row.severity.parse()?,
            message: row.message,
            metadata: row.metadata,
            status: row.status.parse()?,
            created_at: row.created_at,
        })
    }
}

impl InventoryAlert {
    pub async fn insert(alert: &InventoryAlert, pool: &PgPool) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO inventory_alerts (id, kind, severity, message, metadata, status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(alert.id.as_uuid())
        .bind(alert.kind.to_string())
        .bind(alert.severity.to_string())
        .bind(&alert.message)
        .bind(&alert.metadata)
        .bind(alert.status.to_string())
        .bind(alert.created_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Active alerts, most recent first, bounded by `limit`.
    pub async fn list_active(limit: i64, pool: &PgPool) -> CoreResult<Vec<InventoryAlert>> {
        let rows = sqlx::query_as::<_, InventoryAlertRow>(
            "SELECT * FROM inventory_alerts
              WHERE status = 'active'
              ORDER BY created_at DESC
              LIMIT $1",
        )
        .bind(limit)
        .fetch_all(pool)
        .await?;

        rows.into_iter().map(InventoryAlert::try_from).collect()
    }

    /// Flip an active alert to acknowledged; `None` when it does not exist
    /// or was already acknowledged.
    pub async fn acknowledge(alert_id: AlertId, pool: &PgPool) -> CoreResult<Option<InventoryAlert>> {
        let row = sqlx::query_as::<_, InventoryAlertRow>(
            "UPDATE inventory_alerts
                SET status = 'acknowledged'
              WHERE id = $1 AND status = 'active'
              RETURNING *",
        )
        .bind(alert_id.as_uuid())
        .fetch_optional(pool)
        .await?;

        row.map(InventoryAlert::try_from).transpose()
    }

    /// Whether the batch already carries an active alert of this kind.
    pub async fn exists_active(
        batch_id: BatchId,
        kind: AlertKind,
        pool: &PgPool,
    ) -> CoreResult<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM inventory_alerts
              WHERE status = 'active'
                AND kind = $1
                AND metadata->>'batch_id' = $2",
        )
        .bind(kind.to_string())
        .bind(batch_id.to_string())
        .fetch_one(pool)
        .await?;
        Ok(count > 0)
    }
}
