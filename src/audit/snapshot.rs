use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db;
use crate::errors::AppResult;
use crate::models::audit_log::FieldChange;
use crate::models::supplier::{AiAnalysisStatus, RiskLevel, Supplier, SupplierCategory, SupplierStatus};

pub const SUPPLIER_SNAPSHOT_VERSION: u32 = 1;

/// An entity whose state can be captured into an audit snapshot.
#[async_trait]
pub trait AuditedEntity {
    type Snapshot: Serialize + Send + Sync;

    fn entity_type() -> &'static str;

    /// Current state scoped to the organization; `None` when absent.
    async fn capture(pool: &SqlitePool, organization_id: Uuid, id: Uuid) -> AppResult<Option<Self::Snapshot>>;
}

/// The value returned by an audited operation, which may carry the id of
/// the entity it created.
pub trait AuditSubject {
    fn audited_id(&self) -> Option<Uuid>;
}

impl AuditSubject for Supplier {
    fn audited_id(&self) -> Option<Uuid> {
        Some(self.id)
    }
}

impl AuditSubject for () {
    fn audited_id(&self) -> Option<Uuid> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupplierSnapshot {
    pub version: u32,
    pub id: Uuid,
    pub name: String,
    pub domain: String,
    pub category: SupplierCategory,
    pub risk_level: RiskLevel,
    pub status: SupplierStatus,
    pub contract_end_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub ai_risk_score: Option<f64>,
    pub ai_analysis: Option<Value>,
    pub ai_analysis_status: AiAnalysisStatus,
}

impl From<&Supplier> for SupplierSnapshot {
    fn from(supplier: &Supplier) -> Self {
        Self {
            version: SUPPLIER_SNAPSHOT_VERSION,
            id: supplier.id,
            name: supplier.name.clone(),
            domain: supplier.domain.clone(),
            category: supplier.category,
            risk_level: supplier.risk_level,
            status: supplier.status,
            contract_end_date: supplier.contract_end_date,
            notes: supplier.notes.clone(),
            ai_risk_score: supplier.ai_risk_score,
            ai_analysis: supplier.ai_analysis.clone(),
            ai_analysis_status: supplier.ai_analysis_status,
        }
    }
}

impl SupplierSnapshot {
    pub fn diff(&self, other: &SupplierSnapshot) -> Vec<FieldChange> {
        match (serde_json::to_value(self), serde_json::to_value(other)) {
            (Ok(before), Ok(after)) => diff_values(Some(&before), Some(&after)),
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl AuditedEntity for Supplier {
    type Snapshot = SupplierSnapshot;

    fn entity_type() -> &'static str {
        "supplier"
    }

    async fn capture(pool: &SqlitePool, organization_id: Uuid, id: Uuid) -> AppResult<Option<SupplierSnapshot>> {
        let supplier = db::suppliers::fetch(pool, organization_id, id).await?;
        Ok(supplier.as_ref().map(SupplierSnapshot::from))
    }
}

/// Field-level differences between two JSON snapshots, in field order.
/// A missing side is treated as all-null, so a create lists every populated
/// field and a delete lists every field that was populated.
pub fn diff_values(before: Option<&Value>, after: Option<&Value>) -> Vec<FieldChange> {
    let empty = serde_json::Map::new();
    let before = before.and_then(Value::as_object).unwrap_or(&empty);
    let after = after.and_then(Value::as_object).unwrap_or(&empty);

    let mut fields: Vec<&String> = before.keys().chain(after.keys()).collect();
    fields.sort();
    fields.dedup();

    fields
        .into_iter()
        .filter(|field| field.as_str() != "version")
        .filter_map(|field| {
            let old = before.get(field).unwrap_or(&Value::Null);
            let new = after.get(field).unwrap_or(&Value::Null);
            (old != new).then(|| FieldChange {
                field: field.clone(),
                before: old.clone(),
                after: new.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;

    fn supplier() -> Supplier {
        Supplier {
            id: Uuid::new_v4(),
            name: "Acme".into(),
            domain: "acme.io".into(),
            category: SupplierCategory::Saas,
            risk_level: RiskLevel::Low,
            status: SupplierStatus::Active,
            contract_end_date: None,
            notes: None,
            organization_id: Uuid::new_v4(),
            ai_risk_score: None,
            ai_analysis: None,
            ai_analysis_status: AiAnalysisStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn diff_reports_only_changed_fields() {
        let original = supplier();
        let mut edited = original.clone();
        edited.risk_level = RiskLevel::Critical;
        edited.notes = Some("escalated".into());

        let changes = SupplierSnapshot::from(&original).diff(&SupplierSnapshot::from(&edited));
        assert_eq!(
            changes,
            vec![
                FieldChange {
                    field: "notes".into(),
                    before: Value::Null,
                    after: json!("escalated"),
                },
                FieldChange {
                    field: "riskLevel".into(),
                    before: json!("low"),
                    after: json!("critical"),
                },
            ]
        );
    }

    #[test]
    fn identical_snapshots_have_no_changes() {
        let snapshot = SupplierSnapshot::from(&supplier());
        assert!(snapshot.diff(&snapshot.clone()).is_empty());
    }

    #[test]
    fn one_sided_diff_lists_populated_fields() {
        let after = json!({"version": 1, "name": "Acme", "notes": null});
        let changes = diff_values(None, Some(&after));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field, "name");
        assert!(diff_values(None, None).is_empty());
    }

    #[test]
    fn snapshot_is_versioned_camel_case() {
        let value = serde_json::to_value(SupplierSnapshot::from(&supplier())).unwrap();
        assert_eq!(value["version"], json!(SUPPLIER_SNAPSHOT_VERSION));
        assert_eq!(value["aiAnalysisStatus"], json!("pending"));
        assert!(value.get("organizationId").is_none());
    }
}
