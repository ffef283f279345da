use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::{double_option, parse_text};
use crate::errors::AppError;
use crate::models::pagination::SortOrder;
use crate::utils::{parse_uuid, required_text};

pub const NAME_MAX_CHARS: usize = 255;
pub const DOMAIN_MAX_CHARS: usize = 255;
pub const NOTES_MAX_CHARS: usize = 10_000;

text_enum!(SupplierCategory {
    Saas => "saas",
    Infrastructure => "infrastructure",
    Consulting => "consulting",
    Other => "other",
});

text_enum!(RiskLevel {
    Critical => "critical",
    High => "high",
    Medium => "medium",
    Low => "low",
});

text_enum!(SupplierStatus {
    Active => "active",
    UnderReview => "under_review",
    Inactive => "inactive",
});

text_enum!(
    /// Progress of the asynchronous scoring for one supplier.
    AiAnalysisStatus {
        Pending => "pending",
        Complete => "complete",
        Error => "error",
    }
);

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Supplier {
    pub id: Uuid,
    pub name: String,
    pub domain: String,
    pub category: SupplierCategory,
    pub risk_level: RiskLevel,
    pub status: SupplierStatus,
    pub contract_end_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub organization_id: Uuid,
    pub ai_risk_score: Option<f64>,
    #[schema(value_type = Option<Object>)]
    pub ai_analysis: Option<Value>,
    pub ai_analysis_status: AiAnalysisStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbSupplier {
    pub id: String,
    pub name: String,
    pub domain: String,
    pub category: String,
    pub risk_level: String,
    pub status: String,
    pub contract_end_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub organization_id: String,
    pub ai_risk_score: Option<f64>,
    pub ai_analysis: Option<String>,
    pub ai_analysis_status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbSupplier> for Supplier {
    type Error = AppError;

    fn try_from(value: DbSupplier) -> Result<Self, Self::Error> {
        let ai_analysis = value
            .ai_analysis
            .as_deref()
            .map(serde_json::from_str::<Value>)
            .transpose()
            .map_err(|err| AppError::internal(format!("corrupt ai_analysis: {err}")))?;

        Ok(Supplier {
            id: parse_uuid(&value.id, "supplier")?,
            name: value.name,
            domain: value.domain,
            category: parse_text(&value.category, "supplier category")?,
            risk_level: parse_text(&value.risk_level, "risk level")?,
            status: parse_text(&value.status, "supplier status")?,
            contract_end_date: value.contract_end_date,
            notes: value.notes,
            organization_id: parse_uuid(&value.organization_id, "organization")?,
            ai_risk_score: value.ai_risk_score,
            ai_analysis,
            ai_analysis_status: parse_text(&value.ai_analysis_status, "analysis status")?,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSupplierRequest {
    #[schema(example = "Acme Cloud")]
    pub name: String,
    #[schema(example = "acme.io")]
    pub domain: String,
    pub category: SupplierCategory,
    pub risk_level: RiskLevel,
    pub status: Option<SupplierStatus>,
    pub contract_end_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// A validated supplier ready to insert.
#[derive(Debug, Clone)]
pub struct NewSupplier {
    pub name: String,
    pub domain: String,
    pub category: SupplierCategory,
    pub risk_level: RiskLevel,
    pub status: SupplierStatus,
    pub contract_end_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl CreateSupplierRequest {
    pub fn validate(self) -> Result<NewSupplier, AppError> {
        Ok(NewSupplier {
            name: required_text(&self.name, "name", NAME_MAX_CHARS)?,
            domain: required_text(&self.domain, "domain", DOMAIN_MAX_CHARS)?,
            category: self.category,
            risk_level: self.risk_level,
            status: self.status.unwrap_or(SupplierStatus::Active),
            contract_end_date: self.contract_end_date,
            notes: normalize_notes(self.notes)?,
        })
    }
}

/// Partial update of the human-edited columns. `contractEndDate` and `notes`
/// accept an explicit `null` to clear the value.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSupplierRequest {
    pub name: Option<String>,
    pub domain: Option<String>,
    pub category: Option<SupplierCategory>,
    pub risk_level: Option<RiskLevel>,
    pub status: Option<SupplierStatus>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>, format = Date)]
    pub contract_end_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub notes: Option<Option<String>>,
}

/// Validated changes; `None` leaves a column untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SupplierChanges {
    pub name: Option<String>,
    pub domain: Option<String>,
    pub category: Option<SupplierCategory>,
    pub risk_level: Option<RiskLevel>,
    pub status: Option<SupplierStatus>,
    pub contract_end_date: Option<Option<NaiveDate>>,
    pub notes: Option<Option<String>>,
}

impl SupplierChanges {
    pub fn is_empty(&self) -> bool {
        *self == SupplierChanges::default()
    }
}

impl UpdateSupplierRequest {
    pub fn validate(self) -> Result<SupplierChanges, AppError> {
        Ok(SupplierChanges {
            name: self
                .name
                .map(|name| required_text(&name, "name", NAME_MAX_CHARS))
                .transpose()?,
            domain: self
                .domain
                .map(|domain| required_text(&domain, "domain", DOMAIN_MAX_CHARS))
                .transpose()?,
            category: self.category,
            risk_level: self.risk_level,
            status: self.status,
            contract_end_date: self.contract_end_date,
            notes: self.notes.map(normalize_notes).transpose()?,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRiskLevelRequest {
    pub risk_level: RiskLevel,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNotesRequest {
    /// `null` or an empty string clears the notes.
    pub notes: Option<String>,
}

impl UpdateNotesRequest {
    pub fn validate(self) -> Result<SupplierChanges, AppError> {
        Ok(SupplierChanges {
            notes: Some(normalize_notes(self.notes)?),
            ..SupplierChanges::default()
        })
    }
}

/// Notes are free text in any script. Markup brackets and control characters
/// other than line breaks and tabs are rejected; blank notes are stored as null.
pub fn normalize_notes(notes: Option<String>) -> Result<Option<String>, AppError> {
    let Some(notes) = notes else {
        return Ok(None);
    };

    if notes.trim().is_empty() {
        return Ok(None);
    }
    if notes.chars().count() > NOTES_MAX_CHARS {
        return Err(AppError::bad_request(format!(
            "notes must be at most {NOTES_MAX_CHARS} characters"
        )));
    }
    if let Some(bad) = notes
        .chars()
        .find(|c| matches!(c, '<' | '>') || (c.is_control() && !matches!(c, '\n' | '\r' | '\t')))
    {
        return Err(AppError::bad_request(format!(
            "notes contain a forbidden character: {:?}",
            bad
        )));
    }

    Ok(Some(notes))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SupplierSortField {
    Name,
    Domain,
    Category,
    RiskLevel,
    Status,
    #[default]
    CreatedAt,
}

impl SupplierSortField {
    pub fn column(&self) -> &'static str {
        match self {
            SupplierSortField::Name => "name",
            SupplierSortField::Domain => "domain",
            SupplierSortField::Category => "category",
            SupplierSortField::RiskLevel => "risk_level",
            SupplierSortField::Status => "status",
            SupplierSortField::CreatedAt => "created_at",
        }
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct SupplierListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    /// Matches name or domain.
    pub search: Option<String>,
    pub category: Option<SupplierCategory>,
    pub risk_level: Option<RiskLevel>,
    pub status: Option<SupplierStatus>,
    pub sort_by: Option<SupplierSortField>,
    pub sort_order: Option<SortOrder>,
}
