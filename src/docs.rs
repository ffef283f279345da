use axum::Router;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::{audit, authz, models, queue, routes};

#[derive(OpenApi)]
#[openapi(
	paths(
		routes::health::health,
		routes::auth::register,
		routes::auth::login,
		routes::auth::refresh,
		routes::auth::me,
		routes::suppliers::list_suppliers,
		routes::suppliers::get_supplier,
		routes::suppliers::create_supplier,
		routes::suppliers::update_supplier,
		routes::suppliers::update_risk_level,
		routes::suppliers::update_notes,
		routes::suppliers::delete_supplier,
		routes::suppliers::supplier_audit_logs,
		routes::users::list_users,
		routes::users::get_user,
		routes::users::create_user,
		routes::users::update_user,
		routes::users::delete_user,
		routes::organizations::delete_current_organization
	),
	components(
		schemas(
			authz::Role,
			authz::Permission,
			models::user::User,
			models::user::AuthResponse,
			models::user::LoginRequest,
			models::user::RegisterRequest,
			models::user::RefreshRequest,
			models::user::CreateUserRequest,
			models::user::UpdateUserRequest,
			models::supplier::Supplier,
			models::supplier::SupplierCategory,
			models::supplier::RiskLevel,
			models::supplier::SupplierStatus,
			models::supplier::AiAnalysisStatus,
			models::supplier::CreateSupplierRequest,
			models::supplier::UpdateSupplierRequest,
			models::supplier::UpdateRiskLevelRequest,
			models::supplier::UpdateNotesRequest,
			models::supplier::SupplierSortField,
			models::audit_log::AuditLogEntry,
			models::audit_log::AuditAction,
			models::audit_log::FieldChange,
			models::audit_log::AuditSortField,
			models::organization::OrganizationDeleted,
			models::pagination::SortOrder,
			models::pagination::PageMeta,
			models::pagination::SupplierPage,
			models::pagination::AuditLogPage,
			models::pagination::UserPage,
			routes::health::HealthResponse,
			queue::QueueStats,
			audit::ChainReport
		)
	),
	modifiers(&BearerAuth),
	security(("bearerAuth" = [])),
	tags(
		(name = "Health", description = "Service status"),
		(name = "Auth", description = "Registration and tokens"),
		(name = "Suppliers", description = "Supplier register, scoring status and audit trail"),
		(name = "Users", description = "Organization members"),
		(name = "Organizations", description = "Tenant lifecycle")
	)
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
	fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
		let components = openapi.components.get_or_insert_with(Default::default);
		components.add_security_scheme(
			"bearerAuth",
			SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).bearer_format("JWT").build()),
		);
	}
}

/// Swagger UI at `/docs`, the document at `/api-docs/openapi.json`.
pub fn swagger_routes() -> Router {
	let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
		.try_it_out_enabled(true)
		.with_credentials(true)
		.persist_authorization(true);

	Router::new().merge(
		SwaggerUi::new("/docs")
			.url("/api-docs/openapi.json", ApiDoc::openapi())
			.config(swagger_config),
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn document_lists_every_route_and_the_bearer_scheme() {
		let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();

		for path in ["/suppliers/{id}/audit-logs", "/auth/refresh", "/organizations/current", "/api/health"] {
			assert!(doc["paths"].get(path).is_some(), "{path} missing");
		}
		assert_eq!(doc["components"]["securitySchemes"]["bearerAuth"]["scheme"], "bearer");
	}

	#[test]
	fn list_routes_reference_their_page_schemas() {
		let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();

		for (path, schema) in [
			("/suppliers", "SupplierPage"),
			("/suppliers/{id}/audit-logs", "AuditLogPage"),
			("/users", "UserPage"),
		] {
			let body = &doc["paths"][path]["get"]["responses"]["200"]["content"]["application/json"]["schema"];
			assert_eq!(body["$ref"], format!("#/components/schemas/{schema}"), "{path}");
			assert!(doc["components"]["schemas"].get(schema).is_some(), "{schema} missing");
		}
	}
}
