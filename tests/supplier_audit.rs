mod common;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use serde_json::{json, Value};

use common::spawn_app;

fn entries(body: &Value) -> &Vec<Value> {
    body["data"].as_array().expect("data array")
}

#[tokio::test]
async fn create_update_delete_each_append_one_entry() -> Result<()> {
    let t = spawn_app().await?;
    let (owner, auth) = t.register("Acme", "owner@acme.test").await?;
    let owner_id = auth["user"]["id"].as_str().context("user id")?.to_string();

    let supplier = t.create_supplier(&owner, "Cloud Corp", "saas").await?;
    let id = supplier["id"].as_str().context("supplier id")?.to_string();
    assert_eq!(supplier["aiAnalysisStatus"], "pending");

    let (status, body) = t.audit_logs(&owner, &id).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["total"], 1);
    let created = &entries(&body)[0];
    assert_eq!(created["action"], "CREATE");
    assert_eq!(created["entityType"], "supplier");
    assert!(created["before"].is_null());
    assert_eq!(created["after"]["name"], "Cloud Corp");
    assert_eq!(created["after"]["version"], 1);
    assert_eq!(created["userId"], owner_id.as_str());
    assert_eq!(created["userEmail"], "owner@acme.test");
    assert_eq!(created["ipAddress"], "203.0.113.9");

    let (status, updated) = t
        .send("PUT", &format!("/suppliers/{id}"), Some(&owner), Some(json!({ "name": "Cloud Corp EU" })))
        .await?;
    assert_eq!(status, StatusCode::OK, "{updated}");
    assert_eq!(updated["name"], "Cloud Corp EU");

    let (_, body) = t.audit_logs(&owner, &id).await?;
    assert_eq!(body["meta"]["total"], 2);
    let update = &entries(&body)[0];
    assert_eq!(update["action"], "UPDATE");
    assert_eq!(update["before"]["name"], "Cloud Corp");
    assert_eq!(update["after"]["name"], "Cloud Corp EU");
    assert_eq!(
        update["changes"],
        json!([{ "field": "name", "before": "Cloud Corp", "after": "Cloud Corp EU" }])
    );

    let (status, _) = t.send("DELETE", &format!("/suppliers/{id}"), Some(&owner), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // History outlives the supplier.
    let (status, body) = t.audit_logs(&owner, &id).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["total"], 3);
    let deleted = &entries(&body)[0];
    assert_eq!(deleted["action"], "DELETE");
    assert_eq!(deleted["before"]["name"], "Cloud Corp EU");
    assert!(deleted["after"].is_null());

    let (status, _) = t.send("GET", &format!("/suppliers/{id}"), Some(&owner), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn failed_mutations_write_nothing() -> Result<()> {
    let t = spawn_app().await?;
    let (owner, _) = t.register("Acme", "owner@acme.test").await?;
    let missing = uuid::Uuid::new_v4();

    let (status, _) = t
        .send("PUT", &format!("/suppliers/{missing}"), Some(&owner), Some(json!({ "name": "x" })))
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = t.send("DELETE", &format!("/suppliers/{missing}"), Some(&owner), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = t
        .send(
            "POST",
            "/suppliers",
            Some(&owner),
            Some(json!({ "name": "   ", "domain": "x.io", "category": "saas", "riskLevel": "low" })),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    assert_eq!(t.audit_row_count().await?, 0);
    Ok(())
}

#[tokio::test]
async fn empty_update_returns_current_state_without_logging() -> Result<()> {
    let t = spawn_app().await?;
    let (owner, _) = t.register("Acme", "owner@acme.test").await?;
    let supplier = t.create_supplier(&owner, "Quiet Ltd", "consulting").await?;
    let id = supplier["id"].as_str().context("supplier id")?;

    let (status, body) = t.send("PUT", &format!("/suppliers/{id}"), Some(&owner), Some(json!({}))).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Quiet Ltd");
    assert_eq!(t.audit_row_count().await?, 1);
    Ok(())
}

#[tokio::test]
async fn writes_that_change_nothing_are_not_logged() -> Result<()> {
    let t = spawn_app().await?;
    let (owner, _) = t.register("Acme", "owner@acme.test").await?;
    let supplier = t.create_supplier(&owner, "Same", "saas").await?;
    let id = supplier["id"].as_str().context("supplier id")?;

    let (status, body) = t
        .send("PATCH", &format!("/suppliers/{id}/risk-level"), Some(&owner), Some(json!({ "riskLevel": "medium" })))
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["riskLevel"], "medium");

    let (status, _) = t
        .send("PUT", &format!("/suppliers/{id}"), Some(&owner), Some(json!({ "name": "Same" })))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(t.audit_row_count().await?, 1);

    // A real change right after is still recorded.
    let (status, _) = t
        .send("PATCH", &format!("/suppliers/{id}/risk-level"), Some(&owner), Some(json!({ "riskLevel": "high" })))
        .await?;
    assert_eq!(status, StatusCode::OK);
    let (_, logs) = t.audit_logs(&owner, id).await?;
    assert_eq!(logs["meta"]["total"], 2);
    assert_eq!(
        entries(&logs)[0]["changes"],
        json!([{ "field": "riskLevel", "before": "medium", "after": "high" }])
    );
    Ok(())
}

#[tokio::test]
async fn other_tenants_see_not_found_and_leave_no_trace() -> Result<()> {
    let t = spawn_app().await?;
    let (acme, _) = t.register("Acme", "owner@acme.test").await?;
    let (globex, _) = t.register("Globex", "owner@globex.test").await?;

    let supplier = t.create_supplier(&acme, "Shared Name", "infrastructure").await?;
    let id = supplier["id"].as_str().context("supplier id")?;

    let (status, _) = t.send("GET", &format!("/suppliers/{id}"), Some(&globex), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = t
        .send("PUT", &format!("/suppliers/{id}"), Some(&globex), Some(json!({ "name": "Hijacked" })))
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = t.send("DELETE", &format!("/suppliers/{id}"), Some(&globex), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = t.audit_logs(&globex, id).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, listed) = t.send("GET", "/suppliers", Some(&globex), None).await?;
    assert_eq!(listed["meta"]["total"], 0);

    // Only the original create is on record.
    assert_eq!(t.audit_row_count().await?, 1);
    let (_, body) = t.send("GET", &format!("/suppliers/{id}"), Some(&acme), None).await?;
    assert_eq!(body["name"], "Shared Name");
    Ok(())
}

#[tokio::test]
async fn roles_are_enforced_before_any_work() -> Result<()> {
    let t = spawn_app().await?;
    let (owner, _) = t.register("Acme", "owner@acme.test").await?;
    let auditor = t.member(&owner, "auditor@acme.test", "auditor").await?;
    let analyst = t.member(&owner, "analyst@acme.test", "analyst").await?;

    let supplier = t.create_supplier(&owner, "Vendor", "saas").await?;
    let id = supplier["id"].as_str().context("supplier id")?;

    let (status, body) = t
        .send(
            "POST",
            "/suppliers",
            Some(&auditor),
            Some(json!({ "name": "Nope", "domain": "nope.io", "category": "saas", "riskLevel": "low" })),
        )
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (status, _) = t.send("DELETE", &format!("/suppliers/{id}"), Some(&analyst), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Analysts may adjust risk and notes but not read the audit trail.
    let (status, body) = t
        .send(
            "PATCH",
            &format!("/suppliers/{id}/risk-level"),
            Some(&analyst),
            Some(json!({ "riskLevel": "critical" })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["riskLevel"], "critical");

    let (status, _) = t.audit_logs(&analyst, id).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = t.audit_logs(&auditor, id).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["total"], 2);

    let (status, _) = t.send("GET", "/suppliers", None, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // create + risk-level update; the forbidden calls wrote nothing.
    assert_eq!(t.audit_row_count().await?, 2);
    Ok(())
}

#[tokio::test]
async fn notes_are_validated_and_audited() -> Result<()> {
    let t = spawn_app().await?;
    let (owner, _) = t.register("Acme", "owner@acme.test").await?;
    let supplier = t.create_supplier(&owner, "Noted", "other").await?;
    let id = supplier["id"].as_str().context("supplier id")?;

    let (status, _) = t
        .send(
            "PATCH",
            &format!("/suppliers/{id}/notes"),
            Some(&owner),
            Some(json!({ "notes": "<script>alert(1)</script>" })),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = t
        .send(
            "PATCH",
            &format!("/suppliers/{id}/notes"),
            Some(&owner),
            Some(json!({ "notes": "Contrat renouvelé, SOC 2 reçu" })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["notes"], "Contrat renouvelé, SOC 2 reçu");

    let (_, logs) = t.audit_logs(&owner, id).await?;
    assert_eq!(logs["meta"]["total"], 2);
    assert_eq!(entries(&logs)[0]["changes"][0]["field"], "notes");
    Ok(())
}

#[tokio::test]
async fn audit_log_listing_filters_and_paginates() -> Result<()> {
    let t = spawn_app().await?;
    let (owner, _) = t.register("Acme", "owner@acme.test").await?;
    let supplier = t.create_supplier(&owner, "Busy", "saas").await?;
    let id = supplier["id"].as_str().context("supplier id")?;

    for level in ["low", "high", "critical"] {
        let (status, _) = t
            .send(
                "PATCH",
                &format!("/suppliers/{id}/risk-level"),
                Some(&owner),
                Some(json!({ "riskLevel": level })),
            )
            .await?;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, body) = t
        .send("GET", &format!("/suppliers/{id}/audit-logs?action=UPDATE&limit=2"), Some(&owner), None)
        .await?;
    assert_eq!(body["meta"]["total"], 3);
    assert_eq!(body["meta"]["lastPage"], 2);
    assert_eq!(entries(&body).len(), 2);
    assert_eq!(entries(&body)[0]["after"]["riskLevel"], "critical");

    let (_, body) = t
        .send("GET", &format!("/suppliers/{id}/audit-logs?sortOrder=asc"), Some(&owner), None)
        .await?;
    assert_eq!(entries(&body)[0]["action"], "CREATE");

    let (status, _) = t
        .send("GET", &format!("/suppliers/{id}/audit-logs?limit=500"), Some(&owner), None)
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}
