//! HTTP API integration tests
//!
//! Drive the router with tower's `oneshot`; background tasks are awaited
//! through the orchestrator held by the shared state.

mod helpers;

use axum::http::StatusCode;
use dcr_engine::build_router;
use helpers::*;
use serde_json::json;
use tower::ServiceExt;
use uuid::Uuid;

fn listing_json(brand: &str, model: &str, storage_gb: u32, price: f64) -> serde_json::Value {
    json!({
        "modelo_raw": format!("{} {}", brand, model),
        "modelo_norm": model,
        "tipo": "Smartphone",
        "marca": brand,
        "almacenamiento_gb": storage_gb,
        "precio_b2b": price,
    })
}

/// POST /batches, then wait for the task to settle
async fn launch_over_http(state: &dcr_engine::AppState, listings: Vec<serde_json::Value>) -> Uuid {
    let response = build_router(state.clone())
        .oneshot(json_request("POST", "/batches", json!({ "listings": listings })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = body_json(response).await;
    assert_eq!(body["estado"], "PENDING");
    let batch_id: Uuid = body["batch_id"].as_str().unwrap().parse().unwrap();
    state.orchestrator.wait_for(batch_id).await.unwrap();
    batch_id
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_dir, state, _catalog) = create_test_state().await;

    let response = build_router(state).oneshot(get_request("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "dcr-engine");
    assert_eq!(body["active_batches"], 0);
    assert!(body["version"].is_string());
    assert_eq!(body["database"]["reachable"], true);
    assert!(body["build"]["git_hash"].is_string());
}

#[tokio::test]
async fn test_batch_lifecycle() {
    let (_dir, state, catalog) = create_test_state().await;
    let batch_id = launch_over_http(
        &state,
        vec![
            listing_json("Apple", "iPhone 13", 128, 450.0),
            listing_json("Apple", "iPhone 15", 128, 800.0),
        ],
    )
    .await;

    let response = build_router(state.clone())
        .oneshot(get_request(&format!("/batches/{}/status", batch_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let status = body_json(response).await;
    assert_eq!(status["estado"], "SUCCESS");
    assert_eq!(status["status"], "succeeded");
    assert_eq!(status["progress"]["processed"], 2);
    assert_eq!(status["progress"]["total"], 2);
    assert_eq!(status["incomplete"], false);

    // Diff: wire field names of the change records
    let response = build_router(state.clone())
        .oneshot(get_request(&format!("/batches/{}/diff", batch_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let diff = body_json(response).await;
    assert_eq!(diff["summary"]["updates"], 1);
    assert_eq!(diff["summary"]["unmapped"], 1);
    let update = diff["changes"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["kind"] == "UPDATE")
        .unwrap();
    assert_eq!(update["capacidad_id"], catalog.iphone13_128);
    assert_eq!(update["antes"], 400.0);
    assert_eq!(update["despues"], 450.0);
    assert_eq!(update["delta"], 50.0);
    assert_eq!(update["modelo_norm"], "iPhone 13");
    assert!(update["confianza"].as_u64().unwrap() >= 70);

    // Review queue holds the unmatched listing
    let response = build_router(state.clone())
        .oneshot(get_request(&format!("/batches/{}/review", batch_id)))
        .await
        .unwrap();
    let queue = body_json(response).await;
    let items = queue["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["staging_item_id"], 2);

    // Apply only the updates
    let response = build_router(state.clone())
        .oneshot(json_request(
            "POST",
            &format!("/batches/{}/apply", batch_id),
            json!({ "aplicar_actualizaciones": true }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let report = body_json(response).await;
    assert_eq!(report["applied"], 1);
    assert!(report["conflicts"].as_array().unwrap().is_empty());

    let response = build_router(state.clone())
        .oneshot(get_request(&format!("/catalog/models/{}/capacities", catalog.iphone13)))
        .await
        .unwrap();
    let capacities = body_json(response).await;
    let applied = capacities
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["id"] == catalog.iphone13_128)
        .unwrap();
    assert_eq!(applied["prices"]["b2b"], 450.0);

    // Metrics
    let response = build_router(state.clone())
        .oneshot(get_request(&format!("/batches/{}/metrics", batch_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let metrics = body_json(response).await;
    assert_eq!(metrics["total_listings"], 2);
    assert_eq!(metrics["matched"], 1);
    assert_eq!(metrics["failed"], 1);
    assert_eq!(metrics["pending_review"], 1);
}

#[tokio::test]
async fn test_logs_are_paged_by_sequence() {
    let (_dir, state, _catalog) = create_test_state().await;
    let batch_id = launch_over_http(&state, vec![listing_json("Apple", "iPhone 13", 128, 450.0)]).await;

    let response = build_router(state.clone())
        .oneshot(get_request(&format!("/batches/{}/logs", batch_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let page = body_json(response).await;
    let lines = page["lines"].as_array().unwrap();
    assert!(!lines.is_empty());
    let next = page["next"].as_i64().unwrap();
    assert_eq!(lines.last().unwrap()["seq"].as_i64().unwrap(), next);

    let response = build_router(state.clone())
        .oneshot(get_request(&format!("/batches/{}/logs?since={}", batch_id, next)))
        .await
        .unwrap();
    let page = body_json(response).await;
    assert!(page["lines"].as_array().unwrap().is_empty());
    assert_eq!(page["next"].as_i64().unwrap(), next);
}

#[tokio::test]
async fn test_unknown_batch_is_not_found() {
    let (_dir, state, _catalog) = create_test_state().await;
    let unknown = Uuid::new_v4();

    for uri in [
        format!("/batches/{}/status", unknown),
        format!("/batches/{}/diff", unknown),
        format!("/batches/{}/logs", unknown),
    ] {
        let response = build_router(state.clone()).oneshot(get_request(&uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }
}

#[tokio::test]
async fn test_invalid_feed_is_rejected() {
    let (_dir, state, _catalog) = create_test_state().await;

    let response = build_router(state.clone())
        .oneshot(json_request(
            "POST",
            "/batches",
            json!({ "listings": [listing_json("", "iPhone 13", 128, -5.0)] }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    let message = body["error"]["message"].as_str().unwrap();
    assert!(message.contains("listing 1"));

    let response = build_router(state)
        .oneshot(json_request("POST", "/batches", json!({ "listings": [] })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cancel_finished_batch_is_rejected() {
    let (_dir, state, _catalog) = create_test_state().await;
    let batch_id = launch_over_http(&state, vec![listing_json("Apple", "iPhone 13", 128, 450.0)]).await;

    let response = build_router(state)
        .oneshot(json_request("POST", &format!("/batches/{}/cancel", batch_id), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_review_correct_over_http() {
    let (_dir, state, catalog) = create_test_state().await;
    let batch_id = launch_over_http(&state, vec![listing_json("Apple", "iPhone 13", 512, 700.0)]).await;

    let response = build_router(state.clone())
        .oneshot(json_request(
            "POST",
            "/review/correct",
            json!({
                "tarea_id": batch_id,
                "staging_item_id": 1,
                "new_capacidad_id": catalog.iphone13_256,
                "reason": "listing is a 256GB unit",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = body_json(response).await;
    assert_eq!(outcome["decision"], "correct");
    assert_eq!(outcome["result"]["capacity_id"], catalog.iphone13_256);
    assert_eq!(outcome["knowledge"]["signature"], "apple|iphone 13|512gb");

    // The Knowledge Base entry is visible with its history
    let response = build_router(state.clone())
        .oneshot(get_request("/knowledge/entry?signature=apple%7Ciphone%2013%7C512gb"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let entry = body_json(response).await;
    assert_eq!(entry["entry"]["capacity_id"], catalog.iphone13_256);
    assert_eq!(entry["entry"]["user_validated"], true);
    assert_eq!(entry["history"].as_array().unwrap().len(), 1);
    assert_eq!(entry["history"][0]["event"], "corrected");

    let response = build_router(state.clone())
        .oneshot(get_request("/knowledge/metrics"))
        .await
        .unwrap();
    let metrics = body_json(response).await;
    assert_eq!(metrics["entries"], 1);
    assert_eq!(metrics["user_validated"], 1);
    assert_eq!(metrics["total_corrections"], 1);

    // A second decision on the same listing is refused
    let response = build_router(state)
        .oneshot(json_request(
            "POST",
            "/review/reject",
            json!({ "tarea_id": batch_id, "staging_item_id": 1 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_review_create_model_over_http() {
    let (_dir, state, _catalog) = create_test_state().await;
    let batch_id = launch_over_http(
        &state,
        vec![
            listing_json("Apple", "iPhone 15", 128, 800.0),
            listing_json("Apple", "iPhone 15", 256, 900.0),
        ],
    )
    .await;

    let response = build_router(state.clone())
        .oneshot(json_request(
            "POST",
            "/review/create-model",
            json!({
                "staging_id": batch_id,
                "staging_item_id": 1,
                "tipo": "Smartphone",
                "marca": "Apple",
                "modelo": "iPhone 15",
                "almacenamiento_gb": 128,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = body_json(response).await;
    assert_eq!(outcome["auto_mapped_count"], 1);
    assert_eq!(outcome["propagated"], json!([2]));
    let model_id = outcome["model_id"].as_i64().unwrap();

    let response = build_router(state.clone())
        .oneshot(get_request(&format!("/catalog/models/{}", model_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let model = body_json(response).await;
    assert_eq!(model["description"], "iPhone 15");
    assert_eq!(model["capacities"].as_array().unwrap().len(), 2);

    // Empty model name is a validation error
    let response = build_router(state)
        .oneshot(json_request(
            "POST",
            "/review/create-model",
            json!({
                "tarea_id": batch_id,
                "staging_item_id": 1,
                "tipo": "Smartphone",
                "marca": "Apple",
                "modelo": "  ",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_catalog_crud() {
    let (_dir, state, _catalog) = create_test_state().await;

    let response = build_router(state.clone())
        .oneshot(json_request(
            "POST",
            "/catalog/models",
            json!({
                "description": "Galaxy S22",
                "device_type": "Smartphone",
                "brand": "Samsung",
                "vendor_codes": ["SM-S901B"],
                "capacities": [
                    { "storage_gb": 128, "prices": { "b2b": 420.5 } },
                    { "storage_gb": 256 },
                ],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let model_id = created["id"].as_i64().unwrap();
    assert_eq!(created["vendor_codes"], json!(["SM-S901B"]));
    assert_eq!(created["capacities"][0]["prices"]["b2b"], 420.5);
    let capacity_256 = created["capacities"][1]["id"].as_i64().unwrap();

    let response = build_router(state.clone())
        .oneshot(get_request("/catalog/models?marca=Samsung"))
        .await
        .unwrap();
    let models = body_json(response).await;
    let descriptions: Vec<&str> = models
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["description"].as_str().unwrap())
        .collect();
    assert_eq!(descriptions.len(), 2);
    assert!(descriptions.contains(&"Galaxy S22"));

    let response = build_router(state.clone())
        .oneshot(json_request(
            "PUT",
            &format!("/catalog/capacities/{}/prices/b2b", capacity_256),
            json!({ "price": 510.0 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let capacity = body_json(response).await;
    assert_eq!(capacity["prices"]["b2b"], 510.0);

    let response = build_router(state.clone())
        .oneshot(json_request(
            "PUT",
            &format!("/catalog/capacities/{}/prices/b2b", capacity_256),
            json!({ "price": -1.0 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = build_router(state.clone())
        .oneshot(
            axum::http::Request::builder()
                .method("DELETE")
                .uri(format!("/catalog/models/{}", model_id))
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = build_router(state.clone())
        .oneshot(get_request(&format!("/catalog/models/{}", model_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = build_router(state)
        .oneshot(get_request(&format!("/catalog/models/{}/capacities", model_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_catalog_rejects_invalid_model() {
    let (_dir, state, _catalog) = create_test_state().await;

    let response = build_router(state)
        .oneshot(json_request(
            "POST",
            "/catalog/models",
            json!({
                "description": "Pixel 7",
                "device_type": "Smartphone",
                "brand": "Google",
                "capacities": [{ "storage_gb": 128 }, { "storage_gb": 128 }],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_remap_over_http() {
    let (_dir, state, _catalog) = create_test_state().await;
    let batch_id = launch_over_http(&state, vec![listing_json("Apple", "iPhone 13", 128, 450.0)]).await;

    let response = build_router(state.clone())
        .oneshot(json_request("POST", &format!("/batches/{}/remap", batch_id), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["source_batch_id"], batch_id.to_string());
    let remap_id: Uuid = body["batch_id"].as_str().unwrap().parse().unwrap();
    assert_ne!(remap_id, batch_id);

    let status = state.orchestrator.wait_for(remap_id).await.unwrap();
    assert_eq!(status.progress.total, 1);
}

#[tokio::test]
async fn test_catalog_rejects_duplicate_model() {
    let (_dir, state, catalog) = create_test_state().await;

    let response = build_router(state)
        .oneshot(json_request(
            "POST",
            "/catalog/models",
            json!({
                "description": "iphone 13",
                "device_type": "Smartphone",
                "brand": "APPLE",
                "capacities": [{ "storage_gb": 512 }],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "CONFLICT");
    let message = body["error"]["message"].as_str().unwrap();
    assert!(message.contains(&format!("model {}", catalog.iphone13)));
}
