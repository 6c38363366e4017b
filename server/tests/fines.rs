mod common;

use reqwest::StatusCode;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};

use common::{OPERATOR, OWNER_A, OWNER_B, PLAIN_GATE, TestServer, transit_body};
use toll_shared::messages::{ErrorCode, ErrorEnvelope, TransitCreated};
use toll_shared::model::{FineReport, Weather};

/// Two fined transits (AA111AA on 1 March, BB222BB on 2 March) and one
/// compliant transit for AA111AA on 3 March, all on route 1.
async fn populated() -> (TestServer, i64) {
    let server = TestServer::start(None).await;
    let mut first_fine = 0;
    for (plate, entry, exit) in [
        ("AA111AA", "2024-03-01T10:00:00Z", "2024-03-01T10:30:00Z"),
        ("BB222BB", "2024-03-02T10:00:00Z", "2024-03-02T10:30:00Z"),
        ("AA111AA", "2024-03-03T10:00:00Z", "2024-03-03T12:00:00Z"),
    ] {
        let created: TransitCreated = server
            .post("/transiti", OPERATOR)
            .json(&transit_body(plate, 1, entry, exit))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if first_fine == 0 {
            first_fine = created.fine.unwrap().id;
        }
    }
    (server, first_fine)
}

async fn list(server: &TestServer, who: (i64, &str), query: &str) -> Vec<FineReport> {
    let response = server.get(&format!("/multe?{query}"), who).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    response.json().await.unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_operator_lists_enriched_fines() {
    let (server, _) = populated().await;

    let fines = list(
        &server,
        OPERATOR,
        "targa=AA111AA&targa=BB222BB&dataIn=2024-03-01T00:00:00Z&dataOut=2024-03-31T00:00:00Z",
    )
    .await;
    assert_eq!(fines.len(), 2);

    let fine = fines.iter().find(|f| f.transit.plate.as_str() == "AA111AA").unwrap();
    assert_eq!(fine.amount, 700.0);
    assert_eq!(fine.weather, Weather::Clear);
    assert_eq!(fine.route.id, 1);
    assert_eq!(fine.route.distance, 100.0);
    assert_eq!(fine.route.entry_gate.km, 0.0);
    assert_eq!(fine.route.exit_gate.km, 100.0);

    // The same listing twice gives the same answer.
    let again = list(
        &server,
        OPERATOR,
        "targa=AA111AA,BB222BB&dataIn=2024-03-01T00:00:00Z&dataOut=2024-03-31T00:00:00Z",
    )
    .await;
    assert_eq!(fines.len(), again.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_window_overlap() {
    let (server, _) = populated().await;

    // Window inside the transit.
    let fines = list(
        &server,
        OPERATOR,
        "targa=AA111AA&dataIn=2024-03-01T10:10:00Z&dataOut=2024-03-01T10:20:00Z",
    )
    .await;
    assert_eq!(fines.len(), 1);

    // Window covering only the exit.
    let fines = list(
        &server,
        OPERATOR,
        "targa=AA111AA&dataIn=2024-03-01T10:20:00Z&dataOut=2024-03-01T18:00:00Z",
    )
    .await;
    assert_eq!(fines.len(), 1);

    // Window after the transit, where only the compliant one falls.
    let fines = list(
        &server,
        OPERATOR,
        "targa=AA111AA&dataIn=2024-03-03T00:00:00Z&dataOut=2024-03-04T00:00:00Z",
    )
    .await;
    assert!(fines.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_motorists_see_only_their_vehicles() {
    let (server, _) = populated().await;
    let query = "targa=AA111AA&targa=BB222BB&dataIn=2024-03-01T00:00:00Z&dataOut=2024-03-31T00:00:00Z";

    let fines = list(&server, OWNER_A, query).await;
    assert_eq!(fines.len(), 1);
    assert_eq!(fines[0].transit.plate.as_str(), "AA111AA");

    let fines = list(&server, OWNER_B, query).await;
    assert_eq!(fines.len(), 1);
    assert_eq!(fines[0].transit.plate.as_str(), "BB222BB");

    let response = server.get(&format!("/multe?{query}"), PLAIN_GATE).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bad_listing_queries() {
    let (server, _) = populated().await;

    for query in [
        "dataIn=2024-03-01T00:00:00Z&dataOut=2024-03-31T00:00:00Z",
        "targa=AA111AA&dataOut=2024-03-31T00:00:00Z",
        "targa=AA111AA&dataIn=yesterday&dataOut=2024-03-31T00:00:00Z",
        "targa=AA111AA&dataIn=2024-03-31T00:00:00Z&dataOut=2024-03-01T00:00:00Z",
        "targa=not-a-plate&dataIn=2024-03-01T00:00:00Z&dataOut=2024-03-31T00:00:00Z",
    ] {
        let response = server.get(&format!("/multe?{query}"), OPERATOR).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{query}");
        let envelope: ErrorEnvelope = response.json().await.unwrap();
        assert_eq!(envelope.error.code, ErrorCode::BadRequest);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_weather_label_follows_current_gates() {
    let (server, _) = populated().await;
    let query = "targa=AA111AA&dataIn=2024-03-01T00:00:00Z&dataOut=2024-03-02T00:00:00Z";
    assert_eq!(list(&server, OPERATOR, query).await[0].weather, Weather::Clear);

    for gate in [1, 2] {
        server
            .put(&format!("/varchi/{gate}/pioggia"), OPERATOR)
            .json(&serde_json::json!({ "pioggia": true }))
            .send()
            .await
            .unwrap();
    }

    // Assessed without rain, reported with it.
    let fine = &list(&server, OPERATOR, query).await[0];
    assert_eq!(fine.weather, Weather::Rain);
    assert_eq!(fine.amount, 700.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_payment_document() {
    let (server, fine_id) = populated().await;

    let response = server
        .get(&format!("/multe/{fine_id}/bollettino"), OWNER_A)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "application/pdf");
    assert_eq!(
        response.headers()[CONTENT_DISPOSITION],
        format!("attachment; filename=\"bollettino_{fine_id}.pdf\"").as_str()
    );
    let body = response.bytes().await.unwrap();
    assert!(body.starts_with(b"%PDF-1.4"));
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("Targa: AA111AA"));
    assert!(text.contains("Importo: 700.00 EUR"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_payment_document_access() {
    let (server, fine_id) = populated().await;

    let response = server
        .get(&format!("/multe/{fine_id}/bollettino"), OWNER_B)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = server
        .get(&format!("/multe/{fine_id}/bollettino"), OPERATOR)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = server
        .get("/multe/abc/bollettino", OWNER_A)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let envelope: ErrorEnvelope = response.json().await.unwrap();
    assert_eq!(envelope.error.code, ErrorCode::InvalidId);

    let response = server
        .get("/multe/9999/bollettino", OWNER_A)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
