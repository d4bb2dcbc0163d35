use super::*;
use axum::body::Body;
use axum::http::{Method, Request};
use crate::period::FixedClock;
use serde_json::{json, Value};
use tower::ServiceExt;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
}

fn test_app() -> Router {
    let store = Store::open_in_memory().unwrap();
    let state = AppState::new(store, Arc::new(FixedClock(today())));
    build_router(state, &Config::default())
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn create(app: &Router, slug: &str, body: Value) -> Value {
    let (status, response) = send(app, Method::POST, &format!("/api/{}", slug), Some(body)).await;
    assert_eq!(status, StatusCode::CREATED, "{}", response);
    response["data"].clone()
}

fn dataset<'a>(chart: &'a Value, label: &str) -> &'a Value {
    chart["datasets"]
        .as_array()
        .unwrap()
        .iter()
        .find(|d| d["label"] == label)
        .map(|d| &d["data"])
        .unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let app = test_app();
    let (status, body) = send(&app, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "connected");
}

#[tokio::test]
async fn test_meal_crud() {
    let app = test_app();
    let created = create(
        &app,
        "meal",
        json!({"type": "Lunch", "number_of_clients": 12, "date": "2024-06-10"}),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["type"], "Lunch");
    assert_eq!(created["number_of_clients"], 12);

    let (status, fetched) = send(&app, Method::GET, &format!("/api/meal/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["date"], "2024-06-10");

    let (status, updated) = send(
        &app,
        Method::PUT,
        &format!("/api/meal/{}", id),
        Some(json!({"number_of_clients": 20})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["data"]["number_of_clients"], 20);
    assert_eq!(updated["data"]["type"], "Lunch");

    let (status, page) = send(&app, Method::GET, "/api/meal", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["count"], 1);

    let (status, _) = send(&app, Method::DELETE, &format!("/api/meal/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, Method::GET, &format!("/api/meal/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Meal entry not found");
}

#[tokio::test]
async fn test_create_defaults_date_to_today() {
    let app = test_app();
    let created = create(&app, "harm-reduction", json!({})).await;

    assert_eq!(created["date"], "2024-06-15");
    assert!(created.get("type").is_none());
}

#[tokio::test]
async fn test_create_validation() {
    let app = test_app();

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/meal",
        Some(json!({"type": "Brunch", "number_of_clients": 4})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Brunch"));

    let (status, _) = send(&app, Method::POST, "/api/meal", Some(json!({"type": "Lunch"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/special-event",
        Some(json!({"type": "Christmas", "number_of_clients": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/referral",
        Some(json!({"date": "15/06/2024"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_update_requires_a_field() {
    let app = test_app();
    let created = create(&app, "referral", json!({"description": "housing"})).await;
    let uri = format!("/api/referral/{}", created["id"].as_str().unwrap());

    let (status, body) = send(&app, Method::PUT, &uri, Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Must include at least 1 field");
}

#[tokio::test]
async fn test_empty_listing_is_not_found() {
    let app = test_app();
    let (status, body) = send(&app, Method::GET, "/api/special-event", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "No Special Event entries found");
}

#[tokio::test]
async fn test_listing_pagination() {
    let app = test_app();
    for day in 1..=3 {
        create(&app, "referral", json!({"date": format!("2024-06-0{}", day)})).await;
    }

    let (status, page) = send(&app, Method::GET, "/api/referral?page=1&page_size=2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["count"], 3);
    let rows = page["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["date"], "2024-06-01");
}

#[tokio::test]
async fn test_grouped_daily_chart() {
    let app = test_app();
    create(&app, "meal", json!({"type": "Lunch", "number_of_clients": 2, "date": "2024-06-10"})).await;
    create(&app, "meal", json!({"type": "Lunch", "number_of_clients": 5, "date": "2024-06-14"})).await;
    create(&app, "meal", json!({"type": "Lunch", "number_of_clients": 1, "date": "2024-06-14"})).await;
    create(&app, "meal", json!({"type": "Breakfast", "number_of_clients": 3, "date": "2024-06-14"})).await;
    // outside the window
    create(&app, "meal", json!({"type": "Snack", "number_of_clients": 9, "date": "2024-06-01"})).await;

    let (status, chart) = send(&app, Method::GET, "/api/meal/chart?period=d&date=2024-06-15", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(chart["from"], "2024-06-09");
    assert_eq!(chart["to"], "2024-06-15");
    assert_eq!(chart["labels"].as_array().unwrap().len(), 7);
    assert_eq!(chart["labels"][6], "Sat, Jun 15, 2024");
    assert_eq!(chart["datasets"].as_array().unwrap().len(), 2);
    assert_eq!(dataset(&chart, "Lunch"), &json!([0, 2, 0, 0, 0, 6, 0]));
    assert_eq!(dataset(&chart, "Breakfast"), &json!([0, 0, 0, 0, 0, 3, 0]));
}

#[tokio::test]
async fn test_single_chart_quarters() {
    let app = test_app();
    for date in ["2024-04-02", "2024-05-20", "2024-11-30", "2024-02-14"] {
        create(&app, "referral", json!({ "date": date })).await;
    }

    let (status, chart) = send(&app, Method::GET, "/api/referral/chart?period=Q&date=2024-03-01", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(chart["labels"], json!(["Q1 2024", "Q2 2024", "Q3 2024", "Q4 2024"]));
    assert_eq!(chart["datasets"][0]["data"], json!([2, 0, 1, 1]));
    assert!(chart["datasets"][0].get("label").is_none());
}

#[tokio::test]
async fn test_unknown_period_falls_back_to_daily() {
    let app = test_app();
    create(&app, "harm-reduction", json!({"date": "2024-06-15"})).await;

    let (status, chart) = send(&app, Method::GET, "/api/harm-reduction/chart?period=bogus", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(chart["from"], "2024-06-09");
    assert_eq!(chart["datasets"][0]["data"], json!([0, 0, 0, 0, 0, 0, 1]));
}

#[tokio::test]
async fn test_activity_participants() {
    let app = test_app();
    let created = create(
        &app,
        "core-activity",
        json!({"type": "Homework Club", "date": "2024-06-20"}),
    )
    .await;
    assert_eq!(created["number_of_clients"], 0);
    let id = created["id"].as_str().unwrap().to_string();
    let participants_uri = format!("/api/core-activity/{}/participants", id);

    let (status, body) = send(
        &app,
        Method::POST,
        &participants_uri,
        Some(json!({"client_ids": ["c1", "c2", "c1"]})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["added"], 2);
    assert_eq!(body["data"]["activity"]["number_of_clients"], 2);

    let (status, list) = send(&app, Method::GET, &participants_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["count"], 2);
    assert_eq!(list["rows"][0]["date_registered"], "2024-06-15");

    let (status, list) = send(&app, Method::GET, &format!("{}?page=1&page_size=1", participants_uri), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["count"], 2);
    assert_eq!(list["rows"].as_array().unwrap().len(), 1);
    assert_eq!(list["rows"][0]["client_id"], "c2");

    let (status, body) = send(&app, Method::DELETE, &format!("{}/c2", participants_uri), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["number_of_clients"], 1);

    let (status, _) = send(&app, Method::DELETE, &format!("{}/c2", participants_uri), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, upcoming) = send(&app, Method::GET, "/api/core-activity/upcoming", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(upcoming["rows"][0]["id"], id.as_str());

    let (status, chart) = send(&app, Method::GET, "/api/core-activity/chart?period=m&date=2024-06-01", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dataset(&chart, "Homework Club")[5], 1);
}

#[tokio::test]
async fn test_special_event_upcoming() {
    let app = test_app();
    create(&app, "special-event", json!({"type": "Thanksgiving", "number_of_clients": 40, "date": "2023-10-09"})).await;
    let christmas = create(
        &app,
        "special-event",
        json!({"type": "Christmas", "number_of_clients": 50, "date": "2024-12-25"}),
    )
    .await;

    let (status, upcoming) = send(&app, Method::GET, "/api/special-event/upcoming", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(upcoming["count"], 1);
    assert_eq!(upcoming["rows"][0]["id"], christmas["id"]);

    // meals are not scheduled, so "upcoming" is treated as an id
    let (status, body) = send(&app, Method::GET, "/api/meal/upcoming", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Meal entry not found");
}

#[tokio::test]
async fn test_weekly_chart_across_new_year() {
    let app = test_app();
    // ISO week 52 of 2021
    create(&app, "meal", json!({"type": "Lunch", "number_of_clients": 7, "date": "2022-01-01"})).await;
    create(&app, "meal", json!({"type": "Lunch", "number_of_clients": 1, "date": "2022-01-05"})).await;
    create(&app, "meal", json!({"type": "Lunch", "number_of_clients": 3, "date": "2022-12-28"})).await;
    // ISO week 1 of 2025
    create(&app, "meal", json!({"type": "Lunch", "number_of_clients": 4, "date": "2024-12-31"})).await;

    let (status, chart) = send(&app, Method::GET, "/api/meal/chart?period=w&date=2022-03-01", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(chart["labels"][0], "Week 1 2022");
    assert_eq!(chart["labels"][51], "Week 52 2022");
    let lunch = dataset(&chart, "Lunch").as_array().unwrap();
    assert_eq!(lunch.len(), 52);
    assert_eq!(lunch[0], 8);
    assert_eq!(lunch[51], 3);
    assert_eq!(lunch.iter().filter_map(Value::as_i64).sum::<i64>(), 11);

    let (status, chart) = send(&app, Method::GET, "/api/meal/chart?period=w&date=2024-06-01", None).await;
    assert_eq!(status, StatusCode::OK);
    let lunch = dataset(&chart, "Lunch").as_array().unwrap();
    assert_eq!(lunch[0], 0);
    assert_eq!(lunch[51], 4);
}

#[tokio::test]
async fn test_participants_only_on_activities() {
    let app = test_app();
    let created = create(&app, "meal", json!({"type": "Lunch", "number_of_clients": 1})).await;
    let uri = format!("/api/meal/{}/participants", created["id"].as_str().unwrap());

    let (status, _) = send(&app, Method::POST, &uri, Some(json!({"client_ids": ["c1"]}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/project-activity/missing/participants",
        Some(json!({"client_ids": ["c1"]})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_client_count_reports() {
    let app = test_app();
    create(&app, "meal", json!({"type": "Lunch", "number_of_clients": 10, "date": "2024-02-01"})).await;
    create(&app, "harm-reduction", json!({"date": "2024-02-03"})).await;
    create(&app, "referral", json!({"date": "2023-12-31"})).await;
    let activity = create(
        &app,
        "project-activity",
        json!({"type": "Workshop", "date": "2024-03-05"}),
    )
    .await;
    send(
        &app,
        Method::POST,
        &format!("/api/project-activity/{}/participants", activity["id"].as_str().unwrap()),
        Some(json!({"client_ids": ["a", "b"]})),
    )
    .await;

    let (status, count) = send(&app, Method::GET, "/api/reports/client-count?year=2024", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(count["year"], 2024);
    assert_eq!(count["total_clients"], 13);
    assert_eq!(count["unique_clients"], 3);

    let (status, chart) = send(&app, Method::GET, "/api/reports/client-count/chart?period=m&date=2024-01-01", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(chart["labels"][0], "January 2024");
    assert_eq!(chart["datasets"][0]["data"][1], 11);
    assert_eq!(chart["datasets"][0]["data"][2], 2);

    let (status, chart) = send(&app, Method::GET, "/api/reports/client-count/chart?period=y", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(chart["labels"], json!(["2023", "2024"]));
    assert_eq!(chart["datasets"][0]["data"], json!([1, 13]));
}
