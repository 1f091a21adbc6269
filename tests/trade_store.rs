use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use swap_terminal::domain::{TradeDirection, TradeRecord, SOL_MINT, USDC_MINT_MAINNET};
use swap_terminal::ports::TradeStore;
use swap_terminal::store::SupabaseTradeStore;

#[derive(Clone, Default)]
struct Backend {
    inserted: Arc<Mutex<Vec<Value>>>,
    last_query: Arc<Mutex<HashMap<String, String>>>,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers.get("apikey").and_then(|v| v.to_str().ok()) == Some("anon")
        && headers.get("authorization").and_then(|v| v.to_str().ok()) == Some("Bearer anon")
}

async fn insert(State(b): State<Backend>, headers: HeaderMap, Json(row): Json<Value>) -> StatusCode {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    b.inserted.lock().unwrap().push(row);
    StatusCode::CREATED
}

async fn list(
    State(b): State<Backend>,
    headers: HeaderMap,
    Query(q): Query<HashMap<String, String>>,
) -> Result<Json<Value>, StatusCode> {
    if !authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    *b.last_query.lock().unwrap() = q;
    Ok(Json(json!([{
        "id": 7,
        "wallet_address": "alice",
        "direction": "SELL",
        "input_mint": USDC_MINT_MAINNET,
        "output_mint": SOL_MINT,
        "input_amount": 150.0,
        "output_amount_est": 1.0,
        "tx_sig": "sig-7",
        "created_at": "2026-03-01T12:00:00Z"
    }])))
}

async fn serve(backend: Backend) -> String {
    let app = Router::new()
        .route("/rest/v1/trades", get(list).post(insert))
        .with_state(backend);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn insert_uses_backend_column_names() {
    let backend = Backend::default();
    let store = SupabaseTradeStore::new(&serve(backend.clone()).await, "anon").unwrap();

    let record = TradeRecord {
        wallet_address: "alice".into(),
        direction: TradeDirection::Buy,
        input_mint: SOL_MINT.into(),
        output_mint: USDC_MINT_MAINNET.into(),
        input_amount: 1.5,
        output_amount_estimate: 225.0,
        transaction_signature: Some("sig-1".into()),
        created_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
    };
    store.create_trade_record(&record).await.unwrap();

    let rows = backend.inserted.lock().unwrap().clone();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["direction"], "BUY");
    assert_eq!(rows[0]["tx_sig"], "sig-1");
    assert_eq!(rows[0]["output_amount_est"], 225.0);
}

#[tokio::test]
async fn history_is_filtered_ordered_and_limited_server_side() {
    let backend = Backend::default();
    let store = SupabaseTradeStore::new(&serve(backend.clone()).await, "anon").unwrap();

    let records = store.list_trade_records("alice", 5).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].direction, TradeDirection::Sell);
    assert_eq!(records[0].transaction_signature.as_deref(), Some("sig-7"));

    let q = backend.last_query.lock().unwrap().clone();
    assert_eq!(q.get("wallet_address").map(String::as_str), Some("eq.alice"));
    assert_eq!(q.get("order").map(String::as_str), Some("created_at.desc"));
    assert_eq!(q.get("limit").map(String::as_str), Some("5"));
}

#[tokio::test]
async fn rejected_insert_is_an_error() {
    let store = SupabaseTradeStore::new(&serve(Backend::default()).await, "wrong").unwrap();
    let record = TradeRecord {
        wallet_address: "alice".into(),
        direction: TradeDirection::Buy,
        input_mint: SOL_MINT.into(),
        output_mint: USDC_MINT_MAINNET.into(),
        input_amount: 1.0,
        output_amount_estimate: 150.0,
        transaction_signature: None,
        created_at: Utc::now(),
    };
    assert!(store.create_trade_record(&record).await.is_err());
}
