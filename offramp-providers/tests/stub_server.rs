//! Adapters driven against a local stub of each provider API.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
};
use serde_json::{Value, json};

use offramp_providers::{
    ChangeNowApiConfig, ChangeNowClient, NowPaymentsClient, NowPaymentsConfig, RetryPolicy,
    SellTransactionRequest, StripeClient, StripeConfig, WiseClient, WiseConfig, retry_transient,
};
use rust_decimal_macros::dec;
use offramp_types::{
    Currency, Money, OrderId, OrderStatus, PayoutDestination, PayoutProvider, PayoutRequest,
    ProviderError, TokenSymbol,
};

#[derive(Debug, Clone)]
struct Recorded {
    method: Method,
    path: String,
    headers: HeaderMap,
    body: String,
}

#[derive(Clone, Default)]
struct Stub {
    routes: Arc<HashMap<(Method, String), (StatusCode, Value)>>,
    seen: Arc<Mutex<Vec<Recorded>>>,
    /// Held before every answer
    delay: Duration,
}

impl Stub {
    fn new(routes: Vec<(Method, &str, StatusCode, Value)>) -> Self {
        let routes = routes
            .into_iter()
            .map(|(m, p, s, v)| ((m, p.to_string()), (s, v)))
            .collect();
        Self {
            routes: Arc::new(routes),
            seen: Arc::default(),
            delay: Duration::ZERO,
        }
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn requests(&self) -> Vec<Recorded> {
        self.seen.lock().unwrap().clone()
    }

    async fn serve(&self) -> String {
        let app = Router::new().fallback(answer).with_state(self.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }
}

async fn answer(
    State(stub): State<Stub>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, Json<Value>) {
    let path = uri.path().to_string();
    stub.seen.lock().unwrap().push(Recorded {
        method: method.clone(),
        path: path.clone(),
        headers,
        body,
    });
    tokio::time::sleep(stub.delay).await;
    match stub.routes.get(&(method, path)) {
        Some((status, value)) => (*status, Json(value.clone())),
        None => (StatusCode::NOT_FOUND, Json(json!({ "message": "no such route" }))),
    }
}

fn payout_request(destination: PayoutDestination) -> PayoutRequest {
    PayoutRequest {
        order_id: OrderId::new(),
        token_symbol: TokenSymbol::parse("NENO").unwrap(),
        amount: Money::new(12_345, Currency::EUR).unwrap(),
        destination,
        attempt: 1,
    }
}

fn iban() -> PayoutDestination {
    PayoutDestination::Iban {
        iban: "DE89370400440532013000".into(),
        beneficiary_name: "Jane Doe".into(),
    }
}

fn nowpayments(base_url: String) -> NowPaymentsClient {
    NowPaymentsClient::new(NowPaymentsConfig {
        base_url,
        api_key: Some("np-key".into()),
        jwt: Some("np-jwt".into()),
        ..NowPaymentsConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn nowpayments_falls_back_to_plural_endpoint() {
    let stub = Stub::new(vec![
        (
            Method::POST,
            "/v1/payout",
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({ "message": "use /payouts" }),
        ),
        (
            Method::POST,
            "/v1/payouts",
            StatusCode::OK,
            json!({ "id": 5001, "withdrawals": [{ "status": "WAITING" }] }),
        ),
    ]);
    let base = stub.serve().await;
    let client = nowpayments(format!("{base}/v1"));
    let request = payout_request(iban());

    let receipt = client.create_payout(&request).await.unwrap();

    assert_eq!(receipt.payout_id.as_deref(), Some("5001"));
    assert_eq!(receipt.raw_status.as_deref(), Some("waiting"));
    assert_eq!(
        receipt.raw_status.as_deref().and_then(|s| client.map_status(s)),
        Some(OrderStatus::PayoutPending)
    );

    let seen = stub.requests();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1].path, "/v1/payouts");
    assert_eq!(seen[1].headers["x-api-key"], "np-key");
    assert_eq!(seen[1].headers["authorization"], "Bearer np-jwt");
    let body: Value = serde_json::from_str(&seen[1].body).unwrap();
    assert_eq!(
        body["withdrawals"][0]["unique_external_id"],
        request.order_id.to_string()
    );
}

#[tokio::test]
async fn nowpayments_error_keeps_provider_body() {
    let stub = Stub::new(vec![(
        Method::POST,
        "/payout",
        StatusCode::BAD_REQUEST,
        json!({ "message": "invalid iban" }),
    )]);
    let client = nowpayments(stub.serve().await);

    let err = client.create_payout(&payout_request(iban())).await.unwrap_err();

    match err {
        ProviderError::Http { status, body } => {
            assert_eq!(status, 400);
            assert!(body.contains("invalid iban"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!ProviderError::Http { status: 400, body: String::new() }.is_transient());
    // 400 is not a fallback status
    assert_eq!(stub.requests().len(), 1);
}

#[tokio::test]
async fn nowpayments_status_lookup() {
    let stub = Stub::new(vec![(
        Method::GET,
        "/payout/5001",
        StatusCode::OK,
        json!({ "status": "FINISHED" }),
    )]);
    let client = nowpayments(stub.serve().await);

    let status = client.payout_status("5001").await.unwrap();

    assert_eq!(status.raw_status, "finished");
    assert_eq!(client.map_status(&status.raw_status), Some(OrderStatus::Completed));
}

#[tokio::test]
async fn wise_runs_quote_account_transfer_payment() {
    let stub = Stub::new(vec![
        (
            Method::POST,
            "/v3/profiles/42/quotes",
            StatusCode::OK,
            json!({ "id": "q-1" }),
        ),
        (Method::POST, "/v1/accounts", StatusCode::OK, json!({ "id": 777 })),
        (
            Method::POST,
            "/v1/transfers",
            StatusCode::OK,
            json!({ "id": 9001, "status": "incoming_payment_waiting" }),
        ),
        (
            Method::POST,
            "/v3/profiles/42/transfers/9001/payments",
            StatusCode::OK,
            json!({ "type": "BALANCE", "status": "COMPLETED" }),
        ),
    ]);
    let base_url = stub.serve().await;
    let client = WiseClient::new(WiseConfig {
        base_url,
        ..WiseConfig::new("wise-token", "42")
    })
    .unwrap();
    let request = payout_request(iban());

    let receipt = client.create_payout(&request).await.unwrap();

    assert_eq!(receipt.payout_id.as_deref(), Some("9001"));
    assert_eq!(receipt.raw_status.as_deref(), Some("incoming_payment_waiting"));

    let seen = stub.requests();
    let paths: Vec<_> = seen.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(
        paths,
        vec![
            "/v3/profiles/42/quotes",
            "/v1/accounts",
            "/v1/transfers",
            "/v3/profiles/42/transfers/9001/payments",
        ]
    );
    let transfer: Value = serde_json::from_str(&seen[2].body).unwrap();
    assert_eq!(
        transfer["customerTransactionId"],
        request.idempotency_uuid().to_string()
    );
    assert_eq!(transfer["quoteUuid"], "q-1");
    assert_eq!(seen[0].headers["authorization"], "Bearer wise-token");
}

#[tokio::test]
async fn wise_rejects_cards_without_calling_out() {
    let stub = Stub::new(vec![]);
    let client = WiseClient::new(WiseConfig {
        base_url: stub.serve().await,
        ..WiseConfig::new("wise-token", "42")
    })
    .unwrap();

    let err = client
        .create_payout(&payout_request(PayoutDestination::Card {
            token: "tok_visa".into(),
        }))
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::Unsupported("card")));
    assert!(stub.requests().is_empty());
}

#[tokio::test]
async fn stripe_attaches_card_then_pays_out() {
    let stub = Stub::new(vec![
        (
            Method::POST,
            "/v1/accounts/acct_123/external_accounts",
            StatusCode::OK,
            json!({ "id": "card_abc", "object": "card" }),
        ),
        (
            Method::POST,
            "/v1/payouts",
            StatusCode::OK,
            json!({ "id": "po_1", "status": "pending" }),
        ),
    ]);
    let base_url = stub.serve().await;
    let client = StripeClient::new(StripeConfig {
        base_url,
        ..StripeConfig::new("sk_test_1", "acct_123")
    })
    .unwrap();
    let request = payout_request(PayoutDestination::Card {
        token: "tok_visa_debit".into(),
    });

    let receipt = client.create_payout(&request).await.unwrap();

    assert_eq!(receipt.payout_id.as_deref(), Some("po_1"));
    assert_eq!(
        receipt.raw_status.as_deref().and_then(|s| client.map_status(s)),
        Some(OrderStatus::PayoutPending)
    );

    let seen = stub.requests();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].body, "external_account=tok_visa_debit");
    assert_eq!(seen[0].headers["stripe-account"], "acct_123");
    assert_eq!(
        seen[1].headers["idempotency-key"],
        format!("{}-1", request.order_id).as_str()
    );
    assert!(seen[1].body.contains("amount=12345"));
    assert!(seen[1].body.contains("destination=card_abc"));
    assert!(seen[1].body.contains("method=instant"));
    assert!(
        seen[1]
            .body
            .contains(&format!("metadata%5Border_id%5D={}", request.order_id))
    );
}

#[tokio::test]
async fn unreachable_provider_is_transient() {
    // Bind then drop to get a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = nowpayments(format!("http://{addr}"));
    let err = client.payout_status("1").await.unwrap_err();

    assert!(matches!(err, ProviderError::Transport(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn nowpayments_timeout_is_not_resent() {
    let stub = Stub::new(vec![(
        Method::POST,
        "/payout",
        StatusCode::OK,
        json!({ "id": 5001 }),
    )])
    .slow(Duration::from_millis(500));
    let client = NowPaymentsClient::new(NowPaymentsConfig {
        base_url: stub.serve().await,
        api_key: Some("np-key".into()),
        timeout: Duration::from_millis(100),
        ..NowPaymentsConfig::default()
    })
    .unwrap();
    let request = payout_request(iban());

    let result = retry_transient(
        &RetryPolicy::new(3, Duration::from_millis(1)),
        "create_payout",
        || client.create_payout(&request),
    )
    .await;

    let err = result.unwrap_err();
    assert!(matches!(err, ProviderError::NoResponse(_)), "{err}");
    assert!(err.is_unconfirmed());
    assert_eq!(stub.requests().len(), 1, "one order, one payout submission");
}

#[tokio::test]
async fn stripe_retrigger_sends_a_fresh_idempotency_key() {
    let stub = Stub::new(vec![
        (
            Method::POST,
            "/v1/accounts/acct_123/external_accounts",
            StatusCode::OK,
            json!({ "id": "card_abc" }),
        ),
        (
            Method::POST,
            "/v1/payouts",
            StatusCode::OK,
            json!({ "id": "po_1", "status": "pending" }),
        ),
    ]);
    let client = StripeClient::new(StripeConfig {
        base_url: stub.serve().await,
        ..StripeConfig::new("sk_test_1", "acct_123")
    })
    .unwrap();
    let mut request = payout_request(PayoutDestination::Card {
        token: "tok_visa_debit".into(),
    });

    client.create_payout(&request).await.unwrap();
    request.attempt = 2;
    client.create_payout(&request).await.unwrap();

    let keys: Vec<_> = stub
        .requests()
        .into_iter()
        .filter(|r| r.path == "/v1/payouts")
        .map(|r| r.headers["idempotency-key"].to_str().unwrap().to_string())
        .collect();
    assert_eq!(
        keys,
        vec![format!("{}-1", request.order_id), format!("{}-2", request.order_id)]
    );
}

fn changenow(base_url: String) -> ChangeNowClient {
    ChangeNowClient::new(ChangeNowApiConfig {
        base_url,
        ref_id: Some("partner42".into()),
        ..ChangeNowApiConfig::new("cn-key")
    })
    .unwrap()
}

#[tokio::test]
async fn changenow_min_amount_and_estimate() {
    let stub = Stub::new(vec![
        (
            Method::GET,
            "/min-amount/usdt/eur",
            StatusCode::OK,
            json!({ "minAmount": 19.5 }),
        ),
        (
            Method::GET,
            "/exchange-amount/150.5/usdt_eur",
            StatusCode::OK,
            json!({
                "estimatedAmount": "138.21",
                "transactionSpeedForecast": "10-60",
                "warningMessage": null
            }),
        ),
    ]);
    let client = changenow(stub.serve().await);

    assert_eq!(client.min_amount("USDT", "eur").await.unwrap(), dec!(19.5));
    let estimate = client.estimate(dec!(150.50), "usdt", "EUR").await.unwrap();

    assert_eq!(estimate.estimated_amount, dec!(138.21));
    assert_eq!(estimate.speed_forecast.as_deref(), Some("10-60"));
    assert_eq!(estimate.warning, None);
    let seen = stub.requests();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|r| r.method == Method::GET
        && r.headers["x-changenow-api-key"] == "cn-key"));
}

#[tokio::test]
async fn changenow_estimate_without_amount_is_invalid() {
    let stub = Stub::new(vec![(
        Method::GET,
        "/exchange-amount/10/eth_eur",
        StatusCode::OK,
        json!({ "error": "pair_is_inactive" }),
    )]);
    let client = changenow(stub.serve().await);

    let err = client.estimate(dec!(10), "eth", "eur").await.unwrap_err();
    assert!(matches!(err, ProviderError::InvalidResponse(_)), "{err}");
}

#[tokio::test]
async fn changenow_creates_sell_transaction() {
    let stub = Stub::new(vec![(
        Method::POST,
        "/transactions",
        StatusCode::OK,
        json!({
            "id": "cn_tx_77",
            "payinAddress": "0xabc",
            "status": "waiting"
        }),
    )]);
    let client = changenow(stub.serve().await);

    let tx = client
        .create_sell_transaction(&SellTransactionRequest {
            from_ticker: "USDT".into(),
            to_currency: "eur".into(),
            amount: dec!(250),
            payout_address: "DE89370400440532013000".into(),
            refund_address: Some("0xrefund".into()),
        })
        .await
        .unwrap();

    assert_eq!(tx.id, "cn_tx_77");
    assert_eq!(tx.payin_address.as_deref(), Some("0xabc"));
    assert_eq!(tx.status.as_deref(), Some("waiting"));
    let seen = stub.requests();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].headers["x-changenow-api-key"], "cn-key");
    let body: Value = serde_json::from_str(&seen[0].body).unwrap();
    assert_eq!(body["fromCurrency"], "usdt");
    assert_eq!(body["fromAmount"], "250");
    assert_eq!(body["refundAddress"], "0xrefund");
    assert_eq!(body["referralCode"], "partner42");
}

#[tokio::test]
async fn changenow_rejection_keeps_provider_body() {
    let stub = Stub::new(vec![(
        Method::POST,
        "/transactions",
        StatusCode::BAD_REQUEST,
        json!({ "error": "out_of_range", "message": "Amount is less than minimal" }),
    )]);
    let client = changenow(stub.serve().await);

    let err = client
        .create_sell_transaction(&SellTransactionRequest {
            from_ticker: "usdt".into(),
            to_currency: "eur".into(),
            amount: dec!(1),
            payout_address: "DE89370400440532013000".into(),
            refund_address: None,
        })
        .await
        .unwrap_err();

    assert_eq!(err.http_status(), Some(400));
    assert!(err.body().unwrap().contains("out_of_range"));
    assert!(!err.is_transient());
}
