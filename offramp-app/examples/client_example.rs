//! Client example walking through a sell order against a running server.
//!
//! Run with: cargo run -p offramp-app --example client_example

use std::net::SocketAddr;
use std::sync::Arc;

use offramp_client::{ClientError, OfframpClient};
use offramp_hex::{
    OfframpService,
    inbound::{HttpServer, ServerOptions},
};
use offramp_providers::{ChangeNowConfig, ChangeNowWidget, ProviderRegistry};
use offramp_repo::build_repo;
use offramp_types::{CreateOrderRequest, OrderStatus, PayoutDestination};
use rust_decimal_macros::dec;
use tempfile::tempdir;
use tokio::net::TcpListener;

const ADMIN_TOKEN: &str = "example-admin-token";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt().with_env_filter("info").init();

    // Use a temp file-backed SQLite DB
    let tmp = tempdir()?;
    let db_path = tmp.path().join("offramp.db");
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let repo = build_repo(&db_url).await?;

    // No payout provider is configured, so payouts are refused with 503.
    let service = OfframpService::new(repo, ProviderRegistry::new())
        .with_widget(ChangeNowWidget::new(ChangeNowConfig::default())?);
    let server = HttpServer::new(
        Arc::new(service),
        ServerOptions {
            admin_token: Some(ADMIN_TOKEN.into()),
            ..ServerOptions::default()
        },
    );
    let router = server.router();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr: SocketAddr = listener.local_addr()?;
    println!("🚀 Server on {addr}, database {db_url}");
    tokio::spawn(async move {
        let app = router.into_make_service_with_connect_info::<SocketAddr>();
        if let Err(e) = axum::serve(listener, app).await {
            eprintln!("server stopped: {e}");
        }
    });

    let public = OfframpClient::new(format!("http://{addr}"));
    let admin = OfframpClient::new(format!("http://{addr}")).with_admin_token(ADMIN_TOKEN);

    println!("✅ Server health: {}", public.health().await?);

    let denied = public.set_price("NENO", dec!(5000), dec!(10)).await;
    if let Err(ClientError::Api { status, message }) = &denied {
        println!("✅ Pricing without the admin token refused: {status} {message}");
    }

    let listing = admin.set_price("NENO", dec!(5000), dec!(10)).await?;
    println!(
        "✅ Listed {} at €{} ({} available)",
        listing.token, listing.price_eur, listing.available_amount
    );

    let order = public
        .create_order(&CreateOrderRequest {
            token_symbol: "NENO".into(),
            amount_tokens: dec!(2.5),
            destination: PayoutDestination::Iban {
                iban: "DE89 3704 0044 0532 0130 00".into(),
                beneficiary_name: "Jane Doe".into(),
            },
            provider: None,
            idempotency_key: Some("example-order-1".into()),
            redirect_url: None,
        })
        .await?;
    println!(
        "✅ Order {} for €{} via {} is {}",
        order.id, order.amount_eur, order.provider, order.status
    );

    match admin.trigger_payout(order.id).await {
        Ok(result) => println!("   Payout status: {}", result.order.status),
        Err(e) => println!("   Payout refused: {e}"),
    }

    let fetched = public.get_order(order.id).await?;
    println!("   Order is still {}", fetched.status);

    let created = admin.list_orders(Some(OrderStatus::Created)).await?;
    println!("\n📋 Orders awaiting payout: {}", created.len());
    for listing in public.list_listings().await? {
        println!(
            "   - {}: €{} ({} left)",
            listing.token_symbol, listing.price_eur, listing.available_amount
        );
    }

    let widget = public.widget_url(dec!(100), "usdt", None).await?;
    println!("\n🔗 ChangeNOW sell link: {}", widget.url);

    println!("\n🎉 Example completed successfully!");
    Ok(())
}
