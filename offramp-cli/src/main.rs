//! Off-ramp CLI
//!
//! Command-line interface for the off-ramp API.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;

use offramp_client::OfframpClient;
use offramp_repo::security::{IpnScheme, sign_ipn};
use offramp_types::{
    CreateOrderRequest, CreateSellTransactionRequest, OrderId, OrderStatus, PayoutDestination,
    Provider,
};

#[derive(Parser)]
#[command(name = "offramp")]
#[command(author, version, about = "Off-ramp API CLI client", long_about = None)]
struct Cli {
    /// Base URL of the off-ramp API
    #[arg(long, env = "OFFRAMP_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    /// Admin token for operator endpoints
    #[arg(long, env = "OFFRAMP_ADMIN_TOKEN", hide_env_values = true)]
    admin_token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API health
    Health,
    /// OTC listing operations
    Listing {
        #[command(subcommand)]
        action: ListingCommands,
    },
    /// Sell order operations
    Order {
        #[command(subcommand)]
        action: OrderCommands,
    },
    /// Get a prefilled ChangeNOW sell link
    Widget {
        #[arg(long)]
        amount: Decimal,
        #[arg(long, default_value = "usdt")]
        from: String,
        #[arg(long)]
        redirect_url: Option<String>,
    },
    /// Quote a ChangeNOW sale to EUR with its minimum amount
    Estimate {
        #[arg(long)]
        amount: Decimal,
        #[arg(long, default_value = "usdt")]
        from: String,
    },
    /// Open a ChangeNOW sell transaction paying to an IBAN (admin)
    Sell {
        #[arg(long)]
        amount: Decimal,
        #[arg(long, default_value = "usdt")]
        from: String,
        #[arg(long)]
        iban: String,
        #[arg(long)]
        refund_address: Option<String>,
    },
    /// Print the NOWPayments IPN signature of a payload file
    SignIpn {
        #[arg(long, env = "NOWPAYMENTS_IPN_SECRET", hide_env_values = true)]
        secret: String,
        /// JSON payload to sign
        #[arg(long)]
        file: PathBuf,
        /// sha512-sorted or sha256-raw
        #[arg(long, default_value = "sha512-sorted")]
        scheme: String,
    },
}

#[derive(Subcommand)]
enum ListingCommands {
    /// Set the price and available amount of a token
    Set {
        token: String,
        #[arg(long)]
        price_eur: Decimal,
        #[arg(long)]
        available: Decimal,
    },
    /// List all listings
    List,
}

#[derive(Subcommand)]
enum OrderCommands {
    /// Create a sell order
    Create {
        #[arg(long)]
        token: String,
        #[arg(long)]
        amount: Decimal,
        /// Pay out to this IBAN (needs --beneficiary)
        #[arg(long, requires = "beneficiary", conflicts_with_all = ["wallet", "card_token"])]
        iban: Option<String>,
        #[arg(long)]
        beneficiary: Option<String>,
        /// Pay out to this wallet address (needs --currency)
        #[arg(long, requires = "currency", conflicts_with = "card_token")]
        wallet: Option<String>,
        #[arg(long)]
        currency: Option<String>,
        /// Pay out to this Stripe card token
        #[arg(long)]
        card_token: Option<String>,
        /// nowpayments, wise or stripe
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        idempotency_key: Option<String>,
        #[arg(long)]
        redirect_url: Option<String>,
    },
    /// Get order details
    Get {
        /// Order ID (UUID)
        id: String,
    },
    /// List orders
    List {
        #[arg(long)]
        status: Option<String>,
    },
    /// Dispatch the payout of an order
    Payout {
        /// Order ID (UUID)
        id: String,
    },
}

fn parse_order_id(s: &str) -> Result<OrderId> {
    s.parse()
        .map_err(|_| anyhow::anyhow!("Invalid order ID: {}", s))
}

fn destination(
    iban: Option<String>,
    beneficiary: Option<String>,
    wallet: Option<String>,
    currency: Option<String>,
    card_token: Option<String>,
) -> Result<PayoutDestination> {
    match (iban, wallet, card_token) {
        (Some(iban), None, None) => Ok(PayoutDestination::Iban {
            iban,
            beneficiary_name: beneficiary.unwrap_or_default(),
        }),
        (None, Some(address), None) => Ok(PayoutDestination::Wallet {
            address,
            currency: currency.unwrap_or_default(),
        }),
        (None, None, Some(token)) => Ok(PayoutDestination::Card { token }),
        _ => anyhow::bail!("Give exactly one of --iban, --wallet or --card-token"),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let mut client = OfframpClient::new(&cli.api_url);
    if let Some(token) = cli.admin_token {
        client = client.with_admin_token(token);
    }

    match cli.command {
        Commands::Health => {
            let healthy = client.health().await?;
            if healthy {
                println!("✓ API is healthy");
            } else {
                println!("✗ API is not healthy");
                std::process::exit(1);
            }
        }

        Commands::Listing { action } => match action {
            ListingCommands::Set {
                token,
                price_eur,
                available,
            } => print_json(&client.set_price(&token, price_eur, available).await?)?,
            ListingCommands::List => print_json(&client.list_listings().await?)?,
        },

        Commands::Order { action } => match action {
            OrderCommands::Create {
                token,
                amount,
                iban,
                beneficiary,
                wallet,
                currency,
                card_token,
                provider,
                idempotency_key,
                redirect_url,
            } => {
                let provider = provider
                    .as_deref()
                    .map(str::parse::<Provider>)
                    .transpose()
                    .map_err(|e| anyhow::anyhow!("{}", e))?;
                let req = CreateOrderRequest {
                    token_symbol: token,
                    amount_tokens: amount,
                    destination: destination(iban, beneficiary, wallet, currency, card_token)?,
                    provider,
                    idempotency_key,
                    redirect_url,
                };
                print_json(&client.create_order(&req).await?)?;
            }
            OrderCommands::Get { id } => {
                print_json(&client.get_order(parse_order_id(&id)?).await?)?;
            }
            OrderCommands::List { status } => {
                let status = status
                    .as_deref()
                    .map(str::parse::<OrderStatus>)
                    .transpose()
                    .map_err(|e| anyhow::anyhow!("{}", e))?;
                print_json(&client.list_orders(status).await?)?;
            }
            OrderCommands::Payout { id } => {
                print_json(&client.trigger_payout(parse_order_id(&id)?).await?)?;
            }
        },

        Commands::Widget {
            amount,
            from,
            redirect_url,
        } => {
            let widget = client
                .widget_url(amount, &from, redirect_url.as_deref())
                .await?;
            println!("{}", widget.url);
        }

        Commands::Estimate { amount, from } => {
            let min = client.min_sell_amount(&from).await?;
            let estimate = client.sell_estimate(amount, &from).await?;
            println!(
                "{} {} -> {} EUR (minimum {} {})",
                estimate.amount,
                estimate.from_symbol,
                estimate.estimated_amount,
                min.min_amount,
                min.from_symbol
            );
            if let Some(warning) = estimate.warning {
                println!("warning: {}", warning);
            }
        }

        Commands::Sell {
            amount,
            from,
            iban,
            refund_address,
        } => {
            let req = CreateSellTransactionRequest {
                from_symbol: from,
                amount,
                payout_address: iban,
                refund_address,
            };
            print_json(&client.create_sell_transaction(&req).await?)?;
        }

        Commands::SignIpn {
            secret,
            file,
            scheme,
        } => {
            let scheme: IpnScheme = scheme.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            let body = std::fs::read(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            println!("{}", sign_ipn(scheme, &secret, &body)?);
        }
    }

    Ok(())
}
