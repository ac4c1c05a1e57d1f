//! Configuration loading from environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use offramp_hex::inbound::ServerOptions;
use offramp_hex::poller::DEFAULT_POLL_INTERVAL;
use offramp_providers::{
    ChangeNowApiConfig, ChangeNowConfig, NowPaymentsConfig, RetryPolicy, StripeConfig, WiseConfig,
    nowpayments::parse_bank_extra,
};
use offramp_repo::security::IpnScheme;

/// Application configuration.
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub server: ServerOptions,
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
    /// Present when NOWPAYMENTS_API_KEY or NOWPAYMENTS_JWT is set
    pub nowpayments: Option<NowPaymentsConfig>,
    pub nowpayments_ipn_secret: Option<String>,
    pub ipn_scheme: IpnScheme,
    pub wise: Option<WiseConfig>,
    pub stripe: Option<StripeConfig>,
    pub stripe_webhook_secret: Option<String>,
    pub changenow: ChangeNowConfig,
    /// Present when CHANGENOW_API_KEY is set
    pub changenow_api: Option<ChangeNowApiConfig>,
    /// Export traces and metrics over OTLP
    pub otlp_enabled: bool,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads configuration from `lookup`; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let port = parse_or(&var, "PORT", 3000u16)?;
        let database_url = var("DATABASE_URL")
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;

        let server = ServerOptions {
            admin_token: var("OFFRAMP_ADMIN_TOKEN"),
            requests_per_minute: parse_or(
                &var,
                "RATE_LIMIT_PER_MINUTE",
                ServerOptions::default().requests_per_minute,
            )?,
            cors_origins: var("CORS_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|o| !o.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        };

        let poll_interval = Duration::from_secs(parse_or(
            &var,
            "POLL_INTERVAL_SECS",
            DEFAULT_POLL_INTERVAL.as_secs(),
        )?);
        let retry = RetryPolicy::new(
            parse_or(&var, "PROVIDER_MAX_ATTEMPTS", 3u32)?,
            Duration::from_millis(parse_or(&var, "PROVIDER_BASE_DELAY_MS", 250u64)?),
        );

        let nowpayments = match (var("NOWPAYMENTS_API_KEY"), var("NOWPAYMENTS_JWT")) {
            (None, None) => None,
            (api_key, jwt) => {
                let defaults = NowPaymentsConfig::default();
                Some(NowPaymentsConfig {
                    base_url: var("NOWPAYMENTS_BASE_URL").unwrap_or(defaults.base_url),
                    api_key,
                    jwt,
                    ipn_callback_url: var("NOWPAYMENTS_IPN_CALLBACK_URL"),
                    bank_extra: parse_bank_extra(
                        &var("NOWPAYMENTS_BANK_EXTRA_JSON").unwrap_or_default(),
                    )?,
                    timeout: Duration::from_secs(parse_or(
                        &var,
                        "NOWPAYMENTS_TIMEOUT_SECS",
                        defaults.timeout.as_secs(),
                    )?),
                })
            }
        };
        let ipn_scheme = match var("NOWPAYMENTS_IPN_SIGNATURE") {
            Some(raw) => raw.parse().map_err(|e: String| anyhow::anyhow!(e))?,
            None => IpnScheme::default(),
        };

        let wise = match (var("WISE_API_TOKEN"), var("WISE_PROFILE_ID")) {
            (Some(token), Some(profile)) => {
                let mut config = WiseConfig::new(token, profile);
                if let Some(base_url) = var("WISE_BASE_URL") {
                    config.base_url = base_url;
                }
                Some(config)
            }
            (None, None) => None,
            _ => anyhow::bail!("WISE_API_TOKEN and WISE_PROFILE_ID must be set together"),
        };

        let stripe = match (var("STRIPE_API_KEY"), var("STRIPE_CONNECT_ACCOUNT")) {
            (Some(api_key), Some(account)) => {
                let mut config = StripeConfig::new(api_key, account);
                if let Some(base_url) = var("STRIPE_BASE_URL") {
                    config.base_url = base_url;
                }
                if let Some(method) = var("STRIPE_PAYOUT_METHOD") {
                    config.method = method.parse()?;
                }
                Some(config)
            }
            (None, None) => None,
            _ => anyhow::bail!("STRIPE_API_KEY and STRIPE_CONNECT_ACCOUNT must be set together"),
        };

        let mut changenow = ChangeNowConfig::default();
        if let Some(url) = var("CHANGENOW_PUBLIC_SELL_URL") {
            changenow.public_sell_url = url;
        }
        changenow.ref_id = var("CHANGENOW_REF_ID");

        let changenow_api = var("CHANGENOW_API_KEY").map(|api_key| {
            let mut config = ChangeNowApiConfig::new(api_key);
            if let Some(base_url) = var("CHANGENOW_BASE_URL") {
                config.base_url = base_url;
            }
            config.ref_id = changenow.ref_id.clone();
            config
        });

        Ok(Self {
            port,
            database_url,
            server,
            poll_interval,
            retry,
            nowpayments,
            nowpayments_ipn_secret: var("NOWPAYMENTS_IPN_SECRET"),
            ipn_scheme,
            wise,
            stripe,
            stripe_webhook_secret: var("STRIPE_WEBHOOK_SECRET"),
            changenow,
            changenow_api,
            otlp_enabled: var("OTEL_EXPORTER_OTLP_ENDPOINT").is_some(),
        })
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw.parse().with_context(|| format!("invalid {key}: {raw:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_with_only_database_url() {
        let config = load(&[("DATABASE_URL", "memory://")]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.server.requests_per_minute, 100);
        assert!(config.server.admin_token.is_none());
        assert!(config.server.cors_origins.is_empty());
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.retry, RetryPolicy::default());
        assert!(config.nowpayments.is_none());
        assert!(config.wise.is_none());
        assert!(config.stripe.is_none());
        assert!(config.changenow_api.is_none());
        assert_eq!(config.ipn_scheme, IpnScheme::Sha512Sorted);
        assert!(!config.otlp_enabled);
    }

    #[test]
    fn database_url_is_required() {
        assert!(load(&[("PORT", "8080")]).is_err());
        assert!(load(&[("DATABASE_URL", "  ")]).is_err());
    }

    #[test]
    fn reads_providers_and_server_options() {
        let config = load(&[
            ("DATABASE_URL", "sqlite://offramp.db"),
            ("OFFRAMP_ADMIN_TOKEN", "adm"),
            ("CORS_ORIGINS", "https://a.example, https://b.example,"),
            ("NOWPAYMENTS_JWT", "jwt"),
            ("NOWPAYMENTS_BANK_EXTRA_JSON", r#"{"bank_country":"DE"}"#),
            ("NOWPAYMENTS_IPN_SIGNATURE", "sha256-raw"),
            ("WISE_API_TOKEN", "tok"),
            ("WISE_PROFILE_ID", "42"),
            ("STRIPE_API_KEY", "sk_test"),
            ("STRIPE_CONNECT_ACCOUNT", "acct_1"),
            ("STRIPE_PAYOUT_METHOD", "standard"),
            ("POLL_INTERVAL_SECS", "0"),
            ("CHANGENOW_API_KEY", "cn-key"),
            ("CHANGENOW_BASE_URL", "https://cn.example/v1"),
            ("CHANGENOW_REF_ID", "partner42"),
        ])
        .unwrap();

        assert_eq!(config.server.admin_token.as_deref(), Some("adm"));
        assert_eq!(config.server.cors_origins.len(), 2);
        let nowpayments = config.nowpayments.unwrap();
        assert_eq!(nowpayments.jwt.as_deref(), Some("jwt"));
        assert_eq!(nowpayments.bank_extra["bank_country"], "DE");
        assert_eq!(config.ipn_scheme, IpnScheme::Sha256Raw);
        assert_eq!(config.wise.unwrap().profile_id, "42");
        assert_eq!(
            config.stripe.unwrap().method,
            offramp_providers::PayoutMethod::Standard
        );
        assert!(config.poll_interval.is_zero());
        let changenow_api = config.changenow_api.unwrap();
        assert_eq!(changenow_api.base_url, "https://cn.example/v1");
        assert_eq!(changenow_api.ref_id.as_deref(), Some("partner42"));
    }

    #[test]
    fn rejects_half_configured_providers_and_bad_numbers() {
        assert!(load(&[("DATABASE_URL", "memory://"), ("WISE_API_TOKEN", "tok")]).is_err());
        assert!(load(&[("DATABASE_URL", "memory://"), ("STRIPE_API_KEY", "sk")]).is_err());
        assert!(load(&[("DATABASE_URL", "memory://"), ("PORT", "http")]).is_err());
        assert!(
            load(&[
                ("DATABASE_URL", "memory://"),
                ("NOWPAYMENTS_API_KEY", "k"),
                ("NOWPAYMENTS_BANK_EXTRA_JSON", "[1]")
            ])
            .is_err()
        );
    }
}
