//! Payout destinations and the providers able to reach them.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::DomainError;

/// Third-party payout provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Nowpayments,
    Wise,
    Stripe,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Nowpayments => "nowpayments",
            Provider::Wise => "wise",
            Provider::Stripe => "stripe",
        }
    }

    /// Whether this provider can deliver funds to `destination`.
    pub fn supports(&self, destination: &PayoutDestination) -> bool {
        matches!(
            (self, destination),
            (Provider::Nowpayments, PayoutDestination::Iban { .. })
                | (Provider::Nowpayments, PayoutDestination::Wallet { .. })
                | (Provider::Wise, PayoutDestination::Iban { .. })
                | (Provider::Stripe, PayoutDestination::Card { .. })
        )
    }

    /// Provider used when an order does not name one.
    pub fn default_for(destination: &PayoutDestination) -> Self {
        match destination {
            PayoutDestination::Iban { .. } | PayoutDestination::Wallet { .. } => {
                Provider::Nowpayments
            }
            PayoutDestination::Card { .. } => Provider::Stripe,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nowpayments" => Ok(Provider::Nowpayments),
            "wise" => Ok(Provider::Wise),
            "stripe" => Ok(Provider::Stripe),
            other => Err(DomainError::ValidationError(format!(
                "Unknown provider: {}",
                other
            ))),
        }
    }
}

/// Where the fiat (or crypto) proceeds of an order are sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PayoutDestination {
    /// SEPA bank account
    Iban {
        #[schema(example = "DE89370400440532013000")]
        iban: String,
        #[schema(example = "Jane Doe")]
        beneficiary_name: String,
    },
    /// Crypto wallet address
    Wallet {
        address: String,
        #[schema(example = "usdttrc20")]
        currency: String,
    },
    /// Tokenised debit card (Stripe)
    Card {
        #[schema(example = "tok_visa_debit")]
        token: String,
    },
}

impl PayoutDestination {
    pub fn kind(&self) -> &'static str {
        match self {
            PayoutDestination::Iban { .. } => "iban",
            PayoutDestination::Wallet { .. } => "wallet",
            PayoutDestination::Card { .. } => "card",
        }
    }

    /// Validates the destination and returns it in canonical form.
    pub fn normalized(self) -> Result<Self, DomainError> {
        match self {
            PayoutDestination::Iban {
                iban,
                beneficiary_name,
            } => {
                let beneficiary_name = beneficiary_name.trim().to_string();
                if beneficiary_name.is_empty() {
                    return Err(DomainError::InvalidDestination(
                        "beneficiary_name cannot be empty".into(),
                    ));
                }
                Ok(PayoutDestination::Iban {
                    iban: normalize_iban(&iban)?,
                    beneficiary_name,
                })
            }
            PayoutDestination::Wallet { address, currency } => {
                let address = address.trim().to_string();
                if address.is_empty() || address.chars().any(char::is_whitespace) {
                    return Err(DomainError::InvalidDestination(
                        "wallet address must be non-empty and contain no whitespace".into(),
                    ));
                }
                let currency = currency.trim().to_ascii_lowercase();
                if currency.is_empty() {
                    return Err(DomainError::InvalidDestination(
                        "wallet currency cannot be empty".into(),
                    ));
                }
                Ok(PayoutDestination::Wallet { address, currency })
            }
            PayoutDestination::Card { token } => {
                let token = token.trim().to_string();
                if !(token.starts_with("tok_") || token.starts_with("card_")) {
                    return Err(DomainError::InvalidDestination(
                        "card token must start with tok_ or card_".into(),
                    ));
                }
                Ok(PayoutDestination::Card { token })
            }
        }
    }
}

/// Strips spaces, upper-cases, and checks the ISO 13616 mod-97 checksum.
pub fn normalize_iban(raw: &str) -> Result<String, DomainError> {
    let iban: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if !(15..=34).contains(&iban.len()) {
        return Err(DomainError::InvalidIban(format!(
            "length {} outside 15..=34",
            iban.len()
        )));
    }
    if !iban.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(DomainError::InvalidIban("non-alphanumeric character".into()));
    }
    let (head, tail) = iban.split_at(4);
    if !head[..2].chars().all(|c| c.is_ascii_alphabetic())
        || !head[2..].chars().all(|c| c.is_ascii_digit())
    {
        return Err(DomainError::InvalidIban(
            "must start with a country code and two check digits".into(),
        ));
    }

    // Rearranged: BBAN followed by country code and check digits, letters as 10..35.
    let mut remainder: u32 = 0;
    for c in tail.chars().chain(head.chars()) {
        let value = c.to_digit(36).unwrap_or(0);
        remainder = if value >= 10 {
            (remainder * 100 + value) % 97
        } else {
            (remainder * 10 + value) % 97
        };
    }
    if remainder != 1 {
        return Err(DomainError::InvalidIban("checksum mismatch".into()));
    }
    Ok(iban)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_ibans_are_normalized() {
        assert_eq!(
            normalize_iban("de89 3704 0044 0532 0130 00").unwrap(),
            "DE89370400440532013000"
        );
        assert_eq!(
            normalize_iban("IT60X0542811101000000123456").unwrap(),
            "IT60X0542811101000000123456"
        );
        assert!(normalize_iban("GB82WEST12345698765432").is_ok());
    }

    #[test]
    fn bad_checksum_is_rejected() {
        let err = normalize_iban("DE89370400440532013001").unwrap_err();
        assert!(matches!(err, DomainError::InvalidIban(_)));
    }

    #[test]
    fn malformed_ibans_are_rejected() {
        assert!(normalize_iban("DE89").is_err());
        assert!(normalize_iban("1289370400440532013000").is_err());
        assert!(normalize_iban("DE89-3704-0044-0532-0130-00").is_err());
    }

    #[test]
    fn provider_compatibility() {
        let iban = PayoutDestination::Iban {
            iban: "DE89370400440532013000".into(),
            beneficiary_name: "Jane".into(),
        };
        let card = PayoutDestination::Card {
            token: "tok_123".into(),
        };

        assert!(Provider::Nowpayments.supports(&iban));
        assert!(Provider::Wise.supports(&iban));
        assert!(!Provider::Stripe.supports(&iban));
        assert!(Provider::Stripe.supports(&card));
        assert!(!Provider::Wise.supports(&card));
        assert_eq!(Provider::default_for(&card), Provider::Stripe);
    }

    #[test]
    fn destination_json_is_tagged() {
        let json = r#"{"type":"iban","iban":"de89 3704 0044 0532 0130 00","beneficiary_name":" Jane Doe "}"#;
        let dest: PayoutDestination = serde_json::from_str(json).unwrap();
        let dest = dest.normalized().unwrap();
        assert_eq!(
            dest,
            PayoutDestination::Iban {
                iban: "DE89370400440532013000".into(),
                beneficiary_name: "Jane Doe".into(),
            }
        );
    }

    #[test]
    fn card_token_prefix_is_checked() {
        let bad = PayoutDestination::Card {
            token: "4242424242424242".into(),
        };
        assert!(bad.normalized().is_err());
    }
}
