//! VAT rate resolution

use charging_core::Result;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::clients::PartyApi;

/// Resolves the VAT percentage applied to an order from its billing account
#[derive(Clone)]
pub struct TaxResolver {
    party: Arc<dyn PartyApi>,
    default_rate: Decimal,
    rates: HashMap<String, Decimal>,
}

impl TaxResolver {
    pub fn new(party: Arc<dyn PartyApi>, default_rate: Decimal, rates: HashMap<String, Decimal>) -> Self {
        let rates = rates
            .into_iter()
            .map(|(country, rate)| (country.to_ascii_uppercase(), rate))
            .collect();
        Self {
            party,
            default_rate,
            rates,
        }
    }

    pub fn default_rate(&self) -> Decimal {
        self.default_rate
    }

    /// Rate for a country code, falling back to the default rate
    pub fn rate_for_country(&self, country: Option<&str>) -> Decimal {
        country
            .and_then(|c| self.rates.get(&c.to_ascii_uppercase()))
            .copied()
            .unwrap_or(self.default_rate)
    }

    /// VAT percentage for the given billing account
    pub async fn resolve(&self, billing_account_id: Option<&str>) -> Result<Decimal> {
        let Some(account_id) = billing_account_id else {
            return Ok(self.default_rate);
        };

        let account = self.party.get_billing_account(account_id).await?;
        let rate = self.rate_for_country(account.country());
        debug!(billing_account = %account_id, country = ?account.country(), %rate, "Resolved VAT rate");
        Ok(rate)
    }
}
