use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Plan a user is entitled to locally.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    sqlx::Type,
    AsRefStr,
    Display,
    EnumString,
)]
#[sqlx(type_name = "billing_plan", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Plan {
    #[default]
    Starter,
    Premium,
}

impl Plan {
    pub fn is_premium(&self) -> bool {
        matches!(self, Plan::Premium)
    }
}

/// Processor price references for each plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanPrices {
    pub starter_price_id: String,
    pub premium_price_id: String,
}

impl PlanPrices {
    pub fn new(starter_price_id: impl Into<String>, premium_price_id: impl Into<String>) -> Self {
        Self {
            starter_price_id: starter_price_id.into(),
            premium_price_id: premium_price_id.into(),
        }
    }

    pub fn price_for(&self, plan: Plan) -> &str {
        match plan {
            Plan::Starter => &self.starter_price_id,
            Plan::Premium => &self.premium_price_id,
        }
    }

    /// Any price that is not the premium price is treated as starter.
    pub fn plan_for_price(&self, price_id: &str) -> Plan {
        if price_id == self.premium_price_id {
            Plan::Premium
        } else {
            Plan::Starter
        }
    }

    pub fn is_premium_price(&self, price_id: &str) -> bool {
        price_id == self.premium_price_id
    }
}
