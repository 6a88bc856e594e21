use chrono::{DateTime, FixedOffset};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One aggregated row returned by the policy query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRecord {
    /// 1-based arrival order; used in place of the identifier on charts.
    pub index: usize,
    pub opportunity_id: Option<String>,
    pub policy_type: Option<String>,
    pub policy_count: i64,
    pub premium_total: Decimal,
    pub first_created: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultTable {
    pub rows: Vec<PolicyRecord>,
}

impl ResultTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn total_policies(&self) -> i64 {
        self.rows
            .iter()
            .map(|r| r.policy_count)
            .fold(0, i64::saturating_add)
    }

    pub fn total_premium(&self) -> Decimal {
        self.rows
            .iter()
            .map(|r| r.premium_total)
            .fold(Decimal::ZERO, Decimal::saturating_add)
    }
}
