use crate::domain::{PolicyRecord, ResultTable};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKey {
    OpportunityId,
    PolicyType,
}

impl GroupKey {
    fn of(self, row: &PolicyRecord) -> Option<&str> {
        match self {
            GroupKey::OpportunityId => row.opportunity_id.as_deref(),
            GroupKey::PolicyType => row.policy_type.as_deref(),
        }
    }
}

impl std::str::FromStr for GroupKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "opportunity" | "opportunity_id" | "source_opportunity_id" => {
                Ok(GroupKey::OpportunityId)
            }
            "policy_type" | "type" => Ok(GroupKey::PolicyType),
            other => Err(format!("unknown group key: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Measure {
    PolicyCount,
    PremiumTotal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupedRow {
    /// 1-based position after sorting by key.
    pub index: usize,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub premium_total: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupedTable {
    pub group_key: GroupKey,
    pub rows: Vec<GroupedRow>,
}

impl GroupedTable {
    pub fn total_policies(&self) -> i64 {
        self.rows
            .iter()
            .filter_map(|r| r.policy_count)
            .fold(0, i64::saturating_add)
    }

    pub fn total_premium(&self) -> Decimal {
        self.rows
            .iter()
            .filter_map(|r| r.premium_total)
            .fold(Decimal::ZERO, Decimal::saturating_add)
    }
}

/// Sums the requested measures per distinct key, ascending by key.
/// Rows without a key are skipped, never bucketed.
pub fn aggregate(table: &ResultTable, group_key: GroupKey, measures: &[Measure]) -> GroupedTable {
    let want_count = measures.contains(&Measure::PolicyCount);
    let want_premium = measures.contains(&Measure::PremiumTotal);

    let mut groups: BTreeMap<&str, (i64, Decimal)> = BTreeMap::new();
    for row in &table.rows {
        let Some(key) = group_key.of(row) else {
            continue;
        };
        let entry = groups.entry(key).or_insert((0, Decimal::ZERO));
        entry.0 = entry.0.saturating_add(row.policy_count);
        entry.1 = entry.1.saturating_add(row.premium_total);
    }

    let rows = groups
        .into_iter()
        .enumerate()
        .map(|(i, (key, (count, premium)))| GroupedRow {
            index: i + 1,
            key: key.to_string(),
            policy_count: want_count.then_some(count),
            premium_total: want_premium.then_some(premium),
        })
        .collect();

    GroupedTable { group_key, rows }
}
