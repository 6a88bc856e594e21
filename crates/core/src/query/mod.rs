pub mod soql;

use crate::domain::fields;
use crate::time::DateRange;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use soql::{CmpOp, Predicate, SoqlValue};
use std::fmt;

/// Row cap appended to every aggregate query.
pub const PAGE_SIZE_CAP: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryShape {
    /// Policy count per source opportunity.
    #[default]
    PoliciesByOpportunity,
    /// Policy count, premium sum and earliest creation date per policy type.
    PremiumByPolicyType,
}

impl QueryShape {
    pub fn label(self) -> &'static str {
        match self {
            QueryShape::PoliciesByOpportunity => "policies-by-opportunity",
            QueryShape::PremiumByPolicyType => "premium-by-policy-type",
        }
    }
}

impl std::str::FromStr for QueryShape {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "policies_by_opportunity" | "by_opportunity" | "opportunity" => {
                Ok(QueryShape::PoliciesByOpportunity)
            }
            "premium_by_policy_type" | "by_policy_type" | "policy_type" => {
                Ok(QueryShape::PremiumByPolicyType)
            }
            other => Err(format!("unknown query shape: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFilter {
    pub opportunity_id: Option<String>,
    pub created_from: Option<DateTime<FixedOffset>>,
    pub created_to: Option<DateTime<FixedOffset>>,
}

impl QueryFilter {
    pub fn for_range(range: &DateRange) -> Self {
        Self {
            opportunity_id: None,
            created_from: Some(range.start.fixed_offset()),
            created_to: Some(range.end.fixed_offset()),
        }
    }

    /// Blank input means "no identifier filter".
    pub fn with_opportunity_id(mut self, id: Option<&str>) -> Self {
        self.opportunity_id = id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.opportunity_id.is_none() && self.created_from.is_none() && self.created_to.is_none()
    }

    fn predicates(&self) -> Vec<Predicate> {
        let mut out = Vec::new();
        if let Some(id) = &self.opportunity_id {
            out.push(Predicate::new(
                fields::SOURCE_OPPORTUNITY_ID,
                CmpOp::Eq,
                SoqlValue::Text(id.clone()),
            ));
        }
        if let Some(from) = self.created_from {
            out.push(Predicate::new(
                fields::CREATED_DATE,
                CmpOp::Gte,
                SoqlValue::DateTime(from),
            ));
        }
        if let Some(to) = self.created_to {
            out.push(Predicate::new(
                fields::CREATED_DATE,
                CmpOp::Lte,
                SoqlValue::DateTime(to),
            ));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoqlQuery {
    select: Vec<String>,
    predicates: Vec<Predicate>,
    group_by: &'static str,
    limit: usize,
}

impl SoqlQuery {
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn to_soql(&self) -> String {
        let mut out = format!("SELECT {} FROM {}", self.select.join(", "), fields::OBJECT);
        for (i, predicate) in self.predicates.iter().enumerate() {
            out.push_str(if i == 0 { " WHERE " } else { " AND " });
            out.push_str(&predicate.to_string());
        }
        out.push_str(&format!(" GROUP BY {} LIMIT {}", self.group_by, self.limit));
        out
    }
}

impl fmt::Display for SoqlQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_soql())
    }
}

pub struct QueryBuilder;

impl QueryBuilder {
    pub fn build(shape: QueryShape, filter: Option<&QueryFilter>) -> SoqlQuery {
        let filter_predicates = filter.map(QueryFilter::predicates).unwrap_or_default();

        match shape {
            QueryShape::PoliciesByOpportunity => {
                let mut predicates = vec![not_null(fields::SOURCE_OPPORTUNITY_ID)];
                predicates.extend(filter_predicates);
                SoqlQuery {
                    select: vec![
                        fields::SOURCE_OPPORTUNITY_ID.to_string(),
                        count_alias(),
                    ],
                    predicates,
                    group_by: fields::SOURCE_OPPORTUNITY_ID,
                    limit: PAGE_SIZE_CAP,
                }
            }
            QueryShape::PremiumByPolicyType => {
                let mut predicates = vec![not_null(fields::POLICY_TYPE)];
                predicates.extend(filter_predicates);
                predicates.push(Predicate::new(
                    fields::STATUS,
                    CmpOp::Eq,
                    SoqlValue::Text("Active".to_string()),
                ));
                predicates.push(Predicate::new(
                    fields::BUSINESS_TYPE,
                    CmpOp::Eq,
                    SoqlValue::Text("New Business".to_string()),
                ));
                SoqlQuery {
                    select: vec![
                        fields::POLICY_TYPE.to_string(),
                        count_alias(),
                        format!("SUM({}) {}", fields::PREMIUM_AMOUNT, fields::PREMIUM_TOTAL),
                        format!("MIN({}) {}", fields::CREATED_DATE, fields::FIRST_CREATED_DATE),
                    ],
                    predicates,
                    group_by: fields::POLICY_TYPE,
                    limit: PAGE_SIZE_CAP,
                }
            }
        }
    }
}

fn not_null(field: &'static str) -> Predicate {
    Predicate::new(field, CmpOp::Ne, SoqlValue::Null)
}

fn count_alias() -> String {
    format!("COUNT({}) {}", fields::ID, fields::POLICY_COUNT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{DateRangeCalculator, Period};
    use chrono::{TimeZone, Utc};

    fn week_range() -> DateRange {
        let now = Utc.with_ymd_and_hms(2026, 10, 21, 16, 0, 0).unwrap();
        DateRangeCalculator::default().compute(Period::Week, now).unwrap()
    }

    #[test]
    fn unfiltered_count_query() {
        let q = QueryBuilder::build(QueryShape::PoliciesByOpportunity, None);
        assert_eq!(
            q.to_soql(),
            "SELECT SourceOpportunityId, COUNT(Id) policyCount FROM InsurancePolicy \
             WHERE SourceOpportunityId != NULL GROUP BY SourceOpportunityId LIMIT 2000"
        );
    }

    #[test]
    fn empty_filter_matches_no_filter() {
        for shape in [QueryShape::PoliciesByOpportunity, QueryShape::PremiumByPolicyType] {
            let empty = QueryFilter::default();
            assert!(empty.is_empty());
            assert_eq!(
                QueryBuilder::build(shape, Some(&empty)).to_soql(),
                QueryBuilder::build(shape, None).to_soql()
            );
        }
    }

    #[test]
    fn filter_clauses_keep_fixed_order() {
        let filter = QueryFilter::for_range(&week_range()).with_opportunity_id(Some(" 006XYZ "));
        let q = QueryBuilder::build(QueryShape::PremiumByPolicyType, Some(&filter));
        assert_eq!(
            q.to_soql(),
            "SELECT PolicyType, COUNT(Id) policyCount, SUM(PremiumAmount) premiumTotal, \
             MIN(CreatedDate) firstCreatedDate FROM InsurancePolicy \
             WHERE PolicyType != NULL \
             AND SourceOpportunityId = '006XYZ' \
             AND CreatedDate >= 2026-10-19T00:00:00-04:00 \
             AND CreatedDate <= 2026-10-25T23:59:59-04:00 \
             AND Status = 'Active' \
             AND BusinessType__c = 'New Business' \
             GROUP BY PolicyType LIMIT 2000"
        );
    }

    #[test]
    fn blank_identifier_is_ignored() {
        let filter = QueryFilter::default().with_opportunity_id(Some("   "));
        assert!(filter.is_empty());
    }

    #[test]
    fn identifier_cannot_break_out_of_literal() {
        let filter = QueryFilter::default()
            .with_opportunity_id(Some("x' OR SourceOpportunityId != '"));
        let q = QueryBuilder::build(QueryShape::PoliciesByOpportunity, Some(&filter));
        assert_eq!(q.predicates().len(), 2);
        assert!(q
            .to_soql()
            .contains(r"SourceOpportunityId = 'x\' OR SourceOpportunityId != \''"));
    }

    #[test]
    fn parses_shape_names() {
        assert_eq!(
            "premium-by-policy-type".parse::<QueryShape>().unwrap(),
            QueryShape::PremiumByPolicyType
        );
        assert_eq!(
            "opportunity".parse::<QueryShape>().unwrap(),
            QueryShape::PoliciesByOpportunity
        );
        assert!("region".parse::<QueryShape>().is_err());
    }
}
