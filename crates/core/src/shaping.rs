use crate::domain::fields;
use crate::domain::{PolicyRecord, ResultTable};
use crate::error::PipelineError;
use crate::salesforce::RawRecord;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// Turns raw query records into a typed table.
///
/// Pure: the same input always yields the same table. Any malformed count or
/// date fails the whole batch so callers never hold a partial result.
pub fn shape(records: &[RawRecord]) -> Result<ResultTable, PipelineError> {
    let mut rows = Vec::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
        rows.push(shape_row(i + 1, record)?);
    }
    Ok(ResultTable { rows })
}

fn shape_row(index: usize, record: &RawRecord) -> Result<PolicyRecord, PipelineError> {
    // `attributes` is REST metadata; only the named fields below are read.
    Ok(PolicyRecord {
        index,
        opportunity_id: dimension(record.get(fields::SOURCE_OPPORTUNITY_ID)),
        policy_type: dimension(record.get(fields::POLICY_TYPE)),
        policy_count: count(index, record.get(fields::POLICY_COUNT))?,
        premium_total: premium(record.get(fields::PREMIUM_TOTAL)),
        first_created: date(
            index,
            fields::FIRST_CREATED_DATE,
            record.get(fields::FIRST_CREATED_DATE),
        )?,
    })
}

fn dimension(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn count(row: usize, value: Option<&Value>) -> Result<i64, PipelineError> {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().and_then(whole_i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };

    parsed.ok_or_else(|| PipelineError::TypeCoercion {
        row,
        field: fields::POLICY_COUNT.to_string(),
        value: value.map_or_else(|| "<missing>".to_string(), Value::to_string),
    })
}

/// `f` as an i64 when it is whole and inside the i64 range.
fn whole_i64(f: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive.
    let in_range = f >= i64::MIN as f64 && f < i64::MAX as f64;
    (f.fract() == 0.0 && in_range).then_some(f as i64)
}

fn premium(value: Option<&Value>) -> Decimal {
    let parsed = match value {
        Some(Value::Number(n)) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        Some(Value::String(s)) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    };
    parsed.unwrap_or(Decimal::ZERO)
}

fn date(
    row: usize,
    field: &str,
    value: Option<&Value>,
) -> Result<Option<DateTime<FixedOffset>>, PipelineError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => parse_datetime(s).map(Some).ok_or_else(|| {
            PipelineError::DateParse {
                row,
                field: field.to_string(),
                value: s.clone(),
            }
        }),
        Some(other) => Err(PipelineError::DateParse {
            row,
            field: field.to_string(),
            value: other.to_string(),
        }),
    }
}

/// Accepts the Salesforce wire form (`2026-10-19T14:03:22.000+0000`),
/// RFC 3339, and date-only values (taken as midnight UTC).
pub fn parse_datetime(s: &str) -> Option<DateTime<FixedOffset>> {
    let t = s.trim();
    if let Ok(dt) = DateTime::parse_from_str(t, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(dt);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive).fixed_offset());
    }
    let date = NaiveDate::parse_from_str(t, "%Y-%m-%d").ok()?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?).fixed_offset())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(values: Vec<Value>) -> Vec<RawRecord> {
        values
            .into_iter()
            .map(|v| match v {
                Value::Object(map) => map,
                other => panic!("not an object: {other}"),
            })
            .collect()
    }

    #[test]
    fn coerces_counts_and_assigns_dense_index() {
        let raw = records(vec![
            json!({"attributes": {"type": "AggregateResult"}, "SourceOpportunityId": "A", "policyCount": "3"}),
            json!({"SourceOpportunityId": "B", "policyCount": 5}),
            json!({"SourceOpportunityId": "A", "policyCount": 2.0}),
        ]);
        let table = shape(&raw).unwrap();

        let counts: Vec<_> = table.rows.iter().map(|r| r.policy_count).collect();
        assert_eq!(counts, [3, 5, 2]);
        let idx: Vec<_> = table.rows.iter().map(|r| r.index).collect();
        assert_eq!(idx, [1, 2, 3]);
        assert_eq!(table.rows[0].opportunity_id.as_deref(), Some("A"));
        assert_eq!(table.total_policies(), 10);
    }

    #[test]
    fn non_numeric_count_fails() {
        let raw = records(vec![
            json!({"SourceOpportunityId": "A", "policyCount": 1}),
            json!({"SourceOpportunityId": "B", "policyCount": "abc"}),
        ]);
        match shape(&raw).unwrap_err() {
            PipelineError::TypeCoercion { row, field, value } => {
                assert_eq!(row, 2);
                assert_eq!(field, "policyCount");
                assert_eq!(value, "\"abc\"");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn fractional_or_out_of_range_count_fails() {
        for bad in [json!(1.5), json!(1e300), json!(-1e300), json!(9.3e18)] {
            let raw = records(vec![json!({"SourceOpportunityId": "A", "policyCount": bad})]);
            assert!(
                matches!(shape(&raw), Err(PipelineError::TypeCoercion { row: 1, .. })),
                "{bad}"
            );
        }
        let raw = records(vec![json!({"SourceOpportunityId": "A", "policyCount": -4.0})]);
        assert_eq!(shape(&raw).unwrap().rows[0].policy_count, -4);
    }

    #[test]
    fn missing_count_fails() {
        let raw = records(vec![json!({"SourceOpportunityId": "A"})]);
        assert!(matches!(
            shape(&raw),
            Err(PipelineError::TypeCoercion { row: 1, .. })
        ));
    }

    #[test]
    fn premium_falls_back_to_zero() {
        let raw = records(vec![
            json!({"PolicyType": "Auto", "policyCount": 1, "premiumTotal": 1250.5}),
            json!({"PolicyType": "Home", "policyCount": 1, "premiumTotal": "n/a"}),
            json!({"PolicyType": "Life", "policyCount": 1, "premiumTotal": null}),
            json!({"PolicyType": "Boat", "policyCount": 1, "premiumTotal": "99.99"}),
        ]);
        let table = shape(&raw).unwrap();
        let premiums: Vec<_> = table.rows.iter().map(|r| r.premium_total).collect();
        assert_eq!(
            premiums,
            [
                Decimal::new(12505, 1),
                Decimal::ZERO,
                Decimal::ZERO,
                Decimal::new(9999, 2)
            ]
        );
    }

    #[test]
    fn parses_salesforce_dates() {
        let raw = records(vec![
            json!({"PolicyType": "Auto", "policyCount": 1, "firstCreatedDate": "2026-10-19T14:03:22.000+0000"}),
            json!({"PolicyType": "Home", "policyCount": 1, "firstCreatedDate": "2026-10-20"}),
            json!({"PolicyType": "Life", "policyCount": 1, "firstCreatedDate": null}),
        ]);
        let table = shape(&raw).unwrap();
        assert_eq!(
            table.rows[0].first_created.unwrap().to_rfc3339(),
            "2026-10-19T14:03:22+00:00"
        );
        assert_eq!(
            table.rows[1].first_created.unwrap().to_rfc3339(),
            "2026-10-20T00:00:00+00:00"
        );
        assert!(table.rows[2].first_created.is_none());
    }

    #[test]
    fn unparseable_date_fails() {
        let raw = records(vec![
            json!({"PolicyType": "Auto", "policyCount": 1, "firstCreatedDate": "last tuesday"}),
        ]);
        assert!(matches!(
            shape(&raw),
            Err(PipelineError::DateParse { row: 1, .. })
        ));
    }

    #[test]
    fn shaping_is_repeatable() {
        let raw = records(vec![
            json!({"SourceOpportunityId": "A", "policyCount": "3"}),
            json!({"SourceOpportunityId": null, "policyCount": 4}),
        ]);
        assert_eq!(shape(&raw).unwrap(), shape(&raw).unwrap());
    }
}
