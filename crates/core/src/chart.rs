use crate::aggregate::GroupedTable;
use crate::domain::ResultTable;
use crate::error::PipelineError;
use crate::query::QueryShape;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Bar,
    Pie,
    Scatter,
    Line,
    Histogram,
    Box,
    PremiumByType,
}

impl ChartKind {
    pub const ALL: [ChartKind; 7] = [
        ChartKind::Bar,
        ChartKind::Pie,
        ChartKind::Scatter,
        ChartKind::Line,
        ChartKind::Histogram,
        ChartKind::Box,
        ChartKind::PremiumByType,
    ];

    /// Selector label shown by the dashboard.
    pub fn label(self) -> &'static str {
        match self {
            ChartKind::Bar => "Bar Chart",
            ChartKind::Pie => "Pie Chart",
            ChartKind::Scatter => "Scatter Plot",
            ChartKind::Line => "Line Chart",
            ChartKind::Histogram => "Histogram",
            ChartKind::Box => "Box Plot",
            ChartKind::PremiumByType => "Premium by Policy Type",
        }
    }

    /// Charts that plot the dense index instead of the real key.
    pub fn is_anonymized(self) -> bool {
        !matches!(self, ChartKind::PremiumByType)
    }

    /// The query template whose rows carry this chart's grouping key.
    pub fn source_shape(self) -> QueryShape {
        match self {
            ChartKind::PremiumByType => QueryShape::PremiumByPolicyType,
            _ => QueryShape::PoliciesByOpportunity,
        }
    }
}

impl FromStr for ChartKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let kind = match normalized.as_str() {
            "bar" | "bar_chart" => ChartKind::Bar,
            "pie" | "pie_chart" => ChartKind::Pie,
            "scatter" | "scatter_plot" => ChartKind::Scatter,
            "line" | "line_chart" => ChartKind::Line,
            "histogram" => ChartKind::Histogram,
            "box" | "box_plot" => ChartKind::Box,
            "premium_by_type" | "premium_by_policy_type" => ChartKind::PremiumByType,
            _ => return Err(PipelineError::InvalidChartKind(s.trim().to_string())),
        };
        Ok(kind)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    pub label: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartData {
    pub kind: ChartKind,
    pub title: &'static str,
    pub x_title: &'static str,
    pub y_title: &'static str,
    pub points: Vec<ChartPoint>,
}

/// Points for `kind`. Anonymized kinds never expose `GroupedRow::key`.
pub fn chart_data(kind: ChartKind, grouped: &GroupedTable) -> ChartData {
    let (title, x_title, y_title) = match kind {
        ChartKind::Bar => ("Insurance Policies Per Opportunity", "Policy Index", "Policy Count"),
        ChartKind::Pie => (
            "Insurance Policies Distribution by Opportunity",
            "Policy Index",
            "Policy Count",
        ),
        ChartKind::Scatter => ("Policies vs Opportunity", "Policy Index", "Policy Count"),
        ChartKind::Line => (
            "Insurance Policies Over Opportunities (Line Chart)",
            "Policy Index",
            "Policy Count",
        ),
        ChartKind::Histogram => ("Distribution of Policies by Count", "Policy Count", "Frequency"),
        ChartKind::Box => ("Policies by Opportunity (Box Plot)", "Policy Index", "Policy Count"),
        ChartKind::PremiumByType => (
            "Total Premium by Policy Type",
            "Policy Type",
            "Total Premium",
        ),
    };

    let points = grouped
        .rows
        .iter()
        .map(|row| {
            if kind.is_anonymized() {
                ChartPoint {
                    label: row.index.to_string(),
                    value: row.policy_count.unwrap_or(0) as f64,
                }
            } else {
                ChartPoint {
                    label: row.key.clone(),
                    value: decimal_to_f64(row.premium_total.unwrap_or(Decimal::ZERO)),
                }
            }
        })
        .collect();

    ChartData {
        kind,
        title,
        x_title,
        y_title,
        points,
    }
}

/// Figures for the dashboard's metric tiles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total_rows: usize,
    pub total_policies: i64,
    pub total_premium: Decimal,
}

impl Summary {
    pub fn of(table: &ResultTable) -> Self {
        Self {
            total_rows: table.len(),
            total_policies: table.total_policies(),
            total_premium: table.total_premium(),
        }
    }
}

fn decimal_to_f64(d: Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}
