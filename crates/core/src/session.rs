use crate::aggregate::{aggregate, GroupKey, GroupedTable, Measure};
use crate::chart::{chart_data, ChartData, ChartKind};
use crate::domain::ResultTable;
use crate::error::PipelineError;
use crate::query::{QueryBuilder, QueryFilter, QueryShape};
use crate::salesforce::{QueryExecutor, QueryTransport};
use crate::shaping::shape;
use crate::time::{DateRangeCalculator, Period};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the user picked in the sidebar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub period: Period,
    #[serde(default)]
    pub shape: QueryShape,
    #[serde(default)]
    pub opportunity_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuerySnapshot {
    pub shape: QueryShape,
    pub filter: QueryFilter,
    pub soql: String,
    pub pages_fetched: usize,
    pub fetched_at: DateTime<Utc>,
    pub table: ResultTable,
}

/// State for one dashboard session: an authenticated executor plus the last
/// successful result. Construct one per user session and drop it afterwards.
///
/// An `Auth` failure is terminal: the context refuses further queries and the
/// caller has to log in again with a fresh context.
#[derive(Debug)]
pub struct SessionContext<T> {
    executor: QueryExecutor<T>,
    calculator: DateRangeCalculator,
    last: Option<QuerySnapshot>,
    force_requery: bool,
    authenticated: bool,
}

impl<T: QueryTransport> SessionContext<T> {
    pub fn new(executor: QueryExecutor<T>, calculator: DateRangeCalculator) -> Self {
        Self {
            executor,
            calculator,
            last: None,
            force_requery: false,
            authenticated: true,
        }
    }

    /// False once the service has rejected the session.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn last(&self) -> Option<&QuerySnapshot> {
        self.last.as_ref()
    }

    /// Makes the next `run` hit the service even if the filter is unchanged.
    pub fn request_requery(&mut self) {
        self.force_requery = true;
    }

    pub async fn run(
        &mut self,
        request: &QueryRequest,
        now: DateTime<Utc>,
    ) -> Result<&QuerySnapshot, PipelineError> {
        if !self.authenticated {
            return Err(PipelineError::Auth(
                "session is no longer authenticated; log in again".to_string(),
            ));
        }

        let range = self.calculator.compute(request.period, now)?;
        let filter =
            QueryFilter::for_range(&range).with_opportunity_id(request.opportunity_id.as_deref());

        let reusable = !self.force_requery
            && self
                .last
                .as_ref()
                .is_some_and(|s| s.shape == request.shape && s.filter == filter);
        if reusable {
            tracing::debug!(period = %request.period, "reusing cached query result");
            return self.last.as_ref().ok_or_else(|| {
                PipelineError::Query("cached result disappeared".to_string())
            });
        }

        let query = QueryBuilder::build(request.shape, Some(&filter));
        let outcome = match self.executor.execute(&query).await {
            Ok(outcome) => outcome,
            Err(err) => {
                if err.is_auth() {
                    tracing::warn!(error = %err, "salesforce rejected the session");
                    self.authenticated = false;
                    self.last = None;
                }
                return Err(err);
            }
        };
        // Shape before touching `last` so a bad batch leaves the old result.
        let table = shape(&outcome.records)?;

        tracing::info!(
            period = %request.period,
            shape = ?request.shape,
            rows = table.len(),
            pages = outcome.pages_fetched,
            "query result cached"
        );

        self.force_requery = false;
        Ok(&*self.last.insert(QuerySnapshot {
            shape: request.shape,
            filter,
            soql: outcome.soql,
            pages_fetched: outcome.pages_fetched,
            fetched_at: now,
            table,
        }))
    }

    pub fn aggregate(&self, key: GroupKey, measures: &[Measure]) -> Option<GroupedTable> {
        self.last
            .as_ref()
            .map(|snapshot| aggregate(&snapshot.table, key, measures))
    }

    /// Chart data from the last result; `PremiumByType` groups by policy
    /// type, every other kind by opportunity. The last result must come from
    /// the template that carries that key.
    pub fn chart(&self, kind: ChartKind) -> Result<ChartData, PipelineError> {
        let snapshot = self.last.as_ref().ok_or(PipelineError::NoResult)?;
        if snapshot.shape != kind.source_shape() {
            return Err(PipelineError::ChartShapeMismatch {
                chart: kind.label().to_string(),
                needs: kind.source_shape().label().to_string(),
                have: snapshot.shape.label().to_string(),
            });
        }

        let grouped = match kind {
            ChartKind::PremiumByType => aggregate(
                &snapshot.table,
                GroupKey::PolicyType,
                &[Measure::PolicyCount, Measure::PremiumTotal],
            ),
            _ => aggregate(&snapshot.table, GroupKey::OpportunityId, &[Measure::PolicyCount]),
        };
        Ok(chart_data(kind, &grouped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::salesforce::executor::fake::PagedTransport;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 21, 16, 0, 0).unwrap()
    }

    fn session(pages: Vec<Vec<serde_json::Value>>) -> SessionContext<PagedTransport> {
        SessionContext::new(
            QueryExecutor::new(PagedTransport::new(pages), 10),
            DateRangeCalculator::default(),
        )
    }

    fn week() -> QueryRequest {
        QueryRequest {
            period: Period::Week,
            shape: QueryShape::PoliciesByOpportunity,
            opportunity_id: None,
        }
    }

    #[tokio::test]
    async fn runs_query_and_caches_snapshot() {
        let mut ctx = session(vec![vec![
            json!({"SourceOpportunityId": "A", "policyCount": "3"}),
            json!({"SourceOpportunityId": "B", "policyCount": "5"}),
            json!({"SourceOpportunityId": "A", "policyCount": "2"}),
        ]]);
        assert!(ctx.is_authenticated());

        let snapshot = ctx.run(&week(), now()).await.unwrap();
        assert_eq!(snapshot.table.len(), 3);
        assert!(snapshot.soql.contains("CreatedDate >= 2026-10-19T00:00:00-04:00"));

        let grouped = ctx
            .aggregate(GroupKey::OpportunityId, &[Measure::PolicyCount])
            .unwrap();
        let got: Vec<_> = grouped
            .rows
            .iter()
            .map(|r| (r.key.clone(), r.policy_count.unwrap()))
            .collect();
        assert_eq!(got, [("A".to_string(), 5), ("B".to_string(), 5)]);
    }

    #[tokio::test]
    async fn same_filter_reuses_cache_until_requery_requested() {
        let mut ctx = session(vec![vec![json!({"SourceOpportunityId": "A", "policyCount": 1})]]);
        ctx.run(&week(), now()).await.unwrap();
        ctx.run(&week(), now()).await.unwrap();
        assert_eq!(ctx.executor.transport().calls.lock().unwrap().len(), 1);

        ctx.request_requery();
        ctx.run(&week(), now()).await.unwrap();
        assert_eq!(ctx.executor.transport().calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn changed_filter_requeries() {
        let mut ctx = session(vec![vec![json!({"SourceOpportunityId": "A", "policyCount": 1})]]);
        ctx.run(&week(), now()).await.unwrap();

        let mut filtered = week();
        filtered.opportunity_id = Some("A".to_string());
        let snapshot = ctx.run(&filtered, now()).await.unwrap();
        assert!(snapshot.soql.contains("SourceOpportunityId = 'A'"));
        assert_eq!(ctx.executor.transport().calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn shaping_failure_caches_nothing() {
        let mut ctx = session(vec![vec![
            json!({"SourceOpportunityId": "A", "policyCount": "abc"}),
        ]]);
        let err = ctx.run(&week(), now()).await.unwrap_err();
        assert!(matches!(err, PipelineError::TypeCoercion { .. }));
        assert!(ctx.last().is_none());
        assert!(matches!(ctx.chart(ChartKind::Bar), Err(PipelineError::NoResult)));
    }

    #[tokio::test]
    async fn rejected_session_stops_querying() {
        let mut transport = PagedTransport::new(vec![]);
        transport.fail_with = Some(|| PipelineError::Auth("INVALID_SESSION_ID".into()));
        let mut ctx = SessionContext::new(
            QueryExecutor::new(transport, 10),
            DateRangeCalculator::default(),
        );

        let err = ctx.run(&week(), now()).await.unwrap_err();
        assert!(err.is_auth());
        assert!(!ctx.is_authenticated());

        ctx.request_requery();
        let err = ctx.run(&week(), now()).await.unwrap_err();
        assert!(err.is_auth());
        assert_eq!(ctx.executor.transport().calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn query_errors_keep_session_authenticated() {
        let mut transport = PagedTransport::new(vec![]);
        transport.fail_with = Some(|| PipelineError::Query("MALFORMED_QUERY".into()));
        let mut ctx = SessionContext::new(
            QueryExecutor::new(transport, 10),
            DateRangeCalculator::default(),
        );

        assert!(ctx.run(&week(), now()).await.is_err());
        assert!(ctx.is_authenticated());
    }

    #[tokio::test]
    async fn chart_must_match_the_last_query_template() {
        let mut ctx = session(vec![vec![json!({"SourceOpportunityId": "A", "policyCount": 1})]]);
        ctx.run(&week(), now()).await.unwrap();

        assert!(ctx.chart(ChartKind::Bar).is_ok());
        let err = ctx.chart(ChartKind::PremiumByType).unwrap_err();
        assert!(matches!(err, PipelineError::ChartShapeMismatch { .. }));
        assert!(err.is_client_input());
    }

    #[tokio::test]
    async fn premium_chart_groups_by_policy_type() {
        let mut ctx = session(vec![vec![
            json!({"PolicyType": "Home", "policyCount": 2, "premiumTotal": 300}),
            json!({"PolicyType": "Auto", "policyCount": 1, "premiumTotal": "120.25"}),
        ]]);
        let request = QueryRequest {
            period: Period::Quarter,
            shape: QueryShape::PremiumByPolicyType,
            opportunity_id: None,
        };
        ctx.run(&request, now()).await.unwrap();

        let chart = ctx.chart(ChartKind::PremiumByType).unwrap();
        let points: Vec<_> = chart
            .points
            .iter()
            .map(|p| (p.label.as_str(), p.value))
            .collect();
        assert_eq!(points, [("Auto", 120.25), ("Home", 300.0)]);
    }
}
