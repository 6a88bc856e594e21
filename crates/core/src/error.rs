use thiserror::Error;

/// Failures surfaced by the query pipeline.
///
/// `Auth` is terminal for a session; `Query` and `PaginationLimitExceeded`
/// can be retried by re-running the user action. Shaping errors abort the
/// whole result.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("salesforce authentication failed: {0}")]
    Auth(String),

    #[error("salesforce query failed: {0}")]
    Query(String),

    #[error("row {row}: field {field} is not an integer: {value}")]
    TypeCoercion {
        row: usize,
        field: String,
        value: String,
    },

    #[error("row {row}: field {field} is not a date: {value}")]
    DateParse {
        row: usize,
        field: String,
        value: String,
    },

    #[error("query still had more results after {max_pages} pages")]
    PaginationLimitExceeded { max_pages: usize },

    #[error("invalid period: {0}")]
    InvalidPeriod(String),

    #[error("local time does not exist in the reporting timezone: {0}")]
    LocalTime(String),

    #[error("invalid chart kind: {0}")]
    InvalidChartKind(String),

    #[error("{chart} needs a {needs} query but the last result is {have}")]
    ChartShapeMismatch {
        chart: String,
        needs: String,
        have: String,
    },

    #[error("no query has been run in this session")]
    NoResult,
}

impl PipelineError {
    pub fn is_auth(&self) -> bool {
        matches!(self, PipelineError::Auth(_))
    }

    /// Errors caused by the caller's input rather than the remote service.
    pub fn is_client_input(&self) -> bool {
        matches!(
            self,
            PipelineError::InvalidPeriod(_)
                | PipelineError::InvalidChartKind(_)
                | PipelineError::ChartShapeMismatch { .. }
        )
    }
}
