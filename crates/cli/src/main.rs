use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use policy_dash_core::aggregate::{GroupKey, Measure};
use policy_dash_core::chart::{ChartKind, Summary};
use policy_dash_core::config::Settings;
use policy_dash_core::query::{QueryBuilder, QueryFilter, QueryShape};
use policy_dash_core::salesforce::{QueryExecutor, SalesforceClient};
use policy_dash_core::session::{QueryRequest, SessionContext};
use policy_dash_core::time::{DateRangeCalculator, Period};

#[derive(Debug, Parser)]
#[command(name = "policy_dash_cli")]
struct Args {
    /// Reporting period: week, month or quarter.
    #[arg(long, default_value = "week")]
    period: Period,

    /// Aggregate template: by-opportunity or premium-by-policy-type.
    #[arg(long, default_value = "by-opportunity")]
    shape: QueryShape,

    /// Restrict to one source opportunity id.
    #[arg(long)]
    opportunity_id: Option<String>,

    /// Grouping for the printed aggregate: opportunity or policy-type.
    #[arg(long)]
    group_by: Option<GroupKey>,

    /// Chart kind to prepare (bar, pie, scatter, line, histogram, box, premium-by-type).
    #[arg(long)]
    chart: Option<ChartKind>,

    /// Print the SOQL that would be sent, without logging in.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    match run(&settings, args).await {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(err) => {
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %err, "report run failed");
            Err(err)
        }
    }
}

async fn run(settings: &Settings, args: Args) -> anyhow::Result<serde_json::Value> {
    let calculator = DateRangeCalculator::new(settings.timezone()?);
    let now = chrono::Utc::now();

    if args.dry_run {
        let range = calculator.compute(args.period, now)?;
        let filter =
            QueryFilter::for_range(&range).with_opportunity_id(args.opportunity_id.as_deref());
        let soql = QueryBuilder::build(args.shape, Some(&filter)).to_soql();
        tracing::info!(period = %args.period, dry_run = true, "built query without executing");
        return Ok(serde_json::json!({ "soql": soql }));
    }

    let client = SalesforceClient::connect(settings).await?;
    let executor = QueryExecutor::new(client, settings.max_pages);
    let mut session = SessionContext::new(executor, calculator);

    let request = QueryRequest {
        period: args.period,
        shape: args.shape,
        opportunity_id: args.opportunity_id,
    };
    let snapshot = session.run(&request, now).await?;
    let summary = Summary::of(&snapshot.table);
    let soql = snapshot.soql.clone();
    let pages_fetched = snapshot.pages_fetched;

    let group_by = args.group_by.unwrap_or(match args.shape {
        QueryShape::PoliciesByOpportunity => GroupKey::OpportunityId,
        QueryShape::PremiumByPolicyType => GroupKey::PolicyType,
    });
    let grouped = session.aggregate(group_by, &[Measure::PolicyCount, Measure::PremiumTotal]);
    let chart = args.chart.map(|kind| session.chart(kind)).transpose()?;

    Ok(serde_json::json!({
        "soql": soql,
        "pages_fetched": pages_fetched,
        "summary": summary,
        "aggregate": grouped,
        "chart": chart,
    }))
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
