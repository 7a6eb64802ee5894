use clap::Parser;
use jobmesh::config::{AppConfig, LoggingConfig};
use jobmesh::error::Result;
use jobmesh::{
    ComputeContext, ComputeGroup, EventKind, InMemoryAccount, Job, LocalExecutorPool, PublicInfo,
    StaticIdentity, WaitOutcome, WorkDescriptor,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Run the template job on an in-process executor pool
#[derive(Parser, Debug)]
#[command(name = "jobmesh")]
#[command(author, version, about = "Market-priced, slice-based job dispatch demo", long_about = None)]
struct Cli {
    /// Configuration directory
    #[arg(short, long, default_value = "config")]
    config: String,

    /// Number of inputs (1..=n)
    #[arg(short, long, default_value_t = 10)]
    inputs: u64,

    /// Local executor slots
    #[arg(short, long, default_value_t = 4)]
    workers: usize,

    /// Per-slice offer; omit to follow the market price
    #[arg(long)]
    offer: Option<Decimal>,

    /// Starting balance of the payment account
    #[arg(long, default_value = "10")]
    balance: Decimal,

    /// Compute group join key; none means the global network
    #[arg(long)]
    group: Option<String>,

    /// Join secret for a private compute group
    #[arg(long, env = "JOBMESH_JOIN_SECRET", hide_env_values = true)]
    join_secret: Option<String>,

    /// Give up waiting after this many seconds (slices keep running)
    #[arg(long)]
    deadline_secs: Option<u64>,
}

fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,jobmesh={}", config.level)));

    let (json_layer, text_layer) = if config.json {
        (Some(tracing_subscriber::fmt::layer().json().with_target(true)), None)
    } else {
        (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

/// sqrt(x) + a * b, with progress reports along the way
fn template_work(args: &[Value], ctx: &jobmesh::WorkContext) -> anyhow::Result<Value> {
    ctx.progress();
    let x = args
        .first()
        .and_then(Value::as_f64)
        .ok_or_else(|| anyhow::anyhow!("input is not a number"))?;
    let a = args.get(1).and_then(Value::as_f64).unwrap_or(0.0);
    let b = args.get(2).and_then(Value::as_f64).unwrap_or(0.0);

    ctx.progress_at(0.5);
    ctx.console(format!("slice {} working on {}", ctx.slice(), x));
    std::thread::sleep(Duration::from_millis(50));

    ctx.progress_at(1.0);
    Ok(json!(x.sqrt() + a * b))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)?;
    init_logging(&config.logging);

    let account = InMemoryAccount::new("demo-bank", cli.balance);
    let ctx = ComputeContext::builder()
        .app_config(&config)
        .identity(Arc::new(StaticIdentity("demo-identity".into())))
        .payment(Arc::new(account))
        .executors(Arc::new(LocalExecutorPool::new(cli.workers, template_work)))
        .build()?;
    info!(market_value = %ctx.market_value().await?, "context ready");

    let inputs = (1..=cli.inputs).map(|x| json!(x));
    let mut job = Job::compute_for(
        ctx,
        inputs,
        WorkDescriptor::new("template_work"),
        vec![json!(0.1248734), json!(0.9876122)],
    )?;
    job.public = PublicInfo::new("Template job")
        .with_description("Job with most options for demonstration purposes")
        .with_link("https://example.invalid/jobmesh");
    if let Some(key) = cli.group {
        let mut group = ComputeGroup::new(key);
        if let Some(secret) = cli.join_secret {
            group = group.with_secret(secret);
        }
        job.compute_groups.push(group);
    }

    job.on_kind(EventKind::ReadyStateChange, |event| {
        println!("state -> {}", event.to_json());
        Ok(())
    });
    job.on_kind(EventKind::Accepted, |event| {
        println!("accepted: {}", event.to_json()["job"]);
        Ok(())
    });
    job.on_kind(EventKind::Result, |event| {
        let payload = event.to_json();
        println!("result for slice {}: {}", payload["sliceNumber"], payload["result"]);
        Ok(())
    });
    job.on_kind(EventKind::Console, |event| {
        println!("console: {}", event.to_json()["message"]);
        Ok(())
    });
    job.on_kind(EventKind::NoProgress, |event| {
        println!("no progress: {}", event.to_json()["message"]);
        Ok(())
    });
    job.on_kind(EventKind::NoFunds, |event| {
        println!("insufficient funds: {}", event.to_json());
        Ok(())
    });
    job.on_kind(EventKind::Error, |event| {
        println!("slice error: {}", event.to_json()["message"]);
        Ok(())
    });

    let handle = job.exec(cli.offer)?;
    match handle.wait(cli.deadline_secs.map(Duration::from_secs)).await? {
        WaitOutcome::Complete(results) => {
            println!("results:");
            for (index, value) in results.iter().enumerate() {
                println!("  [{}] {}", index, value);
            }
        }
        WaitOutcome::TimedOut(partial) => {
            warn!(
                completed = partial.completed(),
                unresolved = partial.unresolved.len(),
                "deadline expired before the job finished"
            );
        }
    }
    Ok(())
}
