use std::{collections::BTreeMap, time::Duration};

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use kdrift::{
    client::{DriftReport, OffsetClient, OffsetClientBuilder},
    cluster::{OffsetMap, OffsetVersion},
    connection::{KafkaCluster, KafkaClusterBuilder},
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Inspect Kafka offsets and consumer group drift
#[derive(Debug, Parser)]
#[command(name = "kdrift", version, about)]
struct Cli {
    /// Bootstrap brokers, comma separated
    #[arg(
        short,
        long,
        env = "KDRIFT_BROKERS",
        value_delimiter = ',',
        required = true
    )]
    brokers: Vec<String>,

    /// Timeout for every cluster request in seconds, 0 disables it
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Client ID sent to the brokers
    #[arg(long)]
    client_id: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the newest (or oldest) available offset per partition
    ///
    /// Examples:
    ///  kdrift get-offset -t orders
    ///  kdrift go -t orders -p 0 --oldest
    #[command(verbatim_doc_comment, visible_alias = "go")]
    GetOffset(GetOffsetArgs),

    /// Print the offsets a consumer group committed per partition
    ///
    /// Examples:
    ///  kdrift consumer-group-get-offset -c billing -t orders
    ///  kdrift cggo -c billing -t orders --offset-version 0
    #[command(verbatim_doc_comment, visible_alias = "cggo")]
    ConsumerGroupGetOffset(GroupArgs),

    /// Print how far a consumer group lags behind the newest offset per partition
    ///
    /// Each line shows the newest offset, the committed offset and the drift,
    /// lagging partitions are marked with `!!!!`.
    ///
    /// Examples:
    ///  kdrift drift -c billing -t orders
    ///  kdrift co -c billing -t orders -p 0,1
    #[command(verbatim_doc_comment, visible_alias = "co")]
    Drift(GroupArgs),

    /// Check whether an offset can still be read from every partition
    ///
    /// Examples:
    ///  kdrift in-range -t orders -o 1200
    #[command(verbatim_doc_comment)]
    InRange(InRangeArgs),
}

#[derive(Debug, Args)]
struct GetOffsetArgs {
    #[arg(short, long)]
    topic: String,

    /// Partitions to query, all if omitted
    #[arg(short, long, value_delimiter = ',')]
    partition: Vec<i32>,

    /// Print the oldest instead of the newest offset
    #[arg(long)]
    oldest: bool,
}

#[derive(Debug, Args)]
struct GroupArgs {
    #[arg(short = 'c', long)]
    group: String,

    #[arg(short, long)]
    topic: String,

    /// Partitions to query, all if omitted
    #[arg(short, long, value_delimiter = ',')]
    partition: Vec<i32>,

    /// Where the group keeps its offsets: 0 for the coordinating service, 1 for the offsets log
    #[arg(long, default_value_t = OffsetVersion::StoredInLog, value_parser = parse_offset_version)]
    offset_version: OffsetVersion,
}

#[derive(Debug, Args)]
struct InRangeArgs {
    #[arg(short, long)]
    topic: String,

    #[arg(short, long, allow_negative_numbers = true)]
    offset: i64,

    /// Partitions to check, all if omitted
    #[arg(short, long, value_delimiter = ',')]
    partition: Vec<i32>,
}

fn parse_offset_version(s: &str) -> Result<OffsetVersion> {
    let code: i16 = s.parse().with_context(|| format!("invalid offset version: {s}"))?;
    OffsetVersion::try_from(code).map_err(|code| anyhow!("unknown offset version {code}, expected 0 or 1"))
}

/// One `p:<partition> <value>` line per partition, sorted by partition.
fn format_offsets(offsets: &OffsetMap) -> String {
    offsets
        .iter()
        .collect::<BTreeMap<_, _>>()
        .into_iter()
        .map(|(p, o)| format!("p:{p} {o}\n"))
        .collect()
}

/// One `p:<partition> <newest> <committed> -> <drift>` line per partition, lagging partitions marked.
fn format_drift(report: &DriftReport) -> String {
    report
        .iter()
        .map(|(p, d)| {
            let marker = if d.is_lagging() { "   !!!!" } else { "" };
            format!(
                "p:{p:<6} {:<10} {:<10} -> {}{marker}\n",
                d.newest, d.committed, d.drift
            )
        })
        .collect()
}

async fn run(cli: Cli) -> Result<String> {
    let mut builder = KafkaClusterBuilder::new(cli.brokers);
    if let Some(client_id) = cli.client_id {
        builder = builder.client_id(client_id);
    }
    let cluster = builder.build();
    debug!(?cluster, "Built cluster client");

    let timeout = (cli.timeout_secs > 0).then(|| Duration::from_secs(cli.timeout_secs));
    let client = OffsetClientBuilder::new(&cluster)
        .request_timeout(timeout)
        .build();
    client
        .initialize()
        .await
        .context("cannot load cluster metadata")?;

    execute(&client, cli.command).await
}

async fn execute(client: &OffsetClient<'_, KafkaCluster>, command: Command) -> Result<String> {
    let output = match command {
        Command::GetOffset(args) => {
            let offsets = if args.oldest {
                client.get_oldest_offsets(&args.topic, &args.partition).await
            } else {
                client.get_newest_offsets(&args.topic, &args.partition).await
            };
            format_offsets(&offsets?)
        }
        Command::ConsumerGroupGetOffset(args) => format_offsets(
            &client
                .get_consumer_group_offsets(
                    &args.group,
                    &args.topic,
                    args.offset_version,
                    &args.partition,
                )
                .await?,
        ),
        Command::Drift(args) => format_drift(
            &client
                .get_drift_report(
                    &args.group,
                    &args.topic,
                    args.offset_version,
                    &args.partition,
                )
                .await?,
        ),
        Command::InRange(args) => {
            let in_range = client
                .offset_in_available_range(&args.topic, args.offset, &args.partition)
                .await?;
            format!("{in_range}\n")
        }
    };

    Ok(output)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let output = run(Cli::parse()).await?;
    print!("{output}");
    Ok(())
}
