use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use node_probe::{
    logging::{self, LogLevel},
    pipeline,
    proxy::{sampler::candidate_lines, FeedConfig, FeedSource, ProbeConfig, TunnelCommand},
    report::ReportWriter,
    AppContext, Config,
};
use std::path::PathBuf;
use std::time::Duration;

/// Normalize, probe and rank vless/vmess proxy nodes
#[derive(Parser)]
#[command(name = "node-probe")]
#[command(about = "Normalize, probe and rank vless/vmess proxy nodes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,

    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize and validate descriptors from a file without probing
    Parse {
        /// Input file with one descriptor per line
        input: PathBuf,
        /// Output file for canonical URIs
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Options for a probing run (the default command)
#[derive(Args)]
struct RunArgs {
    /// Feed URLs to read candidates from (repeat or comma separate)
    #[arg(short, long = "url", env = "NODE_PROBE_URLS", value_delimiter = ',')]
    urls: Vec<String>,

    /// Local files to read candidates from (repeat or comma separate)
    #[arg(short, long = "file", env = "NODE_PROBE_FILES", value_delimiter = ',')]
    files: Vec<PathBuf>,

    /// Probe a random sample of at most this many distinct candidates
    #[arg(short, long)]
    sample: Option<usize>,

    /// Number of concurrent probes
    #[arg(short = 'n', long, default_value = "5")]
    concurrency: usize,

    /// Reachability timeout in seconds
    #[arg(long, default_value = "10")]
    timeout: u64,

    /// Delay before probing a freshly started tunnel, in milliseconds
    #[arg(long, default_value = "2000")]
    settle_ms: u64,

    /// URL fetched through the tunnel to test reachability
    #[arg(long, default_value = "https://www.gstatic.com/generate_204")]
    test_url: String,

    /// Tunnel executable (xray-compatible `run -c <config>`)
    #[arg(long, env = "NODE_PROBE_TUNNEL_BIN", default_value = "xray")]
    tunnel_bin: PathBuf,

    /// First local SOCKS port; each concurrent probe gets its own
    #[arg(long, default_value = "10808")]
    base_port: u16,

    /// Measure download throughput through each working node
    #[arg(long)]
    bandwidth: bool,

    /// Download URL used for the throughput measurement
    #[arg(long, requires = "bandwidth")]
    bandwidth_url: Option<String>,

    /// Measure ICMP packet loss to each working node
    #[arg(long)]
    packet_loss: bool,

    /// Ping count for the packet loss measurement
    #[arg(long, default_value = "4", requires = "packet_loss")]
    ping_count: u32,

    /// Feed request timeout in seconds
    #[arg(long, default_value = "10")]
    feed_timeout: u64,

    /// Output directory for reports
    #[arg(short, long, default_value = "results")]
    out: PathBuf,

    /// MaxMind database used as a region fallback for IP hosts
    #[arg(long, env = "NODE_PROBE_MMDB")]
    mmdb: Option<PathBuf>,
}

impl RunArgs {
    fn into_config(self) -> Result<Config> {
        if self.concurrency == 0 {
            return Err(anyhow!("Concurrency must be at least 1"));
        }

        let sources: Vec<FeedSource> = self
            .urls
            .into_iter()
            .map(FeedSource::Url)
            .chain(self.files.into_iter().map(FeedSource::File))
            .collect();

        let mut probe = ProbeConfig::new()
            .with_tunnel(TunnelCommand::new().with_program(self.tunnel_bin))
            .with_concurrency(self.concurrency)
            .with_base_port(self.base_port)
            .with_settle_delay(Duration::from_millis(self.settle_ms))
            .with_timeout(Duration::from_secs(self.timeout))
            .with_test_url(self.test_url);
        if self.bandwidth {
            probe = probe.with_bandwidth(self.bandwidth_url);
        }
        if self.packet_loss {
            probe = probe.with_packet_loss(self.ping_count);
        }

        Ok(Config::new()
            .with_sources(sources)
            .with_sample_size(self.sample)
            .with_feed(FeedConfig::new().with_timeout(Duration::from_secs(self.feed_timeout)))
            .with_probe(probe)
            .with_output_dir(self.out)
            .with_mmdb_path(self.mmdb))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::try_init(LogLevel::from_flags(cli.quiet, cli.verbose)).map_err(|e| anyhow!(e))?;

    match cli.command {
        Some(Commands::Parse { input, output }) => {
            let content = std::fs::read_to_string(&input)?;
            let lines = candidate_lines(content.lines());
            let ctx = AppContext::new(Config::default())?;
            let candidates = pipeline::prepare_candidates(&lines, &ctx.regions);

            println!(
                "Parsed {} valid nodes from {:?} ({} rejected)",
                candidates.nodes.len(),
                input,
                candidates.rejected.len()
            );

            let uris: Vec<String> = candidates
                .nodes
                .iter()
                .map(|node| node.to_canonical_uri())
                .collect();

            if let Some(output_path) = output {
                let mut text = uris.join("\n");
                if !text.is_empty() {
                    text.push('\n');
                }
                std::fs::write(&output_path, text)?;
                println!("Saved canonical URIs to {:?}", output_path);
            } else {
                for uri in &uris {
                    println!("{}", uri);
                }
            }
        }
        None => {
            let config = cli.run.into_config()?;
            let ctx = AppContext::new(config)?;

            println!("Sources: {}", ctx.config.sources.len());
            println!(
                "Probing with {} concurrent tunnels via {:?}, timeout: {}s",
                ctx.config.probe.concurrency,
                ctx.config.probe.tunnel.program,
                ctx.config.probe.timeout.as_secs()
            );
            println!();

            let report = pipeline::run(&ctx).await?;
            let paths = ReportWriter::new(&ctx.config.output_dir).write(&report)?;

            println!(
                "Results: {} candidates, {} working",
                report.results.len(),
                report.working()
            );

            if !report.ranked.is_empty() {
                println!("\nWorking nodes:");
                for result in &report.ranked {
                    if let (Some(node), Some(latency)) = (&result.node, result.latency_ms) {
                        println!("  {} [{}] ({:.0}ms)", node, result.region, latency);
                    }
                }
            }

            println!("\nReport saved to {:?}", paths.probe_report);
            println!("Valid nodes saved to {:?}", paths.valid_nodes);
            println!("{} config documents saved", paths.configs.len());
        }
    }

    Ok(())
}
