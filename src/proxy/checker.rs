//! Node prober
//!
//! Each probe starts a tunnel for one node on its own local port, then
//! measures through it:
//!
//! 1. reachability and latency (always),
//! 2. download throughput (optional),
//! 3. ICMP packet loss straight to the node's host (optional).
//!
//! The tunnel session is torn down before the probe returns, whatever the
//! outcome.

use crate::error::ProbeError;
use crate::proxy::models::{NodeSpec, ProbeResult};
use crate::proxy::ports::PortAllocator;
use crate::proxy::region::RegionResolver;
use crate::proxy::session::{TunnelCommand, TunnelSession};
use crate::proxy::tunnel_config::TunnelConfig;
use crate::proxy::validator;
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Proxy as ReqwestProxy};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info};

/// Default number of concurrent probes
const DEFAULT_CONCURRENCY: usize = 5;

/// First local SOCKS port; slot `n` uses `DEFAULT_BASE_PORT + n`
const DEFAULT_BASE_PORT: u16 = 10808;

/// Time given to the tunnel to bind its listener
const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Small, stable target that answers 204
const DEFAULT_TEST_URL: &str = "https://www.gstatic.com/generate_204";

/// 1 MB payload
const DEFAULT_BANDWIDTH_URL: &str = "https://speed.cloudflare.com/__down?bytes=1000000";
const DEFAULT_BANDWIDTH_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_PING_COUNT: u32 = 4;
const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(1);

/// Placeholders substituted into `PingCommand::args`
pub const PING_COUNT_PLACEHOLDER: &str = "{count}";
pub const PING_WAIT_PLACEHOLDER: &str = "{wait}";
pub const PING_HOST_PLACEHOLDER: &str = "{host}";

static PACKET_LOSS_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+(?:\.\d+)?)%\s+packet loss").expect("Invalid packet loss regex")
});

/// How to run the packet loss measurement
#[derive(Debug, Clone)]
pub struct PingCommand {
    pub program: PathBuf,
    /// Arguments; `{count}`, `{wait}` and `{host}` are substituted
    pub args: Vec<String>,
}

impl Default for PingCommand {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ping"),
            args: vec![
                "-c".to_string(),
                PING_COUNT_PLACEHOLDER.to_string(),
                "-W".to_string(),
                PING_WAIT_PLACEHOLDER.to_string(),
                PING_HOST_PLACEHOLDER.to_string(),
            ],
        }
    }
}

impl PingCommand {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program<P: Into<PathBuf>>(mut self, program: P) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    fn render_args(&self, host: &str, count: u32, wait_secs: u64) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace(PING_COUNT_PLACEHOLDER, &count.to_string())
                    .replace(PING_WAIT_PLACEHOLDER, &wait_secs.to_string())
                    .replace(PING_HOST_PLACEHOLDER, host)
            })
            .collect()
    }
}

/// Configuration for the prober
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub tunnel: TunnelCommand,
    /// Number of probes (and tunnel processes) running at once
    pub concurrency: usize,
    pub base_port: u16,
    pub settle_delay: Duration,
    /// URL fetched through the tunnel to decide reachability
    pub test_url: String,
    pub connect_timeout: Duration,
    /// Total bound on the reachability request
    pub timeout: Duration,
    pub measure_bandwidth: bool,
    pub bandwidth_url: String,
    pub bandwidth_timeout: Duration,
    pub measure_packet_loss: bool,
    pub ping: PingCommand,
    pub ping_count: u32,
    /// Per-packet ping timeout
    pub ping_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            tunnel: TunnelCommand::default(),
            concurrency: DEFAULT_CONCURRENCY,
            base_port: DEFAULT_BASE_PORT,
            settle_delay: DEFAULT_SETTLE_DELAY,
            test_url: DEFAULT_TEST_URL.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            timeout: DEFAULT_TIMEOUT,
            measure_bandwidth: false,
            bandwidth_url: DEFAULT_BANDWIDTH_URL.to_string(),
            bandwidth_timeout: DEFAULT_BANDWIDTH_TIMEOUT,
            measure_packet_loss: false,
            ping: PingCommand::default(),
            ping_count: DEFAULT_PING_COUNT,
            ping_timeout: DEFAULT_PING_TIMEOUT,
        }
    }
}

impl ProbeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tunnel(mut self, tunnel: TunnelCommand) -> Self {
        self.tunnel = tunnel;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_base_port(mut self, port: u16) -> Self {
        self.base_port = port;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_test_url(mut self, url: String) -> Self {
        self.test_url = url;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_bandwidth(mut self, url: Option<String>) -> Self {
        self.measure_bandwidth = true;
        if let Some(url) = url {
            self.bandwidth_url = url;
        }
        self
    }

    pub fn with_ping(mut self, ping: PingCommand) -> Self {
        self.ping = ping;
        self
    }

    pub fn with_packet_loss(mut self, count: u32) -> Self {
        self.measure_packet_loss = true;
        self.ping_count = count.max(1);
        self
    }
}

/// Everything measured through one tunnel session
#[derive(Debug)]
struct Measurements {
    latency: Result<f64, ProbeError>,
    bandwidth_mbps: Option<f64>,
    packet_loss_pct: Option<f64>,
}

impl Measurements {
    fn into_result(self, spec: &NodeSpec, region: String) -> ProbeResult {
        match self.latency {
            Ok(latency_ms) => ProbeResult::ok(spec.clone(), latency_ms, region)
                .with_bandwidth(self.bandwidth_mbps)
                .with_packet_loss(self.packet_loss_pct),
            Err(e) => ProbeResult::failed(spec.clone(), region, e.to_string()),
        }
    }
}

/// Probes nodes through short-lived tunnel processes
pub struct NodeProber {
    config: ProbeConfig,
    ports: PortAllocator,
    regions: RegionResolver,
}

impl NodeProber {
    pub fn new() -> Self {
        Self::with_config(ProbeConfig::default())
    }

    pub fn with_config(config: ProbeConfig) -> Self {
        let ports = PortAllocator::new(config.base_port, config.concurrency.max(1));
        Self {
            config,
            ports,
            regions: RegionResolver::default(),
        }
    }

    pub fn with_regions(mut self, regions: RegionResolver) -> Self {
        self.regions = regions;
        self
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Probe a single node
    ///
    /// Never fails: invalid nodes, unreachable nodes and internal errors all
    /// come back as a `ProbeResult` with the matching status.
    pub async fn probe(&self, spec: &NodeSpec) -> ProbeResult {
        let region = self.regions.resolve(&spec.host);

        if let Err(e) = validator::validate(spec) {
            return ProbeResult::invalid(
                spec.raw_original.clone(),
                Some(spec.clone()),
                region,
                e.to_string(),
            );
        }

        let lease = match self.ports.acquire().await {
            Ok(lease) => lease,
            Err(e) => return ProbeResult::error(spec.clone(), region, e.to_string()),
        };

        match self.run_session(spec, lease.port()).await {
            Ok(measurements) => measurements.into_result(spec, region),
            Err(e) => ProbeResult::error(spec.clone(), region, e.to_string()),
        }
    }

    /// Probe all nodes with bounded parallelism
    ///
    /// Results come back in completion order. There are no retries.
    pub async fn check_nodes(&self, specs: Vec<NodeSpec>) -> Vec<ProbeResult> {
        let total = specs.len();
        let concurrency = self.ports.capacity().max(1);

        stream::iter(specs)
            .map(|spec| async move {
                let result = self.probe(&spec).await;
                info!(
                    node = %spec,
                    status = %result.status,
                    latency_ms = ?result.latency_ms,
                    "probe finished"
                );
                result
            })
            .buffer_unordered(concurrency)
            .enumerate()
            .map(|(done, result)| {
                debug!(done = done + 1, total, "progress");
                result
            })
            .collect::<Vec<_>>()
            .await
    }

    async fn run_session(&self, spec: &NodeSpec, port: u16) -> Result<Measurements, ProbeError> {
        let config = TunnelConfig::for_node(spec, port);
        let session = TunnelSession::start(&self.config.tunnel, &config).await?;

        let measured = self.measure(spec, port).await;

        let teardown = session.shutdown().await;
        if teardown.forced {
            debug!(node = %spec, "tunnel needed a forced kill");
        }
        measured
    }

    async fn measure(&self, spec: &NodeSpec, port: u16) -> Result<Measurements, ProbeError> {
        tokio::time::sleep(self.config.settle_delay).await;

        let client = self.tunnel_client(port, self.config.timeout)?;
        let latency = self.check_reachability(&client).await;
        if latency.is_err() {
            return Ok(Measurements {
                latency,
                bandwidth_mbps: None,
                packet_loss_pct: None,
            });
        }

        let bandwidth_mbps = if self.config.measure_bandwidth {
            match self.measure_bandwidth(port).await {
                Ok(mbps) => Some(mbps),
                Err(e) => {
                    debug!(node = %spec, error = %e, "bandwidth probe failed");
                    None
                }
            }
        } else {
            None
        };

        let packet_loss_pct = if self.config.measure_packet_loss {
            match measure_packet_loss(
                &self.config.ping,
                &spec.host,
                self.config.ping_count,
                self.config.ping_timeout,
            )
            .await
            {
                Ok(pct) => Some(pct),
                Err(e) => {
                    debug!(node = %spec, error = %e, "packet loss probe failed");
                    None
                }
            }
        } else {
            None
        };

        Ok(Measurements {
            latency,
            bandwidth_mbps,
            packet_loss_pct,
        })
    }

    async fn check_reachability(&self, client: &Client) -> Result<f64, ProbeError> {
        let start = Instant::now();

        match tokio::time::timeout(self.config.timeout, client.get(&self.config.test_url).send())
            .await
        {
            Ok(Ok(response)) if response.status().is_success() => {
                Ok(start.elapsed().as_secs_f64() * 1000.0)
            }
            Ok(Ok(response)) => Err(ProbeError::Transport(format!(
                "HTTP status: {}",
                response.status()
            ))),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(ProbeError::timeout("reachability", self.config.timeout)),
        }
    }

    /// Throughput in MB/s for one fixed-size download
    async fn measure_bandwidth(&self, port: u16) -> Result<f64, ProbeError> {
        let bound = self.config.bandwidth_timeout;
        let client = self.tunnel_client(port, bound)?;
        let start = Instant::now();

        let download = async {
            let mut response = client
                .get(&self.config.bandwidth_url)
                .send()
                .await?
                .error_for_status()?;
            let mut bytes: u64 = 0;
            while let Some(chunk) = response.chunk().await? {
                bytes += chunk.len() as u64;
            }
            Ok::<u64, ProbeError>(bytes)
        };

        let bytes = tokio::time::timeout(bound, download)
            .await
            .map_err(|_| ProbeError::timeout("bandwidth", bound))??;
        let secs = start.elapsed().as_secs_f64();

        if bytes == 0 || secs <= 0.0 {
            return Err(ProbeError::Transport("empty bandwidth download".to_string()));
        }
        Ok(bytes as f64 / secs / 1_000_000.0)
    }

    /// HTTP client routed through the tunnel's local SOCKS inbound
    fn tunnel_client(&self, port: u16, timeout: Duration) -> Result<Client, ProbeError> {
        let proxy = ReqwestProxy::all(format!("socks5h://127.0.0.1:{}", port))?;

        let client = Client::builder()
            .proxy(proxy)
            .connect_timeout(self.config.connect_timeout)
            .timeout(timeout)
            .build()?;

        Ok(client)
    }
}

impl Default for NodeProber {
    fn default() -> Self {
        Self::new()
    }
}

/// ICMP loss towards `host`, bypassing the tunnel
async fn measure_packet_loss(
    ping: &PingCommand,
    host: &str,
    count: u32,
    per_packet: Duration,
) -> Result<f64, ProbeError> {
    let wait_secs = per_packet.as_secs().max(1);
    let bound = Duration::from_secs(wait_secs * u64::from(count) + 2);

    let mut cmd = Command::new(&ping.program);
    cmd.args(ping.render_args(host, count, wait_secs))
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let output = tokio::time::timeout(bound, cmd.output())
        .await
        .map_err(|_| ProbeError::timeout("ping", bound))??;

    // ping exits non-zero on total loss but still prints the summary
    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_packet_loss(&stdout)
        .ok_or_else(|| ProbeError::Parse("no packet loss summary in ping output".to_string()))
}

/// Loss percentage from a ping summary line, clamped to [0, 100]
pub fn parse_packet_loss(output: &str) -> Option<f64> {
    let caps = PACKET_LOSS_REGEX.captures(output)?;
    let pct: f64 = caps[1].parse().ok()?;
    Some(pct.clamp(0.0, 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::models::{NodeProtocol, ProbeStatus, Transport};
    use crate::proxy::session::CONFIG_PLACEHOLDER;
    use std::net::Ipv4Addr;
    use std::path::Path;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn node(host: &str, port: u32) -> NodeSpec {
        NodeSpec {
            protocol: NodeProtocol::Vless,
            identity: "11111111-1111-1111-1111-111111111111".to_string(),
            host: host.to_string(),
            port,
            transport: Some(Transport::default()),
            display_tag: "t".to_string(),
            raw_original: format!("vless://raw-{}", host),
        }
    }

    /// A stand-in tunnel that just idles until killed
    fn idle_tunnel(dir: &Path) -> TunnelCommand {
        TunnelCommand::new()
            .with_program("sh")
            .with_args(vec![
                "-c".to_string(),
                "sleep 30".to_string(),
                CONFIG_PLACEHOLDER.to_string(),
            ])
            .with_config_dir(dir)
            .with_grace_period(Duration::from_millis(300))
    }

    fn fast_config(dir: &Path, base_port: u16) -> ProbeConfig {
        ProbeConfig::new()
            .with_tunnel(idle_tunnel(dir))
            .with_concurrency(1)
            .with_base_port(base_port)
            .with_settle_delay(Duration::from_millis(50))
            .with_connect_timeout(Duration::from_secs(2))
            .with_timeout(Duration::from_secs(3))
    }

    /// Minimal no-auth SOCKS5 CONNECT relay standing in for the tunnel's
    /// inbound
    async fn socks_relay(mut client: TcpStream) -> std::io::Result<()> {
        let mut greeting = [0u8; 2];
        client.read_exact(&mut greeting).await?;
        let mut methods = vec![0u8; greeting[1] as usize];
        client.read_exact(&mut methods).await?;
        client.write_all(&[5, 0]).await?;

        let mut request = [0u8; 4];
        client.read_exact(&mut request).await?;
        let host = match request[3] {
            1 => {
                let mut addr = [0u8; 4];
                client.read_exact(&mut addr).await?;
                Ipv4Addr::from(addr).to_string()
            }
            3 => {
                let mut len = [0u8; 1];
                client.read_exact(&mut len).await?;
                let mut name = vec![0u8; len[0] as usize];
                client.read_exact(&mut name).await?;
                String::from_utf8_lossy(&name).into_owned()
            }
            _ => return Ok(()),
        };
        let mut port = [0u8; 2];
        client.read_exact(&mut port).await?;

        let mut upstream = TcpStream::connect((host.as_str(), u16::from_be_bytes(port))).await?;
        client.write_all(&[5, 0, 0, 1, 0, 0, 0, 0, 0, 0]).await?;
        tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
        Ok(())
    }

    /// Tiny HTTP server: `/204` answers 204, `/blob` streams 256 KiB
    async fn http_target(mut stream: TcpStream) -> std::io::Result<()> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Ok(());
            }
            buf.extend_from_slice(&chunk[..n]);
        }

        let request = String::from_utf8_lossy(&buf);
        if request.starts_with("GET /blob") {
            let body = vec![b'x'; 256 * 1024];
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(head.as_bytes()).await?;
            stream.write_all(&body).await?;
        } else {
            stream
                .write_all(b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n")
                .await?;
        }
        stream.shutdown().await
    }

    async fn spawn_server<F, Fut>(handler: F) -> u16
    where
        F: Fn(TcpStream) -> Fut + Send + Copy + 'static,
        Fut: std::future::Future<Output = std::io::Result<()>> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handler(stream));
            }
        });
        port
    }

    /// A local port with nothing listening on it
    fn closed_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[test]
    fn test_probe_config_default() {
        let config = ProbeConfig::default();
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.base_port, DEFAULT_BASE_PORT);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.test_url, DEFAULT_TEST_URL);
        assert!(!config.measure_bandwidth);
        assert!(!config.measure_packet_loss);
    }

    #[test]
    fn test_probe_config_builder() {
        let config = ProbeConfig::new()
            .with_concurrency(0)
            .with_timeout(Duration::from_secs(3))
            .with_test_url("http://example.com".to_string())
            .with_bandwidth(None)
            .with_packet_loss(10);

        assert_eq!(config.concurrency, 1);
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.test_url, "http://example.com");
        assert!(config.measure_bandwidth);
        assert_eq!(config.bandwidth_url, DEFAULT_BANDWIDTH_URL);
        assert!(config.measure_packet_loss);
        assert_eq!(config.ping_count, 10);
    }

    #[test]
    fn test_parse_packet_loss() {
        let linux = "4 packets transmitted, 3 received, 25% packet loss, time 3004ms";
        assert_eq!(parse_packet_loss(linux), Some(25.0));

        let bsd = "4 packets transmitted, 4 packets received, 0.0% packet loss";
        assert_eq!(parse_packet_loss(bsd), Some(0.0));

        let errors = "4 packets transmitted, 0 received, +4 errors, 100% packet loss, time 3ms";
        assert_eq!(parse_packet_loss(errors), Some(100.0));

        assert_eq!(parse_packet_loss("ping: unknown host"), None);
    }

    #[tokio::test]
    async fn test_invalid_node_skips_tunnel() {
        let dir = tempfile::tempdir().unwrap();
        let config = fast_config(dir.path(), closed_port()).with_tunnel(
            TunnelCommand::new()
                .with_program("/nonexistent/tunnel-binary")
                .with_config_dir(dir.path()),
        );
        let prober = NodeProber::with_config(config);

        let result = prober.probe(&node("localhost", 443)).await;
        assert_eq!(result.status, ProbeStatus::Invalid);
        assert!(result.latency_ms.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = fast_config(dir.path(), closed_port()).with_tunnel(
            TunnelCommand::new()
                .with_program("/nonexistent/tunnel-binary")
                .with_config_dir(dir.path()),
        );
        let prober = NodeProber::with_config(config);

        let result = prober.probe(&node("jp-node.example.com", 443)).await;
        assert_eq!(result.status, ProbeStatus::Error);
        assert_eq!(result.region, "asia");
        assert!(result.detail.unwrap().contains("spawn"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreachable_node_fails_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let prober = NodeProber::with_config(fast_config(dir.path(), closed_port()));

        let result = prober.probe(&node("203.0.113.5", 443)).await;
        assert_eq!(result.status, ProbeStatus::Failed);
        assert!(result.latency_ms.is_none());
        assert!(result.detail.is_some());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reachable_node_through_local_socks() {
        let http_port = spawn_server(http_target).await;
        let socks_port = spawn_server(socks_relay).await;

        let dir = tempfile::tempdir().unwrap();
        let config = fast_config(dir.path(), socks_port)
            .with_test_url(format!("http://127.0.0.1:{}/204", http_port))
            .with_bandwidth(Some(format!("http://127.0.0.1:{}/blob", http_port)));
        let prober = NodeProber::with_config(config);

        let result = prober.probe(&node("203.0.113.5", 443)).await;
        assert_eq!(result.status, ProbeStatus::Ok, "detail: {:?}", result.detail);
        assert!(result.latency_ms.unwrap() >= 0.0);
        assert!(result.bandwidth_mbps.unwrap() > 0.0);
        assert!(result.packet_loss_pct.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    /// Stand-in ping that prints `output` and exits with `code`
    #[cfg(unix)]
    fn scripted_ping(output: &str, code: i32) -> PingCommand {
        PingCommand::new().with_program("sh").with_args(vec![
            "-c".to_string(),
            format!("echo '{}'; exit {}", output, code),
            PING_HOST_PLACEHOLDER.to_string(),
        ])
    }

    #[test]
    fn test_ping_command_render_args() {
        let args = PingCommand::default().render_args("203.0.113.5", 4, 1);
        assert_eq!(args, vec!["-c", "4", "-W", "1", "203.0.113.5"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_measure_packet_loss_with_stand_in() {
        let wait = Duration::from_secs(1);

        let ping = scripted_ping("4 packets transmitted, 3 received, 25% packet loss", 0);
        let pct = measure_packet_loss(&ping, "203.0.113.5", 4, wait).await.unwrap();
        assert_eq!(pct, 25.0);

        // total loss still prints a summary but exits non-zero
        let ping = scripted_ping("4 packets transmitted, 0 received, 100% packet loss", 1);
        let pct = measure_packet_loss(&ping, "203.0.113.5", 4, wait).await.unwrap();
        assert_eq!(pct, 100.0);

        let ping = scripted_ping("ping: unknown host", 2);
        let err = measure_packet_loss(&ping, "203.0.113.5", 4, wait).await.unwrap_err();
        assert!(matches!(err, ProbeError::Parse(_)));

        let ping = PingCommand::new().with_program("/nonexistent/ping");
        assert!(measure_packet_loss(&ping, "203.0.113.5", 4, wait).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bandwidth_failure_keeps_node_ok() {
        let http_port = spawn_server(http_target).await;
        let socks_port = spawn_server(socks_relay).await;

        let dir = tempfile::tempdir().unwrap();
        let config = fast_config(dir.path(), socks_port)
            .with_test_url(format!("http://127.0.0.1:{}/204", http_port))
            .with_bandwidth(Some(format!("http://127.0.0.1:{}/blob", closed_port())));
        let prober = NodeProber::with_config(config);

        let result = prober.probe(&node("203.0.113.5", 443)).await;
        assert_eq!(result.status, ProbeStatus::Ok, "detail: {:?}", result.detail);
        assert!(result.latency_ms.is_some());
        assert!(result.bandwidth_mbps.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_packet_loss_measured_for_reachable_node() {
        let http_port = spawn_server(http_target).await;
        let socks_port = spawn_server(socks_relay).await;
        let dir = tempfile::tempdir().unwrap();
        let test_url = format!("http://127.0.0.1:{}/204", http_port);

        let config = fast_config(dir.path(), socks_port)
            .with_test_url(test_url.clone())
            .with_ping(scripted_ping(
                "4 packets transmitted, 3 received, 25% packet loss, time 3004ms",
                0,
            ))
            .with_packet_loss(4);
        let result = NodeProber::with_config(config)
            .probe(&node("203.0.113.5", 443))
            .await;
        assert_eq!(result.status, ProbeStatus::Ok, "detail: {:?}", result.detail);
        assert_eq!(result.packet_loss_pct, Some(25.0));

        let config = fast_config(dir.path(), socks_port)
            .with_test_url(test_url)
            .with_ping(PingCommand::new().with_program("/nonexistent/ping"))
            .with_packet_loss(4);
        let result = NodeProber::with_config(config)
            .probe(&node("203.0.113.5", 443))
            .await;
        assert_eq!(result.status, ProbeStatus::Ok, "detail: {:?}", result.detail);
        assert!(result.packet_loss_pct.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_check_nodes_returns_one_result_per_node() {
        let dir = tempfile::tempdir().unwrap();
        let config = fast_config(dir.path(), closed_port()).with_concurrency(3);
        let prober = NodeProber::with_config(config);

        let nodes = vec![
            node("203.0.113.5", 443),
            node("203.0.113.6", 443),
            node("bad host", 443),
            node("203.0.113.7", 0),
        ];
        let results = prober.check_nodes(nodes).await;

        assert_eq!(results.len(), 4);
        let invalid = results
            .iter()
            .filter(|r| r.status == ProbeStatus::Invalid)
            .count();
        assert_eq!(invalid, 2);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
