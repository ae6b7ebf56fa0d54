//! Prometheus metrics server

use crate::config::MetricsSettings;
use anchorage_consensus::EngineStats;
use prometheus::{Encoder, IntGauge, Registry, TextEncoder};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Anchor subsystem gauges
#[derive(Clone)]
pub struct AnchorMetrics {
    registry: Registry,
    local_height: IntGauge,
    external_height: IntGauge,
    pending_anchors: IntGauge,
    anchors_total: IntGauge,
    active_anchors: IntGauge,
    rewarded_anchors: IntGauge,
    reward_pool: IntGauge,
}

impl AnchorMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let local_height = IntGauge::new("anchorage_local_height", "Local chain tip height")?;
        let external_height =
            IntGauge::new("anchorage_external_height", "External chain tip height")?;
        let pending_anchors =
            IntGauge::new("anchorage_pending_anchors", "Anchors awaiting promotion")?;
        let anchors_total = IntGauge::new("anchorage_anchors_total", "Anchors on the anchor chain")?;
        let active_anchors = IntGauge::new(
            "anchorage_active_anchors",
            "Anchors past the activation threshold",
        )?;
        let rewarded_anchors =
            IntGauge::new("anchorage_rewarded_anchors", "Anchors with a mined reward")?;
        let reward_pool = IntGauge::new(
            "anchorage_anchor_reward_pool",
            "Anchor reward community balance in satoshi",
        )?;

        for gauge in [
            &local_height,
            &external_height,
            &pending_anchors,
            &anchors_total,
            &active_anchors,
            &rewarded_anchors,
            &reward_pool,
        ] {
            registry.register(Box::new(gauge.clone()))?;
        }

        Ok(Self {
            registry,
            local_height,
            external_height,
            pending_anchors,
            anchors_total,
            active_anchors,
            rewarded_anchors,
            reward_pool,
        })
    }

    pub fn update(&self, local_height: u64, stats: &EngineStats) {
        self.local_height.set(local_height as i64);
        self.external_height.set(stats.external_height as i64);
        self.pending_anchors.set(stats.pending as i64);
        self.anchors_total.set(stats.anchors as i64);
        self.active_anchors.set(stats.active as i64);
        self.rewarded_anchors.set(stats.rewarded as i64);
        self.reward_pool.set(stats.reward_pool.sat());
    }

    /// Text exposition of every registered metric
    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Metrics server
pub struct MetricsServer {
    /// Configuration
    config: MetricsSettings,
    metrics: AnchorMetrics,
}

impl MetricsServer {
    pub fn new(config: &MetricsSettings, metrics: AnchorMetrics) -> Self {
        Self {
            config: config.clone(),
            metrics,
        }
    }

    /// Run the metrics server
    pub async fn run(&self) -> anyhow::Result<()> {
        let addr: SocketAddr = self.config.address.parse()?;

        tracing::info!("Starting metrics server on {}", addr);
        let listener = tokio::net::TcpListener::bind(addr).await?;

        loop {
            let (mut stream, peer_addr) = listener.accept().await?;
            let metrics = self.metrics.clone();

            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let n = match stream.read(&mut buf).await {
                    Ok(n) => n,
                    Err(e) => {
                        tracing::debug!("metrics read from {} failed: {}", peer_addr, e);
                        return;
                    }
                };
                let request = String::from_utf8_lossy(&buf[..n]);
                let response = respond(&metrics, &request);
                if let Err(e) = stream.write_all(response.as_bytes()).await {
                    tracing::debug!("metrics write to {} failed: {}", peer_addr, e);
                }
            });
        }
    }
}

fn respond(metrics: &AnchorMetrics, request: &str) -> String {
    if request.starts_with("GET /metrics") {
        match metrics.render() {
            Ok(body) => format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            ),
            Err(e) => {
                tracing::error!("Metrics encoding failed: {}", e);
                "HTTP/1.1 500 Internal Server Error\r\n\r\n".to_string()
            }
        }
    } else if request.starts_with("GET /health") {
        let body = "{\"status\":\"healthy\"}";
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        )
    } else {
        "HTTP/1.1 404 Not Found\r\n\r\n".to_string()
    }
}
