//! Prometheus scrape endpoint.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Prometheus exporter configuration.
#[derive(Debug, Clone)]
pub struct PrometheusConfig {
    /// Listen address for the scrape endpoint.
    pub listen: SocketAddr,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: ([0, 0, 0, 0], 8080).into(),
        }
    }
}

/// Installs the global Prometheus recorder and its HTTP listener.
///
/// Must be called at most once, before any metric is recorded.
pub fn init_prometheus(config: &PrometheusConfig) -> Result<(), Box<dyn std::error::Error>> {
    PrometheusBuilder::new()
        .with_http_listener(config.listen)
        .install()?;

    info!(address = %config.listen, "prometheus scrape endpoint listening");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_listen_port() {
        assert_eq!(PrometheusConfig::default().listen.port(), 8080);
    }
}
