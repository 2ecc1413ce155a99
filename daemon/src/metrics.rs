//! Prometheus metrics

use crate::config::MonitoringConfig;
use prometheus::{IntCounter, IntGauge, Opts, Registry};
use std::sync::LazyLock;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Global metrics registry
static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Global metrics instance
pub static METRICS: LazyLock<Metrics> = LazyLock::new(Metrics::new);

/// Metrics struct
pub struct Metrics {
    // Counters
    pub commands_routed: IntCounter,
    pub commands_dropped: IntCounter,
    pub device_messages: IntCounter,
    pub handshake_rejections: IntCounter,
    pub login_failures: IntCounter,
    pub lockouts: IntCounter,
    pub rate_limited: IntCounter,
    pub store_errors: IntCounter,

    // Gauges
    pub active_connections: IntGauge,
}

fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::with_opts(Opts::new(name, help)).expect("static metric definition is valid")
}

impl Metrics {
    pub fn new() -> Self {
        let commands_routed = counter(
            "iotlink_commands_routed_total",
            "Commands handed to a live device session",
        );
        let commands_dropped = counter(
            "iotlink_commands_dropped_total",
            "Commands dropped because the device was offline or the send failed",
        );
        let device_messages = counter(
            "iotlink_device_messages_total",
            "Device-originated control messages relayed to listeners",
        );
        let handshake_rejections = counter(
            "iotlink_handshake_rejections_total",
            "Device handshakes refused",
        );
        let login_failures = counter(
            "iotlink_login_failures_total",
            "Failed login attempts recorded",
        );
        let lockouts = counter("iotlink_lockouts_total", "Account lockouts applied");
        let rate_limited = counter(
            "iotlink_rate_limited_total",
            "API requests rejected by the rate limiter",
        );
        let store_errors = counter(
            "iotlink_store_errors_total",
            "Counter store operations that failed",
        );

        let active_connections = IntGauge::with_opts(Opts::new(
            "iotlink_active_connections",
            "Number of live device sessions",
        ))
        .expect("static metric definition is valid");

        // Register metrics
        REGISTRY.register(Box::new(commands_routed.clone())).ok();
        REGISTRY.register(Box::new(commands_dropped.clone())).ok();
        REGISTRY.register(Box::new(device_messages.clone())).ok();
        REGISTRY.register(Box::new(handshake_rejections.clone())).ok();
        REGISTRY.register(Box::new(login_failures.clone())).ok();
        REGISTRY.register(Box::new(lockouts.clone())).ok();
        REGISTRY.register(Box::new(rate_limited.clone())).ok();
        REGISTRY.register(Box::new(store_errors.clone())).ok();
        REGISTRY.register(Box::new(active_connections.clone())).ok();

        Self {
            commands_routed,
            commands_dropped,
            device_messages,
            handshake_rejections,
            login_failures,
            lockouts,
            rate_limited,
            store_errors,
            active_connections,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Render every registered metric in the text exposition format
pub fn render() -> Vec<u8> {
    use prometheus::Encoder;

    LazyLock::force(&METRICS);
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("Metrics encoding error: {}", e);
    }
    buffer
}

/// Start the metrics server
pub fn start_server(config: &MonitoringConfig) -> JoinHandle<()> {
    let bind = config.prometheus_bind;
    let enabled = config.prometheus_enabled;

    tokio::spawn(async move {
        if !enabled {
            info!("Prometheus metrics disabled");
            return;
        }

        use bytes::Bytes;
        use http_body_util::Full;
        use hyper::{Response, server::conn::http1, service::service_fn};
        use hyper_util::rt::TokioIo;

        let listener = match tokio::net::TcpListener::bind(bind).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind metrics server: {}", e);
                return;
            }
        };

        info!("Prometheus metrics server listening on {}", bind);

        loop {
            let (stream, _) = match listener.accept().await {
                Ok(r) => r,
                Err(e) => {
                    error!("Metrics accept error: {}", e);
                    continue;
                }
            };

            let io = TokioIo::new(stream);

            tokio::spawn(async move {
                let service = service_fn(|_req| async {
                    let mut response = Response::new(Full::new(Bytes::from(render())));
                    response.headers_mut().insert(
                        hyper::header::CONTENT_TYPE,
                        hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
                    );
                    Ok::<_, std::convert::Infallible>(response)
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Metrics connection error: {}", e);
                }
            });
        }
    })
}
