//! Prometheus metrics HTTP endpoint
//!
//! Exposes queue engine metrics in Prometheus text format at /metrics.
//! Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_lifecycle_metrics(&mut output, site_id, &summary);
    write_rebuild_metrics(&mut output, site_id, &summary);
    write_timer_metrics(&mut output, site_id, &summary);
    write_state_metrics(&mut output, site_id, &summary);

    output
}

fn write_lifecycle_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    let counters = [
        ("queue_visitors_registered_total", "Visitors registered", summary.visitors_registered),
        (
            "queue_registrations_rejected_total",
            "Registrations refused by distribution or queue limits",
            summary.registrations_rejected,
        ),
        ("queue_visitors_called_total", "Visitors called to a workplace", summary.visitors_called),
        ("queue_visitors_completed_total", "Service steps completed", summary.visitors_completed),
        ("queue_visitors_cancelled_total", "Visitors cancelled", summary.visitors_cancelled),
        ("queue_visitors_held_over_total", "Visitors put on holdover", summary.visitors_held_over),
        ("queue_visitors_moved_total", "Visitors moved to a workplace or service", summary.visitors_moved),
        (
            "queue_holdovers_returned_total",
            "Holdovers returned after their delay elapsed",
            summary.holdovers_returned,
        ),
        (
            "queue_appointments_auto_total",
            "Appointment visitors called automatically",
            summary.appointments_auto,
        ),
        (
            "queue_workplaces_stale_total",
            "Workplaces unregistered for inactivity",
            summary.workplaces_stale,
        ),
    ];
    for (name, help, val) in counters {
        write_metric(output, name, help, MetricType::Counter, site, val);
    }
}

fn write_rebuild_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "queue_rebuilds_total",
        "Total queue rebuilds",
        MetricType::Counter,
        site,
        summary.rebuilds_total,
    );
    write_histogram(
        output,
        "queue_rebuild_latency_us",
        "Queue rebuild latency in microseconds",
        site,
        &summary.rebuild_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.rebuild_avg_us,
    );
    write_metric(
        output,
        "queue_rebuild_latency_p99_us",
        "99th percentile queue rebuild latency",
        MetricType::Gauge,
        site,
        summary.rebuild_p99_us,
    );
    write_metric(
        output,
        "queue_rebuild_latency_max_us",
        "Max queue rebuild latency since last scrape",
        MetricType::Gauge,
        site,
        summary.rebuild_max_us,
    );
}

fn write_timer_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    let _ = writeln!(output, "# HELP queue_ticks_total Timer ticks processed");
    let _ = writeln!(output, "# TYPE queue_ticks_total counter");
    let _ = writeln!(output, "queue_ticks_total{{site=\"{site}\",timer=\"coarse\"}} {}", summary.ticks_coarse);
    let _ = writeln!(output, "queue_ticks_total{{site=\"{site}\",timer=\"fine\"}} {}", summary.ticks_fine);
    write_metric(
        output,
        "queue_tick_failures_total",
        "Timer passes that failed and were skipped",
        MetricType::Counter,
        site,
        summary.tick_failures,
    );
}

fn write_state_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "queue_events_emitted_total",
        "Outbound events published",
        MetricType::Counter,
        site,
        summary.events_emitted,
    );
    write_metric(
        output,
        "queue_events_dropped_total",
        "Outbound events dropped because the channel was full",
        MetricType::Counter,
        site,
        summary.events_dropped,
    );
    write_metric(
        output,
        "queue_notifications_total",
        "Inbound notifications applied",
        MetricType::Counter,
        site,
        summary.notifications_processed,
    );
    write_metric(
        output,
        "queue_active_visitors",
        "Visitors in the active set",
        MetricType::Gauge,
        site,
        summary.active_visitors,
    );
    write_metric(
        output,
        "queue_active_workplaces",
        "Registered workplaces",
        MetricType::Gauge,
        site,
        summary.active_workplaces,
    );
    write_metric(
        output,
        "queue_day_open",
        "1 while the working day is open",
        MetricType::Gauge,
        site,
        u64::from(summary.day_open),
    );
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics, &site_id);
            let mut response = text_response(StatusCode::OK, body);
            response.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
            );
            Ok(response)
        }
        (&Method::GET, "/health") => {
            let body = if metrics.day_open() { "ok day_open" } else { "ok day_closed" };
            Ok(text_response(StatusCode::OK, body))
        }
        _ => Ok(text_response(StatusCode::NOT_FOUND, "Not Found")),
    }
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let site_id = site_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let site_id = site_id.clone();
                                async move { handle_request(req, metrics, site_id).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();
        metrics.record_registered();
        metrics.record_called();
        metrics.record_rebuild(150);
        metrics.record_tick(true);
        metrics.set_active(4, 2);
        metrics.set_day_open(true);

        let output = format_prometheus_metrics(&metrics, "office-7");

        assert!(output.contains("queue_visitors_registered_total{site=\"office-7\"} 1"));
        assert!(output.contains("queue_visitors_called_total{site=\"office-7\"} 1"));
        assert!(output.contains("queue_rebuild_latency_us_bucket{site=\"office-7\",le=\"200\"} 1"));
        assert!(output.contains("queue_ticks_total{site=\"office-7\",timer=\"coarse\"} 1"));
        assert!(output.contains("queue_active_visitors{site=\"office-7\"} 4"));
        assert!(output.contains("queue_day_open{site=\"office-7\"} 1"));
    }

    #[test]
    fn test_every_metric_has_type_line() {
        let output = format_prometheus_metrics(&Metrics::new(), "s");
        for line in output.lines().filter(|l| l.starts_with("# HELP")) {
            let name = line.split_whitespace().nth(2).unwrap();
            assert!(output.contains(&format!("# TYPE {name} ")), "{name}");
        }
    }
}
