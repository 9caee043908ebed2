//! Prometheus text exposition format.
//!
//! Renders a pool snapshot for scraping by a Prometheus server or a
//! node-exporter textfile collector.

use poolwatch_core::PoolStats;

/// Render one pool's gauges and counters, labelled with `pool`.
pub fn render_prometheus(pool: &str, stats: &PoolStats, slow_queries: u64) -> String {
    let label = escape_label(pool);
    let mut out = String::new();

    let gauges: [(&str, &str, usize); 5] = [
        ("connections", "Connections held by the pool.", stats.total),
        ("connections_active", "Connections checked out.", stats.active),
        ("connections_idle", "Connections sitting idle.", stats.idle),
        ("waiting_clients", "Callers queued for a connection.", stats.waiting),
        ("max_connections", "Configured pool ceiling.", stats.max),
    ];
    for (name, help, value) in gauges {
        out.push_str(&format!("# HELP poolwatch_{name} {help}\n"));
        out.push_str(&format!("# TYPE poolwatch_{name} gauge\n"));
        out.push_str(&format!("poolwatch_{name}{{pool=\"{label}\"}} {value}\n"));
    }

    out.push_str("# HELP poolwatch_usage_ratio Active connections over the ceiling (0.0-1.0).\n");
    out.push_str("# TYPE poolwatch_usage_ratio gauge\n");
    out.push_str(&format!(
        "poolwatch_usage_ratio{{pool=\"{label}\"}} {:.4}\n",
        stats.usage_percent() / 100.0
    ));

    let counters: [(&str, &str, u64); 5] = [
        ("acquired", "Connections handed to callers.", stats.stats.acquired),
        ("released", "Connections given back by callers.", stats.stats.released),
        ("created", "Physical connections opened.", stats.stats.created),
        ("removed", "Physical connections closed.", stats.stats.removed),
        ("slow_queries", "Queries slower than the threshold.", slow_queries),
    ];
    for (name, help, value) in counters {
        out.push_str(&format!("# HELP poolwatch_{name}_total {help}\n"));
        out.push_str(&format!("# TYPE poolwatch_{name}_total counter\n"));
        out.push_str(&format!(
            "poolwatch_{name}_total{{pool=\"{label}\"}} {value}\n"
        ));
    }

    out
}

/// Render the outcome of a health check as a 0/1 gauge.
pub fn render_up(pool: &str, healthy: bool) -> String {
    format!(
        "# HELP poolwatch_up Whether the last health check succeeded.\n\
         # TYPE poolwatch_up gauge\n\
         poolwatch_up{{pool=\"{}\"}} {}\n",
        escape_label(pool),
        u8::from(healthy)
    )
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
