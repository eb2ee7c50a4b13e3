use crate::settings::{build_router, Settings};
use cascade_core::{RouteError, Router};
use cascade_telemetry::{Paths, QueryTrace};
use std::time::Duration;

pub async fn run(query: &str, json: bool, deadline_ms: Option<u64>) -> anyhow::Result<()> {
    let paths = Paths::new()?;
    let settings = Settings::load(&paths)?;
    let router = build_router(&paths, &settings)?;

    let trace = route_once(&router, query, deadline_ms).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&trace)?);
    } else {
        println!("{}", render_trace(&trace));
    }
    Ok(())
}

pub async fn route_once(
    router: &Router,
    query: &str,
    deadline_ms: Option<u64>,
) -> Result<QueryTrace, RouteError> {
    match deadline_ms {
        Some(ms) => router.route_with_deadline(query, Duration::from_millis(ms)).await,
        None => router.route(query).await,
    }
}

/// Human-readable trace: answer, then one line per decision
pub fn render_trace(trace: &QueryTrace) -> String {
    let mut out = vec![
        format!("Query {}  {}", trace.id(), trace.timestamp().to_rfc3339()),
        format!("  \"{}\"", trace.user_message()),
        format!(
            "Routed by {} in {:.1}ms, cost ${:.6}",
            trace.routing_layer(),
            trace.response_ms(),
            trace.total_cost()
        ),
        String::new(),
        trace.response_answer().to_string(),
        String::new(),
        "Decisions:".to_string(),
    ];

    for d in trace.decisions() {
        let marker = match (d.triggered, d.degraded) {
            (_, true) => "!",
            (true, false) => "✓",
            (false, false) => " ",
        };
        out.push(format!(
            "  {marker} {:<16} {:<26} {:.2} {} {:.2}  {:>7.1}ms  {}",
            d.layer.as_str(),
            d.rule,
            d.score,
            d.comparison.symbol(),
            d.threshold,
            d.execution_ms,
            d.decision
        ));
    }

    if !trace.sources().is_empty() {
        out.push("Sources:".to_string());
        for s in trace.sources() {
            out.push(format!("  {} ({:?}, {:.2})", s.id, s.kind, s.score));
        }
    }
    out.join("\n")
}
