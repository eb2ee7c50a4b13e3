use super::route::route_once;
use crate::settings::{build_router, Settings};
use cascade_core::{RouteError, Router};
use cascade_telemetry::{LayerId, Paths, QueryTrace};
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

pub async fn run(file: Option<&Path>, concurrency: usize, deadline_ms: Option<u64>) -> anyhow::Result<()> {
    let input = match file {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let queries = parse_queries(&input);

    let paths = Paths::new()?;
    let settings = Settings::load(&paths)?;
    let router = build_router(&paths, &settings)?;

    let results = route_all(&router, &queries, concurrency, deadline_ms).await;
    let summary = Summary::from_results(&results);

    for (query, result) in queries.iter().zip(&results) {
        match result {
            Ok(trace) => println!("{:<16} {}", trace.routing_layer().as_str(), query),
            Err(e) => println!("{:<16} {}  ({e})", "error", query),
        }
    }
    println!("\n{}", summary.render());
    Ok(())
}

/// Non-blank lines that are not `#` comments
fn parse_queries(input: &str) -> Vec<String> {
    input
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(String::from)
        .collect()
}

/// Route every query with at most `concurrency` in flight; results keep input order
pub async fn route_all(
    router: &Router,
    queries: &[String],
    concurrency: usize,
    deadline_ms: Option<u64>,
) -> Vec<Result<QueryTrace, RouteError>> {
    stream::iter(queries)
        .map(|q| route_once(router, q, deadline_ms))
        .buffered(concurrency.max(1))
        .collect()
        .await
}

#[derive(Debug, Default, PartialEq)]
struct Summary {
    routed: usize,
    failed: usize,
    by_layer: BTreeMap<LayerId, usize>,
    total_cost: f64,
}

impl Summary {
    fn from_results(results: &[Result<QueryTrace, RouteError>]) -> Self {
        let mut summary = Self::default();
        for result in results {
            match result {
                Ok(trace) => {
                    summary.routed += 1;
                    *summary.by_layer.entry(trace.routing_layer()).or_default() += 1;
                    summary.total_cost += trace.total_cost();
                }
                Err(_) => summary.failed += 1,
            }
        }
        summary
    }

    fn render(&self) -> String {
        let mut lines = vec![format!(
            "Routed {} queries ({} failed), total cost ${:.6}",
            self.routed, self.failed, self.total_cost
        )];
        for (layer, count) in &self.by_layer {
            lines.push(format!("  {:<16} {}", layer.as_str(), count));
        }
        lines.join("\n")
    }
}
