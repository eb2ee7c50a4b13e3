use crate::settings::Settings;
use anyhow::Context;
use cascade_telemetry::{
    Charge, CostAccumulator, CostSnapshot, LayerId, Paths, Pricing, QueryTrace, RouterStats,
    TraceRecorder,
};
use serde::Serialize;
use std::path::Path;

/// Share of queries the deterministic layers should answer
const DETERMINISTIC_TARGET: f64 = 0.7;
/// Ceiling on queries reaching retrieval or handoff
const FALLBACK_TARGET: f64 = 0.3;

#[derive(Debug, Serialize)]
struct Report {
    stats: RouterStats,
    costs: CostSnapshot,
    deterministic_share: f64,
    fallback_share: f64,
    average_cost_per_query: f64,
}

pub fn run(json: bool) -> anyhow::Result<()> {
    let paths = Paths::new()?;
    let settings = Settings::load(&paths)?;

    let report = report_from_journal(&paths.traces_file(), &settings)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", render(&report));
    }
    Ok(())
}

/// Stats and costs from one read of the journal, over the same valid traces
fn report_from_journal(journal: &Path, settings: &Settings) -> anyhow::Result<Report> {
    let traces = TraceRecorder::read_journal(journal)
        .with_context(|| format!("reading {}", journal.display()))?;
    let recorder = TraceRecorder::from_traces(traces.iter().cloned(), settings.retention);
    Ok(build_report(recorder.stats(), &traces, settings.pricing))
}

/// Re-price every journaled decision under the current pricing
fn replay_costs(traces: &[QueryTrace], pricing: Pricing) -> CostSnapshot {
    let costs = CostAccumulator::new(pricing);
    for trace in traces {
        for decision in trace.decisions() {
            if !decision.usage.is_zero() && !decision.layer.is_deterministic() {
                costs.charge(decision.layer, Charge::Tokens(decision.usage));
            }
        }
    }
    costs.snapshot()
}

fn build_report(stats: RouterStats, traces: &[QueryTrace], pricing: Pricing) -> Report {
    let costs = replay_costs(traces, pricing);
    Report {
        deterministic_share: stats.deterministic_share(),
        fallback_share: stats.fallback_share(),
        average_cost_per_query: costs.average_per_query(stats.total_queries),
        stats,
        costs,
    }
}

fn against_target(value: f64, target: f64, at_least: bool) -> &'static str {
    let ok = if at_least { value >= target } else { value <= target };
    if ok {
        "on target"
    } else {
        "off target"
    }
}

fn render(report: &Report) -> String {
    let stats = &report.stats;
    if stats.total_queries == 0 {
        return "No queries recorded yet.".to_string();
    }

    let mut sections = vec![format!(
        "Routing Report\n==============\n\
         Total queries: {}\n\
         Deterministic share: {:.1}% (target ≥{:.0}%, {})\n\
         Fallback share: {:.1}% (target ≤{:.0}%, {})\n\
         Degraded queries: {} ({:.1}%)\n\
         Latency: avg {:.1}ms, p95 {:.1}ms",
        stats.total_queries,
        report.deterministic_share * 100.0,
        DETERMINISTIC_TARGET * 100.0,
        against_target(report.deterministic_share, DETERMINISTIC_TARGET, true),
        report.fallback_share * 100.0,
        FALLBACK_TARGET * 100.0,
        against_target(report.fallback_share, FALLBACK_TARGET, false),
        stats.degraded_queries,
        stats.error_rate() * 100.0,
        stats.avg_response_ms,
        stats.p95_response_ms,
    )];

    let mut layers = vec!["\nLayers\n------".to_string()];
    for id in LayerId::ORDER {
        let Some(layer) = stats.layers.get(&id) else {
            continue;
        };
        let cost = report.costs.get(id);
        layers.push(format!(
            "  {:<16} evaluated {:>5}  answered {:>5}  avg {:>7.1}ms  errors {:>5.1}%  cost ${:.6}",
            id.as_str(),
            layer.evaluations,
            layer.terminations,
            layer.avg_execution_ms(),
            layer.error_rate() * 100.0,
            cost.total_cost,
        ));
    }
    sections.push(layers.join("\n"));

    let tokens = report.costs.total_tokens();
    sections.push(format!(
        "\nCost\n----\n\
         Total: ${:.6} over {} calls\n\
         Per query: ${:.6}\n\
         Tokens: {} embedding, {} completion in, {} completion out",
        report.costs.total_cost(),
        report.costs.total_calls(),
        report.average_cost_per_query,
        tokens.embedding_tokens,
        tokens.completion_input_tokens,
        tokens.completion_output_tokens,
    ));

    if !stats.refusals.is_empty() {
        let mut refusals = vec!["\nSafety refusals\n---------------".to_string()];
        for (rule, count) in &stats.refusals {
            refusals.push(format!("  {rule:<26} {count}"));
        }
        sections.push(refusals.join("\n"));
    }

    sections.join("\n")
}
