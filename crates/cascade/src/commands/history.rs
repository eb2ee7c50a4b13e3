use super::route::render_trace;
use crate::settings::{open_recorder, Settings};
use cascade_telemetry::{Paths, QueryTrace};

pub fn run(limit: usize, id: Option<&str>) -> anyhow::Result<()> {
    let paths = Paths::new()?;
    let settings = Settings::load(&paths)?;
    let recorder = open_recorder(&paths, settings.retention)?;

    if let Some(id) = id {
        match recorder.get(id) {
            Some(trace) => println!("{}", render_trace(&trace)),
            None => anyhow::bail!("no retained trace with id {id}"),
        }
        return Ok(());
    }

    let traces = recorder.recent(limit);
    if traces.is_empty() {
        println!("No query history");
        return Ok(());
    }
    for trace in &traces {
        println!("{}", summary_line(trace));
    }
    Ok(())
}

fn summary_line(trace: &QueryTrace) -> String {
    let degraded = if trace.decisions().iter().any(|d| d.degraded) {
        " [degraded]"
    } else {
        ""
    };
    format!(
        "{}  {}  {:<16} {:>7.1}ms  ${:.6}  {}{}",
        trace.timestamp().format("%Y-%m-%d %H:%M:%S"),
        trace.id().chars().take(8).collect::<String>(),
        trace.routing_layer().as_str(),
        trace.response_ms(),
        trace.total_cost(),
        trace.user_message(),
        degraded
    )
}
