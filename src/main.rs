use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use rust_dsg_lcd::config::LcdConfig;
use rust_dsg_lcd::io::GraphFile;
use rust_dsg_lcd::loop_closing::SolverRegistry;
use rust_dsg_lcd::timing::TimingLog;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let graph_path = args
        .next()
        .unwrap_or_else(|| "data/lcd_graph.yaml".to_string());
    let config = match args.next() {
        Some(path) => LcdConfig::load(&path)?,
        None => LcdConfig::default(),
    };

    println!("Loading scene graph from: {}", graph_path);
    let loaded = GraphFile::load(&graph_path)?;

    // No external frame matcher is wired up from the command line.
    let timings = Arc::new(TimingLog::new());
    let registry = SolverRegistry::from_config(&config, None, Some(timings.clone()));

    let mut num_valid = 0;
    for (i, candidate) in loaded.candidates.iter().enumerate() {
        let solution = registry.solve(
            candidate.layer,
            &loaded.graph,
            &candidate.input,
            candidate.query_agent_id,
        );

        if solution.valid {
            num_valid += 1;
            println!(
                "[{}] {} {} -> {}: {}",
                i,
                candidate.layer,
                solution.from_id.symbol(),
                solution.to_id.symbol(),
                solution.to_t_from
            );
        } else {
            println!(
                "[{}] {} query {} vs root {}: invalid",
                i,
                candidate.layer,
                candidate.query_agent_id.symbol(),
                candidate.input.match_root.symbol()
            );
        }
    }

    println!(
        "{} of {} candidates registered",
        num_valid,
        loaded.candidates.len()
    );

    let records = timings.records();
    if !records.is_empty() {
        let total_ms: f64 = records.iter().map(|r| r.elapsed_ms()).sum();
        println!(
            "Registration time: {:.3} ms total, {:.3} ms mean",
            total_ms,
            total_ms / records.len() as f64
        );
    }

    Ok(())
}
