use clap::Parser;
use ironlog::cli::Cli;
use ironlog::logging::init_logging;
use std::process;
use tracing::error;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli.log_config()) {
        eprintln!("Warning: logging disabled: {e}");
    }

    if let Err(e) = execute(cli) {
        error!(error = %e, "conversion failed");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn execute(cli: Cli) -> anyhow::Result<()> {
    let run = cli.into_run()?;
    let metrics = run.pipeline.run()?;
    println!("completed in {:.2} seconds", metrics.elapsed.as_secs_f64());
    metrics.print();
    if let Some(path) = run.metrics_out {
        metrics.save_to_file(&path)?;
    }
    Ok(())
}
