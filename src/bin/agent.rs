// Rovercam soak agent
// Runs the full robot lifecycle against a live relay using the loopback
// transport engine and synthetic frames, so signaling, session handling,
// and reconnect behavior can be exercised without camera hardware.

use std::env;
use std::sync::Arc;

use rovercam::agent::Agent;
use rovercam::capture::SyntheticProvider;
use rovercam::config::AgentConfig;
use rovercam::transport::LoopbackEngine;

fn usage() -> ! {
    eprintln!("Usage: rovercam-agent [--config <path>] [--url <ws-url>] [--write-config <path>]");
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rovercam::init_logging();

    let args: Vec<String> = env::args().collect();
    let mut config_path = None;
    let mut url_override = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                config_path = Some(args.get(i).cloned().unwrap_or_else(|| usage()));
            }
            "--url" => {
                i += 1;
                url_override = Some(args.get(i).cloned().unwrap_or_else(|| usage()));
            }
            "--write-config" => {
                i += 1;
                let path = args.get(i).cloned().unwrap_or_else(|| usage());
                AgentConfig::default().save_to_file(&path)?;
                println!("Wrote default config to {}", path);
                return Ok(());
            }
            "--help" | "-h" => usage(),
            other => {
                eprintln!("Unknown argument: {}", other);
                usage();
            }
        }
        i += 1;
    }

    let mut config = match config_path {
        Some(path) => AgentConfig::load_from_file(path)?,
        None => AgentConfig::load_or_default(),
    };
    if let Some(url) = url_override {
        config.signaling.url = url;
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid config: {}", e))?;

    log::info!("{} v{} starting", rovercam::NAME, rovercam::VERSION);
    log::info!("Relay: {}", config.signaling.url);

    let agent = Arc::new(Agent::new(
        config,
        Arc::new(LoopbackEngine::new()),
        Arc::new(SyntheticProvider::new()),
    ));

    let handle = agent.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Ctrl-C received, shutting down");
            handle.shutdown();
        }
    });

    agent.run().await?;
    log::info!("Agent stopped");
    Ok(())
}
