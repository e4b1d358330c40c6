// CLMM LP Bot
// Replay entry point: load a controller config, drive it with a scripted
// snapshot file, dump the decision log.

use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use tracing::{info, Level};

use clmm_lp_bot::replay::{run_replay, ScriptedSource};
use clmm_lp_bot::{load_config, Controller};

#[derive(Parser, Debug)]
#[command(name = "clmm-lp-bot", about = "CLMM LP decision core replay runner")]
struct Args {
    /// Controller config (TOML); falls back to CLMM_LP_CONFIG
    #[arg(short, long, env = "CLMM_LP_CONFIG")]
    config: Option<PathBuf>,

    /// Scripted snapshot file (JSON array of snapshots)
    #[arg(short, long)]
    replay: PathBuf,

    /// v3 tick spacing / DLMM bin step, normally resolved from pool info
    #[arg(long)]
    tick_spacing: Option<i64>,

    /// Write the full decision log to this file (JSON)
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .init();

    let started_at = Utc::now();
    info!("CLMM LP Bot replay starting at {}", started_at.to_rfc3339());

    let config = load_config(args.config.as_deref())?;
    info!(
        "controller {} | {} on {:?} | budget {} quote",
        config.id, config.trading_pair, config.venue, config.position_value_quote
    );

    let mut controller = Controller::new(config)?;
    if let Some(tick_spacing) = args.tick_spacing {
        controller.set_tick_spacing(tick_spacing);
    }

    let mut source = ScriptedSource::from_file(&args.replay)?;
    info!("loaded {} snapshots from {}", source.len(), args.replay.display());

    let mut ctx = controller.new_context();
    let report = run_replay(&controller, &mut ctx, &mut source).await;

    info!(
        "replay done: {} ticks, {} actions, final state {}, realized pnl {}",
        report.ticks, report.actions_emitted, report.final_state, ctx.realized_pnl_quote
    );

    if let Some(out) = args.out {
        std::fs::write(&out, serde_json::to_string_pretty(&report)?)?;
        info!("decision log written to {}", out.display());
    }

    Ok(())
}
