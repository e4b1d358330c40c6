//! Replay harness: drives the controller with scripted snapshots.
//!
//! Scenario files are JSON arrays of snapshots (the same shape the live
//! snapshot builder produces). Useful for dry-running a config against a
//! recorded price path before pointing the bot at a wallet.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::controller::{Controller, ControllerContext};
use crate::types::Snapshot;

/// Anything that can feed snapshots to the control loop
#[async_trait]
pub trait SnapshotSource: Send {
    async fn next_snapshot(&mut self) -> Option<Snapshot>;
}

/// Pre-recorded snapshot script
pub struct ScriptedSource {
    frames: VecDeque<Snapshot>,
}

impl ScriptedSource {
    pub fn new(frames: Vec<Snapshot>) -> Self {
        Self {
            frames: frames.into(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read replay file {}", path.display()))?;
        let frames: Vec<Snapshot> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse replay file {}", path.display()))?;
        Ok(Self::new(frames))
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[async_trait]
impl SnapshotSource for ScriptedSource {
    async fn next_snapshot(&mut self) -> Option<Snapshot> {
        self.frames.pop_front()
    }
}

/// One decision as recorded during a replay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub now: f64,
    pub state: String,
    pub reason: String,
    pub action_count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayReport {
    pub ticks: usize,
    pub actions_emitted: usize,
    pub final_state: String,
    pub decisions: Vec<DecisionRecord>,
}

/// Run every snapshot through the controller and collect the decision log
pub async fn run_replay(
    controller: &Controller,
    ctx: &mut ControllerContext,
    source: &mut dyn SnapshotSource,
) -> ReplayReport {
    let mut report = ReplayReport::default();
    while let Some(snapshot) = source.next_snapshot().await {
        let decision = controller.tick(&snapshot, ctx);
        report.ticks += 1;
        report.actions_emitted += decision.actions.len();
        report.decisions.push(DecisionRecord {
            now: snapshot.now,
            state: format!("{:?}", ctx.state),
            reason: decision.intent.reason.clone(),
            action_count: decision.actions.len(),
        });
    }
    report.final_state = format!("{:?}", ctx.state);
    info!(
        ticks = report.ticks,
        actions = report.actions_emitted,
        final_state = %report.final_state,
        "replay finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::config::PoolVenue;
    use rust_decimal_macros::dec;

    fn snapshot(now: f64) -> Snapshot {
        Snapshot {
            now,
            current_price: Some(dec!(20)),
            balance_fresh: true,
            balance_update_ts: now,
            wallet_base: dec!(0),
            wallet_quote: dec!(0),
            ..Default::default()
        }
    }

    #[test]
    fn test_scripted_source_drains_in_order() {
        let mut source = ScriptedSource::new(vec![snapshot(1.0), snapshot(2.0)]);
        assert_eq!(source.len(), 2);
        let first = tokio_test::block_on(source.next_snapshot()).unwrap();
        assert_eq!(first.now, 1.0);
        let second = tokio_test::block_on(source.next_snapshot()).unwrap();
        assert_eq!(second.now, 2.0);
        assert!(tokio_test::block_on(source.next_snapshot()).is_none());
    }

    #[test]
    fn test_replay_collects_decisions() {
        let mut config = test_config();
        config.venue = PoolVenue::Meteora;
        config.position_value_quote = dec!(200);
        let controller = Controller::new(config).unwrap();
        let mut ctx = controller.new_context();
        let mut source = ScriptedSource::new(vec![snapshot(1.0), snapshot(2.0), snapshot(3.0)]);
        let report =
            tokio_test::block_on(run_replay(&controller, &mut ctx, &mut source));
        assert_eq!(report.ticks, 3);
        assert_eq!(report.decisions.len(), 3);
        // Empty wallet: the controller idles on insufficient balance
        assert_eq!(report.final_state, "Idle");
    }

    #[test]
    fn test_snapshot_round_trips_through_json() {
        let frame = snapshot(42.0);
        let encoded = serde_json::to_string(&frame).unwrap();
        let decoded: Snapshot = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.now, 42.0);
        assert_eq!(decoded.current_price, frame.current_price);
    }
}
