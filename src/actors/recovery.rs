//! Recovery actor: re-evaluates governance health on a fixed tick so a
//! backlog is flushed once latency recovers, even when no agent is sending.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::{Config, DEFAULT_RECOVERY_INTERVAL_MS};
use crate::governance::GovernanceController;
use crate::{hlog, hlog_debug, hlog_trace};

use super::ActorHandle;

const RECOVERY_INTERVAL: Duration = Duration::from_millis(DEFAULT_RECOVERY_INTERVAL_MS);

pub struct RecoveryActor {
    controller: Arc<GovernanceController>,
    interval: Duration,
}

impl RecoveryActor {
    pub fn new(controller: Arc<GovernanceController>) -> Self {
        Self {
            controller,
            interval: RECOVERY_INTERVAL,
        }
    }

    /// Tick at the configured `recovery_interval_ms`.
    pub fn from_config(controller: Arc<GovernanceController>, config: &Config) -> Self {
        Self::new(controller).with_interval(config.recovery_interval())
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn spawn(self) -> ActorHandle {
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        hlog_debug!("RecoveryActor::spawn interval={:?}", self.interval);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);

            loop {
                tokio::select! {
                    _ = cancel_clone.cancelled() => {
                        hlog_debug!("RecoveryActor cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        let evaluation = self.controller.evaluate().await;
                        hlog_trace!(
                            "RecoveryActor tick: mode={} reason={}",
                            evaluation.mode,
                            evaluation.decision.reason
                        );
                        if !evaluation.recovered.is_empty() {
                            hlog!(
                                "RecoveryActor flushed {} agent backlog(s)",
                                evaluation.recovered.len()
                            );
                        }
                    }
                }
            }
        });

        ActorHandle::new(cancel)
    }
}
