use {
    futures::{StreamExt, stream},
    serde::Serialize,
    tracing::{info, warn},
};

use crate::{
    client::PersistedSession,
    registry::{RegistryError, SessionRegistry},
};

/// Aggregate result of a startup reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub total: usize,
    pub registered: usize,
    pub connected: usize,
    /// Registered but never paired, so not connected.
    pub skipped: usize,
    pub failed: usize,
}

enum Outcome {
    Connected,
    Skipped,
    Failed { registered: bool },
}

impl SessionRegistry {
    /// Re-register every persisted session and try to reconnect it.
    ///
    /// Routing records are first marked inactive; connections that come up
    /// re-activate theirs. One device failing does not stop the others.
    pub async fn reconcile(&self) -> Result<ReconcileReport, RegistryError> {
        let persisted = self.factory().persisted_sessions().await?;
        if let Err(e) = self.routing().mark_all_inactive().await {
            warn!(error = %e, "failed to reset routing records before reconcile");
        }

        let outcomes: Vec<Outcome> = stream::iter(persisted)
            .map(|session| self.reconcile_one(session))
            .buffer_unordered(self.reconcile_concurrency)
            .collect()
            .await;

        let mut report = ReconcileReport {
            total: outcomes.len(),
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome {
                Outcome::Connected => {
                    report.registered += 1;
                    report.connected += 1;
                },
                Outcome::Skipped => {
                    report.registered += 1;
                    report.skipped += 1;
                },
                Outcome::Failed { registered } => {
                    report.registered += usize::from(registered);
                    report.failed += 1;
                },
            }
        }

        info!(
            total = report.total,
            registered = report.registered,
            connected = report.connected,
            skipped = report.skipped,
            failed = report.failed,
            "session reconciliation finished"
        );
        Ok(report)
    }

    async fn reconcile_one(&self, session: PersistedSession) -> Outcome {
        let key = session.key;
        if let Err(e) = self.init(key.clone(), session.identity).await {
            warn!(session = %key, error = %e, "failed to register persisted session");
            return Outcome::Failed { registered: false };
        }
        match self.connect(&key).await {
            Ok(()) => Outcome::Connected,
            Err(RegistryError::NoIdentity(_)) => Outcome::Skipped,
            Err(e) => {
                warn!(session = %key, error = %e, "failed to reconnect persisted session");
                Outcome::Failed { registered: true }
            },
        }
    }
}
