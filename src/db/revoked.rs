//! Revoked-run bookkeeping.
//!
//! A revocation outlives the queue message it targets: workers consult the
//! table before running a delivery and while it runs. Rows older than the
//! caller's time-to-live are ignored on read and removed by
//! [`prune_revocations`](super::Db::prune_revocations).

use std::time::Duration;

use crate::error::Result;
use crate::model::RunId;

impl super::Db {
    /// Record a revocation. A terminate flag, once set, stays set.
    pub async fn revoke_run(&self, run_id: &RunId, terminate: bool) -> Result<()> {
        sqlx::query(
            "INSERT INTO revoked_runs (run_id, terminate) VALUES ($1, $2) \
             ON CONFLICT (run_id) DO UPDATE \
             SET terminate = revoked_runs.terminate OR EXCLUDED.terminate, revoked_at = now()",
        )
        .bind(run_id.as_str())
        .bind(terminate)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The terminate flag of a run revoked within `ttl`, or `None`.
    pub async fn run_revocation(&self, run_id: &RunId, ttl: Duration) -> Result<Option<bool>> {
        let row: Option<(bool,)> = sqlx::query_as(
            "SELECT terminate FROM revoked_runs \
             WHERE run_id = $1 AND revoked_at > now() - make_interval(secs => $2)",
        )
        .bind(run_id.as_str())
        .bind(ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(terminate,)| terminate))
    }

    /// Delete revocations older than `ttl`. Returns how many were removed.
    pub async fn prune_revocations(&self, ttl: Duration) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM revoked_runs WHERE revoked_at <= now() - make_interval(secs => $1)",
        )
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
