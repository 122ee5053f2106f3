//! Journal replay.
//!
//! Replay walks pending journal entries in `seq` order and settles each one
//! against the authoritative store: fetch the remote row, classify, then
//! apply, skip, or record a conflict. Entries line up behind an unresolved
//! conflict on the same record so per-record order is never violated.
//!
//! Transport failures stop the cycle: the failing entry is marked failed and
//! everything behind it stays pending for the next cycle. Data failures
//! (validation, constraints) never stop the cycle; unrelated records make
//! progress independently.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use tillsync_model::{FieldMap, MutationKind};
use tillsync_protocol::{
    classify_replay, BatchApplyRequest, BatchEntry, ConflictKind, EntryOutcome, JournalEntry,
    OutcomeStatus, ReplayDecision, Resolution, SyncConflict,
};

use crate::config::ApplyMode;
use crate::engine::SyncEngine;
use crate::error::{EngineError, EngineResult};
use crate::remote::RemoteStore;

/// Counters from one replay cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Entries the cycle attempted (marked syncing).
    pub attempted: u64,
    /// Entries that reached `synced`, including auto-resolved conflicts.
    pub synced: u64,
    /// Entries that failed and await a retry.
    pub failed: u64,
    /// Conflicts left open for an operator.
    pub conflicts: u64,
    /// Conflicts resolved automatically by policy.
    pub auto_resolved: u64,
    /// Entries skipped because an earlier conflict blocks their record.
    pub skipped: u64,
    /// True when the cycle ended before draining the queue.
    pub stopped_early: bool,
    /// Wall-clock duration of the cycle.
    pub duration: Duration,
}

/// True for errors that make further remote calls pointless this cycle.
fn halts_cycle(err: &EngineError) -> bool {
    err.is_transport() || matches!(err, EngineError::Unauthorized(_))
}

impl<R: RemoteStore> SyncEngine<R> {
    /// Runs one replay cycle.
    ///
    /// Only one cycle runs at a time; a second caller gets
    /// [`EngineError::ReplayInProgress`] instead of blocking. Asking for a
    /// cycle asserts connectivity, so a previously offline engine goes back
    /// online before the first entry is attempted.
    pub fn trigger_sync(&self) -> EngineResult<SyncReport> {
        let Some(_guard) = self.replay_gate.try_lock() else {
            return Err(EngineError::ReplayInProgress);
        };
        self.connectivity.set_online(true);

        let report = self.run_cycle()?;

        let mut node = self.node.write();
        node.record_sync(Utc::now());
        self.local.save_node(&node)?;
        Ok(report)
    }

    fn run_cycle(&self) -> EngineResult<SyncReport> {
        let start = Instant::now();
        let mut report = SyncReport::default();

        let entries = self.local.pending_entries(None)?;
        if entries.is_empty() {
            debug!("journal drained, nothing to replay");
            report.duration = start.elapsed();
            return Ok(report);
        }

        info!(
            pending = entries.len(),
            mode = ?self.config.apply_mode,
            "starting replay cycle"
        );
        let deadline = self.config.cycle_deadline.map(|budget| start + budget);
        match self.config.apply_mode {
            ApplyMode::PerEntry => self.replay_per_entry(entries, deadline, &mut report)?,
            ApplyMode::Batch => self.replay_batched(entries, deadline, &mut report)?,
        }

        report.duration = start.elapsed();
        info!(
            synced = report.synced,
            failed = report.failed,
            conflicts = report.conflicts,
            auto_resolved = report.auto_resolved,
            skipped = report.skipped,
            stopped_early = report.stopped_early,
            "replay cycle finished"
        );
        Ok(report)
    }

    fn budget_exhausted(&self, deadline: Option<Instant>, attempted: u64) -> bool {
        if deadline.is_some_and(|at| Instant::now() >= at) {
            return true;
        }
        self.config
            .max_entries_per_cycle
            .is_some_and(|max| attempted >= max as u64)
    }

    fn is_blocked(
        &self,
        entry: &JournalEntry,
        blocked: &BTreeSet<(String, String)>,
    ) -> EngineResult<bool> {
        let key = (entry.table.clone(), entry.record_id.as_str().to_string());
        if blocked.contains(&key) {
            return Ok(true);
        }
        Ok(self
            .local
            .has_unresolved_conflict(&entry.table, &entry.record_id, Some(&entry.id))?)
    }

    fn replay_per_entry(
        &self,
        entries: Vec<JournalEntry>,
        deadline: Option<Instant>,
        report: &mut SyncReport,
    ) -> EngineResult<()> {
        let mut blocked: BTreeSet<(String, String)> = BTreeSet::new();

        for entry in entries {
            if self.budget_exhausted(deadline, report.attempted) {
                report.stopped_early = true;
                break;
            }
            if self.is_blocked(&entry, &blocked)? {
                debug!(
                    entry = %entry.id,
                    table = %entry.table,
                    record = %entry.record_id.as_str(),
                    "skipping entry behind an unresolved conflict"
                );
                report.skipped += 1;
                continue;
            }

            report.attempted += 1;
            self.local.mark_syncing(&entry.id, Utc::now())?;

            if !entry.verify_checksum() {
                warn!(entry = %entry.id, "journal payload failed checksum verification");
                self.local
                    .mark_failed(&entry.id, "payload checksum mismatch", Utc::now())?;
                report.failed += 1;
                continue;
            }

            let remote_row = match self.remote.select_one(&entry.table, &entry.record_id) {
                Ok(row) => row,
                Err(err) => {
                    self.stop_for_transport(&entry, &err, report)?;
                    break;
                }
            };

            let decision = classify_replay(
                entry.operation,
                &entry.payload,
                entry.created_at,
                remote_row.as_ref(),
            );
            match decision {
                ReplayDecision::Apply => match self.apply_entry(&entry) {
                    Ok(applied) => self.finish_synced(&entry, applied, report)?,
                    Err(EngineError::ConstraintViolation(detail)) => {
                        self.open_conflict(
                            &entry,
                            ConflictKind::Constraint,
                            remote_row,
                            Some(detail),
                            report,
                            &mut blocked,
                        )?;
                    }
                    Err(err) if halts_cycle(&err) => {
                        self.stop_for_transport(&entry, &err, report)?;
                        break;
                    }
                    Err(err) => {
                        warn!(entry = %entry.id, error = %err, "replay apply failed");
                        self.local
                            .mark_failed(&entry.id, &err.to_string(), Utc::now())?;
                        report.failed += 1;
                    }
                },
                ReplayDecision::AlreadyApplied => {
                    debug!(entry = %entry.id, "remote row already reflects this entry");
                    self.finish_synced(&entry, remote_row, report)?;
                }
                ReplayDecision::Conflict(kind) => {
                    self.open_conflict(&entry, kind, remote_row, None, report, &mut blocked)?;
                }
            }
        }
        Ok(())
    }

    fn replay_batched(
        &self,
        entries: Vec<JournalEntry>,
        deadline: Option<Instant>,
        report: &mut SyncReport,
    ) -> EngineResult<()> {
        let batch_size = self.config.batch_size.max(1);
        let mut blocked: BTreeSet<(String, String)> = BTreeSet::new();
        let mut iter = entries.into_iter();

        loop {
            let mut batch: Vec<JournalEntry> = Vec::new();
            let mut out_of_budget = false;
            for entry in iter.by_ref() {
                if self.budget_exhausted(deadline, report.attempted + batch.len() as u64) {
                    out_of_budget = true;
                    break;
                }
                if self.is_blocked(&entry, &blocked)? {
                    report.skipped += 1;
                    continue;
                }
                if !entry.verify_checksum() {
                    warn!(entry = %entry.id, "journal payload failed checksum verification");
                    self.local.mark_syncing(&entry.id, Utc::now())?;
                    self.local
                        .mark_failed(&entry.id, "payload checksum mismatch", Utc::now())?;
                    report.attempted += 1;
                    report.failed += 1;
                    continue;
                }
                batch.push(entry);
                if batch.len() == batch_size {
                    break;
                }
            }

            if batch.is_empty() {
                report.stopped_early |= out_of_budget;
                return Ok(());
            }

            for entry in &batch {
                self.local.mark_syncing(&entry.id, Utc::now())?;
            }
            report.attempted += batch.len() as u64;

            let request = BatchApplyRequest {
                store_id: self.config.store_id.clone(),
                origin_node_id: self.node.read().id.clone(),
                entries: batch.iter().map(BatchEntry::from_entry).collect(),
            };
            let response = match self.remote.apply_batch(&request) {
                Ok(response) => response,
                Err(err) => {
                    let reverted = self.local.reset_interrupted()?;
                    warn!(
                        error = %err,
                        reverted,
                        "batch apply failed, returning in-flight entries to pending"
                    );
                    if err.is_transport() {
                        self.connectivity.set_online(false);
                    }
                    report.stopped_early = true;
                    return Ok(());
                }
            };

            self.fold_outcomes(&batch, &response.outcomes, report, &mut blocked)?;

            if out_of_budget {
                report.stopped_early = true;
                return Ok(());
            }
        }
    }

    fn fold_outcomes(
        &self,
        batch: &[JournalEntry],
        outcomes: &[EntryOutcome],
        report: &mut SyncReport,
        blocked: &mut BTreeSet<(String, String)>,
    ) -> EngineResult<()> {
        let by_id: BTreeMap<&str, &JournalEntry> =
            batch.iter().map(|entry| (entry.id.as_str(), entry)).collect();

        for outcome in outcomes {
            let Some(entry) = by_id.get(outcome.entry_id.as_str()).copied() else {
                warn!(entry = %outcome.entry_id, "batch outcome references an unknown entry");
                continue;
            };
            match outcome.status {
                OutcomeStatus::Synced => {
                    self.finish_synced(entry, outcome.remote_snapshot.clone(), report)?;
                }
                OutcomeStatus::Failed => {
                    let message = outcome
                        .error
                        .clone()
                        .unwrap_or_else(|| "batch apply rejected the entry".to_string());
                    self.local.mark_failed(&entry.id, &message, Utc::now())?;
                    report.failed += 1;
                }
                OutcomeStatus::Conflict => {
                    let kind = outcome.conflict.unwrap_or(ConflictKind::Version);
                    self.open_conflict(
                        entry,
                        kind,
                        outcome.remote_snapshot.clone(),
                        outcome.error.clone(),
                        report,
                        blocked,
                    )?;
                }
            }
        }

        // Entries the server returned no verdict for go back to pending.
        let unanswered = self.local.reset_interrupted()?;
        if unanswered > 0 {
            warn!(unanswered, "batch response omitted entries, returned to pending");
        }
        Ok(())
    }

    /// Applies a clean (non-conflicting) entry to the remote store.
    fn apply_entry(&self, entry: &JournalEntry) -> EngineResult<Option<FieldMap>> {
        match entry.operation {
            MutationKind::Insert => Ok(Some(
                self.remote.insert(&entry.table, &entry.payload)?,
            )),
            MutationKind::Update => Ok(Some(self.remote.update(
                &entry.table,
                &entry.record_id,
                &entry.payload,
            )?)),
            MutationKind::Delete => {
                self.remote.delete(&entry.table, &entry.record_id)?;
                Ok(None)
            }
        }
    }

    /// Marks an entry synced, supersedes any stale conflict it carried, and
    /// mirrors the applied state into the cache.
    fn finish_synced(
        &self,
        entry: &JournalEntry,
        row: Option<FieldMap>,
        report: &mut SyncReport,
    ) -> EngineResult<()> {
        self.local.mark_synced(&entry.id)?;
        if self
            .local
            .resolve_conflicts_for_entry(&entry.id, Resolution::LocalWins, "replay", Utc::now())?
        {
            debug!(entry = %entry.id, "clean replay superseded the entry's earlier conflict");
        }
        self.mirror_replayed(entry, row);
        report.synced += 1;
        Ok(())
    }

    fn mirror_replayed(&self, entry: &JournalEntry, row: Option<FieldMap>) {
        let outcome = match (entry.operation, row) {
            (MutationKind::Delete, _) => self
                .local
                .remove(&entry.table, &entry.record_id)
                .map(|_| ()),
            (_, Some(row)) => self
                .local
                .upsert(&entry.table, &entry.record_id, row)
                .map(|_| ()),
            (_, None) => Ok(()),
        };
        if let Err(err) = outcome {
            warn!(entry = %entry.id, error = %err, "failed to mirror replayed row into cache");
        }
    }

    /// Marks the entry failed and ends the cycle.
    fn stop_for_transport(
        &self,
        entry: &JournalEntry,
        err: &EngineError,
        report: &mut SyncReport,
    ) -> EngineResult<()> {
        warn!(entry = %entry.id, error = %err, "transport failure, stopping replay cycle");
        self.local
            .mark_failed(&entry.id, &err.to_string(), Utc::now())?;
        report.failed += 1;
        report.stopped_early = true;
        if err.is_transport() {
            self.connectivity.set_online(false);
        }
        Ok(())
    }

    /// Records a conflict for the entry and tries policy auto-resolution.
    fn open_conflict(
        &self,
        entry: &JournalEntry,
        kind: ConflictKind,
        remote_snapshot: Option<FieldMap>,
        detail: Option<String>,
        report: &mut SyncReport,
        blocked: &mut BTreeSet<(String, String)>,
    ) -> EngineResult<()> {
        let conflict = SyncConflict::new(
            entry.id.clone(),
            kind,
            entry.table.clone(),
            entry.record_id.clone(),
            entry.payload.clone(),
            remote_snapshot,
        );
        let stored = self.local.record_conflict(&conflict)?;
        self.local.mark_conflict(&entry.id)?;
        info!(
            conflict = %stored.id,
            kind = ?kind,
            table = %entry.table,
            record = %entry.record_id.as_str(),
            detail = detail.as_deref().unwrap_or(""),
            "replay conflict recorded"
        );

        if let Some(resolution) = self.config.auto_resolution.resolution() {
            match self.auto_resolve(&stored, entry, resolution) {
                Ok(()) => {
                    report.auto_resolved += 1;
                    report.synced += 1;
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        conflict = %stored.id,
                        error = %err,
                        "auto-resolution failed, leaving conflict open"
                    );
                }
            }
        }

        report.conflicts += 1;
        blocked.insert((entry.table.clone(), entry.record_id.as_str().to_string()));
        Ok(())
    }
}
