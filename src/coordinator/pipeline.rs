// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! One pass over the stage DAG.
//!
//! Per stage: check freshness, check the credential, fan out fetches
//! through a stage-local gate with bounded retry, normalise, persist, then
//! stamp `SyncMeta`. Stages hand off through the store: members and events
//! read sections back, attendance reads events back.
//!
//! Failure handling:
//! - `Unauthorized` marks the credential expired and halts the run
//! - `TokenExpired` and `Forbidden` halt the run
//! - `StorageUnavailable` latches read-only mode and halts the run
//! - anything else fails the stage; its dependants are skipped

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::Credential;
use crate::config::RateLimitConfig;
use crate::error::SyncError;
use crate::metrics;
use crate::model::{Event, EventRef, Member, Section, SyncMeta};
use crate::normalize::merge_members;
use crate::remote::{RateGate, RemoteAdapter};
use crate::resilience::retry::{retry_remote, CancelSignal};
use crate::storage::{load_entities, put_entities, StorageError};

use super::{Stage, StageOutcome, SyncEngine, SyncEvent, SyncReport, SyncRequest, SyncStatus};

/// Errors that end the whole run rather than one stage.
fn halts_run(err: &SyncError) -> bool {
    err.is_auth_failure() || matches!(err, SyncError::Forbidden | SyncError::StorageUnavailable(_))
}

impl SyncEngine {
    pub(super) fn emit(&self, run_id: Uuid, stage: Option<Stage>, status: SyncStatus) {
        // no subscribers is fine
        let _ = self.events.send(SyncEvent { run_id, stage, status, at_ms: self.clock.now_ms() });
    }

    pub(super) async fn run_once(self: &Arc<Self>, request: &SyncRequest) -> SyncReport {
        let run_id = Uuid::new_v4();
        let started_at_ms = self.clock.now_ms();
        let plan = request.plan();

        if self.is_read_only() {
            warn!(%run_id, "Sync disabled: store is read-only");
            let err = SyncError::StorageUnavailable("store is read-only".into());
            self.emit(run_id, None, SyncStatus::Error(err.clone()));
            return SyncReport {
                run_id,
                started_at_ms,
                finished_at_ms: started_at_ms,
                stages: plan.into_iter().map(|s| (s, StageOutcome::Skipped)).collect(),
                error: Some(err),
            };
        }

        info!(%run_id, stages = ?plan, force = request.force, "Sync run started");
        self.emit(run_id, None, SyncStatus::Started);
        self.tokens.set_syncing(true);
        metrics::set_sync_active(true);

        let cancel = self.tokens.cancel_signal();
        let mut stages: Vec<(Stage, StageOutcome)> = Vec::with_capacity(plan.len());
        let mut first_error: Option<SyncError> = None;
        let mut halted = false;

        for stage in plan {
            let upstream_ok = stage.upstream().map_or(true, |up| {
                stages
                    .iter()
                    .find(|(s, _)| *s == up)
                    .map_or(true, |(_, outcome)| outcome.is_usable())
            });
            if halted || !upstream_ok {
                debug!(%run_id, %stage, "Stage skipped");
                metrics::record_stage(stage.as_str(), "skipped");
                stages.push((stage, StageOutcome::Skipped));
                continue;
            }

            self.emit(run_id, Some(stage), SyncStatus::Started);
            let timer = Instant::now();
            let outcome = match self.run_stage(run_id, stage, request, &cancel).await {
                Ok(Some(records)) => {
                    self.emit(run_id, Some(stage), SyncStatus::Completed { records });
                    StageOutcome::Synced { records }
                }
                Ok(None) => {
                    self.emit(run_id, Some(stage), SyncStatus::Completed { records: 0 });
                    StageOutcome::Fresh
                }
                Err(err) => {
                    self.record_failure(stage, &err).await;
                    self.emit(run_id, Some(stage), SyncStatus::Error(err.clone()));
                    halted = halts_run(&err);
                    first_error.get_or_insert_with(|| err.clone());
                    StageOutcome::Failed(err)
                }
            };
            metrics::record_stage(stage.as_str(), outcome.label());
            metrics::record_stage_latency(stage.as_str(), timer.elapsed());
            stages.push((stage, outcome));
        }

        self.tokens.set_syncing(false);
        metrics::set_sync_active(false);

        let report = SyncReport {
            run_id,
            started_at_ms,
            finished_at_ms: self.clock.now_ms(),
            stages,
            error: first_error,
        };
        match &report.error {
            Some(err) => {
                warn!(%run_id, error = %err, "Sync run finished with errors");
                self.emit(run_id, None, SyncStatus::Error(err.clone()));
            }
            None => {
                info!(%run_id, records = report.records(), "Sync run completed");
                self.emit(run_id, None, SyncStatus::Completed { records: report.records() });
            }
        }
        report
    }

    async fn record_failure(&self, stage: Stage, err: &SyncError) {
        metrics::record_error("engine", stage.as_str(), err.kind());
        match err {
            SyncError::Unauthorized => {
                warn!(%stage, "Backend rejected credential");
                self.tokens.mark_expired();
            }
            SyncError::StorageUnavailable(reason) => {
                error!(%stage, reason = %reason, "Storage failed, sync disabled");
                self.read_only.store(true, Ordering::Release);
                return;
            }
            e if e.is_bug() => error!(%stage, error = %e, "Stage failed"),
            e => warn!(%stage, error = %e, "Stage failed"),
        }

        let table = stage.table();
        let result: Result<(), StorageError> = async {
            let mut meta = self.store.get_meta(table).await?.unwrap_or_default();
            meta.last_error = Some(err.kind().to_string());
            self.store.set_meta(table, &meta).await
        }
        .await;
        if let Err(e) = result {
            warn!(%stage, error = %e, "Could not record stage failure");
        }
    }

    /// `Ok(None)` when fresh, else the number of records persisted.
    async fn run_stage(
        self: &Arc<Self>,
        run_id: Uuid,
        stage: Stage,
        request: &SyncRequest,
        cancel: &CancelSignal,
    ) -> Result<Option<usize>, SyncError> {
        let table = stage.table();
        let previous = self.store.get_meta(table).await?.unwrap_or_default();
        let now = self.clock.now_ms();
        // inside the window, attendance still fetches targeted events that
        // were never synced
        let mut unsynced: Option<Vec<EventRef>> = None;
        if !request.forces(stage) && previous.is_fresh(now, self.config.freshness_window_ms) {
            if stage == Stage::Attendance {
                let missing = self.unsynced_events(&request.events).await?;
                if !missing.is_empty() {
                    debug!(%stage, events = missing.len(), "Fetching attendance for unsynced events");
                    unsynced = Some(missing);
                }
            }
            if unsynced.is_none() {
                debug!(%stage, "Inside freshness window");
                return Ok(None);
            }
        }
        if self.tokens.get().is_none() {
            return Err(SyncError::TokenExpired);
        }

        let store = self.store.as_ref();
        let written = match stage {
            Stage::Sections => {
                let sections = self
                    .fan_out(run_id, stage, vec![()], cancel, |adapter, (), credential| async move {
                        adapter.get_sections(&credential).await
                    })
                    .await?;
                put_entities(store, &sections).await?
            }
            Stage::Members => {
                let sections: Vec<Section> = load_entities(store).await?;
                let today = self.clock.today();
                let fetched = self
                    .fan_out(run_id, stage, sections, cancel, move |adapter, section, credential| async move {
                        adapter.get_members(&section, &credential, today).await
                    })
                    .await?;
                let rows = self.merge_with_stored(merge_members(fetched)).await?;
                put_entities(store, &rows).await?
            }
            Stage::Events => {
                let section_ids: Vec<String> = load_entities::<Section>(store)
                    .await?
                    .into_iter()
                    .map(|s| s.id)
                    .collect();
                let events = self
                    .fan_out(run_id, stage, section_ids, cancel, |adapter, section_id, credential| async move {
                        adapter.get_events(&section_id, &credential).await
                    })
                    .await?;
                put_entities(store, &events).await?
            }
            Stage::Attendance => {
                let targets: Vec<EventRef> = match unsynced {
                    Some(missing) => missing,
                    None if request.events.is_empty() => {
                        load_entities::<Event>(store).await?.iter().map(Event::event_ref).collect()
                    }
                    None => request.events.iter().cloned().collect(),
                };
                let records = self
                    .fan_out(run_id, stage, targets, cancel, |adapter, event, credential| async move {
                        adapter.get_attendance(&event, &credential).await
                    })
                    .await?;
                put_entities(store, &records).await?
            }
        };

        // strictly increasing even when the clock has not moved
        let last_sync = previous.last_sync_ms.map_or(now, |prev| now.max(prev + 1));
        self.store
            .set_meta(table, &SyncMeta { last_sync_ms: Some(last_sync), last_error: None })
            .await?;
        metrics::record_rows_written(table.name(), written);
        if written > 0 {
            self.tokens.set_cache_present(true);
        }
        debug!(%stage, written, "Stage persisted");
        Ok(Some(written))
    }

    /// Fold freshly fetched members into their stored rows so section
    /// membership accumulates across runs.
    async fn merge_with_stored(&self, fetched: Vec<Member>) -> Result<Vec<Member>, SyncError> {
        let mut stored: HashMap<u64, Member> = load_entities::<Member>(self.store.as_ref())
            .await?
            .into_iter()
            .map(|m| (m.id, m))
            .collect();
        Ok(fetched
            .into_iter()
            .map(|member| match stored.remove(&member.id) {
                Some(mut row) => {
                    row.merge_from(member);
                    row
                }
                None => member,
            })
            .collect())
    }

    /// Fetch every item of a stage concurrently, bounded by the stage gate.
    ///
    /// Each item is retried independently under the engine's policy. The
    /// first item to fail aborts the rest. Output keeps input order.
    async fn fan_out<I, T, F, Fut>(
        self: &Arc<Self>,
        run_id: Uuid,
        stage: Stage,
        items: Vec<I>,
        cancel: &CancelSignal,
        fetch: F,
    ) -> Result<Vec<T>, SyncError>
    where
        I: Clone + Send + Sync + 'static,
        T: Send + 'static,
        F: Fn(Arc<RemoteAdapter>, I, Credential) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<T>, SyncError>> + Send + 'static,
    {
        let total = items.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let fetch = Arc::new(fetch);
        let stage_gate = Arc::new(RateGate::new(&RateLimitConfig {
            min_interval_ms: self.config.stage_delay_ms,
            max_concurrent: self.config.stage_concurrency,
        }));
        let mut join_set: JoinSet<(usize, Result<Vec<T>, SyncError>)> = JoinSet::new();

        for (index, item) in items.into_iter().enumerate() {
            let engine = Arc::clone(self);
            let fetch = Arc::clone(&fetch);
            let gate = Arc::clone(&stage_gate);
            let cancel = cancel.clone();

            join_set.spawn(async move {
                let policy = engine.config.retry.clone();
                let result = retry_remote(stage.as_str(), &policy, Some(cancel), || {
                    let engine = Arc::clone(&engine);
                    let fetch = Arc::clone(&fetch);
                    let gate = Arc::clone(&gate);
                    let item = item.clone();
                    async move {
                        let _slot = gate.acquire().await?;
                        let credential = engine.tokens.get().ok_or(SyncError::TokenExpired)?;
                        fetch(Arc::clone(&engine.adapter), item, credential).await
                    }
                })
                .await;
                (index, result)
            });
        }

        let mut batches: Vec<(usize, Vec<T>)> = Vec::with_capacity(total);
        while let Some(joined) = join_set.join_next().await {
            let (index, result) = joined
                .map_err(|e| SyncError::NetworkUnavailable(format!("fetch task failed: {}", e)))?;
            match result {
                Ok(batch) => {
                    batches.push((index, batch));
                    self.emit(run_id, Some(stage), SyncStatus::Progress { done: batches.len(), total });
                }
                Err(err) => {
                    join_set.abort_all();
                    return Err(err);
                }
            }
        }

        batches.sort_by_key(|(index, _)| *index);
        Ok(batches.into_iter().flat_map(|(_, batch)| batch).collect())
    }
}
