//! Stage/action scheduler — component C4.
//!
//! Drives a single run (`PipelineLog`) stage by stage: fan out actions,
//! wait for completion, enforce the stage timeout, stop siblings on
//! failure, advance to the next stage.
//!
//! A workload's terminal result arrives asynchronously, out-of-process, as
//! a `TASK_RESULT` callback — the scheduler itself never polls for it.
//! Instead, a completion channel keyed by action id
//! ([`CompletionRegistry::complete`], invoked by whatever out-of-scope
//! HTTP handler receives the callback) wakes the worker task that is
//! waiting on that action, which in turn reports into the local
//! per-stage aggregation channel the waiter races against
//! `tokio::time::sleep(stage.timeout)`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::Result;
use crate::platform::Platform;
use crate::store::Store;
use crate::types::{ActionLog, Id, Outcome, PipelineLog, StageLog, StageType, COMPONENT_SERVICE, PRE_STAGE_START};

/// Progress-reporting sink for the scheduler, mirroring shipper's
/// `engine_parallel::Reporter` trait.
pub trait Reporter: Send {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// A [`Reporter`] that writes `[info]`/`[warn]`/`[error]`-prefixed lines to
/// stderr, the same convention `shipper-cli`'s reporter uses.
#[derive(Default)]
pub struct StderrReporter;

impl Reporter for StderrReporter {
    fn info(&mut self, msg: &str) {
        eprintln!("[info] {msg}");
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("[warn] {msg}");
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[error] {msg}");
    }
}

/// Build the canonical `"pipelineLogId,stageLogId,actionLogId,sequence,
/// componentRef"` run id.
pub fn build_run_id(pipeline_log_id: Id, stage_log_id: Id, action_log_id: Id, sequence: i64, component: i64) -> String {
    format!("{pipeline_log_id},{stage_log_id},{action_log_id},{sequence},{component}")
}

/// Tracks in-flight actions awaiting their `TASK_RESULT` callback, one
/// single-use channel per ActionLog id. Modeled as a constructible,
/// injectable struct rather than a static, alongside
/// [`crate::snapshot::SequenceAllocator`] — it's keyed per-action rather
/// than held for the duration of a single critical section.
#[derive(Default)]
pub struct CompletionRegistry {
    senders: Mutex<HashMap<Id, oneshot::Sender<bool>>>,
}

impl CompletionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, action_log_id: Id) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        self.senders.lock().unwrap_or_else(|p| p.into_inner()).insert(action_log_id, tx);
        rx
    }

    /// Signal that `action_log_id` reached a terminal state. A no-op if
    /// nothing is currently waiting on it (e.g. a stale or duplicate
    /// callback after the stage already timed out).
    pub fn complete(&self, action_log_id: Id, status: bool) {
        if let Some(tx) = self.senders.lock().unwrap_or_else(|p| p.into_inner()).remove(&action_log_id) {
            let _ = tx.send(status);
        }
    }
}

/// Drives runs through their stage chain.
pub struct Scheduler {
    store: Arc<dyn Store>,
    platform: Arc<dyn Platform>,
    reporter: Arc<Mutex<dyn Reporter + Send>>,
    completions: Arc<CompletionRegistry>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        platform: Arc<dyn Platform>,
        reporter: Arc<Mutex<dyn Reporter + Send>>,
        completions: Arc<CompletionRegistry>,
    ) -> Self {
        Self {
            store,
            platform,
            reporter,
            completions,
        }
    }

    /// The record-keeping half of a `TASK_RESULT` callback: persists the
    /// terminal Outcome (`status=true` on success, `status=false` on
    /// failure), then wakes the scheduler task waiting on it.
    pub fn record_task_result(
        &self,
        pipeline_log_id: Id,
        stage_log_id: Id,
        template_action_id: Id,
        action_log_id: Id,
        sequence: i64,
        status: bool,
        output: serde_json::Value,
    ) {
        let result = if status { "ok" } else { "task failed" };
        let _ = self.store.insert_outcome(Outcome {
            pipeline_log_id,
            stage_log_id,
            action_id: template_action_id,
            sequence,
            status,
            result: result.to_string(),
            output,
        });
        self.completions.complete(action_log_id, status);
    }

    /// Run `pipeline_log` to completion. Returns `true` if the run reached
    /// End, `false` if it terminated on failure or timeout.
    pub async fn run(&self, pipeline_log: &PipelineLog) -> Result<bool> {
        let stage_logs = self.store.get_stage_logs(pipeline_log.id)?;
        let start = stage_logs.iter().find(|s| s.pre_stage == PRE_STAGE_START).cloned();
        self.handle_stage(pipeline_log, start, &stage_logs).await
    }

    fn handle_stage<'a>(
        &'a self,
        pipeline_log: &'a PipelineLog,
        stage: Option<StageLog>,
        all_stages: &'a [StageLog],
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(async move {
            let Some(stage) = stage else {
                return Ok(true);
            };
            if stage.stage_type == StageType::End {
                return Ok(true);
            }

            let next_stage = all_stages.iter().find(|s| s.pre_stage == stage.id).cloned();
            let actions = self.store.get_action_logs(stage.id)?;

            if actions.is_empty() && stage.stage_type != StageType::Start {
                return self.handle_stage(pipeline_log, next_stage, all_stages).await;
            }

            let all_ok = self.run_stage_fan_out(pipeline_log, &stage, &actions).await?;

            if all_ok {
                self.handle_stage(pipeline_log, next_stage, all_stages).await
            } else {
                self.stop_stage(pipeline_log, &stage, &actions).await;
                Ok(false)
            }
        })
    }

    /// Fan out one task per action, wait for every completion (or a first
    /// failure) over a completion channel, racing `stage.timeout`. An
    /// unparsable timeout falls back to 36h at compile time — see
    /// `compiler::DEFAULT_STAGE_TIMEOUT_SECS`.
    async fn run_stage_fan_out(
        &self,
        pipeline_log: &PipelineLog,
        stage: &StageLog,
        actions: &[ActionLog],
    ) -> Result<bool> {
        if actions.is_empty() {
            return Ok(true);
        }

        let (tx, mut rx) = tokio::sync::mpsc::channel::<bool>(actions.len());

        for action in actions {
            let store = self.store.clone();
            let platform = self.platform.clone();
            let reporter = self.reporter.clone();
            let completions = self.completions.clone();
            let action = action.clone();
            let pipeline_log_id = pipeline_log.id;
            let stage_log_id = stage.id;
            let sequence = pipeline_log.sequence;
            let tx = tx.clone();
            tokio::spawn(async move {
                let status = exec_action(
                    store.as_ref(),
                    platform.as_ref(),
                    &reporter,
                    &completions,
                    pipeline_log_id,
                    stage_log_id,
                    sequence,
                    &action,
                )
                .await;
                let _ = tx.send(status).await;
            });
        }
        drop(tx);

        let expected = actions.len();
        let wait = async move {
            let mut completed = 0usize;
            while completed < expected {
                match rx.recv().await {
                    Some(true) => completed += 1,
                    Some(false) => return false,
                    None => return completed == expected,
                }
            }
            true
        };

        let timeout = Duration::from_secs(stage.timeout_secs.max(1));
        tokio::select! {
            all_ok = wait => Ok(all_ok),
            _ = tokio::time::sleep(timeout) => {
                self.reporter
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .warn(&format!("stage {} timed out after {:?}", stage.id, timeout));
                Ok(false)
            }
        }
    }

    /// `Platform.Stop(runId)` for every workload action of `stage` on
    /// timeout or sibling failure. `component = 0` actions have no
    /// workload to stop.
    async fn stop_stage(&self, pipeline_log: &PipelineLog, stage: &StageLog, actions: &[ActionLog]) {
        let mut handles = Vec::new();
        for action in actions.iter().filter(|a| a.component != COMPONENT_SERVICE) {
            let platform = self.platform.clone();
            let action_owned = action.clone();
            let run_id = build_run_id(pipeline_log.id, stage.id, action.id, pipeline_log.sequence, action.component);
            handles.push(tokio::task::spawn_blocking(move || {
                stop_action(platform.as_ref(), &action_owned, &run_id)
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }
}

/// Re-initializes and stops the workload backing `action`. The Platform
/// Driver interface only exposes `Stop` on a `Workload` handle returned by
/// `Init`, so cancellation re-`Init`s before calling `Stop`.
fn stop_action(platform: &dyn Platform, action: &ActionLog, run_id: &str) {
    let action_owned = to_template_action(action);
    if let Ok(workload) = platform.init(&action_owned, &action.platform.platform_type, &action.platform.host, "default") {
        let _ = workload.stop(run_id);
    }
}

fn to_template_action(action: &ActionLog) -> crate::types::Action {
    crate::types::Action {
        id: action.from_action,
        stage_id: 0,
        component: action.component,
        service: action.service.clone(),
        name: action.name.clone(),
        endpoint: action.endpoint.clone(),
        platform: action.platform.clone(),
        kubernetes: action.kubernetes.clone(),
        input: action.input.clone(),
        output: action.output.clone(),
        manifest: action.manifest.clone(),
        timeout_secs: action.timeout_secs,
    }
}

/// `Init` + `Start` a workload-backed action and wait for its
/// `TASK_RESULT` callback, or record the fixed failure outcome for a
/// `component = 0` "service" action — no distinct driver is built for
/// that reserved extension point.
async fn exec_action(
    store: &dyn Store,
    platform: &dyn Platform,
    reporter: &Arc<Mutex<dyn Reporter + Send>>,
    completions: &Arc<CompletionRegistry>,
    pipeline_log_id: Id,
    stage_log_id: Id,
    sequence: i64,
    action: &ActionLog,
) -> bool {
    if action.component == COMPONENT_SERVICE {
        record_outcome(
            store,
            pipeline_log_id,
            stage_log_id,
            action.from_action,
            sequence,
            false,
            "start error: action component is 0",
        );
        return false;
    }

    let run_id = build_run_id(pipeline_log_id, stage_log_id, action.id, sequence, action.component);
    let completion = completions.register(action.id);

    let action_owned = to_template_action(action);
    let platform_type = action.platform.platform_type.clone();
    let platform_host = action.platform.host.clone();
    let event_definitions = action.event_definitions.clone();

    match platform.init(&action_owned, &platform_type, &platform_host, "default") {
        Ok(workload) => {
            if let Err(e) = workload.start(&run_id, &event_definitions) {
                reporter.lock().unwrap_or_else(|p| p.into_inner()).error(&format!("start error for {run_id}: {e}"));
                record_outcome(
                    store,
                    pipeline_log_id,
                    stage_log_id,
                    action.from_action,
                    sequence,
                    false,
                    &format!("start error: {e}"),
                );
                return false;
            }
        }
        Err(e) => {
            reporter.lock().unwrap_or_else(|p| p.into_inner()).error(&format!("init error for {run_id}: {e}"));
            record_outcome(
                store,
                pipeline_log_id,
                stage_log_id,
                action.from_action,
                sequence,
                false,
                &format!("init error: {e}"),
            );
            return false;
        }
    }

    completion.await.unwrap_or(false)
}

fn record_outcome(
    store: &dyn Store,
    pipeline_log_id: Id,
    stage_log_id: Id,
    action_id: Id,
    sequence: i64,
    status: bool,
    result: &str,
) {
    let _ = store.insert_outcome(Outcome {
        pipeline_log_id,
        stage_log_id,
        action_id,
        sequence,
        status,
        result: result.to_string(),
        output: serde_json::Value::Null,
    });
}
