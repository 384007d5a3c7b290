//! Run instantiation ("log snapshot") — component C3.
//!
//! Invoked on an authenticated trigger: allocates a unique monotonic run
//! sequence under a process-wide lock, then deep-copies the current
//! template into immutable `*Log` records.

use std::sync::Mutex;

use crate::error::Result;
use crate::store::Store;
use crate::types::{
    default_event_definitions, ActionLog, Id, Outcome, Pipeline, PipelineLog, Stage, StageLog,
    PRE_STAGE_START,
};

/// The process-wide "start-pipeline" lock: a single-slot mutex ensuring
/// two concurrent triggers against the same (or different) pipeline
/// never read-then-insert the same sequence number. Modeled as a
/// constructible struct rather than a static, so callers own its
/// lifetime and can inject it.
#[derive(Default)]
pub struct SequenceAllocator {
    lock: Mutex<()>,
}

impl SequenceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next sequence number for `pipeline_id`.
    pub fn allocate(&self, store: &dyn Store, pipeline_id: Id) -> Result<i64> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(store.max_sequence(pipeline_id)? + 1)
    }
}

/// Snapshot `pipeline`'s current template into a new immutable run,
/// recording `trigger_body` as the distinguished Start outcome.
/// `base_url` seeds the default EventDefinition callback URLs.
pub fn snapshot_run(
    store: &dyn Store,
    allocator: &SequenceAllocator,
    pipeline: &Pipeline,
    base_url: &str,
    trigger_body: &[u8],
) -> Result<PipelineLog> {
    let sequence = allocator.allocate(store, pipeline.id)?;

    let pipeline_log = store.insert_pipeline_log(PipelineLog {
        id: 0,
        pipeline_id: pipeline.id,
        namespace: pipeline.namespace.clone(),
        name: pipeline.name.clone(),
        version: pipeline.version.clone(),
        version_code: pipeline.version_code,
        manifest: pipeline.manifest.clone(),
        env: pipeline.env.clone(),
        sequence,
    })?;

    let ordered_stages = order_stages_by_chain(store.get_stages_by_pipeline(pipeline.id)?);

    let mut start_stage_log_id: Option<Id> = None;
    let mut pre_stage_log_id: Id = PRE_STAGE_START;
    for stage in &ordered_stages {
        let stage_log = store.insert_stage_log(StageLog {
            id: 0,
            pipeline_log_id: pipeline_log.id,
            stage_id: stage.id,
            stage_type: stage.stage_type,
            pre_stage: pre_stage_log_id,
            name: stage.name.clone(),
            timeout_secs: stage.timeout_secs,
            env: stage.env.clone(),
            manifest: stage.manifest.clone(),
            sequence,
        })?;
        pre_stage_log_id = stage_log.id;
        if stage.pre_stage == PRE_STAGE_START {
            start_stage_log_id = Some(stage_log.id);
        }

        let run_id_prefix = format!("{},{}", pipeline_log.id, stage_log.id);
        for action in store.get_actions_by_stage(stage.id)? {
            let action_log = store.insert_action_log(ActionLog {
                id: 0,
                stage_log_id: stage_log.id,
                from_action: action.id,
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
                sequence,
                event_definitions: Default::default(),
            })?;
            let run_id = format!("{run_id_prefix},{},{sequence},{}", action_log.id, action.component);
            let event_definitions = default_event_definitions(base_url, &run_id);
            store.set_action_log_event_definitions(action_log.id, event_definitions)?;
        }
    }

    let start_stage_log_id = start_stage_log_id.unwrap_or(PRE_STAGE_START);
    store.insert_outcome(Outcome {
        pipeline_log_id: pipeline_log.id,
        stage_log_id: start_stage_log_id,
        action_id: Outcome::TRIGGER_ACTION_ID,
        sequence,
        status: true,
        result: "triggered".to_string(),
        output: parse_trigger_body(trigger_body),
    })?;

    Ok(pipeline_log)
}

fn parse_trigger_body(body: &[u8]) -> serde_json::Value {
    serde_json::from_slice(body).unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(body).into_owned()))
}

/// Order `stages` by walking the `preStage` chain from the unique Start
/// (`preStage = -1`). The chain is linear with no cycles.
fn order_stages_by_chain(stages: Vec<Stage>) -> Vec<Stage> {
    use std::collections::HashMap;
    let mut by_pre_stage: HashMap<Id, Stage> = HashMap::new();
    for stage in stages {
        by_pre_stage.insert(stage.pre_stage, stage);
    }

    let mut ordered = Vec::new();
    let mut cursor = PRE_STAGE_START;
    while let Some(stage) = by_pre_stage.remove(&cursor) {
        cursor = stage.id;
        ordered.push(stage);
    }
    ordered
}
