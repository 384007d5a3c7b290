//! The Store interface and an in-memory reference implementation.
//!
//! Mirrors the trait-plus-reference-backend split of shipper's
//! `StateStore`/`FileStore`: callers depend on `dyn Store`, and a real
//! deployment would plug in a relational backend matching the persisted
//! schema (`pipeline, stage, action, pipeline_log, stage_log,
//! action_log, outcome, event, event_definition`).

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{PipelineError, Result};
use crate::types::{Action, ActionLog, Event, Id, Outcome, Pipeline, PipelineLog, Stage, StageLog};

/// Persistence surface consumed by every component (C2-C5). All mutations
/// are single-row writes; the Store itself is the sole serialization
/// point for cross-worker state.
pub trait Store: Send + Sync {
    // -- Pipeline templates --------------------------------------------

    fn get_pipeline(&self, id: Id) -> Result<Option<Pipeline>>;

    fn find_pipeline(&self, namespace: &str, name: &str, version: &str) -> Result<Option<Pipeline>>;

    /// Highest `version_code` among all versions of `(namespace, name)`,
    /// or `None` if the pipeline doesn't exist yet.
    fn latest_version_code(&self, namespace: &str, name: &str) -> Result<Option<i64>>;

    /// Insert a new pipeline version, assigning its `id`. Fails if
    /// `(namespace, name, version)` already exists.
    fn insert_pipeline(&self, pipeline: Pipeline) -> Result<Pipeline>;

    // -- Stage/action templates (C2) ------------------------------------

    /// Delete every stage and action of `pipeline_id`. Part of a
    /// full-replace rewrite; callers are responsible for wrapping this
    /// together with the following inserts in one transaction.
    fn delete_stages_and_actions(&self, pipeline_id: Id) -> Result<()>;

    fn insert_stage(&self, stage: Stage) -> Result<Stage>;

    fn insert_action(&self, action: Action) -> Result<Action>;

    /// Overwrite an action's `manifest` (used by C2's second pass to
    /// attach resolved relation edges).
    fn set_action_manifest(&self, action_id: Id, manifest: serde_json::Value) -> Result<()>;

    fn get_stages_by_pipeline(&self, pipeline_id: Id) -> Result<Vec<Stage>>;

    fn get_actions_by_stage(&self, stage_id: Id) -> Result<Vec<Action>>;

    fn get_action(&self, id: Id) -> Result<Option<Action>>;

    // -- Run snapshots (C3, read-only after creation) -------------------

    fn insert_pipeline_log(&self, log: PipelineLog) -> Result<PipelineLog>;

    fn insert_stage_log(&self, log: StageLog) -> Result<StageLog>;

    fn insert_action_log(&self, log: ActionLog) -> Result<ActionLog>;

    /// Overwrite an ActionLog's seeded `event_definitions` once its own id
    /// (needed to build each callback URL) is known.
    fn set_action_log_event_definitions(
        &self,
        action_log_id: Id,
        event_definitions: crate::types::EventDefinitions,
    ) -> Result<()>;

    fn get_stage_logs(&self, pipeline_log_id: Id) -> Result<Vec<StageLog>>;

    fn get_action_logs(&self, stage_log_id: Id) -> Result<Vec<ActionLog>>;

    fn get_action_log(&self, id: Id) -> Result<Option<ActionLog>>;

    // -- Outcomes (append-only) ------------------------------------------

    /// Highest `sequence` recorded for any run (`PipelineLog`) of the
    /// template `pipeline_id`, or `0` if none exist.
    fn max_sequence(&self, pipeline_id: Id) -> Result<i64>;

    fn insert_outcome(&self, outcome: Outcome) -> Result<()>;

    fn get_outcome(
        &self,
        pipeline_log_id: Id,
        stage_log_id: Id,
        action_id: Id,
        sequence: i64,
    ) -> Result<Option<Outcome>>;

    // -- Events (append-only) --------------------------------------------

    fn insert_event(&self, event: Event) -> Result<()>;

    fn get_events(&self, pipeline_log_id: Id) -> Result<Vec<Event>>;
}

#[derive(Default)]
struct Tables {
    next_id: Id,
    pipelines: HashMap<Id, Pipeline>,
    stages: HashMap<Id, Stage>,
    actions: HashMap<Id, Action>,
    pipeline_logs: HashMap<Id, PipelineLog>,
    stage_logs: HashMap<Id, StageLog>,
    action_logs: HashMap<Id, ActionLog>,
    outcomes: Vec<Outcome>,
    events: Vec<Event>,
}

impl Tables {
    fn next_id(&mut self) -> Id {
        self.next_id += 1;
        self.next_id
    }
}

/// An in-memory [`Store`] backed by a single mutex-guarded table set.
/// Reference implementation and test double; not durable across process
/// restarts.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

impl Store for InMemoryStore {
    fn get_pipeline(&self, id: Id) -> Result<Option<Pipeline>> {
        Ok(self.lock().pipelines.get(&id).cloned())
    }

    fn find_pipeline(&self, namespace: &str, name: &str, version: &str) -> Result<Option<Pipeline>> {
        Ok(self
            .lock()
            .pipelines
            .values()
            .find(|p| p.namespace == namespace && p.name == name && p.version == version)
            .cloned())
    }

    fn latest_version_code(&self, namespace: &str, name: &str) -> Result<Option<i64>> {
        Ok(self
            .lock()
            .pipelines
            .values()
            .filter(|p| p.namespace == namespace && p.name == name)
            .map(|p| p.version_code)
            .max())
    }

    fn insert_pipeline(&self, mut pipeline: Pipeline) -> Result<Pipeline> {
        let mut tables = self.lock();
        let exists = tables
            .pipelines
            .values()
            .any(|p| p.namespace == pipeline.namespace && p.name == pipeline.name && p.version == pipeline.version);
        if exists {
            return Err(PipelineError::Definition(
                "version code already exist!".to_string(),
            ));
        }
        pipeline.id = tables.next_id();
        tables.pipelines.insert(pipeline.id, pipeline.clone());
        Ok(pipeline)
    }

    fn delete_stages_and_actions(&self, pipeline_id: Id) -> Result<()> {
        let mut tables = self.lock();
        let stage_ids: Vec<Id> = tables
            .stages
            .values()
            .filter(|s| s.pipeline_id == pipeline_id)
            .map(|s| s.id)
            .collect();
        tables.actions.retain(|_, a| !stage_ids.contains(&a.stage_id));
        tables.stages.retain(|_, s| s.pipeline_id != pipeline_id);
        Ok(())
    }

    fn insert_stage(&self, mut stage: Stage) -> Result<Stage> {
        let mut tables = self.lock();
        stage.id = tables.next_id();
        tables.stages.insert(stage.id, stage.clone());
        Ok(stage)
    }

    fn insert_action(&self, mut action: Action) -> Result<Action> {
        let mut tables = self.lock();
        action.id = tables.next_id();
        tables.actions.insert(action.id, action.clone());
        Ok(action)
    }

    fn set_action_manifest(&self, action_id: Id, manifest: serde_json::Value) -> Result<()> {
        let mut tables = self.lock();
        let action = tables
            .actions
            .get_mut(&action_id)
            .ok_or_else(|| PipelineError::Definition(format!("unknown action id {action_id}")))?;
        action.manifest = manifest;
        Ok(())
    }

    fn get_stages_by_pipeline(&self, pipeline_id: Id) -> Result<Vec<Stage>> {
        Ok(self
            .lock()
            .stages
            .values()
            .filter(|s| s.pipeline_id == pipeline_id)
            .cloned()
            .collect())
    }

    fn get_actions_by_stage(&self, stage_id: Id) -> Result<Vec<Action>> {
        Ok(self
            .lock()
            .actions
            .values()
            .filter(|a| a.stage_id == stage_id)
            .cloned()
            .collect())
    }

    fn get_action(&self, id: Id) -> Result<Option<Action>> {
        Ok(self.lock().actions.get(&id).cloned())
    }

    fn insert_pipeline_log(&self, mut log: PipelineLog) -> Result<PipelineLog> {
        let mut tables = self.lock();
        log.id = tables.next_id();
        tables.pipeline_logs.insert(log.id, log.clone());
        Ok(log)
    }

    fn insert_stage_log(&self, mut log: StageLog) -> Result<StageLog> {
        let mut tables = self.lock();
        log.id = tables.next_id();
        tables.stage_logs.insert(log.id, log.clone());
        Ok(log)
    }

    fn insert_action_log(&self, mut log: ActionLog) -> Result<ActionLog> {
        let mut tables = self.lock();
        log.id = tables.next_id();
        tables.action_logs.insert(log.id, log.clone());
        Ok(log)
    }

    fn set_action_log_event_definitions(
        &self,
        action_log_id: Id,
        event_definitions: crate::types::EventDefinitions,
    ) -> Result<()> {
        let mut tables = self.lock();
        let log = tables
            .action_logs
            .get_mut(&action_log_id)
            .ok_or_else(|| PipelineError::Snapshot(format!("unknown action log id {action_log_id}")))?;
        log.event_definitions = event_definitions;
        Ok(())
    }

    fn get_stage_logs(&self, pipeline_log_id: Id) -> Result<Vec<StageLog>> {
        Ok(self
            .lock()
            .stage_logs
            .values()
            .filter(|s| s.pipeline_log_id == pipeline_log_id)
            .cloned()
            .collect())
    }

    fn get_action_logs(&self, stage_log_id: Id) -> Result<Vec<ActionLog>> {
        Ok(self
            .lock()
            .action_logs
            .values()
            .filter(|a| a.stage_log_id == stage_log_id)
            .cloned()
            .collect())
    }

    fn get_action_log(&self, id: Id) -> Result<Option<ActionLog>> {
        Ok(self.lock().action_logs.get(&id).cloned())
    }

    fn max_sequence(&self, pipeline_id: Id) -> Result<i64> {
        Ok(self
            .lock()
            .pipeline_logs
            .values()
            .filter(|l| l.pipeline_id == pipeline_id)
            .map(|l| l.sequence)
            .max()
            .unwrap_or(0))
    }

    fn insert_outcome(&self, outcome: Outcome) -> Result<()> {
        self.lock().outcomes.push(outcome);
        Ok(())
    }

    fn get_outcome(
        &self,
        pipeline_log_id: Id,
        stage_log_id: Id,
        action_id: Id,
        sequence: i64,
    ) -> Result<Option<Outcome>> {
        Ok(self
            .lock()
            .outcomes
            .iter()
            .find(|o| {
                o.pipeline_log_id == pipeline_log_id
                    && o.stage_log_id == stage_log_id
                    && o.action_id == action_id
                    && o.sequence == sequence
            })
            .cloned())
    }

    fn insert_event(&self, event: Event) -> Result<()> {
        self.lock().events.push(event);
        Ok(())
    }

    fn get_events(&self, pipeline_log_id: Id) -> Result<Vec<Event>> {
        Ok(self
            .lock()
            .events
            .iter()
            .filter(|e| e.pipeline_log_id == pipeline_log_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PlatformRef, SourceInfo, StageType};

    fn sample_pipeline(version: &str) -> Pipeline {
        Pipeline {
            id: 0,
            namespace: "demo".to_string(),
            name: "p".to_string(),
            version: version.to_string(),
            version_code: 1,
            manifest: serde_json::json!({}),
            source_info: Vec::<SourceInfo>::new(),
            env: serde_json::json!({}),
        }
    }

    #[test]
    fn insert_pipeline_assigns_id_and_rejects_duplicate_version() {
        let store = InMemoryStore::new();
        let p1 = store.insert_pipeline(sample_pipeline("v1")).unwrap();
        assert_ne!(p1.id, 0);

        let err = store.insert_pipeline(sample_pipeline("v1")).unwrap_err();
        assert!(matches!(err, PipelineError::Definition(_)));
    }

    #[test]
    fn max_sequence_defaults_to_zero() {
        let store = InMemoryStore::new();
        assert_eq!(store.max_sequence(42).unwrap(), 0);
    }

    #[test]
    fn delete_stages_and_actions_cascades() {
        let store = InMemoryStore::new();
        let pipeline = store.insert_pipeline(sample_pipeline("v1")).unwrap();
        let stage = store
            .insert_stage(Stage {
                id: 0,
                pipeline_id: pipeline.id,
                stage_type: StageType::Start,
                pre_stage: crate::types::PRE_STAGE_START,
                name: "start".to_string(),
                timeout_secs: 60,
                env: serde_json::json!({}),
                manifest: serde_json::json!({}),
            })
            .unwrap();
        store
            .insert_action(Action {
                id: 0,
                stage_id: stage.id,
                component: 7,
                service: String::new(),
                name: "a".to_string(),
                endpoint: "img:latest".to_string(),
                platform: PlatformRef {
                    platform_type: "k8s".to_string(),
                    host: "host".to_string(),
                },
                kubernetes: serde_json::json!({}),
                input: crate::json::describe_json(&serde_json::json!({})),
                output: crate::json::describe_json(&serde_json::json!({})),
                manifest: serde_json::json!({}),
                timeout_secs: 60,
            })
            .unwrap();

        store.delete_stages_and_actions(pipeline.id).unwrap();
        assert!(store.get_stages_by_pipeline(pipeline.id).unwrap().is_empty());
        assert!(store.get_actions_by_stage(stage.id).unwrap().is_empty());
    }
}
