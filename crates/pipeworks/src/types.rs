//! Domain entities: pipelines, stages, actions, relations, run logs,
//! outcomes, and events.
//!
//! Mirrors the split `shipper::types` draws between a package's static
//! metadata and its per-publish-attempt state: here, `Pipeline`/`Stage`/
//! `Action` are the mutable template graph and `PipelineLog`/`StageLog`/
//! `ActionLog` are immutable per-run snapshots of it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::json::JsonSchema;

/// Row identifier. Signed so the `preStage = -1` Start sentinel
/// fits the same type as every other id.
pub type Id = i64;

/// Sentinel `preStage` value identifying the Start stage of a pipeline.
pub const PRE_STAGE_START: Id = -1;

/// `component` value reserved for "service actions". Not implemented as a distinct driver; see
/// [`crate::engine`].
pub const COMPONENT_SERVICE: i64 = 0;

/// A trigger source configuration on a [`Pipeline`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub source_type: SourceType,
    /// The HTTP header carrying the signature, e.g. `X-Hub-Signature`.
    pub header_key: String,
    pub secret_key: String,
    /// Comma-delimited allow-list wrapped as `",evt1,evt2,"`.
    pub event_list: String,
}

/// A trigger source kind. Both variants use the same HMAC-SHA1 signature
/// scheme; they differ only in the event-type header lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum SourceType {
    Github,
    Manual,
}

impl SourceType {
    /// The header carrying the event type for this source, if the source
    /// has one. `Github` uses `X-Github-Event`; `Manual` has none and
    /// always matches.
    pub fn event_type_header(self) -> Option<&'static str> {
        match self {
            SourceType::Github => Some("X-Github-Event"),
            SourceType::Manual => None,
        }
    }
}

/// A pipeline template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: Id,
    pub namespace: String,
    pub name: String,
    pub version: String,
    /// Monotonically increasing per `(namespace, name)` (invariant 1).
    pub version_code: i64,
    /// The raw user-authored definition, including `define.stageList` and
    /// `define.lineList` consumed by [`crate::compiler`].
    pub manifest: serde_json::Value,
    pub source_info: Vec<SourceInfo>,
    pub env: serde_json::Value,
}

/// A stage's position in the pipeline chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageType {
    Start,
    Run,
    End,
}

/// A stage template, belonging to a [`Pipeline`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub id: Id,
    pub pipeline_id: Id,
    pub stage_type: StageType,
    /// Id of the predecessor stage; [`PRE_STAGE_START`] for the Start stage.
    pub pre_stage: Id,
    pub name: String,
    pub timeout_secs: u64,
    pub env: serde_json::Value,
    pub manifest: serde_json::Value,
}

/// Which backend a [`Platform`](crate::platform::Platform) implementation
/// should target for an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformRef {
    pub platform_type: String,
    /// Passed through verbatim; NOT uppercased.
    pub host: String,
}

/// A `{From, To}` dotted-path field mapping inside a [`RelationEdge`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FieldMapping {
    pub from: String,
    pub to: String,
}

/// A directed data-flow edge `fromAction → toAction`, stored inside the
/// target action's `manifest.relation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationEdge {
    pub from_action: Id,
    pub to_action: Id,
    pub relation: Vec<FieldMapping>,
}

/// An action template, belonging to a [`Stage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: Id,
    pub stage_id: Id,
    /// Workload image reference; [`COMPONENT_SERVICE`] (`0`) is a
    /// reserved extension point, not a distinct driver (invariant 5).
    pub component: i64,
    pub service: String,
    pub name: String,
    /// `image:tag`, tag defaulting to `latest` at compile time.
    pub endpoint: String,
    pub platform: PlatformRef,
    pub kubernetes: serde_json::Value,
    pub input: JsonSchema,
    pub output: JsonSchema,
    /// Contains the compiled `relation` edges targeting this action.
    pub manifest: serde_json::Value,
    pub timeout_secs: u64,
}

/// The six lifecycle callback names seeded onto every [`ActionLog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventName {
    ComponentStart,
    ComponentStop,
    TaskStart,
    TaskResult,
    TaskState,
    RegisterUrl,
}

impl EventName {
    pub const ALL: [EventName; 6] = [
        EventName::ComponentStart,
        EventName::ComponentStop,
        EventName::TaskStart,
        EventName::TaskResult,
        EventName::TaskState,
        EventName::RegisterUrl,
    ];
}

/// Per-action map of lifecycle event name to callback URL.
pub type EventDefinitions = BTreeMap<EventName, String>;

/// Build the default six [`EventDefinitions`] for an ActionLog, pointing
/// each hook at `{base_url}/callback/{run_id}/{EVENT_NAME}`.
pub fn default_event_definitions(base_url: &str, run_id: &str) -> EventDefinitions {
    EventName::ALL
        .iter()
        .map(|event| {
            let name = serde_json::to_value(event)
                .ok()
                .and_then(|v| v.as_str().map(str::to_owned))
                .unwrap_or_default();
            (*event, format!("{base_url}/callback/{run_id}/{name}"))
        })
        .collect()
}

/// Immutable run snapshot of a [`Pipeline`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineLog {
    pub id: Id,
    pub pipeline_id: Id,
    pub namespace: String,
    pub name: String,
    pub version: String,
    pub version_code: i64,
    pub manifest: serde_json::Value,
    pub env: serde_json::Value,
    /// Monotonically unique per `pipeline_id` (invariant 2).
    pub sequence: i64,
}

/// Immutable run snapshot of a [`Stage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageLog {
    pub id: Id,
    pub pipeline_log_id: Id,
    pub stage_id: Id,
    pub stage_type: StageType,
    /// Predecessor chain remapped to log-stage ids.
    pub pre_stage: Id,
    pub name: String,
    pub timeout_secs: u64,
    pub env: serde_json::Value,
    pub manifest: serde_json::Value,
    pub sequence: i64,
}

/// Immutable run snapshot of an [`Action`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLog {
    pub id: Id,
    pub stage_log_id: Id,
    /// The template action id this log was copied from. Used by C5 to
    /// resolve relations against immutable data.
    pub from_action: Id,
    pub component: i64,
    pub service: String,
    pub name: String,
    pub endpoint: String,
    pub platform: PlatformRef,
    pub kubernetes: serde_json::Value,
    pub input: JsonSchema,
    pub output: JsonSchema,
    pub manifest: serde_json::Value,
    pub timeout_secs: u64,
    pub sequence: i64,
    pub event_definitions: EventDefinitions,
}

/// A per-`(pipeline, stage, action, sequence)` record of an action's run.
/// At most one terminal outcome exists per `(action, sequence)` once the
/// action completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub pipeline_log_id: Id,
    pub stage_log_id: Id,
    /// Template action id (`ActionLog::from_action`), not the ActionLog's
    /// own id — this is what relation resolution in C5 joins against.
    pub action_id: Id,
    pub sequence: i64,
    pub status: bool,
    pub result: String,
    pub output: serde_json::Value,
}

impl Outcome {
    /// The action id used for the distinguished trigger-body outcome.
    pub const TRIGGER_ACTION_ID: Id = 0;
}

/// Append-only audit record of an externally observable happening.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub pipeline_log_id: Id,
    pub stage_log_id: Id,
    pub action_log_id: Id,
    pub sequence: i64,
    pub title: String,
    pub payload: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_name_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&EventName::TaskResult).unwrap();
        assert_eq!(json, "\"TASK_RESULT\"");
    }

    #[test]
    fn default_event_definitions_seeds_all_six_hooks() {
        let defs = default_event_definitions("http://engine.local", "1,2,3,1,7");
        assert_eq!(defs.len(), 6);
        assert!(defs[&EventName::TaskResult].contains("TASK_RESULT"));
        assert!(defs[&EventName::TaskResult].contains("1,2,3,1,7"));
    }

    #[test]
    fn github_source_uses_well_known_event_header() {
        assert_eq!(
            SourceType::Github.event_type_header(),
            Some("X-Github-Event")
        );
        assert_eq!(SourceType::Manual.event_type_header(), None);
    }

    #[test]
    fn field_mapping_round_trips_pascal_case_json() {
        let mapping = FieldMapping {
            from: ".x.y".to_string(),
            to: ".z".to_string(),
        };
        let json = serde_json::to_value(&mapping).unwrap();
        assert_eq!(json["From"], ".x.y");
        assert_eq!(json["To"], ".z");
    }
}
