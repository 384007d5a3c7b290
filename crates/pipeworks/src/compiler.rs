//! Pipeline definition compiler — component C2.
//!
//! Turns `pipeline.manifest.define = {stageList, lineList}`, a
//! user-authored graph keyed by opaque UI-assigned "define ids", into
//! normalized stage/action/relation rows with stable database ids.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{PipelineError, Result};
use crate::json::describe_json;
use crate::store::Store;
use crate::types::{Action, FieldMapping, Id, Outcome, Pipeline, PlatformRef, RelationEdge, Stage, StageType, PRE_STAGE_START};

/// Raw shape of `pipeline.manifest.define`.
#[derive(Debug, Deserialize)]
pub struct PipelineDefine {
    #[serde(default, rename = "stageList")]
    pub stage_list: Vec<StageDefine>,
    #[serde(default, rename = "lineList")]
    pub line_list: Vec<LineDefine>,
}

#[derive(Debug, Deserialize)]
pub struct StageDefine {
    pub id: String,
    #[serde(rename = "type")]
    pub stage_type: String,
    #[serde(default, rename = "setupData")]
    pub setup_data: Option<StageSetupData>,
    #[serde(default)]
    pub actions: Option<Vec<ActionDefine>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StageSetupData {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub env: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct ActionDefine {
    pub id: String,
    #[serde(default)]
    pub component: i64,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub name: String,
    /// `image` with tag defaulting to `latest` if absent.
    pub image: String,
    #[serde(default)]
    pub tag: Option<String>,
    pub platform: PlatformDefine,
    #[serde(default)]
    pub kubernetes: serde_json::Value,
    #[serde(default, rename = "useAdvanced")]
    pub use_advanced: bool,
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub output: serde_json::Value,
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PlatformDefine {
    #[serde(rename = "type")]
    pub platform_type: String,
    pub host: String,
}

#[derive(Debug, Deserialize)]
pub struct LineDefine {
    #[serde(rename = "startData")]
    pub start_data: EndpointRef,
    #[serde(rename = "endData")]
    pub end_data: EndpointRef,
    /// Batches of field mappings; flattened when building the relation
    /// index.
    #[serde(default)]
    pub relation: Vec<Vec<FieldMapping>>,
}

#[derive(Debug, Deserialize)]
pub struct EndpointRef {
    pub id: String,
}

const STAGE_KIND_START: &str = "pipeline-start";
const STAGE_KIND_RUN: &str = "pipeline-stage";
const STAGE_KIND_ADD: &str = "pipeline-add-stage";
const STAGE_KIND_END: &str = "pipeline-end";

const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 36 * 60 * 60;
const DEFAULT_ACTION_TIMEOUT_SECS: u64 = 36 * 60 * 60;

/// Compile `pipeline.manifest.define` into the pipeline's stage/action/
/// relation tables, replacing whatever was there before.
///
/// A Store backed by real persistence MUST wrap the whole call in one
/// transaction: `Store::delete_stages_and_actions` plus the inserts below
/// are expected to run inside a single `Store`-level transaction when
/// backed by a transactional database. The in-memory reference store
/// applies them atomically under its own lock.
pub fn compile_definition(store: &dyn Store, pipeline: &Pipeline) -> Result<()> {
    let define: PipelineDefine = serde_json::from_value(
        pipeline
            .manifest
            .get("define")
            .cloned()
            .unwrap_or(serde_json::Value::Null),
    )
    .map_err(|e| PipelineError::Definition(format!("invalid manifest.define: {e}")))?;

    let relation_map = build_relation_map(&define.line_list);

    store.delete_stages_and_actions(pipeline.id)?;

    let mut define_to_action_id: HashMap<String, Id> = HashMap::new();
    let mut pre_stage_id: Id = PRE_STAGE_START;

    for stage_define in &define.stage_list {
        let stage_type = match stage_define.stage_type.as_str() {
            STAGE_KIND_ADD => continue,
            STAGE_KIND_START => StageType::Start,
            STAGE_KIND_RUN => StageType::Run,
            STAGE_KIND_END => StageType::End,
            other => {
                return Err(PipelineError::Definition(format!(
                    "unknown stage type {other}"
                )))
            }
        };

        if stage_type == StageType::Start {
            define_to_action_id.insert(stage_define.id.clone(), Outcome::TRIGGER_ACTION_ID);
        }

        let setup = stage_define.setup_data.as_ref();
        let new_stage = store.insert_stage(Stage {
            id: 0,
            pipeline_id: pipeline.id,
            stage_type,
            pre_stage: pre_stage_id,
            name: setup.map(|s| s.name.clone()).unwrap_or_default(),
            timeout_secs: setup
                .and_then(|s| s.timeout)
                .unwrap_or(DEFAULT_STAGE_TIMEOUT_SECS),
            env: setup.map(|s| s.env.clone()).unwrap_or(serde_json::json!({})),
            manifest: serde_json::json!({ "defineId": stage_define.id }),
        })?;
        pre_stage_id = new_stage.id;

        for action_define in stage_define.actions.iter().flatten() {
            let tag = action_define.tag.clone().unwrap_or_else(|| "latest".to_string());
            let new_action = store.insert_action(Action {
                id: 0,
                stage_id: new_stage.id,
                component: action_define.component,
                service: action_define.service.clone(),
                name: action_define.name.clone(),
                endpoint: format!("{}:{}", action_define.image, tag),
                platform: PlatformRef {
                    platform_type: action_define.platform.platform_type.clone(),
                    host: action_define.platform.host.clone(),
                },
                kubernetes: if action_define.use_advanced {
                    action_define.kubernetes.clone()
                } else {
                    serde_json::json!({})
                },
                input: describe_json(&action_define.input),
                output: describe_json(&action_define.output),
                manifest: serde_json::json!({}),
                timeout_secs: action_define.timeout.unwrap_or(DEFAULT_ACTION_TIMEOUT_SECS),
            })?;
            define_to_action_id.insert(action_define.id.clone(), new_action.id);
        }
    }

    for (end_define_id, by_start) in &relation_map {
        let Some(&to_action) = define_to_action_id.get(end_define_id) else {
            continue;
        };
        let mut edges = Vec::new();
        for (start_define_id, mappings) in by_start {
            let Some(&from_action) = define_to_action_id.get(start_define_id) else {
                return Err(PipelineError::Definition(format!(
                    "relation references unknown endpoint {start_define_id}"
                )));
            };
            edges.push(RelationEdge {
                from_action,
                to_action,
                relation: mappings.clone(),
            });
        }
        if to_action != Outcome::TRIGGER_ACTION_ID {
            store.set_action_manifest(
                to_action,
                serde_json::json!({ "relation": edges }),
            )?;
        }
    }

    Ok(())
}

/// `relationMap[endpointId][startpointId] = list-of-field-mappings`.
fn build_relation_map(line_list: &[LineDefine]) -> HashMap<String, HashMap<String, Vec<FieldMapping>>> {
    let mut map: HashMap<String, HashMap<String, Vec<FieldMapping>>> = HashMap::new();
    for line in line_list {
        if line.relation.is_empty() {
            continue;
        }
        let mappings: Vec<FieldMapping> = line.relation.iter().flatten().cloned().collect();
        if mappings.is_empty() {
            continue;
        }
        map.entry(line.end_data.id.clone())
            .or_default()
            .insert(line.start_data.id.clone(), mappings);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::types::SourceInfo;
    use serde_json::json;

    fn pipeline_with_manifest(manifest: serde_json::Value) -> Pipeline {
        Pipeline {
            id: 1,
            namespace: "demo".to_string(),
            name: "p".to_string(),
            version: "v1".to_string(),
            version_code: 1,
            manifest,
            source_info: Vec::<SourceInfo>::new(),
            env: json!({}),
        }
    }

    #[test]
    fn s4_two_stage_pipeline_compiles_relation() {
        let manifest = json!({
            "define": {
                "stageList": [
                    {"id": "s0", "type": "pipeline-start", "setupData": {"name": "start"}},
                    {"id": "s1", "type": "pipeline-stage", "setupData": {"name": "stage1"},
                     "actions": [{"id": "a-u", "component": 7, "image": "u", "platform": {"type": "k8s", "host": "h"}}]},
                    {"id": "s2", "type": "pipeline-stage", "setupData": {"name": "stage2"},
                     "actions": [{"id": "a-d", "component": 8, "image": "d", "platform": {"type": "k8s", "host": "h"}}]},
                    {"id": "s3", "type": "pipeline-end", "setupData": {"name": "end"}}
                ],
                "lineList": [
                    {"startData": {"id": "a-u"}, "endData": {"id": "a-d"},
                     "relation": [[{"From": ".x.y", "To": ".z"}]]}
                ]
            }
        });
        let store = InMemoryStore::new();
        let pipeline = pipeline_with_manifest(manifest);
        compile_definition(&store, &pipeline).unwrap();

        let stages = store.get_stages_by_pipeline(pipeline.id).unwrap();
        assert_eq!(stages.len(), 4);

        let action_d = stages
            .iter()
            .flat_map(|s| store.get_actions_by_stage(s.id).unwrap())
            .find(|a| a.name.is_empty() && a.component == 8)
            .expect("action d present");
        let relation = action_d.manifest.get("relation").unwrap();
        assert_eq!(relation[0]["relation"][0]["From"], ".x.y");
        assert_eq!(relation[0]["relation"][0]["To"], ".z");
    }

    #[test]
    fn skips_add_stage_sentinels() {
        let manifest = json!({
            "define": {
                "stageList": [
                    {"id": "s0", "type": "pipeline-start"},
                    {"id": "ui", "type": "pipeline-add-stage"},
                    {"id": "s3", "type": "pipeline-end"}
                ],
                "lineList": []
            }
        });
        let store = InMemoryStore::new();
        let pipeline = pipeline_with_manifest(manifest);
        compile_definition(&store, &pipeline).unwrap();
        let stages = store.get_stages_by_pipeline(pipeline.id).unwrap();
        assert_eq!(stages.len(), 2);
    }

    #[test]
    fn endpoint_tag_defaults_to_latest() {
        let manifest = json!({
            "define": {
                "stageList": [
                    {"id": "s0", "type": "pipeline-start"},
                    {"id": "s1", "type": "pipeline-stage",
                     "actions": [{"id": "a", "component": 1, "image": "myimg", "platform": {"type": "k8s", "host": "h"}}]}
                ],
                "lineList": []
            }
        });
        let store = InMemoryStore::new();
        let pipeline = pipeline_with_manifest(manifest);
        compile_definition(&store, &pipeline).unwrap();
        let stages = store.get_stages_by_pipeline(pipeline.id).unwrap();
        let run_stage = stages.iter().find(|s| s.stage_type == StageType::Run).unwrap();
        let action = &store.get_actions_by_stage(run_stage.id).unwrap()[0];
        assert_eq!(action.endpoint, "myimg:latest");
    }

    #[test]
    fn round_trip_law_structure_is_stable_under_recompile() {
        let manifest = json!({
            "define": {
                "stageList": [
                    {"id": "s0", "type": "pipeline-start"},
                    {"id": "s1", "type": "pipeline-stage",
                     "actions": [{"id": "a", "component": 1, "image": "img", "platform": {"type": "k8s", "host": "h"}}]},
                    {"id": "s2", "type": "pipeline-end"}
                ],
                "lineList": []
            }
        });
        let store = InMemoryStore::new();
        let pipeline = pipeline_with_manifest(manifest);
        compile_definition(&store, &pipeline).unwrap();
        let first_pass = store.get_stages_by_pipeline(pipeline.id).unwrap().len();
        compile_definition(&store, &pipeline).unwrap();
        let second_pass = store.get_stages_by_pipeline(pipeline.id).unwrap().len();
        assert_eq!(first_pass, second_pass);
    }
}
