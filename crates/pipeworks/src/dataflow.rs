//! Data-flow merger — component C5.
//!
//! For each declared `from → to` relation on an action, locates the
//! upstream Outcome, extracts the JSON-path fragment, assembles the
//! composite input, and POSTs it to the running workload. Retries follow
//! the same blocking-sleep backoff idiom shipper's registry client
//! uses for readiness polling, just with a fixed policy.

use std::thread;

use serde_json::{Map, Value};

use crate::error::{PipelineError, Result};
use crate::json::{get_by_path, set_by_path};
use crate::platform::Platform;
use crate::store::Store;
use crate::types::{Event, Id, RelationEdge};
use pipeworks_retry::{calculate_delay, RetryPolicy};

/// `SendDataToAction(runId, targetPath, podName)`.
///
/// `run_id` is the canonical `"pipelineLogId,stageLogId,actionLogId,
/// sequence,componentRef"` string built by [`crate::engine`].
pub fn send_data_to_action(
    store: &dyn Store,
    platform: &dyn Platform,
    run_id: &str,
    target_path: &str,
    pod_name: &str,
) -> Result<()> {
    let parsed = ParsedRunId::parse(run_id)?;

    let target_log = store
        .get_action_log(parsed.action_log_id)?
        .ok_or_else(|| PipelineError::DataMerge(format!("unknown action log {}", parsed.action_log_id)))?;

    let edges: Vec<RelationEdge> = match target_log.manifest.get("relation") {
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| PipelineError::DataMerge(format!("invalid relation manifest: {e}")))?,
        None => Vec::new(),
    };

    let target_stage_log = store
        .get_stage_logs(parsed.pipeline_log_id)?
        .into_iter()
        .find(|s| s.id == target_log.stage_log_id)
        .ok_or_else(|| PipelineError::DataMerge("target stage log not found".to_string()))?;

    let mut composite = Value::Object(Map::new());
    for edge in &edges {
        let upstream = store
            .get_outcome(
                parsed.pipeline_log_id,
                target_stage_log.pre_stage,
                edge.from_action,
                parsed.sequence,
            )?
            .ok_or_else(|| {
                PipelineError::DataMerge(format!(
                    "no upstream outcome for action {}",
                    edge.from_action
                ))
            })?;

        for mapping in &edge.relation {
            let value = get_by_path(&mapping.from, &upstream.output).ok_or_else(|| {
                PipelineError::DataMerge(format!("missing upstream path {}", mapping.from))
            })?;
            set_by_path(&mapping.to, &mut composite, value.clone());
        }
    }

    if composite.as_object().is_some_and(Map::is_empty) {
        return Ok(());
    }

    let ip = platform.get_ip(pod_name)?;
    let url = format!("http://{ip}{target_path}");

    let outcome = post_with_retry(&url, &composite);

    let payload = match &outcome {
        Ok(body) => serde_json::json!({ "data": composite, "resp": body }),
        Err(e) => serde_json::json!({ "data": composite, "error": e.to_string() }),
    };
    store.insert_event(Event {
        pipeline_log_id: parsed.pipeline_log_id,
        stage_log_id: parsed.stage_log_id,
        action_log_id: parsed.action_log_id,
        sequence: parsed.sequence,
        title: "SEND_DATA".to_string(),
        payload,
    })?;

    Ok(())
}

struct ParsedRunId {
    pipeline_log_id: Id,
    stage_log_id: Id,
    action_log_id: Id,
    sequence: i64,
    #[allow(dead_code)]
    component_ref: i64,
}

impl ParsedRunId {
    fn parse(run_id: &str) -> Result<Self> {
        let parts: Vec<&str> = run_id.split(',').collect();
        let [pipeline_log_id, stage_log_id, action_log_id, sequence, component_ref] = parts[..]
        else {
            return Err(PipelineError::DataMerge(format!("malformed run id {run_id}")));
        };
        let parse_i64 = |s: &str| {
            s.parse::<i64>()
                .map_err(|_| PipelineError::DataMerge(format!("malformed run id {run_id}")))
        };
        Ok(Self {
            pipeline_log_id: parse_i64(pipeline_log_id)?,
            stage_log_id: parse_i64(stage_log_id)?,
            action_log_id: parse_i64(action_log_id)?,
            sequence: parse_i64(sequence)?,
            component_ref: parse_i64(component_ref)?,
        })
    }
}

/// POST `composite` to `url`, retrying per [`RetryPolicy::DataSend`]. Gives
/// up silently (returns `Err`, logged by the caller into the `SEND_DATA`
/// event) after the policy's attempts are exhausted.
fn post_with_retry(url: &str, composite: &Value) -> std::result::Result<String, anyhow::Error> {
    let config = RetryPolicy::DataSend.to_config();
    let client = reqwest::blocking::Client::new();

    let mut last_error = None;
    for attempt in 1..=config.max_attempts {
        let result = client
            .post(url)
            .header("Content-Type", "application/json")
            .json(composite)
            .send()
            .map_err(anyhow::Error::from)
            .and_then(|resp| {
                if resp.status().is_success() {
                    resp.text().map_err(anyhow::Error::from)
                } else {
                    anyhow::bail!("workload returned status {}", resp.status())
                }
            });

        match result {
            Ok(body) => return Ok(body),
            Err(e) => {
                last_error = Some(e);
                if attempt < config.max_attempts {
                    thread::sleep(calculate_delay(&config, attempt));
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("retry loop exited with no attempts")))
}
