//! Queue payload schemas.
//!
//! Two message kinds travel over the queue: builds (including replays of an
//! existing run) on the build topic, and rollbacks on the control topic.
//! Payloads are decoded into [`ControlMessage`], which fails explicitly on
//! shapes it does not recognise instead of falling back to defaults.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::run::StepName;

/// Index used when a message does not name one.
pub const DEFAULT_INDEX: &str = "demo";

/// Dataset used when a message does not name one.
pub const DEFAULT_DATASET: &str = "sample";

fn default_index() -> String {
    DEFAULT_INDEX.to_string()
}

fn default_dataset() -> String {
    DEFAULT_DATASET.to_string()
}

/// How an injected fault behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailMode {
    /// Never fail
    #[default]
    Never,
    /// Fail the first attempt only, keyed by (run_id, step)
    Once,
    /// Fail every attempt
    Always,
}

impl FailMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailMode::Never => "never",
            FailMode::Once => "once",
            FailMode::Always => "always",
        }
    }
}

impl fmt::Display for FailMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step targeted by fault injection, or none.
///
/// Serialized as the step name, or `"none"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FailStep(Option<StepName>);

impl FailStep {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn at(step: StepName) -> Self {
        Self(Some(step))
    }

    pub fn step(&self) -> Option<StepName> {
        self.0
    }

    /// True if this targets `step`.
    pub fn targets(&self, step: StepName) -> bool {
        self.0 == Some(step)
    }
}

impl TryFrom<String> for FailStep {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() || value == "none" {
            return Ok(Self(None));
        }
        value
            .parse::<StepName>()
            .map(|step| Self(Some(step)))
            .map_err(|e| e.to_string())
    }
}

impl From<FailStep> for String {
    fn from(value: FailStep) -> Self {
        value.to_string()
    }
}

impl fmt::Display for FailStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(step) => f.write_str(step.as_str()),
            None => f.write_str("none"),
        }
    }
}

/// Build (or replay) request for one run.
///
/// A message carrying `from_step` is an explicit replay: it starts a new
/// logical attempt over an existing run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildMessage {
    pub run_id: String,
    #[serde(default = "default_index")]
    pub index: String,
    #[serde(default = "default_dataset")]
    pub dataset: String,
    /// Version to build; the worker picks the next free version when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_step: Option<StepName>,
    #[serde(default)]
    pub fail_step: FailStep,
    #[serde(default)]
    pub fail_mode: FailMode,
}

impl BuildMessage {
    pub fn new(run_id: impl Into<String>, index: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            index: index.into(),
            dataset: dataset.into(),
            version: None,
            from_step: None,
            fail_step: FailStep::none(),
            fail_mode: FailMode::Never,
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_from_step(mut self, step: StepName) -> Self {
        self.from_step = Some(step);
        self
    }

    pub fn with_fault(mut self, fail_step: FailStep, fail_mode: FailMode) -> Self {
        self.fail_step = fail_step;
        self.fail_mode = fail_mode;
        self
    }

    pub fn is_replay(&self) -> bool {
        self.from_step.is_some()
    }

    /// Step the executor starts at.
    pub fn start_step(&self) -> StepName {
        self.from_step.unwrap_or(StepName::Discover)
    }

    /// Stable deduplication key: the run id for a build,
    /// `{run_id}:replay:{from_step}` for a replay.
    pub fn idempotency_key(&self) -> String {
        match self.from_step {
            Some(step) => format!("{}:replay:{}", self.run_id, step),
            None => self.run_id.clone(),
        }
    }
}

fn deserialize_steps<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u32>::deserialize(deserializer)?.unwrap_or(1))
}

fn default_steps() -> u32 {
    1
}

/// Request to move an index's active version backwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackMessage {
    #[serde(default = "default_index")]
    pub index: String,
    /// Positions to walk back from the active version (1 = previous)
    #[serde(default = "default_steps", deserialize_with = "deserialize_steps")]
    pub steps: u32,
    /// Explicit target; takes precedence over `steps`
    #[serde(default)]
    pub to_version: Option<u32>,
}

impl RollbackMessage {
    pub fn new(index: impl Into<String>, steps: u32, to_version: Option<u32>) -> Self {
        Self {
            index: index.into(),
            steps,
            to_version,
        }
    }

    /// Stable deduplication key: `{index}:rollback:{steps}:{to_version}`.
    pub fn idempotency_key(&self) -> String {
        let target = self
            .to_version
            .map(|v| v.to_string())
            .unwrap_or_else(|| "none".to_string());
        format!("{}:rollback:{}:{}", self.index, self.steps, target)
    }
}

/// Errors decoding a queue payload.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("unknown message type: {0}")]
    UnknownKind(String),

    #[error("invalid {kind} message: {source}")]
    Invalid {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// A decoded queue payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Build(BuildMessage),
    Rollback(RollbackMessage),
}

impl ControlMessage {
    /// Decode a payload, dispatching on its `type` field.
    ///
    /// `"build"`, `"replay"` or a missing type decode as a build;
    /// `"rollback"` as a rollback. Anything else is rejected.
    pub fn decode(value: Value) -> Result<Self, MessageError> {
        let kind = match &value {
            Value::Object(map) => match map.get("type") {
                None | Some(Value::Null) => None,
                Some(Value::String(s)) => Some(s.clone()),
                Some(other) => return Err(MessageError::UnknownKind(other.to_string())),
            },
            _ => return Err(MessageError::NotAnObject),
        };

        match kind.as_deref() {
            None | Some("build") | Some("replay") => serde_json::from_value(value)
                .map(ControlMessage::Build)
                .map_err(|source| MessageError::Invalid {
                    kind: "build",
                    source,
                }),
            Some("rollback") => serde_json::from_value(value)
                .map(ControlMessage::Rollback)
                .map_err(|source| MessageError::Invalid {
                    kind: "rollback",
                    source,
                }),
            Some(other) => Err(MessageError::UnknownKind(other.to_string())),
        }
    }

    /// Encode as a queue payload, including the `type` tag.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        let (kind, mut value) = match self {
            ControlMessage::Build(msg) => {
                let kind = if msg.is_replay() { "replay" } else { "build" };
                (kind, serde_json::to_value(msg)?)
            }
            ControlMessage::Rollback(msg) => ("rollback", serde_json::to_value(msg)?),
        };
        if let Value::Object(map) = &mut value {
            map.insert("type".to_string(), Value::String(kind.to_string()));
        }
        Ok(value)
    }

    pub fn idempotency_key(&self) -> String {
        match self {
            ControlMessage::Build(msg) => msg.idempotency_key(),
            ControlMessage::Rollback(msg) => msg.idempotency_key(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::Build(msg) if msg.is_replay() => "replay",
            ControlMessage::Build(_) => "build",
            ControlMessage::Rollback(_) => "rollback",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_untyped_build_with_defaults() {
        let msg = ControlMessage::decode(json!({"run_id": "abc"})).unwrap();
        match msg {
            ControlMessage::Build(build) => {
                assert_eq!(build.index, "demo");
                assert_eq!(build.dataset, "sample");
                assert_eq!(build.version, None);
                assert_eq!(build.fail_step, FailStep::none());
                assert_eq!(build.fail_mode, FailMode::Never);
                assert!(!build.is_replay());
            }
            other => panic!("expected build, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_replay() {
        let msg = ControlMessage::decode(json!({
            "type": "replay",
            "run_id": "abc",
            "index": "docs",
            "version": 2,
            "from_step": "chunk",
            "fail_step": "embed",
            "fail_mode": "once"
        }))
        .unwrap();
        let ControlMessage::Build(build) = msg else {
            panic!("expected build");
        };
        assert_eq!(build.from_step, Some(StepName::Chunk));
        assert_eq!(build.start_step(), StepName::Chunk);
        assert!(build.fail_step.targets(StepName::Embed));
        assert_eq!(build.fail_mode, FailMode::Once);
        assert_eq!(build.idempotency_key(), "abc:replay:chunk");
    }

    #[test]
    fn test_decode_rollback() {
        let msg = ControlMessage::decode(json!({
            "type": "rollback",
            "index": "demo",
            "steps": null,
            "to_version": null
        }))
        .unwrap();
        assert_eq!(msg, ControlMessage::Rollback(RollbackMessage::new("demo", 1, None)));
        assert_eq!(msg.idempotency_key(), "demo:rollback:1:none");
    }

    #[test]
    fn test_decode_rejects_unknown_shapes() {
        assert!(matches!(
            ControlMessage::decode(json!({"type": "delete", "index": "demo"})),
            Err(MessageError::UnknownKind(_))
        ));
        assert!(matches!(
            ControlMessage::decode(json!("hello")),
            Err(MessageError::NotAnObject)
        ));
        assert!(matches!(
            ControlMessage::decode(json!({"index": "demo"})),
            Err(MessageError::Invalid { kind: "build", .. })
        ));
        assert!(matches!(
            ControlMessage::decode(json!({"run_id": "a", "from_step": "polish"})),
            Err(MessageError::Invalid { .. })
        ));
    }

    #[test]
    fn test_to_value_tags_kind() {
        let build = ControlMessage::Build(BuildMessage::new("r1", "demo", "sample"));
        assert_eq!(build.to_value().unwrap()["type"], "build");

        let replay = ControlMessage::Build(
            BuildMessage::new("r1", "demo", "sample").with_from_step(StepName::Embed),
        );
        let value = replay.to_value().unwrap();
        assert_eq!(value["type"], "replay");
        assert_eq!(value["from_step"], "embed");
        assert_eq!(value["fail_step"], "none");

        let decoded = ControlMessage::decode(value).unwrap();
        assert_eq!(decoded, replay);
    }

    #[test]
    fn test_build_idempotency_key_is_run_id() {
        let build = BuildMessage::new("run-42", "demo", "sample");
        assert_eq!(build.idempotency_key(), "run-42");
    }

    #[test]
    fn test_fail_step_parsing() {
        assert_eq!(FailStep::try_from("none".to_string()).unwrap(), FailStep::none());
        assert_eq!(
            FailStep::try_from("upsert".to_string()).unwrap(),
            FailStep::at(StepName::Upsert)
        );
        assert!(FailStep::try_from("bogus".to_string()).is_err());
    }
}
