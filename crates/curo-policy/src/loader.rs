//! YAML loader for health policy documents.
//!
//! Parsing is two-phase: serde deserializes the raw document shape, then
//! validation turns strings into the typed model. Unknown detection
//! types and action names surface as specific [`PolicyError`]s instead
//! of opaque serde messages.

use std::path::Path;

use serde::Deserialize;

use crate::error::{PolicyError, PolicyResult};
use crate::types::*;

/// Raw document shape, pre-validation.
#[derive(Debug, Deserialize)]
struct PolicyDoc {
    #[serde(rename = "type")]
    type_name: String,
    /// Accepts both `version: "1.0"` and `version: 1.0`.
    version: serde_yaml::Value,
    #[serde(default)]
    description: String,
    properties: PropertiesDoc,
}

#[derive(Debug, Deserialize)]
struct PropertiesDoc {
    detection: Option<DetectionDoc>,
    recovery: Option<RecoveryDoc>,
}

#[derive(Debug, Deserialize)]
struct DetectionDoc {
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default)]
    options: OptionsDoc,
}

#[derive(Debug, Default, Deserialize)]
struct OptionsDoc {
    /// Signed so that non-positive values can be reported, not wrapped.
    interval: Option<i64>,
    node_update_timeout: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RecoveryDoc {
    #[serde(default)]
    actions: Vec<ActionDoc>,
}

#[derive(Debug, Deserialize)]
struct ActionDoc {
    name: String,
}

impl HealthPolicy {
    /// Parse and validate a policy document from a YAML string.
    pub fn from_yaml(yaml: &str) -> PolicyResult<Self> {
        let doc: PolicyDoc = serde_yaml::from_str(yaml)?;
        validate(doc)
    }

    /// Load and validate a policy document from a file.
    pub fn load(path: &Path) -> PolicyResult<Self> {
        let yaml = std::fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }
}

fn validate(doc: PolicyDoc) -> PolicyResult<HealthPolicy> {
    if doc.type_name.is_empty() {
        return Err(PolicyError::MissingSection("type"));
    }

    let detection_doc = doc
        .properties
        .detection
        .ok_or(PolicyError::MissingSection("properties.detection"))?;
    let recovery_doc = doc
        .properties
        .recovery
        .ok_or(PolicyError::MissingSection("properties.recovery"))?;

    let strategy: DetectionType = detection_doc.type_name.parse()?;

    let interval = match detection_doc.options.interval {
        Some(v) if v <= 0 => return Err(PolicyError::InvalidInterval(v)),
        Some(v) => v as u64,
        None => DetectionOptions::DEFAULT_INTERVAL_SECS,
    };
    let node_update_timeout = match detection_doc.options.node_update_timeout {
        Some(v) if v <= 0 => return Err(PolicyError::InvalidNodeUpdateTimeout(v)),
        Some(v) => v as u64,
        None => DetectionOptions::DEFAULT_NODE_UPDATE_TIMEOUT_SECS,
    };

    if recovery_doc.actions.is_empty() {
        return Err(PolicyError::EmptyActions);
    }
    let actions = recovery_doc
        .actions
        .iter()
        .map(|a| a.name.parse().map(|name| RecoveryActionSpec { name }))
        .collect::<PolicyResult<Vec<_>>>()?;

    Ok(HealthPolicy {
        type_name: doc.type_name,
        version: version_string(&doc.version),
        description: doc.description,
        detection: DetectionSpec {
            strategy,
            options: DetectionOptions {
                interval,
                node_update_timeout,
            },
        },
        recovery: RecoverySpec { actions },
    })
}

/// Render the `version` key as a string whether it was quoted or not.
fn version_string(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Number(n) => n.to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFERENCE: &str = r#"
type: curo.policy.health
version: "1.0"
description: A policy for maintaining node health from a cluster.
properties:
  detection:
    type: NODE_STATUS_POLLING
    options:
      interval: 600
  recovery:
    actions:
      - name: RECREATE
"#;

    #[test]
    fn reference_document_loads() {
        let policy = HealthPolicy::from_yaml(REFERENCE).unwrap();
        assert_eq!(policy.type_name, "curo.policy.health");
        assert_eq!(policy.version, "1.0");
        assert_eq!(policy.detection.strategy, DetectionType::NodeStatusPolling);
        assert_eq!(policy.detection.options.interval, 600);
        assert_eq!(
            policy.recovery.action_names(),
            vec![ActionName::Recreate]
        );
    }

    #[test]
    fn unquoted_version_number() {
        let yaml = REFERENCE.replace("\"1.0\"", "1.0");
        let policy = HealthPolicy::from_yaml(&yaml).unwrap();
        assert_eq!(policy.version, "1.0");
    }

    #[test]
    fn unknown_detection_type_rejected() {
        let yaml = REFERENCE.replace("NODE_STATUS_POLLING", "PING_SWEEP");
        let err = HealthPolicy::from_yaml(&yaml).unwrap_err();
        assert!(matches!(err, PolicyError::UnknownDetectionType(s) if s == "PING_SWEEP"));
    }

    #[test]
    fn unknown_action_rejected() {
        let yaml = REFERENCE.replace("RECREATE", "REIMAGE");
        let err = HealthPolicy::from_yaml(&yaml).unwrap_err();
        assert!(matches!(err, PolicyError::UnknownAction(s) if s == "REIMAGE"));
    }

    #[test]
    fn non_positive_interval_rejected() {
        let yaml = REFERENCE.replace("interval: 600", "interval: 0");
        assert!(matches!(
            HealthPolicy::from_yaml(&yaml),
            Err(PolicyError::InvalidInterval(0))
        ));

        let yaml = REFERENCE.replace("interval: 600", "interval: -5");
        assert!(matches!(
            HealthPolicy::from_yaml(&yaml),
            Err(PolicyError::InvalidInterval(-5))
        ));
    }

    #[test]
    fn empty_actions_rejected() {
        let yaml = r#"
type: curo.policy.health
version: "1.0"
properties:
  detection:
    type: LIFECYCLE_EVENTS
  recovery:
    actions: []
"#;
        assert!(matches!(
            HealthPolicy::from_yaml(yaml),
            Err(PolicyError::EmptyActions)
        ));
    }

    #[test]
    fn missing_detection_rejected() {
        let yaml = r#"
type: curo.policy.health
version: "1.0"
properties:
  recovery:
    actions:
      - name: REBOOT
"#;
        assert!(matches!(
            HealthPolicy::from_yaml(yaml),
            Err(PolicyError::MissingSection("properties.detection"))
        ));
    }

    #[test]
    fn missing_recovery_rejected() {
        let yaml = r#"
type: curo.policy.health
version: "1.0"
properties:
  detection:
    type: NODE_STATUS_POLLING
"#;
        assert!(matches!(
            HealthPolicy::from_yaml(yaml),
            Err(PolicyError::MissingSection("properties.recovery"))
        ));
    }

    #[test]
    fn options_default_when_omitted() {
        let yaml = r#"
type: curo.policy.health
version: "1.1"
properties:
  detection:
    type: LB_STATUS_POLLING
  recovery:
    actions:
      - name: REBOOT
      - name: RECREATE
"#;
        let policy = HealthPolicy::from_yaml(yaml).unwrap();
        assert_eq!(
            policy.detection.options.interval,
            DetectionOptions::DEFAULT_INTERVAL_SECS
        );
        assert_eq!(
            policy.detection.options.node_update_timeout,
            DetectionOptions::DEFAULT_NODE_UPDATE_TIMEOUT_SECS
        );
        // Order preserved.
        assert_eq!(
            policy.recovery.action_names(),
            vec![ActionName::Reboot, ActionName::Recreate]
        );
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        assert!(matches!(
            HealthPolicy::from_yaml(": not yaml : ["),
            Err(PolicyError::Parse(_))
        ));
    }

    #[test]
    fn action_names_round_trip_display() {
        for name in ["REBOOT", "REBUILD", "RECREATE"] {
            let parsed: ActionName = name.parse().unwrap();
            assert_eq!(parsed.to_string(), name);
        }
    }
}
