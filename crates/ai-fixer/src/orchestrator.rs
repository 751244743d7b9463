//! One remediation cycle per drained batch of warnings.
//!
//! Stages run strictly in order: fetch the manifest, ask for a fix, extract
//! it, apply it, watch the rollout, escalate. A failure before the rollout
//! watch ends the cycle without escalating; once a fix is live, the rollout
//! outcome picks exactly one escalation path.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::cluster::WorkloadClient;
use crate::error::{FixerError, Result};
use crate::escalation::{
    ChangeRequest, ChangeRequester, EscalationDispatcher, HumanEscalation, HumanNotifier,
};
use crate::extract::extract_fenced_block;
use crate::inference::{build_fix_prompt, FixGenerator};
use crate::manifest::ManifestSource;
use crate::rollout::{RolloutMonitor, RolloutOutcome, RolloutReport};

/// Stages of a remediation cycle, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStage {
    Fetching,
    Requesting,
    Extracting,
    Applying,
    Verifying,
    EscalatingSuccess,
    EscalatingFailure,
}

impl CycleStage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fetching => "fetching",
            Self::Requesting => "requesting",
            Self::Extracting => "extracting",
            Self::Applying => "applying",
            Self::Verifying => "verifying",
            Self::EscalatingSuccess => "escalating_success",
            Self::EscalatingFailure => "escalating_failure",
        }
    }
}

impl fmt::Display for CycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a cycle ended.
#[derive(Debug)]
pub enum CycleOutcome {
    /// A step before the rollout watch failed; nothing was escalated
    Aborted { stage: CycleStage, error: FixerError },
    /// The inference response held no fenced block
    NoFixExtracted,
    /// The fix held and a change request was opened
    ChangeRequested { url: String },
    /// The fix did not hold and a human was called
    HumanNotified { rollout: RolloutOutcome },
    /// The chosen escalation path itself failed
    EscalationFailed { stage: CycleStage, error: FixerError },
}

impl CycleOutcome {
    /// Short label for logs and the status endpoint.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Aborted { .. } => "aborted",
            Self::NoFixExtracted => "no_fix_extracted",
            Self::ChangeRequested { .. } => "change_requested",
            Self::HumanNotified { .. } => "human_notified",
            Self::EscalationFailed { .. } => "escalation_failed",
        }
    }
}

/// Namespace and name of the deployment a fix was applied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedTarget {
    pub namespace: String,
    pub name: String,
}

/// Record of a single cycle.
#[derive(Debug)]
pub struct RemediationAttempt {
    pub combined_errors: String,
    pub extracted_manifest: Option<String>,
    pub applied: Option<AppliedTarget>,
    pub rollout: Option<RolloutReport>,
    pub outcome: CycleOutcome,
}

impl RemediationAttempt {
    fn new(combined_errors: String) -> Self {
        Self {
            combined_errors,
            extracted_manifest: None,
            applied: None,
            rollout: None,
            outcome: CycleOutcome::NoFixExtracted,
        }
    }

    fn finish(mut self, outcome: CycleOutcome) -> Self {
        self.outcome = outcome;
        self
    }
}

/// External collaborators of the orchestrator.
pub struct Collaborators {
    pub manifests: Arc<dyn ManifestSource>,
    pub generator: Arc<dyn FixGenerator>,
    pub workloads: Arc<dyn WorkloadClient>,
    pub change_requests: Arc<dyn ChangeRequester>,
    pub humans: Arc<dyn HumanNotifier>,
}

/// Which deployment fixes may touch.
#[derive(Debug, Clone)]
pub struct TargetPolicy {
    /// Used when the manifest carries no namespace
    pub default_namespace: String,
    /// When set, fixes for any other deployment are refused
    pub deployment: Option<String>,
}

/// Drives a remediation cycle through its stages.
pub struct RemediationOrchestrator {
    manifests: Arc<dyn ManifestSource>,
    generator: Arc<dyn FixGenerator>,
    workloads: Arc<dyn WorkloadClient>,
    monitor: RolloutMonitor,
    escalation: EscalationDispatcher,
    target: TargetPolicy,
}

impl RemediationOrchestrator {
    #[must_use]
    pub fn new(
        collaborators: Collaborators,
        target: TargetPolicy,
        rollout_timeout: Duration,
    ) -> Self {
        let Collaborators {
            manifests,
            generator,
            workloads,
            change_requests,
            humans,
        } = collaborators;

        Self {
            manifests,
            generator,
            monitor: RolloutMonitor::new(workloads.clone(), rollout_timeout),
            workloads,
            escalation: EscalationDispatcher::new(change_requests, humans),
            target,
        }
    }

    /// Run one cycle for a non-empty batch of warnings.
    pub async fn run_cycle(&self, combined_errors: String) -> RemediationAttempt {
        let mut attempt = RemediationAttempt::new(combined_errors);
        info!(
            lines = attempt.combined_errors.lines().count(),
            "Starting remediation cycle"
        );

        let manifest = match self.manifests.fetch().await {
            Ok(manifest) => manifest,
            Err(e) => return abort(attempt, CycleStage::Fetching, e),
        };

        let prompt = build_fix_prompt(&manifest, &attempt.combined_errors);
        let response = match self.generator.request_fix(&prompt).await {
            Ok(response) => response,
            Err(e) => return abort(attempt, CycleStage::Requesting, e),
        };

        let fixed = match extract_fenced_block(&response) {
            Ok(fixed) => fixed,
            Err(e) => {
                info!(
                    stage = %CycleStage::Extracting,
                    reason = %e,
                    "No fix proposed, dropping cycle"
                );
                return attempt.finish(CycleOutcome::NoFixExtracted);
            }
        };
        attempt.extracted_manifest = Some(fixed.clone());

        let target = match self.apply(&fixed).await {
            Ok(target) => target,
            Err(e) => return abort(attempt, CycleStage::Applying, e),
        };
        attempt.applied = Some(target.clone());

        let report = self.monitor.verify(&target.namespace, &target.name).await;
        let outcome = if report.outcome == RolloutOutcome::Succeeded {
            self.escalate_success(&attempt, &target, fixed).await
        } else {
            self.escalate_failure(&attempt, &target, &report).await
        };
        attempt.rollout = Some(report);
        attempt.finish(outcome)
    }

    /// Replace the live deployment with the extracted manifest.
    ///
    /// The deployment must already exist; it is never created.
    async fn apply(&self, manifest: &str) -> Result<AppliedTarget> {
        let mut deployment = parse_deployment(manifest)?;

        let name = deployment
            .metadata
            .name
            .clone()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| FixerError::InvalidManifest("metadata.name is missing".to_string()))?;
        let namespace = deployment
            .metadata
            .namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| self.target.default_namespace.clone());

        if let Some(expected) = &self.target.deployment {
            if *expected != name {
                return Err(FixerError::TargetMismatch {
                    expected: expected.clone(),
                    found: name,
                });
            }
        }

        let current = self
            .workloads
            .get(&namespace, &name)
            .await?
            .ok_or_else(|| FixerError::TargetNotFound {
                namespace: namespace.clone(),
                name: name.clone(),
            })?;

        deployment.metadata.namespace = Some(namespace.clone());
        deployment.metadata.resource_version = current.metadata.resource_version;
        self.workloads.replace(&deployment).await?;

        info!(namespace = %namespace, deployment = %name, "Applied fixed manifest");
        Ok(AppliedTarget { namespace, name })
    }

    async fn escalate_success(
        &self,
        attempt: &RemediationAttempt,
        target: &AppliedTarget,
        manifest: String,
    ) -> CycleOutcome {
        let request = ChangeRequest {
            namespace: target.namespace.clone(),
            deployment: target.name.clone(),
            manifest,
            errors: attempt.combined_errors.clone(),
        };

        match self.escalation.request_change(&request).await {
            Ok(url) => CycleOutcome::ChangeRequested { url },
            Err(e) => escalation_failed(CycleStage::EscalatingSuccess, e),
        }
    }

    async fn escalate_failure(
        &self,
        attempt: &RemediationAttempt,
        target: &AppliedTarget,
        report: &RolloutReport,
    ) -> CycleOutcome {
        let escalation = HumanEscalation {
            namespace: target.namespace.clone(),
            deployment: target.name.clone(),
            outcome: report.outcome,
            report: failure_report(&attempt.combined_errors, report, target),
        };

        match self.escalation.notify_human(&escalation).await {
            Ok(()) => CycleOutcome::HumanNotified {
                rollout: report.outcome,
            },
            Err(e) => escalation_failed(CycleStage::EscalatingFailure, e),
        }
    }
}

/// First `Deployment` document of a possibly multi-document manifest.
fn parse_deployment(manifest: &str) -> Result<Deployment> {
    let invalid = |e: serde_yaml::Error| FixerError::InvalidManifest(e.to_string());

    for document in serde_yaml::Deserializer::from_str(manifest) {
        let value = serde_yaml::Value::deserialize(document).map_err(invalid)?;
        if value.get("kind").and_then(serde_yaml::Value::as_str) == Some("Deployment") {
            return serde_yaml::from_value(value).map_err(invalid);
        }
    }

    Err(FixerError::InvalidManifest(
        "no Deployment document found".to_string(),
    ))
}

/// Text read to the operator when a fix did not hold.
#[must_use]
pub fn failure_report(
    combined_errors: &str,
    report: &RolloutReport,
    target: &AppliedTarget,
) -> String {
    let mut text =
        format!("{combined_errors}\nAfter updating the deployment its status changed:\n");
    for message in &report.stream_errors {
        text.push_str(message);
        text.push('\n');
    }
    text.push_str(&report.describe(&target.namespace, &target.name));
    text
}

fn abort(
    attempt: RemediationAttempt,
    stage: CycleStage,
    error: FixerError,
) -> RemediationAttempt {
    warn!(
        stage = %stage,
        category = error.category(),
        error = %error,
        "Remediation cycle aborted"
    );
    attempt.finish(CycleOutcome::Aborted { stage, error })
}

fn escalation_failed(stage: CycleStage, error: FixerError) -> CycleOutcome {
    error!(stage = %stage, error = %error, "Escalation failed");
    CycleOutcome::EscalationFailed { stage, error }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(stream_errors: Vec<&str>) -> RolloutReport {
        RolloutReport {
            outcome: RolloutOutcome::Failed,
            desired: Some(3),
            ready: Some(1),
            updates_seen: 2,
            stream_errors: stream_errors.into_iter().map(String::from).collect(),
        }
    }

    fn target() -> AppliedTarget {
        AppliedTarget {
            namespace: "app-namespace".into(),
            name: "nginx".into(),
        }
    }

    #[test]
    fn test_failure_report_layout() {
        let text = failure_report(
            "line one\nline two",
            &report(vec!["watch closed"]),
            &target(),
        );
        assert_eq!(
            text,
            "line one\nline two\n\
             After updating the deployment its status changed:\n\
             watch closed\n\
             Deployment app-namespace/nginx has 1 of 3 desired replicas ready after the rollout window"
        );
    }

    #[test]
    fn test_failure_report_without_stream_errors() {
        let text = failure_report("boom", &report(vec![]), &target());
        assert!(text.starts_with(
            "boom\nAfter updating the deployment its status changed:\nDeployment"
        ));
    }

    const DEPLOYMENT_DOC: &str = "apiVersion: apps/v1
kind: Deployment
metadata:
  name: nginx
spec:
  selector:
    matchLabels:
      app: nginx
  template:
    metadata:
      labels:
        app: nginx";

    #[test]
    fn test_parse_deployment_picks_deployment_among_documents() {
        let manifest = format!(
            "---\napiVersion: v1\nkind: Service\nmetadata:\n  name: nginx-svc\n---\n{DEPLOYMENT_DOC}\n"
        );
        let deployment = parse_deployment(&manifest).unwrap();
        assert_eq!(deployment.metadata.name.as_deref(), Some("nginx"));
    }

    #[test]
    fn test_parse_deployment_without_deployment_document() {
        let err = parse_deployment("apiVersion: v1\nkind: Service\nmetadata:\n  name: svc\n")
            .unwrap_err();
        assert!(matches!(err, FixerError::InvalidManifest(_)));
    }

    #[test]
    fn test_stage_labels() {
        assert_eq!(CycleStage::EscalatingFailure.to_string(), "escalating_failure");
        assert_eq!(CycleOutcome::NoFixExtracted.label(), "no_fix_extracted");
    }
}
