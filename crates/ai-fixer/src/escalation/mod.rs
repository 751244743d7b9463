//! Escalation after a verified rollout.
//!
//! A converged rollout is proposed back to the manifest repository as a pull
//! request; anything else pages a human. Each attempt takes exactly one of the
//! two paths.

pub mod git;
pub mod github;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notify::{Notifier, NotifyEvent};
use tracing::info;

use crate::error::Result;
use crate::rollout::RolloutOutcome;

use self::git::GitMirror;
use self::github::{PrCreator, RepoSlug};

/// A fix that held up and should be proposed to the manifest repository.
#[derive(Debug, Clone)]
pub struct ChangeRequest {
    pub namespace: String,
    pub deployment: String,
    /// The manifest that was applied
    pub manifest: String,
    /// The warnings that prompted the fix
    pub errors: String,
}

/// A fix that did not hold up.
#[derive(Debug, Clone)]
pub struct HumanEscalation {
    pub namespace: String,
    pub deployment: String,
    pub outcome: RolloutOutcome,
    /// Combined warnings, stream errors and the final replica state
    pub report: String,
}

impl HumanEscalation {
    fn to_event(&self) -> NotifyEvent {
        let namespace = self.namespace.clone();
        let deployment = self.deployment.clone();
        let report = self.report.clone();
        let timestamp = Utc::now();
        match self.outcome {
            RolloutOutcome::TimedOut => NotifyEvent::RolloutUnverified {
                namespace,
                deployment,
                report,
                timestamp,
            },
            RolloutOutcome::Failed | RolloutOutcome::Succeeded => NotifyEvent::RolloutFailed {
                namespace,
                deployment,
                report,
                timestamp,
            },
        }
    }
}

/// Publishes an applied fix for review.
#[async_trait]
pub trait ChangeRequester: Send + Sync {
    /// Open a change request and return its URL.
    async fn open_change_request(&self, request: &ChangeRequest) -> Result<String>;
}

/// Reaches a human operator.
#[async_trait]
pub trait HumanNotifier: Send + Sync {
    async fn notify_human(&self, escalation: &HumanEscalation) -> Result<()>;
}

#[async_trait]
impl HumanNotifier for Notifier {
    async fn notify_human(&self, escalation: &HumanEscalation) -> Result<()> {
        self.escalate(escalation.to_event()).await?;
        Ok(())
    }
}

/// Routes a finished rollout to the change-request or the human path.
pub struct EscalationDispatcher {
    change_requests: Arc<dyn ChangeRequester>,
    humans: Arc<dyn HumanNotifier>,
}

impl EscalationDispatcher {
    #[must_use]
    pub fn new(change_requests: Arc<dyn ChangeRequester>, humans: Arc<dyn HumanNotifier>) -> Self {
        Self {
            change_requests,
            humans,
        }
    }

    /// Propose the fix; returns the change request URL.
    pub async fn request_change(&self, request: &ChangeRequest) -> Result<String> {
        let url = self.change_requests.open_change_request(request).await?;
        info!(
            namespace = %request.namespace,
            deployment = %request.deployment,
            url = %url,
            "Change request opened"
        );
        Ok(url)
    }

    /// Hand the failure to a human. Not retried.
    pub async fn notify_human(&self, escalation: &HumanEscalation) -> Result<()> {
        self.humans.notify_human(escalation).await?;
        info!(
            namespace = %escalation.namespace,
            deployment = %escalation.deployment,
            outcome = ?escalation.outcome,
            "Human notified"
        );
        Ok(())
    }
}

/// Branch name for a fix proposed at `now`.
#[must_use]
pub fn branch_name(now: DateTime<Utc>) -> String {
    format!("ai-fix/{}", now.format("%Y%m%d-%H%M%S"))
}

fn pr_title(request: &ChangeRequest) -> String {
    format!(
        "AI fix for deployment {}/{}",
        request.namespace, request.deployment
    )
}

fn pr_body(request: &ChangeRequest) -> String {
    format!(
        "The cluster reported these errors for `{}/{}`:\n\n```\n{}\n```\n\n\
         This PR proposes an AI-generated fix for these errors. The fix was \
         applied to the cluster and the rollout reached its desired replica count.\n",
        request.namespace, request.deployment, request.errors
    )
}

/// Settings for [`GitHubChangeRequester`].
#[derive(Debug, Clone)]
pub struct GitHubSettings {
    pub repo_url: String,
    pub token: String,
    pub base_branch: String,
    /// Path of the managed manifest inside the repository
    pub manifest_path: String,
    /// Where the local mirror lives
    pub work_dir: PathBuf,
}

/// [`ChangeRequester`] that pushes a branch and opens a GitHub pull request.
pub struct GitHubChangeRequester {
    mirror: GitMirror,
    prs: PrCreator,
    slug: RepoSlug,
    base_branch: String,
    manifest_path: String,
    // git commands on one working copy must not interleave
    lock: tokio::sync::Mutex<()>,
}

impl GitHubChangeRequester {
    pub fn new(settings: GitHubSettings) -> Result<Self> {
        let slug = RepoSlug::from_url(&settings.repo_url)?;
        let prs = PrCreator::new(&settings.token)?;
        let mirror = GitMirror::new(settings.repo_url, settings.token, settings.work_dir);
        Ok(Self {
            mirror,
            prs,
            slug,
            base_branch: settings.base_branch,
            manifest_path: settings.manifest_path,
            lock: tokio::sync::Mutex::new(()),
        })
    }
}

#[async_trait]
impl ChangeRequester for GitHubChangeRequester {
    async fn open_change_request(&self, request: &ChangeRequest) -> Result<String> {
        let _guard = self.lock.lock().await;
        let branch = branch_name(Utc::now());

        self.mirror.clone_or_update(&self.base_branch).await?;
        self.mirror.create_branch(&branch, &self.base_branch).await?;
        self.mirror
            .write_file(&self.manifest_path, &request.manifest)
            .await?;
        self.mirror
            .commit(&self.manifest_path, &pr_title(request))
            .await?;
        self.mirror.push(&branch).await?;

        self.prs
            .create_pr(
                &self.slug,
                &pr_title(request),
                &pr_body(request),
                &branch,
                &self.base_branch,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;

    fn change() -> ChangeRequest {
        ChangeRequest {
            namespace: "app-namespace".into(),
            deployment: "nginx".into(),
            manifest: "kind: Deployment".into(),
            errors: "[2024-01-01T00:00:00Z] app-namespace/nginx-1: BackOff - crash".into(),
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChangeRequester for Recorder {
        async fn open_change_request(&self, request: &ChangeRequest) -> Result<String> {
            self.events
                .lock()
                .unwrap()
                .push(format!("pr:{}", request.deployment));
            Ok("https://github.com/acme/infra/pull/7".into())
        }
    }

    #[async_trait]
    impl HumanNotifier for Recorder {
        async fn notify_human(&self, escalation: &HumanEscalation) -> Result<()> {
            self.events
                .lock()
                .unwrap()
                .push(format!("call:{:?}", escalation.outcome));
            Ok(())
        }
    }

    #[test]
    fn test_branch_name_uses_timestamp() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(branch_name(now), "ai-fix/20240309-140507");
    }

    #[test]
    fn test_pr_body_carries_errors() {
        let body = pr_body(&change());
        assert!(body.contains("BackOff - crash"));
        assert!(body.contains("This PR proposes an AI-generated fix for these errors"));
        assert_eq!(pr_title(&change()), "AI fix for deployment app-namespace/nginx");
    }

    #[test]
    fn test_escalation_event_kind_follows_outcome() {
        let mut escalation = HumanEscalation {
            namespace: "app-namespace".into(),
            deployment: "nginx".into(),
            outcome: RolloutOutcome::TimedOut,
            report: "no status".into(),
        };
        assert!(matches!(
            escalation.to_event(),
            NotifyEvent::RolloutUnverified { .. }
        ));

        escalation.outcome = RolloutOutcome::Failed;
        let event = escalation.to_event();
        assert!(matches!(event, NotifyEvent::RolloutFailed { .. }));
        assert_eq!(event.report(), "no status");
    }

    #[tokio::test]
    async fn test_dispatcher_takes_one_path_per_call() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = EscalationDispatcher::new(recorder.clone(), recorder.clone());

        let url = dispatcher.request_change(&change()).await.unwrap();
        assert_eq!(url, "https://github.com/acme/infra/pull/7");
        assert_eq!(*recorder.events.lock().unwrap(), vec!["pr:nginx"]);
    }

    #[tokio::test]
    async fn test_disabled_notifier_reports_escalation_error() {
        let escalation = HumanEscalation {
            namespace: "app-namespace".into(),
            deployment: "nginx".into(),
            outcome: RolloutOutcome::Failed,
            report: "1 of 3 ready".into(),
        };
        let err = Notifier::disabled()
            .notify_human(&escalation)
            .await
            .unwrap_err();
        assert_eq!(err.category(), "escalation");
    }
}
