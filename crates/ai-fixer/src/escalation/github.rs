//! GitHub pull request creation using octocrab.

use octocrab::Octocrab;

use crate::error::{FixerError, Result};

/// Labels attached to every fix proposal.
const PR_LABELS: [&str; 2] = ["ai-fix", "automated"];

/// Creates pull requests on GitHub.
pub struct PrCreator {
    client: Octocrab,
}

impl PrCreator {
    /// Create a new PR creator authenticated with `token`.
    pub fn new(token: &str) -> Result<Self> {
        let client = Octocrab::builder()
            .personal_token(token.to_string())
            .build()
            .map_err(|e| FixerError::Config(format!("failed to create GitHub client: {e}")))?;

        Ok(Self { client })
    }

    /// Open a pull request and return its URL.
    pub async fn create_pr(
        &self,
        slug: &RepoSlug,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<String> {
        tracing::debug!(
            owner = %slug.owner,
            repo = %slug.repo,
            head = %head,
            base = %base,
            "Creating pull request"
        );

        let pr = self
            .client
            .pulls(&slug.owner, &slug.repo)
            .create(title, head, base)
            .body(body)
            .send()
            .await
            .map_err(|e| FixerError::ChangeRequest(format!("failed to create pull request: {e}")))?;

        let pr_url = pr.html_url.map_or_else(
            || {
                format!(
                    "https://github.com/{}/{}/pull/{}",
                    slug.owner, slug.repo, pr.number
                )
            },
            |url| url.to_string(),
        );

        let labels: Vec<String> = PR_LABELS.iter().map(ToString::to_string).collect();
        if let Err(e) = self
            .client
            .issues(&slug.owner, &slug.repo)
            .add_labels(pr.number, &labels)
            .await
        {
            tracing::warn!(error = %e, "Failed to add labels to PR");
        }

        Ok(pr_url)
    }
}

/// Owner and name of a GitHub repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSlug {
    pub owner: String,
    pub repo: String,
}

impl RepoSlug {
    /// Parse `owner/repo` out of an HTTPS or SSH clone URL.
    pub fn from_url(url: &str) -> Result<Self> {
        let path = url
            .trim()
            .trim_end_matches('/')
            .trim_end_matches(".git")
            .rsplit_once("github.com")
            .map(|(_, rest)| rest.trim_start_matches([':', '/']))
            .ok_or_else(|| FixerError::Config(format!("not a GitHub repository URL: {url}")))?;

        match path.split('/').collect::<Vec<_>>().as_slice() {
            [owner, repo] if !owner.is_empty() && !repo.is_empty() => Ok(Self {
                owner: (*owner).to_string(),
                repo: (*repo).to_string(),
            }),
            _ => Err(FixerError::Config(format!(
                "cannot determine owner/repo from {url}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_from_https_url() {
        let slug = RepoSlug::from_url("https://github.com/acme/infra.git").unwrap();
        assert_eq!(slug.owner, "acme");
        assert_eq!(slug.repo, "infra");
    }

    #[test]
    fn test_slug_from_ssh_url() {
        let slug = RepoSlug::from_url("git@github.com:acme/infra").unwrap();
        assert_eq!(
            slug,
            RepoSlug {
                owner: "acme".into(),
                repo: "infra".into()
            }
        );
    }

    #[test]
    fn test_slug_rejects_other_hosts() {
        assert!(RepoSlug::from_url("https://gitlab.com/acme/infra").is_err());
        assert!(RepoSlug::from_url("https://github.com/acme").is_err());
    }
}
