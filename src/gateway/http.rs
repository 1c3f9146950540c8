//! Live Bitbucket Cloud client.
//!
//! Requests carry no timeout: a hung connection keeps the bound panel busy until
//! the server or the OS gives up.

use super::{parser, FeedGateway};
use crate::error::{Error, Result};
use crate::model::{Page, Run, RunKind, Step};
use async_trait::async_trait;
use reqwest::StatusCode;

pub const API_BASE: &str = "https://api.bitbucket.org/2.0";
pub const WEB_BASE: &str = "https://bitbucket.org";

/// Lines of a step log kept for display.
pub const LOG_MAX_LINES: usize = 500;

/// App-password credentials, read from `BITBUCKET_USERNAME` and
/// `BITBUCKET_APP_PASSWORD`.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub app_password: String,
}

impl Credentials {
    pub fn from_env() -> Option<Self> {
        let username = std::env::var("BITBUCKET_USERNAME").ok()?;
        let app_password = std::env::var("BITBUCKET_APP_PASSWORD").ok()?;
        if username.is_empty() || app_password.is_empty() {
            return None;
        }
        Some(Self {
            username,
            app_password,
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("app_password", &"***")
            .finish()
    }
}

pub struct BitbucketGateway {
    client: reqwest::Client,
    api_base: String,
    workspace: String,
    repo: String,
    credentials: Option<Credentials>,
}

impl BitbucketGateway {
    pub fn new(workspace: &str, repo: &str, credentials: Option<Credentials>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("bbw/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(Self {
            client,
            api_base: API_BASE.to_string(),
            workspace: workspace.to_string(),
            repo: repo.to_string(),
            credentials,
        })
    }

    /// Point the client at another API root (a proxy or a test server).
    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.trim_end_matches('/').to_string();
        self
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repositories/{}/{}/{path}",
            self.api_base, self.workspace, self.repo
        )
    }

    fn web_base(&self) -> String {
        format!("{WEB_BASE}/{}/{}", self.workspace, self.repo)
    }

    async fn get(&self, url: &str) -> Result<String> {
        tracing::debug!(url, "GET");
        let mut request = self.client.get(url);
        if let Some(creds) = &self.credentials {
            request = request.basic_auth(&creds.username, Some(&creds.app_password));
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        check_status(status, &body, url)?;
        Ok(body)
    }
}

fn check_status(status: StatusCode, body: &str, url: &str) -> Result<()> {
    if status == StatusCode::NOT_FOUND {
        return Err(Error::NotFound(url.to_string()));
    }
    if !status.is_success() {
        let message = parser::error_message(body).unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unknown status")
                .to_string()
        });
        return Err(Error::UnexpectedStatus {
            status: status.as_u16(),
            message,
        });
    }
    Ok(())
}

/// Newest first unless the caller already picked an order.
fn with_sort(query: &str, sort: &str) -> String {
    if crate::pagination::query_param(query, "sort").is_some() {
        query.to_string()
    } else if query.is_empty() {
        format!("sort={sort}")
    } else {
        format!("{query}&sort={sort}")
    }
}

#[async_trait]
impl FeedGateway for BitbucketGateway {
    async fn fetch_page(&self, feed: RunKind, query: &str) -> Result<Page> {
        match feed {
            RunKind::Pipeline => {
                let url = format!(
                    "{}?{}",
                    self.repo_url("pipelines/"),
                    with_sort(query, "-created_on")
                );
                let body = self.get(&url).await?;
                parser::parse_pipelines_page(&body, &self.web_base())
            }
            RunKind::PullRequest => {
                let url = format!(
                    "{}?{}",
                    self.repo_url("pullrequests"),
                    with_sort(query, "-updated_on")
                );
                let body = self.get(&url).await?;
                parser::parse_pull_requests_page(&body)
            }
        }
    }

    async fn fetch_steps(&self, run: &Run) -> Result<Vec<Step>> {
        match run.kind {
            RunKind::Pipeline => {
                let url = self.repo_url(&format!("pipelines/{}/steps/", run.id));
                let body = self.get(&url).await?;
                parser::parse_steps(&body, &run.id)
            }
            RunKind::PullRequest => {
                let url = self.repo_url(&format!("pullrequests/{}/statuses", run.id));
                let body = self.get(&url).await?;
                parser::parse_commit_statuses(&body, &run.id)
            }
        }
    }

    async fn fetch_step_detail(&self, run: &Run, step_id: &str) -> Result<Step> {
        match run.kind {
            RunKind::Pipeline => {
                let url = self.repo_url(&format!("pipelines/{}/steps/{step_id}", run.id));
                let body = self.get(&url).await?;
                parser::parse_step(&body, &run.id)
            }
            RunKind::PullRequest => self
                .fetch_steps(run)
                .await?
                .into_iter()
                .find(|s| s.id == step_id)
                .ok_or_else(|| Error::NotFound(format!("check {step_id} on PR #{}", run.number))),
        }
    }

    async fn fetch_step_log(&self, run: &Run, step_id: &str) -> Result<String> {
        match run.kind {
            RunKind::Pipeline => {
                let url = self.repo_url(&format!("pipelines/{}/steps/{step_id}/log", run.id));
                let raw = self.get(&url).await?;
                let (text, truncated) = parser::process_log_output(&raw, LOG_MAX_LINES);
                if truncated {
                    Ok(format!("... (showing last {LOG_MAX_LINES} lines)\n{text}"))
                } else {
                    Ok(text)
                }
            }
            RunKind::PullRequest => Err(Error::NotFound(format!(
                "log for external check {step_id}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_urls() {
        let gw = BitbucketGateway::new("acme", "api", None)
            .unwrap()
            .with_api_base("http://localhost:9000/2.0/");
        assert_eq!(
            gw.repo_url("pipelines/"),
            "http://localhost:9000/2.0/repositories/acme/api/pipelines/"
        );
        assert_eq!(gw.web_base(), "https://bitbucket.org/acme/api");
    }

    #[test]
    fn sort_is_added_once() {
        assert_eq!(
            with_sort("page=1&pagelen=10", "-created_on"),
            "page=1&pagelen=10&sort=-created_on"
        );
        assert_eq!(
            with_sort("page=2&sort=-created_on", "-created_on"),
            "page=2&sort=-created_on"
        );
        assert_eq!(with_sort("", "-updated_on"), "sort=-updated_on");
    }

    #[test]
    fn status_mapping() {
        assert_eq!(check_status(StatusCode::OK, "", "u"), Ok(()));
        assert_eq!(
            check_status(StatusCode::NOT_FOUND, "", "https://x/pipelines/{1}"),
            Err(Error::NotFound("https://x/pipelines/{1}".into()))
        );
        assert_eq!(
            check_status(
                StatusCode::FORBIDDEN,
                r#"{"type":"error","error":{"message":"Access denied"}}"#,
                "u"
            ),
            Err(Error::UnexpectedStatus {
                status: 403,
                message: "Access denied".into()
            })
        );
        assert_eq!(
            check_status(StatusCode::BAD_GATEWAY, "<html>", "u"),
            Err(Error::UnexpectedStatus {
                status: 502,
                message: "Bad Gateway".into()
            })
        );
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials {
            username: "dana".into(),
            app_password: "hunter2".into(),
        };
        let dbg = format!("{creds:?}");
        assert!(dbg.contains("dana"));
        assert!(!dbg.contains("hunter2"));
    }
}
