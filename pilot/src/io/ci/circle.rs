//! CircleCI provider (REST API v2, plus v1.1 for step-level log URLs).

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use super::CiProvider;
use crate::core::types::{BuildStatus, PullRequest, RepoSlug};
use crate::io::http::HttpGet;

const API_V2: &str = "https://circleci.com/api/v2";
const API_V1: &str = "https://circleci.com/api/v1.1";

/// Log lines kept from the failing step.
pub const LOG_TAIL_LINES: usize = 30;

/// Job statuses that count as a failure worth reporting.
const FAILED_JOB_STATUSES: [&str; 4] = ["failed", "error", "timedout", "infrastructure_fail"];

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Pipeline {
    id: String,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Workflow {
    id: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Job {
    #[serde(default)]
    job_number: Option<u64>,
    name: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct JobDetails {
    #[serde(default)]
    steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
struct Step {
    name: String,
    #[serde(default)]
    actions: Vec<Action>,
}

#[derive(Debug, Deserialize)]
struct Action {
    #[serde(default)]
    failed: Option<bool>,
    #[serde(default)]
    output_url: Option<String>,
}

impl Action {
    fn is_failed(&self) -> bool {
        self.failed == Some(true)
    }
}

#[derive(Debug, Deserialize)]
struct LogLine {
    #[serde(default)]
    message: String,
}

/// CircleCI client for one GitHub repository.
#[derive(Debug)]
pub struct CircleCi<H> {
    http: H,
    repo: RepoSlug,
    token: String,
}

impl<H: HttpGet> CircleCi<H> {
    /// Errors when no API token is configured.
    pub fn new(http: H, repo: RepoSlug, token: Option<String>) -> Result<Self> {
        let token = token.filter(|t| !t.trim().is_empty()).ok_or_else(|| {
            anyhow!(
                "ci_api_token is not set in .pilot/secrets.toml (or PILOT_CI_API_TOKEN)"
            )
        })?;
        Ok(Self { http, repo, token })
    }

    fn pipeline_url(&self, branch: &str) -> Result<String> {
        let base = format!(
            "{API_V2}/project/gh/{}/{}/pipeline",
            self.repo.owner, self.repo.name
        );
        let url = reqwest::Url::parse_with_params(&base, &[("branch", branch)])
            .with_context(|| format!("build pipeline url for branch {branch}"))?;
        Ok(url.to_string())
    }

    /// Latest pipeline on `branch`, or `None` if CircleCI has none (or refused).
    fn latest_pipeline(&self, branch: &str) -> Result<Option<Pipeline>> {
        let response = self.http.get(&self.pipeline_url(branch)?, Some(&self.token))?;
        if !response.is_success() {
            debug!(status = response.status, "pipeline lookup not successful");
            return Ok(None);
        }
        let page: Page<Pipeline> = parse_json(&response.body, "pipeline list")?;
        Ok(page.items.into_iter().next())
    }

    fn first_workflow(&self, pipeline_id: &str) -> Result<Option<Workflow>> {
        let url = format!("{API_V2}/pipeline/{pipeline_id}/workflow");
        let response = self.http.get(&url, Some(&self.token))?;
        if !response.is_success() {
            debug!(status = response.status, "workflow lookup not successful");
            return Ok(None);
        }
        let page: Page<Workflow> = parse_json(&response.body, "workflow list")?;
        Ok(page.items.into_iter().next())
    }

    fn workflow_jobs(&self, workflow_id: &str) -> Result<Vec<Job>> {
        let url = format!("{API_V2}/workflow/{workflow_id}/job");
        let response = self.http.get(&url, Some(&self.token))?;
        if !response.is_success() {
            return Err(anyhow!(
                "job list for workflow {workflow_id} returned HTTP {}",
                response.status
            ));
        }
        let page: Page<Job> = parse_json(&response.body, "job list")?;
        Ok(page.items)
    }

    /// Describe one failed job, reaching into v1.1 for the failing step's log.
    fn describe_failed_job(&self, job: &Job) -> String {
        let number = job
            .job_number
            .map_or_else(|| "?".to_string(), |n| n.to_string());
        let mut text = format!("Job: {} (#{number}) failed.", job.name);

        let Some(job_number) = job.job_number else {
            return text;
        };
        let url = format!(
            "{API_V1}/project/github/{}/{}/{job_number}",
            self.repo.owner, self.repo.name
        );
        let details = match self.http.get(&url, Some(&self.token)) {
            Ok(response) if response.is_success() => {
                match parse_json::<JobDetails>(&response.body, "job details") {
                    Ok(details) => details,
                    Err(err) => {
                        warn!(err = %err, job_number, "unparseable job details");
                        return text;
                    }
                }
            }
            Ok(response) => {
                debug!(status = response.status, job_number, "job details unavailable");
                return text;
            }
            Err(err) => {
                warn!(err = %err, job_number, "job details request failed");
                return text;
            }
        };

        let Some((step, action)) = first_failed_action(&details) else {
            return text;
        };
        let Some(output_url) = action.output_url.as_deref() else {
            return text;
        };
        match self.fetch_log_tail(output_url) {
            Ok(tail) => {
                text.push_str(&format!("\nFAILED STEP: {}\n\nLOG TAIL:\n{tail}", step.name));
            }
            Err(err) => {
                debug!(err = %err, "log output unavailable");
                text.push_str("\n(Could not parse raw log output)");
            }
        }
        text
    }

    /// Step log output is served from a pre-signed URL; no token is sent.
    fn fetch_log_tail(&self, output_url: &str) -> Result<String> {
        let response = self.http.get(output_url, None)?;
        let lines: Vec<LogLine> = parse_json(&response.body, "step log output")?;
        Ok(log_tail(&lines, LOG_TAIL_LINES))
    }
}

impl<H: HttpGet> CiProvider for CircleCi<H> {
    #[instrument(skip_all, fields(pr = %pr.number, branch = %pr.head_branch))]
    fn build_status(&self, pr: &PullRequest) -> Result<BuildStatus> {
        let pipeline = match self.latest_pipeline(&pr.head_branch) {
            Ok(Some(pipeline)) => pipeline,
            Ok(None) => return Ok(BuildStatus::NotFound),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "could not read pipeline list");
                return Ok(unknown());
            }
        };
        let state = pipeline.state.as_deref().unwrap_or_default();
        debug!(pipeline_id = %pipeline.id, state, "latest pipeline");
        if matches!(state, "running" | "pending") {
            return Ok(BuildStatus::Running);
        }

        let workflow = match self.first_workflow(&pipeline.id) {
            Ok(Some(workflow)) => workflow,
            Ok(None) => {
                warn!(pipeline_id = %pipeline.id, "no workflow found for pipeline");
                return Ok(unknown());
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "could not read workflow list");
                return Ok(unknown());
            }
        };
        let status = workflow
            .status
            .as_deref()
            .map_or_else(unknown, BuildStatus::parse);
        debug!(workflow_id = %workflow.id, %status, "workflow status");
        Ok(status)
    }

    #[instrument(skip_all, fields(pr = %pr.number, branch = %pr.head_branch))]
    fn build_failures(&self, pr: &PullRequest) -> Result<String> {
        let response = self
            .http
            .get(&self.pipeline_url(&pr.head_branch)?, Some(&self.token))?;
        if !response.is_success() {
            return Ok("Could not fetch pipeline".to_string());
        }
        let page: Page<Pipeline> = parse_json(&response.body, "pipeline list")?;
        let Some(pipeline) = page.items.into_iter().next() else {
            return Ok("No pipeline found".to_string());
        };
        let Some(workflow) = self.first_workflow(&pipeline.id)? else {
            return Ok("No workflow found".to_string());
        };

        let failed: Vec<Job> = self
            .workflow_jobs(&workflow.id)?
            .into_iter()
            .filter(|job| FAILED_JOB_STATUSES.contains(&job.status.as_str()))
            .collect();
        if failed.is_empty() {
            return Ok(format!("All jobs passed for branch {}.", pr.head_branch));
        }
        debug!(failed_jobs = failed.len(), "collecting failure details");

        let separator = format!("\n\n{}\n\n", "=".repeat(40));
        Ok(failed
            .iter()
            .map(|job| self.describe_failed_job(job))
            .collect::<Vec<_>>()
            .join(&separator))
    }
}

fn unknown() -> BuildStatus {
    BuildStatus::Unknown("unknown".to_string())
}

fn parse_json<T: DeserializeOwned>(body: &str, what: &str) -> Result<T> {
    serde_json::from_str(body).with_context(|| format!("parse CircleCI {what}"))
}

fn first_failed_action(details: &JobDetails) -> Option<(&Step, &Action)> {
    details.steps.iter().find_map(|step| {
        step.actions
            .iter()
            .find(|action| action.is_failed())
            .map(|action| (step, action))
    })
}

/// Join the last `limit` log messages.
fn log_tail(lines: &[LogLine], limit: usize) -> String {
    let start = lines.len().saturating_sub(limit);
    lines[start..]
        .iter()
        .map(|line| line.message.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FixtureHttp;

    const PIPELINE_URL: &str =
        "https://circleci.com/api/v2/project/gh/acme/widgets/pipeline?branch=issue-7";
    const WORKFLOW_URL: &str = "https://circleci.com/api/v2/pipeline/p-1/workflow";
    const JOBS_URL: &str = "https://circleci.com/api/v2/workflow/w-1/job";

    fn slug() -> RepoSlug {
        RepoSlug {
            owner: "acme".to_string(),
            name: "widgets".to_string(),
        }
    }

    fn pr() -> PullRequest {
        PullRequest {
            number: "12".to_string(),
            head_branch: "issue-7".to_string(),
        }
    }

    fn client(http: FixtureHttp) -> CircleCi<FixtureHttp> {
        CircleCi::new(http, slug(), Some("secret".to_string())).expect("client")
    }

    #[test]
    fn missing_token_is_a_construction_error() {
        let err = CircleCi::new(FixtureHttp::new(), slug(), None).unwrap_err();
        assert!(err.to_string().contains("ci_api_token"));
        assert!(CircleCi::new(FixtureHttp::new(), slug(), Some("  ".to_string())).is_err());
    }

    #[test]
    fn no_pipeline_is_not_found() {
        let http = FixtureHttp::new().route(PIPELINE_URL, 200, r#"{"items": []}"#);
        assert_eq!(client(http).build_status(&pr()).expect("status"), BuildStatus::NotFound);

        let http = FixtureHttp::new().route(PIPELINE_URL, 404, "{}");
        assert_eq!(client(http).build_status(&pr()).expect("status"), BuildStatus::NotFound);
    }

    #[test]
    fn running_pipeline_skips_workflow_query() {
        let http = FixtureHttp::new().route(
            PIPELINE_URL,
            200,
            r#"{"items": [{"id": "p-1", "state": "pending"}]}"#,
        );
        let ci = client(http);
        assert_eq!(ci.build_status(&pr()).expect("status"), BuildStatus::Running);
        assert_eq!(ci.http.requested(), vec![PIPELINE_URL.to_string()]);
    }

    #[test]
    fn concluded_pipeline_reports_workflow_status_with_token() {
        let http = FixtureHttp::new()
            .route(
                PIPELINE_URL,
                200,
                r#"{"items": [{"id": "p-1", "state": "created"}]}"#,
            )
            .route(
                WORKFLOW_URL,
                200,
                r#"{"items": [{"id": "w-1", "status": "failed"}]}"#,
            );
        let ci = client(http);
        assert_eq!(ci.build_status(&pr()).expect("status"), BuildStatus::Failed);
        assert!(
            ci.http
                .tokens()
                .iter()
                .all(|token| token.as_deref() == Some("secret"))
        );
    }

    #[test]
    fn missing_or_garbled_workflow_is_unknown() {
        let http = FixtureHttp::new()
            .route(PIPELINE_URL, 200, r#"{"items": [{"id": "p-1", "state": "created"}]}"#)
            .route(WORKFLOW_URL, 200, "not json");
        assert_eq!(client(http).build_status(&pr()).expect("status"), unknown());

        let http = FixtureHttp::new()
            .route(PIPELINE_URL, 200, r#"{"items": [{"id": "p-1", "state": "created"}]}"#)
            .route(WORKFLOW_URL, 500, "");
        assert_eq!(client(http).build_status(&pr()).expect("status"), unknown());
    }

    #[test]
    fn failures_include_failed_step_and_last_thirty_log_lines() {
        let log: Vec<String> = (1..=40)
            .map(|i| format!(r#"{{"message": "line {i}"}}"#))
            .collect();
        let log_json = format!("[{}]", log.join(","));
        let http = FixtureHttp::new()
            .route(PIPELINE_URL, 200, r#"{"items": [{"id": "p-1", "state": "created"}]}"#)
            .route(WORKFLOW_URL, 200, r#"{"items": [{"id": "w-1", "status": "failed"}]}"#)
            .route(
                JOBS_URL,
                200,
                r#"{"items": [
                    {"job_number": 55, "name": "build", "status": "success"},
                    {"job_number": 56, "name": "test", "status": "failed"}
                ]}"#,
            )
            .route(
                "https://circleci.com/api/v1.1/project/github/acme/widgets/56",
                200,
                r#"{"steps": [
                    {"name": "checkout", "actions": [{"failed": null}]},
                    {"name": "cargo test", "actions": [{"failed": true, "output_url": "https://logs.example/56"}]}
                ]}"#,
            )
            .route("https://logs.example/56", 200, &log_json);
        let ci = client(http);

        let text = ci.build_failures(&pr()).expect("failures");
        assert!(text.starts_with("Job: test (#56) failed."));
        assert!(text.contains("FAILED STEP: cargo test"));
        assert!(text.contains("line 11\n"));
        assert!(!text.contains("line 10\n"));
        assert!(text.ends_with("line 40"));
        assert!(!text.contains("build (#55)"));

        let log_token = ci
            .http
            .requests()
            .into_iter()
            .find(|(url, _)| url == "https://logs.example/56")
            .map(|(_, token)| token);
        assert_eq!(log_token, Some(None));
    }

    #[test]
    fn failures_are_joined_with_a_separator() {
        let http = FixtureHttp::new()
            .route(PIPELINE_URL, 200, r#"{"items": [{"id": "p-1", "state": "created"}]}"#)
            .route(WORKFLOW_URL, 200, r#"{"items": [{"id": "w-1", "status": "failed"}]}"#)
            .route(
                JOBS_URL,
                200,
                r#"{"items": [
                    {"job_number": 1, "name": "lint", "status": "failed"},
                    {"job_number": 2, "name": "test", "status": "timedout"}
                ]}"#,
            )
            .route("https://circleci.com/api/v1.1/project/github/acme/widgets/1", 404, "")
            .route("https://circleci.com/api/v1.1/project/github/acme/widgets/2", 404, "");

        let text = client(http).build_failures(&pr()).expect("failures");
        let separator = format!("\n\n{}\n\n", "=".repeat(40));
        assert_eq!(
            text,
            format!("Job: lint (#1) failed.{separator}Job: test (#2) failed.")
        );
    }

    #[test]
    fn unparseable_log_output_is_noted() {
        let http = FixtureHttp::new()
            .route(PIPELINE_URL, 200, r#"{"items": [{"id": "p-1", "state": "created"}]}"#)
            .route(WORKFLOW_URL, 200, r#"{"items": [{"id": "w-1", "status": "failed"}]}"#)
            .route(
                JOBS_URL,
                200,
                r#"{"items": [{"job_number": 3, "name": "test", "status": "failed"}]}"#,
            )
            .route(
                "https://circleci.com/api/v1.1/project/github/acme/widgets/3",
                200,
                r#"{"steps": [{"name": "run", "actions": [{"failed": true, "output_url": "https://logs.example/3"}]}]}"#,
            )
            .route("https://logs.example/3", 200, "<html>");

        let text = client(http).build_failures(&pr()).expect("failures");
        assert!(text.ends_with("(Could not parse raw log output)"));
    }

    #[test]
    fn no_failed_jobs_reports_all_passed() {
        let http = FixtureHttp::new()
            .route(PIPELINE_URL, 200, r#"{"items": [{"id": "p-1", "state": "created"}]}"#)
            .route(WORKFLOW_URL, 200, r#"{"items": [{"id": "w-1", "status": "success"}]}"#)
            .route(
                JOBS_URL,
                200,
                r#"{"items": [{"job_number": 1, "name": "test", "status": "success"}]}"#,
            );
        let text = client(http).build_failures(&pr()).expect("failures");
        assert_eq!(text, "All jobs passed for branch issue-7.");
    }

    #[test]
    fn missing_pipeline_or_workflow_is_described() {
        let http = FixtureHttp::new().route(PIPELINE_URL, 401, "");
        assert_eq!(
            client(http).build_failures(&pr()).expect("failures"),
            "Could not fetch pipeline"
        );

        let http = FixtureHttp::new().route(PIPELINE_URL, 200, r#"{"items": []}"#);
        assert_eq!(
            client(http).build_failures(&pr()).expect("failures"),
            "No pipeline found"
        );

        let http = FixtureHttp::new()
            .route(PIPELINE_URL, 200, r#"{"items": [{"id": "p-1"}]}"#)
            .route(WORKFLOW_URL, 200, r#"{"items": []}"#);
        assert_eq!(
            client(http).build_failures(&pr()).expect("failures"),
            "No workflow found"
        );
    }

    #[test]
    fn job_list_error_surfaces() {
        let http = FixtureHttp::new()
            .route(PIPELINE_URL, 200, r#"{"items": [{"id": "p-1"}]}"#)
            .route(WORKFLOW_URL, 200, r#"{"items": [{"id": "w-1", "status": "failed"}]}"#)
            .route(JOBS_URL, 500, "");
        assert!(client(http).build_failures(&pr()).is_err());
    }
}
