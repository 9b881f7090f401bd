//! Issue tracker client: creates review tickets through the tracker REST API.

use anyhow::{Context, Result};
use qaqc_core::config::TrackerConfig;
use qaqc_core::review::{TicketRequest, TicketTracker};
use serde::Deserialize;
use serde_json::json;

const CREATE_ISSUE_PATH: &str = "/rest/api/2/issue";

#[derive(Debug, Deserialize)]
struct CreatedIssue {
    key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct JiraTracker {
    host: String,
    project: String,
    issue_type: String,
    token: Option<String>,
}

impl JiraTracker {
    pub fn from_config(config: &TrackerConfig) -> Self {
        Self {
            host: config.host.trim_end_matches('/').to_string(),
            project: config.project.clone(),
            issue_type: config.issue_type.clone(),
            token: config.token(),
        }
    }

    fn payload(&self, request: &TicketRequest<'_>) -> serde_json::Value {
        json!({
            "fields": {
                "project": { "key": self.project },
                "issuetype": { "name": self.issue_type },
                "summary": request.summary,
                "description": request.body,
                "reporter": { "name": request.reporter },
                "labels": [request.site_id],
            }
        })
    }
}

impl TicketTracker for JiraTracker {
    fn create_tracking_ticket(&self, request: &TicketRequest<'_>) -> Result<Option<String>> {
        let url = format!("{}{CREATE_ISSUE_PATH}", self.host);

        let mut call = ureq::post(&url)
            .set("Accept", "application/json")
            .set("User-Agent", "qaqc-auto");

        if let Some(token) = &self.token {
            call = call.set("Authorization", &format!("Bearer {token}"));
        }

        let response = call
            .send_json(self.payload(request))
            .map_err(|err| anyhow::anyhow!("tracker request failed for {url}: {err}"))?;

        let created: CreatedIssue = response
            .into_json()
            .context("failed to decode tracker create-issue response")?;
        Ok(created.key)
    }
}
