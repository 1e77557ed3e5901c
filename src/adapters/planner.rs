//! Command planners.
//!
//! [`HttpPlanner`] asks an OpenAI-compatible chat-completions endpoint for
//! kubectl commands; [`StaticPlanner`] replays a fixed plan.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{CommandCandidate, Plan, PlanRequest, Planner};
use crate::config::PlannerSettings;

const SYSTEM_PROMPT: &str = "You are a Kubernetes cluster assistant. Translate the operator's \
request into kubectl commands. Reply with JSON only, in the form \
{\"commands\": [{\"command\": \"kubectl ...\", \"rationale\": \"...\"}]}. \
List commands in the order they must run. Prefer read-only commands; never invent resource names.";

/// Planner backed by an OpenAI-compatible chat-completions API
pub struct HttpPlanner {
    endpoint: String,
    model: String,
    api_key: String,
    timeout: Duration,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

impl HttpPlanner {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(60),
            client: reqwest::Client::new(),
        }
    }

    /// Create from resolved settings; the API key is read from the configured env var
    pub fn from_settings(settings: &PlannerSettings) -> Result<Self> {
        let api_key = std::env::var(&settings.api_key_env).with_context(|| {
            format!("{} environment variable required for planning", settings.api_key_env)
        })?;
        Ok(Self::new(&settings.endpoint, &settings.model, api_key)
            .with_timeout(Duration::from_secs(settings.timeout_seconds)))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn user_message(request: &PlanRequest) -> String {
        match &request.prior_failure {
            None => format!("Request: {}", request.query),
            Some(failure) => format!(
                "Request: {}\n\nThis command failed:\n{}\n\nError:\n{}\n\n\
                 Reply with a corrected command, or an empty command list if it cannot be fixed.",
                request.query, failure.command, failure.error
            ),
        }
    }
}

#[async_trait]
impl Planner for HttpPlanner {
    fn name(&self) -> &str {
        "http"
    }

    async fn plan(&self, request: &PlanRequest) -> Result<Plan> {
        let url = format!("{}/chat/completions", self.endpoint.trim_end_matches('/'));
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Self::user_message(request),
                },
            ],
            temperature: 0.0,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to reach planner at {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Planner error ({}): {}", status, text);
        }

        let chat: ChatResponse = response
            .json()
            .await
            .context("Failed to decode planner response")?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .context("Planner response has no choices")?;

        debug!(content = %content, "Planner reply");
        let plan = parse_plan(&content);
        if plan.is_empty() {
            warn!(correction = request.is_correction(), "Planner reply contained no commands");
        } else {
            info!(commands = plan.len(), correction = request.is_correction(), "Planner produced commands");
        }
        Ok(plan)
    }
}

#[derive(Debug, Deserialize)]
struct PlanReply {
    #[serde(default)]
    commands: Vec<PlannedCommand>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    rationale: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PlannedCommand {
    Line(String),
    Detailed {
        command: String,
        #[serde(default)]
        rationale: Option<String>,
    },
}

/// Extract candidate commands from a planner reply.
///
/// Tries a fenced ```json block, then the whole reply as JSON, then
/// `kubectl` lines inside a fenced ```bash block. Anything else yields an
/// empty plan.
pub fn parse_plan(content: &str) -> Plan {
    if let Some(plan) = fenced_block(content, "json").and_then(plan_from_json) {
        return plan;
    }
    if let Some(plan) = plan_from_json(content.trim()) {
        return plan;
    }
    if let Some(block) = fenced_block(content, "bash") {
        return Plan::from_lines(block.lines().map(str::trim).filter(|l| l.starts_with("kubectl")));
    }
    Plan::default()
}

fn plan_from_json(text: &str) -> Option<Plan> {
    let reply: PlanReply = serde_json::from_str(text).ok()?;

    let mut candidates: Vec<CommandCandidate> = reply
        .commands
        .into_iter()
        .filter_map(|c| {
            let (command, rationale) = match c {
                PlannedCommand::Line(command) => (command, None),
                PlannedCommand::Detailed { command, rationale } => (command, rationale),
            };
            if command.trim().is_empty() {
                return None;
            }
            let candidate = CommandCandidate::parse(&command);
            Some(match rationale {
                Some(r) => candidate.with_rationale(r),
                None => candidate,
            })
        })
        .collect();

    if candidates.is_empty() {
        if let Some(command) = reply.command.filter(|c| !c.trim().is_empty()) {
            let candidate = CommandCandidate::parse(&command);
            candidates.push(match reply.rationale {
                Some(r) => candidate.with_rationale(r),
                None => candidate,
            });
        }
    }

    Some(Plan::new(candidates))
}

/// Body of the first fenced code block tagged `lang`
fn fenced_block<'a>(content: &'a str, lang: &str) -> Option<&'a str> {
    let fence = format!("```{}", lang);
    let start = content.find(&fence)? + fence.len();
    let rest = &content[start..];
    let end = rest.find("```")?;
    Some(rest[..end].trim())
}

/// Planner that returns a fixed plan and never offers corrections
#[derive(Debug, Clone, Default)]
pub struct StaticPlanner {
    plan: Plan,
}

impl StaticPlanner {
    pub fn new(plan: Plan) -> Self {
        Self { plan }
    }

    /// Plan made of the given command lines
    pub fn from_commands<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(Plan::from_lines(commands))
    }
}

#[async_trait]
impl Planner for StaticPlanner {
    fn name(&self) -> &str {
        "static"
    }

    async fn plan(&self, request: &PlanRequest) -> Result<Plan> {
        if request.is_correction() {
            return Ok(Plan::default());
        }
        Ok(self.plan.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fenced_json() {
        let reply = "Here you go:\n```json\n{\"commands\": [{\"command\": \"kubectl get pods -n prod\", \"rationale\": \"list pods\"}]}\n```";
        let plan = parse_plan(reply);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.candidates[0].command_line(), "kubectl get pods -n prod");
        assert_eq!(plan.candidates[0].rationale(), Some("list pods"));
    }

    #[test]
    fn test_parse_bare_json_variants() {
        let plan = parse_plan(r#"{"commands": ["kubectl get ns", "kubectl get pods"]}"#);
        assert_eq!(plan.len(), 2);

        let single = parse_plan(r#"{"command": "kubectl get nodes"}"#);
        assert_eq!(single.candidates[0].command_line(), "kubectl get nodes");

        let empty = parse_plan(r#"{"commands": []}"#);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_parse_bash_fallback() {
        let reply = "Try:\n```bash\n# list\nkubectl get svc\nkubectl get ing\n```";
        let plan = parse_plan(reply);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.candidates[1].command_line(), "kubectl get ing");
    }

    #[test]
    fn test_parse_prose_is_empty() {
        assert!(parse_plan("I cannot help with that.").is_empty());
    }

    #[test]
    fn test_user_message_includes_failure() {
        let request = PlanRequest::correction("list pods", "kubectl get pod", "error: bad");
        let message = HttpPlanner::user_message(&request);
        assert!(message.contains("kubectl get pod"));
        assert!(message.contains("error: bad"));
    }

    #[tokio::test]
    async fn test_static_planner() {
        let planner = StaticPlanner::from_commands(["kubectl get pods"]);

        let plan = planner.plan(&PlanRequest::initial("q")).await.unwrap();
        assert_eq!(plan.len(), 1);

        let correction = planner
            .plan(&PlanRequest::correction("q", "kubectl get pods", "boom"))
            .await
            .unwrap();
        assert!(correction.is_empty());
    }
}
