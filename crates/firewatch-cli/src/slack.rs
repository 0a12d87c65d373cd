use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use firewatch_core::AlertRecord;

use crate::config::{HTTP_TIMEOUT_SECS, RuntimeConfig, SlackConfig};

pub const POST_MESSAGE_ENDPOINT: &str = "https://slack.com/api/chat.postMessage";
/// Slack rejects section text longer than this.
const SECTION_TEXT_LIMIT: usize = 3000;
/// Slack rejects messages with more blocks than this.
const MESSAGE_BLOCK_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlackMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Block {
    Section { text: TextObject },
    Divider,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextObject {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

impl Block {
    fn markdown(text: impl Into<String>) -> Self {
        Block::Section {
            text: TextObject {
                kind: "mrkdwn",
                text: text.into(),
            },
        }
    }
}

pub trait Notifier {
    fn send(&self, message: &SlackMessage) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone)]
pub struct SlackNotifier {
    client: Client,
    token: String,
}

impl SlackNotifier {
    pub fn new(config: &SlackConfig) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(NotifyError::BuildClient)?;

        Ok(Self {
            client,
            token: config.token.clone(),
        })
    }
}

impl Notifier for SlackNotifier {
    fn send(&self, message: &SlackMessage) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(POST_MESSAGE_ENDPOINT)
            .bearer_auth(&self.token)
            .json(message)
            .send()
            .map_err(|source| NotifyError::Transport { source })?;

        let status_code = response.status().as_u16();
        let body = response
            .text()
            .map_err(|source| NotifyError::Transport { source })?;

        parse_post_response(status_code, &body)
    }
}

/// Builds the alert message: a header naming the threshold and search
/// window, a divider, then one linked line per alert. Alerts that do not fit
/// in the block limit are summarized in a closing "and N more" section.
pub fn format_alerts(
    alerts: &[AlertRecord],
    config: &RuntimeConfig,
    channel: Option<&str>,
) -> SlackMessage {
    let header = format!(
        "The following issues have received more than {} reactions in the last {} months:",
        config.alert_threshold, config.issue_age_months
    );

    let lines: Vec<String> = alerts
        .iter()
        .map(|alert| {
            format!(
                "<{}|{}> - {} reactions",
                config.issue_url(alert.id),
                escape_mrkdwn(&alert.title),
                alert.reaction_count
            )
        })
        .collect();

    let mut sections = chunk_lines(&lines, SECTION_TEXT_LIMIT);
    let room = MESSAGE_BLOCK_LIMIT - 2;
    if sections.len() > room {
        sections.truncate(room - 1);
        let shown: usize = sections.iter().map(|chunk| chunk.lines).sum();
        sections.push(Chunk {
            text: format!("…and {} more issues", lines.len() - shown),
            lines: 0,
        });
    }

    let mut blocks = vec![Block::markdown(header), Block::Divider];
    blocks.extend(sections.into_iter().map(|chunk| Block::markdown(chunk.text)));

    SlackMessage {
        channel: channel.map(ToOwned::to_owned),
        blocks,
    }
}

pub fn escape_mrkdwn(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

struct Chunk {
    text: String,
    lines: usize,
}

/// Packs newline-terminated lines into texts of at most `limit` bytes. A
/// single oversized line still gets a text of its own.
fn chunk_lines(lines: &[String], limit: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut current = Chunk {
        text: String::new(),
        lines: 0,
    };

    for line in lines {
        if current.lines > 0 && current.text.len() + line.len() + 1 > limit {
            chunks.push(std::mem::replace(
                &mut current,
                Chunk {
                    text: String::new(),
                    lines: 0,
                },
            ));
        }
        current.text.push_str(line);
        current.text.push('\n');
        current.lines += 1;
    }

    if current.lines > 0 {
        chunks.push(current);
    }
    chunks
}

pub fn parse_post_response(status_code: u16, body: &str) -> Result<(), NotifyError> {
    if !(200..=299).contains(&status_code) {
        return Err(NotifyError::Http {
            status: status_code,
            message: format!("HTTP {status_code}"),
        });
    }

    let payload: PostMessageResponse =
        serde_json::from_str(body).map_err(NotifyError::InvalidResponse)?;
    if payload.ok {
        return Ok(());
    }

    Err(NotifyError::Rejected(
        payload
            .error
            .filter(|error| !error.trim().is_empty())
            .unwrap_or_else(|| "unknown_error".to_string()),
    ))
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to build slack client")]
    BuildClient(#[source] reqwest::Error),
    #[error("slack request failed")]
    Transport {
        #[source]
        source: reqwest::Error,
    },
    #[error("slack api error ({status}): {message}")]
    Http { status: u16, message: String },
    #[error("slack rejected message: {0}")]
    Rejected(String),
    #[error("invalid slack response")]
    InvalidResponse(#[source] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::Value;

    use super::*;
    use crate::config::{DEFAULT_API_BASE_URL, DEFAULT_SERVER_URL, RetryPolicy};

    fn fixture_config() -> RuntimeConfig {
        RuntimeConfig {
            github_token: "ghs_demo".to_string(),
            owner: "acme".to_string(),
            repo: "rocket".to_string(),
            alert_threshold: 10,
            issue_age_months: 3,
            slack: None,
            data_file: PathBuf::from("firewatch.data"),
            artifact_name: "firewatch".to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            server_url: DEFAULT_SERVER_URL.to_string(),
            retry_policy: RetryPolicy::default(),
        }
    }

    fn alert(id: u64, title: &str, reaction_count: u64) -> AlertRecord {
        AlertRecord {
            id,
            title: title.to_string(),
            reaction_count,
            previous_reaction_count: None,
        }
    }

    fn section_text(block: &Block) -> &str {
        match block {
            Block::Section { text } => &text.text,
            Block::Divider => panic!("expected section block"),
        }
    }

    #[test]
    fn slack_format_builds_header_divider_and_alert_lines() {
        let message = format_alerts(
            &[alert(1, "title", 54), alert(9, "Second", 12)],
            &fixture_config(),
            Some("#triage"),
        );

        assert_eq!(message.channel.as_deref(), Some("#triage"));
        assert_eq!(message.blocks.len(), 3);
        assert_eq!(
            section_text(&message.blocks[0]),
            "The following issues have received more than 10 reactions in the last 3 months:"
        );
        assert_eq!(message.blocks[1], Block::Divider);
        assert_eq!(
            section_text(&message.blocks[2]),
            "<https://github.com/acme/rocket/issues/1|title> - 54 reactions\n\
             <https://github.com/acme/rocket/issues/9|Second> - 12 reactions\n"
        );
    }

    #[test]
    fn slack_format_serializes_block_kit_shape() {
        let message = format_alerts(&[alert(1, "title", 54)], &fixture_config(), Some("C123"));
        let json: Value = serde_json::to_value(&message).expect("json");

        assert_eq!(json.get("channel").and_then(Value::as_str), Some("C123"));
        assert_eq!(json["blocks"][0]["type"], "section");
        assert_eq!(json["blocks"][0]["text"]["type"], "mrkdwn");
        assert_eq!(json["blocks"][1], serde_json::json!({"type": "divider"}));

        let without_channel = serde_json::to_value(format_alerts(
            &[alert(1, "title", 54)],
            &fixture_config(),
            None,
        ))
        .expect("json");
        assert!(without_channel.get("channel").is_none());
    }

    #[test]
    fn slack_format_escapes_control_characters_in_titles() {
        let message = format_alerts(
            &[alert(3, "Vec<T> & <Box> links", 20)],
            &fixture_config(),
            None,
        );

        assert_eq!(
            section_text(&message.blocks[2]),
            "<https://github.com/acme/rocket/issues/3|Vec&lt;T&gt; &amp; &lt;Box&gt; links> - 20 reactions\n"
        );
    }

    #[test]
    fn slack_format_splits_long_alert_lists_across_sections() {
        let alerts: Vec<AlertRecord> = (1..=200)
            .map(|id| alert(id, &"x".repeat(40), 100))
            .collect();

        let message = format_alerts(&alerts, &fixture_config(), None);
        let sections = &message.blocks[2..];

        assert!(sections.len() > 1);
        let mut total_lines = 0;
        for block in sections {
            let text = section_text(block);
            assert!(text.len() <= SECTION_TEXT_LIMIT);
            total_lines += text.lines().count();
        }
        assert_eq!(total_lines, 200);
    }

    #[test]
    fn slack_format_caps_block_count_and_summarizes_the_rest() {
        let alerts: Vec<AlertRecord> = (1..=1500)
            .map(|id| alert(id, &format!("Panic in provider when importing module {id:04} twice"), 75))
            .collect();

        let message = format_alerts(&alerts, &fixture_config(), None);

        assert_eq!(message.blocks.len(), MESSAGE_BLOCK_LIMIT);
        let sections = &message.blocks[2..];
        let (listed, summary) = sections.split_at(sections.len() - 1);
        let shown: usize = listed
            .iter()
            .map(|block| {
                let text = section_text(block);
                assert!(text.len() <= SECTION_TEXT_LIMIT);
                text.lines().count()
            })
            .sum();
        assert_eq!(
            section_text(&summary[0]),
            format!("…and {} more issues", 1500 - shown)
        );
        assert!(shown > 0 && shown < 1500);
    }

    #[test]
    fn slack_format_lists_everything_when_blocks_fit() {
        let alerts: Vec<AlertRecord> = (1..=30).map(|id| alert(id, "short", 5)).collect();

        let message = format_alerts(&alerts, &fixture_config(), None);

        assert!(message.blocks.len() < MESSAGE_BLOCK_LIMIT);
        assert!(
            message
                .blocks
                .iter()
                .skip(2)
                .all(|block| !section_text(block).contains("more issues"))
        );
    }

    #[test]
    fn slack_parse_post_response_accepts_ok_payload() {
        assert!(parse_post_response(200, r#"{"ok":true,"ts":"1.2"}"#).is_ok());
    }

    #[test]
    fn slack_parse_post_response_surfaces_logical_errors() {
        let err = parse_post_response(200, r#"{"ok":false,"error":"channel_not_found"}"#)
            .expect_err("ok=false should fail");
        assert!(matches!(err, NotifyError::Rejected(ref code) if code == "channel_not_found"));

        let err = parse_post_response(200, r#"{"ok":false}"#).expect_err("ok=false should fail");
        assert!(matches!(err, NotifyError::Rejected(ref code) if code == "unknown_error"));
    }

    #[test]
    fn slack_parse_post_response_rejects_http_and_json_failures() {
        let err = parse_post_response(500, "").expect_err("500 should fail");
        assert!(matches!(err, NotifyError::Http { status: 500, .. }));

        let err = parse_post_response(200, "ok").expect_err("non-json should fail");
        assert!(matches!(err, NotifyError::InvalidResponse(_)));
    }
}
