//! Decision oracle and completion judge contracts.
//!
//! The oracle answers with JSON documents that are validated here, at the
//! boundary. Anything that does not fit the schema becomes a typed
//! [`OracleError`] instead of leaking a half-parsed action into the loop.

pub mod openai;
pub mod prompt;

use async_trait::async_trait;
use serde::Deserialize;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use crate::error::OracleError;
use crate::types::{ChatMessage, Direction, Distance, FallbackVerdict, ProposedAction};

pub use openai::OpenAiOracle;

/// Input to a next-action query.
#[derive(Debug, Clone, Copy)]
pub struct ProposalRequest<'a> {
    pub task: &'a str,
    pub last_summary: &'a str,
    /// Current screenshot with element numbers drawn on it.
    pub screenshot: &'a Path,
}

/// A validated next-action answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub action: ProposedAction,
    pub observation: String,
    pub thought: String,
    /// Running summary of the task so far, fed back on the next round.
    pub summary: String,
    pub raw: String,
}

/// Input to a reflection query about the previous action.
#[derive(Debug, Clone, Copy)]
pub struct ReflectionRequest<'a> {
    pub action: &'a ProposedAction,
    pub task: &'a str,
    pub last_summary: &'a str,
    pub before: &'a Path,
    pub after: &'a Path,
}

/// A validated reflection answer.
#[derive(Debug, Clone, PartialEq)]
pub struct ReflectionResponse {
    pub verdict: FallbackVerdict,
    pub rationale: String,
    /// Present exactly for `Back`, `Continue` and `Success`.
    pub documentation: Option<String>,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AppChoice {
    pub app: String,
    #[serde(default)]
    pub reason: String,
}

/// Binary answer of the completion judge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionVerdict {
    Finished,
    Continue,
}

impl CompletionVerdict {
    /// `None` for anything that is neither label. A bare label wins; in
    /// longer replies `CONTINUE` or `NOT FINISHED` keeps the task going.
    pub fn parse(raw: &str) -> Option<Self> {
        let label = raw
            .trim()
            .trim_end_matches(|c: char| c.is_ascii_punctuation())
            .to_ascii_uppercase();
        match label.as_str() {
            "FINISHED" => return Some(CompletionVerdict::Finished),
            "CONTINUE" => return Some(CompletionVerdict::Continue),
            _ => {}
        }
        if label.contains("CONTINUE") || label.contains("NOT FINISHED") {
            Some(CompletionVerdict::Continue)
        } else if label.contains("FINISHED") {
            Some(CompletionVerdict::Finished)
        } else {
            None
        }
    }
}

/// The reasoning capability that drives exploration.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    /// Decide what to do on the current screen.
    async fn propose_next_action(
        &self,
        request: &ProposalRequest<'_>,
    ) -> Result<Proposal, OracleError>;

    /// Judge the previous action from before/after screenshots.
    async fn reflect_on_action(
        &self,
        request: &ReflectionRequest<'_>,
    ) -> Result<ReflectionResponse, OracleError>;

    /// Pick the app to launch for a task from the installed app names.
    async fn choose_app(&self, task: &str, apps: &[String]) -> Result<AppChoice, OracleError>;
}

/// Decides from the transcript whether the task is done.
#[async_trait]
pub trait CompletionJudge: Send + Sync {
    /// Returns the raw verdict text; see [`CompletionVerdict::parse`].
    async fn judge(&self, transcript: &[ChatMessage]) -> Result<String, OracleError>;
}

/// Bound an oracle call; an elapsed deadline is an oracle failure.
pub async fn with_deadline<T, F>(limit: Duration, call: F) -> Result<T, OracleError>
where
    F: Future<Output = Result<T, OracleError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(OracleError::Timeout(limit)),
    }
}

#[derive(Debug, Deserialize)]
struct ProposalSchema {
    #[serde(default)]
    observation: String,
    #[serde(default)]
    thought: String,
    action: ActionSchema,
    #[serde(default)]
    summary: String,
}

#[derive(Debug, Deserialize)]
struct ActionSchema {
    name: String,
    area: Option<usize>,
    direction: Option<Direction>,
    distance: Option<Distance>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReflectionSchema {
    decision: String,
    #[serde(default)]
    thought: String,
    documentation: Option<String>,
}

/// Strip markdown fences the model may wrap its JSON in.
fn strip_fences(content: &str) -> &str {
    content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

fn decode<'de, T: Deserialize<'de>>(cleaned: &'de str) -> Result<T, OracleError> {
    serde_json::from_str(cleaned).map_err(|e| OracleError::Malformed(format!("{e}: {cleaned}")))
}

fn required<T>(value: Option<T>, action: &str, field: &str) -> Result<T, OracleError> {
    value.ok_or_else(|| OracleError::Malformed(format!("{action} is missing `{field}`")))
}

/// Validate a next-action answer.
pub fn parse_proposal(raw: &str) -> Result<Proposal, OracleError> {
    let schema: ProposalSchema = decode(strip_fences(raw))?;
    let act = schema.action;
    let name = act.name.trim().to_ascii_lowercase();

    let action = match name.as_str() {
        "tap" => ProposedAction::Tap {
            area: required(act.area, "tap", "area")?,
        },
        "long_press" => ProposedAction::LongPress {
            area: required(act.area, "long_press", "area")?,
        },
        "swipe" => ProposedAction::Swipe {
            area: required(act.area, "swipe", "area")?,
            direction: required(act.direction, "swipe", "direction")?,
            distance: required(act.distance, "swipe", "distance")?,
        },
        "text" => ProposedAction::Text {
            input: required(act.text, "text", "text")?,
        },
        "finish" => ProposedAction::Finish,
        _ => return Err(OracleError::UndefinedAction(act.name)),
    };

    Ok(Proposal {
        action,
        observation: schema.observation,
        thought: schema.thought,
        summary: schema.summary,
        raw: raw.to_string(),
    })
}

/// Validate a reflection answer.
pub fn parse_reflection(raw: &str) -> Result<ReflectionResponse, OracleError> {
    let schema: ReflectionSchema = decode(strip_fences(raw))?;
    let label: String = schema
        .decision
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase();

    let verdict = match label.as_str() {
        "INEFFECTIVE" => FallbackVerdict::Ineffective,
        "BACK" => FallbackVerdict::Back,
        "CONTINUE" => FallbackVerdict::Continue,
        "SUCCESS" => FallbackVerdict::Success,
        _ => return Err(OracleError::UndefinedVerdict(schema.decision)),
    };

    let documentation = if verdict.documents() {
        let doc = schema
            .documentation
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .ok_or_else(|| {
                OracleError::Malformed(format!("{verdict} decision without documentation"))
            })?;
        Some(doc)
    } else {
        None
    };

    Ok(ReflectionResponse {
        verdict,
        rationale: schema.thought,
        documentation,
        raw: raw.to_string(),
    })
}

pub fn parse_app_choice(raw: &str) -> Result<AppChoice, OracleError> {
    decode(strip_fences(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_action_shape() {
        let tap = parse_proposal(
            r#"{"observation":"home","thought":"open","action":{"name":"tap","area":3},"summary":"opened"}"#,
        )
        .unwrap();
        assert_eq!(tap.action, ProposedAction::Tap { area: 3 });
        assert_eq!(tap.summary, "opened");

        let swipe = parse_proposal(
            r#"```json
{"action":{"name":"swipe","area":2,"direction":"up","distance":"long"},"summary":"s"}
```"#,
        )
        .unwrap();
        assert_eq!(
            swipe.action,
            ProposedAction::Swipe {
                area: 2,
                direction: Direction::Up,
                distance: Distance::Long
            }
        );

        let text =
            parse_proposal(r#"{"action":{"name":"text","text":"hello world"},"summary":"t"}"#)
                .unwrap();
        assert_eq!(
            text.action,
            ProposedAction::Text {
                input: "hello world".into()
            }
        );

        let finish = parse_proposal(r#"{"action":{"name":"FINISH"}}"#).unwrap();
        assert_eq!(finish.action, ProposedAction::Finish);
    }

    #[test]
    fn rejects_unknown_or_incomplete_actions() {
        assert!(matches!(
            parse_proposal(r#"{"action":{"name":"grid"}}"#),
            Err(OracleError::UndefinedAction(name)) if name == "grid"
        ));
        assert!(matches!(
            parse_proposal(r#"{"action":{"name":"tap"}}"#),
            Err(OracleError::Malformed(_))
        ));
        assert!(matches!(
            parse_proposal(r#"{"action":{"name":"swipe","area":1,"direction":"sideways","distance":"short"}}"#),
            Err(OracleError::Malformed(_))
        ));
        assert!(matches!(
            parse_proposal("Action: tap(3)"),
            Err(OracleError::Malformed(_))
        ));
    }

    #[test]
    fn parses_reflection_decisions() {
        let ineffective =
            parse_reflection(r#"{"decision":"INEFFECTIVE","thought":"nothing changed"}"#).unwrap();
        assert_eq!(ineffective.verdict, FallbackVerdict::Ineffective);
        assert_eq!(ineffective.documentation, None);

        let back = parse_reflection(
            r#"{"decision":" BACK ","thought":"wrong page","documentation":"Opens settings."}"#,
        )
        .unwrap();
        assert_eq!(back.verdict, FallbackVerdict::Back);
        assert_eq!(back.documentation.as_deref(), Some("Opens settings."));
    }

    #[test]
    fn reflection_requires_documentation_and_known_label() {
        assert!(matches!(
            parse_reflection(r#"{"decision":"SUCCESS","thought":"ok"}"#),
            Err(OracleError::Malformed(_))
        ));
        assert!(matches!(
            parse_reflection(r#"{"decision":"MAYBE","thought":"?"}"#),
            Err(OracleError::UndefinedVerdict(label)) if label == "MAYBE"
        ));
    }

    #[test]
    fn completion_verdict_labels() {
        assert_eq!(
            CompletionVerdict::parse("FINISHED"),
            Some(CompletionVerdict::Finished)
        );
        assert_eq!(
            CompletionVerdict::parse(" CONTINUE\n"),
            Some(CompletionVerdict::Continue)
        );
        assert_eq!(CompletionVerdict::parse("I think so"), None);
    }

    #[test]
    fn negated_finish_keeps_going() {
        assert_eq!(
            CompletionVerdict::parse("NOT FINISHED, CONTINUE"),
            Some(CompletionVerdict::Continue)
        );
        assert_eq!(
            CompletionVerdict::parse("Not finished yet"),
            Some(CompletionVerdict::Continue)
        );
        assert_eq!(
            CompletionVerdict::parse("finished."),
            Some(CompletionVerdict::Finished)
        );
        assert_eq!(
            CompletionVerdict::parse("The task is FINISHED"),
            Some(CompletionVerdict::Finished)
        );
    }

    #[tokio::test]
    async fn deadline_turns_into_timeout_error() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, OracleError>(())
        };
        let err = with_deadline(Duration::from_millis(10), slow)
            .await
            .unwrap_err();
        assert!(matches!(err, OracleError::Timeout(_)));
    }
}
