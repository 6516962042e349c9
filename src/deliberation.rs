//! Deliberation engine — a producer/reviewer refinement loop.
//!
//! The producer drafts an answer; in each later round the reviewer
//! critiques the working answer and scores its agreement. The loop ends
//! the moment agreement reaches the threshold (the producer is not
//! asked to revise again) or when the round budget runs out. Reviewer
//! failures score as zero agreement and the loop continues, so the
//! round budget is the hard termination bound.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::AgentBackend;
use crate::error::EngineError;
use crate::extract;
use crate::response::{AgentResponse, AgentRole};

/// Lifecycle of a deliberation session. Transitions are monotonic:
/// `InProgress` moves to exactly one terminal state and stays there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliberationStatus {
    InProgress,
    ConsensusReached,
    MaxRoundsReached,
}

impl std::fmt::Display for DeliberationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProgress => write!(f, "in_progress"),
            Self::ConsensusReached => write!(f, "consensus_reached"),
            Self::MaxRoundsReached => write!(f, "max_rounds_reached"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackSeverity {
    Critical,
    Major,
    Minor,
    Suggestion,
}

impl FeedbackSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Major => "major",
            Self::Minor => "minor",
            Self::Suggestion => "suggestion",
        }
    }

    fn parse(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "critical" => Self::Critical,
            "major" => Self::Major,
            "minor" => Self::Minor,
            _ => Self::Suggestion,
        }
    }
}

/// One reviewer remark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackPoint {
    pub severity: FeedbackSeverity,
    pub comment: String,
}

/// One loop iteration. Round 1 has a production only; later rounds have
/// a review and, when the loop continues, a revised production.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliberationRound {
    /// 1-based round number.
    pub round: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub production: Option<AgentResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<AgentResponse>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feedback: Vec<FeedbackPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agreement_level: Option<f64>,
}

/// Complete record of one deliberation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliberationResult {
    pub session_id: Uuid,
    pub task: String,
    pub producer_agent: String,
    pub reviewer_agent: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub status: DeliberationStatus,
    pub rounds: Vec<DeliberationRound>,
    /// The last reviewer agreement score; 0.0 when never reviewed.
    pub agreement_level: f64,
}

impl DeliberationResult {
    /// The most recent successful production, the session's working answer.
    pub fn latest_production(&self) -> Option<&AgentResponse> {
        self.rounds
            .iter()
            .rev()
            .filter_map(|r| r.production.as_ref())
            .find(|p| !p.is_error)
    }
}

/// Tunables for a deliberation session.
#[derive(Debug, Clone)]
pub struct DeliberationConfig {
    pub max_rounds: u32,
    /// Reviewer agreement in [0,1] at which consensus is declared.
    pub threshold: f64,
}

impl Default for DeliberationConfig {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            threshold: 0.85,
        }
    }
}

/// Orchestrates producer/reviewer deliberation sessions.
#[derive(Debug)]
pub struct DeliberationEngine {
    producer: Arc<dyn AgentBackend>,
    reviewer: Arc<dyn AgentBackend>,
    config: DeliberationConfig,
}

impl DeliberationEngine {
    /// Build an engine for one producer/reviewer pair.
    ///
    /// Fails before any invocation for a zero round budget
    /// ([`EngineError::InvalidRounds`]) or a threshold outside [0,1]
    /// ([`EngineError::InvalidThreshold`]).
    pub fn new(
        producer: Arc<dyn AgentBackend>,
        reviewer: Arc<dyn AgentBackend>,
        config: DeliberationConfig,
    ) -> Result<Self, EngineError> {
        if config.max_rounds < 1 {
            return Err(EngineError::InvalidRounds(config.max_rounds));
        }
        if !(0.0..=1.0).contains(&config.threshold) {
            return Err(EngineError::InvalidThreshold(config.threshold));
        }
        Ok(Self {
            producer,
            reviewer,
            config,
        })
    }

    /// Run one full deliberation session.
    pub async fn run(&self, task: &str) -> Result<DeliberationResult, EngineError> {
        let session_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            %session_id,
            producer = self.producer.name(),
            reviewer = self.reviewer.name(),
            max_rounds = self.config.max_rounds,
            threshold = self.config.threshold,
            "starting deliberation session"
        );

        let mut rounds: Vec<DeliberationRound> = Vec::new();
        let mut status = DeliberationStatus::InProgress;
        let mut agreement = 0.0;

        let first = self
            .producer
            .invoke(&production_prompt(task), None, AgentRole::Producer)
            .await;
        rounds.push(DeliberationRound {
            round: 1,
            production: Some(first),
            review: None,
            feedback: Vec::new(),
            agreement_level: None,
        });

        for round in 2..=self.config.max_rounds {
            let review = self
                .reviewer
                .invoke(
                    &review_prompt(task, &transcript(&rounds)),
                    None,
                    AgentRole::Reviewer,
                )
                .await;
            let (feedback, level) = if review.is_error {
                warn!(round, "reviewer invocation failed, scoring zero agreement");
                (Vec::new(), 0.0)
            } else {
                parse_feedback(&review.content)
            };
            agreement = level;
            debug!(round, agreement, "review complete");

            if agreement >= self.config.threshold {
                status = DeliberationStatus::ConsensusReached;
                rounds.push(DeliberationRound {
                    round,
                    production: None,
                    review: Some(review),
                    feedback,
                    agreement_level: Some(agreement),
                });
                break;
            }

            let revision = self
                .producer
                .invoke(
                    &revision_prompt(task, &transcript(&rounds), &feedback),
                    None,
                    AgentRole::Producer,
                )
                .await;
            rounds.push(DeliberationRound {
                round,
                production: Some(revision),
                review: Some(review),
                feedback,
                agreement_level: Some(agreement),
            });
        }

        if status == DeliberationStatus::InProgress {
            status = DeliberationStatus::MaxRoundsReached;
        }

        info!(%session_id, %status, agreement, "deliberation session complete");
        Ok(DeliberationResult {
            session_id,
            task: task.to_string(),
            producer_agent: self.producer.name().to_string(),
            reviewer_agent: self.reviewer.name().to_string(),
            started_at,
            completed_at: Utc::now(),
            status,
            rounds,
            agreement_level: agreement,
        })
    }
}

/// Parse reviewer output into severity-tagged points and an agreement
/// score. Feedback entries may be objects with `severity`/`comment`
/// fields or bare strings (treated as suggestions).
fn parse_feedback(text: &str) -> (Vec<FeedbackPoint>, f64) {
    let level = extract::agreement_level(text);
    let points = extract::json_object(text)
        .and_then(|obj| obj.get("feedback").and_then(Value::as_array).cloned())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(comment) => Some(FeedbackPoint {
                        severity: FeedbackSeverity::Suggestion,
                        comment: comment.clone(),
                    }),
                    Value::Object(fields) => {
                        let comment = fields
                            .get("comment")
                            .or_else(|| fields.get("point"))
                            .and_then(Value::as_str)?;
                        let severity = fields
                            .get("severity")
                            .and_then(Value::as_str)
                            .map(FeedbackSeverity::parse)
                            .unwrap_or(FeedbackSeverity::Suggestion);
                        Some(FeedbackPoint {
                            severity,
                            comment: comment.to_string(),
                        })
                    }
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();
    (points, level)
}

fn production_prompt(task: &str) -> String {
    format!(
        "You are the producer in a deliberation. Produce the best complete \
         answer you can for the task.\n\nTASK:\n{task}"
    )
}

fn review_prompt(task: &str, transcript: &str) -> String {
    format!(
        "You are the reviewer in a deliberation.\n\n\
         TASK:\n{task}\n\n\
         DELIBERATION SO FAR:\n{transcript}\n\
         Critique the latest answer. Respond with a JSON object:\n\
         {{\"agreement_level\": <0.0-1.0>, \"feedback\": \
         [{{\"severity\": \"critical|major|minor|suggestion\", \"comment\": \"<issue>\"}}], \
         \"summary\": \"<brief>\"}}"
    )
}

fn revision_prompt(task: &str, transcript: &str, feedback: &[FeedbackPoint]) -> String {
    let mut prompt = format!(
        "You are the producer in a deliberation.\n\n\
         TASK:\n{task}\n\n\
         DELIBERATION SO FAR:\n{transcript}\n\
         REVIEWER FEEDBACK TO ADDRESS:\n"
    );
    if feedback.is_empty() {
        prompt.push_str("(the reviewer gave no specific points)\n");
    }
    for point in feedback {
        prompt.push_str(&format!("- [{}] {}\n", point.severity.as_str(), point.comment));
    }
    prompt.push_str("\nRevise your answer to address the feedback. Return the full revised answer.");
    prompt
}

fn transcript(rounds: &[DeliberationRound]) -> String {
    let mut text = String::new();
    for round in rounds {
        text.push_str(&format!("--- Round {} ---\n", round.round));
        if let Some(review) = &round.review {
            text.push_str(&format!("REVIEW: {}\n", review.content));
        }
        if let Some(production) = &round.production {
            text.push_str(&format!("ANSWER: {}\n", production.content));
        }
        text.push('\n');
    }
    text
}
