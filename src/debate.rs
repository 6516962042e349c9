//! Debate engine — adversarial pro/con rounds judged by a third agent.
//!
//! Round 1 runs both sides concurrently on the bare question. Every
//! later round is strictly sequential: pro rebuts with the full prior
//! transcript, then con rebuts seeing that same transcript plus pro's
//! latest argument, so con always speaks last within a round. After the
//! final round a judge reads the whole transcript and must return a
//! machine-parseable verdict; that parse is the one non-configuration
//! failure that aborts a session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::AgentBackend;
use crate::error::EngineError;
use crate::extract::{self, WinnerTag};
use crate::response::{AgentResponse, AgentRole};

/// One pro/con exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateRound {
    /// 1-based round number.
    pub round: u32,
    pub pro: AgentResponse,
    pub con: AgentResponse,
}

/// The judge's decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub winner: WinnerTag,
    pub score_pro: f64,
    pub score_con: f64,
    /// The judge's full response, reasoning included.
    pub judgment: AgentResponse,
}

/// Complete record of one debate session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateResult {
    pub session_id: Uuid,
    pub question: String,
    pub pro_agent: String,
    pub con_agent: String,
    pub judge_agent: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub rounds: Vec<DebateRound>,
    pub verdict: Verdict,
}

/// Orchestrates debate sessions between a fixed pro/con/judge trio.
#[derive(Debug)]
pub struct DebateEngine {
    pro: Arc<dyn AgentBackend>,
    con: Arc<dyn AgentBackend>,
    judge: Arc<dyn AgentBackend>,
    rounds: u32,
}

impl DebateEngine {
    /// Build an engine running `rounds` exchanges before judgment.
    ///
    /// Fails with [`EngineError::InvalidRounds`] for a zero round count,
    /// before anything is invoked.
    pub fn new(
        pro: Arc<dyn AgentBackend>,
        con: Arc<dyn AgentBackend>,
        judge: Arc<dyn AgentBackend>,
        rounds: u32,
    ) -> Result<Self, EngineError> {
        if rounds < 1 {
            return Err(EngineError::InvalidRounds(rounds));
        }
        Ok(Self {
            pro,
            con,
            judge,
            rounds,
        })
    }

    /// Run one full debate session.
    pub async fn run(&self, question: &str) -> Result<DebateResult, EngineError> {
        let session_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            %session_id,
            pro = self.pro.name(),
            con = self.con.name(),
            judge = self.judge.name(),
            rounds = self.rounds,
            "starting debate session"
        );

        let mut rounds: Vec<DebateRound> = Vec::with_capacity(self.rounds as usize);

        // opening statements are independent of each other
        let pro_opening = opening_prompt(question, WinnerTag::Pro);
        let con_opening = opening_prompt(question, WinnerTag::Con);
        let (pro_open, con_open) = tokio::join!(
            self.pro.invoke(&pro_opening, None, AgentRole::Pro),
            self.con.invoke(&con_opening, None, AgentRole::Con),
        );
        rounds.push(DebateRound {
            round: 1,
            pro: pro_open,
            con: con_open,
        });

        for round in 2..=self.rounds {
            debug!(round, "starting rebuttal round");
            let pro_rebuttal = self
                .pro
                .invoke(
                    &rebuttal_prompt(question, WinnerTag::Pro, &transcript(&rounds, None)),
                    None,
                    AgentRole::Pro,
                )
                .await;
            let con_rebuttal = self
                .con
                .invoke(
                    &rebuttal_prompt(
                        question,
                        WinnerTag::Con,
                        &transcript(&rounds, Some(&pro_rebuttal)),
                    ),
                    None,
                    AgentRole::Con,
                )
                .await;
            rounds.push(DebateRound {
                round,
                pro: pro_rebuttal,
                con: con_rebuttal,
            });
        }

        let judgment = self
            .judge
            .invoke(
                &judge_prompt(question, &transcript(&rounds, None)),
                None,
                AgentRole::Judge,
            )
            .await;
        let fields = extract::verdict(&judgment.content).ok_or_else(|| {
            warn!(%session_id, "judge output had no parseable verdict");
            EngineError::UnparsableVerdict(truncate(&judgment.content, 200))
        })?;

        info!(%session_id, winner = %fields.winner, "debate session complete");
        Ok(DebateResult {
            session_id,
            question: question.to_string(),
            pro_agent: self.pro.name().to_string(),
            con_agent: self.con.name().to_string(),
            judge_agent: self.judge.name().to_string(),
            started_at,
            completed_at: Utc::now(),
            rounds,
            verdict: Verdict {
                winner: fields.winner,
                score_pro: fields.score_pro,
                score_con: fields.score_con,
                judgment,
            },
        })
    }
}

fn side_name(side: WinnerTag) -> &'static str {
    match side {
        WinnerTag::Pro => "FOR",
        WinnerTag::Con => "AGAINST",
    }
}

fn opening_prompt(question: &str, side: WinnerTag) -> String {
    format!(
        "You are debating {} the following position.\n\n\
         QUESTION:\n{question}\n\n\
         Make your strongest opening argument. Be specific and concrete.",
        side_name(side)
    )
}

fn rebuttal_prompt(question: &str, side: WinnerTag, transcript: &str) -> String {
    format!(
        "You are debating {} the following position.\n\n\
         QUESTION:\n{question}\n\n\
         DEBATE SO FAR:\n{transcript}\n\
         Rebut the opposing side's arguments and strengthen your own.",
        side_name(side)
    )
}

fn judge_prompt(question: &str, transcript: &str) -> String {
    format!(
        "You are judging a completed debate.\n\n\
         QUESTION:\n{question}\n\n\
         TRANSCRIPT:\n{transcript}\n\
         Decide which side argued better on the merits. Respond with a JSON object:\n\
         {{\"winner\": \"pro\" or \"con\", \"score_pro\": <0.0-1.0>, \
         \"score_con\": <0.0-1.0>, \"reasoning\": \"<brief>\"}}"
    )
}

/// Render the full exchange history, optionally ending with a pending
/// pro argument that has no con reply yet.
fn transcript(rounds: &[DebateRound], pending_pro: Option<&AgentResponse>) -> String {
    let mut text = String::new();
    for round in rounds {
        text.push_str(&format!(
            "--- Round {} ---\nPRO: {}\nCON: {}\n\n",
            round.round, round.pro.content, round.con.content
        ));
    }
    if let Some(pro) = pending_pro {
        text.push_str(&format!("PRO (latest): {}\n\n", pro.content));
    }
    text
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        let cut: String = text.chars().take(limit).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ScriptedBackend;
    use crate::response::ErrorKind;

    fn trio(
        pro: ScriptedBackend,
        con: ScriptedBackend,
        judge: ScriptedBackend,
    ) -> (
        Arc<ScriptedBackend>,
        Arc<ScriptedBackend>,
        Arc<ScriptedBackend>,
    ) {
        (Arc::new(pro), Arc::new(con), Arc::new(judge))
    }

    #[test]
    fn test_rejects_zero_rounds() {
        let (pro, con, judge) = trio(
            ScriptedBackend::new("p"),
            ScriptedBackend::new("c"),
            ScriptedBackend::new("j"),
        );
        let err = DebateEngine::new(pro.clone(), con.clone(), judge.clone(), 0).unwrap_err();
        assert!(err.is_configuration());
        // rejected before any invocation
        assert_eq!(pro.invocation_count(), 0);
        assert_eq!(con.invocation_count(), 0);
    }

    #[tokio::test]
    async fn test_two_round_debate_with_verdict() {
        let (pro, con, judge) = trio(
            ScriptedBackend::new("p")
                .reply("opening for")
                .reply("rebuttal for"),
            ScriptedBackend::new("c")
                .reply("opening against")
                .reply("rebuttal against"),
            ScriptedBackend::new("j")
                .reply(r#"{"winner": "con", "score_pro": 0.4, "score_con": 0.8}"#),
        );
        let engine = DebateEngine::new(pro.clone(), con.clone(), judge.clone(), 2).unwrap();
        let result = engine.run("should we rewrite it?").await.unwrap();

        assert_eq!(result.rounds.len(), 2);
        assert_eq!(result.rounds[0].round, 1);
        assert_eq!(result.rounds[1].pro.content, "rebuttal for");
        assert_eq!(result.verdict.winner, WinnerTag::Con);
        assert!((result.verdict.score_con - 0.8).abs() < f64::EPSILON);
        assert_eq!(judge.invocation_count(), 1);
    }

    #[tokio::test]
    async fn test_rebuttal_context_gives_con_last_word() {
        let (pro, con, judge) = trio(
            ScriptedBackend::new("p")
                .reply("pro opening words")
                .reply("pro rebuttal words"),
            ScriptedBackend::new("c")
                .reply("con opening words")
                .reply("con rebuttal words"),
            ScriptedBackend::new("j").reply(r#"{"winner": "pro"}"#),
        );
        let engine = DebateEngine::new(pro.clone(), con.clone(), judge.clone(), 2).unwrap();
        engine.run("q").await.unwrap();

        // openings carry no transcript
        assert!(!pro.invocations()[0].prompt.contains("DEBATE SO FAR"));

        // round-2 pro sees round 1 but not its own upcoming rebuttal
        let pro_round2 = &pro.invocations()[1].prompt;
        assert!(pro_round2.contains("pro opening words"));
        assert!(pro_round2.contains("con opening words"));
        assert!(!pro_round2.contains("pro rebuttal words"));

        // round-2 con additionally sees pro's fresh rebuttal
        let con_round2 = &con.invocations()[1].prompt;
        assert!(con_round2.contains("pro rebuttal words"));
        assert!(con_round2.contains("PRO (latest)"));

        // the judge sees the complete transcript
        let judge_prompt = &judge.invocations()[0].prompt;
        for fragment in [
            "pro opening words",
            "con opening words",
            "pro rebuttal words",
            "con rebuttal words",
        ] {
            assert!(judge_prompt.contains(fragment));
        }
    }

    #[tokio::test]
    async fn test_participant_failure_is_recorded_not_fatal() {
        let (pro, con, judge) = trio(
            ScriptedBackend::new("p").fail(ErrorKind::Timeout, "timed out after 600s"),
            ScriptedBackend::new("c").reply("solid opening"),
            ScriptedBackend::new("j").reply(r#"{"winner": "con", "score_con": 0.9}"#),
        );
        let engine = DebateEngine::new(pro, con, judge, 1).unwrap();
        let result = engine.run("q").await.unwrap();

        assert!(result.rounds[0].pro.is_error);
        assert_eq!(result.rounds[0].pro.error_kind(), Some(ErrorKind::Timeout));
        assert!(!result.rounds[0].con.is_error);
        assert_eq!(result.verdict.winner, WinnerTag::Con);
    }

    #[tokio::test]
    async fn test_unparseable_verdict_is_terminal() {
        let (pro, con, judge) = trio(
            ScriptedBackend::new("p").reply("a"),
            ScriptedBackend::new("c").reply("b"),
            ScriptedBackend::new("j").reply("both sides made good points"),
        );
        let engine = DebateEngine::new(pro, con, judge, 1).unwrap();
        let err = engine.run("q").await.unwrap_err();
        assert!(matches!(err, EngineError::UnparsableVerdict(_)));
        assert!(!err.is_configuration());
    }

    #[tokio::test]
    async fn test_round_numbers_are_sequential() {
        let (pro, con, judge) = trio(
            ScriptedBackend::new("p").reply("1").reply("2").reply("3"),
            ScriptedBackend::new("c").reply("1").reply("2").reply("3"),
            ScriptedBackend::new("j").reply(r#"{"winner": "pro"}"#),
        );
        let engine = DebateEngine::new(pro, con, judge, 3).unwrap();
        let result = engine.run("q").await.unwrap();
        let numbers: Vec<u32> = result.rounds.iter().map(|r| r.round).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }
}
