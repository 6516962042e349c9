//! Council engine — parallel expert opinions, anonymized peer ranking,
//! and chairman synthesis.
//!
//! A council session runs three stages over one task:
//!
//! 1. every member produces an independent opinion, concurrently under a
//!    bounded cap;
//! 2. each member ranks the *other* members' opinions under stage-scoped
//!    anonymous labels, so reputations cannot leak into the ranking;
//! 3. a chairman synthesizes the opinions, annotated with their peer
//!    standing, into one final answer.
//!
//! Member failures at any stage are recorded as data and the session
//! continues without that participant.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::AgentBackend;
use crate::error::EngineError;
use crate::extract;
use crate::personas::{KeywordPersonas, Persona, PersonaStrategy};
use crate::response::{AgentResponse, AgentRole};

/// Tunables for a council session.
#[derive(Debug, Clone)]
pub struct CouncilConfig {
    /// Maximum member invocations in flight at once.
    pub max_concurrent: usize,
    /// Whether stage-1 prompts carry expert persona framings.
    pub use_personas: bool,
}

impl Default for CouncilConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            use_personas: true,
        }
    }
}

/// One member's deanonymized peer ranking, best first.
///
/// An empty `order` is an abstention: the member saw no peers, failed,
/// or produced nothing parseable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRanking {
    pub ranker: String,
    pub order: Vec<String>,
}

/// Aggregated standing of one member across all peer rankings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRank {
    pub agent_id: String,
    /// Mean 1-based position over the rankings that include this agent.
    pub average_rank: f64,
}

/// Complete record of one council session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouncilResult {
    pub session_id: Uuid,
    pub task: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Personas applied to stage-1 prompts, aligned with member order.
    pub personas: Vec<Persona>,
    /// One stage-1 response per member, in member order.
    pub opinions: Vec<AgentResponse>,
    pub rankings: Vec<PeerRanking>,
    /// Best first; ties broken by agent id.
    pub average_ranks: Vec<AgentRank>,
    pub synthesis: AgentResponse,
    /// Rank agreement in (0,1]; 1.0 when every ranking places every
    /// agent at the same position.
    pub consensus_level: f64,
}

/// Orchestrates council sessions over a fixed member set.
#[derive(Debug)]
pub struct CouncilEngine {
    members: Vec<Arc<dyn AgentBackend>>,
    chairman: Arc<dyn AgentBackend>,
    personas: Arc<dyn PersonaStrategy>,
    config: CouncilConfig,
}

impl CouncilEngine {
    /// Build an engine over `members` with a designated chairman.
    ///
    /// Fails with [`EngineError::InsufficientAgents`] for fewer than two
    /// members, before anything is invoked.
    pub fn new(
        members: Vec<Arc<dyn AgentBackend>>,
        chairman: Arc<dyn AgentBackend>,
    ) -> Result<Self, EngineError> {
        if members.len() < 2 {
            return Err(EngineError::InsufficientAgents(members.len()));
        }
        Ok(Self {
            members,
            chairman,
            personas: Arc::new(KeywordPersonas),
            config: CouncilConfig::default(),
        })
    }

    pub fn with_config(mut self, config: CouncilConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_persona_strategy(mut self, strategy: Arc<dyn PersonaStrategy>) -> Self {
        self.personas = strategy;
        self
    }

    /// Run one full council session.
    pub async fn run(&self, task: &str) -> Result<CouncilResult, EngineError> {
        let session_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            %session_id,
            members = self.members.len(),
            chairman = self.chairman.name(),
            "starting council session"
        );

        let assigned: Vec<Persona> = if self.config.use_personas {
            self.personas.assign(task, self.members.len())
        } else {
            Vec::new()
        };

        let opinions = self.gather_opinions(task, &assigned).await;
        let succeeded = opinions.iter().filter(|o| !o.is_error).count();
        info!(succeeded, failed = opinions.len() - succeeded, "opinion stage complete");

        let rankings = self.gather_rankings(task, &opinions).await;
        let average_ranks = average_ranks(&rankings);
        let consensus_level = consensus_level(&rankings);
        debug!(consensus_level, "ranking stage complete");

        let synthesis = self.synthesize(task, &opinions, &average_ranks).await;

        info!(%session_id, "council session complete");
        Ok(CouncilResult {
            session_id,
            task: task.to_string(),
            started_at,
            completed_at: Utc::now(),
            personas: assigned,
            opinions,
            rankings,
            average_ranks,
            synthesis,
            consensus_level,
        })
    }

    /// Stage 1: concurrent, cap-bounded opinion gathering.
    async fn gather_opinions(&self, task: &str, assigned: &[Persona]) -> Vec<AgentResponse> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent));
        let futures = self.members.iter().enumerate().map(|(idx, member)| {
            let semaphore = Arc::clone(&semaphore);
            let member = Arc::clone(member);
            let base = opinion_prompt(task);
            let prompt = match assigned.get(idx) {
                Some(persona) => persona.apply(&base),
                None => base,
            };
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore is never closed");
                member.invoke(&prompt, None, AgentRole::CouncilMember).await
            }
        });
        join_all(futures).await
    }

    /// Stage 2: anonymized peer ranking.
    ///
    /// Labels A, B, C… follow member order and live only for this stage.
    /// Each member sees every *other* member's successful opinion; error
    /// opinions are invisible. A member with nothing to rank abstains
    /// without being invoked.
    async fn gather_rankings(&self, task: &str, opinions: &[AgentResponse]) -> Vec<PeerRanking> {
        let labels: Vec<String> = (0..self.members.len()).map(anonymous_label).collect();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent));

        let futures = self.members.iter().enumerate().map(|(idx, member)| {
            let visible: Vec<(String, String)> = opinions
                .iter()
                .enumerate()
                .filter(|(peer, opinion)| *peer != idx && !opinion.is_error)
                .map(|(peer, opinion)| (labels[peer].clone(), opinion.content.clone()))
                .collect();
            let member = Arc::clone(member);
            let semaphore = Arc::clone(&semaphore);
            let task = task.to_string();
            async move {
                let ranker = member.name().to_string();
                if visible.is_empty() {
                    debug!(agent = %ranker, "no peer opinions visible, abstaining");
                    return (ranker, Vec::new());
                }
                let known: Vec<String> = visible.iter().map(|(label, _)| label.clone()).collect();
                let prompt = ranking_prompt(&task, &visible);
                let response = {
                    let _permit = semaphore.acquire().await.expect("semaphore is never closed");
                    member.invoke(&prompt, None, AgentRole::CouncilMember).await
                };
                if response.is_error {
                    warn!(agent = %ranker, "ranking invocation failed, abstaining");
                    return (ranker, Vec::new());
                }
                (ranker, extract::ranking(&response.content, &known))
            }
        });
        let raw = join_all(futures).await;

        let label_to_agent: BTreeMap<&String, &str> = labels
            .iter()
            .zip(self.members.iter().map(|m| m.name()))
            .collect();
        raw.into_iter()
            .map(|(ranker, order)| PeerRanking {
                ranker,
                order: order
                    .iter()
                    .filter_map(|label| label_to_agent.get(label).map(|id| id.to_string()))
                    .collect(),
            })
            .collect()
    }

    /// Stage 3: chairman synthesis over rank-annotated opinions.
    ///
    /// With zero successful opinions there is nothing to synthesize; the
    /// chairman is not invoked and a local placeholder stands in so the
    /// result stays well-formed.
    async fn synthesize(
        &self,
        task: &str,
        opinions: &[AgentResponse],
        average_ranks: &[AgentRank],
    ) -> AgentResponse {
        if opinions.iter().all(|o| o.is_error) {
            warn!("no council opinions succeeded, skipping chairman synthesis");
            return AgentResponse::ok(
                self.chairman.name(),
                AgentRole::Chairman,
                "No usable council opinions were produced; insufficient data to synthesize an answer.",
            )
            .with_metadata("synthesized_locally", true.into());
        }
        let prompt = synthesis_prompt(task, opinions, average_ranks);
        self.chairman
            .invoke(&prompt, None, AgentRole::Chairman)
            .await
    }
}

/// Stage-scoped anonymous label for member `index`: A, B, …, Z, AA, AB…
fn anonymous_label(mut index: usize) -> String {
    let mut label = String::new();
    loop {
        label.insert(0, (b'A' + (index % 26) as u8) as char);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    label
}

fn opinion_prompt(task: &str) -> String {
    format!(
        "You are one member of an expert council reviewing a task.\n\n\
         TASK:\n{task}\n\n\
         Give your independent analysis and recommendation.\n\
         Respond with a JSON object:\n\
         {{\"opinion\": \"<your full analysis>\", \"confidence\": <number between 0.0 and 1.0>}}"
    )
}

fn ranking_prompt(task: &str, visible: &[(String, String)]) -> String {
    let mut prompt = format!(
        "You are evaluating anonymized peer opinions on a task.\n\n\
         TASK:\n{task}\n\nOPINIONS:\n"
    );
    for (label, content) in visible {
        prompt.push_str(&format!("Opinion {label}:\n{content}\n\n"));
    }
    prompt.push_str(
        "Rank the opinions from best to worst. Respond with a JSON object:\n\
         {\"ranking\": [\"<best label>\", \"<next label>\", ...], \"reasoning\": \"<brief>\"}",
    );
    prompt
}

fn synthesis_prompt(task: &str, opinions: &[AgentResponse], average_ranks: &[AgentRank]) -> String {
    let rank_of = |agent_id: &str| {
        average_ranks
            .iter()
            .find(|r| r.agent_id == agent_id)
            .map(|r| format!("average peer rank {:.2}", r.average_rank))
            .unwrap_or_else(|| "unranked".to_string())
    };
    let mut prompt = format!(
        "You are the council chairman. Synthesize the member opinions below \
         into a single final answer.\n\nTASK:\n{task}\n\nOPINIONS:\n"
    );
    for opinion in opinions.iter().filter(|o| !o.is_error) {
        prompt.push_str(&format!(
            "[{}, {}]\n{}\n\n",
            opinion.agent_id,
            rank_of(&opinion.agent_id),
            opinion.content
        ));
    }
    prompt.push_str(
        "Weigh better-ranked opinions more heavily, resolve disagreements \
         explicitly, and provide the final synthesized answer as plain text.",
    );
    prompt
}

fn rank_positions(rankings: &[PeerRanking]) -> BTreeMap<String, Vec<usize>> {
    let mut positions: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for ranking in rankings {
        for (pos, agent) in ranking.order.iter().enumerate() {
            positions.entry(agent.clone()).or_default().push(pos + 1);
        }
    }
    positions
}

/// Mean 1-based position per ranked agent, best first, ties by agent id.
pub(crate) fn average_ranks(rankings: &[PeerRanking]) -> Vec<AgentRank> {
    let mut ranks: Vec<AgentRank> = rank_positions(rankings)
        .into_iter()
        .map(|(agent_id, positions)| AgentRank {
            average_rank: positions.iter().sum::<usize>() as f64 / positions.len() as f64,
            agent_id,
        })
        .collect();
    ranks.sort_by(|a, b| {
        a.average_rank
            .partial_cmp(&b.average_rank)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.agent_id.cmp(&b.agent_id))
    });
    ranks
}

/// Rank agreement: `1 / (1 + mean per-agent position variance)`.
///
/// 1.0 when every ranking that mentions an agent puts it at the same
/// position; approaches 0 as rankings scatter. 0.0 when nothing was
/// ranked at all.
pub(crate) fn consensus_level(rankings: &[PeerRanking]) -> f64 {
    let positions = rank_positions(rankings);
    if positions.is_empty() {
        return 0.0;
    }
    let mean_variance = positions
        .values()
        .map(|ps| {
            let mean = ps.iter().sum::<usize>() as f64 / ps.len() as f64;
            ps.iter().map(|&p| (p as f64 - mean).powi(2)).sum::<f64>() / ps.len() as f64
        })
        .sum::<f64>()
        / positions.len() as f64;
    1.0 / (1.0 + mean_variance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ScriptedBackend;
    use crate::response::ErrorKind;

    fn ranking_of(labels: &[&str]) -> String {
        format!(
            "{{\"ranking\": [{}]}}",
            labels
                .iter()
                .map(|l| format!("\"{l}\""))
                .collect::<Vec<_>>()
                .join(", ")
        )
    }

    fn as_backends(members: &[Arc<ScriptedBackend>]) -> Vec<Arc<dyn AgentBackend>> {
        members
            .iter()
            .map(|m| Arc::clone(m) as Arc<dyn AgentBackend>)
            .collect()
    }

    #[test]
    fn test_rejects_fewer_than_two_members() {
        let solo: Vec<Arc<dyn AgentBackend>> = vec![Arc::new(ScriptedBackend::new("solo"))];
        let chairman: Arc<dyn AgentBackend> = Arc::new(ScriptedBackend::new("chair"));
        let err = CouncilEngine::new(solo, chairman).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("1"));
    }

    #[test]
    fn test_anonymous_labels_follow_member_order() {
        assert_eq!(anonymous_label(0), "A");
        assert_eq!(anonymous_label(1), "B");
        assert_eq!(anonymous_label(25), "Z");
        assert_eq!(anonymous_label(26), "AA");
    }

    #[test]
    fn test_average_ranks_deterministic_with_lexical_tie_break() {
        let rankings = vec![
            PeerRanking {
                ranker: "x".into(),
                order: vec!["beta".into(), "gamma".into()],
            },
            PeerRanking {
                ranker: "y".into(),
                order: vec!["alpha".into(), "gamma".into()],
            },
        ];
        let first = average_ranks(&rankings);
        let second = average_ranks(&rankings);
        assert_eq!(
            first.iter().map(|r| r.agent_id.clone()).collect::<Vec<_>>(),
            vec!["alpha", "beta", "gamma"]
        );
        // alpha and beta tie at 1.0; lexical order breaks the tie
        assert!((first[0].average_rank - 1.0).abs() < f64::EPSILON);
        assert!((first[1].average_rank - 1.0).abs() < f64::EPSILON);
        assert_eq!(
            first.iter().map(|r| r.agent_id.clone()).collect::<Vec<_>>(),
            second.iter().map(|r| r.agent_id.clone()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_consensus_level_bounds() {
        let unanimous = vec![
            PeerRanking {
                ranker: "x".into(),
                order: vec!["a".into(), "b".into()],
            },
            PeerRanking {
                ranker: "y".into(),
                order: vec!["a".into(), "b".into()],
            },
        ];
        assert!((consensus_level(&unanimous) - 1.0).abs() < f64::EPSILON);

        let split = vec![
            PeerRanking {
                ranker: "x".into(),
                order: vec!["a".into(), "b".into()],
            },
            PeerRanking {
                ranker: "y".into(),
                order: vec!["b".into(), "a".into()],
            },
        ];
        let level = consensus_level(&split);
        assert!(level < 1.0 && level > 0.0);

        assert_eq!(consensus_level(&[]), 0.0);
    }

    #[tokio::test]
    async fn test_full_session_aggregates_and_synthesizes() {
        let alpha = Arc::new(
            ScriptedBackend::new("alpha")
                .reply(r#"{"opinion": "use a queue", "confidence": 0.9}"#)
                .reply(ranking_of(&["B", "C"])),
        );
        let beta = Arc::new(
            ScriptedBackend::new("beta")
                .reply(r#"{"opinion": "use a stack", "confidence": 0.8}"#)
                .reply(ranking_of(&["A", "C"])),
        );
        let gamma = Arc::new(
            ScriptedBackend::new("gamma")
                .reply(r#"{"opinion": "use a deque", "confidence": 0.7}"#)
                .reply(ranking_of(&["A", "B"])),
        );
        let chairman = Arc::new(ScriptedBackend::new("chair").reply("Final: use a queue."));

        let engine = CouncilEngine::new(
            as_backends(&[alpha.clone(), beta.clone(), gamma.clone()]),
            chairman.clone() as Arc<dyn AgentBackend>,
        )
        .unwrap();
        let result = engine.run("pick a data structure").await.unwrap();

        assert_eq!(result.opinions.len(), 3);
        assert!(result.opinions.iter().all(|o| !o.is_error));

        // positions: alpha {1,1}, beta {1,2}, gamma {2,2}
        // mean variance = 0.25/3, so consensus = 1/(1 + 1/12) = 12/13
        assert!((result.consensus_level - 12.0 / 13.0).abs() < 1e-9);

        // deanonymized: alpha ranked B,C which are beta,gamma
        let by_ranker: BTreeMap<_, _> = result
            .rankings
            .iter()
            .map(|r| (r.ranker.clone(), r.order.clone()))
            .collect();
        assert_eq!(by_ranker["alpha"], vec!["beta", "gamma"]);
        assert_eq!(by_ranker["beta"], vec!["alpha", "gamma"]);

        // averages: alpha 1.0, beta 1.5, gamma 2.0
        assert_eq!(result.average_ranks[0].agent_id, "alpha");
        assert!((result.average_ranks[0].average_rank - 1.0).abs() < f64::EPSILON);
        assert_eq!(result.average_ranks[1].agent_id, "beta");
        assert!((result.average_ranks[1].average_rank - 1.5).abs() < f64::EPSILON);
        assert_eq!(result.average_ranks[2].agent_id, "gamma");
        assert!((result.average_ranks[2].average_rank - 2.0).abs() < f64::EPSILON);

        assert_eq!(result.synthesis.content, "Final: use a queue.");
        assert_eq!(chairman.invocation_count(), 1);
    }

    #[tokio::test]
    async fn test_ranking_prompts_hide_own_opinion_and_identities() {
        let alpha = Arc::new(
            ScriptedBackend::new("alpha")
                .reply("prefer a queue here")
                .reply(ranking_of(&["B"])),
        );
        let beta = Arc::new(
            ScriptedBackend::new("beta")
                .reply("prefer a stack here")
                .reply(ranking_of(&["A"])),
        );
        let chairman = Arc::new(ScriptedBackend::new("chair").reply("done"));

        let engine = CouncilEngine::new(
            as_backends(&[alpha.clone(), beta.clone()]),
            chairman as Arc<dyn AgentBackend>,
        )
        .unwrap()
        .with_config(CouncilConfig {
            use_personas: false,
            ..CouncilConfig::default()
        });
        engine.run("anything").await.unwrap();

        let alpha_ranking_prompt = &alpha.invocations()[1].prompt;
        assert!(alpha_ranking_prompt.contains("Opinion B:"));
        assert!(alpha_ranking_prompt.contains("prefer a stack here"));
        assert!(!alpha_ranking_prompt.contains("prefer a queue here"));
        assert!(!alpha_ranking_prompt.contains("Opinion A:"));
        // no real identities anywhere in the ranking context
        assert!(!alpha_ranking_prompt.contains("alpha"));
        assert!(!alpha_ranking_prompt.contains("beta"));
    }

    #[tokio::test]
    async fn test_failed_member_is_excluded_but_session_completes() {
        let alpha = Arc::new(
            ScriptedBackend::new("alpha")
                .reply("alpha opinion")
                .reply(ranking_of(&["C"])),
        );
        let beta = Arc::new(
            ScriptedBackend::new("beta")
                .fail(ErrorKind::Timeout, "timed out after 300s")
                .reply(ranking_of(&["A", "C"])),
        );
        let gamma = Arc::new(
            ScriptedBackend::new("gamma")
                .reply("gamma opinion")
                .reply(ranking_of(&["A"])),
        );
        let chairman = Arc::new(ScriptedBackend::new("chair").reply("synthesis"));

        let engine = CouncilEngine::new(
            as_backends(&[alpha.clone(), beta.clone(), gamma.clone()]),
            chairman.clone() as Arc<dyn AgentBackend>,
        )
        .unwrap();
        let result = engine.run("task").await.unwrap();

        assert!(result.opinions[1].is_error);
        assert_eq!(result.opinions[1].error_kind(), Some(ErrorKind::Timeout));

        // beta's failed opinion never appears in a ranking prompt
        let alpha_ranking_prompt = &alpha.invocations()[1].prompt;
        assert!(!alpha_ranking_prompt.contains("Opinion B:"));
        assert!(alpha_ranking_prompt.contains("Opinion C:"));

        // beta still ranks its successful peers
        let beta_ranking = result.rankings.iter().find(|r| r.ranker == "beta").unwrap();
        assert_eq!(beta_ranking.order, vec!["alpha", "gamma"]);

        assert_eq!(result.synthesis.content, "synthesis");
        assert!(result.consensus_level > 0.0);
    }

    #[tokio::test]
    async fn test_all_opinions_failed_skips_chairman() {
        let alpha = Arc::new(
            ScriptedBackend::new("alpha").fail(ErrorKind::CliNotFound, "alpha not on PATH"),
        );
        let beta = Arc::new(ScriptedBackend::new("beta").fail(ErrorKind::Timeout, "timed out"));
        let chairman = Arc::new(ScriptedBackend::new("chair").reply("should not be used"));

        let engine = CouncilEngine::new(
            as_backends(&[alpha.clone(), beta.clone()]),
            chairman.clone() as Arc<dyn AgentBackend>,
        )
        .unwrap();
        let result = engine.run("task").await.unwrap();

        assert_eq!(chairman.invocation_count(), 0);
        assert!(!result.synthesis.is_error);
        assert!(result.synthesis.content.contains("insufficient data"));
        assert_eq!(result.synthesis.metadata["synthesized_locally"], true);

        // nobody had peers to rank, so nobody was invoked a second time
        assert_eq!(alpha.invocation_count(), 1);
        assert_eq!(beta.invocation_count(), 1);
        assert!(result.rankings.iter().all(|r| r.order.is_empty()));
        assert_eq!(result.consensus_level, 0.0);
    }

    #[tokio::test]
    async fn test_personas_prefix_opinion_prompts() {
        let alpha = Arc::new(
            ScriptedBackend::new("alpha")
                .reply("op")
                .reply(ranking_of(&["B"])),
        );
        let beta = Arc::new(
            ScriptedBackend::new("beta")
                .reply("op")
                .reply(ranking_of(&["A"])),
        );
        let chairman = Arc::new(ScriptedBackend::new("chair").reply("done"));

        let engine = CouncilEngine::new(
            as_backends(&[alpha.clone(), beta.clone()]),
            chairman as Arc<dyn AgentBackend>,
        )
        .unwrap();
        let result = engine
            .run("audit the authentication flow for vulnerabilities")
            .await
            .unwrap();

        assert_eq!(result.personas.len(), 2);
        assert_eq!(result.personas[0].name, "Security Analyst");
        assert!(alpha.invocations()[0]
            .prompt
            .starts_with("You are acting as a Security Analyst"));
    }
}
