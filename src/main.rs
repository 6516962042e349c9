//! Command-line adapter for the quorum deliberation engines.
//!
//! Thin layer only: argument parsing, input validation, agent selection,
//! and JSON rendering. Protocol behavior lives in the library. The JSON
//! result is the only thing written to stdout; all progress output goes
//! to tracing on stderr.
//!
//! ```bash
//! quorum agents
//! quorum council --task "Review this design" --agents claude,codex,gemini
//! quorum debate --question "Should we rewrite it?" --rounds 3
//! quorum deliberate --task "Draft the RFC" --threshold 0.9
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use quorum::{
    AgentBackend, AgentRegistry, CouncilConfig, CouncilEngine, DebateEngine, DeliberationConfig,
    DeliberationEngine,
};

/// Inputs larger than this are rejected rather than forwarded to agents.
const MAX_INPUT_CHARS: usize = 100_000;

#[derive(Parser, Debug)]
#[command(name = "quorum", version, about = "Multi-agent deliberation over AI agent CLIs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Probe every registered agent and report availability
    Agents,

    /// Gather opinions, peer-rank them anonymously, synthesize an answer
    Council {
        /// Task for the council to analyze
        #[arg(long)]
        task: String,

        /// Council member agent names (defaults to all available agents)
        #[arg(long, value_delimiter = ',')]
        agents: Vec<String>,

        /// Agent that synthesizes the final answer (defaults to the first member)
        #[arg(long)]
        chairman: Option<String>,

        /// Skip expert persona framings on opinion prompts
        #[arg(long)]
        no_personas: bool,

        /// Maximum member invocations in flight at once
        #[arg(long, default_value_t = 5)]
        max_concurrent: usize,
    },

    /// Run an adversarial pro/con debate with a judged verdict
    Debate {
        /// Question under debate
        #[arg(long)]
        question: String,

        /// Number of exchanges before judgment
        #[arg(long, default_value_t = 2)]
        rounds: u32,

        /// Agent arguing for the position
        #[arg(long)]
        pro: Option<String>,

        /// Agent arguing against the position
        #[arg(long)]
        con: Option<String>,

        /// Agent judging the transcript
        #[arg(long)]
        judge: Option<String>,
    },

    /// Refine an answer through a producer/reviewer loop
    Deliberate {
        /// Task to produce an answer for
        #[arg(long)]
        task: String,

        /// Round budget before giving up on consensus
        #[arg(long, default_value_t = 5)]
        max_rounds: u32,

        /// Reviewer agreement level that ends the loop
        #[arg(long, default_value_t = 0.85)]
        threshold: f64,

        /// Agent that drafts and revises the answer
        #[arg(long)]
        producer: Option<String>,

        /// Agent that critiques and scores the answer
        #[arg(long)]
        reviewer: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quorum=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let registry = AgentRegistry::with_defaults();

    match cli.command {
        Command::Agents => {
            let report = registry.availability().await;
            print_json(&report)?;
        }
        Command::Council {
            task,
            agents,
            chairman,
            no_personas,
            max_concurrent,
        } => {
            validate_input("task", &task)?;
            let names = select_agents(&registry, agents, 2).await?;
            info!(agents = names.join(","), "running council");

            let members = names
                .iter()
                .map(|name| registry.resolve(name))
                .collect::<Result<Vec<_>, _>>()?;
            let chairman_name = chairman.as_deref().unwrap_or(&names[0]);
            let chairman = registry.resolve(chairman_name)?;

            let engine = CouncilEngine::new(members, chairman)?.with_config(CouncilConfig {
                max_concurrent,
                use_personas: !no_personas,
            });
            let result = engine.run(&task).await?;
            print_json(&result)?;
        }
        Command::Debate {
            question,
            rounds,
            pro,
            con,
            judge,
        } => {
            validate_input("question", &question)?;
            let [pro, con, judge] = assign_roles(&registry, [pro, con, judge]).await?;
            info!(pro = pro.name(), con = con.name(), judge = judge.name(), "running debate");

            let engine = DebateEngine::new(pro, con, judge, rounds)?;
            let result = engine.run(&question).await?;
            print_json(&result)?;
        }
        Command::Deliberate {
            task,
            max_rounds,
            threshold,
            producer,
            reviewer,
        } => {
            validate_input("task", &task)?;
            let [producer, reviewer] = assign_roles(&registry, [producer, reviewer]).await?;
            info!(
                producer = producer.name(),
                reviewer = reviewer.name(),
                "running deliberation"
            );

            let engine = DeliberationEngine::new(
                producer,
                reviewer,
                DeliberationConfig {
                    max_rounds,
                    threshold,
                },
            )?;
            let result = engine.run(&task).await?;
            print_json(&result)?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("serializing result")?
    );
    Ok(())
}

fn validate_input(what: &str, text: &str) -> Result<()> {
    if text.trim().is_empty() {
        bail!("{what} must not be empty");
    }
    let chars = text.chars().count();
    if chars > MAX_INPUT_CHARS {
        bail!("{what} is too long: {chars} characters (limit {MAX_INPUT_CHARS})");
    }
    Ok(())
}

/// Use the explicit agent list, or fall back to whichever registered
/// agents answer their availability probe.
async fn select_agents(
    registry: &AgentRegistry,
    explicit: Vec<String>,
    minimum: usize,
) -> Result<Vec<String>> {
    let names = if explicit.is_empty() {
        let available = registry.available_names().await;
        info!(available = available.join(","), "no agents specified, probed availability");
        available
    } else {
        explicit
    };
    if names.len() < minimum {
        bail!(
            "need at least {minimum} agents, have {} ({})",
            names.len(),
            if names.is_empty() {
                "none available".to_string()
            } else {
                names.join(", ")
            }
        );
    }
    Ok(names)
}

/// Fill `N` role slots: explicit names resolve directly, unfilled slots
/// take available agents round-robin.
async fn assign_roles<const N: usize>(
    registry: &AgentRegistry,
    explicit: [Option<String>; N],
) -> Result<[Arc<dyn AgentBackend>; N]> {
    let need_probe = explicit.iter().any(Option::is_none);
    let available = if need_probe {
        let available = registry.available_names().await;
        if available.is_empty() {
            bail!("no agents available; name them explicitly or install an agent CLI");
        }
        available
    } else {
        Vec::new()
    };

    let mut next = 0usize;
    let mut assigned = Vec::with_capacity(N);
    for slot in explicit {
        let name = match slot {
            Some(name) => name,
            None => {
                let name = available[next % available.len()].clone();
                next += 1;
                name
            }
        };
        assigned.push(registry.resolve(&name)?);
    }
    assigned
        .try_into()
        .map_err(|_| anyhow::anyhow!("role assignment produced the wrong number of agents"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_input_rejects_empty_and_oversized() {
        assert!(validate_input("task", "fine").is_ok());
        assert!(validate_input("task", "").is_err());
        assert!(validate_input("task", "   \n").is_err());
        let oversized = "x".repeat(MAX_INPUT_CHARS + 1);
        assert!(validate_input("task", &oversized).is_err());
        let at_limit = "x".repeat(MAX_INPUT_CHARS);
        assert!(validate_input("task", &at_limit).is_ok());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["quorum", "agents"]).unwrap();
        assert!(matches!(cli.command, Command::Agents));

        let cli = Cli::try_parse_from([
            "quorum", "council", "--task", "t", "--agents", "claude,codex", "--no-personas",
        ])
        .unwrap();
        match cli.command {
            Command::Council { agents, no_personas, .. } => {
                assert_eq!(agents, vec!["claude", "codex"]);
                assert!(no_personas);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = Cli::try_parse_from(["quorum", "debate", "--question", "q", "--rounds", "3"])
            .unwrap();
        match cli.command {
            Command::Debate { rounds, pro, .. } => {
                assert_eq!(rounds, 3);
                assert!(pro.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = Cli::try_parse_from(["quorum", "deliberate", "--task", "t", "--threshold", "0.9"])
            .unwrap();
        match cli.command {
            Command::Deliberate { threshold, max_rounds, .. } => {
                assert!((threshold - 0.9).abs() < f64::EPSILON);
                assert_eq!(max_rounds, 5);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_assign_roles_with_explicit_names() {
        let registry = AgentRegistry::with_defaults();
        let [pro, con] = assign_roles(
            &registry,
            [Some("claude".to_string()), Some("gemini".to_string())],
        )
        .await
        .unwrap();
        assert_eq!(pro.name(), "claude");
        assert_eq!(con.name(), "gemini");
    }

    #[tokio::test]
    async fn test_select_agents_prefers_explicit_list() {
        let registry = AgentRegistry::with_defaults();
        let names = select_agents(&registry, vec!["codex".into(), "gemini".into()], 2)
            .await
            .unwrap();
        assert_eq!(names, vec!["codex", "gemini"]);

        let err = select_agents(&registry, vec!["codex".into()], 2)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("at least 2"));
    }
}
