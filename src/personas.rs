//! Persona assignment for council members.
//!
//! Councils work better when members look at the task from different
//! angles, so each member gets an expert framing prepended to its
//! stage-1 prompt. The engine depends only on [`PersonaStrategy`];
//! the keyword matcher below is the default implementation.

use serde::{Deserialize, Serialize};

/// An expert framing applied to a council member's prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    pub focus_areas: Vec<String>,
    pub briefing: String,
}

impl Persona {
    fn new(name: &str, focus_areas: &[&str], briefing: &str) -> Self {
        Self {
            name: name.to_string(),
            focus_areas: focus_areas.iter().map(|s| s.to_string()).collect(),
            briefing: briefing.to_string(),
        }
    }

    /// Wrap a base prompt with this persona's framing.
    pub fn apply(&self, base_prompt: &str) -> String {
        format!(
            "You are acting as a {}.\n\nFOCUS AREAS: {}\n\n{}\n\n---\n\n{}",
            self.name,
            self.focus_areas.join(", "),
            self.briefing,
            base_prompt
        )
    }
}

/// Maps free-form task text to an ordered set of personas.
pub trait PersonaStrategy: Send + Sync + std::fmt::Debug {
    /// Assign `count` personas for the task, most relevant first.
    fn assign(&self, task: &str, count: usize) -> Vec<Persona>;
}

fn security_analyst() -> Persona {
    Persona::new(
        "Security Analyst",
        &["authentication", "authorization", "injection", "data exposure"],
        "Analyze from a security perspective: authentication and authorization \
         flows, injection points, data handling and exposure risks, cryptography.",
    )
}

fn systems_architect() -> Persona {
    Persona::new(
        "Systems Architect",
        &["scalability", "performance", "caching", "failure modes"],
        "Analyze from an architectural perspective: scalability and load \
         handling, performance bottlenecks, caching, failure modes and resilience.",
    )
}

fn code_quality_reviewer() -> Persona {
    Persona::new(
        "Code Quality Reviewer",
        &["maintainability", "testing", "patterns", "error handling"],
        "Analyze from a code quality perspective: structure and abstraction, \
         error handling patterns, test coverage, code smells.",
    )
}

fn product_manager() -> Persona {
    Persona::new(
        "Product Manager",
        &["user needs", "prioritization", "UX", "metrics"],
        "Analyze from a product perspective: user needs and pain points, \
         feature prioritization, user experience, success metrics.",
    )
}

fn data_engineer() -> Persona {
    Persona::new(
        "Data Engineer",
        &["data modeling", "pipelines", "queries", "consistency"],
        "Analyze from a data engineering perspective: data model design, \
         pipeline architecture, query performance, data quality and consistency.",
    )
}

fn devils_advocate() -> Persona {
    Persona::new(
        "Devil's Advocate",
        &["risks", "failure modes", "assumptions", "counterarguments"],
        "Challenge assumptions and find weaknesses: question premises, surface \
         failure modes and edge cases, present counterarguments and overlooked risks.",
    )
}

/// Keyword table: any hit contributes to the persona's score.
fn keyword_table() -> Vec<(&'static [&'static str], Persona)> {
    vec![
        (
            &["security", "auth", "vulnerability", "injection", "xss", "encryption", "credentials", "token"],
            security_analyst(),
        ),
        (
            &["scalability", "performance", "architecture", "latency", "caching", "distributed", "infrastructure"],
            systems_architect(),
        ),
        (
            &["refactor", "code review", "maintainability", "testing", "test coverage", "clean code"],
            code_quality_reviewer(),
        ),
        (
            &["product", "feature", "user", "ux", "roadmap", "requirements", "customer"],
            product_manager(),
        ),
        (
            &["database", "schema", "query", "sql", "pipeline", "etl", "analytics"],
            data_engineer(),
        ),
    ]
}

/// Default strategy: static keyword scoring over the task text.
///
/// Scoring: +1 per keyword substring hit, +1 more when the keyword also
/// appears as a whole word. Matched personas are taken best-first,
/// deduplicated, then topped up from a complementary default list. A
/// council of 3 or more always includes the Devil's Advocate.
#[derive(Debug, Default)]
pub struct KeywordPersonas;

impl KeywordPersonas {
    fn score(task_lower: &str, keywords: &[&str]) -> usize {
        let words: Vec<&str> = task_lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let mut score = 0;
        for keyword in keywords {
            if task_lower.contains(keyword) {
                score += 1;
                if words.contains(keyword) {
                    score += 1;
                }
            }
        }
        score
    }
}

impl PersonaStrategy for KeywordPersonas {
    fn assign(&self, task: &str, count: usize) -> Vec<Persona> {
        let task_lower = task.to_lowercase();

        let mut scored: Vec<(usize, Persona)> = keyword_table()
            .into_iter()
            .filter_map(|(keywords, persona)| {
                let score = Self::score(&task_lower, keywords);
                (score > 0).then_some((score, persona))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        let mut selected: Vec<Persona> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for (_, persona) in scored {
            if selected.len() >= count {
                break;
            }
            if seen.insert(persona.name.clone()) {
                selected.push(persona);
            }
        }

        for persona in [
            code_quality_reviewer(),
            devils_advocate(),
            systems_architect(),
            product_manager(),
        ] {
            if selected.len() >= count {
                break;
            }
            if seen.insert(persona.name.clone()) {
                selected.push(persona);
            }
        }

        // Larger councils always carry a contrarian voice.
        let advocate = devils_advocate();
        if count >= 3 && !seen.contains(&advocate.name) {
            if selected.len() >= count {
                let last = selected.len() - 1;
                selected[last] = advocate;
            } else {
                selected.push(advocate);
            }
        }

        selected.truncate(count);
        selected
    }
}
