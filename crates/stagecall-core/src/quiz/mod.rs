//! Branching quiz definitions.
//!
//! A quiz is a scripted chat: the system "types" a prompt, exposes options,
//! and advances exactly one step per selection. Progression is keyed by the
//! step index; the text of earlier transcript lines never matters.

mod machine;
mod scoring;

pub use machine::{QuizMachine, QuizProgress};
pub use scoring::{ScoreBand, ScoringRule};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A system line with its typing delay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuizLine {
    pub text: String,
    /// Typing indicator time; the quiz default applies when absent.
    #[serde(default)]
    pub think_ms: Option<u64>,
    /// Pause after the line is appended.
    #[serde(default)]
    pub pause_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuizStep {
    pub prompt: String,
    pub options: Vec<String>,
    #[serde(default)]
    pub think_ms: Option<u64>,
    #[serde(default)]
    pub next: StepSuccessor,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepSuccessor {
    /// The step at `index + 1`, or the result if there is none.
    #[default]
    Next,
    Terminal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuizDefinition {
    #[serde(default)]
    pub preamble: Vec<QuizLine>,
    pub steps: Vec<QuizStep>,
    #[serde(default = "default_think_ms")]
    pub think_ms: u64,
    /// Delay between the user's answer and the next typing indicator.
    #[serde(default = "default_reply_delay_ms")]
    pub reply_delay_ms: u64,
    #[serde(default)]
    pub processing: Option<QuizLine>,
    /// Result line; `{level}` is replaced by the scored level.
    pub result: QuizLine,
    #[serde(default)]
    pub scoring: ScoringRule,
    #[serde(default = "default_final_wait_ms")]
    pub final_wait_ms: u64,
    pub destination: String,
}

fn default_think_ms() -> u64 {
    2000
}
fn default_reply_delay_ms() -> u64 {
    800
}
fn default_final_wait_ms() -> u64 {
    3000
}

impl QuizDefinition {
    pub fn think_time(&self, line_think_ms: Option<u64>) -> u64 {
        line_think_ms.unwrap_or(self.think_ms)
    }

    pub fn result_text(&self, answers: &[usize]) -> String {
        self.result
            .text
            .replace("{level}", &self.scoring.level(answers))
    }

    pub fn validate(&self, script: &str) -> Result<(), ValidationError> {
        if self.steps.is_empty() {
            return Err(ValidationError::EmptyQuiz {
                script: script.to_string(),
            });
        }
        for (index, step) in self.steps.iter().enumerate() {
            if step.options.is_empty() {
                return Err(ValidationError::EmptyOptions {
                    script: script.to_string(),
                    stage: format!("quiz:step-{}", index + 1).into(),
                });
            }
        }
        if self.destination.trim().is_empty() {
            return Err(ValidationError::InvalidValue {
                field: format!("{script}.quiz.destination"),
                message: "must not be empty".into(),
            });
        }
        self.scoring.validate(script, &self.steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition() -> QuizDefinition {
        toml::from_str(
            r#"
            destination = "/feed"

            [result]
            text = "Seu nível ficou em: {level}."

            [[steps]]
            prompt = "Quantas horas?"
            options = ["Menos de 4h", "4h a 8h"]
            "#,
        )
        .unwrap()
    }

    #[test]
    fn defaults_apply() {
        let quiz = definition();
        assert_eq!(quiz.think_ms, 2000);
        assert_eq!(quiz.reply_delay_ms, 800);
        assert_eq!(quiz.final_wait_ms, 3000);
        assert_eq!(quiz.steps[0].next, StepSuccessor::Next);
        assert_eq!(quiz.scoring, ScoringRule::default());
    }

    #[test]
    fn result_text_fills_level() {
        assert_eq!(definition().result_text(&[0]), "Seu nível ficou em: ALTO.");
    }

    #[test]
    fn empty_options_rejected() {
        let mut quiz = definition();
        quiz.steps[0].options.clear();
        assert!(matches!(
            quiz.validate("quiz"),
            Err(ValidationError::EmptyOptions { .. })
        ));
    }

    #[test]
    fn no_steps_rejected() {
        let mut quiz = definition();
        quiz.steps.clear();
        assert_eq!(
            quiz.validate("quiz"),
            Err(ValidationError::EmptyQuiz {
                script: "quiz".into()
            })
        );
    }
}
