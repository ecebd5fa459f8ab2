//! Result level computation.

use serde::{Deserialize, Serialize};

use super::QuizStep;
use crate::error::ValidationError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScoringRule {
    /// Predetermined outcome regardless of answers.
    Fixed { level: String },
    /// `weights[step][option]` points summed over the answers; the first band
    /// whose `min_score` is reached wins.
    Weighted {
        weights: Vec<Vec<i64>>,
        bands: Vec<ScoreBand>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreBand {
    pub min_score: i64,
    pub level: String,
}

impl Default for ScoringRule {
    fn default() -> Self {
        ScoringRule::Fixed {
            level: "ALTO".into(),
        }
    }
}

impl ScoringRule {
    pub fn score(&self, answers: &[usize]) -> i64 {
        match self {
            ScoringRule::Fixed { .. } => 0,
            ScoringRule::Weighted { weights, .. } => answers
                .iter()
                .enumerate()
                .filter_map(|(step, option)| weights.get(step)?.get(*option).copied())
                .sum(),
        }
    }

    pub fn level(&self, answers: &[usize]) -> String {
        match self {
            ScoringRule::Fixed { level } => level.clone(),
            ScoringRule::Weighted { bands, .. } => {
                let score = self.score(answers);
                bands
                    .iter()
                    .find(|band| score >= band.min_score)
                    .or_else(|| bands.last())
                    .map(|band| band.level.clone())
                    .unwrap_or_default()
            }
        }
    }

    pub fn validate(&self, script: &str, steps: &[QuizStep]) -> Result<(), ValidationError> {
        let ScoringRule::Weighted { weights, bands } = self else {
            return Ok(());
        };
        if bands.is_empty() {
            return Err(ValidationError::InvalidValue {
                field: format!("{script}.quiz.scoring.bands"),
                message: "weighted scoring needs at least one band".into(),
            });
        }
        if weights.len() != steps.len() {
            return Err(ValidationError::InvalidValue {
                field: format!("{script}.quiz.scoring.weights"),
                message: format!("expected {} rows, got {}", steps.len(), weights.len()),
            });
        }
        for (index, (row, step)) in weights.iter().zip(steps).enumerate() {
            if row.len() != step.options.len() {
                return Err(ValidationError::InvalidValue {
                    field: format!("{script}.quiz.scoring.weights[{index}]"),
                    message: format!("expected {} weights, got {}", step.options.len(), row.len()),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weighted() -> ScoringRule {
        ScoringRule::Weighted {
            weights: vec![vec![0, 1, 2], vec![2, 1, 0]],
            bands: vec![
                ScoreBand {
                    min_score: 3,
                    level: "ALTO".into(),
                },
                ScoreBand {
                    min_score: 1,
                    level: "MÉDIO".into(),
                },
                ScoreBand {
                    min_score: 0,
                    level: "BAIXO".into(),
                },
            ],
        }
    }

    #[test]
    fn fixed_ignores_answers() {
        let rule = ScoringRule::default();
        assert_eq!(rule.level(&[0, 0, 0]), "ALTO");
        assert_eq!(rule.level(&[2, 2, 2]), "ALTO");
    }

    #[test]
    fn weighted_picks_first_reached_band() {
        let rule = weighted();
        assert_eq!(rule.score(&[2, 0]), 4);
        assert_eq!(rule.level(&[2, 0]), "ALTO");
        assert_eq!(rule.level(&[1, 2]), "MÉDIO");
        assert_eq!(rule.level(&[0, 2]), "BAIXO");
    }

    #[test]
    fn deserializes_fixed_rule() {
        let rule: ScoringRule = toml::from_str(
            r#"
            type = "fixed"
            level = "ALTO"
            "#,
        )
        .unwrap();
        assert_eq!(rule, ScoringRule::default());
    }
}
