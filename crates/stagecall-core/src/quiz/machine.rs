use serde::Serialize;

use super::{QuizStep, StepSuccessor};
use crate::error::QuizError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuizProgress {
    Next { index: usize },
    Finished { answers: Vec<usize> },
}

/// Pure step machine. The index is the only progression key.
#[derive(Debug, Clone)]
pub struct QuizMachine {
    steps: Vec<QuizStep>,
    index: usize,
    answers: Vec<usize>,
    finished: bool,
}

impl QuizMachine {
    pub fn new(steps: Vec<QuizStep>) -> Self {
        let finished = steps.is_empty();
        Self {
            steps,
            index: 0,
            answers: Vec::new(),
            finished,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn current(&self) -> Option<&QuizStep> {
        if self.finished {
            return None;
        }
        self.steps.get(self.index)
    }

    pub fn answers(&self) -> &[usize] {
        &self.answers
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Resolve the current step with option `option`.
    pub fn select(&mut self, option: usize) -> Result<QuizProgress, QuizError> {
        let step = self.current().ok_or(QuizError::Finished)?;
        if option >= step.options.len() {
            return Err(QuizError::OptionOutOfRange {
                step: self.index,
                option,
                len: step.options.len(),
            });
        }
        let terminal = step.next == StepSuccessor::Terminal || self.index + 1 >= self.steps.len();
        self.answers.push(option);
        if terminal {
            self.finished = true;
            return Ok(QuizProgress::Finished {
                answers: self.answers.clone(),
            });
        }
        self.index += 1;
        Ok(QuizProgress::Next { index: self.index })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn step(prompt: &str, options: &[&str]) -> QuizStep {
        QuizStep {
            prompt: prompt.into(),
            options: options.iter().map(|o| o.to_string()).collect(),
            think_ms: None,
            next: StepSuccessor::Next,
        }
    }

    fn three_steps() -> Vec<QuizStep> {
        vec![
            step("horas", &["Menos de 4h", "4h a 8h", "Mais de 10h"]),
            step("zona", &["Sim, frequentemente", "Às vezes", "Evito ao máximo"]),
            step("perda", &["Sim, infelizmente", "Tentativa", "Nunca"]),
        ]
    }

    #[test]
    fn content_never_gates_progression() {
        let mut a = QuizMachine::new(three_steps());
        let mut b = QuizMachine::new(three_steps());
        a.select(0).unwrap();
        b.select(0).unwrap();
        assert_eq!(a.select(0).unwrap(), QuizProgress::Next { index: 2 });
        assert_eq!(b.select(1).unwrap(), QuizProgress::Next { index: 2 });
        assert_eq!(a.current(), b.current());
    }

    #[test]
    fn last_step_finishes_with_answers() {
        let mut quiz = QuizMachine::new(three_steps());
        quiz.select(2).unwrap();
        quiz.select(1).unwrap();
        assert_eq!(
            quiz.select(0).unwrap(),
            QuizProgress::Finished {
                answers: vec![2, 1, 0]
            }
        );
        assert_eq!(quiz.select(0), Err(QuizError::Finished));
        assert!(quiz.current().is_none());
    }

    #[test]
    fn terminal_step_ends_early() {
        let mut steps = three_steps();
        steps[0].next = StepSuccessor::Terminal;
        let mut quiz = QuizMachine::new(steps);
        assert!(matches!(quiz.select(0), Ok(QuizProgress::Finished { .. })));
    }

    #[test]
    fn out_of_range_option_does_not_advance() {
        let mut quiz = QuizMachine::new(three_steps());
        assert_eq!(
            quiz.select(7),
            Err(QuizError::OptionOutOfRange {
                step: 0,
                option: 7,
                len: 3
            })
        );
        assert_eq!(quiz.index(), 0);
        assert!(quiz.answers().is_empty());
    }

    proptest! {
        #[test]
        fn index_increments_by_one_per_selection(choices in proptest::collection::vec(0usize..3, 1..3)) {
            let mut quiz = QuizMachine::new(three_steps());
            for (i, choice) in choices.iter().enumerate() {
                prop_assert_eq!(quiz.select(*choice).unwrap(), QuizProgress::Next { index: i + 1 });
                prop_assert_eq!(quiz.index(), i + 1);
            }
            prop_assert_eq!(quiz.answers(), choices.as_slice());
        }
    }
}
