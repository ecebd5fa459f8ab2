//! Quiz driver: each step is its own stage (`quiz:step-N`) with its own
//! epoch, so a late selection can never resolve the following step.

use std::time::Duration;

use super::driver::StageContext;
use super::runtime::SignalKind;
use super::{ScriptOutcome, ScriptRuntime, Sender};
use crate::error::Result;
use crate::quiz::{QuizDefinition, QuizLine, QuizMachine, QuizProgress, QuizStep};
use crate::scheduler::TeardownScope;
use crate::script::{Script, StageId};

impl ScriptRuntime {
    pub(super) async fn drive_quiz(
        &self,
        script: &Script,
        quiz: &QuizDefinition,
        script_scope: &TeardownScope,
    ) -> Result<ScriptOutcome> {
        if !quiz.preamble.is_empty() {
            let stage_id = StageId::new("quiz:preamble");
            let ctx = self.activate(script, &stage_id, script_scope);
            let preamble = self.say_lines(&ctx, quiz, &quiz.preamble).await;
            self.deactivate(&stage_id, &ctx);
            preamble?;
        }

        let mut machine = QuizMachine::new(quiz.steps.clone());
        let answers = loop {
            let Some(step) = machine.current().cloned() else {
                break machine.answers().to_vec();
            };
            let stage_id = StageId::new(format!("quiz:step-{}", machine.index() + 1));
            let ctx = self.activate(script, &stage_id, script_scope);
            let progress = self.run_step(&ctx, quiz, &step, &mut machine).await;
            self.deactivate(&stage_id, &ctx);
            match progress? {
                QuizProgress::Next { .. } => continue,
                QuizProgress::Finished { answers } => break answers,
            }
        };

        let stage_id = StageId::new("quiz:result");
        let ctx = self.activate(script, &stage_id, script_scope);
        let result = self.conclude(&ctx, quiz, &answers).await;
        self.deactivate(&stage_id, &ctx);
        result?;

        self.hand_off(&quiz.destination, script_scope)?;
        Ok(ScriptOutcome::HandedOff {
            destination: quiz.destination.clone(),
        })
    }

    async fn run_step(
        &self,
        ctx: &StageContext<'_>,
        quiz: &QuizDefinition,
        step: &QuizStep,
        machine: &mut QuizMachine,
    ) -> Result<QuizProgress> {
        self.type_line(&ctx.scope, quiz.think_time(step.think_ms), &step.prompt)
            .await?;
        self.present_options(&step.options);

        let (index, label) = self
            .wait_signal(ctx.epoch, &ctx.scope, |kind| match kind {
                SignalKind::OptionSelected { index, label } => Some((index, label)),
                _ => None,
            })
            .await?;
        self.append(Sender::User, &label);
        let progress = machine.select(index)?;

        ctx.scope
            .after(Duration::from_millis(quiz.reply_delay_ms))
            .await?;
        Ok(progress)
    }

    async fn conclude(
        &self,
        ctx: &StageContext<'_>,
        quiz: &QuizDefinition,
        answers: &[usize],
    ) -> Result<()> {
        if let Some(processing) = &quiz.processing {
            self.say_lines(ctx, quiz, std::slice::from_ref(processing)).await?;
        }
        let text = quiz.result_text(answers);
        self.type_line(&ctx.scope, quiz.think_time(quiz.result.think_ms), &text)
            .await?;
        ctx.scope
            .after(Duration::from_millis(quiz.result.pause_ms + quiz.final_wait_ms))
            .await?;
        Ok(())
    }

    async fn say_lines(
        &self,
        ctx: &StageContext<'_>,
        quiz: &QuizDefinition,
        lines: &[QuizLine],
    ) -> Result<()> {
        for line in lines {
            self.type_line(&ctx.scope, quiz.think_time(line.think_ms), &line.text)
                .await?;
            ctx.scope.after(Duration::from_millis(line.pause_ms)).await?;
        }
        Ok(())
    }

    /// Show the typing indicator for `think_ms`, then append `text`.
    async fn type_line(&self, scope: &TeardownScope, think_ms: u64, text: &str) -> Result<()> {
        self.set_typing(true);
        scope.after(Duration::from_millis(think_ms)).await?;
        self.set_typing(false);
        self.append(Sender::System, text);
        Ok(())
    }
}
