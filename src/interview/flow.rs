//! Declarative question flow.
//!
//! A [`Flow`] is an ordered list of steps. A step is either a single
//! question or a bounded repeatable group of questions. Flows are built
//! once at startup and shared between interviews.

use crate::sheet::fields::{Denylist, FieldId, FieldKey, Validator};
use crate::sheet::record::Answers;

/// How a question accepts its answer.
#[derive(Debug, Clone)]
pub enum Input {
    /// Exact, case-sensitive member of the option set.
    Options(Vec<String>),
    /// Free text checked by the validator.
    Text(Validator),
    /// Free text checked by the validator, or an uploaded image.
    TextOrAttachment(Validator),
}

/// Branch condition over earlier answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Equals(FieldId, String),
}

impl Condition {
    pub fn holds(&self, answers: &Answers) -> bool {
        match self {
            Self::Equals(field, expected) => answers
                .text(FieldKey::top(*field))
                .is_some_and(|v| v.trim() == expected),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Question {
    pub field: FieldId,
    pub prompt: String,
    pub input: Input,
    /// Skip the question unless this holds.
    pub when: Option<Condition>,
    /// Canned re-prompt prefix on rejection.
    pub error: String,
    /// Stored instead of an empty (or `-`) answer.
    pub default: Option<String>,
}

impl Question {
    pub fn new(field: FieldId, prompt: impl Into<String>, input: Input) -> Self {
        Self {
            field,
            prompt: prompt.into(),
            input,
            when: None,
            error: format!("That is not a valid {}.", field.label().to_lowercase()),
            default: None,
        }
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.when = Some(condition);
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = error.into();
        self
    }

    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn applies(&self, answers: &Answers) -> bool {
        self.when.as_ref().is_none_or(|c| c.holds(answers))
    }
}

/// Questions asked once per entry while the submitter keeps answering yes.
#[derive(Debug, Clone)]
pub struct RepeatGroup {
    pub group: FieldId,
    /// Continuation question asked before each entry.
    pub prompt: String,
    pub max: usize,
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone)]
pub enum Step {
    Ask(Question),
    Repeat(RepeatGroup),
}

#[derive(Debug, Clone)]
pub struct Flow {
    pub steps: Vec<Step>,
    pub affirmative: Vec<String>,
    pub negative: Vec<String>,
    pub denylist: Denylist,
}

/// Reply to a continuation question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YesNo {
    Yes,
    No,
}

impl Flow {
    pub fn yes_no(&self, raw: &str) -> Option<YesNo> {
        let value = raw.trim().to_lowercase();
        if self.affirmative.iter().any(|a| a.to_lowercase() == value) {
            Some(YesNo::Yes)
        } else if self.negative.iter().any(|n| n.to_lowercase() == value) {
            Some(YesNo::No)
        } else {
            None
        }
    }

    /// Index of the top-level question for `field`.
    pub fn find_question(&self, field: FieldId) -> Option<usize> {
        self.steps
            .iter()
            .position(|s| matches!(s, Step::Ask(q) if q.field == field))
    }

    /// Step index of the group containing `field` (or named `field`) and
    /// the position of the field inside it.
    pub fn find_group(&self, field: FieldId) -> Option<(usize, Option<usize>)> {
        self.steps.iter().enumerate().find_map(|(i, s)| match s {
            Step::Repeat(g) if g.group == field => Some((i, None)),
            Step::Repeat(g) => g
                .questions
                .iter()
                .position(|q| q.field == field)
                .map(|sub| (i, Some(sub))),
            Step::Ask(_) => None,
        })
    }
}
