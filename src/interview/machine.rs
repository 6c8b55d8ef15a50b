//! Pure interview state machine.
//!
//! [`Interview`] owns the answers of one submission and a cursor into the
//! flow. It performs no I/O: the async driver in `session` feeds it
//! replies and relays prompts.

use std::collections::VecDeque;
use std::sync::Arc;

use super::flow::{Flow, Input, Question, RepeatGroup, Step, YesNo};
use crate::sheet::fields::{Answer, FieldId, FieldKey};
use crate::sheet::record::Answers;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    /// Top-level step.
    Step(usize),
    /// Continuation question of a group before entry `rep`.
    Continue { step: usize, rep: usize },
    /// Question `sub` of entry `rep` of a group.
    Group { step: usize, rep: usize, sub: usize },
    /// Re-asking a single field out of order.
    Revisit(FieldKey),
    Done,
}

/// What the submitter is asked next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// Field the reply is stored under; `None` for continuation questions.
    pub key: Option<FieldKey>,
    pub text: String,
    pub options: Vec<String>,
    pub accepts_attachment: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Answer accepted; ask the next prompt.
    Next,
    /// Answer rejected; re-ask the same prompt after this message.
    Rejected(String),
    Complete,
}

pub struct Interview {
    flow: Arc<Flow>,
    answers: Answers,
    cursor: Cursor,
    /// Fields still to re-ask in revisit mode.
    pending: VecDeque<FieldKey>,
    revisiting: bool,
    notice: Option<String>,
}

impl Interview {
    pub fn new(flow: Arc<Flow>) -> Self {
        let mut interview = Self {
            flow,
            answers: Answers::default(),
            cursor: Cursor::Step(0),
            pending: VecDeque::new(),
            revisiting: false,
            notice: None,
        };
        interview.settle();
        interview
    }

    /// Re-ask only `keys` of an otherwise complete set of answers.
    ///
    /// A key naming the skill group clears the group and asks it again
    /// from the first entry. Conditional questions are reconciled after
    /// the listed keys: newly applicable ones are asked, answers to ones
    /// that no longer apply are dropped.
    pub fn revisit(flow: Arc<Flow>, answers: Answers, keys: &[FieldKey]) -> Self {
        let existing = answers.skill_indices();
        let mut pending = VecDeque::new();
        for key in keys {
            if key.index.is_some_and(|i| !existing.contains(&i)) {
                tracing::debug!(key = %key, "Skipping revisit of a skill entry that does not exist");
                continue;
            }
            if !pending.contains(key) {
                pending.push_back(*key);
            }
        }
        let mut interview = Self {
            flow,
            answers,
            cursor: Cursor::Done,
            pending,
            revisiting: true,
            notice: None,
        };
        interview.next_revisit();
        interview
    }

    pub fn answers(&self) -> &Answers {
        &self.answers
    }

    pub fn is_complete(&self) -> bool {
        self.cursor == Cursor::Done
    }

    /// Discard all collected answers.
    pub fn cancel(self) {
        drop(self);
    }

    pub fn into_answers(self) -> Answers {
        self.answers
    }

    /// One-off message for the submitter produced by the last transition.
    pub fn take_notice(&mut self) -> Option<String> {
        self.notice.take()
    }

    pub fn prompt(&self) -> Option<Prompt> {
        match self.cursor {
            Cursor::Step(i) => self.question_at(i).map(|q| ask(q, FieldKey::top(q.field))),
            Cursor::Continue { step, .. } => self.group_at(step).map(|g| Prompt {
                key: None,
                text: g.prompt.clone(),
                options: Vec::new(),
                accepts_attachment: false,
            }),
            Cursor::Group { step, rep, sub } => self
                .group_at(step)
                .and_then(|g| g.questions.get(sub))
                .map(|q| ask(q, FieldKey::entry(q.field, rep))),
            Cursor::Revisit(key) => self.question_for(key).map(|q| ask(q, key)),
            Cursor::Done => None,
        }
    }

    /// Feed one reply from the submitter.
    pub fn answer(&mut self, answer: Answer) -> Outcome {
        self.notice = None;
        match self.cursor {
            Cursor::Done => Outcome::Complete,
            Cursor::Continue { step, rep } => {
                let Some(raw) = answer.as_text() else {
                    return Outcome::Rejected("Please answer yes or no.".into());
                };
                match self.flow.yes_no(raw) {
                    Some(YesNo::Yes) => self.cursor = Cursor::Group { step, rep, sub: 0 },
                    Some(YesNo::No) => self.leave_group(step),
                    None => return Outcome::Rejected("Please answer yes or no.".into()),
                }
                self.outcome()
            }
            Cursor::Step(i) => {
                let key = match self.question_at(i) {
                    Some(q) => FieldKey::top(q.field),
                    None => return self.outcome(),
                };
                if let Err(msg) = self.accept(key, answer) {
                    return Outcome::Rejected(msg);
                }
                self.cursor = Cursor::Step(i + 1);
                self.settle();
                self.outcome()
            }
            Cursor::Group { step, rep, sub } => {
                let Some(group) = self.group_at(step) else {
                    return self.outcome();
                };
                let count = group.questions.len();
                let max = group.max;
                let key = match group.questions.get(sub) {
                    Some(q) => FieldKey::entry(q.field, rep),
                    None => return self.outcome(),
                };
                if let Err(msg) = self.accept(key, answer) {
                    return Outcome::Rejected(msg);
                }
                if sub + 1 < count {
                    self.cursor = Cursor::Group {
                        step,
                        rep,
                        sub: sub + 1,
                    };
                } else if rep + 1 >= max {
                    self.notice = Some(format!(
                        "You have reached the maximum of {max} entries, moving on."
                    ));
                    self.leave_group(step);
                } else {
                    self.cursor = Cursor::Continue { step, rep: rep + 1 };
                }
                self.outcome()
            }
            Cursor::Revisit(key) => {
                if let Err(msg) = self.accept(key, answer) {
                    return Outcome::Rejected(msg);
                }
                self.next_revisit();
                self.outcome()
            }
        }
    }

    fn outcome(&self) -> Outcome {
        if self.is_complete() {
            Outcome::Complete
        } else {
            Outcome::Next
        }
    }

    /// Validate and store one answer under `key`.
    fn accept(&mut self, key: FieldKey, answer: Answer) -> Result<(), String> {
        let Some(question) = self.question_for(key) else {
            return Err(format!("{} cannot be answered here.", key.label()));
        };
        let stored = match (&question.input, answer) {
            (Input::TextOrAttachment(_), Answer::Attachment(att)) => {
                if !att.is_image() {
                    return Err(format!("{} Only image uploads are accepted.", question.error));
                }
                Answer::Attachment(att)
            }
            (_, Answer::Attachment(_)) => {
                return Err(format!("{} Please reply with text.", question.error));
            }
            (input, Answer::Text(raw)) => {
                let trimmed = raw.trim();
                match (&question.default, trimmed) {
                    (Some(default), "" | "-") => Answer::text(default.clone()),
                    _ => {
                        let result = match input {
                            Input::Options(options) => {
                                if options.iter().any(|o| o == trimmed) {
                                    Ok(())
                                } else {
                                    Err(format!("Options: {}", options.join(", ")))
                                }
                            }
                            Input::Text(v) | Input::TextOrAttachment(v) => {
                                v.validate(key, &raw, &self.answers, &self.flow.denylist)
                            }
                        };
                        if let Err(reason) = result {
                            return Err(format!("{} ({reason})", question.error));
                        }
                        Answer::Text(trimmed.to_string())
                    }
                }
            }
        };
        self.answers.insert(key, stored);
        Ok(())
    }

    /// Advance past top-level steps whose condition is false.
    fn settle(&mut self) {
        loop {
            match self.cursor {
                Cursor::Step(i) if i >= self.flow.steps.len() => {
                    self.cursor = Cursor::Done;
                    return;
                }
                Cursor::Step(i) => match &self.flow.steps[i] {
                    Step::Ask(q) if !q.applies(&self.answers) => {
                        self.answers.remove(FieldKey::top(q.field));
                        self.cursor = Cursor::Step(i + 1);
                    }
                    Step::Ask(_) => return,
                    Step::Repeat(g) if g.max == 0 => self.cursor = Cursor::Step(i + 1),
                    Step::Repeat(_) => {
                        self.cursor = Cursor::Continue { step: i, rep: 0 };
                        return;
                    }
                },
                _ => return,
            }
        }
    }

    fn leave_group(&mut self, step: usize) {
        if self.revisiting {
            self.next_revisit();
        } else {
            self.cursor = Cursor::Step(step + 1);
            self.settle();
        }
    }

    /// Move to the next pending key, reconciling branch conditions once
    /// the queue runs dry.
    fn next_revisit(&mut self) {
        loop {
            if let Some(key) = self.pending.pop_front() {
                if key.field == FieldId::Skills {
                    if let Some((step, _)) = self.flow.find_group(FieldId::Skills) {
                        self.answers.truncate_skills(0);
                        self.cursor = Cursor::Continue { step, rep: 0 };
                        return;
                    }
                    continue;
                }
                if self.question_for(key).is_some() {
                    self.cursor = Cursor::Revisit(key);
                    return;
                }
                continue;
            }
            if !self.reconcile_branches() {
                self.cursor = Cursor::Done;
                return;
            }
        }
    }

    /// Queue newly applicable questions and drop stale ones. Returns
    /// whether anything was queued.
    fn reconcile_branches(&mut self) -> bool {
        let mut queued = false;
        for step in &self.flow.steps {
            let Step::Ask(q) = step else { continue };
            if q.when.is_none() {
                continue;
            }
            let key = FieldKey::top(q.field);
            let present = self.answers.contains(key);
            if q.applies(&self.answers) {
                if !present {
                    self.pending.push_back(key);
                    queued = true;
                }
            } else if present {
                self.answers.remove(key);
            }
        }
        queued
    }

    fn question_at(&self, step: usize) -> Option<&Question> {
        match self.flow.steps.get(step) {
            Some(Step::Ask(q)) => Some(q),
            _ => None,
        }
    }

    fn group_at(&self, step: usize) -> Option<&RepeatGroup> {
        match self.flow.steps.get(step) {
            Some(Step::Repeat(g)) => Some(g),
            _ => None,
        }
    }

    fn question_for(&self, key: FieldKey) -> Option<&Question> {
        match key.index {
            None => self.flow.find_question(key.field).and_then(|i| self.question_at(i)),
            Some(_) => {
                let (step, sub) = self.flow.find_group(key.field)?;
                self.group_at(step)?.questions.get(sub?)
            }
        }
    }
}

fn ask(question: &Question, key: FieldKey) -> Prompt {
    let mut text = question.prompt.clone();
    if let Some(i) = key.index {
        text = format!("[#{}] {text}", i + 1);
    }
    let options = match &question.input {
        Input::Options(o) => o.clone(),
        _ => Vec::new(),
    };
    Prompt {
        key: Some(key),
        text,
        options,
        accepts_attachment: matches!(question.input, Input::TextOrAttachment(_)),
    }
}
