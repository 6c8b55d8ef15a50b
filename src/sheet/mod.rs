//! The admission sheet: fields, validators, typed record and cross-field rules.

pub mod fields;
pub mod questions;
pub mod record;
pub mod rules;

pub use fields::{Answer, AttachmentRef, FieldId, FieldKey, Validator};
pub use record::{Answers, CharacterSheet, Skill};
pub use rules::RuleChecker;

use serde::Serialize;
use std::fmt;

use crate::config::SheetConfig;

/// A failed check: the fields to re-ask and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub fields: Vec<FieldKey>,
    pub reason: String,
}

impl Violation {
    pub fn new(fields: Vec<FieldKey>, reason: impl Into<String>) -> Self {
        Self {
            fields,
            reason: reason.into(),
        }
    }

    pub fn single(field: FieldKey, reason: impl Into<String>) -> Self {
        Self::new(vec![field], reason)
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<String> = self.fields.iter().map(FieldKey::label).collect();
        write!(f, "{}: {}", labels.join(", "), self.reason)
    }
}

/// Every distinct field named by `violations`, in first-seen order.
pub fn offending_fields(violations: &[Violation]) -> Vec<FieldKey> {
    let mut keys = Vec::new();
    for key in violations.iter().flat_map(|v| v.fields.iter()) {
        if !keys.contains(key) {
            keys.push(*key);
        }
    }
    keys
}

/// Full check of collected answers: every field validator, then typed
/// parsing, then the cross-field rules. Rules only run once the sheet
/// parses, so they never see a partial record.
pub fn check(answers: &Answers, cfg: &SheetConfig) -> Result<CharacterSheet, Vec<Violation>> {
    let denylist = fields::Denylist::new(&cfg.banned_words);
    let mut violations = Vec::new();

    for (key, answer) in answers.iter() {
        match answer {
            Answer::Text(raw) => {
                if let Err(reason) =
                    questions::validator_for(key.field, cfg).validate(*key, raw, answers, &denylist)
                {
                    violations.push(Violation::single(*key, format!("{}: {reason}", key.label())));
                }
            }
            Answer::Attachment(att) => {
                if key.field != FieldId::Appearance || !att.is_image() {
                    violations.push(Violation::single(
                        *key,
                        format!("{} does not accept the attachment '{}'", key.label(), att.filename),
                    ));
                }
            }
        }
    }
    if !violations.is_empty() {
        return Err(violations);
    }

    let sheet = CharacterSheet::from_answers(answers)?;
    let violations = RuleChecker::new(cfg).check(&sheet);
    if violations.is_empty() {
        Ok(sheet)
    } else {
        Err(violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::record::tests::sample_sheet;

    #[test]
    fn valid_answers_produce_a_sheet() {
        let answers = sample_sheet().to_answers();
        let sheet = check(&answers, &SheetConfig::default()).unwrap();
        assert_eq!(sheet, sample_sheet());
    }

    #[test]
    fn field_errors_are_reported_before_rules() {
        let mut answers = sample_sheet().to_answers();
        answers.insert(FieldKey::top(FieldId::Strength), Answer::text("9"));
        let violations = check(&answers, &SheetConfig::default()).unwrap_err();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].fields, vec![FieldKey::top(FieldId::Strength)]);
    }

    #[test]
    fn banned_words_block_names() {
        let cfg = SheetConfig {
            banned_words: vec!["badword".into()],
            ..SheetConfig::default()
        };
        let mut answers = sample_sheet().to_answers();
        answers.insert(FieldKey::top(FieldId::Name), Answer::text("Mr BadWord"));
        let violations = check(&answers, &cfg).unwrap_err();
        assert!(violations[0].reason.contains("banned"));
    }

    #[test]
    fn non_image_attachment_is_rejected() {
        let mut answers = sample_sheet().to_answers();
        answers.insert(
            FieldKey::top(FieldId::Appearance),
            Answer::Attachment(AttachmentRef {
                url: "https://cdn.example/notes.pdf".into(),
                filename: "notes.pdf".into(),
            }),
        );
        assert!(check(&answers, &SheetConfig::default()).is_err());
    }

    #[test]
    fn offending_fields_are_deduplicated() {
        let a = FieldKey::top(FieldId::Strength);
        let b = FieldKey::top(FieldId::Agility);
        let violations = vec![
            Violation::new(vec![a, b], "sum"),
            Violation::single(b, "again"),
        ];
        assert_eq!(offending_fields(&violations), vec![a, b]);
    }
}
