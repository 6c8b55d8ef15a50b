//! Collected answers and the typed character sheet built from them.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

use super::fields::{Answer, FieldId, FieldKey};
use super::Violation;

// ── Answers ──────────────────────────────────────────────────────

/// Ordered answers of one in-progress submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Answers {
    entries: BTreeMap<FieldKey, Answer>,
}

impl Answers {
    pub fn get(&self, key: FieldKey) -> Option<&Answer> {
        self.entries.get(&key)
    }

    pub fn text(&self, key: FieldKey) -> Option<&str> {
        self.entries.get(&key).and_then(Answer::as_text)
    }

    pub fn insert(&mut self, key: FieldKey, answer: Answer) {
        self.entries.insert(key, answer);
    }

    pub fn remove(&mut self, key: FieldKey) -> Option<Answer> {
        self.entries.remove(&key)
    }

    pub fn contains(&self, key: FieldKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldKey, &Answer)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Indices of skill entries with at least one answer.
    pub fn skill_indices(&self) -> BTreeSet<usize> {
        self.entries
            .keys()
            .filter(|k| k.field.is_skill_field())
            .filter_map(|k| k.index)
            .collect()
    }

    pub fn skill_count(&self) -> usize {
        self.skill_indices().len()
    }

    /// Drop every skill entry at or beyond `keep`.
    pub fn truncate_skills(&mut self, keep: usize) {
        self.entries
            .retain(|k, _| !(k.field.is_skill_field() && k.index.is_some_and(|i| i >= keep)));
    }
}

// ── Typed sheet ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    pub strength: u8,
    pub agility: u8,
    pub endurance: u8,
    pub intellect: u8,
    pub willpower: u8,
    pub luck: u8,
}

impl Attributes {
    /// Sum of the five attributes bounded by the race rule.
    pub fn summed(&self) -> u32 {
        [
            self.strength,
            self.agility,
            self.endurance,
            self.intellect,
            self.willpower,
        ]
        .iter()
        .map(|&v| u32::from(v))
        .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    pub power: u8,
    pub cooldown: u8,
    pub duration: u8,
    pub description: String,
}

/// A fully assembled admission sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterSheet {
    pub name: String,
    pub age: u32,
    pub gender: String,
    pub race: String,
    pub role: String,
    /// Asked only for students.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade_class: Option<String>,
    /// Asked only for teachers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub attributes: Attributes,
    pub appearance: Answer,
    pub personality: String,
    pub background: String,
    pub relationships: String,
    #[serde(default)]
    pub skills: Vec<Skill>,
}

/// Sentinel stored when the relationships question is left blank.
pub const NO_RELATIONSHIPS: &str = "none";

impl CharacterSheet {
    /// Build a typed sheet, reporting every missing or unparsable field.
    pub fn from_answers(answers: &Answers) -> Result<Self, Vec<Violation>> {
        let mut reader = Reader {
            answers,
            errors: Vec::new(),
        };

        let name = reader.text(FieldId::Name);
        let age = reader.number(FieldKey::top(FieldId::Age));
        let gender = reader.text(FieldId::Gender);
        let race = reader.text(FieldId::Race);
        let role = reader.text(FieldId::Role);
        let grade_class = reader.optional(FieldId::GradeClass);
        let subject = reader.optional(FieldId::Subject);
        let strength = reader.number(FieldKey::top(FieldId::Strength));
        let agility = reader.number(FieldKey::top(FieldId::Agility));
        let endurance = reader.number(FieldKey::top(FieldId::Endurance));
        let intellect = reader.number(FieldKey::top(FieldId::Intellect));
        let willpower = reader.number(FieldKey::top(FieldId::Willpower));
        let luck = reader.number(FieldKey::top(FieldId::Luck));
        let appearance = reader.answer(FieldId::Appearance);
        let personality = reader.text(FieldId::Personality);
        let background = reader.text(FieldId::Background);
        let relationships = answers
            .text(FieldKey::top(FieldId::Relationships))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(NO_RELATIONSHIPS)
            .to_string();

        let mut skills = Vec::new();
        for index in answers.skill_indices() {
            let entry = |field| FieldKey::entry(field, index);
            skills.push(Skill {
                name: reader.entry_text(entry(FieldId::SkillName)),
                power: reader.number(entry(FieldId::SkillPower)),
                cooldown: reader.number(entry(FieldId::SkillCooldown)),
                duration: reader.number(entry(FieldId::SkillDuration)),
                description: reader.entry_text(entry(FieldId::SkillDescription)),
            });
        }

        if !reader.errors.is_empty() {
            return Err(reader.errors);
        }

        Ok(Self {
            name,
            age,
            gender,
            race,
            role,
            grade_class,
            subject,
            attributes: Attributes {
                strength,
                agility,
                endurance,
                intellect,
                willpower,
                luck,
            },
            appearance: appearance.unwrap_or_else(|| Answer::text("")),
            personality,
            background,
            relationships,
            skills,
        })
    }

    /// Flatten back into answers, e.g. to re-ask some fields of a stored sheet.
    pub fn to_answers(&self) -> Answers {
        let mut answers = Answers::default();
        let mut put = |key: FieldKey, value: String| answers.insert(key, Answer::Text(value));

        put(FieldKey::top(FieldId::Name), self.name.clone());
        put(FieldKey::top(FieldId::Age), self.age.to_string());
        put(FieldKey::top(FieldId::Gender), self.gender.clone());
        put(FieldKey::top(FieldId::Race), self.race.clone());
        put(FieldKey::top(FieldId::Role), self.role.clone());
        if let Some(ref g) = self.grade_class {
            put(FieldKey::top(FieldId::GradeClass), g.clone());
        }
        if let Some(ref s) = self.subject {
            put(FieldKey::top(FieldId::Subject), s.clone());
        }
        let a = &self.attributes;
        put(FieldKey::top(FieldId::Strength), a.strength.to_string());
        put(FieldKey::top(FieldId::Agility), a.agility.to_string());
        put(FieldKey::top(FieldId::Endurance), a.endurance.to_string());
        put(FieldKey::top(FieldId::Intellect), a.intellect.to_string());
        put(FieldKey::top(FieldId::Willpower), a.willpower.to_string());
        put(FieldKey::top(FieldId::Luck), a.luck.to_string());
        put(FieldKey::top(FieldId::Personality), self.personality.clone());
        put(FieldKey::top(FieldId::Background), self.background.clone());
        put(FieldKey::top(FieldId::Relationships), self.relationships.clone());
        for (i, skill) in self.skills.iter().enumerate() {
            put(FieldKey::entry(FieldId::SkillName, i), skill.name.clone());
            put(FieldKey::entry(FieldId::SkillPower, i), skill.power.to_string());
            put(FieldKey::entry(FieldId::SkillCooldown, i), skill.cooldown.to_string());
            put(FieldKey::entry(FieldId::SkillDuration, i), skill.duration.to_string());
            put(
                FieldKey::entry(FieldId::SkillDescription, i),
                skill.description.clone(),
            );
        }
        answers.insert(FieldKey::top(FieldId::Appearance), self.appearance.clone());
        answers
    }

    /// Canonical rendering: fixed field order, trimmed values, internal
    /// whitespace collapsed. Used both as the review payload and as the
    /// fingerprint input.
    pub fn canonical_text(&self) -> String {
        let mut lines = Vec::new();
        let mut line = |label: &str, value: &str| lines.push(format!("{label}: {}", normalize(value)));

        line("Name", &self.name);
        line("Age", &self.age.to_string());
        line("Gender", &self.gender);
        line("Race", &self.race);
        line("Role", &self.role);
        if let Some(ref g) = self.grade_class {
            line("Grade/Class", g);
        }
        if let Some(ref s) = self.subject {
            line("Subject", s);
        }
        let a = &self.attributes;
        line(
            "Attributes",
            &format!(
                "strength {} / agility {} / endurance {} / intellect {} / willpower {} / luck {}",
                a.strength, a.agility, a.endurance, a.intellect, a.willpower, a.luck
            ),
        );
        match &self.appearance {
            Answer::Text(t) => line("Appearance", t),
            Answer::Attachment(att) => line(
                "Appearance",
                &format!("[image {}] {}", att.filename, att.stable_url()),
            ),
        }
        line("Personality", &self.personality);
        line("Background", &self.background);
        line("Relationships", &self.relationships);
        for (i, s) in self.skills.iter().enumerate() {
            line(
                &format!("Skill {}", i + 1),
                &format!(
                    "{} (power {}, cooldown {}, duration {}) {}",
                    s.name, s.power, s.cooldown, s.duration, s.description
                ),
            );
        }
        lines.join("\n")
    }

    /// SHA-256 of the canonical text, hex encoded.
    pub fn fingerprint(&self) -> String {
        fingerprint_text(&self.canonical_text())
    }
}

/// Trim and collapse every whitespace run to a single space.
pub fn normalize(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn fingerprint_text(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Accumulates parse errors while reading typed values out of answers.
struct Reader<'a> {
    answers: &'a Answers,
    errors: Vec<Violation>,
}

impl Reader<'_> {
    fn missing(&mut self, key: FieldKey) {
        self.errors
            .push(Violation::single(key, format!("{} is missing", key.label())));
    }

    fn answer(&mut self, field: FieldId) -> Option<Answer> {
        let key = FieldKey::top(field);
        match self.answers.get(key) {
            Some(Answer::Text(t)) if t.trim().is_empty() => {
                self.missing(key);
                None
            }
            Some(a) => Some(a.clone()),
            None => {
                self.missing(key);
                None
            }
        }
    }

    fn text(&mut self, field: FieldId) -> String {
        self.entry_text(FieldKey::top(field))
    }

    fn entry_text(&mut self, key: FieldKey) -> String {
        match self.answers.text(key).map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => {
                self.missing(key);
                String::new()
            }
        }
    }

    fn optional(&mut self, field: FieldId) -> Option<String> {
        self.answers
            .text(FieldKey::top(field))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }

    fn number<T: std::str::FromStr + Default>(&mut self, key: FieldKey) -> T {
        match self.answers.text(key).map(str::trim) {
            Some(t) => match t.parse() {
                Ok(n) => n,
                Err(_) => {
                    self.errors.push(Violation::single(
                        key,
                        format!("{} must be a whole number, got '{t}'", key.label()),
                    ));
                    T::default()
                }
            },
            None => {
                self.missing(key);
                T::default()
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::sheet::fields::AttachmentRef;

    pub(crate) fn sample_sheet() -> CharacterSheet {
        CharacterSheet {
            name: "Hana Seo".into(),
            age: 17,
            gender: "female".into(),
            race: "Human".into(),
            role: "Student".into(),
            grade_class: Some("2-3".into()),
            subject: None,
            attributes: Attributes {
                strength: 3,
                agility: 3,
                endurance: 3,
                intellect: 3,
                willpower: 3,
                luck: 2,
            },
            appearance: Answer::text("Short black hair, round glasses and a red scarf."),
            personality: "Curious, stubborn and kind to strangers.".into(),
            background: "Grew up above her parents' bakery and found an old spellbook in the attic."
                .into(),
            relationships: NO_RELATIONSHIPS.into(),
            skills: vec![Skill {
                name: "Warm Bread".into(),
                power: 2,
                cooldown: 1,
                duration: 3,
                description: "Heals a friend a little.".into(),
            }],
        }
    }

    #[test]
    fn answers_roundtrip_through_typed_sheet() {
        let sheet = sample_sheet();
        let answers = sheet.to_answers();
        assert_eq!(answers.skill_count(), 1);
        assert_eq!(CharacterSheet::from_answers(&answers).unwrap(), sheet);
    }

    #[test]
    fn missing_fields_are_all_reported() {
        let mut answers = sample_sheet().to_answers();
        answers.remove(FieldKey::top(FieldId::Name));
        answers.remove(FieldKey::top(FieldId::Luck));
        answers.insert(FieldKey::top(FieldId::Age), Answer::text("seventeen"));
        let errors = CharacterSheet::from_answers(&answers).unwrap_err();
        let fields: Vec<FieldKey> = errors.iter().flat_map(|e| e.fields.clone()).collect();
        assert!(fields.contains(&FieldKey::top(FieldId::Name)));
        assert!(fields.contains(&FieldKey::top(FieldId::Luck)));
        assert!(fields.contains(&FieldKey::top(FieldId::Age)));
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn stray_skill_entry_does_not_invent_gaps() {
        let mut answers = sample_sheet().to_answers();
        answers.insert(FieldKey::entry(FieldId::SkillName, 7), Answer::text("Seventh"));
        let errors = CharacterSheet::from_answers(&answers).unwrap_err();
        let fields: Vec<FieldKey> = errors.iter().flat_map(|e| e.fields.clone()).collect();
        assert!(fields.iter().all(|k| k.index == Some(7)));
        assert!(fields.contains(&FieldKey::entry(FieldId::SkillPower, 7)));
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn blank_relationships_become_sentinel() {
        let mut answers = sample_sheet().to_answers();
        answers.insert(FieldKey::top(FieldId::Relationships), Answer::text("   "));
        let sheet = CharacterSheet::from_answers(&answers).unwrap();
        assert_eq!(sheet.relationships, NO_RELATIONSHIPS);
    }

    #[test]
    fn fingerprint_ignores_formatting_noise() {
        let a = sample_sheet();
        let mut b = sample_sheet();
        b.personality = "  Curious,   stubborn\nand kind to strangers. ".into();
        assert_eq!(a.fingerprint(), b.fingerprint());

        b.personality = "Curious and stubborn.".into();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_ignores_attachment_query_string() {
        let mut a = sample_sheet();
        let mut b = sample_sheet();
        a.appearance = Answer::Attachment(AttachmentRef {
            url: "https://cdn.example/hana.png?ex=1&hm=aa".into(),
            filename: "hana.png".into(),
        });
        b.appearance = Answer::Attachment(AttachmentRef {
            url: "https://cdn.example/hana.png?ex=2&hm=bb".into(),
            filename: "hana.png".into(),
        });
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert!(a.canonical_text().contains("[image hana.png]"));
    }

    #[test]
    fn truncate_skills_keeps_leading_entries() {
        let mut sheet = sample_sheet();
        for i in 0..3 {
            sheet.skills.push(Skill {
                name: format!("Extra {i}"),
                power: 1,
                cooldown: 0,
                duration: 1,
                description: "Filler skill entry.".into(),
            });
        }
        let mut answers = sheet.to_answers();
        assert_eq!(answers.skill_count(), 4);
        answers.truncate_skills(2);
        assert_eq!(answers.skill_count(), 2);
        assert!(answers.contains(FieldKey::entry(FieldId::SkillName, 1)));
        assert!(!answers.contains(FieldKey::entry(FieldId::SkillName, 2)));
    }
}
