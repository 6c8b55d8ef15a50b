//! Field identifiers, answer values and the per-field validators.
//!
//! Every field of the sheet has exactly one [`Validator`]. Validators are
//! pure: they see the raw answer, the field key it is stored under and the
//! answers collected so far, and either accept or return a reason.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::record::Answers;

// ── Field identifiers ────────────────────────────────────────────

/// Every question the admission sheet can ask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldId {
    Name,
    Age,
    Gender,
    Race,
    Role,
    GradeClass,
    Subject,
    Strength,
    Agility,
    Endurance,
    Intellect,
    Willpower,
    Luck,
    Appearance,
    Personality,
    Background,
    Relationships,
    /// The repeatable skill group as a whole.
    Skills,
    SkillName,
    SkillPower,
    SkillCooldown,
    SkillDuration,
    SkillDescription,
}

impl FieldId {
    pub const ALL: [FieldId; 23] = [
        Self::Name,
        Self::Age,
        Self::Gender,
        Self::Race,
        Self::Role,
        Self::GradeClass,
        Self::Subject,
        Self::Strength,
        Self::Agility,
        Self::Endurance,
        Self::Intellect,
        Self::Willpower,
        Self::Luck,
        Self::Appearance,
        Self::Personality,
        Self::Background,
        Self::Relationships,
        Self::Skills,
        Self::SkillName,
        Self::SkillPower,
        Self::SkillCooldown,
        Self::SkillDuration,
        Self::SkillDescription,
    ];

    /// The five attributes whose sum is bounded per race.
    pub const SUMMED_ATTRIBUTES: [FieldId; 5] = [
        Self::Strength,
        Self::Agility,
        Self::Endurance,
        Self::Intellect,
        Self::Willpower,
    ];

    /// Stable storage key.
    pub fn key(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Age => "age",
            Self::Gender => "gender",
            Self::Race => "race",
            Self::Role => "role",
            Self::GradeClass => "grade_class",
            Self::Subject => "subject",
            Self::Strength => "strength",
            Self::Agility => "agility",
            Self::Endurance => "endurance",
            Self::Intellect => "intellect",
            Self::Willpower => "willpower",
            Self::Luck => "luck",
            Self::Appearance => "appearance",
            Self::Personality => "personality",
            Self::Background => "background",
            Self::Relationships => "relationships",
            Self::Skills => "skills",
            Self::SkillName => "skill_name",
            Self::SkillPower => "skill_power",
            Self::SkillCooldown => "skill_cooldown",
            Self::SkillDuration => "skill_duration",
            Self::SkillDescription => "skill_description",
        }
    }

    /// Human-readable label used in prompts and error messages.
    pub fn label(self) -> &'static str {
        match self {
            Self::Name => "Name",
            Self::Age => "Age",
            Self::Gender => "Gender",
            Self::Race => "Race",
            Self::Role => "Role",
            Self::GradeClass => "Grade/Class",
            Self::Subject => "Subject",
            Self::Strength => "Strength",
            Self::Agility => "Agility",
            Self::Endurance => "Endurance",
            Self::Intellect => "Intellect",
            Self::Willpower => "Willpower",
            Self::Luck => "Luck",
            Self::Appearance => "Appearance",
            Self::Personality => "Personality",
            Self::Background => "Background",
            Self::Relationships => "Relationships",
            Self::Skills => "Skills",
            Self::SkillName => "Skill name",
            Self::SkillPower => "Skill power",
            Self::SkillCooldown => "Skill cooldown",
            Self::SkillDuration => "Skill duration",
            Self::SkillDescription => "Skill description",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.key() == key)
    }

    /// Whether the field belongs to one entry of the skill group.
    pub fn is_skill_field(self) -> bool {
        matches!(
            self,
            Self::SkillName
                | Self::SkillPower
                | Self::SkillCooldown
                | Self::SkillDuration
                | Self::SkillDescription
        )
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

// ── Field keys ───────────────────────────────────────────────────

/// Storage key of one answer: the field plus, for skill fields, the
/// zero-based repetition index. Rendered as `skill_power#2` (one-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct FieldKey {
    pub field: FieldId,
    pub index: Option<usize>,
}

impl FieldKey {
    pub fn top(field: FieldId) -> Self {
        Self { field, index: None }
    }

    pub fn entry(field: FieldId, index: usize) -> Self {
        Self {
            field,
            index: Some(index),
        }
    }

    pub fn label(&self) -> String {
        match self.index {
            Some(i) => format!("{} #{}", self.field.label(), i + 1),
            None => self.field.label().to_string(),
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(i) => write!(f, "{}#{}", self.field.key(), i + 1),
            None => f.write_str(self.field.key()),
        }
    }
}

impl FromStr for FieldKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, index) = match s.split_once('#') {
            Some((name, n)) => {
                let n: usize = n
                    .parse()
                    .map_err(|_| format!("invalid entry number in field key '{s}'"))?;
                if n == 0 {
                    return Err(format!("entry numbers start at 1 in field key '{s}'"));
                }
                (name, Some(n - 1))
            }
            None => (s, None),
        };
        let field = FieldId::from_key(name).ok_or_else(|| format!("unknown field '{name}'"))?;
        if index.is_some() && !field.is_skill_field() {
            return Err(format!("'{name}' has no numbered entries"));
        }
        Ok(Self { field, index })
    }
}

impl From<FieldKey> for String {
    fn from(key: FieldKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for FieldKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ── Answers ──────────────────────────────────────────────────────

/// An uploaded asset referenced by an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub url: String,
    pub filename: String,
}

impl AttachmentRef {
    const IMAGE_EXTENSIONS: [&'static str; 5] = ["png", "jpg", "jpeg", "gif", "webp"];

    pub fn is_image(&self) -> bool {
        self.filename
            .rsplit_once('.')
            .map(|(_, ext)| {
                let ext = ext.to_ascii_lowercase();
                Self::IMAGE_EXTENSIONS.contains(&ext.as_str())
            })
            .unwrap_or(false)
    }

    /// URL without query string; CDN signatures change between fetches.
    pub fn stable_url(&self) -> &str {
        self.url.split('?').next().unwrap_or(&self.url)
    }
}

/// A single answer. Attachments stay tagged so formatting knows to
/// re-fetch the asset instead of quoting text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Answer {
    Text(String),
    Attachment(AttachmentRef),
}

impl Answer {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Attachment(_) => None,
        }
    }
}

// ── Denylist ─────────────────────────────────────────────────────

/// Case-insensitive banned-substring list.
#[derive(Debug, Clone, Default)]
pub struct Denylist {
    words: Vec<String>,
}

impl Denylist {
    pub fn new(words: &[String]) -> Self {
        Self {
            words: words
                .iter()
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect(),
        }
    }

    /// First banned word contained in `text`, if any.
    pub fn find(&self, text: &str) -> Option<&str> {
        let lowered = text.to_lowercase();
        self.words
            .iter()
            .find(|w| lowered.contains(w.as_str()))
            .map(String::as_str)
    }
}

// ── Validators ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Validator {
    /// Accepts anything, including an empty answer.
    Any,
    /// Integer within a closed interval.
    IntRange { min: i64, max: i64 },
    /// At least `min` characters after trimming.
    MinLength(usize),
    /// Non-empty, at most `max_len` characters, no banned substrings.
    Clean { max_len: usize },
    /// Must match one of the accepted notations.
    Pattern {
        patterns: Vec<Regex>,
        example: String,
    },
    /// Like `Clean`, and distinct from every earlier entry of the same field.
    UniqueInGroup { max_len: usize },
    /// Exact, case-sensitive member of a fixed option set.
    OneOf(Vec<String>),
}

impl Validator {
    /// Validate `raw` for the field stored under `key`.
    pub fn validate(
        &self,
        key: FieldKey,
        raw: &str,
        answers: &Answers,
        denylist: &Denylist,
    ) -> Result<(), String> {
        let value = raw.trim();
        match self {
            Self::Any => Ok(()),
            Self::IntRange { min, max } => {
                let n: i64 = value
                    .parse()
                    .map_err(|_| format!("'{value}' is not a whole number"))?;
                if n < *min || n > *max {
                    return Err(format!("must be between {min} and {max}"));
                }
                Ok(())
            }
            Self::MinLength(min) => {
                let len = value.chars().count();
                if len < *min {
                    return Err(format!("needs at least {min} characters (got {len})"));
                }
                check_denylist(value, denylist)
            }
            Self::Clean { max_len } => check_clean(value, *max_len, denylist),
            Self::Pattern { patterns, example } => {
                if patterns.iter().any(|p| p.is_match(value)) {
                    Ok(())
                } else {
                    Err(format!("use a format like {example}"))
                }
            }
            Self::UniqueInGroup { max_len } => {
                check_clean(value, *max_len, denylist)?;
                let Some(index) = key.index else {
                    return Ok(());
                };
                let duplicate = (0..index).any(|earlier| {
                    answers
                        .text(FieldKey::entry(key.field, earlier))
                        .is_some_and(|prev| prev.trim().eq_ignore_ascii_case(value))
                });
                if duplicate {
                    return Err(format!("'{value}' is already used by an earlier entry"));
                }
                Ok(())
            }
            Self::OneOf(options) => {
                if options.iter().any(|o| o == value) {
                    Ok(())
                } else {
                    Err(format!("choose one of: {}", options.join(", ")))
                }
            }
        }
    }
}

fn check_clean(value: &str, max_len: usize, denylist: &Denylist) -> Result<(), String> {
    if value.is_empty() {
        return Err("cannot be empty".into());
    }
    let len = value.chars().count();
    if len > max_len {
        return Err(format!("must be at most {max_len} characters (got {len})"));
    }
    check_denylist(value, denylist)
}

fn check_denylist(value: &str, denylist: &Denylist) -> Result<(), String> {
    match denylist.find(value) {
        Some(word) => Err(format!("contains a banned word ('{word}')")),
        None => Ok(()),
    }
}

/// Accepted notations for the grade-and-class field.
pub fn grade_class_validator() -> Validator {
    let patterns = [
        r"^[1-6]\s*-\s*[1-9]\d?$",
        r"^[1-6]\s*학년\s*[1-9]\d?\s*반$",
        r"(?i)^grade\s*[1-6]\s*,?\s*class\s*[1-9]\d?$",
        r"(?i)^g[1-6]\s*c[1-9]\d?$",
    ];
    Validator::Pattern {
        patterns: patterns
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect(),
        example: "`2-3`, `2학년 3반` or `grade 2 class 3`".into(),
    }
}
