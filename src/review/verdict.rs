//! Defensive parsing of classifier replies.
//!
//! A reply must start with a pass marker (`✅` or `PASS`) or a fail marker
//! (`❌` or `FAIL`). A pass must name an allowed role as `Role: <name>`.
//! Anything else is malformed and never counts as a pass.

use crate::sheet::FieldId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass { role: String, reason: String },
    Fail { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct MalformedVerdict {
    pub raw: String,
    pub reason: String,
}

const PASS_MARKERS: [&str; 2] = ["✅", "PASS"];
const FAIL_MARKERS: [&str; 2] = ["❌", "FAIL"];
const ROLE_TOKEN: &str = "role:";
const DEFAULT_PASS_REASON: &str = "Passed review";
const DEFAULT_FAIL_REASON: &str = "The sheet did not pass review";

/// Strip `marker` from the start of `text`, ASCII markers case-insensitively.
fn strip_marker<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    let head = text.get(..marker.len())?;
    if head.eq_ignore_ascii_case(marker) {
        Some(&text[marker.len()..])
    } else {
        None
    }
}

fn strip_any<'a>(text: &'a str, markers: &[&str]) -> Option<&'a str> {
    markers.iter().find_map(|m| strip_marker(text, m))
}

/// Remove leading punctuation and emphasis left over after a marker.
fn clean(text: &str) -> String {
    text.trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ':' | '-' | '*' | '—'))
        .trim()
        .to_string()
}

/// Value of the first `Role: <name>` token, without markdown decoration,
/// and the line it was found on.
fn role_token(text: &str) -> Option<(String, &str)> {
    text.lines().find_map(|line| {
        let start = line
            .char_indices()
            .map(|(i, _)| i)
            .find(|&i| strip_marker(&line[i..], ROLE_TOKEN).is_some())?;
        let value = line[start + ROLE_TOKEN.len()..]
            .trim()
            .trim_matches(|c: char| matches!(c, '`' | '*' | '"' | '\'' | '.' | ','))
            .trim()
            .to_string();
        Some((value, line))
    })
}

pub fn parse_verdict(text: &str, allowed_roles: &[String]) -> Result<Verdict, MalformedVerdict> {
    let trimmed = text.trim();
    let malformed = |reason: String| MalformedVerdict {
        raw: text.to_string(),
        reason,
    };

    if let Some(rest) = strip_any(trimmed, &FAIL_MARKERS) {
        let reason = clean(rest);
        return Ok(Verdict::Fail {
            reason: if reason.is_empty() {
                DEFAULT_FAIL_REASON.to_string()
            } else {
                reason
            },
        });
    }

    let Some(rest) = strip_any(trimmed, &PASS_MARKERS) else {
        return Err(malformed("the review reply had no verdict".into()));
    };

    let allowed = allowed_roles.join(", ");
    let Some((role, role_line)) = role_token(rest) else {
        return Err(malformed(format!("no valid role (allowed: {allowed})")));
    };
    let Some(role) = allowed_roles.iter().find(|r| **r == role) else {
        return Err(malformed(format!("no valid role (allowed: {allowed})")));
    };

    let reason = clean(
        &rest
            .lines()
            .filter(|l| *l != role_line)
            .collect::<Vec<_>>()
            .join("\n"),
    );
    Ok(Verdict::Pass {
        role: role.clone(),
        reason: if reason.is_empty() {
            DEFAULT_PASS_REASON.to_string()
        } else {
            reason
        },
    })
}

/// Sheet fields a free-text failure reason appears to refer to.
pub fn implicated_fields(reason: &str) -> Vec<FieldId> {
    const KEYWORDS: &[(&str, FieldId)] = &[
        ("name", FieldId::Name),
        ("age", FieldId::Age),
        ("gender", FieldId::Gender),
        ("race", FieldId::Race),
        ("grade", FieldId::GradeClass),
        ("class", FieldId::GradeClass),
        ("subject", FieldId::Subject),
        ("strength", FieldId::Strength),
        ("agility", FieldId::Agility),
        ("endurance", FieldId::Endurance),
        ("intellect", FieldId::Intellect),
        ("willpower", FieldId::Willpower),
        ("luck", FieldId::Luck),
        ("appearance", FieldId::Appearance),
        ("personality", FieldId::Personality),
        ("background", FieldId::Background),
        ("relationship", FieldId::Relationships),
        ("skill", FieldId::Skills),
        ("power", FieldId::SkillPower),
        ("cooldown", FieldId::SkillCooldown),
        ("duration", FieldId::SkillDuration),
    ];

    let words: Vec<String> = reason
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    let mut fields = Vec::new();
    for (keyword, field) in KEYWORDS {
        let hit = words
            .iter()
            .any(|w| w == keyword || w.strip_suffix('s') == Some(keyword));
        if hit && !fields.contains(field) {
            fields.push(*field);
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles() -> Vec<String> {
        vec!["Student".into(), "Teacher".into(), "A.M.L".into()]
    }

    #[test]
    fn pass_with_emoji_and_role() {
        let v = parse_verdict("✅ Role: Student\nA balanced, well written sheet.", &roles()).unwrap();
        assert_eq!(
            v,
            Verdict::Pass {
                role: "Student".into(),
                reason: "A balanced, well written sheet.".into()
            }
        );
    }

    #[test]
    fn pass_with_word_marker_and_decorated_role() {
        let v = parse_verdict("PASS - role: **A.M.L**", &roles()).unwrap();
        assert!(matches!(v, Verdict::Pass { ref role, .. } if role == "A.M.L"));
    }

    #[test]
    fn fail_keeps_reason() {
        let v = parse_verdict("❌ Skill power is too high for the cooldown.", &roles()).unwrap();
        assert_eq!(
            v,
            Verdict::Fail {
                reason: "Skill power is too high for the cooldown.".into()
            }
        );
        let v = parse_verdict("fail:", &roles()).unwrap();
        assert_eq!(
            v,
            Verdict::Fail {
                reason: DEFAULT_FAIL_REASON.into()
            }
        );
    }

    #[test]
    fn missing_marker_is_malformed() {
        let err = parse_verdict("Looks good to me! Role: Student", &roles()).unwrap_err();
        assert!(err.reason.contains("no verdict"));
        assert!(parse_verdict("", &roles()).is_err());
    }

    #[test]
    fn unknown_or_missing_role_is_never_a_pass() {
        let err = parse_verdict("✅ Role: Principal", &roles()).unwrap_err();
        assert!(err.reason.starts_with("no valid role"));
        assert!(err.reason.contains("Student, Teacher, A.M.L"));
        assert!(parse_verdict("✅ Great sheet", &roles()).is_err());
    }

    #[test]
    fn role_match_is_exact() {
        assert!(parse_verdict("✅ Role: student", &roles()).is_err());
    }

    #[test]
    fn implicated_fields_from_reason() {
        let fields = implicated_fields("Strength and agility are too high; skills lack cooldowns.");
        assert_eq!(
            fields,
            vec![
                FieldId::Strength,
                FieldId::Agility,
                FieldId::Skills,
                FieldId::SkillCooldown
            ]
        );
        assert!(implicated_fields("Just not convincing.").is_empty());
    }
}
