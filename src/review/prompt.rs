//! Prompt construction for review and follow-up tasks.

use crate::config::GuildSettings;
use crate::sheet::CharacterSheet;

pub const DEFAULT_RULES: &str = "\
Review this admission sheet for a school role-play community.
- The character must fit a modern school setting with hidden magic.
- Abilities must be balanced: no instant kills, mind control of players or invulnerability.
- The background must be coherent and consistent with the chosen race and role.
- Descriptions must not contain explicit, hateful or real-person content.";

/// Review prompt: rules, answer format, then the canonical sheet.
pub fn review_prompt(sheet: &CharacterSheet, settings: &GuildSettings) -> String {
    let rules = settings
        .rules_template
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(DEFAULT_RULES);
    format!(
        "{rules}\n\n\
         Answer format:\n\
         - If the sheet passes, start with ✅ and add a line `Role: <role>` where <role> is one of: {roles}.\n\
         - If it fails, start with ❌ followed by a short reason naming the problem fields.\n\n\
         Sheet:\n{sheet}",
        roles = settings.allowed_roles.join(", "),
        sheet = sheet.canonical_text(),
    )
}

/// Prompt for a free-form question, optionally about one of the asker's sheets.
pub fn follow_up_prompt(question: &str, context: Option<&CharacterSheet>) -> String {
    match context {
        Some(sheet) => format!(
            "A member asks about their character sheet. Answer briefly and kindly.\n\n\
             Question: {}\n\nSheet:\n{}",
            question.trim(),
            sheet.canonical_text()
        ),
        None => format!(
            "A member of a school role-play community asks a question. Answer briefly and kindly.\n\n\
             Question: {}",
            question.trim()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::record::tests::sample_sheet;

    #[test]
    fn review_prompt_lists_allowed_roles_and_sheet() {
        let prompt = review_prompt(&sample_sheet(), &GuildSettings::default());
        assert!(prompt.starts_with(DEFAULT_RULES));
        assert!(prompt.contains("Student, Teacher, A.M.L"));
        assert!(prompt.ends_with(&sample_sheet().canonical_text()));
    }

    #[test]
    fn guild_template_replaces_default_rules() {
        let settings = GuildSettings {
            rules_template: Some("House rules: no dragons.".into()),
            ..GuildSettings::default()
        };
        let prompt = review_prompt(&sample_sheet(), &settings);
        assert!(prompt.starts_with("House rules: no dragons."));
        assert!(!prompt.contains(DEFAULT_RULES));
    }

    #[test]
    fn follow_up_includes_question() {
        let p = follow_up_prompt("  Is my skill too strong? ", Some(&sample_sheet()));
        assert!(p.contains("Question: Is my skill too strong?"));
        assert!(p.contains("Name: Hana Seo"));
    }
}
