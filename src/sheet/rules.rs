//! Cross-field rules evaluated on a fully assembled sheet.

use crate::config::SheetConfig;

use super::fields::{FieldId, FieldKey};
use super::record::CharacterSheet;
use super::Violation;

/// Checks category-dependent numeric and structural rules.
pub struct RuleChecker<'a> {
    cfg: &'a SheetConfig,
}

impl<'a> RuleChecker<'a> {
    pub fn new(cfg: &'a SheetConfig) -> Self {
        Self { cfg }
    }

    /// Every violated rule; empty when the sheet is acceptable.
    pub fn check(&self, sheet: &CharacterSheet) -> Vec<Violation> {
        let mut violations = Vec::new();
        self.check_branches(sheet, &mut violations);
        self.check_attribute_sum(sheet, &mut violations);
        self.check_skill_count(sheet, &mut violations);
        self.check_skill_tiers(sheet, &mut violations);
        violations
    }

    fn check_branches(&self, sheet: &CharacterSheet, out: &mut Vec<Violation>) {
        if sheet.role == self.cfg.student_role && sheet.grade_class.is_none() {
            out.push(Violation::single(
                FieldKey::top(FieldId::GradeClass),
                "students must give a grade and class",
            ));
        }
        if sheet.role == self.cfg.teacher_role && sheet.subject.is_none() {
            out.push(Violation::single(
                FieldKey::top(FieldId::Subject),
                "teachers must give a subject",
            ));
        }
    }

    fn check_attribute_sum(&self, sheet: &CharacterSheet, out: &mut Vec<Violation>) {
        let Some(range) = self.cfg.attribute_sum.get(&sheet.race) else {
            out.push(Violation::single(
                FieldKey::top(FieldId::Race),
                format!("no attribute rules are configured for race '{}'", sheet.race),
            ));
            return;
        };
        let sum = sheet.attributes.summed();
        if sum < range.min || sum > range.max {
            out.push(Violation::new(
                FieldId::SUMMED_ATTRIBUTES
                    .iter()
                    .map(|&f| FieldKey::top(f))
                    .collect(),
                format!(
                    "attribute total is {sum}, but a {} must total between {} and {}",
                    sheet.race, range.min, range.max
                ),
            ));
        }
    }

    fn check_skill_count(&self, sheet: &CharacterSheet, out: &mut Vec<Violation>) {
        if sheet.skills.len() > self.cfg.max_skills {
            out.push(Violation::single(
                FieldKey::top(FieldId::Skills),
                format!(
                    "{} skills given, at most {} are allowed",
                    sheet.skills.len(),
                    self.cfg.max_skills
                ),
            ));
        }
    }

    fn check_skill_tiers(&self, sheet: &CharacterSheet, out: &mut Vec<Violation>) {
        for (i, skill) in sheet.skills.iter().enumerate() {
            let name = &skill.name;
            if let Some(tier) = self.tier_for(skill.power) {
                if skill.cooldown < tier.min_cooldown {
                    out.push(Violation::new(
                        vec![
                            FieldKey::entry(FieldId::SkillPower, i),
                            FieldKey::entry(FieldId::SkillCooldown, i),
                        ],
                        format!(
                            "'{name}' has power {} and needs a cooldown of at least {}",
                            skill.power, tier.min_cooldown
                        ),
                    ));
                }
                if skill.duration > tier.max_duration {
                    out.push(Violation::new(
                        vec![
                            FieldKey::entry(FieldId::SkillPower, i),
                            FieldKey::entry(FieldId::SkillDuration, i),
                        ],
                        format!(
                            "'{name}' has power {} and may last at most {} turns",
                            skill.power, tier.max_duration
                        ),
                    ));
                }
            }
            if skill.duration > self.cfg.max_duration {
                out.push(Violation::single(
                    FieldKey::entry(FieldId::SkillDuration, i),
                    format!(
                        "'{name}' lasts {} turns, no skill may last more than {}",
                        skill.duration, self.cfg.max_duration
                    ),
                ));
            }
        }
    }

    /// Highest tier whose power does not exceed `power`.
    fn tier_for(&self, power: u8) -> Option<&crate::config::PowerTier> {
        self.cfg
            .power_tiers
            .iter()
            .filter(|t| t.power <= power)
            .max_by_key(|t| t.power)
    }
}
