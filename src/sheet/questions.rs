//! The admission-sheet question flow and the validator attached to each field.

use crate::config::{InterviewConfig, SheetConfig};
use crate::interview::flow::{Condition, Flow, Input, Question, RepeatGroup, Step};

use super::fields::{grade_class_validator, Denylist, FieldId, Validator};
use super::record::NO_RELATIONSHIPS;

const AGE_RANGE: (i64, i64) = (10, 100);
const ATTRIBUTE_RANGE: (i64, i64) = (1, 6);
const LUCK_RANGE: (i64, i64) = (1, 4);
const POWER_RANGE: (i64, i64) = (1, 5);
const COOLDOWN_RANGE: (i64, i64) = (0, 10);
const DURATION_RANGE: (i64, i64) = (1, 10);

const NAME_MAX_LEN: usize = 40;
const GENDER_MAX_LEN: usize = 20;
const SUBJECT_MAX_LEN: usize = 30;
const SKILL_NAME_MAX_LEN: usize = 30;

fn range((min, max): (i64, i64)) -> Validator {
    Validator::IntRange { min, max }
}

/// The single validator for `field`.
pub fn validator_for(field: FieldId, cfg: &SheetConfig) -> Validator {
    match field {
        FieldId::Name => Validator::Clean {
            max_len: NAME_MAX_LEN,
        },
        FieldId::Age => range(AGE_RANGE),
        FieldId::Gender => Validator::Clean {
            max_len: GENDER_MAX_LEN,
        },
        FieldId::Race => Validator::OneOf(cfg.races.clone()),
        FieldId::Role => Validator::OneOf(cfg.roles.clone()),
        FieldId::GradeClass => grade_class_validator(),
        FieldId::Subject => Validator::Clean {
            max_len: SUBJECT_MAX_LEN,
        },
        FieldId::Strength
        | FieldId::Agility
        | FieldId::Endurance
        | FieldId::Intellect
        | FieldId::Willpower => range(ATTRIBUTE_RANGE),
        FieldId::Luck => range(LUCK_RANGE),
        FieldId::Appearance => Validator::MinLength(cfg.min_lengths.appearance),
        FieldId::Personality => Validator::MinLength(cfg.min_lengths.personality),
        FieldId::Background => Validator::MinLength(cfg.min_lengths.background),
        FieldId::Relationships | FieldId::Skills => Validator::Any,
        FieldId::SkillName => Validator::UniqueInGroup {
            max_len: SKILL_NAME_MAX_LEN,
        },
        FieldId::SkillPower => range(POWER_RANGE),
        FieldId::SkillCooldown => range(COOLDOWN_RANGE),
        FieldId::SkillDuration => range(DURATION_RANGE),
        FieldId::SkillDescription => Validator::MinLength(cfg.min_lengths.skill_description),
    }
}

fn text(field: FieldId, prompt: &str, cfg: &SheetConfig) -> Question {
    Question::new(field, prompt, Input::Text(validator_for(field, cfg)))
}

fn number(field: FieldId, prompt: &str, (min, max): (i64, i64), cfg: &SheetConfig) -> Question {
    text(field, &format!("{prompt} ({min}-{max})"), cfg)
        .error(format!("Please enter a whole number from {min} to {max}."))
}

/// Build the character admission flow.
pub fn character_flow(cfg: &SheetConfig, interview: &InterviewConfig) -> Flow {
    let attribute = |field: FieldId, hint: &str| {
        number(
            field,
            &format!("**{}**: {hint}", field.label()),
            ATTRIBUTE_RANGE,
            cfg,
        )
    };

    let steps = vec![
        Step::Ask(text(FieldId::Name, "What is your character's **name**?", cfg)),
        Step::Ask(number(FieldId::Age, "How **old** is your character?", AGE_RANGE, cfg)),
        Step::Ask(text(FieldId::Gender, "What is your character's **gender**?", cfg)),
        Step::Ask(
            Question::new(
                FieldId::Race,
                "Choose your character's **race**.",
                Input::Options(cfg.races.clone()),
            )
            .error("Please pick one of the listed races exactly as written."),
        ),
        Step::Ask(
            Question::new(
                FieldId::Role,
                "Is your character a student or a teacher?",
                Input::Options(cfg.roles.clone()),
            )
            .error("Please pick one of the listed roles exactly as written."),
        ),
        Step::Ask(
            text(
                FieldId::GradeClass,
                "Which **grade and class**? (e.g. `2-3` or `2학년 3반`)",
                cfg,
            )
            .when(Condition::Equals(FieldId::Role, cfg.student_role.clone()))
            .error("Grade and class were not recognized."),
        ),
        Step::Ask(
            text(FieldId::Subject, "Which **subject** do you teach?", cfg)
                .when(Condition::Equals(FieldId::Role, cfg.teacher_role.clone())),
        ),
        Step::Ask(attribute(FieldId::Strength, "physical power")),
        Step::Ask(attribute(FieldId::Agility, "speed and reflexes")),
        Step::Ask(attribute(FieldId::Endurance, "stamina and toughness")),
        Step::Ask(attribute(FieldId::Intellect, "knowledge and reasoning")),
        Step::Ask(attribute(FieldId::Willpower, "mental resilience")),
        Step::Ask(number(FieldId::Luck, "How **lucky** is your character?", LUCK_RANGE, cfg)),
        Step::Ask(
            Question::new(
                FieldId::Appearance,
                format!(
                    "Describe your character's **appearance** (at least {} characters), or upload an image.",
                    cfg.min_lengths.appearance
                ),
                Input::TextOrAttachment(validator_for(FieldId::Appearance, cfg)),
            )
            .error("Appearance needs a longer description or an image."),
        ),
        Step::Ask(
            text(
                FieldId::Personality,
                &format!(
                    "Describe your character's **personality** (at least {} characters).",
                    cfg.min_lengths.personality
                ),
                cfg,
            )
            .error("Personality description is too short."),
        ),
        Step::Ask(
            text(
                FieldId::Background,
                &format!(
                    "Tell us your character's **background** (at least {} characters).",
                    cfg.min_lengths.background
                ),
                cfg,
            )
            .error("Background story is too short."),
        ),
        Step::Ask(
            text(
                FieldId::Relationships,
                "Any **relationships** with other characters? Type `-` to skip.",
                cfg,
            )
            .default_value(NO_RELATIONSHIPS),
        ),
        Step::Repeat(RepeatGroup {
            group: FieldId::Skills,
            prompt: format!(
                "Add a **skill**? (yes/no, up to {} skills)",
                cfg.max_skills
            ),
            max: cfg.max_skills,
            questions: vec![
                text(FieldId::SkillName, "Skill **name**?", cfg)
                    .error("Skill names must be unique, clean and short."),
                number(FieldId::SkillPower, "Skill **power**", POWER_RANGE, cfg),
                number(
                    FieldId::SkillCooldown,
                    "Skill **cooldown** in turns",
                    COOLDOWN_RANGE,
                    cfg,
                ),
                number(
                    FieldId::SkillDuration,
                    "Skill **duration** in turns",
                    DURATION_RANGE,
                    cfg,
                ),
                text(
                    FieldId::SkillDescription,
                    &format!(
                        "Describe the skill (at least {} characters).",
                        cfg.min_lengths.skill_description
                    ),
                    cfg,
                )
                .error("Skill description is too short."),
            ],
        }),
    ];

    Flow {
        steps,
        affirmative: interview.affirmative.clone(),
        negative: interview.negative.clone(),
        denylist: Denylist::new(&cfg.banned_words),
    }
}
