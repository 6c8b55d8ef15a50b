//! Entry point for submissions, re-reviews and follow-up questions.
//!
//! Everything that ends up on the queue passes through here: local rule
//! checks first, then the result cache, single-flight per fingerprint and
//! finally the submitter's cooldown. Quota is only charged for requests
//! that actually reach the queue.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::cache::{ResultCache, ReviewResult};
use super::prompt::{follow_up_prompt, review_prompt};
use super::queue::{EnqueueOutcome, TaskQueue};
use super::task::{NewTask, Origin, ReviewTask, TaskKind, TaskStatus};
use crate::characters::{CharacterStore, StoredCharacter};
use crate::config::{GuildDirectory, SheetConfig};
use crate::cooldown::{CooldownDecision, CooldownTracker};
use crate::sheet::record::fingerprint_text;
use crate::sheet::{self, Answers, CharacterSheet, Violation};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Local checks failed; nothing was queued.
    Rejected(Vec<Violation>),
    /// The submitter is over their cooldown or daily limit.
    CoolingDown(CooldownDecision),
    /// Identical content was reviewed before.
    Cached(ReviewResult),
    /// A task for identical content is already queued or running.
    InFlight(ReviewTask),
    Enqueued(ReviewTask),
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("a review of this sheet is already {status} (task {task_id})")]
    InFlight { task_id: String, status: TaskStatus },
    #[error("no character named `{0}`")]
    UnknownCharacter(String),
    #[error("no earlier review to reply to for {0}")]
    NoReplyChannel(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub struct ReviewService {
    sheet: SheetConfig,
    guilds: GuildDirectory,
    queue: Arc<TaskQueue>,
    cache: Arc<ResultCache>,
    cooldown: CooldownTracker,
    characters: Arc<CharacterStore>,
}

impl ReviewService {
    pub fn new(
        sheet: SheetConfig,
        guilds: GuildDirectory,
        queue: Arc<TaskQueue>,
        cache: Arc<ResultCache>,
        cooldown: CooldownTracker,
        characters: Arc<CharacterStore>,
    ) -> Self {
        Self {
            sheet,
            guilds,
            queue,
            cache,
            cooldown,
            characters,
        }
    }

    pub fn sheet_config(&self) -> &SheetConfig {
        &self.sheet
    }

    pub fn characters(&self) -> &CharacterStore {
        &self.characters
    }

    pub fn cached(&self, fingerprint: &str) -> anyhow::Result<Option<ReviewResult>> {
        self.cache.get(fingerprint)
    }

    /// Check a finished interview and queue it for review if needed.
    pub fn submit(
        &self,
        submitter_id: &str,
        origin: Origin,
        answers: &Answers,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome, SubmitError> {
        let sheet = match sheet::check(answers, &self.sheet) {
            Ok(sheet) => sheet,
            Err(violations) => {
                tracing::info!(
                    submitter = submitter_id,
                    violations = violations.len(),
                    "Submission failed local checks"
                );
                return Ok(SubmitOutcome::Rejected(violations));
            }
        };

        let stored = self
            .characters
            .save(submitter_id, origin.guild_id.as_deref(), &sheet)?;
        let fingerprint = stored.fingerprint;

        if let Some(result) = self.cache.get(&fingerprint)? {
            tracing::info!(fingerprint = %fingerprint, pass = result.pass, "Serving cached verdict");
            return Ok(SubmitOutcome::Cached(result));
        }
        if let Some(task) = self.queue.in_flight(&fingerprint)? {
            return Ok(SubmitOutcome::InFlight(task));
        }

        let decision = self.cooldown.check_and_record(submitter_id, now)?;
        if !decision.is_allowed() {
            return Ok(SubmitOutcome::CoolingDown(decision));
        }

        let new = self.review_task(&sheet, fingerprint, submitter_id, origin, TaskKind::Initial);
        Ok(enqueued(self.queue.enqueue(new)?))
    }

    /// Re-review one of the submitter's stored characters, charging their
    /// cooldown.
    pub fn recheck_by_name(
        &self,
        submitter_id: &str,
        name: &str,
        origin: Origin,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome, SubmitError> {
        let character = self
            .characters
            .find(submitter_id, name)?
            .ok_or_else(|| SubmitError::UnknownCharacter(name.trim().to_string()))?;
        self.refuse_in_flight(&character.fingerprint)?;

        let decision = self.cooldown.check_and_record(submitter_id, now)?;
        if !decision.is_allowed() {
            return Ok(SubmitOutcome::CoolingDown(decision));
        }
        Ok(enqueued(self.requeue(&character, origin)?))
    }

    /// Operator re-review by fingerprint. Replies go to `origin`, or to
    /// wherever the last review of this content was answered.
    pub fn force_recheck(
        &self,
        fingerprint: &str,
        origin: Option<Origin>,
    ) -> Result<ReviewTask, SubmitError> {
        self.refuse_in_flight(fingerprint)?;
        let character = self
            .characters
            .find_by_fingerprint(fingerprint)?
            .ok_or_else(|| SubmitError::UnknownCharacter(fingerprint.to_string()))?;
        let origin = match origin {
            Some(origin) => origin,
            None => self
                .queue
                .latest_for(fingerprint)?
                .map(|t| t.origin)
                .ok_or_else(|| SubmitError::NoReplyChannel(fingerprint.to_string()))?,
        };

        match self.requeue(&character, origin)? {
            EnqueueOutcome::Created(task) => Ok(task),
            EnqueueOutcome::InFlight(task) => Err(SubmitError::InFlight {
                task_id: task.task_id,
                status: task.status,
            }),
        }
    }

    /// Queue a free-form question, optionally about one of the asker's
    /// characters.
    pub fn ask(
        &self,
        submitter_id: &str,
        origin: Origin,
        question: &str,
        character: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome, SubmitError> {
        let context = match character {
            Some(name) => Some(
                self.characters
                    .find(submitter_id, name)?
                    .ok_or_else(|| SubmitError::UnknownCharacter(name.trim().to_string()))?,
            ),
            None => None,
        };

        let fingerprint = fingerprint_text(&format!("follow-up\n{submitter_id}\n{}", question.trim()));
        if let Some(task) = self.queue.in_flight(&fingerprint)? {
            return Ok(SubmitOutcome::InFlight(task));
        }
        let decision = self.cooldown.check_and_record(submitter_id, now)?;
        if !decision.is_allowed() {
            return Ok(SubmitOutcome::CoolingDown(decision));
        }

        let new = NewTask {
            fingerprint,
            submitter_id: submitter_id.to_string(),
            origin,
            kind: TaskKind::FollowUp,
            category: String::new(),
            prompt: follow_up_prompt(question, context.as_ref().map(|c| &c.sheet)),
        };
        Ok(enqueued(self.queue.enqueue(new)?))
    }

    fn refuse_in_flight(&self, fingerprint: &str) -> Result<(), SubmitError> {
        match self.queue.in_flight(fingerprint)? {
            Some(task) => Err(SubmitError::InFlight {
                task_id: task.task_id,
                status: task.status,
            }),
            None => Ok(()),
        }
    }

    fn requeue(&self, character: &StoredCharacter, origin: Origin) -> anyhow::Result<EnqueueOutcome> {
        if self.cache.invalidate(&character.fingerprint)? {
            tracing::info!(fingerprint = %character.fingerprint, "Dropped cached verdict for re-review");
        }
        let new = self.review_task(
            &character.sheet,
            character.fingerprint.clone(),
            &character.submitter_id,
            origin,
            TaskKind::ReReview,
        );
        self.queue.enqueue(new)
    }

    fn review_task(
        &self,
        sheet: &CharacterSheet,
        fingerprint: String,
        submitter_id: &str,
        origin: Origin,
        kind: TaskKind,
    ) -> NewTask {
        let settings = self.guilds.get(origin.guild_id.as_deref());
        NewTask {
            prompt: review_prompt(sheet, settings),
            fingerprint,
            submitter_id: submitter_id.to_string(),
            origin,
            kind,
            category: sheet.race.clone(),
        }
    }
}

fn enqueued(outcome: EnqueueOutcome) -> SubmitOutcome {
    match outcome {
        EnqueueOutcome::Created(task) => SubmitOutcome::Enqueued(task),
        EnqueueOutcome::InFlight(task) => SubmitOutcome::InFlight(task),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{CooldownConfig, GuildSettings};
    use crate::sheet::record::tests::sample_sheet;
    use crate::sheet::{FieldId, FieldKey};
    use crate::store::Database;
    use chrono::Duration;
    use std::collections::HashMap;

    pub(crate) struct Harness {
        pub service: Arc<ReviewService>,
        pub queue: Arc<TaskQueue>,
        pub cache: Arc<ResultCache>,
        pub db: Arc<Database>,
    }

    pub(crate) fn harness_with(cooldown: CooldownConfig) -> Harness {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let queue = Arc::new(TaskQueue::new(db.clone()));
        let cache = Arc::new(ResultCache::new(db.clone()));
        let service = Arc::new(ReviewService::new(
            SheetConfig::default(),
            GuildDirectory::new(GuildSettings::default(), HashMap::new()),
            queue.clone(),
            cache.clone(),
            CooldownTracker::new(db.clone(), &cooldown),
            Arc::new(CharacterStore::new(db.clone())),
        ));
        Harness {
            service,
            queue,
            cache,
            db,
        }
    }

    pub(crate) fn harness() -> Harness {
        harness_with(CooldownConfig {
            min_interval_secs: 0,
            daily_limit: 100,
        })
    }

    pub(crate) fn origin() -> Origin {
        Origin {
            guild_id: Some("g1".into()),
            channel_id: "c1".into(),
            thread_id: None,
        }
    }

    fn enqueued_task(outcome: SubmitOutcome) -> ReviewTask {
        match outcome {
            SubmitOutcome::Enqueued(t) => t,
            other => panic!("expected a new task, got {other:?}"),
        }
    }

    #[test]
    fn valid_sheet_is_enqueued_with_race_category() {
        let h = harness();
        let task = enqueued_task(
            h.service
                .submit("u1", origin(), &sample_sheet().to_answers(), Utc::now())
                .unwrap(),
        );
        assert_eq!(task.kind, TaskKind::Initial);
        assert_eq!(task.category, "Human");
        assert_eq!(task.fingerprint, sample_sheet().fingerprint());
        assert!(task.prompt.ends_with(&sample_sheet().canonical_text()));
        assert!(h.service.characters().find("u1", "Hana Seo").unwrap().is_some());
    }

    #[test]
    fn rule_violations_never_reach_the_queue() {
        let h = harness();
        let mut sheet = sample_sheet();
        sheet.attributes.strength = 6;
        sheet.attributes.agility = 6;
        sheet.attributes.endurance = 6;
        sheet.attributes.intellect = 6;
        sheet.attributes.willpower = 6;
        let outcome = h
            .service
            .submit("u1", origin(), &sheet.to_answers(), Utc::now())
            .unwrap();
        let SubmitOutcome::Rejected(violations) = outcome else {
            panic!("expected a rejection");
        };
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].fields.len(), 5);
        assert!(violations[0].fields.contains(&FieldKey::top(FieldId::Willpower)));
        assert_eq!(h.queue.pending_count().unwrap(), 0);
    }

    #[test]
    fn cached_content_short_circuits_without_charging_cooldown() {
        let h = harness_with(CooldownConfig {
            min_interval_secs: 3600,
            daily_limit: 1,
        });
        let fp = sample_sheet().fingerprint();
        h.cache
            .put(&ReviewResult::passed(&fp, "Student", "fine"))
            .unwrap();

        for _ in 0..3 {
            let outcome = h
                .service
                .submit("u1", origin(), &sample_sheet().to_answers(), Utc::now())
                .unwrap();
            assert!(matches!(outcome, SubmitOutcome::Cached(ref r) if r.pass));
        }
        assert_eq!(h.queue.pending_count().unwrap(), 0);
    }

    #[test]
    fn duplicate_submission_reports_in_flight_task() {
        let h = harness();
        let first = enqueued_task(
            h.service
                .submit("u1", origin(), &sample_sheet().to_answers(), Utc::now())
                .unwrap(),
        );
        let second = h
            .service
            .submit("u2", origin(), &sample_sheet().to_answers(), Utc::now())
            .unwrap();
        assert!(matches!(second, SubmitOutcome::InFlight(ref t) if t.task_id == first.task_id));
        assert_eq!(h.queue.pending_count().unwrap(), 1);
    }

    #[test]
    fn cooldown_applies_to_new_work() {
        let h = harness_with(CooldownConfig {
            min_interval_secs: 60,
            daily_limit: 10,
        });
        let now = Utc::now();
        enqueued_task(
            h.service
                .submit("u1", origin(), &sample_sheet().to_answers(), now)
                .unwrap(),
        );
        let mut other = sample_sheet();
        other.name = "Jun".into();
        let outcome = h
            .service
            .submit("u1", origin(), &other.to_answers(), now + Duration::seconds(5))
            .unwrap();
        assert!(matches!(
            outcome,
            SubmitOutcome::CoolingDown(CooldownDecision::TooSoon { .. })
        ));
    }

    #[test]
    fn recheck_invalidates_cache_and_is_refused_while_in_flight() {
        let h = harness();
        let task = enqueued_task(
            h.service
                .submit("u1", origin(), &sample_sheet().to_answers(), Utc::now())
                .unwrap(),
        );
        let err = h
            .service
            .recheck_by_name("u1", "hana seo", origin(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, SubmitError::InFlight { .. }));

        h.queue.claim_next().unwrap();
        h.queue.complete(&task.task_id, "done").unwrap();
        h.cache
            .put(&ReviewResult::failed(&task.fingerprint, "too strong"))
            .unwrap();

        let again = enqueued_task(
            h.service
                .recheck_by_name("u1", "Hana Seo", origin(), Utc::now())
                .unwrap(),
        );
        assert_eq!(again.kind, TaskKind::ReReview);
        assert!(h.cache.get(&task.fingerprint).unwrap().is_none());
    }

    #[test]
    fn force_recheck_reuses_last_origin() {
        let h = harness();
        let thread_origin = Origin {
            thread_id: Some("t1".into()),
            ..origin()
        };
        let task = enqueued_task(
            h.service
                .submit("u1", thread_origin.clone(), &sample_sheet().to_answers(), Utc::now())
                .unwrap(),
        );
        h.queue.claim_next().unwrap();
        h.queue.fail(&task.task_id, "malformed").unwrap();

        let again = h.service.force_recheck(&task.fingerprint, None).unwrap();
        assert_eq!(again.origin, thread_origin);
        assert_eq!(again.submitter_id, "u1");

        assert!(matches!(
            h.service.force_recheck("unknown", None),
            Err(SubmitError::InFlight { .. } | SubmitError::UnknownCharacter(_))
        ));
    }

    #[test]
    fn ask_enqueues_follow_up_about_a_character() {
        let h = harness();
        h.service
            .characters()
            .save("u1", Some("g1"), &sample_sheet())
            .unwrap();
        let task = enqueued_task(
            h.service
                .ask("u1", origin(), "Is my skill fine?", Some("Hana Seo"), Utc::now())
                .unwrap(),
        );
        assert_eq!(task.kind, TaskKind::FollowUp);
        assert!(task.prompt.contains("Name: Hana Seo"));

        let err = h
            .service
            .ask("u1", origin(), "?", Some("Nobody"), Utc::now())
            .unwrap_err();
        assert!(matches!(err, SubmitError::UnknownCharacter(ref n) if n == "Nobody"));
    }
}
