pub mod cache;
pub mod classifier;
pub mod grant;
pub mod prompt;
pub mod queue;
pub mod service;
pub mod task;
pub mod verdict;
pub mod worker;

pub use cache::{ResultCache, ReviewResult};
pub use classifier::{Classifier, ClassifierError, OpenAiClassifier};
pub use grant::{grant_roles, GrantReport};
pub use queue::{EnqueueOutcome, TaskQueue};
pub use service::{ReviewService, SubmitError, SubmitOutcome};
pub use task::{Origin, ReviewTask, TaskKind, TaskStatus};
pub use verdict::{parse_verdict, Verdict};
pub use worker::ReviewWorker;
