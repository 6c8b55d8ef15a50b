pub mod flow;
pub mod machine;
pub mod session;

pub use flow::{Condition, Flow, Input, Question, RepeatGroup, Step};
pub use machine::{Interview, Outcome, Prompt};
pub use session::{
    collect_sheet, run_interview, InterviewEnd, SessionHandle, SessionRegistry, SessionSettings,
};
