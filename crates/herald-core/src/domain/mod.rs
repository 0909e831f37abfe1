//! Domain model (IDs, tasks, rules, templates, events, schedules, errors).
//!
//! Pure data and state-machine logic; nothing here touches the store, the
//! queue or the clock.

pub mod errors;
pub mod event;
pub mod ids;
pub mod outcome;
pub mod priority;
pub mod rule;
pub mod schedule;
pub mod status;
pub mod task;
pub mod template;

pub use errors::{ErrorKind, HeraldError, Result};
pub use event::{ActionItem, ClassifiedEvent, FOLLOW_UP};
pub use ids::{RuleId, TaskId, TemplateId};
pub use outcome::{OutcomeKind, TaskResult};
pub use priority::Priority;
pub use rule::{AutomationRule, NewRule, RuleConditions, Trigger};
pub use schedule::CronSchedule;
pub use status::TaskStatus;
pub use task::{NewTask, Payload, Task, TaskType, TaskUpdate};
pub use template::{NewTemplate, Template, Variables, render};
