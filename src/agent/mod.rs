//! 反馈循环：Planner（规划）→ Executor（执行）→ Reflector（评分）→ ControlLoop（编排）

pub mod executor;
pub mod loop_;
pub mod planner;
pub mod reflector;
pub mod step_plan;
pub mod types;

pub use executor::Executor;
pub use loop_::{ControlLoop, LoopConfig, RunReport, StopReason};
pub use planner::{parse_plan, Planner, PlanningContext, SYSTEM_PROMPT};
pub use reflector::Reflector;
pub use step_plan::{ShellKind, StepAction, StepPlan, FALLBACK_COMMAND, FALLBACK_DESCRIPTION};
pub use types::{ActionFailure, ActionOutput, ActionResult, Reflection, Step};
