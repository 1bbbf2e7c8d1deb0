//! 反馈主循环
//!
//! Plan -> Execute -> Reflect -> 记录，逐轮严格串行。单步得分达到阈值即提前结束；
//! 否则跑满 max_iterations。可选的停滞检测：连续 N 步计划相同且都未达标时提前结束。
//! 每步组装完成后写入历史库，写入失败只记日志。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::agent::{Executor, Planner, PlanningContext, Reflector, Step};
use crate::config::AgentSection;
use crate::memory::StepStore;

/// 循环参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopConfig {
    pub success_threshold: f64,
    /// 0 表示关闭停滞检测
    pub stagnation_window: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            success_threshold: 0.9,
            stagnation_window: 0,
        }
    }
}

impl From<&AgentSection> for LoopConfig {
    fn from(section: &AgentSection) -> Self {
        Self {
            success_threshold: section.success_threshold,
            stagnation_window: section.stagnation_window,
        }
    }
}

/// 循环结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    GoalReached,
    MaxIterations,
    Stagnated,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub history: Vec<Step>,
    pub stop: StopReason,
}

impl RunReport {
    pub fn final_score(&self) -> Option<f64> {
        self.history.last().map(|s| s.score)
    }

    pub fn successful_steps(&self, threshold: f64) -> usize {
        self.history.iter().filter(|s| s.score >= threshold).count()
    }
}

pub struct ControlLoop {
    planner: Planner,
    executor: Executor,
    reflector: Reflector,
    store: Option<Arc<dyn StepStore>>,
    config: LoopConfig,
    cancel: CancellationToken,
}

impl ControlLoop {
    pub fn new(planner: Planner, executor: Executor) -> Self {
        Self {
            planner,
            executor,
            reflector: Reflector::new(),
            store: None,
            config: LoopConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn StepStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    /// 运行循环，返回完整历史
    pub async fn run(&self, goal: &str, max_iterations: usize) -> Vec<Step> {
        self.run_report(goal, max_iterations).await.history
    }

    pub async fn run_report(&self, goal: &str, max_iterations: usize) -> RunReport {
        let mut history: Vec<Step> = Vec::new();
        let mut stop = StopReason::MaxIterations;

        for iteration in 1..=max_iterations {
            if self.cancel.is_cancelled() {
                tracing::info!(iteration, "loop cancelled");
                stop = StopReason::Cancelled;
                break;
            }
            tracing::info!(iteration, max_iterations, "iteration start");

            let repo_state = self.executor.repo_state().await;
            let tools = self
                .executor
                .router()
                .map(|r| r.list_tools())
                .unwrap_or_default();
            let ctx = PlanningContext {
                goal,
                history: &history,
                tools: &tools,
                repo_state: repo_state.as_deref(),
            };

            let plan = self.planner.plan(ctx).await;
            tracing::info!(iteration, kind = plan.kind(), description = %plan.description, "plan");

            let result = self.executor.execute(&plan).await;
            let reflection = self.reflector.reflect(&result);
            tracing::info!(
                iteration,
                score = reflection.score,
                feedback = %reflection.feedback,
                "reflection"
            );

            let step = Step::new(iteration, plan, result, reflection);
            if let Some(store) = &self.store {
                if let Err(e) = store.add_step(&step) {
                    tracing::warn!(iteration, "failed to persist step: {}", e);
                }
            }
            let score = step.score;
            history.push(step);

            if score >= self.config.success_threshold {
                tracing::info!(iteration, score, "goal achieved");
                stop = StopReason::GoalReached;
                break;
            }
            if self.is_stagnant(&history) {
                tracing::warn!(
                    iteration,
                    window = self.config.stagnation_window,
                    "same plan keeps failing, stopping early"
                );
                stop = StopReason::Stagnated;
                break;
            }
        }

        RunReport { history, stop }
    }

    fn is_stagnant(&self, history: &[Step]) -> bool {
        let window = self.config.stagnation_window;
        if window == 0 || history.len() < window {
            return false;
        }
        let recent = &history[history.len() - window..];
        let first = &recent[0].plan;
        recent
            .iter()
            .all(|s| s.plan == *first && s.score < self.config.success_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolsSection;
    use crate::llm::ScriptedLlmClient;
    use crate::memory::{InMemoryStepStore, StoreError};

    fn control_loop(dir: &std::path::Path, replies: Vec<&str>) -> (ControlLoop, Arc<ScriptedLlmClient>) {
        let llm = Arc::new(ScriptedLlmClient::new(replies));
        let planner = Planner::new(llm.clone());
        let executor = Executor::new(dir, &ToolsSection::default());
        (ControlLoop::new(planner, executor), llm)
    }

    const MISSING_TOOL: &str = r#"{"action": "tool", "tool_name": "z", "description": "call z"}"#;

    #[tokio::test]
    async fn test_runs_to_max_iterations_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (looper, llm) = control_loop(dir.path(), vec![MISSING_TOOL]);
        let report = looper.run_report("use z", 3).await;
        assert_eq!(report.stop, StopReason::MaxIterations);
        assert_eq!(report.history.len(), 3);
        assert_eq!(llm.calls(), 3);
        assert_eq!(
            report.history.iter().map(|s| s.iteration).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(report.history.iter().all(|s| s.score == 0.0));

        // 第二轮的 prompt 带上第一轮的结果
        let second_prompt = &llm.prompts()[1][1].content;
        assert!(second_prompt.contains("- call z: Error: Tool not found"));
    }

    #[tokio::test]
    async fn test_stops_on_success_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let (looper, _) = control_loop(
            dir.path(),
            vec![
                MISSING_TOOL,
                r#"{"action": "write_file", "file_path": "hello.txt", "content": "hi", "description": "write"}"#,
            ],
        );
        let store = Arc::new(InMemoryStepStore::new());
        let looper = looper.with_store(store.clone());
        let history = looper.run("write hello", 10).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].score, 1.0);
        assert_eq!(store.len(), 2);
        assert!(dir.path().join("hello.txt").exists());
    }

    #[tokio::test]
    async fn test_stagnation_cutoff() {
        let dir = tempfile::tempdir().unwrap();
        let (looper, _) = control_loop(dir.path(), vec![MISSING_TOOL]);
        let looper = looper.with_config(LoopConfig {
            success_threshold: 0.9,
            stagnation_window: 2,
        });
        let report = looper.run_report("use z", 10).await;
        assert_eq!(report.stop, StopReason::Stagnated);
        assert_eq!(report.history.len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let (looper, llm) = control_loop(dir.path(), vec![MISSING_TOOL]);
        let token = CancellationToken::new();
        token.cancel();
        let report = looper.with_cancel_token(token).run_report("g", 5).await;
        assert_eq!(report.stop, StopReason::Cancelled);
        assert!(report.history.is_empty());
        assert_eq!(llm.calls(), 0);
    }

    struct BrokenStore;

    impl StepStore for BrokenStore {
        fn add_step(&self, _step: &Step) -> Result<(), StoreError> {
            Err(StoreError::Poisoned)
        }

        fn get_history(&self, _limit: usize) -> Result<Vec<Step>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_persistence_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (looper, _) = control_loop(dir.path(), vec![MISSING_TOOL]);
        let history = looper.with_store(Arc::new(BrokenStore)).run("g", 2).await;
        assert_eq!(history.len(), 2);
    }
}
