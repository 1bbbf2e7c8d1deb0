//! Reflector：对 ActionResult 做确定性评分
//!
//! 有序规则表，只取第一条命中的规则：
//! 失败载荷 → 0.0；非零退出码 → 0.3；有诊断输出 → 0.6；其余 → 1.0。

use crate::agent::{ActionResult, Reflection};

pub const SCORE_FAILURE: f64 = 0.0;
pub const SCORE_NONZERO_STATUS: f64 = 0.3;
pub const SCORE_WARNINGS: f64 = 0.6;
pub const SCORE_SUCCESS: f64 = 1.0;

/// 无状态、无副作用的评分器
#[derive(Debug, Default, Clone, Copy)]
pub struct Reflector;

impl Reflector {
    pub fn new() -> Self {
        Self
    }

    pub fn reflect(&self, result: &ActionResult) -> Reflection {
        if let ActionResult::Failure(failure) = result {
            return Reflection {
                score: SCORE_FAILURE,
                feedback: format!("Error: {}", failure.message),
                suggestions: vec!["Check the command and retry".to_string()],
            };
        }

        let status = result.status_code();
        if status != 0 {
            return Reflection {
                score: SCORE_NONZERO_STATUS,
                feedback: format!("Command failed with return code {}", status),
                suggestions: vec!["Review the error output and adjust the command".to_string()],
            };
        }

        let diagnostics = result.diagnostics().trim();
        if !diagnostics.is_empty() {
            return Reflection {
                score: SCORE_WARNINGS,
                feedback: format!("Command succeeded with warnings: {}", diagnostics),
                suggestions: vec!["Consider addressing the warnings".to_string()],
            };
        }

        Reflection {
            score: SCORE_SUCCESS,
            feedback: "Success".to_string(),
            suggestions: Vec::new(),
        }
    }
}
