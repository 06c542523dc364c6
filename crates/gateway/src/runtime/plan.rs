//! Plan state machine — tracks the to-do list written by `toDoWrite`
//! and advances it on tool outcomes.

use chrono::Utc;

use cairn_domain::plan::{Plan, SubTask, SubTaskStatus};

#[derive(Default)]
pub struct PlanMachine {
    plan: Plan,
}

impl PlanMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn has_plan(&self) -> bool {
        !self.plan.sub_tasks.is_empty() || !self.plan.goal.is_empty()
    }

    /// Install a fresh plan (from `toDoWrite`).
    ///
    /// Sub-tasks without ids get `t{n}`. Tasks with no required tools
    /// auto-complete; the first remaining pending task goes in-progress.
    pub fn initialize(&mut self, mut plan: Plan) {
        for (i, task) in plan.sub_tasks.iter_mut().enumerate() {
            if task.id.is_empty() {
                task.id = format!("t{}", i + 1);
            }
            if task.status != SubTaskStatus::Completed && task.tools_required.is_empty() {
                task.status = SubTaskStatus::Completed;
                task.completed_at = Some(Utc::now());
                task.result
                    .get_or_insert_with(|| "no tool required".to_string());
            }
        }
        if let Some(first_pending) = plan
            .sub_tasks
            .iter_mut()
            .find(|t| t.status == SubTaskStatus::Pending)
        {
            first_pending.status = SubTaskStatus::InProgress;
        }
        self.plan = plan;
    }

    /// The task currently being worked: first in-progress, else first
    /// pending, else first blocked.
    pub fn active_sub_task_id(&self) -> Option<&str> {
        for status in [
            SubTaskStatus::InProgress,
            SubTaskStatus::Pending,
            SubTaskStatus::Blocked,
        ] {
            if let Some(task) = self.plan.sub_tasks.iter().find(|t| t.status == status) {
                return Some(&task.id);
            }
        }
        None
    }

    fn active_index(&self) -> Option<usize> {
        let id = self.active_sub_task_id()?.to_string();
        self.plan.sub_tasks.iter().position(|t| t.id == id)
    }

    /// Advance the plan after a tool execution.
    ///
    /// Success completes the active task when the tool matches its
    /// requirements (or it requires none); failure blocks it in place.
    /// Completed tasks never revert.
    pub fn advance_after_tool(&mut self, tool_name: &str, success: bool, detail: &str) {
        let Some(idx) = self.active_index() else {
            return;
        };

        let task = &mut self.plan.sub_tasks[idx];
        if task.status == SubTaskStatus::Completed {
            return;
        }

        if !success {
            task.status = SubTaskStatus::Blocked;
            task.error = Some(detail.to_string());
            return;
        }

        let tool_matches = task.tools_required.is_empty()
            || task
                .tools_required
                .iter()
                .any(|t| t.eq_ignore_ascii_case(tool_name));
        if !tool_matches {
            return;
        }

        task.status = SubTaskStatus::Completed;
        task.completed_at = Some(Utc::now());
        task.result = Some(detail.to_string());

        // Select the next active task.
        if let Some(next) = self
            .plan
            .sub_tasks
            .iter_mut()
            .find(|t| t.status == SubTaskStatus::Pending)
        {
            next.status = SubTaskStatus::InProgress;
        }
    }

    /// True when every sub-task reached a terminal or stuck state and
    /// none is pending or in progress.
    pub fn all_settled(&self) -> bool {
        !self.plan.sub_tasks.is_empty()
            && self.plan.sub_tasks.iter().all(|t| {
                matches!(
                    t.status,
                    SubTaskStatus::Completed | SubTaskStatus::Failed | SubTaskStatus::Blocked
                )
            })
    }

    /// Count of in-progress tasks (invariant: never more than one).
    pub fn in_progress_count(&self) -> usize {
        self.plan
            .sub_tasks
            .iter()
            .filter(|t| t.status == SubTaskStatus::InProgress)
            .count()
    }
}

/// Build a plan from `toDoWrite` arguments.
pub fn plan_from_args(args: &serde_json::Value) -> Option<Plan> {
    let goal = args.get("goal")?.as_str()?.to_string();
    let sub_tasks = args
        .get("subTasks")
        .and_then(|v| v.as_array())
        .map(|tasks| {
            tasks
                .iter()
                .enumerate()
                .filter_map(|(i, t)| {
                    let description = t.get("description")?.as_str()?.to_string();
                    let tools_required = t
                        .get("toolsRequired")
                        .and_then(|v| v.as_array())
                        .map(|a| {
                            a.iter()
                                .filter_map(|s| s.as_str().map(String::from))
                                .collect()
                        })
                        .unwrap_or_default();
                    Some(SubTask {
                        id: t
                            .get("id")
                            .and_then(|v| v.as_str())
                            .map(String::from)
                            .unwrap_or_else(|| format!("t{}", i + 1)),
                        description,
                        status: SubTaskStatus::Pending,
                        tools_required,
                        result: None,
                        error: None,
                        completed_at: None,
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    Some(Plan { goal, sub_tasks })
}
