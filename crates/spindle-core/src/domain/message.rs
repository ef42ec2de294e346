//! Queue messages: an execution reference plus the control action to apply.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::execution::{Execution, StageId};
use super::ids::MessageId;

/// The control action a message asks a consumer to perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageAction {
    StartExecution,
    RescheduleExecution,
    RestartStage {
        stage_id: StageId,
    },
    ResumeExecution,
    CancelExecution {
        user: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl MessageAction {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageAction::StartExecution => MessageKind::StartExecution,
            MessageAction::RescheduleExecution => MessageKind::RescheduleExecution,
            MessageAction::RestartStage { .. } => MessageKind::RestartStage,
            MessageAction::ResumeExecution => MessageKind::ResumeExecution,
            MessageAction::CancelExecution { .. } => MessageKind::CancelExecution,
        }
    }
}

/// Payload-free discriminant of [`MessageAction`], used to route messages to
/// handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    StartExecution,
    RescheduleExecution,
    RestartStage,
    ResumeExecution,
    CancelExecution,
}

impl MessageKind {
    pub const ALL: [MessageKind; 5] = [
        MessageKind::StartExecution,
        MessageKind::RescheduleExecution,
        MessageKind::RestartStage,
        MessageKind::ResumeExecution,
        MessageKind::CancelExecution,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::StartExecution => "start_execution",
            MessageKind::RescheduleExecution => "reschedule_execution",
            MessageKind::RestartStage => "restart_stage",
            MessageKind::ResumeExecution => "resume_execution",
            MessageKind::CancelExecution => "cancel_execution",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content-derived identity of a message.
///
/// Two messages with the same identity are the same unit of work as far as
/// the queue is concerned: `ensure` deduplicates on it and at most one lease
/// per identity can be outstanding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageIdentity(String);

impl MessageIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A unit of work on the queue.
///
/// Producers build messages with the constructors below. The queue owns the
/// attempt counter: a delivered copy reports how many times it has been
/// handed to a consumer, starting at 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    execution: Execution,
    action: MessageAction,
    #[serde(default)]
    attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_attempts: Option<u32>,
}

impl Message {
    pub fn new(execution: Execution, action: MessageAction) -> Self {
        Self {
            id: MessageId::generate(),
            execution,
            action,
            attempts: 0,
            max_attempts: None,
        }
    }

    pub fn start(execution: Execution) -> Self {
        Self::new(execution, MessageAction::StartExecution)
    }

    pub fn reschedule(execution: Execution) -> Self {
        Self::new(execution, MessageAction::RescheduleExecution)
    }

    pub fn restart(execution: Execution, stage_id: StageId) -> Self {
        Self::new(execution, MessageAction::RestartStage { stage_id })
    }

    pub fn resume(execution: Execution) -> Self {
        Self::new(execution, MessageAction::ResumeExecution)
    }

    pub fn cancel(execution: Execution, user: impl Into<String>, reason: Option<String>) -> Self {
        Self::new(
            execution,
            MessageAction::CancelExecution {
                user: user.into(),
                reason,
            },
        )
    }

    /// Override the queue-wide attempt budget for this message. A budget of
    /// zero is raised to one delivery.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn execution(&self) -> &Execution {
        &self.execution
    }

    pub fn action(&self) -> &MessageAction {
        &self.action
    }

    pub fn kind(&self) -> MessageKind {
        self.action.kind()
    }

    /// Delivery count of this copy (0 until the queue hands it out).
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Build the dedup/lease key: kind, execution and (for stage-scoped
    /// actions) the stage. Cancel user and reason are not part of it.
    pub fn identity(&self) -> MessageIdentity {
        let mut key = format!(
            "{}:{}:{}",
            self.kind(),
            self.execution.execution_type,
            self.execution.id.as_ulid()
        );
        if let MessageAction::RestartStage { stage_id } = &self.action {
            key.push(':');
            key.push_str(stage_id.as_str());
        }
        MessageIdentity(key)
    }

    pub(crate) fn delivered(&self, attempts: u32) -> Self {
        let mut copy = self.clone();
        copy.attempts = attempts;
        copy
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind(), self.execution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExecutionId;
    use rstest::rstest;

    #[test]
    fn equivalent_messages_share_identity() {
        let execution = Execution::pipeline("checkout");
        let a = Message::start(execution.clone());
        let b = Message::start(execution);

        assert_ne!(a.id(), b.id());
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn zero_attempt_budget_is_raised_to_one() {
        let message = Message::start(Execution::pipeline("checkout")).with_max_attempts(0);
        assert_eq!(message.max_attempts(), Some(1));
    }

    #[test]
    fn identity_separates_kinds_and_executions() {
        let execution = Execution::pipeline("checkout");
        let other = Execution::pipeline("checkout");

        assert_ne!(
            Message::start(execution.clone()).identity(),
            Message::resume(execution.clone()).identity()
        );
        assert_ne!(
            Message::start(execution).identity(),
            Message::start(other).identity()
        );
    }

    #[test]
    fn restart_identity_is_scoped_to_stage() {
        let execution = Execution::pipeline("checkout");
        let a = Message::restart(execution.clone(), StageId::new("bake"));
        let b = Message::restart(execution.clone(), StageId::new("deploy"));
        let c = Message::restart(execution, StageId::new("bake"));

        assert_ne!(a.identity(), b.identity());
        assert_eq!(a.identity(), c.identity());
    }

    #[test]
    fn cancel_identity_ignores_user_and_reason() {
        let execution = Execution::orchestration("checkout");
        let a = Message::cancel(execution.clone(), "alice", None);
        let b = Message::cancel(execution, "bob", Some("stuck".to_string()));

        assert_eq!(a.identity(), b.identity());
    }

    #[rstest]
    #[case(MessageAction::StartExecution, "start_execution")]
    #[case(MessageAction::RescheduleExecution, "reschedule_execution")]
    #[case(MessageAction::RestartStage { stage_id: StageId::new("s1") }, "restart_stage")]
    #[case(MessageAction::ResumeExecution, "resume_execution")]
    #[case(MessageAction::CancelExecution { user: "u".into(), reason: None }, "cancel_execution")]
    fn action_serializes_with_kind_tag(#[case] action: MessageAction, #[case] tag: &str) {
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["kind"], tag);
        assert_eq!(action.kind().as_str(), tag);
    }

    #[test]
    fn cancel_payload_carries_user_and_reason() {
        let execution = Execution::new(
            ExecutionId::generate(),
            crate::domain::ExecutionType::Pipeline,
            "deck",
        );
        let message = Message::cancel(execution, "alice", Some("wrong branch".to_string()));
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["action"]["user"], "alice");
        assert_eq!(value["action"]["reason"], "wrong branch");
        assert_eq!(value["execution"]["application"], "deck");
    }

    #[test]
    fn delivered_copy_reports_attempt() {
        let message = Message::start(Execution::pipeline("checkout"));
        assert_eq!(message.attempts(), 0);

        let delivered = message.delivered(2);
        assert_eq!(delivered.attempts(), 2);
        assert_eq!(delivered.id(), message.id());
    }
}
