//! Domain model: identifiers, execution references and queue messages.

pub mod execution;
pub mod ids;
pub mod message;

pub use execution::{Execution, ExecutionType, StageId};
pub use ids::{ExecutionId, MessageId};
pub use message::{Message, MessageAction, MessageIdentity, MessageKind};
