//! The Duet session — where the human, the collaborator and the kernel meet.
//!
//! A session turns one collaborator invocation into at most one commit:
//!
//! 1. **Invoke**: send the working document to the collaborator
//! 2. **Patch**: apply the returned edit batch as one transaction
//! 3. **Validate**: check structure and kernel syntax
//! 4. **Commit + reload**: store the text and swap in a fresh kernel
//!
//! Any stage that fails stops the run and leaves a system turn in the
//! annotation log. Only one invocation may be in flight at a time.

pub mod command;
pub mod gateway;
pub mod session;

pub use command::{CommandError, SessionCommand};
pub use gateway::CollaboratorGateway;
pub use session::{
    CommitReport, GatewayReply, InvokeOutcome, PendingInvoke, Session, SessionOptions,
    SessionStatus,
};
