//! Budget decision state machine and the safety gates applied to it.

pub mod approvals;
pub mod decision;
pub mod guardrails;

pub use approvals::{Approval, DenyAllApprovals, FileApprovals};
pub use decision::DecisionEngine;
pub use guardrails::{enforce_cycle_cap, SafetyGate};
