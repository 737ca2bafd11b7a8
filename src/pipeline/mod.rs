//! Conversation pipeline: capture sessions, transcript delivery and the
//! orchestrator that arbitrates between them.

pub mod coordinator;
pub mod messages;
pub mod queue;
pub mod services;
pub mod session;
