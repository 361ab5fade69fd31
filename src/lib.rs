//! # Judge Adapter
//!
//! Use any OpenAI-compatible model endpoint as an automated judge.
//!
//! This library provides:
//! - Reusable judge templates that separate prompt construction from the
//!   output contract
//! - An asynchronous evaluation lifecycle (submit, then poll or stream)
//! - An output parser that turns free-form replies into typed verdicts
//!
//! ## Evaluation Flow
//!
//! ```text
//!   request ──► Orchestrator ──► Prompt Builder ◄── Template Store
//!                    │
//!                    ▼
//!              Model Gateway ──► LLM backend
//!                    │
//!                    ▼
//!              Output Parser ──► task result (polled by client)
//! ```
//!
//! ## Modules
//! - `template`: template model, validation and persistent store
//! - `prompt`: renders system and user messages
//! - `llm`: backend client and retrying gateway
//! - `parser`: verdict extraction
//! - `task`: task lifecycle and worker pool
//! - `api`: HTTP surface

pub mod api;
pub mod config;
pub mod llm;
pub mod parser;
pub mod prompt;
pub mod task;
pub mod template;

pub use config::Config;
pub use parser::{ParsedOutput, Verdict};
pub use task::{EvaluationRequest, Orchestrator};
pub use template::{Template, TemplateStore};
