//! Shared library for the legal assistant Lambda functions.
//!
//! This crate provides common utilities, types, and clients used across all Lambda functions.

pub mod announcements;
pub mod case_law;
pub mod config;
pub mod db;
pub mod docx;
pub mod drafting;
pub mod error;
pub mod gemini;
pub mod generation;
pub mod http;
pub mod models;
pub mod orchestrator;
pub mod secrets;
pub mod tools;

pub use announcements::{Announcement, AnnouncementStore, CreateAnnouncement, UpdateAnnouncement};
pub use case_law::{CaseLawSearch, GroundedCaseLawSearch, SearchResult};
pub use config::Config;
pub use error::{Error, Result};
pub use gemini::GeminiClient;
pub use generation::{GenerationBackend, GenerationRequest, Generated};
pub use http::ApiResponse;
pub use models::{ChatMessage, ChatRequest, StreamChunk, ToolInvocation};
pub use orchestrator::{ChatSession, Orchestrator, OrchestratorOptions, OutputRecord, OutputSink};
pub use secrets::{get_database_credentials, get_secret, resolve_gemini_api_key, DatabaseCredentials};
