// Core pipeline
pub mod fallback;
pub mod log_record;
pub mod orchestrator;
pub mod rule_matcher;
pub mod matcher_config;

// Inference boundary
pub mod llm_config;
pub mod llm_service;
pub mod traits;

// HTTP service and dashboard
pub mod config;
pub mod dashboard;
pub mod error;
pub mod histogram;
pub mod server;
pub mod table;
