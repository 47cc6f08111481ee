pub mod backlog;
pub mod breakdown;
pub mod codegen;
pub mod config;
pub mod errors;
pub mod events;
pub mod issues;
pub mod llm;
pub mod orchestrator;
pub mod plan;
pub mod quality;
pub mod sandbox;
pub mod scope;
pub mod testrun;
pub mod validators;
