pub mod document_runner;
pub mod job_runner;
pub mod orchestrator;
