pub mod job_registry;
pub mod subtitle_service;
