pub mod agents;
pub mod consensus;
pub mod errors;
pub mod fingerprint;
pub mod init;
pub mod orchestrator;
pub mod phase;
pub mod scheduler;
pub mod story;
pub mod storyloop_config;
pub mod tasks;
pub mod telemetry;
pub mod vcs;

#[cfg(test)]
pub mod testing;
