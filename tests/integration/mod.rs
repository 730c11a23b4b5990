//! Integration tests for the render job pipeline

mod test_utils;

mod cli_commands;
mod coalescing;
mod config_integration;
mod pipeline_scenarios;
mod queue_consumer;
mod status_persistence;
mod tenant_admission;
