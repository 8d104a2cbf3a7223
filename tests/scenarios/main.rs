//! Scenario-based tests for cirunner

mod helpers;

mod matrix_jobs;
mod notifications;
mod pipeline_stages;
