//! Testing utilities for iacflow pipelines.
//!
//! This module provides:
//! - A scripted command runner that never spawns the IaC tool
//! - Recording and static doubles for persistence, STS, token refresh and preflight
//! - Connection record fixtures and a wired-up [`TestHarness`]

mod fixtures;
mod mocks;

pub use fixtures::{
    aws_cached_connection, aws_role_connection, azure_service_principal_connection, gcp_connection,
    sample_files, test_config, TestHarness, SAMPLE_OUTPUTS_JSON,
};
pub use mocks::{
    PersistedState, RecordingPersistence, ScriptedCommandRunner, StaticPreflight, StaticRoleAssumer,
    StaticTokenRefresher,
};
