#![allow(dead_code)]

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use rlscheck::analysis::{analyze, load_inputs};
use rlscheck::config::AnalyzerConfig;
use rlscheck::eval::{simulate, SimulationRequest, SimulationResult};
use rlscheck::model::{PolicySet, Schema};
use rlscheck::output::Report;
use rlscheck::parser::document::{read_json, SimulationRequestDocument};

pub(crate) fn fixture_dir(fixture: &str) -> PathBuf {
    PathBuf::from("tests/fixtures").join(fixture)
}

pub(crate) fn fixture_path(fixture: &str, file: &str) -> PathBuf {
    fixture_dir(fixture).join(file)
}

/// Load `schema.json` together with the named policy file of a fixture.
pub(crate) fn load_fixture_with(fixture: &str, policy_file: &str) -> (Schema, PolicySet) {
    load_inputs(
        &fixture_path(fixture, "schema.json"),
        &fixture_path(fixture, policy_file),
    )
    .unwrap_or_else(|e| panic!("fixture {fixture}/{policy_file} should load: {e}"))
}

pub(crate) fn load_fixture(fixture: &str) -> (Schema, PolicySet) {
    load_fixture_with(fixture, "policies.json")
}

pub(crate) fn analyze_fixture_with(fixture: &str, policy_file: &str) -> Report {
    let (schema, policies) = load_fixture_with(fixture, policy_file);
    analyze(&schema, &policies, &AnalyzerConfig::default())
}

pub(crate) fn analyze_fixture(fixture: &str) -> Report {
    analyze_fixture_with(fixture, "policies.json")
}

pub(crate) fn load_request(fixture: &str, schema: &Schema) -> SimulationRequest {
    let doc: SimulationRequestDocument =
        read_json("simulation request", &fixture_path(fixture, "request.json"))
            .unwrap_or_else(|e| panic!("fixture {fixture} request should parse: {e}"));
    SimulationRequest::from_document(schema, doc)
        .unwrap_or_else(|e| panic!("fixture {fixture} request should validate: {e}"))
}

pub(crate) fn simulate_fixture_with(fixture: &str, policy_file: &str) -> SimulationResult {
    let (schema, policies) = load_fixture_with(fixture, policy_file);
    let request = load_request(fixture, &schema);
    simulate(&policies, &request, &AnalyzerConfig::default())
}

pub(crate) fn simulate_fixture(fixture: &str) -> SimulationResult {
    simulate_fixture_with(fixture, "policies.json")
}

pub(crate) fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock should be after epoch")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}_{nanos}"));
    std::fs::create_dir_all(&dir).expect("should create temp dir");
    dir
}
