mod common;

use common::{CountingKeyGenerator, FailingKeyGenerator, FakeTool, TestHome};
use std::sync::Arc;
use std::time::Duration;
use zoneflow_core::{
    Action, Orchestrator, Phase, RsaKeyGenerator, Verb, ZoneId, ZoneflowError,
};

fn inventory_keys(value: &serde_json::Value) -> Vec<String> {
    value.as_object().unwrap().keys().cloned().collect()
}

#[tokio::test]
async fn test_apply_then_inventory_covers_selected_zones() {
    let home = TestHome::new(&["a", "b", "c"]);
    let tool = Arc::new(FakeTool::new());
    let config = home.config().zones(Some("a,b".to_string())).build().unwrap();

    let mut orchestrator =
        Orchestrator::configure(config, tool.clone(), Arc::new(RsaKeyGenerator::new())).unwrap();
    let report = orchestrator.run(Action::Apply).await.unwrap();

    assert!(report.is_success(), "failures: {:?}", report.failures);
    assert_eq!(orchestrator.phase(), Phase::Done);
    assert_eq!(report.zones, vec![ZoneId::from("a"), ZoneId::from("b")]);

    // init precedes apply; the inventory refresh after apply does not re-init
    assert_eq!(tool.verbs_for("a"), vec![Verb::Init, Verb::Apply, Verb::Output]);
    assert_eq!(tool.verbs_for("b"), vec![Verb::Init, Verb::Apply, Verb::Output]);
    assert!(tool.verbs_for("c").is_empty());

    let apply = tool
        .calls()
        .into_iter()
        .find(|c| c.verb == Verb::Apply)
        .unwrap();
    assert_eq!(apply.params.get("api_key").map(String::as_str), Some("test-api-key"));
    assert!(!apply.params.contains_key("ssh_public_key"));

    let inventory = home.read_inventory("output.json");
    assert_eq!(inventory_keys(&inventory), vec!["a", "b"]);
    assert_eq!(inventory["a"]["vpc_id"]["value"], "vpc-a");

    let (path, zones) = report.inventory.unwrap();
    assert_eq!(path, home.path().join("output.json"));
    assert_eq!(zones.len(), 2);
}

#[tokio::test]
async fn test_failing_output_leaves_zone_out_of_inventory() {
    let home = TestHome::new(&["z1", "z2"]);
    let tool = Arc::new(FakeTool::new().failing("z2", Verb::Output));
    let config = home.config().zones(Some("all".to_string())).build().unwrap();

    let mut orchestrator =
        Orchestrator::configure(config, tool.clone(), Arc::new(RsaKeyGenerator::new())).unwrap();
    let report = orchestrator.run(Action::Output).await.unwrap();

    assert!(!report.is_success());
    assert_eq!(report.failed_zones(), vec![&ZoneId::from("z2")]);
    assert_eq!(report.failures[0].verb, Some(Verb::Output));
    assert!(report.warnings.iter().any(|w| w.contains("partial")));

    let inventory = home.read_inventory("output.json");
    assert_eq!(inventory_keys(&inventory), vec!["z1"]);

    // output queries initialize first
    assert_eq!(tool.verbs_for("z1"), vec![Verb::Init, Verb::Output]);
    assert_eq!(tool.verbs_for("z2"), vec![Verb::Init, Verb::Output]);
}

#[tokio::test]
async fn test_failing_zone_does_not_stop_others() {
    let home = TestHome::new(&["z1", "z2", "z3"]);
    let tool = Arc::new(FakeTool::new().failing("z1", Verb::Init));
    let config = home.config().zones(Some("all".to_string())).build().unwrap();

    let mut orchestrator =
        Orchestrator::configure(config, tool.clone(), Arc::new(RsaKeyGenerator::new())).unwrap();
    let report = orchestrator.run(Action::Destroy).await.unwrap();

    assert_eq!(report.failed_zones(), vec![&ZoneId::from("z1")]);
    assert_eq!(report.failures[0].verb, Some(Verb::Init));
    assert_eq!(tool.verbs_for("z1"), vec![Verb::Init]);
    assert_eq!(tool.verbs_for("z2"), vec![Verb::Init, Verb::Destroy]);
    assert_eq!(tool.verbs_for("z3"), vec![Verb::Init, Verb::Destroy]);
}

#[tokio::test]
async fn test_destroy_removes_inventory() {
    let home = TestHome::new(&["z1"]);
    std::fs::write(home.path().join("output.json"), r#"{"z1": {}}"#).unwrap();
    let tool = Arc::new(FakeTool::new());
    let config = home.config().zones(Some("z1".to_string())).build().unwrap();

    let mut orchestrator =
        Orchestrator::configure(config, tool.clone(), Arc::new(RsaKeyGenerator::new())).unwrap();
    let report = orchestrator.run(Action::Destroy).await.unwrap();

    assert!(report.is_success());
    assert!(report.inventory.is_none());
    assert!(!home.path().join("output.json").exists());
}

#[tokio::test]
async fn test_destroy_then_clean_with_never_applied_zone() {
    let home = TestHome::new(&["z1", "z2", "z3"]);
    home.seed_artifacts("z1");
    home.seed_artifacts("z2");
    let tool = Arc::new(FakeTool::new());
    let config = home.config().zones(Some("z1,z2".to_string())).build().unwrap();

    let mut orchestrator = Orchestrator::configure(
        config.clone(),
        tool.clone(),
        Arc::new(RsaKeyGenerator::new()),
    )
    .unwrap();
    orchestrator.run(Action::Destroy).await.unwrap();

    let mut orchestrator =
        Orchestrator::configure(config, tool.clone(), Arc::new(RsaKeyGenerator::new())).unwrap();
    let first = orchestrator.run(Action::Clean).await.unwrap();
    assert!(first.is_success());
    assert!(first.warnings.is_empty());
    // clean covers every discovered zone, not just the filtered ones
    assert_eq!(first.zones.len(), 3);

    for zone in ["z1", "z2", "z3"] {
        let zone_dir = home.zone_dir(zone);
        assert!(!zone_dir.join("terraform.tfstate").exists());
        assert!(!zone_dir.join("terraform.tfstate.backup").exists());
        assert!(!zone_dir.join(".terraform").exists());
        assert!(zone_dir.join("main.tf").exists());
    }

    let second = orchestrator.run(Action::Clean).await.unwrap();
    assert!(second.is_success());
    assert!(second.warnings.is_empty());

    // clean never invokes the tool
    assert_eq!(tool.calls().len(), 4);
}

#[tokio::test]
async fn test_missing_api_key_fails_before_any_zone_work() {
    let home = TestHome::new(&["us-south-3"]);
    let tool = Arc::new(FakeTool::new());
    let config = home.config().api_key(None).build().unwrap();

    let err = Orchestrator::configure(config, tool.clone(), Arc::new(RsaKeyGenerator::new()))
        .err()
        .unwrap();

    assert!(err.is_preflight());
    assert!(err.to_string().contains("API_KEY"));
    assert!(tool.calls().is_empty());
    assert!(!home.path().join("output.json").exists());
}

#[tokio::test]
async fn test_blank_api_key_counts_as_missing() {
    let home = TestHome::new(&["us-south-3"]);
    let config = home.config().api_key(Some("  ".to_string())).build().unwrap();

    let result = Orchestrator::configure(
        config,
        Arc::new(FakeTool::new()),
        Arc::new(RsaKeyGenerator::new()),
    );
    assert!(matches!(result, Err(ZoneflowError::Configuration(_))));
}

#[tokio::test]
async fn test_missing_zones_root_aborts_run() {
    let home = TestHome::new(&[]);
    let tool = Arc::new(FakeTool::new());
    let config = home.config().build().unwrap();

    let mut orchestrator =
        Orchestrator::configure(config, tool.clone(), Arc::new(RsaKeyGenerator::new())).unwrap();
    let err = orchestrator.run(Action::Apply).await.unwrap_err();

    assert!(matches!(err, ZoneflowError::Discovery { .. }));
    assert!(tool.calls().is_empty());
}

#[tokio::test]
async fn test_default_filter_selects_single_zone() {
    let home = TestHome::new(&["us-south-2", "us-south-3"]);
    let tool = Arc::new(FakeTool::new());
    let config = home.config().build().unwrap();

    let mut orchestrator =
        Orchestrator::configure(config, tool.clone(), Arc::new(RsaKeyGenerator::new())).unwrap();
    let report = orchestrator.run(Action::Output).await.unwrap();

    assert_eq!(report.zones, vec![ZoneId::from("us-south-3")]);
    assert!(tool.verbs_for("us-south-2").is_empty());
}

#[tokio::test]
async fn test_unknown_zones_are_reported_and_skipped() {
    let home = TestHome::new(&["a"]);
    let tool = Arc::new(FakeTool::new());
    let config = home
        .config()
        .zones(Some("a, ghost".to_string()))
        .build()
        .unwrap();

    let mut orchestrator =
        Orchestrator::configure(config, tool.clone(), Arc::new(RsaKeyGenerator::new())).unwrap();
    let report = orchestrator.run(Action::Output).await.unwrap();

    assert!(report.is_success());
    assert_eq!(report.zones, vec![ZoneId::from("a")]);
    assert_eq!(report.unknown_zones, vec![ZoneId::from("ghost")]);
    assert!(tool.calls().iter().all(|c| c.zone == "a"));
}

#[tokio::test]
async fn test_each_apply_gets_fresh_credentials() {
    let home = TestHome::new(&["z1", "z2"]);
    let tool = Arc::new(FakeTool::new());
    let keygen = Arc::new(CountingKeyGenerator::default());
    let config = home
        .config()
        .zones(Some("all".to_string()))
        .provision_credentials(true)
        .build()
        .unwrap();

    let mut orchestrator = Orchestrator::configure(config, tool.clone(), keygen.clone()).unwrap();
    orchestrator.run(Action::Apply).await.unwrap();
    orchestrator.run(Action::Apply).await.unwrap();

    assert_eq!(keygen.issued(), 4);

    let public_keys: Vec<String> = tool
        .calls()
        .into_iter()
        .filter(|c| c.verb == Verb::Apply)
        .map(|c| c.params["ssh_public_key"].clone())
        .collect();
    assert_eq!(public_keys.len(), 4);
    for (i, key) in public_keys.iter().enumerate() {
        assert!(!public_keys[i + 1..].contains(key), "key reused: {}", key);
    }

    // init never sees the secrets
    assert!(
        tool.calls()
            .iter()
            .filter(|c| c.verb == Verb::Init)
            .all(|c| c.params.is_empty())
    );

    let inventory = home.read_inventory("zone-resources.json");
    assert_eq!(inventory_keys(&inventory), vec!["z1", "z2"]);
    assert!(!home.path().join("output.json").exists());
}

#[tokio::test]
async fn test_credential_failure_only_skips_that_zone() {
    let home = TestHome::new(&["z1", "z2", "z3"]);
    let tool = Arc::new(FakeTool::new());
    let config = home
        .config()
        .zones(Some("all".to_string()))
        .provision_credentials(true)
        .build()
        .unwrap();

    let mut orchestrator = Orchestrator::configure(
        config,
        tool.clone(),
        Arc::new(FailingKeyGenerator::for_zone("z2")),
    )
    .unwrap();
    let report = orchestrator.run(Action::Apply).await.unwrap();

    assert_eq!(report.failed_zones(), vec![&ZoneId::from("z2")]);
    assert_eq!(report.failures[0].verb, None);
    assert!(report.failures[0].reason.contains("Credential generation failed"));

    // no tool work for the zone without credentials, apart from the inventory query
    assert_eq!(tool.verbs_for("z2"), vec![Verb::Output]);
    assert_eq!(tool.verbs_for("z1"), vec![Verb::Init, Verb::Apply, Verb::Output]);
    assert_eq!(tool.verbs_for("z3"), vec![Verb::Init, Verb::Apply, Verb::Output]);

    let inventory = home.read_inventory("zone-resources.json");
    assert_eq!(inventory_keys(&inventory), vec!["z1", "z2", "z3"]);
}

#[tokio::test]
async fn test_parallel_run_keeps_zone_order() {
    let home = TestHome::new(&["a", "b", "c"]);
    let tool = Arc::new(
        FakeTool::new()
            .delayed("a", Duration::from_millis(150))
            .delayed("b", Duration::from_millis(50)),
    );
    let config = home
        .config()
        .zones(Some("all".to_string()))
        .parallelism(3)
        .build()
        .unwrap();

    let mut orchestrator =
        Orchestrator::configure(config, tool, Arc::new(RsaKeyGenerator::new())).unwrap();
    let report = orchestrator.run(Action::Output).await.unwrap();

    assert!(report.is_success());
    let inventory = home.read_inventory("output.json");
    assert_eq!(inventory_keys(&inventory), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_zone_lock_blocks_concurrent_run() {
    let home = TestHome::new(&["z1", "z2"]);
    std::fs::write(
        home.zone_dir("z1").join(".zoneflow.lock"),
        format!(
            r#"{{"holder": "other-host", "pid": 4242, "acquired_at": "{}"}}"#,
            chrono::Utc::now().to_rfc3339()
        ),
    )
    .unwrap();
    let tool = Arc::new(FakeTool::new());
    let config = home.config().zones(Some("all".to_string())).build().unwrap();

    let mut orchestrator =
        Orchestrator::configure(config, tool.clone(), Arc::new(RsaKeyGenerator::new())).unwrap();
    let report = orchestrator.run(Action::Destroy).await.unwrap();

    assert_eq!(report.failed_zones(), vec![&ZoneId::from("z1")]);
    assert!(report.failures[0].reason.contains("other-host"));
    assert!(tool.verbs_for("z1").is_empty());
    assert_eq!(tool.verbs_for("z2"), vec![Verb::Init, Verb::Destroy]);
}
