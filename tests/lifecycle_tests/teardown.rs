//! Fail-soft delete stories

use cfdeploy::catalog::{Catalog, DeploymentOptions};
use cfdeploy::Error;

use super::fake::{installer, FakeCluster};

// ===== Story: delete keeps going past failures =====

#[tokio::test]
async fn story_kubecf_delete_attempts_everything_and_reports_api_failures() {
    let fake = FakeCluster::new(&["10.0.0.5"])
        .with_partitions(&["cf-operator", "kubecf", "team-a"]);
    {
        let mut state = fake.state();
        state.failing_deletes.insert("kubecf".into());
        state.failing_commands = true;
    }
    let options = DeploymentOptions {
        additional_partitions: vec!["team-a".into()],
        ..Default::default()
    };
    let kubecf = Catalog::builtin().resolve("kubecf", &options).unwrap();

    let err = installer(&fake).delete(kubecf.as_ref()).await.unwrap_err();

    // the operator teardown and kubecf's own both trip over the kubecf namespace
    let failures = match err {
        Error::Teardown(failures) => failures,
        other => panic!("expected Teardown, got {other:?}"),
    };
    assert_eq!(failures.len(), 2);
    assert!(failures[0].starts_with("while deleting quarks operator"));
    assert!(failures[1].contains("delete namespace kubecf"));

    let state = fake.state();
    for namespace in [
        "team-a",
        "kubecf",
        "cf-operator",
        "team-a-eirini",
        "kubecf-eirini",
    ] {
        assert!(
            state.deleted_partitions.iter().any(|d| d == namespace),
            "{} was never deleted: {:?}",
            namespace,
            state.deleted_partitions
        );
    }
    // every cleanup command ran even though all of them failed
    assert!(state
        .commands
        .iter()
        .any(|c| c.to_string() == "kubectl delete psp kubecf-default"));
    assert!(state
        .commands
        .iter()
        .any(|c| c.to_string() == "kubectl delete crds quarksjobs.quarks.cloudfoundry.org"));
}

#[tokio::test]
async fn deleting_nothing_is_not_an_error() {
    let fake = FakeCluster::new(&[]);
    let catalog = Catalog::builtin();
    let installer = installer(&fake);

    for kind in ["kubecf", "quarks", "nginx-ingress", "stratos"] {
        let deployment = catalog.resolve(kind, &DeploymentOptions::default()).unwrap();
        installer.delete(deployment.as_ref()).await.unwrap();
    }
    assert!(fake.applies().is_empty());
}

#[tokio::test]
async fn story_carrier_delete_runs_every_uninstaller() {
    let fake = FakeCluster::new(&["10.0.0.5"]).with_partitions(&["cf-operator", "gitea"]);
    fake.state().failing_commands = true;
    let carrier = Catalog::builtin()
        .resolve("carrier", &DeploymentOptions::default())
        .unwrap();

    installer(&fake).delete(carrier.as_ref()).await.unwrap();

    let state = fake.state();
    let programs: Vec<&str> = state.commands.iter().map(|c| c.program.as_str()).collect();
    for script in [
        "git",
        "./gitea/uninstall",
        "./kpack/uninstall",
        "./drone/uninstall",
        "./eirini/uninstall",
    ] {
        assert!(programs.contains(&script), "{} missing from {:?}", script, programs);
    }
    assert!(state.deleted_partitions.iter().any(|d| d == "gitea"));
    assert!(state.deleted_partitions.iter().any(|d| d == "cf-operator"));
}
