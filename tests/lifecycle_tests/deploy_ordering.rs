//! Install ordering stories

use cfdeploy::bundle::ApplyMode;
use cfdeploy::catalog::{Catalog, DeploymentOptions};
use cfdeploy::Error;

use super::fake::{installer, FakeCluster};

fn position(events: &[String], prefix: &str) -> usize {
    events
        .iter()
        .position(|e| e.starts_with(prefix))
        .unwrap_or_else(|| panic!("no event starting with '{}' in {:#?}", prefix, events))
}

// ===== Story: a fresh KubeCF install =====

#[tokio::test]
async fn story_operator_comes_up_before_kubecf() {
    let fake = FakeCluster::new(&["172.18.0.2"]);
    let mut kubecf = Catalog::builtin()
        .resolve("kubecf", &DeploymentOptions::default())
        .unwrap();

    installer(&fake).install(kubecf.as_mut()).await.unwrap();

    let events = fake.events();
    let operator = position(&events, "helm install cf-operator -n cf-operator");
    let kubecf_apply = position(&events, "helm install kubecf -n kubecf");
    assert!(operator < kubecf_apply);

    let applies = fake.applies();
    assert_eq!(applies.len(), 2);
    assert_eq!(
        applies[0].params.get("global.singleNamespace.name"),
        Some("kubecf")
    );
    assert!(applies[0].create_partition && applies[0].wait);

    let kubecf_request = &applies[1];
    assert_eq!(kubecf_request.mode, ApplyMode::Install);
    assert!(!kubecf_request.wait);
    assert_eq!(
        kubecf_request.params.get("system_domain"),
        Some("172.18.0.2.nip.io")
    );
    assert_eq!(
        kubecf_request.params.get("services.router.externalIPs[0]"),
        Some("172.18.0.2")
    );
}

#[tokio::test]
async fn story_additional_namespace_is_prepared_then_gets_its_own_copy() {
    let fake = FakeCluster::new(&["10.0.0.5"]);
    let options = DeploymentOptions {
        additional_partitions: vec!["team-a".into()],
        ..Default::default()
    };
    let mut kubecf = Catalog::builtin().resolve("kubecf", &options).unwrap();

    installer(&fake).install(kubecf.as_mut()).await.unwrap();

    let events = fake.events();
    let operator = position(&events, "helm install cf-operator");
    let namespace = position(&events, "create namespace team-a");
    let rolebinding = position(&events, "run kubectl --namespace team-a create rolebinding");
    let primary = position(&events, "helm install kubecf -n kubecf");
    let copy = position(&events, "helm install kubecf -n team-a");
    assert!(operator < namespace);
    assert!(namespace < rolebinding);
    assert!(rolebinding < primary);
    assert!(primary < copy);

    let applies = fake.applies();
    let copy_request = applies.last().unwrap();
    assert_eq!(
        copy_request.params.get("system_domain"),
        Some("team-a.10.0.0.5.nip.io")
    );
    assert_eq!(copy_request.params.get("kube.psp.default"), Some("kubecf-default"));
}

#[tokio::test]
async fn story_ingress_brings_nginx_up_before_kubecf() {
    let fake = FakeCluster::new(&["10.0.0.5"]);
    let options = DeploymentOptions {
        ingress: true,
        domain: Some("cf.example.com".into()),
        ..Default::default()
    };
    let mut kubecf = Catalog::builtin().resolve("kubecf", &options).unwrap();

    installer(&fake).install(kubecf.as_mut()).await.unwrap();

    let events = fake.events();
    let operator = position(&events, "helm install cf-operator");
    let nginx = position(&events, "helm install nginx-ingress -n nginx-ingress");
    let kubecf_apply = position(&events, "helm install kubecf -n kubecf");
    assert!(operator < nginx);
    assert!(nginx < kubecf_apply);

    let applies = fake.applies();
    let kubecf_request = applies.last().unwrap();
    assert_eq!(kubecf_request.params.get("features.ingress.enabled"), Some("true"));
    assert_eq!(kubecf_request.params.get("system_domain"), Some("cf.example.com"));
    assert!(!kubecf_request.params.contains("services.router.type"));
}

#[tokio::test]
async fn story_present_operator_is_reused() {
    let fake = FakeCluster::new(&["10.0.0.5"]).with_partitions(&["cf-operator"]);
    let mut kubecf = Catalog::builtin()
        .resolve("kubecf", &DeploymentOptions::default())
        .unwrap();

    installer(&fake).install(kubecf.as_mut()).await.unwrap();

    let applies = fake.applies();
    assert_eq!(applies.len(), 1);
    assert_eq!(applies[0].release, "kubecf");
}

// ===== Story: refusing to install twice =====

#[tokio::test]
async fn when_kubecf_is_running_then_install_touches_nothing() {
    let fake = FakeCluster::new(&["10.0.0.5"]).with_partitions(&["kubecf", "cf-operator"]);
    let mut kubecf = Catalog::builtin()
        .resolve("kubecf", &DeploymentOptions::default())
        .unwrap();

    let err = installer(&fake)
        .with_rollback(true)
        .install(kubecf.as_mut())
        .await
        .unwrap_err();

    assert!(matches!(err.root(), Error::AlreadyDeployed { .. }));
    let state = fake.state();
    assert!(state.applies.is_empty());
    assert!(state.execs.is_empty());
    assert!(state.deleted_partitions.is_empty());
}

#[tokio::test]
async fn when_stratos_namespace_exists_then_install_is_refused() {
    let fake = FakeCluster::new(&["10.0.0.5"]).with_partitions(&["stratos"]);
    let mut stratos = Catalog::builtin()
        .resolve("stratos", &DeploymentOptions::default())
        .unwrap();

    let err = installer(&fake).install(stratos.as_mut()).await.unwrap_err();

    assert!(matches!(err.root(), Error::AlreadyDeployed { .. }));
    assert!(fake.applies().is_empty());
}

#[tokio::test]
async fn when_carrier_is_installed_then_install_is_refused() {
    let fake = FakeCluster::new(&["10.0.0.5"]).with_partitions(&["cf-operator", "gitea"]);
    let mut carrier = Catalog::builtin()
        .resolve("carrier", &DeploymentOptions::default())
        .unwrap();

    let err = installer(&fake).install(carrier.as_mut()).await.unwrap_err();

    assert!(matches!(err.root(), Error::AlreadyDeployed { .. }));
    assert!(fake.state().commands.is_empty());
}
