//! Catalog resolution carried through to what gets applied

use cfdeploy::catalog::{Catalog, ComponentKind, DeploymentOptions, CUSTOM_VERSION};
use cfdeploy::Error;

use super::fake::{installer, FakeCluster};

#[tokio::test]
async fn story_explicit_chart_is_what_gets_applied() {
    let fake = FakeCluster::new(&["10.0.0.5"]);
    let options = DeploymentOptions {
        bundle_location: Some("./charts/console.tgz".into()),
        ..Default::default()
    };
    let mut stratos = Catalog::builtin().resolve("stratos", &options).unwrap();
    assert_eq!(stratos.version(), CUSTOM_VERSION);

    installer(&fake).install(stratos.as_mut()).await.unwrap();

    let applies = fake.applies();
    assert_eq!(applies.len(), 1);
    assert_eq!(applies[0].bundle_location, "./charts/console.tgz");
    assert_eq!(applies[0].partition, "stratos");
}

#[tokio::test]
async fn story_custom_operator_chart_reaches_the_operator_install() {
    let fake = FakeCluster::new(&["10.0.0.5"]);
    let options = DeploymentOptions {
        bundle_location: Some("./kubecf.tgz".into()),
        dependency_bundle_location: Some("./cf-operator.tgz".into()),
        ..Default::default()
    };
    let mut kubecf = Catalog::builtin().resolve("kubecf", &options).unwrap();

    installer(&fake).install(kubecf.as_mut()).await.unwrap();

    let locations: Vec<String> = fake
        .applies()
        .into_iter()
        .map(|a| a.bundle_location)
        .collect();
    assert_eq!(locations, vec!["./cf-operator.tgz", "./kubecf.tgz"]);
}

#[tokio::test]
async fn when_only_operator_chart_is_given_then_kubecf_cannot_deploy() {
    let fake = FakeCluster::new(&["10.0.0.5"]);
    let options = DeploymentOptions {
        dependency_bundle_location: Some("./cf-operator.tgz".into()),
        ..Default::default()
    };
    let mut kubecf = Catalog::builtin().resolve("kubecf", &options).unwrap();

    let err = installer(&fake).install(kubecf.as_mut()).await.unwrap_err();

    assert!(matches!(err.root(), Error::MissingBundleLocation(_)));
    assert!(fake.applies().is_empty());
}

#[test]
fn every_kind_has_a_resolvable_default() {
    let catalog = Catalog::builtin();
    for kind in ComponentKind::ALL {
        let version = catalog.default_version(kind).unwrap().to_string();
        let deployment = catalog
            .resolve(kind.as_str(), &DeploymentOptions::default())
            .unwrap();
        assert_eq!(deployment.kind(), kind);
        assert_eq!(deployment.version(), version);
    }
}
