//! Backup and restore stories

use cfdeploy::backup::{BLOB_ARCHIVE, CCDB_DUMP, CC_CONFIG, UAA_DUMP};
use cfdeploy::bundle::ApplyMode;
use cfdeploy::catalog::{Catalog, DeploymentOptions};
use cfdeploy::Error;

use super::fake::{installer, FakeCluster};

const CC_CONFIG_YAML: &str = r#"
db_encryption_key: EzmCLwwF6eV0Qxyj
database_encryption:
  keys: '{"encryption_key_0":"rMNnJcQ8Gb8DJc9h","encryption_key_1":"b2xkZXIta2V5"}'
  current_key_label: "encryption_key_1"
"#;

fn running_kubecf() -> std::sync::Arc<FakeCluster> {
    let fake = FakeCluster::new(&["10.0.0.5"]).with_partitions(&["cf-operator", "kubecf"]);
    {
        let mut state = fake.state();
        let outputs = &mut state.exec_outputs;
        outputs.insert("tar cfz".into(), b"blob-bytes".to_vec());
        outputs.insert("mysqldump uaa".into(), b"-- uaa dump".to_vec());
        outputs.insert("mysqldump cloud_controller".into(), b"-- ccdb dump".to_vec());
        outputs.insert("cat ".into(), CC_CONFIG_YAML.as_bytes().to_vec());
    }
    fake
}

fn write_backup(dir: &std::path::Path, cc_config: &str) {
    std::fs::write(dir.join(BLOB_ARCHIVE), b"blob-bytes").unwrap();
    std::fs::write(dir.join(UAA_DUMP), b"-- uaa dump").unwrap();
    std::fs::write(dir.join(CCDB_DUMP), b"-- ccdb dump").unwrap();
    std::fs::write(dir.join(CC_CONFIG), cc_config).unwrap();
}

fn position(events: &[String], prefix: &str) -> usize {
    events
        .iter()
        .position(|e| e.starts_with(prefix))
        .unwrap_or_else(|| panic!("no event starting with '{}' in {:#?}", prefix, events))
}

// ===== Story: backup from one cluster, restore into a fresh one =====

#[tokio::test]
async fn story_backup_then_restore_replays_state_and_keys() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = Catalog::builtin();

    // Chapter 1: back up a running deployment
    let source = running_kubecf();
    let kubecf = catalog
        .resolve("kubecf", &DeploymentOptions::default())
        .unwrap();
    installer(&source)
        .backup(kubecf.as_ref(), dir.path())
        .await
        .unwrap();

    assert_eq!(std::fs::read(dir.path().join(BLOB_ARCHIVE)).unwrap(), b"blob-bytes");
    assert_eq!(std::fs::read(dir.path().join(UAA_DUMP)).unwrap(), b"-- uaa dump");
    assert_eq!(std::fs::read(dir.path().join(CCDB_DUMP)).unwrap(), b"-- ccdb dump");
    assert!(std::fs::read_to_string(dir.path().join(CC_CONFIG))
        .unwrap()
        .contains("encryption_key_1"));
    assert!(source.applies().is_empty());

    // Chapter 2: restore into an empty cluster
    let target = FakeCluster::new(&["10.0.0.9"]);
    let mut kubecf = catalog
        .resolve("kubecf", &DeploymentOptions::default())
        .unwrap();
    installer(&target)
        .restore(kubecf.as_mut(), dir.path())
        .await
        .unwrap();

    let execs = target.execs();
    let uaa = execs
        .iter()
        .find(|e| e.line() == "mysql uaa")
        .expect("uaa dump replayed");
    assert_eq!(uaa.stdin.as_deref(), Some(&b"-- uaa dump"[..]));
    let blob = execs
        .iter()
        .find(|e| e.line().starts_with("tar xfz"))
        .expect("blobstore replayed");
    assert_eq!(blob.partition, "kubecf");
    assert_eq!(blob.unit, "singleton-blobstore-0");
    assert_eq!(blob.container, "blobstore");
    assert_eq!(blob.stdin.as_deref(), Some(&b"blob-bytes"[..]));
    let ccdb = execs
        .iter()
        .find(|e| e.line() == "mysql cloud_controller")
        .expect("ccdb dump replayed");
    assert_eq!(ccdb.stdin.as_deref(), Some(&b"-- ccdb dump"[..]));
    assert_eq!(target.state().deleted_units, vec!["singleton-blobstore-0"]);

    // Chapter 3: the last apply re-runs kubecf with the recovered keys
    let applies = target.applies();
    let last = applies.last().unwrap();
    assert_eq!(last.release, "kubecf");
    assert_eq!(last.mode, ApplyMode::Upgrade);
    assert_eq!(
        last.params.get("ccdb.encryption.rotation.current_key_label"),
        Some("encryption_key_1")
    );
    assert_eq!(
        last.params.get("credentials.ccdb_key_label_encryption_key_0"),
        Some("rMNnJcQ8Gb8DJc9h")
    );
    assert_eq!(
        last.params.get("ccdb.encryption.rotation.key_labels[1]"),
        Some("encryption_key_1")
    );
    assert_eq!(
        last.params.get("credentials.cc_db_encryption_key"),
        Some("EzmCLwwF6eV0Qxyj")
    );
    assert_eq!(last.params.get("system_domain"), Some("10.0.0.9.nip.io"));
}

#[tokio::test]
async fn story_restore_deploys_then_replays_then_restarts_then_rekeys() {
    let dir = tempfile::tempdir().unwrap();
    write_backup(dir.path(), CC_CONFIG_YAML);

    let target = FakeCluster::new(&["10.0.0.9"]);
    let mut kubecf = Catalog::builtin()
        .resolve("kubecf", &DeploymentOptions::default())
        .unwrap();
    installer(&target)
        .restore(kubecf.as_mut(), dir.path())
        .await
        .unwrap();

    let events = target.events();
    let deploy = position(&events, "helm install kubecf -n kubecf");
    let uaa = position(&events, "exec kubecf/database-0 mysql uaa");
    let blob = position(&events, "exec kubecf/singleton-blobstore-0 tar xfz");
    let restart = position(&events, "delete pod kubecf/singleton-blobstore-0");
    let ccdb = position(&events, "exec kubecf/database-0 mysql cloud_controller");
    let rekey = position(&events, "helm upgrade kubecf -n kubecf");
    assert!(deploy < uaa);
    assert!(uaa < blob);
    assert!(blob < restart);
    assert!(restart < ccdb);
    assert!(ccdb < rekey);
    assert_eq!(rekey, events.len() - 1);

    let applies = target.applies();
    let last = applies.last().unwrap();
    assert_eq!(last.release, "kubecf");
    assert_eq!(
        last.params.get("credentials.cc_db_encryption_key"),
        Some("EzmCLwwF6eV0Qxyj")
    );
}

// ===== Story: a broken backup is caught before anything is deployed =====

#[tokio::test]
async fn when_backup_lacks_db_encryption_key_then_restore_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let without_key = CC_CONFIG_YAML.replace("db_encryption_key: EzmCLwwF6eV0Qxyj\n", "");
    write_backup(dir.path(), &without_key);

    let target = FakeCluster::new(&["10.0.0.9"]);
    let mut kubecf = Catalog::builtin()
        .resolve("kubecf", &DeploymentOptions::default())
        .unwrap();
    let err = installer(&target)
        .restore(kubecf.as_mut(), dir.path())
        .await
        .unwrap_err();

    match err.root() {
        Error::ArtifactRead { path, .. } => assert!(path.ends_with(CC_CONFIG)),
        other => panic!("expected ArtifactRead, got {other:?}"),
    }
    assert_eq!(err.steps(), vec!["while reading backup"]);
    assert!(target.applies().is_empty());
    assert!(target.execs().is_empty());
}

#[tokio::test]
async fn when_backup_is_incomplete_then_restore_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(BLOB_ARCHIVE), b"blob").unwrap();
    std::fs::write(dir.path().join(UAA_DUMP), b"uaa").unwrap();

    let target = FakeCluster::new(&["10.0.0.9"]);
    let mut kubecf = Catalog::builtin()
        .resolve("kubecf", &DeploymentOptions::default())
        .unwrap();
    let err = installer(&target)
        .restore(kubecf.as_mut(), dir.path())
        .await
        .unwrap_err();

    assert!(matches!(err.root(), Error::ArtifactRead { .. }));
    assert_eq!(err.steps(), vec!["while reading backup"]);
    assert!(target.applies().is_empty());
    assert!(target.execs().is_empty());
}

#[tokio::test]
async fn when_kubecf_is_absent_then_backup_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let fake = FakeCluster::new(&["10.0.0.5"]);
    let kubecf = Catalog::builtin()
        .resolve("kubecf", &DeploymentOptions::default())
        .unwrap();

    let err = installer(&fake)
        .backup(kubecf.as_ref(), dir.path())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NotDeployed(ref ns) if ns == "kubecf"));
    assert!(fake.execs().is_empty());
}

#[tokio::test]
async fn only_kubecf_can_be_backed_up() {
    let dir = tempfile::tempdir().unwrap();
    let fake = FakeCluster::new(&["10.0.0.5"]).with_partitions(&["stratos"]);
    let stratos = Catalog::builtin()
        .resolve("stratos", &DeploymentOptions::default())
        .unwrap();

    let err = installer(&fake)
        .backup(stratos.as_ref(), dir.path())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unsupported { .. }));
}
