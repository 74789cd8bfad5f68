//! KubeCF backup and restore
//!
//! A backup is a directory holding four files, all produced by running
//! commands inside KubeCF pods:
//!
//! | file | source |
//! |---|---|
//! | `blob.tgz` | blobstore data directory, tarred in `singleton-blobstore-0` |
//! | `uaadb-src.sql` | `mysqldump uaa` in `database-0` |
//! | `ccdb-src.sql` | `mysqldump cloud_controller` in `database-0` |
//! | `cc_config.yaml` | cloud controller config from `api-0`, carries the db encryption keys |
//!
//! Restore replays them in a fixed order. Nothing is rolled back: a failure
//! midway leaves the cluster partially restored.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{info, instrument};

use crate::cluster::ClusterHandle;
use crate::error::StepContext;
use crate::{Error, Result};

/// Bulk blobstore archive
pub const BLOB_ARCHIVE: &str = "blob.tgz";
/// UAA database dump
pub const UAA_DUMP: &str = "uaadb-src.sql";
/// Cloud controller database dump
pub const CCDB_DUMP: &str = "ccdb-src.sql";
/// Cloud controller configuration snapshot
pub const CC_CONFIG: &str = "cc_config.yaml";

const DATABASE_UNIT: &str = "database-0";
const DATABASE_CONTAINER: &str = "database";
const API_UNIT: &str = "api-0";
const API_CONTAINER: &str = "api";
const BLOBSTORE_UNIT: &str = "singleton-blobstore-0";
const BLOBSTORE_CONTAINER: &str = "blobstore";

const BLOBSTORE_DIR: &str = "/var/vcap/store/shared";
const CC_CONFIG_PATH: &str = "/var/vcap/jobs/cloud_controller_ng/config/cloud_controller_ng.yml";

/// Strict mode rejects legacy rows the dumps may contain
pub const RELAX_STRICT_MODE_SQL: &str = "SET GLOBAL pxc_strict_mode=PERMISSIVE;
SET GLOBAL
sql_mode='STRICT_ALL_TABLES,NO_AUTO_CREATE_USER,NO_ENGINE_SUBSTITUTION';
set GLOBAL innodb_strict_mode='OFF';
quit;
";

/// Empties the cloud controller database before its dump is loaded
pub const RECREATE_CCDB_SQL: &str = "drop database cloud_controller;
create database cloud_controller;
quit;
";

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

/// Database encryption material recovered from `cc_config.yaml`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EncryptionKeys {
    /// Top-level `db_encryption_key`
    pub db_encryption_key: String,
    /// `database_encryption.current_key_label`
    pub current_key_label: String,
    /// `database_encryption.keys`, label to key
    pub keys: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct CcConfig {
    #[serde(default)]
    db_encryption_key: String,
    database_encryption: Option<CcEncryption>,
}

#[derive(Deserialize)]
struct CcEncryption {
    #[serde(default)]
    current_key_label: String,
    keys: Option<serde_yaml::Value>,
}

impl EncryptionKeys {
    /// Parse the cloud controller config
    ///
    /// `keys` is normally a JSON object rendered inline, which YAML may hand
    /// back either as a string or as a flow mapping; both are accepted.
    pub fn parse(config: &str) -> std::result::Result<Self, String> {
        let config: CcConfig =
            serde_yaml::from_str(config).map_err(|e| format!("invalid yaml: {}", e))?;
        let encryption = config
            .database_encryption
            .ok_or("missing database_encryption")?;

        if encryption.current_key_label.is_empty() {
            return Err("missing database_encryption.current_key_label".to_string());
        }

        let keys = match encryption.keys {
            Some(serde_yaml::Value::String(json)) => serde_json::from_str(&json)
                .map_err(|e| format!("database_encryption.keys is not a JSON object: {}", e))?,
            Some(value @ serde_yaml::Value::Mapping(_)) => serde_yaml::from_value(value)
                .map_err(|e| format!("invalid database_encryption.keys: {}", e))?,
            _ => return Err("missing database_encryption.keys".to_string()),
        };

        if config.db_encryption_key.is_empty() {
            return Err("missing db_encryption_key".to_string());
        }

        Ok(Self {
            db_encryption_key: config.db_encryption_key,
            current_key_label: encryption.current_key_label,
            keys,
        })
    }
}

/// A backup directory and its fixed file layout
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackupArtifact {
    dir: PathBuf,
}

impl BackupArtifact {
    /// Artifact rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of one artifact file
    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    async fn read(&self, file: &str) -> Result<Vec<u8>> {
        let path = self.path(file);
        tokio::fs::read(&path)
            .await
            .map_err(|e| Error::artifact(path, e.to_string()))
    }

    async fn write(&self, file: &str, data: &[u8]) -> Result<()> {
        let path = self.path(file);
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| Error::artifact(path, e.to_string()))
    }

    /// Check that every file exists and the keys parse, before touching the cluster
    pub async fn validate(&self) -> Result<EncryptionKeys> {
        for file in [BLOB_ARCHIVE, UAA_DUMP, CCDB_DUMP, CC_CONFIG] {
            let path = self.path(file);
            let meta = tokio::fs::metadata(&path)
                .await
                .map_err(|e| Error::artifact(&path, e.to_string()))?;
            if !meta.is_file() {
                return Err(Error::artifact(path, "not a regular file"));
            }
        }

        let config = self.read(CC_CONFIG).await?;
        EncryptionKeys::parse(&String::from_utf8_lossy(&config))
            .map_err(|msg| Error::artifact(self.path(CC_CONFIG), msg))
    }
}

/// Runs the backup and replay command sequences against one KubeCF namespace
pub struct BackupSequencer<'a> {
    cluster: &'a dyn ClusterHandle,
    partition: &'a str,
}

impl<'a> BackupSequencer<'a> {
    /// Sequencer for the KubeCF deployment in `partition`
    pub fn new(cluster: &'a dyn ClusterHandle, partition: &'a str) -> Self {
        Self { cluster, partition }
    }

    async fn sql(&self, command: &[&str], stdin: Option<Vec<u8>>) -> Result<Vec<u8>> {
        let out = self
            .cluster
            .exec(self.partition, DATABASE_UNIT, DATABASE_CONTAINER, &argv(command), stdin)
            .await?;
        Ok(out.stdout)
    }

    async fn relax_strict_mode(&self) -> Result<()> {
        self.sql(&["mysql"], Some(RELAX_STRICT_MODE_SQL.as_bytes().to_vec()))
            .await
            .map(|_| ())
    }

    /// Snapshot blobstore, both databases and the cc config into `artifact`
    #[instrument(skip(self, artifact), fields(namespace = %self.partition, dir = %artifact.dir().display()))]
    pub async fn backup(&self, artifact: &BackupArtifact) -> Result<()> {
        if !self.cluster.partition_exists(self.partition).await? {
            return Err(Error::NotDeployed(self.partition.to_string()));
        }
        tokio::fs::create_dir_all(artifact.dir())
            .await
            .map_err(|e| Error::artifact(artifact.dir(), e.to_string()))?;

        info!("Backing up blobstore");
        let tar = argv(&[
            "tar",
            "cfz",
            "-",
            &format!("--exclude={}/tmp", BLOBSTORE_DIR),
            BLOBSTORE_DIR,
        ]);
        let blob = self
            .cluster
            .exec(self.partition, BLOBSTORE_UNIT, BLOBSTORE_CONTAINER, &tar, None)
            .await
            .step("while backing up blobstore")?;
        artifact
            .write(BLOB_ARCHIVE, &blob.stdout)
            .await
            .step("while backing up blobstore")?;

        info!("Disabling db restrictions");
        self.relax_strict_mode()
            .await
            .step("while disabling db restrictions")?;

        info!("Backing up uaa");
        let uaa = self
            .sql(&["mysqldump", "uaa"], None)
            .await
            .step("while backing up uaa db")?;
        artifact
            .write(UAA_DUMP, &uaa)
            .await
            .step("while backing up uaa db")?;

        info!("Backing up ccdb");
        let ccdb = self
            .sql(&["mysqldump", "cloud_controller"], None)
            .await
            .step("while backing up ccdb")?;
        artifact
            .write(CCDB_DUMP, &ccdb)
            .await
            .step("while backing up ccdb")?;

        info!("Backing up cloud_controller_ng.yml");
        let config = self
            .cluster
            .exec(
                self.partition,
                API_UNIT,
                API_CONTAINER,
                &argv(&["cat", CC_CONFIG_PATH]),
                None,
            )
            .await
            .step("while backing up cc config")?;
        artifact
            .write(CC_CONFIG, &config.stdout)
            .await
            .step("while backing up cc config")?;

        info!("Backup complete");
        Ok(())
    }

    /// Load dumps and blobstore from `artifact` into a freshly deployed KubeCF
    ///
    /// Restarts the blobstore pod so it picks up the replayed filesystem.
    #[instrument(skip(self, artifact), fields(namespace = %self.partition, dir = %artifact.dir().display()))]
    pub async fn replay(&self, artifact: &BackupArtifact) -> Result<()> {
        info!("Disabling db restrictions");
        self.relax_strict_mode()
            .await
            .step("while disabling db restrictions")?;

        info!("Restoring UAA");
        let uaa = artifact.read(UAA_DUMP).await.step("while restoring uaa db")?;
        self.sql(&["mysql", "uaa"], Some(uaa))
            .await
            .step("while restoring uaa db")?;

        info!("Restoring blobstore");
        let blob = artifact
            .read(BLOB_ARCHIVE)
            .await
            .step("while restoring blobstore")?;
        self.cluster
            .exec(
                self.partition,
                BLOBSTORE_UNIT,
                BLOBSTORE_CONTAINER,
                &argv(&["tar", "xfz", "-", "-C", "/"]),
                Some(blob),
            )
            .await
            .step("while restoring blobstore")?;
        self.cluster
            .delete_unit(self.partition, BLOBSTORE_UNIT)
            .await
            .step("while restarting blobstore")?;

        info!("Restoring CCDB");
        self.sql(&["mysql"], Some(RECREATE_CCDB_SQL.as_bytes().to_vec()))
            .await
            .step("while pruning ccdb")?;
        let ccdb = artifact.read(CCDB_DUMP).await.step("while restoring ccdb")?;
        self.sql(&["mysql", "cloud_controller"], Some(ccdb))
            .await
            .step("while restoring ccdb")?;

        Ok(())
    }
}
