//! Error types for catalog resolution and component lifecycle operations

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Main error type for cfdeploy operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The catalog has no entry for the requested (kind, version)
    #[error("no {kind} version {version} in catalog")]
    NotFound {
        /// Component kind that was looked up
        kind: String,
        /// Version that was requested
        version: String,
    },

    /// The component kind string is not one of the known kinds
    #[error("invalid component '{0}'")]
    InvalidComponent(String),

    /// The target partition exists already
    #[error("partition '{partition}' present already, delete {component} first")]
    AlreadyDeployed {
        /// Partition that was found
        partition: String,
        /// Component that owns the partition
        component: String,
    },

    /// A prerequisite partition is absent
    #[error("dependency partition '{0}' not present")]
    DependencyMissing(String),

    /// The component's own partition is absent
    #[error("partition '{0}' not present, component is not deployed")]
    NotDeployed(String),

    /// A readiness wait exceeded its bound
    #[error("timed out after {timeout:?} waiting for {what}")]
    Timeout {
        /// What was being waited for
        what: String,
        /// The bound that was exceeded
        timeout: Duration,
    },

    /// A running-wait snapshot contained no units
    #[error("no units in {partition} with selector '{selector}'")]
    NoUnitsFound {
        /// Partition that was queried
        partition: String,
        /// Label selector that matched nothing
        selector: String,
    },

    /// A polled unit reached a terminal failed phase
    #[error("unit {partition}/{unit} failed")]
    UnitFailed {
        /// Partition of the unit
        partition: String,
        /// Name of the unit
        unit: String,
    },

    /// The bundle applier or a remote/local command returned non-zero
    #[error("command failed: {command} - {message}")]
    ExternalCommandFailed {
        /// The command that failed
        command: String,
        /// Captured error output
        message: String,
    },

    /// Backup artifact could not be read or parsed
    #[error("artifact {}: {message}", path.display())]
    ArtifactRead {
        /// Artifact file involved
        path: PathBuf,
        /// What went wrong
        message: String,
    },

    /// No domain was supplied and the cluster reported no external address
    #[error("could not detect cluster external addresses and no deployment domain was specified")]
    NoExternalAddress,

    /// The component kind does not support the requested operation
    #[error("{component} does not support {operation}")]
    Unsupported {
        /// Component kind
        component: String,
        /// Operation that was requested
        operation: String,
    },

    /// A custom descriptor was synthesized without a bundle location for this kind
    #[error("no bundle location for {0}, pass an explicit chart location")]
    MissingBundleLocation(String),

    /// Handle failures collected while tearing down
    #[error("teardown finished with {} failure(s): {}", .0.len(), .0.join("; "))]
    Teardown(Vec<String>),

    /// The cluster handle could not be built from the resolved kubeconfig
    #[error("cluster connection failed: {0}")]
    Connect(String),

    /// A secret exists but lacks the requested key
    #[error("secret {secret} has no key '{key}'")]
    MissingSecretKey {
        /// Namespaced secret name
        secret: String,
        /// Key that was requested
        key: String,
    },

    /// An `--options-file` could not be read or parsed
    #[error("options file {}: {message}", path.display())]
    OptionsFile {
        /// File that was given
        path: PathBuf,
        /// What went wrong
        message: String,
    },

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Local I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A lifecycle step failed; `step` names the intent
    #[error("{step}: {source}")]
    Step {
        /// Intent of the failed step, e.g. "while deploying operator"
        step: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a not-found error for a catalog lookup
    pub fn not_found(kind: impl Into<String>, version: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            version: version.into(),
        }
    }

    /// Create an already-deployed precondition error
    pub fn already_deployed(partition: impl Into<String>, component: impl Into<String>) -> Self {
        Self::AlreadyDeployed {
            partition: partition.into(),
            component: component.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(what: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            timeout,
        }
    }

    /// Create a command failure error
    pub fn command_failed(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalCommandFailed {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create an artifact read/parse error
    pub fn artifact(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ArtifactRead {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an unsupported-operation error
    pub fn unsupported(component: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Unsupported {
            component: component.into(),
            operation: operation.into(),
        }
    }

    /// Wrap this error with the intent of the step that produced it
    pub fn in_step(self, step: impl Into<String>) -> Self {
        Self::Step {
            step: step.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error beneath any step wrappers
    pub fn root(&self) -> &Error {
        match self {
            Self::Step { source, .. } => source.root(),
            other => other,
        }
    }

    /// Step intents from outermost to innermost
    pub fn steps(&self) -> Vec<&str> {
        let mut steps = Vec::new();
        let mut current = self;
        while let Self::Step { step, source } = current {
            steps.push(step.as_str());
            current = source;
        }
        steps
    }
}

/// Extension trait for wrapping a failed step with its intent.
///
/// Shortens `.map_err(|e| e.in_step("while ..."))` at every lifecycle step.
pub trait StepContext<T> {
    /// Wrap the error, if any, with the given step intent
    fn step(self, step: &str) -> Result<T, Error>;
}

impl<T, E: Into<Error>> StepContext<T> for Result<T, E> {
    fn step(self, step: &str) -> Result<T, Error> {
        self.map_err(|e| e.into().in_step(step))
    }
}
