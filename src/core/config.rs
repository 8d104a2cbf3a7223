//! Build configuration from a Travis-style YAML document

use crate::core::{build::Build, environment::parse_assignments, matrix, phase::Phase};
use crate::provision::CondaConfig;
use anyhow::{Context, Result};
use regex::Regex;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;
use tracing::warn;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("e-mail pattern is valid")
});

/// When a notification is sent for a given build outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyPolicy {
    /// Notify on every build with this outcome
    Always,
    /// Never notify
    Never,
    /// Notify only when the outcome differs from the previous build
    Change,
}

/// Top-level build configuration loaded from YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Project language (informational)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Operating system axis of the build matrix
    #[serde(default, deserialize_with = "scalar_list", skip_serializing_if = "Vec::is_empty")]
    pub os: Vec<String>,

    /// Distribution name (informational)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dist: Option<String>,

    /// Interpreter version axis of the build matrix
    #[serde(default, deserialize_with = "scalar_list", skip_serializing_if = "Vec::is_empty")]
    pub python: Vec<String>,

    /// Global variables and the env axis
    #[serde(default, skip_serializing_if = "EnvConfig::is_empty")]
    pub env: EnvConfig,

    /// Notification settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifications: Option<NotificationsConfig>,

    /// Explicit matrix entries, exclusions and failure tolerance
    #[serde(default, alias = "jobs", skip_serializing_if = "Option::is_none")]
    pub matrix: Option<MatrixConfig>,

    /// Conda environment provisioning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conda: Option<CondaConfig>,

    #[serde(default, deserialize_with = "scalar_list", skip_serializing_if = "Vec::is_empty")]
    pub before_install: Vec<String>,

    #[serde(default, deserialize_with = "scalar_list", skip_serializing_if = "Vec::is_empty")]
    pub install: Vec<String>,

    #[serde(default, deserialize_with = "scalar_list", skip_serializing_if = "Vec::is_empty")]
    pub before_script: Vec<String>,

    #[serde(default, deserialize_with = "scalar_list", skip_serializing_if = "Vec::is_empty")]
    pub script: Vec<String>,

    #[serde(default, deserialize_with = "scalar_list", skip_serializing_if = "Vec::is_empty")]
    pub after_success: Vec<String>,

    #[serde(default, deserialize_with = "scalar_list", skip_serializing_if = "Vec::is_empty")]
    pub after_failure: Vec<String>,

    #[serde(default, deserialize_with = "scalar_list", skip_serializing_if = "Vec::is_empty")]
    pub after_script: Vec<String>,

    /// Keys this runner does not interpret (cache, branches, deploy, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Environment variable assignments
///
/// Accepts a single string, a list (each entry is one matrix row) or a
/// mapping with `global` and `jobs`/`matrix` lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value")]
pub struct EnvConfig {
    /// Assignments applied to every job
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub global: Vec<String>,

    /// One matrix row per entry
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jobs: Vec<String>,
}

impl EnvConfig {
    pub fn is_empty(&self) -> bool {
        self.global.is_empty() && self.jobs.is_empty()
    }
}

impl TryFrom<Value> for EnvConfig {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Mapping(map) => {
                let mut env = EnvConfig::default();
                for (key, value) in map {
                    match key.as_str() {
                        Some("global") => env.global = strings_from_value(value)?,
                        Some("jobs") | Some("matrix") => env.jobs = strings_from_value(value)?,
                        _ => return Err(format!("unsupported env key: {:?}", key)),
                    }
                }
                Ok(env)
            }
            other => Ok(EnvConfig {
                global: Vec::new(),
                jobs: strings_from_value(other)?,
            }),
        }
    }
}

/// Notification settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<EmailNotification>,

    /// Other channels (slack, webhooks, ...) are kept but not delivered
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

/// E-mail notification settings
///
/// `email` may be `true`/`false`, one address, a list of addresses, or a
/// mapping with `recipients`, `on_success` and `on_failure`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value")]
pub struct EmailNotification {
    pub enabled: bool,
    pub recipients: Vec<String>,
    pub on_success: NotifyPolicy,
    pub on_failure: NotifyPolicy,
}

impl Default for EmailNotification {
    fn default() -> Self {
        Self {
            enabled: true,
            recipients: Vec::new(),
            on_success: NotifyPolicy::Change,
            on_failure: NotifyPolicy::Always,
        }
    }
}

#[derive(Deserialize)]
struct DetailedEmail {
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default, deserialize_with = "scalar_list")]
    recipients: Vec<String>,
    #[serde(default)]
    on_success: Option<NotifyPolicy>,
    #[serde(default)]
    on_failure: Option<NotifyPolicy>,
}

impl TryFrom<Value> for EmailNotification {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let defaults = EmailNotification::default();
        match value {
            Value::Null => Ok(defaults),
            Value::Bool(enabled) => Ok(EmailNotification { enabled, ..defaults }),
            Value::String(_) | Value::Sequence(_) => Ok(EmailNotification {
                recipients: strings_from_value(value)?,
                ..defaults
            }),
            Value::Mapping(_) => {
                let detailed: DetailedEmail =
                    serde_yaml::from_value(value).map_err(|e| e.to_string())?;
                Ok(EmailNotification {
                    enabled: detailed.enabled.unwrap_or(true),
                    recipients: detailed.recipients,
                    on_success: detailed.on_success.unwrap_or(defaults.on_success),
                    on_failure: detailed.on_failure.unwrap_or(defaults.on_failure),
                })
            }
            other => Err(format!("invalid email notification setting: {:?}", other)),
        }
    }
}

/// Build matrix configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixConfig {
    /// Jobs added to the matrix
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<MatrixEntry>,

    /// Entries removed from the expanded top-level axes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<MatrixEntry>,

    /// Jobs whose failure does not fail the build
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_failures: Vec<MatrixEntry>,

    /// Stop starting jobs once the build is known to have failed
    #[serde(default, skip_serializing_if = "is_false")]
    pub fast_finish: bool,
}

/// One matrix entry; unset fields match anything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,

    #[serde(
        default,
        alias = "python-version",
        deserialize_with = "optional_scalar",
        skip_serializing_if = "Option::is_none"
    )]
    pub python: Option<String>,

    #[serde(
        default,
        deserialize_with = "optional_assignments",
        skip_serializing_if = "Option::is_none"
    )]
    pub env: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl MatrixEntry {
    pub fn is_unconstrained(&self) -> bool {
        self.os.is_none() && self.python.is_none() && self.env.is_none() && self.name.is_none()
    }
}

impl BuildConfig {
    /// Load build configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse build configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: BuildConfig =
            serde_yaml::from_str(yaml).context("Malformed build configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize back to YAML in normalized form
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize build configuration")
    }

    /// Validate the build configuration
    pub fn validate(&self) -> Result<()> {
        if self.script.is_empty() {
            anyhow::bail!("No `script` commands defined");
        }

        for phase in Phase::ALL {
            if let Some(index) = self.commands(phase).iter().position(|c| c.trim().is_empty()) {
                anyhow::bail!("Empty command at {}[{}]", phase, index);
            }
        }

        if let Some(email) = self.email() {
            for recipient in &email.recipients {
                if !EMAIL_PATTERN.is_match(recipient) {
                    anyhow::bail!("Invalid notification recipient: {}", recipient);
                }
            }
            if email.enabled && email.recipients.is_empty() {
                warn!("E-mail notifications are enabled but no recipients are listed");
            }
        }

        for assignment in self.env.global.iter().chain(self.env.jobs.iter()) {
            parse_assignments(assignment)
                .with_context(|| format!("Invalid env entry: {}", assignment))?;
        }

        if let Some(matrix) = &self.matrix {
            for entry in &matrix.include {
                if let Some(env) = &entry.env {
                    parse_assignments(env)
                        .with_context(|| format!("Invalid env in matrix.include: {}", env))?;
                }
            }
            if matrix.exclude.iter().any(MatrixEntry::is_unconstrained) {
                anyhow::bail!("matrix.exclude entry must name at least one of os, python, env, name");
            }
            if matrix.allow_failures.iter().any(MatrixEntry::is_unconstrained) {
                anyhow::bail!(
                    "matrix.allow_failures entry must name at least one of os, python, env, name"
                );
            }
        }

        if let Some(conda) = &self.conda {
            conda.validate()?;
        }

        if matrix::expand(self).is_empty() {
            anyhow::bail!("Build matrix is empty: matrix.exclude removes every job");
        }

        for key in self.extra.keys() {
            warn!("Ignoring unsupported configuration key `{}`", key);
        }

        Ok(())
    }

    /// Commands declared for a lifecycle phase, in document order
    pub fn commands(&self, phase: Phase) -> &[String] {
        match phase {
            Phase::BeforeInstall => &self.before_install,
            Phase::Install => &self.install,
            Phase::BeforeScript => &self.before_script,
            Phase::Script => &self.script,
            Phase::AfterSuccess => &self.after_success,
            Phase::AfterFailure => &self.after_failure,
            Phase::AfterScript => &self.after_script,
        }
    }

    /// E-mail notification settings, if any are declared
    pub fn email(&self) -> Option<&EmailNotification> {
        self.notifications.as_ref().and_then(|n| n.email.as_ref())
    }

    /// Convert config to a Build domain model
    pub fn to_build(&self, project: &str) -> Result<Build> {
        Build::from_config(self, project)
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn strings_from_value(value: Value) -> Result<Vec<String>, String> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Sequence(items) => items
            .iter()
            .map(|item| {
                scalar_to_string(item).ok_or_else(|| format!("expected a string, got {:?}", item))
            })
            .collect(),
        other => scalar_to_string(&other)
            .map(|s| vec![s])
            .ok_or_else(|| format!("expected a string or a list, got {:?}", other)),
    }
}

/// A string or a list of strings; numbers are kept as written (`3.6`)
fn scalar_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    strings_from_value(value).map_err(D::Error::custom)
}

fn optional_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Null => Ok(None),
        other => scalar_to_string(&other)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("expected a scalar, got {:?}", other))),
    }
}

fn optional_assignments<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let parts = strings_from_value(value).map_err(D::Error::custom)?;
    Ok(if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFERENCE: &str = include_str!("../../tests/fixtures/travis.yml");

    #[test]
    fn test_parse_reference_document() {
        let config = BuildConfig::from_yaml(REFERENCE).unwrap();

        let email = config.email().unwrap();
        assert_eq!(
            email.recipients,
            vec![
                "henrik.kjeldsberg@example.org".to_string(),
                "aslak.bergersen@example.org".to_string()
            ]
        );
        assert_eq!(email.on_success, NotifyPolicy::Never);
        assert_eq!(email.on_failure, NotifyPolicy::Always);

        let matrix = config.matrix.as_ref().unwrap();
        assert_eq!(matrix.include.len(), 1);
        assert_eq!(matrix.include[0].os.as_deref(), Some("linux"));
        assert_eq!(matrix.include[0].python.as_deref(), Some("3.6"));

        assert_eq!(config.install.len(), 9);
        assert!(config.install[0].starts_with("wget "));
        assert_eq!(config.install[3], "hash -r");
        assert_eq!(config.install[8], "source activate morphman");
        assert_eq!(config.script, vec!["cd test && pytest .".to_string()]);
    }

    #[test]
    fn test_round_trip_preserves_structure() {
        let config = BuildConfig::from_yaml(REFERENCE).unwrap();
        let yaml = config.to_yaml().unwrap();
        let reparsed = BuildConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config, reparsed);
    }

    #[test]
    fn test_python_version_alias_and_quoting() {
        let yaml = r#"
matrix:
  include:
    - os: linux
      python-version: "3.10"
script: pytest
"#;
        let config = BuildConfig::from_yaml(yaml).unwrap();
        let entry = &config.matrix.unwrap().include[0];
        assert_eq!(entry.python.as_deref(), Some("3.10"));
    }

    #[test]
    fn test_jobs_alias_for_matrix() {
        let yaml = r#"
jobs:
  include:
    - os: osx
script: make test
"#;
        let config = BuildConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.matrix.unwrap().include[0].os.as_deref(), Some("osx"));
    }

    #[test]
    fn test_single_string_commands() {
        let yaml = r#"
install: pip install -e .
script: pytest
"#;
        let config = BuildConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.install, vec!["pip install -e .".to_string()]);
        assert_eq!(config.commands(Phase::Script), &["pytest".to_string()]);
    }

    #[test]
    fn test_email_shorthand_forms() {
        let disabled = BuildConfig::from_yaml("notifications:\n  email: false\nscript: x\n").unwrap();
        assert!(!disabled.email().unwrap().enabled);

        let single = BuildConfig::from_yaml(
            "notifications:\n  email: dev@example.org\nscript: x\n",
        )
        .unwrap();
        let email = single.email().unwrap();
        assert!(email.enabled);
        assert_eq!(email.recipients, vec!["dev@example.org".to_string()]);
        assert_eq!(email.on_success, NotifyPolicy::Change);
        assert_eq!(email.on_failure, NotifyPolicy::Always);
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        let yaml = r#"
notifications:
  email:
    recipients: [dev@example.org]
    on_success: sometimes
script: x
"#;
        let err = BuildConfig::from_yaml(yaml).unwrap_err();
        assert!(format!("{:#}", err).contains("sometimes"));
    }

    #[test]
    fn test_invalid_recipient_fails() {
        let yaml = r#"
notifications:
  email:
    recipients: [not-an-address]
script: x
"#;
        assert!(BuildConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_missing_script_fails() {
        let yaml = "install:\n  - echo hi\n";
        let err = BuildConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("script"));
    }

    #[test]
    fn test_malformed_document_fails() {
        assert!(BuildConfig::from_yaml("script: [unterminated").is_err());
        assert!(BuildConfig::from_yaml("").is_err());
    }

    #[test]
    fn test_env_forms() {
        let yaml = r#"
env:
  global:
    - CFLAGS=-O2
  jobs:
    - BACKEND=vtk
    - BACKEND=itk
script: x
"#;
        let config = BuildConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.env.global, vec!["CFLAGS=-O2".to_string()]);
        assert_eq!(config.env.jobs.len(), 2);

        let list = BuildConfig::from_yaml("env:\n  - A=1\n  - A=2\nscript: x\n").unwrap();
        assert!(list.env.global.is_empty());
        assert_eq!(list.env.jobs, vec!["A=1".to_string(), "A=2".to_string()]);
    }

    #[test]
    fn test_invalid_env_fails() {
        assert!(BuildConfig::from_yaml("env: [\"not an assignment\"]\nscript: x\n").is_err());
    }

    #[test]
    fn test_unconstrained_exclude_fails() {
        let yaml = r#"
python: ["3.6", "3.7"]
matrix:
  exclude:
    - {}
script: x
"#;
        assert!(BuildConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_matrix_excluding_every_job_fails() {
        let yaml = r#"
os: [linux]
matrix:
  exclude:
    - os: linux
script: pytest
"#;
        let err = BuildConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("matrix is empty"));
    }

    #[test]
    fn test_unknown_keys_are_kept() {
        let yaml = "sudo: false\ncache: pip\nscript: x\n";
        let config = BuildConfig::from_yaml(yaml).unwrap();
        assert!(config.extra.contains_key("sudo"));
        assert!(config.extra.contains_key("cache"));

        let reparsed = BuildConfig::from_yaml(&config.to_yaml().unwrap()).unwrap();
        assert_eq!(config, reparsed);
    }
}
