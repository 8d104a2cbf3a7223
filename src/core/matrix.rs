//! Build matrix expansion

use crate::core::config::{BuildConfig, MatrixEntry};
use crate::core::environment::parse_assignments;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Operating system used when neither the job nor the document names one
pub const DEFAULT_OS: &str = "linux";

/// One concrete job of the expanded matrix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub os: String,
    pub python: Option<String>,
    /// Raw env row, e.g. `BACKEND=vtk DEBUG=1`
    pub env: Option<String>,
    pub name: Option<String>,
    /// Failure of this job does not fail the build
    pub allow_failure: bool,
}

impl JobSpec {
    fn new(os: Option<&str>, python: Option<&str>, env: Option<&str>) -> Self {
        Self {
            os: os.unwrap_or(DEFAULT_OS).to_string(),
            python: python.map(str::to_string),
            env: env.map(str::to_string),
            name: None,
            allow_failure: false,
        }
    }

    /// Job-specific variables from the env row
    pub fn variables(&self) -> Result<Vec<(String, String)>> {
        match &self.env {
            Some(env) => parse_assignments(env),
            None => Ok(Vec::new()),
        }
    }

    /// Human-readable description
    pub fn label(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        let mut parts = vec![self.os.clone()];
        if let Some(python) = &self.python {
            parts.push(format!("python {}", python));
        }
        if let Some(env) = &self.env {
            parts.push(env.clone());
        }
        parts.join(" / ")
    }

    /// Whether every field the entry sets equals this job's value
    pub fn matches(&self, entry: &MatrixEntry) -> bool {
        entry.os.as_ref().map_or(true, |os| *os == self.os)
            && entry
                .python
                .as_ref()
                .map_or(true, |py| self.python.as_ref() == Some(py))
            && entry
                .env
                .as_ref()
                .map_or(true, |env| self.env.as_ref() == Some(env))
            && entry
                .name
                .as_ref()
                .map_or(true, |name| self.name.as_ref() == Some(name))
    }
}

/// Expand the document's axes and `matrix` section into concrete jobs
///
/// Top-level `os` × `python` × `env.jobs` form the base matrix, minus
/// `exclude`. `include` entries are appended in order and inherit the first
/// top-level value for fields they leave unset. With no axes and a non-empty
/// `include`, the base matrix is empty.
pub fn expand(config: &BuildConfig) -> Vec<JobSpec> {
    let matrix = config.matrix.clone().unwrap_or_default();
    let has_axes =
        !config.os.is_empty() || !config.python.is_empty() || !config.env.jobs.is_empty();

    let mut jobs = Vec::new();

    if has_axes || matrix.include.is_empty() {
        let oses = axis(&config.os);
        let pythons = axis(&config.python);
        let envs = axis(&config.env.jobs);

        for os in &oses {
            for python in &pythons {
                for env in &envs {
                    let job = JobSpec::new(*os, *python, *env);
                    if !matrix.exclude.iter().any(|entry| job.matches(entry)) {
                        jobs.push(job);
                    }
                }
            }
        }
    }

    for entry in &matrix.include {
        let mut job = JobSpec::new(
            entry.os.as_deref().or(config.os.first().map(String::as_str)),
            entry
                .python
                .as_deref()
                .or(config.python.first().map(String::as_str)),
            entry.env.as_deref(),
        );
        job.name = entry.name.clone();
        jobs.push(job);
    }

    for job in &mut jobs {
        job.allow_failure = matrix.allow_failures.iter().any(|entry| job.matches(entry));
    }

    jobs
}

fn axis(values: &[String]) -> Vec<Option<&str>> {
    if values.is_empty() {
        vec![None]
    } else {
        values.iter().map(|v| Some(v.as_str())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jobs(yaml: &str) -> Vec<JobSpec> {
        expand(&BuildConfig::from_yaml(yaml).unwrap())
    }

    #[test]
    fn test_single_include_entry() {
        let jobs = jobs(include_str!("../../tests/fixtures/travis.yml"));
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].os, "linux");
        assert_eq!(jobs[0].python.as_deref(), Some("3.6"));
        assert!(!jobs[0].allow_failure);
    }

    #[test]
    fn test_no_axes_yields_default_job() {
        let jobs = jobs("script: make test\n");
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].os, DEFAULT_OS);
        assert_eq!(jobs[0].python, None);
    }

    #[test]
    fn test_cartesian_product_with_exclude() {
        let yaml = r#"
os: [linux, osx]
python: ["3.6", "3.7"]
matrix:
  exclude:
    - os: osx
      python: "3.6"
script: pytest
"#;
        let jobs = jobs(yaml);
        let labels: Vec<_> = jobs.iter().map(JobSpec::label).collect();
        assert_eq!(
            labels,
            vec![
                "linux / python 3.6".to_string(),
                "linux / python 3.7".to_string(),
                "osx / python 3.7".to_string(),
            ]
        );
    }

    #[test]
    fn test_include_inherits_top_level_values() {
        let yaml = r#"
python: "3.6"
matrix:
  include:
    - os: osx
      env: BACKEND=vtk
script: pytest
"#;
        let jobs = jobs(yaml);
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[1].os, "osx");
        assert_eq!(jobs[1].python.as_deref(), Some("3.6"));
        assert_eq!(
            jobs[1].variables().unwrap(),
            vec![("BACKEND".to_string(), "vtk".to_string())]
        );
    }

    #[test]
    fn test_env_axis_and_allow_failures() {
        let yaml = r#"
env:
  - BACKEND=vtk
  - BACKEND=itk
matrix:
  allow_failures:
    - env: BACKEND=itk
script: pytest
"#;
        let jobs = jobs(yaml);
        assert_eq!(jobs.len(), 2);
        assert!(!jobs[0].allow_failure);
        assert!(jobs[1].allow_failure);
    }

    #[test]
    fn test_named_include_label() {
        let yaml = r#"
matrix:
  include:
    - name: "Nightly VMTK"
      python: "3.6"
script: pytest
"#;
        let jobs = jobs(yaml);
        assert_eq!(jobs[0].label(), "Nightly VMTK");
    }
}
