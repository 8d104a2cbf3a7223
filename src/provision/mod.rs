//! Conda environment provisioning
//!
//! Turns the `conda` section of a build configuration into the shell
//! commands that install Miniconda under the job's home directory, create a
//! named environment with the requested interpreter and packages, and
//! activate it. The plan also says which directories must be put on `PATH`.

use crate::core::environment::{shell_quote, JobEnvironment};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

const INSTALLER_BASE_URL: &str = "https://repo.anaconda.com/miniconda";

/// Error types for provisioning
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("No Miniconda installer known for os `{0}`; set conda.installer_url")]
    UnsupportedOs(String),

    #[error("Invalid package spec `{0}`")]
    InvalidPackage(String),

    #[error("Invalid conda environment name `{0}`")]
    InvalidEnvironment(String),
}

/// Conda section of the build configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CondaConfig {
    /// Name of the environment to create
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Channels added before the environment is created
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<String>,

    /// Packages, written `name`, `name=version` or `channel::name`
    #[serde(default)]
    pub packages: Vec<String>,

    /// Installer location; picked from the job's os when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installer_url: Option<String>,

    /// Installation directory relative to HOME
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Run `conda update conda` after installing
    #[serde(default = "default_update")]
    pub update: bool,
}

fn default_environment() -> String {
    "test-environment".to_string()
}

fn default_prefix() -> String {
    "miniconda".to_string()
}

fn default_update() -> bool {
    true
}

impl CondaConfig {
    /// Check names and package specs
    pub fn validate(&self) -> Result<(), ProvisionError> {
        if self.environment.is_empty()
            || !self
                .environment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "._-".contains(c))
        {
            return Err(ProvisionError::InvalidEnvironment(self.environment.clone()));
        }
        for package in &self.packages {
            PackageSpec::parse(package)?;
        }
        Ok(())
    }

    /// Parsed package list
    pub fn package_specs(&self) -> Result<Vec<PackageSpec>, ProvisionError> {
        self.packages.iter().map(|p| PackageSpec::parse(p)).collect()
    }
}

/// A package to install, optionally pinned to a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    pub name: String,
    pub channel: Option<String>,
}

impl PackageSpec {
    /// Parse `name` or `channel::name`
    pub fn parse(spec: &str) -> Result<Self, ProvisionError> {
        let invalid = || ProvisionError::InvalidPackage(spec.to_string());
        let spec_trimmed = spec.trim();
        if spec_trimmed.is_empty() || spec_trimmed.contains(char::is_whitespace) {
            return Err(invalid());
        }

        match spec_trimmed.split_once("::") {
            Some((channel, name)) => {
                if channel.is_empty() || name.is_empty() || name.contains("::") {
                    return Err(invalid());
                }
                Ok(Self {
                    name: name.to_string(),
                    channel: Some(channel.to_string()),
                })
            }
            None => Ok(Self {
                name: spec_trimmed.to_string(),
                channel: None,
            }),
        }
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.channel {
            Some(channel) => write!(f, "{}::{}", channel, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Commands and PATH changes that provision one job
#[derive(Debug, Clone)]
pub struct ProvisionPlan {
    /// Miniconda installation directory
    pub prefix: PathBuf,

    /// Name of the created environment
    pub environment: String,

    /// Shell commands, run in order at the start of the install phase
    pub commands: Vec<String>,

    /// Directories to prepend to PATH, highest priority first
    pub bin_dirs: Vec<PathBuf>,
}

impl ProvisionPlan {
    /// Put the plan's bin directories on the job's PATH
    pub fn apply_path(&self, env: &mut JobEnvironment) {
        for dir in self.bin_dirs.iter().rev() {
            env.prepend_path(dir.clone());
        }
    }
}

/// Builds provisioning plans from a conda configuration
#[derive(Debug, Clone)]
pub struct Provisioner<'a> {
    config: &'a CondaConfig,
}

impl<'a> Provisioner<'a> {
    pub fn new(config: &'a CondaConfig) -> Self {
        Self { config }
    }

    /// Plan the provisioning of one job
    pub fn plan(
        &self,
        os: &str,
        python: Option<&str>,
        env: &JobEnvironment,
    ) -> Result<ProvisionPlan, ProvisionError> {
        self.config.validate()?;

        let installer_url = match &self.config.installer_url {
            Some(url) => url.clone(),
            None => installer_url_for(os)?,
        };

        let prefix = env.home_join(&self.config.prefix);
        let installer = env.home_join("miniconda.sh");
        let conda_bin = prefix.join("bin");
        let env_name = &self.config.environment;

        let prefix_q = shell_quote(&prefix.display().to_string());
        let installer_q = shell_quote(&installer.display().to_string());
        let conda_q = shell_quote(&conda_bin.join("conda").display().to_string());

        let mut commands = vec![
            format!(
                "[ -x {conda} ] || wget -q {url} -O {installer}",
                conda = conda_q,
                url = shell_quote(&installer_url),
                installer = installer_q
            ),
            format!(
                "[ -x {conda} ] || bash {installer} -b -p {prefix}",
                conda = conda_q,
                installer = installer_q,
                prefix = prefix_q
            ),
            "hash -r".to_string(),
            "conda config --set always_yes yes --set changeps1 no".to_string(),
        ];

        if self.config.update {
            commands.push("conda update -q conda".to_string());
        }

        for channel in &self.config.channels {
            commands.push(format!("conda config --add channels {}", shell_quote(channel)));
        }

        let mut create = format!("conda create -q -n {}", shell_quote(env_name));
        if let Some(python) = python {
            create.push_str(&format!(" python={}", shell_quote(python)));
        }
        for package in self.config.package_specs()? {
            create.push(' ');
            create.push_str(&shell_quote(&package.to_string()));
        }
        commands.push(create);

        commands.push(format!(
            ". {} {}",
            shell_quote(&conda_bin.join("activate").display().to_string()),
            shell_quote(env_name)
        ));

        debug!(
            "Provisioning plan for {} ({} commands) under {}",
            env_name,
            commands.len(),
            prefix.display()
        );

        Ok(ProvisionPlan {
            bin_dirs: vec![prefix.join("envs").join(env_name).join("bin"), conda_bin],
            prefix,
            environment: env_name.clone(),
            commands,
        })
    }
}

/// Default Miniconda installer URL for an operating system
pub fn installer_url_for(os: &str) -> Result<String, ProvisionError> {
    let file = match os {
        "linux" => "Miniconda3-latest-Linux-x86_64.sh",
        "osx" => "Miniconda3-latest-MacOSX-x86_64.sh",
        other => return Err(ProvisionError::UnsupportedOs(other.to_string())),
    };
    Ok(format!("{}/{}", INSTALLER_BASE_URL, file))
}
