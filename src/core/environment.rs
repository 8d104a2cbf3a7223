//! Job environment - explicit HOME, PATH and variables handed to commands

use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// One `KEY=VALUE` assignment; the value may be double- or single-quoted
static ASSIGNMENT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*([A-Za-z_][A-Za-z0-9_]*)=("(?:[^"\\]|\\.)*"|'[^']*'|[^\s"']*)"#)
        .expect("assignment pattern is valid")
});

/// Environment a job's commands run in
///
/// Nothing here is read from the process environment after construction;
/// the base `PATH` is captured once by the caller and passed in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvironment {
    /// Value of `HOME` for the job
    pub home: PathBuf,

    /// Working directory (repository root)
    pub build_dir: PathBuf,

    /// `PATH` the job starts from
    pub base_path: String,

    /// Directories prepended to `PATH`, first entry wins
    path_prefixes: Vec<PathBuf>,

    /// Variables in assignment order; later entries override earlier ones
    variables: Vec<(String, String)>,
}

impl JobEnvironment {
    /// Create a new job environment
    pub fn new(home: impl Into<PathBuf>, build_dir: impl Into<PathBuf>, base_path: impl Into<String>) -> Self {
        Self {
            home: home.into(),
            build_dir: build_dir.into(),
            base_path: base_path.into(),
            path_prefixes: Vec::new(),
            variables: Vec::new(),
        }
    }

    /// Put a directory in front of everything currently on `PATH`
    pub fn prepend_path(&mut self, dir: impl Into<PathBuf>) {
        self.path_prefixes.insert(0, dir.into());
    }

    /// Set a variable
    pub fn set_var(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.variables.retain(|(k, _)| *k != key);
        self.variables.push((key, value.into()));
    }

    /// Get a variable
    pub fn var(&self, key: &str) -> Option<&str> {
        self.variables
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Composed `PATH` value
    pub fn path(&self) -> String {
        let mut parts: Vec<String> = self
            .path_prefixes
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        if !self.base_path.is_empty() {
            parts.push(self.base_path.clone());
        }
        parts.join(":")
    }

    /// Home-relative path
    pub fn home_join(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.home.join(relative)
    }

    /// All variables to export, including `HOME` and `PATH`
    pub fn exported(&self) -> Vec<(String, String)> {
        let mut vars = self.variables.clone();
        vars.retain(|(k, _)| k != "HOME" && k != "PATH");
        vars.push(("HOME".to_string(), self.home.display().to_string()));
        vars.push(("PATH".to_string(), self.path()));
        vars
    }
}

/// Parse a Travis env entry such as `FOO=1 BAR="two words"`
///
/// Quotes around values are removed. Anything that is not a sequence of
/// assignments is an error.
pub fn parse_assignments(entry: &str) -> Result<Vec<(String, String)>> {
    let mut rest = entry;
    let mut result = Vec::new();

    while !rest.trim().is_empty() {
        let captures = match ASSIGNMENT_PATTERN.captures(rest) {
            Some(c) => c,
            None => anyhow::bail!("expected KEY=VALUE, found `{}`", rest.trim()),
        };
        let whole = captures.get(0).map(|m| m.end()).unwrap_or(rest.len());
        let key = captures[1].to_string();
        let value = unquote(&captures[2]);
        result.push((key, value));

        rest = &rest[whole..];
        if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
            anyhow::bail!("unexpected text after assignment: `{}`", rest.trim());
        }
    }

    if result.is_empty() {
        anyhow::bail!("no assignments found");
    }
    Ok(result)
}

fn unquote(raw: &str) -> String {
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        raw[1..raw.len() - 1].replace("\\\"", "\"")
    } else if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        raw[1..raw.len() - 1].to_string()
    } else {
        raw.to_string()
    }
}

/// Single-quote a value for the shell
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+=:@".contains(c))
    {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_composition() {
        let mut env = JobEnvironment::new("/home/ci", "/src", "/usr/bin:/bin");
        env.prepend_path("/home/ci/miniconda/bin");
        env.prepend_path("/home/ci/miniconda/envs/test/bin");

        assert_eq!(
            env.path(),
            "/home/ci/miniconda/envs/test/bin:/home/ci/miniconda/bin:/usr/bin:/bin"
        );
    }

    #[test]
    fn test_exported_overrides_home_and_path() {
        let mut env = JobEnvironment::new("/home/ci", "/src", "/bin");
        env.set_var("HOME", "/elsewhere");
        env.set_var("FOO", "1");
        env.set_var("FOO", "2");

        let vars = env.exported();
        assert!(vars.contains(&("HOME".to_string(), "/home/ci".to_string())));
        assert!(vars.contains(&("PATH".to_string(), "/bin".to_string())));
        assert_eq!(vars.iter().filter(|(k, _)| k == "FOO").count(), 1);
        assert_eq!(env.var("FOO"), Some("2"));
    }

    #[test]
    fn test_parse_assignments() {
        let vars = parse_assignments(r#"FOO=1 BAR="two words" BAZ='x y' EMPTY="#).unwrap();
        assert_eq!(
            vars,
            vec![
                ("FOO".to_string(), "1".to_string()),
                ("BAR".to_string(), "two words".to_string()),
                ("BAZ".to_string(), "x y".to_string()),
                ("EMPTY".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_parse_assignments_rejects_garbage() {
        assert!(parse_assignments("not an assignment").is_err());
        assert!(parse_assignments("FOO=1 bar").is_err());
        assert!(parse_assignments("   ").is_err());
    }

    #[test]
    fn test_parse_assignments_from_many_threads() {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                std::thread::spawn(move || {
                    (0..200)
                        .map(|n| parse_assignments(&format!("JOB={} N={}", i, n)).unwrap())
                        .count()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 200);
        }
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/home/ci/miniconda"), "/home/ci/miniconda");
        assert_eq!(shell_quote("with space"), "'with space'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
