//! dbt profile loading.
//!
//! Resolves `profiles.yml`, selects a profile and target, renders
//! `env_var()` templates and validates that the output is an Altertable one.

use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use std::fs;
use std::path::PathBuf;

use crate::credentials::{AltertableCredentials, ADAPTER_TYPE};
use crate::error::AdapterError;
use crate::template::ProfileRenderer;

/// File name dbt reads profiles from.
pub const PROFILES_FILE: &str = "profiles.yml";

/// File name of the dbt project definition.
pub const PROJECT_FILE: &str = "dbt_project.yml";

const DEFAULT_TARGET: &str = "default";

/// Non-credential keys of a profile output.
#[serde_as]
#[derive(Debug, Deserialize)]
struct OutputSettings {
    #[serde(rename = "type")]
    adapter_type: Option<String>,

    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(default)]
    threads: Option<usize>,

    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(default)]
    connect_retries: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct DbtProject {
    profile: Option<String>,
}

/// A resolved Altertable target.
#[derive(Debug, Clone)]
pub struct TargetConfig {
    /// Profile the target was read from.
    pub profile_name: String,

    /// Target name inside the profile.
    pub target_name: String,

    /// Number of dbt worker threads.
    pub threads: usize,

    /// Connection attempts after the first failure.
    pub connect_retries: u32,

    /// Connection credentials.
    pub credentials: AltertableCredentials,
}

/// Options for locating and selecting a profile.
#[derive(Debug, Clone, Default)]
pub struct ProfileLoader {
    profiles_dir: Option<PathBuf>,
    project_dir: Option<PathBuf>,
    profile: Option<String>,
    target: Option<String>,
}

impl ProfileLoader {
    /// Create a loader with dbt's default resolution rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read profiles.yml from this directory.
    pub fn with_profiles_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.profiles_dir = dir;
        self
    }

    /// Directory containing dbt_project.yml.
    pub fn with_project_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.project_dir = dir;
        self
    }

    /// Use this profile instead of the one named in dbt_project.yml.
    pub fn with_profile(mut self, profile: Option<String>) -> Self {
        self.profile = profile;
        self
    }

    /// Use this target instead of the profile's default.
    pub fn with_target(mut self, target: Option<String>) -> Self {
        self.target = target;
        self
    }

    fn project_dir(&self) -> PathBuf {
        self.project_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Directory the profiles file is read from.
    pub fn resolve_profiles_dir(&self) -> Result<PathBuf, AdapterError> {
        if let Some(ref dir) = self.profiles_dir {
            return Ok(dir.clone());
        }

        if let Ok(dir) = std::env::var("DBT_PROFILES_DIR") {
            if !dir.is_empty() {
                return Ok(PathBuf::from(dir));
            }
        }

        let project_dir = self.project_dir();
        if project_dir.join(PROFILES_FILE).is_file() {
            return Ok(project_dir);
        }

        let home = dirs::home_dir()
            .ok_or_else(|| AdapterError::Profile("Could not find home directory".to_string()))?;
        Ok(home.join(".dbt"))
    }

    /// Profile name to load.
    pub fn resolve_profile_name(&self) -> Result<String, AdapterError> {
        if let Some(ref profile) = self.profile {
            return Ok(profile.clone());
        }

        let project_file = self.project_dir().join(PROJECT_FILE);
        if project_file.is_file() {
            let content = fs::read_to_string(&project_file)?;
            let project: DbtProject = serde_yaml::from_str(&content)?;
            if let Some(profile) = project.profile {
                return Ok(profile);
            }
        }

        Err(AdapterError::Profile(format!(
            "No profile specified and no 'profile' key found in {}",
            project_file.display()
        )))
    }

    /// Load the target using the process environment for `env_var()`.
    pub fn load(&self) -> Result<TargetConfig, AdapterError> {
        self.load_with(&ProfileRenderer::new())
    }

    /// Load the target with a specific renderer.
    pub fn load_with(&self, renderer: &ProfileRenderer) -> Result<TargetConfig, AdapterError> {
        let path = self.resolve_profiles_dir()?.join(PROFILES_FILE);
        if !path.is_file() {
            return Err(AdapterError::Profile(format!(
                "Could not find profiles.yml at {}",
                path.display()
            )));
        }

        let profile_name = self.resolve_profile_name()?;
        let content = fs::read_to_string(&path)?;

        tracing::debug!(path = %path.display(), profile = %profile_name, "Loading dbt profile");

        parse_profiles(&content, &profile_name, self.target.as_deref(), renderer)
    }
}

/// Parse a profiles.yml document and resolve one target.
pub fn parse_profiles(
    content: &str,
    profile_name: &str,
    target: Option<&str>,
    renderer: &ProfileRenderer,
) -> Result<TargetConfig, AdapterError> {
    let profiles: serde_json::Value = serde_yaml::from_str(content)?;

    let profile = profiles
        .get(profile_name)
        .filter(|_| profile_name != "config")
        .ok_or_else(|| {
            AdapterError::Profile(format!("Profile '{}' not found in profiles.yml", profile_name))
        })?;

    let target_name = match target {
        Some(t) => t.to_string(),
        None => match profile.get("target") {
            Some(t) => renderer
                .render_value(t)?
                .as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| {
                    AdapterError::Profile(format!("Profile '{}' has a non-string target", profile_name))
                })?,
            None => DEFAULT_TARGET.to_string(),
        },
    };

    let output = profile
        .get("outputs")
        .and_then(|outputs| outputs.get(&target_name))
        .ok_or_else(|| {
            AdapterError::Profile(format!(
                "Target '{}' not found in profile '{}'",
                target_name, profile_name
            ))
        })?;

    let rendered = renderer.render_value(output)?;

    let settings: OutputSettings = serde_json::from_value(rendered.clone())
        .map_err(|e| AdapterError::Configuration(format!("Invalid target '{}': {}", target_name, e)))?;

    match settings.adapter_type.as_deref() {
        Some(ADAPTER_TYPE) => {}
        Some(other) => {
            return Err(AdapterError::Configuration(format!(
                "Target '{}' has type '{}', expected '{}'",
                target_name, other, ADAPTER_TYPE
            )))
        }
        None => {
            return Err(AdapterError::Configuration(format!(
                "Target '{}' is missing required field 'type'",
                target_name
            )))
        }
    }

    let credentials = AltertableCredentials::from_value(rendered)?;

    Ok(TargetConfig {
        profile_name: profile_name.to_string(),
        target_name,
        threads: settings.threads.unwrap_or(1).max(1),
        connect_retries: settings.connect_retries.unwrap_or(1),
        credentials,
    })
}
