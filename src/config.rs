//! Workspace configuration, loaded from `.agora/config.yaml`.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::entity::{ContentKind, TeamId};
use crate::error::{AgoraError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub policy: LifecyclePolicy,

    #[serde(default)]
    pub limits: ContentLimits,

    #[serde(default)]
    pub moderation: ModerationConfig,

    /// Members of this team hold the global verifier role
    #[serde(default = "default_verifier_team")]
    pub verifier_team: TeamId,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            policy: LifecyclePolicy::default(),
            limits: ContentLimits::default(),
            moderation: ModerationConfig::default(),
            verifier_team: default_verifier_team(),
        }
    }
}

/// Moderation switch, threaded into the lifecycle machine as a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecyclePolicy {
    /// true: drafts go to peer review. false: drafts publish immediately.
    #[serde(default = "default_true")]
    pub polite_mode: bool,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self { polite_mode: true }
    }
}

impl LifecyclePolicy {
    pub fn polite() -> Self {
        Self { polite_mode: true }
    }

    pub fn auto_accept() -> Self {
        Self { polite_mode: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LengthBounds {
    pub min: usize,
    pub max: usize,
}

impl LengthBounds {
    pub const fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }
}

/// Per-kind bounds, counted in characters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KindLimits {
    /// `None` for kinds that carry no title
    #[serde(default)]
    pub title: Option<LengthBounds>,
    pub body: LengthBounds,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentLimits {
    #[serde(default = "default_initiative_limits")]
    pub initiative: KindLimits,

    #[serde(default = "default_workstream_limits")]
    pub workstream: KindLimits,

    #[serde(default = "default_discussion_limits")]
    pub discussion: KindLimits,

    #[serde(default = "default_response_limits")]
    pub response: KindLimits,

    #[serde(default = "default_supplement_min")]
    pub supplement_min: usize,

    #[serde(default = "default_supplement_max_total")]
    pub supplement_max_total: usize,

    #[serde(default = "default_max_invited_teams")]
    pub max_invited_teams: usize,
}

impl Default for ContentLimits {
    fn default() -> Self {
        Self {
            initiative: default_initiative_limits(),
            workstream: default_workstream_limits(),
            discussion: default_discussion_limits(),
            response: default_response_limits(),
            supplement_min: default_supplement_min(),
            supplement_max_total: default_supplement_max_total(),
            max_invited_teams: default_max_invited_teams(),
        }
    }
}

impl ContentLimits {
    pub fn for_kind(&self, kind: ContentKind) -> &KindLimits {
        match kind {
            ContentKind::Initiative => &self.initiative,
            ContentKind::Workstream => &self.workstream,
            ContentKind::Discussion => &self.discussion,
            ContentKind::Response => &self.response,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectorStrategy {
    #[default]
    Uniform,
    PresenceWeighted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationConfig {
    #[serde(default)]
    pub selector: SelectorStrategy,

    /// Window used by the presence-weighted selector
    #[serde(default = "default_presence_window_minutes")]
    pub presence_window_minutes: i64,

    /// Fixes the reviewer draw so runs can be replayed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            selector: SelectorStrategy::default(),
            presence_window_minutes: default_presence_window_minutes(),
            seed: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Missing file means defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        for kind in ContentKind::ALL {
            let limits = self.limits.for_kind(kind);
            if limits.body.min > limits.body.max {
                return Err(AgoraError::Config(format!(
                    "{} body bounds are inverted ({} > {})",
                    kind, limits.body.min, limits.body.max
                )));
            }
            if let Some(title) = limits.title {
                if !kind.has_title() {
                    return Err(AgoraError::Config(format!("{} carries no title", kind)));
                }
                if title.min > title.max {
                    return Err(AgoraError::Config(format!(
                        "{} title bounds are inverted ({} > {})",
                        kind, title.min, title.max
                    )));
                }
            }
        }
        if self.limits.supplement_min > self.limits.supplement_max_total {
            return Err(AgoraError::Config(
                "supplement_min exceeds supplement_max_total".to_string(),
            ));
        }
        if self.verifier_team.0 <= 0 {
            return Err(AgoraError::Config(
                "verifier_team must be a positive team id".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_verifier_team() -> TeamId {
    TeamId(1)
}

fn default_initiative_limits() -> KindLimits {
    KindLimits {
        title: Some(LengthBounds::new(2, 36)),
        body: LengthBounds::new(17, 456),
    }
}

fn default_workstream_limits() -> KindLimits {
    KindLimits {
        title: Some(LengthBounds::new(2, 36)),
        body: LengthBounds::new(17, 456),
    }
}

fn default_discussion_limits() -> KindLimits {
    KindLimits {
        title: Some(LengthBounds::new(2, 42)),
        body: LengthBounds::new(17, 456),
    }
}

fn default_response_limits() -> KindLimits {
    KindLimits {
        title: None,
        body: LengthBounds::new(17, 456),
    }
}

fn default_supplement_min() -> usize {
    17
}

fn default_supplement_max_total() -> usize {
    4567
}

fn default_max_invited_teams() -> usize {
    24
}

fn default_presence_window_minutes() -> i64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.policy.polite_mode);
        assert_eq!(config.verifier_team, TeamId(1));
        assert_eq!(config.limits.initiative.title, Some(LengthBounds::new(2, 36)));
        assert!(config.limits.response.title.is_none());
        assert_eq!(config.moderation.selector, SelectorStrategy::Uniform);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = "policy:\n  polite_mode: false\nlimits:\n  max_invited_teams: 3\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(!config.policy.polite_mode);
        assert_eq!(config.limits.max_invited_teams, 3);
        assert_eq!(config.limits.supplement_min, 17);
        assert_eq!(config.verifier_team, TeamId(1));
    }

    #[test]
    fn test_save_and_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");

        let mut config = Config::default();
        config.moderation.selector = SelectorStrategy::PresenceWeighted;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.moderation.selector, SelectorStrategy::PresenceWeighted);
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        fs::write(
            &path,
            "limits:\n  response:\n    body:\n      min: 50\n      max: 10\n",
        )
        .unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, AgoraError::Config(_)));
    }

    #[test]
    fn test_title_bounds_for_untitled_kind_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        fs::write(
            &path,
            "limits:\n  response:\n    title:\n      min: 1\n      max: 9\n    body:\n      min: 1\n      max: 90\n",
        )
        .unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("carries no title"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = Config::load_or_default(&tmp.path().join("absent.yaml")).unwrap();
        assert!(config.policy.polite_mode);
    }
}
