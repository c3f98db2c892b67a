use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, TelemetryError};
use crate::types::AgentIdentity;

/// A session log on disk with its modification time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFile {
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
}

/// Maps agent identities onto workspace and session directories under one root.
///
/// Every path handed out has been canonicalized and checked to sit inside the
/// canonical root. Candidates that escape it, through `..` segments or
/// symlinks, are dropped as if they did not exist.
#[derive(Debug, Clone)]
pub struct Locator {
    root: PathBuf,
    orchestrator_aliases: Vec<String>,
}

impl Locator {
    pub fn new(root: impl Into<PathBuf>, orchestrator_aliases: Vec<String>) -> Self {
        Self {
            root: root.into(),
            orchestrator_aliases,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Workspace directories to try, most specific first.
    pub fn workspace_candidates(&self, identity: &AgentIdentity) -> Vec<PathBuf> {
        let mut names = vec![identity.id.as_str()];
        if identity.display_name != identity.id {
            names.push(identity.display_name.as_str());
        }
        names.extend(identity.legacy_aliases.iter().map(String::as_str));

        let mut seen = HashSet::new();
        let mut candidates: Vec<PathBuf> = names
            .into_iter()
            .filter(|name| !name.is_empty() && seen.insert(*name))
            .map(|name| self.root.join(format!("workspace-{}", name)))
            .collect();

        if identity.is_orchestrator {
            candidates.push(self.root.join("workspace"));
        }
        candidates
    }

    pub fn resolve_workspace(&self, identity: &AgentIdentity) -> Option<PathBuf> {
        let root = self.canonical_root()?;
        self.workspace_candidates(identity)
            .into_iter()
            .find_map(|candidate| contained_dir(&root, &candidate))
    }

    /// Directory names under `root/agents/` that may hold this agent's sessions.
    pub fn session_dir_names(&self, identity: &AgentIdentity) -> Vec<String> {
        let mut names = vec![identity.id.clone(), identity.display_name.clone()];
        names.extend(identity.legacy_aliases.iter().cloned());
        if identity.is_orchestrator {
            names.extend(self.orchestrator_aliases.iter().cloned());
        }

        let mut seen = HashSet::new();
        names.retain(|name| !name.is_empty() && seen.insert(name.clone()));
        names
    }

    /// All `.jsonl` session files for the identity, newest first.
    pub fn session_files(&self, identity: &AgentIdentity) -> Vec<SessionFile> {
        let Some(root) = self.canonical_root() else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut files = Vec::new();

        for name in self.session_dir_names(identity) {
            let dir = self.root.join("agents").join(&name).join("sessions");
            let Some(dir) = contained_dir(&root, &dir) else {
                continue;
            };
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    log::debug!("Cannot list {}: {}", dir.display(), e);
                    continue;
                }
            };

            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                    continue;
                }
                let Ok(canonical) = fs::canonicalize(&path) else {
                    continue;
                };
                if !canonical.starts_with(&root) || !seen.insert(canonical.clone()) {
                    continue;
                }
                let Ok(meta) = fs::metadata(&canonical) else {
                    continue;
                };
                if !meta.is_file() {
                    continue;
                }
                let Ok(modified) = meta.modified() else {
                    continue;
                };
                files.push(SessionFile {
                    path: canonical,
                    modified: DateTime::<Utc>::from(modified),
                });
            }
        }

        files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.path.cmp(&b.path)));
        files
    }

    pub fn latest_session(&self, identity: &AgentIdentity) -> Option<SessionFile> {
        self.session_files(identity).into_iter().next()
    }

    pub fn sessions_modified_since(
        &self,
        identity: &AgentIdentity,
        cutoff: DateTime<Utc>,
    ) -> Vec<SessionFile> {
        self.session_files(identity)
            .into_iter()
            .filter(|f| f.modified >= cutoff)
            .collect()
    }

    /// Workspace to drop control signals into. Falls back to creating
    /// `root/workspace-<id>` when no candidate exists yet.
    pub fn signal_workspace(&self, identity: &AgentIdentity) -> Result<PathBuf> {
        if let Some(found) = self.resolve_workspace(identity) {
            return Ok(found);
        }

        let name = format!("workspace-{}", identity.id);
        let target = self.root.join(&name);
        if Path::new(&name).components().count() != 1 {
            return Err(TelemetryError::PathTraversal(target));
        }
        fs::create_dir_all(&target)?;

        let root = fs::canonicalize(&self.root)?;
        let canonical = fs::canonicalize(&target)?;
        if !canonical.starts_with(&root) {
            return Err(TelemetryError::PathTraversal(target));
        }
        Ok(canonical)
    }

    fn canonical_root(&self) -> Option<PathBuf> {
        fs::canonicalize(&self.root).ok()
    }
}

fn contained_dir(root: &Path, candidate: &Path) -> Option<PathBuf> {
    let canonical = fs::canonicalize(candidate).ok()?;
    if !canonical.starts_with(root) {
        log::warn!("Rejected path outside root: {}", candidate.display());
        return None;
    }
    canonical.is_dir().then_some(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn locator(dir: &TempDir) -> Locator {
        Locator::new(
            dir.path(),
            vec!["main".to_string(), "thunder".to_string()],
        )
    }

    fn touch(path: &Path, age: Duration) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "{}\n").unwrap();
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[test]
    fn test_workspace_candidates_order() {
        let dir = TempDir::new().unwrap();
        let identity = AgentIdentity::new("forge", "Forge")
            .with_aliases(vec!["smith".to_string()])
            .orchestrator();

        let names: Vec<_> = locator(&dir)
            .workspace_candidates(&identity)
            .into_iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();

        assert_eq!(
            names,
            vec!["workspace-forge", "workspace-Forge", "workspace-smith", "workspace"]
        );
    }

    #[test]
    fn test_resolve_workspace_prefers_first_existing() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("workspace-smith")).unwrap();
        let identity = AgentIdentity::new("forge", "Forge").with_aliases(vec!["smith".to_string()]);

        let found = locator(&dir).resolve_workspace(&identity).unwrap();
        assert!(found.ends_with("workspace-smith"));

        fs::create_dir_all(dir.path().join("workspace-forge")).unwrap();
        let found = locator(&dir).resolve_workspace(&identity).unwrap();
        assert!(found.ends_with("workspace-forge"));
    }

    #[test]
    fn test_resolve_workspace_rejects_traversal() {
        let outer = TempDir::new().unwrap();
        let root = outer.path().join("root");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(outer.path().join("escape")).unwrap();
        fs::create_dir_all(root.join("workspace-x")).unwrap();

        let identity = AgentIdentity::new("ghost", "ghost")
            .with_aliases(vec!["x/../../escape".to_string()]);
        let locator = Locator::new(&root, vec![]);

        assert!(locator.resolve_workspace(&identity).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_out_of_root_is_rejected() {
        let outer = TempDir::new().unwrap();
        let root = outer.path().join("root");
        let elsewhere = outer.path().join("elsewhere");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(elsewhere.join("sessions")).unwrap();
        fs::write(elsewhere.join("sessions/leak.jsonl"), "{}\n").unwrap();
        fs::create_dir_all(root.join("agents")).unwrap();
        std::os::unix::fs::symlink(&elsewhere, root.join("agents/spy")).unwrap();
        std::os::unix::fs::symlink(&elsewhere, root.join("workspace-spy")).unwrap();

        let identity = AgentIdentity::bare("spy");
        let locator = Locator::new(&root, vec![]);

        assert!(locator.resolve_workspace(&identity).is_none());
        assert!(locator.session_files(&identity).is_empty());
    }

    #[test]
    fn test_latest_session_across_aliases() {
        let dir = TempDir::new().unwrap();
        touch(
            &dir.path().join("agents/forge/sessions/a.jsonl"),
            Duration::from_secs(3600),
        );
        touch(
            &dir.path().join("agents/smith/sessions/b.jsonl"),
            Duration::from_secs(60),
        );
        touch(
            &dir.path().join("agents/smith/sessions/notes.txt"),
            Duration::from_secs(0),
        );

        let identity = AgentIdentity::new("forge", "Forge").with_aliases(vec!["smith".to_string()]);
        let locator = locator(&dir);

        assert_eq!(locator.session_files(&identity).len(), 2);
        let latest = locator.latest_session(&identity).unwrap();
        assert!(latest.path.ends_with("b.jsonl"));
    }

    #[test]
    fn test_orchestrator_synonyms_searched_once() {
        let dir = TempDir::new().unwrap();
        touch(
            &dir.path().join("agents/main/sessions/s.jsonl"),
            Duration::from_secs(10),
        );

        let identity = AgentIdentity::new("thunder", "main").orchestrator();
        let locator = locator(&dir);

        assert_eq!(
            locator.session_dir_names(&identity),
            vec!["thunder".to_string(), "main".to_string()]
        );
        assert_eq!(locator.session_files(&identity).len(), 1);
    }

    #[test]
    fn test_missing_sessions_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let identity = AgentIdentity::bare("nobody");
        assert!(locator(&dir).latest_session(&identity).is_none());

        let missing_root = Locator::new(dir.path().join("absent"), vec![]);
        assert!(missing_root.session_files(&identity).is_empty());
    }

    #[test]
    fn test_sessions_modified_since() {
        let dir = TempDir::new().unwrap();
        touch(
            &dir.path().join("agents/forge/sessions/old.jsonl"),
            Duration::from_secs(3 * 86400),
        );
        touch(
            &dir.path().join("agents/forge/sessions/new.jsonl"),
            Duration::from_secs(60),
        );

        let identity = AgentIdentity::bare("forge");
        let cutoff = Utc::now() - chrono::Duration::hours(24);
        let recent = locator(&dir).sessions_modified_since(&identity, cutoff);

        assert_eq!(recent.len(), 1);
        assert!(recent[0].path.ends_with("new.jsonl"));
    }

    #[test]
    fn test_signal_workspace_created_on_demand() {
        let dir = TempDir::new().unwrap();
        let identity = AgentIdentity::bare("forge");

        let ws = locator(&dir).signal_workspace(&identity).unwrap();
        assert!(ws.is_dir());
        assert!(ws.ends_with("workspace-forge"));
    }

    #[test]
    fn test_signal_workspace_rejects_escaping_id() {
        let outer = TempDir::new().unwrap();
        let root = outer.path().join("root");
        fs::create_dir_all(&root).unwrap();

        let identity = AgentIdentity::bare("x/../../outside");
        let result = Locator::new(&root, vec![]).signal_workspace(&identity);
        assert!(matches!(result, Err(TelemetryError::PathTraversal(_))));
    }
}
