//! Repository registry.
//!
//! Repositories are static parameters supplied by a collaborator: where the
//! repository lives, extra tool flags, optional pre/post hooks, and the
//! interval-check bookkeeping the scheduler advances. The engine never
//! manages repository CRUD; it only reads through the [`RepositoryRegistry`]
//! seam.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;

/// A hook command run before or after a backup job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hook {
    /// Shell command line to run.
    pub command: String,
    /// Upper bound on the hook's run time.
    pub timeout: Duration,
    /// If true, a failing or timed-out hook is logged but does not fail the
    /// job.
    pub continue_on_failure: bool,
}

impl Hook {
    /// Creates a hook with a 60 second timeout that fails the job on error.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: Duration::from_secs(60),
            continue_on_failure: false,
        }
    }
}

/// Static parameters for one repository.
#[derive(Clone, Debug)]
pub struct Repository {
    /// Registry name, referenced by jobs and schedules.
    pub name: String,
    /// Repository location: a local path or an `ssh://user@host/path` URL
    /// (the tool does its own transport).
    pub location: String,
    /// Extra flags appended to every tool invocation for this repository.
    pub extra_args: Vec<String>,
    /// Hook run immediately before a backup job's process spawns.
    pub pre_hook: Option<Hook>,
    /// Hook run after a backup job reaches a terminal state.
    pub post_hook: Option<Hook>,
    /// Integrity-check cadence in days. 0 disables the interval trigger for
    /// this repository.
    pub check_interval_days: u32,
    /// When the next interval check is due. `None` means due immediately.
    pub next_scheduled_check: Option<DateTime<Utc>>,
}

impl Repository {
    /// Creates a repository with no hooks and no check interval.
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            extra_args: Vec::new(),
            pre_hook: None,
            post_hook: None,
            check_interval_days: 0,
            next_scheduled_check: None,
        }
    }
}

/// Read access to repository parameters, plus the single piece of state the
/// scheduler owns per repository.
pub trait RepositoryRegistry: Send + Sync {
    /// Looks up a repository by name.
    fn get(&self, name: &str) -> Option<Repository>;

    /// Returns all registered repositories.
    fn all(&self) -> Vec<Repository>;

    /// Advances the interval-check bookkeeping for a repository.
    fn set_next_scheduled_check(&self, name: &str, when: DateTime<Utc>);
}

/// In-memory registry, wired once at startup.
#[derive(Default)]
pub struct StaticRegistry {
    repositories: RwLock<HashMap<String, Repository>>,
}

impl StaticRegistry {
    /// Creates a registry from a list of repositories.
    pub fn new(repositories: impl IntoIterator<Item = Repository>) -> Self {
        let map = repositories
            .into_iter()
            .map(|repo| (repo.name.clone(), repo))
            .collect();
        Self {
            repositories: RwLock::new(map),
        }
    }
}

impl RepositoryRegistry for StaticRegistry {
    fn get(&self, name: &str) -> Option<Repository> {
        self.repositories.read().get(name).cloned()
    }

    fn all(&self) -> Vec<Repository> {
        let mut repos: Vec<_> = self.repositories.read().values().cloned().collect();
        repos.sort_by(|a, b| a.name.cmp(&b.name));
        repos
    }

    fn set_next_scheduled_check(&self, name: &str, when: DateTime<Utc>) {
        if let Some(repo) = self.repositories.write().get_mut(name) {
            repo.next_scheduled_check = Some(when);
        }
    }
}
