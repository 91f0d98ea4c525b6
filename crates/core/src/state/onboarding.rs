//! First-visit flag
//!
//! Remembers whether this client has been shown the welcome page. The flag is
//! a small JSON file so it survives restarts.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::Result;

pub const WELCOME_ROUTE: &str = "/welcome";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VisitFlag {
    has_visited_before: bool,
}

pub struct VisitTracker {
    path: PathBuf,
    visited: AtomicBool,
}

impl VisitTracker {
    /// Load the flag from `path`. An unreadable or malformed file counts as
    /// a first visit.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let visited = match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<VisitFlag>(&content) {
                Ok(flag) => flag.has_visited_before,
                Err(e) => {
                    warn!("Ignoring malformed visit flag {:?}: {}", path, e);
                    false
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!("Failed to read visit flag {:?}: {}", path, e);
                false
            }
        };
        Self {
            path,
            visited: AtomicBool::new(visited),
        }
    }

    pub fn has_visited(&self) -> bool {
        self.visited.load(Ordering::SeqCst)
    }

    pub async fn mark_visited(&self) -> Result<()> {
        self.visited.store(true, Ordering::SeqCst);
        self.persist().await
    }

    /// `Some("/welcome")` the first time it is called for a fresh client,
    /// `None` afterwards.
    pub async fn first_visit_redirect(&self) -> Option<&'static str> {
        if self.visited.swap(true, Ordering::SeqCst) {
            return None;
        }
        if let Err(e) = self.persist().await {
            warn!("Failed to save visit flag {:?}: {}", self.path, e);
        }
        Some(WELCOME_ROUTE)
    }

    async fn persist(&self) -> Result<()> {
        let content = serde_json::to_string(&VisitFlag {
            has_visited_before: self.has_visited(),
        })?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }
}
