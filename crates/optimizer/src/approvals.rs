//! Approval sources for large budget changes.

use campaign_core::collaborators::ApprovalGate;
use campaign_core::types::ActionType;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

/// Default gate: nothing is approved, so every large change stays pending.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyAllApprovals;

impl ApprovalGate for DenyAllApprovals {
    fn take_approval(
        &self,
        _unit_id: &str,
        _action: ActionType,
        _new_budget: f64,
        _now: DateTime<Utc>,
    ) -> bool {
        false
    }
}

/// One operator approval. Each entry authorizes a single change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    pub unit_id: String,
    pub action: ActionType,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Furthest budget the change may reach: an upper bound for a scale up,
    /// a lower bound for a scale down.
    #[serde(default)]
    pub budget: Option<f64>,
}

impl Approval {
    fn covers(
        &self,
        unit_id: &str,
        action: ActionType,
        new_budget: f64,
        now: DateTime<Utc>,
    ) -> bool {
        let within_bound = match (self.budget, action) {
            (Some(bound), ActionType::ScaleUp) => new_budget <= bound,
            (Some(bound), ActionType::ScaleDown) => new_budget >= bound,
            _ => true,
        };
        self.unit_id == unit_id
            && self.action == action
            && within_bound
            && self.expires_at.map(|exp| now < exp).unwrap_or(true)
    }
}

#[derive(Default)]
struct Cached {
    modified: Option<SystemTime>,
    approvals: Vec<Approval>,
}

/// Approvals read from an operator-maintained JSON array. The file is
/// re-read whenever its modification time changes; a missing or unreadable
/// file approves nothing.
///
/// Redeemed entries are remembered for the life of the process, so
/// re-saving the file does not revive them. Identical entries redeem
/// together.
pub struct FileApprovals {
    path: PathBuf,
    cache: RwLock<Cached>,
    redeemed: Mutex<Vec<Approval>>,
}

impl FileApprovals {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let approvals = Self {
            path: path.as_ref().to_path_buf(),
            cache: RwLock::new(Cached::default()),
            redeemed: Mutex::new(Vec::new()),
        };
        approvals.refresh();
        approvals
    }

    fn refresh(&self) {
        let modified = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok();
        if modified.is_some() && self.cache.read().modified == modified {
            return;
        }

        let approvals = match std::fs::read_to_string(&self.path) {
            Ok(raw) => match serde_json::from_str::<Vec<Approval>>(&raw) {
                Ok(list) => {
                    info!(path = %self.path.display(), count = list.len(), "loaded approvals");
                    list
                }
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "ignoring malformed approvals file");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };

        let mut cache = self.cache.write();
        cache.modified = modified;
        cache.approvals = approvals;
    }

    /// Entries in the file that have not been redeemed yet.
    pub fn approvals(&self) -> Vec<Approval> {
        self.refresh();
        let redeemed = self.redeemed.lock();
        self.cache
            .read()
            .approvals
            .iter()
            .filter(|a| !redeemed.contains(a))
            .cloned()
            .collect()
    }
}

impl ApprovalGate for FileApprovals {
    fn take_approval(
        &self,
        unit_id: &str,
        action: ActionType,
        new_budget: f64,
        now: DateTime<Utc>,
    ) -> bool {
        self.refresh();
        let mut redeemed = self.redeemed.lock();
        let cache = self.cache.read();
        let Some(approval) = cache
            .approvals
            .iter()
            .find(|a| !redeemed.contains(a) && a.covers(unit_id, action, new_budget, now))
        else {
            return false;
        };
        info!(unit_id, action = %action, new_budget, "approval redeemed");
        redeemed.push(approval.clone());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_deny_all() {
        assert!(!DenyAllApprovals.take_approval("u1", ActionType::ScaleUp, 1600.0, Utc::now()));
    }

    #[test]
    fn test_file_approvals() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("approvals.json");
        let now = Utc::now();
        let list = vec![
            Approval {
                unit_id: "u1".to_string(),
                action: ActionType::ScaleUp,
                expires_at: None,
                budget: None,
            },
            Approval {
                unit_id: "u2".to_string(),
                action: ActionType::ScaleUp,
                expires_at: Some(now - Duration::minutes(1)),
                budget: None,
            },
        ];
        std::fs::write(&path, serde_json::to_string(&list).unwrap()).unwrap();

        let gate = FileApprovals::new(&path);
        assert!(!gate.take_approval("u1", ActionType::ScaleDown, 600.0, now));
        // Expired.
        assert!(!gate.take_approval("u2", ActionType::ScaleUp, 1600.0, now));
        assert_eq!(gate.approvals().len(), 2);
        assert!(gate.take_approval("u1", ActionType::ScaleUp, 1600.0, now));
        assert_eq!(gate.approvals().len(), 1);
    }

    #[test]
    fn test_missing_and_malformed_files_approve_nothing() {
        let dir = TempDir::new().unwrap();
        let missing = FileApprovals::new(dir.path().join("none.json"));
        assert!(!missing.take_approval("u1", ActionType::ScaleUp, 1600.0, Utc::now()));

        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        let bad = FileApprovals::new(&path);
        assert!(!bad.take_approval("u1", ActionType::ScaleUp, 1600.0, Utc::now()));
    }

    #[test]
    fn test_parses_operator_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("approvals.json");
        std::fs::write(
            &path,
            r#"[{"unit_id": "u9", "action": "scale_down", "expires_at": "2999-01-01T00:00:00Z"}]"#,
        )
        .unwrap();
        let gate = FileApprovals::new(&path);
        assert!(gate.take_approval("u9", ActionType::ScaleDown, 400.0, Utc::now()));
    }

    #[test]
    fn test_approval_without_expiry_is_single_use() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("approvals.json");
        let raw = r#"[{"unit_id": "u1", "action": "scale_up"}]"#;
        std::fs::write(&path, raw).unwrap();
        let gate = FileApprovals::new(&path);
        let now = Utc::now();

        assert!(gate.take_approval("u1", ActionType::ScaleUp, 1600.0, now));
        assert!(!gate.take_approval("u1", ActionType::ScaleUp, 2560.0, now));
        assert!(gate.approvals().is_empty());

        // Rewriting the same entry does not revive it.
        std::fs::write(&path, format!("{raw}\n")).unwrap();
        assert!(!gate.take_approval("u1", ActionType::ScaleUp, 2560.0, now + Duration::hours(1)));
    }

    #[test]
    fn test_budget_bound_limits_the_change() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("approvals.json");
        std::fs::write(
            &path,
            r#"[{"unit_id": "u1", "action": "scale_up", "budget": 2000.0},
                {"unit_id": "u1", "action": "scale_down", "budget": 300.0}]"#,
        )
        .unwrap();
        let gate = FileApprovals::new(&path);
        let now = Utc::now();

        assert!(!gate.take_approval("u1", ActionType::ScaleUp, 2560.0, now));
        assert!(!gate.take_approval("u1", ActionType::ScaleDown, 200.0, now));
        assert!(gate.take_approval("u1", ActionType::ScaleUp, 1600.0, now));
        assert!(gate.take_approval("u1", ActionType::ScaleDown, 400.0, now));
    }
}
