//! Adapter registry keeping track of known targets and the CDP sessions attached to them.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::events::TargetInfo;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetContext {
    pub target_id: String,
    pub target_type: String,
    pub url: String,
    pub opener_id: Option<String>,
    pub cdp_session: Option<String>,
}

/// Concurrent registry for targets and sessions.
#[derive(Default)]
pub struct TargetRegistry {
    targets: DashMap<String, TargetContext>,
    sessions: DashMap<String, String>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record or refresh a target. A known target keeps its attached session.
    pub fn upsert(&self, info: &TargetInfo) {
        let mut entry = self
            .targets
            .entry(info.target_id.clone())
            .or_insert_with(|| TargetContext {
                target_id: info.target_id.clone(),
                target_type: info.target_type.clone(),
                url: String::new(),
                opener_id: None,
                cdp_session: None,
            });
        entry.target_type = info.target_type.clone();
        entry.url = info.url.clone();
        if info.opener_id.is_some() {
            entry.opener_id = info.opener_id.clone();
        }
    }

    pub fn remove_target(&self, target_id: &str) -> Option<TargetContext> {
        let (_, ctx) = self.targets.remove(target_id)?;
        if let Some(session) = &ctx.cdp_session {
            self.sessions.remove(session);
        }
        Some(ctx)
    }

    pub fn set_cdp_session(&self, target_id: &str, cdp_session: &str) {
        if let Some(mut entry) = self.targets.get_mut(target_id) {
            entry.cdp_session = Some(cdp_session.to_string());
        }
        self.sessions
            .insert(cdp_session.to_string(), target_id.to_string());
    }

    pub fn clear_cdp_session(&self, cdp_session: &str) -> Option<String> {
        let (_, target_id) = self.sessions.remove(cdp_session)?;
        if let Some(mut entry) = self.targets.get_mut(&target_id) {
            entry.cdp_session = None;
        }
        Some(target_id)
    }

    pub fn get(&self, target_id: &str) -> Option<TargetContext> {
        self.targets.get(target_id).map(|entry| entry.value().clone())
    }

    pub fn target_for_session(&self, cdp_session: &str) -> Option<String> {
        self.sessions
            .get(cdp_session)
            .map(|entry| entry.value().clone())
    }

    pub fn pages(&self) -> Vec<TargetContext> {
        let mut pages: Vec<_> = self
            .targets
            .iter()
            .filter(|kv| kv.value().target_type == "page")
            .map(|kv| kv.value().clone())
            .collect();
        pages.sort_by(|a, b| a.target_id.cmp(&b.target_id));
        pages
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn clear(&self) {
        self.targets.clear();
        self.sessions.clear();
    }
}
