//! Micro-debounce plus sliding-window cap for UI clicks.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use devpipe_core_types::SessionId;
use tokio::time::Instant;

use crate::config::{ClickScope, PipelineConfig};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClickLimits {
    pub count: usize,
    pub window: Duration,
    pub micro_debounce: Duration,
}

impl From<&PipelineConfig> for ClickLimits {
    fn from(cfg: &PipelineConfig) -> Self {
        Self {
            count: cfg.rate_limit_count,
            window: cfg.rate_limit_window(),
            micro_debounce: cfg.micro_debounce(),
        }
    }
}

/// Accepted click timestamps within the trailing window, plus the last accepted one.
#[derive(Debug)]
pub struct ClickRateLimiter {
    limits: ClickLimits,
    window: VecDeque<Instant>,
    last_accepted: Option<Instant>,
}

impl ClickRateLimiter {
    pub fn new(limits: ClickLimits) -> Self {
        Self {
            limits,
            window: VecDeque::with_capacity(limits.count),
            last_accepted: None,
        }
    }

    pub fn accept(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_accepted {
            if now.saturating_duration_since(last) < self.limits.micro_debounce {
                return false;
            }
        }
        while let Some(oldest) = self.window.front() {
            if now.saturating_duration_since(*oldest) > self.limits.window {
                self.window.pop_front();
            } else {
                break;
            }
        }
        if self.window.len() >= self.limits.count {
            return false;
        }
        self.window.push_back(now);
        self.last_accepted = Some(now);
        true
    }

    pub fn in_window(&self) -> usize {
        self.window.len()
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.last_accepted = None;
    }
}

/// One limiter for every tab, or one per tab, depending on [`ClickScope`].
#[derive(Debug)]
pub struct ClickGate {
    limits: ClickLimits,
    scope: ClickScope,
    global: ClickRateLimiter,
    per_session: HashMap<SessionId, ClickRateLimiter>,
}

impl ClickGate {
    pub fn new(config: &PipelineConfig) -> Self {
        let limits = ClickLimits::from(config);
        Self {
            limits,
            scope: config.click_scope,
            global: ClickRateLimiter::new(limits),
            per_session: HashMap::new(),
        }
    }

    pub fn accept(&mut self, session: &SessionId, now: Instant) -> bool {
        match self.scope {
            ClickScope::Global => self.global.accept(now),
            ClickScope::PerSession => {
                let limits = self.limits;
                self.per_session
                    .entry(session.clone())
                    .or_insert_with(|| ClickRateLimiter::new(limits))
                    .accept(now)
            }
        }
    }

    pub fn reset(&mut self) {
        self.global.reset();
        self.per_session.clear();
    }
}
