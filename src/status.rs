//! Effective status resolution
//!
//! The status customers see comes from three rules tried in a fixed order,
//! first match wins:
//!
//! 1. **Early closing** - switched on, has a time, and that time has passed: closed.
//! 2. **Auto schedule** - switched on with both bounds: inside the hours is open
//!    unless manually closed, outside is closed unless manually opened.
//! 3. **Manual** - the operator's toggle as-is.
//!
//! Nothing is carried between evaluations; the result is a pure function of the
//! config and the clock.

use serde::Serialize;

use crate::model::{Offer, ShopConfig, ShopStatus};
use crate::time_window::TimeWindow;

/// One step of the precedence chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Rule {
    EarlyClosing,
    AutoSchedule,
    Manual,
}

/// Rules in the order they are consulted
pub const PRECEDENCE: [Rule; 3] = [Rule::EarlyClosing, Rule::AutoSchedule, Rule::Manual];

/// The time-dependent answers the rules need, gathered once per evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusFacts {
    pub manual_status: ShopStatus,
    /// An active early closing whose time has been reached
    pub early_closing_lapsed: bool,
    /// None when no active schedule; otherwise whether now is inside its hours
    pub inside_schedule: Option<bool>,
}

impl StatusFacts {
    pub fn gather(config: &ShopConfig, window: &TimeWindow) -> Self {
        Self {
            manual_status: config.manual_status,
            early_closing_lapsed: config
                .active_early_closing()
                .is_some_and(|ec| window.is_past(&ec.time)),
            inside_schedule: config
                .active_schedule()
                .map(|s| window.is_within_range(&s.open_time, &s.close_time)),
        }
    }
}

impl Rule {
    /// The status this rule decides, or None to fall through to the next rule
    pub fn apply(self, facts: &StatusFacts) -> Option<ShopStatus> {
        match self {
            Rule::EarlyClosing => facts.early_closing_lapsed.then_some(ShopStatus::Closed),
            Rule::AutoSchedule => {
                let inside = facts.inside_schedule?;
                let status = match (inside, facts.manual_status) {
                    // Manual open keeps the shop open outside hours
                    (false, ShopStatus::Open) => ShopStatus::Open,
                    (false, ShopStatus::Closed) => ShopStatus::Closed,
                    // Manual closed shuts the shop during hours
                    (true, ShopStatus::Closed) => ShopStatus::Closed,
                    (true, ShopStatus::Open) => ShopStatus::Open,
                };
                Some(status)
            }
            Rule::Manual => Some(facts.manual_status),
        }
    }
}

/// Effective status and the rule that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub status: ShopStatus,
    pub decided_by: Rule,
}

/// Walk PRECEDENCE and return the first rule that decides
pub fn decide(facts: &StatusFacts) -> Resolution {
    PRECEDENCE
        .iter()
        .find_map(|rule| {
            rule.apply(facts).map(|status| Resolution {
                status,
                decided_by: *rule,
            })
        })
        // Manual always decides; kept total regardless
        .unwrap_or(Resolution {
            status: facts.manual_status,
            decided_by: Rule::Manual,
        })
}

/// Everything the public board shows, evaluated at a single instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardSnapshot {
    pub effective_status: ShopStatus,
    pub decided_by: Rule,
    pub active_offers: Vec<Offer>,
    pub upcoming_offers: Vec<Offer>,
    pub early_closing_banner_visible: bool,
}

/// Applies the rules against a clock
#[derive(Debug, Clone)]
pub struct StatusResolver {
    window: TimeWindow,
}

impl StatusResolver {
    pub fn new(window: TimeWindow) -> Self {
        Self { window }
    }

    pub fn window(&self) -> &TimeWindow {
        &self.window
    }

    pub fn resolve(&self, config: &ShopConfig) -> Resolution {
        decide(&StatusFacts::gather(config, &self.window))
    }

    pub fn resolve_effective_status(&self, config: &ShopConfig) -> ShopStatus {
        self.resolve(config).status
    }

    /// Enabled offers running right now, only while the shop is open. Input order is kept.
    pub fn active_offers<'a>(&self, config: &'a ShopConfig, effective: ShopStatus) -> Vec<&'a Offer> {
        if !effective.is_open() {
            return Vec::new();
        }
        config
            .offers
            .iter()
            .filter(|o| o.enabled && self.window.is_within_range(&o.start_time, &o.end_time))
            .collect()
    }

    /// Enabled offers that have not started yet and have not ended today, shown even while closed
    pub fn upcoming_offers<'a>(&self, config: &'a ShopConfig) -> Vec<&'a Offer> {
        config
            .offers
            .iter()
            .filter(|o| {
                o.enabled
                    && !self.window.is_within_range(&o.start_time, &o.end_time)
                    && !self.window.is_past(&o.end_time)
            })
            .collect()
    }

    /// The "closing early today" notice. Hides itself once the closure has taken effect.
    pub fn early_closing_banner_visible(&self, config: &ShopConfig, effective: ShopStatus) -> bool {
        config.early_closing_enabled
            && config
                .early_closing
                .as_ref()
                .is_some_and(|ec| ec.has_time() && ec.has_reason())
            && effective.is_open()
    }

    /// Evaluate the whole board against one frozen instant
    pub fn snapshot(&self, config: &ShopConfig) -> BoardSnapshot {
        let frozen = StatusResolver::new(self.window.freeze());
        let resolution = frozen.resolve(config);
        let effective = resolution.status;

        BoardSnapshot {
            effective_status: effective,
            decided_by: resolution.decided_by,
            active_offers: frozen.active_offers(config, effective).into_iter().cloned().collect(),
            upcoming_offers: frozen.upcoming_offers(config).into_iter().cloned().collect(),
            early_closing_banner_visible: frozen.early_closing_banner_visible(config, effective),
        }
    }
}
