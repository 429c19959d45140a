//! Readiness conditions and the round-based matcher that waits for them.
//!
//! A condition reads "once `when` is present, wait until each of `selectors`
//! reaches `state`". Conditions whose anchor is missing are carried to the next
//! round, because waiting on one condition can load the DOM another one needs.
//! Matching stops at the first round in which no anchor matched.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::browser::{BrowserError, ElementState, Page};

fn default_anchor() -> String {
    "body".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessCondition {
    #[serde(rename = "when", default = "default_anchor")]
    pub anchor: String,
    #[serde(rename = "selectors", default)]
    pub dependents: Vec<String>,
    #[serde(default)]
    pub state: ElementState,
}

impl ReadinessCondition {
    pub fn new(
        anchor: impl Into<String>,
        dependents: impl IntoIterator<Item = impl Into<String>>,
        state: ElementState,
    ) -> Self {
        Self {
            anchor: anchor.into(),
            dependents: dependents.into_iter().map(Into::into).collect(),
            state,
        }
    }
}

/// Parses `WHEN|SEL[,SEL...]|STATE`; the state defaults to `attached`.
impl FromStr for ReadinessCondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('|');
        let anchor = parts.next().map(str::trim).unwrap_or_default();
        let dependents = parts.next().map(str::trim).unwrap_or_default();
        let state = match parts.next() {
            Some(state) => state.parse()?,
            None => ElementState::default(),
        };
        if parts.next().is_some() {
            return Err(format!(
                "invalid readiness check '{s}': expected WHEN|SELECTORS|STATE"
            ));
        }
        if anchor.is_empty() || dependents.is_empty() {
            return Err(format!(
                "invalid readiness check '{s}': both WHEN and SELECTORS are required"
            ));
        }
        Ok(Self {
            anchor: anchor.to_string(),
            dependents: dependents
                .split(',')
                .map(str::trim)
                .filter(|sel| !sel.is_empty())
                .map(str::to_string)
                .collect(),
            state,
        })
    }
}

/// What a matcher run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadinessReport {
    pub rounds: usize,
    pub satisfied: usize,
    /// Anchors that never matched.
    pub unmatched: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct ReadinessMatcher {
    timeout: Duration,
}

impl ReadinessMatcher {
    /// `timeout` bounds each dependent-selector wait.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn wait_ready(
        &self,
        page: &dyn Page,
        conditions: &[ReadinessCondition],
    ) -> Result<(), BrowserError> {
        self.run(page, conditions).await.map(|_| ())
    }

    pub async fn run(
        &self,
        page: &dyn Page,
        conditions: &[ReadinessCondition],
    ) -> Result<ReadinessReport, BrowserError> {
        let mut report = ReadinessReport::default();
        let mut remaining: Vec<&ReadinessCondition> = conditions.iter().collect();

        while !remaining.is_empty() {
            report.rounds += 1;
            let mut matched = false;
            let mut carried = Vec::with_capacity(remaining.len());

            for condition in remaining {
                if !page.query_selector(&condition.anchor).await? {
                    carried.push(condition);
                    continue;
                }
                debug!(anchor = %condition.anchor, "readiness anchor matched");
                for selector in &condition.dependents {
                    debug!(anchor = %condition.anchor, selector = %selector, state = %condition.state, "waiting for selector");
                    page.wait_for_selector(selector, condition.state, self.timeout)
                        .await?;
                }
                debug!(anchor = %condition.anchor, "readiness condition satisfied");
                report.satisfied += 1;
                matched = true;
            }

            remaining = carried;
            if !matched {
                break;
            }
        }

        report.unmatched = remaining.iter().map(|c| c.anchor.clone()).collect();
        debug!(rounds = report.rounds, satisfied = report.satisfied, unmatched = ?report.unmatched, "readiness matching finished");
        Ok(report)
    }
}
