// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Supervision strategies
//!

use serde::{Deserialize, Serialize};

use std::{
    collections::VecDeque,
    fmt::Debug,
    time::{Duration, Instant},
};

use backoff::backoff::Backoff as InnerBackoff;

/// Which siblings are restarted together with a failed child.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize,
)]
pub enum Strategy {
    /// Only the failed child.
    #[default]
    OneForOne,
    /// Every child, stopped and restarted in declared order.
    OneForAll,
    /// The failed child and every child declared after it.
    RestForOne,
}

impl Strategy {
    /// Indices of the children affected by the exit of child `failed` out of `count`.
    pub(crate) fn affected(&self, failed: usize, count: usize) -> Vec<usize> {
        match self {
            Strategy::OneForOne => vec![failed],
            Strategy::OneForAll => (0..count).collect(),
            Strategy::RestForOne => (failed..count).collect(),
        }
    }
}

/// Whether a terminated child is restarted.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize,
)]
pub enum RestartPolicy {
    /// Always restarted.
    #[default]
    Permanent,
    /// Restarted only after an abnormal exit.
    Transient,
    /// Never restarted.
    Temporary,
}

impl RestartPolicy {
    /// True if a child that exited with `abnormal` must be restarted.
    pub fn restarts(&self, abnormal: bool) -> bool {
        match self {
            RestartPolicy::Permanent => true,
            RestartPolicy::Transient => abnormal,
            RestartPolicy::Temporary => false,
        }
    }
}

/// Maximum restarts of one child tolerated within a sliding window. One more escalates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartIntensity {
    pub max_restarts: usize,
    pub window: Duration,
}

impl RestartIntensity {
    pub fn new(max_restarts: usize, window: Duration) -> Self {
        Self {
            max_restarts,
            window,
        }
    }
}

impl Default for RestartIntensity {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(5))
    }
}

/// Restart timestamps of one child inside the current window.
#[derive(Debug, Default)]
pub(crate) struct RestartWindow {
    restarts: VecDeque<Instant>,
}

impl RestartWindow {
    /// Records a restart at `now`.
    ///
    /// # Returns
    ///
    /// Returns false, without recording, if the restart would exceed `intensity`.
    ///
    pub(crate) fn record(
        &mut self,
        intensity: &RestartIntensity,
        now: Instant,
    ) -> bool {
        while let Some(first) = self.restarts.front() {
            if now.duration_since(*first) > intensity.window {
                self.restarts.pop_front();
            } else {
                break;
            }
        }
        if self.restarts.len() >= intensity.max_restarts {
            return false;
        }
        self.restarts.push_back(now);
        true
    }

    /// Restarts still inside the window.
    pub(crate) fn len(&self) -> usize {
        self.restarts.len()
    }
}

/// Delay applied before restarting a child. You can use this trait to define your custom
/// backoff.
pub trait RestartBackoff: Debug + Send + Sync {
    /// Wait before the next restart; `None` restarts right away.
    fn next_backoff(&mut self) -> Option<Duration>;

    /// Called once a child ran through a whole intensity window without restarting.
    fn reset(&mut self) {}
}

/// Restart immediately.
#[derive(Debug, Default)]
pub struct NoBackoff;

impl RestartBackoff for NoBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        None
    }
}

/// Wait a fixed period before every restart.
#[derive(Debug, Default)]
pub struct FixedBackoff {
    duration: Duration,
}

impl FixedBackoff {
    pub fn new(duration: Duration) -> Self {
        FixedBackoff { duration }
    }
}

impl RestartBackoff for FixedBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        Some(self.duration)
    }
}

/// Wait an exponentially growing period before every restart.
#[derive(Debug)]
pub struct ExponentialBackoff {
    inner: backoff::ExponentialBackoff,
}

impl ExponentialBackoff {
    /// Backoff starting at `initial` and never waiting longer than `max`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        let inner = backoff::ExponentialBackoff {
            initial_interval: initial,
            current_interval: initial,
            max_interval: max,
            max_elapsed_time: None,
            ..backoff::ExponentialBackoff::default()
        };
        ExponentialBackoff { inner }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        ExponentialBackoff {
            inner: backoff::ExponentialBackoff {
                max_elapsed_time: None,
                ..backoff::ExponentialBackoff::default()
            },
        }
    }
}

impl RestartBackoff for ExponentialBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        self.inner.next_backoff()
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}
