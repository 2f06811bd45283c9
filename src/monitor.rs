use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::{
    aggregate::AggregateResultSet,
    badge::{self, BadgeState},
    cache::ResultCache,
    domain::{ErrorRecord, Host},
    gerrit::HostClient,
    notify::{Notification, NotificationCenter, NotificationSettings},
    refresh::{self, RefreshError},
};

/// What started a refresh cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    Timer,
    User,
}

#[derive(Clone, Debug)]
pub struct CycleReport {
    pub results: AggregateResultSet,
    pub errors: Vec<ErrorRecord>,
    pub badge: BadgeState,
    pub notifications_sent: Vec<Notification>,
}

/// Drives refresh cycles: fetch, group, summarize, notify.
///
/// Cycles are not serialized against each other. Two overlapping cycles may
/// both announce the same transition, or one may overwrite the other's
/// notification state; either way the effect is bounded to one notification.
pub struct Monitor {
    hosts: Vec<Host>,
    settings: NotificationSettings,
    client: Arc<dyn HostClient>,
    cache: ResultCache,
    notifications: NotificationCenter,
}

impl Monitor {
    pub fn new(
        hosts: Vec<Host>,
        settings: NotificationSettings,
        client: Arc<dyn HostClient>,
        cache: ResultCache,
        notifications: NotificationCenter,
    ) -> Self {
        Self {
            hosts,
            settings,
            client,
            cache,
            notifications,
        }
    }

    pub fn refresh(&self, trigger: Trigger) -> Result<CycleReport, RefreshError> {
        self.refresh_at(trigger, Utc::now())
    }

    /// User-initiated cycles ask the client for detailed data.
    pub fn refresh_at(
        &self,
        trigger: Trigger,
        now: DateTime<Utc>,
    ) -> Result<CycleReport, RefreshError> {
        let detailed = trigger == Trigger::User;
        let report = refresh::fetch_all(
            &self.hosts,
            detailed,
            self.client.as_ref(),
            &self.cache,
            now,
        )?;
        for result in &report.results {
            debug!(host = %result.host, changelists = result.changelists.len(), "host answered");
        }

        let results = AggregateResultSet::from_changelists(report.changelists());
        let badge = badge::select(&results, &report.errors);
        let notifications_sent = self
            .notifications
            .process(self.settings, &results, &report.errors);

        info!(
            ?trigger,
            hosts = self.hosts.len(),
            changelists = results.len(),
            errors = report.errors.len(),
            notified = notifications_sent.len(),
            "{badge}"
        );
        debug!(
            count = badge.count,
            color = badge.color,
            icon = badge.icon,
            "indicator updated"
        );

        Ok(CycleReport {
            results,
            errors: report.errors,
            badge,
            notifications_sent,
        })
    }
}

/// Periodic refresh timer. Any completed cycle re-arms it.
pub struct RefreshScheduler {
    interval: Duration,
    last_run: Option<Instant>,
}

impl RefreshScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_run: None,
        }
    }

    pub fn should_trigger(&self) -> bool {
        self.time_until_due().is_zero()
    }

    pub fn time_until_due(&self) -> Duration {
        match self.last_run {
            None => Duration::ZERO,
            Some(instant) => self.interval.saturating_sub(instant.elapsed()),
        }
    }

    pub fn mark_triggered(&mut self) {
        self.last_run = Some(Instant::now());
    }
}
