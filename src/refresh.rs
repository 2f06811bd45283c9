use std::thread;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    cache::{HostOutcome, ResultCache},
    domain::{Changelist, ErrorRecord, Host},
    gerrit::{FetchError, HostClient},
};

/// Changelists contributed by one host that answered successfully.
#[derive(Clone, Debug)]
pub struct HostResult {
    pub host: String,
    pub changelists: Vec<Changelist>,
}

/// Combined outcome of one fan-out over every enabled host. Each host appears
/// in exactly one of `results` or `errors`, in configuration order.
#[derive(Clone, Debug, Default)]
pub struct FetchReport {
    pub results: Vec<HostResult>,
    pub errors: Vec<ErrorRecord>,
}

impl FetchReport {
    pub fn changelists(&self) -> impl Iterator<Item = &Changelist> {
        self.results.iter().flat_map(|result| result.changelists.iter())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RefreshError {
    #[error("no host configured.")]
    NoHostConfigured,
}

/// Fetches every host in parallel and waits for all of them to settle.
///
/// Fresh cache entries are reused without touching the network; misses go
/// through `client` and the new outcome, success or failure, is cached at
/// `now`. A failing or panicking host never affects the others.
pub fn fetch_all(
    hosts: &[Host],
    detailed: bool,
    client: &dyn HostClient,
    cache: &ResultCache,
    now: DateTime<Utc>,
) -> Result<FetchReport, RefreshError> {
    if hosts.is_empty() {
        return Err(RefreshError::NoHostConfigured);
    }

    let outcomes: Vec<HostOutcome> = thread::scope(|scope| {
        let jobs: Vec<_> = hosts
            .iter()
            .map(|host| scope.spawn(move || fetch_host(host, detailed, client, cache, now)))
            .collect();
        jobs.into_iter()
            .map(|job| job.join().unwrap_or(Err(FetchError::BackgroundWorkerGone)))
            .collect()
    });

    let mut report = FetchReport::default();
    for (host, outcome) in hosts.iter().zip(outcomes) {
        match outcome {
            Ok(changelists) => report.results.push(HostResult {
                host: host.url.clone(),
                changelists,
            }),
            Err(error) => {
                warn!(host = %host, %error, "host fetch failed");
                report.errors.push(ErrorRecord {
                    host: host.url.clone(),
                    error,
                });
            }
        }
    }
    Ok(report)
}

fn fetch_host(
    host: &Host,
    detailed: bool,
    client: &dyn HostClient,
    cache: &ResultCache,
    now: DateTime<Utc>,
) -> HostOutcome {
    if let Some(outcome) = cache.lookup(&host.url, now) {
        debug!(host = %host, name = %host.name, "using cached result");
        return outcome;
    }

    let outcome = client
        .resolve_identity(host)
        .and_then(|identity| client.fetch_changes(host, &identity, detailed));
    cache.store(&host.url, now, outcome.clone());
    outcome
}
