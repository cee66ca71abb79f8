//! Distribution hub.

use async_trait::async_trait;
use beacon_config::HubConfig;
use beacon_core::{
    ChangeEvent, ChangeKind, ChangePayload, ConsoleChunk, JobEvent, JobId, Principal,
};
use beacon_db::{BuildStore, NotificationSource};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::access::{Access, AccessGate};
use crate::bridge::{BridgeState, ChangeSink, NotificationBridge};
use crate::channel::EntityChannel;
use crate::feed::JobFeed;
use crate::sources::{ConsoleEvents, JobEvents};
use crate::subscription::Subscription;

/// Routes store change events to subscribers of the job feed, single jobs
/// and job consoles.
///
/// Every subscription passes the access gate first; a principal that may not
/// see an entity gets the same empty subscription as for an entity that does
/// not exist.
pub struct DistributionHub {
    store: Arc<dyn BuildStore>,
    gate: AccessGate,
    feed: JobFeed,
    jobs: EntityChannel<JobEvents>,
    consoles: EntityChannel<ConsoleEvents>,
}

/// Cache occupancy, for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    pub feed_subscribers: usize,
    pub cached_jobs: usize,
    pub cached_consoles: usize,
}

impl DistributionHub {
    pub fn new(store: Arc<dyn BuildStore>) -> Arc<Self> {
        Arc::new(Self {
            gate: AccessGate::new(store.clone()),
            feed: JobFeed::new(),
            jobs: EntityChannel::new(JobEvents::new(store.clone())),
            consoles: EntityChannel::new(ConsoleEvents::new(store.clone())),
            store,
        })
    }

    /// All active jobs visible to `principal`, then live job events.
    pub async fn subscribe_jobs(&self, principal: Principal) -> Subscription<JobEvent> {
        debug!(principal = %principal, "Subscribing to job feed");
        self.feed
            .subscribe(self.store.as_ref(), &self.gate, principal)
            .await
    }

    /// Snapshot of one job followed by its updates, ending once it is terminal.
    pub async fn subscribe_job(&self, job: JobId, principal: Principal) -> Subscription<JobEvent> {
        if self.gate.can_access(principal, job).await == Access::Hidden {
            debug!(job_id = %job, principal = %principal, "Job hidden from principal");
            return Subscription::empty();
        }
        self.jobs.subscribe(job).await
    }

    /// Console output of one job, ending once the job is terminal.
    pub async fn subscribe_console(
        &self,
        job: JobId,
        principal: Principal,
    ) -> Subscription<ConsoleChunk> {
        if self.gate.can_access(principal, job).await == Access::Hidden {
            debug!(job_id = %job, principal = %principal, "Console hidden from principal");
            return Subscription::empty();
        }
        self.consoles.subscribe(job).await
    }

    /// When `job` ended, if it has.
    pub async fn job_ended_at(&self, job: JobId) -> Option<DateTime<Utc>> {
        match self.store.console_snapshot(job).await {
            Ok(snapshot) => snapshot.and_then(|snapshot| snapshot.ended_at),
            Err(e) => {
                warn!(job_id = %job, error = %e, "Failed to read job end time");
                None
            }
        }
    }

    /// Route one decoded change event.
    ///
    /// Console output and job state arrive on separate connections, so a
    /// terminal job update catches the console up from the store before
    /// completing it.
    pub async fn route(&self, event: ChangeEvent) {
        match event.payload {
            ChangePayload::Job { op, job } => {
                let id = job.id;
                let terminal = job.is_terminal();
                let event = JobEvent::new(op, job);
                self.feed.publish(&event);
                self.jobs.publish(id, event);
                if terminal {
                    self.consoles.complete(id).await;
                }
            }
            ChangePayload::Console(chunk) => {
                self.consoles.publish(chunk.job_id, chunk);
            }
            ChangePayload::ConsoleRow { id, job_id } => {
                if !self.consoles.is_followed(job_id) {
                    return;
                }
                match self.store.console_chunk(id).await {
                    Ok(Some(chunk)) => self.consoles.publish(job_id, chunk),
                    Ok(None) => debug!(job_id = %job_id, chunk_id = id, "Console chunk vanished"),
                    Err(e) => {
                        warn!(job_id = %job_id, chunk_id = id, error = %e, "Failed to read console chunk");
                    }
                }
            }
        }
    }

    /// Catch cached entities up after notifications of `kind` may have been
    /// missed. Consoles complete on job updates, so both kinds refresh them.
    pub fn resync(&self, kind: ChangeKind) -> Vec<JoinHandle<()>> {
        match kind {
            ChangeKind::JobUpdate => vec![self.jobs.resync(), self.consoles.resync()],
            ChangeKind::ConsoleUpdate => vec![self.consoles.resync()],
        }
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            feed_subscribers: self.feed.subscriber_count(),
            cached_jobs: self.jobs.cached(),
            cached_consoles: self.consoles.cached(),
        }
    }

    /// Start one notification bridge per channel, feeding this hub.
    pub fn start(
        self: &Arc<Self>,
        source: Arc<dyn NotificationSource>,
        config: &HubConfig,
    ) -> HubHandle {
        let sink: Arc<dyn ChangeSink> = self.clone();
        let bridges = vec![
            NotificationBridge::new(
                ChangeKind::JobUpdate,
                config.notifications.jobs_channel.clone(),
                source.clone(),
                sink.clone(),
                config.reconnect.clone(),
            ),
            NotificationBridge::new(
                ChangeKind::ConsoleUpdate,
                config.notifications.console_channel.clone(),
                source,
                sink,
                config.reconnect.clone(),
            ),
        ];
        let tasks = bridges.iter().filter_map(|bridge| bridge.start()).collect();
        info!(
            jobs_channel = %config.notifications.jobs_channel,
            console_channel = %config.notifications.console_channel,
            "Distribution hub started"
        );
        HubHandle { bridges, tasks }
    }
}

#[async_trait]
impl ChangeSink for DistributionHub {
    async fn deliver(&self, event: ChangeEvent) {
        self.route(event).await;
    }

    fn connected(&self, kind: ChangeKind) {
        self.resync(kind);
    }
}

/// Running notification bridges of a started hub.
pub struct HubHandle {
    bridges: Vec<Arc<NotificationBridge>>,
    tasks: Vec<JoinHandle<()>>,
}

impl HubHandle {
    /// Channel name and connection state of each bridge.
    pub fn bridge_states(&self) -> Vec<(String, BridgeState)> {
        self.bridges
            .iter()
            .map(|bridge| (bridge.channel().to_string(), bridge.state()))
            .collect()
    }

    /// Channel name and a state watch for each bridge.
    pub fn watch_states(&self) -> Vec<(String, watch::Receiver<BridgeState>)> {
        self.bridges
            .iter()
            .map(|bridge| (bridge.channel().to_string(), bridge.watch_state()))
            .collect()
    }

    /// Stop every bridge and wait for its loop to exit.
    pub async fn shutdown(self) {
        for bridge in &self.bridges {
            bridge.stop();
        }
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Bridge task failed");
            }
        }
    }
}
