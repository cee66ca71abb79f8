//! The "all active jobs" feed.
//!
//! A feed subscriber is attached to live job events before its snapshot is
//! queried, so nothing that happens during the query is lost. The snapshot is
//! then emitted as INSERT events (oldest first), followed by live events
//! filtered for the subscriber's principal. Live events already covered by
//! the snapshot are skipped.

use beacon_core::{JobEvent, JobId, JobOp, JobSnapshot, Principal, ProjectId};
use beacon_db::BuildStore;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::unbounded_channel;
use tracing::{debug, warn};

use crate::access::AccessGate;
use crate::subscription::{Detach, SubscriberId, Subscribers, Subscription};

#[derive(Default)]
struct FeedInner {
    subscribers: Mutex<Subscribers<JobEvent>>,
}

impl Detach for FeedInner {
    fn detach(&self, id: SubscriberId) {
        self.subscribers.lock().remove(id);
    }
}

/// Fan-out of every job event to feed subscribers.
#[derive(Default)]
pub struct JobFeed {
    inner: Arc<FeedInner>,
}

impl JobFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every feed subscriber's filter.
    pub fn publish(&self, event: &JobEvent) {
        self.inner.subscribers.lock().broadcast(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Subscribe `principal` to the feed.
    pub async fn subscribe(
        &self,
        store: &dyn BuildStore,
        gate: &AccessGate,
        principal: Principal,
    ) -> Subscription<JobEvent> {
        let id = SubscriberId::next();
        let (live_tx, mut live_rx) = unbounded_channel::<JobEvent>();
        self.inner.subscribers.lock().insert(id, live_tx);
        let target: Weak<dyn Detach> = Arc::downgrade(&self.inner) as Weak<dyn Detach>;

        let mut jobs = match store.active_jobs(principal).await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(principal = %principal, error = %e, "Active job query failed");
                self.inner.detach(id);
                return Subscription::empty();
            }
        };
        jobs.sort_by(|a, b| (a.updated_at, a.id).cmp(&(b.updated_at, b.id)));
        debug!(principal = %principal, jobs = jobs.len(), "Job feed snapshot");

        let (tx, rx) = unbounded_channel();
        let mut filter = FeedFilter::new(principal, gate.clone(), &jobs);
        for job in jobs {
            let _ = tx.send(JobEvent::Insert(job));
        }

        tokio::spawn(async move {
            while let Some(event) = live_rx.recv().await {
                if !filter.admit(&event).await {
                    continue;
                }
                if tx.send(event).is_err() {
                    break;
                }
            }
        });

        Subscription::attached(id, rx, target)
    }
}

/// Per-subscriber filter over live job events.
struct FeedFilter {
    principal: Principal,
    gate: AccessGate,
    /// `updated_at` of jobs in the snapshot, until a newer event is seen.
    seen: HashMap<JobId, DateTime<Utc>>,
    /// Projects already checked for this principal.
    projects: HashMap<ProjectId, bool>,
}

impl FeedFilter {
    fn new(principal: Principal, gate: AccessGate, snapshot: &[JobSnapshot]) -> Self {
        Self {
            principal,
            gate,
            seen: snapshot.iter().map(|job| (job.id, job.updated_at)).collect(),
            projects: snapshot.iter().map(|job| (job.project_id(), true)).collect(),
        }
    }

    async fn admit(&mut self, event: &JobEvent) -> bool {
        let job = event.job();

        if let Some(seen) = self.seen.get(&job.id) {
            if job.updated_at <= *seen {
                return false;
            }
            self.seen.remove(&job.id);
        }

        if job.project.public {
            return true;
        }

        // A new job re-checks its project; updates reuse the last answer.
        let project = job.project_id();
        if event.op() == JobOp::Update {
            if let Some(&visible) = self.projects.get(&project) {
                return visible;
            }
        }
        let visible = self
            .gate
            .can_access_project(self.principal, project)
            .await
            .is_granted();
        self.projects.insert(project, visible);
        visible
    }
}
