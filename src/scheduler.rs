//! Deferred election transitions.
//!
//! Two kinds of work run off the clock: opening a published election when
//! its voting window starts, and closing an open or paused election when the
//! window ends. Each election has at most one pending task; an open task
//! replaces itself with the close task once it has run.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::{DateTime, Duration, Utc};
use mongodb::{bson::doc, Database};
use rocket::{
    fairing::{Fairing, Info, Kind},
    futures::{
        future::{BoxFuture, FutureExt},
        TryStreamExt,
    },
    tokio::{
        self,
        sync::{Mutex, Notify},
        task::{JoinError, JoinHandle},
    },
    Build, Rocket,
};

use crate::config::Config;
use crate::error::Error;
use crate::model::{
    audit::Performer,
    election::{self, Election, ElectionState, OpenOutcome},
    mongodb::{Coll, Id},
    token::{self, CredentialCourier},
};

/// How long to wait before retrying a failed task.
const RETRY_INTERVAL_SECONDS: i64 = 300;

/// A task scheduled for a specific point in the future. It executes by
/// itself at that point, or can be cancelled or triggered early.
pub struct ScheduledTask<T> {
    task_handle: JoinHandle<T>,
    wait_handle: JoinHandle<()>,
    signal: Arc<Notify>,
}

impl<T> ScheduledTask<T>
where
    T: Send + 'static,
{
    /// Schedule `task` to run at `run_at`; a time in the past means
    /// immediately.
    pub fn new<Fut>(task: Fut, run_at: DateTime<Utc>) -> Self
    where
        Fut: Future<Output = T> + Send + 'static,
    {
        let signal = Arc::new(Notify::new());

        let task_signal = signal.clone();
        let task_handle = tokio::spawn(async move {
            task_signal.notified().await;
            task.await
        });

        // A second task hands out the signal when the time comes; triggering
        // early just means aborting it and signalling ourselves.
        let sleep = sleep_until(run_at);
        let wait_signal = signal.clone();
        let wait_handle = tokio::spawn(async move {
            tokio::time::sleep(sleep).await;
            wait_signal.notify_one();
        });

        Self {
            task_handle,
            wait_handle,
            signal,
        }
    }

    /// Cancel the task. Returns true iff it had already completed.
    pub async fn cancel(self) -> bool {
        self.task_handle.abort();
        self.wait_handle.abort();
        self.task_handle.await.is_ok()
    }

    /// Run the task now instead of at its scheduled time.
    pub fn trigger_now(&self) {
        self.wait_handle.abort();
        self.signal.notify_one();
    }
}

impl<T> Future for ScheduledTask<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task_handle).poll(cx)
    }
}

fn sleep_until(datetime: DateTime<Utc>) -> tokio::time::Duration {
    let millis = u64::try_from(datetime.timestamp_millis() - Utc::now().timestamp_millis())
        .unwrap_or(0);
    tokio::time::Duration::from_millis(millis)
}

/// What a scheduled task should do when it fires.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Job {
    Open,
    Close,
}

type TaskMap = HashMap<Id, ScheduledTask<Result<(), Error>>>;

/// The clock-driven side of the election lifecycle, kept in managed state.
pub struct ElectionScheduler {
    db: Database,
    config: Config,
    courier: Arc<dyn CredentialCourier>,
    tasks: Arc<Mutex<TaskMap>>,
}

impl ElectionScheduler {
    pub fn new(db: Database, config: Config, courier: Arc<dyn CredentialCourier>) -> Self {
        Self {
            db,
            config,
            courier,
            tasks: Default::default(),
        }
    }

    /// The credential delivery channel used for scheduled opens; manual
    /// opens go through the same one.
    pub fn courier(&self) -> &dyn CredentialCourier {
        self.courier.as_ref()
    }

    /// Rebuild the task set from the database: deferred opens for published
    /// elections whose window has not started, closes for everything
    /// currently open or paused (including windows that ended while we were
    /// down, which fire immediately).
    pub async fn schedule_all(&self) -> Result<(), Error> {
        let filter = doc! {
            "$or": [
                {"state": ElectionState::Published},
                {"state": ElectionState::Open},
                {"state": ElectionState::Paused},
            ],
        };
        let elections: Vec<Election> = Coll::<Election>::from_db(&self.db)
            .find(filter, None)
            .await?
            .try_collect()
            .await?;

        for election in elections {
            let Some((start, end)) = election.window() else {
                // Unpublished drafts aside, every election has a window;
                // a published one without it cannot be opened anyway.
                continue;
            };
            match election.state {
                ElectionState::Published if Utc::now() < start => {
                    self.schedule_open(election.id, start).await;
                }
                // A published election past its start was meant to be opened
                // already; only an admin open request does that, so leave it.
                ElectionState::Published => {}
                ElectionState::Open => {
                    // Repair a crash between the open and the last
                    // credential; issuance skips voters already covered.
                    token::bulk_issue(
                        &Coll::from_db(&self.db),
                        &Coll::from_db(&self.db),
                        &self.config,
                        self.courier.as_ref(),
                        &election,
                        Utc::now(),
                    )
                    .await?;
                    self.schedule_close(election.id, end).await;
                }
                ElectionState::Paused => {
                    self.schedule_close(election.id, end).await;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Schedule the election to open at the given time, replacing any
    /// pending task for it.
    pub async fn schedule_open(&self, election_id: Id, open_at: DateTime<Utc>) {
        debug!("Scheduling election {election_id} to open at {open_at}");
        self.schedule(election_id, Job::Open, open_at).await;
    }

    /// Schedule the election to close at the given time, replacing any
    /// pending task for it.
    pub async fn schedule_close(&self, election_id: Id, close_at: DateTime<Utc>) {
        debug!("Scheduling election {election_id} to close at {close_at}");
        self.schedule(election_id, Job::Close, close_at).await;
    }

    /// Drop any pending task for the election, e.g. when it is closed by an
    /// admin or hard-deleted.
    pub async fn cancel(&self, election_id: Id) {
        if let Some(task) = self.tasks.lock().await.remove(&election_id) {
            task.cancel().await;
            debug!("Cancelled scheduled task for election {election_id}");
        }
    }

    async fn schedule(&self, election_id: Id, job: Job, run_at: DateTime<Utc>) {
        let future = Self::run_job(
            election_id,
            job,
            self.db.clone(),
            self.config.clone(),
            self.courier.clone(),
            self.tasks.clone(),
        );
        let mut tasks = self.tasks.lock().await;
        if let Some(previous) = tasks.remove(&election_id) {
            previous.cancel().await;
        }
        tasks.insert(election_id, ScheduledTask::new(future, run_at));
    }

    /// The body of a scheduled task. Recursive (an open schedules the close,
    /// a failure schedules a retry), hence the `BoxFuture`.
    fn run_job(
        election_id: Id,
        job: Job,
        db: Database,
        config: Config,
        courier: Arc<dyn CredentialCourier>,
        tasks: Arc<Mutex<TaskMap>>,
    ) -> BoxFuture<'static, Result<(), Error>> {
        async move {
            let correlation_id = format!("task-{election_id}");
            let result = match job {
                Job::Open => election::open_election(
                    &db,
                    &config,
                    courier.as_ref(),
                    election_id,
                    Performer::System,
                    correlation_id,
                )
                .await
                .map(Some),
                Job::Close => election::transition(
                    &db,
                    election_id,
                    ElectionState::Closed,
                    Performer::System,
                    correlation_id,
                )
                .await
                .map(|_| None),
            };

            match result {
                Ok(outcome) => {
                    let mut tasks_locked = tasks.lock().await;
                    tasks_locked.remove(&election_id);
                    match outcome {
                        Some(OpenOutcome::Opened(election)) => {
                            // The freshly opened election now needs its close.
                            if let Some((_, end)) = election.window() {
                                let close = Self::run_job(
                                    election_id,
                                    Job::Close,
                                    db,
                                    config,
                                    courier,
                                    tasks.clone(),
                                );
                                tasks_locked.insert(election_id, ScheduledTask::new(close, end));
                            }
                        }
                        // Fired a moment early; try again at the start.
                        Some(OpenOutcome::Deferred(start)) => {
                            let open = Self::run_job(
                                election_id,
                                Job::Open,
                                db,
                                config,
                                courier,
                                tasks.clone(),
                            );
                            tasks_locked.insert(election_id, ScheduledTask::new(open, start));
                        }
                        None => {}
                    }
                    Ok(())
                }
                // Someone got there first; nothing left for the clock to do.
                Err(Error::State(msg)) | Err(Error::Conflict(msg)) => {
                    debug!("Scheduled {job:?} for election {election_id} is moot: {msg}");
                    tasks.lock().await.remove(&election_id);
                    Ok(())
                }
                Err(e) => {
                    error!("Scheduled {job:?} for election {election_id} failed: {e}");
                    let retry = Self::run_job(
                        election_id,
                        job,
                        db,
                        config,
                        courier,
                        tasks.clone(),
                    );
                    let retry_at = Utc::now() + Duration::seconds(RETRY_INTERVAL_SECONDS);
                    tasks
                        .lock()
                        .await
                        .insert(election_id, ScheduledTask::new(retry, retry_at));
                    warn!("Will retry in {RETRY_INTERVAL_SECONDS} seconds");
                    Err(e)
                }
            }
        }
        .boxed()
    }
}

/// A fairing that builds the scheduler from the managed database and config,
/// rebuilds the pending tasks, and places the scheduler into managed state.
/// Must be attached after the database fairing.
pub struct SchedulerFairing;

#[rocket::async_trait]
impl Fairing for SchedulerFairing {
    fn info(&self) -> Info {
        Info {
            name: "Election Scheduler",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let (Some(db), Some(config)) = (rocket.state::<Database>(), rocket.state::<Config>())
        else {
            error!("Database and config must be managed before the scheduler");
            return Err(rocket);
        };

        info!("Scheduling pending election transitions...");
        let scheduler = ElectionScheduler::new(
            db.clone(),
            config.clone(),
            Arc::new(crate::model::token::LogCourier),
        );
        if let Err(e) = scheduler.schedule_all().await {
            error!("Failed to schedule election transitions: {e}");
            return Err(rocket);
        }
        info!("...election transitions scheduled!");

        rocket = rocket.manage(scheduler);
        Ok(rocket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rocket::async_test]
    async fn tasks_in_the_past_run_immediately() {
        let task = ScheduledTask::new(async { 17 }, Utc::now() - Duration::hours(1));
        assert_eq!(task.await.unwrap(), 17);
    }

    #[rocket::async_test]
    async fn triggering_skips_the_wait() {
        let task = ScheduledTask::new(async { "done" }, Utc::now() + Duration::days(7));
        task.trigger_now();
        assert_eq!(task.await.unwrap(), "done");
    }

    #[rocket::async_test]
    async fn cancelled_tasks_never_run() {
        let task = ScheduledTask::new(async {}, Utc::now() + Duration::days(7));
        let completed = task.cancel().await;
        assert!(!completed);
    }
}
