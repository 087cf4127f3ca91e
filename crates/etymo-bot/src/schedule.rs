//! Posting-hour gate and the cron daemon.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Timelike, Utc};
use etymo_core::RootCorpus;
use etymo_storage::{HistoryStore, StoreError};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::driver::{CycleOutcome, PostingDriver};

/// Why a scheduled check decided not to post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowClosed {
    NotAPostingHour { hour: u32 },
    AlreadyPostedThisHour { posts: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingWindow {
    hours_utc: BTreeSet<u32>,
}

impl PostingWindow {
    pub fn new(hours_utc: impl IntoIterator<Item = u32>) -> Self {
        Self {
            hours_utc: hours_utc.into_iter().filter(|h| *h < 24).collect(),
        }
    }

    pub fn hours(&self) -> impl Iterator<Item = u32> + '_ {
        self.hours_utc.iter().copied()
    }

    /// `Ok(None)` when a post may go out at `now`: the hour is a posting hour
    /// and nothing was posted since the top of it.
    pub async fn check(
        &self,
        store: &dyn HistoryStore,
        now: DateTime<Utc>,
    ) -> Result<Option<WindowClosed>, StoreError> {
        let hour = now.hour();
        if !self.hours_utc.contains(&hour) {
            return Ok(Some(WindowClosed::NotAPostingHour { hour }));
        }
        let start = hour_start(now);
        let posts = store.posts_between(start, start + TimeDelta::hours(1)).await?;
        if posts > 0 {
            return Ok(Some(WindowClosed::AlreadyPostedThisHour { posts }));
        }
        Ok(None)
    }
}

fn hour_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now)
}

/// Scheduler that runs a scheduled check on every tick of `cron`. The caller
/// starts it and keeps the runtime alive.
pub async fn build_scheduler(
    cron: &str,
    driver: Arc<PostingDriver>,
    corpus: Arc<RootCorpus>,
    window: PostingWindow,
) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let window = Arc::new(window);
    let job = Job::new_async(cron, move |_uuid, _l| {
        let driver = Arc::clone(&driver);
        let corpus = Arc::clone(&corpus);
        let window = Arc::clone(&window);
        Box::pin(async move {
            let mut rng = StdRng::from_entropy();
            match driver
                .run_scheduled(&corpus, &window, Utc::now(), &mut rng)
                .await
            {
                Ok(CycleOutcome::Posted { pair, post_id, .. }) => {
                    info!(pair = %pair, post_id = %post_id, "scheduled post published")
                }
                Ok(outcome) => info!(?outcome, "scheduled check finished without posting"),
                Err(err) => error!(error = %err, "scheduled posting failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(sched)
}
