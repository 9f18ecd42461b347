// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use chrono::{DateTime, Utc};
use coday_core::Session;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cron_expr::CronSchedule;

/// A cron-driven command bound to the session (project, agent, thread) it
/// should run against when it fires.
pub struct ScheduledJob {
    pub id: String,
    pub cron: CronSchedule,
    pub command: String,
    pub agent_hint: Option<String>,
}

struct Entry {
    job: ScheduledJob,
    session: Arc<Session>,
    next_run: DateTime<Utc>,
}

/// Owns a set of [`ScheduledJob`]s, each bound to a [`Session`], and fires
/// them by calling `Session::submit` exactly as a client submission would —
/// the session resolves the target agent and starts a run loop itself.
pub struct Scheduler {
    entries: Mutex<Vec<Entry>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self { entries: Mutex::new(Vec::new()) }
    }

    /// Register a job, computing its first fire time from now.
    pub async fn schedule(&self, job: ScheduledJob, session: Arc<Session>) -> anyhow::Result<()> {
        let next_run = job.cron.next_after(Utc::now())?;
        self.entries.lock().await.push(Entry { job, session, next_run });
        Ok(())
    }

    /// Remove a job by id; a configuration change that drops a job should
    /// call this so the run loop stops waking for it.
    pub async fn unschedule(&self, job_id: &str) {
        self.entries.lock().await.retain(|e| e.job.id != job_id);
    }

    /// Recompute `next_run` for a job whose cron expression changed, so the
    /// updated schedule is republished immediately rather than waiting for
    /// the stale one to fire first.
    pub async fn reschedule(&self, job_id: &str, cron: CronSchedule) -> anyhow::Result<()> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.iter_mut().find(|e| e.job.id == job_id) {
            entry.next_run = cron.next_after(Utc::now())?;
            entry.job.cron = cron;
        }
        Ok(())
    }

    pub async fn next_fire_times(&self) -> Vec<(String, DateTime<Utc>)> {
        self.entries.lock().await.iter().map(|e| (e.job.id.clone(), e.next_run)).collect()
    }

    /// Run forever, firing the soonest-due job and re-scheduling it,
    /// until `cancel` fires. Sessions serialize their own turns, so firing
    /// a job whose previous invocation is still running just enqueues
    /// another turn behind it, per the normal FIFO queue semantics.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            let wait_until = {
                let entries = self.entries.lock().await;
                entries.iter().map(|e| e.next_run).min()
            };

            let Some(target) = wait_until else {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => continue,
                }
            };

            let remaining = (target - Utc::now()).to_std().unwrap_or(std::time::Duration::ZERO);
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(remaining) => {}
            }

            let due: Vec<usize> = {
                let entries = self.entries.lock().await;
                entries
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.next_run <= Utc::now())
                    .map(|(i, _)| i)
                    .collect()
            };

            let mut expired = Vec::new();
            for idx in due {
                let (id, command, agent_hint, session) = {
                    let entries = self.entries.lock().await;
                    let Some(entry) = entries.get(idx) else { continue };
                    (entry.job.id.clone(), entry.job.command.clone(), entry.job.agent_hint.clone(), entry.session.clone())
                };
                info!(job_id = %id, "firing scheduled job");
                if let Err(err) = session.submit(command, agent_hint).await {
                    warn!(job_id = %id, %err, "scheduled job failed to submit");
                }

                let mut entries = self.entries.lock().await;
                if let Some(entry) = entries.get_mut(idx) {
                    match entry.job.cron.next_after(Utc::now()) {
                        Ok(next) => entry.next_run = next,
                        Err(err) => {
                            warn!(job_id = %id, %err, "could not compute next run, dropping job");
                            expired.push(id);
                        }
                    }
                }
            }
            if !expired.is_empty() {
                self.entries.lock().await.retain(|e| !expired.contains(&e.job.id));
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
