//! Cron-driven job table.
//!
//! Each job owns a tokio task that sleeps until its next fire time (evaluated
//! in the scheduler timezone), runs, and only then computes the following
//! fire time. A slow run therefore delays its own next tick instead of
//! overlapping itself. Jobs are independent of each other.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use croner::Cron;
use tokio::task::JoinSet;

use duewatch_common::config::ScheduleConfig;
use duewatch_common::types::Domain;
use duewatch_engine::dispatcher::SweepKind;
use duewatch_engine::runtime::SweepRuntime;

/// What a job does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAction {
    Sweep(Domain, SweepKind),
    Cleanup,
}

pub struct Job {
    pub name: &'static str,
    pub expression: String,
    pub cron: Cron,
    pub action: JobAction,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("expression", &self.expression)
            .field("action", &self.action)
            .finish()
    }
}

impl Job {
    pub fn new(name: &'static str, expression: &str, action: JobAction) -> anyhow::Result<Self> {
        let cron = Cron::new(expression).parse().map_err(|e| {
            anyhow::anyhow!("Invalid cron expression for job '{}' ('{}'): {}", name, expression, e)
        })?;

        Ok(Self {
            name,
            expression: expression.to_string(),
            cron,
            action,
        })
    }

    /// Next fire time strictly after `after`, evaluated in `timezone`.
    pub fn next_fire(&self, after: DateTime<Utc>, timezone: Tz) -> Option<DateTime<Utc>> {
        self.cron
            .find_next_occurrence(&after.with_timezone(&timezone), false)
            .ok()
            .map(|next| next.with_timezone(&Utc))
    }
}

/// The full job table: regular + urgent sweep per domain, plus cleanup.
pub fn job_table(schedules: &ScheduleConfig) -> anyhow::Result<Vec<Job>> {
    Ok(vec![
        Job::new(
            "task",
            &schedules.task,
            JobAction::Sweep(Domain::Task, SweepKind::Regular),
        )?,
        Job::new(
            "task-urgent",
            &schedules.task_urgent,
            JobAction::Sweep(Domain::Task, SweepKind::Urgent),
        )?,
        Job::new(
            "agenda",
            &schedules.agenda,
            JobAction::Sweep(Domain::Agenda, SweepKind::Regular),
        )?,
        Job::new(
            "agenda-urgent",
            &schedules.agenda_urgent,
            JobAction::Sweep(Domain::Agenda, SweepKind::Urgent),
        )?,
        Job::new(
            "financial",
            &schedules.financial,
            JobAction::Sweep(Domain::Financial, SweepKind::Regular),
        )?,
        Job::new(
            "financial-urgent",
            &schedules.financial_urgent,
            JobAction::Sweep(Domain::Financial, SweepKind::Urgent),
        )?,
        Job::new("cleanup", &schedules.cleanup, JobAction::Cleanup)?,
    ])
}

/// Runs every job in the table until dropped.
pub struct Scheduler {
    runtime: SweepRuntime,
    timezone: Tz,
    jobs: Vec<Job>,
}

impl Scheduler {
    pub fn new(runtime: SweepRuntime, timezone: Tz, jobs: Vec<Job>) -> Self {
        Self {
            runtime,
            timezone,
            jobs,
        }
    }

    /// Spawn one task per job and wait on them. Dropping the returned future
    /// aborts every job.
    pub async fn run(self) -> anyhow::Result<()> {
        let mut tasks = JoinSet::new();

        for job in self.jobs {
            tracing::info!(
                job = job.name,
                cron = %job.expression,
                next = ?job.next_fire(Utc::now(), self.timezone),
                "Job scheduled"
            );
            tasks.spawn(run_job(Arc::new(job), self.runtime.clone(), self.timezone));
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Scheduler job task ended unexpectedly");
            }
        }

        Ok(())
    }
}

async fn run_job(job: Arc<Job>, runtime: SweepRuntime, timezone: Tz) {
    loop {
        let now = Utc::now();
        let Some(next) = job.next_fire(now, timezone) else {
            tracing::error!(job = job.name, "No future fire time, job stopped");
            return;
        };

        let wait = (next - now).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;

        execute(&job, &runtime).await;
    }
}

async fn execute(job: &Job, runtime: &SweepRuntime) {
    match job.action {
        JobAction::Sweep(domain, kind) => {
            match runtime.dispatcher.run_sweep(domain, kind).await {
                Ok(report) => {
                    tracing::info!(
                        job = job.name,
                        sent = report.sent,
                        failed = report.failed,
                        candidates = report.candidates,
                        "Scheduled sweep completed"
                    );
                }
                Err(e) => {
                    tracing::error!(job = job.name, error = %e, "Scheduled sweep failed");
                }
            }
        }
        JobAction::Cleanup => match runtime.cleanup.run().await {
            Ok(report) => {
                tracing::info!(job = job.name, deleted = report.deleted, "Cleanup completed");
            }
            Err(e) => {
                tracing::error!(job = job.name, error = %e, "Cleanup failed");
            }
        },
    }
}
