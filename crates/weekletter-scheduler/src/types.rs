use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Name of the job that polls the Content Source for every subject.
pub const DOCUMENT_CHECK_JOB: &str = "document-check";
/// Name of the job that re-runs failed fetches whose retry time has come.
pub const RETRY_SWEEP_JOB: &str = "retry-sweep";

/// Persisted lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for its next_run time.
    Idle,
    /// Currently being executed.
    Running,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Idle => "idle",
            JobStatus::Running => "running",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "idle" => Ok(JobStatus::Idle),
            "running" => Ok(JobStatus::Running),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Where a job stands relative to `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// `next_run` is still in the future.
    Waiting,
    /// Inside `[next_run, next_run + window]`.
    Due,
    /// Past the execution window; skip to the next occurrence.
    Missed,
    /// Disabled or already running.
    Blocked,
}

/// A persisted job record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub name: String,
    pub cron: String,
    pub enabled: bool,
    pub status: JobStatus,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
    pub run_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledJob {
    pub fn readiness(&self, now: DateTime<Utc>, window: Duration) -> Readiness {
        if !self.enabled || self.status == JobStatus::Running {
            Readiness::Blocked
        } else if now < self.next_run {
            Readiness::Waiting
        } else if now <= self.next_run + window {
            Readiness::Due
        } else {
            Readiness::Missed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(next_run: DateTime<Utc>) -> ScheduledJob {
        ScheduledJob {
            name: DOCUMENT_CHECK_JOB.into(),
            cron: "0 0 * * * *".into(),
            enabled: true,
            status: JobStatus::Idle,
            last_run: None,
            next_run,
            run_count: 0,
            created_at: next_run,
            updated_at: next_run,
        }
    }

    #[test]
    fn readiness_follows_execution_window() {
        let next = Utc::now();
        let window = Duration::seconds(60);
        let j = job(next);

        assert_eq!(j.readiness(next - Duration::seconds(1), window), Readiness::Waiting);
        assert_eq!(j.readiness(next, window), Readiness::Due);
        assert_eq!(j.readiness(next + window, window), Readiness::Due);
        assert_eq!(j.readiness(next + window + Duration::seconds(1), window), Readiness::Missed);
    }

    #[test]
    fn disabled_or_running_jobs_are_blocked() {
        let next = Utc::now();
        let mut j = job(next);
        j.enabled = false;
        assert_eq!(j.readiness(next, Duration::seconds(60)), Readiness::Blocked);
        j.enabled = true;
        j.status = JobStatus::Running;
        assert_eq!(j.readiness(next, Duration::seconds(60)), Readiness::Blocked);
    }

    #[test]
    fn status_round_trips_through_str() {
        for s in [JobStatus::Idle, JobStatus::Running] {
            assert_eq!(s.to_string().parse::<JobStatus>().unwrap(), s);
        }
        assert!("missed".parse::<JobStatus>().is_err());
    }
}
