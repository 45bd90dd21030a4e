#![cfg(unix)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use cronrun_core::config::CommandConfig;
use cronrun_dispatcher::{
    ConfiguredResolver, DispatchError, DispatchOptions, Dispatcher, JobOutcome,
};
use cronrun_scheduler::{
    Claim, Job, JobStore, NewJob, SchedulerError, SqliteJobStore, INTERNAL_FAILURE_CODE,
};

/// Every minute: due for any job that has not run in the last minute.
const EVERY_MINUTE: &str = "* * * * *";
/// Midnight on January 1st.
const YEARLY: &str = "0 0 1 1 *";

fn shell_resolver() -> Arc<ConfiguredResolver> {
    let mut aliases = BTreeMap::new();
    aliases.insert(
        "shell".to_string(),
        CommandConfig {
            program: "/bin/sh".to_string(),
            args: vec!["-c".to_string()],
        },
    );
    Arc::new(ConfiguredResolver::new(aliases))
}

fn shell_job(name: &str, cron: &str, script: &str) -> NewJob {
    NewJob::new(name, "shell", cron).with_arguments([script])
}

fn options() -> DispatchOptions {
    DispatchOptions {
        timeout: Duration::from_secs(10),
        ..DispatchOptions::default()
    }
}

fn dispatcher(store: &Arc<SqliteJobStore>, options: DispatchOptions) -> Dispatcher {
    let store: Arc<dyn JobStore> = store.clone();
    Dispatcher::new(store, shell_resolver(), options)
}

fn store() -> Arc<SqliteJobStore> {
    Arc::new(SqliteJobStore::open_in_memory().expect("open store"))
}

#[tokio::test]
async fn real_exit_code_is_recorded_and_lock_released() {
    let store = store();
    let job = store.add_job(&shell_job("exit3", EVERY_MINUTE, "exit 3")).unwrap();

    let report = dispatcher(&store, options()).run_pass().await.unwrap();

    assert_eq!(
        report.outcome(job.id),
        Some(&JobOutcome::Completed { return_code: 3 })
    );
    let after = store.get(job.id).unwrap();
    assert_eq!(after.last_return_code, Some(3));
    assert!(!after.locked);
    assert!(after.last_execution.is_some());
    assert!(!report.nothing_to_do());
}

#[tokio::test]
async fn execute_immediately_overrides_schedule_once() {
    let store = store();
    let job = store.add_job(&shell_job("yearly", YEARLY, "true")).unwrap();
    // Bring the job up to date so only the override can make it due.
    let claimed = match store.claim_at(job.id, Utc::now()).unwrap() {
        Claim::Acquired(job) => job,
        Claim::NotAvailable => panic!("fresh job should be claimable"),
    };
    store.record_result(&claimed, 0).unwrap();
    store.request_immediate(job.id).unwrap();

    let d = dispatcher(&store, options());
    let first = d.run_pass().await.unwrap();
    assert_eq!(
        first.outcome(job.id),
        Some(&JobOutcome::Completed { return_code: 0 })
    );
    assert!(!store.get(job.id).unwrap().execute_immediately);

    let second = d.run_pass().await.unwrap();
    assert_eq!(second.outcome(job.id), Some(&JobOutcome::NotDue));
    assert!(second.nothing_to_do());
}

#[tokio::test]
async fn timeout_records_internal_failure() {
    let store = store();
    let job = store.add_job(&shell_job("slow", EVERY_MINUTE, "sleep 5")).unwrap();

    let opts = DispatchOptions {
        timeout: Duration::from_secs(1),
        ..options()
    };
    let report = dispatcher(&store, opts).run_pass().await.unwrap();

    match report.outcome(job.id) {
        Some(JobOutcome::Failed { return_code, .. }) => {
            assert_eq!(*return_code, INTERNAL_FAILURE_CODE)
        }
        other => panic!("expected failure, got {other:?}"),
    }
    let after = store.get(job.id).unwrap();
    assert_eq!(after.last_return_code, Some(INTERNAL_FAILURE_CODE));
    assert!(!after.locked);
}

#[tokio::test]
async fn abnormal_exit_code_is_recorded() {
    let store = store();
    let job = store.add_job(&shell_job("sigint", EVERY_MINUTE, "exit 130")).unwrap();

    let report = dispatcher(&store, options()).run_pass().await.unwrap();

    assert!(matches!(
        report.outcome(job.id),
        Some(JobOutcome::Failed { return_code: 130, .. })
    ));
    assert_eq!(store.get(job.id).unwrap().last_return_code, Some(130));
}

#[tokio::test]
async fn unresolvable_command_fails_without_spawning() {
    let store = store();
    let job = store
        .add_job(&NewJob::new("ghost", "cronrun-no-such-command-xyz", EVERY_MINUTE))
        .unwrap();

    let report = dispatcher(&store, options()).run_pass().await.unwrap();

    assert!(matches!(
        report.outcome(job.id),
        Some(JobOutcome::Failed { return_code: INTERNAL_FAILURE_CODE, .. })
    ));
    let after = store.get(job.id).unwrap();
    assert_eq!(after.last_return_code, Some(INTERNAL_FAILURE_CODE));
    assert!(!after.locked);
}

#[tokio::test]
async fn stale_lock_is_reaped_then_job_runs() {
    let store = store();
    let job = store.add_job(&shell_job("crashed", EVERY_MINUTE, "true")).unwrap();
    // A dispatcher claimed it 700s ago and never came back.
    store
        .claim_at(job.id, Utc::now() - ChronoDuration::seconds(700))
        .unwrap();

    let opts = DispatchOptions {
        unlock_threshold_secs: Some(300),
        ..options()
    };
    let report = dispatcher(&store, opts).run_pass().await.unwrap();

    assert_eq!(report.unlocked, 1);
    assert_eq!(
        report.outcome(job.id),
        Some(&JobOutcome::Completed { return_code: 0 })
    );
    assert!(!store.get(job.id).unwrap().locked);
}

#[tokio::test]
async fn held_lock_is_skipped() {
    let store = store();
    let job = store.add_job(&shell_job("busy", EVERY_MINUTE, "true")).unwrap();
    store
        .claim_at(job.id, Utc::now() - ChronoDuration::seconds(120))
        .unwrap();

    let report = dispatcher(&store, options()).run_pass().await.unwrap();

    assert_eq!(report.outcome(job.id), Some(&JobOutcome::Locked));
    assert_eq!(report.executed(), 0);
    let after = store.get(job.id).unwrap();
    assert!(after.locked);
    assert_eq!(after.last_return_code, None);
}

#[tokio::test]
async fn dump_mode_reports_without_claiming() {
    let store = store();
    let due = store.add_job(&shell_job("due", EVERY_MINUTE, "exit 9")).unwrap();

    let opts = DispatchOptions {
        dump: true,
        ..options()
    };
    let report = dispatcher(&store, opts).run_pass().await.unwrap();

    assert_eq!(report.outcome(due.id), Some(&JobOutcome::Due));
    assert_eq!(report.executed(), 0);
    assert_eq!(store.get(due.id).unwrap(), due);
}

#[tokio::test]
async fn empty_table_has_nothing_to_do() {
    let store = store();
    let report = dispatcher(&store, options()).run_pass().await.unwrap();
    assert!(report.jobs.is_empty());
    assert!(report.nothing_to_do());
}

#[tokio::test]
async fn disabled_jobs_are_not_considered() {
    let store = store();
    let job = store.add_job(&shell_job("off", EVERY_MINUTE, "true")).unwrap();
    store.set_enabled(job.id, false).unwrap();

    let report = dispatcher(&store, options()).run_pass().await.unwrap();

    assert!(report.outcome(job.id).is_none());
    assert_eq!(store.get(job.id).unwrap().last_execution, None);
}

#[tokio::test]
async fn unwritable_log_dir_aborts_before_any_claim() {
    let tmp = tempfile::tempdir().unwrap();
    let blocker = tmp.path().join("not-a-dir");
    std::fs::write(&blocker, "x").unwrap();

    let store = store();
    let job = store.add_job(&shell_job("blocked", EVERY_MINUTE, "true")).unwrap();

    let opts = DispatchOptions {
        log_dir: Some(blocker.join("logs")),
        ..options()
    };
    let err = dispatcher(&store, opts).run_pass().await.unwrap_err();

    assert!(matches!(err, DispatchError::LogDirUnwritable { .. }));
    let after = store.get(job.id).unwrap();
    assert!(!after.locked);
    assert_eq!(after.last_execution, None);
}

#[tokio::test]
async fn job_output_lands_in_its_log_with_correlation_ids() {
    let tmp = tempfile::tempdir().unwrap();
    let store = store();
    let mut new = shell_job(
        "report",
        EVERY_MINUTE,
        "echo \"run=$CRONRUN_RUN_ID job=$CRONRUN_JOB_ID\"; echo oops >&2",
    );
    new.log_file = Some("report.log".to_string());
    let job = store.add_job(&new).unwrap();

    let opts = DispatchOptions {
        log_dir: Some(tmp.path().to_path_buf()),
        ..options()
    };
    dispatcher(&store, opts).run_pass().await.unwrap();

    let text = std::fs::read_to_string(tmp.path().join("report.log")).unwrap();
    let records: Vec<serde_json::Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    // start, two output lines, finish
    assert_eq!(records.len(), 4);

    let run_id = records[0]["run_id"].as_str().unwrap().to_string();
    assert!(!run_id.is_empty());
    for r in &records {
        assert_eq!(r["job_id"], job.id);
        assert_eq!(r["run_id"], run_id.as_str());
    }

    let stdout = records
        .iter()
        .find(|r| r["stream"] == "stdout")
        .expect("stdout record");
    assert_eq!(
        stdout["message"],
        format!("run={run_id} job={}", job.id).as_str()
    );
    let stderr = records
        .iter()
        .find(|r| r["stream"] == "stderr")
        .expect("stderr record");
    assert_eq!(stderr["level"], "WARN");
}

/// Delegates to a real store but refuses to record results for one job.
struct FlakyStore {
    inner: Arc<SqliteJobStore>,
    fail_for: i64,
}

impl JobStore for FlakyStore {
    fn list_enabled(&self) -> cronrun_scheduler::Result<Vec<Job>> {
        self.inner.list_enabled()
    }

    fn claim(&self, id: i64) -> cronrun_scheduler::Result<Claim> {
        self.inner.claim(id)
    }

    fn record_result(&self, job: &Job, return_code: i32) -> cronrun_scheduler::Result<()> {
        if job.id == self.fail_for {
            return Err(SchedulerError::JobNotFound { id: job.id });
        }
        self.inner.record_result(job, return_code)
    }

    fn unlock_stale(&self, threshold_secs: u64) -> cronrun_scheduler::Result<usize> {
        self.inner.unlock_stale(threshold_secs)
    }
}

#[tokio::test]
async fn failed_result_write_does_not_stop_the_pass() {
    let store = store();
    let mut first = shell_job("first", EVERY_MINUTE, "true");
    first.priority = 10;
    let first = store.add_job(&first).unwrap();
    let second = store.add_job(&shell_job("second", EVERY_MINUTE, "exit 4")).unwrap();

    let flaky: Arc<dyn JobStore> = Arc::new(FlakyStore {
        inner: store.clone(),
        fail_for: first.id,
    });
    let report = Dispatcher::new(flaky, shell_resolver(), options())
        .run_pass()
        .await
        .unwrap();

    assert_eq!(report.jobs[0].job_id, first.id);
    assert_eq!(
        report.outcome(second.id),
        Some(&JobOutcome::Completed { return_code: 4 })
    );
    // The first job keeps its lock for the reaper.
    assert!(store.get(first.id).unwrap().locked);
    assert_eq!(store.get(second.id).unwrap().last_return_code, Some(4));
}

#[tokio::test]
async fn bad_schedule_row_does_not_stop_the_pass() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("jobs.db");
    let store = Arc::new(SqliteJobStore::open(&path, Duration::from_secs(1)).unwrap());
    let broken = store.add_job(&shell_job("broken", EVERY_MINUTE, "true")).unwrap();
    let fine = store.add_job(&shell_job("fine", EVERY_MINUTE, "true")).unwrap();

    // Rows edited by hand can hold expressions add_job would reject.
    let raw = rusqlite::Connection::open(&path).unwrap();
    raw.execute(
        "UPDATE scheduled_jobs SET cron_expression = 'every tuesday' WHERE id = ?1",
        [broken.id],
    )
    .unwrap();
    drop(raw);

    let report = dispatcher(&store, options()).run_pass().await.unwrap();

    assert!(matches!(
        report.outcome(broken.id),
        Some(JobOutcome::InvalidSchedule(_))
    ));
    assert_eq!(
        report.outcome(fine.id),
        Some(&JobOutcome::Completed { return_code: 0 })
    );
    assert!(!store.get(broken.id).unwrap().locked);
}

#[tokio::test]
async fn oversized_timeout_still_runs_and_releases() {
    let store = store();
    let job = store.add_job(&shell_job("patient", EVERY_MINUTE, "exit 0")).unwrap();

    let opts = DispatchOptions {
        timeout: Duration::from_secs(u64::MAX),
        ..options()
    };
    let report = dispatcher(&store, opts).run_pass().await.unwrap();

    assert_eq!(
        report.outcome(job.id),
        Some(&JobOutcome::Completed { return_code: 0 })
    );
    assert!(!store.get(job.id).unwrap().locked);
}

#[tokio::test]
async fn oversized_unlock_threshold_keeps_fresh_locks() {
    let store = store();
    let job = store.add_job(&shell_job("running", EVERY_MINUTE, "true")).unwrap();
    store
        .claim_at(job.id, Utc::now() - ChronoDuration::seconds(120))
        .unwrap();

    let opts = DispatchOptions {
        unlock_threshold_secs: Some(u64::MAX),
        ..options()
    };
    let report = dispatcher(&store, opts).run_pass().await.unwrap();

    assert_eq!(report.unlocked, 0);
    assert_eq!(report.outcome(job.id), Some(&JobOutcome::Locked));
    assert!(store.get(job.id).unwrap().locked);
}

#[tokio::test]
async fn detached_background_work_does_not_fail_the_job() {
    let store = store();
    let job = store
        .add_job(&shell_job("spawner", EVERY_MINUTE, "sleep 3 & echo started; exit 0"))
        .unwrap();

    let opts = DispatchOptions {
        timeout: Duration::from_secs(2),
        ..options()
    };
    let report = dispatcher(&store, opts).run_pass().await.unwrap();

    assert_eq!(
        report.outcome(job.id),
        Some(&JobOutcome::Completed { return_code: 0 })
    );
    assert_eq!(store.get(job.id).unwrap().last_return_code, Some(0));
}
