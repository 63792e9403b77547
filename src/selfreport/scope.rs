use serde_json::{json, Value};

use super::SelfReportChannel;

/// Guard for one self-reported task.
///
/// Creating the scope emits the start report. Exactly one completion report
/// is emitted: by [`finish`](Self::finish), by [`fail`](Self::fail), or on
/// drop. A scope dropped during a panic reports an error and a failed
/// completion; any other unfinished drop counts as a normal exit.
pub struct TaskScope<'a> {
    channel: &'a SelfReportChannel,
    task_id: String,
    description: String,
    result: Option<Value>,
    done: bool,
}

impl<'a> TaskScope<'a> {
    pub(crate) fn begin(channel: &'a SelfReportChannel, task_id: &str, description: &str) -> Self {
        channel.report_task_start(task_id, description, None);
        Self {
            channel,
            task_id: task_id.to_string(),
            description: description.to_string(),
            result: None,
            done: false,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Result payload sent with the completion report.
    pub fn set_result(&mut self, result: Value) {
        self.result = Some(result);
    }

    pub fn progress(&self, progress: f64, message: Option<&str>) {
        self.channel.report_task_progress(&self.task_id, progress, message);
    }

    /// Report successful completion.
    pub fn finish(mut self) {
        self.complete_ok();
    }

    /// Report an error followed by a failed completion.
    pub fn fail(mut self, error: &str) {
        self.complete_err(error, "TaskError");
    }

    fn complete_ok(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        let result = self
            .result
            .take()
            .unwrap_or_else(|| json!({ "completed": true, "description": self.description }));
        self.channel.report_task_completion(&self.task_id, result, true);
    }

    fn complete_err(&mut self, error: &str, kind: &str) {
        if self.done {
            return;
        }
        self.done = true;
        self.channel.report_error(&self.task_id, error, None);
        self.channel.report_task_completion(
            &self.task_id,
            json!({ "error": error, "exception_type": kind }),
            false,
        );
    }
}

impl Drop for TaskScope<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.complete_err("task panicked", "Panic");
        } else {
            self.complete_ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selfreport::{Identity, StaticIdentity};
    use crate::stream::{EventRecord, EventStream};
    use std::panic::{self, AssertUnwindSafe};

    fn setup() -> (tempfile::TempDir, SelfReportChannel) {
        let dir = tempfile::TempDir::new().unwrap();
        let ch = SelfReportChannel::new(
            dir.path().join("droid_status.ndjson"),
            &StaticIdentity(Identity::new("builder", None)),
        );
        (dir, ch)
    }

    fn stored(dir: &tempfile::TempDir) -> Vec<EventRecord> {
        EventStream::new(dir.path().join("droid_status.ndjson")).load()
    }

    fn report_type(r: &EventRecord) -> &str {
        r.field("details").unwrap()["report_type"].as_str().unwrap()
    }

    #[test]
    fn test_drop_reports_default_completion() {
        let (dir, ch) = setup();
        {
            let scope = ch.begin_task("1.2", "Create API endpoints");
            scope.progress(0.5, None);
        }

        let records = stored(&dir);
        let kinds: Vec<_> = records.iter().map(report_type).collect();
        assert_eq!(kinds, vec!["task_start", "progress", "task_completion"]);
        let details = records[2].field("details").unwrap();
        assert_eq!(details["success"], true);
        assert_eq!(details["result"]["completed"], true);
        assert_eq!(details["result"]["description"], "Create API endpoints");
    }

    #[test]
    fn test_finish_with_result_reports_once() {
        let (dir, ch) = setup();
        let mut scope = ch.begin_task("1.3", "write files");
        scope.set_result(json!({"files_created": ["api/auth.rs"]}));
        scope.finish();

        let records = stored(&dir);
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[1].field("details").unwrap()["result"]["files_created"][0],
            "api/auth.rs"
        );
    }

    #[test]
    fn test_fail_reports_error_and_failed_completion() {
        let (dir, ch) = setup();
        ch.begin_task("1.4", "migrate").fail("schema mismatch");

        let records = stored(&dir);
        let kinds: Vec<_> = records.iter().map(report_type).collect();
        assert_eq!(kinds, vec!["task_start", "error", "task_completion"]);
        assert_eq!(records[2].status(), Some("failed"));
    }

    #[test]
    fn test_panic_inside_scope_reports_failure() {
        let (dir, ch) = setup();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let _scope = ch.begin_task("1.5", "risky");
            panic!("droid crashed");
        }));
        assert!(outcome.is_err());

        let records = stored(&dir);
        let kinds: Vec<_> = records.iter().map(report_type).collect();
        assert_eq!(kinds, vec!["task_start", "error", "task_completion"]);
        assert_eq!(
            records[2].field("details").unwrap()["result"]["exception_type"],
            "Panic"
        );
    }
}
