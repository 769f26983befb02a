//! Bounded-concurrency execution of `parallel for` loops.
//!
//! Every item becomes a task on a [`JoinSet`].  A shared [`Semaphore`]
//! admits at most `concurrency` task bodies at a time; the rest wait for a
//! permit.  Each task runs the loop body on a forked [`Evaluator`] with its
//! own child scope, so siblings never touch each other's bindings.  Results
//! are funnelled into one [`Aggregate`] behind a mutex once a task finishes
//! and merged back in item order.
//!
//! A failing task does not cancel its siblings.  After the join the loop
//! reports the failure with the lowest item index, together with the total
//! failure count; descriptors and statistics from every task are kept.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::error::EvalError;
use super::{
    ast::ForStmt,
    interp::{Evaluator, RequestDescriptor, Scope},
    value::{Map, Value},
};

/// Name under which the latest loop's statistics are bound after it ends.
pub const STATS_VAR: &str = "_parallel_stats";

// ── ParallelStats ─────────────────────────────────────────────────────────────

/// Timing summary for one parallel loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParallelStats {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    /// Fastest task body.
    pub min: Duration,
    /// Slowest task body.
    pub max: Duration,
    pub avg: Duration,
    /// Sum of all task durations.
    pub total_time: Duration,
    /// Wall clock from the first spawn to the last join.
    pub wall: Duration,
}

impl ParallelStats {
    fn from_samples(total: usize, failed: usize, samples: &[Duration], wall: Duration) -> Self {
        let total_time: Duration = samples.iter().sum();
        let avg = match u32::try_from(samples.len()) {
            Ok(n) if n > 0 => total_time / n,
            _ => Duration::ZERO,
        };
        ParallelStats {
            total,
            success: total.saturating_sub(failed),
            failed,
            min: samples.iter().min().copied().unwrap_or_default(),
            max: samples.iter().max().copied().unwrap_or_default(),
            avg,
            total_time,
            wall,
        }
    }

    /// Mapping form, with durations rendered like `12.5ms`.
    pub fn to_value(&self) -> Value {
        let dur = |d: Duration| Value::Str(format!("{d:?}"));
        let mut map = Map::new();
        map.insert("total".into(), Value::Int(self.total as i64));
        map.insert("success".into(), Value::Int(self.success as i64));
        map.insert("failed".into(), Value::Int(self.failed as i64));
        map.insert("min_time".into(), dur(self.min));
        map.insert("max_time".into(), dur(self.max));
        map.insert("avg_time".into(), dur(self.avg));
        map.insert("total_time".into(), dur(self.total_time));
        map.insert("wall_time".into(), dur(self.wall));
        Value::Map(map)
    }
}

// ── Aggregate ─────────────────────────────────────────────────────────────────

/// What one finished task hands back, keyed by its item index.
struct Finished {
    index: usize,
    requests: Vec<RequestDescriptor>,
    stats: Vec<ParallelStats>,
    output: Vec<String>,
}

#[derive(Default)]
struct Aggregate {
    finished: Vec<Finished>,
    samples: Vec<Duration>,
    failures: Vec<(usize, EvalError)>,
}

impl Aggregate {
    fn absorb(&mut self, index: usize, task: Evaluator, elapsed: Duration, result: Result<(), EvalError>) {
        self.finished.push(Finished {
            index,
            requests: task.requests,
            stats: task.parallel_stats,
            output: task.output,
        });
        self.samples.push(elapsed);
        if let Err(e) = result {
            self.failures.push((index, e));
        }
    }
}

fn lock(shared: &Mutex<Aggregate>) -> MutexGuard<'_, Aggregate> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// Run `stmt.body` once per item, concurrently, and merge the results into
/// `ev`.  Returns once every task has finished.
pub(super) async fn run(ev: &mut Evaluator, stmt: &ForStmt, items: Vec<Value>) -> Result<(), EvalError> {
    let total = items.len();
    let limit = match stmt.concurrency {
        Some(n) if n > 0 => usize::try_from(n).unwrap_or(usize::MAX),
        _ => total,
    }
    .clamp(1, Semaphore::MAX_PERMITS);

    debug!(line = stmt.pos.line, items = total, limit, "parallel loop");
    let gate = Arc::new(Semaphore::new(limit));
    let shared = Arc::new(Mutex::new(Aggregate::default()));
    let started = Instant::now();
    let mut tasks = JoinSet::new();

    for (index, item) in items.into_iter().enumerate() {
        let mut scope = Scope::child(Arc::clone(&ev.scope));
        scope.set(stmt.item.as_str(), item);
        if let Some(name) = &stmt.index {
            scope.set(name.as_str(), Value::Int(index as i64));
        }
        let mut task = ev.fork(scope);
        let body = Arc::clone(&stmt.body);
        let gate = Arc::clone(&gate);
        let shared = Arc::clone(&shared);

        tasks.spawn(async move {
            let _permit = match gate.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    let result = Err(EvalError::TaskAborted(e.to_string()));
                    lock(&shared).absorb(index, task, Duration::ZERO, result);
                    return;
                }
            };
            let t0 = Instant::now();
            let result = task.exec_block(&body).await;
            let elapsed = t0.elapsed();
            debug!(index, ?elapsed, ok = result.is_ok(), "parallel task done");
            lock(&shared).absorb(index, task, elapsed, result);
        });
    }

    let mut aborted = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            aborted.push(EvalError::TaskAborted(e.to_string()));
        }
    }
    let wall = started.elapsed();

    let mut agg = std::mem::take(&mut *lock(&shared));
    // Panicked tasks never reached `absorb`; they sort after real failures.
    agg.failures
        .extend(aborted.into_iter().map(|e| (usize::MAX, e)));
    agg.failures.sort_by_key(|(index, _)| *index);

    let failed = agg.failures.len();
    let stats = ParallelStats::from_samples(total, failed, &agg.samples, wall);
    info!(
        total,
        success = stats.success,
        failed,
        wall = ?stats.wall,
        avg = ?stats.avg,
        "parallel loop finished"
    );

    // Merge in item order regardless of completion order.
    agg.finished.sort_by_key(|f| f.index);
    ev.set_var(STATS_VAR, stats.to_value());
    ev.parallel_stats.push(stats);
    for f in agg.finished {
        ev.requests.extend(f.requests);
        ev.parallel_stats.extend(f.stats);
        ev.output.extend(f.output);
    }

    match agg.failures.into_iter().next() {
        Some((_, first)) => Err(EvalError::Parallel {
            failed,
            total,
            first: Box::new(first),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn stats_from_samples() {
        let samples = [
            Duration::from_millis(10),
            Duration::from_millis(30),
            Duration::from_millis(20),
        ];
        let s = ParallelStats::from_samples(4, 1, &samples, Duration::from_millis(35));
        assert_eq!(s.success, 3);
        assert_eq!(s.min, Duration::from_millis(10));
        assert_eq!(s.max, Duration::from_millis(30));
        assert_eq!(s.avg, Duration::from_millis(20));
        assert_eq!(s.total_time, Duration::from_millis(60));
    }

    #[test]
    fn empty_stats_are_zero() {
        let s = ParallelStats::from_samples(0, 0, &[], Duration::ZERO);
        assert_eq!(s, ParallelStats::default());
    }

    #[tokio::test]
    async fn gate_bounds_running_tasks() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (r, p) = (Arc::clone(&running), Arc::clone(&peak));
        let mut ev = Evaluator::new().with_request_callback(move |_req| {
            let (r, p) = (Arc::clone(&r), Arc::clone(&p));
            async move {
                let now = r.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                r.fetch_sub(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        });

        let reqs = ev
            .eval_source("parallel 2 for $id in 6\n  get \"https://x/$id\"\n")
            .await
            .unwrap();
        assert_eq!(reqs.len(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(ev.parallel_stats().len(), 1);
        assert_eq!(ev.parallel_stats()[0].success, 6);
    }

    #[tokio::test]
    async fn results_merge_in_item_order() {
        // Later items finish first.
        let mut ev = Evaluator::new().with_request_callback(|req: RequestDescriptor| async move {
            let n: u64 = req.url_text().rsplit('/').next().unwrap().parse().unwrap();
            tokio::time::sleep(Duration::from_millis(40 - n * 10)).await;
            Ok(Value::Null)
        });
        ev.eval_source("parallel for $i in 4\n  get \"https://x/$i\"\n  echo \"$i\"\n")
            .await
            .unwrap();
        let urls: Vec<String> = ev.requests().iter().map(RequestDescriptor::url_text).collect();
        assert_eq!(urls, ["https://x/0", "https://x/1", "https://x/2", "https://x/3"]);
        assert_eq!(ev.output, ["0", "1", "2", "3"]);
    }

    #[tokio::test]
    async fn failures_are_isolated_and_reported() {
        let mut ev = Evaluator::new().with_request_callback(|req: RequestDescriptor| async move {
            match req.url_text().as_str() {
                "https://x/1" | "https://x/3" => Err(format!("boom {}", req.url_text())),
                _ => Ok(Value::Null),
            }
        });
        let err = ev
            .eval_source("parallel for $i in 5\n  get \"https://x/$i\"\n")
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "parallel execution had 2 errors (of 5 tasks), first: request failed: boom https://x/1"
        );
        let urls: BTreeSet<String> = ev.requests().iter().map(RequestDescriptor::url_text).collect();
        assert_eq!(urls.len(), 5);
        let stats = &ev.parallel_stats()[0];
        assert_eq!((stats.success, stats.failed), (3, 2));
    }

    #[tokio::test]
    async fn task_scopes_are_isolated() {
        let mut ev = Evaluator::new();
        ev.eval_source("@who outer\nparallel for $x in 3\n  @who inner\n  get \"https://x/$x\"\n")
            .await
            .unwrap();
        assert_eq!(ev.get_var("who"), Some(&Value::from("outer")));
        assert_eq!(ev.get_var("x"), None);
    }

    #[tokio::test]
    async fn stats_variable_is_bound() {
        let mut ev = Evaluator::new();
        ev.eval_source("parallel for $x in 2\n  get \"https://x/$x\"\necho $_parallel_stats.total\n")
            .await
            .unwrap();
        assert_eq!(ev.output, vec!["2"]);
    }

    #[tokio::test]
    async fn nested_loops_report_outer_first() {
        let mut ev = Evaluator::new();
        ev.eval_source(concat!(
            "parallel for $a in 2\n",
            "  parallel for $b in 3\n",
            "    get \"https://x/$a/$b\"\n",
        ))
        .await
        .unwrap();
        assert_eq!(ev.requests().len(), 6);
        let totals: Vec<usize> = ev.parallel_stats().iter().map(|s| s.total).collect();
        assert_eq!(totals, vec![2, 3, 3]);
    }
}
