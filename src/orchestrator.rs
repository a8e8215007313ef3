//! Drives the verified mover over a plan, one file at a time.
//!
//! Every destination is resolved before the first byte moves, so the resume
//! record always holds the complete plan with fixed destinations. After each
//! file the in-memory resume point is advanced and written out in full before
//! the next file starts.

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::RunError;
use crate::events::Event;
use crate::exit_codes::exit;
use crate::model::{DuplicatePolicy, FileOperation, OperationStatus, Plan};
use crate::mover::Mover;
use crate::reporter::ProgressSink;
use crate::resolve::{Collision, DestinationResolver, MAX_DUPLICATE_ATTEMPTS};
use crate::shutdown::CancelFlag;
use crate::store::{OperationType, ResumePoint, ResumeStore};

/// Skip reason recorded for every operation of a dry run.
pub const DRY_RUN_REASON: &str = "dry run";
/// Skip reason recorded when the `skip` policy meets an existing destination.
pub const DESTINATION_EXISTS_REASON: &str = "destination exists";
/// Skip reason recorded when the `skip` policy meets a name an earlier file of
/// the same run will take.
pub const NAME_PLANNED_REASON: &str = "name already planned in this run";
/// Skip reason recorded for a file whose destination is its own path.
pub const ALREADY_IN_PLACE_REASON: &str = "already in place";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every operation is terminal and none failed.
    Success,
    /// At least one operation failed.
    PartialFailure,
    /// Interrupted; the remaining work is in the resume store.
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// What one `run` or `resume` call did.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Resume record id; `None` for dry runs and runs without a store.
    pub operation_id: Option<Uuid>,
    /// Operations that reached an outcome during this call, in order.
    pub operations: Vec<FileOperation>,
    /// Operations still pending when the call returned.
    pub remaining: usize,
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn counts(&self) -> RunCounts {
        let mut counts = RunCounts::default();
        for op in &self.operations {
            match op.status() {
                OperationStatus::Completed => counts.completed += 1,
                OperationStatus::Failed => counts.failed += 1,
                OperationStatus::Skipped => counts.skipped += 1,
                _ => {}
            }
        }
        counts
    }

    pub fn bytes_moved(&self) -> u64 {
        self.operations
            .iter()
            .filter(|op| op.is_successful())
            .map(|op| op.source().size)
            .sum()
    }

    pub fn exit_code(&self) -> i32 {
        match self.outcome {
            RunOutcome::Success => exit::SUCCESS,
            RunOutcome::PartialFailure => exit::PARTIAL_FAILURE,
            RunOutcome::Cancelled => exit::CANCELLED,
        }
    }
}

pub struct Orchestrator<'a> {
    config: Config,
    store: Option<&'a ResumeStore>,
    cancel: CancelFlag,
    operation_type: OperationType,
    attempt_limit: u32,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: Config, cancel: CancelFlag) -> Self {
        Self {
            config,
            store: None,
            cancel,
            operation_type: OperationType::Organize,
            attempt_limit: MAX_DUPLICATE_ATTEMPTS,
        }
    }

    /// Persist progress in `store` after every file.
    pub fn with_store(mut self, store: &'a ResumeStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_operation_type(mut self, operation_type: OperationType) -> Self {
        self.operation_type = operation_type;
        self
    }

    /// Cap on `name_N.ext` candidates tried per file.
    pub fn with_attempt_limit(mut self, limit: u32) -> Self {
        self.attempt_limit = limit;
        self
    }

    /// Plan and, unless `dry_run`, execute every file of `plan` in order.
    pub fn run(
        &self,
        plan: &Plan,
        dry_run: bool,
        sink: &mut dyn ProgressSink,
    ) -> Result<RunReport, RunError> {
        let planned = self.plan(plan, dry_run)?;

        if dry_run {
            return self.preview(planned, sink);
        }

        let point = ResumePoint::new(
            self.operation_type,
            plan.source_root.clone(),
            &self.config,
            planned,
        )?;
        if let Some(store) = self.store {
            store.save(&point)?;
            info!(id = %point.operation_id, pending = point.pending.len(), "started operation");
        }

        sink.record(Event::RunStarted {
            operation_id: self.store.map(|_| point.operation_id),
            total: point.total(),
            pending: point.pending.len(),
            dry_run: false,
            resumed: false,
        });
        for op in point.completed.iter().chain(&point.pending) {
            sink.record(Event::OpPlanned {
                src: op.source().path.clone(),
                dst: op.destination().to_path_buf(),
            });
        }
        let settled = point.completed.clone();
        for op in &settled {
            if let Some(event) = Event::for_outcome(op) {
                sink.record(event);
            }
        }

        self.execute(point, settled, sink)
    }

    /// Continue an interrupted run. Pending operations are executed exactly as
    /// recorded; nothing is re-resolved.
    pub fn resume(
        &self,
        point: ResumePoint,
        sink: &mut dyn ProgressSink,
    ) -> Result<RunReport, RunError> {
        info!(
            id = %point.operation_id,
            completed = point.completed.len(),
            pending = point.pending.len(),
            "resuming operation"
        );
        sink.record(Event::RunStarted {
            operation_id: Some(point.operation_id),
            total: point.total(),
            pending: point.pending.len(),
            dry_run: false,
            resumed: true,
        });
        self.execute(point, Vec::new(), sink)
    }

    /// Resolve a destination for every file and build the `pending` ledger.
    ///
    /// Ineligible files, files already at their destination, files the `skip`
    /// policy rejects and files whose destination cannot be resolved are
    /// settled here and never executed. Only the filesystem is read; nothing
    /// is written.
    pub fn plan(&self, plan: &Plan, dry_run: bool) -> Result<Vec<FileOperation>, RunError> {
        let policy = self.config.duplicate_handling;
        let mut resolver = DestinationResolver::new(policy).with_attempt_limit(self.attempt_limit);
        for group in &plan.groups {
            for file in &group.files {
                resolver.reserve(&file.path);
            }
        }
        let mut ops = Vec::with_capacity(plan.len());

        for group in &plan.groups {
            for file in &group.files {
                let requested = group.folder.join(&file.filename);

                if let Some(reason) = &file.error {
                    let mut op = FileOperation::new(file.clone(), requested)?;
                    warn!(src = %file.path.display(), reason = %reason, "skipping unreadable file");
                    op.skip(Some(reason.clone()))?;
                    ops.push(op);
                    continue;
                }

                if requested == file.path {
                    let mut op = FileOperation::new(file.clone(), requested)?;
                    debug!(src = %file.path.display(), "already in place");
                    op.skip(Some(ALREADY_IN_PLACE_REASON.to_string()))?;
                    ops.push(op);
                    continue;
                }

                match resolver.resolve(&file.filename, &group.folder, dry_run) {
                    Ok(resolution) => {
                        let mut op = FileOperation::new(file.clone(), resolution.path)?;
                        if policy == DuplicatePolicy::Skip {
                            let reason = match resolution.collision {
                                Some(Collision::Existing) => Some(DESTINATION_EXISTS_REASON),
                                Some(Collision::Planned) => Some(NAME_PLANNED_REASON),
                                None => None,
                            };
                            if let Some(reason) = reason {
                                debug!(dest = %op.destination().display(), reason, "skipping");
                                op.skip(Some(reason.to_string()))?;
                            }
                        }
                        ops.push(op);
                    }
                    Err(err) => {
                        warn!(src = %file.path.display(), error = %err, "no destination");
                        let mut op = FileOperation::new(file.clone(), requested)?;
                        if dry_run {
                            op.skip(Some(err.to_string()))?;
                        } else {
                            op.fail(err.to_string())?;
                        }
                        ops.push(op);
                    }
                }
            }
        }
        Ok(ops)
    }

    fn preview(
        &self,
        mut planned: Vec<FileOperation>,
        sink: &mut dyn ProgressSink,
    ) -> Result<RunReport, RunError> {
        sink.record(Event::RunStarted {
            operation_id: None,
            total: planned.len(),
            pending: 0,
            dry_run: true,
            resumed: false,
        });
        for op in &mut planned {
            sink.record(Event::OpPlanned {
                src: op.source().path.clone(),
                dst: op.destination().to_path_buf(),
            });
            if op.status() == OperationStatus::Pending {
                op.skip(Some(DRY_RUN_REASON.to_string()))?;
            }
            if let Some(event) = Event::for_outcome(op) {
                sink.record(event);
            }
        }
        let report = RunReport {
            operation_id: None,
            operations: planned,
            remaining: 0,
            outcome: RunOutcome::Success,
        };
        finish(&report, sink);
        Ok(report)
    }

    fn execute(
        &self,
        mut point: ResumePoint,
        mut settled: Vec<FileOperation>,
        sink: &mut dyn ProgressSink,
    ) -> Result<RunReport, RunError> {
        let mover = Mover::new(self.config.verify_checksum, self.cancel.clone())
            .with_overwrite(self.config.duplicate_handling == DuplicatePolicy::Overwrite);
        let id = point.operation_id;
        let operation_id = self.store.map(|_| id);

        while !point.pending.is_empty() {
            if self.cancel.is_requested() {
                return self.cancelled(point, settled, sink);
            }
            let mut op = point.pending[0].clone();
            sink.record(Event::OpStarted {
                src: op.source().path.clone(),
                dst: op.destination().to_path_buf(),
            });
            mover.execute(&mut op)?;
            let mut remaining = point.pending[1..].to_vec();

            if op.status() == OperationStatus::Failed && self.cancel.is_requested() {
                // Interrupted mid-move: the source is intact, so retry it on resume.
                remaining.insert(0, op.requeue());
                self.advance(&mut point, None, remaining)?;
                if let Some(event) = Event::for_outcome(&op) {
                    sink.record(event);
                }
                settled.push(op);
                return self.cancelled(point, settled, sink);
            }

            if let Some(event) = Event::for_outcome(&op) {
                sink.record(event);
            }
            self.advance(&mut point, Some(op.clone()), remaining)?;
            settled.push(op);
        }

        if let Some(store) = self.store {
            store.delete(id)?;
        }
        let outcome = if settled.iter().any(|op| op.status() == OperationStatus::Failed) {
            RunOutcome::PartialFailure
        } else {
            RunOutcome::Success
        };
        let report = RunReport {
            operation_id,
            operations: settled,
            remaining: 0,
            outcome,
        };
        let counts = report.counts();
        info!(
            completed = counts.completed,
            failed = counts.failed,
            skipped = counts.skipped,
            "operation finished"
        );
        finish(&report, sink);
        Ok(report)
    }

    fn advance(
        &self,
        point: &mut ResumePoint,
        completed: Option<FileOperation>,
        remaining: Vec<FileOperation>,
    ) -> Result<(), RunError> {
        match self.store {
            Some(store) => store.update(point, completed, remaining)?,
            None => point.advance(completed, remaining),
        }
        Ok(())
    }

    fn cancelled(
        &self,
        mut point: ResumePoint,
        settled: Vec<FileOperation>,
        sink: &mut dyn ProgressSink,
    ) -> Result<RunReport, RunError> {
        // Whatever is on disk already matches `point`; write once more so the
        // record carries the latest timestamp.
        let remaining = std::mem::take(&mut point.pending);
        let pending = remaining.len();
        self.advance(&mut point, None, remaining)?;
        warn!(id = %point.operation_id, pending, "operation interrupted");

        let operation_id = self.store.map(|_| point.operation_id);
        sink.record(Event::RunCancelled {
            operation_id,
            pending,
        });
        Ok(RunReport {
            operation_id,
            operations: settled,
            remaining: pending,
            outcome: RunOutcome::Cancelled,
        })
    }
}

fn finish(report: &RunReport, sink: &mut dyn ProgressSink) {
    let counts = report.counts();
    sink.record(Event::RunFinished {
        operation_id: report.operation_id,
        completed: counts.completed,
        failed: counts.failed,
        skipped: counts.skipped,
        bytes_moved: report.bytes_moved(),
    });
}
