//! Driver: partitions compile commands into jobs, elects canonical TUs,
//! supervises the worker fleet and merges the final index.
//!
//! The driver is single-threaded cooperative: it multiplexes all worker
//! responses through one channel with receive timeouts and never does AST
//! work itself. Phase B cannot start until Phase A finished for every
//! task, because owner election needs the complete hash table.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use tracing::{debug, info, warn};

use crate::compdb::{CompilationDatabase, CompileCommand};
use crate::error::{IndexError, IndexResult};
use crate::ipc::queue::{WorkerEvent, forward_worker_output};
use crate::ipc::{
    DriverMessage, EmitIndexJobDetails, IndexJob, IndexJobRequest, IndexJobResponse,
    IndexJobResult, IndexingStatistics, SemanticAnalysisJobDetails, SemanticAnalysisJobResult,
    SendQueue, ShardPaths, driver_to_worker_queue_name,
};
use crate::scip::{IndexBuilder, Metadata};
use crate::types::{AbsolutePath, HashValue, JobId, RootPath, StableFileId, TaskId, WorkerId};
use crate::worker::{RecordingOptions, WorkerFault};

const RECEIVE_TICK: Duration = Duration::from_millis(200);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub compdb_path: PathBuf,
    pub index_output_path: PathBuf,
    pub num_workers: usize,
    pub project_root: RootPath,
    pub temporary_output_dir: Option<PathBuf>,
    pub deterministic: bool,
    pub job_timeout: Duration,
    pub worker_receive_timeout: Duration,
    /// Maximum re-dispatches per task before it is dropped.
    pub retry_limit: u32,
    pub show_compiler_diagnostics: bool,
    pub log_level: String,
    pub recording: Option<RecordingOptions>,
    /// Injected into worker 0's initial spawn only; respawns are clean.
    pub worker_fault: Option<WorkerFault>,
    /// Executable spawned as worker; normally the current binary.
    pub worker_program: PathBuf,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DriverSummary {
    pub tasks_succeeded: usize,
    pub tasks_failed: usize,
    pub tasks_timed_out: usize,
}

impl DriverSummary {
    pub fn is_success(&self) -> bool {
        self.tasks_failed == 0 && self.tasks_timed_out == 0
    }
}

/// Result of owner election over all Phase A responses.
#[derive(Debug, Default)]
pub struct Election {
    /// Canonical indexing task for every observed `(header, hash)` pair.
    pub owners: HashMap<(AbsolutePath, HashValue), TaskId>,
    /// Files each task must emit, main file included.
    pub files_by_task: HashMap<TaskId, Vec<AbsolutePath>>,
    /// Root-relative paths emitted by more than one task; the merge runs
    /// them through document builders.
    pub multiply_indexed: HashSet<String>,
}

/// Pure function of the aggregated hash table: for each `(path, hash)`
/// pair the smallest observing task id wins.
pub fn elect_owners<'a>(
    root: &RootPath,
    results: impl Iterator<Item = (TaskId, &'a CompileCommand, &'a SemanticAnalysisJobResult)>,
) -> IndexResult<Election> {
    let mut hash_table: HashMap<AbsolutePath, HashMap<HashValue, Vec<TaskId>>> = HashMap::new();
    let mut observed: HashMap<TaskId, Vec<(AbsolutePath, HashValue)>> = HashMap::new();
    let mut main_files: Vec<(TaskId, AbsolutePath)> = Vec::new();

    for (task, command, result) in results {
        main_files.push((task, command.main_file()?));
        let mut record = |path: &AbsolutePath, hash: HashValue| {
            hash_table
                .entry(path.clone())
                .or_default()
                .entry(hash)
                .or_default()
                .push(task);
            observed.entry(task).or_default().push((path.clone(), hash));
        };
        for info in &result.well_behaved_files {
            record(&info.path, info.hash_value);
        }
        for info in &result.ill_behaved_files {
            for hash in &info.hash_values {
                record(&info.path, *hash);
            }
        }
    }

    let mut election = Election::default();
    for (path, by_hash) in &hash_table {
        for (hash, tasks) in by_hash {
            let owner = *tasks.iter().min().expect("non-empty observer list");
            election.owners.insert((path.clone(), *hash), owner);
        }
    }

    let mut emitted_by: HashMap<AbsolutePath, HashSet<TaskId>> = HashMap::new();
    for (task, pairs) in &observed {
        let files = election.files_by_task.entry(*task).or_default();
        for (path, hash) in pairs {
            if election.owners.get(&(path.clone(), *hash)) == Some(task)
                && !files.contains(path)
            {
                files.push(path.clone());
                emitted_by.entry(path.clone()).or_default().insert(*task);
            }
        }
    }
    for (task, main) in main_files {
        let files = election.files_by_task.entry(task).or_default();
        if !files.contains(&main) {
            files.push(main.clone());
        }
        emitted_by.entry(main).or_default().insert(task);
    }
    for files in election.files_by_task.values_mut() {
        files.sort();
    }
    for (path, tasks) in emitted_by {
        if tasks.len() > 1 {
            election
                .multiply_indexed
                .insert(StableFileId::from_absolute(root, &path).display_path());
        }
    }
    Ok(election)
}

/// Merge all Phase B shards into the final index, in task-id order so the
/// first-writer-wins documentation policy is deterministic.
pub fn merge_shards(
    shards: &[(TaskId, ShardPaths)],
    multiply_indexed: &HashSet<String>,
    deterministic: bool,
    metadata: Metadata,
    output_path: &Path,
) -> IndexResult<()> {
    let mut sorted: Vec<&(TaskId, ShardPaths)> = shards.iter().collect();
    sorted.sort_by_key(|(task, _)| *task);

    let mut builder = IndexBuilder::new(metadata);
    for (_, paths) in &sorted {
        let shard = crate::scip::read_index(&paths.docs_and_externals)?;
        for document in shard.documents {
            let is_multiply_indexed = multiply_indexed.contains(&document.relative_path);
            builder.add_document(document, is_multiply_indexed);
        }
        for external in shard.external_symbols {
            builder.add_external_symbol(external);
        }
    }
    let symbol_map = builder.populate_symbol_to_info_map();
    for (_, paths) in &sorted {
        let shard = crate::scip::read_index(&paths.forward_decls)?;
        for forward_decl in shard.external_symbols {
            builder.add_forward_declaration(&symbol_map, forward_decl);
        }
    }
    let index = builder.finish(deterministic);
    crate::scip::write_index(output_path, &index)
}

pub fn run_driver(options: DriverOptions) -> IndexResult<DriverSummary> {
    let compdb = CompilationDatabase::load(&options.compdb_path)?;
    info!(tasks = compdb.len(), "loaded compilation database");

    let driver_id = format!(
        "{}-{:x}",
        std::process::id(),
        chrono::Utc::now().timestamp_micros()
    );

    // Scratch space for shards, namespaced by driver id so concurrent runs
    // on one host never collide.
    let scratch = match &options.temporary_output_dir {
        Some(base) => {
            let dir = base.join(format!("scip-cxx-{driver_id}"));
            std::fs::create_dir_all(&dir).map_err(|source| IndexError::FileWrite {
                path: dir.clone(),
                source,
            })?;
            Scratch::Provided(dir)
        }
        None => Scratch::Temporary(
            tempfile::Builder::new()
                .prefix(&format!("scip-cxx-{driver_id}-"))
                .tempdir()
                .map_err(|source| IndexError::FileWrite {
                    path: std::env::temp_dir(),
                    source,
                })?,
        ),
    };

    if compdb.is_empty() {
        warn!("compilation database is empty, writing empty index");
        let index = IndexBuilder::new(Metadata::for_tool(&options.project_root, Vec::new()))
            .finish(options.deterministic);
        crate::scip::write_index(&options.index_output_path, &index)?;
        return Ok(DriverSummary::default());
    }

    let mut scheduler = Scheduler::new(&options, driver_id, scratch.path(), compdb.commands)?;
    scheduler.run()
}

enum Scratch {
    Provided(PathBuf),
    Temporary(tempfile::TempDir),
}

impl Scratch {
    fn path(&self) -> PathBuf {
        match self {
            Scratch::Provided(path) => path.clone(),
            Scratch::Temporary(dir) => dir.path().to_path_buf(),
        }
    }
}

struct WorkerHandle {
    id: WorkerId,
    child: Child,
    queue: SendQueue<ChildStdin>,
    assignment: Option<(JobId, Instant)>,
}

impl WorkerHandle {
    /// Bounded dispatch: one outstanding job per worker queue.
    fn dispatch(&mut self, request: IndexJobRequest) -> IndexResult<()> {
        if self.assignment.is_some() {
            return Err(IndexError::QueueFull {
                queue: self.queue.name().to_string(),
            });
        }
        let id = request.id;
        self.queue.send(&DriverMessage::Job(request))?;
        self.assignment = Some((id, Instant::now()));
        Ok(())
    }
}

#[derive(Debug, Default)]
struct TaskState {
    attempts: u32,
    phase_a: Option<SemanticAnalysisJobResult>,
    shard_paths: Option<ShardPaths>,
    failed: bool,
    timed_out: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    SemanticAnalysis,
    EmitIndex,
}

enum FailureCause {
    Timeout,
    Crash,
    Malformed,
}

struct Scheduler<'o> {
    options: &'o DriverOptions,
    driver_id: String,
    scratch: PathBuf,
    commands: Vec<CompileCommand>,
    tasks: Vec<TaskState>,
    files_by_task: HashMap<TaskId, Vec<AbsolutePath>>,
    workers: Vec<WorkerHandle>,
    tx: Sender<WorkerEvent>,
    rx: Receiver<WorkerEvent>,
    next_worker_id: WorkerId,
    statistics: IndexingStatistics,
}

impl<'o> Scheduler<'o> {
    fn new(
        options: &'o DriverOptions,
        driver_id: String,
        scratch: PathBuf,
        commands: Vec<CompileCommand>,
    ) -> IndexResult<Self> {
        let (tx, rx) = unbounded();
        let tasks = commands.iter().map(|_| TaskState::default()).collect();
        Ok(Self {
            options,
            driver_id,
            scratch,
            commands,
            tasks,
            files_by_task: HashMap::new(),
            workers: Vec::new(),
            tx,
            rx,
            next_worker_id: 0,
            statistics: IndexingStatistics::default(),
        })
    }

    fn run(&mut self) -> IndexResult<DriverSummary> {
        let pool_size = self.options.num_workers.clamp(1, self.commands.len().max(1));
        for slot in 0..pool_size {
            let fault = if slot == 0 {
                self.options.worker_fault
            } else {
                None
            };
            let worker = self.spawn_worker(fault)?;
            self.workers.push(worker);
        }
        info!(workers = self.workers.len(), "spawned worker pool");

        let phase_a_tasks: VecDeque<TaskId> = (0..self.commands.len() as TaskId).collect();
        self.run_phase(Phase::SemanticAnalysis, phase_a_tasks)?;

        let election = elect_owners(
            &self.options.project_root,
            self.tasks.iter().enumerate().filter_map(|(task, state)| {
                state
                    .phase_a
                    .as_ref()
                    .map(|result| (task as TaskId, &self.commands[task], result))
            }),
        )?;
        info!(
            owners = election.owners.len(),
            multiply_indexed = election.multiply_indexed.len(),
            "owner election complete"
        );
        self.files_by_task = election.files_by_task;

        let phase_b_tasks: VecDeque<TaskId> = (0..self.commands.len() as TaskId)
            .filter(|task| {
                self.tasks[*task as usize].phase_a.is_some()
                    && self
                        .files_by_task
                        .get(task)
                        .is_some_and(|files| !files.is_empty())
            })
            .collect();
        self.run_phase(Phase::EmitIndex, phase_b_tasks)?;

        self.shutdown_workers();

        let shards: Vec<(TaskId, ShardPaths)> = self
            .tasks
            .iter()
            .enumerate()
            .filter_map(|(task, state)| {
                state
                    .shard_paths
                    .clone()
                    .map(|paths| (task as TaskId, paths))
            })
            .collect();
        merge_shards(
            &shards,
            &election.multiply_indexed,
            self.options.deterministic,
            Metadata::for_tool(&self.options.project_root, std::env::args().skip(1).collect()),
            &self.options.index_output_path,
        )?;

        let summary = DriverSummary {
            tasks_succeeded: shards.len(),
            tasks_timed_out: self.tasks.iter().filter(|t| t.timed_out).count(),
            tasks_failed: self
                .tasks
                .iter()
                .filter(|t| t.shard_paths.is_none() && !t.timed_out)
                .count(),
        };
        info!(
            time_micros = self.statistics.total_time_micros,
            occurrences = self.statistics.occurrences_emitted,
            "indexing finished"
        );
        Ok(summary)
    }

    fn spawn_worker(&mut self, fault: Option<WorkerFault>) -> IndexResult<WorkerHandle> {
        let id = self.next_worker_id;
        self.next_worker_id += 1;

        let mut command = Command::new(&self.options.worker_program);
        command
            .arg("--worker-mode")
            .arg("ipc")
            .arg("--driver-id")
            .arg(&self.driver_id)
            .arg("--worker-id")
            .arg(id.to_string())
            .arg("--project-root-path")
            .arg(self.options.project_root.as_absolute().as_path())
            .arg("--temporary-output-dir")
            .arg(&self.scratch)
            .arg("--receive-timeout-seconds")
            .arg(self.options.worker_receive_timeout.as_secs().to_string())
            .arg("--log-level")
            .arg(&self.options.log_level)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if self.options.deterministic {
            command.arg("--deterministic");
        }
        if self.options.show_compiler_diagnostics {
            command.arg("--show-compiler-diagnostics");
        }
        if let Some(recording) = &self.options.recording {
            command
                .arg("--preprocessor-record-history-filter")
                .arg(&recording.filter)
                .arg("--preprocessor-history-log-path")
                .arg(&recording.log_path);
        }
        if let Some(fault) = fault {
            command.arg("--worker-fault").arg(fault.as_str());
        }

        let mut child = command
            .spawn()
            .map_err(|source| IndexError::WorkerSpawn { worker_id: id, source })?;
        let stdin = child.stdin.take().expect("worker stdin is piped");
        let stdout = child.stdout.take().expect("worker stdout is piped");
        forward_worker_output(id, BufReader::new(stdout), self.tx.clone());
        debug!(worker_id = id, "spawned worker");

        Ok(WorkerHandle {
            id,
            child,
            queue: SendQueue::new(driver_to_worker_queue_name(&self.driver_id, id), stdin),
            assignment: None,
        })
    }

    fn make_request(&self, phase: Phase, task: TaskId) -> IndexJobRequest {
        let command = self.commands[task as usize].clone();
        match phase {
            Phase::SemanticAnalysis => IndexJobRequest {
                id: JobId::new(task, JobId::SEMANTIC_ANALYSIS_SUBTASK),
                job: IndexJob::SemanticAnalysis(SemanticAnalysisJobDetails { command }),
            },
            Phase::EmitIndex => IndexJobRequest {
                id: JobId::new(task, JobId::EMIT_INDEX_SUBTASK),
                job: IndexJob::EmitIndex(EmitIndexJobDetails {
                    command,
                    files_to_be_indexed: self
                        .files_by_task
                        .get(&task)
                        .cloned()
                        .unwrap_or_default(),
                }),
            },
        }
    }

    fn run_phase(&mut self, phase: Phase, mut pending: VecDeque<TaskId>) -> IndexResult<()> {
        loop {
            // Dispatch to idle workers.
            let mut slot = 0;
            while slot < self.workers.len() && !pending.is_empty() {
                if self.workers[slot].assignment.is_none() {
                    let task = pending.pop_front().expect("checked non-empty");
                    let request = self.make_request(phase, task);
                    debug!(task, worker_id = self.workers[slot].id, ?phase, "dispatching job");
                    if let Err(err) = self.workers[slot].dispatch(request) {
                        warn!(task, %err, "dispatch failed");
                        // The job never reached the worker; retry it as-is.
                        pending.push_front(task);
                        self.handle_worker_failure(slot, FailureCause::Crash, &mut pending);
                        continue;
                    }
                }
                slot += 1;
            }

            let outstanding = self.workers.iter().any(|w| w.assignment.is_some());
            if pending.is_empty() && !outstanding {
                return Ok(());
            }
            if self.workers.is_empty() {
                return Err(IndexError::Config {
                    reason: "worker pool exhausted, cannot make progress".to_string(),
                });
            }

            match self.rx.recv_timeout(RECEIVE_TICK) {
                Ok(WorkerEvent::Line { worker_id, line }) => {
                    self.handle_line(worker_id, line, &mut pending);
                }
                Ok(WorkerEvent::Eof { worker_id }) => {
                    if let Some(slot) = self.slot_of(worker_id) {
                        warn!(worker_id, "worker exited unexpectedly");
                        self.handle_worker_failure(slot, FailureCause::Crash, &mut pending);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(IndexError::MalformedMessage {
                        payload: "worker event channel closed".to_string(),
                    });
                }
            }

            self.expire_timed_out_jobs(&mut pending);
        }
    }

    fn slot_of(&self, worker_id: WorkerId) -> Option<usize> {
        self.workers.iter().position(|w| w.id == worker_id)
    }

    fn handle_line(&mut self, worker_id: WorkerId, line: String, pending: &mut VecDeque<TaskId>) {
        let Some(slot) = self.slot_of(worker_id) else {
            debug!(worker_id, "response from a replaced worker, ignoring");
            return;
        };
        let response: IndexJobResponse = match serde_json::from_str(&line) {
            Ok(response) => response,
            Err(_) => {
                warn!(worker_id, payload = %line, "malformed message, treating as worker failure");
                self.handle_worker_failure(slot, FailureCause::Malformed, pending);
                return;
            }
        };
        match self.workers[slot].assignment {
            Some((job_id, _)) if job_id == response.job_id => {
                self.workers[slot].assignment = None;
            }
            _ => {
                debug!(worker_id, job_id = %response.job_id, "stale response, ignoring");
                return;
            }
        }

        let task = response.job_id.task_id() as usize;
        if task >= self.tasks.len() {
            warn!(worker_id, task, "response names an unknown task, ignoring");
            return;
        }
        match response.result {
            IndexJobResult::SemanticAnalysis(result) => {
                debug!(task, "phase A complete");
                self.tasks[task].phase_a = Some(result);
            }
            IndexJobResult::EmitIndex(result) => {
                debug!(task, "phase B complete");
                self.statistics.accumulate(&result.statistics);
                self.tasks[task].shard_paths = Some(result.shard_paths);
            }
        }
    }

    fn expire_timed_out_jobs(&mut self, pending: &mut VecDeque<TaskId>) {
        let timeout = self.options.job_timeout;
        // One expiry per tick; respawning can reshuffle slots, and any
        // remaining stragglers are caught on the next tick.
        let expired = self
            .workers
            .iter()
            .enumerate()
            .find_map(|(slot, worker)| match worker.assignment {
                Some((job_id, started)) if started.elapsed() >= timeout => {
                    warn!(worker_id = worker.id, %job_id, "job timed out, killing worker");
                    Some(slot)
                }
                _ => None,
            });
        if let Some(slot) = expired {
            self.handle_worker_failure(slot, FailureCause::Timeout, pending);
        }
    }

    /// Kill and respawn the worker in `slot`; re-dispatch its job unless
    /// the task exhausted its retries.
    fn handle_worker_failure(
        &mut self,
        slot: usize,
        cause: FailureCause,
        pending: &mut VecDeque<TaskId>,
    ) {
        let assignment = self.workers[slot].assignment.take();
        let _ = self.workers[slot].child.kill();
        let _ = self.workers[slot].child.wait();

        if let Some((job_id, _)) = assignment {
            let task = job_id.task_id() as usize;
            self.tasks[task].attempts += 1;
            if self.tasks[task].attempts > self.options.retry_limit {
                warn!(
                    task,
                    attempts = self.tasks[task].attempts,
                    "task exhausted retries, dropping"
                );
                match cause {
                    FailureCause::Timeout => self.tasks[task].timed_out = true,
                    FailureCause::Crash | FailureCause::Malformed => {
                        self.tasks[task].failed = true;
                    }
                }
            } else {
                pending.push_back(job_id.task_id());
            }
        }

        // Respawns never carry the fault injection.
        match self.spawn_worker(None) {
            Ok(worker) => self.workers[slot] = worker,
            Err(err) => {
                warn!(%err, "failed to respawn worker, shrinking pool");
                self.workers.remove(slot);
            }
        }
    }

    fn shutdown_workers(&mut self) {
        for worker in &mut self.workers {
            let _ = worker.queue.send(&DriverMessage::Shutdown);
        }
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        for worker in &mut self.workers {
            loop {
                match worker.child.try_wait() {
                    Ok(Some(_)) => break,
                    Ok(None) if Instant::now() < deadline => {
                        std::thread::sleep(Duration::from_millis(20));
                    }
                    _ => {
                        let _ = worker.child.kill();
                        let _ = worker.child.wait();
                        break;
                    }
                }
            }
        }
        self.workers.clear();
    }
}
