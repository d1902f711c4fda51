//! Worker process: receives jobs over IPC, indexes one TU at a time.
//!
//! A worker is single-threaded; the parse runs synchronously, so indexing
//! callbacks never need locking. Parallelism is the driver's business.

use std::collections::HashSet;
use std::io::{BufReader, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, Instant};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::compdb::{CompilationDatabase, CompileCommand, Language};
use crate::error::{IndexError, IndexResult};
use crate::indexer::{MacroIndexer, SymbolFormatter, TuIndexer, ast};
use crate::ipc::{
    DriverMessage, EmitIndexJobDetails, EmitIndexJobResult, IndexJob, IndexJobRequest,
    IndexJobResponse, IndexJobResult, IndexingStatistics, LineReceiver, Received,
    SemanticAnalysisJobDetails, SemanticAnalysisJobResult, SendQueue, ShardPaths,
    driver_to_worker_queue_name, worker_to_driver_queue_name,
};
use crate::preprocessor::{FileId, HistoryRecorder, PpObserver, PpOptions, PpTuOutput, Preprocessor};
use crate::scip::{Document, Index, compare_occurrences};
use crate::types::{AbsolutePath, JobId, RootPath, WorkerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    /// Communicate with the driver over IPC (default).
    Ipc,
    /// Process a compilation database directly, single-process.
    Compdb,
    /// Entry points driven by test code.
    Testing,
}

/// Closed fault taxonomy for `--worker-fault`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerFault {
    /// Abort before processing the first job.
    CrashOnce,
    /// Sleep indefinitely on the first job.
    Hang,
    /// Send one unparseable line instead of the first response.
    Malformed,
}

impl WorkerFault {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CrashOnce => "crash-once",
            Self::Hang => "hang",
            Self::Malformed => "malformed",
        }
    }
}

impl FromStr for WorkerFault {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "crash-once" => Ok(Self::CrashOnce),
            "hang" => Ok(Self::Hang),
            "malformed" => Ok(Self::Malformed),
            other => Err(IndexError::Config {
                reason: format!(
                    "unknown worker fault '{other}' (expected crash-once, hang or malformed)"
                ),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordingOptions {
    pub filter: String,
    pub log_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub project_root: RootPath,
    pub mode: WorkerMode,
    pub driver_id: String,
    pub worker_id: WorkerId,
    pub receive_timeout: Duration,
    pub deterministic: bool,
    pub temporary_output_dir: PathBuf,
    /// Only used in compdb mode.
    pub compdb_path: Option<PathBuf>,
    /// Only used in compdb mode.
    pub index_output_path: Option<PathBuf>,
    pub show_compiler_diagnostics: bool,
    pub recording: Option<RecordingOptions>,
    pub fault: Option<WorkerFault>,
}

/// The two per-TU indexes a Phase B job produces.
#[derive(Debug, Default)]
pub struct TuIndexingOutput {
    /// Per-document output plus external symbols with definitions.
    pub docs_and_externals: Index,
    /// Forward declarations; only the external-symbols list is populated.
    pub forward_decls: Index,
}

pub struct Worker {
    options: WorkerOptions,
    jobs_started: u64,
}

pub fn worker_main(options: WorkerOptions) -> IndexResult<()> {
    Worker::new(options).run()
}

impl Worker {
    pub fn new(options: WorkerOptions) -> Self {
        Self {
            options,
            jobs_started: 0,
        }
    }

    pub fn run(&mut self) -> IndexResult<()> {
        match self.options.mode {
            WorkerMode::Ipc => self.run_ipc(),
            WorkerMode::Compdb => self.run_compdb(),
            WorkerMode::Testing => Ok(()),
        }
    }

    fn run_ipc(&mut self) -> IndexResult<()> {
        let worker_id = self.options.worker_id;
        let receiver = LineReceiver::start(
            driver_to_worker_queue_name(&self.options.driver_id, worker_id),
            BufReader::new(std::io::stdin()),
        );
        let mut sender = SendQueue::new(
            worker_to_driver_queue_name(&self.options.driver_id),
            std::io::stdout().lock(),
        );
        info!(worker_id, "worker ready");

        loop {
            match receiver.receive::<DriverMessage>(self.options.receive_timeout) {
                Received::Ok(DriverMessage::Job(request)) => {
                    let job_id = request.id;
                    debug!(worker_id, %job_id, "received job");
                    self.jobs_started += 1;
                    self.trigger_fault_if_applicable(&mut sender)?;
                    let result = self.process_request(request)?;
                    sender.send(&IndexJobResponse {
                        worker_id,
                        job_id,
                        result,
                    })?;
                }
                Received::Ok(DriverMessage::Shutdown) => {
                    info!(worker_id, "shutdown requested");
                    return Ok(());
                }
                Received::Timeout => {
                    warn!(worker_id, "driver unresponsive, exiting");
                    return Ok(());
                }
                Received::Malformed(payload) => {
                    warn!(worker_id, payload, "malformed message from driver, exiting");
                    return Err(IndexError::MalformedMessage { payload });
                }
                Received::Shutdown => {
                    debug!(worker_id, "driver closed the queue");
                    return Ok(());
                }
            }
        }
    }

    fn trigger_fault_if_applicable<W: Write>(
        &mut self,
        sender: &mut SendQueue<W>,
    ) -> IndexResult<()> {
        let Some(fault) = self.options.fault else {
            return Ok(());
        };
        if self.jobs_started != 1 {
            return Ok(());
        }
        match fault {
            WorkerFault::CrashOnce => {
                warn!(worker_id = self.options.worker_id, "injected fault: crash");
                std::process::abort()
            }
            WorkerFault::Hang => {
                warn!(worker_id = self.options.worker_id, "injected fault: hang");
                loop {
                    std::thread::sleep(Duration::from_secs(60));
                }
            }
            WorkerFault::Malformed => {
                warn!(
                    worker_id = self.options.worker_id,
                    "injected fault: malformed message"
                );
                sender.send(&"this is not a valid response".to_string())?;
                Ok(())
            }
        }
    }

    fn process_request(&mut self, request: IndexJobRequest) -> IndexResult<IndexJobResult> {
        match request.job {
            IndexJob::SemanticAnalysis(details) => Ok(IndexJobResult::SemanticAnalysis(
                self.perform_semantic_analysis(&details)?,
            )),
            IndexJob::EmitIndex(details) => Ok(IndexJobResult::EmitIndex(
                self.perform_emit_index(request.id, &details)?,
            )),
        }
    }

    fn pp_options(&self, command: &CompileCommand) -> IndexResult<PpOptions> {
        let (defines, undefs) = command.cli_macros();
        Ok(PpOptions {
            language: command.language(),
            include_dirs: command.include_directories()?,
            defines,
            undefs,
        })
    }

    fn preprocess(
        &self,
        command: &CompileCommand,
        observers: Vec<&mut dyn PpObserver>,
    ) -> IndexResult<PpTuOutput> {
        let options = self.pp_options(command)?;
        let main_file = command.main_file()?;
        Preprocessor::new(self.options.project_root.clone(), options, observers)
            .process(&main_file)
    }

    fn perform_semantic_analysis(
        &mut self,
        details: &SemanticAnalysisJobDetails,
    ) -> IndexResult<SemanticAnalysisJobResult> {
        let output = self.preprocess(&details.command, Vec::new())?;
        Ok(SemanticAnalysisJobResult {
            well_behaved_files: output.well_behaved,
            ill_behaved_files: output.ill_behaved,
        })
    }

    /// Re-parse the TU and build both indexes in memory.
    pub fn index_translation_unit(
        &mut self,
        command: &CompileCommand,
        files_to_be_indexed: &[AbsolutePath],
        output: &mut TuIndexingOutput,
    ) -> IndexResult<IndexingStatistics> {
        let started = Instant::now();
        let deterministic = self.options.deterministic;

        let mut macro_indexer = MacroIndexer::new();
        let mut recorder = match &self.options.recording {
            Some(recording) => {
                let filter =
                    Regex::new(&recording.filter).map_err(|err| IndexError::Config {
                        reason: format!(
                            "invalid preprocessor history filter '{}': {err}",
                            recording.filter
                        ),
                    })?;
                Some(HistoryRecorder::new(filter, &recording.log_path)?)
            }
            None => None,
        };
        let mut observers: Vec<&mut dyn PpObserver> = vec![&mut macro_indexer];
        if let Some(recorder) = recorder.as_mut() {
            observers.push(recorder);
        }
        let pp = self.preprocess(command, observers)?;
        if let Some(recorder) = recorder.as_mut() {
            recorder.flush();
        }

        let mut owned: HashSet<FileId> = files_to_be_indexed
            .iter()
            .filter_map(|path| pp.files.lookup(path))
            .collect();
        owned.insert(pp.main_file);

        let formatter = SymbolFormatter;
        let mut tu = TuIndexer::new(&pp.files, &formatter, owned.clone());
        for file in &owned {
            tu.save_synthetic_file_definition(*file);
            for (range, target) in macro_indexer.includes_in_file(*file) {
                tu.save_include(*file, *range, *target);
            }
        }
        ast::index_translation_unit(&mut tu)?;
        if self.options.show_compiler_diagnostics {
            ast::report_parse_diagnostics(&pp.files);
        }

        let mut document_files = tu.document_files();
        if deterministic {
            document_files
                .sort_by_key(|file| pp.files.stable_id(*file).display_path());
        }
        let mut statistics = IndexingStatistics {
            translation_units_parsed: 1,
            ..Default::default()
        };
        for file in document_files {
            let mut document = Document {
                language: Language::from_path(pp.files.path(file).as_path())
                    .name()
                    .to_string(),
                relative_path: pp.files.stable_id(file).display_path(),
                ..Default::default()
            };
            tu.emit_document(deterministic, file, &mut document);
            macro_indexer.emit_document_occurrences(
                deterministic,
                &pp.files,
                &pp.macros,
                &formatter,
                file,
                &mut document,
            );
            if deterministic {
                document.occurrences.sort_by(compare_occurrences);
                document.symbols.sort_by(|a, b| a.symbol.cmp(&b.symbol));
            }
            statistics.documents_emitted += 1;
            statistics.occurrences_emitted += document.occurrences.len() as u64;
            output.docs_and_externals.documents.push(document);
        }
        tu.emit_external_symbols(deterministic, &mut output.docs_and_externals);
        macro_indexer.emit_external_symbols(
            deterministic,
            &pp.files,
            &pp.macros,
            &formatter,
            &mut output.docs_and_externals,
        );
        if deterministic {
            output
                .docs_and_externals
                .external_symbols
                .sort_by(|a, b| a.symbol.cmp(&b.symbol));
        }
        tu.emit_forward_declarations(deterministic, &mut output.forward_decls);

        statistics.total_time_micros = started.elapsed().as_micros() as u64;
        Ok(statistics)
    }

    fn perform_emit_index(
        &mut self,
        job_id: JobId,
        details: &EmitIndexJobDetails,
    ) -> IndexResult<EmitIndexJobResult> {
        let mut output = TuIndexingOutput::default();
        let statistics = self.index_translation_unit(
            &details.command,
            &details.files_to_be_indexed,
            &mut output,
        )?;

        let task = job_id.task_id();
        let shard_paths = ShardPaths {
            docs_and_externals: self
                .options
                .temporary_output_dir
                .join(format!("{task}.docs_and_externals.scip")),
            forward_decls: self
                .options
                .temporary_output_dir
                .join(format!("{task}.forward_decls.scip")),
        };
        crate::scip::write_index(&shard_paths.docs_and_externals, &output.docs_and_externals)?;
        crate::scip::write_index(&shard_paths.forward_decls, &output.forward_decls)?;
        debug!(%job_id, docs = %shard_paths.docs_and_externals.display(), "wrote shards");

        Ok(EmitIndexJobResult {
            statistics,
            shard_paths,
        })
    }

    /// Testing entry point: run semantic analysis, let the callback choose
    /// the files to index, then emit in memory.
    pub fn process_translation_unit(
        &mut self,
        details: SemanticAnalysisJobDetails,
        callback: impl FnOnce(SemanticAnalysisJobResult) -> Option<Vec<AbsolutePath>>,
        output: &mut TuIndexingOutput,
    ) -> IndexResult<IndexingStatistics> {
        let analysis = self.perform_semantic_analysis(&details)?;
        let Some(files) = callback(analysis) else {
            return Ok(IndexingStatistics::default());
        };
        self.index_translation_unit(&details.command, &files, output)
    }

    /// Single-process pipeline over a compilation database, without a
    /// driver. Runs both phases per task and merges in place.
    fn run_compdb(&mut self) -> IndexResult<()> {
        let compdb_path = self.options.compdb_path.clone().ok_or_else(|| {
            IndexError::Config {
                reason: "compdb worker mode requires --compdb-path".to_string(),
            }
        })?;
        let output_path = self.options.index_output_path.clone().ok_or_else(|| {
            IndexError::Config {
                reason: "compdb worker mode requires --index-output-path".to_string(),
            }
        })?;
        let compdb = CompilationDatabase::load(&compdb_path)?;

        let mut phase_a = Vec::new();
        for (task, command) in compdb.commands.iter().enumerate() {
            let details = SemanticAnalysisJobDetails {
                command: command.clone(),
            };
            match self.perform_semantic_analysis(&details) {
                Ok(result) => phase_a.push((task as u32, command.clone(), result)),
                Err(err) => warn!(task, %err, "semantic analysis failed, skipping TU"),
            }
        }

        let election = crate::driver::elect_owners(
            &self.options.project_root,
            phase_a
                .iter()
                .map(|(task, command, result)| (*task, command, result)),
        )?;

        let mut shards = Vec::new();
        let mut statistics = IndexingStatistics::default();
        for (task, command, _) in &phase_a {
            let Some(files) = election.files_by_task.get(task) else {
                continue;
            };
            let job_id = JobId::new(*task, JobId::EMIT_INDEX_SUBTASK);
            let details = EmitIndexJobDetails {
                command: command.clone(),
                files_to_be_indexed: files.clone(),
            };
            match self.perform_emit_index(job_id, &details) {
                Ok(result) => {
                    statistics.accumulate(&result.statistics);
                    shards.push((*task, result.shard_paths));
                }
                Err(err) => warn!(task, %err, "emit index failed, skipping TU"),
            }
        }

        crate::driver::merge_shards(
            &shards,
            &election.multiply_indexed,
            self.options.deterministic,
            crate::scip::Metadata::for_tool(&self.options.project_root, Vec::new()),
            &output_path,
        )?;
        info!(
            tasks = phase_a.len(),
            time_micros = statistics.total_time_micros,
            "compdb indexing finished"
        );
        Ok(())
    }
}
