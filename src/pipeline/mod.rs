//! Task pipeline: index → filter → assemble → generate → apply.

mod lock;

pub use lock::{TaskLock, STATE_DIR};

use crate::apply::{AppliedEdit, ElementFallback, PatchApplier};
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::context::{self, AssembledContext};
use crate::error::{SpliceError, SpliceResult};
use crate::index::{IndexOptions, IndexStats, SymbolIndex};
use crate::llm::{CodeGenerator, CompletionEngine, ContextFilter, FileEdit, RelevantSymbolRef, Usage};
use crate::workspace::Workspace;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Tunables for one pipeline
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub index: IndexOptions,
    pub max_context_length: usize,
    pub element_fallback: ElementFallback,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            index: config.index_options(),
            max_context_length: config.max_context_length,
            element_fallback: config.element_fallback,
        }
    }
}

/// Progress reported while a task runs
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    IndexBuilt(IndexStats),
    SymbolsSelected(Vec<RelevantSymbolRef>),
    ContextAssembled {
        blocks: usize,
        unresolved: usize,
        chars: usize,
        truncated: bool,
    },
    EditsGenerated(Vec<FileEdit>),
    EditApplied(AppliedEdit),
    EditFailed { target: String, error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedEdit {
    pub target: String,
    pub error: String,
}

/// Summary of one finished task
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub task_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub index: IndexStats,
    pub selected: Vec<RelevantSymbolRef>,
    pub applied: Vec<AppliedEdit>,
    pub failed: Vec<FailedEdit>,
    pub usage: Option<Usage>,
    /// Cancelled between edits; `applied` holds what was committed first
    pub cancelled: bool,
}

impl TaskReport {
    pub fn changed_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.applied.iter().map(|a| a.path.clone()).collect();
        files.sort();
        files.dedup();
        files
    }
}

/// One workspace, one engine, at most one task at a time.
pub struct Pipeline<E, W> {
    engine: E,
    workspace: W,
    settings: PipelineSettings,
    gate: Mutex<()>,
}

impl<E, W> Pipeline<E, W>
where
    E: CompletionEngine,
    W: Workspace,
{
    pub fn new(engine: E, workspace: W, settings: PipelineSettings) -> Self {
        Self {
            engine,
            workspace,
            settings,
            gate: Mutex::new(()),
        }
    }

    pub fn workspace(&self) -> &W {
        &self.workspace
    }

    /// Run a task, rejecting it with `Busy` when another is in flight.
    pub async fn run(
        &self,
        task: &str,
        cancel: &CancelToken,
        events: Option<&UnboundedSender<PipelineEvent>>,
    ) -> SpliceResult<TaskReport> {
        let task = validate_task(task)?;
        let _gate = self.gate.try_lock().map_err(|_| SpliceError::Busy)?;
        let _lock = TaskLock::acquire(self.workspace.root())?;
        self.run_locked(task, cancel, events).await
    }

    /// Run a task once the task in flight (if any) has finished.
    pub async fn run_queued(
        &self,
        task: &str,
        cancel: &CancelToken,
        events: Option<&UnboundedSender<PipelineEvent>>,
    ) -> SpliceResult<TaskReport> {
        let task = validate_task(task)?;
        let _gate = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SpliceError::Cancelled),
            gate = self.gate.lock() => gate,
        };
        let _lock = TaskLock::acquire(self.workspace.root())?;
        self.run_locked(task, cancel, events).await
    }

    async fn run_locked(
        &self,
        task: &str,
        cancel: &CancelToken,
        events: Option<&UnboundedSender<PipelineEvent>>,
    ) -> SpliceResult<TaskReport> {
        let task_id = Uuid::new_v4();
        let started_at = Utc::now();
        let emit = |event: PipelineEvent| {
            if let Some(tx) = events {
                let _ = tx.send(event);
            }
        };
        log::info!("Task {} started in {}", task_id, self.workspace.root().display());

        // Index
        cancel.check()?;
        let root = self.workspace.root().to_path_buf();
        let options = self.settings.index.clone();
        let token = cancel.clone();
        let index = tokio::task::spawn_blocking(move || SymbolIndex::build_with_cancel(&root, &options, &token))
            .await
            .map_err(|e| SpliceError::Background(e.to_string()))??;
        cancel.check()?;
        let stats = index.stats();
        log::info!(
            "Indexed {} files, {} declarations{}",
            stats.file_count,
            stats.symbol_count,
            if stats.truncated { " (truncated)" } else { "" }
        );
        emit(PipelineEvent::IndexBuilt(stats));

        // Filter
        let selected = cancel
            .run(ContextFilter::new(&self.engine).filter_nodes(task, index.render()))
            .await?;
        let mut usage = selected.usage;
        let selected = selected.data;
        log::info!("Engine selected {} declarations", selected.len());
        emit(PipelineEvent::SymbolsSelected(selected.clone()));

        // Assemble
        let context: AssembledContext =
            context::assemble(&selected, &self.workspace, self.settings.max_context_length);
        emit(PipelineEvent::ContextAssembled {
            blocks: context.blocks.len(),
            unresolved: context.unresolved,
            chars: context.char_count(),
            truncated: context.truncated,
        });

        // Generate
        let context_block = (!context.is_empty()).then_some(&context);
        let generated = cancel
            .run(CodeGenerator::new(&self.engine).generate(task, context_block))
            .await?;
        usage = Usage::merge(usage, generated.usage);
        let edits = generated.data.files;
        log::info!("Engine proposed {} edits", edits.len());
        emit(PipelineEvent::EditsGenerated(edits.clone()));

        // Apply
        let applier = PatchApplier::new(&self.workspace, self.settings.element_fallback);
        let mut applied = Vec::new();
        let mut failed = Vec::new();
        let mut cancelled = false;
        for edit in &edits {
            if cancel.is_cancelled() {
                log::warn!("Task {} cancelled; {} edits left unapplied", task_id, edits.len() - applied.len() - failed.len());
                cancelled = true;
                break;
            }
            match applier.apply(edit) {
                Ok(done) => {
                    emit(PipelineEvent::EditApplied(done.clone()));
                    applied.push(done);
                }
                Err(err) => {
                    log::warn!("Edit for {} failed: {}", edit.target(), err);
                    let failure = FailedEdit {
                        target: edit.target().to_string(),
                        error: err.to_string(),
                    };
                    emit(PipelineEvent::EditFailed {
                        target: failure.target.clone(),
                        error: failure.error.clone(),
                    });
                    failed.push(failure);
                }
            }
        }

        Ok(TaskReport {
            task_id,
            started_at,
            finished_at: Utc::now(),
            index: stats,
            selected,
            applied,
            failed,
            usage,
            cancelled,
        })
    }
}

fn validate_task(task: &str) -> SpliceResult<&str> {
    let task = task.trim();
    if task.is_empty() {
        Err(SpliceError::EmptyTask)
    } else {
        Ok(task)
    }
}

#[cfg(test)]
mod tests;
