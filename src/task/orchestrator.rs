//! Evaluation orchestrator.
//!
//! `submit` validates and renders synchronously, records a PENDING task and
//! hands a job to a fixed pool of workers through a bounded queue. Workers run
//! gateway call then parse and store the terminal state. A sweeper drops
//! expired tasks in the background.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::store::TaskStore;
use super::types::{EvaluationRequest, EvaluationTask, TaskError, TaskResult, TaskView};
use super::EvaluationError;
use crate::llm::{Gateway, LlmError, SamplingParams};
use crate::parser;
use crate::prompt::{self, RenderedPrompt};
use crate::template::{OutputParserRules, SharedTemplateStore, TemplateError};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Number of evaluations run concurrently.
    pub workers: usize,
    /// Jobs that may wait for a worker before submits are rejected.
    pub queue_capacity: usize,
    /// How long a finished task stays visible.
    pub retention: Duration,
    pub sweep_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 16,
            queue_capacity: 1024,
            retention: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// A fully resolved unit of work. Carries its own template snapshot so later
/// template edits do not affect it.
struct Job {
    id: Uuid,
    model: String,
    prompt: RenderedPrompt,
    rules: OutputParserRules,
    provide_reasoning: bool,
    params: SamplingParams,
}

pub struct Orchestrator {
    tasks: Arc<TaskStore>,
    templates: SharedTemplateStore,
    queue: mpsc::Sender<Job>,
    /// Shared with the workers; held here so the queue stays open for the
    /// orchestrator's whole lifetime regardless of the pool size.
    jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Spawn the worker pool and sweeper. Must be called inside a tokio runtime.
    pub fn start(
        config: OrchestratorConfig,
        templates: SharedTemplateStore,
        gateway: Arc<Gateway>,
    ) -> Self {
        let tasks = Arc::new(TaskStore::new(config.retention));
        let (queue, rx) = mpsc::channel::<Job>(config.queue_capacity.max(1));
        let jobs = Arc::new(Mutex::new(rx));
        let cancel = CancellationToken::new();

        let mut handles = Vec::with_capacity(config.workers + 1);
        for worker in 0..config.workers {
            handles.push(tokio::spawn(worker_loop(
                worker,
                Arc::clone(&jobs),
                Arc::clone(&tasks),
                Arc::clone(&gateway),
                cancel.clone(),
            )));
        }
        handles.push(tokio::spawn(sweep_loop(
            Arc::clone(&tasks),
            config.sweep_interval,
            cancel.clone(),
        )));

        tracing::info!(
            "Evaluation orchestrator started ({} workers, queue capacity {}, retention {:?})",
            config.workers,
            config.queue_capacity,
            config.retention
        );

        Self {
            tasks,
            templates,
            queue,
            jobs,
            cancel,
            handles: Mutex::new(handles),
        }
    }

    /// Validate, render and enqueue a request. Returns the new task id
    /// without waiting for the evaluation.
    pub async fn submit(&self, request: EvaluationRequest) -> Result<Uuid, EvaluationError> {
        if request.judge_model_id.trim().is_empty() {
            return Err(EvaluationError::Validation(
                "judge_model_id cannot be empty".to_string(),
            ));
        }

        if self.cancel.is_cancelled() {
            return Err(EvaluationError::ShuttingDown);
        }

        let (prompt, rules) = self.prepare(&request).await?;

        let task = EvaluationTask::new(request);
        let id = task.id;
        let kind = task.kind;
        let job = Job {
            id,
            model: task.request.judge_model_id.clone(),
            prompt,
            rules,
            provide_reasoning: task.request.provide_reasoning,
            params: task.request.sampling_params.clone(),
        };
        let model = job.model.clone();
        self.tasks.insert(task).await;

        if let Err(e) = self.queue.try_send(job) {
            self.tasks.remove(id).await;
            return Err(match e {
                mpsc::error::TrySendError::Full(_) => {
                    tracing::warn!("Evaluation queue full, rejecting {} request", kind);
                    EvaluationError::Overloaded
                }
                mpsc::error::TrySendError::Closed(_) => EvaluationError::ShuttingDown,
            });
        }

        tracing::info!("Queued {} evaluation {} (model: {})", kind, id, model);
        Ok(id)
    }

    pub async fn get_status(&self, id: Uuid) -> Result<TaskView, EvaluationError> {
        self.tasks
            .get(id)
            .await
            .map(|task| task.view())
            .ok_or(EvaluationError::NotFound(id))
    }

    /// Stop the workers and sweeper and wait for them to exit. Evaluations
    /// cut short are marked FAILED.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Evaluation worker ended abnormally: {}", e);
            }
        }
        self.jobs.lock().await.close();
        tracing::info!("Evaluation orchestrator stopped");
    }

    /// Resolve the template snapshot, apply overrides and render the prompt.
    async fn prepare(
        &self,
        request: &EvaluationRequest,
    ) -> Result<(RenderedPrompt, OutputParserRules), EvaluationError> {
        let template = match &request.prompt_template_id {
            Some(id) => Some(self.templates.get(id).await.map_err(|e| match e {
                TemplateError::NotFound(id) => EvaluationError::TemplateNotFound(id),
                other => EvaluationError::Validation(other.to_string()),
            })?),
            None => None,
        };

        if template.is_none() && request.custom_prompt_segments.is_empty() {
            return Err(EvaluationError::Validation(
                "Either prompt_template_id or custom_prompt_segments must be provided"
                    .to_string(),
            ));
        }

        let rules = match (&request.output_parser_rules, &template) {
            (Some(rules), _) => {
                rules
                    .validate()
                    .map_err(|e| EvaluationError::Validation(e.to_string()))?;
                rules.clone()
            }
            (None, Some(template)) => template.output_parser_rules.clone(),
            (None, None) => {
                return Err(EvaluationError::Validation(
                    "output_parser_rules are required without prompt_template_id".to_string(),
                ))
            }
        };

        let structure = request
            .custom_prompt_segments
            .apply(template.as_ref().map(|t| &t.prompt_structure));
        let prompt = prompt::render(
            &structure,
            &request.inputs,
            request.output_format_instruction.as_deref(),
            request.provide_reasoning,
        )?;

        Ok((prompt, rules))
    }
}

async fn worker_loop(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    tasks: Arc<TaskStore>,
    gateway: Arc<Gateway>,
    cancel: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            _ = cancel.cancelled() => break,
            job = async { rx.lock().await.recv().await } => job,
        };
        let Some(job) = job else {
            break;
        };
        let id = job.id;

        tokio::select! {
            _ = cancel.cancelled() => {
                tasks
                    .fail(
                        id,
                        LlmError::unavailable("Service shut down before the evaluation finished", None)
                            .into(),
                    )
                    .await;
                break;
            }
            _ = run_job(job, &tasks, &gateway) => {}
        }
    }
    tracing::debug!("Evaluation worker {} exiting", worker);
}

async fn run_job(job: Job, tasks: &TaskStore, gateway: &Gateway) {
    if !tasks.mark_running(job.id).await {
        return;
    }

    let reply = gateway
        .complete(
            &job.model,
            &job.prompt.system_message,
            &job.prompt.user_message,
            &job.params,
        )
        .await;

    match reply {
        Ok(raw) => {
            let parsed = parser::parse(&raw, &job.rules, job.provide_reasoning);
            if parsed.verdict.ambiguous {
                tracing::warn!("Evaluation {} produced an ambiguous verdict", job.id);
            }
            tasks
                .complete(
                    job.id,
                    TaskResult {
                        judgment: parsed.verdict,
                        reasoning: parsed.reasoning,
                    },
                )
                .await;
            tracing::info!("Evaluation {} completed", job.id);
        }
        Err(e) => {
            tracing::error!("Evaluation {} failed: {}", job.id, e);
            tasks.fail(job.id, TaskError::from(e)).await;
        }
    }
}

async fn sweep_loop(tasks: Arc<TaskStore>, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
    interval.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let removed = tasks.sweep().await;
                if removed > 0 {
                    tracing::debug!("Swept {} expired evaluations", removed);
                }
            }
        }
    }
}
