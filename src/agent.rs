//! The exploration control loop.
//!
//! One [`Explorer::run`] call drives a single task through
//! `Init → LaunchApp → {CaptureScreen → ExtractElements → DecideAndReflect → Act}
//! → CheckCompletion → … → End`. Rounds are strictly sequential; inside a
//! round only the proposal and reflection oracle calls run concurrently, and
//! their results are folded into [`RoundState`] after both return.

use std::collections::BTreeMap;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::annotate::Annotator;
use crate::brain::{
    CompletionJudge, CompletionVerdict, DecisionOracle, Proposal, ProposalRequest, prompt,
    with_deadline,
};
use crate::config::ExplorerConfig;
use crate::docs::{DocStore, MergeOutcome};
use crate::dom::TreeExtractor;
use crate::error::{AgentError, DeviceError, ExecError, OracleError};
use crate::hands::{ActionExecutor, DeviceTransport, Execution};
use crate::journal::{self, ProposalRecord, ReflectionRecord, TaskWorkspace};
use crate::reflect::{self, Reflection, ReflectionInput};
use crate::types::{
    ActionRecord, ChatMessage, DenyList, Disposition, ElementSet, FallbackVerdict, ProposedAction,
};

/// Summary handed to the oracle when there is nothing to summarize.
const NO_SUMMARY: &str = "None";

#[derive(Debug)]
pub enum Phase {
    Init,
    LaunchApp,
    CaptureScreen,
    ExtractElements,
    DecideAndReflect,
    Act,
    CheckCompletion,
    End(RunOutcome),
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// The completion judge declared the task done.
    Completed,
    /// The oracle proposed `Finish`.
    Finished,
    Failed(AgentError),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, RunOutcome::Failed(_))
    }
}

/// Where `Act` sends the loop next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Recapture without consulting the completion judge.
    Redo,
    /// Ask the completion judge.
    Continue,
    /// The oracle finished the task.
    Finished,
    /// A fatal verdict or rejected action.
    Abort,
}

/// Decide the next step after `Act`.
///
/// An undone or wasted round loops straight back to capture so it is never
/// judged for completion.
pub fn should_fallback(
    verdict: FallbackVerdict,
    step_acted: bool,
    completed: bool,
    rejected: bool,
) -> Transition {
    let undone = matches!(verdict, FallbackVerdict::Ineffective | FallbackVerdict::Back);
    if undone && !step_acted && !rejected {
        Transition::Redo
    } else if verdict == FallbackVerdict::Error || rejected {
        Transition::Abort
    } else if completed {
        Transition::Finished
    } else {
        Transition::Continue
    }
}

/// Replace a proposal whose `area` falls outside the current element set
/// with an `Error` action, so the index never reaches the executor.
pub fn validate_proposal(action: ProposedAction, elements: &ElementSet) -> ProposedAction {
    match action.area() {
        Some(area) if !elements.contains_area(area) => {
            let err = ExecError::OutOfRange {
                kind: action.kind(),
                area,
            };
            ProposedAction::error(err.to_string())
        }
        _ => action,
    }
}

/// App names offered to the oracle, mapped to their packages.
///
/// Each installed package is offered under its name without a leading
/// `com.`; entries from the configured mapping are added when their package
/// is installed.
pub fn installed_apps(
    packages: &[String],
    mapping: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut apps: BTreeMap<String, String> = packages
        .iter()
        .map(|pkg| (pkg.strip_prefix("com.").unwrap_or(pkg).to_string(), pkg.clone()))
        .collect();
    for (name, pkg) in mapping {
        if packages.contains(pkg) {
            apps.insert(name.clone(), pkg.clone());
        }
    }
    apps
}

/// Evolving state of one task run.
#[derive(Debug, Default)]
pub struct RoundState {
    pub round_count: u32,
    pub elements: ElementSet,
    pub last_elements: ElementSet,
    /// Raw screenshot and hierarchy dump of the current round.
    pub screenshot: Option<PathBuf>,
    pub ui_tree: Option<PathBuf>,
    pub next_action: Option<ProposedAction>,
    pub next_summary: String,
    pub verdict: Option<FallbackVerdict>,
    pub history: Vec<ActionRecord>,
    pub transcript: Vec<ChatMessage>,
    pub completed: bool,
    pub step_acted: bool,
    pub deny: DenyList,
    pub doc_count: usize,
    pub last_summary: String,
    /// Cause to report if this round's action is rejected.
    fatal: Option<AgentError>,
}

impl RoundState {
    pub fn new() -> Self {
        Self {
            round_count: 1,
            last_summary: NO_SUMMARY.to_string(),
            ..Default::default()
        }
    }

    pub fn last_action(&self) -> Option<&ProposedAction> {
        self.history.last().map(|record| &record.action)
    }

    fn verdict(&self) -> FallbackVerdict {
        self.verdict.unwrap_or(FallbackVerdict::Pass)
    }
}

/// Result of [`Explorer::run`].
#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub task_dir: Option<PathBuf>,
    /// Rounds that reached `Act`.
    pub rounds: u32,
    /// Documentation fields written during the run.
    pub doc_count: usize,
    pub deny: DenyList,
    pub history: Vec<ActionRecord>,
}

/// Per-run context threaded through the phases.
struct Session<'a> {
    task: &'a str,
    workspace: TaskWorkspace,
    docs: DocStore,
    state: RoundState,
}

/// Drives one device through exploration tasks.
pub struct Explorer {
    config: ExplorerConfig,
    device: Arc<dyn DeviceTransport>,
    oracle: Arc<dyn DecisionOracle>,
    judge: Arc<dyn CompletionJudge>,
    annotator: Arc<dyn Annotator>,
    extractor: TreeExtractor,
    executor: ActionExecutor,
    app_mapping: BTreeMap<String, String>,
}

impl Explorer {
    pub fn new(
        config: ExplorerConfig,
        device: Arc<dyn DeviceTransport>,
        oracle: Arc<dyn DecisionOracle>,
        judge: Arc<dyn CompletionJudge>,
        annotator: Arc<dyn Annotator>,
    ) -> Self {
        Self {
            extractor: TreeExtractor::new(config.min_dist),
            executor: ActionExecutor,
            app_mapping: BTreeMap::new(),
            config,
            device,
            oracle,
            judge,
            annotator,
        }
    }

    pub fn with_app_mapping(mut self, mapping: BTreeMap<String, String>) -> Self {
        self.app_mapping = mapping;
        self
    }

    fn deadline(&self) -> Duration {
        Duration::from_secs(self.config.oracle.timeout_secs)
    }

    /// Run one task to its end. Failures are reported, never raised.
    pub async fn run(&self, task: &str) -> RunReport {
        let workspace = match TaskWorkspace::create(&self.config.work_dir) {
            Ok(ws) => ws,
            Err(err) => {
                error!("failed to create task workspace: {err}");
                return RunReport {
                    outcome: RunOutcome::Failed(err.into()),
                    task_dir: None,
                    rounds: 0,
                    doc_count: 0,
                    deny: DenyList::new(),
                    history: Vec::new(),
                };
            }
        };
        info!(task, dir = %workspace.task_dir.display(), "starting exploration");

        let mut session = Session {
            task,
            docs: DocStore::new(&workspace.docs_dir),
            workspace,
            state: RoundState::new(),
        };

        let mut phase = Phase::Init;
        let outcome = loop {
            debug!(round = session.state.round_count, ?phase, "entering phase");
            let next = match phase {
                Phase::End(outcome) => break outcome,
                Phase::Init => self.init(&mut session).await,
                Phase::LaunchApp => self.launch_app(&mut session).await,
                Phase::CaptureScreen => self.capture_screen(&mut session).await,
                Phase::ExtractElements => self.extract_elements(&mut session).await,
                Phase::DecideAndReflect => self.decide_and_reflect(&mut session).await,
                Phase::Act => self.act(&mut session).await,
                Phase::CheckCompletion => self.check_completion(&mut session).await,
            };
            phase = next.unwrap_or_else(|err| Phase::End(RunOutcome::Failed(err)));
        };

        let state = session.state;
        match &outcome {
            RunOutcome::Failed(err) => error!(rounds = state.history.len(), "task failed: {err}"),
            _ => info!(rounds = state.history.len(), docs = state.doc_count, "task finished"),
        }
        RunReport {
            outcome,
            task_dir: Some(session.workspace.task_dir),
            rounds: state.round_count - 1,
            doc_count: state.doc_count,
            deny: state.deny,
            history: state.history,
        }
    }

    /// Run a blocking device operation off the async runtime.
    async fn on_device<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce(&dyn DeviceTransport) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<DeviceError> + Send + 'static,
    {
        let device = Arc::clone(&self.device);
        tokio::task::spawn_blocking(move || op(device.as_ref()))
            .await
            .map_err(|e| E::from(DeviceError::Aborted(e.to_string())))?
    }

    async fn annotate(
        &self,
        screenshot: &Path,
        output: PathBuf,
        elements: &ElementSet,
    ) -> Result<(), AgentError> {
        let annotator = Arc::clone(&self.annotator);
        let screenshot = screenshot.to_path_buf();
        let elements = elements.clone();
        tokio::task::spawn_blocking(move || annotator.annotate(&screenshot, &output, &elements))
            .await
            .map_err(|e| AgentError::CaptureFailure(e.to_string()))??;
        Ok(())
    }

    async fn init(&self, session: &mut Session<'_>) -> Result<Phase, AgentError> {
        let (width, height) = self
            .on_device(|d| d.screen_size())
            .await
            .map_err(|e| AgentError::CaptureFailure(e.to_string()))?;
        if width == 0 || height == 0 {
            return Err(AgentError::CaptureFailure(format!(
                "invalid screen size {width}x{height}"
            )));
        }
        self.on_device(|d| d.prepare())
            .await
            .map_err(|e| AgentError::CaptureFailure(e.to_string()))?;

        info!(width, height, "device ready");
        session.state.transcript.push(ChatMessage::user(session.task));
        Ok(Phase::LaunchApp)
    }

    async fn launch_app(&self, session: &mut Session<'_>) -> Result<Phase, AgentError> {
        let packages = match self.on_device(|d| d.list_installed_packages()).await {
            Ok(packages) => packages,
            Err(err) => {
                warn!("failed to list installed packages: {err}");
                Vec::new()
            }
        };
        let apps = installed_apps(&packages, &self.app_mapping);
        if apps.is_empty() {
            warn!("no installed apps to choose from, exploring the current screen");
            return Ok(Phase::CaptureScreen);
        }

        let names: Vec<String> = apps.keys().cloned().collect();
        let choice = with_deadline(
            self.deadline(),
            self.oracle.choose_app(session.task, &names),
        )
        .await
        .map_err(oracle_failure)?;

        match apps.get(&choice.app) {
            Some(package) => {
                info!(app = %choice.app, package = %package, "launching app");
                let package = package.clone();
                if let Err(err) = self.on_device(move |d| d.launch_package(&package)).await {
                    warn!(app = %choice.app, "failed to launch app: {err}");
                }
            }
            None => error!(app = %choice.app, "no application opened"),
        }

        if !choice.reason.is_empty() {
            session
                .state
                .transcript
                .push(ChatMessage::assistant(choice.reason.clone()));
            session.state.last_summary = choice.reason;
        }
        Ok(Phase::CaptureScreen)
    }

    async fn capture_screen(&self, session: &mut Session<'_>) -> Result<Phase, AgentError> {
        let round = session.state.round_count;
        if round > self.config.max_rounds {
            return Err(AgentError::RoundLimit(self.config.max_rounds));
        }
        info!(round, "capturing screen");

        let dir = session.workspace.task_dir.clone();
        let capture = |e: DeviceError| AgentError::CaptureFailure(e.to_string());
        let shot_dir = dir.clone();
        let screenshot = self
            .on_device(move |d| d.capture_screenshot(&format!("{round}_before"), &shot_dir))
            .await
            .map_err(capture)?;
        let ui_tree = self
            .on_device(move |d| d.capture_ui_tree(&round.to_string(), &dir))
            .await
            .map_err(capture)?;

        let state = &mut session.state;
        state.screenshot = Some(screenshot);
        state.ui_tree = Some(ui_tree);
        state.next_action = None;
        state.verdict = None;
        state.fatal = None;
        Ok(Phase::ExtractElements)
    }

    async fn extract_elements(&self, session: &mut Session<'_>) -> Result<Phase, AgentError> {
        let state = &mut session.state;
        let round = state.round_count;
        let (Some(screenshot), Some(ui_tree)) = (state.screenshot.clone(), state.ui_tree.clone())
        else {
            return Err(AgentError::CaptureFailure(format!(
                "round {round} has no captured screen"
            )));
        };

        let elements = self.extractor.extract(&ui_tree, &state.deny)?;
        info!(round, elements = elements.len(), denied = state.deny.len(), "extracted elements");
        state.last_elements = mem::replace(&mut state.elements, elements);

        self.annotate(
            &screenshot,
            session.workspace.before_labeled(round),
            &state.elements,
        )
        .await?;
        if round > 1 {
            self.annotate(
                &screenshot,
                session.workspace.after_labeled(round - 1),
                &state.last_elements,
            )
            .await?;
        }
        Ok(Phase::DecideAndReflect)
    }

    async fn decide_and_reflect(&self, session: &mut Session<'_>) -> Result<Phase, AgentError> {
        let Session {
            task,
            workspace,
            docs,
            state,
        } = session;
        let task = *task;
        let round = state.round_count;
        let deadline = self.deadline();

        let screenshot = workspace.before_labeled(round);
        let before = workspace.before_labeled(round.saturating_sub(1));
        let after = workspace.after_labeled(round.saturating_sub(1));
        let request = ProposalRequest {
            task,
            last_summary: &state.last_summary,
            screenshot: &screenshot,
        };
        let input = ReflectionInput {
            step_acted: state.step_acted,
            last_action: state.last_action(),
            last_elements: &state.last_elements,
            task,
            last_summary: &state.last_summary,
            before: &before,
            after: &after,
        };

        let (proposal, reflection) = tokio::join!(
            with_deadline(deadline, self.oracle.propose_next_action(&request)),
            reflect::reflect(self.oracle.as_ref(), input, deadline),
        );

        self.record_proposal(workspace, task, state, round, &proposal);
        if let (Some(action), Some(raw)) = (state.last_action(), &reflection.raw) {
            let record = ReflectionRecord {
                step: round - 1,
                prompt: &prompt::reflect(action, task, &state.last_summary),
                image_before: journal::before_labeled_name(round - 1),
                image_after: journal::after_labeled_name(round - 1),
                response: raw,
            };
            if let Err(err) = journal::append(&workspace.reflect_log, &record) {
                warn!(round, "failed to journal reflection: {err}");
            }
        }

        match proposal {
            Ok(proposal) => {
                let action = validate_proposal(proposal.action, &state.elements);
                if let ProposedAction::Error { message } = &action {
                    warn!(round, "{message}");
                    state.fatal = Some(AgentError::OutOfRangeAction(message.clone()));
                }
                info!(round, action = %action, "action scheduled");
                state
                    .transcript
                    .push(ChatMessage::assistant(proposal.summary.clone()));
                state.next_summary = proposal.summary;
                state.next_action = Some(action);
            }
            Err(err) => {
                error!(round, "oracle failed to propose an action: {err}");
                state.next_action = Some(ProposedAction::error(err.to_string()));
                state.next_summary = state.last_summary.clone();
                state.fatal = Some(oracle_failure(err));
            }
        }

        self.absorb_reflection(state, docs, reflection);
        Ok(Phase::Act)
    }

    fn record_proposal(
        &self,
        workspace: &TaskWorkspace,
        task: &str,
        state: &RoundState,
        round: u32,
        proposal: &Result<Proposal, OracleError>,
    ) {
        let Ok(proposal) = proposal else {
            return;
        };
        let record = ProposalRecord {
            step: round,
            prompt: &prompt::explore(task, &state.last_summary),
            image: journal::before_labeled_name(round),
            response: &proposal.raw,
        };
        if let Err(err) = journal::append(&workspace.explore_log, &record) {
            warn!(round, "failed to journal proposal: {err}");
        }
    }

    fn absorb_reflection(&self, state: &mut RoundState, docs: &DocStore, reflection: Reflection) {
        let round = state.round_count;
        match reflection.verdict {
            FallbackVerdict::Pass => debug!(round, reason = %reflection.rationale, "reflection passed"),
            FallbackVerdict::Error => {
                error!(round, "reflection failed: {}", reflection.rationale);
                state.fatal = Some(AgentError::OracleFailure(reflection.rationale.clone()));
            }
            verdict => info!(round, %verdict, "reflection verdict"),
        }

        match reflect::apply(&reflection, &mut state.deny, docs) {
            Ok(effects) => {
                if effects.documented == Some(MergeOutcome::Written) {
                    state.doc_count += 1;
                }
            }
            Err(err) => warn!(round, "failed to store documentation: {err}"),
        }
        state.verdict = Some(reflection.verdict);
    }

    async fn act(&self, session: &mut Session<'_>) -> Result<Phase, AgentError> {
        let state = &mut session.state;
        let round = state.round_count;
        let verdict = state.verdict();
        let action = state
            .next_action
            .take()
            .unwrap_or_else(|| ProposedAction::error("no action proposed"));
        let mut summary = mem::take(&mut state.next_summary);
        state.round_count += 1;
        state.step_acted = false;

        let denied_target = action
            .area()
            .and_then(|area| state.elements.get(area))
            .is_some_and(|element| state.deny.contains(&element.id));

        let disposition = if verdict == FallbackVerdict::Back {
            info!(round, "navigating back");
            summary = NO_SUMMARY.to_string();
            match self.on_device(|d| d.navigate_back()).await {
                Ok(()) => Disposition::NavigatedBack,
                Err(err) => {
                    let failure = AgentError::ExecutionFailure(err.to_string());
                    error!(round, "navigate back: {failure}");
                    Disposition::Failed
                }
            }
        } else if verdict == FallbackVerdict::Error {
            Disposition::Rejected
        } else if verdict == FallbackVerdict::Ineffective && denied_target {
            info!(round, action = %action, "target was just denylisted, skipping");
            Disposition::Skipped
        } else {
            match &action {
                ProposedAction::Finish => {
                    state.completed = true;
                    Disposition::Finished
                }
                ProposedAction::Error { .. } => Disposition::Rejected,
                _ => {
                    let executor = self.executor;
                    let planned = action.clone();
                    let elements = state.elements.clone();
                    match self
                        .on_device(move |d| executor.execute(&planned, &elements, d))
                        .await
                    {
                        Ok(Execution::Performed(_)) => {
                            state.step_acted = true;
                            Disposition::Executed
                        }
                        Ok(other) => {
                            debug!(round, ?other, "no device action");
                            Disposition::Executed
                        }
                        Err(err) => {
                            let failure = AgentError::ExecutionFailure(err.to_string());
                            error!(round, action = %action, "{failure}");
                            Disposition::Failed
                        }
                    }
                }
            }
        };

        let rejected = disposition == Disposition::Rejected;
        if disposition != Disposition::Failed || verdict == FallbackVerdict::Back {
            state.last_summary = summary.clone();
        }
        state.history.push(ActionRecord {
            round,
            action,
            summary,
            disposition,
        });

        match should_fallback(verdict, state.step_acted, state.completed, rejected) {
            Transition::Redo => {
                info!(round, %verdict, "redoing round");
                Ok(Phase::CaptureScreen)
            }
            Transition::Continue => Ok(Phase::CheckCompletion),
            Transition::Finished => Ok(Phase::End(RunOutcome::Finished)),
            Transition::Abort => Err(state
                .fatal
                .take()
                .unwrap_or_else(|| AgentError::OracleFailure(format!("round {round} rejected")))),
        }
    }

    async fn check_completion(&self, session: &mut Session<'_>) -> Result<Phase, AgentError> {
        let round = session.state.round_count - 1;
        let raw = with_deadline(self.deadline(), self.judge.judge(&session.state.transcript))
            .await
            .map_err(oracle_failure)?;

        match CompletionVerdict::parse(&raw) {
            Some(CompletionVerdict::Finished) => {
                info!(round, "task judged complete");
                return Ok(Phase::End(RunOutcome::Completed));
            }
            Some(CompletionVerdict::Continue) => debug!(round, "task not complete yet"),
            None => warn!(round, response = %raw.trim(), "undefined completion verdict, continuing"),
        }

        let pause = Duration::from_secs(self.config.request_interval_secs);
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
        Ok(Phase::CaptureScreen)
    }
}

fn oracle_failure(err: OracleError) -> AgentError {
    AgentError::OracleFailure(err.to_string())
}
