//! Retrospective judgement of the previous round's action.
//!
//! [`reflect`] only computes a [`Reflection`]; nothing is mutated until
//! [`apply`] runs after the concurrent decide/reflect phase has joined, which
//! keeps the denylist and documentation store single-writer.

use std::path::Path;
use std::time::Duration;
use tracing::{error, info};

use crate::brain::{DecisionOracle, ReflectionRequest, with_deadline};
use crate::docs::{DocStore, MergeOutcome};
use crate::error::DocError;
use crate::types::{DenyList, DocKind, ElementId, ElementSet, FallbackVerdict, ProposedAction};

/// Everything reflection needs from the previous round.
#[derive(Debug, Clone, Copy)]
pub struct ReflectionInput<'a> {
    /// Whether the previous round issued a device mutation.
    pub step_acted: bool,
    pub last_action: Option<&'a ProposedAction>,
    pub last_elements: &'a ElementSet,
    pub task: &'a str,
    pub last_summary: &'a str,
    pub before: &'a Path,
    pub after: &'a Path,
}

/// The element the previous action was aimed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub id: ElementId,
    pub kind: DocKind,
    pub area: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reflection {
    pub verdict: FallbackVerdict,
    pub rationale: String,
    pub target: Option<Target>,
    pub documentation: Option<String>,
    /// Raw oracle response, when the oracle was consulted.
    pub raw: Option<String>,
}

impl Reflection {
    pub fn pass(reason: impl Into<String>) -> Self {
        Self {
            verdict: FallbackVerdict::Pass,
            rationale: reason.into(),
            target: None,
            documentation: None,
            raw: None,
        }
    }

    fn failed(reason: impl Into<String>, target: Option<Target>) -> Self {
        Self {
            verdict: FallbackVerdict::Error,
            rationale: reason.into(),
            target,
            documentation: None,
            raw: None,
        }
    }

    /// Whether the oracle was actually asked.
    pub fn consulted(&self) -> bool {
        self.raw.is_some()
    }
}

/// Classify the outcome of the previous action.
pub async fn reflect(
    oracle: &dyn DecisionOracle,
    input: ReflectionInput<'_>,
    deadline: Duration,
) -> Reflection {
    if !input.step_acted {
        return Reflection::pass("previous round made no device change");
    }
    let Some(action) = input.last_action else {
        return Reflection::pass("no previous action");
    };
    if matches!(action, ProposedAction::Text { .. }) {
        return Reflection::pass("text entry is not reflected on");
    }
    let (Some(area), Some(kind)) = (action.area(), action.doc_kind()) else {
        return Reflection::pass(format!("{} targets no element", action.kind()));
    };
    let Some(element) = input.last_elements.get(area) else {
        return Reflection::failed(
            format!("{} {area} does not resolve in the previous element set", action.kind()),
            None,
        );
    };
    let target = Target {
        id: element.id.clone(),
        kind,
        area,
    };

    info!(element = %target.id, action = %action, "reflecting on previous action");
    let request = ReflectionRequest {
        action,
        task: input.task,
        last_summary: input.last_summary,
        before: input.before,
        after: input.after,
    };
    match with_deadline(deadline, oracle.reflect_on_action(&request)).await {
        Ok(response) => Reflection {
            verdict: response.verdict,
            rationale: response.rationale,
            target: Some(target),
            documentation: response.documentation,
            raw: Some(response.raw),
        },
        Err(err) => {
            error!(element = %target.id, "reflection failed: {err}");
            Reflection::failed(err.to_string(), Some(target))
        }
    }
}

/// What applying a reflection changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Effects {
    pub denied: bool,
    pub documented: Option<MergeOutcome>,
}

/// Update the denylist and documentation store from a verdict.
///
/// The denylist is updated before documentation is written, so a failed
/// write never loses a denial.
pub fn apply(
    reflection: &Reflection,
    deny: &mut DenyList,
    docs: &DocStore,
) -> Result<Effects, DocError> {
    let mut effects = Effects::default();
    let Some(target) = &reflection.target else {
        return Ok(effects);
    };
    let verdict = reflection.verdict;

    if verdict.denies() {
        effects.denied = deny.insert(target.id.clone());
        info!(element = %target.id, %verdict, "element added to denylist");
    }
    if verdict.documents() {
        if let Some(doc) = &reflection.documentation {
            effects.documented = Some(docs.merge(&target.id, target.kind, doc)?);
        }
    }
    Ok(effects)
}
