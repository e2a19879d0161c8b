use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Stable identity of a UI control, derived from its resource attributes.
///
/// This is the only key used for persistence and denylisting. It is never
/// the same thing as the per-round positional number shown to the oracle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(String);

impl ElementId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ElementId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        let dx = f64::from(self.x - other.x);
        let dy = f64::from(self.y - other.y);
        (dx * dx + dy * dy).sqrt()
    }
}

/// Axis-aligned rectangle in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BBox {
    pub top_left: Point,
    pub bottom_right: Point,
}

impl BBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            top_left: Point::new(x1, y1),
            bottom_right: Point::new(x2, y2),
        }
    }

    /// Integer center, rounded toward negative infinity like the device does.
    pub fn center(&self) -> Point {
        Point::new(
            (self.top_left.x + self.bottom_right.x).div_euclid(2),
            (self.top_left.y + self.bottom_right.y).div_euclid(2),
        )
    }

    pub fn width(&self) -> i32 {
        self.bottom_right.x - self.top_left.x
    }

    pub fn height(&self) -> i32 {
        self.bottom_right.y - self.top_left.y
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Clickable,
    Focusable,
}

impl Capability {
    /// Attribute name in the UI hierarchy dump.
    pub fn attribute(&self) -> &'static str {
        match self {
            Capability::Clickable => "clickable",
            Capability::Focusable => "focusable",
        }
    }
}

/// One interactive UI node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub id: ElementId,
    pub bbox: BBox,
    pub capability: Capability,
}

impl Element {
    pub fn new(id: impl Into<String>, bbox: BBox, capability: Capability) -> Self {
        Self {
            id: ElementId::new(id),
            bbox,
            capability,
        }
    }

    pub fn center(&self) -> Point {
        self.bbox.center()
    }
}

/// The elements shown to the oracle in one round, numbered 1..=N by position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementSet {
    elements: Vec<Element>,
}

impl ElementSet {
    pub fn new(elements: Vec<Element>) -> Self {
        Self { elements }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Resolve a 1-based area number.
    pub fn get(&self, area: usize) -> Option<&Element> {
        area.checked_sub(1).and_then(|idx| self.elements.get(idx))
    }

    pub fn contains_area(&self, area: usize) -> bool {
        (1..=self.len()).contains(&area)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter()
    }

    /// Pairs of (area number, element).
    pub fn numbered(&self) -> impl Iterator<Item = (usize, &Element)> {
        self.elements.iter().enumerate().map(|(idx, e)| (idx + 1, e))
    }
}

/// Element ids judged useless for the current task. Only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DenyList {
    ids: HashSet<ElementId>,
}

impl DenyList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the id was not already denied.
    pub fn insert(&mut self, id: ElementId) -> bool {
        self.ids.insert(id)
    }

    pub fn contains(&self, id: &ElementId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ElementId> {
        self.ids.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }

    pub fn is_vertical(&self) -> bool {
        matches!(self, Direction::Up | Direction::Down)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distance {
    Short,
    Medium,
    Long,
}

impl Distance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Distance::Short => "short",
            Distance::Medium => "medium",
            Distance::Long => "long",
        }
    }

    /// Multiplier applied to the device's swipe unit.
    pub fn factor(&self) -> i32 {
        match self {
            Distance::Short => 1,
            Distance::Medium => 2,
            Distance::Long => 3,
        }
    }
}

/// What the oracle asks the agent to do next.
///
/// `area` is a 1-based position in the current round's [`ElementSet`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ProposedAction {
    Tap {
        area: usize,
    },
    LongPress {
        area: usize,
    },
    Swipe {
        area: usize,
        direction: Direction,
        distance: Distance,
    },
    Text {
        input: String,
    },
    Finish,
    Error {
        message: String,
    },
}

impl ProposedAction {
    pub fn error(message: impl Into<String>) -> Self {
        ProposedAction::Error {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProposedAction::Tap { .. } => "tap",
            ProposedAction::LongPress { .. } => "long_press",
            ProposedAction::Swipe { .. } => "swipe",
            ProposedAction::Text { .. } => "text",
            ProposedAction::Finish => "finish",
            ProposedAction::Error { .. } => "error",
        }
    }

    /// The targeted element number, for actions that target one.
    pub fn area(&self) -> Option<usize> {
        match self {
            ProposedAction::Tap { area }
            | ProposedAction::LongPress { area }
            | ProposedAction::Swipe { area, .. } => Some(*area),
            _ => None,
        }
    }

    /// Documentation slot an outcome of this action is filed under.
    pub fn doc_kind(&self) -> Option<DocKind> {
        match self {
            ProposedAction::Tap { .. } => Some(DocKind::Tap),
            ProposedAction::LongPress { .. } => Some(DocKind::LongPress),
            ProposedAction::Text { .. } => Some(DocKind::Text),
            ProposedAction::Swipe { direction, .. } if direction.is_vertical() => {
                Some(DocKind::VSwipe)
            }
            ProposedAction::Swipe { .. } => Some(DocKind::HSwipe),
            ProposedAction::Finish | ProposedAction::Error { .. } => None,
        }
    }
}

impl fmt::Display for ProposedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProposedAction::Tap { area } => write!(f, "tap({area})"),
            ProposedAction::LongPress { area } => write!(f, "long_press({area})"),
            ProposedAction::Swipe {
                area,
                direction,
                distance,
            } => write!(
                f,
                "swipe({area}, \"{}\", \"{}\")",
                direction.as_str(),
                distance.as_str()
            ),
            ProposedAction::Text { input } => write!(f, "text({input:?})"),
            ProposedAction::Finish => f.write_str("FINISH"),
            ProposedAction::Error { message } => write!(f, "ERROR: {message}"),
        }
    }
}

/// Action kinds an element can be documented under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocKind {
    Tap,
    Text,
    VSwipe,
    HSwipe,
    LongPress,
}

impl DocKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocKind::Tap => "tap",
            DocKind::Text => "text",
            DocKind::VSwipe => "v_swipe",
            DocKind::HSwipe => "h_swipe",
            DocKind::LongPress => "long_press",
        }
    }
}

/// Outcome classification of the previous round's action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FallbackVerdict {
    Pass,
    Ineffective,
    Back,
    Continue,
    Success,
    Error,
}

impl FallbackVerdict {
    /// Verdicts that carry a documentation text from the oracle.
    pub fn documents(&self) -> bool {
        matches!(
            self,
            FallbackVerdict::Back | FallbackVerdict::Continue | FallbackVerdict::Success
        )
    }

    /// Verdicts that put the acted-upon element on the denylist.
    pub fn denies(&self) -> bool {
        matches!(
            self,
            FallbackVerdict::Ineffective | FallbackVerdict::Back | FallbackVerdict::Continue
        )
    }
}

impl fmt::Display for FallbackVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FallbackVerdict::Pass => "PASS",
            FallbackVerdict::Ineffective => "INEFFECTIVE",
            FallbackVerdict::Back => "BACK",
            FallbackVerdict::Continue => "CONTINUE",
            FallbackVerdict::Success => "SUCCESS",
            FallbackVerdict::Error => "ERROR",
        };
        f.write_str(label)
    }
}

/// How a round's `Act` phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Executed,
    Failed,
    Skipped,
    NavigatedBack,
    Finished,
    Rejected,
}

/// One entry of the append-only action history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub round: u32,
    pub action: ProposedAction,
    pub summary: String,
    pub disposition: Disposition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in the task transcript handed to the completion judge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}
