//! Device transport and action execution.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::error::{DeviceError, ExecError};
use crate::types::{Direction, Distance, ElementSet, Point, ProposedAction};

/// Blocking primitives offered by a device. Every call completes or fails
/// before returning; callers never overlap them.
pub trait DeviceTransport: Send + Sync {
    fn screen_size(&self) -> Result<(u32, u32), DeviceError>;

    /// Create the on-device scratch directories.
    fn prepare(&self) -> Result<(), DeviceError>;

    /// Capture a screenshot as `{dir}/{tag}.png` and return its path.
    fn capture_screenshot(&self, tag: &str, dir: &Path) -> Result<PathBuf, DeviceError>;

    /// Dump the UI hierarchy as `{dir}/{tag}.xml` and return its path.
    fn capture_ui_tree(&self, tag: &str, dir: &Path) -> Result<PathBuf, DeviceError>;

    fn tap(&self, x: i32, y: i32) -> Result<(), DeviceError>;
    fn long_press(&self, x: i32, y: i32) -> Result<(), DeviceError>;
    fn swipe(
        &self,
        x: i32,
        y: i32,
        direction: Direction,
        distance: Distance,
    ) -> Result<(), DeviceError>;
    fn type_text(&self, text: &str) -> Result<(), DeviceError>;
    fn navigate_back(&self) -> Result<(), DeviceError>;
    fn list_installed_packages(&self) -> Result<Vec<String>, DeviceError>;
    fn launch_package(&self, package: &str) -> Result<(), DeviceError>;
}

/// Android device driven through the `adb` binary.
pub struct AdbDevice {
    serial: Option<String>,
    remote_screenshot_dir: String,
    remote_xml_dir: String,
    width: OnceLock<u32>,
}

impl AdbDevice {
    pub fn new(
        serial: Option<String>,
        remote_screenshot_dir: impl Into<String>,
        remote_xml_dir: impl Into<String>,
    ) -> Self {
        Self {
            serial,
            remote_screenshot_dir: remote_screenshot_dir.into(),
            remote_xml_dir: remote_xml_dir.into(),
            width: OnceLock::new(),
        }
    }

    fn adb(&self, args: &[&str]) -> Result<String, DeviceError> {
        let mut cmd = Command::new("adb");
        if let Some(serial) = &self.serial {
            cmd.args(["-s", serial]);
        }
        cmd.args(args);
        let printable = format!("adb {}", args.join(" "));
        debug!(command = %printable, "running adb");

        let output = cmd.output().map_err(|source| DeviceError::Spawn {
            command: printable.clone(),
            source,
        })?;
        if !output.status.success() {
            return Err(DeviceError::Command {
                command: printable,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn shell(&self, args: &[&str]) -> Result<String, DeviceError> {
        let mut full = vec!["shell"];
        full.extend_from_slice(args);
        self.adb(&full)
    }

    /// Run a capture command on the device, then pull the file into `dir`.
    fn capture(&self, remote: &str, dir: &Path, file: &str, cmd: &[&str]) -> Result<PathBuf, DeviceError> {
        self.shell(cmd)?;
        let local = dir.join(file);
        let local_str = local.to_string_lossy().to_string();
        self.adb(&["pull", remote, &local_str])?;
        Ok(local)
    }

    fn width(&self) -> Result<u32, DeviceError> {
        if let Some(w) = self.width.get() {
            return Ok(*w);
        }
        let (w, _) = self.screen_size()?;
        Ok(w)
    }
}

impl DeviceTransport for AdbDevice {
    fn screen_size(&self) -> Result<(u32, u32), DeviceError> {
        let out = self.shell(&["wm", "size"])?;
        let (w, h) = parse_wm_size(&out)?;
        let _ = self.width.set(w);
        Ok((w, h))
    }

    fn prepare(&self) -> Result<(), DeviceError> {
        self.shell(&["mkdir", "-p", &self.remote_screenshot_dir])?;
        self.shell(&["mkdir", "-p", &self.remote_xml_dir])?;
        Ok(())
    }

    fn capture_screenshot(&self, tag: &str, dir: &Path) -> Result<PathBuf, DeviceError> {
        let file = format!("{tag}.png");
        let remote = format!("{}/{file}", self.remote_screenshot_dir);
        self.capture(&remote, dir, &file, &["screencap", "-p", &remote])
    }

    fn capture_ui_tree(&self, tag: &str, dir: &Path) -> Result<PathBuf, DeviceError> {
        let file = format!("{tag}.xml");
        let remote = format!("{}/{file}", self.remote_xml_dir);
        self.capture(&remote, dir, &file, &["uiautomator", "dump", &remote])
    }

    fn tap(&self, x: i32, y: i32) -> Result<(), DeviceError> {
        self.shell(&["input", "tap", &x.to_string(), &y.to_string()])?;
        Ok(())
    }

    fn long_press(&self, x: i32, y: i32) -> Result<(), DeviceError> {
        let (x, y) = (x.to_string(), y.to_string());
        self.shell(&["input", "swipe", &x, &y, &x, &y, "1000"])?;
        Ok(())
    }

    fn swipe(
        &self,
        x: i32,
        y: i32,
        direction: Direction,
        distance: Distance,
    ) -> Result<(), DeviceError> {
        let width = i32::try_from(self.width()?)
            .map_err(|_| DeviceError::UnexpectedOutput("screen width overflow".into()))?;
        let (dx, dy) = swipe_offset(width, direction, distance);
        self.shell(&[
            "input",
            "swipe",
            &x.to_string(),
            &y.to_string(),
            &(x + dx).to_string(),
            &(y + dy).to_string(),
            "400",
        ])?;
        Ok(())
    }

    fn type_text(&self, text: &str) -> Result<(), DeviceError> {
        let encoded = encode_input_text(text);
        self.shell(&["input", "text", &encoded])?;
        Ok(())
    }

    fn navigate_back(&self) -> Result<(), DeviceError> {
        self.shell(&["input", "keyevent", "KEYCODE_BACK"])?;
        Ok(())
    }

    fn list_installed_packages(&self) -> Result<Vec<String>, DeviceError> {
        let out = self.shell(&["pm", "list", "packages"])?;
        Ok(out
            .lines()
            .filter_map(|line| line.trim().strip_prefix("package:"))
            .map(str::to_string)
            .collect())
    }

    fn launch_package(&self, package: &str) -> Result<(), DeviceError> {
        self.shell(&[
            "monkey",
            "-p",
            package,
            "-c",
            "android.intent.category.LAUNCHER",
            "1",
        ])?;
        Ok(())
    }
}

/// Parse `Physical size: 1080x2400` (an override line, if any, wins).
pub fn parse_wm_size(output: &str) -> Result<(u32, u32), DeviceError> {
    let line = output
        .lines()
        .filter(|l| l.contains("size:"))
        .last()
        .ok_or_else(|| DeviceError::UnexpectedOutput(output.to_string()))?;
    let dims = line.rsplit(':').next().unwrap_or_default().trim();
    let (w, h) = dims
        .split_once('x')
        .ok_or_else(|| DeviceError::UnexpectedOutput(output.to_string()))?;
    match (w.trim().parse(), h.trim().parse()) {
        (Ok(w), Ok(h)) => Ok((w, h)),
        _ => Err(DeviceError::UnexpectedOutput(output.to_string())),
    }
}

/// Swipe vector: a tenth of the screen width per distance step, doubled vertically.
pub fn swipe_offset(width: i32, direction: Direction, distance: Distance) -> (i32, i32) {
    let unit = width / 10 * distance.factor();
    match direction {
        Direction::Up => (0, -2 * unit),
        Direction::Down => (0, 2 * unit),
        Direction::Left => (-unit, 0),
        Direction::Right => (unit, 0),
    }
}

/// `input text` treats `%s` as a space and cannot take single quotes.
pub fn encode_input_text(text: &str) -> String {
    text.replace(' ', "%s").replace('\'', "")
}

/// A concrete device command resolved from a proposed action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gesture {
    Tap(Point),
    LongPress(Point),
    Swipe {
        from: Point,
        direction: Direction,
        distance: Distance,
    },
    Text(String),
}

/// What executing an action amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Execution {
    /// A device mutation was issued.
    Performed(Gesture),
    /// `Finish`: nothing to do on the device.
    Finished,
    /// `Error`: the round produced no valid action.
    NoAction(String),
}

/// Translates proposed actions into device gestures.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionExecutor;

impl ActionExecutor {
    /// Resolve `area` to the element's bbox center. `None` means no device action.
    pub fn plan(
        &self,
        action: &ProposedAction,
        elements: &ElementSet,
    ) -> Result<Option<Gesture>, ExecError> {
        let center = |area: usize| {
            elements
                .get(area)
                .map(|e| e.center())
                .ok_or(ExecError::OutOfRange {
                    kind: action.kind(),
                    area,
                })
        };
        let gesture = match action {
            ProposedAction::Tap { area } => Gesture::Tap(center(*area)?),
            ProposedAction::LongPress { area } => Gesture::LongPress(center(*area)?),
            ProposedAction::Swipe {
                area,
                direction,
                distance,
            } => Gesture::Swipe {
                from: center(*area)?,
                direction: *direction,
                distance: *distance,
            },
            ProposedAction::Text { input } => Gesture::Text(input.clone()),
            ProposedAction::Finish | ProposedAction::Error { .. } => return Ok(None),
        };
        Ok(Some(gesture))
    }

    pub fn perform(&self, gesture: &Gesture, device: &dyn DeviceTransport) -> Result<(), DeviceError> {
        match gesture {
            Gesture::Tap(p) => device.tap(p.x, p.y),
            Gesture::LongPress(p) => device.long_press(p.x, p.y),
            Gesture::Swipe {
                from,
                direction,
                distance,
            } => device.swipe(from.x, from.y, *direction, *distance),
            Gesture::Text(text) => device.type_text(text),
        }
    }

    /// Plan and perform in one go.
    pub fn execute(
        &self,
        action: &ProposedAction,
        elements: &ElementSet,
        device: &dyn DeviceTransport,
    ) -> Result<Execution, ExecError> {
        match self.plan(action, elements)? {
            Some(gesture) => {
                self.perform(&gesture, device)?;
                info!(?gesture, "performed gesture");
                Ok(Execution::Performed(gesture))
            }
            None => match action {
                ProposedAction::Error { message } => Ok(Execution::NoAction(message.clone())),
                _ => Ok(Execution::Finished),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BBox, Capability, Element};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingDevice {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingDevice {
        fn record(&self, call: String) -> Result<(), DeviceError> {
            self.calls.lock().unwrap().push(call);
            if self.fail {
                Err(DeviceError::Command {
                    command: "adb".into(),
                    stderr: "device offline".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    impl DeviceTransport for RecordingDevice {
        fn screen_size(&self) -> Result<(u32, u32), DeviceError> {
            Ok((1080, 2400))
        }
        fn prepare(&self) -> Result<(), DeviceError> {
            Ok(())
        }
        fn capture_screenshot(&self, tag: &str, dir: &Path) -> Result<PathBuf, DeviceError> {
            Ok(dir.join(format!("{tag}.png")))
        }
        fn capture_ui_tree(&self, tag: &str, dir: &Path) -> Result<PathBuf, DeviceError> {
            Ok(dir.join(format!("{tag}.xml")))
        }
        fn tap(&self, x: i32, y: i32) -> Result<(), DeviceError> {
            self.record(format!("tap {x} {y}"))
        }
        fn long_press(&self, x: i32, y: i32) -> Result<(), DeviceError> {
            self.record(format!("long_press {x} {y}"))
        }
        fn swipe(&self, x: i32, y: i32, d: Direction, dist: Distance) -> Result<(), DeviceError> {
            self.record(format!("swipe {x} {y} {} {}", d.as_str(), dist.as_str()))
        }
        fn type_text(&self, text: &str) -> Result<(), DeviceError> {
            self.record(format!("text {text}"))
        }
        fn navigate_back(&self) -> Result<(), DeviceError> {
            self.record("back".into())
        }
        fn list_installed_packages(&self) -> Result<Vec<String>, DeviceError> {
            Ok(Vec::new())
        }
        fn launch_package(&self, package: &str) -> Result<(), DeviceError> {
            self.record(format!("launch {package}"))
        }
    }

    fn elements() -> ElementSet {
        ElementSet::new(vec![
            Element::new("a", BBox::new(0, 0, 100, 100), Capability::Clickable),
            Element::new("b", BBox::new(200, 400, 400, 600), Capability::Clickable),
        ])
    }

    #[test]
    fn taps_bbox_center() {
        let device = RecordingDevice::default();
        let out = ActionExecutor
            .execute(&ProposedAction::Tap { area: 2 }, &elements(), &device)
            .unwrap();
        assert_eq!(out, Execution::Performed(Gesture::Tap(Point::new(300, 500))));
        assert_eq!(*device.calls.lock().unwrap(), vec!["tap 300 500"]);
    }

    #[test]
    fn swipe_and_long_press_resolve_center() {
        let device = RecordingDevice::default();
        let swipe = ProposedAction::Swipe {
            area: 1,
            direction: Direction::Up,
            distance: Distance::Medium,
        };
        ActionExecutor.execute(&swipe, &elements(), &device).unwrap();
        ActionExecutor
            .execute(&ProposedAction::LongPress { area: 1 }, &elements(), &device)
            .unwrap();
        assert_eq!(
            *device.calls.lock().unwrap(),
            vec!["swipe 50 50 up medium", "long_press 50 50"]
        );
    }

    #[test]
    fn finish_and_error_touch_nothing() {
        let device = RecordingDevice::default();
        assert_eq!(
            ActionExecutor
                .execute(&ProposedAction::Finish, &elements(), &device)
                .unwrap(),
            Execution::Finished
        );
        assert_eq!(
            ActionExecutor
                .execute(&ProposedAction::error("bad"), &elements(), &device)
                .unwrap(),
            Execution::NoAction("bad".into())
        );
        assert!(device.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn unresolvable_area_is_an_error_not_a_panic() {
        let device = RecordingDevice::default();
        let err = ActionExecutor
            .execute(&ProposedAction::Tap { area: 9 }, &elements(), &device)
            .unwrap_err();
        assert_eq!(err.to_string(), "tap 9 is out of range");
        assert!(device.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn device_failure_surfaces() {
        let device = RecordingDevice {
            fail: true,
            ..Default::default()
        };
        let err = ActionExecutor
            .execute(&ProposedAction::Text { input: "hi".into() }, &elements(), &device)
            .unwrap_err();
        assert!(matches!(err, ExecError::Device(_)));
    }

    #[test]
    fn parses_wm_size_output() {
        assert_eq!(parse_wm_size("Physical size: 1080x2400").unwrap(), (1080, 2400));
        assert_eq!(
            parse_wm_size("Physical size: 1080x2400\nOverride size: 720x1600").unwrap(),
            (720, 1600)
        );
        assert!(parse_wm_size("error: no devices").is_err());
    }

    #[test]
    fn swipe_offsets_scale_with_width() {
        assert_eq!(swipe_offset(1080, Direction::Up, Distance::Medium), (0, -432));
        assert_eq!(swipe_offset(1080, Direction::Right, Distance::Short), (108, 0));
        assert_eq!(swipe_offset(1080, Direction::Left, Distance::Long), (-324, 0));
    }

    #[test]
    fn encodes_text_for_input_command() {
        assert_eq!(encode_input_text("it's a test"), "its%sa%stest");
    }
}
