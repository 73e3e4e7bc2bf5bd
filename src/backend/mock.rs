use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::config::DEFAULT_SYSFS_ROOT;
use crate::gpio::{Direction, GpioBackend};

pub struct MockSysfsBackend {
    root: PathBuf,
    state: Mutex<MockState>,
}

#[derive(Debug, Clone)]
pub struct WriteRecord {
    pub path: PathBuf,
    pub contents: String,
    pub at: Instant,
}

#[derive(Default)]
struct MockState {
    lines: FxHashMap<u32, MockLine>,
    writes: Vec<WriteRecord>,
    fail_exports: bool,
    failing_levels: Vec<(u32, bool)>,
}

#[derive(Clone)]
struct MockLine {
    direction: Direction,
    level: bool,
}

enum Node {
    Export,
    Unexport,
    Line(u32),
    Direction(u32),
    Value(u32),
}

impl Default for MockSysfsBackend {
    fn default() -> Self {
        Self::new(DEFAULT_SYSFS_ROOT)
    }
}

impl MockSysfsBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn preexport(&self, pin: u32, direction: Direction) {
        self.state.lock().lines.insert(
            pin,
            MockLine {
                direction,
                level: false,
            },
        );
    }

    pub fn set_level(&self, pin: u32, level: bool) {
        if let Some(line) = self.state.lock().lines.get_mut(&pin) {
            line.level = level;
        }
    }

    pub fn level(&self, pin: u32) -> Option<bool> {
        self.state.lock().lines.get(&pin).map(|l| l.level)
    }

    pub fn direction(&self, pin: u32) -> Option<Direction> {
        self.state.lock().lines.get(&pin).map(|l| l.direction)
    }

    pub fn is_exported(&self, pin: u32) -> bool {
        self.state.lock().lines.contains_key(&pin)
    }

    pub fn fail_exports(&self, fail: bool) {
        self.state.lock().fail_exports = fail;
    }

    pub fn fail_level_writes(&self, pin: u32, level: bool) {
        self.state.lock().failing_levels.push((pin, level));
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.state.lock().writes.clone()
    }

    pub fn export_count(&self, pin: u32) -> usize {
        self.count_writes(&self.root.join("export"), &pin.to_string())
    }

    pub fn unexport_count(&self, pin: u32) -> usize {
        self.count_writes(&self.root.join("unexport"), &pin.to_string())
    }

    pub fn value_writes(&self, pin: u32) -> Vec<(bool, Instant)> {
        let path = self.root.join(format!("gpio{pin}")).join("value");
        self.state
            .lock()
            .writes
            .iter()
            .filter(|w| w.path == path)
            .map(|w| (w.contents.trim() != "0", w.at))
            .collect()
    }

    pub fn direction_writes(&self, pin: u32) -> Vec<String> {
        let path = self.root.join(format!("gpio{pin}")).join("direction");
        self.state
            .lock()
            .writes
            .iter()
            .filter(|w| w.path == path)
            .map(|w| w.contents.clone())
            .collect()
    }

    fn count_writes(&self, path: &Path, contents: &str) -> usize {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|w| w.path == path && w.contents.trim() == contents)
            .count()
    }

    fn node(&self, path: &Path) -> io::Result<Node> {
        let rel = path
            .strip_prefix(&self.root)
            .map_err(|_| not_found(path))?;
        let mut parts = rel.iter().map(|p| p.to_string_lossy());

        let node = match (parts.next(), parts.next(), parts.next()) {
            (Some(first), None, None) if first == "export" => Node::Export,
            (Some(first), None, None) if first == "unexport" => Node::Unexport,
            (Some(first), attr, None) => {
                let pin = first
                    .strip_prefix("gpio")
                    .and_then(|n| n.parse::<u32>().ok())
                    .ok_or_else(|| not_found(path))?;
                match attr.as_deref() {
                    None => Node::Line(pin),
                    Some("direction") => Node::Direction(pin),
                    Some("value") => Node::Value(pin),
                    Some(_) => return Err(not_found(path)),
                }
            }
            _ => return Err(not_found(path)),
        };
        Ok(node)
    }
}

impl GpioBackend for MockSysfsBackend {
    fn root(&self) -> &Path {
        &self.root
    }

    fn exists(&self, path: &Path) -> bool {
        let state = self.state.lock();
        match self.node(path) {
            Ok(Node::Export | Node::Unexport) => true,
            Ok(Node::Line(pin) | Node::Direction(pin) | Node::Value(pin)) => {
                state.lines.contains_key(&pin)
            }
            Err(_) => false,
        }
    }

    fn read(&self, path: &Path) -> io::Result<String> {
        let state = self.state.lock();
        match self.node(path)? {
            Node::Direction(pin) => state
                .lines
                .get(&pin)
                .map(|l| format!("{}\n", l.direction))
                .ok_or_else(|| not_found(path)),
            Node::Value(pin) => state
                .lines
                .get(&pin)
                .map(|l| if l.level { "1\n" } else { "0\n" }.to_string())
                .ok_or_else(|| not_found(path)),
            Node::Export | Node::Unexport | Node::Line(_) => Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} is not readable", path.display()),
            )),
        }
    }

    fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        let node = self.node(path)?;
        let mut state = self.state.lock();
        state.writes.push(WriteRecord {
            path: path.to_path_buf(),
            contents: contents.to_string(),
            at: Instant::now(),
        });

        let value = contents.trim();
        match node {
            Node::Export => {
                if state.fail_exports {
                    return Err(io::Error::new(
                        io::ErrorKind::PermissionDenied,
                        "export rejected",
                    ));
                }
                let pin = parse_pin(value)?;
                if state.lines.contains_key(&pin) {
                    return Err(io::Error::new(
                        io::ErrorKind::ResourceBusy,
                        format!("gpio{pin} already exported"),
                    ));
                }
                state.lines.insert(
                    pin,
                    MockLine {
                        direction: Direction::In,
                        level: false,
                    },
                );
                Ok(())
            }
            Node::Unexport => {
                let pin = parse_pin(value)?;
                state
                    .lines
                    .remove(&pin)
                    .map(|_| ())
                    .ok_or_else(|| invalid(format!("gpio{pin} not exported")))
            }
            Node::Line(_) => Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("{} is a directory", path.display()),
            )),
            Node::Direction(pin) => {
                let line = state.lines.get_mut(&pin).ok_or_else(|| not_found(path))?;
                match value {
                    "in" => line.direction = Direction::In,
                    "out" => {
                        line.direction = Direction::Out;
                        line.level = false;
                    }
                    "high" | "low" => {
                        line.direction = Direction::Out;
                        line.level = value == "high";
                    }
                    other => return Err(invalid(format!("bad direction {other:?}"))),
                }
                Ok(())
            }
            Node::Value(pin) => {
                let line = state.lines.get(&pin).ok_or_else(|| not_found(path))?;
                if line.direction != Direction::Out {
                    return Err(io::Error::new(
                        io::ErrorKind::PermissionDenied,
                        format!("gpio{pin} is not an output"),
                    ));
                }
                let level = match value {
                    "0" => false,
                    "1" => true,
                    other => return Err(invalid(format!("bad value {other:?}"))),
                };
                if state.failing_levels.contains(&(pin, level)) {
                    return Err(io::Error::other(format!("gpio{pin} value write rejected")));
                }
                if let Some(line) = state.lines.get_mut(&pin) {
                    line.level = level;
                }
                Ok(())
            }
        }
    }
}

fn parse_pin(value: &str) -> io::Result<u32> {
    value
        .parse::<u32>()
        .map_err(|_| invalid(format!("bad pin number {value:?}")))
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg)
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} does not exist", path.display()),
    )
}
