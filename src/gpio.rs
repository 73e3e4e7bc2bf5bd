use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub trait GpioBackend: Send + Sync {
    fn root(&self) -> &Path;
    fn exists(&self, path: &Path) -> bool;
    fn read(&self, path: &Path) -> io::Result<String>;
    fn write(&self, path: &Path, contents: &str) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }

    // "out" alone makes the kernel drive the line low
    fn write_value(&self, level: bool) -> &'static str {
        match (self, level) {
            (Direction::Out, true) => "high",
            _ => self.as_str(),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "in" => Ok(Direction::In),
            // the kernel never reports these, but they are valid writes
            "out" | "high" | "low" => Ok(Direction::Out),
            other => Err(AppError::InvalidValue(format!("Unknown direction {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LineStatus {
    pub pin: u32,
    pub exported: bool,
    pub direction: Option<Direction>,
    pub wanted_direction: Direction,
    pub direction_matches: Option<bool>,
}

pub struct GpioLine<B: GpioBackend> {
    backend: Arc<B>,
    pin: u32,
    wanted_direction: Mutex<Direction>,
    output_level: AtomicBool,
}

impl<B: GpioBackend> GpioLine<B> {
    pub fn new(backend: Arc<B>, pin: u32, wanted_direction: Direction) -> Self {
        Self {
            backend,
            pin,
            wanted_direction: Mutex::new(wanted_direction),
            output_level: AtomicBool::new(false),
        }
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    pub fn wanted_direction(&self) -> Direction {
        *self.wanted_direction.lock()
    }

    pub fn set_output_level(&self, level: bool) {
        self.output_level.store(level, Ordering::SeqCst);
    }

    pub fn pin_path(&self) -> PathBuf {
        self.backend.root().join(format!("gpio{}", self.pin))
    }

    fn attr_path(&self, attr: &str) -> PathBuf {
        self.pin_path().join(attr)
    }

    pub fn is_exported(&self) -> bool {
        self.backend.exists(&self.pin_path())
    }

    pub fn export(&self) -> Result<(), AppError> {
        if self.is_exported() {
            return Ok(());
        }
        let path = self.backend.root().join("export");
        self.backend
            .write(&path, &self.pin.to_string())
            .map_err(|e| AppError::io(&path, e))?;
        debug!("GPIO pin {}: exported", self.pin);
        Ok(())
    }

    pub fn unexport(&self) -> Result<(), AppError> {
        if !self.is_exported() {
            return Ok(());
        }
        let path = self.backend.root().join("unexport");
        self.backend
            .write(&path, &self.pin.to_string())
            .map_err(|e| AppError::io(&path, e))?;
        debug!("GPIO pin {}: unexported", self.pin);
        Ok(())
    }

    pub fn read_current_direction(&self) -> Result<Direction, AppError> {
        let path = self.attr_path("direction");
        let raw = self
            .backend
            .read(&path)
            .map_err(|e| AppError::io(&path, e))?;
        raw.parse()
    }

    // Negotiate the line's direction. Without `override_`, an output line is
    // never turned back into an input. `None` re-asserts the wanted direction.
    pub fn reconfigure_direction(
        &self,
        new_direction: Option<Direction>,
        override_: bool,
    ) -> Result<(), AppError> {
        let mut wanted = self.wanted_direction.lock();
        let target = new_direction.unwrap_or(*wanted);
        let current = self.read_current_direction()?;

        if current == target {
            *wanted = target;
            return Ok(());
        }

        let write_direction = if override_ || target == Direction::Out {
            target
        } else {
            return Err(AppError::DirectionRefused(format!(
                "GPIO pin {} is {current}, refusing to switch to {target} without override",
                self.pin
            )));
        };

        *wanted = write_direction;
        let path = self.attr_path("direction");
        self.backend
            .write(
                &path,
                write_direction.write_value(self.output_level.load(Ordering::SeqCst)),
            )
            .map_err(|e| AppError::io(&path, e))?;
        debug!("GPIO pin {}: direction {current} -> {write_direction}", self.pin);
        Ok(())
    }

    pub fn claim_or_reexport(&self) -> Result<(), AppError> {
        if !self.is_exported() {
            self.export().inspect_err(|e| {
                error!("GPIO pin {}: export failed: {e}", self.pin);
            })?;
        }
        self.reconfigure_direction(None, true)
    }

    pub fn read_logic_level(&self) -> Result<bool, AppError> {
        let path = self.attr_path("value");
        let raw = self
            .backend
            .read(&path)
            .map_err(|e| AppError::io(&path, e))?;
        let value = raw.trim();
        debug!("GPIO pin {}: {value}", self.pin);
        Ok(!(value.is_empty() || value == "0"))
    }

    pub fn write_logic_level(&self, value: bool) -> Result<(), AppError> {
        let path = self.attr_path("value");
        self.backend
            .write(&path, if value { "1" } else { "0" })
            .map_err(|e| AppError::io(&path, e))
    }

    pub fn check_configuration(&self) -> Option<bool> {
        self.read_current_direction()
            .ok()
            .map(|current| current == self.wanted_direction())
    }

    pub fn status(&self) -> LineStatus {
        let exported = self.is_exported();
        let (direction, direction_matches) = if exported {
            (self.read_current_direction().ok(), self.check_configuration())
        } else {
            (None, None)
        };

        LineStatus {
            pin: self.pin,
            exported,
            direction,
            wanted_direction: self.wanted_direction(),
            direction_matches,
        }
    }
}
