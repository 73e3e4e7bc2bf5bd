mod backend;
mod config;
mod display;
mod error;
mod events;
mod gpio;
mod routes;
mod timer;

pub use config::{
    AppConfig, DEFAULT_SYSFS_ROOT, DisplaySettings, FileSettings, GpioConfig, HttpConfig,
    MapSettings, SettingsMap, SettingsProvider, ToggleMode,
};
pub use display::{DisplayAction, DisplayPowerController, DisplayStatus, ScreensaverMonitor};
pub use error::AppError;
pub use events::{EventCallbackHandler, EventHandler, PowerEvent, PowerEventKind};
pub use gpio::{Direction, GpioBackend, GpioLine, LineStatus};
pub use routes::AppState;
pub use timer::InactivityTimer;

pub use backend::{MockSysfsBackend, SysfsBackend, WriteRecord};
