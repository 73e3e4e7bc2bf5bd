use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::config::{DisplaySettings, SettingsProvider, ToggleMode};
use crate::error::AppError;
use crate::events::{EventHandler, PowerEvent, PowerEventKind};
use crate::gpio::{Direction, GpioBackend, GpioLine, LineStatus};
use crate::timer::InactivityTimer;

pub trait ScreensaverMonitor: Send + Sync {
    fn on_screensaver_activated(&self);
    fn on_screensaver_deactivated(&self);
    fn on_settings_changed(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisplayAction {
    Toggled,
    AlreadyInState,
    Suppressed,
}

#[derive(Debug, Clone, Serialize)]
pub struct DisplayStatus {
    pub inactivity_timeout_secs: f64,
    pub use_sense: bool,
    pub export_pins: bool,
    pub toggle_mode: ToggleMode,
    pub toggle_duration_secs: f64,
    pub last_commanded_state: bool,
    pub timer_armed: bool,
    pub shared_line: bool,
    pub sense: LineStatus,
    pub toggle: LineStatus,
}

struct PowerState<B: GpioBackend> {
    settings: DisplaySettings,
    sense_line: Arc<GpioLine<B>>,
    toggle_line: Arc<GpioLine<B>>,
    last_commanded_state: bool,
    pending_timer: Option<InactivityTimer>,
}

impl<B: GpioBackend> PowerState<B> {
    fn lines(&self) -> Vec<Arc<GpioLine<B>>> {
        if Arc::ptr_eq(&self.sense_line, &self.toggle_line) {
            vec![self.toggle_line.clone()]
        } else {
            vec![self.sense_line.clone(), self.toggle_line.clone()]
        }
    }
}

// All transitions serialize on one state lock, including the inactivity
// timer's fire path and the blocking pulse hold.
pub struct DisplayPowerController<B: GpioBackend> {
    backend: Arc<B>,
    settings_provider: Arc<dyn SettingsProvider>,
    state: Mutex<PowerState<B>>,
    timer_generation: AtomicU64,
    events: EventHandler,
    me: Weak<Self>,
}

impl<B: GpioBackend + 'static> DisplayPowerController<B> {
    pub fn new(
        backend: Arc<B>,
        settings_provider: Arc<dyn SettingsProvider>,
        events: EventHandler,
    ) -> Result<Arc<Self>, AppError> {
        let settings = DisplaySettings::load(settings_provider.as_ref())?;
        let (sense_line, toggle_line) = provision_lines(&backend, &settings, true);

        let controller = Arc::new_cyclic(|me| Self {
            backend,
            settings_provider,
            state: Mutex::new(PowerState {
                settings,
                sense_line,
                toggle_line,
                last_commanded_state: true,
                pending_timer: None,
            }),
            timer_generation: AtomicU64::new(0),
            events,
            me: me.clone(),
        });

        {
            let state = controller.state.lock();
            controller.claim_all(&state);
            info!(
                "Display power control on toggle pin {} (sense pin {})",
                state.toggle_line.pin(),
                state.sense_line.pin()
            );
        }

        Ok(controller)
    }

    pub fn load_settings(&self) -> Result<(), AppError> {
        let settings = DisplaySettings::load(self.settings_provider.as_ref())?;

        let mut state = self.state.lock();
        let (sense_line, toggle_line) =
            provision_lines(&self.backend, &settings, state.last_commanded_state);
        let old_lines = state.lines();
        let old_settings = std::mem::replace(&mut state.settings, settings);
        state.sense_line = sense_line;
        state.toggle_line = toggle_line;

        let keep = [state.sense_line.pin(), state.toggle_line.pin()];
        self.unconfigure(old_settings.export_pins, &old_lines, &keep);
        self.claim_all(&state);

        debug!(
            "Settings reloaded: sense pin {}, toggle pin {}",
            keep[0], keep[1]
        );
        self.events.dispatch(PowerEventKind::Reconfigured {
            sense_pin: keep[0],
            toggle_pin: keep[1],
        });
        Ok(())
    }

    pub fn screensaver_activated(&self) -> Result<(), AppError> {
        let mut state = self.state.lock();
        if state.pending_timer.take().is_some() {
            self.events.dispatch(PowerEventKind::TimerCancelled);
        }

        let token = self.timer_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let timeout = state.settings.inactivity_timeout;
        let me = self.me.clone();
        let timer = InactivityTimer::start(token, timeout, move |token| {
            if let Some(controller) = me.upgrade() {
                controller.on_inactivity_timeout(token);
            }
        })?;
        state.pending_timer = Some(timer);

        debug!("Inactivity timer {token} armed for {timeout:?}");
        self.events.dispatch(PowerEventKind::TimerArmed {
            timeout_ms: timeout.as_millis() as u64,
        });
        Ok(())
    }

    pub fn screensaver_deactivated(&self) -> Result<DisplayAction, AppError> {
        let mut state = self.state.lock();
        if let Some(timer) = state.pending_timer.take() {
            debug!("Inactivity timer {} cancelled", timer.token());
            self.events.dispatch(PowerEventKind::TimerCancelled);
        }

        if !state.settings.use_sense && state.last_commanded_state {
            debug!("Display assumed on, not toggling");
            self.events.dispatch(PowerEventKind::Suppressed);
            return Ok(DisplayAction::Suppressed);
        }

        self.drive_display(&mut state, true)
    }

    fn on_inactivity_timeout(&self, token: u64) {
        let mut state = self.state.lock();
        match &state.pending_timer {
            Some(timer) if timer.token() == token => {}
            _ => {
                debug!("Inactivity timer {token} is stale, ignoring");
                return;
            }
        }
        state.pending_timer = None;
        self.events.dispatch(PowerEventKind::TimerFired);

        if let Err(e) = self.drive_display(&mut state, false) {
            error!("Failed to shut down display: {e}");
        }
    }

    pub fn start_display(&self) -> Result<DisplayAction, AppError> {
        let mut state = self.state.lock();
        self.drive_display(&mut state, true)
    }

    pub fn shutdown_display(&self) -> Result<DisplayAction, AppError> {
        let mut state = self.state.lock();
        self.drive_display(&mut state, false)
    }

    pub fn toggle(&self, goal: bool) -> Result<(), AppError> {
        let mut state = self.state.lock();
        self.claim_line(&state.settings, &state.toggle_line)?;
        self.toggle_locked(&mut state, goal)
    }

    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.pending_timer = None;
        let lines = state.lines();
        self.unconfigure(state.settings.export_pins, &lines, &[]);
    }

    pub fn status(&self) -> DisplayStatus {
        let state = self.state.lock();
        DisplayStatus {
            inactivity_timeout_secs: state.settings.inactivity_timeout.as_secs_f64(),
            use_sense: state.settings.use_sense,
            export_pins: state.settings.export_pins,
            toggle_mode: state.settings.toggle_mode,
            toggle_duration_secs: state.settings.toggle_duration.as_secs_f64(),
            last_commanded_state: state.last_commanded_state,
            timer_armed: state.pending_timer.is_some(),
            shared_line: Arc::ptr_eq(&state.sense_line, &state.toggle_line),
            sense: state.sense_line.status(),
            toggle: state.toggle_line.status(),
        }
    }

    pub fn settings(&self) -> DisplaySettings {
        self.state.lock().settings.clone()
    }

    pub fn sense_line(&self) -> Arc<GpioLine<B>> {
        self.state.lock().sense_line.clone()
    }

    pub fn toggle_line(&self) -> Arc<GpioLine<B>> {
        self.state.lock().toggle_line.clone()
    }

    pub fn last_commanded_state(&self) -> bool {
        self.state.lock().last_commanded_state
    }

    pub fn timer_armed(&self) -> bool {
        self.state.lock().pending_timer.is_some()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PowerEvent> {
        self.events.subscribe()
    }

    pub fn recent_events(&self, limit: Option<usize>) -> Vec<PowerEvent> {
        self.events.recent(limit)
    }

    fn drive_display(
        &self,
        state: &mut PowerState<B>,
        goal: bool,
    ) -> Result<DisplayAction, AppError> {
        if state.settings.use_sense {
            self.claim_line(&state.settings, &state.sense_line)?;
            let level = state.sense_line.read_logic_level()?;
            if level == goal {
                info!(
                    "Sense claims display already {}",
                    if goal { "on" } else { "shut down" }
                );
                self.events.dispatch(PowerEventKind::SenseSkipped { level });
                return Ok(DisplayAction::AlreadyInState);
            }
        }

        self.claim_line(&state.settings, &state.toggle_line)?;
        self.toggle_locked(state, goal)?;
        Ok(DisplayAction::Toggled)
    }

    fn toggle_locked(&self, state: &mut PowerState<B>, goal: bool) -> Result<(), AppError> {
        let line = &state.toggle_line;
        let mode = state.settings.toggle_mode;
        match mode {
            // the press is the same whichever way the display goes
            ToggleMode::Pulse => {
                line.write_logic_level(true)?;
                thread::sleep(state.settings.toggle_duration);
                line.write_logic_level(false).inspect_err(|e| {
                    error!("GPIO pin {} stuck high, release failed: {e}", line.pin())
                })?;
            }
            ToggleMode::Hold => {
                line.write_logic_level(goal)?;
                line.set_output_level(goal);
            }
        }

        debug!("Toggled display {} on pin {}", if goal { "on" } else { "off" }, line.pin());
        state.last_commanded_state = goal;
        self.events.dispatch(PowerEventKind::Toggled { goal, mode });
        Ok(())
    }

    fn claim_line(&self, settings: &DisplaySettings, line: &GpioLine<B>) -> Result<(), AppError> {
        let claimed = if settings.export_pins {
            line.claim_or_reexport()
        } else {
            line.reconfigure_direction(None, false)
        };
        claimed.inspect_err(|e| error!("Failed to claim GPIO pin {}: {e}", line.pin()))
    }

    fn claim_all(&self, state: &PowerState<B>) {
        for line in state.lines() {
            // retried before every use
            let _ = self.claim_line(&state.settings, &line);
        }
    }

    // Unexport `old_lines` whose pins are not in `keep`. An empty `keep`
    // releases everything.
    fn unconfigure(&self, owned: bool, old_lines: &[Arc<GpioLine<B>>], keep: &[u32]) {
        if !owned {
            return;
        }
        for line in old_lines {
            if keep.contains(&line.pin()) {
                continue;
            }
            if let Err(e) = line.unexport() {
                warn!("Failed to unexport GPIO pin {}: {e}", line.pin());
            }
        }
    }
}

impl<B: GpioBackend + 'static> ScreensaverMonitor for DisplayPowerController<B> {
    fn on_screensaver_activated(&self) {
        if let Err(e) = self.screensaver_activated() {
            error!("Inactivity timer not armed: {e}");
        }
    }

    fn on_screensaver_deactivated(&self) {
        if let Err(e) = self.screensaver_deactivated() {
            error!("Failed to start display: {e}");
        }
    }

    fn on_settings_changed(&self) {
        if let Err(e) = self.load_settings() {
            error!("Keeping previous settings, reload failed: {e}");
        }
    }
}

// A hold-mode toggle line comes up at the last commanded level, so claiming
// it never changes the display.
fn provision_lines<B: GpioBackend>(
    backend: &Arc<B>,
    settings: &DisplaySettings,
    display_on: bool,
) -> (Arc<GpioLine<B>>, Arc<GpioLine<B>>) {
    let toggle = Arc::new(GpioLine::new(
        backend.clone(),
        settings.toggle_pin,
        Direction::Out,
    ));
    toggle.set_output_level(settings.toggle_mode == ToggleMode::Hold && display_on);
    let sense = if settings.effective_sense_pin() == settings.toggle_pin {
        toggle.clone()
    } else {
        Arc::new(GpioLine::new(
            backend.clone(),
            settings.sense_pin,
            Direction::In,
        ))
    };
    (sense, toggle)
}
