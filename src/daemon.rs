//! Daemon event loop.
//!
//! signalfd (clean shutdown via SIGTERM/SIGINT), inotify on the config
//! directory (override/weather/config/request changes), poll(2) with the
//! update-interval timeout. One tick per wakeup. All reconciliation runs
//! execute on this thread, so at most one is ever in flight; an in-flight
//! run is cancelled between commands when a signal or a superseding
//! trigger arrives, and the next tick re-reconciles from the true partial
//! state.

use std::cell::Cell;
use std::ffi::CString;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::time::Duration;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::Signal;
use nix::sys::signalfd::{SfdFlags, SigSet, SignalFd};

use crate::circadian;
use crate::config::{self, Paths, Settings};
use crate::ir::{IrSettings, IrState};
use crate::reconcile::{self, Executor, Outcome, Report};
use crate::solar;
use crate::state::{Levels, StateStore};
use crate::weather::{self, Condition, LightPlan};
use crate::{now_epoch, UPDATE_SEC};

const IR_INIT_MAX_RETRIES: u32 = 60;
const IR_INIT_RETRY_MS: u64 = 500;

// Wakeup reason bitmask
const FLAG_OVERRIDE: u32 = 1 << 0;
const FLAG_WEATHER: u32 = 1 << 1;
const FLAG_CONFIG: u32 = 1 << 2;
const FLAG_REQUEST: u32 = 1 << 3;

/// Full daemon runtime state
struct DaemonState {
    settings: Settings,
    paths: Paths,
    store: StateStore,
    sink: IrState,
    override_target: Option<Levels>,
    last_condition: Condition,
    pending_resync: bool,
}

// --- Kernel fd helpers ---

/// Block SIGTERM/SIGINT and create a signalfd for clean shutdown.
fn setup_signalfd() -> Option<SignalFd> {
    let mut mask = SigSet::empty();
    mask.add(Signal::SIGTERM);
    mask.add(Signal::SIGINT);
    mask.thread_block().ok()?;
    SignalFd::with_flags(&mask, SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC).ok()
}

/// Set up inotify watching the config directory for file writes.
fn setup_inotify(paths: &Paths) -> i32 {
    let fd = unsafe { libc::inotify_init1(libc::IN_CLOEXEC | libc::IN_NONBLOCK) };
    if fd < 0 {
        return -1;
    }

    let dir = match paths.config_file.parent() {
        Some(d) => d,
        None => {
            unsafe { libc::close(fd) };
            return -1;
        }
    };

    let dir_cstr = match CString::new(dir.to_string_lossy().as_bytes()) {
        Ok(c) => c,
        Err(_) => {
            unsafe { libc::close(fd) };
            return -1;
        }
    };

    let wd = unsafe {
        libc::inotify_add_watch(fd, dir_cstr.as_ptr(), libc::IN_CLOSE_WRITE | libc::IN_MOVED_TO)
    };
    if wd < 0 {
        unsafe { libc::close(fd) };
        return -1;
    }

    fd
}

/// Map a changed file name to a wakeup flag. The daemon's own writes
/// (state.json, daemon.pid) map to 0 and never interrupt a run.
fn flag_for_name(name: &str, paths: &Paths) -> u32 {
    let matches = |p: &std::path::Path| p.file_name().and_then(|n| n.to_str()) == Some(name);
    if matches(&paths.override_file) {
        FLAG_OVERRIDE
    } else if matches(&paths.weather_file) {
        FLAG_WEATHER
    } else if matches(&paths.config_file) {
        FLAG_CONFIG
    } else if matches(&paths.sync_request) || matches(&paths.lightning_request) {
        FLAG_REQUEST
    } else {
        0
    }
}

/// Parse an inotify event buffer, returning flag bits for changed files.
fn parse_inotify_events(buf: &[u8], paths: &Paths) -> u32 {
    const EVENT_HEADER_SIZE: usize = 16;
    let mut offset = 0;
    let mut flags = 0u32;

    while offset + EVENT_HEADER_SIZE <= buf.len() {
        let name_len = u32::from_ne_bytes([
            buf[offset + 12],
            buf[offset + 13],
            buf[offset + 14],
            buf[offset + 15],
        ]) as usize;

        let event_size = EVENT_HEADER_SIZE + name_len;
        if offset + event_size > buf.len() {
            break;
        }

        if name_len > 0 {
            let name_bytes = &buf[offset + EVENT_HEADER_SIZE..offset + event_size];
            let name_end = name_bytes
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(name_bytes.len());
            if let Ok(name) = std::str::from_utf8(&name_bytes[..name_end]) {
                flags |= flag_for_name(name, paths);
            }
        }

        offset += event_size;
    }
    flags
}

/// Drain all pending inotify events, returning their flag bits.
fn drain_inotify(fd: i32, paths: &Paths) -> u32 {
    if fd < 0 {
        return 0;
    }
    let mut flags = 0u32;
    let mut buf = [0u8; 4096];
    loop {
        let len = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if len <= 0 {
            break;
        }
        flags |= parse_inotify_events(&buf[..len as usize], paths);
    }
    flags
}

/// Zero-timeout poll: is this fd readable right now?
fn fd_readable(fd: i32) -> bool {
    if fd < 0 {
        return false;
    }
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    let mut fds = [PollFd::new(borrowed, PollFlags::POLLIN)];
    matches!(poll(&mut fds, PollTimeout::ZERO), Ok(n) if n > 0)
}

/// Initialize the IR backend, retrying while the transport comes up.
fn init_sink_with_retry(ir: &IrSettings, signal_raw: i32) -> IrState {
    let mut attempt = 0u32;
    loop {
        match IrState::init(ir) {
            Ok(sink) => return sink,
            Err(e) => {
                attempt += 1;
                if attempt >= IR_INIT_MAX_RETRIES {
                    eprintln!("[fatal] No IR backend after 30s: {}", e);
                    std::process::exit(1);
                }
                if fd_readable(signal_raw) {
                    eprintln!("Received signal during IR init, exiting...");
                    std::process::exit(0);
                }
                std::thread::sleep(Duration::from_millis(IR_INIT_RETRY_MS));
            }
        }
    }
}

pub fn run(settings: Settings, paths: &Paths) {
    // Block signals first so SIGTERM is never lost during sink init.
    let mut signal_fd = setup_signalfd();
    let signal_raw = signal_fd.as_ref().map(|s| s.as_raw_fd()).unwrap_or(-1);

    let sink = init_sink_with_retry(&settings.ir, signal_raw);

    let store = match StateStore::open(&paths.state_file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("[fatal] Cannot open state store: {}", e);
            std::process::exit(1);
        }
    };
    let pending_resync = store.fresh();
    if pending_resync {
        eprintln!("[state] No previous state, full resync scheduled");
    }

    let ino_fd = setup_inotify(paths);

    if let Err(e) = config::write_pid(paths) {
        eprintln!("[warn] Failed to write PID file: {}", e);
    }

    let mut state = DaemonState {
        settings,
        paths: paths.clone(),
        store,
        sink,
        override_target: None,
        last_condition: Condition::Unknown,
        pending_resync,
    };

    eprintln!(
        "[thalassa] daemon started (backend: {}, inotify: {}, signalfd: {})",
        state.sink.backend_name(),
        if ino_fd >= 0 { "active" } else { "unavailable" },
        if signal_raw >= 0 { "active" } else { "unavailable" },
    );

    // Flags observed mid-run by the cancellation probe, carried into the
    // next tick so the superseding trigger is not lost.
    let pending = Cell::new(0u32);
    let probe_paths = paths.clone();

    // First tick loads any persisted override and applies the current
    // target immediately.
    let mut flags = FLAG_OVERRIDE | FLAG_REQUEST;

    loop {
        let mut cancel = || {
            if fd_readable(signal_raw) {
                return true;
            }
            let fresh = drain_inotify(ino_fd, &probe_paths);
            if fresh != 0 {
                pending.set(pending.get() | fresh);
                return true;
            }
            false
        };

        tick(&mut state, flags | pending.take(), &mut cancel);

        // Wait for the next wakeup -- immediately if a superseding trigger
        // was picked up mid-run.
        let timeout = if pending.get() != 0 {
            PollTimeout::ZERO
        } else {
            PollTimeout::from((UPDATE_SEC * 1000) as u16)
        };

        {
            let mut fds = Vec::with_capacity(2);
            if signal_raw >= 0 {
                fds.push(PollFd::new(
                    unsafe { BorrowedFd::borrow_raw(signal_raw) },
                    PollFlags::POLLIN,
                ));
            }
            if ino_fd >= 0 {
                fds.push(PollFd::new(
                    unsafe { BorrowedFd::borrow_raw(ino_fd) },
                    PollFlags::POLLIN,
                ));
            }
            if fds.is_empty() {
                std::thread::sleep(Duration::from_secs(UPDATE_SEC as u64));
            } else {
                let _ = poll(&mut fds, timeout);
            }
        }

        if let Some(sfd) = signal_fd.as_mut() {
            if fd_readable(signal_raw) {
                let _ = sfd.read_signal();
                eprintln!("\nReceived shutdown signal...");
                break;
            }
        }

        flags = drain_inotify(ino_fd, paths);
    }

    eprintln!("[thalassa] shutting down...");
    config::remove_pid(paths);
    if ino_fd >= 0 {
        unsafe { libc::close(ino_fd) };
    }
}

fn clock(state: &DaemonState, now: i64) -> (u32, u32, u32) {
    solar::local_hms(now, state.settings.solar.utc_offset_hours)
}

fn log_report(what: &str, report: &Report) {
    match report.outcome {
        Outcome::Converged => {
            if report.commands_sent > 0 {
                eprintln!(
                    "  {}: {} commands in {:.1}s",
                    what,
                    report.commands_sent,
                    report.elapsed.as_secs_f64()
                );
            }
        }
        Outcome::Cancelled => eprintln!(
            "  {}: superseded after {} commands",
            what, report.commands_sent
        ),
        Outcome::Failed(e) => eprintln!(
            "[warn] {}: {} after {} commands",
            what, e, report.commands_sent
        ),
    }
}

/// The light plan for `now`: sun position, effective weather condition,
/// and the weather-modified target. One code path feeds both the daemon
/// tick and the status readout.
pub fn current_light_plan(
    now: i64,
    settings: &Settings,
    paths: &Paths,
) -> (solar::SunPosition, Condition, LightPlan) {
    let observation = weather::load_observation(&paths.weather_file);
    let condition = weather::effective_condition(observation.as_ref(), now);
    let sun = solar::position(now, &settings.solar);
    let spectrum = circadian::compute(sun.elevation, sun.is_daylight);
    let plan = weather::modify(spectrum, condition, settings.lightning_enabled);
    (sun, condition, plan)
}

fn tick(state: &mut DaemonState, flags: u32, cancel: &mut dyn FnMut() -> bool) {
    let now = now_epoch();

    if flags & FLAG_CONFIG != 0 {
        if let Some(new_settings) = config::load_settings(&state.paths) {
            if new_settings != state.settings {
                eprintln!(
                    "[config] Reloaded: {:.4}, {:.4} (UTC{:+.1})",
                    new_settings.solar.latitude,
                    new_settings.solar.longitude,
                    new_settings.solar.utc_offset_hours
                );
                // A changed ir_backend takes effect on restart; the open
                // sink is kept.
                state.settings = new_settings;
            }
        }
    }

    if flags & FLAG_OVERRIDE != 0 {
        match config::load_override(&state.paths) {
            Some(ovr) if ovr.active => {
                if state.override_target != Some(ovr.target) {
                    state.override_target = Some(ovr.target);
                    eprintln!("[manual] Override: {}", ovr.target);
                }
            }
            _ => {
                if state.override_target.take().is_some() {
                    config::clear_override(&state.paths);
                    eprintln!("[manual] Override cleared, resuming circadian control");
                }
            }
        }
    }

    let want_lightning = config::take_request(&state.paths.lightning_request);

    let (sun, condition, light_plan) = current_light_plan(now, &state.settings, &state.paths);

    let storm_onset = condition == Condition::Storm && state.last_condition != Condition::Storm;
    state.last_condition = condition;

    // Transient lightning: an explicit request, or the first tick of a
    // storm. Runs through the sink only; the store never sees it.
    if want_lightning || (storm_onset && light_plan == LightPlan::Lightning) {
        let (h, m, s) = clock(state, now);
        eprintln!("[{:02}:{:02}:{:02}] Lightning burst", h, m, s);
        let mut exec = Executor::new(&mut state.sink, &mut state.store);
        let report = exec.lightning_burst(cancel);
        log_report("lightning", &report);
    }

    // Steady-state target: a manual override wins; while a storm holds
    // the lightning plan, the pre-storm steady state is kept (a pending
    // sync request stays on disk until steady state returns).
    let target = match (state.override_target, light_plan) {
        (Some(t), _) => t,
        (None, LightPlan::Steady(s)) => s.quantize(),
        (None, LightPlan::Lightning) => return,
    };

    let want_sync = config::take_request(&state.paths.sync_request);

    if want_sync || state.pending_resync {
        state.pending_resync = false;
        let (h, m, s) = clock(state, now);
        eprintln!(
            "[{:02}:{:02}:{:02}] Resync: {} -> zero -> {}",
            h,
            m,
            s,
            state.store.current(),
            target
        );
        let mut exec = Executor::new(&mut state.sink, &mut state.store);
        let report = exec.resync(target, cancel);
        log_report("resync", &report);
        if !report.converged() {
            state.pending_resync = true;
        }
        return;
    }

    let plan = reconcile::plan(state.store.current(), target);
    if !plan.is_empty() {
        let changed = plan.deltas.iter().filter(|(_, d)| *d != 0).count();
        let (h, m, s) = clock(state, now);
        let mode = if state.override_target.is_some() {
            "manual"
        } else {
            condition.tag()
        };
        eprintln!(
            "[{:02}:{:02}:{:02}] Target: {} ({} channels, {} commands, sun {:.1}, {})",
            h,
            m,
            s,
            target,
            changed,
            plan.len(),
            sun.elevation,
            mode
        );
        let mut exec = Executor::new(&mut state.sink, &mut state.store);
        let report = exec.execute(&plan, cancel);
        log_report("reconcile", &report);
    }
}
