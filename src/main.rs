//! THALASSA - Circadian aquarium light daemon
//!
//! Commands:
//!   --daemon         Run as daemon (default)
//!   --status         Show current status
//!   --set-location   Set location (LAT,LON[,UTC_OFFSET])
//!   --weather        Record a weather observation
//!   --set            Manual target override (W R G B)
//!   --resume         Clear manual override
//!   --sync           Request full resync (reset to zero, rebuild)
//!   --lightning      Trigger one lightning burst
//!   --test-lights    Sweep each channel 0-10-0 through the fixture
//!   --reset          Drive all channels to zero and exit
//!   --help           Show usage

mod circadian;
mod config;
mod daemon;
mod ir;
mod reconcile;
mod solar;
mod state;
mod weather;

use std::process;

use state::{Channel, Levels};

/// Channel level scale
pub const LEVEL_MAX: u8 = 10;

/// Minimum delay between IR commands (hardware pacing requirement)
pub const COMMAND_DELAY_MS: u64 = 500;

/// Lightning flashes per burst
pub const LIGHTNING_PULSES: u32 = 3;

/// Timing
pub const UPDATE_SEC: i64 = 60; // circadian tick
pub const WEATHER_STALE_SEC: i64 = 3600; // observation older than this is Unknown

/// Seasonal midday elevation peaks (degrees)
pub const SUMMER_PEAK_DEG: f64 = 75.0;
pub const WINTER_PEAK_DEG: f64 = 28.0;

/// Polar fallback sunrise/sunset (local decimal hours)
pub const FALLBACK_SUNRISE_HOUR: f64 = 6.5;
pub const FALLBACK_SUNSET_HOUR: f64 = 18.5;

/// Solar-noon shift from 12:00 local (hours)
pub const NOON_OFFSET_HOURS: f64 = -0.5;

/// Default location until configured
pub const DEFAULT_LATITUDE: f64 = 38.28;
pub const DEFAULT_LONGITUDE: f64 = -85.74;
pub const DEFAULT_UTC_OFFSET_HOURS: f64 = -5.0;

enum Command {
    Daemon,
    Status,
    SetLocation(String),
    Weather(String),
    Set(Levels),
    Resume,
    Sync,
    Lightning,
    TestLights,
    Reset,
}

fn print_usage() {
    eprintln!("thalassa - Circadian aquarium light daemon");
    eprintln!();
    eprintln!("Usage: thalassa [COMMAND]");
    eprintln!();
    eprintln!("  --daemon                 Run daemon (default)");
    eprintln!("  --status                 Show current status");
    eprintln!("  --set-location LOC       Set location (LAT,LON or LAT,LON,UTC_OFFSET)");
    eprintln!("  --weather CONDITION      Record a weather observation");
    eprintln!("  --set W R G B            Manual target override (levels 0-10)");
    eprintln!("  --resume                 Clear override, resume circadian control");
    eprintln!("  --sync                   Full resync: reset to zero, rebuild target");
    eprintln!("  --lightning              Trigger one lightning burst");
    eprintln!("  --test-lights            Sweep each channel 0-10-0 (daemon stopped)");
    eprintln!("  --reset                  Drive all channels to zero (daemon stopped)");
    eprintln!("  --help                   Show this help");
}

fn parse_level(arg: &str) -> u8 {
    match arg.parse::<u8>() {
        Ok(v) if v <= LEVEL_MAX => v,
        _ => {
            eprintln!("Invalid level: {} (must be 0-{})", arg, LEVEL_MAX);
            process::exit(1);
        }
    }
}

fn parse_args() -> Command {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        return Command::Daemon;
    }

    match args[1].as_str() {
        "--daemon" | "daemon" => Command::Daemon,
        "--status" | "status" => Command::Status,
        "--set-location" | "set-location" => {
            if args.len() < 3 {
                eprintln!("--set-location requires a location argument");
                eprintln!("  Example: thalassa --set-location 38.28,-85.74");
                eprintln!("  Example: thalassa --set-location 38.28,-85.74,-5");
                process::exit(1);
            }
            Command::SetLocation(args[2].clone())
        }
        "--weather" | "weather" => {
            if args.len() < 3 {
                eprintln!("--weather requires a condition argument");
                eprintln!("  Example: thalassa --weather rainy");
                eprintln!("  Example: thalassa --weather \"Scattered Thunderstorms\"");
                process::exit(1);
            }
            Command::Weather(args[2..].join(" "))
        }
        "--set" | "set" => {
            if args.len() < 6 {
                eprintln!("--set requires four levels: W R G B");
                eprintln!("  Example: thalassa --set 6 3 5 4");
                process::exit(1);
            }
            Command::Set(Levels::new(
                parse_level(&args[2]),
                parse_level(&args[3]),
                parse_level(&args[4]),
                parse_level(&args[5]),
            ))
        }
        "--resume" | "resume" => Command::Resume,
        "--sync" | "sync" => Command::Sync,
        "--lightning" | "lightning" => Command::Lightning,
        "--test-lights" | "test-lights" => Command::TestLights,
        "--reset" | "reset" => Command::Reset,
        "--help" | "-h" | "help" => {
            print_usage();
            process::exit(0);
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            process::exit(1);
        }
    }
}

fn main() {
    let command = parse_args();

    let paths = match config::Paths::init() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to initialize paths: {e}");
            process::exit(1);
        }
    };

    // Commands that don't need a configured location
    match &command {
        Command::SetLocation(location) => {
            process::exit(cmd_set_location(location, &paths));
        }
        Command::Weather(text) => {
            process::exit(cmd_weather(text, &paths));
        }
        Command::Set(target) => {
            process::exit(cmd_set(*target, &paths));
        }
        Command::Resume => {
            cmd_resume(&paths);
            return;
        }
        Command::Sync => {
            process::exit(cmd_request(&paths, &paths.sync_request, "Resync"));
        }
        Command::Lightning => {
            process::exit(cmd_request(&paths, &paths.lightning_request, "Lightning burst"));
        }
        Command::TestLights => {
            process::exit(cmd_test_lights(&paths));
        }
        Command::Reset => {
            process::exit(cmd_reset(&paths));
        }
        _ => {}
    }

    // Remaining commands need a location
    let settings = match config::load_settings(&paths) {
        Some(s) => s,
        None => {
            eprintln!("No location configured. Use --set-location first.");
            eprintln!("  Example: thalassa --set-location 38.28,-85.74,-5");
            process::exit(1);
        }
    };

    match command {
        Command::Status => cmd_status(&settings, &paths),
        Command::Daemon => daemon::run(settings, &paths),
        _ => unreachable!(),
    }
}

fn fmt_hour(decimal: f64) -> String {
    let clamped = decimal.clamp(0.0, 24.0);
    let minutes = (clamped * 60.0) as u32;
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

fn cmd_status(settings: &config::Settings, paths: &config::Paths) {
    let now = now_epoch();
    let solar_params = &settings.solar;

    println!(
        "Location: {:.4}, {:.4} (UTC{:+.1})\n",
        solar_params.latitude, solar_params.longitude, solar_params.utc_offset_hours
    );

    let (h, m, s) = solar::local_hms(now, solar_params.utc_offset_hours);
    let (doy, _) = solar::local_clock(now, solar_params.utc_offset_hours);
    println!("Local time: {:02}:{:02}:{:02} (day {} of year)", h, m, s, doy);

    let times = solar::sunrise_sunset(now, solar_params);
    let sun = solar::position(now, solar_params);
    println!("Sunrise: {}", fmt_hour(times.sunrise));
    println!("Sunset: {}", fmt_hour(times.sunset));
    println!(
        "Sun elevation: {:.1} degrees ({})\n",
        sun.elevation,
        if sun.is_daylight { "daylight" } else { "night" }
    );

    // Weather
    let observation = weather::load_observation(&paths.weather_file);
    let condition = weather::effective_condition(observation.as_ref(), now);
    match &observation {
        Some(obs) => {
            let age_min = (now - obs.observed_at).max(0) / 60;
            println!("Weather: {} ({}, {} min ago)", obs.raw, obs.condition.tag(), age_min);
            if condition == weather::Condition::Unknown && obs.condition != weather::Condition::Unknown {
                println!("  (stale - treated as unknown)");
            }
        }
        None => println!("Weather: Not available"),
    }
    println!();

    // Remembered fixture state
    match state::StateStore::open(&paths.state_file) {
        Ok(store) => {
            if store.fresh() {
                println!("Remembered levels: none (fresh install)");
            } else {
                println!(
                    "Remembered levels: {} (total {}/40)",
                    store.current(),
                    store.current().total()
                );
            }
        }
        Err(e) => println!("Remembered levels: unreadable ({})", e),
    }

    // Override status
    if let Some(ovr) = config::load_override(paths) {
        if ovr.active {
            println!("Mode: MANUAL OVERRIDE");
            println!("Target: {}", ovr.target);
            return;
        }
    }

    let (_, _, plan) = daemon::current_light_plan(now, settings, paths);
    match plan {
        weather::LightPlan::Steady(modified) => {
            println!("Mode: circadian ({})", condition.tag());
            println!("Target: {}", modified.quantize());
        }
        weather::LightPlan::Lightning => {
            println!("Mode: STORM (lightning effect active)");
        }
    }

    println!();
    println!(
        "Daemon: {}",
        if config::check_daemon_alive(paths) {
            "running"
        } else {
            "not running"
        }
    );
}

fn cmd_set_location(loc_str: &str, paths: &config::Paths) -> i32 {
    let parts: Vec<&str> = loc_str.split(',').collect();
    if parts.len() != 2 && parts.len() != 3 {
        eprintln!("Invalid format. Use: LAT,LON or LAT,LON,UTC_OFFSET");
        return 1;
    }

    let lat: f64 = match parts[0].trim().parse() {
        Ok(v) => v,
        Err(_) => {
            eprintln!("Invalid latitude: {}", parts[0]);
            return 1;
        }
    };
    let lon: f64 = match parts[1].trim().parse() {
        Ok(v) => v,
        Err(_) => {
            eprintln!("Invalid longitude: {}", parts[1]);
            return 1;
        }
    };
    let utc_offset: f64 = if parts.len() == 3 {
        match parts[2].trim().parse() {
            Ok(v) => v,
            Err(_) => {
                eprintln!("Invalid UTC offset: {}", parts[2]);
                return 1;
            }
        }
    } else {
        config::load_settings(paths)
            .map(|s| s.solar.utc_offset_hours)
            .unwrap_or(DEFAULT_UTC_OFFSET_HOURS)
    };

    if config::save_location(paths, lat, lon, utc_offset).is_err() {
        eprintln!("Failed to save config");
        return 1;
    }
    println!("Location set to: {:.4}, {:.4} (UTC{:+.1})", lat, lon, utc_offset);
    0
}

fn cmd_weather(text: &str, paths: &config::Paths) -> i32 {
    let condition = weather::Condition::parse(text);
    if weather::save_observation(&paths.weather_file, text, now_epoch()).is_err() {
        eprintln!("Failed to write weather observation");
        return 1;
    }
    println!("Weather recorded: {} ({})", text, condition.tag());
    println!("Daemon will process on next tick (up to {}s).", UPDATE_SEC);
    0
}

fn cmd_set(target: Levels, paths: &config::Paths) -> i32 {
    let ovr = config::OverrideState {
        active: true,
        target,
    };
    if config::save_override(paths, &ovr).is_err() {
        eprintln!("Failed to write override");
        return 1;
    }
    println!("Override: -> {}", target);
    println!("Daemon will process on next tick (up to {}s).", UPDATE_SEC);
    0
}

fn cmd_resume(paths: &config::Paths) {
    let ovr = config::OverrideState {
        active: false,
        target: Levels::zero(),
    };
    let _ = config::save_override(paths, &ovr);
    println!("Resume sent. Daemon will return to circadian control.");
}

fn cmd_request(paths: &config::Paths, request: &std::path::Path, what: &str) -> i32 {
    if !config::check_daemon_alive(paths) {
        eprintln!("Daemon is not running; nothing will process the request.");
    }
    if config::touch_request(request).is_err() {
        eprintln!("Failed to write request file");
        return 1;
    }
    println!("{} requested. Daemon will process on next tick.", what);
    0
}

/// Open the sink and store for a direct (daemon-stopped) command.
fn open_direct(paths: &config::Paths) -> Result<(ir::IrState, state::StateStore), i32> {
    if config::check_daemon_alive(paths) {
        eprintln!("Daemon is running. Stop it before driving the fixture directly.");
        return Err(1);
    }
    let settings = config::load_settings(paths).unwrap_or_default();
    let sink = match ir::IrState::init(&settings.ir) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("No IR backend: {}", e);
            return Err(1);
        }
    };
    let store = match state::StateStore::open(&paths.state_file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Cannot open state store: {}", e);
            return Err(1);
        }
    };
    Ok((sink, store))
}

fn cmd_test_lights(paths: &config::Paths) -> i32 {
    let (mut sink, mut store) = match open_direct(paths) {
        Ok(pair) => pair,
        Err(code) => return code,
    };

    println!("Light test: white -> red -> green -> blue, each 0-10-0");
    println!("Resetting all channels to zero...");

    let mut exec = reconcile::Executor::new(&mut sink, &mut store);
    let report = exec.resync(Levels::zero(), &mut || false);
    if !report.converged() {
        eprintln!("Reset failed after {} commands", report.commands_sent);
        return 1;
    }

    for channel in Channel::ORDER {
        println!("Testing {} channel (0-10-0)...", channel.name());
        let up = exec.reconcile(Levels::zero().with(channel, LEVEL_MAX), &mut || false);
        if !up.converged() {
            eprintln!("{} ramp-up failed after {} commands", channel.name(), up.commands_sent);
            return 1;
        }
        let down = exec.reconcile(Levels::zero(), &mut || false);
        if !down.converged() {
            eprintln!("{} ramp-down failed after {} commands", channel.name(), down.commands_sent);
            return 1;
        }
        println!("  {} channel OK ({} commands)", channel.name(), up.commands_sent + down.commands_sent);
    }

    println!("Light test complete. All channels at zero.");
    0
}

fn cmd_reset(paths: &config::Paths) -> i32 {
    let (mut sink, mut store) = match open_direct(paths) {
        Ok(pair) => pair,
        Err(code) => return code,
    };

    config::clear_override(paths);

    let mut exec = reconcile::Executor::new(&mut sink, &mut store);
    let report = exec.resync(Levels::zero(), &mut || false);
    if !report.converged() {
        eprintln!("Reset incomplete after {} commands", report.commands_sent);
        return 1;
    }

    println!("All channels at zero ({} commands).", report.commands_sent);
    0
}

// Time helper

pub fn now_epoch() -> i64 {
    unsafe { libc::time(std::ptr::null_mut()) as i64 }
}
