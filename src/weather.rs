//! Weather conditions and the per-condition channel modifier.
//!
//! The observation arrives from the host as a small JSON cache file (or
//! the --weather command); this module only ever sees the normalized tag.
//! Free-form observation text is folded onto the enumerated conditions by
//! keyword, specific phrases before generic ones. Anything unrecognized
//! degrades to Unknown, which modifies nothing.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

use crate::circadian::Spectrum;
use crate::{LEVEL_MAX, WEATHER_STALE_SEC};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Sunny,
    PartlyCloudy,
    Cloudy,
    Rainy,
    Storm,
    Unknown,
}

impl Condition {
    pub fn tag(self) -> &'static str {
        match self {
            Condition::Sunny => "sunny",
            Condition::PartlyCloudy => "partly-cloudy",
            Condition::Cloudy => "cloudy",
            Condition::Rainy => "rainy",
            Condition::Storm => "storm",
            Condition::Unknown => "unknown",
        }
    }

    /// Fold a tag or free-form observation text onto a condition.
    pub fn parse(text: &str) -> Condition {
        let lower = text.trim().to_lowercase();

        match lower.as_str() {
            "sunny" | "clear" => return Condition::Sunny,
            "partly-cloudy" | "partlycloudy" => return Condition::PartlyCloudy,
            "cloudy" => return Condition::Cloudy,
            "rainy" => return Condition::Rainy,
            "storm" | "lightning" => return Condition::Storm,
            _ => {}
        }

        // Keyword fallback. Storm phrases first: "thunderstorm" would
        // otherwise be swallowed by the rain check.
        if lower.contains("thunder") || lower.contains("lightning") || lower.contains("storm") {
            return Condition::Storm;
        }
        if lower.contains("rain") || lower.contains("drizzle") || lower.contains("showers") {
            return Condition::Rainy;
        }
        if lower.contains("partly") {
            return Condition::PartlyCloudy;
        }
        if lower.contains("overcast") || lower.contains("cloud") {
            return Condition::Cloudy;
        }
        if lower.contains("sunny") || lower.contains("clear") || lower.contains("fair") {
            return Condition::Sunny;
        }

        Condition::Unknown
    }
}

/// What the light should do this tick: hold a steady spectrum, or run the
/// transient lightning burst and leave the steady state untouched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightPlan {
    Steady(Spectrum),
    Lightning,
}

/// Apply the weather modifier to a computed spectrum. Single application,
/// never compounded: callers always pass the unmodified circadian output.
pub fn modify(spectrum: Spectrum, condition: Condition, lightning_enabled: bool) -> LightPlan {
    match condition {
        Condition::Sunny | Condition::Unknown => LightPlan::Steady(spectrum),
        Condition::PartlyCloudy => LightPlan::Steady(scale(spectrum, 0.8, 1.0, 0.9, 0.95)),
        Condition::Cloudy => LightPlan::Steady(scale(spectrum, 0.6, 1.2, 0.8, 0.9)),
        Condition::Rainy => LightPlan::Steady(scale(spectrum, 0.4, 1.2, 0.6, 1.3)),
        Condition::Storm if lightning_enabled => LightPlan::Lightning,
        // Effect disabled: a storm sky attenuates like rain.
        Condition::Storm => LightPlan::Steady(scale(spectrum, 0.4, 1.2, 0.6, 1.3)),
    }
}

fn scale(s: Spectrum, white: f64, red: f64, green: f64, blue: f64) -> Spectrum {
    let cap = LEVEL_MAX as f64;
    Spectrum {
        white: (s.white * white).min(cap),
        red: (s.red * red).min(cap),
        green: (s.green * green).min(cap),
        blue: (s.blue * blue).min(cap),
    }
}

/// One recorded weather observation.
#[derive(Debug, Clone)]
pub struct Observation {
    pub condition: Condition,
    pub raw: String,
    pub observed_at: i64,
}

#[derive(Serialize, Deserialize)]
struct ObservationJson {
    condition: String,
    #[serde(default)]
    observed_at: i64,
}

pub fn load_observation(path: &Path) -> Option<Observation> {
    let content = fs::read_to_string(path).ok()?;
    if content.len() > 4096 {
        return None;
    }
    let json: ObservationJson = serde_json::from_str(&content).ok()?;
    Some(Observation {
        condition: Condition::parse(&json.condition),
        raw: json.condition,
        observed_at: json.observed_at,
    })
}

pub fn save_observation(path: &Path, condition_text: &str, now: i64) -> io::Result<()> {
    let json = serde_json::to_string_pretty(&ObservationJson {
        condition: condition_text.to_string(),
        observed_at: now,
    })
    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    fs::write(path, json)
}

/// The condition to act on: a missing or stale observation is Unknown.
pub fn effective_condition(observation: Option<&Observation>, now: i64) -> Condition {
    match observation {
        Some(obs) if now - obs.observed_at <= WEATHER_STALE_SEC => obs.condition,
        _ => Condition::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circadian;

    #[test]
    fn parse_exact_tags() {
        assert_eq!(Condition::parse("sunny"), Condition::Sunny);
        assert_eq!(Condition::parse("partly-cloudy"), Condition::PartlyCloudy);
        assert_eq!(Condition::parse("cloudy"), Condition::Cloudy);
        assert_eq!(Condition::parse("rainy"), Condition::Rainy);
        assert_eq!(Condition::parse("storm"), Condition::Storm);
        assert_eq!(Condition::parse("lightning"), Condition::Storm);
    }

    #[test]
    fn parse_free_text() {
        assert_eq!(Condition::parse("Thunderstorm"), Condition::Storm);
        assert_eq!(Condition::parse("Scattered Thunderstorms"), Condition::Storm);
        assert_eq!(Condition::parse("Light Drizzle"), Condition::Rainy);
        assert_eq!(Condition::parse("Rain Showers"), Condition::Rainy);
        assert_eq!(Condition::parse("Mostly Cloudy"), Condition::Cloudy);
        assert_eq!(Condition::parse("Partly Sunny"), Condition::PartlyCloudy);
        assert_eq!(Condition::parse("Mostly Clear"), Condition::Sunny);
        assert_eq!(Condition::parse("  CLEAR  "), Condition::Sunny);
    }

    #[test]
    fn parse_unrecognized_is_unknown() {
        assert_eq!(Condition::parse(""), Condition::Unknown);
        assert_eq!(Condition::parse("volcanic ash"), Condition::Unknown);
        assert_eq!(Condition::parse("hazy"), Condition::Unknown);
    }

    fn spectrum(white: f64, red: f64, green: f64, blue: f64) -> Spectrum {
        Spectrum {
            white,
            red,
            green,
            blue,
        }
    }

    fn steady(plan: LightPlan) -> Spectrum {
        match plan {
            LightPlan::Steady(s) => s,
            LightPlan::Lightning => panic!("expected steady plan"),
        }
    }

    #[test]
    fn sunny_and_unknown_are_identity() {
        for elevation in [0.0, 3.0, 12.0, 45.0, 70.0] {
            let s = circadian::compute(elevation, true);
            assert_eq!(steady(modify(s, Condition::Sunny, true)), s);
            assert_eq!(steady(modify(s, Condition::Unknown, true)), s);
        }
    }

    #[test]
    fn cloudy_dims_white_and_boosts_red() {
        let s = steady(modify(spectrum(10.0, 5.0, 10.0, 10.0), Condition::Cloudy, true));
        assert!((s.white - 6.0).abs() < 1e-9);
        assert!((s.red - 6.0).abs() < 1e-9);
        assert!((s.green - 8.0).abs() < 1e-9);
        assert!((s.blue - 9.0).abs() < 1e-9);
    }

    #[test]
    fn rainy_boosts_blue_with_cap() {
        let s = steady(modify(spectrum(10.0, 9.0, 10.0, 9.0), Condition::Rainy, true));
        assert!((s.white - 4.0).abs() < 1e-9);
        assert!((s.red - 10.0).abs() < 1e-9); // 10.8 capped
        assert!((s.green - 6.0).abs() < 1e-9);
        assert!((s.blue - 10.0).abs() < 1e-9); // 11.7 capped
    }

    #[test]
    fn partly_cloudy_leaves_red_alone() {
        let s = steady(modify(spectrum(10.0, 4.0, 10.0, 10.0), Condition::PartlyCloudy, true));
        assert!((s.white - 8.0).abs() < 1e-9);
        assert!((s.red - 4.0).abs() < 1e-9);
        assert!((s.green - 9.0).abs() < 1e-9);
        assert!((s.blue - 9.5).abs() < 1e-9);
    }

    #[test]
    fn modified_levels_stay_in_range() {
        for elevation in [-10.0, 0.0, 5.0, 20.0, 45.0, 90.0, 200.0] {
            for condition in [
                Condition::Sunny,
                Condition::PartlyCloudy,
                Condition::Cloudy,
                Condition::Rainy,
                Condition::Storm,
                Condition::Unknown,
            ] {
                let s = circadian::compute(elevation, true);
                if let LightPlan::Steady(modified) = modify(s, condition, false) {
                    let levels = modified.quantize();
                    for ch in crate::state::Channel::ORDER {
                        assert!(levels.get(ch) <= LEVEL_MAX);
                    }
                }
            }
        }
    }

    #[test]
    fn storm_triggers_lightning_when_enabled() {
        let s = circadian::compute(45.0, true);
        assert_eq!(modify(s, Condition::Storm, true), LightPlan::Lightning);
    }

    #[test]
    fn storm_without_effect_scales_like_rain() {
        let s = circadian::compute(45.0, true);
        let storm = steady(modify(s, Condition::Storm, false));
        let rain = steady(modify(s, Condition::Rainy, false));
        assert_eq!(storm, rain);
    }

    #[test]
    fn stale_observation_degrades_to_unknown() {
        let obs = Observation {
            condition: Condition::Rainy,
            raw: "rainy".into(),
            observed_at: 1_000,
        };
        assert_eq!(
            effective_condition(Some(&obs), 1_000 + WEATHER_STALE_SEC),
            Condition::Rainy
        );
        assert_eq!(
            effective_condition(Some(&obs), 1_001 + WEATHER_STALE_SEC),
            Condition::Unknown
        );
        assert_eq!(effective_condition(None, 0), Condition::Unknown);
    }

    #[test]
    fn observation_file_round_trip() {
        let path = crate::state::test_store_path("weather");
        save_observation(&path, "Heavy Rain", 42).unwrap();
        let obs = load_observation(&path).unwrap();
        assert_eq!(obs.condition, Condition::Rainy);
        assert_eq!(obs.observed_at, 42);
        assert_eq!(obs.raw, "Heavy Rain");
        let _ = fs::remove_file(&path);
    }
}
