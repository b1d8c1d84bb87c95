//! Sun position and sunrise/sunset model.
//!
//! Declination -> hour angle -> local decimal-hour sunrise/sunset with a
//! fixed UTC offset, then a seasonal-peak elevation curve with parabolic
//! falloff from solar noon. Everything is a pure function of the epoch
//! timestamp and the injected parameters; no ambient clock or timezone.

use std::f64::consts::PI;

use crate::{
    DEFAULT_LATITUDE, DEFAULT_LONGITUDE, DEFAULT_UTC_OFFSET_HOURS, FALLBACK_SUNRISE_HOUR,
    FALLBACK_SUNSET_HOUR, NOON_OFFSET_HOURS, SUMMER_PEAK_DEG, WINTER_PEAK_DEG,
};

fn deg2rad(d: f64) -> f64 {
    d * PI / 180.0
}

fn rad2deg(r: f64) -> f64 {
    r * 180.0 / PI
}

/// Injected solar model parameters. One instance, loaded from config,
/// shared by every call site -- the live and diagnostic paths cannot
/// drift apart.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolarParams {
    pub latitude: f64,
    pub longitude: f64,
    /// Fixed offset from UTC in hours; no ambient timezone lookup.
    pub utc_offset_hours: f64,
    /// Solar-noon shift from 12:00 local, in hours.
    pub noon_offset_hours: f64,
    /// Peak midday elevation at the summer solstice, degrees.
    pub summer_peak: f64,
    /// Peak midday elevation at the winter solstice, degrees.
    pub winter_peak: f64,
}

impl Default for SolarParams {
    fn default() -> Self {
        Self {
            latitude: DEFAULT_LATITUDE,
            longitude: DEFAULT_LONGITUDE,
            utc_offset_hours: DEFAULT_UTC_OFFSET_HOURS,
            noon_offset_hours: NOON_OFFSET_HOURS,
            summer_peak: SUMMER_PEAK_DEG,
            winter_peak: WINTER_PEAK_DEG,
        }
    }
}

/// Sun position result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SunPosition {
    /// Degrees above the horizon; 0 at or below.
    pub elevation: f64,
    pub is_daylight: bool,
}

/// Sunrise/sunset as local decimal hours.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SunTimes {
    pub sunrise: f64,
    pub sunset: f64,
}

pub fn leap_year(year: i32) -> bool {
    (year % 400 == 0) || (year % 4 == 0 && year % 100 != 0)
}

fn year_length(year: i32) -> i64 {
    if leap_year(year) {
        366
    } else {
        365
    }
}

/// Local civil clock from an epoch timestamp and the fixed UTC offset:
/// (day of year 1..=366, decimal hour of day).
pub fn local_clock(when: i64, utc_offset_hours: f64) -> (i32, f64) {
    let local = when + (utc_offset_hours * 3600.0) as i64;
    let mut days = local.div_euclid(86400);
    let secs = local.rem_euclid(86400);

    let mut year = 1970;
    loop {
        let len = year_length(year);
        if days >= len {
            days -= len;
            year += 1;
        } else if days < 0 {
            year -= 1;
            days += year_length(year);
        } else {
            break;
        }
    }

    (days as i32 + 1, secs as f64 / 3600.0)
}

/// Local wall-clock (hour, minute, second) for log stamps and status output.
pub fn local_hms(when: i64, utc_offset_hours: f64) -> (u32, u32, u32) {
    let secs = (when + (utc_offset_hours * 3600.0) as i64).rem_euclid(86400);
    (
        (secs / 3600) as u32,
        (secs % 3600 / 60) as u32,
        (secs % 60) as u32,
    )
}

/// Solar declination in degrees for a day of year.
pub fn declination(day_of_year: i32) -> f64 {
    23.45 * deg2rad(360.0 / 365.0 * (day_of_year - 81) as f64).sin()
}

/// Peak midday elevation for a day of year, interpolated between the
/// winter and summer extremes on a sinusoid.
fn seasonal_peak(day_of_year: i32, params: &SolarParams) -> f64 {
    let phase = (day_of_year - 80) as f64 / 365.0 * 2.0 * PI;
    params.winter_peak + (params.summer_peak - params.winter_peak) * (1.0 + phase.sin()) / 2.0
}

/// Sunrise and sunset for the day containing `when`.
///
/// At extreme latitudes the hour-angle cosine leaves [-1, 1]; the model
/// then falls back to a fixed 06:30/18:30 pair instead of failing.
pub fn sunrise_sunset(when: i64, params: &SolarParams) -> SunTimes {
    let (day_of_year, _) = local_clock(when, params.utc_offset_hours);
    let decl = declination(day_of_year);

    let cos_ha = -(deg2rad(params.latitude).tan() * deg2rad(decl).tan());
    if !(-1.0..=1.0).contains(&cos_ha) {
        return SunTimes {
            sunrise: FALLBACK_SUNRISE_HOUR,
            sunset: FALLBACK_SUNSET_HOUR,
        };
    }

    let hour_angle = rad2deg(cos_ha.acos());
    SunTimes {
        sunrise: 12.0 - hour_angle / 15.0 + params.noon_offset_hours,
        sunset: 12.0 + hour_angle / 15.0 + params.noon_offset_hours,
    }
}

/// Sun position at `when`: daylight iff the local decimal hour falls in
/// [sunrise, sunset]; elevation is the seasonal peak scaled by a parabolic
/// falloff from solar noon, zero at night or beyond six hours from noon.
pub fn position(when: i64, params: &SolarParams) -> SunPosition {
    let (day_of_year, hour) = local_clock(when, params.utc_offset_hours);
    let times = sunrise_sunset(when, params);

    if hour < times.sunrise || hour > times.sunset {
        return SunPosition {
            elevation: 0.0,
            is_daylight: false,
        };
    }

    let noon = 12.0 + params.noon_offset_hours;
    let hours_from_noon = (hour - noon).abs();
    let elevation = if hours_from_noon <= 6.0 {
        let falloff = 1.0 - (hours_from_noon / 6.0).powi(2);
        (seasonal_peak(day_of_year, params) * falloff).max(0.0)
    } else {
        0.0
    };

    SunPosition {
        elevation,
        is_daylight: true,
    }
}
