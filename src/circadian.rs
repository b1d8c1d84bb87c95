//! Circadian target computation.
//!
//! Elevation and the daylight flag fully determine the desired spectrum;
//! hour-of-day never reaches the channel logic. Channels stay real-valued
//! through the weather modifier and are quantized once at the end.

use crate::state::Levels;
use crate::LEVEL_MAX;

/// Real-valued 4-channel light target, pre-quantization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spectrum {
    pub white: f64,
    pub red: f64,
    pub green: f64,
    pub blue: f64,
}

impl Spectrum {
    pub fn dark() -> Self {
        Self {
            white: 0.0,
            red: 0.0,
            green: 0.0,
            blue: 0.0,
        }
    }

    /// Final integer conversion: truncation toward zero, then the [0, 10]
    /// clamp. Applied exactly once, after all derivation and scaling.
    pub fn quantize(self) -> Levels {
        Levels::new(
            quantize_channel(self.white),
            quantize_channel(self.red),
            quantize_channel(self.green),
            quantize_channel(self.blue),
        )
    }
}

fn quantize_channel(value: f64) -> u8 {
    value.clamp(0.0, LEVEL_MAX as f64) as u8
}

/// Base brightness from sun elevation, piecewise-linear on [0, 10].
pub fn base_brightness(elevation: f64) -> f64 {
    if elevation <= 0.0 {
        0.0
    } else if elevation <= 5.0 {
        elevation / 2.5
    } else if elevation <= 20.0 {
        2.0 + (elevation - 5.0) / 5.0
    } else if elevation <= 40.0 {
        5.0 + (elevation - 20.0) / 6.7
    } else if elevation <= 60.0 {
        8.0 + (elevation - 40.0) / 10.0
    } else {
        10.0
    }
}

/// Desired spectrum for a sun position.
///
/// Red and blue pull against each other -- warm at low elevation, cool at
/// high -- reproducing the dawn/dusk-to-midday color sweep. Green is a
/// dependent mixing channel derived from the others, never primary.
pub fn compute(elevation: f64, is_daylight: bool) -> Spectrum {
    if !is_daylight || elevation <= 0.0 {
        return Spectrum::dark();
    }

    let base = base_brightness(elevation);

    let white = if elevation > 10.0 {
        base.max(1.0)
    } else {
        base * 0.6
    };

    let red = if elevation < 20.0 {
        (base * (1.0 - elevation / 20.0) * 1.5).min(10.0)
    } else if base > 2.0 {
        // Mid-day residual warmth once the warm-bias band has ended.
        (base * 0.15).max(1.0)
    } else {
        0.0
    };

    let green = if base > 1.0 {
        white * 0.6 + red * 0.2 + base * 0.3
    } else {
        0.0
    };

    let blue = if elevation > 20.0 {
        (base * 0.8).min(8.0)
    } else if elevation > 5.0 {
        (base * 0.6).min(6.0)
    } else if base > 0.0 {
        // Ambient floor through the low-sun fringe of the day.
        (base * 0.3).max(1.0)
    } else {
        0.0
    };

    Spectrum {
        white,
        red,
        green,
        blue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_brightness_brackets() {
        assert_eq!(base_brightness(-10.0), 0.0);
        assert_eq!(base_brightness(0.0), 0.0);
        assert!((base_brightness(2.5) - 1.0).abs() < 1e-9);
        assert!((base_brightness(5.0) - 2.0).abs() < 1e-9);
        assert!((base_brightness(20.0) - 5.0).abs() < 1e-9);
        assert!((base_brightness(40.0) - 7.985).abs() < 0.001);
        assert!((base_brightness(60.0) - 10.0).abs() < 1e-9);
        assert_eq!(base_brightness(90.0), 10.0);
        assert_eq!(base_brightness(200.0), 10.0);
    }

    #[test]
    fn base_brightness_is_monotonic() {
        let mut prev = 0.0;
        for step in 0..900 {
            let b = base_brightness(step as f64 / 10.0);
            assert!(b >= prev - 1e-9, "elevation {}: {} < {}", step, b, prev);
            prev = b;
        }
    }

    #[test]
    fn night_is_dark_regardless_of_elevation() {
        for elevation in [-10.0, 0.0, 5.0, 45.0, 90.0, 200.0] {
            assert_eq!(compute(elevation, false).quantize(), Levels::zero());
        }
    }

    #[test]
    fn compute_is_deterministic() {
        let a = compute(33.3, true);
        let b = compute(33.3, true);
        assert_eq!(a, b);
    }

    #[test]
    fn all_channels_stay_in_range() {
        for elevation in [-10.0, 0.0, 0.1, 5.0, 10.0, 20.0, 45.0, 60.0, 90.0, 200.0] {
            let levels = compute(elevation, true).quantize();
            for ch in crate::state::Channel::ORDER {
                assert!(levels.get(ch) <= LEVEL_MAX, "elevation {}", elevation);
            }
        }
    }

    #[test]
    fn sunrise_is_warm() {
        // Elevation 5: base 2. Red leads, blue sits at its ambient floor.
        let levels = compute(5.0, true).quantize();
        assert_eq!(levels, Levels::new(1, 2, 1, 1));
        assert!(levels.red >= levels.white);
        assert!(levels.red >= levels.blue);
        assert!(levels.blue <= 2);
        assert!(levels.green >= levels.white && levels.green <= levels.red);
    }

    #[test]
    fn midday_is_cool_and_bright() {
        // Elevation 70: base 10. White saturates, red is residual only.
        let levels = compute(70.0, true).quantize();
        assert_eq!(levels.white, 10);
        assert!(levels.red <= 1);
        assert_eq!(levels.blue, 8);
        assert_eq!(levels.green, 9);
    }

    #[test]
    fn red_fades_as_sun_climbs() {
        let dawn = compute(8.0, true);
        let mid = compute(15.0, true);
        let noon = compute(70.0, true);
        assert!(dawn.red > mid.red);
        assert!(mid.red > noon.red - 1e-9);
        assert!(noon.blue > dawn.blue);
    }

    #[test]
    fn green_derives_from_white_and_red() {
        let s = compute(30.0, true);
        let expected = s.white * 0.6 + s.red * 0.2 + base_brightness(30.0) * 0.3;
        assert!((s.green - expected).abs() < 1e-9);
    }

    #[test]
    fn quantize_truncates_and_clamps() {
        let s = Spectrum {
            white: 9.9,
            red: -3.0,
            green: 14.2,
            blue: 1.5,
        };
        assert_eq!(s.quantize(), Levels::new(9, 0, 10, 1));
    }
}
