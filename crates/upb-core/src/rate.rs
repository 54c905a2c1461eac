// ── Fade rates ──
//
// Devices take a 4-bit rate code, not seconds. Each code maps to a fixed
// transition time; callers think in seconds.

/// Seconds for each rate code, indexed by code.
pub const RATE_TABLE: [f64; 16] = [
    0.0, 0.8, 1.6, 3.3, 5.0, 6.6, 10.0, 20.0, 30.0, 60.0, 120.0, 300.0, 600.0, 900.0, 1800.0,
    3600.0,
];

/// Slowest blink the network accepts without the `unlimited_blink_rate` flag.
pub const MINIMUM_BLINK_RATE: u8 = 20;

/// Nearest rate code for `seconds`. Ties go to the lower code.
pub fn seconds_to_rate(seconds: f64) -> u8 {
    let mut best = 0u8;
    let mut best_diff = f64::INFINITY;
    for (code, secs) in (0u8..).zip(RATE_TABLE) {
        let diff = (secs - seconds).abs();
        if diff < best_diff {
            best = code;
            best_diff = diff;
        }
    }
    best
}

/// Transition time of a rate code; `None` if out of range.
pub fn rate_to_seconds(code: u8) -> Option<f64> {
    RATE_TABLE.get(usize::from(code)).copied()
}

/// Clamp a level to 0–100 and turn an optional rate into what goes on the
/// wire. With `raw` the rate is passed through as a code; otherwise it is
/// seconds and gets converted. `None` means the device's default rate.
pub fn check_dim_params(brightness: u8, rate: Option<f64>, raw: bool) -> (u8, Option<u8>) {
    let brightness = brightness.min(100);
    let rate = rate.filter(|r| *r >= 0.0).map(|r| {
        if raw {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::as_conversions)]
            let code = r.min(255.0) as u8;
            code
        } else {
            seconds_to_rate(r)
        }
    });
    (brightness, rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_rate_code() {
        for (seconds, code) in [
            (0.0, 0),
            (0.1, 0),
            (0.7, 1),
            (1.0, 1),
            (1.21, 2),
            (30.0, 8),
            (45.0, 8),
            (45.1, 9),
            (10_000.0, 15),
        ] {
            assert_eq!(seconds_to_rate(seconds), code, "{seconds}s");
        }
    }

    #[test]
    fn codes_map_back_to_seconds() {
        assert_eq!(rate_to_seconds(7), Some(20.0));
        assert_eq!(rate_to_seconds(16), None);
    }

    #[test]
    fn dim_params_clamp_and_convert() {
        assert_eq!(check_dim_params(150, None, false), (100, None));
        assert_eq!(check_dim_params(40, Some(45.1), false), (40, Some(9)));
        assert_eq!(check_dim_params(40, Some(12.0), true), (40, Some(12)));
        assert_eq!(check_dim_params(40, Some(-1.0), false), (40, None));
    }
}
