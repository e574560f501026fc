//! Open-circuit voltage calibration curve
//!
//! LiFePO4 has a long flat plateau, so voltage says little about charge
//! except around the inflection near 57%. The table below maps the absolute
//! per-cell deviation from that inflection to an amp-second offset. Steps are
//! fine close to the inflection and coarser further out, where the slope
//! steepens. Outside [`VALID_INFLECTION_MV`] the curve is not trusted and no
//! lookup is made.

use crate::config::{CAPACITY_MILLI_AMP_SECONDS, CELLS_IN_SERIES};

/// Rested cell voltage at the inflection.
pub const INFLECTION_CELL_MV: i32 = 3299;

/// Charge at the inflection, 57% of 280Ah.
pub const INFLECTION_AMP_SECONDS: u32 = 57 * 36 * 280;

/// Half-width of the trusted band, per cell.
///
/// The voltage-mode hysteresis of the output state machine uses the same
/// width so the controller settles where the curve can be trusted.
pub const VALID_INFLECTION_MV: i16 = 15;

/// (deviation mV per cell, amp-seconds from inflection)
///
/// 1008 As/mV across the centre, falling off toward the edges.
const CURVE: [(u16, u32); 9] = [
    (0, 0),
    (1, 1008),
    (2, 2016),
    (3, 3024),
    (4, 4032),
    (6, 5880),
    (8, 7560),
    (11, 9828),
    (15, 12_516),
];

/// Amp-seconds offset for an absolute deviation, interpolated between table
/// points. `None` past the end of the table.
fn amp_seconds_for_deviation(deviation_mv: u16) -> Option<u32> {
    for pair in CURVE.windows(2) {
        let (lo_mv, lo_as) = pair[0];
        let (hi_mv, hi_as) = pair[1];
        if deviation_mv <= hi_mv {
            let span_mv = (hi_mv - lo_mv) as u32;
            let into_mv = (deviation_mv - lo_mv) as u32;
            return Some(lo_as + (hi_as - lo_as) * into_mv / span_mv);
        }
    }
    None
}

/// Charge implied by a rested battery voltage, or `None` when the voltage is
/// outside the trusted band.
pub fn implied_milli_amp_seconds(battery_mv: i16) -> Option<u32> {
    let cell_mv = battery_mv as i32 / CELLS_IN_SERIES;
    let deviation = cell_mv - INFLECTION_CELL_MV;
    if deviation.unsigned_abs() > VALID_INFLECTION_MV as u32 {
        return None;
    }

    let offset_as = amp_seconds_for_deviation(deviation.unsigned_abs() as u16)?;
    let amp_seconds = if deviation >= 0 {
        INFLECTION_AMP_SECONDS + offset_as
    } else {
        INFLECTION_AMP_SECONDS - offset_as
    };
    Some((amp_seconds * 1000).min(CAPACITY_MILLI_AMP_SECONDS))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn battery_mv(cell_mv: i32) -> i16 {
        (cell_mv * CELLS_IN_SERIES) as i16
    }

    #[test]
    fn inflection_maps_to_57_percent() {
        assert_eq!(implied_milli_amp_seconds(battery_mv(3299)), Some(574_560_000));
        assert_eq!(
            implied_milli_amp_seconds(battery_mv(3299)).map(|mas| mas / (CAPACITY_MILLI_AMP_SECONDS / 100)),
            Some(57)
        );
    }

    #[test]
    fn table_points_are_exact() {
        assert_eq!(implied_milli_amp_seconds(battery_mv(3303)), Some((574_560 + 4032) * 1000));
        assert_eq!(implied_milli_amp_seconds(battery_mv(3295)), Some((574_560 - 4032) * 1000));
        assert_eq!(implied_milli_amp_seconds(battery_mv(3314)), Some((574_560 + 12_516) * 1000));
    }

    #[test]
    fn wide_steps_are_interpolated() {
        // halfway between 4 mV (4032) and 6 mV (5880)
        assert_eq!(implied_milli_amp_seconds(battery_mv(3304)), Some((574_560 + 4956) * 1000));
        // one third of the way from 8 mV (7560) to 11 mV (9828)
        assert_eq!(implied_milli_amp_seconds(battery_mv(3290)), Some((574_560 - 8316) * 1000));
    }

    #[test]
    fn voltage_outside_the_band_is_rejected() {
        assert_eq!(implied_milli_amp_seconds(battery_mv(3315)), None);
        assert_eq!(implied_milli_amp_seconds(battery_mv(3283)), None);
        assert_eq!(implied_milli_amp_seconds(14_000), None);
        assert_eq!(implied_milli_amp_seconds(0), None);
    }

    #[test]
    fn curve_is_monotonic() {
        let mut last = 0;
        for mv in (3299 - 15)..=(3299 + 15) {
            let mas = implied_milli_amp_seconds(battery_mv(mv)).unwrap();
            assert!(mas > last);
            last = mas;
        }
    }
}
