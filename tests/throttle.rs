use wps::connection::generate_active_pattern;
use wps::parameters::PATTERN_THROTTLE_GRANULARITY;

fn pattern_for(ratio: u8) -> (Vec<bool>, u8) {
    let mut pattern = [false; PATTERN_THROTTLE_GRANULARITY];
    let total = generate_active_pattern(&mut pattern, ratio);
    (pattern[..total as usize].to_vec(), total)
}

#[test]
fn ratio_zero_never_transmits() {
    let (pattern, total) = pattern_for(0);
    assert_eq!(total, 1);
    assert_eq!(pattern, vec![false]);
}

#[test]
fn ratio_one_hundred_always_transmits() {
    let (pattern, total) = pattern_for(100);
    assert_eq!(total, 1);
    assert_eq!(pattern, vec![true]);
}

#[test]
fn ratio_thirty_spreads_three_ones_over_ten() {
    let (pattern, total) = pattern_for(30);
    assert_eq!(total, 10);

    let active: Vec<usize> =
        pattern.iter().enumerate().filter(|(_, &b)| b).map(|(i, _)| i).collect();
    assert_eq!(active, vec![0, 3, 6]);
}

#[test]
fn ratio_fifty_alternates() {
    let (pattern, total) = pattern_for(50);
    assert_eq!(total, 2);
    assert_eq!(pattern, vec![true, false]);
}

#[test]
fn every_ratio_reduces_to_lowest_terms() {
    fn gcd(a: u8, b: u8) -> u8 {
        if b == 0 { a } else { gcd(b, a % b) }
    }

    for ratio in 0..=100u8 {
        let (pattern, total) = pattern_for(ratio);
        let g = gcd(ratio, 100).max(1);
        assert_eq!(total as u16, 100 / g as u16, "ratio {ratio}");
        let ones = pattern.iter().filter(|&&b| b).count();
        assert_eq!(ones as u16, (ratio / g) as u16, "ratio {ratio}");
    }
}

#[test]
fn active_count_over_any_window_is_exact() {
    // Over any window of `total` consecutive slots the number of active
    // slots equals the reduced numerator, independent of phase.
    let (pattern, total) = pattern_for(30);
    let total = total as usize;
    let ones: usize = pattern.iter().filter(|&&b| b).count();

    for phase in 0..total {
        let count = (0..total).filter(|i| pattern[(phase + i) % total]).count();
        assert_eq!(count, ones);
    }
}
