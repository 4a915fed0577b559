// Decay curves shared by the post-processing stage and the hybrid voting merge

/// Linear decay: `1 - min(x, root) / root`, reaching zero at `root`
pub fn linear_decay(x: f64, root: f64) -> f64 {
    if root <= 0.0 {
        return 0.0;
    }
    1.0 - x.min(root) / root
}

/// Rational decay: `1 / (x + 1)`
pub fn rational_decay(x: f64) -> f64 {
    1.0 / (x + 1.0)
}

/// Exponential decay: `2^(-x / half_life)`
pub fn exponential_decay(x: f64, half_life: f64) -> f64 {
    (-x / half_life).exp2()
}

/// Step function: `high` below `threshold`, `low` from it onwards
pub fn step_decay(x: f64, high: f64, low: f64, threshold: f64) -> f64 {
    if x < threshold {
        high
    } else {
        low
    }
}

/// Greatest common divisor (Euclid)
pub fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}
