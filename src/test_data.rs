//! Synthetic trace generators used by the tests and the demo binary

pub fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    let d = x - mu;
    amplitude * (-d * d / (2.0 * sigma * sigma)).exp()
}

/// Build an evenly sampled trace of `(mu, sigma, amplitude)` bumps, zeroing
/// every sample below `floor` so the bumps are separated by true zeros.
pub fn bump_trace(n: usize, peaks: &[(f64, f64, f64)], floor: f64) -> (Vec<f64>, Vec<f64>) {
    let x: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let y: Vec<f64> = x
        .iter()
        .map(|&xi| {
            let v: f64 = peaks
                .iter()
                .map(|&(mu, sigma, amplitude)| gaussian(xi, mu, sigma, amplitude))
                .sum();
            if v < floor {
                0.0
            } else {
                v
            }
        })
        .collect();
    (x, y)
}
