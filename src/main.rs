use std::io;
use std::time::Instant;

use chromresolve::calibrate::AutoResolver;
use chromresolve::resolver::{CancelToken, PeakResolver};
use chromresolve::test_data::bump_trace;
use chromresolve::trace::Trace;

fn main() -> io::Result<()> {
    let training: Vec<_> = [1.0, 0.9, 1.1]
        .iter()
        .map(|&scale| {
            bump_trace(
                121,
                &[
                    (25.0, 3.0, 100.0 * scale),
                    (60.0, 4.0, 150.0 * scale),
                    (95.0, 3.5, 80.0 * scale),
                ],
                1.0,
            )
        })
        .collect();
    let traces: Vec<Trace> = training.iter().map(|(x, y)| Trace::wrap(x, y)).collect();

    let resolver = PeakResolver::default();
    match resolver.resolve(&traces[0]) {
        Ok(peaks) => {
            println!("Found {} peaks with default parameters", peaks.len());
            for peak in peaks.iter() {
                println!("\t{}", peak);
            }
        }
        Err(err) => println!("Encountered error {:?}", err),
    };

    let mut auto = AutoResolver::default();
    let token = CancelToken::new();
    let start = Instant::now();
    match auto.calibrate(&traces, &token) {
        Ok(calibrated) => {
            println!(
                "Calibration took milliseconds {}",
                (Instant::now() - start).as_millis()
            );
            println!(
                "Calibrated to {:?} with score {:.3}",
                calibrated.params(),
                calibrated.score()
            );
        }
        Err(err) => println!("Encountered error {:?}", err),
    };

    let (hx, hy) = bump_trace(
        121,
        &[(25.0, 3.0, 95.0), (60.0, 4.0, 160.0), (95.0, 3.5, 85.0)],
        1.0,
    );
    let held_out = Trace::wrap(&hx, &hy);
    match auto.resolve(&held_out) {
        Ok(peaks) => {
            println!("Found {} peaks on the held-out trace", peaks.len());
            for peak in peaks.iter() {
                println!("\t{}", peak);
            }
        }
        Err(err) => println!("Encountered error {:?}", err),
    };
    Ok(())
}
