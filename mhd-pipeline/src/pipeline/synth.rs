//! Synthetic vitals frame for the generic pipeline
//!
//! `age ~ U{18..79}`, `bp ~ N(120, 15)`, `hr ~ N(72, 10)`,
//! `target = age > 50 && bp > 130`.

use rand::{rngs::SmallRng, Rng, SeedableRng};

use crate::error::PipelineResult;
use crate::frame::{Cell, Frame};

/// Normal draw via Box-Muller
fn normal(rng: &mut SmallRng, mean: f64, std_dev: f64) -> f64 {
    // (0, 1] keeps ln finite
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    mean + std_dev * (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

pub fn synthetic_frame(rows: usize, seed: u64) -> PipelineResult<Frame> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut age = Vec::with_capacity(rows);
    let mut bp = Vec::with_capacity(rows);
    let mut hr = Vec::with_capacity(rows);
    let mut target = Vec::with_capacity(rows);

    for _ in 0..rows {
        let a = rng.gen_range(18..80) as f64;
        let b = normal(&mut rng, 120.0, 15.0);
        let h = normal(&mut rng, 72.0, 10.0);
        age.push(Cell::Num(a));
        bp.push(Cell::Num(b));
        hr.push(Cell::Num(h));
        target.push(Cell::Num(if a > 50.0 && b > 130.0 { 1.0 } else { 0.0 }));
    }

    Frame::from_columns(vec![
        ("age".to_string(), age),
        ("bp".to_string(), bp),
        ("hr".to_string(), hr),
        ("target".to_string(), target),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_ranges_and_target_rule() {
        let frame = synthetic_frame(500, 42).unwrap();
        assert_eq!(frame.n_rows(), 500);

        let age = frame.numeric_column("age").unwrap();
        let bp = frame.numeric_column("bp").unwrap();
        let target = frame.numeric_column("target").unwrap();
        assert!(age.iter().all(|a| (18.0..80.0).contains(a) && a.fract() == 0.0));
        for i in 0..500 {
            let expected = age[i] > 50.0 && bp[i] > 130.0;
            assert_eq!(target[i] == 1.0, expected);
        }
        let positives = target.iter().filter(|&&t| t == 1.0).count();
        assert!(positives > 10 && positives < 150, "positives = {}", positives);

        let mean_bp = bp.iter().sum::<f64>() / 500.0;
        assert!((mean_bp - 120.0).abs() < 3.0);
    }

    #[test]
    fn test_same_seed_same_frame() {
        assert_eq!(synthetic_frame(20, 7).unwrap(), synthetic_frame(20, 7).unwrap());
    }
}
