//! Kinematic solver
//!
//! Closed-form root finding for `position + velocity*t + 0.5*acceleration*t^2 = x`
//! and the boundary-crossing delays derived from it.

use crate::vector::Vector;

/// Which end of the interval a vector runs into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bound {
    Start,
    End,
}

/// The next time a vector leaves its interval.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Crossing {
    /// Seconds after the vector's timestamp.
    pub delay: f64,
    pub bound: Bound,
    /// Position of the crossed bound.
    pub position: f64,
}

/// Real solutions of the motion equation for `x`, in ascending order.
pub fn real_roots(position: f64, velocity: f64, acceleration: f64, x: f64) -> Vec<f64> {
    // Stationary: either always at x or never.
    if acceleration == 0.0 && velocity == 0.0 {
        return if position == x { vec![0.0] } else { Vec::new() };
    }

    if acceleration == 0.0 {
        return vec![(x - position) / velocity];
    }

    // pq-formula with p/2 = velocity / acceleration
    let half_p = velocity / acceleration;
    let root = (half_p.powi(2) - (2.0 / acceleration) * (position - x)).sqrt();

    let mut roots: Vec<f64> = [root - half_p, -(root + half_p)]
        .into_iter()
        .filter(|r| !r.is_nan())
        .collect();
    roots.sort_by(f64::total_cmp);
    roots
}

/// Smallest strictly positive time at which `vector` reaches `x`.
pub fn earliest_positive_root(vector: &Vector, x: f64) -> Option<f64> {
    let roots = real_roots(vector.position, vector.velocity, vector.acceleration, x);

    match roots.as_slice() {
        [r] if *r > 0.0 => Some(*r),
        [_, hi] if *hi <= 0.0 => None,
        [lo, _] if *lo > 0.0 => Some(*lo),
        [_, hi] => Some(*hi),
        _ => None,
    }
}

/// Delay until `vector` first reaches `start` or `end`, if ever.
pub fn earliest_boundary_crossing_delta(vector: &Vector, start: f64, end: f64) -> Option<f64> {
    next_crossing(vector, start, end).map(|c| c.delay)
}

/// Delay to arm a boundary timer with. Infinite delays mean no timer.
pub fn timeout_delay(vector: &Vector, start: f64, end: f64) -> Option<f64> {
    next_boundary_crossing(vector, start, end).map(|c| c.delay)
}

/// Like [`timeout_delay`] but also reports which bound is hit.
pub fn next_boundary_crossing(vector: &Vector, start: f64, end: f64) -> Option<Crossing> {
    next_crossing(vector, start, end).filter(|c| c.delay != f64::INFINITY)
}

fn next_crossing(vector: &Vector, start: f64, end: f64) -> Option<Crossing> {
    let to_start = earliest_positive_root(vector, start).map(|delay| Crossing {
        delay,
        bound: Bound::Start,
        position: start,
    });
    let to_end = earliest_positive_root(vector, end).map(|delay| Crossing {
        delay,
        bound: Bound::End,
        position: end,
    });

    match (to_start, to_end) {
        (Some(s), Some(e)) => Some(if s.delay < e.delay { s } else { e }),
        (s, e) => s.or(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(acceleration: f64, position: f64, velocity: f64) -> Vector {
        Vector::new(acceleration, position, velocity, 10.0)
    }

    #[test]
    fn test_roots_stationary() {
        assert_eq!(real_roots(2.0, 0.0, 0.0, 2.0), vec![0.0]);
        assert!(real_roots(2.0, 0.0, 0.0, 3.0).is_empty());
    }

    #[test]
    fn test_roots_linear() {
        assert_eq!(real_roots(20.0, -1.0, 0.0, 5.0), vec![15.0]);
        assert_eq!(real_roots(20.0, 1.0, 0.0, 5.0), vec![-15.0]);
    }

    #[test]
    fn test_roots_quadratic_sorted() {
        // 20 + t - 0.2t^2 = 10  =>  t = -5, t = 10
        assert_eq!(real_roots(20.0, 1.0, -0.4, 10.0), vec![-5.0, 10.0]);
    }

    #[test]
    fn test_roots_quadratic_no_real_solution() {
        assert!(real_roots(20.0, 1.0, -0.4, 25.0).is_empty());
    }

    #[test]
    fn test_earliest_positive_root_single() {
        assert_eq!(earliest_positive_root(&vector(0.0, 20.0, -1.0), 5.0), Some(15.0));
        assert_eq!(earliest_positive_root(&vector(0.0, 20.0, 1.0), 5.0), None);
    }

    #[test]
    fn test_earliest_positive_root_two() {
        assert_eq!(earliest_positive_root(&vector(-0.4, 20.0, 1.0), 10.0), Some(10.0));
        // Never reaches 10.
        assert_eq!(earliest_positive_root(&vector(0.4, 20.0, 1.0), 10.0), None);
    }

    #[test]
    fn test_stationary_never_crosses() {
        assert_eq!(timeout_delay(&vector(0.0, 5.0, 0.0), 0.0, 10.0), None);
        // A root at zero is not positive.
        assert_eq!(timeout_delay(&vector(0.0, 10.0, 0.0), 0.0, 10.0), None);
    }

    #[test]
    fn test_timeout_delay_without_acceleration() {
        assert_eq!(timeout_delay(&vector(0.0, 20.0, 1.0), 5.0, 25.0), Some(5.0));
        assert_eq!(timeout_delay(&vector(0.0, 20.0, 1.0), 20.0, 40.0), Some(20.0));
        assert_eq!(timeout_delay(&vector(0.0, 20.0, -1.0), 5.0, 25.0), Some(15.0));
        assert_eq!(timeout_delay(&vector(0.0, 20.0, -1.0), 15.0, 35.0), Some(5.0));
    }

    #[test]
    fn test_timeout_delay_positive_acceleration() {
        assert_eq!(timeout_delay(&vector(0.4, 20.0, 1.0), 5.0, 30.0), Some(5.0));
        assert_eq!(timeout_delay(&vector(0.4, 20.0, 1.0), 20.0, 50.0), Some(10.0));
        assert_eq!(timeout_delay(&vector(0.8, 20.0, -1.0), 5.0, 25.0), Some(5.0));
        assert_eq!(timeout_delay(&vector(0.8, 20.0, -1.0), 15.0, 35.0), Some(7.5));
    }

    #[test]
    fn test_timeout_delay_negative_acceleration() {
        assert_eq!(timeout_delay(&vector(-0.4, 20.0, 1.0), 10.0, 25.0), Some(10.0));
        assert_eq!(timeout_delay(&vector(-0.4, 20.0, 1.0), 20.0, 40.0), Some(5.0));
        assert_eq!(timeout_delay(&vector(-0.8, 20.0, -1.0), 5.0, 25.0), Some(5.0));
        assert_eq!(timeout_delay(&vector(-0.8, 20.0, -1.0), 15.0, 35.0), Some(2.5));
    }

    #[test]
    fn test_infinite_bounds_have_no_timeout() {
        let v = vector(0.0, 0.0, 1.0);
        assert_eq!(timeout_delay(&v, f64::NEG_INFINITY, f64::INFINITY), None);
    }

    #[test]
    fn test_next_boundary_crossing_reports_bound() {
        let c = next_boundary_crossing(&vector(0.0, 2.0, 1.5), 1.0, 3.0).unwrap();
        assert_eq!(c.bound, Bound::End);
        assert_eq!(c.position, 3.0);

        let c = next_boundary_crossing(&vector(0.0, 2.0, -2.0), 1.0, 3.0).unwrap();
        assert_eq!(c.bound, Bound::Start);
        assert_eq!(c.delay, 0.5);
    }

    #[test]
    fn test_earliest_boundary_crossing_delta_prefers_nearer_bound() {
        // Decelerating: reaches 24 before turning back toward 10.
        let v = vector(-0.4, 20.0, 2.0);
        let d = earliest_boundary_crossing_delta(&v, 10.0, 24.0).unwrap();
        let at = v.project(d).position;
        assert!((at - 24.0).abs() < 1e-9);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_roots_satisfy_equation(
                p in -50.0f64..50.0,
                v in -10.0f64..10.0,
                magnitude in 0.1f64..5.0,
                negative in any::<bool>(),
                x in -50.0f64..50.0
            ) {
                let a = if negative { -magnitude } else { magnitude };
                for t in real_roots(p, v, a, x) {
                    let at = p + v * t + 0.5 * a * t * t;
                    let scale = 1.0 + p.abs() + x.abs() + (v * t).abs() + (a * t * t).abs();
                    prop_assert!((at - x).abs() <= 1e-6 * scale);
                }
            }

            #[test]
            fn prop_crossing_delay_is_positive(
                p in -9.0f64..9.0,
                v in -10.0f64..10.0,
                a in -5.0f64..5.0
            ) {
                if let Some(d) = timeout_delay(&Vector::new(a, p, v, 0.0), -10.0, 10.0) {
                    prop_assert!(d > 0.0);
                    prop_assert!(d.is_finite());
                }
            }
        }
    }
}
