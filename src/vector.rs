//! Timing state vectors
//!
//! A vector is an immutable snapshot of position, velocity and acceleration
//! taken at a timestamp (seconds). Projection is closed-form, so moving a
//! vector forward never accumulates integration error.

use serde::{Deserialize, Serialize};

/// Snapshot of the kinematic state at `timestamp`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vector {
    pub acceleration: f64,
    pub position: f64,
    pub velocity: f64,
    pub timestamp: f64,
}

impl Vector {
    pub const fn new(acceleration: f64, position: f64, velocity: f64, timestamp: f64) -> Self {
        Self {
            acceleration,
            position,
            velocity,
            timestamp,
        }
    }

    /// A vector at rest at `position`.
    pub const fn stationary(position: f64, timestamp: f64) -> Self {
        Self::new(0.0, position, 0.0, timestamp)
    }

    /// Project the vector `delta` seconds forward (or backward for negative deltas).
    pub fn project(&self, delta: f64) -> Self {
        let Self {
            acceleration,
            position,
            velocity,
            timestamp,
        } = *self;

        Self {
            acceleration,
            position: position + velocity * delta + 0.5 * acceleration * delta.powi(2),
            velocity: velocity + acceleration * delta,
            timestamp: timestamp + delta,
        }
    }

    /// Whether the vector is at rest.
    pub fn is_stationary(&self) -> bool {
        self.velocity == 0.0 && self.acceleration == 0.0
    }

    /// Overlay the set fields of `update`, keeping the timestamp.
    pub fn with_update(&self, update: &VectorUpdate) -> Self {
        Self {
            acceleration: update.acceleration.unwrap_or(self.acceleration),
            position: update.position.unwrap_or(self.position),
            velocity: update.velocity.unwrap_or(self.velocity),
            timestamp: self.timestamp,
        }
    }

    /// Whether the vector may be adopted inside `[start, end]`.
    ///
    /// Positions outside the interval are never admissible. A vector sitting
    /// exactly on a bound is admissible only while it is at rest or heading
    /// back inside.
    pub fn is_admissible(&self, start: f64, end: f64) -> bool {
        let Self {
            acceleration,
            position,
            velocity,
            ..
        } = *self;

        if position.is_nan() || velocity.is_nan() || acceleration.is_nan() {
            return false;
        }
        if position < start || position > end {
            return false;
        }
        if position == start && (velocity < 0.0 || (velocity == 0.0 && acceleration < 0.0)) {
            return false;
        }
        if position == end && (velocity > 0.0 || (velocity == 0.0 && acceleration > 0.0)) {
            return false;
        }
        true
    }
}

/// Partial vector used by `update()`. `None` leaves a field unchanged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceleration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<f64>,
}

impl VectorUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acceleration(mut self, acceleration: f64) -> Self {
        self.acceleration = Some(acceleration);
        self
    }

    pub fn position(mut self, position: f64) -> Self {
        self.position = Some(position);
        self
    }

    pub fn velocity(mut self, velocity: f64) -> Self {
        self.velocity = Some(velocity);
        self
    }

    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self.acceleration.is_none() && self.position.is_none() && self.velocity.is_none()
    }

    /// Vector built from the set fields on top of a zero-motion origin.
    pub fn to_vector(&self, timestamp: f64) -> Vector {
        Vector::stationary(0.0, timestamp).with_update(self)
    }
}

impl From<Vector> for VectorUpdate {
    fn from(v: Vector) -> Self {
        Self {
            acceleration: Some(v.acceleration),
            position: Some(v.position),
            velocity: Some(v.velocity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_without_movement() {
        let v = Vector::new(0.0, 4.0, 0.0, 10.0);
        let p = v.project(2.5);
        assert_eq!(p, Vector::new(0.0, 4.0, 0.0, 12.5));
    }

    #[test]
    fn test_project_constant_velocity() {
        let v = Vector::new(0.0, 1.0, 2.0, 0.0);
        let p = v.project(3.0);
        assert_eq!(p.position, 7.0);
        assert_eq!(p.velocity, 2.0);
        assert_eq!(p.timestamp, 3.0);
    }

    #[test]
    fn test_project_accelerated() {
        let v = Vector::new(2.0, 0.0, 1.0, 0.0);
        let p = v.project(2.0);
        // 0 + 1*2 + 0.5*2*4
        assert_eq!(p.position, 6.0);
        assert_eq!(p.velocity, 5.0);
        assert_eq!(p.acceleration, 2.0);
    }

    #[test]
    fn test_with_update_keeps_unset_fields() {
        let v = Vector::new(1.0, 2.0, 3.0, 4.0);
        let merged = v.with_update(&VectorUpdate::new().velocity(-1.0));
        assert_eq!(merged, Vector::new(1.0, 2.0, -1.0, 4.0));
    }

    #[test]
    fn test_update_is_empty() {
        assert!(VectorUpdate::new().is_empty());
        assert!(!VectorUpdate::new().position(0.0).is_empty());
    }

    #[test]
    fn test_admissible_inside() {
        assert!(Vector::new(-5.0, 2.0, 3.0, 0.0).is_admissible(1.0, 3.0));
    }

    #[test]
    fn test_admissible_outside() {
        assert!(!Vector::stationary(0.5, 0.0).is_admissible(1.0, 3.0));
        assert!(!Vector::stationary(3.5, 0.0).is_admissible(1.0, 3.0));
    }

    #[test]
    fn test_admissible_at_start() {
        assert!(!Vector::new(0.0, 1.0, -1.0, 0.0).is_admissible(1.0, 3.0));
        assert!(!Vector::new(-1.0, 1.0, 0.0, 0.0).is_admissible(1.0, 3.0));
        assert!(Vector::new(0.0, 1.0, 1.0, 0.0).is_admissible(1.0, 3.0));
        assert!(Vector::new(1.0, 1.0, 0.0, 0.0).is_admissible(1.0, 3.0));
        assert!(Vector::stationary(1.0, 0.0).is_admissible(1.0, 3.0));
    }

    #[test]
    fn test_admissible_at_end() {
        assert!(!Vector::new(0.0, 3.0, 1.0, 0.0).is_admissible(1.0, 3.0));
        assert!(!Vector::new(1.0, 3.0, 0.0, 0.0).is_admissible(1.0, 3.0));
        assert!(Vector::new(0.0, 3.0, -1.0, 0.0).is_admissible(1.0, 3.0));
        assert!(Vector::stationary(3.0, 0.0).is_admissible(1.0, 3.0));
    }

    #[test]
    fn test_nan_is_not_admissible() {
        assert!(!Vector::stationary(f64::NAN, 0.0).is_admissible(f64::NEG_INFINITY, f64::INFINITY));
    }

    #[test]
    fn test_update_serde_skips_unset() {
        let json = serde_json::to_string(&VectorUpdate::new().position(2.0)).unwrap();
        assert_eq!(json, r#"{"position":2.0}"#);
        let back: VectorUpdate = serde_json::from_str(r#"{"velocity":1.5}"#).unwrap();
        assert_eq!(back, VectorUpdate::new().velocity(1.5));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_projection_composes(
                a in -10.0f64..10.0,
                p in -100.0f64..100.0,
                v in -10.0f64..10.0,
                d1 in 0.0f64..10.0,
                d2 in 0.0f64..10.0
            ) {
                let v0 = Vector::new(a, p, v, 0.0);
                let once = v0.project(d1 + d2);
                let twice = v0.project(d1).project(d2);
                let tol = 1e-6 * (1.0 + once.position.abs());
                prop_assert!((once.position - twice.position).abs() <= tol);
                prop_assert!((once.velocity - twice.velocity).abs() <= 1e-9 * (1.0 + once.velocity.abs()));
            }

            #[test]
            fn prop_zero_delta_is_identity(
                a in -10.0f64..10.0,
                p in -100.0f64..100.0,
                v in -10.0f64..10.0,
                t in 0.0f64..1000.0
            ) {
                let v0 = Vector::new(a, p, v, t);
                prop_assert_eq!(v0.project(0.0), v0);
            }
        }
    }
}
