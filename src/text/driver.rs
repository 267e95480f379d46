// Drivers: scalar values animated over a repeating time window

use std::f32::consts::TAU;

/// Shape of a driver's value over one period, `t` in `0.0..1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriverKind {
    Constant(f32),
    /// Ramps from `start` to `end`, then jumps back.
    Linear { start: f32, end: f32 },
    /// One full sine cycle between `min` and `max`.
    Sinwave { min: f32, max: f32 },
    /// Rises to `peak` until `start`, holds until `end`, then falls to zero.
    Fade { start: f32, end: f32, peak: f32 },
}

impl DriverKind {
    fn calculate(&self, t: f32) -> f32 {
        match *self {
            DriverKind::Constant(value) => value,
            DriverKind::Linear { start, end } => start + t * (end - start),
            DriverKind::Sinwave { min, max } => {
                let wave = 0.5 + (TAU * t).sin() * 0.5;
                min + wave * (max - min)
            }
            DriverKind::Fade { start, end, peak } => {
                if t < start {
                    t / start * peak
                } else if t > end {
                    (1.0 - (t - end) / (1.0 - end)) * peak
                } else {
                    peak
                }
            }
        }
    }
}

/// A `DriverKind` plus its position in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Driver {
    kind: DriverKind,
    length: f32,
    elapsed: f32,
}

impl Driver {
    /// `length` is the period in seconds; non-positive lengths freeze the driver at `t = 0`.
    pub fn new(kind: DriverKind, length: f32) -> Self {
        Self {
            kind,
            length,
            elapsed: 0.0,
        }
    }

    pub fn constant(value: f32) -> Self {
        Self::new(DriverKind::Constant(value), 1.0)
    }

    /// Advance by `delta` seconds and return the new value.
    pub fn update(&mut self, delta: f32) -> f32 {
        if self.length > 0.0 {
            self.elapsed = (self.elapsed + delta) % self.length;
        }
        self.value()
    }

    pub fn value(&self) -> f32 {
        let t = if self.length > 0.0 { self.elapsed / self.length } else { 0.0 };
        self.kind.calculate(t)
    }

    pub fn kind(&self) -> DriverKind {
        self.kind
    }

    pub fn length(&self) -> f32 {
        self.length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn test_constant_ignores_time() {
        let mut driver = Driver::constant(3.0);
        assert_eq!(driver.update(0.7), 3.0);
        assert_eq!(driver.update(12.0), 3.0);
    }

    #[test]
    fn test_linear_ramps_and_wraps() {
        let mut driver = Driver::new(DriverKind::Linear { start: 0.0, end: 10.0 }, 2.0);
        assert!(close(driver.update(1.0), 5.0));
        assert!(close(driver.update(0.5), 7.5));
        // Wraps around after the period.
        assert!(close(driver.update(1.0), 2.5));
    }

    #[test]
    fn test_sinwave_extremes() {
        let mut driver = Driver::new(DriverKind::Sinwave { min: 1.0, max: 3.0 }, 4.0);
        assert!(close(driver.value(), 2.0));
        assert!(close(driver.update(1.0), 3.0));
        assert!(close(driver.update(2.0), 1.0));
    }

    #[test]
    fn test_fade_rises_holds_and_falls() {
        let mut driver = Driver::new(DriverKind::Fade { start: 0.25, end: 0.75, peak: 2.0 }, 1.0);
        assert!(close(driver.update(0.125), 1.0));
        assert!(close(driver.update(0.375), 2.0));
        assert!(close(driver.update(0.375), 1.0));
    }

    #[test]
    fn test_zero_length_does_not_advance() {
        let mut driver = Driver::new(DriverKind::Linear { start: 1.0, end: 2.0 }, 0.0);
        assert_eq!(driver.update(5.0), 1.0);
    }
}
