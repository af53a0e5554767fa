//! Sample generators.

use microbridge_core::SensorValue;

/// Largest reading of the board's 10-bit ADC.
pub const ADC_MAX: u16 = 1023;

/// Triangle sweep over `0..=ADC_MAX`.
///
/// Starts at 0, climbs by `step` until it reaches the top, then falls back
/// down, clamping at both ends. A step of 0 yields a constant 0.
#[derive(Debug, Clone)]
pub struct SampleSource {
    current: u16,
    step: u16,
    rising: bool,
}

impl SampleSource {
    pub fn new(step: u16) -> Self {
        Self {
            current: 0,
            step,
            rising: true,
        }
    }

    /// Returns the value the next call to `next` will yield.
    pub fn peek(&self) -> SensorValue {
        SensorValue::new(self.current)
    }

    fn advance(&mut self) {
        if self.rising {
            let next = self.current.saturating_add(self.step).min(ADC_MAX);
            if next == ADC_MAX {
                self.rising = false;
            }
            self.current = next;
        } else {
            let next = self.current.saturating_sub(self.step);
            if next == 0 {
                self.rising = true;
            }
            self.current = next;
        }
    }
}

impl Default for SampleSource {
    fn default() -> Self {
        Self::new(32)
    }
}

impl Iterator for SampleSource {
    type Item = SensorValue;

    fn next(&mut self) -> Option<SensorValue> {
        let value = self.peek();
        self.advance();
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(source: &mut SampleSource, n: usize) -> Vec<u16> {
        source.take(n).map(|v| v.raw()).collect()
    }

    #[test]
    fn test_sweeps_up_and_down() {
        let mut source = SampleSource::new(400);
        assert_eq!(raw(&mut source, 7), vec![0, 400, 800, 1023, 623, 223, 0]);
        assert_eq!(raw(&mut source, 2), vec![400, 800]);
    }

    #[test]
    fn test_stays_in_adc_range() {
        let source = SampleSource::new(7);
        assert!(source.take(1000).all(|v| v.raw() <= ADC_MAX));
    }

    #[test]
    fn test_zero_step_is_constant() {
        let mut source = SampleSource::new(0);
        assert_eq!(raw(&mut source, 3), vec![0, 0, 0]);
    }

    #[test]
    fn test_peek_does_not_advance() {
        let mut source = SampleSource::new(10);
        source.next();
        assert_eq!(source.peek().raw(), 10);
        assert_eq!(source.next().map(|v| v.raw()), Some(10));
    }
}
