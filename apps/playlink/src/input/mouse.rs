use playlink_proto::InputEvent;

/// Relative pointer motion gathered between frame ticks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MotionAccumulator {
    dx: i32,
    dy: i32,
}

impl MotionAccumulator {
    pub fn add(&mut self, dx: i32, dy: i32) {
        self.dx = self.dx.saturating_add(dx);
        self.dy = self.dy.saturating_add(dy);
    }

    /// Returns the pending motion as one move and resets, or `None` when
    /// nothing moved.
    pub fn take(&mut self) -> Option<InputEvent> {
        let Self { dx, dy } = std::mem::take(self);
        (dx != 0 || dy != 0).then_some(InputEvent::MouseMove { dx, dy })
    }

    pub fn is_empty(&self) -> bool {
        self.dx == 0 && self.dy == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn flush_sums_deltas_and_resets() {
        let mut motion = MotionAccumulator::default();
        let deltas = [(3, -1), (-5, 2), (4, 4), (0, -9)];
        for (dx, dy) in deltas {
            motion.add(dx, dy);
        }
        assert_eq!(motion.take(), Some(InputEvent::MouseMove { dx: 2, dy: -4 }));
        assert!(motion.is_empty());
        assert_eq!(motion.take(), None);
    }

    #[test_timeout::timeout]
    fn cancelling_motion_sends_nothing() {
        let mut motion = MotionAccumulator::default();
        motion.add(7, 7);
        motion.add(-7, -7);
        assert_eq!(motion.take(), None);
    }
}
