//! Render statistics.

use crate::resources::geometry::PrimitiveMode;

/// Counters for the last rendered frame plus live resource totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderInfo {
    /// Frames rendered since creation.
    pub frame: u64,
    pub calls: u32,
    pub triangles: u64,
    pub points: u64,
    pub lines: u64,

    pub programs: usize,
    pub textures: usize,
    pub geometries: usize,
}

impl RenderInfo {
    pub(crate) fn begin_frame(&mut self) {
        self.frame += 1;
        self.calls = 0;
        self.triangles = 0;
        self.points = 0;
        self.lines = 0;
    }

    pub(crate) fn record_draw(&mut self, mode: PrimitiveMode, count: u32, instances: u32) {
        let count = u64::from(count) * u64::from(instances.max(1));
        self.calls += 1;
        match mode {
            PrimitiveMode::Triangles => self.triangles += count / 3,
            PrimitiveMode::TriangleStrip => self.triangles += count.saturating_sub(2),
            PrimitiveMode::Lines => self.lines += count / 2,
            PrimitiveMode::LineStrip => self.lines += count.saturating_sub(1),
            PrimitiveMode::Points => self.points += count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_primitives_per_mode() {
        let mut info = RenderInfo::default();
        info.begin_frame();
        info.record_draw(PrimitiveMode::Triangles, 36, 1);
        info.record_draw(PrimitiveMode::Triangles, 6, 10);
        info.record_draw(PrimitiveMode::Lines, 4, 1);
        assert_eq!(info.calls, 3);
        assert_eq!(info.triangles, 12 + 20);
        assert_eq!(info.lines, 2);

        info.begin_frame();
        assert_eq!(info.frame, 2);
        assert_eq!(info.calls, 0);
    }
}
