//! Trapezoidal velocity queue: stitches accel/cruise/decel descriptors into
//! timestamped, positioned segments and answers position/velocity queries
//! over arbitrary spans, including spans that straddle segment boundaries.

use glam::DVec3;

use crate::moveq::MoveDescriptor;
use crate::scurve::{self, SCurve};

/// The largest gap filled with a null (zero-rate) move when the queue is
/// still empty — guards against a single pathologically large first
/// `print_time` producing an unbounded null segment.
const MAX_INITIAL_GAP_T: f64 = 1.0;

/// Tail timestamp reported by an empty queue — large enough that no real
/// `print_time` will ever compare past it.
const NEVER: f64 = 1e9;

/// One segment of the queue: a constant-rate translation along `axes_r`
/// whose distance-over-time is governed by an S-curve.
#[derive(Debug, Clone, Copy)]
pub struct Move {
    pub print_time: f64,
    pub move_t: f64,
    pub start_pos: DVec3,
    pub axes_r: DVec3,
    pub s: SCurve,
}

impl Move {
    fn null(print_time: f64, move_t: f64, start_pos: DVec3) -> Move {
        Move {
            print_time,
            move_t,
            start_pos,
            axes_r: DVec3::ZERO,
            s: SCurve::default(),
        }
    }

    pub fn distance(&self, move_time: f64) -> f64 {
        self.s.eval(move_time)
    }

    pub fn coord(&self, move_time: f64) -> DVec3 {
        self.start_pos + self.axes_r * self.distance(move_time)
    }

    fn integrate_axis(&self, axis: usize, start: f64, end: f64) -> f64 {
        let start = start.max(0.0);
        let end = end.min(self.move_t);
        let base = self.start_pos[axis] * (end - start);
        let integral = self.s.integrate(start, end);
        base + integral * self.axes_r[axis]
    }
}

/// An append-only, front-trimmed queue of [`Move`] segments. Gaps between
/// the queue's trailing edge and the next appended segment are filled with
/// a zero-rate null move so later position/velocity queries never have to
/// special-case holes.
#[derive(Debug, Default)]
pub struct TrapQueue {
    moves: Vec<Move>,
    tail_print_time: f64,
    tail_pos: DVec3,
}

impl TrapQueue {
    pub fn new() -> TrapQueue {
        TrapQueue::default()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn get(&self, idx: usize) -> &Move {
        &self.moves[idx]
    }

    /// Expand one planned move into its accel/cruise/decel segments and
    /// append them, starting at `start_pos` and translating along
    /// `axes_r` (a unit vector scaled by each axis's share of the move).
    pub fn append(&mut self, print_time: f64, start_pos: DVec3, axes_r: DVec3, accel_decel: &MoveDescriptor) {
        let mut print_time = print_time;
        let mut pos = start_pos;

        if accel_decel.accel_t != 0.0 {
            let s = scurve::fill(
                accel_decel.accel_order,
                accel_decel.accel_t,
                accel_decel.accel_offset_t,
                accel_decel.total_accel_t,
                accel_decel.start_accel_v,
                accel_decel.effective_accel,
            );
            let m = Move {
                print_time,
                move_t: accel_decel.accel_t,
                start_pos: pos,
                axes_r,
                s,
            };
            pos = m.coord(accel_decel.accel_t);
            print_time += accel_decel.accel_t;
            self.add_move(m);
        }

        if accel_decel.cruise_t != 0.0 {
            let s = scurve::fill(2, accel_decel.cruise_t, 0.0, accel_decel.cruise_t, accel_decel.cruise_v, 0.0);
            let m = Move {
                print_time,
                move_t: accel_decel.cruise_t,
                start_pos: pos,
                axes_r,
                s,
            };
            pos = m.coord(accel_decel.cruise_t);
            print_time += accel_decel.cruise_t;
            self.add_move(m);
        }

        if accel_decel.decel_t != 0.0 {
            let s = scurve::fill(
                accel_decel.accel_order,
                accel_decel.decel_t,
                accel_decel.decel_offset_t,
                accel_decel.total_decel_t,
                accel_decel.cruise_v,
                -accel_decel.effective_decel,
            );
            let m = Move {
                print_time,
                move_t: accel_decel.decel_t,
                start_pos: pos,
                axes_r,
                s,
            };
            self.add_move(m);
        }
    }

    fn add_move(&mut self, m: Move) {
        let gap = m.print_time - self.tail_print_time;
        if gap > 0.0 {
            let gap = if self.moves.is_empty() { gap.min(MAX_INITIAL_GAP_T) } else { gap };
            let null_start = m.print_time - gap;
            self.moves.push(Move::null(null_start, gap, m.start_pos));
        }
        self.tail_print_time = m.print_time + m.move_t;
        self.tail_pos = m.coord(m.move_t);
        self.moves.push(m);
    }

    pub fn tail_print_time(&self) -> f64 {
        if self.moves.is_empty() {
            NEVER
        } else {
            self.tail_print_time
        }
    }

    pub fn tail_pos(&self) -> DVec3 {
        self.tail_pos
    }

    /// Recompute the tracked tail timestamp/position from the last real
    /// move, or reset them to the empty-queue sentinel. A plain `Vec` can
    /// never actually desync from its own last element the way an
    /// intrusive list's separately-allocated tail sentinel can, so this is
    /// a defensive no-op in practice — exposed so callers that mutate the
    /// queue through future APIs have an explicit resync point.
    pub fn check_sentinels(&mut self) {
        match self.moves.last() {
            Some(last) => {
                self.tail_print_time = last.print_time + last.move_t;
                self.tail_pos = last.coord(last.move_t);
            }
            None => {
                self.tail_print_time = NEVER;
                self.tail_pos = DVec3::ZERO;
            }
        }
    }

    /// Walk forward/backward from `idx` until `time` falls inside the move
    /// it lands on; returns the resolved `(index, local time)`.
    pub fn find_move(&self, mut idx: usize, mut time: f64) -> (usize, f64) {
        loop {
            if time < 0.0 {
                idx -= 1;
                time += self.moves[idx].move_t;
            } else if time > self.moves[idx].move_t {
                time -= self.moves[idx].move_t;
                idx += 1;
            } else {
                return (idx, time);
            }
        }
    }

    /// Definite integral of one cartesian axis's position over `[start,
    /// end]`, measured relative to the move at `idx`, spilling into
    /// neighboring moves when the span runs outside `[0, move_t]`.
    pub fn integrate(&self, idx: usize, axis: usize, start: f64, end: f64) -> f64 {
        let mut res = self.moves[idx].integrate_axis(axis, start, end);

        let mut prev_idx = idx;
        let mut start = start;
        while start < 0.0 {
            prev_idx -= 1;
            start += self.moves[prev_idx].move_t;
            res += self.moves[prev_idx].integrate_axis(axis, start, self.moves[prev_idx].move_t);
        }

        let mut next_idx = idx;
        let mut end = end;
        while end > self.moves[next_idx].move_t {
            end -= self.moves[next_idx].move_t;
            next_idx += 1;
            res += self.moves[next_idx].integrate_axis(axis, 0.0, end);
        }
        res
    }

    /// Drop every move that ends at or before `print_time`, keeping the
    /// frontmost surviving move's start position intact for future
    /// queries that address it by time.
    pub fn free_moves(&mut self, print_time: f64) {
        let keep_from = self
            .moves
            .iter()
            .position(|m| m.print_time + m.move_t > print_time)
            .unwrap_or(self.moves.len());
        self.moves.drain(0..keep_from);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(accel_t: f64, cruise_t: f64, decel_t: f64, cruise_v: f64) -> MoveDescriptor {
        MoveDescriptor {
            accel_order: 2,
            accel_comp: 0.0,
            start_accel_v: 0.0,
            cruise_v,
            effective_accel: 1000.0,
            effective_decel: 1000.0,
            accel_t,
            accel_offset_t: 0.0,
            total_accel_t: accel_t,
            decel_t,
            decel_offset_t: 0.0,
            total_decel_t: decel_t,
            cruise_t,
        }
    }

    #[test]
    fn append_advances_tail_print_time() {
        let mut tq = TrapQueue::new();
        let d = descriptor(0.1, 0.1, 0.1, 100.0);
        tq.append(0.0, DVec3::ZERO, DVec3::X, &d);
        assert!((tq.tail_print_time() - 0.3).abs() < 1e-9);
        assert_eq!(tq.len(), 3);
    }

    #[test]
    fn gap_before_first_move_is_bounded() {
        let mut tq = TrapQueue::new();
        let d = descriptor(0.1, 0.0, 0.0, 100.0);
        tq.append(50.0, DVec3::ZERO, DVec3::X, &d);
        // a null move fills [50 - MAX_INITIAL_GAP_T, 50), not [0, 50)
        assert!((tq.get(0).move_t - MAX_INITIAL_GAP_T).abs() < 1e-9);
    }

    #[test]
    fn free_moves_drops_fully_elapsed_segments() {
        let mut tq = TrapQueue::new();
        let d = descriptor(0.1, 0.1, 0.1, 100.0);
        tq.append(0.0, DVec3::ZERO, DVec3::X, &d);
        tq.append(0.3, DVec3::new(5.0, 0.0, 0.0), DVec3::X, &d);
        tq.free_moves(0.3);
        assert!(tq.get(0).print_time >= 0.3 - 1e-9);
    }
}
