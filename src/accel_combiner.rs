//! Combines consecutive same-order moves into a single jerk-limited
//! acceleration (or deceleration) chain whenever doing so reaches cruise
//! speed sooner than treating each move independently.

use std::collections::VecDeque;

use crate::accel_group::{self, AccelGroup};
use crate::moveq::{GroupField, GroupRef, MoveArena};

const EPSILON: f64 = 1e-9;

/// A candidate combined-chain anchor under consideration. `accel` is a
/// scratch snapshot used purely for bookkeeping math (its own
/// `start_accel` is implicitly itself, so every place the reference
/// implementation dereferences `jp->accel.start_accel` this snapshot reads
/// its own fields instead); `move_ag` is the real arena group the chain
/// ends up anchored to once this candidate wins.
#[derive(Debug, Clone, Copy)]
pub struct JunctionPoint {
    accel: AccelGroup,
    move_ag: GroupRef,
    min_start_time: f64,
    min_end_time: f64,
    max_cruise_end_v2: f64,
}

#[derive(Debug, Default)]
pub struct AccelCombiner {
    junctions: VecDeque<JunctionPoint>,
    junct_start_v2: f64,
    prev_best_jp: Option<JunctionPoint>,
}

impl AccelCombiner {
    pub fn new() -> AccelCombiner {
        AccelCombiner::default()
    }

    pub fn reset_junctions(&mut self, start_v2: f64) {
        self.junctions.clear();
        self.junct_start_v2 = start_v2;
        self.prev_best_jp = None;
    }

    pub fn reset(&mut self) {
        self.reset_junctions(0.0);
    }

    fn init_junction_point(&self, arena: &MoveArena, ag_ref: GroupRef, junction_max_v2: f64) -> JunctionPoint {
        let mut accel = *arena.group(ag_ref);
        accel.combined_d = 0.0;
        accel.start_accel = None;
        accel.next_accel = None;

        let (start_v2, min_start_time) = match &self.prev_best_jp {
            Some(prev_jp) => {
                let prev_end_v2 = prev_jp.accel.max_end_v2.min(prev_jp.max_cruise_end_v2);
                (junction_max_v2.min(prev_end_v2), prev_jp.min_end_time)
            }
            None => (junction_max_v2.min(self.junct_start_v2), 0.0),
        };
        accel.set_max_start_v2(start_v2);
        JunctionPoint {
            accel,
            move_ag: ag_ref,
            min_start_time,
            min_end_time: 0.0,
            max_cruise_end_v2: 0.0,
        }
    }

    fn check_can_combine(&self, arena: &MoveArena, next_ref: GroupRef, compare_accel_comp: bool) -> bool {
        let Some(prev_jp) = self.junctions.back() else {
            return false;
        };
        let prev_accel = &prev_jp.accel;
        let next_accel = arena.group(next_ref);
        if next_accel.accel_order == 2 || prev_accel.accel_order != next_accel.accel_order {
            return false;
        }
        if !compare_accel_comp {
            return true;
        }
        let prev_move = prev_accel.move_id.expect("junction snapshot missing move_id");
        let next_move = next_accel.move_id.expect("group missing move_id");
        arena.get(prev_move).accel_comp == arena.get(next_move).accel_comp
    }

    fn drop_decelerating_jps(&mut self, accel_limit_v2: f64) {
        while let Some(last) = self.junctions.back() {
            if last.accel.max_start_v2 < accel_limit_v2 + EPSILON {
                return;
            }
            self.junctions.pop_back();
        }
    }

    fn drop_nonaccelerating_jps(&mut self, accel_limit_v2: f64) {
        self.drop_decelerating_jps(accel_limit_v2 - 2.0 * EPSILON);
    }

    fn limit_accel_jps(&mut self, max_accel: f64, max_jerk: f64, junction_max_v2: f64) {
        for jp in self.junctions.iter_mut() {
            let junction_accel_limit =
                0.5 * (junction_max_v2 - jp.accel.max_start_v2) / jp.accel.combined_d;
            jp.accel.limit_accel(junction_accel_limit.min(max_accel), max_jerk);
        }
    }

    fn calc_min_accel_end_time(jp: &JunctionPoint, cruise_v2: f64) -> f64 {
        jp.min_start_time
            + accel_group::calc_min_accel_group_time(&jp.accel, &jp.accel, cruise_v2.sqrt())
    }

    fn calc_best_jp(&mut self, move_d: f64, max_cruise_v2: f64) -> JunctionPoint {
        let mut best: Option<JunctionPoint> = None;
        for jp in self.junctions.iter_mut() {
            jp.accel.combined_d += move_d;
            jp.accel.max_end_v2 = accel_group::calc_max_v2(&jp.accel, &jp.accel);
            jp.max_cruise_end_v2 = max_cruise_v2;
            jp.min_end_time = Self::calc_min_accel_end_time(jp, jp.accel.max_end_v2.min(max_cruise_v2));
            if best.as_ref().map_or(true, |b| b.min_end_time > jp.min_end_time + EPSILON) {
                best = Some(*jp);
            }
        }
        best.expect("calc_best_jp called with no junction points")
    }

    /// Feed the next move's accel (or decel) group into the combiner,
    /// possibly extending a chain from the previous call. `compare_accel_comp`
    /// selects whether pressure-advance compensation state also has to match
    /// between neighboring moves for them to combine.
    pub fn process_next_accel_with(
        &mut self,
        arena: &mut MoveArena,
        ag_ref: GroupRef,
        junction_max_v2: f64,
        compare_accel_comp: bool,
    ) {
        let new_jp = self.init_junction_point(arena, ag_ref, junction_max_v2);
        let start_v2 = new_jp.accel.max_start_v2;

        if !self.check_can_combine(arena, ag_ref, compare_accel_comp) {
            self.reset_junctions(start_v2);
        }

        self.drop_nonaccelerating_jps(start_v2.min(junction_max_v2));
        let (max_accel, max_jerk) = {
            let ag = arena.group(ag_ref);
            (ag.max_accel, ag.max_jerk)
        };
        self.limit_accel_jps(max_accel, max_jerk, junction_max_v2);

        let (move_d, max_cruise_v2) = {
            let m = arena.get(ag_ref.move_id);
            (m.move_d, m.max_cruise_v2)
        };
        self.junctions.push_back(new_jp);
        let best_jp = self.calc_best_jp(move_d, max_cruise_v2);
        self.prev_best_jp = Some(best_jp);

        let anchor = best_jp.move_ag;
        {
            let ag = arena.group_mut(ag_ref);
            ag.limit_accel(best_jp.accel.max_accel, best_jp.accel.max_jerk);
            ag.set_max_start_v2(start_v2);
            ag.max_end_v2 = best_jp.accel.max_end_v2;
            ag.combined_d = best_jp.accel.combined_d;
            ag.start_accel = Some(anchor);
        }
        if anchor != ag_ref {
            arena.group_mut(anchor).next_accel = Some(ag_ref);
        }
    }

    pub fn process_next_accel(&mut self, arena: &mut MoveArena, ag_ref: GroupRef, junction_max_v2: f64) {
        self.process_next_accel_with(arena, ag_ref, junction_max_v2, true)
    }

    /// Push a synthetic fallback junction point anchored on the move's
    /// default (uncombined) deceleration, when no better candidate in the
    /// current chain reaches `next_junction_max_v2` farther than the
    /// combiner's safe-distance bound.
    fn maybe_add_new_fallback_decel_jp(&mut self, arena: &MoveArena, move_id: crate::moveq::MoveId, next_junction_max_v2: f64) {
        let m = arena.get(move_id);
        let start_v2 = m.decel_group.max_start_v2;
        if next_junction_max_v2 > start_v2 + EPSILON {
            return;
        }
        if let Some(last_jp) = self.junctions.back() {
            if next_junction_max_v2 < last_jp.accel.max_start_v2 + EPSILON {
                return;
            }
        }
        let mut accel = m.default_accel;
        accel.start_accel = None;
        accel.next_accel = None;
        accel.set_max_start_v2(next_junction_max_v2);
        self.junctions.push_back(JunctionPoint {
            accel,
            move_ag: GroupRef::new(move_id, GroupField::Decel),
            min_start_time: 0.0,
            min_end_time: 0.0,
            max_cruise_end_v2: 0.0,
        });
    }

    /// Walk the junction list newest-to-oldest looking for the furthest
    /// point from which `max_end_v2` is still a safely reachable
    /// deceleration target; write it into the move's `fallback_decel`.
    fn find_fallback_decel(&mut self, arena: &mut MoveArena, move_id: crate::moveq::MoveId, max_end_v2: f64) -> bool {
        let move_d = arena.get(move_id).move_d;
        for jp in self.junctions.iter_mut().rev() {
            jp.accel.combined_d += move_d;
            let safe_end_v2 = accel_group::calc_max_safe_v2(&jp.accel, &jp.accel);
            if max_end_v2 <= safe_end_v2 + EPSILON {
                let mut fallback = jp.accel;
                fallback.max_end_v2 = safe_end_v2;
                fallback.set_max_start_v2(jp.accel.max_start_v2);
                fallback.start_accel = Some(jp.move_ag);
                fallback.move_id = Some(move_id);
                arena.get_mut(move_id).fallback_decel = Some(fallback);
                return true;
            }
        }
        arena.get_mut(move_id).fallback_decel = None;
        false
    }

    /// Full fallback-decel resolution pass for one move: combine with
    /// whatever default-acceleration chain precedes it and report whether a
    /// safe landing point for `max_end_v2` was found.
    pub fn process_fallback_decel(
        &mut self,
        arena: &mut MoveArena,
        move_id: crate::moveq::MoveId,
        next_junction_max_v2: f64,
        compare_accel_comp: bool,
    ) -> bool {
        let default_ref = GroupRef::new(move_id, GroupField::Default);
        if !self.check_can_combine(arena, default_ref, compare_accel_comp) {
            self.reset();
        }

        let m = arena.get(move_id);
        let start_v2 = m.decel_group.max_start_v2;
        let max_end_v2 = m.decel_group.max_end_v2.min(m.junction_max_v2);

        if next_junction_max_v2 > EPSILON {
            self.drop_decelerating_jps(start_v2.min(next_junction_max_v2));
        } else {
            self.reset_junctions(0.0);
        }
        let (max_accel, max_jerk) = {
            let d = arena.get(move_id).default_accel;
            (d.max_accel, d.max_jerk)
        };
        self.limit_accel_jps(max_accel, max_jerk, next_junction_max_v2);
        self.maybe_add_new_fallback_decel_jp(arena, move_id, next_junction_max_v2);

        self.find_fallback_decel(arena, move_id, max_end_v2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel_group::AccelGroup;
    use crate::moveq::{GroupField, GroupRef, MoveArena, MoveId, QMove};

    fn push_move(arena: &mut MoveArena, move_d: f64, max_cruise_v2: f64, order: u8) -> MoveId {
        let id = MoveId(arena.slots_len());
        let ag = AccelGroup::new(id, order, 2000.0, 100000.0, 0.0);
        let m = QMove {
            move_d,
            max_cruise_v2,
            junction_max_v2: max_cruise_v2,
            max_smoothed_v2: 0.0,
            smooth_delta_v2: 0.0,
            accel_comp: 0.0,
            default_accel: ag,
            accel_group: ag,
            decel_group: ag,
            safe_decel: None,
            fallback_decel: None,
            cruise_v: 0.0,
        };
        let allocated = arena.alloc(m);
        debug_assert_eq!(allocated, id);
        allocated
    }

    #[test]
    fn first_move_anchors_itself() {
        let mut arena = MoveArena::default();
        let id = push_move(&mut arena, 10.0, 10000.0, 2);
        let mut ac = AccelCombiner::new();
        ac.reset_junctions(0.0);
        ac.process_next_accel(&mut arena, GroupRef::new(id, GroupField::Accel), 10000.0);
        let ag = arena.group(GroupRef::new(id, GroupField::Accel));
        assert_eq!(ag.start_accel.unwrap().move_id, id);
    }

    #[test]
    fn two_identical_higher_order_moves_combine() {
        let mut arena = MoveArena::default();
        let a = push_move(&mut arena, 10.0, 10000.0, 4);
        let b = push_move(&mut arena, 10.0, 10000.0, 4);
        let mut ac = AccelCombiner::new();
        ac.reset_junctions(0.0);
        ac.process_next_accel(&mut arena, GroupRef::new(a, GroupField::Accel), 10000.0);
        ac.process_next_accel(&mut arena, GroupRef::new(b, GroupField::Accel), 10000.0);
        let ag_b = arena.group(GroupRef::new(b, GroupField::Accel));
        assert!(ag_b.combined_d >= 10.0);
    }
}
