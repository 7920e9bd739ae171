//! Look-ahead movement planning queue.
//!
//! Owns the queue of pending moves and drives the two-pass planning
//! algorithm: a backward smoothed pass, a backward full pass, a
//! safe-flush-limit computation (lazy mode only), and a forward pass that
//! commits finished velocity trapezoids.

use std::collections::VecDeque;

use crate::accel_combiner::AccelCombiner;
use crate::accel_group::{self, AccelGroup};
use crate::error::PlanError;
use crate::trapbuild::VTrap;

pub const EPSILON: f64 = 1e-9;
pub const VELOCITY_EPSILON: f64 = 1e-4;

/// Stable index into a [`MoveArena`]. Indices are never reused while a move
/// is referenced by a live `AccelGroup::start_accel`/`next_accel` link, so
/// growing the arena never invalidates an existing `MoveId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MoveId(pub usize);

/// Which of the (up to) five `AccelGroup` instances carried by a move a
/// [`GroupRef`] points at — the Rust stand-in for the reference
/// implementation's bare `struct accel_group *`, which can address any of a
/// move's embedded groups interchangeably.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupField {
    Accel,
    Decel,
    Default,
    Safe,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupRef {
    pub move_id: MoveId,
    pub field: GroupField,
}

impl GroupRef {
    pub fn new(move_id: MoveId, field: GroupField) -> GroupRef {
        GroupRef { move_id, field }
    }
}

/// One planner-queue entry.
#[derive(Debug, Clone)]
pub struct QMove {
    pub move_d: f64,
    pub max_cruise_v2: f64,
    pub junction_max_v2: f64,
    pub max_smoothed_v2: f64,
    pub smooth_delta_v2: f64,
    pub accel_comp: f64,

    pub default_accel: AccelGroup,
    pub accel_group: AccelGroup,
    pub decel_group: AccelGroup,
    pub safe_decel: Option<AccelGroup>,
    pub fallback_decel: Option<AccelGroup>,

    pub cruise_v: f64,
}

/// Owned arena of [`QMove`]s. A freed slot becomes `None`; its `MoveId`
/// must never be dereferenced again (the planner drops all references to a
/// move before freeing it).
#[derive(Debug, Default)]
pub struct MoveArena {
    slots: Vec<Option<QMove>>,
}

impl MoveArena {
    pub fn alloc(&mut self, m: QMove) -> MoveId {
        let id = MoveId(self.slots.len());
        self.slots.push(Some(m));
        id
    }

    pub fn free(&mut self, id: MoveId) {
        self.slots[id.0] = None;
    }

    pub fn get(&self, id: MoveId) -> &QMove {
        self.slots[id.0].as_ref().expect("dangling MoveId")
    }

    pub fn get_mut(&mut self, id: MoveId) -> &mut QMove {
        self.slots[id.0].as_mut().expect("dangling MoveId")
    }

    pub fn group(&self, r: GroupRef) -> &AccelGroup {
        let m = self.get(r.move_id);
        match r.field {
            GroupField::Accel => &m.accel_group,
            GroupField::Decel => &m.decel_group,
            GroupField::Default => &m.default_accel,
            GroupField::Safe => m.safe_decel.as_ref().expect("missing safe_decel"),
            GroupField::Fallback => m.fallback_decel.as_ref().expect("missing fallback_decel"),
        }
    }

    pub fn group_mut(&mut self, r: GroupRef) -> &mut AccelGroup {
        let m = self.get_mut(r.move_id);
        match r.field {
            GroupField::Accel => &mut m.accel_group,
            GroupField::Decel => &mut m.decel_group,
            GroupField::Default => &mut m.default_accel,
            GroupField::Safe => m.safe_decel.as_mut().expect("missing safe_decel"),
            GroupField::Fallback => m.fallback_decel.as_mut().expect("missing fallback_decel"),
        }
    }

    /// Resolve a possibly-chained `start_accel`/`next_accel` reference to
    /// its concrete `AccelGroup` value (a snapshot copy, since chain groups
    /// and the arena's stored groups share value semantics once resolved).
    pub fn resolve(&self, r: GroupRef) -> AccelGroup {
        *self.group(r)
    }
}

/// Final, fully parametrized accel/cruise/decel descriptor for one move
/// (the 13 fields of `trap_accel_decel`).
#[derive(Debug, Clone, Copy, Default)]
pub struct MoveDescriptor {
    pub accel_order: u8,
    pub accel_comp: f64,

    pub start_accel_v: f64,
    pub cruise_v: f64,

    pub effective_accel: f64,
    pub effective_decel: f64,

    pub accel_t: f64,
    pub accel_offset_t: f64,
    pub total_accel_t: f64,

    pub decel_t: f64,
    pub decel_offset_t: f64,
    pub total_decel_t: f64,

    pub cruise_t: f64,
}

impl MoveDescriptor {
    pub fn total_time(&self) -> f64 {
        self.accel_t + self.cruise_t + self.decel_t
    }
}

/// The look-ahead planner. Single-threaded, synchronous, no internal locks:
/// the owning process serializes `add`/`plan`/`get_move` calls.
#[derive(Debug, Default)]
pub struct Planner {
    arena: MoveArena,
    queue: VecDeque<MoveId>,
    combiner: AccelCombiner,

    prev_end_v2: f64,
    prev_move_end_v: f64,
    smoothed_pass_limit: Option<MoveId>,

    /// Whether `check_can_combine` additionally requires matching
    /// `accel_comp` between neighboring moves before treating them as
    /// combinable. Defaults to `true`.
    pub combine_compares_accel_comp: bool,
}

impl Planner {
    pub fn new() -> Planner {
        Planner {
            combine_compares_accel_comp: true,
            ..Default::default()
        }
    }

    pub fn reset(&mut self) {
        *self = Planner::new();
    }

    /// Queue a new move. Preconditions: `move_d > 0`; `0 <= junction_max_v2
    /// <= cruise_v^2`; `accel, jerk > 0`.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &mut self,
        move_d: f64,
        junction_max_v2: f64,
        cruise_v: f64,
        accel_order: u8,
        accel: f64,
        smoothed_accel: f64,
        jerk: f64,
        min_jerk_limit_time: f64,
        accel_comp: f64,
    ) -> Result<(), PlanError> {
        if move_d <= 0.0 {
            return Err(PlanError::InvalidMove("move_d must be > 0"));
        }
        if accel <= 0.0 || jerk <= 0.0 {
            return Err(PlanError::InvalidMove("accel and jerk must be > 0"));
        }
        let max_cruise_v2 = cruise_v * cruise_v;
        if junction_max_v2 < 0.0 || junction_max_v2 > max_cruise_v2 + EPSILON {
            return Err(PlanError::InvalidMove(
                "junction_max_v2 must be in [0, cruise_v^2]",
            ));
        }

        let id = MoveId(self.arena_len());
        let default_accel =
            AccelGroup::new(id, accel_order, accel, jerk, min_jerk_limit_time);

        let smooth_delta_v2 = 2.0 * smoothed_accel * move_d;
        let mut max_smoothed_v2 = 0.0;
        if let Some(&prev_id) = self.queue.back() {
            let prev = self.arena.get(prev_id);
            max_smoothed_v2 = prev.max_smoothed_v2 + prev.smooth_delta_v2;
            max_smoothed_v2 = max_smoothed_v2
                .min(junction_max_v2)
                .min(max_cruise_v2)
                .min(prev.max_cruise_v2);
        }

        let m = QMove {
            move_d,
            max_cruise_v2,
            junction_max_v2,
            max_smoothed_v2,
            smooth_delta_v2,
            accel_comp,
            default_accel,
            accel_group: default_accel,
            decel_group: default_accel,
            safe_decel: None,
            fallback_decel: None,
            cruise_v: 0.0,
        };
        let allocated = self.arena.alloc(m);
        debug_assert_eq!(allocated, id);
        self.queue.push_back(id);
        Ok(())
    }

    fn arena_len(&self) -> usize {
        // Safe upper bound for the next MoveId: arena never shrinks slot
        // count on free (it tombstones), so len() is always the next index.
        self.arena_slot_count()
    }

    fn arena_slot_count(&self) -> usize {
        self.arena.slots_len()
    }

    /// Run the two-pass planning algorithm. Returns the number of moves now
    /// ready to be retrieved via `get_move`. In `lazy` mode, only moves
    /// whose plan cannot be revised by future moves are committed.
    pub fn plan(&mut self, lazy: bool) -> Result<usize, PlanError> {
        if self.queue.is_empty() {
            return Ok(0);
        }

        let flush_limit = self.backward_smoothed_pass(lazy)?;
        if lazy && flush_limit.is_none() {
            return Ok(0);
        }

        self.backward_full_pass();
        let flush_limit = self.compute_safe_flush_limit(lazy, flush_limit);
        let last_flushed = self.forward_pass(flush_limit, lazy)?;
        let last_flushed = match last_flushed {
            Some(m) => m,
            None => return Ok(0),
        };

        self.prev_end_v2 = self.arena.group(GroupRef::new(last_flushed, GroupField::Decel)).max_start_v2;

        let mut flush_count = 0usize;
        for &id in self.queue.iter() {
            flush_count += 1;
            if id == last_flushed {
                break;
            }
        }
        Ok(flush_count)
    }

    /// Walk the queue newest-to-oldest, tracking a reachable smoothed
    /// speed^2 and a list of moves still "on the ramp" (not yet past their
    /// apex). Returns the move at which lazy planning may safely stop, or
    /// `None` when nothing is ready yet.
    fn backward_smoothed_pass(&mut self, lazy: bool) -> Result<Option<MoveId>, PlanError> {
        self.combiner.reset_junctions(0.0);
        let mut update_flush_limit = lazy;
        let mut delayed: Vec<MoveId> = Vec::new();
        let mut next_smoothed_v2 = 0.0;
        let mut peak_cruise_v2 = 0.0;
        let mut flush_limit: Option<MoveId> = None;

        let order: Vec<MoveId> = self.queue.iter().copied().collect();
        let limit = self.smoothed_pass_limit;

        for &id in order.iter().rev() {
            let (max_smoothed_v2, smooth_delta_v2, max_cruise_v2) = {
                let m = self.arena.get(id);
                (m.max_smoothed_v2, m.smooth_delta_v2, m.max_cruise_v2)
            };
            let reachable_smoothed_v2 = next_smoothed_v2 + smooth_delta_v2;
            let smoothed_v2 = max_smoothed_v2.min(reachable_smoothed_v2);

            if smoothed_v2 < reachable_smoothed_v2 {
                if smoothed_v2 + smooth_delta_v2 > next_smoothed_v2 || !delayed.is_empty() {
                    if update_flush_limit && peak_cruise_v2 != 0.0 {
                        flush_limit = Some(id);
                        update_flush_limit = false;
                    }
                    peak_cruise_v2 = max_cruise_v2.min((smoothed_v2 + reachable_smoothed_v2) * 0.5);
                }

                if !update_flush_limit && Some(id) != flush_limit {
                    let m = self.arena.get_mut(id);
                    m.max_cruise_v2 = m.max_cruise_v2.min(peak_cruise_v2);
                    m.junction_max_v2 = m.junction_max_v2.min(peak_cruise_v2);
                    for &dm in &delayed {
                        let d = self.arena.get_mut(dm);
                        d.max_cruise_v2 = d.max_cruise_v2.min(peak_cruise_v2);
                        d.junction_max_v2 = d.junction_max_v2.min(peak_cruise_v2);
                    }
                    // Tighten the next (newer, already-visited) move's entry
                    // speed bound so it never exceeds this apex.
                    if let Some(pos) = order.iter().position(|&x| x == id) {
                        if pos + 1 < order.len() {
                            let next_id = order[pos + 1];
                            let next = self.arena.get_mut(next_id);
                            next.junction_max_v2 = next.junction_max_v2.min(peak_cruise_v2);
                        } else if lazy {
                            return Err(PlanError::SmoothedPeakAtQueueEnd);
                        }
                    }
                    delayed.clear();
                }
            } else {
                delayed.push(id);
            }

            if Some(id) == limit {
                break;
            }
            next_smoothed_v2 = smoothed_v2;
        }

        if !delayed.is_empty() {
            return Err(PlanError::DelayedQueueNotEmpty);
        }

        self.smoothed_pass_limit = flush_limit;
        if update_flush_limit {
            return Ok(None);
        }
        Ok(flush_limit)
    }

    /// Reset the combiner at rest (`junction_max_v2 = 0`, the queue ends at
    /// rest) and feed every move's restored default deceleration group
    /// through it, newest to oldest.
    fn backward_full_pass(&mut self) {
        self.combiner.reset_junctions(0.0);
        let mut junction_max_v2 = 0.0;
        let order: Vec<MoveId> = self.queue.iter().copied().collect();
        for &id in order.iter().rev() {
            {
                let m = self.arena.get_mut(id);
                m.accel_group = m.default_accel;
                m.decel_group = m.default_accel;
            }
            self.combiner.process_next_accel_with(
                &mut self.arena,
                GroupRef::new(id, GroupField::Decel),
                junction_max_v2,
                self.combine_compares_accel_comp,
            );
            junction_max_v2 = self.arena.get(id).junction_max_v2;
        }
    }

    fn compute_safe_flush_limit(
        &mut self,
        lazy: bool,
        flush_limit: Option<MoveId>,
    ) -> Option<MoveId> {
        if !lazy {
            return flush_limit;
        }
        let order: Vec<MoveId> = self.queue.iter().copied().collect();
        let start_pos = match flush_limit {
            Some(id) => order.iter().position(|&x| x == id).unwrap(),
            None => 0,
        };
        let mut limit = flush_limit;

        for &move_id in order[..=start_pos].iter().rev() {
            let move_pos = order.iter().position(|&x| x == move_id).unwrap();
            let mut safe_decel = self.arena.get(move_id).decel_group;
            safe_decel.combined_d = 0.0;

            let mut found = false;
            for &m_id in order[move_pos..].iter() {
                let m_decel = self.arena.get(m_id).decel_group;
                safe_decel.combined_d += m_decel.combined_d;
                safe_decel.limit_accel(m_decel.max_accel, m_decel.max_jerk);
                let start_group = self.arena.resolve(m_decel.start_accel.unwrap());
                let min_safe_dist = min_safe_dist(&safe_decel, &start_group, safe_decel.max_end_v2);

                let start_move_id = m_decel.start_accel.unwrap().move_id;
                let start_move_pos = order.iter().position(|&x| x == start_move_id).unwrap();
                let next_pos = start_move_pos + 1;

                if safe_decel.combined_d > min_safe_dist + EPSILON && next_pos < order.len() {
                    let next_id = order[next_pos];
                    let next_junction_max_v2 = self.arena.get(next_id).junction_max_v2;
                    if next_junction_max_v2 <= start_group.max_start_v2 {
                        let m = self.arena.get_mut(move_id);
                        m.safe_decel = Some(safe_decel);
                        if let Some(sd) = m.safe_decel.as_mut() {
                            sd.start_accel = Some(GroupRef::new(start_move_id, GroupField::Decel));
                        }
                        found = true;
                        break;
                    }
                }
            }
            if !found {
                limit = Some(move_id);
            }
        }
        limit
    }

    fn forward_pass(
        &mut self,
        end: Option<MoveId>,
        lazy: bool,
    ) -> Result<Option<MoveId>, PlanError> {
        let first = *self.queue.front().unwrap();
        let start_v2 = self.prev_end_v2;
        let max_end_v2 = self.arena.get(first).decel_group.max_end_v2;

        if max_end_v2 + EPSILON < start_v2 {
            eprintln!(
                "warning: impossible to reach the committed v2 = {:.3}, max velocity^2 = {:.3}, \
                 falling back to suboptimal planning",
                start_v2, max_end_v2
            );
            let m = self.arena.get(first);
            let safe = m.safe_decel.expect("no fallback available for impossible start speed");
            let decel_start_ref = safe.start_accel.unwrap();
            let decel_start_v2 = self.arena.group(decel_start_ref).max_start_v2;
            let mut new_decel = safe;
            new_decel.max_end_v2 = start_v2;
            self.arena.get_mut(first).decel_group = new_decel;
            self.arena
                .group_mut(decel_start_ref)
                .set_max_start_v2(start_v2.min(decel_start_v2));
        }

        let mut vt = VTrap::default();
        self.combiner.reset_junctions(start_v2);
        let mut prev_cruise_v2 = start_v2;
        let mut last_flushed: Option<MoveId> = None;

        let order: Vec<MoveId> = self.queue.iter().copied().collect();
        let mut idx = 0usize;
        while idx < order.len() {
            let id = order[idx];
            if Some(id) == end {
                break;
            }

            let accel_junction_max_v2 = self.arena.get(id).junction_max_v2.min(prev_cruise_v2);
            self.combiner.process_next_accel_with(
                &mut self.arena,
                GroupRef::new(id, GroupField::Accel),
                accel_junction_max_v2,
                self.combine_compares_accel_comp,
            );

            let accel = self.arena.get(id).accel_group;
            let decel = self.arena.get(id).decel_group;
            let can_accelerate = decel.max_end_v2 > accel.max_start_v2 + EPSILON;

            if can_accelerate {
                if vt.decel_head.is_some() {
                    last_flushed = Some(vt.flush(&mut self.arena));
                }
                vt.add_as_accel(id);
            }

            let must_decelerate = accel.max_end_v2 + EPSILON > decel.max_start_v2;
            if must_decelerate || !can_accelerate {
                let anchor_move = decel.start_accel.unwrap().move_id;
                loop {
                    vt.add_as_decel(order[idx]);
                    if order[idx] == anchor_move {
                        break;
                    }
                    idx += 1;
                    if idx >= order.len() || Some(order[idx]) == end {
                        break;
                    }
                }
                if idx >= order.len() || Some(order[idx]) == end {
                    break;
                }
                let anchor_start_v2 = self.arena.get(anchor_move).decel_group.max_start_v2;
                self.combiner.reset_junctions(anchor_start_v2);
            }

            prev_cruise_v2 = self.arena.get(order[idx]).max_cruise_v2;
            idx += 1;
        }

        if !lazy {
            if vt.decel_head.is_some() {
                last_flushed = Some(vt.flush(&mut self.arena));
            }
        } else {
            vt.clear();
        }

        Ok(last_flushed)
    }

    /// Dequeue the head move and return its fully parametrized descriptor.
    pub fn get_move(&mut self) -> Result<MoveDescriptor, PlanError> {
        let id = *self.queue.front().ok_or(PlanError::EmptyQueue)?;
        let m = self.arena.get(id).clone();

        let accel = m.accel_group;
        let decel = m.decel_group;

        let mut d = MoveDescriptor {
            accel_order: accel.accel_order,
            accel_comp: m.accel_comp,
            start_accel_v: accel.start_accel_v,
            cruise_v: m.cruise_v,
            effective_accel: accel.effective_accel,
            effective_decel: decel.effective_accel,
            accel_t: accel.accel_t,
            accel_offset_t: accel.accel_offset_t,
            total_accel_t: accel.total_accel_t,
            decel_t: decel.accel_t,
            decel_offset_t: decel.accel_offset_t,
            total_decel_t: decel.total_accel_t,
            cruise_t: 0.0,
        };

        let cruise_d = m.move_d - accel.accel_d - decel.accel_d;
        d.cruise_t = cruise_d / m.cruise_v;

        let start_v = if d.accel_t != 0.0 {
            d.start_accel_v + d.effective_accel * d.accel_offset_t
        } else {
            m.cruise_v - d.effective_decel * d.decel_offset_t
        };
        let end_v = if d.decel_t != 0.0 || d.cruise_t != 0.0 {
            m.cruise_v - d.effective_decel * (d.decel_offset_t + d.decel_t)
        } else {
            start_v + d.effective_accel * d.accel_t
        };

        if d.cruise_t < -EPSILON {
            return Err(PlanError::ImpossibleMove {
                start_v,
                cruise_v: m.cruise_v,
                end_v,
                accel_d: accel.accel_d,
                decel_d: decel.accel_d,
                move_d: m.move_d,
            });
        }
        d.cruise_t = d.cruise_t.max(0.0);

        if (self.prev_move_end_v - start_v).abs() > VELOCITY_EPSILON {
            return Err(PlanError::VelocityJump {
                prev: self.prev_move_end_v,
                next: start_v,
            });
        }

        self.queue.pop_front();
        self.arena.free(id);
        self.prev_move_end_v = end_v;
        Ok(d)
    }
}

/// Minimum distance a group must travel while decelerating from `v2` to
/// rest without exceeding its own accel/jerk budget.
pub fn min_safe_dist(group: &AccelGroup, start: &AccelGroup, v2: f64) -> f64 {
    let mut d = v2 / (2.0 * group.max_accel);
    if group.accel_order > 2 {
        let alt = (16.0 / 9.0 * v2.powf(1.5) / group.max_jerk).sqrt();
        d = d.max(alt);
    }
    let _ = start;
    d
}

impl MoveArena {
    pub fn slots_len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner() -> Planner {
        Planner::new()
    }

    #[test]
    fn single_stop_to_stop_move() {
        let mut p = planner();
        // d=10, cruise_v=100, accel=2000, order 2 (jerk unused for order 2)
        p.add(10.0, 0.0, 100.0, 2, 2000.0, 2000.0, 1e9, 0.0, 0.0).unwrap();
        let ready = p.plan(false).unwrap();
        assert_eq!(ready, 1);
        let d = p.get_move().unwrap();
        assert!((d.accel_t - 0.05).abs() < 1e-6, "accel_t={}", d.accel_t);
        assert!((d.decel_t - 0.05).abs() < 1e-6, "decel_t={}", d.decel_t);
        assert!((d.cruise_t - 0.05).abs() < 1e-6, "cruise_t={}", d.cruise_t);
        assert!((d.cruise_v - 100.0).abs() < 1e-6);
    }

    #[test]
    fn three_identical_moves_middle_is_pure_cruise() {
        let mut p = planner();
        for _ in 0..3 {
            p.add(10.0, 10000.0, 100.0, 2, 2000.0, 2000.0, 1e9, 0.0, 0.0)
                .unwrap();
        }
        let ready = p.plan(false).unwrap();
        assert_eq!(ready, 3);
        let first = p.get_move().unwrap();
        let middle = p.get_move().unwrap();
        let last = p.get_move().unwrap();
        assert!(first.decel_t.abs() < 1e-6, "decel_t={}", first.decel_t);
        assert!(middle.accel_t.abs() < 1e-6 && middle.decel_t.abs() < 1e-6);
        assert!(last.accel_t.abs() < 1e-6, "accel_t={}", last.accel_t);
    }

    #[test]
    fn empty_queue_errors() {
        let mut p = planner();
        assert!(matches!(p.get_move(), Err(PlanError::EmptyQueue)));
    }

    #[test]
    fn invalid_move_preconditions_rejected() {
        let mut p = planner();
        assert!(p.add(0.0, 0.0, 100.0, 2, 2000.0, 2000.0, 1e9, 0.0, 0.0).is_err());
        assert!(p.add(10.0, 20000.0, 100.0, 2, 2000.0, 2000.0, 1e9, 0.0, 0.0).is_err());
        assert!(p.add(10.0, 0.0, 100.0, 2, 0.0, 2000.0, 1e9, 0.0, 0.0).is_err());
    }
}
