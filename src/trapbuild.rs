//! Builds the final velocity trapezoid for a run of combined moves once the
//! combiner has settled on an accel and a decel chain for each of them.

use crate::accel_group;
use crate::moveq::{GroupField, GroupRef, MoveArena, MoveId};
use crate::scurve;

const BINARY_SEARCH_EPSILON: f64 = 1e-9;

/// Peak cruise speed^2 for a single move that never reaches either chain's
/// natural combined limit — found by binary search over the candidate
/// cruise speed, same as the reference implementation.
fn calc_move_peak_v2(arena: &MoveArena, move_id: MoveId) -> f64 {
    let m = arena.get(move_id);
    let accel = m.accel_group;
    let decel = m.decel_group;

    if accel.accel_order == 2 {
        let effective_accel = accel.max_accel.min(decel.max_accel);
        return (accel.max_start_v2 + decel.max_start_v2 + 2.0 * m.move_d * effective_accel) * 0.5;
    }

    let total_d = accel.combined_d + decel.combined_d - m.move_d;
    let accel_start = arena.resolve(accel.start_accel.expect("unanchored accel group"));
    let decel_start = arena.resolve(decel.start_accel.expect("unanchored decel group"));

    let mut high_v = accel.max_end_v2.max(decel.max_end_v2).sqrt();
    let mut low_v = 0.0;
    while high_v - low_v > BINARY_SEARCH_EPSILON {
        let guess_v = (high_v + low_v) * 0.5;
        let accel_d = accel_group::calc_min_accel_dist(&accel, &accel_start, guess_v);
        let decel_d = accel_group::calc_min_accel_dist(&decel, &decel_start, guess_v);
        if accel_d <= accel.combined_d && decel_d <= decel.combined_d && accel_d + decel_d <= total_d {
            low_v = guess_v;
        } else {
            high_v = guess_v;
        }
    }
    low_v * low_v
}

fn calc_trap_peak_v2(arena: &MoveArena, accel_head: Option<MoveId>, decel_head: Option<MoveId>) -> f64 {
    match decel_head {
        Some(dh) if Some(dh) != accel_head => {
            let d = arena.get(dh);
            let mut peak = d.decel_group.max_end_v2.min(d.junction_max_v2);
            if let Some(ah) = accel_head {
                peak = peak.min(arena.get(ah).accel_group.max_end_v2);
            }
            peak
        }
        Some(dh) => {
            let peak = calc_move_peak_v2(arena, dh);
            peak.min(arena.get(dh).max_cruise_v2)
        }
        None => 0.0,
    }
}

/// Distribute `cruise_v2` and the accel/jerk-limited S-curve across every
/// move in the combined chain anchored at `combined.start_accel`, walking
/// forward through `next_accel` links.
fn set_accel(arena: &mut MoveArena, combined_ref: GroupRef, cruise_v2: f64, time_offset_from_start: bool) {
    let combined = *arena.group(combined_ref);
    let start_ref = combined.start_accel.expect("unanchored combined group");

    if arena.group(start_ref).max_start_v2 > cruise_v2 {
        arena.group_mut(start_ref).set_max_start_v2(cruise_v2);
    }
    let start_accel_v = arena.group(start_ref).max_start_v;
    let start_group = arena.resolve(start_ref);

    let cruise_v = cruise_v2.sqrt();
    let avg_v = (cruise_v + start_accel_v) * 0.5;
    let combined_accel_t = accel_group::calc_min_accel_time(&combined, &start_group, cruise_v);
    let combined_accel_d = avg_v * combined_accel_t;
    let effective_accel = accel_group::calc_effective_accel(&combined, &start_group, cruise_v);

    let s = scurve::fill(
        combined.accel_order,
        combined_accel_t,
        0.0,
        combined_accel_t,
        start_accel_v,
        effective_accel,
    );

    let mut remaining_accel_t = combined_accel_t;
    let mut remaining_accel_d = combined_accel_d;
    let mut a_ref = start_ref;
    loop {
        let move_id = arena.group(a_ref).move_id.expect("group missing owning move");
        let move_d = arena.get(move_id).move_d;
        arena.get_mut(move_id).cruise_v = cruise_v;

        if remaining_accel_d > 0.0 {
            let accel_d = move_d.min(remaining_accel_d);
            let next_pos = accel_d + combined_accel_d - remaining_accel_d;
            let (accel_offset_t, accel_t);
            if time_offset_from_start {
                accel_offset_t = combined_accel_t - remaining_accel_t;
                accel_t = s.get_time(next_pos) - accel_offset_t;
            } else {
                accel_offset_t = combined_accel_t - s.get_time(next_pos);
                accel_t = remaining_accel_t - accel_offset_t;
            }

            let a = arena.group_mut(a_ref);
            a.effective_accel = effective_accel;
            a.total_accel_t = combined_accel_t;
            a.accel_d = accel_d;
            a.start_accel_v = start_accel_v;
            a.accel_offset_t = accel_offset_t;
            a.accel_t = accel_t;

            remaining_accel_t -= accel_t;
            remaining_accel_d -= move_d;
        }

        if a_ref == combined_ref {
            break;
        }
        a_ref = arena.group(a_ref).next_accel.expect("broken accel chain");
    }
}

fn set_trap_decel(arena: &mut MoveArena, members: &[MoveId], decel_head: MoveId, mut cruise_v2: f64) {
    let mut idx = members
        .iter()
        .position(|&x| x == decel_head)
        .expect("decel_head not present in its own trapezoid");
    while idx < members.len() {
        let move_id = members[idx];
        set_accel(arena, GroupRef::new(move_id, GroupField::Decel), cruise_v2, false);
        let anchor = arena.get(move_id).decel_group.start_accel.unwrap().move_id;
        cruise_v2 = cruise_v2.min(arena.get(anchor).decel_group.max_start_v2);
        idx = members.iter().position(|&x| x == anchor).map_or(idx + 1, |p| p + 1);
    }
}

fn set_trap_accel(arena: &mut MoveArena, members: &[MoveId], accel_head: MoveId, mut cruise_v2: f64) {
    let mut idx = members
        .iter()
        .position(|&x| x == accel_head)
        .expect("accel_head not present in its own trapezoid")
        + 1;
    while idx > 0 {
        idx -= 1;
        let move_id = members[idx];
        set_accel(arena, GroupRef::new(move_id, GroupField::Accel), cruise_v2, true);
        let anchor = arena.get(move_id).accel_group.start_accel.unwrap().move_id;
        cruise_v2 = cruise_v2.min(arena.get(anchor).accel_group.max_start_v2);
        idx = members.iter().position(|&x| x == anchor).unwrap_or(idx);
    }
}

/// Collects a run of moves that should be flushed as a single velocity
/// trapezoid: zero or more pure-accelerating moves, then zero or more
/// decelerating moves.
#[derive(Debug, Default)]
pub struct VTrap {
    trapezoid: Vec<MoveId>,
    pub accel_head: Option<MoveId>,
    pub decel_head: Option<MoveId>,
}

impl VTrap {
    pub fn add_as_accel(&mut self, move_id: MoveId) {
        self.trapezoid.push(move_id);
        self.accel_head = Some(move_id);
    }

    pub fn add_as_decel(&mut self, move_id: MoveId) {
        if self.decel_head.is_none() {
            self.decel_head = Some(move_id);
        }
        if self.accel_head != Some(move_id) {
            self.trapezoid.push(move_id);
        }
    }

    /// Finalize the trapezoid: pick the peak cruise speed both chains can
    /// reach, distribute accel/decel S-curves across every member move, and
    /// reset for the next trapezoid. Returns the last (forwardmost) member.
    pub fn flush(&mut self, arena: &mut MoveArena) -> MoveId {
        let peak_cruise_v2 = calc_trap_peak_v2(arena, self.accel_head, self.decel_head);
        let members = std::mem::take(&mut self.trapezoid);
        if let Some(decel_head) = self.decel_head {
            set_trap_decel(arena, &members, decel_head, peak_cruise_v2);
        }
        if let Some(accel_head) = self.accel_head {
            set_trap_accel(arena, &members, accel_head, peak_cruise_v2);
        }
        self.accel_head = None;
        self.decel_head = None;
        *members.last().expect("flush called on an empty trapezoid")
    }

    pub fn clear(&mut self) {
        self.trapezoid.clear();
        self.accel_head = None;
        self.decel_head = None;
    }
}
