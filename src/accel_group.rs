//! Jerk- and accel-limited kinematic math for one possibly-combined
//! acceleration (or deceleration) segment.

use crate::moveq::{GroupRef, MoveId};

/// Describes a (possibly combined) acceleration phase. `start_accel` points
/// at the logical first group of the combined chain (the one whose
/// `max_start_v2` anchors the chain's kinematics); `next_accel` is the
/// forward link the trapezoid builder follows while distributing per-move
/// accel time across the chain. Both are arena indices (see
/// [`crate::moveq::MoveArena`]) rather than raw pointers.
#[derive(Debug, Clone, Copy)]
pub struct AccelGroup {
    pub accel_order: u8,
    pub max_accel: f64,
    pub min_accel: f64,
    pub max_jerk: f64,
    pub min_jerk_limit_time: f64,

    pub combined_d: f64,
    pub accel_d: f64,
    pub accel_t: f64,
    pub accel_offset_t: f64,
    pub total_accel_t: f64,
    pub start_accel_v: f64,
    pub effective_accel: f64,

    pub start_accel: Option<GroupRef>,
    pub next_accel: Option<GroupRef>,
    pub move_id: Option<MoveId>,

    pub max_start_v: f64,
    pub max_start_v2: f64,
    pub max_end_v2: f64,
}

impl Default for AccelGroup {
    fn default() -> Self {
        AccelGroup {
            accel_order: 2,
            max_accel: 0.0,
            min_accel: 0.0,
            max_jerk: 0.0,
            min_jerk_limit_time: 0.0,
            combined_d: 0.0,
            accel_d: 0.0,
            accel_t: 0.0,
            accel_offset_t: 0.0,
            total_accel_t: 0.0,
            start_accel_v: 0.0,
            effective_accel: 0.0,
            start_accel: None,
            next_accel: None,
            move_id: None,
            max_start_v: 0.0,
            max_start_v2: 0.0,
            max_end_v2: 0.0,
        }
    }
}

impl AccelGroup {
    pub fn new(
        move_id: MoveId,
        accel_order: u8,
        accel: f64,
        jerk: f64,
        min_jerk_limit_time: f64,
    ) -> AccelGroup {
        let mut min_accel = jerk * min_jerk_limit_time / 6.0;
        if min_accel > accel {
            min_accel = accel;
        }
        AccelGroup {
            accel_order,
            max_accel: accel,
            min_accel,
            max_jerk: jerk,
            min_jerk_limit_time,
            move_id: Some(move_id),
            ..Default::default()
        }
    }

    /// Clamp `max_accel`/`max_jerk` downward, re-tightening `min_accel`.
    pub fn limit_accel(&mut self, accel: f64, jerk: f64) {
        let accel = accel.max(0.0);
        self.max_accel = self.max_accel.min(accel);
        self.max_jerk = self.max_jerk.min(jerk);
        let min_accel = self.max_jerk * self.min_jerk_limit_time / 6.0;
        if self.min_accel > min_accel {
            self.min_accel = min_accel;
        }
        if self.min_accel > self.max_accel {
            self.min_accel = self.max_accel;
        }
    }

    pub fn set_max_start_v2(&mut self, start_v2: f64) {
        self.max_start_v2 = start_v2;
        self.max_start_v = start_v2.sqrt();
    }
}

/// Reachable max end speed^2 given the group's starting speed, combined
/// distance, acceleration, and jerk (Cardano's-formula solve for orders > 2).
pub fn calc_max_v2(ag: &AccelGroup, start: &AccelGroup) -> f64 {
    let dist = ag.combined_d;
    let start_v2 = start.max_start_v2;
    let max_accel_v2 = start_v2 + 2.0 * dist * ag.max_accel;
    if ag.accel_order == 2 {
        return max_accel_v2;
    }
    // max(jerk) ~= 6 * accel / accel_time (exact for order 4, ~5.774 for
    // order 6), reducing to the cubic
    //   (max_v^2 - start_v^2) * (max_v + start_v) / 2 == dist^2 * jerk / 3
    // solved via Cardano's formula.
    let start_v = start.max_start_v;
    let a = (2.0 / 3.0) * start_v;
    let b = a * a * a;
    let c = dist * dist * ag.max_jerk / 3.0;
    // Flattens the solution near the vertical tangent so V(start_v) stays
    // monotone non-decreasing, which the combiner relies on.
    if 54.0 * b < c {
        let v = 1.5 * (c / 2.0).cbrt();
        return v * v;
    }
    let d = (c * (c + 2.0 * b)).sqrt();
    let e = (b + c + d).cbrt();
    if e < 1e-9 {
        return start_v * start_v;
    }
    let max_v = e + a * a / e - start_v / 3.0;
    let mut max_v2 = max_v * max_v;
    if max_accel_v2 < max_v2 {
        max_v2 = max_accel_v2;
    }
    let min_accel_v2 = start_v2 + 2.0 * dist * ag.min_accel;
    if min_accel_v2 > max_v2 {
        max_v2 = min_accel_v2;
    }
    max_v2
}

/// Effective acceleration needed to reach cruise speed `cruise_v` from the
/// chain's start speed, clamped to `[min_accel, max_accel]`.
pub fn calc_effective_accel(ag: &AccelGroup, start: &AccelGroup, cruise_v: f64) -> f64 {
    if ag.accel_order == 2 {
        return ag.max_accel;
    }
    let mut effective_accel = (ag.max_jerk * (cruise_v - start.max_start_v) / 6.0).sqrt();
    if effective_accel > ag.max_accel {
        effective_accel = ag.max_accel;
    }
    if effective_accel < ag.min_accel {
        effective_accel = ag.min_accel;
    }
    effective_accel
}

/// Minimum time to reach `cruise_v` from the chain's start speed.
pub fn calc_min_accel_time(ag: &AccelGroup, start: &AccelGroup, cruise_v: f64) -> f64 {
    let delta_v = cruise_v - start.max_start_v;
    if delta_v.abs() < 1e-9 {
        return 0.0;
    }
    let mut min_accel_time = delta_v / ag.max_accel;
    if ag.accel_order > 2 {
        let accel_t = (6.0 * delta_v / ag.max_jerk).sqrt();
        if accel_t > min_accel_time {
            min_accel_time = accel_t;
        }
    }
    if ag.min_accel > 0.0 {
        let accel_t = delta_v / ag.min_accel;
        if accel_t < min_accel_time {
            min_accel_time = accel_t;
        }
    }
    min_accel_time
}

/// Minimum distance covered while reaching `cruise_v` from the chain's start
/// speed.
pub fn calc_min_accel_dist(ag: &AccelGroup, start: &AccelGroup, cruise_v: f64) -> f64 {
    let start_v = start.max_start_v;
    if cruise_v <= start_v {
        return 0.0;
    }
    let accel_t = calc_min_accel_time(ag, start, cruise_v);
    (start_v + cruise_v) * 0.5 * accel_t
}

/// The largest end-speed^2 the group can decelerate from safely, regardless
/// of what it is later asked to decelerate to, over its own kinematic
/// budget.
pub fn calc_max_safe_v2(ag: &AccelGroup, start: &AccelGroup) -> f64 {
    let dist = ag.combined_d;
    let start_v2 = start.max_start_v2;
    let mut max_v2 = 2.0 * ag.max_accel * dist + start_v2;
    if ag.accel_order > 2 {
        let mut v2 = ((9.0 / 16.0) * dist * dist * ag.max_jerk).powf(2.0 / 3.0);
        if start_v2 * 9.0 < v2 {
            v2 = calc_max_v2(ag, start);
        }
        max_v2 = max_v2.min(v2);
    }
    max_v2
}

/// Accel time plus residual cruise time for this group to reach `cruise_v`
/// over its `combined_d`.
pub fn calc_min_accel_group_time(ag: &AccelGroup, start: &AccelGroup, cruise_v: f64) -> f64 {
    if start.max_start_v >= cruise_v {
        return ag.combined_d / cruise_v;
    }
    let start_v = start.max_start_v;
    let accel_t = calc_min_accel_time(ag, start, cruise_v);
    let accel_d = (start_v + cruise_v) * 0.5 * accel_t;
    let cruise_t = (ag.combined_d - accel_d) / cruise_v;
    accel_t + cruise_t
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(order: u8, accel: f64, jerk: f64, d: f64, start_v2: f64) -> (AccelGroup, AccelGroup) {
        let mut start = AccelGroup::new(MoveId(0), order, accel, jerk, 1e-3);
        start.set_max_start_v2(start_v2);
        let mut ag = start;
        ag.combined_d = d;
        (ag, start)
    }

    #[test]
    fn order2_is_pure_kinematic_bound() {
        let (ag, start) = group(2, 2000.0, 0.0, 10.0, 0.0);
        let v2 = calc_max_v2(&ag, &start);
        assert!((v2 - 2.0 * 2000.0 * 10.0).abs() < 1e-6);
    }

    #[test]
    fn higher_order_never_exceeds_accel_bound() {
        let (ag, start) = group(6, 5000.0, 100000.0, 50.0, 0.0);
        let accel_bound = 2.0 * ag.max_accel * ag.combined_d;
        let v2 = calc_max_v2(&ag, &start);
        assert!(v2 <= accel_bound + 1e-6);
    }

    #[test]
    fn max_v2_is_monotone_in_start_speed() {
        let mut prev = 0.0;
        for start_v2 in [0.0, 100.0, 1000.0, 5000.0, 20000.0] {
            let (ag, start) = group(6, 5000.0, 100000.0, 50.0, start_v2);
            let v2 = calc_max_v2(&ag, &start);
            assert!(v2 >= prev - 1e-6, "v2={v2} prev={prev}");
            prev = v2;
        }
    }

    #[test]
    fn limit_accel_tightens_min_accel() {
        let mut ag = AccelGroup::new(MoveId(0), 4, 5000.0, 100000.0, 0.01);
        let before_min = ag.min_accel;
        ag.limit_accel(1000.0, 50000.0);
        assert!(ag.max_accel == 1000.0);
        assert!(ag.min_accel <= before_min);
        assert!(ag.min_accel <= ag.max_accel);
    }
}
