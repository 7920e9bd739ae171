//! Polynomial-in-time position function (order 2, 4, or 6) used as the
//! per-phase motion profile of one acceleration, cruise, or deceleration
//! segment.
//!
//! `s(t) = c1*t + c2*t^2 + c3*t^3 + c4*t^4 + c5*t^5 + c6*t^6`

const BISECT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SCurve {
    pub c1: f64,
    pub c2: f64,
    pub c3: f64,
    pub c4: f64,
    pub c5: f64,
    pub c6: f64,
    pub total_accel_t: f64,
}

impl SCurve {
    /// `s(t)`, via Horner's method.
    pub fn eval(&self, t: f64) -> f64 {
        let mut v = self.c6;
        v = self.c5 + v * t;
        v = self.c4 + v * t;
        v = self.c3 + v * t;
        v = self.c2 + v * t;
        v = self.c1 + v * t;
        v * t
    }

    /// `s'(t)`.
    pub fn velocity(&self, t: f64) -> f64 {
        let mut v = 6.0 * self.c6;
        v = 5.0 * self.c5 + v * t;
        v = 4.0 * self.c4 + v * t;
        v = 3.0 * self.c3 + v * t;
        v = 2.0 * self.c2 + v * t;
        self.c1 + v * t
    }

    /// Monotone bisection over `[0, total_accel_t]` for the unique time at
    /// which `s(t) == distance`, clamped at the ends.
    pub fn get_time(&self, distance: f64) -> f64 {
        let mut low = 0.0;
        let mut high = self.total_accel_t;
        if self.eval(high) <= distance {
            return high;
        }
        if self.eval(low) > distance {
            return low;
        }
        while high - low > BISECT_EPSILON {
            let guess = (high + low) * 0.5;
            if self.eval(guess) > distance {
                high = guess;
            } else {
                low = guess;
            }
        }
        (high + low) * 0.5
    }

    /// Shift the curve by `offset_t` so evaluation at `t` matches evaluation
    /// of the unshifted curve at `t + offset_t` along the virtual full curve.
    pub fn offset(&mut self, offset_t: f64) {
        self.c1 += ((((6.0 * self.c6 * offset_t + 5.0 * self.c5) * offset_t
            + 4.0 * self.c4)
            * offset_t
            + 3.0 * self.c3)
            * offset_t
            + 2.0 * self.c2)
            * offset_t;
        self.c2 += (((15.0 * self.c6 * offset_t + 10.0 * self.c5) * offset_t + 6.0 * self.c4)
            * offset_t
            + 3.0 * self.c3)
            * offset_t;
        self.c3 += ((20.0 * self.c6 * offset_t + 10.0 * self.c5) * offset_t + 4.0 * self.c4)
            * offset_t;
        self.c4 += (15.0 * self.c6 * offset_t + 5.0 * self.c5) * offset_t;
        self.c5 += 6.0 * self.c6 * offset_t;
    }

    /// `integral(s(t) * t^n, t = start..end)` for `n` in `0..=4`, the forms
    /// needed by the smoothing integrators.
    pub fn tn_antiderivative(&self, n: u32, t: f64) -> f64 {
        match n {
            0 => self.integrate_from_zero(t),
            1 => self.integrate_t_from_zero(t),
            2 => self.integrate_t2_from_zero(t),
            3 => self.integrate_t3_from_zero(t),
            4 => self.integrate_t4_from_zero(t),
            _ => unreachable!("tn_antiderivative only used for n in 0..=4"),
        }
    }

    fn integrate_from_zero(&self, t: f64) -> f64 {
        // integral(s(u), u=0..t)
        let mut v = self.c6 / 7.0;
        v = self.c5 / 6.0 + v * t;
        v = self.c4 / 5.0 + v * t;
        v = self.c3 / 4.0 + v * t;
        v = self.c2 / 3.0 + v * t;
        v = self.c1 / 2.0 + v * t;
        v * t * t
    }

    fn integrate_t_from_zero(&self, t: f64) -> f64 {
        // integral(s(u) * u, u=0..t)
        let mut v = self.c6 / 8.0;
        v = self.c5 / 7.0 + v * t;
        v = self.c4 / 6.0 + v * t;
        v = self.c3 / 5.0 + v * t;
        v = self.c2 / 4.0 + v * t;
        v = self.c1 / 3.0 + v * t;
        v * t * t * t
    }

    fn integrate_t2_from_zero(&self, t: f64) -> f64 {
        let mut v = self.c6 / 9.0;
        v = self.c5 / 8.0 + v * t;
        v = self.c4 / 7.0 + v * t;
        v = self.c3 / 6.0 + v * t;
        v = self.c2 / 5.0 + v * t;
        v = self.c1 / 4.0 + v * t;
        v * t.powi(4)
    }

    fn integrate_t3_from_zero(&self, t: f64) -> f64 {
        let mut v = self.c6 / 10.0;
        v = self.c5 / 9.0 + v * t;
        v = self.c4 / 8.0 + v * t;
        v = self.c3 / 7.0 + v * t;
        v = self.c2 / 6.0 + v * t;
        v = self.c1 / 5.0 + v * t;
        v * t.powi(5)
    }

    fn integrate_t4_from_zero(&self, t: f64) -> f64 {
        let mut v = self.c6 / 11.0;
        v = self.c5 / 10.0 + v * t;
        v = self.c4 / 9.0 + v * t;
        v = self.c3 / 8.0 + v * t;
        v = self.c2 / 7.0 + v * t;
        v = self.c1 / 6.0 + v * t;
        v * t.powi(6)
    }

    /// `integral(s(t), t = start..end)`, via the numerically-stabilized
    /// midpoint expansion (stable even far from the origin, unlike taking
    /// the difference of two `tn_antiderivative(0, _)` evaluations).
    pub fn integrate(&self, start: f64, end: f64) -> f64 {
        let mid = (start + end) * 0.5;
        let h = end - start;
        let h2 = h * h;

        let mut a6 = self.c6;
        let mut a5 = self.c5;
        let mut a4 = self.c4;
        let a3 = self.c3;
        let a2 = self.c2;
        let a1 = self.c1;

        let mut v = a6;
        v = a5 + v * mid;
        a6 *= h2;
        v = a4 + (5.0 / 4.0) * a6 + v * mid;
        a5 *= h2;
        v = a3 + (5.0 / 6.0) * a5 + v * mid;
        a4 *= h2;
        a6 *= h2;
        v = a2 + 0.5 * a4 + (3.0 / 16.0) * a6 + v * mid;
        v = a1 + h2 * (0.25 * a3 + (1.0 / 16.0) * a5) + v * mid;
        v = h2 * ((1.0 / 12.0) * a2 + (1.0 / 80.0) * a4 + (1.0 / 448.0) * a6) + v * mid;
        v * h
    }

    /// `copy_scaled(ratio)` — used by downstream filters (pressure advance)
    /// to combine a position term scaled by `ratio`.
    pub fn copy_scaled(&self, ratio: f64) -> SCurve {
        SCurve {
            c1: self.c1 * ratio,
            c2: self.c2 * ratio,
            c3: self.c3 * ratio,
            c4: self.c4 * ratio,
            c5: self.c5 * ratio,
            c6: self.c6 * ratio,
            total_accel_t: self.total_accel_t,
        }
    }

    /// Add `ratio` times this curve's derivative (velocity term) into `self`,
    /// in place. Used to build pressure-advance compensated position curves.
    pub fn add_deriv(&mut self, other: &SCurve, ratio: f64) {
        self.c1 += other.c2 * 2.0 * ratio;
        self.c2 += other.c3 * 3.0 * ratio;
        self.c3 += other.c4 * 4.0 * ratio;
        self.c4 += other.c5 * 5.0 * ratio;
        self.c5 += other.c6 * 6.0 * ratio;
    }

    /// Add `ratio` times this curve's second derivative (acceleration term)
    /// into `self`, in place.
    pub fn add_2nd_deriv(&mut self, other: &SCurve, ratio: f64) {
        self.c1 += other.c3 * 6.0 * ratio;
        self.c2 += other.c4 * 12.0 * ratio;
        self.c3 += other.c5 * 20.0 * ratio;
        self.c4 += other.c6 * 30.0 * ratio;
    }
}

/// accel_order ∈ {2,4,6}: the order of the Bezier acceleration profile.
pub fn fill(
    accel_order: u8,
    accel_t: f64,
    accel_offset_t: f64,
    total_accel_t: f64,
    start_accel_v: f64,
    effective_accel: f64,
) -> SCurve {
    let _ = accel_t;
    let mut s = SCurve {
        total_accel_t,
        ..Default::default()
    };
    match accel_order {
        4 => fill_bezier4(&mut s, start_accel_v, effective_accel, total_accel_t, accel_offset_t),
        6 => fill_bezier6(&mut s, start_accel_v, effective_accel, total_accel_t, accel_offset_t),
        _ => fill_bezier2(&mut s, start_accel_v, effective_accel, accel_offset_t),
    }
    s
}

fn fill_bezier2(s: &mut SCurve, start_accel_v: f64, effective_accel: f64, accel_offset_t: f64) {
    s.c2 = 0.5 * effective_accel;
    s.c1 = start_accel_v + effective_accel * accel_offset_t;
}

fn fill_bezier4(
    s: &mut SCurve,
    start_accel_v: f64,
    effective_accel: f64,
    total_accel_t: f64,
    accel_offset_t: f64,
) {
    if total_accel_t == 0.0 {
        return;
    }
    let inv_accel_t = 1.0 / total_accel_t;
    let accel_div_accel_t = effective_accel * inv_accel_t;
    let accel_div_accel_t2 = accel_div_accel_t * inv_accel_t;
    s.c4 = -0.5 * accel_div_accel_t2;
    s.c3 = accel_div_accel_t;
    s.c1 = start_accel_v;
    s.offset(accel_offset_t);
}

fn fill_bezier6(
    s: &mut SCurve,
    start_accel_v: f64,
    effective_accel: f64,
    total_accel_t: f64,
    accel_offset_t: f64,
) {
    if total_accel_t == 0.0 {
        return;
    }
    let inv_accel_t = 1.0 / total_accel_t;
    let accel_div_accel_t2 = effective_accel * inv_accel_t * inv_accel_t;
    let accel_div_accel_t3 = accel_div_accel_t2 * inv_accel_t;
    let accel_div_accel_t4 = accel_div_accel_t3 * inv_accel_t;
    s.c6 = accel_div_accel_t4;
    s.c5 = -3.0 * accel_div_accel_t3;
    s.c4 = 2.5 * accel_div_accel_t2;
    s.c1 = start_accel_v;
    s.offset(accel_offset_t);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order2_matches_closed_form() {
        let s = fill(2, 0.5, 0.0, 0.5, 10.0, 4.0);
        for i in 0..10 {
            let t = i as f64 * 0.05;
            let expect = 10.0 * t + 0.5 * 4.0 * t * t;
            assert!((s.eval(t) - expect).abs() < 1e-9);
        }
    }

    #[test]
    fn get_time_round_trips_eval() {
        let s = fill(6, 1.0, 0.0, 1.0, 0.0, 100.0);
        for i in 1..10 {
            let t = i as f64 * 0.1;
            let d = s.eval(t);
            let back = s.get_time(d);
            assert!((back - t).abs() < 1e-6, "t={t} back={back}");
        }
    }

    #[test]
    fn tn_antiderivative_zero_at_origin() {
        let s = fill(4, 1.0, 0.2, 1.0, 5.0, 30.0);
        for n in 0..=4 {
            assert_eq!(s.tn_antiderivative(n, 0.0), 0.0);
        }
    }

    #[test]
    fn integrate_matches_closed_form_order2() {
        let s = fill(2, 1.0, 0.0, 1.0, 2.0, 6.0);
        // s(t) = 2t + 3t^2; integral from 0..1 = 1 + 1 = 2
        let got = s.integrate(0.0, 1.0);
        assert!((got - 2.0).abs() < 1e-9, "got={got}");
    }

    #[test]
    fn zero_total_accel_t_yields_trivial_curve() {
        let s = fill(4, 0.0, 0.0, 0.0, 5.0, 10.0);
        assert_eq!(s.c3, 0.0);
        assert_eq!(s.c4, 0.0);
    }
}
