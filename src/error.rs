use thiserror::Error;

/// Failure kinds surfaced by the planner.
///
/// None of these are retried internally; the caller decides whether to
/// abort, re-plan, or reset the queue.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanError {
    #[error("invalid move: {0}")]
    InvalidMove(&'static str),

    #[error("logic error: non-empty delayed queue after the smoothed pass")]
    DelayedQueueNotEmpty,

    #[error("logic error: smoothed peak velocity trapezoid at the end of the move queue")]
    SmoothedPeakAtQueueEnd,

    #[error(
        "logic error: impossible move start_v={start_v:.6}, cruise_v={cruise_v:.6}, \
         end_v={end_v:.6}, accel_d={accel_d:.6}, decel_d={decel_d:.6}, move_d={move_d:.6}"
    )]
    ImpossibleMove {
        start_v: f64,
        cruise_v: f64,
        end_v: f64,
        accel_d: f64,
        decel_d: f64,
        move_d: f64,
    },

    #[error("logic error: velocity jump from {prev:.6} to {next:.6}")]
    VelocityJump { prev: f64, next: f64 },

    #[error("move queue is empty")]
    EmptyQueue,
}
