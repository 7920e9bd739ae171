pub mod accel_combiner;
pub mod accel_group;
pub mod error;
pub mod moveq;
pub mod scurve;
pub mod smoother;
pub mod trapbuild;
pub mod trapq;

pub use error::PlanError;
pub use moveq::{MoveDescriptor, MoveId, Planner};
pub use scurve::SCurve;
pub use smoother::Smoother;
pub use trapq::{Move, TrapQueue};

pub use glam;
