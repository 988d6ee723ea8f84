//! Game solvers for the op-challenger: the bisection tree algebra, the local game graph, the
//! [fault::Solver] and the [trace::TraceProvider]s it consults.

pub mod fault;
pub mod trace;
