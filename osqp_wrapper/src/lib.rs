use osqp::Problem as InnerProblem;
pub use osqp::{Settings, SetupError, Status};
use std::time::Duration;

use prelude::*;

/// An OSQP problem whose matrices are built with the `sparse` crate.
///
/// `P` must only contain the upper triangle of the quadratic cost. Updates to `A` must keep
/// the sparsity pattern the problem was created with.
pub struct Problem {
    inner: InnerProblem,
}

impl Problem {
    #[allow(non_snake_case)]
    pub fn new(
        P: &sparse::CscMatrix,
        q: &[float],
        A: &sparse::CscMatrix,
        l: &[float],
        u: &[float],
        settings: &Settings,
    ) -> Result<Problem, SetupError> {
        let _guard = start_guard("osqp setup");
        debug_assert!(P.is_upper_triangular());
        Ok(Problem {
            inner: InnerProblem::new(convert_sparse(P), q, convert_sparse(A), l, u, settings)?,
        })
    }

    pub fn update_lin_cost(&mut self, q: &[float]) {
        let _guard = start_guard("osqp update_lin_cost");
        self.inner.update_lin_cost(q)
    }

    pub fn update_bounds(&mut self, l: &[float], u: &[float]) {
        let _guard = start_guard("osqp update_bounds");
        self.inner.update_bounds(l, u)
    }

    #[allow(non_snake_case)]
    pub fn update_A(&mut self, A: &sparse::CscMatrix) {
        let _guard = start_guard("osqp update_A");
        self.inner.update_A(convert_sparse(A))
    }

    pub fn update_time_limit(&mut self, time_limit: Option<Duration>) {
        self.inner.update_time_limit(time_limit)
    }

    pub fn solve(&mut self) -> Status {
        let _guard = start_guard("osqp solve");
        self.inner.solve()
    }
}

pub fn convert_sparse(this: &sparse::CscMatrix) -> osqp::CscMatrix {
    let (nrows, ncols) = this.shape();
    osqp::CscMatrix {
        nrows,
        ncols,
        indptr: this.indptr().into(),
        indices: this.indices().into(),
        data: this.data().into(),
    }
}
