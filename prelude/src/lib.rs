#[cfg(feature = "profile")]
pub extern crate flame;
extern crate num_traits;

#[allow(non_camel_case_types)]
pub type float = f64;
pub use std::f64::consts::PI;
pub use std::f64::INFINITY;

/// Numeric types the model and cost can be evaluated over.
///
/// `f64` is the obvious implementor. Any forward-mode dual number that implements
/// `num_traits::Float` and can be built from an `f64` constant works as well, which is how
/// derivatives of the constraint residuals can be checked or generated without the model
/// code knowing about them.
pub trait Real: num_traits::Float + From<float> {}

impl<T: num_traits::Float + From<float>> Real for T {}

pub fn min<T: Copy + PartialOrd>(a: T, b: T) -> T {
    if b < a {
        b
    } else {
        a
    }
}

pub fn max<T: Copy + PartialOrd>(a: T, b: T) -> T {
    if b > a {
        b
    } else {
        a
    }
}

pub fn clamp(v: float, lo: float, hi: float) -> float {
    max(lo, min(hi, v))
}

pub fn phase_unwrap(a: float, mut b: float) -> float {
    if a.is_infinite() || b.is_infinite() {
        return b;
    }
    while b > a + PI {
        b -= 2.0 * PI;
    }
    while b < a - PI {
        b += 2.0 * PI;
    }
    b
}

/// Infinity norm of a slice, zero when empty.
pub fn norm_inf(v: &[float]) -> float {
    v.iter().fold(0.0, |acc, &x| max(acc, x.abs()))
}

pub fn norm_1(v: &[float]) -> float {
    v.iter().map(|x| x.abs()).sum()
}

pub fn dot(a: &[float], b: &[float]) -> float {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(a, b)| a * b).sum()
}

#[cfg(feature = "profile")]
pub use flame::SpanGuard;

#[cfg(not(feature = "profile"))]
pub struct SpanGuard;

#[cfg(not(feature = "profile"))]
impl SpanGuard {
    pub fn end(self) {}
}

/// Starts a profiling span that ends when the guard is dropped.
#[cfg(feature = "profile")]
pub fn start_guard(name: &'static str) -> SpanGuard {
    flame::start_guard(name)
}

#[cfg(not(feature = "profile"))]
pub fn start_guard(_name: &'static str) -> SpanGuard {
    SpanGuard
}

#[cfg(feature = "profile")]
pub fn span_of<R, F: FnOnce() -> R>(name: &'static str, f: F) -> R {
    flame::span_of(name, f)
}

#[cfg(not(feature = "profile"))]
pub fn span_of<R, F: FnOnce() -> R>(_name: &'static str, f: F) -> R {
    f()
}
