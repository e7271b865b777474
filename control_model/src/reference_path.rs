use prelude::*;

/// Cubic `f(x) = c0 + c1 x + c2 x^2 + c3 x^3` describing the path in the vehicle frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ReferencePath {
    coeffs: [float; 4],
}

impl ReferencePath {
    pub fn new(coeffs: [float; 4]) -> ReferencePath {
        ReferencePath { coeffs }
    }

    /// Builds a path from up to four coefficients, lowest order first. Missing higher order
    /// coefficients are zero.
    pub fn from_slice(coeffs: &[float]) -> ReferencePath {
        assert!(coeffs.len() <= 4, "reference path is at most cubic");
        let mut padded = [0.0; 4];
        padded[..coeffs.len()].copy_from_slice(coeffs);
        ReferencePath::new(padded)
    }

    pub fn coeffs(&self) -> &[float; 4] {
        &self.coeffs
    }

    fn coeffs_as<T: Real>(&self) -> [T; 4] {
        let [c0, c1, c2, c3] = self.coeffs;
        [c0.into(), c1.into(), c2.into(), c3.into()]
    }

    pub fn evaluate<T: Real>(&self, x: T) -> T {
        let [c0, c1, c2, c3] = self.coeffs_as::<T>();
        ((c3 * x + c2) * x + c1) * x + c0
    }

    pub fn derivative<T: Real>(&self, x: T) -> T {
        let [_, c1, c2, c3] = self.coeffs_as::<T>();
        let (two, three): (T, T) = ((2.0 as float).into(), (3.0 as float).into());
        (three * c3 * x + two * c2) * x + c1
    }

    pub fn second_derivative<T: Real>(&self, x: T) -> T {
        let [_, _, c2, c3] = self.coeffs_as::<T>();
        let (two, six): (T, T) = ((2.0 as float).into(), (6.0 as float).into());
        six * c3 * x + two * c2
    }

    /// Angle of the path tangent at `x`.
    pub fn heading<T: Real>(&self, x: T) -> T {
        self.derivative(x).atan()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_cubic_and_derivatives() {
        let path = ReferencePath::new([1.0, -2.0, 0.5, 0.25]);
        let x = 2.0;

        assert_eq!(path.evaluate(x), 1.0 - 4.0 + 2.0 + 2.0);
        assert_eq!(path.derivative(x), -2.0 + 2.0 + 3.0);
        assert_eq!(path.second_derivative(x), 1.0 + 3.0);
        assert!((path.heading(x) - (3.0 as float).atan()).abs() < 1e-12);
    }

    #[test]
    fn short_coefficients_are_padded() {
        let path = ReferencePath::from_slice(&[3.0, 0.5]);
        assert_eq!(path.coeffs(), &[3.0, 0.5, 0.0, 0.0]);
        assert_eq!(path.evaluate(4.0), 5.0);
        assert_eq!(path.second_derivative(4.0), 0.0);
    }
}
