//! Axis aligned bounding boxes, used to compute the reconstruction domain and per-splat influence regions.

use crate::numeric_types::Real;
use nalgebra::Vector3;
use rayon::prelude::*;

/// An axis aligned bounding box in 3D
#[derive(Clone, Debug, PartialEq)]
pub struct AxisAlignedBoundingBox3d<R: Real> {
    min: Vector3<R>,
    max: Vector3<R>,
}

impl<R: Real> AxisAlignedBoundingBox3d<R> {
    /// Constructs a new AABB from the given min/max corners, does not check that min <= max
    pub fn new(min: Vector3<R>, max: Vector3<R>) -> Self {
        Self { min, max }
    }

    /// Constructs the smallest AABB enclosing a single point (zero extent)
    pub fn from_point(point: Vector3<R>) -> Self {
        Self::new(point, point)
    }

    /// Computes the smallest AABB enclosing all given points, sequentially
    pub fn from_points(points: &[Vector3<R>]) -> Self {
        points
            .iter()
            .copied()
            .fold(None, |acc: Option<Self>, p| match acc {
                Some(mut aabb) => {
                    aabb.extend(p);
                    Some(aabb)
                }
                None => Some(Self::from_point(p)),
            })
            .unwrap_or_else(|| Self::from_point(Vector3::zeros()))
    }

    /// Computes the smallest AABB enclosing all given points, using multiple threads
    pub fn from_points_par(points: &[Vector3<R>]) -> Self {
        points
            .par_iter()
            .copied()
            .fold(
                || None,
                |acc: Option<Self>, p| match acc {
                    Some(mut aabb) => {
                        aabb.extend(p);
                        Some(aabb)
                    }
                    None => Some(Self::from_point(p)),
                },
            )
            .reduce(
                || None,
                |a, b| match (a, b) {
                    (Some(mut a), Some(b)) => {
                        a.join(&b);
                        Some(a)
                    }
                    (Some(a), None) => Some(a),
                    (None, Some(b)) => Some(b),
                    (None, None) => None,
                },
            )
            .unwrap_or_else(|| Self::from_point(Vector3::zeros()))
    }

    /// Returns the lower corner of the AABB
    pub fn min(&self) -> &Vector3<R> {
        &self.min
    }

    /// Returns the upper corner of the AABB
    pub fn max(&self) -> &Vector3<R> {
        &self.max
    }

    /// Extends the AABB in-place to also contain the given point
    pub fn extend(&mut self, point: Vector3<R>) {
        for i in 0..3 {
            if point[i] < self.min[i] {
                self.min[i] = point[i];
            }
            if point[i] > self.max[i] {
                self.max[i] = point[i];
            }
        }
    }

    /// Extends the AABB in-place so that it also contains the other AABB
    pub fn join(&mut self, other: &Self) {
        self.extend(other.min);
        self.extend(other.max);
    }

    /// Grows the AABB uniformly by the given margin in every direction
    pub fn grow_uniformly(&mut self, margin: R) {
        let margin_vec = Vector3::new(margin, margin, margin);
        self.min -= margin_vec;
        self.max += margin_vec;
    }

    /// Returns whether this AABB intersects the other, using closed intervals on every axis
    pub fn intersects(&self, other: &Self) -> bool {
        (0..3).all(|i| self.min[i] <= other.max[i] && other.min[i] <= self.max[i])
    }

    /// Tries to convert this AABB from one `Real` type to another, returns `None` if conversion fails
    pub fn try_convert<T: Real>(&self) -> Option<AxisAlignedBoundingBox3d<T>> {
        Some(AxisAlignedBoundingBox3d {
            min: Vector3::new(
                self.min.x.try_convert()?,
                self.min.y.try_convert()?,
                self.min.z.try_convert()?,
            ),
            max: Vector3::new(
                self.max.x.try_convert()?,
                self.max.y.try_convert()?,
                self.max.z.try_convert()?,
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_points_matches_manual_bounds() {
        let pts = vec![
            Vector3::new(1.0, -2.0, 0.5),
            Vector3::new(-1.0, 3.0, 0.0),
            Vector3::new(0.0, 0.0, 2.0),
        ];
        let aabb = AxisAlignedBoundingBox3d::from_points(&pts);
        assert_eq!(*aabb.min(), Vector3::new(-1.0, -2.0, 0.0));
        assert_eq!(*aabb.max(), Vector3::new(1.0, 3.0, 2.0));
    }

    #[test]
    fn par_matches_sequential() {
        let pts: Vec<_> = (0..1000)
            .map(|i| Vector3::new(i as f64, (i * 2) as f64 % 17.0, -(i as f64)))
            .collect();
        let seq = AxisAlignedBoundingBox3d::from_points(&pts);
        let par = AxisAlignedBoundingBox3d::from_points_par(&pts);
        assert_eq!(seq, par);
    }

    #[test]
    fn intersects_is_symmetric() {
        let a = AxisAlignedBoundingBox3d::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 1.0, 1.0));
        let b = AxisAlignedBoundingBox3d::new(Vector3::new(0.5, 0.5, 0.5), Vector3::new(2.0, 2.0, 2.0));
        let c = AxisAlignedBoundingBox3d::new(Vector3::new(2.0, 2.0, 2.0), Vector3::new(3.0, 3.0, 3.0));
        assert!(a.intersects(&b));
        assert!(b.intersects(&a));
        assert!(!a.intersects(&c));
    }
}
