use std::ops::Deref;

use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

/// Non-empty vector of finite values produced by an embedding model.
///
/// Dimensionality is checked against other vectors at the point of use;
/// vectors of differing length are never truncated or padded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct FeatureVector(Vec<f64>);

impl FeatureVector {
    pub fn new(values: Vec<f64>) -> AppResult<Self> {
        if values.is_empty() {
            return Err(AppError::InvalidVector("vector has no components".into()));
        }
        if let Some(idx) = values.iter().position(|value| !value.is_finite()) {
            return Err(AppError::InvalidVector(format!(
                "component {idx} is not a finite number"
            )));
        }
        Ok(Self(values))
    }

    /// Builds a vector and requires it to have exactly `dimension` components.
    pub fn with_dimension(values: Vec<f64>, dimension: usize) -> AppResult<Self> {
        let vector = Self::new(values)?;
        vector.ensure_dimension(dimension)?;
        Ok(vector)
    }

    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    pub fn ensure_dimension(&self, expected: usize) -> AppResult<()> {
        ensure_same_dimension(expected, self.dimension())
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }
}

impl Deref for FeatureVector {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        &self.0
    }
}

impl TryFrom<Vec<f64>> for FeatureVector {
    type Error = AppError;

    fn try_from(values: Vec<f64>) -> AppResult<Self> {
        Self::new(values)
    }
}

impl From<FeatureVector> for Vec<f64> {
    fn from(vector: FeatureVector) -> Self {
        vector.0
    }
}

pub fn norm(values: &[f64]) -> f64 {
    values.iter().map(|value| value * value).sum::<f64>().sqrt()
}

/// Euclidean norm for use as a divisor.
pub fn nonzero_norm(values: &[f64]) -> AppResult<f64> {
    let magnitude = norm(values);
    if magnitude <= f64::EPSILON {
        return Err(AppError::DegenerateVector);
    }
    Ok(magnitude)
}

pub fn dot(lhs: &[f64], rhs: &[f64]) -> AppResult<f64> {
    ensure_same_dimension(lhs.len(), rhs.len())?;
    Ok(lhs.iter().zip(rhs.iter()).map(|(l, r)| l * r).sum())
}

pub fn cosine_similarity(lhs: &[f64], rhs: &[f64]) -> AppResult<f64> {
    let dot = dot(lhs, rhs)?;
    let norm_lhs = nonzero_norm(lhs)?;
    let norm_rhs = nonzero_norm(rhs)?;

    // Rounding can push identical vectors a hair past 1.
    Ok((dot / (norm_lhs * norm_rhs)).clamp(-1.0, 1.0))
}

fn ensure_same_dimension(expected: usize, found: usize) -> AppResult<()> {
    if expected != found {
        return Err(AppError::DimensionMismatch { expected, found });
    }
    Ok(())
}
