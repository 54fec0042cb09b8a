use crate::error::{Error, Result};

/// Tolerance used when checking that a vector has unit length.
pub const UNIT_NORM_TOLERANCE: f32 = 1e-3;

/// Turns a batch of texts into fixed-dimension embedding vectors.
///
/// Implementations return one vector per input text, in input order.
/// Callers normalize the output with [`normalize_all`] before storing it.
pub trait Embedder {
    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

impl<E: Embedder + ?Sized> Embedder for Box<E> {
    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        (**self).embed(texts)
    }
}

impl<E: Embedder + ?Sized> Embedder for &mut E {
    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        (**self).embed(texts)
    }
}

/// Inner product of two equal-length vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Scale `vector` to unit L2 length in place.
///
/// Fails for zero or non-finite vectors, which cannot be normalized.
///
/// # Examples
///
/// ```
/// use docrag::embedding::normalize;
///
/// let mut v = vec![3.0, 4.0];
/// normalize(&mut v).unwrap();
/// assert!((v[0] - 0.6).abs() < 1e-6);
/// assert!((v[1] - 0.8).abs() < 1e-6);
/// ```
pub fn normalize(vector: &mut [f32]) -> Result<()> {
    let norm = dot(vector, vector).sqrt();
    if !norm.is_finite() || norm == 0.0 {
        return Err(Error::InvalidEmbedding(format!(
            "cannot normalize vector with norm {norm}"
        )));
    }
    for x in vector.iter_mut() {
        *x /= norm;
    }
    Ok(())
}

/// Normalize every vector in a batch.
pub fn normalize_all(vectors: &mut [Vec<f32>]) -> Result<()> {
    vectors.iter_mut().try_for_each(|v| normalize(v))
}

/// Whether `vector` is finite and has unit length within tolerance.
pub fn is_unit(vector: &[f32]) -> bool {
    vector.iter().all(|x| x.is_finite())
        && (dot(vector, vector).sqrt() - 1.0).abs() <= UNIT_NORM_TOLERANCE
}

/// Embed a single query text and normalize it.
pub fn embed_query<E: Embedder + ?Sized>(
    embedder: &mut E,
    query: &str,
) -> Result<Vec<f32>> {
    let mut vectors = embedder.embed(&[query.to_string()])?;
    if vectors.len() != 1 {
        return Err(Error::Model(format!(
            "expected 1 query embedding, got {}",
            vectors.len()
        )));
    }
    let mut vector = vectors.swap_remove(0);
    normalize(&mut vector)?;
    Ok(vector)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Constant(Vec<f32>);

    impl Embedder for Constant {
        fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| self.0.clone()).collect())
        }
    }

    #[test]
    fn normalize_produces_unit_vectors() {
        let mut batch = vec![vec![1.0, 1.0, 1.0, 1.0], vec![0.0, 5.0, 0.0, 0.0]];
        normalize_all(&mut batch).unwrap();
        assert!(batch.iter().all(|v| is_unit(v)));
        assert_eq!(batch[1], vec![0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn normalize_rejects_zero_vector() {
        let mut v = vec![0.0, 0.0];
        assert!(matches!(
            normalize(&mut v),
            Err(Error::InvalidEmbedding(_))
        ));
    }

    #[test]
    fn normalize_rejects_nan() {
        let mut v = vec![f32::NAN, 1.0];
        assert!(normalize(&mut v).is_err());
    }

    #[test]
    fn is_unit_detects_unnormalized() {
        assert!(is_unit(&[1.0, 0.0]));
        assert!(!is_unit(&[2.0, 0.0]));
        assert!(!is_unit(&[f32::INFINITY, 0.0]));
    }

    #[test]
    fn embed_query_normalizes() {
        let mut embedder = Constant(vec![0.0, 2.0]);
        let v = embed_query(&mut embedder, "hello").unwrap();
        assert_eq!(v, vec![0.0, 1.0]);
    }

    #[test]
    fn boxed_embedder_delegates() {
        let mut boxed: Box<dyn Embedder> = Box::new(Constant(vec![1.0]));
        let out = boxed.embed(&["a".into(), "b".into()]).unwrap();
        assert_eq!(out.len(), 2);
    }
}
