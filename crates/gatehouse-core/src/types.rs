use serde::{Deserialize, Serialize};

/// Pixel region of a detected face, in the coordinates of the image it was found in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl FaceRegion {
    /// Map the region into an image `factor` times larger (e.g. 4.0 after a 0.25 downscale).
    pub fn scaled(&self, factor: f32) -> FaceRegion {
        FaceRegion {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
            confidence: self.confidence,
        }
    }
}

/// Face embedding vector in the adapter's embedding space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// A known resident, immutable for the lifetime of the catalog it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    pub id: String,
    pub name: String,
    pub embedding: Embedding,
}

/// Closest catalog entry for a candidate embedding, before any threshold is applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestMatch {
    pub index: usize,
    pub distance: f32,
}

/// Strategy for scoring a candidate embedding against the catalog.
pub trait Matcher {
    /// Return the closest person, or `None` when there is nobody to compare against.
    fn best_match(&self, candidate: &Embedding, people: &[Person]) -> Option<BestMatch>;
}

/// Euclidean-distance matcher. Lowest distance wins; on a tie the earlier entry is kept.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn best_match(&self, candidate: &Embedding, people: &[Person]) -> Option<BestMatch> {
        let mut best: Option<BestMatch> = None;

        for (index, person) in people.iter().enumerate() {
            let distance = candidate.euclidean_distance(&person.embedding);
            if distance.is_nan() {
                continue;
            }
            let closer = match best {
                None => true,
                Some(prev) => distance < prev.distance,
            };
            if closer {
                best = Some(BestMatch { index, distance });
            }
        }

        best
    }
}
