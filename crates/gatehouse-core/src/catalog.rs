//! Identity catalog: known residents and their reference embeddings.
//!
//! Built once from stored reference images. A resident whose image yields no
//! face is left out of the catalog and reported in [`CatalogBuild::excluded`].

use crate::analyzer::FaceAnalyzer;
use crate::store::{CatalogSource, ReferenceImage, StoreError};
use crate::types::{Embedding, Matcher, Person};
use std::collections::HashMap;

/// Why a resident could not be added to the catalog.
#[derive(Debug, Clone, PartialEq)]
pub enum ExclusionReason {
    NoFaceDetected,
    UndecodableImage(String),
    AnalyzerFailed(String),
}

#[derive(Debug, Clone)]
pub struct ExcludedPerson {
    pub id: String,
    pub name: String,
    pub reason: ExclusionReason,
}

/// Outcome of a catalog build: the usable catalog plus everyone left out.
#[derive(Debug)]
pub struct CatalogBuild {
    pub catalog: Catalog,
    pub excluded: Vec<ExcludedPerson>,
}

/// Result of matching a candidate embedding against the catalog with a threshold.
#[derive(Debug, Clone, Copy)]
pub enum Identification<'a> {
    Accepted { person: &'a Person, distance: f32 },
    /// No catalog entry is close enough. `distance` is `None` for an empty catalog.
    Rejected { distance: Option<f32> },
}

#[derive(Debug, Default)]
pub struct Catalog {
    people: Vec<Person>,
    by_id: HashMap<String, usize>,
}

impl Catalog {
    /// Build a catalog from already-encoded people. The first entry wins on a duplicate id.
    pub fn new(people: Vec<Person>) -> Self {
        let mut kept = Vec::with_capacity(people.len());
        let mut by_id = HashMap::with_capacity(people.len());
        for person in people {
            if by_id.contains_key(&person.id) {
                tracing::warn!(person = %person.id, "duplicate resident id in catalog; ignoring");
                continue;
            }
            by_id.insert(person.id.clone(), kept.len());
            kept.push(person);
        }
        Self { people: kept, by_id }
    }

    /// Load every resident from `source` and encode their reference images.
    pub fn load<S, A>(source: &S, analyzer: &mut A) -> Result<CatalogBuild, StoreError>
    where
        S: CatalogSource + ?Sized,
        A: FaceAnalyzer + ?Sized,
    {
        let residents = source.list_residents()?;
        Ok(Self::build(residents, analyzer))
    }

    /// Encode reference images, keeping the first detected face of each.
    pub fn build<A>(residents: Vec<ReferenceImage>, analyzer: &mut A) -> CatalogBuild
    where
        A: FaceAnalyzer + ?Sized,
    {
        let mut people = Vec::with_capacity(residents.len());
        let mut excluded = Vec::new();

        for resident in residents {
            match encode_reference(&resident, analyzer) {
                Ok(embedding) => people.push(Person {
                    id: resident.id,
                    name: resident.name,
                    embedding,
                }),
                Err(reason) => {
                    tracing::warn!(
                        person = %resident.id,
                        name = %resident.name,
                        ?reason,
                        "resident excluded from catalog"
                    );
                    excluded.push(ExcludedPerson {
                        id: resident.id,
                        name: resident.name,
                        reason,
                    });
                }
            }
        }

        let catalog = Catalog::new(people);
        tracing::info!(
            loaded = catalog.len(),
            excluded = excluded.len(),
            "catalog built"
        );
        CatalogBuild { catalog, excluded }
    }

    pub fn get(&self, id: &str) -> Option<&Person> {
        self.by_id.get(id).map(|&i| &self.people[i])
    }

    pub fn people(&self) -> &[Person] {
        &self.people
    }

    pub fn len(&self) -> usize {
        self.people.len()
    }

    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
    }

    /// Accept the closest person only when their distance is strictly below `threshold`.
    pub fn identify<M>(&self, matcher: &M, candidate: &Embedding, threshold: f32) -> Identification<'_>
    where
        M: Matcher + ?Sized,
    {
        match matcher.best_match(candidate, &self.people) {
            Some(best) if best.distance < threshold => Identification::Accepted {
                person: &self.people[best.index],
                distance: best.distance,
            },
            Some(best) => Identification::Rejected {
                distance: Some(best.distance),
            },
            None => Identification::Rejected { distance: None },
        }
    }
}

fn encode_reference<A>(resident: &ReferenceImage, analyzer: &mut A) -> Result<Embedding, ExclusionReason>
where
    A: FaceAnalyzer + ?Sized,
{
    let image = image::load_from_memory(&resident.image)
        .map_err(|e| ExclusionReason::UndecodableImage(e.to_string()))?
        .to_rgb8();

    let detections = analyzer
        .analyze(&image)
        .map_err(|e| ExclusionReason::AnalyzerFailed(e.to_string()))?;

    detections
        .into_iter()
        .next()
        .map(|d| d.embedding)
        .ok_or(ExclusionReason::NoFaceDetected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{AnalyzerError, Detection};
    use crate::types::{EuclideanMatcher, FaceRegion};
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;

    /// Encodes the red channel of the top-left pixel; a black pixel means "no face".
    struct PixelAnalyzer;

    impl FaceAnalyzer for PixelAnalyzer {
        fn analyze(&mut self, image: &RgbImage) -> Result<Vec<Detection>, AnalyzerError> {
            let red = image.get_pixel(0, 0)[0];
            if red == 0 {
                return Ok(Vec::new());
            }
            let region = FaceRegion { x: 0.0, y: 0.0, width: 1.0, height: 1.0, confidence: 1.0 };
            Ok(vec![Detection {
                region,
                embedding: Embedding::new(vec![red as f32 / 255.0]),
            }])
        }
    }

    fn png(red: u8) -> Vec<u8> {
        let img = RgbImage::from_pixel(2, 2, image::Rgb([red, 0, 0]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn resident(id: &str, image: Vec<u8>) -> ReferenceImage {
        ReferenceImage { id: id.into(), name: format!("Resident {id}"), image }
    }

    fn person(id: &str, value: f32) -> Person {
        Person { id: id.into(), name: id.to_uppercase(), embedding: Embedding::new(vec![value]) }
    }

    #[test]
    fn test_build_excludes_faceless_and_undecodable() {
        let residents = vec![
            resident("R1", png(255)),
            resident("R2", png(0)),
            resident("R3", b"not an image".to_vec()),
        ];
        let build = Catalog::build(residents, &mut PixelAnalyzer);

        assert_eq!(build.catalog.len(), 1);
        assert!(build.catalog.get("R1").is_some());
        assert_eq!(build.excluded.len(), 2);
        assert_eq!(build.excluded[0].id, "R2");
        assert_eq!(build.excluded[0].reason, ExclusionReason::NoFaceDetected);
        assert!(matches!(build.excluded[1].reason, ExclusionReason::UndecodableImage(_)));
    }

    #[test]
    fn test_build_preserves_order() {
        let residents = vec![resident("B", png(10)), resident("A", png(20))];
        let build = Catalog::build(residents, &mut PixelAnalyzer);
        let ids: Vec<_> = build.catalog.people().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["B", "A"]);
    }

    #[test]
    fn test_duplicate_id_keeps_first() {
        let catalog = Catalog::new(vec![person("x", 0.1), person("x", 0.9)]);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("x").unwrap().embedding.values, vec![0.1]);
    }

    #[test]
    fn test_identify_threshold_is_strict() {
        let catalog = Catalog::new(vec![person("r1", 0.0)]);
        let candidate = Embedding::new(vec![0.61]);
        match catalog.identify(&EuclideanMatcher, &candidate, 0.6) {
            Identification::Rejected { distance } => {
                assert!((distance.unwrap() - 0.61).abs() < 1e-6)
            }
            other => panic!("expected rejection, got {other:?}"),
        }

        let candidate = Embedding::new(vec![0.59]);
        match catalog.identify(&EuclideanMatcher, &candidate, 0.6) {
            Identification::Accepted { person, .. } => assert_eq!(person.id, "r1"),
            other => panic!("expected acceptance, got {other:?}"),
        }
    }

    #[test]
    fn test_identify_empty_catalog_rejects() {
        let catalog = Catalog::default();
        let candidate = Embedding::new(vec![0.0]);
        assert!(matches!(
            catalog.identify(&EuclideanMatcher, &candidate, 0.6),
            Identification::Rejected { distance: None }
        ));
    }
}
