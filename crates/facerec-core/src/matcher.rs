//! Descriptor comparison: distances, tolerance matching, best match,
//! averaging and normalization.

use crate::types::{Descriptor, NamedDescriptor};

/// Distance at or below which two descriptors are taken to be the same person.
pub const DEFAULT_TOLERANCE: f64 = 0.6;

fn effective_tolerance(tolerance: f64) -> f64 {
    if tolerance > 0.0 {
        tolerance
    } else {
        DEFAULT_TOLERANCE
    }
}

/// Euclidean distance between two descriptors.
pub fn face_distance(a: &Descriptor, b: &Descriptor) -> f64 {
    a.distance(b)
}

/// Distance from `probe` to every known descriptor, in gallery order.
pub fn face_distances(known: &[Descriptor], probe: &Descriptor) -> Vec<f64> {
    known.iter().map(|k| k.distance(probe)).collect()
}

/// `true` where the gallery entry lies within `tolerance` of `probe`.
/// A non-positive tolerance means [`DEFAULT_TOLERANCE`].
pub fn compare_faces(known: &[Descriptor], probe: &Descriptor, tolerance: f64) -> Vec<bool> {
    compare_faces_with_distances(known, probe, tolerance).0
}

/// Like [`compare_faces`], also returning the distances.
pub fn compare_faces_with_distances(
    known: &[Descriptor],
    probe: &Descriptor,
    tolerance: f64,
) -> (Vec<bool>, Vec<f64>) {
    let tolerance = effective_tolerance(tolerance);
    let distances = face_distances(known, probe);
    let matches = distances.iter().map(|&d| d <= tolerance).collect();
    (matches, distances)
}

/// Position and distance of the closest gallery entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestMatch {
    pub index: usize,
    pub distance: f64,
}

/// Closest gallery entry within `tolerance`, or `None`. Ties go to the
/// earliest entry. A non-positive tolerance means [`DEFAULT_TOLERANCE`].
pub fn find_best_match(
    known: &[Descriptor],
    probe: &Descriptor,
    tolerance: f64,
) -> Option<BestMatch> {
    let tolerance = effective_tolerance(tolerance);
    let mut best: Option<BestMatch> = None;

    for (index, k) in known.iter().enumerate() {
        let distance = k.distance(probe);
        if distance.is_nan() || distance > tolerance {
            continue;
        }
        if best.map_or(true, |b| distance < b.distance) {
            best = Some(BestMatch { index, distance });
        }
    }

    best
}

/// Component-wise mean. An empty input yields the zero descriptor.
pub fn average_encoding(encodings: &[Descriptor]) -> Descriptor {
    let mut avg = Descriptor::zeros();
    if encodings.is_empty() {
        return avg;
    }

    for e in encodings {
        for (acc, v) in avg.values_mut().iter_mut().zip(e.iter()) {
            *acc += v;
        }
    }

    let n = encodings.len() as f64;
    for v in avg.values_mut().iter_mut() {
        *v /= n;
    }
    avg
}

/// Scale to unit Euclidean norm. A zero vector is returned unchanged.
pub fn normalize_encoding(encoding: &Descriptor) -> Descriptor {
    let magnitude = encoding.magnitude();
    if magnitude == 0.0 {
        return encoding.clone();
    }

    let mut out = encoding.clone();
    for v in out.values_mut().iter_mut() {
        *v /= magnitude;
    }
    out
}

/// Result of matching a probe against a named gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Distance to the closest gallery entry, matched or not. `None` for an
    /// empty gallery.
    pub distance: Option<f64>,
    /// Gallery position of the match.
    pub index: Option<usize>,
    /// Name of the matched record.
    pub name: Option<String>,
}

/// Strategy for comparing a probe descriptor against a gallery of known faces.
pub trait Matcher {
    fn compare(&self, probe: &Descriptor, gallery: &[NamedDescriptor], tolerance: f64)
        -> MatchResult;
}

/// Euclidean-distance matcher over the whole gallery.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        probe: &Descriptor,
        gallery: &[NamedDescriptor],
        tolerance: f64,
    ) -> MatchResult {
        let tolerance = effective_tolerance(tolerance);
        let closest = gallery
            .iter()
            .map(|g| g.encoding.distance(probe))
            .enumerate()
            .filter(|(_, d)| !d.is_nan())
            .fold(None, |best: Option<(usize, f64)>, (i, d)| match best {
                Some((_, bd)) if bd <= d => best,
                _ => Some((i, d)),
            });

        match closest {
            Some((idx, distance)) if distance <= tolerance => MatchResult {
                matched: true,
                distance: Some(distance),
                index: Some(idx),
                name: Some(gallery[idx].name.clone()),
            },
            _ => MatchResult {
                matched: false,
                distance: closest.map(|(_, d)| d),
                index: None,
                name: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DESCRIPTOR_LEN;

    fn filled(v: f64) -> Descriptor {
        Descriptor::new([v; DESCRIPTOR_LEN])
    }

    /// Zero everywhere except the first component.
    fn axis(v: f64) -> Descriptor {
        let mut d = Descriptor::zeros();
        d[0] = v;
        d
    }

    fn ramp() -> Descriptor {
        let mut d = Descriptor::zeros();
        for (i, v) in d.values_mut().iter_mut().enumerate() {
            *v = (i as f64 - 64.0) / 100.0;
        }
        d
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        let a = ramp();
        assert_eq!(face_distance(&a, &a), 0.0);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = ramp();
        let b = filled(0.25);
        assert_eq!(face_distance(&a, &b), face_distance(&b, &a));
        assert!(face_distance(&a, &b) > 0.0);
    }

    #[test]
    fn test_distance_value() {
        // 128 components each differing by 0.5 → sqrt(128 * 0.25)
        let d = face_distance(&filled(0.0), &filled(0.5));
        assert!((d - (32.0f64).sqrt()).abs() < 1e-12, "got {d}");
    }

    #[test]
    fn test_face_distances_order_and_empty() {
        let probe = axis(0.0);
        assert_eq!(face_distances(&[axis(0.3), axis(0.1)], &probe), vec![0.3, 0.1]);
        assert!(face_distances(&[], &probe).is_empty());
    }

    #[test]
    fn test_compare_faces_boundary_inclusive() {
        let probe = axis(0.0);
        let known = [axis(0.6), axis(0.6000001), axis(0.2)];
        assert_eq!(compare_faces(&known, &probe, 0.0), vec![true, false, true]);
        assert_eq!(compare_faces(&known, &probe, -1.0), vec![true, false, true]);
        assert_eq!(compare_faces(&known, &probe, 0.1), vec![false, false, false]);
    }

    #[test]
    fn test_compare_faces_with_distances() {
        let (matches, distances) = compare_faces_with_distances(&[axis(1.0)], &axis(0.0), 0.6);
        assert_eq!(matches, vec![false]);
        assert_eq!(distances, vec![1.0]);
    }

    #[test]
    fn test_best_match_first_of_ties() {
        let probe = axis(0.0);
        let known = [axis(0.9), axis(0.3), axis(-0.3)];
        let best = find_best_match(&known, &probe, 0.6).unwrap();
        assert_eq!(best.index, 1);
        assert!((best.distance - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_best_match_none_when_all_exceed() {
        let known = [axis(0.9), axis(1.5)];
        assert_eq!(find_best_match(&known, &axis(0.0), 0.6), None);
    }

    #[test]
    fn test_best_match_empty_gallery() {
        assert_eq!(find_best_match(&[], &axis(0.0), 0.6), None);
    }

    #[test]
    fn test_best_match_exact_at_index_zero() {
        let probe = ramp();
        let best = find_best_match(&[ramp(), axis(5.0)], &probe, 0.6);
        assert_eq!(best, Some(BestMatch { index: 0, distance: 0.0 }));
    }

    #[test]
    fn test_best_match_skips_nan_distance() {
        let mut broken = axis(0.0);
        broken[0] = f64::NAN;
        let probe = axis(0.0);
        assert_eq!(compare_faces(&[broken.clone()], &probe, 0.6), vec![false]);
        assert_eq!(find_best_match(&[broken.clone()], &probe, 0.6), None);

        let best = find_best_match(&[broken, axis(0.2)], &probe, 0.6).unwrap();
        assert_eq!(best.index, 1);
    }

    #[test]
    fn test_average_single_and_empty() {
        assert_eq!(average_encoding(&[ramp()]), ramp());
        assert_eq!(average_encoding(&[]), Descriptor::zeros());
    }

    #[test]
    fn test_average_mean() {
        let avg = average_encoding(&[filled(1.0), filled(2.0), filled(6.0)]);
        assert!(avg.iter().all(|&v| (v - 3.0).abs() < 1e-12));
    }

    #[test]
    fn test_normalize_unit_length() {
        let n = normalize_encoding(&filled(3.0));
        assert!((n.magnitude() - 1.0).abs() < 1e-12, "norm {}", n.magnitude());
        let n = normalize_encoding(&ramp());
        assert!((n.magnitude() - 1.0).abs() < 1e-12, "norm {}", n.magnitude());
    }

    #[test]
    fn test_normalize_zero_unchanged() {
        assert_eq!(normalize_encoding(&Descriptor::zeros()), Descriptor::zeros());
    }

    #[test]
    fn test_matcher_picks_closest_named() {
        let gallery = vec![
            NamedDescriptor::new("far", axis(0.5)),
            NamedDescriptor::new("near", axis(0.1)),
            NamedDescriptor::new("tie", axis(-0.1)),
        ];
        let result = EuclideanMatcher.compare(&axis(0.0), &gallery, 0.6);
        assert!(result.matched);
        assert_eq!(result.index, Some(1));
        assert_eq!(result.name.as_deref(), Some("near"));
    }

    #[test]
    fn test_matcher_no_match_reports_distance() {
        let gallery = vec![NamedDescriptor::new("other", axis(2.0))];
        let result = EuclideanMatcher.compare(&axis(0.0), &gallery, 0.6);
        assert!(!result.matched);
        assert_eq!(result.distance, Some(2.0));
        assert_eq!(result.name, None);
    }

    #[test]
    fn test_matcher_ignores_nan_entries() {
        let mut broken = axis(0.0);
        broken[3] = f64::NAN;
        let gallery = vec![
            NamedDescriptor::new("good", axis(0.1)),
            NamedDescriptor::new("broken", broken),
        ];
        let result = EuclideanMatcher.compare(&axis(0.0), &gallery, 0.6);
        assert!(result.matched);
        assert_eq!(result.name.as_deref(), Some("good"));
    }

    #[test]
    fn test_matcher_empty_gallery() {
        let result = EuclideanMatcher.compare(&axis(0.0), &[], 0.6);
        assert!(!result.matched);
        assert_eq!(result.distance, None);
    }
}
