const ARABIC_WORD_WEIGHT: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct DurationBounds {
    pub min: f64,
    pub max: f64,
}

impl Default for DurationBounds {
    fn default() -> Self {
        Self { min: 2.5, max: 8.0 }
    }
}

/// One time-boxed slice of a verse.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Page {
    pub index: usize,
    pub arabic_chunk: String,
    pub translation_chunk: String,
    pub duration: f64,
    pub start: f64,
}

impl Page {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Arabic words are weighted heavier since recitation lingers on them. Never below 1.
pub(crate) fn complexity_score(arabic_chunk: &str, translation_chunk: &str) -> f64 {
    let arabic_words = arabic_chunk.split_whitespace().count() as f64;
    let translation_words = translation_chunk.split_whitespace().count() as f64;
    (ARABIC_WORD_WEIGHT * arabic_words + translation_words).max(1.0)
}

/// Shares `total` between pages in proportion to `scores`, clamps each share to `bounds`,
/// then rescales so the shares sum to `total` again. The rescale may push a share slightly
/// outside the bounds.
pub(crate) fn allocate(scores: &[f64], total: f64, bounds: DurationBounds) -> Vec<f64> {
    if scores.is_empty() || total.is_nan() || total <= 0.0 {
        return Vec::new();
    }

    let scores: Vec<f64> = scores
        .iter()
        .map(|s| if s.is_finite() { s.max(1.0) } else { 1.0 })
        .collect();
    let score_sum: f64 = scores.iter().sum();

    let clamped: Vec<f64> = scores
        .iter()
        .map(|score| (total * score / score_sum).clamp(bounds.min, bounds.max))
        .collect();
    let clamped_sum: f64 = clamped.iter().sum();

    let scale = total / clamped_sum;
    clamped.into_iter().map(|d| d * scale).collect()
}

/// Lays pages end to end from offset 0. The last page absorbs rounding drift so the
/// schedule ends exactly at `total`.
pub(crate) fn schedule(
    arabic_pages: &[String],
    translation_pages: &[String],
    total: f64,
    bounds: DurationBounds,
) -> Vec<Page> {
    let count = arabic_pages.len().max(translation_pages.len());
    let chunk = |pages: &[String], i: usize| pages.get(i).cloned().unwrap_or_default();

    let scores: Vec<f64> = (0..count)
        .map(|i| complexity_score(&chunk(arabic_pages, i), &chunk(translation_pages, i)))
        .collect();
    let durations = allocate(&scores, total, bounds);

    let mut start = 0.0;
    let mut pages = Vec::with_capacity(count);
    for (index, duration) in durations.iter().enumerate() {
        let duration = if index + 1 == count {
            (total - start).max(0.0)
        } else {
            *duration
        };
        pages.push(Page {
            index,
            arabic_chunk: chunk(arabic_pages, index),
            translation_chunk: chunk(translation_pages, index),
            duration,
            start,
        });
        start += duration;
    }
    pages
}

pub(crate) fn ease_out_quad(p: f64) -> f64 {
    let p = p.clamp(0.0, 1.0);
    p * (2.0 - p)
}

/// Filled fraction of the progress bar at `t` seconds into a `total`-second clip.
pub(crate) fn progress_fraction(t: f64, total: f64) -> f64 {
    if total <= 0.0 {
        return 1.0;
    }
    ease_out_quad(t / total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-6, "{a} != {b}");
    }

    #[test]
    fn equal_scores_share_evenly() {
        let durations = allocate(&[3.0, 3.0, 3.0, 3.0], 20.0, DurationBounds::default());
        assert_eq!(durations.len(), 4);
        for d in durations {
            assert_close(d, 5.0);
        }
    }

    #[test]
    fn allocation_sums_to_total_for_varied_scores() {
        let cases: [(&[f64], f64); 5] = [
            (&[1.0], 7.3),
            (&[1.0, 50.0], 12.0),
            (&[1.0, 1.0, 40.0, 2.0, 9.0], 31.4),
            (&[12.0, 3.5, 3.5], 4.0),
            (&[100.0; 10], 95.0),
        ];
        for (scores, total) in cases {
            let durations = allocate(scores, total, DurationBounds::default());
            assert_eq!(durations.len(), scores.len());
            assert_close(durations.iter().sum(), total);
            assert!(durations.iter().all(|d| *d > 0.0));
        }
    }

    #[test]
    fn clamping_limits_dominant_pages_before_rescale() {
        let durations = allocate(&[1.0, 30.0], 20.0, DurationBounds::default());
        // raw 0.645 / 19.35 -> clamped 2.5 / 8.0 -> scaled by 20 / 10.5
        assert_close(durations[0], 2.5 * 20.0 / 10.5);
        assert_close(durations[1], 8.0 * 20.0 / 10.5);
    }

    #[test]
    fn allocation_is_deterministic() {
        let scores = [4.0, 9.5, 1.0, 22.0];
        let first = allocate(&scores, 33.3, DurationBounds::default());
        let second = allocate(&scores, 33.3, DurationBounds::default());
        assert_eq!(first, second);
    }

    #[test]
    fn complexity_weights_arabic_words() {
        assert_eq!(complexity_score("كلمة كلمة", "two words"), 5.0);
        assert_eq!(complexity_score("", ""), 1.0);
    }

    #[test]
    fn schedule_is_contiguous_and_ends_at_total() {
        let arabic = vec!["أ ب ج".to_owned(), "د ه".to_owned(), "و".to_owned()];
        let translation = vec!["one two three".to_owned(), "four".to_owned()];
        let pages = schedule(&arabic, &translation, 17.0, DurationBounds::default());

        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].start, 0.0);
        for pair in pages.windows(2) {
            assert_close(pair[1].start, pair[0].end());
        }
        assert_close(pages[2].end(), 17.0);
        assert_eq!(pages[2].translation_chunk, "");
    }

    #[test]
    fn progress_eases_out() {
        assert_close(ease_out_quad(0.5), 0.75);
        assert_close(progress_fraction(10.0, 20.0), 0.75);
        assert_close(progress_fraction(0.0, 20.0), 0.0);
        assert_close(progress_fraction(25.0, 20.0), 1.0);
    }
}
