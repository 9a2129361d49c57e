use crate::error::{DataError, DataResult};
use crate::languages::LanguageCatalog;
use crate::record::{CaptionRecord, MetadataRow};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Row counts after each pipeline stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareReport {
    pub afrimmd_rows: usize,
    pub avila_rows: usize,
    pub merged_rows: usize,
    pub duplicate_captions: usize,
    pub unsupported_language_rows: usize,
    pub duplicate_id_language: usize,
    pub final_rows: usize,
}

/// Shift AViLa ids past the largest AfriMMD id so the two sources never collide.
pub fn offset_ids(afrimmd: &[CaptionRecord], avila: &mut [CaptionRecord]) {
    let offset = afrimmd.iter().map(|r| r.id).max().map_or(0, |max| max + 1);
    for record in avila.iter_mut() {
        record.id += offset;
    }
}

/// Merge both sources into published rows.
///
/// Captions are de-duplicated globally (first wins), unsupported languages are dropped,
/// codes are mapped to their two-letter form, a localized question is drawn per row, and
/// finally `(id, language)` pairs are de-duplicated (first wins). `weight` is left at 0;
/// see [`crate::sampling::rebalance`].
pub fn prepare_records<R: Rng + ?Sized>(
    afrimmd: Vec<CaptionRecord>,
    mut avila: Vec<CaptionRecord>,
    catalog: &LanguageCatalog,
    rng: &mut R,
) -> DataResult<(Vec<MetadataRow>, PrepareReport)> {
    let mut report = PrepareReport {
        afrimmd_rows: afrimmd.len(),
        avila_rows: avila.len(),
        ..PrepareReport::default()
    };

    offset_ids(&afrimmd, &mut avila);
    let merged: Vec<CaptionRecord> = afrimmd.into_iter().chain(avila).collect();
    report.merged_rows = merged.len();

    let mut seen_captions = HashSet::new();
    let unique: Vec<CaptionRecord> = merged.into_iter().filter(|r| seen_captions.insert(r.caption.clone())).collect();
    report.duplicate_captions = report.merged_rows - unique.len();
    tracing::info!("Removed {} duplicate captions", report.duplicate_captions);

    let mut rows = Vec::with_capacity(unique.len());
    for record in unique {
        let Some(language) = catalog.by_source_code(&record.language) else {
            report.unsupported_language_rows += 1;
            continue;
        };
        let question = catalog
            .pick_question(language.code, rng)
            .ok_or_else(|| DataError::Schema(format!("no prompts for language '{}'", language.code)))?;
        rows.push(MetadataRow {
            id: record.id,
            file_name: record.file_name,
            language: language.code.to_string(),
            caption: record.caption,
            question: question.to_string(),
            weight: 0.0,
        });
    }

    let before = rows.len();
    let mut seen_pairs = HashSet::new();
    rows.retain(|r| seen_pairs.insert((r.id, r.language.clone())));
    report.duplicate_id_language = before - rows.len();
    report.final_rows = rows.len();
    tracing::info!("Final data length: {}", report.final_rows);

    Ok((rows, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_offset_ids_starts_after_max() {
        let a = vec![CaptionRecord::new(3, "a.jpg", "eng", "x"), CaptionRecord::new(7, "b.jpg", "eng", "y")];
        let mut b = vec![CaptionRecord::new(0, "c.jpg", "hau", "z")];
        offset_ids(&a, &mut b);
        assert_eq!(b[0].id, 8);

        let mut b = vec![CaptionRecord::new(0, "c.jpg", "hau", "z")];
        offset_ids(&[], &mut b);
        assert_eq!(b[0].id, 0);
    }

    #[test]
    fn test_prepare_records_filters_maps_and_dedups() {
        let afrimmd = vec![
            CaptionRecord::new(0, "1.jpg", "eng", "two dogs"),
            CaptionRecord::new(1, "2.jpg", "eng", "a man"),
            CaptionRecord::new(0, "1.jpg", "deu", "zwei Hunde"),
            CaptionRecord::new(0, "1.jpg", "yor", "two dogs"),
        ];
        let avila = vec![
            CaptionRecord::new(0, "1.jpg", "hau", "karnuka biyu"),
            CaptionRecord::new(0, "1.jpg", "hau", "karnuka biyu a gida"),
            CaptionRecord::new(1, "2.jpg", "afr", "a man"),
        ];

        let mut rng = StdRng::seed_from_u64(1);
        let (rows, report) = prepare_records(afrimmd, avila, &LanguageCatalog, &mut rng).unwrap();

        assert_eq!(report.merged_rows, 7);
        // "two dogs" (yor) and "a man" (afr) repeat earlier captions.
        assert_eq!(report.duplicate_captions, 2);
        assert_eq!(report.unsupported_language_rows, 1);
        // The second hau caption for offset id 2 collides on (id, language).
        assert_eq!(report.duplicate_id_language, 1);
        assert_eq!(report.final_rows, 3);

        let summary: Vec<(i64, &str, &str)> =
            rows.iter().map(|r| (r.id, r.language.as_str(), r.caption.as_str())).collect();
        assert_eq!(summary, vec![(0, "en", "two dogs"), (1, "en", "a man"), (2, "ha", "karnuka biyu")]);

        let ha = LanguageCatalog.by_code("ha").unwrap();
        assert!(ha.questions.contains(&rows[2].question.as_str()));
    }
}
