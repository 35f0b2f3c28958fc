//! Splitting the local favorites list into the typed buckets of a backup
//! document, and back.

use crate::models::favorite_types::{ASMAUL_HUSNA, DHIKR, HADITH, QURAN_VERSE};
use crate::models::{FavoriteBuckets, FavoriteItem};

/// A dhikr whose category mentions "dua".
pub fn is_dua(item: &FavoriteItem) -> bool {
    item.kind == DHIKR
        && item
            .category()
            .is_some_and(|c| c.to_lowercase().contains("dua"))
}

/// Parse the stored favorites list. Any entry that is not an object with a
/// string `type` fails the whole list, so a backup never holds a partial copy.
pub fn parse_favorites(raw: &str) -> serde_json::Result<Vec<FavoriteItem>> {
    serde_json::from_str(raw)
}

/// Duas land in both `dhikr` and `duas`. Types without a bucket go to `other`.
pub fn partition(items: Vec<FavoriteItem>) -> FavoriteBuckets {
    let mut buckets = FavoriteBuckets::default();

    for item in items {
        match item.kind.as_str() {
            DHIKR => {
                if is_dua(&item) {
                    buckets.duas.push(item.clone());
                }
                buckets.dhikr.push(item);
            }
            QURAN_VERSE => buckets.verses.push(item),
            HADITH => buckets.hadiths.push(item),
            ASMAUL_HUSNA => buckets.asmaulhusna.push(item),
            other => {
                tracing::debug!(kind = %other, "Favorite type has no bucket, kept under other");
                buckets.other.push(item);
            }
        }
    }

    buckets
}

/// Inverse of [`partition`]: duas already present in `dhikr` are not repeated.
pub fn flatten(buckets: FavoriteBuckets) -> Vec<FavoriteItem> {
    let FavoriteBuckets {
        dhikr,
        verses,
        hadiths,
        asmaulhusna,
        duas,
        other,
    } = buckets;

    let extra_duas: Vec<FavoriteItem> = duas
        .into_iter()
        .filter(|dua| !dhikr.contains(dua))
        .collect();

    dhikr
        .into_iter()
        .chain(verses)
        .chain(hadiths)
        .chain(asmaulhusna)
        .chain(other)
        .chain(extra_duas)
        .collect()
}
