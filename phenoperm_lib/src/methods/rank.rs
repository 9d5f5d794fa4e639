use crate::data::GeneKey;
use crate::methods::de::GeneStatistic;
use crate::{MalformedError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankListItem {
    pub analyte: String,
    pub rank: f64,
}

/// Score each gene as `sign(logFC) * -log10(p)` and sort descending.
///
/// The sort is stable, so genes with equal scores keep their input order.
/// Gene ids are reduced to the first `delimiter`-separated segment.
pub fn build_rank_list(stats: &[GeneStatistic], delimiter: char) -> Result<Vec<RankListItem>> {
    let mut items = Vec::with_capacity(stats.len());
    for stat in stats {
        if !stat.log_fc.is_finite() {
            return Err(MalformedError::WrongFormat(format!(
                "gene '{}' has non-finite logFC {}",
                stat.gene, stat.log_fc
            ))
            .into());
        }
        if !(0.0..=1.0).contains(&stat.p_value) {
            return Err(MalformedError::WrongFormat(format!(
                "gene '{}' has p-value {} outside [0, 1]",
                stat.gene, stat.p_value
            ))
            .into());
        }
        items.push(RankListItem {
            analyte: GeneKey::parse(&stat.gene, delimiter).symbol,
            rank: signed_score(stat.log_fc, stat.p_value),
        });
    }
    items.sort_by(|a, b| b.rank.total_cmp(&a.rank));
    Ok(items)
}

fn signed_score(log_fc: f64, p_value: f64) -> f64 {
    let sign = if log_fc > 0.0 {
        1.0
    } else if log_fc < 0.0 {
        -1.0
    } else {
        0.0
    };
    // p of exactly 0 would give an infinite score
    let score = sign * -p_value.max(f64::MIN_POSITIVE).log10();
    if score == 0.0 {
        0.0
    } else {
        score
    }
}
