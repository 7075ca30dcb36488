use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use lotto_db::models::DrawRecord;

pub const TOP_PAIRS: usize = 60;
pub const TOP_TRIPLES: usize = 40;
pub const TOP_QUADRUPLES: usize = 30;
pub const TOP_QUINTUPLES: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairStat {
    pub a: u8,
    pub b: u8,
    pub count: u32,
    pub z_score: f64,
}

/// Combinaison d'ordre 3 à 5 et son nombre d'occurrences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComboStat {
    pub numbers: Vec<u8>,
    pub count: u32,
}

/// Clé compacte d'une combinaison triée : 6 bits par numéro.
pub fn combo_key(sorted: &[u8]) -> u64 {
    sorted.iter().fold(0u64, |acc, &n| (acc << 6) | n as u64)
}

pub fn decode_key(mut key: u64, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    for slot in out.iter_mut().rev() {
        *slot = (key & 0x3f) as u8;
        key >>= 6;
    }
    out
}

/// Appelle `f` pour chaque sous-ensemble de taille `k` (ordre lexicographique des indices).
pub fn for_each_subset(items: &[u8], k: usize, mut f: impl FnMut(&[u8])) {
    let n = items.len();
    if k == 0 || k > n {
        return;
    }
    let mut idx: Vec<usize> = (0..k).collect();
    let mut buf = vec![0u8; k];
    loop {
        for (slot, &i) in buf.iter_mut().zip(&idx) {
            *slot = items[i];
        }
        f(&buf);

        let mut i = k;
        while i > 0 && idx[i - 1] == n - k + i - 1 {
            i -= 1;
        }
        if i == 0 {
            return;
        }
        idx[i - 1] += 1;
        for j in i..k {
            idx[j] = idx[j - 1] + 1;
        }
    }
}

fn binomial(n: usize, k: usize) -> f64 {
    if k > n {
        return 0.0;
    }
    (0..k).fold(1.0, |acc, i| acc * (n - i) as f64 / (i + 1) as f64)
}

/// Paires sur-représentées : score z de Poisson contre C(6,2)/C(N,2) par tirage.
pub fn compute_pairs(draws: &[DrawRecord], pool_size: usize) -> Vec<PairStat> {
    let width = pool_size + 1;
    let mut counts = vec![0u32; width * width];
    for draw in draws {
        for_each_subset(&draw.numbers, 2, |p| {
            if (p[1] as usize) <= pool_size {
                counts[p[0] as usize * width + p[1] as usize] += 1;
            }
        });
    }

    let expected = draws.len() as f64 * binomial(6, 2) / binomial(pool_size, 2);
    let mut pairs = Vec::new();
    for a in 1..=pool_size {
        for b in (a + 1)..=pool_size {
            let count = counts[a * width + b];
            if count == 0 {
                continue;
            }
            let z_score = if expected > 0.0 { (count as f64 - expected) / expected.sqrt() } else { 0.0 };
            pairs.push(PairStat { a: a as u8, b: b as u8, count, z_score });
        }
    }
    pairs.sort_by(|x, y| y.count.cmp(&x.count).then(x.a.cmp(&y.a)).then(x.b.cmp(&y.b)));
    pairs.truncate(TOP_PAIRS);
    pairs
}

/// Combinaisons de taille `k` tirées au moins `min_count` fois, les `limit` plus fréquentes.
pub fn compute_combos(draws: &[DrawRecord], pool_size: usize, k: usize, min_count: u32, limit: usize) -> Vec<ComboStat> {
    let mut counts: HashMap<u64, u32> = HashMap::new();
    for draw in draws {
        if draw.numbers.iter().any(|&n| n as usize > pool_size) {
            continue;
        }
        for_each_subset(&draw.numbers, k, |c| {
            *counts.entry(combo_key(c)).or_insert(0) += 1;
        });
    }

    let mut ranked: Vec<(u64, u32)> = counts.into_iter().filter(|&(_, c)| c >= min_count).collect();
    ranked.sort_by(|x, y| y.1.cmp(&x.1).then(x.0.cmp(&y.0)));
    ranked.truncate(limit);
    ranked
        .into_iter()
        .map(|(key, count)| ComboStat { numbers: decode_key(key, k), count })
        .collect()
}

pub fn compute_triples(draws: &[DrawRecord], pool_size: usize) -> Vec<ComboStat> {
    compute_combos(draws, pool_size, 3, 1, TOP_TRIPLES)
}

pub fn compute_quadruples(draws: &[DrawRecord], pool_size: usize) -> Vec<ComboStat> {
    compute_combos(draws, pool_size, 4, 2, TOP_QUADRUPLES)
}

pub fn compute_quintuples(draws: &[DrawRecord], pool_size: usize) -> Vec<ComboStat> {
    compute_combos(draws, pool_size, 5, 2, TOP_QUINTUPLES)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draw(numbers: [u8; 6]) -> DrawRecord {
        DrawRecord::new("2024-01-01", numbers, 0).unwrap()
    }

    #[test]
    fn test_subset_enumeration() {
        let mut seen = Vec::new();
        for_each_subset(&[1, 2, 3, 4, 5, 6], 3, |c| seen.push(c.to_vec()));
        assert_eq!(seen.len(), 20);
        assert_eq!(seen[0], vec![1, 2, 3]);
        assert_eq!(seen[19], vec![4, 5, 6]);
        let mut count = 0;
        for_each_subset(&[1, 2, 3, 4, 5, 6], 6, |_| count += 1);
        assert_eq!(count, 1);
    }

    #[test]
    fn test_key_roundtrip_and_distinct_lengths() {
        let k3 = combo_key(&[5, 17, 58]);
        assert_eq!(decode_key(k3, 3), vec![5, 17, 58]);
        assert!(combo_key(&[1, 2, 3, 4]) > combo_key(&[58, 58, 58]));
    }

    #[test]
    fn test_pairs_ranked_by_count() {
        let draws = vec![
            draw([1, 2, 10, 20, 30, 40]),
            draw([1, 2, 11, 21, 31, 41]),
            draw([1, 2, 12, 22, 32, 42]),
            draw([3, 4, 13, 23, 33, 43]),
        ];
        let pairs = compute_pairs(&draws, 49);
        assert_eq!((pairs[0].a, pairs[0].b, pairs[0].count), (1, 2, 3));
        assert!(pairs[0].z_score > pairs[1].z_score);
        assert!(pairs.len() <= TOP_PAIRS);
    }

    #[test]
    fn test_quadruples_need_repeat() {
        let draws = vec![
            draw([1, 2, 3, 4, 20, 30]),
            draw([1, 2, 3, 4, 21, 31]),
            draw([5, 6, 7, 8, 22, 32]),
        ];
        let quads = compute_quadruples(&draws, 49);
        assert_eq!(quads.len(), 1);
        assert_eq!(quads[0], ComboStat { numbers: vec![1, 2, 3, 4], count: 2 });

        let triples = compute_triples(&draws, 49);
        assert_eq!(triples.len(), TOP_TRIPLES);
        assert_eq!(triples[0].numbers, vec![1, 2, 3]);
        assert!(compute_quintuples(&draws, 49).is_empty());
    }
}
