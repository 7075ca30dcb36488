use anyhow::{bail, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Nombre de boules principales par tirage.
pub const PICK_COUNT: usize = 6;

/// Plafond maximal connu (format 58).
pub const MAX_POOL: usize = 58;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PoolFormat {
    Classic49,
    Extended52,
    Extended58,
}

impl PoolFormat {
    pub fn size(&self) -> usize {
        match self {
            PoolFormat::Classic49 => 49,
            PoolFormat::Extended52 => 52,
            PoolFormat::Extended58 => 58,
        }
    }

    /// Format déduit de la plus grande valeur observée dans un tirage.
    pub fn from_max(max: u8) -> Self {
        if max > 52 {
            PoolFormat::Extended58
        } else if max > 49 {
            PoolFormat::Extended52
        } else {
            PoolFormat::Classic49
        }
    }

    pub fn from_size(size: usize) -> Self {
        match size {
            0..=49 => PoolFormat::Classic49,
            50..=52 => PoolFormat::Extended52,
            _ => PoolFormat::Extended58,
        }
    }
}

impl std::fmt::Display for PoolFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "6/{}", self.size())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawRecord {
    pub date: String,
    /// Triés par ordre croissant.
    pub numbers: [u8; PICK_COUNT],
    /// 0 = pas de complémentaire.
    pub bonus: u8,
}

impl DrawRecord {
    pub fn new(date: impl Into<String>, mut numbers: [u8; PICK_COUNT], bonus: u8) -> Result<Self> {
        numbers.sort();
        validate_draw(&numbers, bonus, MAX_POOL)?;
        Ok(Self { date: date.into(), numbers, bonus })
    }

    pub fn max_value(&self) -> u8 {
        let main = self.numbers.iter().copied().max().unwrap_or(0);
        main.max(self.bonus)
    }

    pub fn format(&self) -> PoolFormat {
        PoolFormat::from_max(self.max_value())
    }

    pub fn contains(&self, n: u8) -> bool {
        self.numbers.contains(&n)
    }

    /// Les 7 boules cibles (6 principales + complémentaire si présent).
    pub fn target_balls(&self) -> impl Iterator<Item = u8> + '_ {
        self.numbers
            .iter()
            .copied()
            .chain(std::iter::once(self.bonus).filter(|&b| b > 0))
    }

    /// Recouvrement d'une grille avec la cible à 7 boules.
    pub fn overlap(&self, set: &[u8]) -> usize {
        self.target_balls().filter(|b| set.contains(b)).count()
    }

    /// Empreinte exacte du tirage, utilisée pour les clés de cache.
    pub fn signature(&self) -> String {
        let nums = self
            .numbers
            .iter()
            .map(|n| n.to_string())
            .collect::<Vec<_>>()
            .join("-");
        format!("{}:{}+{}", self.date, nums, self.bonus)
    }
}

pub fn validate_draw(numbers: &[u8; PICK_COUNT], bonus: u8, pool_size: usize) -> Result<()> {
    for &n in numbers {
        if n < 1 || n as usize > pool_size {
            bail!("Numéro {} hors limites (1-{})", n, pool_size);
        }
    }
    for i in 0..numbers.len() {
        for j in (i + 1)..numbers.len() {
            if numbers[i] == numbers[j] {
                bail!("Numéro en double : {}", numbers[i]);
            }
        }
    }
    if bonus != 0 {
        if bonus as usize > pool_size {
            bail!("Complémentaire {} hors limites (1-{})", bonus, pool_size);
        }
        if numbers.contains(&bonus) {
            bail!("Complémentaire {} déjà tiré parmi les numéros", bonus);
        }
    }
    Ok(())
}

/// Tri chronologique stable. Les dates illisibles passent en tête, dans leur ordre d'origine.
pub fn sort_chronological(draws: &mut [DrawRecord]) {
    draws.sort_by_cached_key(|d| NaiveDate::parse_from_str(&d.date, "%Y-%m-%d").ok());
}

/// Tirages synthétiques déterministes (LCG 32 bits). Le premier tirage contient `pool_size`
/// pour que tout l'historique appartienne au même format.
pub fn make_test_draws(n: usize, pool_size: usize, seed: u32) -> Vec<DrawRecord> {
    let mut state = seed;
    let mut next = |bound: usize| -> u8 {
        state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        (((state >> 8) as usize % bound) + 1) as u8
    };
    let start = NaiveDate::from_ymd_opt(2015, 1, 3).unwrap_or(NaiveDate::MIN);

    (0..n)
        .map(|i| {
            let mut picked: Vec<u8> = Vec::with_capacity(PICK_COUNT + 1);
            if i == 0 {
                picked.push(pool_size as u8);
            }
            while picked.len() < PICK_COUNT + 1 {
                let v = next(pool_size);
                if !picked.contains(&v) {
                    picked.push(v);
                }
            }
            let bonus = picked[PICK_COUNT];
            let mut numbers = [0u8; PICK_COUNT];
            numbers.copy_from_slice(&picked[..PICK_COUNT]);
            numbers.sort();
            let date = start + chrono::Duration::days(i as i64 * 3 + (i as i64 % 2));
            DrawRecord {
                date: date.format("%Y-%m-%d").to_string(),
                numbers,
                bonus,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_draw_ok() {
        assert!(validate_draw(&[1, 2, 3, 4, 5, 6], 7, 49).is_ok());
        assert!(validate_draw(&[53, 54, 55, 56, 57, 58], 0, 58).is_ok());
    }

    #[test]
    fn test_validate_draw_out_of_range() {
        assert!(validate_draw(&[0, 2, 3, 4, 5, 6], 0, 49).is_err());
        assert!(validate_draw(&[1, 2, 3, 4, 5, 50], 0, 49).is_err());
    }

    #[test]
    fn test_validate_draw_duplicate() {
        assert!(validate_draw(&[1, 1, 3, 4, 5, 6], 0, 49).is_err());
    }

    #[test]
    fn test_validate_draw_bonus_rules() {
        assert!(validate_draw(&[1, 2, 3, 4, 5, 6], 6, 49).is_err());
        assert!(validate_draw(&[1, 2, 3, 4, 5, 6], 50, 49).is_err());
        assert!(validate_draw(&[1, 2, 3, 4, 5, 6], 0, 49).is_ok());
    }

    #[test]
    fn test_new_sorts_numbers() {
        let d = DrawRecord::new("2024-01-01", [9, 3, 41, 1, 22, 7], 5).unwrap();
        assert_eq!(d.numbers, [1, 3, 7, 9, 22, 41]);
    }

    #[test]
    fn test_pool_format_from_max() {
        assert_eq!(PoolFormat::from_max(49), PoolFormat::Classic49);
        assert_eq!(PoolFormat::from_max(50), PoolFormat::Extended52);
        assert_eq!(PoolFormat::from_max(52), PoolFormat::Extended52);
        assert_eq!(PoolFormat::from_max(53), PoolFormat::Extended58);
    }

    #[test]
    fn test_overlap_counts_bonus() {
        let actual = DrawRecord::new("2024-01-01", [1, 2, 3, 7, 8, 9], 6).unwrap();
        assert_eq!(actual.overlap(&[1, 2, 3, 4, 5, 6]), 4);
    }

    #[test]
    fn test_overlap_without_bonus() {
        let actual = DrawRecord::new("2024-01-01", [1, 2, 3, 7, 8, 9], 0).unwrap();
        assert_eq!(actual.overlap(&[1, 2, 3, 4, 5, 6]), 3);
    }

    #[test]
    fn test_sort_chronological() {
        let mut draws = vec![
            DrawRecord::new("2024-01-05", [1, 2, 3, 4, 5, 6], 0).unwrap(),
            DrawRecord::new("2023-12-30", [1, 2, 3, 4, 5, 7], 0).unwrap(),
            DrawRecord::new("2024-01-01", [1, 2, 3, 4, 5, 8], 0).unwrap(),
        ];
        sort_chronological(&mut draws);
        assert_eq!(draws[0].date, "2023-12-30");
        assert_eq!(draws[2].date, "2024-01-05");
    }

    #[test]
    fn test_make_test_draws_valid() {
        let draws = make_test_draws(80, 52, 0x7f4a7c15);
        assert_eq!(draws.len(), 80);
        assert_eq!(draws[0].format(), PoolFormat::Extended52);
        for d in &draws {
            assert!(validate_draw(&d.numbers, d.bonus, 52).is_ok(), "{:?}", d);
            assert!(d.numbers.windows(2).all(|w| w[0] < w[1]));
            assert!(d.bonus > 0);
        }
    }

    #[test]
    fn test_make_test_draws_deterministic() {
        assert_eq!(make_test_draws(20, 49, 7), make_test_draws(20, 49, 7));
        assert_ne!(make_test_draws(20, 49, 7), make_test_draws(20, 49, 8));
    }
}
