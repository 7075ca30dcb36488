use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use lotto_db::models::DrawRecord;

use crate::cache::sequence_key;
use crate::pipeline::PredictionOutput;
use crate::profiles::WeightProfile;
use crate::rng::hash_seed;
use crate::settings::ModelSettings;

pub const WARM_STATE_VERSION: u32 = 1;

/// État d'apprentissage conservé entre deux sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedLearningState {
    pub version: u32,
    pub updated_at: String,
    pub draw_count: usize,
    pub pool_size: usize,
    pub data_signature: String,
    pub score: f64,
    pub best_profile: WeightProfile,
    pub profile_overlaps: BTreeMap<String, f64>,
}

/// Empreinte courte de l'historique : taille, dernier tirage, hash du contenu.
pub fn data_signature(draws: &[DrawRecord]) -> String {
    let last = draws.last().map_or_else(String::new, |d| d.signature());
    format!("{}:{}:{:08x}", draws.len(), last, hash_seed(&sequence_key(draws)))
}

impl PersistedLearningState {
    pub fn from_prediction(output: &PredictionOutput, draws: &[DrawRecord]) -> Self {
        Self {
            version: WARM_STATE_VERSION,
            updated_at: chrono::Local::now().to_rfc3339(),
            draw_count: output.draw_count,
            pool_size: output.pool_size,
            data_signature: data_signature(draws),
            score: output.backtest.score(),
            best_profile: output.backtest.final_profile.clone(),
            profile_overlaps: output
                .backtest
                .profile_performance
                .iter()
                .filter(|p| p.samples > 0)
                .map(|p| (p.name.clone(), p.rolling_overlap()))
                .collect(),
        }
    }

    /// Utilisable seulement pour le même format de grille.
    pub fn is_compatible(&self, pool_size: usize) -> bool {
        self.version == WARM_STATE_VERSION && self.pool_size == pool_size
    }

    /// Injecte le profil et les recouvrements dans des réglages bruts.
    pub fn apply_to(&self, settings: &mut ModelSettings) {
        settings.warm_start_enabled = Some(true);
        settings.warm_start_profile = Some(self.best_profile.clone());
        settings.warm_profile_overlaps = Some(self.profile_overlaps.clone());
    }
}

pub fn load_state(path: &Path) -> Result<Option<PersistedLearningState>> {
    if !path.exists() {
        return Ok(None);
    }
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Impossible de lire l'état d'apprentissage {}", path.display()))?;
    match serde_json::from_str::<PersistedLearningState>(&json) {
        Ok(state) => Ok(Some(state)),
        Err(e) => {
            log::warn!("état d'apprentissage illisible ({}), ignoré : {e}", path.display());
            Ok(None)
        }
    }
}

/// Écrit l'état si aucun état compatible meilleur n'existe déjà. Renvoie `true` si écrit.
pub fn save_if_better(path: &Path, state: &PersistedLearningState) -> Result<bool> {
    let should_save = match load_state(path)? {
        Some(old) if old.is_compatible(state.pool_size) => {
            if state.score >= old.score {
                log::info!("état sauvegardé (score {:.4}, ancien {:.4})", state.score, old.score);
                true
            } else {
                log::info!("état non sauvegardé : score {:.4} < ancien {:.4}", state.score, old.score);
                false
            }
        }
        _ => true,
    };

    if should_save {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(state)?;
        std::fs::write(path, json)
            .with_context(|| format!("Impossible d'écrire l'état d'apprentissage {}", path.display()))?;
    }
    Ok(should_save)
}
