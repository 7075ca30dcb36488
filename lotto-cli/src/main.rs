mod display;
mod import;
mod progress;

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::display::{
    display_backtest, display_diagnostics, display_draws, display_import_summary, display_prediction,
};
use crate::progress::BarReporter;
use lotto_db::db::{count_draws, db_path, delete_draws_on, fetch_all_draws, fetch_last_draws, insert_draw, migrate, open_db};
use lotto_db::models::{DrawRecord, PICK_COUNT};
use lotto_db::rusqlite::Connection;
use lotto_engine::backtest::{run_backtest, BacktestContext};
use lotto_engine::budget::RuntimeBudget;
use lotto_engine::cache::DiagnosticsCache;
use lotto_engine::diagnostics::{detect_format, run_full_diagnostics};
use lotto_engine::pipeline::PredictionOutput;
use lotto_engine::reporter::{CancelToken, ThrottledReporter};
use lotto_engine::settings::{ModelSettings, RoundLimit};
use lotto_engine::warm_state::{load_state, save_if_better, PersistedLearningState};
use lotto_engine::worker::{Supervisor, TaskEvent, TaskKind, TaskRequest, TaskResponse};

#[derive(Parser)]
#[command(name = "lotto", about = "Analyse statistique et grilles candidates pour loterie 6/N")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Réglages du modèle : fichier JSON puis surcharges en ligne de commande.
#[derive(Args, Clone, Default)]
struct ModelArgs {
    /// Fichier JSON de réglages (clés camelCase)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Budgets réduits
    #[arg(long)]
    fast: bool,

    /// Entraînement continu sur plusieurs tours
    #[arg(long)]
    continuous: bool,

    /// Nombre de tours (entier ou "unbounded")
    #[arg(long, value_parser = parse_round_limit)]
    rounds: Option<RoundLimit>,

    /// Backtest en mode maîtrise (tentatives multiples par tirage)
    #[arg(long)]
    mastery: bool,

    /// Recouvrement visé (1-6)
    #[arg(long)]
    target: Option<usize>,

    /// Part d'entraînement (0.5-0.95)
    #[arg(long)]
    train_ratio: Option<f64>,

    /// Sel des graines pseudo-aléatoires
    #[arg(long)]
    salt: Option<String>,

    #[arg(long)]
    no_monte_carlo: bool,

    #[arg(long)]
    no_genetic: bool,

    #[arg(long)]
    no_echo: bool,

    /// Active la fenêtre glissante
    #[arg(long)]
    sliding_window: bool,
}

fn parse_round_limit(raw: &str) -> Result<RoundLimit, String> {
    if raw.eq_ignore_ascii_case("unbounded") {
        return Ok(RoundLimit::UNBOUNDED);
    }
    raw.parse::<u32>()
        .map(RoundLimit::Finite)
        .map_err(|_| format!("'{raw}' : entier ou \"unbounded\" attendu"))
}

impl ModelArgs {
    fn to_settings(&self) -> Result<ModelSettings> {
        let mut settings = match &self.settings {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("Impossible de lire {}", path.display()))?;
                serde_json::from_str::<ModelSettings>(&json)
                    .with_context(|| format!("Réglages invalides dans {}", path.display()))?
            }
            None => ModelSettings::default(),
        };
        if self.fast {
            settings.fast_mode = Some(true);
        }
        if self.continuous {
            settings.continuous_training = Some(true);
        }
        if self.mastery {
            settings.mastery_backtest_mode = Some(true);
        }
        if self.no_monte_carlo {
            settings.include_monte_carlo = Some(false);
        }
        if self.no_genetic {
            settings.include_genetic = Some(false);
        }
        if self.no_echo {
            settings.include_historical_echo = Some(false);
        }
        if self.sliding_window {
            settings.include_sliding_window = Some(true);
        }
        settings.max_optimization_rounds = self.rounds.or(settings.max_optimization_rounds);
        settings.target_sequence_match = self.target.or(settings.target_sequence_match);
        settings.train_ratio = self.train_ratio.or(settings.train_ratio);
        if let Some(salt) = &self.salt {
            settings.random_seed_salt = Some(salt.clone());
        }
        Ok(settings)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Importer les tirages depuis un fichier CSV (date;n1..n6[;complémentaire])
    Import {
        /// Chemin vers le fichier CSV
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Afficher le chemin de la base de données
    DbPath,

    /// Lister les derniers tirages
    List {
        /// Nombre de tirages à afficher
        #[arg(short, long, default_value = "10")]
        last: u32,
    },

    /// Ajouter un tirage manuellement
    Add,

    /// Supprimer les tirages d'une date
    Delete {
        /// Date (AAAA-MM-JJ ou JJ/MM/AAAA)
        date: String,
    },

    /// Diagnostics statistiques de l'historique
    Diagnose {
        /// Limiter aux N derniers tirages
        #[arg(short, long)]
        last: Option<usize>,

        /// Lignes affichées pour les paires et combinaisons
        #[arg(short, long, default_value = "15")]
        top: usize,
    },

    /// Backtest walk-forward du modèle
    Backtest {
        #[command(flatten)]
        model: ModelArgs,

        /// Lignes de détail affichées
        #[arg(long, default_value = "20")]
        rows: usize,
    },

    /// Entraîner puis générer les grilles candidates
    Predict {
        #[command(flatten)]
        model: ModelArgs,

        /// Sortie JSON
        #[arg(long)]
        json: bool,

        /// Fichier d'état d'apprentissage (lu puis mis à jour si meilleur)
        #[arg(long)]
        warm_state: Option<PathBuf>,

        /// Calcul sur le fil principal, sans worker
        #[arg(long)]
        inline: bool,

        /// Enregistrer la prédiction complète (JSON) pour `refresh`
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Scores affichés
        #[arg(long, default_value = "15")]
        top: usize,
    },

    /// Régénérer les grilles d'une prédiction enregistrée sans refaire le backtest
    Refresh {
        /// Prédiction JSON produite par `predict --output`
        prediction: PathBuf,

        #[command(flatten)]
        model: ModelArgs,

        #[arg(long)]
        json: bool,

        #[arg(long)]
        inline: bool,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let path = db_path();
    let conn = open_db(&path)?;
    migrate(&conn)?;

    match cli.command {
        Command::Import { file } => cmd_import(&conn, &file),
        Command::DbPath => {
            println!("{}", path.display());
            Ok(())
        }
        Command::List { last } => cmd_list(&conn, last),
        Command::Add => cmd_add(&conn),
        Command::Delete { date } => cmd_delete(&conn, &date),
        Command::Diagnose { last, top } => cmd_diagnose(&conn, last, top),
        Command::Backtest { model, rows } => cmd_backtest(&conn, &model, rows),
        Command::Predict { model, json, warm_state, inline, output, top } => {
            cmd_predict(&conn, &model, json, warm_state.as_deref(), inline, output.as_deref(), top)
        }
        Command::Refresh { prediction, model, json, inline, output } => {
            cmd_refresh(&conn, &prediction, &model, json, inline, output.as_deref())
        }
    }
}

fn load_draws(conn: &Connection) -> Result<Option<Vec<DrawRecord>>> {
    if count_draws(conn)? == 0 {
        println!("Base vide. Lancez d'abord : lotto import --file <csv>");
        return Ok(None);
    }
    Ok(Some(fetch_all_draws(conn)?))
}

fn cmd_import(conn: &Connection, file: &Path) -> Result<()> {
    let result = import::import_csv(conn, file)?;
    display_import_summary(&result);
    Ok(())
}

fn cmd_list(conn: &Connection, last: u32) -> Result<()> {
    if count_draws(conn)? == 0 {
        println!("Base vide. Lancez d'abord : lotto import --file <csv>");
        return Ok(());
    }
    let draws = fetch_last_draws(conn, last)?;
    display_draws(&draws);
    Ok(())
}

fn cmd_delete(conn: &Connection, raw_date: &str) -> Result<()> {
    let date = import::parse_date(raw_date)?;
    let removed = delete_draws_on(conn, &date)?;
    if removed == 0 {
        println!("Aucun tirage le {date}.");
    } else {
        println!("{removed} tirage(s) supprimé(s) le {date}.");
    }
    Ok(())
}

fn cmd_diagnose(conn: &Connection, last: Option<usize>, top: usize) -> Result<()> {
    let Some(draws) = load_draws(conn)? else { return Ok(()) };
    let start = last.map_or(0, |n| draws.len().saturating_sub(n));
    let diagnostics = run_full_diagnostics(&draws[start..]);
    display_diagnostics(&diagnostics, top);
    Ok(())
}

fn cmd_backtest(conn: &Connection, model: &ModelArgs, rows: usize) -> Result<()> {
    let Some(draws) = load_draws(conn)? else { return Ok(()) };
    let settings = model.to_settings()?.resolve();
    let budget = RuntimeBudget::calibrate(draws.len(), &settings);
    let mut cache = DiagnosticsCache::new(settings.diagnostics_cache_capacity);

    let bar = BarReporter::new()?;
    let throttled = ThrottledReporter::new(&bar);
    let ctx = BacktestContext {
        settings: &settings,
        budget: &budget,
        reporter: &throttled,
        cancel: &CancelToken::never(),
        salt: settings.random_seed_salt.clone(),
        warm_profile: settings.warm_start_profile.clone(),
        sweep_band: (0.0, 20.0),
        backtest_band: (20.0, 100.0),
    };
    let result = run_backtest(&draws, &ctx, &mut cache)?;
    bar.finish();
    display_backtest(&result, rows);
    Ok(())
}

/// Exécute une requête via le superviseur (worker ou en ligne) et renvoie la prédiction.
fn run_task(request: TaskRequest, inline: bool) -> Result<Option<PredictionOutput>> {
    let bar = BarReporter::new()?;
    let sink_bar = bar.clone();
    let mut sink = move |response: &TaskResponse| sink_bar.forward(response);
    let mut supervisor = Supervisor::new();
    let event = if inline {
        supervisor.run_inline(&request, &mut sink)
    } else {
        supervisor.run(request, &mut sink)?
    };
    bar.finish();
    log::info!("calcul {}", supervisor.status());

    match event {
        Some(TaskEvent::Result(output)) | Some(TaskEvent::RefreshResult(output)) => Ok(Some(*output)),
        Some(TaskEvent::Error { message }) => bail!(message),
        Some(_) | None => {
            println!("Calcul arrêté.");
            Ok(None)
        }
    }
}

fn emit_prediction(output: &PredictionOutput, json: bool, path: Option<&Path>, top: usize) -> Result<()> {
    if let Some(path) = path {
        let content = serde_json::to_string_pretty(output)?;
        std::fs::write(path, content).with_context(|| format!("Impossible d'écrire {}", path.display()))?;
        log::info!("prédiction enregistrée dans {}", path.display());
    }
    if json {
        println!("{}", serde_json::to_string_pretty(output)?);
    } else {
        display_backtest(&output.backtest, 10);
        display_prediction(output, top);
    }
    Ok(())
}

fn cmd_predict(
    conn: &Connection,
    model: &ModelArgs,
    json: bool,
    warm_state: Option<&Path>,
    inline: bool,
    output: Option<&Path>,
    top: usize,
) -> Result<()> {
    let Some(draws) = load_draws(conn)? else { return Ok(()) };
    let mut settings = model.to_settings()?;

    if let Some(path) = warm_state {
        let pool_size = detect_format(&draws).current_n;
        match load_state(path)? {
            Some(state) if state.is_compatible(pool_size) => {
                log::info!("démarrage à chaud : {} (score {:.3})", state.best_profile.name, state.score);
                state.apply_to(&mut settings);
            }
            Some(state) => log::info!("état d'apprentissage ignoré : format 6/{} au lieu de 6/{pool_size}", state.pool_size),
            None => {}
        }
    }

    let request = TaskRequest {
        request_id: 1,
        kind: TaskKind::Predict { draws: draws.clone(), settings },
    };
    let Some(prediction) = run_task(request, inline)? else { return Ok(()) };

    if let Some(path) = warm_state {
        let state = PersistedLearningState::from_prediction(&prediction, &draws);
        if save_if_better(path, &state)? {
            println!("État d'apprentissage mis à jour (score {:.3}).", state.score);
        }
    }
    emit_prediction(&prediction, json, output, top)
}

fn cmd_refresh(
    conn: &Connection,
    prediction_path: &Path,
    model: &ModelArgs,
    json: bool,
    inline: bool,
    output: Option<&Path>,
) -> Result<()> {
    let Some(draws) = load_draws(conn)? else { return Ok(()) };
    let content = std::fs::read_to_string(prediction_path)
        .with_context(|| format!("Impossible de lire {}", prediction_path.display()))?;
    let base: PredictionOutput = serde_json::from_str(&content)
        .with_context(|| format!("Prédiction invalide dans {}", prediction_path.display()))?;
    if base.draw_count != draws.len() {
        log::warn!(
            "la prédiction portait sur {} tirages, la base en contient {}",
            base.draw_count,
            draws.len()
        );
    }

    let request = TaskRequest {
        request_id: 1,
        kind: TaskKind::RefreshCandidates { draws, base_prediction: Box::new(base), settings: model.to_settings()? },
    };
    let Some(refreshed) = run_task(request, inline)? else { return Ok(()) };
    emit_prediction(&refreshed, json, output, 15)
}

fn cmd_add(conn: &Connection) -> Result<()> {
    println!("Ajout d'un tirage manuellement\n");

    let date = import::parse_date(&prompt("Date (JJ/MM/AAAA ou AAAA-MM-JJ) : ")?)?;
    let numbers = prompt_numbers()?;
    let bonus = prompt_bonus(&numbers)?;
    let draw = DrawRecord::new(date, numbers, bonus)?;

    println!("\nTirage à insérer :");
    display_draws(std::slice::from_ref(&draw));

    let confirm = prompt("\nConfirmer l'insertion ? (o/n) : ")?;
    if confirm.trim().to_lowercase() == "o" {
        if insert_draw(conn, &draw)? {
            println!("Tirage inséré avec succès.");
        } else {
            println!("Ce tirage existe déjà (doublon ignoré).");
        }
    } else {
        println!("Insertion annulée.");
    }
    Ok(())
}

fn prompt(msg: &str) -> Result<String> {
    print!("{}", msg);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin()
        .read_line(&mut input)
        .context("Erreur de lecture")?;
    Ok(input.trim().to_string())
}

fn prompt_numbers() -> Result<[u8; PICK_COUNT]> {
    loop {
        let input = prompt("6 numéros (séparés par des espaces) : ")?;
        let nums: Result<Vec<u8>, _> = input.split_whitespace().map(|s| s.parse::<u8>()).collect();
        match nums {
            Ok(v) if v.len() == PICK_COUNT => {
                let mut arr = [0u8; PICK_COUNT];
                arr.copy_from_slice(&v);
                if DrawRecord::new("", arr, 0).is_ok() {
                    return Ok(arr);
                }
                println!("Numéros invalides (1-58, pas de doublons). Réessayez.");
            }
            _ => println!("Entrez exactement 6 numéros. Réessayez."),
        }
    }
}

fn prompt_bonus(numbers: &[u8; PICK_COUNT]) -> Result<u8> {
    loop {
        let input = prompt("Complémentaire (vide si aucun) : ")?;
        if input.is_empty() {
            return Ok(0);
        }
        match input.parse::<u8>() {
            Ok(b) if DrawRecord::new("", *numbers, b).is_ok() => return Ok(b),
            _ => println!("Complémentaire invalide (1-58, distinct des numéros). Réessayez."),
        }
    }
}
