use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use textplots::Plot;

use crate::import::ImportResult;
use lotto_db::models::DrawRecord;
use lotto_engine::backtest::BacktestResult;
use lotto_engine::candidates::PredictedSet;
use lotto_engine::diagnostics::{FullDiagnostics, HotColdStatus};
use lotto_engine::pipeline::PredictionOutput;
use lotto_engine::reporter::RoundSummary;
use lotto_engine::scoring::NumberScore;

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn join_numbers(numbers: &[u8]) -> String {
    numbers
        .iter()
        .map(|n| format!("{:2}", n))
        .collect::<Vec<_>>()
        .join(" - ")
}

pub fn display_draws(draws: &[DrawRecord]) {
    if draws.is_empty() {
        println!("Aucun tirage à afficher.");
        return;
    }

    let mut table = new_table(vec!["Date", "Numéros", "Compl.", "Format"]);
    for draw in draws {
        let bonus = if draw.bonus > 0 { format!("{:2}", draw.bonus) } else { "—".to_string() };
        table.add_row(vec![
            draw.date.clone(),
            join_numbers(&draw.numbers),
            bonus,
            draw.format().to_string(),
        ]);
    }
    println!("{table}");
}

pub fn display_import_summary(result: &ImportResult) {
    println!("Import terminé :");
    println!("  Total lignes lues : {}", result.total_records);
    println!("  Insérés           : {}", result.inserted);
    println!("  Doublons ignorés  : {}", result.skipped);
    if result.errors > 0 {
        println!("  Lignes invalides  : {}", result.errors);
    }
}

pub fn display_diagnostics(d: &FullDiagnostics, top: usize) {
    println!(
        "\n== Diagnostics : {} tirages, format 6/{} ({} dans l'analyse des relations) ==\n",
        d.draw_count, d.pool_size, d.relation_draw_count
    );

    if d.eras.len() > 1 {
        let mut table = new_table(vec!["Ère", "Format", "Tirages", "Indices"]);
        for (i, era) in d.eras.iter().enumerate() {
            table.add_row(vec![
                (i + 1).to_string(),
                format!("6/{}", era.pool_size),
                era.draw_count.to_string(),
                format!("{}..={}", era.start_index, era.end_index),
            ]);
        }
        println!("{table}");
    }

    let mut table = new_table(vec!["Numéro", "Fréquence", "Attendu", "Récent", "Statut", "Retard", "Ratio"]);
    let mut order: Vec<usize> = (0..d.frequencies.len()).collect();
    order.sort_by(|&a, &b| d.frequencies[b].count.cmp(&d.frequencies[a].count).then(a.cmp(&b)));
    for &i in &order {
        let f = &d.frequencies[i];
        let (status, recent) = d
            .hot_cold_of(f.number)
            .map_or((HotColdStatus::Neutral, 0), |h| (h.status, h.recent_count));
        let color = match status {
            HotColdStatus::Hot => Color::Green,
            HotColdStatus::Cold => Color::Red,
            HotColdStatus::Neutral => Color::White,
        };
        let (gap, ratio) = d.gap(f.number).map_or((0, 0.0), |g| (g.current_gap, g.ratio()));
        table.add_row(vec![
            Cell::new(format!("{:2}", f.number)),
            Cell::new(f.count.to_string()),
            Cell::new(format!("{:.1}", f.expected)),
            Cell::new(recent.to_string()),
            Cell::new(status.to_string()).fg(color),
            Cell::new(gap.to_string()),
            Cell::new(format!("{:.2}", ratio)),
        ]);
    }
    println!("{table}");

    let mut table = new_table(vec!["Paire", "Occurrences", "z"]);
    for p in d.pairs.iter().take(top) {
        table.add_row(vec![format!("{:2} - {:2}", p.a, p.b), p.count.to_string(), format!("{:.2}", p.z_score)]);
    }
    println!("\n── Paires ──\n{table}");

    let mut table = new_table(vec!["Combinaison", "Occurrences"]);
    for c in d.triples.iter().chain(&d.quadruples).chain(&d.quintuples).take(top) {
        table.add_row(vec![join_numbers(&c.numbers), c.count.to_string()]);
    }
    println!("\n── Triplets et plus ──\n{table}");

    println!("\n── Tests ──");
    println!(
        "  Khi² = {:.2} ({} ddl), p = {:.4}",
        d.chi_square.statistic, d.chi_square.degrees_of_freedom, d.chi_square.p_value
    );
    let significant: Vec<String> = d
        .autocorrelation
        .iter()
        .filter(|a| a.significant)
        .map(|a| format!("{} ({:+.3})", a.number, a.lag1))
        .collect();
    println!(
        "  Autocorrélation (seuil {:.3}) : {}",
        d.autocorrelation_threshold,
        if significant.is_empty() { "aucune".to_string() } else { significant.join(", ") }
    );
    println!(
        "  Entropie {:.3}, concentration {:.3}, tendance {:+.4} : régime {}",
        d.entropy.entropy, d.entropy.concentration, d.entropy.trend, d.entropy.regime
    );
    println!("  Somme typique : {:.0} à {:.0}", d.sum_band.0, d.sum_band.1);
    if d.bias.biased {
        println!("  Biais : {}", d.bias.reasons.join(" ; "));
    } else {
        println!("  Biais : aucun");
    }
}

pub fn display_scores(scores: &[NumberScore], top: usize) {
    let mut table = new_table(vec![
        "Numéro", "Composite", "Bayes", "Chaud/froid", "Retard", "Paires", "Triplets", "Position", "Transition",
        "Répétition",
    ]);
    for s in scores.iter().take(top) {
        table.add_row(vec![
            format!("{:2}", s.number),
            format!("{:.4}", s.composite_score),
            format!("{:.3}", s.bayesian),
            format!("{:.3}", s.hot_cold),
            format!("{:.3}", s.gap),
            format!("{:.3}", s.pair_affinity),
            format!("{:.3}", s.triple_affinity),
            format!("{:.3}", s.positional),
            format!("{:.3}", s.transition),
            format!("{:.3}", s.repeat),
        ]);
    }
    println!("\n── Scores composites ──\n{table}");
}

pub fn display_sets(sets: &[PredictedSet]) {
    let mut table = new_table(vec!["#", "Grille", "Méthode", "Score", "Lift", "Groupes"]);
    for (i, set) in sets.iter().enumerate() {
        let groups = set.group_breakdown.iter().map(|g| g.to_string()).collect::<Vec<_>>().join("/");
        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(join_numbers(&set.numbers)),
            Cell::new(set.method.to_string()),
            Cell::new(format!("{:.3}", set.total_score)),
            Cell::new(format!("{:.2}", set.relative_lift)),
            Cell::new(groups),
        ]);
    }
    println!("\n🎲 Grilles candidates\n{table}");
}

pub fn display_rounds(rounds: &[RoundSummary]) {
    if rounds.len() < 2 {
        return;
    }
    let mut table = new_table(vec!["Tour", "Utilité", "Taux", "Meilleur", "Profil", ""]);
    for r in rounds {
        table.add_row(vec![
            r.round.to_string(),
            format!("{:.3}", r.score),
            format!("{:.4}", r.model_hit_rate),
            r.best_overlap.to_string(),
            r.profile_name.clone(),
            if r.improved { "★".to_string() } else { String::new() },
        ]);
    }
    println!("\n── Tours d'entraînement ──\n{table}");
}

pub fn display_backtest(result: &BacktestResult, last_rows: usize) {
    println!(
        "\n== Backtest : {} en entraînement, {} testés ==\n",
        result.train_size, result.test_size
    );
    if result.test_size == 0 {
        println!("  Historique insuffisant : aucun tirage testé.");
        return;
    }
    println!("  Recouvrement moyen  : {:.3} (hasard : {:.3})", result.avg_overlap, result.random_baseline_overlap);
    println!("  Taux de réussite    : {:.4}", result.model_hit_rate);
    println!("  Meilleur            : {}", result.best_overlap);
    println!("  Profil final        : {}", result.final_profile.name);
    let trend = &result.learning_trend;
    if trend.window > 0 {
        println!(
            "  Tendance ({} tirages) : {:.3} → {:.3} ({:+.3})",
            trend.window, trend.early_avg_overlap, trend.late_avg_overlap, trend.delta
        );
    }
    let dist = result
        .hit_distribution
        .iter()
        .enumerate()
        .filter(|(_, &c)| c > 0)
        .map(|(k, c)| format!("{k}:{c}"))
        .collect::<Vec<_>>()
        .join("  ");
    println!("  Distribution        : {dist}");

    if let Some(m) = &result.mastery {
        println!("\n  Maîtrise (recherche sur tirage connu, pas une prévision) :");
        println!("    Tentatives         : {} ({:.1} par tirage)", m.total_attempts, m.avg_attempts_per_sequence);
        println!("    Tirages résolus    : {}/{}", m.solved_sequences, result.test_size);
        println!("    Première tentative : {:.3} en moyenne", m.forward_avg_overlap);
        println!("    Meilleure tentative: {:.3} en moyenne", m.best_avg_overlap);
        if m.global_cap_reached {
            println!("    Plafond global atteint");
        }
    }

    if !result.sweep.is_empty() {
        let mut table = new_table(vec!["Profil", "Utilité (balayage)"]);
        for s in &result.sweep {
            table.add_row(vec![s.name.clone(), format!("{:.1}", s.utility)]);
        }
        println!("\n{table}");
    }

    let mut table = new_table(vec!["Date", "Tirage", "Prédit", "Recouvrement", "Profil"]);
    let skip = result.rows.len().saturating_sub(last_rows);
    for row in result.rows.iter().skip(skip) {
        let actual = format!("{} + {}", join_numbers(&row.actual), row.bonus);
        let color = if row.overlap >= 3 { Color::Green } else { Color::White };
        let overlap = if row.best_overlap > row.overlap {
            format!("{} (meilleur {})", row.overlap, row.best_overlap)
        } else {
            row.overlap.to_string()
        };
        table.add_row(vec![
            Cell::new(&row.date),
            Cell::new(actual),
            Cell::new(join_numbers(&row.predicted)),
            Cell::new(overlap).fg(color),
            Cell::new(&row.profile_name),
        ]);
    }
    println!("\n{table}");

    display_overlap_chart(result);
}

/// Recouvrement glissant sur 10 tirages au fil du test.
fn display_overlap_chart(result: &BacktestResult) {
    const WINDOW: usize = 10;
    if result.rows.len() < WINDOW {
        return;
    }
    let overlaps: Vec<f32> = result.rows.iter().map(|r| r.overlap as f32).collect();
    let points: Vec<(f32, f32)> = overlaps
        .windows(WINDOW)
        .enumerate()
        .map(|(i, w)| ((i + WINDOW) as f32, w.iter().sum::<f32>() / WINDOW as f32))
        .collect();
    let baseline = result.random_baseline_overlap as f32;
    let y_max = points.iter().map(|p| p.1).fold(baseline, f32::max) + 0.5;

    println!("\n== Recouvrement glissant ({WINDOW} tirages), hasard = {baseline:.2} ==\n");
    let x_max = overlaps.len() as f32;
    let line = [(WINDOW as f32, baseline), (x_max, baseline)];
    let curve = textplots::Shape::Lines(&points);
    let chance = textplots::Shape::Lines(&line);
    let mut chart = textplots::Chart::new_with_y_range(120, 40, WINDOW as f32, x_max, 0.0, y_max);
    println!("{}", chart.lineplot(&curve).lineplot(&chance));
}

pub fn display_prediction(output: &PredictionOutput, top_scores: usize) {
    display_rounds(&output.rounds);
    display_scores(&output.scores, top_scores);
    display_sets(&output.sets);
    println!("\n⚠ {}", output.warning);
}
