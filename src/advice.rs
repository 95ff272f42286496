use itertools::Itertools;
use rand::seq::SliceRandom;
use rand::Rng;
use ratatui::style::Color;

use crate::score::{ExerciseScore, ScoreReport};
use crate::util;

/// How many of the weakest exercises get a dedicated advice line.
pub const LOWEST_COUNT: usize = 3;
const TOP_PARTS: usize = 3;

const ADVICE_TAILS: [&str; 5] = [
    "少し大きく動かすと改善します。",
    "ゆっくり大きめに動かすと良くなります。",
    "意識して動かすだけでも改善が期待できます。",
    "無理のない範囲で可動域を広げてみましょう。",
    "一つ一つの動きを丁寧に行うと安定します。",
];

pub fn score_message(score: f64) -> &'static str {
    if score >= 90.0 {
        "🌟 すごい！！完璧です！"
    } else if score >= 70.0 {
        "👍 あとちょっと！かなり良いです！"
    } else if score >= 40.0 {
        "🙂 少しずつ改善していきましょう！"
    } else {
        "🔥 一緒に頑張ろう！伸びしろがあります！"
    }
}

pub fn score_color(score: f64) -> Color {
    if score >= 90.0 {
        Color::Rgb(0xd4, 0xed, 0xda)
    } else if score >= 70.0 {
        Color::Rgb(0xff, 0xf3, 0xcd)
    } else if score >= 40.0 {
        Color::Rgb(0xff, 0xee, 0xba)
    } else {
        Color::Rgb(0xf8, 0xd7, 0xda)
    }
}

/// The weakest exercises, ascending by score.
pub fn lowest_exercises(report: &ScoreReport) -> Vec<&ExerciseScore> {
    report
        .exercises
        .iter()
        .sorted_by(|a, b| a.mean_score.total_cmp(&b.mean_score))
        .take(LOWEST_COUNT)
        .collect()
}

/// One advice sentence for an exercise: its worst body parts joined with
/// an interpunct, plus a randomly picked encouragement tail.
pub fn exercise_advice<R: Rng>(report: &ScoreReport, exercise: &str, rng: &mut R) -> String {
    let parts: Vec<&str> = report
        .part_errors
        .iter()
        .filter(|p| p.exercise == exercise)
        .sorted_by(|a, b| b.mean_abs_error.total_cmp(&a.mean_abs_error))
        .map(|p| p.part.as_str())
        .unique()
        .take(TOP_PARTS)
        .collect();

    if parts.is_empty() {
        return "特に大きな問題はありませんでした。".to_string();
    }
    let tail = ADVICE_TAILS.choose(rng).copied().unwrap_or(ADVICE_TAILS[0]);
    format!("{}の動きが小さめです。{}", parts.join("・"), tail)
}

/// Body parts with the largest mean error across all exercises, worst first.
pub fn weak_parts(report: &ScoreReport) -> Vec<String> {
    let grouped = report
        .part_errors
        .iter()
        .into_group_map_by(|p| p.part.clone());

    grouped
        .into_iter()
        .map(|(part, rows)| {
            let errors: Vec<f64> = rows.iter().map(|r| r.mean_abs_error).collect();
            (part, util::mean(&errors).unwrap_or(0.0))
        })
        .sorted_by(|a, b| b.1.total_cmp(&a.1))
        .take(TOP_PARTS)
        .map(|(part, _)| part)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartKey {
    Neck,
    Shoulder,
    Trunk,
    WholeBody,
}

const KEY_PRIORITY: [PartKey; 4] = [
    PartKey::Neck,
    PartKey::Shoulder,
    PartKey::Trunk,
    PartKey::WholeBody,
];

fn part_key(text: &str) -> Option<PartKey> {
    let s = text.to_lowercase();
    if s.contains('首') || s.contains("neck") {
        Some(PartKey::Neck)
    } else if s.contains('肩') || s.contains("shoulder") || s.contains('腕') || s.contains("arm") {
        Some(PartKey::Shoulder)
    } else if s.contains('腰') || s.contains('背') || s.contains("back") || s.contains("体幹") {
        Some(PartKey::Trunk)
    } else if s.contains("全身") || s.contains("whole") || s.contains("body") {
        Some(PartKey::WholeBody)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameRecommendation {
    pub id: &'static str,
    pub label: &'static str,
    pub reason: &'static str,
}

fn game_for_key(key: PartKey, focus: bool) -> GameRecommendation {
    match key {
        PartKey::Neck => GameRecommendation {
            id: "neck_target",
            label: "首まわりネックターゲット",
            reason: if focus {
                "首まわりの動きに少し課題が見られたため、首を中心にやさしく動かせるゲームをおすすめします。"
            } else {
                "首はよく動いていましたので、今日は他の部位を休めつつ、首まわりもやさしく動かせるゲームをおすすめします。"
            },
        },
        PartKey::Shoulder => GameRecommendation {
            id: "balloon_catch",
            label: "座ってできる風船つかみゲーム",
            reason: "肩や腕まわりの動きが少し控えめだったため、無理なく大きく動かせるゲームをおすすめします。",
        },
        PartKey::Trunk | PartKey::WholeBody => GameRecommendation {
            id: "body_katanuki",
            label: "体全体のかたぬきゲーム",
            reason: "体全体の動きに少しバラつきが見られたため、全身をバランスよく動かせるゲームをおすすめします。",
        },
    }
}

fn default_game() -> GameRecommendation {
    GameRecommendation {
        id: "balloon_catch",
        label: "座ってできる風船つかみゲーム",
        reason: "無理のない範囲で楽しく続けられるよう、座ったままできるゲームをおすすめします。",
    }
}

/// Pick a follow-up mini-game. A body part the user mentioned in chat that
/// also shows up among the weak parts wins; otherwise the weakest part;
/// otherwise a whole-body game when the average score is low; otherwise
/// the gentle default.
pub fn recommend_game(
    chat_tags: &[String],
    report: &ScoreReport,
    weak: &[String],
) -> GameRecommendation {
    let tag_keys: Vec<PartKey> = chat_tags.iter().filter_map(|t| part_key(t)).collect();
    let weak_keys: Vec<PartKey> = weak.iter().filter_map(|p| part_key(p)).collect();

    for key in KEY_PRIORITY {
        if tag_keys.contains(&key) && weak_keys.contains(&key) {
            return game_for_key(key, true);
        }
    }
    if let Some(&key) = weak_keys.first() {
        return game_for_key(key, false);
    }

    let means: Vec<f64> = report.exercises.iter().map(|e| e.mean_score).collect();
    let avg = util::mean(&means).unwrap_or(100.0);
    if avg < 70.0 {
        return game_for_key(PartKey::WholeBody, false);
    }
    default_game()
}
