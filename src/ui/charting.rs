/// Plot points for the score history chart: one point per past session,
/// numbered from 1, in recorded order.
pub fn history_points(recent: &[f64]) -> Vec<(f64, f64)> {
    recent
        .iter()
        .enumerate()
        .map(|(i, score)| ((i + 1) as f64, *score))
        .collect()
}

/// X bounds for the history chart. The axis always spans at least two
/// sessions so a single point does not collapse it.
pub fn history_x_bounds(session_count: usize) -> (f64, f64) {
    (1.0, session_count.max(2) as f64)
}

/// Scores live on a fixed 0-100 axis.
pub const SCORE_BOUNDS: (f64, f64) = (0.0, 100.0);

/// Format a simple numeric label consistently
pub fn format_label(val: f64) -> String {
    if (val - val.round()).abs() < f64::EPSILON {
        format!("{}", val.round())
    } else {
        format!("{val:.2}")
    }
}
