//! # Exchange History Rendering
//!
//! ASCII plot of the boundary values exchanged during a run, for terminals
//! and log files. One column per exchange (thinned to fit [`MAX_COLUMNS`]),
//! value on the vertical axis, last exchange marked with `X`.

use crate::scheduler::ExchangeSample;

const ROWS: usize = 16;
const Y_AXIS_WIDTH: usize = 8; // Space for Y-axis labels
/// Widest plot before samples are thinned
pub const MAX_COLUMNS: usize = 96;

/// Calculate the value range of the plotted samples
fn value_bounds(samples: &[&ExchangeSample]) -> (f64, f64) {
    samples
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), sample| {
            (min.min(sample.value), max.max(sample.value))
        })
}

/// Format an axis label with precision suited to the plotted range
fn format_label(value: f64, range: f64) -> String {
    if range >= 10.0 {
        format!("{:.0}", value)
    } else if range >= 1.0 {
        format!("{:.1}", value)
    } else {
        format!("{:.2}", value)
    }
}

/// Render the exchange history as text.
pub fn render_ascii(history: &[ExchangeSample]) -> String {
    if history.is_empty() {
        return "(no exchanges)\n".to_string();
    }

    let stride = history.len().div_ceil(MAX_COLUMNS);
    let mut samples: Vec<&ExchangeSample> = history.iter().step_by(stride).collect();
    if let Some(last) = history.last() {
        if samples.last().map(|s| s.iteration) != Some(last.iteration) {
            samples.push(last);
        }
    }
    let columns = samples.len();

    let (min_value, max_value) = value_bounds(&samples);
    let range = max_value - min_value;
    let value_to_row = |value: f64| {
        if range <= 0.0 {
            return ROWS / 2;
        }
        let normalized = (value - min_value) / range;
        ((1.0 - normalized) * (ROWS as f64 - 1.0)).round() as usize
    };

    let mut grid = vec![vec![' '; columns + Y_AXIS_WIDTH]; ROWS];

    // Labels at the top, middle and bottom rows
    for value in [max_value, (max_value + min_value) / 2.0, min_value] {
        let row = value_to_row(value);
        let label = format!("{:>width$}", format_label(value, range), width = Y_AXIS_WIDTH - 1);
        for (i, ch) in label.chars().take(Y_AXIS_WIDTH - 1).enumerate() {
            grid[row][i] = ch;
        }
    }
    for row in grid.iter_mut() {
        row[Y_AXIS_WIDTH - 1] = '│';
    }

    for (column, sample) in samples.iter().enumerate() {
        let row = value_to_row(sample.value);
        grid[row][column + Y_AXIS_WIDTH] = if column == columns - 1 { 'X' } else { '•' };
    }

    let mut out = String::new();
    for row in grid {
        out.push_str(row.into_iter().collect::<String>().trim_end());
        out.push('\n');
    }

    // Time markers below the chart, every sixth column
    let padding = " ".repeat(Y_AXIS_WIDTH);
    let time_markers: String = (0..columns)
        .map(|i| if i % 6 == 0 { '|' } else { ' ' })
        .collect();
    out.push_str(&padding);
    out.push_str(time_markers.trim_end());
    out.push('\n');

    let first = samples[0].time / 3600.0;
    let last = samples[columns - 1].time / 3600.0;
    out.push_str(&format!("{}t = {:.1} h .. {:.1} h\n", padding, first, last));
    out
}

/// Print the exchange history to stdout.
pub fn draw_ascii(history: &[ExchangeSample]) {
    print!("{}", render_ascii(history));
}
