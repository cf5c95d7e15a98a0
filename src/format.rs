//! Display helpers shared by the stats report and the dashboard.

use crate::protocol::Trend;
use chrono::NaiveDate;
use ratatui::style::Color;

/// Formats with en-US digit grouping and a fixed number of decimals.
pub fn format_number(value: f64, decimals: usize) -> String {
    let rendered = format!("{:.*}", decimals, value.abs());
    let (int_part, frac_part) = match rendered.split_once('.') {
        Some((int_part, frac_part)) => (int_part, Some(frac_part)),
        None => (rendered.as_str(), None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, digit) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let negative = value < 0.0 && rendered.chars().any(|c| c.is_ascii_digit() && c != '0');
    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str(&grouped);
    if let Some(frac_part) = frac_part {
        out.push('.');
        out.push_str(frac_part);
    }
    out
}

pub fn format_change(percent: f64) -> String {
    let body = format_number(percent, 1);
    if percent > 0.0 && body != "0.0" {
        format!("+{body}%")
    } else {
        format!("{body}%")
    }
}

/// Short month/day form, e.g. "Jan 5".
pub fn format_date(date: NaiveDate) -> String {
    date.format("%b %-d").to_string()
}

pub fn trend_color(trend: Trend) -> Color {
    match trend {
        Trend::Up => Color::Green,
        Trend::Down => Color::Red,
        Trend::Stable => Color::Gray,
    }
}

pub fn trend_symbol(trend: Trend) -> &'static str {
    match trend {
        Trend::Up => "↑",
        Trend::Down => "↓",
        Trend::Stable => "→",
    }
}

/// Card value rendering: the average length keeps one decimal.
pub fn format_metric_value(title: &str, value: f64) -> String {
    if title.starts_with("Avg") {
        format_number(value, 1)
    } else {
        format_number(value, 0)
    }
}
